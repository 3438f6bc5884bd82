//! Test doubles shared by the controller tests
//!
//! `InMemorySecrets` behaves like a Secret API: it enforces
//! `resourceVersion` preconditions, evaluates label selectors and applies
//! JSON merge patches, so stateful flows can be observed end to end.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use parking_lot::Mutex;

use canopy_common::crd::{
    CloudConfigStatus, CloudSpec, DnsSpec, KubernetesSpec, LastOperation, LastOperationState,
    MachineImage, OperatingSystemConfig, OperatingSystemConfigSpec, OperatingSystemConfigStatus,
    SecretReference, Shoot, ShootSpec, Worker,
};
use canopy_common::events::EventPublisher;
use canopy_common::template::{ChartApplier, RenderedChart, Values};
use canopy_common::{Error, Result};

use crate::client::SecretClient;

/// A minimal scheduled Shoot
pub fn sample_shoot(namespace: &str, name: &str) -> Shoot {
    let mut shoot = Shoot::new(
        name,
        ShootSpec {
            cloud: CloudSpec {
                profile: "aws".to_string(),
                seed: Some("aws-eu1".to_string()),
                machine_image: None,
                workers: vec![Worker {
                    name: "pool-a".to_string(),
                    machine_type: "m5.large".to_string(),
                    minimum: 1,
                    maximum: 3,
                }],
            },
            kubernetes: KubernetesSpec {
                version: "1.15.0".to_string(),
                kubelet: None,
            },
            networking: None,
            dns: None,
            maintenance: None,
        },
    );
    shoot.metadata.namespace = Some(namespace.to_string());
    shoot.metadata.resource_version = Some("1".to_string());
    shoot
}

/// A Secret with the given labels
pub fn secret(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// In-memory Secret store with API-server-like semantics
#[derive(Default)]
pub struct InMemorySecrets {
    objects: Mutex<BTreeMap<(String, String), Secret>>,
    version: AtomicU64,
    writes: AtomicU64,
    patches: Mutex<Vec<(String, String)>>,
    fail_writes: Mutex<Option<String>>,
    vanish_on_patch: Mutex<HashSet<(String, String)>>,
}

impl InMemorySecrets {
    /// Seed the store with existing objects
    pub fn with(secrets: impl IntoIterator<Item = Secret>) -> Self {
        let store = Self::default();
        for s in secrets {
            store.insert(s);
        }
        store
    }

    /// Insert or overwrite an object, bumping its resourceVersion
    pub fn insert(&self, mut secret: Secret) {
        normalize(&mut secret);
        secret.metadata.resource_version = Some(self.next_version());
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        self.objects.lock().insert(key, secret);
    }

    /// Current copy of an object
    pub fn get(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.objects
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of create/replace calls that succeeded
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// `(namespace, name)` of every merge patch issued, including failed ones
    pub fn patched(&self) -> Vec<(String, String)> {
        self.patches.lock().clone()
    }

    /// Make every create/replace fail with an internal error
    pub fn fail_writes(&self, message: &str) {
        *self.fail_writes.lock() = Some(message.to_string());
    }

    /// Delete the object right before it is patched
    pub fn vanish_on_patch(&self, namespace: &str, name: &str) {
        self.vanish_on_patch
            .lock()
            .insert((namespace.to_string(), name.to_string()));
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn check_write(&self) -> Result<()> {
        match self.fail_writes.lock().as_ref() {
            Some(msg) => Err(Error::internal_with_context("in-memory", msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SecretClient for InMemorySecrets {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.get(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        self.check_write()?;
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        if self.objects.lock().contains_key(&key) {
            return Err(Error::conflict(format!("{}/{}", key.0, key.1), "already exists"));
        }
        self.insert(secret.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.get(&key.0, &key.1)
            .ok_or_else(|| Error::internal("created secret vanished"))
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret> {
        self.check_write()?;
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        let current = self
            .get(&key.0, &key.1)
            .ok_or_else(|| Error::not_found(format!("{}/{}", key.0, key.1)))?;
        if current.metadata.resource_version != secret.metadata.resource_version {
            return Err(Error::conflict(
                format!("{}/{}", key.0, key.1),
                "the object has been modified",
            ));
        }
        self.insert(secret.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.get(&key.0, &key.1)
            .ok_or_else(|| Error::internal("replaced secret vanished"))
    }

    async fn list_secrets(
        &self,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<Vec<Secret>> {
        Ok(self
            .objects
            .lock()
            .values()
            .filter(|s| namespace.is_none() || s.metadata.namespace == namespace)
            .filter(|s| selector_matches(label_selector, s.labels()))
            .cloned()
            .collect())
    }

    async fn merge_patch_secret(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        self.patches.lock().push(key.clone());
        if self.vanish_on_patch.lock().contains(&key) {
            self.objects.lock().remove(&key);
        }
        let current = self
            .get(namespace, name)
            .ok_or_else(|| Error::not_found(format!("{}/{}", namespace, name)))?;
        let mut doc = serde_json::to_value(&current)
            .map_err(|e| Error::serialization(e.to_string()))?;
        merge_patch(&mut doc, patch);
        let patched: Secret =
            serde_json::from_value(doc).map_err(|e| Error::serialization(e.to_string()))?;
        self.insert(patched);
        Ok(())
    }
}

/// Move `stringData` into `data`, as the API server does
fn normalize(secret: &mut Secret) {
    if let Some(string_data) = secret.string_data.take() {
        let data = secret.data.get_or_insert_with(BTreeMap::new);
        for (k, v) in string_data {
            data.insert(k, ByteString(v.into_bytes()));
        }
    }
}

/// RFC 7386 JSON merge patch
fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match patch {
        serde_json::Value::Object(entries) => {
            if !target.is_object() {
                *target = serde_json::Value::Object(Default::default());
            }
            if let serde_json::Value::Object(map) = target {
                for (k, v) in entries {
                    if v.is_null() {
                        map.remove(k);
                    } else {
                        merge_patch(map.entry(k.clone()).or_insert(serde_json::Value::Null), v);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

/// Equality-based label selector evaluation (`k=v`, `k!=v`, `k`, `!k`)
fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                labels.get(k.trim()).map(String::as_str) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else if let Some(k) = term.strip_prefix('!') {
                !labels.contains_key(k)
            } else {
                labels.contains_key(term)
            }
        })
}

/// A published event, as recorded by [`RecordingEventPublisher`]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    /// Normal or Warning
    pub type_: EventType,
    /// Reason string
    pub reason: String,
    /// Note text
    pub note: Option<String>,
}

/// Event publisher that keeps every event for later assertions
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    /// Everything published so far
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().push(RecordedEvent {
            type_,
            reason: reason.to_string(),
            note,
        });
    }
}

mockall::mock! {
    /// Chart applier double
    pub ChartApplier {}

    #[async_trait]
    impl ChartApplier for ChartApplier {
        async fn apply(
            &self,
            chart_path: &str,
            namespace: &str,
            release_name: &str,
            values: &Values,
        ) -> Result<()>;

        fn render(
            &self,
            chart_path: &str,
            namespace: &str,
            release_name: &str,
            values: &Values,
        ) -> Result<RenderedChart>;
    }
}

/// A Shoot with a machine image, a DNS domain and the given worker pools
pub fn provisionable_shoot(namespace: &str, name: &str, workers: &[&str]) -> Shoot {
    let mut shoot = sample_shoot(namespace, name);
    shoot.spec.cloud.machine_image = Some(MachineImage {
        name: "coreos".to_string(),
        version: "2135.6.0".to_string(),
    });
    shoot.spec.dns = Some(DnsSpec {
        domain: Some(format!("{}.{}.example.com", name, namespace)),
    });
    shoot.spec.cloud.workers = workers
        .iter()
        .map(|w| Worker {
            name: w.to_string(),
            machine_type: "m5.large".to_string(),
            minimum: 1,
            maximum: 3,
        })
        .collect();
    shoot
}

/// An OperatingSystemConfig the extension finished, publishing into Secret `namespace/name`
pub fn ready_osc(namespace: &str, name: &str, command: Option<&str>, units: &[&str]) -> OperatingSystemConfig {
    let mut osc = pending_osc(namespace, name);
    osc.status = Some(OperatingSystemConfigStatus {
        last_operation: Some(LastOperation {
            state: LastOperationState::Succeeded,
            description: "published".to_string(),
        }),
        observed_generation: Some(1),
        cloud_config: Some(CloudConfigStatus {
            secret_ref: SecretReference {
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
        }),
        command: command.map(str::to_string),
        units: units.iter().map(|u| u.to_string()).collect(),
        ..Default::default()
    });
    osc
}

/// An OperatingSystemConfig the extension has not picked up yet
pub fn pending_osc(namespace: &str, name: &str) -> OperatingSystemConfig {
    let mut osc = OperatingSystemConfig::new(
        name,
        OperatingSystemConfigSpec {
            type_: "coreos".to_string(),
            purpose: "provision".to_string(),
            reload_config_file_path: None,
        },
    );
    osc.metadata.namespace = Some(namespace.to_string());
    osc.metadata.generation = Some(1);
    osc
}

/// A Secret publishing `content` under the `cloud_config` key
pub fn cloud_config_secret(namespace: &str, name: &str, content: &str) -> Secret {
    let mut secret = secret(namespace, name, &[]);
    secret.data = Some(BTreeMap::from([(
        "cloud_config".to_string(),
        ByteString(content.as_bytes().to_vec()),
    )]));
    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_equal_selector_matches_missing_labels() {
        let labels = BTreeMap::from([("a".to_string(), "1".to_string())]);
        assert!(selector_matches("b!=2", &labels));
        assert!(selector_matches("a!=2", &labels));
        assert!(!selector_matches("a!=1", &labels));
        assert!(selector_matches("a=1", &labels));
        assert!(selector_matches("a", &labels));
        assert!(selector_matches("!b", &labels));
    }

    #[test]
    fn merge_patch_sets_and_removes_keys() {
        let mut doc = serde_json::json!({"metadata": {"labels": {"a": "1", "b": "2"}}});
        merge_patch(
            &mut doc,
            &serde_json::json!({"metadata": {"labels": {"a": null, "c": "3"}}}),
        );
        assert_eq!(doc, serde_json::json!({"metadata": {"labels": {"b": "2", "c": "3"}}}));
    }
}

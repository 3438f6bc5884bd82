//! EncryptionConfiguration document
//!
//! The API server's at-rest encryption policy: one entry per resource type,
//! each with an ordered provider chain. The first provider encrypts new
//! writes; every provider can read. `identity` first therefore means
//! "write plaintext, read anything", which is how a configuration starts out.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};

use canopy_common::error::UNKNOWN_CONTEXT;
use canopy_common::kube_utils::sha256_hex;
use canopy_common::random::random_bytes;
use canopy_common::{Error, Result, ETCD_ENCRYPTION_RESOURCE_SECRETS};

/// Secret data key holding the serialized configuration
pub const ENCRYPTION_CONFIGURATION_DATA_KEY: &str = "encryption-configuration.yaml";

/// apiVersion of the document
pub const API_VERSION: &str = "apiserver.config.k8s.io/v1";

/// kind of the document
pub const KIND: &str = "EncryptionConfiguration";

/// Length of generated AES-CBC keys in bytes
pub const AESCBC_KEY_LENGTH: usize = 32;

/// At-rest encryption policy for the API server
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfiguration {
    /// Always [`API_VERSION`]
    pub api_version: String,
    /// Always [`KIND`]
    pub kind: String,
    /// Provider chains per resource group
    pub resources: Vec<ResourceConfiguration>,
}

/// Provider chain for a set of resource types
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ResourceConfiguration {
    /// Resource types the chain applies to
    pub resources: Vec<String>,
    /// Ordered providers; the first one encrypts new writes
    pub providers: Vec<ProviderConfiguration>,
}

/// One provider; exactly one field is set
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProviderConfiguration {
    /// AES-GCM provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aesgcm: Option<KeysConfiguration>,
    /// AES-CBC provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aescbc: Option<KeysConfiguration>,
    /// XSalsa20-Poly1305 provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secretbox: Option<KeysConfiguration>,
    /// No-op provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityConfiguration>,
}

impl ProviderConfiguration {
    fn is_identity(&self) -> bool {
        self.identity.is_some()
    }
}

/// Keys of a symmetric provider; the first encrypts
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct KeysConfiguration {
    /// Keys in order of preference
    pub keys: Vec<Key>,
}

/// A named key
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Key {
    /// Key name, unique within the provider
    pub name: String,
    /// base64-encoded key material
    pub secret: String,
}

/// Marker for the identity provider, serialized as `{}`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct IdentityConfiguration {}

impl EncryptionConfiguration {
    /// A passive configuration for secrets: `identity` first, then AES-CBC with `key`
    pub fn passive(now: DateTime<Utc>, key: &[u8]) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            resources: vec![ResourceConfiguration {
                resources: vec![ETCD_ENCRYPTION_RESOURCE_SECRETS.to_string()],
                providers: vec![
                    ProviderConfiguration {
                        identity: Some(IdentityConfiguration {}),
                        ..Default::default()
                    },
                    ProviderConfiguration {
                        aescbc: Some(KeysConfiguration {
                            keys: vec![Key {
                                name: format!("key{}", now.timestamp()),
                                secret: STANDARD.encode(key),
                            }],
                        }),
                        ..Default::default()
                    },
                ],
            }],
        }
    }

    /// A passive configuration with a freshly generated key
    pub fn new_passive(now: DateTime<Utc>) -> Result<Self> {
        Ok(Self::passive(now, &random_bytes(AESCBC_KEY_LENGTH)?))
    }

    /// Parse a serialized document
    pub fn read(data: &[u8]) -> Result<Self> {
        let conf: Self = serde_yaml::from_slice(data)
            .map_err(|e| Error::serialization_for_kind(KIND, e.to_string()))?;
        if conf.api_version != API_VERSION || conf.kind != KIND {
            return Err(Error::serialization_for_kind(
                KIND,
                format!("unexpected type {}/{}", conf.api_version, conf.kind),
            ));
        }
        Ok(conf)
    }

    /// Serialize the document
    pub fn write(&self) -> Result<Vec<u8>> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| Error::serialization_for_kind(KIND, e.to_string()))
    }

    /// SHA-256 of the serialized document, hex encoded
    pub fn checksum(&self) -> Result<String> {
        Ok(sha256_hex(&self.write()?))
    }

    /// Whether new writes of `resource` are encrypted
    pub fn is_encrypted(&self, resource: &str) -> Option<bool> {
        self.resource_entry(resource)
            .and_then(|entry| entry.providers.first())
            .map(|first| !first.is_identity())
    }

    /// Turn encryption of new writes of `resource` on or off.
    ///
    /// Only the position of the identity provider changes: first when off,
    /// second when on. Identity is never removed.
    pub fn set_resource_encryption(&mut self, resource: &str, encrypt: bool) -> Result<()> {
        let entry = self
            .resources
            .iter_mut()
            .find(|entry| entry.resources.iter().any(|r| r == resource))
            .ok_or_else(|| {
                Error::invariant(
                    UNKNOWN_CONTEXT,
                    format!("no encryption configuration entry for resource {}", resource),
                )
            })?;
        let identity = entry
            .providers
            .iter()
            .position(ProviderConfiguration::is_identity)
            .ok_or_else(|| {
                Error::invariant(
                    UNKNOWN_CONTEXT,
                    format!("no identity provider configured for resource {}", resource),
                )
            })?;

        let provider = entry.providers.remove(identity);
        let target = if encrypt { entry.providers.len().min(1) } else { 0 };
        entry.providers.insert(target, provider);
        Ok(())
    }

    fn resource_entry(&self, resource: &str) -> Option<&ResourceConfiguration> {
        self.resources
            .iter()
            .find(|entry| entry.resources.iter().any(|r| r == resource))
    }
}

/// The configuration stored in `secret`, `None` if it holds none yet
pub fn read_secret(secret: &Secret) -> Result<Option<EncryptionConfiguration>> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(ENCRYPTION_CONFIGURATION_DATA_KEY))
        .map(|raw| EncryptionConfiguration::read(&raw.0))
        .transpose()
}

/// Store `conf` in `secret`, leaving its other keys alone
pub fn update_secret(secret: &mut Secret, conf: &EncryptionConfiguration) -> Result<()> {
    let data = conf.write()?;
    secret
        .data
        .get_or_insert_with(BTreeMap::new)
        .insert(ENCRYPTION_CONFIGURATION_DATA_KEY.to_string(), ByteString(data));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 6, 3, 10, 0, 0).unwrap()
    }

    fn passive() -> EncryptionConfiguration {
        EncryptionConfiguration::passive(now(), &[7u8; AESCBC_KEY_LENGTH])
    }

    #[test]
    fn new_configuration_is_passive() {
        let conf = EncryptionConfiguration::new_passive(now()).unwrap();
        assert_eq!(conf.is_encrypted("secrets"), Some(false));

        let providers = &conf.resources[0].providers;
        assert_eq!(providers.len(), 2);
        let key = &providers[1].aescbc.as_ref().unwrap().keys[0];
        assert_eq!(key.name, format!("key{}", now().timestamp()));
        assert_eq!(STANDARD.decode(&key.secret).unwrap().len(), AESCBC_KEY_LENGTH);
    }

    #[test]
    fn serialized_form_matches_the_api_server_format() {
        let yaml = String::from_utf8(passive().write().unwrap()).unwrap();
        assert!(yaml.starts_with("apiVersion: apiserver.config.k8s.io/v1\nkind: EncryptionConfiguration\n"));
        assert!(yaml.contains("- identity: {}"));
        assert!(yaml.contains("- aescbc:"));
    }

    #[test]
    fn toggling_only_moves_identity() {
        let mut conf = passive();
        conf.set_resource_encryption("secrets", true).unwrap();
        assert_eq!(conf.is_encrypted("secrets"), Some(true));
        assert!(conf.resources[0].providers[1].identity.is_some());
        assert!(conf.resources[0].providers[0].aescbc.is_some());

        conf.set_resource_encryption("secrets", true).unwrap();
        assert!(conf.resources[0].providers[1].identity.is_some());

        conf.set_resource_encryption("secrets", false).unwrap();
        assert_eq!(conf, passive());
    }

    #[test]
    fn checksum_tracks_provider_order() {
        let passive_sum = passive().checksum().unwrap();
        assert_eq!(passive_sum.len(), 64);
        assert_eq!(passive_sum, passive().checksum().unwrap());

        let mut active = passive();
        active.set_resource_encryption("secrets", true).unwrap();
        assert_ne!(active.checksum().unwrap(), passive_sum);
    }

    #[test]
    fn missing_entry_or_identity_is_an_invariant_violation() {
        let mut conf = passive();
        assert!(matches!(
            conf.set_resource_encryption("configmaps", true),
            Err(Error::InvariantViolation { .. })
        ));

        conf.resources[0].providers.remove(0);
        assert!(matches!(
            conf.set_resource_encryption("secrets", true),
            Err(Error::InvariantViolation { .. })
        ));
    }

    #[test]
    fn secret_round_trip_keeps_other_keys() {
        let mut secret = Secret {
            data: Some(BTreeMap::from([(
                "other".to_string(),
                ByteString(b"x".to_vec()),
            )])),
            ..Default::default()
        };
        assert_eq!(read_secret(&secret).unwrap(), None);

        update_secret(&mut secret, &passive()).unwrap();
        assert_eq!(read_secret(&secret).unwrap(), Some(passive()));
        assert!(secret.data.unwrap().contains_key("other"));
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(EncryptionConfiguration::read(b"resources: [").is_err());
        let wrong_kind = b"apiVersion: v1\nkind: ConfigMap\nresources: []\n";
        assert!(matches!(
            EncryptionConfiguration::read(wrong_kind),
            Err(Error::Serialization { .. })
        ));
    }
}

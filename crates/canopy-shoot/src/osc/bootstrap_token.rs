//! Bootstrap tokens for joining nodes
//!
//! One token per day: its ID is derived from the date, so every
//! reconciliation on the same day finds the same Secret and reuses it until
//! it expires.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use tracing::{debug, info};

use canopy_common::kube_utils::sha256_hex;
use canopy_common::random::{random_string_from_charset, LOWER_ALPHANUMERIC};
use canopy_common::retry::RetryConfig;
use canopy_common::{Result, KUBE_SYSTEM_NAMESPACE};

use crate::client::{create_or_update_secret, SecretClient};

/// Secret type the API server authenticates bootstrap tokens from
pub const BOOTSTRAP_TOKEN_SECRET_TYPE: &str = "bootstrap.kubernetes.io/token";

/// Lifetime of a freshly issued token
pub const BOOTSTRAP_TOKEN_VALIDITY_HOURS: i64 = 48;

const TOKEN_ID_LENGTH: usize = 6;
const TOKEN_SECRET_LENGTH: usize = 16;

const KEY_DESCRIPTION: &str = "description";
const KEY_TOKEN_ID: &str = "token-id";
const KEY_TOKEN_SECRET: &str = "token-secret";
const KEY_EXPIRATION: &str = "expiration";
const KEY_USAGE_AUTHENTICATION: &str = "usage-bootstrap-authentication";
const KEY_USAGE_SIGNING: &str = "usage-bootstrap-signing";

/// A bootstrap token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapToken {
    /// Public token ID
    pub id: String,
    /// Secret half
    pub secret: String,
    /// When the API server stops accepting the token
    pub expiration: DateTime<Utc>,
}

impl BootstrapToken {
    /// `<id>.<secret>`, the form kubelets present
    pub fn token(&self) -> String {
        format!("{}.{}", self.id, self.secret)
    }

    fn from_secret(secret: &Secret) -> Option<Self> {
        let data = secret.data.as_ref()?;
        let field = |key: &str| {
            data.get(key)
                .and_then(|raw| String::from_utf8(raw.0.clone()).ok())
        };
        let expiration = DateTime::parse_from_rfc3339(&field(KEY_EXPIRATION)?)
            .ok()?
            .with_timezone(&Utc);
        Some(Self {
            id: field(KEY_TOKEN_ID)?,
            secret: field(KEY_TOKEN_SECRET)?,
            expiration,
        })
    }
}

/// ID of the token issued on the day of `now`
pub fn bootstrap_token_id(now: DateTime<Utc>) -> String {
    let digest = sha256_hex(now.format("%Y-%m-%d").to_string().as_bytes());
    digest[..TOKEN_ID_LENGTH].to_string()
}

/// Name of the Secret holding token `id`
pub fn bootstrap_token_secret_name(id: &str) -> String {
    format!("bootstrap-token-{}", id)
}

/// Return today's bootstrap token from the shoot's `kube-system`, issuing a
/// new one if there is none or it has expired.
pub async fn compute_bootstrap_token(
    shoot: &dyn SecretClient,
    retry: &RetryConfig,
    now: DateTime<Utc>,
) -> Result<BootstrapToken> {
    let id = bootstrap_token_id(now);
    let name = bootstrap_token_secret_name(&id);

    if let Some(existing) = shoot.get_secret(KUBE_SYSTEM_NAMESPACE, &name).await? {
        match BootstrapToken::from_secret(&existing) {
            Some(token) if token.expiration > now => {
                debug!(token_id = %id, "Reusing bootstrap token");
                return Ok(token);
            }
            Some(_) => debug!(token_id = %id, "Bootstrap token expired, issuing a new one"),
            None => debug!(token_id = %id, "Bootstrap token secret is incomplete, issuing a new one"),
        }
    }

    let token = BootstrapToken {
        id,
        secret: random_string_from_charset(TOKEN_SECRET_LENGTH, LOWER_ALPHANUMERIC)?,
        expiration: now + Duration::hours(BOOTSTRAP_TOKEN_VALIDITY_HOURS),
    };
    let data = token_data(&token);
    create_or_update_secret(shoot, retry, KUBE_SYSTEM_NAMESPACE, &name, |secret, _| {
        secret.type_ = Some(BOOTSTRAP_TOKEN_SECRET_TYPE.to_string());
        secret.string_data = None;
        secret.data = Some(data.clone());
        Ok(())
    })
    .await?;

    info!(token_id = %token.id, expiration = %token.expiration, "Issued bootstrap token");
    Ok(token)
}

fn token_data(token: &BootstrapToken) -> BTreeMap<String, ByteString> {
    [
        (
            KEY_DESCRIPTION,
            "Bootstrap token used by the cloud-config downloader of joining nodes".to_string(),
        ),
        (KEY_TOKEN_ID, token.id.clone()),
        (KEY_TOKEN_SECRET, token.secret.clone()),
        (
            KEY_EXPIRATION,
            token.expiration.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (KEY_USAGE_AUTHENTICATION, "true".to_string()),
        (KEY_USAGE_SIGNING, "true".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), ByteString(v.into_bytes())))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{secret, InMemorySecrets};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 6, 3, 10, 0, 0).unwrap()
    }

    fn text(secret: &Secret, key: &str) -> String {
        String::from_utf8(secret.data.as_ref().unwrap()[key].0.clone()).unwrap()
    }

    #[test]
    fn token_id_is_stable_within_a_day() {
        let morning = Utc.with_ymd_and_hms(2019, 6, 3, 0, 0, 1).unwrap();
        let evening = Utc.with_ymd_and_hms(2019, 6, 3, 23, 59, 59).unwrap();
        let next_day = Utc.with_ymd_and_hms(2019, 6, 4, 0, 0, 1).unwrap();

        let id = bootstrap_token_id(morning);
        assert_eq!(id.len(), 6);
        assert_eq!(id, sha256_hex(b"2019-06-03")[..6]);
        assert_eq!(bootstrap_token_id(evening), id);
        assert_ne!(bootstrap_token_id(next_day), id);
    }

    /// Story: the first call issues a token, later calls the same day reuse it
    #[tokio::test]
    async fn story_token_is_issued_once_and_reused() {
        let store = InMemorySecrets::default();
        let retry = RetryConfig::conflicts();

        let token = compute_bootstrap_token(&store, &retry, now()).await.unwrap();
        assert_eq!(token.secret.len(), 16);
        assert!(token.secret.bytes().all(|b| LOWER_ALPHANUMERIC.contains(&b)));
        assert_eq!(token.expiration, now() + Duration::hours(48));
        assert_eq!(token.token(), format!("{}.{}", token.id, token.secret));

        let stored = store
            .get(KUBE_SYSTEM_NAMESPACE, &bootstrap_token_secret_name(&token.id))
            .unwrap();
        assert_eq!(stored.type_.as_deref(), Some(BOOTSTRAP_TOKEN_SECRET_TYPE));
        assert_eq!(text(&stored, "token-id"), token.id);
        assert_eq!(text(&stored, "token-secret"), token.secret);
        assert_eq!(text(&stored, "expiration"), "2019-06-05T10:00:00Z");
        assert_eq!(text(&stored, "usage-bootstrap-authentication"), "true");
        assert_eq!(text(&stored, "usage-bootstrap-signing"), "true");
        assert!(!text(&stored, "description").is_empty());

        let writes = store.write_count();
        let later = now() + Duration::hours(5);
        let again = compute_bootstrap_token(&store, &retry, later).await.unwrap();
        assert_eq!(again, token);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn expired_token_is_replaced_in_place() {
        let id = bootstrap_token_id(now());
        let mut stale = secret(KUBE_SYSTEM_NAMESPACE, &bootstrap_token_secret_name(&id), &[]);
        stale.data = Some(token_data(&BootstrapToken {
            id: id.clone(),
            secret: "0123456789abcdef".to_string(),
            expiration: now() - Duration::minutes(1),
        }));
        let store = InMemorySecrets::with([stale]);

        let token = compute_bootstrap_token(&store, &RetryConfig::conflicts(), now())
            .await
            .unwrap();

        assert_eq!(token.id, id);
        assert_ne!(token.secret, "0123456789abcdef");
        let stored = store
            .get(KUBE_SYSTEM_NAMESPACE, &bootstrap_token_secret_name(&id))
            .unwrap();
        assert_eq!(text(&stored, "token-secret"), token.secret);
    }

    #[tokio::test]
    async fn incomplete_secret_is_overwritten() {
        let id = bootstrap_token_id(now());
        let store = InMemorySecrets::with([secret(
            KUBE_SYSTEM_NAMESPACE,
            &bootstrap_token_secret_name(&id),
            &[],
        )]);

        let token = compute_bootstrap_token(&store, &RetryConfig::conflicts(), now())
            .await
            .unwrap();

        let stored = store
            .get(KUBE_SYSTEM_NAMESPACE, &bootstrap_token_secret_name(&id))
            .unwrap();
        assert_eq!(text(&stored, "token-secret"), token.secret);
    }
}

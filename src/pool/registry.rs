//! JSON account registry
//!
//! The registry lists full login accounts, each bound to its own proxy, and
//! doubles as the persisted rotation state: `last_used`, `duration` and
//! `cookies_file` are rewritten in place after every mutation.
//!
//! ```json
//! {
//!     "accounts": [
//!         {
//!             "proxy": "10.0.0.1",
//!             "proxy_port": "3128",
//!             "proxy_username": "user",
//!             "proxy_password": "pass",
//!             "email": "alice@example.com",
//!             "password": "secret",
//!             "username": "alice",
//!             "last_used": 0,
//!             "duration": 0,
//!             "cookies_file": "cookies/alice.json"
//!         }
//!     ],
//!     "parameters": {
//!         "rotate_account_after_duration": 3600
//!     }
//! }
//! ```
//!
//! Keys the crate does not know about are kept verbatim on rewrite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use super::{AccountCredential, Credential, ProxyEndpoint, Resource, ResourceId};
use crate::rotation::error::{RotationError, RotationResult};
use crate::rotation::policy::PolicyOverlay;
use crate::rotation::state::RotationState;

/// Keys every account entry must carry
pub const REQUIRED_ACCOUNT_KEYS: &[&str] = &[
    "proxy",
    "proxy_username",
    "proxy_password",
    "proxy_port",
    "email",
    "password",
    "username",
    "last_used",
    "duration",
    "cookies_file",
];

/// Whole registry document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRegistry {
    pub accounts: Vec<AccountRecord>,

    #[serde(default)]
    pub parameters: RegistryParameters,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Tuning block of the registry (all durations in seconds)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotate_account_after_duration: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_uses_per_resource: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_period: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_cooldown: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_malus: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_request_interval: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RegistryParameters {
    /// Policy overlay described by this block
    pub fn overlay(&self) -> PolicyOverlay {
        PolicyOverlay {
            max_uses_per_resource: self.max_uses_per_resource,
            cooldown_period_secs: self.cooldown_period,
            rate_limit_cooldown_secs: self.rate_limit_cooldown,
            rotation_duration_threshold_secs: self.rotate_account_after_duration,
            duration_malus_secs: self.duration_malus,
            min_request_interval_secs: self.min_request_interval,
            ..Default::default()
        }
    }
}

/// Proxy port written either as a number or as a numeric string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u16),
    Text(String),
}

impl PortValue {
    /// Numeric port, `None` when empty
    pub fn port(&self) -> RotationResult<Option<u16>> {
        match self {
            Self::Number(port) => Ok(Some(*port)),
            Self::Text(text) if text.trim().is_empty() => Ok(None),
            Self::Text(text) => text.trim().parse().map(Some).map_err(|_| {
                RotationError::configuration(format!("invalid proxy_port '{text}'"))
            }),
        }
    }
}

/// One login account with its proxy and rotation counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub proxy: String,
    pub proxy_port: PortValue,
    pub proxy_username: String,
    pub proxy_password: String,
    pub email: String,
    pub password: String,
    pub username: String,

    /// Epoch seconds, 0 = never used
    pub last_used: i64,

    /// Seconds of session time since the last rotation reset
    pub duration: u64,

    pub cookies_file: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub usage_count: u32,

    /// Epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<i64>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub invalid: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl AccountRegistry {
    /// Parse and validate a registry document
    pub fn parse(content: &str) -> RotationResult<Self> {
        let value: Value = serde_json::from_str(content).map_err(|e| {
            RotationError::configuration(format!("account registry is not valid JSON: {e}"))
        })?;

        let accounts = value
            .get("accounts")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                RotationError::configuration("account registry has no 'accounts' list")
            })?;

        for (index, account) in accounts.iter().enumerate() {
            let object = account.as_object().ok_or_else(|| {
                RotationError::configuration(format!("account #{index} is not an object"))
            })?;
            if let Some(missing) = REQUIRED_ACCOUNT_KEYS
                .iter()
                .find(|key| !object.contains_key(**key))
            {
                return Err(RotationError::configuration(format!(
                    "account #{index} is missing required key '{missing}'"
                )));
            }
        }

        serde_json::from_value(value).map_err(|e| {
            RotationError::configuration(format!("malformed account registry: {e}"))
        })
    }

    /// Resources described by the registry, in document order
    pub fn resources(&self) -> RotationResult<Vec<Resource>> {
        self.accounts
            .iter()
            .enumerate()
            .map(|(index, account)| {
                account.to_resource().map_err(|e| match e {
                    RotationError::Configuration { reason } => {
                        RotationError::configuration(format!("account #{index}: {reason}"))
                    }
                    other => other,
                })
            })
            .collect()
    }

    /// Find an account by resource id
    pub fn account_mut(&mut self, id: &ResourceId) -> Option<&mut AccountRecord> {
        self.accounts.iter_mut().find(|a| &a.resource_id() == id)
    }

    /// Serialize with four-space indentation
    pub fn to_pretty_json(&self) -> RotationResult<Vec<u8>> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.serialize(&mut serializer)?;
        buffer.push(b'\n');
        Ok(buffer)
    }
}

impl AccountRecord {
    /// Username, or email when the username is blank
    pub fn resource_id(&self) -> ResourceId {
        if self.username.trim().is_empty() {
            ResourceId::new(self.email.trim())
        } else {
            ResourceId::new(self.username.trim())
        }
    }

    /// Build the pool resource for this account
    pub fn to_resource(&self) -> RotationResult<Resource> {
        let id = self.resource_id();
        if id.as_str().is_empty() {
            return Err(RotationError::configuration("account has neither username nor email"));
        }
        if self.password.is_empty() && self.cookies_file.trim().is_empty() {
            return Err(RotationError::configuration(format!(
                "account '{id}' has no password and no cookies_file"
            )));
        }

        let mut proxy = ProxyEndpoint::parse(&self.proxy)?;
        if let Some(port) = self.proxy_port.port()? {
            proxy.port = Some(port);
        }
        if !self.proxy_username.is_empty() {
            proxy.username = Some(self.proxy_username.clone());
        }
        if !self.proxy_password.is_empty() {
            proxy.password = Some(self.proxy_password.clone());
        }

        let cookies_file = Some(self.cookies_file.trim())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Ok(Resource {
            id,
            proxy: Some(proxy),
            credential: Credential::Account(AccountCredential {
                email: self.email.clone(),
                username: self.username.clone(),
                password: self.password.clone(),
                cookies_file,
            }),
        })
    }

    /// Rotation state stored in this entry
    pub fn rotation_state(&self) -> RotationState {
        RotationState {
            usage_count: self.usage_count,
            last_used_at: epoch_to_datetime(self.last_used),
            cumulative_duration_secs: self.duration,
            cooldown_until: self.cooldown_until.and_then(epoch_to_datetime),
            invalid: self.invalid,
            credential_override: None,
        }
    }

    /// Write a rotation state back into this entry
    pub fn apply_state(&mut self, state: &RotationState) {
        self.usage_count = state.usage_count;
        self.last_used = state.last_used_at.map(|t| t.timestamp()).unwrap_or(0);
        self.duration = state.cumulative_duration_secs;
        self.cooldown_until = state.cooldown_until.map(epoch_secs_ceil);
        self.invalid = state.invalid;
        if let Some(path) = &state.credential_override {
            self.cookies_file = path.display().to_string();
        }
    }
}

// Deadlines round up so a reload never ends a cooldown early
fn epoch_secs_ceil(at: DateTime<Utc>) -> i64 {
    at.timestamp() + i64::from(at.timestamp_subsec_nanos() > 0)
}

fn epoch_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        None
    } else {
        DateTime::from_timestamp(secs, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "accounts": [
            {
                "proxy": "10.0.0.1",
                "proxy_port": "3128",
                "proxy_username": "pu",
                "proxy_password": "pp",
                "email": "alice@example.com",
                "password": "secret",
                "username": "alice",
                "last_used": 1700000000,
                "duration": 1200,
                "cookies_file": "cookies/alice.json",
                "note": "primary"
            },
            {
                "proxy": "10.0.0.2",
                "proxy_port": 8080,
                "proxy_username": "",
                "proxy_password": "",
                "email": "bob@example.com",
                "password": "secret",
                "username": "",
                "last_used": 0,
                "duration": 0,
                "cookies_file": ""
            }
        ],
        "parameters": { "rotate_account_after_duration": 7200 }
    }"#;

    #[test]
    fn test_parse_registry() {
        let registry = AccountRegistry::parse(SAMPLE).unwrap();
        assert_eq!(registry.accounts.len(), 2);
        assert_eq!(registry.parameters.rotate_account_after_duration, Some(7200));

        let resources = registry.resources().unwrap();
        assert_eq!(resources[0].id.as_str(), "alice");
        assert_eq!(resources[1].id.as_str(), "bob@example.com");

        let proxy = resources[0].proxy.as_ref().unwrap();
        assert_eq!(proxy.port, Some(3128));
        assert_eq!(proxy.auth(), Some(("pu", "pp")));
        assert_eq!(resources[1].proxy.as_ref().unwrap().port, Some(8080));
    }

    #[test]
    fn test_missing_required_key() {
        let content = r#"{"accounts": [{"proxy": "10.0.0.1"}]}"#;
        let err = AccountRegistry::parse(content).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("account #0"));
    }

    #[test]
    fn test_missing_accounts_list() {
        let err = AccountRegistry::parse(r#"{"parameters": {}}"#).unwrap_err();
        assert!(err.to_string().contains("accounts"));
    }

    #[test]
    fn test_rotation_state_from_record() {
        let registry = AccountRegistry::parse(SAMPLE).unwrap();
        let state = registry.accounts[0].rotation_state();
        assert_eq!(state.cumulative_duration_secs, 1200);
        assert_eq!(state.last_used_at.unwrap().timestamp(), 1_700_000_000);

        let never = registry.accounts[1].rotation_state();
        assert!(never.last_used_at.is_none());
    }

    #[test]
    fn test_apply_state_preserves_unknown_keys() {
        let mut registry = AccountRegistry::parse(SAMPLE).unwrap();
        let mut state = registry.accounts[0].rotation_state();
        state.cumulative_duration_secs = 5000;
        state.credential_override = Some(PathBuf::from("cookies/alice-2.json"));

        registry
            .account_mut(&ResourceId::new("alice"))
            .unwrap()
            .apply_state(&state);

        let json = String::from_utf8(registry.to_pretty_json().unwrap()).unwrap();
        assert!(json.contains("\"note\": \"primary\""));
        assert!(json.contains("cookies/alice-2.json"));
        assert!(json.contains("\"duration\": 5000"));
        assert!(!json.contains("usage_count"));
    }

    #[test]
    fn test_cooldown_deadline_rounds_up() {
        let mut registry = AccountRegistry::parse(SAMPLE).unwrap();
        let mut state = registry.accounts[0].rotation_state();
        state.cooldown_until = DateTime::from_timestamp(1_700_000_900, 250_000_000);

        let account = registry.account_mut(&ResourceId::new("alice")).unwrap();
        account.apply_state(&state);
        assert_eq!(account.cooldown_until, Some(1_700_000_901));

        let reloaded = account.rotation_state();
        assert!(reloaded.cooldown_until >= state.cooldown_until);

        state.cooldown_until = DateTime::from_timestamp(1_700_000_900, 0);
        account.apply_state(&state);
        assert_eq!(account.cooldown_until, Some(1_700_000_900));
    }

    #[test]
    fn test_overlay_from_parameters() {
        let registry = AccountRegistry::parse(SAMPLE).unwrap();
        let overlay = registry.parameters.overlay();
        assert_eq!(overlay.rotation_duration_threshold_secs, Some(7200));
        assert_eq!(overlay.max_uses_per_resource, None);
    }
}

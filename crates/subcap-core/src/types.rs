use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{SyncError, SyncResult};

/// Category every card falls back to when no selected category applies.
pub const OTHERS_CATEGORY: &str = "Others";

/// Per-card categorization settings shared across devices.
///
/// `selected_categories` and `default_category` are optional on the wire so
/// that a peer which never set them does not overwrite ours during a merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSettings {
    /// One slot per bonus subcap; empty slots are empty strings.
    #[serde(
        default,
        deserialize_with = "deserialize_slots",
        skip_serializing_if = "Option::is_none"
    )]
    pub selected_categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_category: Option<String>,
    /// Merchant name or pattern → category, in insertion order.
    #[serde(default)]
    pub merchant_map: IndexMap<String, String>,
    /// "YYYY-MM" → category → total spend.
    #[serde(default)]
    pub monthly_totals: BTreeMap<String, BTreeMap<String, f64>>,
}

impl CardSettings {
    /// Check that the default category is "Others" or one of the selected slots.
    pub fn check_invariants(&self) -> Result<(), String> {
        let Some(default) = self.default_category.as_deref() else {
            return Ok(());
        };
        if default == OTHERS_CATEGORY {
            return Ok(());
        }
        let selected = self
            .selected_categories
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|c| !c.is_empty() && c == default);
        if selected {
            Ok(())
        } else {
            Err(format!(
                "default category '{default}' is neither '{OTHERS_CATEGORY}' nor a selected category"
            ))
        }
    }
}

fn deserialize_slots<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let slots: Option<Vec<Option<String>>> = Option::deserialize(deserializer)?;
    Ok(slots.map(|s| s.into_iter().map(Option::unwrap_or_default).collect()))
}

/// Everything that is synced: card name → settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncData {
    #[serde(default)]
    pub cards: BTreeMap<String, CardSettings>,
}

/// The plaintext that is encrypted into the remote blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub version: u64,
    pub device_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub data: SyncData,
}

impl SyncPayload {
    /// Validate decrypted JSON as a complete payload.
    ///
    /// Every field must be present and correctly typed; anything less is
    /// rejected whole.
    pub fn from_value(value: Value) -> SyncResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| SyncError::InvalidPayload("payload is not an object".into()))?;

        let version = obj
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                SyncError::InvalidPayload("version must be a non-negative integer".into())
            })?;

        let device_id = obj
            .get("deviceId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SyncError::InvalidPayload("deviceId must be a non-empty string".into()))?
            .to_string();

        let timestamp = obj
            .get("timestamp")
            .and_then(Value::as_u64)
            .filter(|t| *t > 0)
            .ok_or_else(|| {
                SyncError::InvalidPayload("timestamp must be a positive integer".into())
            })?;

        let data = match obj.get("data") {
            Some(d @ Value::Object(_)) => serde_json::from_value::<SyncData>(d.clone())
                .map_err(|e| SyncError::InvalidPayload(format!("data: {e}")))?,
            _ => return Err(SyncError::InvalidPayload("data must be an object".into())),
        };

        Ok(Self {
            version,
            device_id,
            timestamp,
            data,
        })
    }
}

/// Output of one authenticated encryption. All fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub ciphertext: String,
    pub iv: String,
    /// Present when the key was derived from a passphrase with this salt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

/// Locally persisted sync configuration (`ccSubcapSyncConfig`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub device_id: String,
    pub device_name: String,
    pub email: String,
    pub token: String,
    pub tier: String,
    pub share_mappings: bool,
    pub server_url: String,
    pub version: u64,
    /// Milliseconds since the Unix epoch of the last successful sync.
    pub last_sync: Option<u64>,
    pub remember_unlock: bool,
}

/// A locally cached, vault-encrypted copy of the passphrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RememberedUnlockCacheEntry {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    pub created_at: u64,
    pub expires_at: u64,
    pub encrypted: EncryptedEnvelope,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_accepts_complete_object() {
        let payload = SyncPayload::from_value(json!({
            "version": 3,
            "deviceId": "device-1",
            "timestamp": 1_700_000_000_000u64,
            "data": { "cards": { "UOB": { "merchantMap": { "GRAB": "Transport" } } } }
        }))
        .unwrap();

        assert_eq!(payload.version, 3);
        assert_eq!(payload.device_id, "device-1");
        assert_eq!(payload.data.cards["UOB"].merchant_map["GRAB"], "Transport");
    }

    #[test]
    fn payload_rejects_each_bad_field() {
        let good = json!({
            "version": 1,
            "deviceId": "d",
            "timestamp": 5,
            "data": { "cards": {} }
        });

        for (field, bad) in [
            ("version", json!(-1)),
            ("version", json!("1")),
            ("deviceId", json!("")),
            ("deviceId", json!(7)),
            ("timestamp", json!(0)),
            ("timestamp", json!(1.5)),
            ("data", json!([])),
            ("data", json!(null)),
        ] {
            let mut value = good.clone();
            value[field] = bad.clone();
            let err = SyncPayload::from_value(value).unwrap_err();
            assert!(
                matches!(err, SyncError::InvalidPayload(_)),
                "{field}={bad} should be rejected, got {err:?}"
            );
        }

        let mut missing = good.clone();
        missing.as_object_mut().unwrap().remove("deviceId");
        assert!(SyncPayload::from_value(missing).is_err());
    }

    #[test]
    fn selected_category_nulls_become_empty_slots() {
        let card: CardSettings =
            serde_json::from_value(json!({ "selectedCategories": ["Dining", null, ""] })).unwrap();
        assert_eq!(
            card.selected_categories,
            Some(vec!["Dining".to_string(), String::new(), String::new()])
        );
    }

    #[test]
    fn merchant_map_keeps_insertion_order() {
        let card: CardSettings = serde_json::from_str(
            r#"{ "merchantMap": { "ZARA": "Fashion", "ASTONS": "Dining", "BUS": "Transport" } }"#,
        )
        .unwrap();
        let keys: Vec<_> = card.merchant_map.keys().cloned().collect();
        assert_eq!(keys, ["ZARA", "ASTONS", "BUS"]);
    }

    #[test]
    fn invariants_on_default_category() {
        let mut card = CardSettings {
            selected_categories: Some(vec!["Dining".into(), String::new()]),
            default_category: Some("Dining".into()),
            ..Default::default()
        };
        assert!(card.check_invariants().is_ok());

        card.default_category = Some(OTHERS_CATEGORY.into());
        assert!(card.check_invariants().is_ok());

        card.default_category = Some("Travel".into());
        assert!(card.check_invariants().is_err());

        card.default_category = Some(String::new());
        assert!(card.check_invariants().is_err());
    }

    #[test]
    fn sync_config_reads_camel_case_with_defaults() {
        let config: SyncConfig = serde_json::from_str(
            r#"{ "enabled": true, "serverUrl": "https://sync.example", "rememberUnlock": true }"#,
        )
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.server_url, "https://sync.example");
        assert!(config.remember_unlock);
        assert_eq!(config.version, 0);
        assert!(config.last_sync.is_none());
    }
}

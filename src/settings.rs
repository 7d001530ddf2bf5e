//! Key/value settings persistence.
//!
//! Each setting is a single JSON document stored under a unique key. Writes
//! are plain upserts (last writer wins). The `app_settings` document also has
//! a typed view, [`AppSettings`], which is cached in-process and dropped on
//! every write of that key.

use crate::Result;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const APP_SETTINGS_KEY: &str = "app_settings";
pub const ONBOARDING_KEY: &str = "onboarding";

pub const DEFAULT_THEME: &str = "soft-blush";
const THEME_KEYS: [&str; 4] = ["soft-blush", "cozy-winter", "sultry-velvet", "dark-romance"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Explicitness {
    Low,
    Medium,
    High,
}

/// Admin-editable runtime options. Every field is optional; callers use the
/// accessor methods to get the documented default. A field holding a value
/// of the wrong shape reads as absent without affecting its neighbours.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(rename = "defaultModel", default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    #[serde(rename = "REDGIFS_CLIENT_ID", default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub redgifs_client_id: Option<String>,
    #[serde(rename = "REDGIFS_CLIENT_SECRET", default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub redgifs_client_secret: Option<String>,
    #[serde(rename = "LOVENSE_DEVELOPER_TOKEN", default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub lovense_developer_token: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub smtp_host: Option<String>,
    #[serde(default, deserialize_with = "lenient_port", skip_serializing_if = "Option::is_none")]
    pub smtp_port: Option<u16>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub smtp_user: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub smtp_pass: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub smtp_from: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub notify_email: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag", skip_serializing_if = "Option::is_none")]
    pub health_notifications: Option<bool>,

    #[serde(rename = "themeKey", default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub theme_key: Option<String>,

    #[serde(rename = "aiPersona", default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub ai_persona: Option<String>,
    #[serde(rename = "aiTone", default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub ai_tone: Option<String>,
    #[serde(rename = "aiExplicitness", default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub ai_explicitness: Option<Explicitness>,

    /// Anything the admin page stores that this struct does not name.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match serde_json::from_value(value.clone()) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                tracing::warn!("Ignoring app_settings value {}: {}", value, e);
                Ok(None)
            }
        },
    }
}

fn lenient_port<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let port = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
        Some(other) => {
            tracing::warn!("Ignoring invalid smtp_port: {}", other);
            None
        }
    };
    Ok(port)
}

/// Booleans, plus the strings the admin form may post for a checkbox.
fn lenient_flag<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let flag = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Some(true),
            "false" | "off" | "0" | "" => Some(false),
            _ => None,
        },
        Some(Value::Number(n)) => n.as_i64().map(|n| n != 0),
        _ => None,
    };
    Ok(flag)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Complete SMTP parameters for the health notification e-mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
    pub to: String,
}

impl AppSettings {
    /// Parse the stored blob. Only a document that is not a JSON object
    /// yields defaults wholesale.
    pub fn from_value(value: &Value) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring malformed app_settings: {}", e);
                Self::default()
            }
        }
    }

    /// The admin-chosen model, if one is stored.
    pub fn stored_model(&self) -> Option<&str> {
        non_empty(&self.default_model)
    }

    pub fn model<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.stored_model().unwrap_or(fallback)
    }

    pub fn redgifs_credentials<'a>(
        &'a self,
        env_id: &'a Option<String>,
        env_secret: &'a Option<String>,
    ) -> Option<(&'a str, &'a str)> {
        let id = non_empty(&self.redgifs_client_id).or_else(|| non_empty(env_id))?;
        let secret = non_empty(&self.redgifs_client_secret).or_else(|| non_empty(env_secret))?;
        Some((id, secret))
    }

    pub fn lovense_token<'a>(&'a self, env_token: &'a Option<String>) -> Option<&'a str> {
        non_empty(&self.lovense_developer_token).or_else(|| non_empty(env_token))
    }

    pub fn notifications_enabled(&self) -> bool {
        self.health_notifications.unwrap_or(false)
    }

    pub fn smtp(&self) -> Option<SmtpSettings> {
        let host = non_empty(&self.smtp_host)?;
        let user = non_empty(&self.smtp_user)?;
        let pass = non_empty(&self.smtp_pass)?;
        let to = non_empty(&self.notify_email)?;
        let from = non_empty(&self.smtp_from).unwrap_or(user);

        Some(SmtpSettings {
            host: host.to_string(),
            port: self.smtp_port.unwrap_or(587),
            user: user.to_string(),
            pass: pass.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    pub fn theme(&self) -> &str {
        non_empty(&self.theme_key)
            .filter(|k| THEME_KEYS.contains(k))
            .unwrap_or(DEFAULT_THEME)
    }

    pub fn explicitness(&self) -> Explicitness {
        self.ai_explicitness.unwrap_or(Explicitness::Low)
    }
}

pub struct SettingsStore {
    db: SqlitePool,
    cache: RwLock<Option<Arc<AppSettings>>>,
    /// Bumped under the cache write lock on every invalidation.
    generation: AtomicU64,
}

impl SettingsStore {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            cache: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;

        match raw {
            Some(text) => match serde_json::from_str(&text) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    tracing::warn!("Setting {} holds invalid JSON: {}", key, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .execute(&self.db)
        .await?;

        if key == APP_SETTINGS_KEY {
            self.invalidate().await;
        }

        Ok(())
    }

    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        *cache = None;
    }

    /// Typed view of `app_settings`, served from cache when possible.
    pub async fn app_settings(&self) -> Result<Arc<AppSettings>> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            return Ok(cached.clone());
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let settings = match self.get(APP_SETTINGS_KEY).await? {
            Some(value) => AppSettings::from_value(&value),
            None => AppSettings::default(),
        };
        let settings = Arc::new(settings);

        self.fill_cache(generation, settings.clone()).await;
        Ok(settings)
    }

    /// A value read before the latest invalidation is returned to its
    /// caller but never cached.
    async fn fill_cache(&self, generation: u64, settings: Arc<AppSettings>) {
        let mut cache = self.cache.write().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            *cache = Some(settings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let store = SettingsStore::new(test_support::memory_pool().await);
        let value = json!({
            "defaultModel": "mistral:7b",
            "nested": { "list": [1, 2.5, "three", null, true] },
            "unicode": "héllo ✨"
        });

        store.set("anything", &value).await.unwrap();
        assert_eq!(store.get("anything").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_second_write_wins_without_merge() {
        let store = SettingsStore::new(test_support::memory_pool().await);
        store
            .set(APP_SETTINGS_KEY, &json!({ "a": 1, "b": 2 }))
            .await
            .unwrap();
        store.set(APP_SETTINGS_KEY, &json!({ "c": 3 })).await.unwrap();

        assert_eq!(
            store.get(APP_SETTINGS_KEY).await.unwrap(),
            Some(json!({ "c": 3 }))
        );
    }

    #[tokio::test]
    async fn test_missing_key_reads_as_none() {
        let store = SettingsStore::new(test_support::memory_pool().await);
        assert_eq!(store.get(ONBOARDING_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_invalidates_cached_typed_view() {
        let store = SettingsStore::new(test_support::memory_pool().await);
        store
            .set(APP_SETTINGS_KEY, &json!({ "defaultModel": "first" }))
            .await
            .unwrap();
        assert_eq!(store.app_settings().await.unwrap().model("x"), "first");

        store
            .set(APP_SETTINGS_KEY, &json!({ "defaultModel": "second" }))
            .await
            .unwrap();
        assert_eq!(store.app_settings().await.unwrap().model("x"), "second");
    }

    #[tokio::test]
    async fn test_value_read_before_a_write_is_not_cached() {
        let store = SettingsStore::new(test_support::memory_pool().await);
        store
            .set(APP_SETTINGS_KEY, &json!({ "defaultModel": "old" }))
            .await
            .unwrap();

        let generation = store.generation.load(Ordering::SeqCst);
        let stale = Arc::new(AppSettings::from_value(&json!({ "defaultModel": "old" })));
        store
            .set(APP_SETTINGS_KEY, &json!({ "defaultModel": "new" }))
            .await
            .unwrap();
        store.fill_cache(generation, stale).await;

        assert!(store.cache.read().await.is_none());
        assert_eq!(store.app_settings().await.unwrap().model("x"), "new");
        assert!(store.cache.read().await.is_some());
    }

    #[test]
    fn test_typed_view_defaults() {
        let settings = AppSettings::from_value(&json!({}));
        assert_eq!(settings.model("llama3.1:8b-instruct"), "llama3.1:8b-instruct");
        assert_eq!(settings.theme(), DEFAULT_THEME);
        assert_eq!(settings.explicitness(), Explicitness::Low);
        assert!(!settings.notifications_enabled());
        assert!(settings.smtp().is_none());
    }

    #[test]
    fn test_typed_view_keeps_unknown_fields() {
        let settings = AppSettings::from_value(&json!({ "themeKey": "cozy-winter", "custom": 7 }));
        assert_eq!(settings.theme(), "cozy-winter");
        assert_eq!(settings.extra.get("custom"), Some(&json!(7)));
    }

    #[test]
    fn test_unknown_theme_falls_back() {
        let settings = AppSettings::from_value(&json!({ "themeKey": "neon" }));
        assert_eq!(settings.theme(), DEFAULT_THEME);
    }

    #[test]
    fn test_bad_field_defaults_only_itself() {
        let settings = AppSettings::from_value(&json!({
            "REDGIFS_CLIENT_ID": "cid",
            "REDGIFS_CLIENT_SECRET": "sec",
            "defaultModel": "mistral:7b",
            "aiExplicitness": "High",
            "custom": true
        }));
        assert_eq!(settings.explicitness(), Explicitness::Low);
        assert_eq!(settings.redgifs_credentials(&None, &None), Some(("cid", "sec")));
        assert_eq!(settings.model("fallback"), "mistral:7b");
        assert_eq!(settings.extra.get("custom"), Some(&json!(true)));
    }

    #[test]
    fn test_string_flag_keeps_smtp_block() {
        let settings = AppSettings::from_value(&json!({
            "health_notifications": "true",
            "smtp_host": "mail.example.com",
            "smtp_port": "not-a-port",
            "smtp_user": "bot@example.com",
            "smtp_pass": "pw",
            "notify_email": "admin@example.com"
        }));
        assert!(settings.notifications_enabled());
        let smtp = settings.smtp().unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.host, "mail.example.com");
    }

    #[test]
    fn test_non_object_document_yields_defaults() {
        let settings = AppSettings::from_value(&json!(["not", "an", "object"]));
        assert_eq!(settings.model("fallback"), "fallback");
        assert!(settings.extra.is_empty());
    }

    #[test]
    fn test_smtp_requires_all_fields_and_accepts_string_port() {
        let partial = AppSettings::from_value(&json!({ "smtp_host": "mail", "smtp_user": "u" }));
        assert!(partial.smtp().is_none());

        let full = AppSettings::from_value(&json!({
            "smtp_host": "mail.example.com",
            "smtp_port": "2525",
            "smtp_user": "bot@example.com",
            "smtp_pass": "pw",
            "notify_email": "admin@example.com"
        }));
        let smtp = full.smtp().unwrap();
        assert_eq!(smtp.port, 2525);
        assert_eq!(smtp.from, "bot@example.com");
    }

    #[test]
    fn test_settings_values_take_precedence_over_env() {
        let settings = AppSettings::from_value(&json!({
            "REDGIFS_CLIENT_ID": "from-settings",
            "REDGIFS_CLIENT_SECRET": "secret"
        }));
        let env_id = Some("from-env".to_string());
        let env_secret = Some("env-secret".to_string());
        assert_eq!(
            settings.redgifs_credentials(&env_id, &env_secret),
            Some(("from-settings", "secret"))
        );

        let empty = AppSettings::default();
        assert_eq!(
            empty.redgifs_credentials(&env_id, &env_secret),
            Some(("from-env", "env-secret"))
        );
        assert_eq!(empty.lovense_token(&None), None);
    }
}

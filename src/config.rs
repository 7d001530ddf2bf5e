use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u64,

    // Object storage (MinIO or any S3-compatible endpoint)
    #[serde(default = "default_s3_endpoint")]
    pub s3_endpoint: String,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub minio_root_user: Option<String>,
    pub minio_root_password: Option<String>,
    #[serde(default = "default_bucket_name")]
    pub s3_bucket: String,
    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    // Local AI services
    #[serde(default = "default_openwebui_base")]
    pub openwebui_base: String,
    #[serde(default = "default_ollama_base")]
    pub ollama_base: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_tts_http")]
    pub tts_http: String,
    #[serde(default = "default_tts_voice")]
    pub default_tts_voice: String,
    #[serde(default = "default_chat_relay_base")]
    pub chat_relay_base: String,

    // Public domain, used by the DNS health probe only
    pub app_domain: Option<String>,

    // Third-party integrations. Values saved in app_settings win over these.
    pub redgifs_client_id: Option<String>,
    pub redgifs_client_secret: Option<String>,
    #[serde(default = "default_redgifs_api_base")]
    pub redgifs_api_base: String,
    pub lovense_developer_token: Option<String>,
    #[serde(default = "default_lovense_api_base")]
    pub lovense_api_base: String,
    #[serde(default = "default_content_timeout")]
    pub content_timeout_secs: u64,

    #[serde(default = "default_health_check_cron")]
    pub health_check_cron: String,

    // Accounts seeded on startup when missing
    pub user_one_email: Option<String>,
    pub user_one_name: Option<String>,
    #[serde(default = "default_user_one_role")]
    pub user_one_role: String,
    #[serde(default = "default_user_one_greeting")]
    pub user_one_greeting: String,
    pub user_one_password: Option<String>,

    pub user_two_email: Option<String>,
    pub user_two_name: Option<String>,
    #[serde(default = "default_user_two_role")]
    pub user_two_role: String,
    #[serde(default = "default_user_two_greeting")]
    pub user_two_greeting: String,
    pub user_two_password: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_database_url() -> String {
    "sqlite:./data/companion.db?mode=rwc".to_string()
}

fn default_max_upload_size() -> u64 {
    25
}

fn default_s3_endpoint() -> String {
    "http://minio:9000".to_string()
}

fn default_bucket_name() -> String {
    "uiw-media".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_openwebui_base() -> String {
    "http://openwebui:8080".to_string()
}

fn default_ollama_base() -> String {
    "http://ollama:11434".to_string()
}

fn default_model() -> String {
    "llama3.1:8b-instruct".to_string()
}

fn default_tts_http() -> String {
    "http://tts:5000".to_string()
}

fn default_tts_voice() -> String {
    "en_US-lessac-medium".to_string()
}

fn default_chat_relay_base() -> String {
    "http://vocechat:3000".to_string()
}

fn default_redgifs_api_base() -> String {
    "https://api.redgifs.com".to_string()
}

fn default_lovense_api_base() -> String {
    "https://api.lovense-api.com".to_string()
}

fn default_content_timeout() -> u64 {
    10
}

fn default_health_check_cron() -> String {
    // sec min hour day-of-month month day-of-week
    "0 0 2 * * *".to_string()
}

fn default_user_one_role() -> String {
    "her".to_string()
}

fn default_user_one_greeting() -> String {
    "Hello Gorgeous".to_string()
}

fn default_user_two_role() -> String {
    "him".to_string()
}

fn default_user_two_greeting() -> String {
    "Hey Handsome".to_string()
}

/// An account to create on startup if its email is not taken yet.
#[derive(Debug, Clone)]
pub struct SeedUser {
    pub email: String,
    pub display_name: Option<String>,
    pub role: String,
    pub greeting: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn max_request_body_bytes(&self) -> usize {
        // Allow some overhead for multipart boundaries/headers.
        ((self.max_upload_size_mb + 1) * 1024 * 1024) as usize
    }

    pub fn s3_credentials(&self) -> (String, String) {
        let access = self
            .s3_access_key
            .clone()
            .or_else(|| self.minio_root_user.clone())
            .unwrap_or_default();
        let secret = self
            .s3_secret_key
            .clone()
            .or_else(|| self.minio_root_password.clone())
            .unwrap_or_default();
        (access, secret)
    }

    pub fn content_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.content_timeout_secs)
    }

    pub fn seed_users(&self) -> Vec<SeedUser> {
        let candidates = [
            (
                &self.user_one_email,
                &self.user_one_name,
                &self.user_one_role,
                &self.user_one_greeting,
                &self.user_one_password,
            ),
            (
                &self.user_two_email,
                &self.user_two_name,
                &self.user_two_role,
                &self.user_two_greeting,
                &self.user_two_password,
            ),
        ];

        candidates
            .into_iter()
            .filter_map(|(email, name, role, greeting, password)| {
                let email = email.as_deref().filter(|e| !e.trim().is_empty())?;
                let password = password.as_deref().filter(|p| !p.is_empty())?;
                Some(SeedUser {
                    email: email.trim().to_lowercase(),
                    display_name: name.clone(),
                    role: role.clone(),
                    greeting: greeting.clone(),
                    password: password.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        envy::from_iter(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>(),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_apply_without_env() {
        let config = config_from(&[]);
        assert_eq!(config.port, 4000);
        assert_eq!(config.s3_bucket, "uiw-media");
        assert_eq!(config.default_model, "llama3.1:8b-instruct");
        assert_eq!(config.health_check_cron, "0 0 2 * * *");
        assert!(config.app_domain.is_none());
    }

    #[test]
    fn test_s3_credentials_fall_back_to_minio_root() {
        let config = config_from(&[
            ("MINIO_ROOT_USER", "root"),
            ("MINIO_ROOT_PASSWORD", "hunter2"),
        ]);
        assert_eq!(
            config.s3_credentials(),
            ("root".to_string(), "hunter2".to_string())
        );

        let config = config_from(&[
            ("S3_ACCESS_KEY", "ak"),
            ("S3_SECRET_KEY", "sk"),
            ("MINIO_ROOT_USER", "root"),
        ]);
        assert_eq!(config.s3_credentials(), ("ak".to_string(), "sk".to_string()));
    }

    #[test]
    fn test_seed_users_skip_incomplete_entries() {
        let config = config_from(&[
            ("USER_ONE_EMAIL", " Her@Example.com "),
            ("USER_ONE_PASSWORD", "secret"),
            ("USER_TWO_EMAIL", "him@example.com"),
        ]);
        let users = config.seed_users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].email, "her@example.com");
        assert_eq!(users[0].role, "her");
        assert_eq!(users[0].greeting, "Hello Gorgeous");
    }
}

use crate::config::Config;
use crate::{AppError, AppState, Result};
use aws_sdk_s3::primitives::ByteStream;
use std::sync::Arc;
use uuid::Uuid;

pub const HEALTHCHECK_KEY: &str = "healthcheck.txt";

/// Build the S3 client for MinIO. Path-style addressing, no automatic retries.
pub fn build_client(config: &Config) -> aws_sdk_s3::Client {
    let (access_key, secret_key) = config.s3_credentials();

    let s3_config = aws_sdk_s3::Config::builder()
        .endpoint_url(&config.s3_endpoint)
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "minio",
        ))
        .region(aws_sdk_s3::config::Region::new(config.s3_region.clone()))
        .force_path_style(true)
        .retry_config(aws_sdk_s3::config::retry::RetryConfig::disabled())
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}

pub fn sanitize_object_name(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(trimmed.len());
    let mut last_was_sep = false;

    for ch in trimmed.chars() {
        let is_allowed = ch.is_ascii_alphanumeric() || ch == '-' || ch == '_';
        let mapped = if is_allowed { ch } else { '-' };

        let is_sep = mapped == '-' || mapped == '_';
        if is_sep {
            if last_was_sep {
                continue;
            }
            last_was_sep = true;
        } else {
            last_was_sep = false;
        }
        out.push(mapped);
    }

    out.trim_matches(['-', '_']).to_string()
}

pub fn extract_ext(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Object name for an uploaded media file: `<uuid8>-<stem>.<ext>`.
pub fn media_object_name(original_filename: &str) -> String {
    let ext = extract_ext(original_filename);
    let stem = std::path::Path::new(original_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    let mut safe_stem = sanitize_object_name(stem);
    if safe_stem.len() > 80 {
        safe_stem.truncate(80);
        safe_stem = safe_stem.trim_matches(['-', '_']).to_string();
    }

    let unique_id = Uuid::new_v4().to_string()[..8].to_string();
    let name = if safe_stem.is_empty() {
        unique_id
    } else {
        format!("{}-{}", unique_id, safe_stem)
    };

    if ext.is_empty() {
        name
    } else {
        format!("{}.{}", name, ext)
    }
}

pub fn media_key(filename: &str) -> String {
    format!("media/{}", filename)
}

pub fn voice_key() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = Uuid::new_v4().simple().to_string()[..10].to_string();
    format!("voices/{}-{}.webm", millis, suffix)
}

pub async fn upload_object(
    state: &Arc<AppState>,
    key: &str,
    data: Vec<u8>,
    content_type: &str,
) -> Result<()> {
    state
        .s3_client
        .put_object()
        .bucket(&state.config.s3_bucket)
        .key(key)
        .body(ByteStream::from(data))
        .content_type(content_type)
        .send()
        .await
        .map_err(|e| AppError::Storage(format!("Failed to upload file: {}", e)))?;

    Ok(())
}

/// Open an object for streaming. Returns the body and the stored content type.
pub async fn open_object(state: &Arc<AppState>, key: &str) -> Result<(ByteStream, Option<String>)> {
    let response = state
        .s3_client
        .get_object()
        .bucket(&state.config.s3_bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| AppError::Storage(format!("Failed to download file: {}", e)))?;

    let content_type = response.content_type().map(|s| s.to_string());
    Ok((response.body, content_type))
}

/// Make sure the bucket exists and accepts writes.
pub async fn ensure_bucket_writable(client: &aws_sdk_s3::Client, bucket: &str) -> Result<()> {
    let exists = client.head_bucket().bucket(bucket).send().await.is_ok();
    if !exists {
        if let Err(e) = client.create_bucket().bucket(bucket).send().await {
            tracing::debug!("create_bucket {} failed: {}", bucket, e);
        }
    }

    client
        .put_object()
        .bucket(bucket)
        .key(HEALTHCHECK_KEY)
        .body(ByteStream::from_static(b"ok"))
        .send()
        .await
        .map_err(|e| AppError::Storage(format!("Failed to write {}: {}", HEALTHCHECK_KEY, e)))?;

    Ok(())
}

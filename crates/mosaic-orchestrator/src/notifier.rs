//! Outbound profile-picture propagation.
//!
//! The identity service owns user profiles; when a profile image finishes
//! ingest it is told which URL to show. Requests are signed with
//! HMAC-SHA256 over the JSON body when a secret is configured.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use mosaic_core::ProfileNotifierConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Mosaic-Signature";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilePictureUpdated {
    pub user_id: Uuid,
    pub asset_id: Uuid,
    pub url: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Profile notification request failed: {0}")]
    Request(String),

    #[error("Profile service returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid signing secret")]
    Signing,
}

#[async_trait]
pub trait ProfileNotifier: Send + Sync {
    async fn profile_picture_updated(&self, event: &ProfilePictureUpdated)
        -> Result<(), NotifyError>;
}

pub struct HttpProfileNotifier {
    http_client: Client,
    url: String,
    secret: Option<String>,
}

impl HttpProfileNotifier {
    pub fn new(url: String, secret: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client for profile notifications")?;

        Ok(Self {
            http_client,
            url,
            secret,
        })
    }

    pub fn sign_payload(body: &str, secret: &str) -> Result<String, NotifyError> {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| NotifyError::Signing)?;
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl ProfileNotifier for HttpProfileNotifier {
    #[tracing::instrument(skip(self, event), fields(user_id = %event.user_id, asset_id = %event.asset_id))]
    async fn profile_picture_updated(
        &self,
        event: &ProfilePictureUpdated,
    ) -> Result<(), NotifyError> {
        let body = serde_json::to_string(event).map_err(|e| NotifyError::Request(e.to_string()))?;

        let mut request = self
            .http_client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "Mosaic-Orchestrator/1.0");

        if let Some(secret) = &self.secret {
            let signature = Self::sign_payload(&body, secret)?;
            request = request.header(SIGNATURE_HEADER, format!("v1={}", signature));
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("Profile picture update delivered");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("Failed to read response body"));
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Used when no profile service is configured; records the event in the log.
pub struct LoggingProfileNotifier;

#[async_trait]
impl ProfileNotifier for LoggingProfileNotifier {
    async fn profile_picture_updated(
        &self,
        event: &ProfilePictureUpdated,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            user_id = %event.user_id,
            asset_id = %event.asset_id,
            url = %event.url,
            "Profile picture updated (no profile service configured)"
        );
        Ok(())
    }
}

pub fn create_profile_notifier(
    config: &ProfileNotifierConfig,
) -> anyhow::Result<Arc<dyn ProfileNotifier>> {
    match &config.url {
        Some(url) => Ok(Arc::new(HttpProfileNotifier::new(
            url.clone(),
            config.secret.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => {
            tracing::warn!("PROFILE_NOTIFY_URL not set, profile updates are only logged");
            Ok(Arc::new(LoggingProfileNotifier))
        }
    }
}

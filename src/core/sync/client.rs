// src/core/sync/client.rs

//! HTTP client for the Cloud sync API. Thin request/response plumbing; the
//! queueing and retry policy live in the sync service.

use crate::core::errors::EdgeLinkError;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

/// Ack for settings uploads: `POST {base}/settings/{user_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsAck {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Ack for history uploads: `POST {base}/history/{user_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryAck {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub synced_count: u64,
    #[serde(default)]
    pub total: u64,
}

/// Ack for shared-command uploads: `POST {base}/shared_commands/upload`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadAck {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<UploadedCommand>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadedCommand {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct SettingsDownload {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<SettingsDownloadData>,
}

#[derive(Debug, Clone, Deserialize)]
struct SettingsDownloadData {
    #[serde(default)]
    settings: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct CategoriesResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<CategoriesData>,
}

#[derive(Debug, Clone, Deserialize)]
struct CategoriesData {
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CloudClient {
    base_url: String,
    edge_id: String,
    http: reqwest::Client,
    probe_timeout: Duration,
}

impl CloudClient {
    pub fn new(
        base_url: &str,
        edge_id: &str,
        api_token: Option<&str>,
        ssl_verify: bool,
        upload_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self, EdgeLinkError> {
        url::Url::parse(base_url).map_err(|e| {
            EdgeLinkError::InvalidRequest(format!("invalid cloud base URL '{base_url}': {e}"))
        })?;

        let mut headers = HeaderMap::new();
        if let Some(token) = api_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| EdgeLinkError::InvalidRequest("invalid API token".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!ssl_verify)
            .timeout(upload_timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            edge_id: edge_id.to_string(),
            http,
            probe_timeout,
        })
    }

    pub fn edge_id(&self) -> &str {
        &self.edge_id
    }

    /// Uploads a user's settings snapshot.
    pub async fn upload_user_settings(
        &self,
        user_id: &str,
        settings: &Value,
        edge_id: &str,
    ) -> Result<SettingsAck, EdgeLinkError> {
        let url = format!("{}/settings/{user_id}", self.base_url);
        let body = json!({ "settings": settings, "edge_id": edge_id });

        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(EdgeLinkError::HttpClient(format!(
                "settings upload failed with HTTP {}",
                response.status()
            )));
        }
        let ack: SettingsAck = response.json().await?;
        info!(user_id, success = ack.success, "Uploaded user settings to cloud.");
        Ok(ack)
    }

    /// Downloads a user's settings backup. `Ok(None)` means the Cloud holds
    /// no backup for this user.
    pub async fn download_user_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<Value>, EdgeLinkError> {
        let url = format!("{}/settings/{user_id}", self.base_url);
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(EdgeLinkError::HttpClient(format!(
                "settings download failed with HTTP {}",
                response.status()
            )));
        }
        let body: SettingsDownload = response.json().await?;
        if !body.success {
            return Ok(None);
        }
        Ok(body.data.and_then(|d| d.settings))
    }

    /// Uploads a batch of command history records.
    pub async fn upload_command_history(
        &self,
        user_id: &str,
        records: &[Value],
        edge_id: &str,
    ) -> Result<HistoryAck, EdgeLinkError> {
        let url = format!("{}/history/{user_id}", self.base_url);
        let body = json!({ "records": records, "edge_id": edge_id });

        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(EdgeLinkError::HttpClient(format!(
                "history upload failed with HTTP {}",
                response.status()
            )));
        }
        let ack: HistoryAck = response.json().await?;
        info!(
            user_id,
            synced_count = ack.synced_count,
            total = ack.total,
            "Uploaded command history to cloud."
        );
        Ok(ack)
    }

    /// Uploads one approved shared command to the catalog.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_shared_command(
        &self,
        name: &str,
        description: &str,
        category: &str,
        content: &str,
        author_username: &str,
        author_email: &str,
        original_command_id: u64,
        version: u32,
    ) -> Result<UploadAck, EdgeLinkError> {
        let url = format!("{}/shared_commands/upload", self.base_url);
        let body = json!({
            "name": name,
            "description": description,
            "category": category,
            "content": content,
            "author_username": author_username,
            "author_email": author_email,
            "edge_id": self.edge_id,
            "original_command_id": original_command_id,
            "version": version,
        });

        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(EdgeLinkError::HttpClient(format!(
                "shared command upload failed with HTTP {}",
                response.status()
            )));
        }
        let ack: UploadAck = response.json().await?;
        info!(name, original_command_id, "Uploaded shared command to cloud.");
        Ok(ack)
    }

    /// Lists catalog categories.
    pub async fn categories(&self) -> Result<Vec<String>, EdgeLinkError> {
        let url = format!("{}/shared_commands/categories", self.base_url);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(EdgeLinkError::HttpClient(format!(
                "categories request failed with HTTP {}",
                response.status()
            )));
        }
        let body: CategoriesResponse = response.json().await?;
        if !body.success {
            return Ok(Vec::new());
        }
        Ok(body.data.map(|d| d.categories).unwrap_or_default())
    }

    /// Liveness probe: a short-deadline categories request.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/shared_commands/categories", self.base_url);
        let result = self
            .http
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await;
        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Cloud health check failed.");
                false
            }
        }
    }
}

use super::failure::RequestFailure;
use crate::channel::RefreshFn;
use crate::config::BackendConfig;
use crate::connectivity::HealthCheck;
use crate::queue::{ActionSubmitter, CompletePayload, StartPayload};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// REST client for the MES backend
#[derive(Debug, Clone)]
pub struct BackendClient {
    http_client: reqwest::Client,
    config: BackendConfig,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("floor-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http_client, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// POST a JSON body; `Ok(false)` when the backend answers with a non-2xx status
    async fn post_action<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<bool> {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self.http_client.post(&url).json(body).send().await.map_err(|e| {
            let failure = RequestFailure::from_reqwest_error(&e);
            anyhow::Error::new(e).context(format!("POST {} failed: {}", url, failure))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }

        let failure = RequestFailure::from_status_code(status.as_u16());
        let body = response.text().await.unwrap_or_default();
        if failure.is_transient() {
            debug!("POST {} {}: {}", url, failure, body);
        } else {
            // Retrying will not change the answer; the item burns its retries
            warn!("POST {} {}: {}", url, failure, body);
        }
        Ok(false)
    }

    /// GET the health endpoint; any 2xx within the timeout counts
    pub async fn health_check(&self) -> bool {
        let url = self.url(&self.config.health_path);
        match self.http_client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health check {} failed: {}", url, RequestFailure::from_reqwest_error(&e));
                false
            }
        }
    }

    /// Re-fetch the data the live channel would otherwise push
    pub async fn refresh(&self) -> Result<serde_json::Value> {
        let url = self.url(&self.config.refresh_path);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {} {}", url, RequestFailure::from_status_code(status.as_u16()));
        }

        response
            .json()
            .await
            .with_context(|| format!("GET {} returned invalid JSON", url))
    }

    /// Polling callback for the channel manager; results go to `on_data`
    pub fn refresh_fn<F>(self: &Arc<Self>, on_data: F) -> RefreshFn
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        let client = self.clone();
        let on_data = Arc::new(on_data);
        Arc::new(move || {
            let client = client.clone();
            let on_data = on_data.clone();
            async move {
                let data = client.refresh().await?;
                on_data(data);
                anyhow::Ok(())
            }
            .boxed()
        })
    }
}

#[async_trait]
impl ActionSubmitter for BackendClient {
    async fn submit_start(&self, payload: &StartPayload) -> Result<bool> {
        self.post_action(&self.config.start_path, payload).await
    }

    async fn submit_complete(&self, payload: &CompletePayload) -> Result<bool> {
        self.post_action(&self.config.complete_path, payload).await
    }
}

#[async_trait]
impl HealthCheck for BackendClient {
    async fn is_reachable(&self) -> bool {
        self.health_check().await
    }
}

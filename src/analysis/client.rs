//! HTTP client for the purity analysis and GPS endpoints

use super::{AnalysisService, AnalyzeRequest, AnalyzeResponse, GpsFix};
use crate::config::AnalysisConfig;
use crate::errors::CameraError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// [`AnalysisService`] backed by the appraisal backend's REST API
#[derive(Clone)]
pub struct HttpAnalysisClient {
    base_url: String,
    http_client: Client,
}

impl HttpAnalysisClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CameraError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CameraError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self, CameraError> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetch the appraisal site location
    pub async fn location(&self) -> Result<GpsFix, CameraError> {
        let url = self.url("/api/gps/location");
        log::debug!("Requesting GPS location from {}", url);

        let response = self.http_client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(CameraError::AnalysisUnreachable(format!(
                "GPS endpoint returned status {}",
                response.status()
            )));
        }
        Ok(response.json::<GpsFix>().await?)
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    async fn reset_status(&self) -> Result<(), CameraError> {
        let url = self.url("/api/purity/reset_status");
        let response = self.http_client.post(&url).send().await?;
        if !response.status().is_success() {
            return Err(CameraError::AnalysisUnreachable(format!(
                "reset_status returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse, CameraError> {
        let url = self.url("/api/purity/analyze");
        let response = self.http_client.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(CameraError::AnalysisUnreachable(format!(
                "analyze returned status {}",
                response.status()
            )));
        }
        Ok(response.json::<AnalyzeResponse>().await?)
    }
}

//! Tauri command surface over a single [`CameraSession`]

pub mod devices;
pub mod permissions;
pub mod purity;
pub mod stream;

use crate::analysis::HttpAnalysisClient;
use crate::config::AssayCamConfig;
use crate::errors::CameraError;
use crate::platform::NativePlatform;
use crate::session::CameraSession;
use std::sync::Arc;
use tauri::{AppHandle, Emitter, Runtime};

/// Frontend event name carrying every [`crate::SessionEvent`]
pub const SESSION_EVENT: &str = "assaycam://session";

/// Managed plugin state
pub struct SessionState {
    pub session: CameraSession,
    /// Separate client for the location lookup next to the analysis endpoint
    pub location: HttpAnalysisClient,
}

impl SessionState {
    pub fn from_config(config: AssayCamConfig) -> Result<Self, CameraError> {
        let location = HttpAnalysisClient::from_config(&config.analysis)?;
        let session = CameraSession::from_config(Arc::new(NativePlatform::new()), config)?;
        log::info!(
            "AssayCam session ready (analysis at {})",
            location.base_url()
        );
        Ok(Self { session, location })
    }

    /// Relay session events to the webview until the session goes away
    pub fn forward_events<R: Runtime>(&self, app: AppHandle<R>) {
        let mut events = self.session.subscribe();
        tauri::async_runtime::spawn(async move {
            use tokio::sync::broadcast::error::RecvError;
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(e) = app.emit(SESSION_EVENT, &event) {
                            log::warn!("Failed to forward session event: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Session event relay lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}

/// Errors cross the IPC boundary as the same text users see in notices
pub(crate) fn to_command_error(error: CameraError) -> String {
    error.user_message()
}

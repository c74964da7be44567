//! AssayCam: dual-camera session engine for gold purity appraisal
//!
//! This crate drives the camera side of an appraisal workflow: it tracks
//! camera permission and attached devices, remembers which camera serves
//! which role, owns up to two live streams, samples still frames, and polls a
//! remote vision endpoint that recognises rubbing and acid tests.
//!
//! # Features
//! - `native`: real cameras through nokhwa
//! - `tauri-plugin`: the session exposed as Tauri commands
//!
//! Without features the engine runs against any [`platform::MediaPlatform`],
//! including the mocks in [`testing`].
//!
//! # Usage
//! ```rust,ignore
//! use assaycam::{AssayCamConfig, CameraSession, StreamSlot};
//! use std::sync::Arc;
//!
//! let platform = Arc::new(assaycam::platform::NativePlatform::new());
//! let session = CameraSession::from_config(platform, AssayCamConfig::load_or_default())?;
//! session.initialize().await?;
//! session.start_purity_analysis().await?;
//! // ...
//! session.stop_purity_analysis();
//! ```
//!
//! Then in a Tauri app:
//! ```rust,ignore
//! fn main() {
//!     tauri::Builder::default()
//!         .plugin(assaycam::init())
//!         .run(tauri::generate_context!())
//!         .expect("error while running tauri application");
//! }
//! ```
pub mod analysis;
#[cfg(feature = "tauri-plugin")]
pub mod commands;
pub mod config;
pub mod errors;
pub mod events;
pub mod permissions;
pub mod platform;
pub mod preferences;
pub mod registry;
pub mod sampler;
pub mod session;
pub mod stream;
pub mod types;

// Testing utilities - scriptable platform and analysis doubles
pub mod testing;

// Re-exports for convenience
pub use analysis::{
    ActivityEntry, ActivityKind, AnalysisService, DetectionFlags, HttpAnalysisClient, PollHandle,
    PurityResults,
};
pub use config::AssayCamConfig;
pub use errors::CameraError;
pub use events::{NoticeLevel, SessionEvent};
pub use permissions::PermissionState;
pub use registry::{smart_select, DeviceRegistry};
pub use session::{CameraSession, OpenRequest};
pub use stream::{ReadinessState, StreamSlot};
pub use types::{CameraDevice, CameraRole, CameraSelection, CaptureResult, Platform, StepCameraMap};

#[cfg(feature = "tauri-plugin")]
use tauri::{
    plugin::{Builder, TauriPlugin},
    Manager, Runtime,
};

/// Initialize the AssayCam plugin with all commands
#[cfg(feature = "tauri-plugin")]
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("assaycam")
        .invoke_handler(tauri::generate_handler![
            // Device commands
            commands::devices::initialize_cameras,
            commands::devices::list_cameras,
            commands::devices::get_camera_selection,
            commands::devices::select_camera,
            commands::devices::reset_camera_selection,
            commands::devices::test_camera,
            // Permission commands
            commands::permissions::check_camera_permission,
            commands::permissions::request_camera_permission,
            // Stream commands
            commands::stream::open_camera,
            commands::stream::close_camera,
            commands::stream::get_camera_readiness,
            commands::stream::capture_image,
            // Purity analysis commands
            commands::purity::start_purity_analysis,
            commands::purity::stop_purity_analysis,
            commands::purity::get_detection_status,
            commands::purity::get_purity_results,
            commands::purity::get_location,
        ])
        .setup(|app, _api| {
            let state = commands::SessionState::from_config(AssayCamConfig::load_or_default())?;
            state.forward_events(app.clone());
            app.manage(state);
            Ok(())
        })
        .build()
}

/// Initialize logging for the camera session engine
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "assaycam=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        platform: Platform::current(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub platform: Platform,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_platform_detection() {
        let platform = get_info().platform;
        assert!(!platform.as_str().is_empty());
    }

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "assaycam");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}

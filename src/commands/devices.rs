use super::{to_command_error, SessionState};
use crate::types::{CameraDevice, CameraRole, CameraSelection};
use tauri::{command, State};

/// Check permission, prompt when needed, enumerate and start hot-plug watching
#[command]
pub async fn initialize_cameras(
    state: State<'_, SessionState>,
) -> Result<Vec<CameraDevice>, String> {
    match state.session.initialize().await {
        Ok(devices) => {
            log::info!("Camera session initialized with {} devices", devices.len());
            Ok(devices)
        }
        Err(e) => {
            log::error!("Failed to initialize cameras: {}", e);
            Err(to_command_error(e))
        }
    }
}

/// Re-enumerate video inputs
#[command]
pub async fn list_cameras(state: State<'_, SessionState>) -> Result<Vec<CameraDevice>, String> {
    let devices = state
        .session
        .registry()
        .enumerate_devices()
        .await
        .map_err(to_command_error)?;
    for device in &devices {
        log::debug!("Camera: {} - {}", device.device_id, device.display_label());
    }
    Ok(devices)
}

#[command]
pub async fn get_camera_selection(
    state: State<'_, SessionState>,
) -> Result<CameraSelection, String> {
    Ok(state.session.registry().selection())
}

/// Assign `device_id` to `role`; `None` clears the role
#[command]
pub async fn select_camera(
    state: State<'_, SessionState>,
    role: CameraRole,
    device_id: Option<String>,
) -> Result<CameraSelection, String> {
    let registry = state.session.registry();
    match device_id {
        Some(id) => {
            let device = registry.select_by_id(role, &id).map_err(to_command_error)?;
            log::info!("Selected {} for {}", device.display_label(), role.describe());
        }
        None => registry.select(role, None).map_err(to_command_error)?,
    }
    Ok(registry.selection())
}

/// Forget both remembered choices and fall back to keyword matching
#[command]
pub async fn reset_camera_selection(
    state: State<'_, SessionState>,
) -> Result<CameraSelection, String> {
    state
        .session
        .registry()
        .reset_to_auto()
        .map_err(to_command_error)
}

/// Briefly open `device_id` to confirm it delivers a stream
#[command]
pub async fn test_camera(state: State<'_, SessionState>, device_id: String) -> Result<bool, String> {
    log::info!("Testing camera {}", device_id);
    Ok(state.session.registry().test_device(&device_id).await)
}

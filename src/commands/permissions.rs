use super::{to_command_error, SessionState};
use crate::permissions::PermissionState;
use tauri::{command, State};

/// Current camera permission without prompting
#[command]
pub async fn check_camera_permission(
    state: State<'_, SessionState>,
) -> Result<PermissionState, String> {
    log::debug!("Checking camera permission");
    Ok(state.session.registry().check_permission().await)
}

/// Prompt for camera access, then refresh the device list on success
#[command]
pub async fn request_camera_permission(
    state: State<'_, SessionState>,
) -> Result<PermissionState, String> {
    log::info!("Requesting camera permission");
    let registry = state.session.registry();
    match registry.request_permission().await {
        Ok(()) => Ok(registry.permission()),
        Err(e) => {
            log::warn!("Camera permission request failed: {}", e);
            Err(to_command_error(e))
        }
    }
}

use super::{to_command_error, SessionState};
use crate::session::OpenRequest;
use crate::stream::{ReadinessState, StreamSlot};
use crate::types::CaptureResult;
use tauri::{command, State};

/// Open `slot` on the device the request resolves to
#[command]
pub async fn open_camera(
    state: State<'_, SessionState>,
    slot: StreamSlot,
    request: OpenRequest,
) -> Result<ReadinessState, String> {
    log::info!("Opening {} camera", slot);
    state
        .session
        .open(slot, &request)
        .await
        .map_err(to_command_error)?;
    Ok(state.session.readiness(slot))
}

#[command]
pub async fn close_camera(state: State<'_, SessionState>, slot: StreamSlot) -> Result<(), String> {
    log::info!("Closing {} camera", slot);
    state.session.close(slot);
    Ok(())
}

#[command]
pub async fn get_camera_readiness(
    state: State<'_, SessionState>,
    slot: StreamSlot,
) -> Result<ReadinessState, String> {
    Ok(state.session.readiness(slot))
}

/// Still JPEG from a ready slot as a data URI
#[command]
pub async fn capture_image(
    state: State<'_, SessionState>,
    slot: StreamSlot,
) -> Result<CaptureResult, String> {
    state.session.capture(slot).map_err(to_command_error)
}

use super::{to_command_error, SessionState};
use crate::analysis::{DetectionFlags, GpsFix, PurityResults};
use serde::Serialize;
use tauri::{command, State};

/// Flags plus the run state, polled by the purity step UI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionStatus {
    pub analyzing: bool,
    #[serde(flatten)]
    pub flags: DetectionFlags,
}

/// Open both role cameras and begin polling the analysis endpoint
#[command]
pub async fn start_purity_analysis(state: State<'_, SessionState>) -> Result<(), String> {
    match state.session.start_purity_analysis().await {
        Ok(_) => Ok(()),
        Err(e) => {
            log::error!("Failed to start purity analysis: {}", e);
            Err(to_command_error(e))
        }
    }
}

#[command]
pub async fn stop_purity_analysis(state: State<'_, SessionState>) -> Result<(), String> {
    state.session.stop_purity_analysis();
    Ok(())
}

#[command]
pub async fn get_detection_status(
    state: State<'_, SessionState>,
) -> Result<DetectionStatus, String> {
    Ok(DetectionStatus {
        analyzing: state.session.is_analyzing(),
        flags: state.session.detection_flags(),
    })
}

/// Results for the summary step; fails until both tests were observed
#[command]
pub async fn get_purity_results(
    state: State<'_, SessionState>,
) -> Result<PurityResults, String> {
    state.session.purity_results().map_err(to_command_error)
}

/// Location stamp for the appraisal record
#[command]
pub async fn get_location(state: State<'_, SessionState>) -> Result<GpsFix, String> {
    let fix = state.location.location().await.map_err(to_command_error)?;
    if let Some(error) = &fix.error {
        log::warn!("Location unavailable: {}", error);
    }
    Ok(fix)
}

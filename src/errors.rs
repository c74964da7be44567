use crate::types::CameraRole;
use serde::Serialize;

/// Failures surfaced by the camera session engine.
///
/// The payload carries platform detail for logs; [`CameraError::user_message`]
/// is the text shown to the appraiser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail")]
pub enum CameraError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Device busy: {0}")]
    DeviceBusy(String),
    #[error("Constraints not satisfiable: {0}")]
    ConstraintNotSatisfiable(String),
    #[error("Platform unsupported: {0}")]
    PlatformUnsupported(String),
    #[error("Captured frame invalid: {0}")]
    CaptureInvalid(String),
    #[error("Analysis endpoint unreachable: {0}")]
    AnalysisUnreachable(String),
    #[error("Stream did not report decoded dimensions within {0} ms")]
    ReadinessTimeout(u64),
    #[error("Stream closed while opening: {0}")]
    Interrupted(String),
    #[error("No camera selected for role {0}")]
    SelectionMissing(CameraRole),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Preference storage error: {0}")]
    Storage(String),
    #[error("Camera error: {0}")]
    Unknown(String),
}

impl CameraError {
    /// Stable, human-readable message for the calling workflow step.
    pub fn user_message(&self) -> String {
        match self {
            CameraError::PermissionDenied(_) => {
                "Camera permission denied. Please allow camera access in your settings and try again."
                    .to_string()
            }
            CameraError::DeviceNotFound(_) => {
                "No camera found. Please connect a camera and try again.".to_string()
            }
            CameraError::DeviceBusy(_) => {
                "Camera is already in use by another application. Please close other apps using the camera."
                    .to_string()
            }
            CameraError::ConstraintNotSatisfiable(_) => {
                "Selected camera does not support the required settings.".to_string()
            }
            CameraError::PlatformUnsupported(_) => {
                "Camera access is not supported on this platform.".to_string()
            }
            CameraError::CaptureInvalid(_) => {
                "Could not capture a valid image. Wait for the preview to start and try again."
                    .to_string()
            }
            CameraError::AnalysisUnreachable(_) => {
                "Purity analysis service is unreachable.".to_string()
            }
            CameraError::ReadinessTimeout(_) => {
                "Camera started but produced no video. Try another camera.".to_string()
            }
            CameraError::Interrupted(_) => "Camera was closed before it finished starting.".to_string(),
            CameraError::SelectionMissing(role) => {
                format!("Select a {} camera first.", role.describe())
            }
            CameraError::Config(msg) | CameraError::Storage(msg) | CameraError::Unknown(msg) => {
                msg.clone()
            }
        }
    }

    /// Whether the failure should stop the caller, as opposed to a soft condition.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CameraError::AnalysisUnreachable(_))
    }
}

impl From<reqwest::Error> for CameraError {
    fn from(e: reqwest::Error) -> Self {
        CameraError::AnalysisUnreachable(e.to_string())
    }
}

impl From<config::ConfigError> for CameraError {
    fn from(e: config::ConfigError) -> Self {
        CameraError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_are_distinct() {
        let errors = [
            CameraError::PermissionDenied("x".into()),
            CameraError::DeviceNotFound("x".into()),
            CameraError::DeviceBusy("x".into()),
            CameraError::ConstraintNotSatisfiable("x".into()),
            CameraError::PlatformUnsupported("x".into()),
            CameraError::CaptureInvalid("x".into()),
            CameraError::AnalysisUnreachable("x".into()),
        ];
        let messages: std::collections::HashSet<String> =
            errors.iter().map(|e| e.user_message()).collect();
        assert_eq!(messages.len(), errors.len());
    }

    #[test]
    fn test_unknown_passes_message_through() {
        let err = CameraError::Unknown("driver exploded".to_string());
        assert_eq!(err.user_message(), "driver exploded");
        assert!(err.to_string().contains("driver exploded"));
    }

    #[test]
    fn test_analysis_errors_are_soft() {
        assert!(!CameraError::AnalysisUnreachable("timeout".into()).is_fatal());
        assert!(CameraError::DeviceBusy("in use".into()).is_fatal());
    }
}

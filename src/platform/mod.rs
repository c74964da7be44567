//! Platform capability surface
//!
//! Everything the engine needs from the host (device enumeration, permission
//! query, stream acquisition) goes through [`MediaPlatform`], so the core can
//! run against real hardware or the mocks in [`crate::testing`].

pub mod device_monitor;
#[cfg(feature = "native")]
pub mod native;

pub use device_monitor::{DeviceEvent, DeviceMonitor};
#[cfg(feature = "native")]
pub use native::NativePlatform;

use crate::errors::CameraError;
use crate::permissions::PermissionQuery;
use crate::types::{CameraFrame, StreamConstraints};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Device as reported by the platform, before the registry assigns an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    pub device_id: String,
    pub label: String,
    pub group_id: String,
}

impl RawDevice {
    pub fn new(device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
            group_id: String::new(),
        }
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }
}

/// Platform-reported cause of a failed acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformFault {
    NotAllowed(String),
    NotFound(String),
    /// Device exists but cannot be read, usually because it is in use
    NotReadable(String),
    Overconstrained(String),
    Unsupported(String),
    Other(String),
}

impl PlatformFault {
    /// Best-effort classification of a free-form backend error string
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["permission", "not authorized", "not allowed", "access denied", "eacces"]) {
            PlatformFault::NotAllowed(message.to_string())
        } else if has(&["busy", "in use", "ebusy", "not readable"]) {
            PlatformFault::NotReadable(message.to_string())
        } else if has(&["not found", "no such", "no device", "invalid device", "enoent"]) {
            PlatformFault::NotFound(message.to_string())
        } else if has(&["resolution", "format", "overconstrained", "constraint"]) {
            PlatformFault::Overconstrained(message.to_string())
        } else if has(&["not supported", "unsupported", "not implemented"]) {
            PlatformFault::Unsupported(message.to_string())
        } else {
            PlatformFault::Other(message.to_string())
        }
    }

    pub fn is_overconstrained(&self) -> bool {
        matches!(self, PlatformFault::Overconstrained(_))
    }
}

impl From<PlatformFault> for CameraError {
    fn from(fault: PlatformFault) -> Self {
        match fault {
            PlatformFault::NotAllowed(m) => CameraError::PermissionDenied(m),
            PlatformFault::NotFound(m) => CameraError::DeviceNotFound(m),
            PlatformFault::NotReadable(m) => CameraError::DeviceBusy(m),
            PlatformFault::Overconstrained(m) => CameraError::ConstraintNotSatisfiable(m),
            PlatformFault::Unsupported(m) => CameraError::PlatformUnsupported(m),
            PlatformFault::Other(m) => CameraError::Unknown(m),
        }
    }
}

/// A live media stream bound to an attached display sink.
///
/// Only the stream controller and the registry's permission probe ever hold
/// one of these.
pub trait MediaStream: Send + Sync {
    fn id(&self) -> &str;

    /// Device the stream is bound to, if the platform reports one
    fn device_id(&self) -> Option<&str>;

    /// Decoded dimensions reported by the sink; `(0, 0)` until the first frame
    fn dimensions(&self) -> (u32, u32);

    /// Copy of the most recent decoded frame; never pauses the stream
    fn latest_frame(&self) -> Option<CameraFrame>;

    /// Stop every track and detach the sink. Idempotent.
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}

/// Host capabilities consumed by the engine
#[async_trait]
pub trait MediaPlatform: Send + Sync {
    /// Whether stream acquisition exists at all on this host
    fn supports_media(&self) -> bool;

    async fn query_permission(&self) -> PermissionQuery;

    /// Permission change notifications, when the platform offers them
    fn permission_changes(&self) -> Option<broadcast::Receiver<PermissionQuery>> {
        None
    }

    async fn enumerate_video_inputs(&self) -> Result<Vec<RawDevice>, PlatformFault>;

    async fn acquire(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn MediaStream>, PlatformFault>;

    /// Device-list-changed notifications, when the platform offers them
    fn device_changes(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_backend_messages() {
        assert!(matches!(
            PlatformFault::classify("Permission denied (os error 13)"),
            PlatformFault::NotAllowed(_)
        ));
        assert!(matches!(
            PlatformFault::classify("Device or resource busy"),
            PlatformFault::NotReadable(_)
        ));
        assert!(matches!(
            PlatformFault::classify("No such file or directory"),
            PlatformFault::NotFound(_)
        ));
        assert!(matches!(
            PlatformFault::classify("Requested resolution 4096x2160 unavailable"),
            PlatformFault::Overconstrained(_)
        ));
        assert!(matches!(
            PlatformFault::classify("something odd"),
            PlatformFault::Other(_)
        ));
    }

    #[test]
    fn test_fault_to_error_mapping() {
        let err: CameraError = PlatformFault::NotReadable("busy".into()).into();
        assert!(matches!(err, CameraError::DeviceBusy(_)));
        let err: CameraError = PlatformFault::Other("weird".into()).into();
        assert_eq!(err.user_message(), "weird");
    }
}

//! Shared data types for the camera session engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Operating system the engine is running on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Windows,
    MacOS,
    Linux,
    Unknown,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOS
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::MacOS => "macos",
            Platform::Linux => "linux",
            Platform::Unknown => "unknown",
        }
    }
}

/// Snapshot of one video-input device from the last enumeration.
///
/// Re-enumeration produces fresh values; a snapshot is never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDevice {
    pub device_id: String,
    /// Empty until camera permission has been granted
    pub label: String,
    pub group_id: String,
    /// Ordinal position in the enumeration that produced this snapshot
    pub index: usize,
}

impl CameraDevice {
    pub fn new(device_id: impl Into<String>, label: impl Into<String>, index: usize) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
            group_id: String::new(),
            index,
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn has_label(&self) -> bool {
        !self.label.trim().is_empty()
    }

    /// Label for pickers; unlabeled devices get a positional placeholder.
    pub fn display_label(&self) -> String {
        if self.has_label() {
            self.label.clone()
        } else {
            format!("Camera {}", self.index + 1)
        }
    }
}

/// Logical camera role in the appraisal workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraRole {
    /// Face / front / top-view camera
    Face,
    /// Scan / side-view camera
    Scan,
}

impl CameraRole {
    pub const ALL: [CameraRole; 2] = [CameraRole::Face, CameraRole::Scan];

    /// Key under which the remembered device id is persisted
    pub fn storage_key(&self) -> &'static str {
        match self {
            CameraRole::Face => "selectedFaceCam",
            CameraRole::Scan => "selectedScanCam",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            CameraRole::Face => "face (top view)",
            CameraRole::Scan => "scan (side view)",
        }
    }
}

impl fmt::Display for CameraRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraRole::Face => write!(f, "face"),
            CameraRole::Scan => write!(f, "scan"),
        }
    }
}

/// Current device choice per role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSelection {
    pub face_cam: Option<CameraDevice>,
    pub scan_cam: Option<CameraDevice>,
}

impl CameraSelection {
    pub fn get(&self, role: CameraRole) -> Option<&CameraDevice> {
        match role {
            CameraRole::Face => self.face_cam.as_ref(),
            CameraRole::Scan => self.scan_cam.as_ref(),
        }
    }

    pub fn set(&mut self, role: CameraRole, device: Option<CameraDevice>) {
        match role {
            CameraRole::Face => self.face_cam = device,
            CameraRole::Scan => self.scan_cam = device,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.face_cam.is_some() && self.scan_cam.is_some()
    }
}

/// Caller-supplied mapping from workflow step to a device id
pub type StepCameraMap = HashMap<u32, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// What a stream acquisition asks of the platform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConstraints {
    /// Exact device; `None` lets the platform pick its default camera
    pub device_id: Option<String>,
    pub resolution: Option<Resolution>,
}

impl StreamConstraints {
    pub fn for_device(device_id: Option<String>, resolution: Option<Resolution>) -> Self {
        Self {
            device_id,
            resolution,
        }
    }

    /// Constraints for the single retry after an over-constrained request.
    ///
    /// A resolution request is dropped first; a bare device pin falls back to
    /// the platform default device.
    pub fn relaxed(&self) -> Self {
        if self.resolution.is_some() {
            Self {
                device_id: self.device_id.clone(),
                resolution: None,
            }
        } else {
            Self::default()
        }
    }
}

/// Raw decoded RGB8 frame as delivered by a stream's sink
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

impl CameraFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, device_id: String) -> Self {
        Self {
            data,
            width,
            height,
            device_id,
            timestamp: Utc::now(),
        }
    }

    /// Whether `data` holds exactly `width * height` RGB8 pixels
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * 3
    }
}

/// Encoded still image produced by the frame sampler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    /// `data:image/jpeg;base64,...`
    pub data_uri: String,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

/// Sentinel produced by an empty canvas encode
pub const EMPTY_CANVAS_URI: &str = "data:,";

impl CaptureResult {
    pub fn is_valid(&self, min_len: usize) -> bool {
        is_valid_payload(&self.data_uri, min_len)
    }
}

pub(crate) fn is_valid_payload(payload: &str, min_len: usize) -> bool {
    !payload.is_empty() && payload != EMPTY_CANVAS_URI && payload.len() >= min_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_label_placeholder() {
        let unlabeled = CameraDevice::new("abc", "", 1);
        assert_eq!(unlabeled.display_label(), "Camera 2");
        let labeled = CameraDevice::new("abc", "USB Camera", 1);
        assert_eq!(labeled.display_label(), "USB Camera");
    }

    #[test]
    fn test_relaxed_constraints_drop_resolution_then_device() {
        let strict = StreamConstraints::for_device(
            Some("cam-1".to_string()),
            Some(Resolution::new(640, 480)),
        );
        let once = strict.relaxed();
        assert_eq!(once.device_id.as_deref(), Some("cam-1"));
        assert!(once.resolution.is_none());
        assert_eq!(once.relaxed(), StreamConstraints::default());
    }

    #[test]
    fn test_payload_validity() {
        assert!(!is_valid_payload("", 1));
        assert!(!is_valid_payload(EMPTY_CANVAS_URI, 1));
        assert!(!is_valid_payload("data:image/jpeg;base64,AA", 100));
        assert!(is_valid_payload(&"x".repeat(120), 100));
    }

    #[test]
    fn test_selection_needs_both_roles() {
        let mut selection = CameraSelection::default();
        selection.set(CameraRole::Face, Some(CameraDevice::new("a", "Front", 0)));
        assert!(!selection.is_complete());
        selection.set(CameraRole::Scan, Some(CameraDevice::new("a", "Front", 0)));
        assert!(selection.is_complete());
        selection.set(CameraRole::Face, None);
        assert!(!selection.is_complete());
    }

    #[test]
    fn test_role_storage_keys() {
        assert_eq!(CameraRole::Face.storage_key(), "selectedFaceCam");
        assert_eq!(CameraRole::Scan.storage_key(), "selectedScanCam");
    }

    #[test]
    fn test_frame_well_formed() {
        let frame = CameraFrame::new(vec![0; 4 * 3 * 3], 4, 3, "0".into());
        assert!(frame.is_well_formed());
        let short = CameraFrame::new(vec![0; 5], 4, 3, "0".into());
        assert!(!short.is_well_formed());
    }
}

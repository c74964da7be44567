//! Camera permission state and native permission probing

use serde::{Deserialize, Serialize};

/// Registry-level permission state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    /// Not queried yet, or the platform cannot answer without prompting
    Unchecked,
    /// A permission request is in flight
    Prompting,
    Granted,
    Denied,
}

impl PermissionState {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Transitions only move forward; the sole way back is `Denied -> Prompting`
    /// on an explicit retry. Platform change notifications may swap between
    /// the two settled states.
    pub fn can_transition_to(self, next: PermissionState) -> bool {
        use PermissionState::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Unchecked, _) => true,
            (Prompting, Granted | Denied) => true,
            (Granted, Denied) | (Denied, Granted) => true,
            (Denied, Prompting) => true,
            _ => false,
        }
    }

    pub fn needs_prompt(self) -> bool {
        !matches!(self, PermissionState::Granted)
    }
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionState::Unchecked => write!(f, "unchecked"),
            PermissionState::Prompting => write!(f, "prompting"),
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
        }
    }
}

/// Answer from a non-intrusive platform permission query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionQuery {
    Granted,
    Denied,
    /// The user has not been asked yet
    Prompt,
    /// The platform has no way to answer without prompting
    Unsupported,
}

impl PermissionQuery {
    pub fn to_state(self) -> PermissionState {
        match self {
            PermissionQuery::Granted => PermissionState::Granted,
            PermissionQuery::Denied => PermissionState::Denied,
            PermissionQuery::Prompt | PermissionQuery::Unsupported => PermissionState::Unchecked,
        }
    }
}

/// Detailed permission information from the native probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionInfo {
    pub query: PermissionQuery,
    pub message: String,
}

/// Probe the operating system for camera access without prompting
pub fn probe_native_permission() -> PermissionInfo {
    #[cfg(all(target_os = "windows", feature = "native"))]
    {
        probe_windows()
    }

    #[cfg(target_os = "macos")]
    {
        probe_macos()
    }

    #[cfg(target_os = "linux")]
    {
        probe_linux()
    }

    #[cfg(not(any(
        all(target_os = "windows", feature = "native"),
        target_os = "macos",
        target_os = "linux"
    )))]
    {
        PermissionInfo {
            query: PermissionQuery::Unsupported,
            message: "Permission query not supported on this platform".to_string(),
        }
    }
}

#[cfg(all(target_os = "windows", feature = "native"))]
fn probe_windows() -> PermissionInfo {
    // Privacy settings gate enumeration, so a non-empty list implies access
    match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
        Ok(devices) if !devices.is_empty() => PermissionInfo {
            query: PermissionQuery::Granted,
            message: "Camera access granted via Windows Privacy settings".to_string(),
        },
        Ok(_) => PermissionInfo {
            query: PermissionQuery::Prompt,
            message: "No cameras found - permission may not be granted".to_string(),
        },
        Err(e) => PermissionInfo {
            query: PermissionQuery::Denied,
            message: format!("Camera access denied: {}", e),
        },
    }
}

#[cfg(target_os = "macos")]
fn probe_macos() -> PermissionInfo {
    use objc::runtime::{Class, Object};
    use objc::{msg_send, sel, sel_impl};
    use std::ffi::CString;

    let Some(device_class) = Class::get("AVCaptureDevice") else {
        return PermissionInfo {
            query: PermissionQuery::Unsupported,
            message: "AVFoundation not available".to_string(),
        };
    };
    let Ok(video) = CString::new("vide") else {
        return PermissionInfo {
            query: PermissionQuery::Unsupported,
            message: "Invalid media type".to_string(),
        };
    };

    // AVAuthorizationStatus: 0 NotDetermined, 1 Restricted, 2 Denied, 3 Authorized
    let status: i64 = unsafe {
        let media_type: *mut Object = msg_send![device_class, mediaTypeForString: video.as_ptr()];
        msg_send![device_class, authorizationStatusForMediaType: media_type]
    };

    match status {
        3 => PermissionInfo {
            query: PermissionQuery::Granted,
            message: "Camera access authorized".to_string(),
        },
        1 | 2 => PermissionInfo {
            query: PermissionQuery::Denied,
            message: "Camera access denied - enable in System Settings > Privacy & Security > Camera"
                .to_string(),
        },
        _ => PermissionInfo {
            query: PermissionQuery::Prompt,
            message: "Camera permission not yet requested".to_string(),
        },
    }
}

#[cfg(target_os = "linux")]
fn probe_linux() -> PermissionInfo {
    use std::path::Path;

    let first_device = (0..10)
        .map(|i| format!("/dev/video{}", i))
        .find(|path| Path::new(path).exists());

    let Some(first_device) = first_device else {
        return PermissionInfo {
            query: PermissionQuery::Prompt,
            message: "No video devices found at /dev/video*".to_string(),
        };
    };

    match std::fs::OpenOptions::new().read(true).open(&first_device) {
        Ok(_) => PermissionInfo {
            query: PermissionQuery::Granted,
            message: format!("Camera access granted ({} readable)", first_device),
        },
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => PermissionInfo {
            query: PermissionQuery::Denied,
            message: format!(
                "Camera device {} exists but is not readable - run: sudo usermod -a -G video $USER",
                first_device
            ),
        },
        // Busy or transient errors say nothing about access rights
        Err(e) => PermissionInfo {
            query: PermissionQuery::Prompt,
            message: format!("Cannot open {}: {}", first_device, e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only_transitions() {
        use PermissionState::*;
        assert!(Unchecked.can_transition_to(Prompting));
        assert!(Prompting.can_transition_to(Granted));
        assert!(Prompting.can_transition_to(Denied));
        assert!(Denied.can_transition_to(Prompting));
        assert!(!Granted.can_transition_to(Prompting));
        assert!(!Granted.can_transition_to(Unchecked));
        assert!(!Prompting.can_transition_to(Unchecked));
    }

    #[test]
    fn test_only_granted_skips_prompt() {
        use PermissionState::*;
        assert!(Unchecked.needs_prompt());
        assert!(Prompting.needs_prompt());
        assert!(Denied.needs_prompt());
        assert!(!Granted.needs_prompt());
    }

    #[test]
    fn test_query_mapping() {
        assert_eq!(PermissionQuery::Prompt.to_state(), PermissionState::Unchecked);
        assert_eq!(PermissionQuery::Unsupported.to_state(), PermissionState::Unchecked);
        assert_eq!(PermissionQuery::Granted.to_state(), PermissionState::Granted);
    }

    #[test]
    fn test_native_probe_does_not_panic() {
        let result = std::panic::catch_unwind(probe_native_permission);
        assert!(result.is_ok(), "Permission probe should not panic");
    }
}

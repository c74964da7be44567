//! Purity analysis: wire types, the remote service seam and detection state
//!
//! The vision endpoint is an opaque collaborator. The engine only ships two
//! encoded frames per cycle and folds the returned booleans into monotonic
//! [`DetectionFlags`].

pub mod client;
pub mod poller;

pub use client::HttpAnalysisClient;
pub use poller::{AnalysisPoller, FrameSources, PollHandle};

use crate::errors::CameraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Body of `POST /api/purity/analyze`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub frame1: Option<String>,
    pub frame2: Option<String>,
}

impl AnalyzeRequest {
    pub fn has_any_frame(&self) -> bool {
        self.frame1.is_some() || self.frame2.is_some()
    }
}

/// Response of `POST /api/purity/analyze`.
///
/// Only the two detection booleans drive state; anything else the server
/// sends is kept in `extra` for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub rubbing_detected: bool,
    #[serde(default)]
    pub acid_detected: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AnalyzeResponse {
    pub fn detected(rubbing: bool, acid: bool) -> Self {
        Self {
            rubbing_detected: rubbing,
            acid_detected: acid,
            extra: serde_json::Map::new(),
        }
    }

    /// Activity kinds this response reports as present
    pub fn signals(&self) -> Vec<ActivityKind> {
        let mut kinds = Vec::new();
        if self.rubbing_detected {
            kinds.push(ActivityKind::Rubbing);
        }
        if self.acid_detected {
            kinds.push(ActivityKind::AcidTesting);
        }
        kinds
    }
}

/// Location reported by `GET /api/gps/location`.
///
/// The endpoint answers with null coordinates and an `error` field when no
/// fix is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl GpsFix {
    pub fn has_fix(&self) -> bool {
        self.error.is_none() && self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Remote purity analysis service
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Clear any server-side detection state left over from a previous session
    async fn reset_status(&self) -> Result<(), CameraError>;

    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse, CameraError>;
}

/// Test activity recognised by the analysis endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Rubbing,
    AcidTesting,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Rubbing => "rubbing",
            ActivityKind::AcidTesting => "acid_testing",
        }
    }

    pub fn notice(&self) -> &'static str {
        match self {
            ActivityKind::Rubbing => "Rubbing detected",
            ActivityKind::AcidTesting => "Acid testing detected",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One false-to-true flag transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub activity: ActivityKind,
    pub timestamp: DateTime<Utc>,
}

/// Completion flags for the purity step. Once set, a flag stays set until the
/// next poller start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionFlags {
    pub rubbing_completed: bool,
    pub acid_completed: bool,
}

impl DetectionFlags {
    pub fn is_set(&self, kind: ActivityKind) -> bool {
        match kind {
            ActivityKind::Rubbing => self.rubbing_completed,
            ActivityKind::AcidTesting => self.acid_completed,
        }
    }

    /// Set the flag for `kind`; returns true only on the false-to-true edge
    pub fn record(&mut self, kind: ActivityKind) -> bool {
        let flag = match kind {
            ActivityKind::Rubbing => &mut self.rubbing_completed,
            ActivityKind::AcidTesting => &mut self.acid_completed,
        };
        let newly_set = !*flag;
        *flag = true;
        newly_set
    }

    pub fn all_complete(&self) -> bool {
        self.rubbing_completed && self.acid_completed
    }
}

/// Hand-off record for the summary step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurityResults {
    pub rubbing_completed: bool,
    pub acid_completed: bool,
    pub detected_activities: Vec<ActivityEntry>,
    pub timestamp: DateTime<Utc>,
}

impl PurityResults {
    pub fn new(flags: DetectionFlags, detected_activities: Vec<ActivityEntry>) -> Self {
        Self {
            rubbing_completed: flags.rubbing_completed,
            acid_completed: flags.acid_completed,
            detected_activities,
            timestamp: Utc::now(),
        }
    }

    /// The purity step may only advance once both tests were observed
    pub fn is_complete(&self) -> bool {
        self.rubbing_completed && self.acid_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_only_report_rising_edge() {
        let mut flags = DetectionFlags::default();
        assert!(flags.record(ActivityKind::Rubbing));
        assert!(!flags.record(ActivityKind::Rubbing));
        assert!(flags.rubbing_completed);
        assert!(!flags.all_complete());
        assert!(flags.record(ActivityKind::AcidTesting));
        assert!(flags.all_complete());
    }

    #[test]
    fn test_response_keeps_unknown_fields() {
        let json = r#"{"rubbing_detected": true, "confidence": 0.82, "stage": "rubbing"}"#;
        let response: AnalyzeResponse = serde_json::from_str(json).unwrap();
        assert!(response.rubbing_detected);
        assert!(!response.acid_detected);
        assert_eq!(response.extra.get("stage").and_then(|v| v.as_str()), Some("rubbing"));
        assert_eq!(response.signals(), vec![ActivityKind::Rubbing]);
    }

    #[test]
    fn test_request_serializes_missing_frames_as_null() {
        let request = AnalyzeRequest {
            frame1: Some("data:image/jpeg;base64,AAAA".to_string()),
            frame2: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value["frame2"].is_null());
        assert!(request.has_any_frame());
    }

    #[test]
    fn test_gps_error_form() {
        let json = r#"{"error": "GPS device not responding", "latitude": null,
                       "longitude": null, "address": "Location unavailable", "source": "error"}"#;
        let fix: GpsFix = serde_json::from_str(json).unwrap();
        assert!(!fix.has_fix());
        assert_eq!(fix.address.as_deref(), Some("Location unavailable"));
    }

    #[test]
    fn test_purity_results_shape() {
        let flags = DetectionFlags {
            rubbing_completed: true,
            acid_completed: true,
        };
        let results = PurityResults::new(
            flags,
            vec![ActivityEntry {
                activity: ActivityKind::AcidTesting,
                timestamp: Utc::now(),
            }],
        );
        assert!(results.is_complete());
        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(value["rubbingCompleted"], true);
        assert_eq!(value["detectedActivities"][0]["activity"], "acid_testing");
    }
}

//! Testing utilities for the camera session engine
//!
//! Scriptable stand-ins for the host platform and the analysis endpoint so the
//! engine can be exercised without cameras or a network.

pub mod mock_analysis;
pub mod mock_platform;
pub mod synthetic_data;

pub use mock_analysis::MockAnalysisService;
pub use mock_platform::{MockPlatform, StreamJournalEntry};
pub use synthetic_data::synthetic_video_frame;

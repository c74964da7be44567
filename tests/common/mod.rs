//! Shared fixtures for the integration tests
#![allow(dead_code)]

use assaycam::config::AssayCamConfig;
use assaycam::preferences::{MemoryPreferenceStore, PreferenceStore};
use assaycam::testing::{MockAnalysisService, MockPlatform};
use assaycam::CameraSession;
use std::sync::Arc;
use std::time::Duration;

/// Configuration with timings shrunk for tests
pub fn fast_config() -> AssayCamConfig {
    let mut config = AssayCamConfig::default();
    config.camera.ready_timeout_ms = 300;
    config.camera.ready_poll_ms = 5;
    config.analysis.interval_ms = 10;
    config.analysis.start_delay_ms = 0;
    config.devices.hotplug_poll_ms = 20;
    config
}

pub struct Harness {
    pub platform: Arc<MockPlatform>,
    pub analysis: Arc<MockAnalysisService>,
    pub store: Arc<dyn PreferenceStore>,
    pub session: CameraSession,
}

pub fn harness(devices: &[(&str, &str)]) -> Harness {
    harness_with_store(devices, Arc::new(MemoryPreferenceStore::new()))
}

pub fn harness_with_store(devices: &[(&str, &str)], store: Arc<dyn PreferenceStore>) -> Harness {
    let platform = Arc::new(MockPlatform::with_devices(devices));
    let analysis = Arc::new(MockAnalysisService::new());
    let session = CameraSession::new(
        platform.clone(),
        analysis.clone(),
        store.clone(),
        fast_config(),
    );
    Harness {
        platform,
        analysis,
        store,
        session,
    }
}

pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}

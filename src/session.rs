//! Camera session: the service object a workflow step drives
//!
//! Owns the registry, both stream slots, the capture sampler and the analysis
//! poller. Dropping the session closes every stream and stops polling.

use crate::analysis::{
    ActivityEntry, AnalysisPoller, AnalysisService, DetectionFlags, FrameSources,
    HttpAnalysisClient, PollHandle, PurityResults,
};
use crate::config::AssayCamConfig;
use crate::errors::CameraError;
use crate::events::{EventBus, NoticeLevel, Notices, SessionEvent};
use crate::platform::MediaPlatform;
use crate::preferences::{FilePreferenceStore, PreferenceStore};
use crate::registry::DeviceRegistry;
use crate::sampler::FrameSampler;
use crate::stream::{resolve_device, ReadinessState, StreamController, StreamSlot};
use crate::types::{CameraDevice, CameraRole, CaptureResult, StepCameraMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Which device a slot should open, before resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequest {
    /// Explicit device for this open only; wins over everything else
    pub device_id: Option<String>,
    /// Role whose registry selection applies when nothing more specific is given
    pub role: Option<CameraRole>,
    /// Current workflow step, looked up in `step_cameras`
    pub step: Option<u32>,
    pub step_cameras: Option<StepCameraMap>,
}

impl OpenRequest {
    pub fn device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Self::default()
        }
    }

    pub fn role(role: CameraRole) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }

    fn step_mapping(&self) -> Option<&str> {
        let step = self.step?;
        self.step_cameras
            .as_ref()
            .and_then(|map| map.get(&step))
            .map(String::as_str)
    }
}

pub struct CameraSession {
    config: AssayCamConfig,
    events: EventBus,
    notices: Arc<Notices>,
    registry: Arc<DeviceRegistry>,
    controller: Arc<StreamController>,
    capture_sampler: FrameSampler,
    poller: AnalysisPoller,
}

impl CameraSession {
    pub fn new(
        platform: Arc<dyn MediaPlatform>,
        analysis: Arc<dyn AnalysisService>,
        store: Arc<dyn PreferenceStore>,
        config: AssayCamConfig,
    ) -> Self {
        let events = EventBus::new();
        let notices = Arc::new(Notices::new(events.clone()));
        let registry = Arc::new(DeviceRegistry::new(
            platform.clone(),
            store,
            events.clone(),
            &config.devices,
        ));
        let controller = Arc::new(StreamController::new(
            platform,
            registry.acquisition_gate(),
            events.clone(),
            config.camera.clone(),
        ));
        let poller = AnalysisPoller::new(
            analysis,
            FrameSampler::for_analysis(&config.capture),
            config.analysis.interval(),
            config.analysis.start_delay(),
            events.clone(),
            notices.clone(),
        );

        Self {
            capture_sampler: FrameSampler::for_capture(&config.capture),
            config,
            events,
            notices,
            registry,
            controller,
            poller,
        }
    }

    /// Session wired to the HTTP analysis backend and the preference file
    /// named in `config`
    pub fn from_config(
        platform: Arc<dyn MediaPlatform>,
        config: AssayCamConfig,
    ) -> Result<Self, CameraError> {
        config.validate().map_err(CameraError::Config)?;
        let analysis = Arc::new(HttpAnalysisClient::from_config(&config.analysis)?);
        let store = Arc::new(FilePreferenceStore::open(&config.devices.preference_file)?);
        Ok(Self::new(platform, analysis, store, config))
    }

    pub fn config(&self) -> &AssayCamConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn controller(&self) -> &Arc<StreamController> {
        &self.controller
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    fn report<T>(&self, result: Result<T, CameraError>) -> Result<T, CameraError> {
        if let Err(err) = &result {
            self.notices.error(err);
        }
        result
    }

    /// Permission check, prompt if needed, enumeration, then hot-plug watching
    pub async fn initialize(&self) -> Result<Vec<CameraDevice>, CameraError> {
        let devices = self.report(self.registry.initialize().await)?;
        self.registry.watch_device_changes().await;
        Ok(devices)
    }

    /// Open `slot` on the device `request` resolves to
    pub async fn open(&self, slot: StreamSlot, request: &OpenRequest) -> Result<(), CameraError> {
        let selected = request.role.and_then(|role| self.registry.selected(role));
        let device_id = resolve_device(
            request.device_id.as_deref(),
            request.step_mapping(),
            selected.as_ref(),
        );
        self.report(self.controller.open(slot, device_id).await)
    }

    pub fn close(&self, slot: StreamSlot) {
        self.controller.close(slot);
    }

    pub fn readiness(&self, slot: StreamSlot) -> ReadinessState {
        self.controller.readiness(slot)
    }

    /// Single still capture at capture quality
    pub fn capture(&self, slot: StreamSlot) -> Result<CaptureResult, CameraError> {
        let result = match self.controller.readiness(slot) {
            ReadinessState::Ready => self
                .capture_sampler
                .sample(&self.controller, slot)
                .ok_or_else(|| {
                    CameraError::CaptureInvalid(format!("{} slot produced an empty frame", slot))
                }),
            state => Err(CameraError::CaptureInvalid(format!("{} slot is {:?}", slot, state))),
        };
        self.report(result)
    }

    /// Open both role cameras and start the analysis loop.
    ///
    /// Face goes to the primary slot and scan to the secondary. When both roles
    /// share one device only the primary slot is opened and sampled twice.
    /// Already running: returns the active run's handle without reopening.
    pub async fn start_purity_analysis(&self) -> Result<PollHandle, CameraError> {
        let face = self.registry.selected(CameraRole::Face);
        let scan = self.registry.selected(CameraRole::Scan);
        let result = self.start_purity_with(face, scan).await;
        self.report(result)
    }

    async fn start_purity_with(
        &self,
        face: Option<CameraDevice>,
        scan: Option<CameraDevice>,
    ) -> Result<PollHandle, CameraError> {
        if self.poller.is_running() {
            let sources = [Some(StreamSlot::Primary), Some(StreamSlot::Secondary)];
            return Ok(self.poller.start(self.controller.clone(), sources));
        }

        let face = face.ok_or(CameraError::SelectionMissing(CameraRole::Face))?;
        let scan = scan.ok_or(CameraError::SelectionMissing(CameraRole::Scan))?;

        let shared = face.device_id == scan.device_id;
        let opened = self.open_purity_slots(&face, &scan, shared).await;

        let sources = match opened {
            Ok(sources) => sources,
            Err(err) => {
                log::warn!("Failed to start purity cameras: {}", err);
                self.controller.close_all();
                return Err(err);
            }
        };

        if shared {
            log::info!("Face and scan share device {}, sampling it twice", face.device_id);
        }
        let handle = self.poller.start(self.controller.clone(), sources);
        self.notices.post(NoticeLevel::Success, "Analysis started");
        Ok(handle)
    }

    async fn open_purity_slots(
        &self,
        face: &CameraDevice,
        scan: &CameraDevice,
        shared: bool,
    ) -> Result<FrameSources, CameraError> {
        if shared {
            self.controller.close(StreamSlot::Secondary);
        }
        // A stop that lands between the two opens must win over this start
        let epochs = StreamSlot::ALL.map(|slot| self.controller.close_epoch(slot));
        let stopped = || {
            StreamSlot::ALL
                .iter()
                .zip(epochs)
                .any(|(slot, epoch)| self.controller.close_epoch(*slot) != epoch)
        };

        self.controller
            .open_unless_closed(StreamSlot::Primary, Some(face.device_id.clone()), epochs[0])
            .await?;
        let sources = if shared {
            [Some(StreamSlot::Primary), Some(StreamSlot::Primary)]
        } else {
            self.controller
                .open_unless_closed(StreamSlot::Secondary, Some(scan.device_id.clone()), epochs[1])
                .await?;
            [Some(StreamSlot::Primary), Some(StreamSlot::Secondary)]
        };

        if stopped() {
            return Err(CameraError::Interrupted("purity cameras".to_string()));
        }
        Ok(sources)
    }

    /// Stop polling and release both purity cameras
    pub fn stop_purity_analysis(&self) {
        let was_running = self.poller.stop();
        self.controller.close_all();
        if was_running {
            self.notices.post(NoticeLevel::Info, "Analysis stopped");
        }
    }

    pub fn is_analyzing(&self) -> bool {
        self.poller.is_running()
    }

    pub fn detection_flags(&self) -> DetectionFlags {
        self.poller.flags()
    }

    pub fn activity_log(&self) -> Vec<ActivityEntry> {
        self.poller.activity_log()
    }

    /// Hand-off for the summary step; fails until both tests were observed
    pub fn purity_results(&self) -> Result<PurityResults, CameraError> {
        let results = self.poller.results();
        if results.is_complete() {
            Ok(results)
        } else {
            Err(CameraError::Unknown(
                "Please complete both rubbing and acid tests".to_string(),
            ))
        }
    }

    /// Stop everything the session owns
    pub fn shutdown(&self) {
        self.poller.stop();
        self.controller.close_all();
        self.registry.shutdown();
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_request_step_mapping() {
        let mut map = StepCameraMap::new();
        map.insert(3, "cam-compliance".to_string());
        let request = OpenRequest {
            step: Some(3),
            step_cameras: Some(map.clone()),
            ..OpenRequest::default()
        };
        assert_eq!(request.step_mapping(), Some("cam-compliance"));

        let other_step = OpenRequest {
            step: Some(1),
            step_cameras: Some(map),
            ..OpenRequest::default()
        };
        assert_eq!(other_step.step_mapping(), None);
        assert_eq!(OpenRequest::device("x").step_mapping(), None);
    }
}

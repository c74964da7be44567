//! Periodic sample-submit-interpret loop for the purity step

use super::{ActivityEntry, AnalysisService, AnalyzeRequest, AnalyzeResponse, DetectionFlags, PurityResults};
use crate::events::{EventBus, NoticeLevel, Notices, SessionEvent};
use crate::sampler::FrameSampler;
use crate::stream::{StreamController, StreamSlot};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Slots sampled for `frame1` and `frame2`. Both may name the same slot when
/// one physical camera serves both roles.
pub type FrameSources = [Option<StreamSlot>; 2];

struct PollerState {
    /// Bumped on every start and stop; cycles apply results only while it matches
    generation: u64,
    running: bool,
    flags: DetectionFlags,
    log: Vec<ActivityEntry>,
    cancel: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

type SharedState = Arc<Mutex<PollerState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, PollerState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

/// Stop the run identified by `generation`, or the current run when `None`
fn halt(state: &SharedState, generation: Option<u64>, events: &EventBus) -> bool {
    {
        let mut state = lock(state);
        if !state.running || generation.is_some_and(|g| g != state.generation) {
            return false;
        }
        state.generation += 1;
        state.running = false;
        state.cancel.notify_one();
        state.task = None;
    }
    log::info!("Purity analysis stopped");
    events.emit(SessionEvent::AnalysisStopped);
    true
}

/// Cancellation handle for one poller run
#[derive(Clone)]
pub struct PollHandle {
    generation: u64,
    state: SharedState,
    events: EventBus,
}

impl std::fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollHandle")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl PollHandle {
    /// Stop this run. No cycle starts afterwards and an in-flight cycle's
    /// result is discarded. Stale handles from earlier runs do nothing.
    pub fn cancel(&self) -> bool {
        halt(&self.state, Some(self.generation), &self.events)
    }

    pub fn is_active(&self) -> bool {
        let state = lock(&self.state);
        state.running && state.generation == self.generation
    }
}

pub struct AnalysisPoller {
    service: Arc<dyn AnalysisService>,
    sampler: FrameSampler,
    interval: Duration,
    start_delay: Duration,
    events: EventBus,
    notices: Arc<Notices>,
    state: SharedState,
}

impl AnalysisPoller {
    pub fn new(
        service: Arc<dyn AnalysisService>,
        sampler: FrameSampler,
        interval: Duration,
        start_delay: Duration,
        events: EventBus,
        notices: Arc<Notices>,
    ) -> Self {
        Self {
            service,
            sampler,
            interval,
            start_delay,
            events,
            notices,
            state: Arc::new(Mutex::new(PollerState {
                generation: 0,
                running: false,
                flags: DetectionFlags::default(),
                log: Vec::new(),
                cancel: Arc::new(Notify::new()),
                task: None,
            })),
        }
    }

    /// Begin polling `sources` on `controller`. Must be called inside a tokio
    /// runtime.
    ///
    /// Resets flags and the activity log. While a run is active this is a
    /// no-op that returns the active run's handle.
    pub fn start(&self, controller: Arc<StreamController>, sources: FrameSources) -> PollHandle {
        let mut state = lock(&self.state);
        if state.running {
            log::debug!("Purity analysis already running");
            return self.handle(state.generation);
        }

        state.generation += 1;
        state.running = true;
        state.flags = DetectionFlags::default();
        state.log.clear();
        state.cancel = Arc::new(Notify::new());
        let generation = state.generation;

        let run = PollRun {
            generation,
            service: self.service.clone(),
            sampler: self.sampler,
            interval: self.interval,
            start_delay: self.start_delay,
            events: self.events.clone(),
            notices: self.notices.clone(),
            state: self.state.clone(),
            cancel: state.cancel.clone(),
            controller,
            sources,
        };
        state.task = Some(tokio::spawn(run.run()));
        drop(state);

        log::info!("Purity analysis started (every {:?})", self.interval);
        self.events.emit(SessionEvent::AnalysisStarted);
        self.handle(generation)
    }

    fn handle(&self, generation: u64) -> PollHandle {
        PollHandle {
            generation,
            state: self.state.clone(),
            events: self.events.clone(),
        }
    }

    /// Stop the active run; recorded flags and log are kept until the next start
    pub fn stop(&self) -> bool {
        halt(&self.state, None, &self.events)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn flags(&self) -> DetectionFlags {
        lock(&self.state).flags
    }

    pub fn activity_log(&self) -> Vec<ActivityEntry> {
        lock(&self.state).log.clone()
    }

    pub fn results(&self) -> PurityResults {
        let state = lock(&self.state);
        PurityResults::new(state.flags, state.log.clone())
    }
}

impl Drop for AnalysisPoller {
    fn drop(&mut self) {
        halt(&self.state, None, &self.events);
    }
}

/// Everything one spawned run needs, detached from the poller
struct PollRun {
    generation: u64,
    service: Arc<dyn AnalysisService>,
    sampler: FrameSampler,
    interval: Duration,
    start_delay: Duration,
    events: EventBus,
    notices: Arc<Notices>,
    state: SharedState,
    cancel: Arc<Notify>,
    controller: Arc<StreamController>,
    sources: FrameSources,
}

impl PollRun {
    fn is_current(&self) -> bool {
        let state = lock(&self.state);
        state.running && state.generation == self.generation
    }

    /// Sleep unless cancelled first; returns false on cancellation
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_current(),
            _ = self.cancel.notified() => false,
        }
    }

    async fn run(self) {
        if let Err(e) = self.service.reset_status().await {
            log::debug!("Analysis status reset failed: {}", e);
        }
        if !self.pause(self.start_delay).await {
            return;
        }

        loop {
            if !self.is_current() {
                break;
            }
            self.cycle().await;
            if !self.pause(self.interval).await {
                break;
            }
        }
        log::debug!("Analysis run {} finished", self.generation);
    }

    fn sample(&self, source: Option<StreamSlot>) -> Option<String> {
        source
            .and_then(|slot| self.sampler.sample(&self.controller, slot))
            .map(|capture| capture.data_uri)
    }

    async fn cycle(&self) {
        let request = AnalyzeRequest {
            frame1: self.sample(self.sources[0]),
            frame2: self.sample(self.sources[1]),
        };
        if !request.has_any_frame() {
            log::trace!("No ready frames this cycle");
            return;
        }

        match self.service.analyze(&request).await {
            Ok(response) => self.apply(&response),
            Err(e) => {
                log::debug!("Analysis cycle skipped: {}", e);
                if self.is_current() {
                    self.events.emit(SessionEvent::AnalysisSkipped {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Fold a response into the flags. Late responses from a stopped run are dropped.
    fn apply(&self, response: &AnalyzeResponse) {
        let detected: Vec<ActivityEntry> = {
            let mut state = lock(&self.state);
            if !state.running || state.generation != self.generation {
                log::debug!("Discarding analysis result from stopped run {}", self.generation);
                return;
            }
            let mut detected = Vec::new();
            for kind in response.signals() {
                if state.flags.record(kind) {
                    let entry = ActivityEntry {
                        activity: kind,
                        timestamp: Utc::now(),
                    };
                    state.log.push(entry.clone());
                    detected.push(entry);
                }
            }
            detected
        };

        for entry in detected {
            log::info!("Detected {}", entry.activity);
            self.events.emit(SessionEvent::Detection {
                activity: entry.activity,
                timestamp: entry.timestamp,
            });
            self.notices.post(NoticeLevel::Success, entry.activity.notice());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use crate::testing::{MockAnalysisService, MockPlatform};

    struct Fixture {
        service: Arc<MockAnalysisService>,
        controller: Arc<StreamController>,
        poller: AnalysisPoller,
    }

    async fn fixture() -> Fixture {
        let platform = Arc::new(MockPlatform::with_devices(&[("a", "Integrated Webcam")]));
        let events = EventBus::new();
        let controller = Arc::new(StreamController::new(
            platform,
            Arc::new(tokio::sync::RwLock::new(())),
            events.clone(),
            CameraConfig::default(),
        ));
        controller.open(StreamSlot::Primary, Some("a".into())).await.unwrap();

        let service = Arc::new(MockAnalysisService::new());
        let notices = Arc::new(Notices::new(events.clone()));
        let poller = AnalysisPoller::new(
            service.clone(),
            FrameSampler::new(60, 100),
            Duration::from_millis(10),
            Duration::ZERO,
            events,
            notices,
        );
        Fixture {
            service,
            controller,
            poller,
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_detection_sets_flag_once() {
        let f = fixture().await;
        f.service.push_detection(true, false);
        f.service.push_detection(true, false);

        f.poller.start(f.controller.clone(), [Some(StreamSlot::Primary), None]);
        wait_for(|| f.service.completed_count() >= 3).await;
        f.poller.stop();

        assert!(f.poller.flags().rubbing_completed);
        assert!(!f.poller.flags().acid_completed);
        assert_eq!(f.poller.activity_log().len(), 1);
        assert_eq!(f.service.reset_count(), 1);
    }

    #[tokio::test]
    async fn test_start_while_running_is_noop() {
        let f = fixture().await;
        let first = f.poller.start(f.controller.clone(), [Some(StreamSlot::Primary), None]);
        let second = f.poller.start(f.controller.clone(), [Some(StreamSlot::Primary), None]);
        assert!(first.is_active());
        assert!(second.is_active());
        wait_for(|| f.service.reset_count() >= 1).await;

        f.poller.stop();
        assert!(!first.is_active());
        assert!(!second.is_active());
        assert_eq!(f.service.reset_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_handle_cannot_cancel_new_run() {
        let f = fixture().await;
        let old = f.poller.start(f.controller.clone(), [Some(StreamSlot::Primary), None]);
        assert!(old.cancel());
        let current = f.poller.start(f.controller.clone(), [Some(StreamSlot::Primary), None]);

        assert!(!old.cancel());
        assert!(current.is_active());
        assert!(f.poller.is_running());
        assert!(current.cancel());
        assert!(!f.poller.is_running());
    }

    #[tokio::test]
    async fn test_endpoint_failures_do_not_stop_loop() {
        let f = fixture().await;
        f.service.fail_reset(true);
        for _ in 0..3 {
            f.service.push_response(Err(crate::errors::CameraError::AnalysisUnreachable(
                "connection refused".into(),
            )));
        }
        f.service.push_detection(false, true);

        f.poller.start(f.controller.clone(), [Some(StreamSlot::Primary), None]);
        wait_for(|| f.poller.flags().acid_completed).await;
        assert!(f.poller.is_running());
        f.poller.stop();
    }

    #[tokio::test]
    async fn test_unready_slots_skip_cycle() {
        let f = fixture().await;
        f.controller.close(StreamSlot::Primary);

        f.poller.start(f.controller.clone(), [Some(StreamSlot::Primary), Some(StreamSlot::Secondary)]);
        tokio::time::sleep(Duration::from_millis(60)).await;
        f.poller.stop();

        assert_eq!(f.service.call_count(), 0);
        assert!(f.poller.activity_log().is_empty());
    }
}

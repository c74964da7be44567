//! Stream controller: sole owner of live camera streams
//!
//! Two independent slots. Within a slot, opens are serialised and every
//! acquired stream is stopped on exactly one path: `close`, a superseding
//! `open`, a readiness timeout, or drop of the controller.

use crate::config::CameraConfig;
use crate::errors::CameraError;
use crate::events::{EventBus, SessionEvent};
use crate::platform::{MediaPlatform, MediaStream};
use crate::registry::AcquisitionGate;
use crate::types::{CameraDevice, CameraFrame, StreamConstraints};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSlot {
    Primary,
    Secondary,
}

impl StreamSlot {
    pub const ALL: [StreamSlot; 2] = [StreamSlot::Primary, StreamSlot::Secondary];

    fn index(self) -> usize {
        match self {
            StreamSlot::Primary => 0,
            StreamSlot::Secondary => 1,
        }
    }
}

impl fmt::Display for StreamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSlot::Primary => write!(f, "primary"),
            StreamSlot::Secondary => write!(f, "secondary"),
        }
    }
}

/// Per-slot lifecycle. `Ready` means the sink reported non-zero decoded
/// dimensions, not merely that acquisition succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Idle,
    Opening,
    Ready,
    Errored,
}

struct SlotState {
    readiness: ReadinessState,
    stream: Option<Box<dyn MediaStream>>,
    /// Bumped by every open and close; an open that finds it changed was superseded
    generation: u64,
    /// Explicit `close` calls only; opens queued before a close must not run after it
    closes: u64,
    last_error: Option<CameraError>,
}

struct Slot {
    op_lock: tokio::sync::Mutex<()>,
    state: Mutex<SlotState>,
}

impl Slot {
    fn new() -> Self {
        Self {
            op_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(SlotState {
                readiness: ReadinessState::Idle,
                stream: None,
                generation: 0,
                closes: 0,
                last_error: None,
            }),
        }
    }
}

/// Pick the device for an open, highest precedence first: explicit id, the
/// caller's step mapping, the registry selection, then the platform default
/// (`None`). Empty ids count as absent.
pub fn resolve_device(
    explicit: Option<&str>,
    step_mapping: Option<&str>,
    selected: Option<&CameraDevice>,
) -> Option<String> {
    explicit
        .filter(|id| !id.is_empty())
        .or_else(|| step_mapping.filter(|id| !id.is_empty()))
        .or_else(|| selected.map(|d| d.device_id.as_str()).filter(|id| !id.is_empty()))
        .map(str::to_string)
}

pub struct StreamController {
    platform: Arc<dyn MediaPlatform>,
    gate: AcquisitionGate,
    events: EventBus,
    config: CameraConfig,
    slots: [Slot; 2],
}

impl StreamController {
    pub fn new(
        platform: Arc<dyn MediaPlatform>,
        gate: AcquisitionGate,
        events: EventBus,
        config: CameraConfig,
    ) -> Self {
        Self {
            platform,
            gate,
            events,
            config,
            slots: [Slot::new(), Slot::new()],
        }
    }

    fn state(&self, slot: StreamSlot) -> MutexGuard<'_, SlotState> {
        self.slots[slot.index()]
            .state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    pub fn readiness(&self, slot: StreamSlot) -> ReadinessState {
        self.state(slot).readiness
    }

    pub fn last_error(&self, slot: StreamSlot) -> Option<CameraError> {
        self.state(slot).last_error.clone()
    }

    /// Device the slot's stream is bound to
    pub fn bound_device(&self, slot: StreamSlot) -> Option<String> {
        self.state(slot)
            .stream
            .as_ref()
            .and_then(|s| s.device_id().map(str::to_string))
    }

    pub fn dimensions(&self, slot: StreamSlot) -> Option<(u32, u32)> {
        self.state(slot).stream.as_ref().map(|s| s.dimensions())
    }

    pub fn is_live(&self, slot: StreamSlot) -> bool {
        self.state(slot).stream.as_ref().is_some_and(|s| s.is_live())
    }

    fn set_readiness(&self, slot: StreamSlot, state: &mut SlotState, next: ReadinessState) -> bool {
        if state.readiness == next {
            return false;
        }
        log::debug!("{} slot: {:?} -> {:?}", slot, state.readiness, next);
        state.readiness = next;
        true
    }

    /// Open a stream on `slot`, bound to `device_id` or the platform default.
    ///
    /// Any stream already in the slot is closed first. Returns once the stream
    /// is `Ready`, or with the error that left the slot `Errored`.
    pub async fn open(&self, slot: StreamSlot, device_id: Option<String>) -> Result<(), CameraError> {
        let epoch = self.close_epoch(slot);
        self.open_unless_closed(slot, device_id, epoch).await
    }

    /// Count of explicit closes on `slot` so far
    pub fn close_epoch(&self, slot: StreamSlot) -> u64 {
        self.state(slot).closes
    }

    /// Like [`open`](Self::open), but fails with `Interrupted` without touching
    /// the platform if `slot` was closed after `epoch` was read from
    /// [`close_epoch`](Self::close_epoch).
    pub async fn open_unless_closed(
        &self,
        slot: StreamSlot,
        device_id: Option<String>,
        epoch: u64,
    ) -> Result<(), CameraError> {
        let _serial = self.slots[slot.index()].op_lock.lock().await;

        self.release(slot, false);

        let generation = {
            let mut state = self.state(slot);
            if state.closes != epoch {
                log::debug!("{} slot closed while an open was queued, skipping it", slot);
                return Err(CameraError::Interrupted(format!("{} slot", slot)));
            }
            state.generation += 1;
            state.last_error = None;
            self.set_readiness(slot, &mut state, ReadinessState::Opening);
            state.generation
        };
        self.events.emit(SessionEvent::ReadinessChanged {
            slot,
            state: ReadinessState::Opening,
        });
        log::info!(
            "Opening {} slot on {}",
            slot,
            device_id.as_deref().unwrap_or("default camera")
        );

        let result = self.acquire_until_ready(slot, generation, device_id).await;
        if let Err(err) = &result {
            self.fail(slot, generation, err.clone());
        }
        result
    }

    async fn acquire_until_ready(
        &self,
        slot: StreamSlot,
        generation: u64,
        device_id: Option<String>,
    ) -> Result<(), CameraError> {
        if !self.platform.supports_media() {
            return Err(CameraError::PlatformUnsupported(
                "camera capture unavailable".to_string(),
            ));
        }

        let constraints =
            StreamConstraints::for_device(device_id, Some(self.config.requested_resolution()));
        let stream = {
            let _shared = self.gate.read().await;
            match self.platform.acquire(&constraints).await {
                Ok(stream) => stream,
                Err(fault) if fault.is_overconstrained() => {
                    log::warn!("{} slot over-constrained ({:?}), retrying relaxed", slot, fault);
                    self.platform
                        .acquire(&constraints.relaxed())
                        .await
                        .map_err(CameraError::from)?
                }
                Err(fault) => return Err(fault.into()),
            }
        };

        let stream_id = stream.id().to_string();
        let bound = stream.device_id().map(str::to_string);

        let mut pending = Some(stream);
        {
            let mut state = self.state(slot);
            if state.generation == generation {
                state.stream = pending.take();
            }
        }
        if let Some(mut orphan) = pending {
            orphan.stop();
            return Err(CameraError::Interrupted(format!("{} slot", slot)));
        }
        self.events.emit(SessionEvent::StreamAcquired {
            slot,
            stream_id: stream_id.clone(),
            device_id: bound,
        });

        let deadline = Instant::now() + self.config.ready_timeout();
        loop {
            let dimensions = {
                let mut state = self.state(slot);
                if state.generation != generation {
                    return Err(CameraError::Interrupted(format!("{} slot", slot)));
                }
                let dimensions = state.stream.as_ref().map(|s| s.dimensions());
                if let Some((w, h)) = dimensions {
                    if w > 0 && h > 0 {
                        self.set_readiness(slot, &mut state, ReadinessState::Ready);
                    }
                }
                dimensions
            };

            match dimensions {
                Some((w, h)) if w > 0 && h > 0 => {
                    log::info!("{} slot ready at {}x{} (stream {})", slot, w, h, stream_id);
                    self.events.emit(SessionEvent::ReadinessChanged {
                        slot,
                        state: ReadinessState::Ready,
                    });
                    return Ok(());
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                log::warn!("{} slot produced no decoded frames, giving up", slot);
                return Err(CameraError::ReadinessTimeout(self.config.ready_timeout_ms));
            }
            tokio::time::sleep(self.config.ready_poll()).await;
        }
    }

    /// Record an open failure; superseded opens leave the slot alone
    fn fail(&self, slot: StreamSlot, generation: u64, err: CameraError) {
        if matches!(err, CameraError::Interrupted(_)) {
            return;
        }
        let released = {
            let mut state = self.state(slot);
            if state.generation != generation {
                return;
            }
            self.set_readiness(slot, &mut state, ReadinessState::Errored);
            state.last_error = Some(err.clone());
            state.stream.take()
        };
        log::warn!("{} slot failed: {}", slot, err);
        if let Some(mut stream) = released {
            stream.stop();
            self.events.emit(SessionEvent::StreamReleased {
                slot,
                stream_id: stream.id().to_string(),
            });
        }
        self.events.emit(SessionEvent::ReadinessChanged {
            slot,
            state: ReadinessState::Errored,
        });
    }

    /// Stop every track of the slot's stream and return it to `Idle`.
    /// Idempotent; also cancels an open that is in flight or still queued.
    pub fn close(&self, slot: StreamSlot) {
        self.release(slot, true);
    }

    fn release(&self, slot: StreamSlot, explicit: bool) {
        let (released, changed) = {
            let mut state = self.state(slot);
            if explicit {
                state.closes += 1;
            }
            state.generation += 1;
            let changed = self.set_readiness(slot, &mut state, ReadinessState::Idle);
            (state.stream.take(), changed)
        };

        if let Some(mut stream) = released {
            stream.stop();
            log::info!("Closed {} slot (stream {})", slot, stream.id());
            self.events.emit(SessionEvent::StreamReleased {
                slot,
                stream_id: stream.id().to_string(),
            });
        }
        if changed {
            self.events.emit(SessionEvent::ReadinessChanged {
                slot,
                state: ReadinessState::Idle,
            });
        }
    }

    pub fn close_all(&self) {
        for slot in StreamSlot::ALL {
            self.close(slot);
        }
    }

    /// Latest decoded frame, only while the slot is `Ready`
    pub fn snapshot_frame(&self, slot: StreamSlot) -> Option<CameraFrame> {
        let state = self.state(slot);
        if state.readiness != ReadinessState::Ready {
            return None;
        }
        state.stream.as_ref().and_then(|s| s.latest_frame())
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformFault;
    use crate::testing::MockPlatform;
    use std::time::Duration;

    fn controller(platform: Arc<MockPlatform>, config: CameraConfig) -> StreamController {
        StreamController::new(
            platform,
            Arc::new(tokio::sync::RwLock::new(())),
            EventBus::new(),
            config,
        )
    }

    fn fast_config() -> CameraConfig {
        CameraConfig {
            ready_timeout_ms: 200,
            ready_poll_ms: 5,
            ..CameraConfig::default()
        }
    }

    #[test]
    fn test_resolve_device_priority() {
        let selected = CameraDevice::new("registry", "USB", 0);
        assert_eq!(
            resolve_device(Some("explicit"), Some("step"), Some(&selected)).as_deref(),
            Some("explicit")
        );
        assert_eq!(
            resolve_device(None, Some("step"), Some(&selected)).as_deref(),
            Some("step")
        );
        assert_eq!(
            resolve_device(Some(""), None, Some(&selected)).as_deref(),
            Some("registry")
        );
        assert_eq!(resolve_device(None, None, None), None);
    }

    #[tokio::test]
    async fn test_open_reaches_ready_and_close_releases() {
        let platform = Arc::new(MockPlatform::with_devices(&[("a", "Integrated Webcam")]));
        let controller = controller(platform.clone(), fast_config());

        controller.open(StreamSlot::Primary, Some("a".into())).await.unwrap();
        assert_eq!(controller.readiness(StreamSlot::Primary), ReadinessState::Ready);
        assert_eq!(controller.bound_device(StreamSlot::Primary).as_deref(), Some("a"));
        assert!(controller.snapshot_frame(StreamSlot::Primary).is_some());

        controller.close(StreamSlot::Primary);
        controller.close(StreamSlot::Primary);
        assert_eq!(controller.readiness(StreamSlot::Primary), ReadinessState::Idle);
        assert_eq!(platform.live_count(), 0);
    }

    #[tokio::test]
    async fn test_never_ready_stream_times_out_and_is_released() {
        let platform = Arc::new(MockPlatform::with_devices(&[("a", "Integrated Webcam")]));
        platform.never_ready("a");
        let controller = controller(platform.clone(), fast_config());

        let err = controller
            .open(StreamSlot::Primary, Some("a".into()))
            .await
            .unwrap_err();
        assert_eq!(err, CameraError::ReadinessTimeout(200));
        assert_eq!(controller.readiness(StreamSlot::Primary), ReadinessState::Errored);
        assert_eq!(platform.live_count(), 0);
    }

    #[tokio::test]
    async fn test_busy_device_maps_to_device_busy() {
        let platform = Arc::new(MockPlatform::with_devices(&[("a", "USB Camera")]));
        platform.fail_next("a", PlatformFault::NotReadable("Could not start video source".into()));
        let controller = controller(platform.clone(), fast_config());

        let err = controller
            .open(StreamSlot::Secondary, Some("a".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, CameraError::DeviceBusy(_)));
        assert_eq!(controller.last_error(StreamSlot::Secondary), Some(err));
        assert_eq!(platform.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_close_during_open_interrupts_without_leak() {
        let platform = Arc::new(MockPlatform::with_devices(&[("a", "USB Camera")]));
        platform.set_acquire_delay(Duration::from_millis(50));
        let controller = Arc::new(controller(platform.clone(), fast_config()));

        let opener = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.open(StreamSlot::Primary, Some("a".into())).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.close(StreamSlot::Primary);

        let result = opener.await.unwrap();
        assert!(matches!(result, Err(CameraError::Interrupted(_))));
        assert_eq!(controller.readiness(StreamSlot::Primary), ReadinessState::Idle);
        assert_eq!(platform.live_count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_platform() {
        let platform = Arc::new(MockPlatform::new());
        platform.set_supports_media(false);
        let controller = controller(platform.clone(), fast_config());

        let err = controller.open(StreamSlot::Primary, None).await.unwrap_err();
        assert!(matches!(err, CameraError::PlatformUnsupported(_)));
        assert!(platform.attempts().is_empty());
    }
}

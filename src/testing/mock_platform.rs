//! In-memory [`MediaPlatform`] with scripted faults and leak accounting

use crate::permissions::PermissionQuery;
use crate::platform::{MediaPlatform, MediaStream, PlatformFault, RawDevice};
use crate::testing::synthetic_video_frame;
use crate::types::{CameraFrame, StreamConstraints};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Key used to script faults for unconstrained (default-device) requests
pub const DEFAULT_DEVICE_KEY: &str = "*";

/// One acquisition or release, in the order the platform observed them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamJournalEntry {
    Acquired { stream_id: String, device_id: String },
    Released { stream_id: String, device_id: String },
}

#[derive(Default)]
struct Counters {
    acquired: AtomicUsize,
    released: AtomicUsize,
    journal: Mutex<Vec<StreamJournalEntry>>,
}

struct MockState {
    supports_media: bool,
    permission: PermissionQuery,
    deny_prompts: bool,
    devices: Vec<RawDevice>,
    faults: HashMap<String, VecDeque<PlatformFault>>,
    never_ready: HashSet<String>,
    ready_after: Duration,
    acquire_delay: Duration,
    frame_size: (u32, u32),
    attempts: Vec<StreamConstraints>,
    notifications: bool,
}

/// Scriptable platform double.
///
/// Streams are not stopped on drop, so a stream the engine forgets to stop
/// shows up as `acquired_count() > released_count()`.
pub struct MockPlatform {
    state: Mutex<MockState>,
    counters: Arc<Counters>,
    device_tx: broadcast::Sender<()>,
    permission_tx: broadcast::Sender<PermissionQuery>,
}

impl MockPlatform {
    pub fn new() -> Self {
        let (device_tx, _) = broadcast::channel(16);
        let (permission_tx, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(MockState {
                supports_media: true,
                permission: PermissionQuery::Prompt,
                deny_prompts: false,
                devices: Vec::new(),
                faults: HashMap::new(),
                never_ready: HashSet::new(),
                ready_after: Duration::ZERO,
                acquire_delay: Duration::ZERO,
                frame_size: (64, 48),
                attempts: Vec::new(),
                notifications: true,
            }),
            counters: Arc::new(Counters::default()),
            device_tx,
            permission_tx,
        }
    }

    /// Platform with `(device_id, label)` devices attached, in order
    pub fn with_devices(devices: &[(&str, &str)]) -> Self {
        let platform = Self::new();
        {
            let mut state = platform.lock();
            state.devices = devices
                .iter()
                .map(|(id, label)| RawDevice::new(*id, *label).with_group_id(format!("group-{id}")))
                .collect();
        }
        platform
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_permission(&self, query: PermissionQuery) {
        self.lock().permission = query;
        let _ = self.permission_tx.send(query);
    }

    /// Reject permission prompts instead of granting them
    pub fn deny_prompts(&self, deny: bool) {
        self.lock().deny_prompts = deny;
    }

    pub fn set_supports_media(&self, supported: bool) {
        self.lock().supports_media = supported;
    }

    /// Fail the next acquisition of `device_id` (or [`DEFAULT_DEVICE_KEY`]) with `fault`
    pub fn fail_next(&self, device_id: &str, fault: PlatformFault) {
        self.lock()
            .faults
            .entry(device_id.to_string())
            .or_default()
            .push_back(fault);
    }

    /// Streams on this device play but never report decoded dimensions
    pub fn never_ready(&self, device_id: &str) {
        self.lock().never_ready.insert(device_id.to_string());
    }

    pub fn set_ready_after(&self, delay: Duration) {
        self.lock().ready_after = delay;
    }

    pub fn set_acquire_delay(&self, delay: Duration) {
        self.lock().acquire_delay = delay;
    }

    /// Behave like a host without permission or device-change notifications,
    /// so callers have to poll
    pub fn disable_notifications(&self) {
        self.lock().notifications = false;
    }

    pub fn set_frame_size(&self, width: u32, height: u32) {
        self.lock().frame_size = (width, height);
    }

    pub fn plug(&self, device_id: &str, label: &str) {
        self.lock().devices.push(RawDevice::new(device_id, label));
        let _ = self.device_tx.send(());
    }

    pub fn unplug(&self, device_id: &str) {
        self.lock().devices.retain(|d| d.device_id != device_id);
        let _ = self.device_tx.send(());
    }

    pub fn acquired_count(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    pub fn live_count(&self) -> usize {
        self.acquired_count() - self.released_count()
    }

    pub fn journal(&self) -> Vec<StreamJournalEntry> {
        self.counters
            .journal
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Every constraint set passed to `acquire`, including failed attempts
    pub fn attempts(&self) -> Vec<StreamConstraints> {
        self.lock().attempts.clone()
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaPlatform for MockPlatform {
    fn supports_media(&self) -> bool {
        self.lock().supports_media
    }

    async fn query_permission(&self) -> PermissionQuery {
        self.lock().permission
    }

    fn permission_changes(&self) -> Option<broadcast::Receiver<PermissionQuery>> {
        self.lock()
            .notifications
            .then(|| self.permission_tx.subscribe())
    }

    async fn enumerate_video_inputs(&self) -> Result<Vec<RawDevice>, PlatformFault> {
        let state = self.lock();
        let granted = state.permission == PermissionQuery::Granted;
        Ok(state
            .devices
            .iter()
            .map(|d| RawDevice {
                device_id: d.device_id.clone(),
                label: if granted { d.label.clone() } else { String::new() },
                group_id: d.group_id.clone(),
            })
            .collect())
    }

    async fn acquire(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn MediaStream>, PlatformFault> {
        let delay = {
            let mut state = self.lock();
            state.attempts.push(constraints.clone());
            state.acquire_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if !state.supports_media {
            return Err(PlatformFault::Unsupported("no media devices".to_string()));
        }

        match state.permission {
            PermissionQuery::Denied => {
                return Err(PlatformFault::NotAllowed("permission denied".to_string()))
            }
            PermissionQuery::Prompt | PermissionQuery::Unsupported => {
                let answer = if state.deny_prompts {
                    PermissionQuery::Denied
                } else {
                    PermissionQuery::Granted
                };
                state.permission = answer;
                let _ = self.permission_tx.send(answer);
                if answer == PermissionQuery::Denied {
                    return Err(PlatformFault::NotAllowed("user dismissed prompt".to_string()));
                }
            }
            PermissionQuery::Granted => {}
        }

        let key = constraints
            .device_id
            .clone()
            .unwrap_or_else(|| DEFAULT_DEVICE_KEY.to_string());
        if let Some(fault) = state.faults.get_mut(&key).and_then(|q| q.pop_front()) {
            return Err(fault);
        }

        let device_id = match &constraints.device_id {
            Some(id) => state
                .devices
                .iter()
                .find(|d| &d.device_id == id)
                .map(|d| d.device_id.clone())
                .ok_or_else(|| PlatformFault::NotFound(format!("no device {}", id)))?,
            None => state
                .devices
                .first()
                .map(|d| d.device_id.clone())
                .ok_or_else(|| PlatformFault::NotFound("no video inputs".to_string()))?,
        };

        let ready_at = if state.never_ready.contains(&device_id) {
            None
        } else {
            Some(Instant::now() + state.ready_after)
        };

        let stream_id = uuid::Uuid::new_v4().to_string();
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        self.counters
            .journal
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(StreamJournalEntry::Acquired {
                stream_id: stream_id.clone(),
                device_id: device_id.clone(),
            });

        Ok(Box::new(MockStream {
            id: stream_id,
            device_id,
            frame_size: state.frame_size,
            ready_at,
            frames: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            counters: self.counters.clone(),
        }))
    }

    fn device_changes(&self) -> Option<broadcast::Receiver<()>> {
        self.lock().notifications.then(|| self.device_tx.subscribe())
    }
}

struct MockStream {
    id: String,
    device_id: String,
    frame_size: (u32, u32),
    ready_at: Option<Instant>,
    frames: AtomicU64,
    stopped: AtomicBool,
    counters: Arc<Counters>,
}

impl MockStream {
    fn decoding(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
            && self.ready_at.is_some_and(|at| Instant::now() >= at)
    }
}

impl MediaStream for MockStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_id(&self) -> Option<&str> {
        Some(&self.device_id)
    }

    fn dimensions(&self) -> (u32, u32) {
        if self.decoding() {
            self.frame_size
        } else {
            (0, 0)
        }
    }

    fn latest_frame(&self) -> Option<CameraFrame> {
        if !self.decoding() {
            return None;
        }
        let n = self.frames.fetch_add(1, Ordering::SeqCst);
        let (w, h) = self.frame_size;
        Some(synthetic_video_frame(n, w, h, &self.device_id))
    }

    fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        self.counters
            .journal
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(StreamJournalEntry::Released {
                stream_id: self.id.clone(),
                device_id: self.device_id.clone(),
            });
    }

    fn is_live(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }
}

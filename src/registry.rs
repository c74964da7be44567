//! Device registry: permission state, enumeration, role selection and
//! persisted preferences
//!
//! The registry never keeps a stream open. Its permission probe and device
//! tests take the exclusive side of the acquisition gate, so they cannot
//! interleave with a stream controller acquisition.

use crate::config::DevicesConfig;
use crate::errors::CameraError;
use crate::events::{EventBus, SessionEvent};
use crate::permissions::{PermissionQuery, PermissionState};
use crate::platform::{DeviceMonitor, MediaPlatform};
use crate::preferences::PreferenceStore;
use crate::types::{CameraDevice, CameraRole, CameraSelection, StreamConstraints};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

const FACE_KEYWORDS: &[&str] = &[
    "front",
    "internal",
    "integrated",
    "face",
    "built-in",
    "webcam",
    "ir camera",
];
const SCAN_KEYWORDS: &[&str] = &["usb", "external", "barcode", "document", "logitech", "back", "rear"];

/// Shared lock serialising every stream acquisition against the platform
pub type AcquisitionGate = Arc<tokio::sync::RwLock<()>>;

struct RegistryState {
    permission: PermissionState,
    last_error: Option<String>,
    devices: Vec<CameraDevice>,
    selection: CameraSelection,
}

pub struct DeviceRegistry {
    platform: Arc<dyn MediaPlatform>,
    store: Arc<dyn PreferenceStore>,
    events: EventBus,
    gate: AcquisitionGate,
    state: RwLock<RegistryState>,
    auto_select: AtomicBool,
    hotplug_poll: Duration,
    watching_permission: AtomicBool,
    watching_devices: AtomicBool,
    monitor: Mutex<Option<DeviceMonitor>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Keyword heuristic over device labels.
///
/// Face falls back to the first device; scan falls back to the second, or the
/// first when only one is attached. Advisory only: explicit selections win.
pub fn smart_select(devices: &[CameraDevice]) -> CameraSelection {
    let matches = |device: &CameraDevice, keywords: &[&str]| {
        let label = device.label.to_lowercase();
        device.has_label() && keywords.iter().any(|k| label.contains(k))
    };

    let face_cam = devices
        .iter()
        .find(|d| matches(d, FACE_KEYWORDS))
        .or_else(|| devices.first())
        .cloned();
    let scan_cam = devices
        .iter()
        .find(|d| matches(d, SCAN_KEYWORDS))
        .or_else(|| devices.get(1))
        .or_else(|| devices.first())
        .cloned();

    CameraSelection { face_cam, scan_cam }
}

impl DeviceRegistry {
    pub fn new(
        platform: Arc<dyn MediaPlatform>,
        store: Arc<dyn PreferenceStore>,
        events: EventBus,
        config: &DevicesConfig,
    ) -> Self {
        Self {
            platform,
            store,
            events,
            gate: Arc::new(tokio::sync::RwLock::new(())),
            state: RwLock::new(RegistryState {
                permission: PermissionState::Unchecked,
                last_error: None,
                devices: Vec::new(),
                selection: CameraSelection::default(),
            }),
            auto_select: AtomicBool::new(config.auto_select_on_hotplug),
            hotplug_poll: config.hotplug_poll(),
            watching_permission: AtomicBool::new(false),
            watching_devices: AtomicBool::new(false),
            monitor: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn platform(&self) -> Arc<dyn MediaPlatform> {
        self.platform.clone()
    }

    pub fn acquisition_gate(&self) -> AcquisitionGate {
        self.gate.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn permission(&self) -> PermissionState {
        self.read().permission
    }

    /// Message from the last failed permission request
    pub fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }

    /// Snapshot from the last enumeration
    pub fn devices(&self) -> Vec<CameraDevice> {
        self.read().devices.clone()
    }

    pub fn selection(&self) -> CameraSelection {
        self.read().selection.clone()
    }

    pub fn selected(&self, role: CameraRole) -> Option<CameraDevice> {
        self.read().selection.get(role).cloned()
    }

    pub fn set_auto_select(&self, enabled: bool) {
        self.auto_select.store(enabled, Ordering::SeqCst);
    }

    /// Apply a permission transition if the state machine allows it
    fn transition(&self, next: PermissionState, error: Option<String>) -> bool {
        let changed = {
            let mut state = self.write();
            if !state.permission.can_transition_to(next) {
                log::debug!("Ignoring permission transition {} -> {}", state.permission, next);
                return false;
            }
            let changed = state.permission != next;
            state.permission = next;
            state.last_error = error;
            changed
        };
        if changed {
            log::info!("Camera permission is now {}", next);
            self.events.emit(SessionEvent::PermissionChanged { state: next });
        }
        true
    }

    /// Query permission without prompting.
    ///
    /// Platforms that cannot answer leave the state at `Unchecked`, which
    /// callers treat as "needs prompt". Later platform notifications keep the
    /// state current.
    pub async fn check_permission(self: &Arc<Self>) -> PermissionState {
        let query = self.platform.query_permission().await;
        if query != PermissionQuery::Unsupported {
            self.transition(query.to_state(), None);
        }
        self.watch_permission();
        self.permission()
    }

    fn watch_permission(self: &Arc<Self>) {
        if self.watching_permission.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(mut changes) = self.platform.permission_changes() else {
            return;
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(query) => {
                        let Some(registry) = weak.upgrade() else { break };
                        if query != PermissionQuery::Unsupported {
                            registry.transition(query.to_state(), None);
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.track(handle);
    }

    /// Elevate permission by opening and immediately releasing a default stream.
    ///
    /// Any failure leaves the state at `Denied` with the user message recorded.
    pub async fn request_permission(&self) -> Result<(), CameraError> {
        if !self.platform.supports_media() {
            let err = CameraError::PlatformUnsupported("camera capture unavailable".to_string());
            self.transition(PermissionState::Denied, Some(err.user_message()));
            return Err(err);
        }
        if self.permission() == PermissionState::Granted {
            return Ok(());
        }

        self.transition(PermissionState::Prompting, None);

        let result = {
            let _exclusive = self.gate.write().await;
            match self.platform.acquire(&StreamConstraints::default()).await {
                Ok(mut probe) => {
                    probe.stop();
                    Ok(())
                }
                Err(fault) => Err(CameraError::from(fault)),
            }
        };

        match result {
            Ok(()) => {
                self.transition(PermissionState::Granted, None);
                if let Err(e) = self.enumerate_devices().await {
                    log::warn!("Re-enumeration after permission grant failed: {}", e);
                }
                Ok(())
            }
            Err(err) => {
                log::warn!("Camera permission request failed: {}", err);
                self.transition(PermissionState::Denied, Some(err.user_message()));
                Err(err)
            }
        }
    }

    /// Check permission, prompt if needed, then enumerate
    pub async fn initialize(self: &Arc<Self>) -> Result<Vec<CameraDevice>, CameraError> {
        if self.check_permission().await.needs_prompt() {
            self.request_permission().await?;
        }
        self.enumerate_devices().await
    }

    /// List video inputs and revalidate the current selection against them.
    ///
    /// Selected devices that vanished are deselected and their preference is
    /// cleared. Empty roles are restored from preferences when the remembered
    /// device is present; a remembered id that is absent is kept for later.
    pub async fn enumerate_devices(&self) -> Result<Vec<CameraDevice>, CameraError> {
        if !self.platform.supports_media() {
            return Err(CameraError::PlatformUnsupported(
                "device enumeration unavailable".to_string(),
            ));
        }

        let raw = self
            .platform
            .enumerate_video_inputs()
            .await
            .map_err(CameraError::from)?;
        let devices: Vec<CameraDevice> = raw
            .into_iter()
            .enumerate()
            .map(|(index, d)| CameraDevice::new(d.device_id, d.label, index).with_group(d.group_id))
            .collect();

        let mut remembered = Vec::new();
        for role in CameraRole::ALL {
            remembered.push((role, self.stored_preference(role)));
        }
        let auto_select = self.auto_select.load(Ordering::SeqCst);
        let heuristic = smart_select(&devices);

        let mut cleared = Vec::new();
        {
            let mut state = self.write();
            for (role, stored) in remembered {
                let current = state.selection.get(role).map(|d| d.device_id.clone());
                let next = match current {
                    Some(id) => match devices.iter().find(|d| d.device_id == id) {
                        Some(fresh) => Some(fresh.clone()),
                        None => {
                            cleared.push((role, id));
                            None
                        }
                    },
                    None => stored
                        .and_then(|id| devices.iter().find(|d| d.device_id == id).cloned())
                        .or_else(|| {
                            if auto_select {
                                heuristic.get(role).cloned()
                            } else {
                                None
                            }
                        }),
                };
                state.selection.set(role, next);
            }
            state.devices = devices.clone();
        }

        log::info!("Enumerated {} video input(s)", devices.len());
        self.events.emit(SessionEvent::DevicesChanged {
            devices: devices.clone(),
        });

        for (role, device_id) in cleared {
            log::warn!("Selected {} camera {} disappeared", role, device_id);
            if let Err(e) = self.store.remove(role.storage_key()) {
                log::warn!("Failed to clear {} preference: {}", role, e);
            }
            self.events.emit(SessionEvent::SelectionCleared { role, device_id });
        }

        Ok(devices)
    }

    fn stored_preference(&self, role: CameraRole) -> Option<String> {
        match self.store.get(role.storage_key()) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to read {} preference: {}", role, e);
                None
            }
        }
    }

    /// Manually select (or deselect) the device for `role` and persist the choice.
    ///
    /// The in-memory selection applies even when persisting fails.
    pub fn select(&self, role: CameraRole, device: Option<CameraDevice>) -> Result<(), CameraError> {
        let device_id = device.as_ref().map(|d| d.device_id.clone());
        self.write().selection.set(role, device);

        match device_id {
            Some(id) => {
                log::info!("Selected {} camera {}", role, id);
                self.store.set(role.storage_key(), &id)
            }
            None => {
                log::info!("Cleared {} camera selection", role);
                self.store.remove(role.storage_key())
            }
        }
    }

    /// Select a device from the current enumeration by id
    pub fn select_by_id(&self, role: CameraRole, device_id: &str) -> Result<CameraDevice, CameraError> {
        let device = self
            .read()
            .devices
            .iter()
            .find(|d| d.device_id == device_id)
            .cloned()
            .ok_or_else(|| CameraError::DeviceNotFound(device_id.to_string()))?;
        self.select(role, Some(device.clone()))?;
        Ok(device)
    }

    /// Forget both remembered roles and fall back to the label heuristic.
    ///
    /// The heuristic result is not persisted.
    pub fn reset_to_auto(&self) -> Result<CameraSelection, CameraError> {
        for role in CameraRole::ALL {
            self.store.remove(role.storage_key())?;
        }
        let mut state = self.write();
        let selection = smart_select(&state.devices);
        state.selection = selection.clone();
        log::info!("Camera selection reset to automatic");
        Ok(selection)
    }

    /// Whether `device_id` can be opened right now. The test stream is
    /// released before this returns.
    pub async fn test_device(&self, device_id: &str) -> bool {
        let _exclusive = self.gate.write().await;
        let constraints = StreamConstraints::for_device(Some(device_id.to_string()), None);
        match self.platform.acquire(&constraints).await {
            Ok(mut stream) => {
                stream.stop();
                true
            }
            Err(fault) => {
                log::warn!("Camera test failed for {}: {:?}", device_id, fault);
                false
            }
        }
    }

    /// Re-enumerate whenever the device list changes.
    ///
    /// Uses platform notifications when available, otherwise polls through a
    /// [`DeviceMonitor`].
    pub async fn watch_device_changes(self: &Arc<Self>) {
        if self.watching_devices.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);

        if let Some(mut changes) = self.platform.device_changes() {
            log::info!("Watching platform device-change notifications");
            let handle = tokio::spawn(async move {
                loop {
                    match changes.recv().await {
                        Ok(()) | Err(RecvError::Lagged(_)) => {
                            let Some(registry) = weak.upgrade() else { break };
                            if let Err(e) = registry.enumerate_devices().await {
                                log::warn!("Re-enumeration after device change failed: {}", e);
                            }
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });
            self.track(handle);
            return;
        }

        let monitor = DeviceMonitor::new(self.platform.clone(), self.hotplug_poll);
        let mut changes = monitor.subscribe();
        monitor.start_monitoring().await;
        *self.monitor.lock().unwrap_or_else(|p| p.into_inner()) = Some(monitor);

        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        let Some(registry) = weak.upgrade() else { break };
                        if let Err(e) = registry.enumerate_devices().await {
                            log::warn!("Re-enumeration after device change failed: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(handle);
    }

    /// Stop background watchers
    pub fn shutdown(&self) {
        for handle in self.tasks.lock().unwrap_or_else(|p| p.into_inner()).drain(..) {
            handle.abort();
        }
        if let Some(monitor) = self.monitor.lock().unwrap_or_else(|p| p.into_inner()).take() {
            monitor.stop_monitoring();
        }
        self.watching_permission.store(false, Ordering::SeqCst);
        self.watching_devices.store(false, Ordering::SeqCst);
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices(labels: &[&str]) -> Vec<CameraDevice> {
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| CameraDevice::new(format!("dev-{}", i), *label, i))
            .collect()
    }

    #[test]
    fn test_smart_select_by_keywords() {
        let list = devices(&["Logitech C920", "Integrated Webcam"]);
        let selection = smart_select(&list);
        assert_eq!(selection.face_cam.unwrap().device_id, "dev-1");
        assert_eq!(selection.scan_cam.unwrap().device_id, "dev-0");
    }

    #[test]
    fn test_smart_select_positional_fallback() {
        let list = devices(&["", ""]);
        let selection = smart_select(&list);
        assert_eq!(selection.face_cam.unwrap().device_id, "dev-0");
        assert_eq!(selection.scan_cam.unwrap().device_id, "dev-1");

        let single = devices(&["Camera"]);
        let selection = smart_select(&single);
        assert_eq!(selection.face_cam.unwrap().device_id, "dev-0");
        assert_eq!(selection.scan_cam.unwrap().device_id, "dev-0");

        assert_eq!(smart_select(&[]), CameraSelection::default());
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let list = devices(&["HD Pro", "REAR Camera", "FaceTime HD"]);
        let selection = smart_select(&list);
        assert_eq!(selection.face_cam.unwrap().device_id, "dev-2");
        assert_eq!(selection.scan_cam.unwrap().device_id, "dev-1");
    }
}

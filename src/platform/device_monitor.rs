//! Device monitoring and hot-plug detection
//!
//! Polls the platform's enumeration and reports connect/disconnect events for
//! hosts that have no native device-change notification.

use crate::platform::{MediaPlatform, RawDevice};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

/// Device event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(String),    // Device ID
    Disconnected(String), // Device ID
}

/// Device monitor for detecting camera changes
pub struct DeviceMonitor {
    platform: Arc<dyn MediaPlatform>,
    interval: Duration,
    active_devices: Arc<RwLock<HashMap<String, RawDevice>>>,
    event_sender: broadcast::Sender<DeviceEvent>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DeviceMonitor {
    /// Create a new device monitor
    pub fn new(platform: Arc<dyn MediaPlatform>, interval: Duration) -> Self {
        let (tx, _) = broadcast::channel(64);

        Self {
            platform,
            interval,
            active_devices: Arc::new(RwLock::new(HashMap::new())),
            event_sender: tx,
            task: std::sync::Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_sender.subscribe()
    }

    pub fn is_monitoring(&self) -> bool {
        self.task_slot().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start monitoring for device changes
    pub async fn start_monitoring(&self) {
        if self.is_monitoring() {
            return;
        }

        log::info!(
            "Starting device monitoring via polling every {:?}",
            self.interval
        );

        // Seed the baseline so the first poll does not report every device as new
        if let Ok(initial) = self.platform.enumerate_video_inputs().await {
            let mut active = self.active_devices.write().await;
            active.clear();
            for device in initial {
                active.insert(device.device_id.clone(), device);
            }
        }

        let platform = self.platform.clone();
        let active_devices = self.active_devices.clone();
        let event_sender = self.event_sender.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match platform.enumerate_video_inputs().await {
                    Ok(devices) => {
                        update_active_devices(&active_devices, &event_sender, devices).await
                    }
                    Err(e) => log::debug!("Device poll failed: {:?}", e),
                }
            }
        });

        *self.task_slot() = Some(handle);
    }

    /// Stop monitoring for device changes
    pub fn stop_monitoring(&self) {
        if let Some(handle) = self.task_slot().take() {
            log::info!("Stopping device monitoring");
            handle.abort();
        }
    }

    fn task_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

/// Diff a fresh scan against the known set and publish the changes
async fn update_active_devices(
    active_devices: &RwLock<HashMap<String, RawDevice>>,
    event_sender: &broadcast::Sender<DeviceEvent>,
    new_devices: Vec<RawDevice>,
) {
    let mut active = active_devices.write().await;
    let new_ids: Vec<String> = new_devices.iter().map(|d| d.device_id.clone()).collect();

    let gone: Vec<String> = active
        .keys()
        .filter(|id| !new_ids.contains(id))
        .cloned()
        .collect();
    for old_id in gone {
        log::info!("Device disconnected: {}", old_id);
        active.remove(&old_id);
        let _ = event_sender.send(DeviceEvent::Disconnected(old_id));
    }

    for device in new_devices {
        if !active.contains_key(&device.device_id) {
            log::info!("Device connected: {}", device.device_id);
            let _ = event_sender.send(DeviceEvent::Connected(device.device_id.clone()));
        }
        active.insert(device.device_id.clone(), device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPlatform;

    #[tokio::test]
    async fn test_monitor_reports_plug_and_unplug() {
        let platform = Arc::new(MockPlatform::with_devices(&[("a", "Integrated Webcam")]));
        let monitor = DeviceMonitor::new(platform.clone(), Duration::from_millis(10));
        let mut events = monitor.subscribe();

        monitor.start_monitoring().await;
        assert!(monitor.is_monitoring());

        platform.plug("b", "USB Camera");
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("connect event")
            .unwrap();
        assert_eq!(event, DeviceEvent::Connected("b".to_string()));

        platform.unplug("a");
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("disconnect event")
            .unwrap();
        assert_eq!(event, DeviceEvent::Disconnected("a".to_string()));

        monitor.stop_monitoring();
        assert!(!monitor.is_monitoring());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let platform = Arc::new(MockPlatform::new());
        let monitor = DeviceMonitor::new(platform, Duration::from_millis(10));
        monitor.stop_monitoring();
        assert!(!monitor.is_monitoring());
    }

    #[test]
    fn test_device_event_types() {
        let event1 = DeviceEvent::Connected("test".to_string());
        let event2 = DeviceEvent::Disconnected("test".to_string());
        assert_ne!(event1, event2);
    }
}

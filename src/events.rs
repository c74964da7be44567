//! Session events and the user-facing notice board

use crate::analysis::ActivityKind;
use crate::errors::CameraError;
use crate::permissions::PermissionState;
use crate::stream::{ReadinessState, StreamSlot};
use crate::types::{CameraDevice, CameraRole};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Everything observable about a camera session, in emission order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    PermissionChanged {
        state: PermissionState,
    },
    DevicesChanged {
        devices: Vec<CameraDevice>,
    },
    /// A remembered or selected device disappeared from the enumeration
    SelectionCleared {
        role: CameraRole,
        device_id: String,
    },
    StreamAcquired {
        slot: StreamSlot,
        stream_id: String,
        device_id: Option<String>,
    },
    StreamReleased {
        slot: StreamSlot,
        stream_id: String,
    },
    ReadinessChanged {
        slot: StreamSlot,
        state: ReadinessState,
    },
    AnalysisStarted,
    AnalysisStopped,
    /// A poll cycle was dropped because the endpoint failed; never fatal
    AnalysisSkipped {
        reason: String,
    },
    Detection {
        activity: ActivityKind,
        timestamp: DateTime<Utc>,
    },
    Notice {
        level: NoticeLevel,
        message: String,
    },
}

/// Broadcast fan-out for [`SessionEvent`]s. Sending never fails; events with
/// no subscribers are dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    pub fn emit(&self, event: SessionEvent) {
        log::debug!("Session event: {:?}", event);
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Single-slot notice board.
///
/// The latest notice replaces the previous one; posting the notice that is
/// already showing is a no-op, so a repeating failure shows up once.
pub struct Notices {
    current: Mutex<Option<Notice>>,
    events: EventBus,
}

impl Notices {
    pub fn new(events: EventBus) -> Self {
        Self {
            current: Mutex::new(None),
            events,
        }
    }

    /// Returns false when the notice was suppressed as a duplicate
    pub fn post(&self, level: NoticeLevel, message: impl Into<String>) -> bool {
        let notice = Notice {
            level,
            message: message.into(),
        };
        {
            let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            if current.as_ref() == Some(&notice) {
                return false;
            }
            *current = Some(notice.clone());
        }
        self.events.emit(SessionEvent::Notice {
            level: notice.level,
            message: notice.message,
        });
        true
    }

    pub fn error(&self, error: &CameraError) -> bool {
        self.post(NoticeLevel::Error, error.user_message())
    }

    pub fn current(&self) -> Option<Notice> {
        self.current.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn dismiss(&self) {
        *self.current.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

//! Native camera backend built on nokhwa
//!
//! Each stream runs its camera on a dedicated capture thread that keeps the
//! latest decoded RGB frame; the camera object never leaves that thread.

use crate::permissions::{probe_native_permission, PermissionQuery};
use crate::platform::{MediaPlatform, MediaStream, PlatformFault, RawDevice};
use crate::types::{CameraFrame, StreamConstraints};
use async_trait::async_trait;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution as NokhwaResolution,
};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const OPEN_TIMEOUT: Duration = Duration::from_secs(10);
/// How long `stop` waits on the caller's thread before handing the join off
const STOP_GRACE: Duration = Duration::from_millis(250);

/// [`MediaPlatform`] over the host's camera API
pub struct NativePlatform {
    backend: ApiBackend,
}

impl NativePlatform {
    pub fn new() -> Self {
        Self {
            backend: ApiBackend::Auto,
        }
    }
}

impl Default for NativePlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn camera_index(device_id: &str) -> CameraIndex {
    match device_id.parse::<u32>() {
        Ok(index) => CameraIndex::Index(index),
        Err(_) => CameraIndex::String(device_id.to_string()),
    }
}

fn format_request(constraints: &StreamConstraints) -> RequestedFormatType {
    match constraints.resolution {
        Some(resolution) => RequestedFormatType::Exact(CameraFormat::new(
            NokhwaResolution::new(resolution.width, resolution.height),
            FrameFormat::MJPEG,
            30,
        )),
        None => RequestedFormatType::AbsoluteHighestFrameRate,
    }
}

#[async_trait]
impl MediaPlatform for NativePlatform {
    fn supports_media(&self) -> bool {
        true
    }

    async fn query_permission(&self) -> PermissionQuery {
        tokio::task::spawn_blocking(probe_native_permission)
            .await
            .map(|info| {
                log::debug!("Native permission probe: {}", info.message);
                info.query
            })
            .unwrap_or(PermissionQuery::Unsupported)
    }

    async fn enumerate_video_inputs(&self) -> Result<Vec<RawDevice>, PlatformFault> {
        let backend = self.backend;
        let cameras = tokio::task::spawn_blocking(move || nokhwa::query(backend))
            .await
            .map_err(|e| PlatformFault::Other(format!("enumeration task failed: {}", e)))?
            .map_err(|e| PlatformFault::classify(&e.to_string()))?;

        Ok(cameras
            .into_iter()
            .map(|info| {
                RawDevice::new(info.index().to_string(), info.human_name()).with_group_id(info.misc())
            })
            .collect())
    }

    async fn acquire(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn MediaStream>, PlatformFault> {
        let constraints = constraints.clone();
        let stream = tokio::task::spawn_blocking(move || NativeStream::open(constraints))
            .await
            .map_err(|e| PlatformFault::Other(format!("open task failed: {}", e)))??;
        Ok(Box::new(stream))
    }
}

struct Shared {
    latest: Mutex<Option<CameraFrame>>,
    /// `width << 32 | height` of the last decoded frame; zero until one arrives
    dimensions: AtomicU64,
    stop_flag: AtomicBool,
}

/// Live nokhwa stream owned by its capture thread
pub struct NativeStream {
    id: String,
    device_id: String,
    shared: Arc<Shared>,
    capture_thread: Option<JoinHandle<()>>,
}

impl NativeStream {
    fn open(constraints: StreamConstraints) -> Result<Self, PlatformFault> {
        let device_id = constraints.device_id.clone().unwrap_or_else(|| "0".to_string());
        let index = camera_index(&device_id);
        let format = RequestedFormat::new::<RgbFormat>(format_request(&constraints));

        let shared = Arc::new(Shared {
            latest: Mutex::new(None),
            dimensions: AtomicU64::new(0),
            stop_flag: AtomicBool::new(false),
        });
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let thread_shared = shared.clone();
        let thread_device = device_id.clone();
        let capture_thread = std::thread::Builder::new()
            .name(format!("assaycam-capture-{}", device_id))
            .spawn(move || capture_loop(index, format, thread_device, thread_shared, ready_tx))
            .map_err(|e| PlatformFault::Other(format!("spawn failed: {e}")))?;

        let mut stream = Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_id,
            shared,
            capture_thread: Some(capture_thread),
        };

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                log::info!("Opened native camera {} (stream {})", stream.device_id, stream.id);
                Ok(stream)
            }
            Ok(Err(message)) => {
                stream.stop();
                Err(PlatformFault::classify(&message))
            }
            Err(_) => {
                stream.stop();
                Err(PlatformFault::NotReadable(format!(
                    "camera {} did not open within {:?}",
                    stream.device_id, OPEN_TIMEOUT
                )))
            }
        }
    }
}

/// Join `handle` if it finishes within `grace`, otherwise leave it to a reaper
/// thread. Returns whether the capture thread was joined in place.
fn release_capture_thread(handle: JoinHandle<()>, device_id: &str, grace: Duration) -> bool {
    let start = Instant::now();
    while !handle.is_finished() {
        if start.elapsed() >= grace {
            // The thread exits on its own once the pending frame read returns
            log::debug!("Capture thread for {} still busy, reaping in background", device_id);
            let device = device_id.to_string();
            let reaper = std::thread::Builder::new()
                .name(format!("assaycam-reaper-{}", device_id))
                .spawn(move || {
                    let _ = handle.join();
                    log::debug!("Capture thread for {} exited", device);
                });
            if let Err(e) = reaper {
                log::warn!("Could not spawn reaper for {}, detaching: {}", device_id, e);
            }
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    let _ = handle.join();
    true
}

fn capture_loop(
    index: CameraIndex,
    format: RequestedFormat<'static>,
    device_id: String,
    shared: Arc<Shared>,
    ready_tx: mpsc::Sender<Result<(), String>>,
) {
    let mut camera = match Camera::new(index, format) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };
    if let Err(e) = camera.open_stream() {
        let _ = ready_tx.send(Err(e.to_string()));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    while !shared.stop_flag.load(Ordering::Relaxed) {
        let decoded = camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>());
        match decoded {
            Ok(image) => {
                let (width, height) = (image.width(), image.height());
                let frame = CameraFrame::new(image.into_raw(), width, height, device_id.clone());
                if shared.stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                *shared.latest.lock().unwrap_or_else(|p| p.into_inner()) = Some(frame);
                shared
                    .dimensions
                    .store(((width as u64) << 32) | height as u64, Ordering::Relaxed);
            }
            Err(e) => {
                log::debug!("Frame grab failed on {}: {}", device_id, e);
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        log::warn!("Failed to stop camera {}: {}", device_id, e);
    }
}

impl MediaStream for NativeStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_id(&self) -> Option<&str> {
        Some(&self.device_id)
    }

    fn dimensions(&self) -> (u32, u32) {
        let packed = self.shared.dimensions.load(Ordering::Relaxed);
        ((packed >> 32) as u32, (packed & 0xFFFF_FFFF) as u32)
    }

    fn latest_frame(&self) -> Option<CameraFrame> {
        if self.shared.stop_flag.load(Ordering::Relaxed) {
            return None;
        }
        self.shared
            .latest
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn stop(&mut self) {
        self.shared.stop_flag.store(true, Ordering::Relaxed);
        self.shared.dimensions.store(0, Ordering::Relaxed);
        *self.shared.latest.lock().unwrap_or_else(|p| p.into_inner()) = None;

        let Some(handle) = self.capture_thread.take() else {
            return;
        };
        if release_capture_thread(handle, &self.device_id, STOP_GRACE) {
            log::debug!("Released native camera {} (stream {})", self.device_id, self.id);
        }
    }

    fn is_live(&self) -> bool {
        !self.shared.stop_flag.load(Ordering::Relaxed)
    }
}

impl Drop for NativeStream {
    fn drop(&mut self) {
        self.stop();
    }
}

//! Hardware tests for the nokhwa backend.
//!
//! These need a real camera and are ignored by default.
//! Run with: cargo test --test native_backend --features native -- --ignored

use assaycam::platform::{MediaPlatform, NativePlatform};
use assaycam::preferences::MemoryPreferenceStore;
use assaycam::testing::MockAnalysisService;
use assaycam::types::{Resolution, StreamConstraints};
use assaycam::{AssayCamConfig, CameraSession, OpenRequest, ReadinessState, StreamSlot};
use std::sync::Arc;

#[test]
fn test_native_platform_reports_media_support() {
    assert!(NativePlatform::new().supports_media());
}

#[tokio::test]
#[ignore = "requires a camera"]
async fn test_enumerate_real_devices() {
    let platform = NativePlatform::new();
    let devices = platform.enumerate_video_inputs().await.unwrap();
    for device in &devices {
        println!("{}: {}", device.device_id, device.label);
    }
    assert!(!devices.is_empty());
}

#[tokio::test]
#[ignore = "requires a camera"]
async fn test_stream_decodes_frames() {
    let platform = NativePlatform::new();
    let constraints = StreamConstraints::for_device(Some("0".into()), Some(Resolution::new(640, 480)));
    let mut stream = match platform.acquire(&constraints).await {
        Ok(stream) => stream,
        Err(fault) if fault.is_overconstrained() => {
            platform.acquire(&constraints.relaxed()).await.unwrap()
        }
        Err(fault) => panic!("acquire failed: {:?}", fault),
    };

    for _ in 0..100 {
        if stream.dimensions().0 > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    let frame = stream.latest_frame().expect("no frame within 5s");
    assert!(frame.is_well_formed());

    stream.stop();
    assert!(!stream.is_live());
    assert!(stream.latest_frame().is_none());
}

#[tokio::test]
#[ignore = "requires a camera"]
async fn test_session_capture_on_real_camera() {
    let session = CameraSession::new(
        Arc::new(NativePlatform::new()),
        Arc::new(MockAnalysisService::new()),
        Arc::new(MemoryPreferenceStore::new()),
        AssayCamConfig::default(),
    );
    let devices = session.initialize().await.unwrap();
    let first = devices.first().expect("no cameras attached");

    session
        .open(StreamSlot::Primary, &OpenRequest::device(first.device_id.clone()))
        .await
        .unwrap();
    assert_eq!(session.readiness(StreamSlot::Primary), ReadinessState::Ready);
    let capture = session.capture(StreamSlot::Primary).unwrap();
    assert!(capture.is_valid(100));
    session.close(StreamSlot::Primary);
}

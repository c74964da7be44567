//! Frame sampler: still JPEG snapshots of a ready stream

use crate::config::CaptureConfig;
use crate::stream::{StreamController, StreamSlot};
use crate::types::{is_valid_payload, CameraFrame, CaptureResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;

/// Encodes the current frame of a slot at its native decoded resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSampler {
    jpeg_quality: u8,
    min_payload_len: usize,
}

impl FrameSampler {
    pub fn new(jpeg_quality: u8, min_payload_len: usize) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
            min_payload_len,
        }
    }

    /// Sampler for single captures
    pub fn for_capture(config: &CaptureConfig) -> Self {
        Self::new(config.jpeg_quality, config.min_payload_bytes)
    }

    /// Sampler for the analysis loop
    pub fn for_analysis(config: &CaptureConfig) -> Self {
        Self::new(config.analysis_jpeg_quality, config.min_payload_bytes)
    }

    /// Snapshot `slot`, or `None` when it is not ready or the encode is unusable.
    ///
    /// Reads a copy of the latest frame; the stream keeps running.
    pub fn sample(&self, controller: &StreamController, slot: StreamSlot) -> Option<CaptureResult> {
        let frame = controller.snapshot_frame(slot)?;
        self.encode(&frame)
    }

    pub fn encode(&self, frame: &CameraFrame) -> Option<CaptureResult> {
        if !frame.is_well_formed() {
            log::debug!(
                "Skipping malformed frame from {} ({}x{}, {} bytes)",
                frame.device_id,
                frame.width,
                frame.height,
                frame.data.len()
            );
            return None;
        }

        let img = image::RgbImage::from_raw(frame.width, frame.height, frame.data.clone())?;
        let dynamic_img = image::DynamicImage::ImageRgb8(img);

        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality);
        if let Err(e) = dynamic_img.write_with_encoder(encoder) {
            log::debug!("JPEG encode failed for {}: {}", frame.device_id, e);
            return None;
        }

        let data_uri = format!("data:image/jpeg;base64,{}", STANDARD.encode(&jpeg));
        if !is_valid_payload(&data_uri, self.min_payload_len) {
            log::debug!("Discarding near-empty capture ({} bytes)", data_uri.len());
            return None;
        }

        Some(CaptureResult {
            data_uri,
            width: frame.width,
            height: frame.height,
            captured_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_video_frame;

    #[test]
    fn test_encode_produces_jpeg_data_uri() {
        let sampler = FrameSampler::new(60, 100);
        let frame = synthetic_video_frame(3, 64, 48, "cam");
        let capture = sampler.encode(&frame).unwrap();

        assert!(capture.data_uri.starts_with("data:image/jpeg;base64,/9j/"));
        assert_eq!((capture.width, capture.height), (64, 48));
        assert!(capture.is_valid(100));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let sampler = FrameSampler::new(90, 100);
        let frame = synthetic_video_frame(7, 32, 24, "cam");
        let a = sampler.encode(&frame).unwrap();
        let b = sampler.encode(&frame).unwrap();
        assert_eq!(a.data_uri, b.data_uri);
    }

    #[test]
    fn test_malformed_frame_yields_none() {
        let sampler = FrameSampler::new(90, 100);
        let frame = CameraFrame::new(vec![0; 10], 64, 48, "cam".into());
        assert!(sampler.encode(&frame).is_none());
    }

    #[test]
    fn test_tiny_payload_rejected_by_threshold() {
        let sampler = FrameSampler::new(10, 1_000_000);
        let frame = synthetic_video_frame(0, 8, 8, "cam");
        assert!(sampler.encode(&frame).is_none());
    }
}

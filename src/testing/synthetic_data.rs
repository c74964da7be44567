//! Synthetic frames for offline testing

use crate::types::CameraFrame;

/// Create a synthetic RGB8 frame with a gradient that shifts per frame number
pub fn synthetic_video_frame(frame_number: u64, width: u32, height: u32, device_id: &str) -> CameraFrame {
    let mut data = vec![0u8; (width * height * 3) as usize];

    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }

    CameraFrame::new(data, width, height, device_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_video_frame_correct_size() {
        let frame = synthetic_video_frame(0, 64, 48, "0");
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn test_synthetic_video_frames_differ() {
        let frame0 = synthetic_video_frame(0, 32, 24, "0");
        let frame1 = synthetic_video_frame(1, 32, 24, "0");
        assert_ne!(frame0.data[0], frame1.data[0]);
    }
}

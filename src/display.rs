//! Display side of the frame loop: which frame is on screen and when it
//! changes. Timing comes from an external scheduler calling `tick`.

use std::time::Duration;
use tracing::{debug, warn};

use crate::codec::WireRecord;
use crate::config::{Config, DisplayConfig};
use crate::error::Result;
use crate::fountain::FountainEncoder;

pub const MAX_FRAMES_PER_SECOND: f64 = 60.0;
pub const MIN_FRAMES_PER_SECOND: f64 = 0.1;

#[derive(Debug)]
pub struct FrameDisplay {
    encoder: FountainEncoder,
    current: Vec<u8>,
    frames_per_second: f64,
    elapsed: Duration,
}

impl FrameDisplay {
    pub fn new(message: &[u8], config: &Config) -> Result<Self> {
        let mut encoder = FountainEncoder::new(message, config.transport.max_fragment_len)?
            .with_mix_threshold(config.transport.mix_threshold);
        let current = encoder.next_frame().encode();
        debug!(
            bytes = message.len(),
            frames = encoder.frame_count(),
            "display session started"
        );
        let mut display = Self {
            encoder,
            current,
            frames_per_second: DisplayConfig::default().frames_per_second,
            elapsed: Duration::ZERO,
        };
        display.set_cadence(config.display.frames_per_second);
        Ok(display)
    }

    /// Display the wire encoding of `record`.
    pub fn for_record<R: WireRecord>(record: &R, config: &Config) -> Result<Self> {
        Self::new(&record.encode(), config)
    }

    /// Encoded frame to render now.
    pub fn current_frame(&self) -> &[u8] {
        &self.current
    }

    pub fn frame_count(&self) -> u32 {
        self.encoder.frame_count()
    }

    /// A single-frame message can be shared as a still image.
    pub fn is_single_frame(&self) -> bool {
        self.encoder.is_single_frame()
    }

    pub fn cadence(&self) -> f64 {
        self.frames_per_second
    }

    pub fn set_cadence(&mut self, frames_per_second: f64) {
        if !frames_per_second.is_finite() || frames_per_second <= 0.0 {
            warn!(frames_per_second, "ignoring invalid cadence");
            return;
        }
        self.frames_per_second = frames_per_second.clamp(MIN_FRAMES_PER_SECOND, MAX_FRAMES_PER_SECOND);
        self.elapsed = Duration::ZERO;
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frames_per_second)
    }

    /// Move to the next frame regardless of timing.
    pub fn advance(&mut self) {
        if self.is_single_frame() {
            return;
        }
        self.current = self.encoder.next_frame().encode();
    }

    /// Account for `elapsed` wall time; returns whether the frame changed.
    pub fn tick(&mut self, elapsed: Duration) -> bool {
        if self.is_single_frame() {
            return false;
        }

        let interval = self.interval().as_nanos().max(1);
        let pending = self.elapsed.as_nanos().saturating_add(elapsed.as_nanos());
        let steps = pending / interval;
        self.elapsed = Duration::from_nanos((pending % interval) as u64);
        if steps == 0 {
            return false;
        }

        // land where the loop would be had every interval been shown
        self.encoder.skip(((steps - 1) % (1u128 << 32)) as u32);
        self.current = self.encoder.next_frame().encode();
        true
    }

    /// Start the loop over from the first frame.
    pub fn restart(&mut self) {
        self.encoder.restart();
        self.current = self.encoder.next_frame().encode();
        self.elapsed = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fountain::fragment_index;
    use crate::frame::Frame;

    fn config(max_fragment_len: usize) -> Config {
        let mut config = Config::default();
        config.transport.max_fragment_len = max_fragment_len;
        config
    }

    fn sequence(display: &FrameDisplay) -> u32 {
        Frame::decode(display.current_frame()).unwrap().sequence_number
    }

    #[test]
    fn test_tick_follows_cadence() {
        let mut display = FrameDisplay::new(&[7u8; 100], &config(10)).unwrap();
        display.set_cadence(4.0);
        assert_eq!(sequence(&display), 0);

        assert!(!display.tick(Duration::from_millis(200)));
        assert_eq!(sequence(&display), 0);
        assert!(display.tick(Duration::from_millis(100)));
        assert_eq!(sequence(&display), 1);
        assert!(display.tick(Duration::from_millis(500)));
        assert_eq!(sequence(&display), 3);
    }

    #[test]
    fn test_long_tick_lands_on_elapsed_frame() {
        let mut display = FrameDisplay::new(&[3u8; 40], &config(10)).unwrap();
        assert_eq!(display.frame_count(), 4);
        display.set_cadence(4.0);

        assert!(display.tick(Duration::from_millis(1250)));
        let frame = Frame::decode(display.current_frame()).unwrap();
        assert_eq!(frame.sequence_number, 5);
        assert_eq!(fragment_index(frame.sequence_number, frame.frame_count), 1);

        assert!(!display.tick(Duration::from_millis(200)));
        assert_eq!(sequence(&display), 5);
        assert!(display.tick(Duration::from_millis(50)));
        assert_eq!(sequence(&display), 6);
    }

    #[test]
    fn test_huge_tick_does_not_overflow() {
        let mut display = FrameDisplay::new(&[3u8; 40], &config(10)).unwrap();
        assert!(display.tick(Duration::MAX));
        assert!(display.tick(Duration::MAX));
        assert!(Frame::decode(display.current_frame()).is_ok());
    }

    #[test]
    fn test_sequence_keeps_growing() {
        let mut display = FrameDisplay::new(&[1u8; 30], &config(10)).unwrap();
        for _ in 0..7 {
            display.advance();
        }
        assert_eq!(sequence(&display), 7);

        display.restart();
        assert_eq!(sequence(&display), 0);
    }

    #[test]
    fn test_single_frame_is_static() {
        let mut display = FrameDisplay::new(b"short", &Config::default()).unwrap();
        assert!(display.is_single_frame());
        let first = display.current_frame().to_vec();
        assert!(!display.tick(Duration::from_secs(5)));
        display.advance();
        assert_eq!(display.current_frame(), first.as_slice());
    }

    #[test]
    fn test_invalid_cadence_ignored() {
        let mut display = FrameDisplay::new(&[0u8; 50], &config(10)).unwrap();
        display.set_cadence(0.0);
        display.set_cadence(f64::NAN);
        assert_eq!(display.cadence(), 3.0);
        display.set_cadence(500.0);
        assert_eq!(display.cadence(), MAX_FRAMES_PER_SECOND);
        display.set_cadence(1e-300);
        assert_eq!(display.cadence(), MIN_FRAMES_PER_SECOND);
    }
}

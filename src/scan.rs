use tracing::trace;

use crate::config::Config;
use crate::error::Result;
use crate::fountain::{FountainDecoder, ReassemblyState};

/// Scanner side of the frame loop. Scan events are fed in one at a time by
/// whoever owns the session.
#[derive(Debug)]
pub struct ScanSession {
    decoder: FountainDecoder,
    frames_seen: u64,
}

impl ScanSession {
    pub fn new(config: &Config) -> Self {
        Self {
            decoder: FountainDecoder::new(config.transport.max_pending_messages),
            frames_seen: 0,
        }
    }

    pub fn ingest_frame(&mut self, data: &[u8]) -> Result<ReassemblyState> {
        self.frames_seen += 1;
        trace!(bytes = data.len(), frames_seen = self.frames_seen, "frame scanned");
        self.decoder.receive(data)
    }

    pub fn progress(&self) -> f64 {
        self.decoder.progress()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Drop everything accumulated so far.
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.frames_seen = 0;
    }
}

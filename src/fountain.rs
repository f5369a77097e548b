//! Fountain-style multi-frame transport.
//!
//! A message is cut into `frame_count` equal fragments (the last one zero
//! padded) and emitted as an endless sequence of frames. Frame `seq` carries
//! fragment `seq mod frame_count`. When mixing is enabled and the message has
//! more than `mix_threshold` fragments, every odd cycle instead carries XOR
//! combinations of two or three fragments; even cycles stay pure, so a
//! receiver can always finish from pure frames alone.

use byteorder::{ByteOrder, LittleEndian};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::codec::WireRecord;
use crate::error::{DecodeError, EncodeError, ReassemblyError, Result};
use crate::frame::{Frame, FrameFlags, MAX_FRAME_COUNT};

/// Fragment counts above this mix fragments on odd cycles.
pub const DEFAULT_MIX_THRESHOLD: u32 = 8;

/// Distinct messages buffered at once by a decoder.
pub const DEFAULT_MAX_PENDING: usize = 4;

/// Fragment carried by a pure frame.
pub fn fragment_index(sequence_number: u32, frame_count: u32) -> u32 {
    sequence_number % frame_count.max(1)
}

fn is_mixed_cycle(sequence_number: u32, frame_count: u32, mix_threshold: Option<u32>) -> bool {
    match mix_threshold {
        Some(threshold) if frame_count > threshold => (sequence_number / frame_count) % 2 == 1,
        _ => false,
    }
}

/// Fragments combined by the mixed frame `sequence_number`.
///
/// Derived only from fields the frame carries, so sender and receiver agree
/// without negotiation. Always includes `fragment_index(seq, frame_count)`.
pub fn mixed_indices(sequence_number: u32, frame_count: u32, checksum: u32) -> BTreeSet<u32> {
    let mut indices = BTreeSet::new();
    indices.insert(fragment_index(sequence_number, frame_count));

    let mut key = [0u8; 8];
    LittleEndian::write_u32(&mut key[..4], sequence_number);
    LittleEndian::write_u32(&mut key[4..], frame_count);
    let mut state = xxh3_64_with_seed(&key, checksum as u64);

    let degree = (2 + (state % 2) as usize).min(frame_count as usize);
    while indices.len() < degree {
        state = xxh3_64_with_seed(&state.to_le_bytes(), sequence_number as u64);
        indices.insert((state % frame_count as u64) as u32);
    }
    indices
}

fn xor_into(target: &mut [u8], source: &[u8]) {
    for (t, s) in target.iter_mut().zip(source) {
        *t ^= s;
    }
}

/// Produces frames for one message, forever.
#[derive(Clone, Debug)]
pub struct FountainEncoder {
    message_len: u32,
    checksum: u32,
    fragments: Vec<Vec<u8>>,
    mix_threshold: Option<u32>,
    next_sequence: u32,
}

impl FountainEncoder {
    pub fn new(message: &[u8], max_fragment_len: usize) -> Result<Self> {
        let message_len =
            u32::try_from(message.len()).map_err(|_| EncodeError::MessageTooLarge(message.len()))?;
        let max_fragment_len = max_fragment_len.max(1);

        let frame_count = message.len().div_ceil(max_fragment_len).max(1);
        if frame_count > MAX_FRAME_COUNT as usize {
            return Err(EncodeError::TooManyFrames {
                frames: frame_count,
                max: MAX_FRAME_COUNT,
            }
            .into());
        }
        let fragment_len = message.len().div_ceil(frame_count);

        let mut padded = message.to_vec();
        padded.resize(fragment_len * frame_count, 0);
        let fragments = if fragment_len == 0 {
            vec![Vec::new()]
        } else {
            padded.chunks(fragment_len).map(<[u8]>::to_vec).collect()
        };

        Ok(Self {
            message_len,
            checksum: crc32fast::hash(message),
            fragments,
            mix_threshold: Some(DEFAULT_MIX_THRESHOLD),
            next_sequence: 0,
        })
    }

    /// `None` disables mixing.
    pub fn with_mix_threshold(mut self, mix_threshold: Option<u32>) -> Self {
        self.mix_threshold = mix_threshold;
        self
    }

    pub fn frame_count(&self) -> u32 {
        self.fragments.len() as u32
    }

    pub fn fragment_len(&self) -> usize {
        self.fragments[0].len()
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn is_single_frame(&self) -> bool {
        self.fragments.len() == 1
    }

    /// Sequence number of the frame `next_frame` will return.
    pub fn sequence_number(&self) -> u32 {
        self.next_sequence
    }

    pub fn frame_at(&self, sequence_number: u32) -> Frame {
        let frame_count = self.frame_count();

        let (flags, fragment) = if is_mixed_cycle(sequence_number, frame_count, self.mix_threshold) {
            let mut mixed = vec![0u8; self.fragment_len()];
            for index in mixed_indices(sequence_number, frame_count, self.checksum) {
                xor_into(&mut mixed, &self.fragments[index as usize]);
            }
            (FrameFlags::MIXED, mixed)
        } else {
            let index = fragment_index(sequence_number, frame_count);
            (FrameFlags::empty(), self.fragments[index as usize].clone())
        };

        Frame {
            sequence_number,
            frame_count,
            message_len: self.message_len,
            checksum: self.checksum,
            flags,
            fragment,
        }
    }

    pub fn next_frame(&mut self) -> Frame {
        let frame = self.frame_at(self.next_sequence);
        self.next_sequence = self.next_sequence.wrapping_add(1);
        frame
    }

    /// Pass over `count` frames without producing them.
    pub fn skip(&mut self, count: u32) {
        self.next_sequence = self.next_sequence.wrapping_add(count);
    }

    /// Back to the start of the cycle.
    pub fn restart(&mut self) {
        self.next_sequence = 0;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReassemblyState {
    Incomplete,
    Complete(Vec<u8>),
}

impl ReassemblyState {
    pub fn is_complete(&self) -> bool {
        matches!(self, ReassemblyState::Complete(_))
    }
}

#[derive(Debug)]
struct MixedPart {
    indices: BTreeSet<u32>,
    data: Vec<u8>,
}

/// Reassembly state for one message, keyed by its checksum.
#[derive(Debug)]
struct Accumulator {
    checksum: u32,
    frame_count: u32,
    message_len: u32,
    fragment_len: usize,
    fragments: Vec<Option<Vec<u8>>>,
    received: u32,
    mixed: Vec<MixedPart>,
    last_touched: u64,
}

impl Accumulator {
    fn new(frame: &Frame) -> Self {
        Self {
            checksum: frame.checksum,
            frame_count: frame.frame_count,
            message_len: frame.message_len,
            fragment_len: frame.fragment.len(),
            fragments: vec![None; frame.frame_count as usize],
            received: 0,
            mixed: Vec::new(),
            last_touched: 0,
        }
    }

    fn check(&self, frame: &Frame) -> std::result::Result<(), ReassemblyError> {
        if frame.frame_count != self.frame_count {
            return Err(ReassemblyError::FrameCountConflict {
                expected: self.frame_count,
                found: frame.frame_count,
            });
        }
        if frame.message_len != self.message_len {
            return Err(ReassemblyError::MessageLengthConflict {
                expected: self.message_len,
                found: frame.message_len,
            });
        }
        if frame.fragment.len() != self.fragment_len {
            return Err(ReassemblyError::FragmentLengthConflict {
                expected: self.fragment_len,
                found: frame.fragment.len(),
            });
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.received == self.frame_count
    }

    fn add(&mut self, frame: &Frame) {
        if frame.is_mixed() {
            let indices = mixed_indices(frame.sequence_number, frame.frame_count, frame.checksum);
            self.add_mixed(indices, frame.fragment.clone());
        } else {
            let index = fragment_index(frame.sequence_number, frame.frame_count);
            self.add_fragment(index, frame.fragment.clone());
        }
    }

    fn add_fragment(&mut self, index: u32, data: Vec<u8>) {
        let mut queue = vec![(index, data)];

        while let Some((index, data)) = queue.pop() {
            let slot = &mut self.fragments[index as usize];
            if slot.is_some() {
                continue;
            }
            *slot = Some(data.clone());
            self.received += 1;

            // peel the new fragment out of every pending mixed part
            let mut i = 0;
            while i < self.mixed.len() {
                let part = &mut self.mixed[i];
                if part.indices.remove(&index) {
                    xor_into(&mut part.data, &data);
                    if part.indices.len() <= 1 {
                        let part = self.mixed.swap_remove(i);
                        if let Some(&last) = part.indices.iter().next() {
                            queue.push((last, part.data));
                        }
                        continue;
                    }
                }
                i += 1;
            }
        }
    }

    fn add_mixed(&mut self, mut indices: BTreeSet<u32>, mut data: Vec<u8>) {
        let known: Vec<u32> = indices
            .iter()
            .copied()
            .filter(|i| self.fragments[*i as usize].is_some())
            .collect();
        for index in known {
            if let Some(fragment) = &self.fragments[index as usize] {
                xor_into(&mut data, fragment);
            }
            indices.remove(&index);
        }

        match indices.len() {
            0 => {}
            1 => {
                if let Some(&index) = indices.iter().next() {
                    self.add_fragment(index, data);
                }
            }
            _ => {
                let duplicate = self.mixed.iter().any(|part| part.indices == indices);
                if !duplicate && self.mixed.len() < self.frame_count as usize * 2 {
                    self.mixed.push(MixedPart { indices, data });
                }
            }
        }
    }

    fn assemble(&self) -> Vec<u8> {
        let mut message: Vec<u8> = self.fragments.iter().flatten().flatten().copied().collect();
        message.truncate(self.message_len as usize);
        message
    }
}

/// Accumulates frames of one or more messages until one completes.
#[derive(Debug)]
pub struct FountainDecoder {
    slots: Vec<Accumulator>,
    max_pending: usize,
    clock: u64,
}

impl Default for FountainDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl FountainDecoder {
    pub fn new(max_pending: usize) -> Self {
        Self {
            slots: Vec::new(),
            max_pending: max_pending.max(1),
            clock: 0,
        }
    }

    /// Decode one scanned frame and feed it in.
    pub fn receive(&mut self, data: &[u8]) -> Result<ReassemblyState> {
        let frame = Frame::decode(data)?;
        self.receive_frame(&frame)
    }

    pub fn receive_frame(&mut self, frame: &Frame) -> Result<ReassemblyState> {
        self.clock += 1;

        let position = match self.slots.iter().position(|slot| slot.checksum == frame.checksum) {
            Some(position) => {
                if let Err(err) = self.slots[position].check(frame) {
                    warn!(checksum = %hex::encode(frame.checksum.to_be_bytes()), %err, "rejecting frame");
                    return Err(err.into());
                }
                position
            }
            None => self.open_slot(frame),
        };

        let slot = &mut self.slots[position];
        slot.last_touched = self.clock;
        slot.add(frame);

        if !slot.is_complete() {
            return Ok(ReassemblyState::Incomplete);
        }

        let slot = self.slots.swap_remove(position);
        let message = slot.assemble();
        let actual = crc32fast::hash(&message);
        if actual != slot.checksum {
            warn!(
                expected = %hex::encode(slot.checksum.to_be_bytes()),
                actual = %hex::encode(actual.to_be_bytes()),
                "discarding reassembled message"
            );
            return Err(DecodeError::ChecksumMismatch {
                expected: slot.checksum,
                actual,
            }
            .into());
        }

        info!(
            bytes = message.len(),
            frames = slot.frame_count,
            "message reassembled"
        );
        Ok(ReassemblyState::Complete(message))
    }

    fn open_slot(&mut self, frame: &Frame) -> usize {
        if self.slots.len() >= self.max_pending {
            if let Some(oldest) = self
                .slots
                .iter()
                .enumerate()
                .min_by_key(|(_, slot)| slot.last_touched)
                .map(|(i, _)| i)
            {
                let evicted = self.slots.swap_remove(oldest);
                debug!(checksum = %hex::encode(evicted.checksum.to_be_bytes()), "evicting stale message");
            }
        }

        debug!(
            checksum = %hex::encode(frame.checksum.to_be_bytes()),
            frame_count = frame.frame_count,
            message_len = frame.message_len,
            "accumulating new message"
        );
        self.slots.push(Accumulator::new(frame));
        self.slots.len() - 1
    }

    /// Fraction of fragments recovered for the most recently seen message.
    pub fn progress(&self) -> f64 {
        self.slots
            .iter()
            .max_by_key(|slot| slot.last_touched)
            .map(|slot| slot.received as f64 / slot.frame_count as f64)
            .unwrap_or(0.0)
    }

    pub fn pending_messages(&self) -> usize {
        self.slots.len()
    }

    pub fn reset(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn message(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    fn feed(decoder: &mut FountainDecoder, frames: &[Frame]) -> Option<Vec<u8>> {
        for frame in frames {
            if let ReassemblyState::Complete(payload) = decoder.receive(&frame.encode()).unwrap() {
                return Some(payload);
            }
        }
        None
    }

    #[test]
    fn test_fragment_index_wraps() {
        assert_eq!(fragment_index(0, 5), 0);
        assert_eq!(fragment_index(7, 5), 2);
        assert_eq!(fragment_index(1_000_003, 5), 3);
        assert_eq!(fragment_index(9, 1), 0);
    }

    #[test]
    fn test_single_frame_message() {
        let payload = message(40);
        let mut encoder = FountainEncoder::new(&payload, 100).unwrap();
        assert_eq!(encoder.frame_count(), 1);
        assert!(encoder.is_single_frame());

        let frame = encoder.next_frame();
        assert_eq!(frame.fragment, payload);

        let mut decoder = FountainDecoder::default();
        assert_eq!(
            decoder.receive(&frame.encode()).unwrap(),
            ReassemblyState::Complete(payload)
        );
    }

    #[test]
    fn test_empty_message() {
        let mut encoder = FountainEncoder::new(&[], 10).unwrap();
        assert_eq!(encoder.frame_count(), 1);
        let mut decoder = FountainDecoder::default();
        assert_eq!(
            decoder.receive(&encoder.next_frame().encode()).unwrap(),
            ReassemblyState::Complete(Vec::new())
        );
    }

    #[test]
    fn test_frame_count_stays_receivable() {
        let limit = MAX_FRAME_COUNT as usize;
        assert_eq!(
            FountainEncoder::new(&vec![0xa5; limit + 1], 1).unwrap_err(),
            Error::Encode(EncodeError::TooManyFrames {
                frames: limit + 1,
                max: MAX_FRAME_COUNT,
            })
        );

        let encoder = FountainEncoder::new(&vec![0xa5; limit], 1).unwrap();
        assert_eq!(encoder.frame_count(), MAX_FRAME_COUNT);
        let mut decoder = FountainDecoder::default();
        assert_eq!(
            decoder.receive(&encoder.frame_at(3).encode()).unwrap(),
            ReassemblyState::Incomplete
        );
    }

    #[test]
    fn test_frame_layout() {
        let payload = message(10);
        let mut encoder = FountainEncoder::new(&payload, 3).unwrap();
        assert_eq!(encoder.frame_count(), 4);
        assert_eq!(encoder.fragment_len(), 3);

        let frames: Vec<Frame> = (0..9).map(|_| encoder.next_frame()).collect();
        assert_eq!(frames[8].sequence_number, 8);
        assert_eq!(frames[8].fragment, frames[0].fragment);
        // last fragment is padded
        assert_eq!(frames[3].fragment, vec![payload[9], 0, 0]);
        assert!(frames.iter().all(|f| f.message_len == 10 && !f.is_mixed()));
    }

    #[test]
    fn test_reassembly_order_independent_and_duplicate_tolerant() {
        let payload = message(1000);
        let encoder = FountainEncoder::new(&payload, 90).unwrap();
        let count = encoder.frame_count();

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let mut frames: Vec<Frame> = (0..count * 3)
                .map(|_| encoder.frame_at(rng.gen_range(0..count * 4)))
                .collect();
            // guarantee one full pure cycle somewhere in the stream
            frames.extend((0..count).map(|seq| encoder.frame_at(seq)));
            frames.shuffle(&mut rng);

            let mut decoder = FountainDecoder::default();
            assert_eq!(feed(&mut decoder, &frames), Some(payload.clone()));
        }
    }

    #[test]
    fn test_reassembly_with_pure_frames_only() {
        let payload = message(500);
        let encoder = FountainEncoder::new(&payload, 50)
            .unwrap()
            .with_mix_threshold(None);

        let mut frames: Vec<Frame> = (100..100 + encoder.frame_count()).map(|s| encoder.frame_at(s)).collect();
        frames.reverse();
        let mut decoder = FountainDecoder::default();
        assert_eq!(feed(&mut decoder, &frames), Some(payload));
    }

    #[test]
    fn test_mixed_frames_recover_missing_fragment() {
        let payload = message(2000);
        let encoder = FountainEncoder::new(&payload, 100).unwrap();
        let count = encoder.frame_count();
        assert!(count > DEFAULT_MIX_THRESHOLD);

        // second cycle is mixed
        let mixed = encoder.frame_at(count);
        assert!(mixed.is_mixed());
        let indices = mixed_indices(mixed.sequence_number, count, encoder.checksum());
        assert!(indices.len() >= 2);

        // every pure fragment except one the mixed frame covers
        let missing = *indices.iter().next().unwrap();
        let mut frames: Vec<Frame> = (0..count)
            .filter(|seq| *seq != missing)
            .map(|seq| encoder.frame_at(seq))
            .collect();
        frames.push(mixed);

        let mut decoder = FountainDecoder::default();
        assert_eq!(feed(&mut decoder, &frames), Some(payload));
    }

    #[test]
    fn test_mixed_frame_received_before_pure_frames() {
        let payload = message(1500);
        let encoder = FountainEncoder::new(&payload, 100).unwrap();
        let count = encoder.frame_count();
        let mixed = encoder.frame_at(count + 3);
        let indices = mixed_indices(mixed.sequence_number, count, encoder.checksum());
        let missing = *indices.iter().next_back().unwrap();

        let mut frames = vec![mixed];
        frames.extend((0..count).filter(|seq| *seq != missing).map(|seq| encoder.frame_at(seq)));

        let mut decoder = FountainDecoder::default();
        assert_eq!(feed(&mut decoder, &frames), Some(payload));
    }

    #[test]
    fn test_mixed_indices_deterministic() {
        for seq in 20..60 {
            let a = mixed_indices(seq, 20, 0xdead_beef);
            assert_eq!(a, mixed_indices(seq, 20, 0xdead_beef));
            assert!(a.contains(&fragment_index(seq, 20)));
            assert!((2..=3).contains(&a.len()));
            assert!(a.iter().all(|i| *i < 20));
        }
    }

    #[test]
    fn test_incomplete_until_all_fragments() {
        let payload = message(100);
        let encoder = FountainEncoder::new(&payload, 10)
            .unwrap()
            .with_mix_threshold(None);
        let mut decoder = FountainDecoder::default();
        for seq in 0..9 {
            assert_eq!(
                decoder.receive_frame(&encoder.frame_at(seq)).unwrap(),
                ReassemblyState::Incomplete
            );
            // duplicates change nothing
            assert_eq!(
                decoder.receive_frame(&encoder.frame_at(seq)).unwrap(),
                ReassemblyState::Incomplete
            );
        }
        assert!((decoder.progress() - 0.9).abs() < 1e-9);
        assert_eq!(
            decoder.receive_frame(&encoder.frame_at(19)).unwrap(),
            ReassemblyState::Complete(payload)
        );
    }

    #[test]
    fn test_corrupted_fragment_fails_checksum() {
        let payload = message(100);
        let encoder = FountainEncoder::new(&payload, 10).unwrap();
        let mut frames: Vec<Frame> = (0..encoder.frame_count()).map(|s| encoder.frame_at(s)).collect();
        frames[4].fragment[2] ^= 0x01;

        let mut decoder = FountainDecoder::default();
        let mut result = Ok(ReassemblyState::Incomplete);
        for frame in &frames {
            result = decoder.receive_frame(frame);
        }
        assert!(matches!(
            result,
            Err(Error::Decode(DecodeError::ChecksumMismatch { .. }))
        ));
        // the corrupt message is dropped; the next pure cycle completes
        assert_eq!(decoder.pending_messages(), 0);
        let clean: Vec<Frame> = (20..30).map(|s| encoder.frame_at(s)).collect();
        assert_eq!(feed(&mut decoder, &clean), Some(payload));
    }

    #[test]
    fn test_frame_count_conflict_keeps_state() {
        let payload = message(100);
        let encoder = FountainEncoder::new(&payload, 10).unwrap();
        let mut decoder = FountainDecoder::default();
        decoder.receive_frame(&encoder.frame_at(0)).unwrap();

        let mut bogus = encoder.frame_at(1);
        bogus.frame_count = 11;
        assert_eq!(
            decoder.receive_frame(&bogus),
            Err(Error::Reassembly(ReassemblyError::FrameCountConflict {
                expected: 10,
                found: 11
            }))
        );

        let rest: Vec<Frame> = (1..10).map(|s| encoder.frame_at(s)).collect();
        assert_eq!(feed(&mut decoder, &rest), Some(payload));
    }

    #[test]
    fn test_interleaved_messages_do_not_corrupt() {
        let first = message(300);
        let second: Vec<u8> = message(280).into_iter().rev().collect();
        let a = FountainEncoder::new(&first, 30).unwrap();
        let b = FountainEncoder::new(&second, 30).unwrap();

        let mut decoder = FountainDecoder::default();
        for seq in 0..9 {
            assert!(!decoder.receive_frame(&a.frame_at(seq)).unwrap().is_complete());
            assert!(!decoder.receive_frame(&b.frame_at(seq)).unwrap().is_complete());
        }
        assert_eq!(decoder.pending_messages(), 2);
        assert_eq!(
            decoder.receive_frame(&a.frame_at(9)).unwrap(),
            ReassemblyState::Complete(first)
        );
        assert_eq!(
            decoder.receive_frame(&b.frame_at(29)).unwrap(),
            ReassemblyState::Complete(second)
        );
    }

    #[test]
    fn test_bounded_memory_most_recent_wins() {
        let old = FountainEncoder::new(&message(100), 10).unwrap();
        let new_payload = message(120);
        let new = FountainEncoder::new(&new_payload, 10).unwrap();

        let mut decoder = FountainDecoder::new(1);
        decoder.receive_frame(&old.frame_at(0)).unwrap();
        let frames: Vec<Frame> = (0..new.frame_count()).map(|s| new.frame_at(s)).collect();
        assert_eq!(feed(&mut decoder, &frames), Some(new_payload));
        assert_eq!(decoder.pending_messages(), 0);
    }
}

use crate::codec::{read_bytes, read_u32, Value, WireRecord};
use crate::error::DecodeError;
use crate::WireTag;

/// Upper bound on fragments per message accepted from the wire.
pub const MAX_FRAME_COUNT: u32 = 1 << 16;

bitflags::bitflags! {
    /// Frame flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u8 {
        /// Fragment is the XOR of several fragments chosen by `mixed_indices`
        const MIXED = 1 << 0;
    }
}

/// One displayed unit of a multi-frame message (tag 320).
///
/// ```text
/// {1: seq, 2: frame_count, 3: message_len, 4: checksum, 5: fragment, ? 6: flags}
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub sequence_number: u32,
    pub frame_count: u32,
    /// Length of the whole message, before padding
    pub message_len: u32,
    /// CRC32 of the whole message
    pub checksum: u32,
    pub flags: FrameFlags,
    pub fragment: Vec<u8>,
}

impl Frame {
    pub fn is_mixed(&self) -> bool {
        self.flags.contains(FrameFlags::MIXED)
    }
}

impl WireRecord for Frame {
    const TAG: WireTag = WireTag::MultiFrame;

    fn to_untagged(&self) -> Value {
        let mut entries = vec![
            (1, Value::Unsigned(self.sequence_number as u64)),
            (2, Value::Unsigned(self.frame_count as u64)),
            (3, Value::Unsigned(self.message_len as u64)),
            (4, Value::Unsigned(self.checksum as u64)),
            (5, Value::Bytes(self.fragment.clone())),
        ];
        if !self.flags.is_empty() {
            entries.push((6, Value::Unsigned(self.flags.bits() as u64)));
        }
        Value::map(entries)
    }

    fn from_untagged(value: &Value) -> Result<Self, DecodeError> {
        let map = value.expect_map()?;
        let field = move |key: u64, name: &'static str| {
            map.get(key)
                .ok_or_else(|| DecodeError::malformed(format!("frame {} missing", name)))
        };

        let sequence_number = read_u32(field(1, "sequence number")?, "sequence number")?;
        let frame_count = read_u32(field(2, "frame count")?, "frame count")?;
        let message_len = read_u32(field(3, "message length")?, "message length")?;
        let checksum = read_u32(field(4, "checksum")?, "checksum")?;
        let fragment = read_bytes(field(5, "fragment")?, "fragment")?;
        let flags = match map.get(6) {
            Some(v) => v
                .as_unsigned()
                .and_then(|bits| u8::try_from(bits).ok())
                .and_then(FrameFlags::from_bits)
                .ok_or(DecodeError::InvalidField("flags"))?,
            None => FrameFlags::empty(),
        };

        if frame_count == 0 || frame_count > MAX_FRAME_COUNT || frame_count > message_len.max(1) {
            return Err(DecodeError::InvalidField("frame count"));
        }
        if (fragment.len() as u64) * (frame_count as u64) < message_len as u64 {
            return Err(DecodeError::InvalidField("message length"));
        }
        if frame_count == 1 && flags.contains(FrameFlags::MIXED) {
            return Err(DecodeError::InvalidField("flags"));
        }

        Ok(Frame {
            sequence_number,
            frame_count,
            message_len,
            checksum,
            flags,
            fragment,
        })
    }
}

//! Derivation path grammar and its wire form (tag 304).
//!
//! ```text
//! path = #304({
//!     1: [ index-spec, hardened, index-spec, hardened, ... ],
//!   ? 2: source-fingerprint,     ; u32, non-zero
//!   ? 3: depth,                  ; u8
//! })
//! index-spec = uint .le 0x7fffffff / [ low, high ] / [ ]
//! ```

use std::fmt;
use std::str::FromStr;

use crate::codec::{Value, WireRecord};
use crate::error::{DecodeError, PathError};
use crate::WireTag;

/// Largest non-hardened child index.
pub const MAX_INDEX: u32 = 0x7fff_ffff;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildIndex(u32);

impl ChildIndex {
    pub fn new(value: u32) -> Result<Self, PathError> {
        if value > MAX_INDEX {
            return Err(PathError::IndexOutOfRange(value));
        }
        Ok(ChildIndex(value))
    }

    /// For template constants known to be in range.
    pub(crate) const fn from_const(value: u32) -> Self {
        ChildIndex(value & MAX_INDEX)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    fn from_wire(value: &Value) -> Result<Self, DecodeError> {
        value
            .as_unsigned()
            .filter(|n| *n <= MAX_INDEX as u64)
            .map(|n| ChildIndex(n as u32))
            .ok_or(DecodeError::InvalidIndexSpec)
    }
}

impl fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChildIndexSpec {
    Index(ChildIndex),
    /// Inclusive, `low < high`
    Range { low: ChildIndex, high: ChildIndex },
    Wildcard,
}

impl ChildIndexSpec {
    pub fn index(value: u32) -> Result<Self, PathError> {
        Ok(ChildIndexSpec::Index(ChildIndex::new(value)?))
    }

    pub fn range(low: u32, high: u32) -> Result<Self, PathError> {
        let (low, high) = (ChildIndex::new(low)?, ChildIndex::new(high)?);
        if low >= high {
            return Err(PathError::InvalidRange {
                low: low.value(),
                high: high.value(),
            });
        }
        Ok(ChildIndexSpec::Range { low, high })
    }

    fn to_value(self) -> Value {
        match self {
            ChildIndexSpec::Index(index) => Value::Unsigned(index.value() as u64),
            ChildIndexSpec::Range { low, high } => Value::Array(vec![
                Value::Unsigned(low.value() as u64),
                Value::Unsigned(high.value() as u64),
            ]),
            ChildIndexSpec::Wildcard => Value::Array(vec![]),
        }
    }

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Unsigned(_) => Ok(ChildIndexSpec::Index(ChildIndex::from_wire(value)?)),
            Value::Array(items) => match items.as_slice() {
                [] => Ok(ChildIndexSpec::Wildcard),
                [low, high] => {
                    let (low, high) = (ChildIndex::from_wire(low)?, ChildIndex::from_wire(high)?);
                    if low >= high {
                        return Err(DecodeError::InvalidIndexSpec);
                    }
                    Ok(ChildIndexSpec::Range { low, high })
                }
                _ => Err(DecodeError::InvalidIndexSpec),
            },
            _ => Err(DecodeError::InvalidIndexSpec),
        }
    }
}

impl fmt::Display for ChildIndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildIndexSpec::Index(index) => write!(f, "{}", index),
            ChildIndexSpec::Range { low, high } => write!(f, "{}-{}", low, high),
            ChildIndexSpec::Wildcard => write!(f, "*"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DerivationStep {
    spec: ChildIndexSpec,
    is_hardened: bool,
}

impl DerivationStep {
    pub fn new(spec: ChildIndexSpec, is_hardened: bool) -> Self {
        Self { spec, is_hardened }
    }

    pub fn index(value: u32, is_hardened: bool) -> Result<Self, PathError> {
        Ok(Self::new(ChildIndexSpec::index(value)?, is_hardened))
    }

    pub(crate) const fn hardened_const(value: u32) -> Self {
        Self {
            spec: ChildIndexSpec::Index(ChildIndex::from_const(value)),
            is_hardened: true,
        }
    }

    pub fn spec(&self) -> ChildIndexSpec {
        self.spec
    }

    pub fn is_hardened(&self) -> bool {
        self.is_hardened
    }
}

impl fmt::Display for DerivationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spec)?;
        if self.is_hardened {
            write!(f, "'")?;
        }
        Ok(())
    }
}

/// Ordered root-to-leaf steps plus optional origin metadata.
///
/// Equality compares everything; use [`DerivationPath::same_steps`] to match
/// against templates regardless of fingerprint and depth.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DerivationPath {
    steps: Vec<DerivationStep>,
    source_fingerprint: Option<u32>,
    depth: Option<u8>,
}

impl DerivationPath {
    pub fn new(
        steps: Vec<DerivationStep>,
        source_fingerprint: Option<u32>,
        depth: Option<u8>,
    ) -> Result<Self, PathError> {
        if source_fingerprint == Some(0) {
            return Err(PathError::ZeroFingerprint);
        }
        Ok(Self {
            steps,
            source_fingerprint,
            depth,
        })
    }

    /// The empty path.
    pub fn master() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<DerivationStep>) -> Self {
        Self {
            steps,
            source_fingerprint: None,
            depth: None,
        }
    }

    /// Same steps with different origin metadata.
    pub fn with_origin(self, source_fingerprint: Option<u32>, depth: Option<u8>) -> Result<Self, PathError> {
        Self::new(self.steps, source_fingerprint, depth)
    }

    pub fn steps(&self) -> &[DerivationStep] {
        &self.steps
    }

    pub fn source_fingerprint(&self) -> Option<u32> {
        self.source_fingerprint
    }

    pub fn depth(&self) -> Option<u8> {
        self.depth
    }

    pub fn effective_depth(&self) -> u8 {
        self.depth
            .unwrap_or_else(|| u8::try_from(self.steps.len()).unwrap_or(u8::MAX))
    }

    pub fn is_master(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn same_steps(&self, other: &DerivationPath) -> bool {
        self.steps == other.steps
    }
}

impl WireRecord for DerivationPath {
    const TAG: WireTag = WireTag::DerivationPath;

    fn to_untagged(&self) -> Value {
        let components = self
            .steps
            .iter()
            .flat_map(|step| [step.spec.to_value(), Value::Bool(step.is_hardened)])
            .collect();

        let mut entries = vec![(1, Value::Array(components))];
        if let Some(fingerprint) = self.source_fingerprint {
            entries.push((2, Value::Unsigned(fingerprint as u64)));
        }
        if let Some(depth) = self.depth {
            entries.push((3, Value::Unsigned(depth as u64)));
        }
        Value::map(entries)
    }

    fn from_untagged(value: &Value) -> Result<Self, DecodeError> {
        let map = value.expect_map()?;

        let components = map
            .get(1)
            .ok_or_else(|| DecodeError::malformed("path components missing"))?
            .as_array()
            .ok_or_else(|| DecodeError::malformed("path components are not an array"))?;
        if components.len() % 2 != 0 {
            return Err(DecodeError::malformed("odd number of path components"));
        }

        let steps = components
            .chunks_exact(2)
            .map(|pair| {
                let spec = ChildIndexSpec::from_value(&pair[0])?;
                let is_hardened = pair[1]
                    .as_bool()
                    .ok_or_else(|| DecodeError::malformed("hardened flag is not a boolean"))?;
                Ok(DerivationStep::new(spec, is_hardened))
            })
            .collect::<Result<Vec<_>, DecodeError>>()?;

        let source_fingerprint = match map.get(2) {
            Some(item) => Some(
                item.as_unsigned()
                    .filter(|n| *n != 0)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or(DecodeError::InvalidFingerprint)?,
            ),
            None => None,
        };

        let depth = match map.get(3) {
            Some(item) => Some(
                item.as_unsigned()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or(DecodeError::InvalidDepth)?,
            ),
            None => None,
        };

        Ok(Self {
            steps,
            source_fingerprint,
            depth,
        })
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut segments: Vec<String> = Vec::with_capacity(self.steps.len() + 1);
        if let Some(fingerprint) = self.source_fingerprint {
            segments.push(hex::encode(fingerprint.to_be_bytes()));
        }
        segments.extend(self.steps.iter().map(|step| step.to_string()));
        write!(f, "{}", segments.join("/"))
    }
}

fn parse_step(segment: &str) -> Result<DerivationStep, PathError> {
    let parse_err = || PathError::Parse(format!("bad segment {:?}", segment));

    let (body, is_hardened) = match segment.strip_suffix(['\'', 'h', 'H']) {
        Some(body) => (body, true),
        None => (segment, false),
    };

    let spec = if body == "*" {
        ChildIndexSpec::Wildcard
    } else if let Some((low, high)) = body.split_once('-') {
        let low = low.parse::<u32>().map_err(|_| parse_err())?;
        let high = high.parse::<u32>().map_err(|_| parse_err())?;
        ChildIndexSpec::range(low, high)?
    } else {
        ChildIndexSpec::index(body.parse::<u32>().map_err(|_| parse_err())?)?
    };

    Ok(DerivationStep::new(spec, is_hardened))
}

impl FromStr for DerivationPath {
    type Err = PathError;

    /// Parses `48'/0'/0'/2'`, `d34db33f/84h/1h/0h`, or either with a leading `m`.
    /// A leading segment of exactly eight hex digits is a source fingerprint.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::master());
        }

        let mut segments = s.split('/').peekable();
        let mut source_fingerprint = None;

        if let Some(first) = segments.peek() {
            if first.eq_ignore_ascii_case("m") {
                segments.next();
            } else if first.len() == 8 && first.chars().all(|c| c.is_ascii_hexdigit()) {
                let fingerprint = u32::from_str_radix(first, 16)
                    .map_err(|_| PathError::Parse(format!("bad fingerprint {:?}", first)))?;
                source_fingerprint = Some(fingerprint);
                segments.next();
            }
        }

        let steps = segments.map(parse_step).collect::<Result<Vec<_>, _>>()?;
        Self::new(steps, source_fingerprint, None)
    }
}

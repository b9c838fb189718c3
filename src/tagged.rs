use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{Result, VmError};

/// Value tags carried in the NaN-box. `Number` is implicit: any word whose
/// bit pattern is not a NaN is the 32-bit float it spells.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    TryFromPrimitive,
    IntoPrimitive,
)]
#[repr(u8)]
pub enum Tag {
    Number = 0,
    Integer = 1,
    Code = 2,
    Sentinel = 3,
    String = 4,
    List = 5,
    Builtin = 6,
    Ref = 7,
}

/// The full tag space is 7 bits; only the low 3 are assigned today.
pub const TAG_MAX: u8 = 0x7F;

// sentinel payloads
pub const SENTINEL_NIL: u16 = 0;
pub const SENTINEL_OPEN_LIST: u16 = 1;
pub const SENTINEL_MATCH_FRAME: u16 = 2;

const EXPONENT_MASK: u32 = 0x7F80_0000;
const MANTISSA_MASK: u32 = 0x007F_FFFF;
const QUIET_BIT: u32 = 0x0040_0000;
const TAG_LOW_MASK: u32 = 0x3F;
const TAG_LOW_SHIFT: u32 = 16;
const PAYLOAD_MASK: u32 = 0xFFFF;

// canonical quiet NaN, used to normalise NaN arithmetic results so they
// never alias a tagged word
const CANONICAL_NAN: u32 = 0x7FC0_0000;

/// A 32-bit VM word: either a finite IEEE-754 float (NUMBER) or a NaN-boxed
/// `{tag, payload}` pair. Stored and compared as raw bits.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Word(u32);

/// Decoded view of a word: the tag plus the sign-extended payload.
/// For `Tag::Number` the payload is meaningless; use [`Word::to_f32`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaggedInfo {
    pub tag: Tag,
    pub value: i32,
}

impl Word {
    pub const NIL: Word = Word(
        EXPONENT_MASK
            | QUIET_BIT
            | ((Tag::Sentinel as u32) << TAG_LOW_SHIFT)
            | SENTINEL_NIL as u32,
    );

    pub fn from_bits(bits: u32) -> Self {
        Word(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_f32(value: f32) -> Self {
        Word::number(value)
    }

    pub fn to_f32(self) -> f32 {
        f32::from_bits(self.0)
    }

    /// Box a float. NaN results of user arithmetic are canonicalised so the
    /// tagged space stays closed.
    pub fn number(value: f32) -> Self {
        if value.is_nan() {
            Word(CANONICAL_NAN)
        } else {
            Word(value.to_bits())
        }
    }

    /// Encode a `{tag, value}` pair. Fails with a range error when the
    /// payload does not fit 16 bits (signed 16 for INTEGER).
    pub fn tagged(tag: Tag, value: i32) -> Result<Self> {
        if tag == Tag::Number {
            return Err(VmError::range(
                "NUMBER is implicit and cannot be boxed explicitly",
            ));
        }
        let payload = match tag {
            Tag::Integer => {
                if !(i16::MIN as i32..=i16::MAX as i32).contains(&value) {
                    return Err(VmError::range(format!(
                        "INTEGER payload {value} outside signed 16-bit range"
                    )));
                }
                (value as i16) as u16
            }
            _ => {
                if !(0..=u16::MAX as i32).contains(&value) {
                    return Err(VmError::range(format!(
                        "{tag:?} payload {value} outside 16-bit range"
                    )));
                }
                value as u16
            }
        };
        Ok(Word::tagged_raw(tag, payload))
    }

    pub(crate) fn tagged_raw(tag: Tag, payload: u16) -> Self {
        let tag7 = tag as u32;
        let sign = (tag7 >> 6) & 1;
        Word(
            (sign << 31)
                | EXPONENT_MASK
                | QUIET_BIT
                | ((tag7 & TAG_LOW_MASK) << TAG_LOW_SHIFT)
                | payload as u32,
        )
    }

    // convenience constructors for the closed tag set
    pub fn int(value: i16) -> Self {
        Word::tagged_raw(Tag::Integer, value as u16)
    }

    pub fn code(addr: u16) -> Self {
        Word::tagged_raw(Tag::Code, addr)
    }

    pub fn sentinel(payload: u16) -> Self {
        Word::tagged_raw(Tag::Sentinel, payload)
    }

    pub fn string(id: u16) -> Self {
        Word::tagged_raw(Tag::String, id)
    }

    pub fn list(slots: u16) -> Self {
        Word::tagged_raw(Tag::List, slots)
    }

    pub fn builtin(op: u16) -> Self {
        Word::tagged_raw(Tag::Builtin, op)
    }

    pub fn reference(cell: u16) -> Self {
        Word::tagged_raw(Tag::Ref, cell)
    }

    fn is_nan_boxed(self) -> bool {
        (self.0 & EXPONENT_MASK) == EXPONENT_MASK
            && (self.0 & MANTISSA_MASK) != 0
    }

    pub fn tag(self) -> Tag {
        if !self.is_nan_boxed() {
            return Tag::Number;
        }
        let tag7 =
            (((self.0 >> 31) & 1) << 6) | ((self.0 >> TAG_LOW_SHIFT) & TAG_LOW_MASK);
        // words only enter the image through the encoder, so unknown tags
        // cannot appear outside a corrupted image; fold them into NUMBER
        // (which renders as NaN) rather than panicking mid-dispatch
        Tag::try_from(tag7 as u8).unwrap_or(Tag::Number)
    }

    pub fn payload(self) -> u16 {
        (self.0 & PAYLOAD_MASK) as u16
    }

    /// Decode to `{tag, value}`, sign-extending INTEGER payloads.
    pub fn info(self) -> TaggedInfo {
        let tag = self.tag();
        let value = match tag {
            Tag::Number => 0,
            Tag::Integer => (self.payload() as i16) as i32,
            _ => self.payload() as i32,
        };
        TaggedInfo { tag, value }
    }

    pub fn is_nil(self) -> bool {
        self == Word::NIL
    }

    pub fn is_number(self) -> bool {
        self.tag() == Tag::Number
    }

    pub fn is_list(self) -> bool {
        self.tag() == Tag::List
    }

    pub fn is_ref(self) -> bool {
        self.tag() == Tag::Ref
    }

    pub fn is_code(self) -> bool {
        self.tag() == Tag::Code
    }

    /// Numeric view for arithmetic: NUMBER words are themselves, INTEGER
    /// payloads widen to float. Anything else is a tag mismatch.
    pub fn try_number(self) -> Result<f32> {
        match self.tag() {
            Tag::Number => Ok(self.to_f32()),
            Tag::Integer => Ok((self.payload() as i16) as f32),
            actual => Err(VmError::TagMismatch {
                expected: Tag::Number,
                actual,
            }),
        }
    }

    /// Truth view for conditionals: zero and NIL are false.
    pub fn is_truthy(self) -> bool {
        match self.tag() {
            Tag::Number => self.to_f32() != 0.0,
            Tag::Sentinel => !self.is_nil(),
            Tag::Integer => self.payload() != 0,
            _ => true,
        }
    }
}

impl std::fmt::Debug for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.tag() {
            Tag::Number => write!(f, "{}", self.to_f32()),
            Tag::Integer => write!(f, "INTEGER:{}", self.payload() as i16),
            tag => write!(f, "{}:{}", format!("{tag:?}").to_uppercase(), self.payload()),
        }
    }
}

/// Code-address operand codec ("X1516").
///
/// A byte offset into CODE is split into a 15-bit high half and a 16-bit
/// low half so each half stays exactly representable inside a 32-bit float
/// payload. Round-trippable over the whole addressable range.
pub mod x1516 {
    use crate::error::{Result, VmError};

    pub const MAX_ADDR: u32 = 0x7FFF_FFFF;

    pub fn encode(addr: u32) -> Result<u32> {
        if addr > MAX_ADDR {
            return Err(VmError::range(format!(
                "code address {addr:#x} outside X1516 range"
            )));
        }
        Ok((((addr >> 16) & 0x7FFF) << 16) | (addr & 0xFFFF))
    }

    pub fn decode(word: u32) -> u32 {
        (((word >> 16) & 0x7FFF) << 16) | (word & 0xFFFF)
    }
}

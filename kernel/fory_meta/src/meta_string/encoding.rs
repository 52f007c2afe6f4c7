//! Compact character encodings for meta strings.
//!
//! Names made of lower-case letters and a few separators pack into five bits
//! per character, names that also use upper-case letters or digits into six.
//! The first bit of a packed string is set when its final character slot is
//! padding.

use getset::{CopyGetters, Getters};

use crate::Error;


/// Flag bit of the first packed byte: the last character slot is padding.
const STRIP_LAST_CHAR: u8 = 0x80;

/// Strings at least this long are always written as UTF-8.
pub const MAX_PACKED_LEN: usize = 32_767;

/// How the bytes of a [`MetaString`] represent its characters.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::FromRepr,
    strum_macros::Display,
    strum_macros::EnumIter,
)]
#[repr(u8)]
pub enum Encoding {
    /// Raw UTF-8.
    Utf8 = 0,

    /// Five bits per character over `a-z . _ $ |`.
    LowerSpecial = 1,

    /// Six bits per character over `a-z A-Z 0-9 . _`.
    LowerUpperDigitSpecial = 2,

    /// [`Self::LowerSpecial`] after lowering an upper-case first character.
    FirstToLowerSpecial = 3,

    /// [`Self::LowerSpecial`] with every upper-case character written as `|`
    /// followed by its lower-case form.
    AllToLowerSpecial = 4,
}

impl Encoding {
    /// The tag byte identifying this encoding on the wire.
    #[must_use]
    pub const fn tag(self) -> u8 { self as u8 }

    /// Picks the most compact encoding able to represent `value`.
    #[must_use]
    pub fn choose(value: &str) -> Self {
        if value.is_empty() || value.len() >= MAX_PACKED_LEN {
            return Self::Utf8;
        }

        let mut lower_special = true;
        let mut lower_upper_digit_special = true;
        let mut digits = 0;
        let mut uppers = 0;

        for byte in value.bytes() {
            lower_special &= lower_special_value(byte).is_some();
            lower_upper_digit_special &=
                lower_upper_digit_special_value(byte).is_some();
            digits += usize::from(byte.is_ascii_digit());
            uppers += usize::from(byte.is_ascii_uppercase());
        }

        if lower_special {
            return Self::LowerSpecial;
        }

        if !lower_upper_digit_special {
            return Self::Utf8;
        }

        if digits != 0 {
            return Self::LowerUpperDigitSpecial;
        }

        let first_is_upper =
            value.bytes().next().is_some_and(|byte| byte.is_ascii_uppercase());

        if uppers == 1 && first_is_upper {
            return Self::FirstToLowerSpecial;
        }

        if (value.len() + uppers) * 5 < value.len() * 6 {
            Self::AllToLowerSpecial
        } else {
            Self::LowerUpperDigitSpecial
        }
    }

    /// Packs `value` with this encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnencodableMetaString`] if `value` holds a character
    /// this encoding cannot represent.
    pub fn encode(self, value: &str) -> Result<Vec<u8>, Error> {
        let unencodable = || Error::UnencodableMetaString {
            value: value.to_owned(),
            encoding: self,
        };

        if value.is_empty() {
            return Ok(Vec::new());
        }

        let packed = match self {
            Self::Utf8 => return Ok(value.as_bytes().to_vec()),

            Self::LowerSpecial => pack(value.bytes(), 5),

            Self::LowerUpperDigitSpecial => pack(value.bytes(), 6),

            Self::FirstToLowerSpecial => {
                let mut bytes = value.bytes();
                let first = bytes.next().map(|b| b.to_ascii_lowercase());
                pack(first.into_iter().chain(bytes), 5)
            }

            Self::AllToLowerSpecial => {
                if value.contains('|') {
                    return Err(unencodable());
                }

                pack(
                    value.bytes().flat_map(|byte| {
                        if byte.is_ascii_uppercase() {
                            [Some(b'|'), Some(byte.to_ascii_lowercase())]
                        } else {
                            [Some(byte), None]
                        }
                    })
                    .flatten(),
                    5,
                )
            }
        };

        packed.ok_or_else(unencodable)
    }

    /// Unpacks bytes produced by [`Self::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMetaString`] if the bytes are not valid for
    /// this encoding.
    pub fn decode(self, bytes: &[u8]) -> Result<String, Error> {
        let invalid = || Error::InvalidMetaString { encoding: self };

        if bytes.is_empty() {
            return Ok(String::new());
        }

        match self {
            Self::Utf8 => {
                String::from_utf8(bytes.to_vec()).map_err(|_| invalid())
            }

            Self::LowerSpecial => unpack(bytes, 5).ok_or_else(invalid),

            Self::LowerUpperDigitSpecial => unpack(bytes, 6).ok_or_else(invalid),

            Self::FirstToLowerSpecial => {
                let mut value = unpack(bytes, 5).ok_or_else(invalid)?;
                if let Some(first) = value.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }

                Ok(value)
            }

            Self::AllToLowerSpecial => {
                let lowered = unpack(bytes, 5).ok_or_else(invalid)?;
                let mut value = String::with_capacity(lowered.len());
                let mut chars = lowered.chars();

                while let Some(char) = chars.next() {
                    if char == '|' {
                        let upper = chars.next().ok_or_else(invalid)?;
                        value.push(upper.to_ascii_uppercase());
                    } else {
                        value.push(char);
                    }
                }

                Ok(value)
            }
        }
    }
}

/// A string together with its packed form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Getters, CopyGetters)]
pub struct MetaString {
    /// The encoding [`Encoding::choose`] picked.
    #[get_copy = "pub"]
    encoding: Encoding,

    /// The packed bytes.
    #[get = "pub"]
    bytes: Vec<u8>,
}

impl MetaString {
    /// Packs `value` with the most compact encoding that represents it.
    #[must_use]
    pub fn encode(value: &str) -> Self {
        let encoding = Encoding::choose(value);

        encoding.encode(value).map_or_else(
            |_| Self { encoding: Encoding::Utf8, bytes: value.as_bytes().to_vec() },
            |bytes| Self { encoding, bytes },
        )
    }

    /// Unpacks the string.
    ///
    /// # Errors
    ///
    /// See [`Encoding::decode`].
    pub fn decode(&self) -> Result<String, Error> {
        self.encoding.decode(&self.bytes)
    }
}

fn lower_special_value(byte: u8) -> Option<u8> {
    match byte {
        b'a'..=b'z' => Some(byte - b'a'),
        b'.' => Some(26),
        b'_' => Some(27),
        b'$' => Some(28),
        b'|' => Some(29),
        _ => None,
    }
}

fn lower_special_char(value: u8) -> Option<char> {
    match value {
        0..=25 => Some(char::from(b'a' + value)),
        26 => Some('.'),
        27 => Some('_'),
        28 => Some('$'),
        29 => Some('|'),
        _ => None,
    }
}

fn lower_upper_digit_special_value(byte: u8) -> Option<u8> {
    match byte {
        b'a'..=b'z' => Some(byte - b'a'),
        b'A'..=b'Z' => Some(byte - b'A' + 26),
        b'0'..=b'9' => Some(byte - b'0' + 52),
        b'.' => Some(62),
        b'_' => Some(63),
        _ => None,
    }
}

fn lower_upper_digit_special_char(value: u8) -> Option<char> {
    match value {
        0..=25 => Some(char::from(b'a' + value)),
        26..=51 => Some(char::from(b'A' + value - 26)),
        52..=61 => Some(char::from(b'0' + value - 52)),
        62 => Some('.'),
        63 => Some('_'),
        _ => None,
    }
}

/// Packs `chars` at `bits` per character after the leading flag bit.
fn pack(chars: impl Iterator<Item = u8>, bits: usize) -> Option<Vec<u8>> {
    let values = chars
        .map(|byte| {
            if bits == 5 {
                lower_special_value(byte)
            } else {
                lower_upper_digit_special_value(byte)
            }
        })
        .collect::<Option<Vec<_>>>()?;

    let total_bits = values.len() * bits + 1;
    let mut bytes = vec![0u8; total_bits.div_ceil(8)];
    let mut position = 1;

    for value in values {
        for shift in (0..bits).rev() {
            if (value >> shift) & 1 == 1 {
                bytes[position / 8] |= 0x80 >> (position % 8);
            }
            position += 1;
        }
    }

    if bytes.len() * 8 >= total_bits + bits {
        bytes[0] |= STRIP_LAST_CHAR;
    }

    Some(bytes)
}

/// Reverses [`pack`]. `bytes` must not be empty.
fn unpack(bytes: &[u8], bits: usize) -> Option<String> {
    let strip_last = bytes.first()? & STRIP_LAST_CHAR != 0;
    let mut slots = (bytes.len() * 8 - 1) / bits;
    if strip_last {
        slots = slots.checked_sub(1)?;
    }

    (0..slots)
        .map(|slot| {
            let start = 1 + slot * bits;
            let value = (start..start + bits).fold(0u8, |value, position| {
                (value << 1) | ((bytes[position / 8] >> (7 - position % 8)) & 1)
            });

            if bits == 5 {
                lower_special_char(value)
            } else {
                lower_upper_digit_special_char(value)
            }
        })
        .collect()
}

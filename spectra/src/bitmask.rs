//! Symbolic bit-flag registry.
//!
//! A [`BitMask`] maps named reasons to bit positions in declaration order.
//! Mask images store the bitwise OR of the reasons that apply to each pixel,
//! so "why was this pixel rejected" is answered by decoding its value.

use std::fmt;
use std::mem::size_of;

use num_traits::{PrimInt, Unsigned};
use thiserror::Error;

use common::{BitBuffer2, Buffer2};

/// Largest number of flags any registry may hold.
const MAX_FLAGS: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Bit mask holds {count} flags but at most {MAX_FLAGS} are supported")]
    TooManyFlags { count: usize },

    #[error("Flag '{0}' is registered more than once")]
    DuplicateFlag(String),

    #[error("Flag '{0}' is not registered in this bit mask")]
    UnknownFlag(String),

    #[error("Flag '{name}' uses bit {bit} which does not fit a {word_bits}-bit mask word")]
    WordTooNarrow {
        name: String,
        bit: u32,
        word_bits: u32,
    },

    #[error("{count} flags do not fit any signed integer width")]
    NoSignedWidth { count: usize },
}

/// Unsigned integer types usable as mask storage.
pub trait MaskWord: PrimInt + Unsigned + Send + Sync + fmt::Debug {}

impl<T: PrimInt + Unsigned + Send + Sync + fmt::Debug> MaskWord for T {}

#[inline]
fn word_bits<T: MaskWord>() -> u32 {
    (size_of::<T>() * 8) as u32
}

/// Integer width suggested by [`BitMask::minimum_dtype`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum IntegerWidth {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
}

impl IntegerWidth {
    pub fn bits(self) -> u32 {
        match self {
            Self::U8 | Self::I8 => 8,
            Self::U16 | Self::I16 => 16,
            Self::U32 | Self::I32 => 32,
            Self::U64 | Self::I64 => 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Flag {
    name: String,
    description: String,
}

/// Ordered registry of named bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitMask {
    flags: Vec<Flag>,
}

impl BitMask {
    /// Register `(name, description)` pairs; bit `i` belongs to the i-th pair.
    pub fn new<I, N, D>(flags: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: Into<String>,
    {
        let flags: Vec<Flag> = flags
            .into_iter()
            .map(|(name, description)| Flag {
                name: name.into(),
                description: description.into(),
            })
            .collect();

        if flags.len() > MAX_FLAGS {
            return Err(Error::TooManyFlags { count: flags.len() });
        }
        for (i, flag) in flags.iter().enumerate() {
            if flags[..i].iter().any(|f| f.name == flag.name) {
                return Err(Error::DuplicateFlag(flag.name.clone()));
            }
        }

        Ok(Self { flags })
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Registered names in bit order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(|f| f.name.as_str())
    }

    /// Bit index of `name`.
    pub fn bit(&self, name: &str) -> Result<u32, Error> {
        self.flags
            .iter()
            .position(|f| f.name == name)
            .map(|i| i as u32)
            .ok_or_else(|| Error::UnknownFlag(name.to_string()))
    }

    pub fn describe(&self, name: &str) -> Result<&str, Error> {
        let bit = self.bit(name)?;
        Ok(&self.flags[bit as usize].description)
    }

    /// Single-bit value of `name` in the storage word `T`.
    pub fn value_of<T: MaskWord>(&self, name: &str) -> Result<T, Error> {
        let bit = self.bit(name)?;
        if bit >= word_bits::<T>() {
            return Err(Error::WordTooNarrow {
                name: name.to_string(),
                bit,
                word_bits: word_bits::<T>(),
            });
        }
        Ok(T::one() << bit as usize)
    }

    /// Combined value of several names.
    pub fn value_of_all<T: MaskWord>(&self, names: &[&str]) -> Result<T, Error> {
        names
            .iter()
            .try_fold(T::zero(), |acc, name| Ok(acc | self.value_of::<T>(name)?))
    }

    /// Return `value` with the bit for `name` set.
    pub fn turn_on<T: MaskWord>(&self, value: T, name: &str) -> Result<T, Error> {
        Ok(value | self.value_of::<T>(name)?)
    }

    /// Return `value` with the bit for `name` cleared.
    pub fn turn_off<T: MaskWord>(&self, value: T, name: &str) -> Result<T, Error> {
        Ok(value & !self.value_of::<T>(name)?)
    }

    /// Set the bit for `name` on every pixel selected by `selection`.
    pub fn turn_on_where<T: MaskWord>(
        &self,
        mask: &mut Buffer2<T>,
        selection: &BitBuffer2,
        name: &str,
    ) -> Result<(), Error> {
        let bit = self.value_of::<T>(name)?;
        assert!(mask.same_shape_as_bits(selection), "selection shape mismatch");
        for idx in selection.iter_ones() {
            mask[idx] = mask[idx] | bit;
        }
        Ok(())
    }

    /// True wherever any of `names` is set; an empty list means any registered bit.
    pub fn flagged<T: MaskWord>(
        &self,
        mask: &Buffer2<T>,
        names: &[&str],
    ) -> Result<BitBuffer2, Error> {
        let bits = if names.is_empty() {
            let all: Vec<&str> = self
                .names()
                .filter(|n| self.bit(n).is_ok_and(|b| b < word_bits::<T>()))
                .collect();
            self.value_of_all::<T>(&all)?
        } else {
            self.value_of_all::<T>(names)?
        };
        Ok(BitBuffer2::from_fn(mask.width(), mask.height(), |i| {
            mask[i] & bits != T::zero()
        }))
    }

    /// Names of all set bits in `value`, in bit order.
    pub fn flagged_bits<T: MaskWord>(&self, value: T) -> Vec<&str> {
        self.flags
            .iter()
            .enumerate()
            .take(word_bits::<T>() as usize)
            .filter(|(bit, _)| value & (T::one() << *bit) != T::zero())
            .map(|(_, f)| f.name.as_str())
            .collect()
    }

    /// Smallest integer width able to hold every registered bit.
    pub fn minimum_dtype(&self, unsigned: bool) -> Result<IntegerWidth, Error> {
        let needed = self.flags.len() as u32;
        let candidates: [IntegerWidth; 4] = if unsigned {
            [
                IntegerWidth::U8,
                IntegerWidth::U16,
                IntegerWidth::U32,
                IntegerWidth::U64,
            ]
        } else {
            [
                IntegerWidth::I8,
                IntegerWidth::I16,
                IntegerWidth::I32,
                IntegerWidth::I64,
            ]
        };
        candidates
            .into_iter()
            .find(|w| {
                let usable = if unsigned { w.bits() } else { w.bits() - 1 };
                needed <= usable
            })
            .ok_or(Error::NoSignedWidth {
                count: self.flags.len(),
            })
    }
}

impl fmt::Display for BitMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (bit, flag) in self.flags.iter().enumerate() {
            writeln!(f, "{bit:>2} {:<12} {}", flag.name, flag.description)?;
        }
        Ok(())
    }
}

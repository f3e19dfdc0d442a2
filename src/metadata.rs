//! Data descriptions
//!
//! Element type and count for buffers handed to sinks. The engine only uses
//! these to size pool allocations.

use serde::{Deserialize, Serialize};

/// Element type of a data buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Packed bits, 64 per word
    Bit,
    U32,
    F32,
    F64,
}

impl DataType {
    /// Bytes needed to hold `count` elements
    pub fn num_bytes(self, count: usize) -> usize {
        match self {
            DataType::Bit => Bit::num_words(count) * std::mem::size_of::<u64>(),
            DataType::U32 | DataType::F32 => count * 4,
            DataType::F64 => count * 8,
        }
    }
}

/// Bit vector word math
pub struct Bit;

impl Bit {
    pub const BITS_PER_WORD: usize = u64::BITS as usize;

    /// Number of words holding `bits` bits
    pub fn num_words(bits: usize) -> usize {
        bits.div_ceil(Self::BITS_PER_WORD)
    }

    /// Word index and mask for bit `i`
    pub fn locate(i: usize) -> (usize, u64) {
        (i / Self::BITS_PER_WORD, 1u64 << (i % Self::BITS_PER_WORD))
    }
}

/// Shape of the data a sink collects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDescription {
    pub data_type: DataType,
    /// Elements carrying real values
    pub real_elements: usize,
    /// Alignment padding appended after the real elements
    #[serde(default)]
    pub padding_elements: usize,
}

impl DataDescription {
    pub fn new(data_type: DataType, real_elements: usize) -> Self {
        Self {
            data_type,
            real_elements,
            padding_elements: 0,
        }
    }

    pub fn with_padding(mut self, padding_elements: usize) -> Self {
        self.padding_elements = padding_elements;
        self
    }

    pub fn total_elements(&self) -> usize {
        self.real_elements + self.padding_elements
    }

    /// Bytes needed for one buffer of this shape
    pub fn byte_size(&self) -> usize {
        self.data_type.num_bytes(self.total_elements())
    }
}

//! Buffer payloads
//!
//! The engine treats payloads as opaque; it only asks for their byte size
//! when a pool is allocated.

use crate::metadata::{Bit, DataDescription, DataType};

/// Data carried by a pooled buffer
pub trait Payload: Send + Sync + 'static {
    /// Bytes of data this payload holds
    fn byte_size(&self) -> usize;
}

impl Payload for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

/// A boolean gating buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signal {
    pub status: bool,
}

impl Signal {
    pub fn new(status: bool) -> Self {
        Self { status }
    }
}

impl Payload for Signal {
    fn byte_size(&self) -> usize {
        std::mem::size_of::<bool>()
    }
}

/// Packed bit vector covering the global element range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeVector {
    bits: usize,
    words: Vec<u64>,
}

impl ExchangeVector {
    pub fn new(bits: usize) -> Self {
        Self {
            bits,
            words: vec![0; Bit::num_words(bits)],
        }
    }

    pub fn len(&self) -> usize {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Set bit `i`; returns `false` and leaves the vector untouched when
    /// `i` is past the end
    pub fn set(&mut self, i: usize) -> bool {
        if i >= self.bits {
            return false;
        }
        let (word, mask) = Bit::locate(i);
        self.words[word] |= mask;
        true
    }

    pub fn get(&self, i: usize) -> bool {
        let (word, mask) = Bit::locate(i);
        self.words.get(word).is_some_and(|w| w & mask != 0)
    }
}

impl Payload for ExchangeVector {
    fn byte_size(&self) -> usize {
        DataType::Bit.num_bytes(self.bits)
    }
}

/// Fire bits derived from an exchange vector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FireVector {
    words: Vec<u64>,
    /// Step the bits were derived at
    pub step: u64,
}

impl FireVector {
    pub fn new(bits: usize) -> Self {
        Self {
            words: vec![0; Bit::num_words(bits)],
            step: 0,
        }
    }

    /// Copy fire bits from `source`, truncating or zero-filling to fit
    pub fn set_fire_bits(&mut self, source: &[u64]) {
        let n = self.words.len().min(source.len());
        self.words[..n].copy_from_slice(&source[..n]);
        self.words[n..].fill(0);
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

impl Payload for FireVector {
    fn byte_size(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }
}

/// Data collected by a sink, shaped by a data description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkBuffer {
    description: DataDescription,
    data: Vec<u8>,
    /// Step the data was collected at
    pub step: u64,
}

impl SinkBuffer {
    pub fn new(description: DataDescription) -> Self {
        Self {
            data: vec![0; description.byte_size()],
            description,
            step: 0,
        }
    }

    pub fn description(&self) -> &DataDescription {
        &self.description
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy `words` in little-endian order, truncating or zero-filling
    pub fn write_words(&mut self, words: &[u64]) {
        let mut chunks = self.data.chunks_mut(std::mem::size_of::<u64>());
        for (word, chunk) in words.iter().zip(chunks.by_ref()) {
            let len = chunk.len();
            chunk.copy_from_slice(&word.to_le_bytes()[..len]);
        }
        for chunk in chunks {
            chunk.fill(0);
        }
    }

    pub fn count_ones(&self) -> u32 {
        self.data.iter().map(|b| b.count_ones()).sum()
    }
}

impl Payload for SinkBuffer {
    fn byte_size(&self) -> usize {
        self.data.len()
    }
}

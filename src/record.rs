/// Normalized quote record
///
/// One BBO update, laid out to fill exactly one cache line so a consumer can
/// make a trading decision from a single line fetch. Records live inside the
/// RecordPool and are overwritten in place; there is no destructor logic.

use std::borrow::Cow;
use std::mem;

pub const CACHE_LINE_SIZE: usize = 64;
pub const SYMBOL_LEN: usize = 8;

/// Bit flags for `QuoteRecord::flags`
pub mod flags {
    /// Packet carried the four extended timing markers
    pub const EXTENDED_TIMING: u8 = 0x01;
    /// Produced by warm-up, never published
    pub const SYNTHETIC: u8 = 0x02;
    /// Data may be outdated
    pub const STALE: u8 = 0x04;
}

/// Fixed 64-byte BBO record
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuoteRecord {
    pub symbol: [u8; SYMBOL_LEN], // space-padded ticker
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_shares: u32,
    pub ask_shares: u32,
    pub spread: f64,
    pub timestamp_ns: u64, // receive instant, cycle-counter derived
    pub sequence: u32,
    pub valid: u8,
    pub flags: u8,
    pub _padding: [u8; 10],
}

const _: () = {
    assert!(mem::size_of::<QuoteRecord>() == CACHE_LINE_SIZE);
    assert!(mem::align_of::<QuoteRecord>() == CACHE_LINE_SIZE);
};

impl QuoteRecord {
    /// Zero-fill the whole record, padding included
    #[inline]
    pub fn clear(&mut self) {
        *self = QuoteRecord::default();
    }

    /// Copy up to 8 bytes of `sym` into the symbol field, space-padding the rest
    pub fn set_symbol(&mut self, sym: &[u8]) {
        let copy_len = sym.len().min(SYMBOL_LEN);
        self.symbol[..copy_len].copy_from_slice(&sym[..copy_len]);
        self.symbol[copy_len..].fill(b' ');
    }

    /// Symbol bytes with trailing spaces and NULs stripped
    pub fn symbol_bytes(&self) -> &[u8] {
        let mut len = SYMBOL_LEN;
        while len > 0 && (self.symbol[len - 1] == b' ' || self.symbol[len - 1] == 0) {
            len -= 1;
        }
        &self.symbol[..len]
    }

    /// Trimmed symbol as text
    pub fn symbol(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.symbol_bytes())
    }

    pub fn is_valid(&self) -> bool {
        self.valid != 0
    }

    pub fn has_extended_timing(&self) -> bool {
        self.flags & flags::EXTENDED_TIMING != 0
    }

    pub fn is_synthetic(&self) -> bool {
        self.flags & flags::SYNTHETIC != 0
    }

    pub fn is_stale(&self) -> bool {
        self.flags & flags::STALE != 0
    }

    /// Mark the record as possibly outdated
    pub fn mark_stale(&mut self) {
        self.flags |= flags::STALE;
    }
}

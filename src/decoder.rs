/// Zero-allocation BBO decoder
///
/// Converts a raw UDP payload into a QuoteRecord living in the RecordPool.
/// Nothing is allocated and nothing panics: a payload that cannot be decoded
/// simply produces no record, and the caller counts it.

use crate::pool::RecordPool;
use crate::protocol::*;
use crate::record::{flags, QuoteRecord};
use thiserror::Error;

/// Why a payload fails the pre-filter
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("non-printable symbol byte {byte:#04x} at offset {offset}")]
    NonPrintableSymbol { offset: usize, byte: u8 },
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Stateless decoder
pub struct WireDecoder;

impl WireDecoder {
    /// Decode `payload` into the next pool slot.
    ///
    /// Returns None for payloads shorter than MIN_PAYLOAD_SIZE, without
    /// touching the pool. Otherwise consumes exactly one slot.
    #[inline(always)]
    pub fn decode<'p>(
        payload: &[u8],
        pool: &'p mut RecordPool,
        receive_time_ns: u64,
        sequence: u32,
    ) -> Option<&'p mut QuoteRecord> {
        let fields = FieldReader::new(payload)?;

        let bid_raw = fields.bid_raw();
        let bid_shares = fields.bid_shares();
        let ask_raw = fields.ask_raw();
        let ask_shares = fields.ask_shares();
        let spread_raw = fields.spread_raw();

        let record = pool.acquire();
        *record = QuoteRecord {
            symbol: fields.symbol(),
            bid_price: price_from_raw(bid_raw),
            ask_price: price_from_raw(ask_raw),
            bid_shares,
            ask_shares,
            spread: price_from_raw(spread_raw),
            timestamp_ns: receive_time_ns,
            sequence,
            valid: 1,
            flags: if fields.has_timing() { flags::EXTENDED_TIMING } else { 0 },
            _padding: [0; 10],
        };

        Some(record)
    }

    /// Read the timing markers from the payload tail. Off the hot path.
    #[cold]
    #[inline(never)]
    pub fn extract_timing(payload: &[u8]) -> Option<ExtendedTiming> {
        let [t1, t2, t3, t4] = FieldReader::new(payload)?.timing_markers()?;
        Some(ExtendedTiming::from_markers(t1, t2, t3, t4))
    }

    /// Cheap pre-filter: length and printable-ASCII symbol
    #[inline(always)]
    pub fn is_valid(payload: &[u8]) -> bool {
        Self::validate(payload).is_ok()
    }

    /// Same checks as `is_valid`, reporting the first failure
    pub fn validate(payload: &[u8]) -> DecodeResult<()> {
        if payload.len() < MIN_PAYLOAD_SIZE {
            return Err(DecodeError::BufferTooSmall {
                need: MIN_PAYLOAD_SIZE,
                have: payload.len(),
            });
        }

        for (offset, &byte) in payload[SYMBOL_OFFSET..SYMBOL_OFFSET + 8].iter().enumerate() {
            if !(0x20..=0x7E).contains(&byte) {
                return Err(DecodeError::NonPrintableSymbol { offset, byte });
            }
        }

        Ok(())
    }

    /// Compare the leading symbol bytes against `target` (at most 8) without decoding
    #[inline(always)]
    pub fn symbol_matches(payload: &[u8], target: &[u8]) -> bool {
        let n = target.len().min(8);
        payload.len() >= n && payload[..n] == target[..n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> RecordPool {
        RecordPool::new(64).unwrap()
    }

    #[test]
    fn test_decode_basic() {
        let mut pool = pool();
        let bytes = QuotePacket::new("IBM", 1_500_000, 100, 1_501_000, 200).to_bytes();

        let rec = WireDecoder::decode(&bytes, &mut pool, 1000, 7).unwrap();
        assert_eq!(rec.symbol(), "IBM");
        assert!((rec.bid_price - 150.0).abs() < 1e-9);
        assert!((rec.ask_price - 150.1).abs() < 1e-9);
        assert!((rec.spread - 0.1).abs() < 1e-9);
        assert_eq!(rec.bid_shares, 100);
        assert_eq!(rec.ask_shares, 200);
        assert_eq!(rec.timestamp_ns, 1000);
        assert_eq!(rec.sequence, 7);
        assert!(rec.is_valid());
        assert!(!rec.has_extended_timing());
    }

    #[test]
    fn test_short_payload_leaves_pool_untouched() {
        let mut pool = pool();
        assert!(WireDecoder::decode(&[0u8; 27], &mut pool, 0, 0).is_none());
        assert_eq!(pool.cursor(), 0);
    }

    #[test]
    fn test_reused_slot_fully_overwritten() {
        let mut pool = pool();
        let full = QuotePacket::new("AAA", 1, 1, 2, 1).with_timing([1, 2, 3, 4]).to_bytes();
        let short = QuotePacket::new("B", 3, 3, 4, 3).to_bytes();

        WireDecoder::decode(&full, &mut pool, 1, 1).unwrap().flags |= flags::STALE;
        for _ in 0..63 {
            pool.acquire();
        }

        let rec = WireDecoder::decode(&short, &mut pool, 2, 2).unwrap();
        assert_eq!(rec.flags, 0);
        assert_eq!(rec.symbol(), "B");
    }

    #[test]
    fn test_validate_errors() {
        assert_eq!(
            WireDecoder::validate(&[b'A'; 10]),
            Err(DecodeError::BufferTooSmall { need: 28, have: 10 })
        );

        let mut bytes = QuotePacket::new("IBM", 1, 1, 1, 1).to_bytes();
        bytes[3] = 0;
        assert_eq!(
            WireDecoder::validate(&bytes),
            Err(DecodeError::NonPrintableSymbol { offset: 3, byte: 0 })
        );
    }

    #[test]
    fn test_symbol_matches() {
        let bytes = QuotePacket::new("MSFT", 1, 1, 1, 1).to_bytes();
        assert!(WireDecoder::symbol_matches(&bytes, b"MSFT"));
        assert!(WireDecoder::symbol_matches(&bytes, b"MSFT    "));
        assert!(!WireDecoder::symbol_matches(&bytes, b"MSFX"));
        assert!(!WireDecoder::symbol_matches(&[b'M'; 2], b"MSFT"));
    }
}

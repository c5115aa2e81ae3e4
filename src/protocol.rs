/// BBO wire format
///
/// UDP payload, all numeric fields big-endian:
///   - symbol:       [0..8)   space-padded ASCII
///   - bid_price:    [8..12)  u32, price * 10^4
///   - bid_shares:   [12..16) u32
///   - ask_price:    [16..20) u32, price * 10^4
///   - ask_shares:   [20..24) u32
///   - spread:       [24..28) u32, price * 10^4
///   - t1..t4:       [28..44) u32 timing fixture markers (optional)

use byteorder::{BigEndian, ByteOrder};

/// 1/10000, multiplied rather than divided
pub const PRICE_MULTIPLIER: f64 = 0.0001;

pub const MIN_PAYLOAD_SIZE: usize = 28; // symbol(8) + prices/shares(20)
pub const FULL_PAYLOAD_SIZE: usize = 44; // with 4 timing markers

pub const SYMBOL_OFFSET: usize = 0;
pub const BID_PRICE_OFFSET: usize = 8;
pub const BID_SHARES_OFFSET: usize = 12;
pub const ASK_PRICE_OFFSET: usize = 16;
pub const ASK_SHARES_OFFSET: usize = 20;
pub const SPREAD_OFFSET: usize = 24;
pub const T1_OFFSET: usize = 28;
pub const T2_OFFSET: usize = 32;
pub const T3_OFFSET: usize = 36;
pub const T4_OFFSET: usize = 40;

/// Timing fixture runs at 125 MHz
pub const MARKER_NS_PER_TICK: f64 = 8.0;
const US_PER_NS: f64 = 0.001;

/// Endianness-aware reader over a payload whose length has already been checked.
///
/// Offsets are fixed by the wire layout, not by any host struct layout.
#[derive(Debug, Clone, Copy)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
}

impl<'a> FieldReader<'a> {
    /// Returns None unless the payload holds at least the mandatory fields
    #[inline(always)]
    pub fn new(buf: &'a [u8]) -> Option<Self> {
        if buf.len() < MIN_PAYLOAD_SIZE {
            return None;
        }
        Some(FieldReader { buf })
    }

    #[inline(always)]
    pub fn symbol(&self) -> [u8; 8] {
        let mut sym = [0u8; 8];
        sym.copy_from_slice(&self.buf[SYMBOL_OFFSET..SYMBOL_OFFSET + 8]);
        sym
    }

    /// Big-endian u32 at `offset`, or None past the end of the payload
    #[inline(always)]
    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        let end = offset.checked_add(4)?;
        self.buf.get(offset..end).map(BigEndian::read_u32)
    }

    // offset + 4 <= MIN_PAYLOAD_SIZE, checked in `new`
    #[inline(always)]
    fn mandatory_u32(&self, offset: usize) -> u32 {
        BigEndian::read_u32(&self.buf[offset..offset + 4])
    }

    #[inline(always)]
    pub fn bid_raw(&self) -> u32 {
        self.mandatory_u32(BID_PRICE_OFFSET)
    }

    #[inline(always)]
    pub fn bid_shares(&self) -> u32 {
        self.mandatory_u32(BID_SHARES_OFFSET)
    }

    #[inline(always)]
    pub fn ask_raw(&self) -> u32 {
        self.mandatory_u32(ASK_PRICE_OFFSET)
    }

    #[inline(always)]
    pub fn ask_shares(&self) -> u32 {
        self.mandatory_u32(ASK_SHARES_OFFSET)
    }

    #[inline(always)]
    pub fn spread_raw(&self) -> u32 {
        self.mandatory_u32(SPREAD_OFFSET)
    }

    #[inline(always)]
    pub fn has_timing(&self) -> bool {
        self.buf.len() >= FULL_PAYLOAD_SIZE
    }

    /// The four timing markers t1..t4, when the payload carries them
    pub fn timing_markers(&self) -> Option<[u32; 4]> {
        if !self.has_timing() {
            return None;
        }
        Some([
            self.u32_at(T1_OFFSET)?,
            self.u32_at(T2_OFFSET)?,
            self.u32_at(T3_OFFSET)?,
            self.u32_at(T4_OFFSET)?,
        ])
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Convert a raw wire price to floating point
#[inline(always)]
pub fn price_from_raw(raw: u32) -> f64 {
    raw as f64 * PRICE_MULTIPLIER
}

/// Convert a price to its raw wire value
pub fn price_to_raw(price: f64) -> u32 {
    (price * 10_000.0).round() as u32
}

/// Timing fixture markers from the payload tail, plus derived latencies.
///
/// Kept apart from QuoteRecord; only built on demand.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExtendedTiming {
    pub t1: u32, // parse start
    pub t2: u32, // parse fifo write
    pub t3: u32, // output fifo read
    pub t4: u32, // transmit start
    pub latency_a_us: f64, // t2 - t1
    pub latency_b_us: f64, // t4 - t3
    pub total_us: f64,
}

impl ExtendedTiming {
    pub fn from_markers(t1: u32, t2: u32, t3: u32, t4: u32) -> Self {
        let latency_a_us = t2.wrapping_sub(t1) as f64 * MARKER_NS_PER_TICK * US_PER_NS;
        let latency_b_us = t4.wrapping_sub(t3) as f64 * MARKER_NS_PER_TICK * US_PER_NS;
        ExtendedTiming {
            t1,
            t2,
            t3,
            t4,
            latency_a_us,
            latency_b_us,
            total_us: latency_a_us + latency_b_us,
        }
    }
}

/// A quote in wire terms, used to build payloads for warm-up, replay and tests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotePacket {
    pub symbol: [u8; 8],
    pub bid_raw: u32,
    pub bid_shares: u32,
    pub ask_raw: u32,
    pub ask_shares: u32,
    pub spread_raw: u32,
    pub timing: Option<[u32; 4]>,
}

impl QuotePacket {
    /// Build a packet with a space-padded symbol and no timing markers
    pub fn new(symbol: &str, bid_raw: u32, bid_shares: u32, ask_raw: u32, ask_shares: u32) -> Self {
        let mut sym = [b' '; 8];
        let bytes = symbol.as_bytes();
        let n = bytes.len().min(8);
        sym[..n].copy_from_slice(&bytes[..n]);

        QuotePacket {
            symbol: sym,
            bid_raw,
            bid_shares,
            ask_raw,
            ask_shares,
            spread_raw: ask_raw.saturating_sub(bid_raw),
            timing: None,
        }
    }

    pub fn with_timing(mut self, markers: [u32; 4]) -> Self {
        self.timing = Some(markers);
        self
    }

    /// Encoded length: 28 bytes, or 44 with timing markers
    pub fn encoded_len(&self) -> usize {
        if self.timing.is_some() {
            FULL_PAYLOAD_SIZE
        } else {
            MIN_PAYLOAD_SIZE
        }
    }

    /// Write into `buf`, returning bytes written, or None if `buf` is too short
    pub fn encode_into(&self, buf: &mut [u8]) -> Option<usize> {
        let len = self.encoded_len();
        if buf.len() < len {
            return None;
        }

        buf[SYMBOL_OFFSET..SYMBOL_OFFSET + 8].copy_from_slice(&self.symbol);
        BigEndian::write_u32(&mut buf[BID_PRICE_OFFSET..BID_PRICE_OFFSET + 4], self.bid_raw);
        BigEndian::write_u32(&mut buf[BID_SHARES_OFFSET..BID_SHARES_OFFSET + 4], self.bid_shares);
        BigEndian::write_u32(&mut buf[ASK_PRICE_OFFSET..ASK_PRICE_OFFSET + 4], self.ask_raw);
        BigEndian::write_u32(&mut buf[ASK_SHARES_OFFSET..ASK_SHARES_OFFSET + 4], self.ask_shares);
        BigEndian::write_u32(&mut buf[SPREAD_OFFSET..SPREAD_OFFSET + 4], self.spread_raw);

        if let Some([t1, t2, t3, t4]) = self.timing {
            BigEndian::write_u32(&mut buf[T1_OFFSET..T1_OFFSET + 4], t1);
            BigEndian::write_u32(&mut buf[T2_OFFSET..T2_OFFSET + 4], t2);
            BigEndian::write_u32(&mut buf[T3_OFFSET..T3_OFFSET + 4], t3);
            BigEndian::write_u32(&mut buf[T4_OFFSET..T4_OFFSET + 4], t4);
        }

        Some(len)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        self.encode_into(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_conversions() {
        assert!((price_from_raw(1_500_000) - 150.0).abs() < 1e-9);
        assert_eq!(price_to_raw(150.1), 1_501_000);
        assert_eq!(price_to_raw(0.1), 1000);
    }

    #[test]
    fn test_field_reader_rejects_short() {
        assert!(FieldReader::new(&[0u8; 27]).is_none());
        let buf = [0u8; 28];
        let reader = FieldReader::new(&buf).unwrap();
        assert!(!reader.has_timing());
        assert_eq!(reader.len(), 28);
    }

    #[test]
    fn test_field_reader_big_endian() {
        let mut buf = [0u8; 28];
        buf[8..12].copy_from_slice(&[0x00, 0x16, 0xE3, 0x60]); // 1_500_000
        let reader = FieldReader::new(&buf).unwrap();
        assert_eq!(reader.bid_raw(), 1_500_000);
        assert_eq!(reader.u32_at(BID_PRICE_OFFSET), Some(1_500_000));
    }

    #[test]
    fn test_field_reader_minimal_payload_has_no_markers() {
        let buf = [b' '; MIN_PAYLOAD_SIZE];
        let reader = FieldReader::new(&buf).unwrap();
        assert_eq!(reader.u32_at(SPREAD_OFFSET), Some(0x2020_2020));
        assert_eq!(reader.u32_at(T1_OFFSET), None);
        assert_eq!(reader.u32_at(T4_OFFSET), None);
        assert_eq!(reader.u32_at(usize::MAX), None);
        assert_eq!(reader.timing_markers(), None);
    }

    #[test]
    fn test_field_reader_timing_markers() {
        let bytes = QuotePacket::new("IBM", 1, 1, 2, 1).with_timing([5, 6, 7, 8]).to_bytes();
        let reader = FieldReader::new(&bytes).unwrap();
        assert_eq!(reader.timing_markers(), Some([5, 6, 7, 8]));

        // 43 bytes: last marker incomplete
        let reader = FieldReader::new(&bytes[..43]).unwrap();
        assert_eq!(reader.timing_markers(), None);
    }

    #[test]
    fn test_encode_layout() {
        let pkt = QuotePacket::new("IBM", 1_500_000, 100, 1_501_000, 200);
        let bytes = pkt.to_bytes();

        assert_eq!(bytes.len(), MIN_PAYLOAD_SIZE);
        assert_eq!(&bytes[..8], b"IBM     ");
        assert_eq!(BigEndian::read_u32(&bytes[24..28]), 1000);
    }

    #[test]
    fn test_encode_into_short_buffer() {
        let pkt = QuotePacket::new("IBM", 1, 1, 2, 1).with_timing([1, 2, 3, 4]);
        let mut buf = [0u8; 40];
        assert_eq!(pkt.encode_into(&mut buf), None);
    }

    #[test]
    fn test_extended_timing_latencies() {
        // 125 ticks at 8 ns = 1 us
        let ts = ExtendedTiming::from_markers(1000, 1125, 2000, 2250);
        assert!((ts.latency_a_us - 1.0).abs() < 1e-9);
        assert!((ts.latency_b_us - 2.0).abs() < 1e-9);
        assert!((ts.total_us - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_extended_timing_marker_wrap() {
        let ts = ExtendedTiming::from_markers(u32::MAX, 124, 0, 0);
        // 125 ticks across the wrap
        assert!((ts.latency_a_us - 1.0).abs() < 1e-9);
    }
}

#![forbid(unsafe_code)]

//! On-disk page frames.
//!
//! A page is a sorted block of triples sharing one primary value under one
//! ordering. Frames are self-validating: magic, format version, database
//! salt, and a CRC32 over header and payload. Payloads are optionally
//! Snappy-compressed; compression is kept per page only when it actually
//! shrinks the payload.

use crate::types::checksum::crc32_chunks;
use crate::types::{Result, TermId, TernaError, Triple, TripleOrder};

/// Magic bytes opening every page frame.
pub const PAGE_MAGIC: [u8; 4] = *b"TRNP";
/// On-disk page format version.
pub const PAGE_FORMAT_VERSION: u16 = 1;
/// Fixed frame header length in bytes.
pub const PAGE_HEADER_LEN: usize = 40;
/// Encoded size of one triple (three big-endian u64 terms).
pub const TRIPLE_ENCODED_LEN: usize = 24;

mod header {
    use core::ops::Range;

    pub const MAGIC: Range<usize> = 0..4;
    pub const FORMAT_VERSION: Range<usize> = 4..6;
    pub const ORDER_TAG: usize = 6;
    pub const CODEC_TAG: usize = 7;
    pub const PRIMARY: Range<usize> = 8..16;
    pub const COUNT: Range<usize> = 16..20;
    pub const PAYLOAD_LEN: Range<usize> = 20..24;
    pub const RAW_LEN: Range<usize> = 24..28;
    pub const SALT: Range<usize> = 28..36;
    pub const CRC32: Range<usize> = 36..40;
}

/// Payload codec applied to a page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageCodec {
    /// Raw big-endian triples.
    None,
    /// Snappy-compressed raw payload.
    Snappy,
}

impl PageCodec {
    const fn tag(self) -> u8 {
        match self {
            PageCodec::None => 0,
            PageCodec::Snappy => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(PageCodec::None),
            1 => Ok(PageCodec::Snappy),
            _ => Err(TernaError::Corruption("unknown page codec tag")),
        }
    }
}

/// Decoded page frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageFrame {
    /// Ordering the page belongs to.
    pub order: TripleOrder,
    /// Primary value shared by every triple in the page.
    pub primary: TermId,
    /// Triples sorted by the ordering's secondary/tertiary keys.
    pub triples: Vec<Triple>,
}

fn encode_raw_payload(triples: &[Triple]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(triples.len() * TRIPLE_ENCODED_LEN);
    for t in triples {
        raw.extend_from_slice(&t.s.0.to_be_bytes());
        raw.extend_from_slice(&t.p.0.to_be_bytes());
        raw.extend_from_slice(&t.o.0.to_be_bytes());
    }
    raw
}

fn decode_raw_payload(raw: &[u8]) -> Result<Vec<Triple>> {
    if raw.len() % TRIPLE_ENCODED_LEN != 0 {
        return Err(TernaError::Corruption("page payload length misaligned"));
    }
    let mut triples = Vec::with_capacity(raw.len() / TRIPLE_ENCODED_LEN);
    for chunk in raw.chunks_exact(TRIPLE_ENCODED_LEN) {
        let s = u64::from_be_bytes(chunk[0..8].try_into().unwrap());
        let p = u64::from_be_bytes(chunk[8..16].try_into().unwrap());
        let o = u64::from_be_bytes(chunk[16..24].try_into().unwrap());
        triples.push(Triple::new(TermId(s), TermId(p), TermId(o)));
    }
    Ok(triples)
}

fn check_page_invariants(order: TripleOrder, primary: TermId, triples: &[Triple]) -> Result<()> {
    if triples.is_empty() {
        return Err(TernaError::Corruption("empty page"));
    }
    for t in triples {
        if order.primary(t) != primary {
            return Err(TernaError::Corruption("page triple outside its primary"));
        }
    }
    for pair in triples.windows(2) {
        if order.key(&pair[0]) >= order.key(&pair[1]) {
            return Err(TernaError::Corruption("page triples out of order"));
        }
    }
    Ok(())
}

/// Encodes one page frame. `triples` must be non-empty, share `primary`, and
/// be strictly sorted by `order`'s key.
pub fn encode_page(
    order: TripleOrder,
    primary: TermId,
    triples: &[Triple],
    codec: PageCodec,
    salt: u64,
) -> Result<Vec<u8>> {
    check_page_invariants(order, primary, triples).map_err(|_| {
        TernaError::Invalid("page writer handed an invalid triple block")
    })?;
    let raw = encode_raw_payload(triples);
    let (effective_codec, payload) = match codec {
        PageCodec::None => (PageCodec::None, raw),
        PageCodec::Snappy => {
            let compressed = snap::raw::Encoder::new()
                .compress_vec(&raw)
                .map_err(|_| TernaError::Invalid("snappy compression failed"))?;
            if compressed.len() < raw.len() {
                (PageCodec::Snappy, compressed)
            } else {
                (PageCodec::None, raw)
            }
        }
    };

    let mut frame = vec![0u8; PAGE_HEADER_LEN + payload.len()];
    frame[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
    frame[header::FORMAT_VERSION].copy_from_slice(&PAGE_FORMAT_VERSION.to_be_bytes());
    frame[header::ORDER_TAG] = order.tag();
    frame[header::CODEC_TAG] = effective_codec.tag();
    frame[header::PRIMARY].copy_from_slice(&primary.0.to_be_bytes());
    frame[header::COUNT].copy_from_slice(&(triples.len() as u32).to_be_bytes());
    frame[header::PAYLOAD_LEN].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    frame[header::RAW_LEN]
        .copy_from_slice(&((triples.len() * TRIPLE_ENCODED_LEN) as u32).to_be_bytes());
    frame[header::SALT].copy_from_slice(&salt.to_be_bytes());
    frame[PAGE_HEADER_LEN..].copy_from_slice(&payload);

    let crc = crc32_chunks(&[&frame[..header::CRC32.start], &frame[PAGE_HEADER_LEN..]]);
    frame[header::CRC32].copy_from_slice(&crc.to_be_bytes());
    Ok(frame)
}

/// Decodes and strictly validates one page frame.
pub fn decode_page(bytes: &[u8], expected_salt: u64) -> Result<PageFrame> {
    if bytes.len() < PAGE_HEADER_LEN {
        return Err(TernaError::Corruption("page frame truncated"));
    }
    if bytes[header::MAGIC] != PAGE_MAGIC {
        return Err(TernaError::Corruption("page magic mismatch"));
    }
    let version = u16::from_be_bytes(bytes[header::FORMAT_VERSION].try_into().unwrap());
    if version != PAGE_FORMAT_VERSION {
        return Err(TernaError::Corruption("page format version mismatch"));
    }
    let order = TripleOrder::from_tag(bytes[header::ORDER_TAG])?;
    let codec = PageCodec::from_tag(bytes[header::CODEC_TAG])?;
    let primary = TermId(u64::from_be_bytes(bytes[header::PRIMARY].try_into().unwrap()));
    let count = u32::from_be_bytes(bytes[header::COUNT].try_into().unwrap()) as usize;
    let payload_len = u32::from_be_bytes(bytes[header::PAYLOAD_LEN].try_into().unwrap()) as usize;
    let raw_len = u32::from_be_bytes(bytes[header::RAW_LEN].try_into().unwrap()) as usize;
    let salt = u64::from_be_bytes(bytes[header::SALT].try_into().unwrap());
    if salt != expected_salt {
        return Err(TernaError::Corruption("page salt mismatch"));
    }
    if bytes.len() != PAGE_HEADER_LEN + payload_len {
        return Err(TernaError::Corruption("page frame length mismatch"));
    }
    if raw_len != count * TRIPLE_ENCODED_LEN {
        return Err(TernaError::Corruption("page raw length mismatch"));
    }

    let stored_crc = u32::from_be_bytes(bytes[header::CRC32].try_into().unwrap());
    let crc = crc32_chunks(&[&bytes[..header::CRC32.start], &bytes[PAGE_HEADER_LEN..]]);
    if crc != stored_crc {
        return Err(TernaError::Corruption("page crc mismatch"));
    }

    let payload = &bytes[PAGE_HEADER_LEN..];
    let raw = match codec {
        PageCodec::None => payload.to_vec(),
        PageCodec::Snappy => snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|_| TernaError::Corruption("page payload failed to decompress"))?,
    };
    if raw.len() != raw_len {
        return Err(TernaError::Corruption("page decompressed length mismatch"));
    }
    let triples = decode_raw_payload(&raw)?;
    check_page_invariants(order, primary, &triples)?;
    Ok(PageFrame {
        order,
        primary,
        triples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted_triples(order: TripleOrder, primary: u64, n: u64) -> Vec<Triple> {
        let mut triples: Vec<Triple> = (0..n)
            .map(|i| match order {
                TripleOrder::Spo => Triple::new(TermId(primary), TermId(i + 1), TermId(1)),
                TripleOrder::Pos => Triple::new(TermId(1), TermId(primary), TermId(i + 1)),
                TripleOrder::Osp => Triple::new(TermId(i + 1), TermId(1), TermId(primary)),
            })
            .collect();
        triples.sort_by_key(|t| order.key(t));
        triples
    }

    #[test]
    fn roundtrip_uncompressed() {
        let triples = sorted_triples(TripleOrder::Pos, 7, 5);
        let frame =
            encode_page(TripleOrder::Pos, TermId(7), &triples, PageCodec::None, 42).unwrap();
        let decoded = decode_page(&frame, 42).unwrap();
        assert_eq!(decoded.order, TripleOrder::Pos);
        assert_eq!(decoded.primary, TermId(7));
        assert_eq!(decoded.triples, triples);
    }

    #[test]
    fn roundtrip_snappy_shrinks_repetitive_payload() {
        let triples = sorted_triples(TripleOrder::Spo, 3, 200);
        let plain =
            encode_page(TripleOrder::Spo, TermId(3), &triples, PageCodec::None, 1).unwrap();
        let packed =
            encode_page(TripleOrder::Spo, TermId(3), &triples, PageCodec::Snappy, 1).unwrap();
        assert!(packed.len() < plain.len());
        assert_eq!(decode_page(&packed, 1).unwrap().triples, triples);
    }

    #[test]
    fn single_bit_flip_is_detected() {
        let triples = sorted_triples(TripleOrder::Osp, 9, 16);
        let mut frame =
            encode_page(TripleOrder::Osp, TermId(9), &triples, PageCodec::None, 5).unwrap();
        let mid = PAGE_HEADER_LEN + 10;
        frame[mid] ^= 0x01;
        let err = decode_page(&frame, 5).unwrap_err();
        assert!(matches!(err, TernaError::Corruption(_)));
    }

    #[test]
    fn salt_mismatch_is_corruption() {
        let triples = sorted_triples(TripleOrder::Spo, 2, 4);
        let frame =
            encode_page(TripleOrder::Spo, TermId(2), &triples, PageCodec::None, 11).unwrap();
        assert!(matches!(
            decode_page(&frame, 12),
            Err(TernaError::Corruption(_))
        ));
    }

    #[test]
    fn unsorted_block_is_rejected_at_encode() {
        let mut triples = sorted_triples(TripleOrder::Spo, 2, 4);
        triples.swap(0, 3);
        assert!(matches!(
            encode_page(TripleOrder::Spo, TermId(2), &triples, PageCodec::None, 1),
            Err(TernaError::Invalid(_))
        ));
    }
}

#![forbid(unsafe_code)]

//! CRC32 helpers shared by the WAL and page codecs.

/// Computes a CRC32 over a single byte slice.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Computes a CRC32 over a sequence of chunks without concatenating them.
pub fn crc32_chunks(chunks: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize()
}

#![forbid(unsafe_code)]

//! The primary data file (`<db>`): dictionary, staged triples, and
//! properties, rewritten atomically (write-then-rename) on flush and close.
//!
//! Staged triples persisted here are only an optimization for clean reopens;
//! the WAL remains the durability authority and replay re-applies its records
//! on top of whatever overlay was loaded. Both paths converge because the
//! overlay operations are idempotent set operations.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::primitives::io::sync_dir;
use crate::storage::dict::Dict;
use crate::storage::staging::Overlay;
use crate::types::checksum::crc32;
use crate::types::{Result, TermId, TernaError, Triple};

/// Magic bytes opening the primary data file.
pub const DATA_MAGIC: [u8; 4] = *b"TRN1";
/// Data file format version.
pub const DATA_FORMAT_VERSION: u16 = 1;
/// Fixed header length.
pub const DATA_HEADER_LEN: usize = 16;

/// Decoded contents of the primary data file.
pub struct DataFile {
    /// Database salt stamped into every storage file.
    pub salt: u64,
    /// Interned terms.
    pub dict: Dict,
    /// Committed overlay persisted at the last flush or commit.
    pub overlay: Overlay,
    /// Free-form properties (creation version, format flags).
    pub properties: BTreeMap<String, String>,
}

fn encode_triple_set(set: &BTreeSet<Triple>, out: &mut Vec<u8>) {
    out.extend_from_slice(&(set.len() as u64).to_be_bytes());
    for t in set {
        out.extend_from_slice(&t.s.0.to_be_bytes());
        out.extend_from_slice(&t.p.0.to_be_bytes());
        out.extend_from_slice(&t.o.0.to_be_bytes());
    }
}

fn decode_triple_set(src: &[u8], offset: &mut usize) -> Result<BTreeSet<Triple>> {
    if src.len() < *offset + 8 {
        return Err(TernaError::Corruption("triple section truncated"));
    }
    let count = u64::from_be_bytes(src[*offset..*offset + 8].try_into().unwrap()) as usize;
    *offset += 8;
    let mut set = BTreeSet::new();
    for _ in 0..count {
        if src.len() < *offset + 24 {
            return Err(TernaError::Corruption("triple entry truncated"));
        }
        let s = u64::from_be_bytes(src[*offset..*offset + 8].try_into().unwrap());
        let p = u64::from_be_bytes(src[*offset + 8..*offset + 16].try_into().unwrap());
        let o = u64::from_be_bytes(src[*offset + 16..*offset + 24].try_into().unwrap());
        *offset += 24;
        set.insert(Triple::new(TermId(s), TermId(p), TermId(o)));
    }
    Ok(set)
}

fn encode_properties(props: &BTreeMap<String, String>, out: &mut Vec<u8>) {
    out.extend_from_slice(&(props.len() as u64).to_be_bytes());
    for (key, value) in props {
        out.extend_from_slice(&(key.len() as u32).to_be_bytes());
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
    }
}

fn decode_string(src: &[u8], offset: &mut usize) -> Result<String> {
    if src.len() < *offset + 4 {
        return Err(TernaError::Corruption("property length truncated"));
    }
    let len = u32::from_be_bytes(src[*offset..*offset + 4].try_into().unwrap()) as usize;
    *offset += 4;
    if src.len() < *offset + len {
        return Err(TernaError::Corruption("property value truncated"));
    }
    let value = std::str::from_utf8(&src[*offset..*offset + len])
        .map_err(|_| TernaError::Corruption("property not valid UTF-8"))?
        .to_string();
    *offset += len;
    Ok(value)
}

fn decode_properties(src: &[u8], offset: &mut usize) -> Result<BTreeMap<String, String>> {
    if src.len() < *offset + 8 {
        return Err(TernaError::Corruption("property section truncated"));
    }
    let count = u64::from_be_bytes(src[*offset..*offset + 8].try_into().unwrap()) as usize;
    *offset += 8;
    let mut props = BTreeMap::new();
    for _ in 0..count {
        let key = decode_string(src, offset)?;
        let value = decode_string(src, offset)?;
        props.insert(key, value);
    }
    Ok(props)
}

/// Serializes and atomically replaces the data file at `path`.
pub fn write_data_file(
    path: &Path,
    salt: u64,
    dict: &Dict,
    overlay: &Overlay,
    properties: &BTreeMap<String, String>,
) -> Result<()> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&DATA_MAGIC);
    buf.extend_from_slice(&DATA_FORMAT_VERSION.to_be_bytes());
    buf.extend_from_slice(&[0u8; 2]);
    buf.extend_from_slice(&salt.to_be_bytes());
    dict.encode_section(&mut buf);
    encode_triple_set(&overlay.adds, &mut buf);
    encode_triple_set(&overlay.removes, &mut buf);
    encode_properties(properties, &mut buf);
    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".terna.")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(TernaError::from)?;
    tmp.write_all(&buf).map_err(TernaError::from)?;
    tmp.as_file().sync_all().map_err(TernaError::from)?;
    tmp.persist(path).map_err(|e| TernaError::Io(e.error))?;
    sync_dir(dir)
}

/// Reads and validates the data file at `path`.
pub fn read_data_file(path: &Path) -> Result<DataFile> {
    let bytes = std::fs::read(path).map_err(TernaError::from)?;
    if bytes.len() < DATA_HEADER_LEN + 4 {
        return Err(TernaError::Corruption("data file truncated"));
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let stored_crc = u32::from_be_bytes(crc_bytes.try_into().unwrap());
    if crc32(body) != stored_crc {
        return Err(TernaError::Corruption("data file crc mismatch"));
    }
    if body[0..4] != DATA_MAGIC {
        return Err(TernaError::Corruption("data file magic mismatch"));
    }
    let version = u16::from_be_bytes(body[4..6].try_into().unwrap());
    if version != DATA_FORMAT_VERSION {
        return Err(TernaError::Corruption("data file format version mismatch"));
    }
    let salt = u64::from_be_bytes(body[8..16].try_into().unwrap());

    let mut offset = DATA_HEADER_LEN;
    let (dict, consumed) = Dict::decode_section(&body[offset..])?;
    offset += consumed;
    let adds = decode_triple_set(body, &mut offset)?;
    let removes = decode_triple_set(body, &mut offset)?;
    let properties = decode_properties(body, &mut offset)?;
    if offset != body.len() {
        return Err(TernaError::Corruption("data file trailing bytes"));
    }
    Ok(DataFile {
        salt,
        dict,
        overlay: Overlay {
            adds: Arc::new(adds),
            removes: Arc::new(removes),
        },
        properties,
    })
}

/// Reads just the salt from the data file header, validating magic and
/// version but not the full checksum.
pub fn read_salt(path: &Path) -> Result<u64> {
    use std::io::Read;
    let mut header = [0u8; DATA_HEADER_LEN];
    let mut file = std::fs::File::open(path).map_err(TernaError::from)?;
    file.read_exact(&mut header)
        .map_err(|_| TernaError::Corruption("data file header truncated"))?;
    if header[0..4] != DATA_MAGIC {
        return Err(TernaError::Corruption("data file magic mismatch"));
    }
    let version = u16::from_be_bytes(header[4..6].try_into().unwrap());
    if version != DATA_FORMAT_VERSION {
        return Err(TernaError::Corruption("data file format version mismatch"));
    }
    Ok(u64::from_be_bytes(header[8..16].try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> DataFile {
        let mut dict = Dict::new();
        dict.intern("alice").unwrap();
        dict.intern("knows").unwrap();
        let adds: BTreeSet<Triple> = [Triple::new(TermId(1), TermId(2), TermId(1))]
            .into_iter()
            .collect();
        let removes: BTreeSet<Triple> = [Triple::new(TermId(2), TermId(2), TermId(1))]
            .into_iter()
            .collect();
        let mut properties = BTreeMap::new();
        properties.insert("created_by".to_string(), "terna 0.2".to_string());
        DataFile {
            salt: 0xDEAD_BEEF_u64,
            dict,
            overlay: Overlay {
                adds: Arc::new(adds),
                removes: Arc::new(removes),
            },
            properties,
        }
    }

    fn write_sample(path: &Path, data: &DataFile) {
        write_data_file(path, data.salt, &data.dict, &data.overlay, &data.properties).unwrap();
    }

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let data = sample();
        write_sample(&path, &data);

        let loaded = read_data_file(&path).unwrap();
        assert_eq!(loaded.salt, data.salt);
        assert_eq!(loaded.dict.len(), 2);
        assert_eq!(loaded.dict.resolve(TermId(1)), Some("alice"));
        assert_eq!(loaded.overlay.adds.len(), 1);
        assert_eq!(loaded.overlay.removes.len(), 1);
        assert_eq!(
            loaded.properties.get("created_by").map(String::as_str),
            Some("terna 0.2")
        );
        assert_eq!(read_salt(&path).unwrap(), data.salt);
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        write_sample(&path, &sample());
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            read_data_file(&path),
            Err(TernaError::Corruption(_))
        ));
    }

    #[test]
    fn rewrite_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        write_sample(&path, &sample());
        write_sample(&path, &sample());
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}

//! Self-describing binary envelope for stored payloads.
//!
//! Every payload a backend stores is prefixed with a small bincode header
//! carrying the serialization format, compression state, sizes, and a
//! crc32c of the payload. Retrieval reads the header to reverse the
//! pipeline without consulting global configuration.

use crate::pipeline::{CompressionKind, SerializationFormat};
use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::io::Read;
use strata_core::{Error, Result};

/// Magic number: "STRA"
pub const ENVELOPE_MAGIC: u32 = 0x5354_5241;

/// Current envelope format version
pub const ENVELOPE_VERSION: u16 = 1;

const FLAG_COMPRESSED: u16 = 1 << 0;
const FLAG_ENCRYPTED: u16 = 1 << 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct EnvelopeHeader {
    magic: u32,
    version: u16,
    flags: u16,
    format: u8,
    compression: u8,
    original_size: u64,
    final_size: u64,
    payload_crc: u32,
}

/// Parsed envelope: the pipeline metadata plus the raw payload bytes.
#[derive(Debug)]
pub struct Envelope {
    pub format: SerializationFormat,
    pub compression: CompressionKind,
    pub is_compressed: bool,
    pub is_encrypted: bool,
    pub original_size: u64,
    pub final_size: u64,
    pub payload: Vec<u8>,
}

fn format_code(format: SerializationFormat) -> u8 {
    match format {
        SerializationFormat::Json => 0,
        SerializationFormat::Bincode => 1,
        SerializationFormat::Raw => 2,
    }
}

fn format_from_code(code: u8, key: &str) -> Result<SerializationFormat> {
    match code {
        0 => Ok(SerializationFormat::Json),
        1 => Ok(SerializationFormat::Bincode),
        2 => Ok(SerializationFormat::Raw),
        other => Err(Error::Serialization {
            format: "envelope".into(),
            message: format!("unknown serialization format code {other} for key '{key}'"),
            source: None,
        }),
    }
}

fn compression_code(compression: CompressionKind) -> u8 {
    match compression {
        CompressionKind::None => 0,
        CompressionKind::Gzip => 1,
        CompressionKind::Zstd => 2,
    }
}

fn compression_from_code(code: u8, key: &str) -> Result<CompressionKind> {
    match code {
        0 => Ok(CompressionKind::None),
        1 => Ok(CompressionKind::Gzip),
        2 => Ok(CompressionKind::Zstd),
        other => Err(Error::Serialization {
            format: "envelope".into(),
            message: format!("unknown compression code {other} for key '{key}'"),
            source: None,
        }),
    }
}

/// Wrap a payload in an envelope.
pub fn seal(
    payload: Vec<u8>,
    format: SerializationFormat,
    compression: CompressionKind,
    is_compressed: bool,
    is_encrypted: bool,
    original_size: u64,
) -> Result<Vec<u8>> {
    let mut flags = 0u16;
    if is_compressed {
        flags |= FLAG_COMPRESSED;
    }
    if is_encrypted {
        flags |= FLAG_ENCRYPTED;
    }

    let header = EnvelopeHeader {
        magic: ENVELOPE_MAGIC,
        version: ENVELOPE_VERSION,
        flags,
        format: format_code(format),
        compression: compression_code(compression),
        original_size,
        final_size: payload.len() as u64,
        payload_crc: crc32c(&payload),
    };

    let mut out = bincode::serialize(&header)
        .map_err(|e| Error::serialization("envelope", e))?;
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Parse an envelope, verifying magic, version, and payload checksum.
pub fn open(bytes: &[u8], key: &str) -> Result<Envelope> {
    let mut cursor = std::io::Cursor::new(bytes);
    let header: EnvelopeHeader = bincode::deserialize_from(&mut cursor)
        .map_err(|e| Error::serialization("envelope", e))?;

    if header.magic != ENVELOPE_MAGIC {
        return Err(Error::Serialization {
            format: "envelope".into(),
            message: format!(
                "bad magic for key '{key}': expected {ENVELOPE_MAGIC:08x}, got {:08x}",
                header.magic
            ),
            source: None,
        });
    }
    if header.version > ENVELOPE_VERSION {
        return Err(Error::Serialization {
            format: "envelope".into(),
            message: format!(
                "unsupported envelope version {} for key '{key}'",
                header.version
            ),
            source: None,
        });
    }

    let mut payload = Vec::with_capacity(header.final_size as usize);
    cursor
        .read_to_end(&mut payload)
        .map_err(|e| Error::serialization("envelope", e))?;

    let actual_crc = crc32c(&payload);
    if actual_crc != header.payload_crc {
        return Err(Error::Integrity {
            key: key.to_string(),
            expected: format!("{:08x}", header.payload_crc),
            actual: format!("{actual_crc:08x}"),
        });
    }

    Ok(Envelope {
        format: format_from_code(header.format, key)?,
        compression: compression_from_code(header.compression, key)?,
        is_compressed: header.flags & FLAG_COMPRESSED != 0,
        is_encrypted: header.flags & FLAG_ENCRYPTED != 0,
        original_size: header.original_size,
        final_size: header.final_size,
        payload,
    })
}

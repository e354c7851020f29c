//! Serialization and compression pipeline.
//!
//! Two independent axes: the serialization format and the compression
//! algorithm. Values are serialized to bytes; if the result meets the
//! configured threshold and a compressor is set, the bytes are compressed
//! and the compressed form is kept only when it is strictly smaller.
//! The result travels inside a self-describing [`envelope`], so reads
//! never depend on global configuration.

pub mod envelope;

use crate::encryption::{EncryptionMetadata, Encryptor, NoopEncryptor};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use strata_core::{Error, Result};

/// Serialization format for stored values.
///
/// `Json` is the structured-text default. `Bincode` is an explicit
/// schema-based binary format for typed values; it cannot decode into
/// dynamic JSON trees, so it is only reachable through the typed API.
/// `Raw` passes bytes through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    Json,
    Bincode,
    Raw,
}

/// Compression algorithm applied past the size threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    None,
    Gzip,
    Zstd,
}

/// Zstd level 3: fast with good ratios.
const ZSTD_LEVEL: i32 = 3;

/// Metadata describing what the pipeline did to a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineMetadata {
    pub format: SerializationFormat,
    pub compression: CompressionKind,
    pub is_compressed: bool,
    pub original_size: u64,
    pub final_size: u64,
}

/// The configured pipeline instance shared by the engine and the batch
/// processor.
pub struct Pipeline {
    format: SerializationFormat,
    compression: CompressionKind,
    threshold: usize,
    encryptor: Arc<dyn Encryptor>,
}

impl Pipeline {
    pub fn new(format: SerializationFormat, compression: CompressionKind, threshold: usize) -> Self {
        Self {
            format,
            compression,
            threshold,
            encryptor: Arc::new(NoopEncryptor),
        }
    }

    /// Swap in a real encryptor; the default is a no-op.
    pub fn with_encryptor(mut self, encryptor: Arc<dyn Encryptor>) -> Self {
        self.encryptor = encryptor;
        self
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    /// Encode a JSON value into an enveloped payload.
    ///
    /// Dynamic value trees always ride the structured-text format: a
    /// schema-based binary format cannot decode back into an arbitrary
    /// tree, so only the typed API uses bincode.
    pub fn encode_value(&self, key: &str, value: &serde_json::Value) -> Result<(Vec<u8>, PipelineMetadata)> {
        if self.format == SerializationFormat::Raw {
            return Err(Error::Serialization {
                format: "raw".into(),
                message: format!("raw format stores bytes, not structured values (key '{key}')"),
                source: None,
            });
        }
        let serialized =
            serde_json::to_vec(value).map_err(|e| Error::serialization("json", e))?;
        self.finish(serialized, SerializationFormat::Json)
    }

    /// Decode an enveloped payload back into a JSON value.
    pub fn decode_value(&self, key: &str, bytes: &[u8]) -> Result<serde_json::Value> {
        let plain = self.unwrap_payload(key, bytes)?;
        match plain.1 {
            SerializationFormat::Json => serde_json::from_slice(&plain.0)
                .map_err(|e| Error::serialization("json", e)),
            SerializationFormat::Bincode => Err(Error::Serialization {
                format: "bincode".into(),
                message: format!(
                    "schema-based payload for key '{key}' requires a typed decode"
                ),
                source: None,
            }),
            SerializationFormat::Raw => Err(Error::Serialization {
                format: "raw".into(),
                message: format!("raw payload for key '{key}' requires decode_bytes"),
                source: None,
            }),
        }
    }

    /// Encode a typed value (schema-based formats included).
    pub fn encode_typed<T: Serialize>(&self, _key: &str, value: &T) -> Result<(Vec<u8>, PipelineMetadata)> {
        let (serialized, format) = match self.format {
            SerializationFormat::Json => (
                serde_json::to_vec(value).map_err(|e| Error::serialization("json", e))?,
                SerializationFormat::Json,
            ),
            SerializationFormat::Bincode | SerializationFormat::Raw => (
                bincode::serialize(value).map_err(|e| Error::serialization("bincode", e))?,
                SerializationFormat::Bincode,
            ),
        };
        self.finish(serialized, format)
    }

    /// Decode a typed value.
    pub fn decode_typed<T: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> Result<T> {
        let (plain, format) = self.unwrap_payload(key, bytes)?;
        match format {
            SerializationFormat::Json => {
                serde_json::from_slice(&plain).map_err(|e| Error::serialization("json", e))
            }
            SerializationFormat::Bincode => {
                bincode::deserialize(&plain).map_err(|e| Error::serialization("bincode", e))
            }
            SerializationFormat::Raw => Err(Error::Serialization {
                format: "raw".into(),
                message: format!("raw payload for key '{key}' requires decode_bytes"),
                source: None,
            }),
        }
    }

    /// Pass raw bytes through compression and the envelope.
    pub fn encode_bytes(&self, bytes: Vec<u8>) -> Result<(Vec<u8>, PipelineMetadata)> {
        self.finish(bytes, SerializationFormat::Raw)
    }

    /// Reverse [`Pipeline::encode_bytes`].
    pub fn decode_bytes(&self, key: &str, bytes: &[u8]) -> Result<Vec<u8>> {
        let (plain, format) = self.unwrap_payload(key, bytes)?;
        if format != SerializationFormat::Raw {
            return Err(Error::Serialization {
                format: "raw".into(),
                message: format!("payload for key '{key}' is {format:?}, not raw bytes"),
                source: None,
            });
        }
        Ok(plain)
    }

    fn finish(&self, serialized: Vec<u8>, format: SerializationFormat) -> Result<(Vec<u8>, PipelineMetadata)> {
        let original_size = serialized.len() as u64;

        let (payload, is_compressed) = if self.compression != CompressionKind::None
            && serialized.len() >= self.threshold
        {
            let compressed = compress(self.compression, &serialized)?;
            // Keep the compressed form only when it actually won.
            if compressed.len() < serialized.len() {
                (compressed, true)
            } else {
                (serialized, false)
            }
        } else {
            (serialized, false)
        };

        let (payload, encryption) = self.encryptor.encrypt(payload)?;
        let final_size = payload.len() as u64;

        let metadata = PipelineMetadata {
            format,
            compression: self.compression,
            is_compressed,
            original_size,
            final_size,
        };

        let sealed = envelope::seal(
            payload,
            format,
            self.compression,
            is_compressed,
            encryption.encrypted,
            original_size,
        )?;
        Ok((sealed, metadata))
    }

    /// Open the envelope, decrypt, and decompress; returns the plain
    /// serialized bytes and their format.
    fn unwrap_payload(&self, key: &str, bytes: &[u8]) -> Result<(Vec<u8>, SerializationFormat)> {
        let envelope = envelope::open(bytes, key)?;

        let metadata = EncryptionMetadata {
            encrypted: envelope.is_encrypted,
        };
        let payload = self.encryptor.decrypt(envelope.payload, &metadata)?;

        let plain = if envelope.is_compressed {
            decompress(envelope.compression, &payload)?
        } else {
            payload
        };
        Ok((plain, envelope.format))
    }

    /// Inspect stored bytes without decoding the value.
    pub fn read_metadata(&self, key: &str, bytes: &[u8]) -> Result<PipelineMetadata> {
        let envelope = envelope::open(bytes, key)?;
        Ok(PipelineMetadata {
            format: envelope.format,
            compression: envelope.compression,
            is_compressed: envelope.is_compressed,
            original_size: envelope.original_size,
            final_size: envelope.final_size,
        })
    }
}

fn compress(kind: CompressionKind, bytes: &[u8]) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(bytes.to_vec()),
        CompressionKind::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(bytes)
                .and_then(|()| encoder.finish())
                .map_err(|e| Error::serialization("gzip", e))
        }
        CompressionKind::Zstd => {
            zstd::stream::encode_all(bytes, ZSTD_LEVEL).map_err(|e| Error::serialization("zstd", e))
        }
    }
}

fn decompress(kind: CompressionKind, bytes: &[u8]) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(bytes.to_vec()),
        CompressionKind::Gzip => {
            let mut decoder = GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::serialization("gzip", e))?;
            Ok(out)
        }
        CompressionKind::Zstd => {
            zstd::stream::decode_all(bytes).map_err(|e| Error::serialization("zstd", e))
        }
    }
}

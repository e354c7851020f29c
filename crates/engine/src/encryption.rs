//! Pluggable encryption envelope around the compressed bytes.
//!
//! Composed immediately after the compression stage. The default is a
//! transparent no-op; a real deployment supplies an authenticated cipher
//! keyed from an external key-management source. The engine only cares
//! about the two-phase contract below.

use strata_core::Result;

/// Metadata emitted by the encryption stage and needed to reverse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionMetadata {
    pub encrypted: bool,
}

impl EncryptionMetadata {
    pub const PLAINTEXT: Self = Self { encrypted: false };
}

/// Two-phase encryption contract, mirroring the compression stage.
pub trait Encryptor: Send + Sync {
    /// Stable algorithm name for health reports and diagnostics.
    fn algorithm(&self) -> &'static str;

    /// Encrypt the (already serialized and possibly compressed) bytes.
    fn encrypt(&self, bytes: Vec<u8>) -> Result<(Vec<u8>, EncryptionMetadata)>;

    /// Reverse [`Encryptor::encrypt`] using the stored metadata.
    fn decrypt(&self, bytes: Vec<u8>, metadata: &EncryptionMetadata) -> Result<Vec<u8>>;
}

/// Transparent pass-through encryptor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEncryptor;

impl Encryptor for NoopEncryptor {
    fn algorithm(&self) -> &'static str {
        "none"
    }

    fn encrypt(&self, bytes: Vec<u8>) -> Result<(Vec<u8>, EncryptionMetadata)> {
        Ok((bytes, EncryptionMetadata::PLAINTEXT))
    }

    fn decrypt(&self, bytes: Vec<u8>, _metadata: &EncryptionMetadata) -> Result<Vec<u8>> {
        Ok(bytes)
    }
}

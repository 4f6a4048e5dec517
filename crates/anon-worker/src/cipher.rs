//! Encrypted payload wire format and AES-GCM decryption.
//!
//! Payload layout: `[0,12)` nonce, `[12,28)` tag, `[28,end)` ciphertext.
//! No associated data is used.

use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce, Tag};
use base64::Engine;
use thiserror::Error;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const HEADER_LEN: usize = NONCE_LEN + TAG_LEN;

pub type CipherResult<T> = Result<T, CipherError>;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Key must be 16 or 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Key is not valid base64: {0}")]
    InvalidKeyEncoding(String),

    #[error("Payload of {0} bytes is shorter than the {HEADER_LEN}-byte header")]
    MalformedPayload(usize),

    #[error("Authentication tag mismatch")]
    Authentication,

    #[error("Encryption failed")]
    EncryptionFailed,
}

/// Process-wide symmetric key. Never printed.
#[derive(Clone)]
pub struct CipherKey(Vec<u8>);

impl CipherKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> CipherResult<Self> {
        let bytes = bytes.into();
        match bytes.len() {
            16 | 32 => Ok(Self(bytes)),
            n => Err(CipherError::InvalidKeyLength(n)),
        }
    }

    pub fn from_base64(encoded: &str) -> CipherResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CipherError::InvalidKeyEncoding(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CipherKey(<{} bytes redacted>)", self.0.len())
    }
}

/// Borrowed view of a payload split at its fixed offsets.
#[derive(Debug, Clone, Copy)]
pub struct EncryptedPayload<'a> {
    pub nonce: &'a [u8],
    pub tag: &'a [u8],
    pub ciphertext: &'a [u8],
}

impl<'a> EncryptedPayload<'a> {
    pub fn parse(bytes: &'a [u8]) -> CipherResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CipherError::MalformedPayload(bytes.len()));
        }

        Ok(Self {
            nonce: &bytes[..NONCE_LEN],
            tag: &bytes[NONCE_LEN..HEADER_LEN],
            ciphertext: &bytes[HEADER_LEN..],
        })
    }
}

#[derive(Clone)]
enum Engine128Or256 {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

/// AES-GCM codec keyed once at startup.
#[derive(Clone)]
pub struct Cipher {
    engine: Engine128Or256,
}

impl Cipher {
    pub fn new(key: &CipherKey) -> CipherResult<Self> {
        let engine = match key.0.len() {
            16 => Engine128Or256::Aes128(
                Aes128Gcm::new_from_slice(&key.0).map_err(|_| CipherError::InvalidKeyLength(16))?,
            ),
            32 => Engine128Or256::Aes256(
                Aes256Gcm::new_from_slice(&key.0).map_err(|_| CipherError::InvalidKeyLength(32))?,
            ),
            n => return Err(CipherError::InvalidKeyLength(n)),
        };
        Ok(Self { engine })
    }

    /// Verify and decrypt. Nothing is returned unless the tag verifies.
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8], tag: &[u8]) -> CipherResult<Vec<u8>> {
        if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(CipherError::MalformedPayload(nonce.len() + tag.len() + ciphertext.len()));
        }
        let nonce = Nonce::<U12>::from_slice(nonce);
        let tag = Tag::<U16>::from_slice(tag);

        let mut buffer = ciphertext.to_vec();
        let verified = match &self.engine {
            Engine128Or256::Aes128(c) => c.decrypt_in_place_detached(nonce, &[], &mut buffer, tag),
            Engine128Or256::Aes256(c) => c.decrypt_in_place_detached(nonce, &[], &mut buffer, tag),
        };

        match verified {
            Ok(()) => Ok(buffer),
            Err(_) => Err(CipherError::Authentication),
        }
    }

    /// Parse a wire payload and decrypt it.
    pub fn open(&self, payload: &[u8]) -> CipherResult<Vec<u8>> {
        let payload = EncryptedPayload::parse(payload)?;
        self.decrypt(payload.nonce, payload.ciphertext, payload.tag)
    }

    /// Encrypt, returning ciphertext and detached tag.
    pub fn encrypt(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> CipherResult<(Vec<u8>, [u8; TAG_LEN])> {
        let nonce = Nonce::<U12>::from_slice(nonce);
        let mut buffer = plaintext.to_vec();

        let tag = match &self.engine {
            Engine128Or256::Aes128(c) => c.encrypt_in_place_detached(nonce, &[], &mut buffer),
            Engine128Or256::Aes256(c) => c.encrypt_in_place_detached(nonce, &[], &mut buffer),
        }
        .map_err(|_| CipherError::EncryptionFailed)?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(&tag);
        Ok((buffer, tag_bytes))
    }

    /// Encrypt into the wire layout.
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> CipherResult<Vec<u8>> {
        let (ciphertext, tag) = self.encrypt(nonce, plaintext)?;

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.extend_from_slice(nonce);
        out.extend_from_slice(&tag);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

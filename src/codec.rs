// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Payload encoding for storage at rest.
//!
//! Encoding is JSON, then optional zstd compression (feature
//! `compression`), then a [`PayloadCipher`]. Decoding reverses the steps
//! and detects compressed data by its magic bytes, so payloads written
//! before compression was enabled stay readable.
//!
//! Encryption itself is the host's business: the cipher is an opaque
//! seal/open pair. [`PlaintextCipher`] passes bytes through unchanged.
//!
//! # Example
//!
//! ```
//! use highlight_sync::codec::PayloadCodec;
//! use serde_json::json;
//!
//! let codec = PayloadCodec::plaintext();
//! let value = json!({"text": "こんにちは 👋"});
//! let bytes = codec.encode(&value).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap(), value);
//! ```

use serde_json::Value;
use std::sync::Arc;

/// Zstd frame magic (little-endian 0xFD2FB528)
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[cfg(feature = "compression")]
const COMPRESSION_LEVEL: i32 = 3;

/// Payloads smaller than this are not worth compressing.
#[cfg(feature = "compression")]
const MIN_COMPRESS_BYTES: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compress(String),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("payload is compressed but compression support is not enabled")]
    CompressionUnavailable,

    #[error("cipher failed: {0}")]
    Cipher(String),

    #[error("JSON codec failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CodecError> for crate::error::SyncError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Opaque encrypt/decrypt capability supplied by the host.
pub trait PayloadCipher: Send + Sync {
    fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Identity cipher.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextCipher;

impl PayloadCipher for PlaintextCipher {
    fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(plain.to_vec())
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(sealed.to_vec())
    }
}

#[must_use]
#[inline]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

#[derive(Clone)]
pub struct PayloadCodec {
    cipher: Arc<dyn PayloadCipher>,
    compress: bool,
}

impl PayloadCodec {
    pub fn new(cipher: Arc<dyn PayloadCipher>) -> Self {
        Self {
            cipher,
            compress: cfg!(feature = "compression"),
        }
    }

    #[must_use]
    pub fn plaintext() -> Self {
        Self::new(Arc::new(PlaintextCipher))
    }

    /// Turn compression off even when the feature is built in.
    #[must_use]
    pub fn without_compression(mut self) -> Self {
        self.compress = false;
        self
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let json = serde_json::to_vec(value)?;
        let packed = if self.compress {
            compress_bytes(json)?
        } else {
            json
        };
        self.cipher.seal(&packed)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Value, CodecError> {
        let packed = self.cipher.open(data)?;
        let json = if is_compressed(&packed) {
            decompress_bytes(&packed)?
        } else {
            packed
        };
        Ok(serde_json::from_slice(&json)?)
    }
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::plaintext()
    }
}

impl std::fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCodec")
            .field("compress", &self.compress)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "compression")]
fn compress_bytes(json: Vec<u8>) -> Result<Vec<u8>, CodecError> {
    if json.len() < MIN_COMPRESS_BYTES {
        return Ok(json);
    }
    zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
        .map_err(|e| CodecError::Compress(e.to_string()))
}

#[cfg(not(feature = "compression"))]
fn compress_bytes(json: Vec<u8>) -> Result<Vec<u8>, CodecError> {
    Ok(json)
}

#[cfg(feature = "compression")]
fn decompress_bytes(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    zstd::decode_all(data).map_err(|e| CodecError::Decompress(e.to_string()))
}

#[cfg(not(feature = "compression"))]
fn decompress_bytes(_data: &[u8]) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::CompressionUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// XOR "cipher" so tests can tell sealed bytes from plain ones.
    struct XorCipher(u8);

    impl PayloadCipher for XorCipher {
        fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
            Ok(plain.iter().map(|b| b ^ self.0).collect())
        }

        fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
            self.seal(sealed)
        }
    }

    #[test]
    fn test_unicode_round_trip_is_exact() {
        let codec = PayloadCodec::plaintext();
        let text = "日本語 中文 한국어 🎉👩‍👩‍👧 émoji — ünïcödé";
        let value = json!({"id": "hl-1", "text": text});

        let decoded = codec.decode(&codec.encode(&value).unwrap()).unwrap();

        assert_eq!(decoded["text"].as_str().unwrap().as_bytes(), text.as_bytes());
    }

    #[test]
    fn test_cipher_is_applied() {
        let codec = PayloadCodec::new(Arc::new(XorCipher(0x5A))).without_compression();
        let value = json!({"secret": "highlight"});

        let sealed = codec.encode(&value).unwrap();
        assert!(!sealed.windows(9).any(|w| w == b"highlight"));
        assert_eq!(codec.decode(&sealed).unwrap(), value);
    }

    #[test]
    fn test_plain_json_decodes() {
        let codec = PayloadCodec::plaintext();
        assert_eq!(codec.decode(br#"{"a":1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_garbage_is_an_error() {
        let codec = PayloadCodec::plaintext();
        assert!(matches!(codec.decode(b"\x00\x01not json"), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_magic_detection() {
        assert!(is_compressed(&[0x28, 0xB5, 0x2F, 0xFD, 0x00]));
        assert!(!is_compressed(b"{}"));
        assert!(!is_compressed(&[0x28, 0xB5]));
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_large_payload_is_compressed() {
        let codec = PayloadCodec::plaintext();
        let value = json!({"text": "repeat ".repeat(500)});

        let encoded = codec.encode(&value).unwrap();

        assert!(is_compressed(&encoded));
        assert!(encoded.len() < 500);
        assert_eq!(codec.decode(&encoded).unwrap(), value);
    }

    #[cfg(not(feature = "compression"))]
    #[test]
    fn test_compressed_input_without_feature() {
        let codec = PayloadCodec::plaintext();
        assert!(matches!(
            codec.decode(&[0x28, 0xB5, 0x2F, 0xFD, 0x01]),
            Err(CodecError::CompressionUnavailable)
        ));
    }
}

//! Persisted payload envelope.
//!
//! Every serialized session payload is wrapped in an envelope carrying a
//! schema version and a compression flag. Payloads above the configured
//! threshold are deflate-compressed and base64-carried.

use std::io::{Read, Write};

use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use mando_domain::error::{Error, Result};

/// Current envelope schema version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub schema_version: u32,
    pub compressed: bool,
    /// JSON text, or base64-encoded deflate bytes when `compressed`.
    pub payload: String,
}

impl Envelope {
    /// Wrap a JSON payload, compressing when it exceeds `threshold` bytes.
    pub fn seal(json: &str, threshold: usize) -> Result<Self> {
        if json.len() <= threshold {
            return Ok(Self {
                schema_version: SCHEMA_VERSION,
                compressed: false,
                payload: json.to_owned(),
            });
        }

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(json.as_bytes())
            .map_err(|e| Error::Store(format!("deflate failed: {e}")))?;
        let bytes = encoder
            .finish()
            .map_err(|e| Error::Store(format!("deflate failed: {e}")))?;

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            compressed: true,
            payload: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }

    /// Unwrap the payload back into JSON text.
    ///
    /// A payload flagged compressed that fails base64 or inflate is
    /// treated as uncompressed (corrupted-flag tolerance).
    pub fn open(&self) -> String {
        if !self.compressed {
            return self.payload.clone();
        }

        let bytes = match base64::engine::general_purpose::STANDARD.decode(&self.payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "envelope flagged compressed but not base64; using raw payload");
                return self.payload.clone();
            }
        };

        let mut decoder = DeflateDecoder::new(bytes.as_slice());
        let mut text = String::new();
        match decoder.read_to_string(&mut text) {
            Ok(_) => text,
            Err(e) => {
                tracing::warn!(error = %e, "envelope inflate failed; using raw payload");
                self.payload.clone()
            }
        }
    }

    /// Serialize the envelope itself for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

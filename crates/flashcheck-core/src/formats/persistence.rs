//! # Record Format
//!
//! Binary encoding for stored sessions and ledger records.
//!
//! Format: Header (5 bytes) + postcard-serialized payload.
//! - 4 bytes: Magic ("FCHK")
//! - 1 byte: Version
//!
//! The size limit and header are validated before the payload is parsed.

use crate::{FlashcheckError, primitives};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Header length in bytes.
const HEADER_LEN: usize = 5;

// =============================================================================
// RECORD HEADER
// =============================================================================

/// The header that precedes every stored record.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl RecordHeader {
    /// Create a new header with the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    /// Validate the header.
    pub fn validate(&self) -> Result<(), FlashcheckError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(FlashcheckError::Serialization(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(FlashcheckError::Serialization(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    /// Write header to bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    /// Read header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FlashcheckError> {
        if bytes.len() < HEADER_LEN {
            return Err(FlashcheckError::Serialization(
                "Header too short".to_string(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for RecordHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ENCODE / DECODE
// =============================================================================

/// Encode a value as header + payload.
pub fn encode_record<T: Serialize>(value: &T) -> Result<Vec<u8>, FlashcheckError> {
    let payload =
        postcard::to_stdvec(value).map_err(|e| FlashcheckError::Serialization(e.to_string()))?;
    if payload.len() + HEADER_LEN > primitives::MAX_RECORD_SIZE {
        return Err(FlashcheckError::Serialization(format!(
            "Record of {} bytes exceeds maximum {} bytes",
            payload.len() + HEADER_LEN,
            primitives::MAX_RECORD_SIZE
        )));
    }

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&RecordHeader::new().to_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode a value written by [`encode_record`].
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, FlashcheckError> {
    if bytes.len() > primitives::MAX_RECORD_SIZE {
        return Err(FlashcheckError::Serialization(format!(
            "Record of {} bytes exceeds maximum {} bytes",
            bytes.len(),
            primitives::MAX_RECORD_SIZE
        )));
    }

    let header = RecordHeader::from_bytes(bytes)?;
    header.validate()?;

    postcard::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
        FlashcheckError::Serialization(format!("Failed to decode record: {}", e))
    })
}

// =============================================================================
// TESTS
// =============================================================================

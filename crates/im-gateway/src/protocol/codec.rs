//! Frame codec
//!
//! Outbound: encode, then compress when the connection negotiated it.
//! Inbound is the exact inverse.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use im_common::WebSocketConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read, Write};

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("compress failed: {0}")]
    Compress(#[source] io::Error),

    #[error("decompress failed: {0}")]
    Decompress(#[source] io::Error),

    #[error("decompressed frame exceeds {0} bytes")]
    TooLarge(usize),
}

/// Envelope serialization
pub trait Encoder: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Stream compression applied to whole frames
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// JSON envelopes
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Gzip with a bound on the decompressed size
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: Compression,
    max_decompressed: usize,
}

impl GzipCompressor {
    #[must_use]
    pub fn new(max_decompressed: usize) -> Self {
        Self {
            level: Compression::default(),
            max_decompressed,
        }
    }
}

/// Bounded by the default transport frame limit
impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new(WebSocketConfig::default().max_message_size)
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), self.level);
        encoder.write_all(data).map_err(CodecError::Compress)?;
        encoder.finish().map_err(CodecError::Compress)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let limit = self.max_decompressed as u64;
        let mut out = Vec::with_capacity(data.len() * 2);
        GzDecoder::new(data)
            .take(limit + 1)
            .read_to_end(&mut out)
            .map_err(CodecError::Decompress)?;

        if out.len() as u64 > limit {
            return Err(CodecError::TooLarge(self.max_decompressed));
        }
        Ok(out)
    }
}

/// Encoder and compressor applied in a fixed order
#[derive(Debug, Clone, Default)]
pub struct Codec<E, C> {
    encoder: E,
    compressor: C,
}

/// The codec every connection uses
pub type GatewayCodec = Codec<JsonEncoder, GzipCompressor>;

impl<E: Encoder, C: Compressor> Codec<E, C> {
    pub fn new(encoder: E, compressor: C) -> Self {
        Self {
            encoder,
            compressor,
        }
    }

    /// Encode `value` and compress the result if `compress` is set
    pub fn encode_frame<T: Serialize>(&self, value: &T, compress: bool) -> Result<Vec<u8>, CodecError> {
        let encoded = self.encoder.encode(value)?;
        if compress {
            self.compressor.compress(&encoded)
        } else {
            Ok(encoded)
        }
    }

    /// Inverse of [`Codec::encode_frame`]
    pub fn decode_frame<T: DeserializeOwned>(&self, bytes: &[u8], compressed: bool) -> Result<T, CodecError> {
        if compressed {
            let raw = self.compressor.decompress(bytes)?;
            self.encoder.decode(&raw)
        } else {
            self.encoder.decode(bytes)
        }
    }

    pub fn compressor(&self) -> &C {
        &self.compressor
    }
}

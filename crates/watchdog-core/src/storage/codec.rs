//! Block encoding
//!
//! Every stored entry starts with a marker naming its encoding:
//! - `RAW:` followed by JSON
//! - `ZLIB:` followed by zlib-compressed JSON
//!
//! Entries without a marker predate the markers and hold a bare JSON
//! `[timestamp, value]` pair or a list of them.

use super::retention::AggregateBucket;
use super::StorageError;
use crate::models::Sample;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Deserialize;
use std::io::{Read, Write};

const RAW_MARKER: &[u8] = b"RAW:";
const ZLIB_MARKER: &[u8] = b"ZLIB:";

/// Compression policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// zlib level, 1 (fast) to 9 (best)
    pub level: u32,
    /// Payloads at or below this size are never compressed
    pub min_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: 6,
            min_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEncoding {
    Raw,
    Compressed,
    /// No marker; written before markers existed
    Legacy,
}

/// A persisted block in its storage representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub encoding: BlockEncoding,
    pub payload: Vec<u8>,
    /// Uncompressed payload size, 0 when read back compressed
    pub raw_len: usize,
}

impl StoredBlock {
    /// Bytes as written to the backing store
    pub fn to_bytes(&self) -> Vec<u8> {
        let marker: &[u8] = match self.encoding {
            BlockEncoding::Raw => RAW_MARKER,
            BlockEncoding::Compressed => ZLIB_MARKER,
            BlockEncoding::Legacy => &[],
        };
        let mut bytes = Vec::with_capacity(marker.len() + self.payload.len());
        bytes.extend_from_slice(marker);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        if let Some(payload) = bytes.strip_prefix(ZLIB_MARKER) {
            Self {
                encoding: BlockEncoding::Compressed,
                payload: payload.to_vec(),
                raw_len: 0,
            }
        } else if let Some(payload) = bytes.strip_prefix(RAW_MARKER) {
            Self {
                encoding: BlockEncoding::Raw,
                payload: payload.to_vec(),
                raw_len: payload.len(),
            }
        } else {
            Self {
                encoding: BlockEncoding::Legacy,
                payload: bytes.to_vec(),
                raw_len: bytes.len(),
            }
        }
    }

    /// Bytes saved by compression, 0 for raw blocks
    pub fn bytes_saved(&self) -> usize {
        match self.encoding {
            BlockEncoding::Compressed => self.raw_len.saturating_sub(self.payload.len()),
            _ => 0,
        }
    }

    /// The uncompressed payload
    pub fn decode_payload(&self) -> Result<Vec<u8>, StorageError> {
        match self.encoding {
            BlockEncoding::Raw | BlockEncoding::Legacy => Ok(self.payload.clone()),
            BlockEncoding::Compressed => {
                let mut decoder = ZlibDecoder::new(self.payload.as_slice());
                let mut raw = Vec::new();
                decoder
                    .read_to_end(&mut raw)
                    .map_err(|e| StorageError::Codec(format!("zlib: {e}")))?;
                Ok(raw)
            }
        }
    }
}

/// One sample or a run of samples, as `[timestamp, value]` pairs
///
/// Timestamps are read as floats so legacy fractional timestamps still decode.
#[derive(Deserialize)]
#[serde(untagged)]
enum SamplePayload {
    One((f64, f64)),
    Many(Vec<(f64, f64)>),
}

/// Encodes samples and aggregate buckets into stored blocks
#[derive(Debug, Clone, Default)]
pub struct BlockCodec {
    config: CompressionConfig,
}

impl BlockCodec {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Wrap a serialized payload, compressing only when it pays off
    pub fn compress(&self, raw: Vec<u8>) -> StoredBlock {
        let raw_len = raw.len();
        if !self.config.enabled || raw_len <= self.config.min_size {
            return StoredBlock {
                encoding: BlockEncoding::Raw,
                payload: raw,
                raw_len,
            };
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.config.level));
        let compressed = encoder.write_all(&raw).and_then(|_| encoder.finish());
        match compressed {
            Ok(compressed) if compressed.len() + ZLIB_MARKER.len() < raw_len + RAW_MARKER.len() => {
                StoredBlock {
                    encoding: BlockEncoding::Compressed,
                    payload: compressed,
                    raw_len,
                }
            }
            _ => StoredBlock {
                encoding: BlockEncoding::Raw,
                payload: raw,
                raw_len,
            },
        }
    }

    /// Encode a run of samples as one block
    pub fn encode_samples(&self, samples: &[Sample]) -> Result<StoredBlock, StorageError> {
        let pairs: Vec<(i64, f64)> = samples.iter().map(|s| (s.timestamp, s.value)).collect();
        let raw = serde_json::to_vec(&pairs).map_err(|e| StorageError::Codec(e.to_string()))?;
        Ok(self.compress(raw))
    }

    /// Encode one sample as a single `[timestamp, value]` entry
    pub fn encode_sample(&self, sample: &Sample) -> Result<StoredBlock, StorageError> {
        let raw = serde_json::to_vec(&(sample.timestamp, sample.value))
            .map_err(|e| StorageError::Codec(e.to_string()))?;
        Ok(self.compress(raw))
    }

    pub fn decode_samples(&self, bytes: &[u8]) -> Result<Vec<Sample>, StorageError> {
        let payload = StoredBlock::from_bytes(bytes).decode_payload()?;
        let parsed: SamplePayload = serde_json::from_slice(&payload)
            .map_err(|e| StorageError::Codec(format!("sample payload: {e}")))?;
        let pairs = match parsed {
            SamplePayload::One(pair) => vec![pair],
            SamplePayload::Many(pairs) => pairs,
        };
        Ok(pairs
            .into_iter()
            .map(|(timestamp, value)| Sample::new(timestamp as i64, value))
            .collect())
    }

    pub fn encode_aggregates(&self, buckets: &[AggregateBucket]) -> Result<StoredBlock, StorageError> {
        let raw = serde_json::to_vec(buckets).map_err(|e| StorageError::Codec(e.to_string()))?;
        Ok(self.compress(raw))
    }

    pub fn decode_aggregates(&self, bytes: &[u8]) -> Result<Vec<AggregateBucket>, StorageError> {
        let payload = StoredBlock::from_bytes(bytes).decode_payload()?;
        serde_json::from_slice(&payload)
            .map_err(|e| StorageError::Codec(format!("aggregate payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repetitive_samples(count: usize) -> Vec<Sample> {
        (0..count).map(|_| Sample::new(1000, 5.0)).collect()
    }

    #[test]
    fn test_repetitive_block_above_threshold_is_compressed() {
        let codec = BlockCodec::new(CompressionConfig::default());
        let samples = repetitive_samples(20);
        let raw_len = serde_json::to_vec(&samples.iter().map(|s| (s.timestamp, s.value)).collect::<Vec<_>>())
            .unwrap()
            .len();
        assert!(raw_len >= 200);

        let block = codec.encode_samples(&samples).unwrap();
        assert_eq!(block.encoding, BlockEncoding::Compressed);
        assert!(block.payload.len() < raw_len);
        assert_eq!(block.bytes_saved(), raw_len - block.payload.len());
        assert!(block.to_bytes().starts_with(b"ZLIB:"));
    }

    #[test]
    fn test_small_block_stays_raw() {
        let codec = BlockCodec::new(CompressionConfig::default());
        let samples = repetitive_samples(4);
        let block = codec.encode_samples(&samples).unwrap();
        assert!(block.payload.len() < 100);
        assert_eq!(block.encoding, BlockEncoding::Raw);
        assert!(block.to_bytes().starts_with(b"RAW:"));
    }

    #[test]
    fn test_incompressible_payload_stays_raw() {
        let codec = BlockCodec::new(CompressionConfig {
            min_size: 50,
            ..Default::default()
        });
        // Pseudo-random bytes do not shrink under zlib
        let mut state = 0x2545_f491_u32;
        let noise: Vec<u8> = (0..256)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state & 0xff) as u8
            })
            .collect();

        let block = codec.compress(noise.clone());
        assert_eq!(block.encoding, BlockEncoding::Raw);
        assert_eq!(block.payload, noise);
    }

    #[test]
    fn test_compression_disabled() {
        let codec = BlockCodec::new(CompressionConfig {
            enabled: false,
            ..Default::default()
        });
        let block = codec.encode_samples(&repetitive_samples(50)).unwrap();
        assert_eq!(block.encoding, BlockEncoding::Raw);
    }

    #[test]
    fn test_decode_both_encodings() {
        let codec = BlockCodec::default();
        let samples: Vec<Sample> = (0..40).map(|i| Sample::new(1_700_000_000 + i, 12.5)).collect();

        let compressed = codec.encode_samples(&samples).unwrap().to_bytes();
        assert_eq!(codec.decode_samples(&compressed).unwrap(), samples);

        let single = codec.encode_sample(&samples[0]).unwrap().to_bytes();
        assert_eq!(codec.decode_samples(&single).unwrap(), vec![samples[0]]);
    }

    #[test]
    fn test_legacy_entries_decode() {
        let codec = BlockCodec::default();
        assert_eq!(
            codec.decode_samples(b"[1700000000, 42]").unwrap(),
            vec![Sample::new(1_700_000_000, 42.0)]
        );
        assert_eq!(
            codec.decode_samples(b"[1700000000.0, 1.5]").unwrap(),
            vec![Sample::new(1_700_000_000, 1.5)]
        );
        assert!(codec.decode_samples(b"not a sample").is_err());
        assert!(codec.decode_samples(b"ZLIB:garbage").is_err());
    }
}

//! Tracking file codec
//!
//! JSON encoding of tracking records and of the top-level counter. Decoding detects the
//! record shape by looking for the format-version property in the raw text.

use crate::error::StorageError;
use crate::tracking::allocator::TopLevelConfig;
use crate::tracking::record::{
    LegacyTrackingRecord, TrackingRecord, TrackingRecordBase, FILE_FORMAT_VERSION,
    FILE_FORMAT_VERSION_PROPERTY,
};

pub struct ConfigCodec;

impl ConfigCodec {
    /// Encode a current-format record. The format version is always written.
    pub fn encode(record: &TrackingRecord) -> Result<Vec<u8>, StorageError> {
        if record.file_format_version == FILE_FORMAT_VERSION {
            return Ok(serde_json::to_vec_pretty(record)?);
        }
        let mut normalized = record.clone();
        normalized.file_format_version = FILE_FORMAT_VERSION;
        Ok(serde_json::to_vec_pretty(&normalized)?)
    }

    /// Encode either shape. Legacy records keep their legacy shape.
    pub fn encode_base(record: &TrackingRecordBase) -> Result<Vec<u8>, StorageError> {
        match record {
            TrackingRecordBase::Current(record) => Self::encode(record),
            TrackingRecordBase::Legacy(legacy) => Ok(serde_json::to_vec_pretty(legacy)?),
        }
    }

    /// Decode a tracking file.
    ///
    /// Content carrying the format-version property must be a valid current record;
    /// anything else is an error. Other content is tried as a legacy record, and `Ok(None)`
    /// means it is not one either.
    pub fn decode(bytes: &[u8]) -> Result<Option<TrackingRecordBase>, StorageError> {
        let content = String::from_utf8_lossy(bytes);
        let marker = format!("\"{}\"", FILE_FORMAT_VERSION_PROPERTY);
        if content.contains(&marker) {
            tracing::trace!("Parsing current tracking record format");
            let record: TrackingRecord = serde_json::from_str(&content)?;
            return Ok(Some(TrackingRecordBase::Current(record)));
        }

        tracing::trace!("Parsing legacy tracking record format");
        Ok(LegacyTrackingRecord::try_parse(&content).map(TrackingRecordBase::Legacy))
    }

    pub fn encode_top_level(config: &TopLevelConfig) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec_pretty(config)?)
    }

    /// Decode the counter file. JSON `null` counts as corrupt.
    pub fn decode_top_level(bytes: &[u8]) -> Result<TopLevelConfig, StorageError> {
        let config: Option<TopLevelConfig> = serde_json::from_slice(bytes)?;
        config.ok_or_else(|| {
            StorageError::Serialization("top-level tracking file contains null".to_string())
        })
    }
}

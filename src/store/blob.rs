// Metric values BLOB: [version: u8][payload].
// Version 1 = wincode Vec<Sample>, version 2 = JSON object of "timestamp": value.
// The prefix picks the decoder, so rows written under either setting stay readable.

use std::collections::BTreeMap;

use serde::Deserialize;
use wincode::{SchemaRead, SchemaWrite};

use crate::error::StoreError;

const BLOB_VERSION_WINCODE: u8 = 1;
const BLOB_VERSION_JSON: u8 = 2;

/// How metric values are serialized into the record table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueEncoding {
    #[default]
    Wincode,
    Json,
}

impl ValueEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wincode => "WINCODE",
            Self::Json => "JSON",
        }
    }
}

#[derive(Debug, Clone, Copy, SchemaRead, SchemaWrite)]
struct Sample {
    timestamp: i64,
    value: f64,
}

pub(super) fn encode_values(
    encoding: ValueEncoding,
    values: &BTreeMap<i64, f64>,
) -> Result<Vec<u8>, StoreError> {
    let (version, payload) = match encoding {
        ValueEncoding::Wincode => {
            let samples: Vec<Sample> = values
                .iter()
                .map(|(&timestamp, &value)| Sample { timestamp, value })
                .collect();
            let payload = wincode::serialize(&samples)
                .map_err(|e| StoreError::Codec(format!("wincode: {}", e)))?;
            (BLOB_VERSION_WINCODE, payload)
        }
        ValueEncoding::Json => {
            // JSON has no NaN or infinity; serde_json would write null and the row
            // could never be decoded again.
            if let Some((ts, v)) = values.iter().find(|(_, v)| !v.is_finite()) {
                return Err(StoreError::Codec(format!(
                    "json: non-finite value {} at {}",
                    v, ts
                )));
            }
            let payload = serde_json::to_vec(values)
                .map_err(|e| StoreError::Codec(format!("json: {}", e)))?;
            (BLOB_VERSION_JSON, payload)
        }
    };
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(version);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub(super) fn decode_values(bytes: &[u8]) -> Result<BTreeMap<i64, f64>, StoreError> {
    let Some((&version, payload)) = bytes.split_first() else {
        return Ok(BTreeMap::new());
    };
    match version {
        BLOB_VERSION_WINCODE => {
            let samples: Vec<Sample> = wincode::deserialize(payload)
                .map_err(|e| StoreError::Codec(format!("wincode: {}", e)))?;
            Ok(samples.into_iter().map(|s| (s.timestamp, s.value)).collect())
        }
        BLOB_VERSION_JSON => serde_json::from_slice(payload)
            .map_err(|e| StoreError::Codec(format!("json: {}", e))),
        other => Err(StoreError::Codec(format!(
            "unknown metric values blob version {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> BTreeMap<i64, f64> {
        BTreeMap::from([(1_000, 1.5), (2_000, -3.0), (3_000, 0.0)])
    }

    #[test]
    fn either_encoding_decodes_by_prefix() {
        for encoding in [ValueEncoding::Wincode, ValueEncoding::Json] {
            let blob = encode_values(encoding, &values()).unwrap();
            assert_eq!(decode_values(&blob).unwrap(), values());
        }
    }

    #[test]
    fn json_rejects_non_finite_values() {
        for bad in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let values = BTreeMap::from([(1_000, bad), (2_000, 1.0)]);
            let err = encode_values(ValueEncoding::Json, &values).unwrap_err();
            assert!(matches!(err, StoreError::Codec(_)));
        }
    }

    #[test]
    fn wincode_keeps_infinity() {
        let values = BTreeMap::from([(1_000, f64::INFINITY), (2_000, 1.0)]);
        let blob = encode_values(ValueEncoding::Wincode, &values).unwrap();
        assert_eq!(decode_values(&blob).unwrap(), values);
    }

    #[test]
    fn empty_blob_is_empty_map() {
        assert!(decode_values(&[]).unwrap().is_empty());
    }

    #[test]
    fn unknown_version_is_codec_error() {
        let err = decode_values(&[9, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }
}

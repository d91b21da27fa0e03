//! Built-in decoders for payloads the engine understands natively.

use super::{Asset, DecodeConfig, DecodeError, Decoder};
use crate::request::AssetKey;
use bytes::Bytes;

/// Parses the payload as JSON into a `serde_json::Value`.
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(
        &self,
        key: &AssetKey,
        bytes: &Bytes,
        _config: &DecodeConfig,
    ) -> Result<Asset, DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| DecodeError::new(format!("invalid JSON in {}: {}", key, e)))?;
        Ok(Asset::with_size(value, bytes.len()))
    }
}

/// Passes the payload through untouched as `Bytes`.
pub struct BinaryDecoder;

impl Decoder for BinaryDecoder {
    fn decode(
        &self,
        _key: &AssetKey,
        bytes: &Bytes,
        _config: &DecodeConfig,
    ) -> Result<Asset, DecodeError> {
        Ok(Asset::with_size(bytes.clone(), bytes.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_decoder_parses_object() {
        let bytes = Bytes::from_static(br#"{"level": 3, "name": "forest"}"#);
        let asset = JsonDecoder
            .decode(&"map.json".into(), &bytes, &DecodeConfig::default())
            .unwrap();
        let value = asset.downcast::<serde_json::Value>().unwrap();
        assert_eq!(value["level"], 3);
        assert_eq!(value["name"], "forest");
    }

    #[test]
    fn test_json_decoder_rejects_garbage() {
        let bytes = Bytes::from_static(b"not json at all");
        let err = JsonDecoder
            .decode(&"bad.json".into(), &bytes, &DecodeConfig::default())
            .unwrap_err();
        assert!(err.0.contains("invalid JSON"));
    }

    #[test]
    fn test_binary_decoder_passes_bytes_through() {
        let bytes = Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]);
        let asset = BinaryDecoder
            .decode(&"blob.bin".into(), &bytes, &DecodeConfig::default())
            .unwrap();
        let out = asset.downcast::<Bytes>().unwrap();
        assert_eq!(out.as_ref(), &bytes);
        assert_eq!(asset.size_hint(), Some(4));
    }
}

//! Decoding layer: turns downloaded bytes into typed assets.
//!
//! Decoders are looked up by [`AssetKind`] in a [`DecoderRegistry`], so new
//! asset types are added by registering a decoder rather than editing a
//! match arm in the pipeline. Audio is the exception: it travels through an
//! [`AudioTransport`] that fetches and decodes in one step.

mod builtin;

pub use builtin::{BinaryDecoder, JsonDecoder};

use crate::downloader::FetchError;
use crate::request::AssetKey;
use bytes::Bytes;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Kind of asset a request produces. Drives decoder lookup and, for
/// [`AssetKind::Audio`], routing through the audio transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Texture,
    Json,
    StructuredObject,
    Audio,
    Binary,
}

impl AssetKind {
    /// Parses the lowercase names used by manifests, the inverse of the
    /// `Display` form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "texture" => Some(AssetKind::Texture),
            "json" => Some(AssetKind::Json),
            "structured-object" => Some(AssetKind::StructuredObject),
            "audio" => Some(AssetKind::Audio),
            "binary" => Some(AssetKind::Binary),
            _ => None,
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetKind::Texture => "texture",
            AssetKind::Json => "json",
            AssetKind::StructuredObject => "structured-object",
            AssetKind::Audio => "audio",
            AssetKind::Binary => "binary",
        };
        f.write_str(s)
    }
}

/// Per-request decode options, passed through to the decoder untouched.
#[derive(Debug, Clone, Default)]
pub struct DecodeConfig {
    /// Requested texture dimensions, for decoders that resize on decode.
    pub texture_size: Option<(u32, u32)>,
    /// Container format hint for audio transports.
    pub audio_hint: Option<String>,
}

/// A decoded asset, shared between the cache and every waiter.
///
/// Opaque at the engine boundary; callers recover the concrete type with
/// [`Asset::downcast`]. Decoders that know the in-memory footprint attach
/// it with [`Asset::with_size`] so the cache can report byte totals.
#[derive(Clone)]
pub struct Asset {
    value: Arc<dyn Any + Send + Sync>,
    size: Option<usize>,
}

impl Asset {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            size: None,
        }
    }

    pub fn with_size<T: Any + Send + Sync>(value: T, size: usize) -> Self {
        Self {
            value: Arc::new(value),
            size: Some(size),
        }
    }

    /// Returns the asset as `Arc<T>` if it holds a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Approximate in-memory size, when the decoder reported one.
    pub fn size_hint(&self) -> Option<usize> {
        self.size
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(size) => write!(f, "Asset({} bytes)", size),
            None => f.write_str("Asset(..)"),
        }
    }
}

/// Error from a decoder rejecting a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Converts a downloaded payload into an [`Asset`].
///
/// Decoding is synchronous CPU work; the scheduler moves it onto the
/// blocking pool so it never stalls the dispatch loop.
pub trait Decoder: Send + Sync {
    fn decode(
        &self,
        key: &AssetKey,
        bytes: &Bytes,
        config: &DecodeConfig,
    ) -> Result<Asset, DecodeError>;
}

/// Lookup table from [`AssetKind`] to its decoder.
pub struct DecoderRegistry {
    decoders: HashMap<AssetKind, Arc<dyn Decoder>>,
}

impl DecoderRegistry {
    /// An empty registry. Every kind must be registered explicitly.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// A registry with the built-in decoders: JSON and structured objects
    /// through [`JsonDecoder`], raw payloads through [`BinaryDecoder`].
    /// Textures and audio have no default and must be supplied by the host.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(AssetKind::Json, Arc::new(JsonDecoder));
        registry.register(AssetKind::StructuredObject, Arc::new(JsonDecoder));
        registry.register(AssetKind::Binary, Arc::new(BinaryDecoder));
        registry
    }

    /// Registers a decoder for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: AssetKind, decoder: Arc<dyn Decoder>) {
        self.decoders.insert(kind, decoder);
    }

    pub fn get(&self, kind: AssetKind) -> Option<Arc<dyn Decoder>> {
        self.decoders.get(&kind).map(Arc::clone)
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// One-shot fetch-and-decode path for audio assets, mirroring transports
/// that produce a playable clip directly from the wire without exposing
/// intermediate bytes.
pub trait AudioTransport: Send + Sync + 'static {
    fn fetch_audio(
        &self,
        url: &str,
        config: &DecodeConfig,
    ) -> impl Future<Output = Result<Asset, FetchError>> + Send;
}

/// Default audio transport that rejects every request. Hosts that load
/// audio supply their own transport at scheduler construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAudioTransport;

impl AudioTransport for NoAudioTransport {
    async fn fetch_audio(&self, url: &str, _config: &DecodeConfig) -> Result<Asset, FetchError> {
        Err(FetchError::permanent(format!(
            "no audio transport configured for {}",
            url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_downcast_roundtrip() {
        let asset = Asset::new(String::from("hello"));
        let value = asset.downcast::<String>().unwrap();
        assert_eq!(*value, "hello");
        assert!(asset.downcast::<u32>().is_none());
    }

    #[test]
    fn test_registry_defaults_cover_json_and_binary() {
        let registry = DecoderRegistry::with_defaults();
        assert!(registry.get(AssetKind::Json).is_some());
        assert!(registry.get(AssetKind::StructuredObject).is_some());
        assert!(registry.get(AssetKind::Binary).is_some());
        assert!(registry.get(AssetKind::Texture).is_none());
        assert!(registry.get(AssetKind::Audio).is_none());
    }

    #[test]
    fn test_register_replaces_existing() {
        struct FixedDecoder;
        impl Decoder for FixedDecoder {
            fn decode(
                &self,
                _key: &AssetKey,
                _bytes: &Bytes,
                _config: &DecodeConfig,
            ) -> Result<Asset, DecodeError> {
                Ok(Asset::new(42u32))
            }
        }

        let mut registry = DecoderRegistry::with_defaults();
        registry.register(AssetKind::Json, Arc::new(FixedDecoder));
        let decoder = registry.get(AssetKind::Json).unwrap();
        let asset = decoder
            .decode(&"k".into(), &Bytes::from_static(b"ignored"), &DecodeConfig::default())
            .unwrap();
        assert_eq!(*asset.downcast::<u32>().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_no_audio_transport_rejects() {
        let transport = NoAudioTransport;
        let err = transport
            .fetch_audio("https://cdn.example.com/a.ogg", &DecodeConfig::default())
            .await
            .unwrap_err();
        assert!(!err.transient);
    }
}

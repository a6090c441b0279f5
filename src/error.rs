use thiserror::Error;

use crate::model::{PhotoId, VariantTier};

/// A photo that cannot take part in layout. The pass continues without it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayoutError {
    /// Aspect ratio is zero, negative or not a finite number.
    #[error("photo {id} has invalid aspect ratio {aspect_ratio}")]
    InvalidAspectRatio { id: PhotoId, aspect_ratio: f64 },
}

/// Problems fetching or decoding an image resource.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssetError {
    /// No variant tier carries a resource locator for this photo.
    #[error("photo {id} has no stored variants")]
    Missing { id: PhotoId },

    /// The resource was found but could not be decoded.
    #[error("failed to decode {tier} variant of {id} from {url}: {reason}")]
    Decode {
        id: PhotoId,
        tier: VariantTier,
        url: String,
        reason: String,
    },
}

/// Catalog Service failures. Every variant is treated as retryable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Request(String),

    #[error("invalid page token {0:?}")]
    BadToken(String),

    #[error("catalog source unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// A pagination fetch that kept failing after every retry was spent.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("page fetch failed after {attempts} attempt(s): {source}")]
pub struct NetworkError {
    pub attempts: u32,
    #[source]
    pub source: CatalogError,
}

/// Inconsistent input that the engine tolerates.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    /// The id is already held; the first occurrence wins.
    #[error("duplicate photo {id} dropped")]
    DuplicatePhoto { id: PhotoId },
}

/// Everything published on the gallery error stream. None of these are fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors returned by the `Gallery` handle itself.
#[derive(Debug, Error)]
pub enum GalleryError {
    /// The gallery task has stopped; the handle is no longer usable.
    #[error("gallery has been destroyed")]
    Closed,

    /// Invalid configuration passed to `Gallery::initialize`.
    #[error("invalid gallery configuration: {0:#}")]
    Config(anyhow::Error),

    /// The catalog refused the removal subscription.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

pub mod assets;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod gallery;
pub mod model;
pub mod processing {
    pub mod layout;
    pub mod variant;
}
pub mod tasks {
    pub mod decoder;
    pub mod gallery;
    pub mod manager;
    pub mod pager;
    pub mod viewport;
}

pub use assets::{AssetLoader, ImageAssetLoader, NullAssetLoader};
pub use catalog::{CatalogService, DirectoryCatalog, MemoryCatalog};
pub use config::Configuration;
pub use error::{EngineError, GalleryError};
pub use events::{LoadStatus, RenderUpdate, RowRange, TileVisible};
pub use gallery::{Container, Gallery};
pub use model::{PhotoId, PhotoSummary, VariantTier};
pub use processing::layout::{GalleryRow, LayoutOptions, RowFit, layout};
pub use processing::variant::{Resolved, VariantResolver};

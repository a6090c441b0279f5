use std::sync::Arc;

use serde::Serialize;

use crate::error::{CatalogError, NetworkError};
use crate::model::{CatalogPage, PageToken, PhotoId, PhotoSummary, VariantTier};
use crate::processing::layout::GalleryRow;
use crate::processing::variant::Resolved;

/// Host and API input to the gallery task.
#[derive(Debug, Clone)]
pub enum GalleryCommand {
    Append(Vec<PhotoSummary>),
    Remove(Vec<PhotoId>),
    ForceRelayout,
    Resize(f64),
    Scroll(f64),
    ViewportHeight(f64),
    DevicePixelRatio(f64),
    RetryPagination,
    /// Drop everything and restart pagination from the first page.
    Reset,
}

/// Gallery -> Pager: fetch one page on behalf of `sequence`.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub sequence: u64,
    pub token: Option<PageToken>,
}

/// Pager -> Gallery.
#[derive(Debug)]
pub struct PageResult {
    pub sequence: u64,
    pub outcome: Result<CatalogPage, NetworkError>,
}

/// Gallery -> Decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeRequest {
    pub id: PhotoId,
    pub tier: VariantTier,
    pub url: String,
}

/// Decoder -> Gallery.
#[derive(Debug)]
pub struct DecodeComplete {
    pub request: DecodeRequest,
    pub outcome: Result<(), String>,
}

/// Inclusive range of row indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowRange {
    pub start: usize,
    pub end: usize,
}

impl RowRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn contains(&self, row: usize) -> bool {
        self.start <= row && row <= self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

/// Row indices touched by one layout pass, relative to the new row list for
/// `added`/`changed` and to the old one for `removed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RowDiff {
    pub added: Vec<usize>,
    pub changed: Vec<usize>,
    pub removed: Vec<usize>,
}

impl RowDiff {
    /// Compares rows from `from` onward; rows before it are known to be equal.
    pub fn between(old: &[GalleryRow], new: &[GalleryRow], from: usize) -> Self {
        let mut diff = RowDiff::default();
        let shared = old.len().min(new.len());
        for idx in from..shared {
            if old[idx] != new[idx] {
                diff.changed.push(idx);
            }
        }
        diff.added.extend(shared.max(from)..new.len());
        diff.removed.extend(shared.max(from)..old.len());
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Rows of the new list that must be (re)rendered.
    pub fn touched(&self) -> impl Iterator<Item = usize> + '_ {
        self.changed.iter().chain(self.added.iter()).copied()
    }
}

/// Published after every layout pass that changed at least one row.
#[derive(Debug, Clone)]
pub struct RenderUpdate {
    pub rows: Arc<Vec<GalleryRow>>,
    pub diff: RowDiff,
}

/// A tile entered the visible range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileVisible {
    pub id: PhotoId,
    pub row: usize,
    pub width: f64,
    pub height: f64,
    pub asset: Resolved,
}

/// A requested variant finished decoding and can replace the placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetReady {
    pub id: PhotoId,
    pub tier: VariantTier,
    pub url: String,
}

/// Observable pagination state.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadStatus {
    Idle,
    Loading,
    /// Retries were exhausted; `Gallery::retry_pagination` starts over.
    RetryAvailable { attempts: u32, error: CatalogError },
    /// The catalog has no further pages.
    Exhausted,
}

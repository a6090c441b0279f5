//! Justified-row packing.
//!
//! `layout` is a single left-to-right fold over the photos in display order.
//! Rows close as soon as their width at the target height reaches the
//! container width; overcrowded rows shed their newest photo back onto the
//! pending queue. The fold carries no state across a closed row, so a layout
//! started at any row boundary reproduces the rows of a full pass from that
//! boundary onward.

use serde::Serialize;

use crate::error::LayoutError;
use crate::model::{PhotoId, PhotoSummary};

/// Maximum deviation between a justified row's filled width and the container.
pub const FILL_TOLERANCE_PX: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutItem {
    pub id: PhotoId,
    pub aspect_ratio: f64,
}

impl LayoutItem {
    pub fn new(id: impl Into<PhotoId>, aspect_ratio: f64) -> Self {
        Self {
            id: id.into(),
            aspect_ratio,
        }
    }
}

impl From<&PhotoSummary> for LayoutItem {
    fn from(photo: &PhotoSummary) -> Self {
        Self {
            id: photo.id.clone(),
            aspect_ratio: photo.aspect_ratio(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutOptions {
    pub container_width: f64,
    pub target_row_height: f64,
    pub min_row_height: f64,
    pub max_row_height: f64,
    /// Horizontal gap between tiles (also used between rows by the viewport).
    pub margin: f64,
    /// Always stretch the trailing row when it fits under `max_row_height`.
    pub justify_last_row: bool,
    /// Fraction of the container width a trailing row must reach at the
    /// target height before it is stretched.
    pub last_row_fill_threshold: f64,
}

/// How a row relates to the container width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowFit {
    /// Fills the container width within `FILL_TOLERANCE_PX`.
    Justified,
    /// Row bounds could not be met: either a lone photo too wide for
    /// `min_row_height`, fitted to the container width, or a set that would
    /// need more than `max_row_height`, pinned at the maximum and left-aligned.
    /// A lone photo's row can be shorter than `min_row_height`.
    Clamped,
    /// Underfull trailing row left at the target height.
    Trailing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub id: PhotoId,
    pub aspect_ratio: f64,
    /// Rendered width in CSS pixels; height is the row's `computed_height`.
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryRow {
    pub tiles: Vec<Tile>,
    pub computed_height: f64,
    pub justified: bool,
    pub fit: RowFit,
    pub container_width_at_computation: f64,
}

impl GalleryRow {
    fn build(items: &[&LayoutItem], height: f64, fit: RowFit, container_width: f64) -> Self {
        let tiles = items
            .iter()
            .map(|item| Tile {
                id: item.id.clone(),
                aspect_ratio: item.aspect_ratio,
                width: item.aspect_ratio * height,
            })
            .collect();
        Self {
            tiles,
            computed_height: height,
            justified: fit == RowFit::Justified,
            fit,
            container_width_at_computation: container_width,
        }
    }

    pub fn photo_ids(&self) -> impl Iterator<Item = &PhotoId> {
        self.tiles.iter().map(|tile| &tile.id)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tile widths plus the gaps between them.
    pub fn filled_width(&self, margin: f64) -> f64 {
        let tiles: f64 = self.tiles.iter().map(|tile| tile.width).sum();
        tiles + gaps(self.tiles.len(), margin)
    }

    /// True when the row was computed for a different container width.
    pub fn is_stale(&self, container_width: f64) -> bool {
        (self.container_width_at_computation - container_width).abs() > f64::EPSILON
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutOutcome {
    pub rows: Vec<GalleryRow>,
    /// Photos excluded from the pass, in input order.
    pub rejected: Vec<LayoutError>,
}

pub fn validate_aspect_ratio(id: &PhotoId, aspect_ratio: f64) -> Result<(), LayoutError> {
    if aspect_ratio.is_finite() && aspect_ratio > 0.0 {
        Ok(())
    } else {
        Err(LayoutError::InvalidAspectRatio {
            id: id.clone(),
            aspect_ratio,
        })
    }
}

fn gaps(count: usize, margin: f64) -> f64 {
    margin * count.saturating_sub(1) as f64
}

/// Height at which `count` photos with the given summed aspect ratio fill the
/// container exactly.
fn fitted_height(aspect_sum: f64, count: usize, opts: &LayoutOptions) -> f64 {
    (opts.container_width - gaps(count, opts.margin)) / aspect_sum
}

/// Packs `items` into rows for `opts.container_width`. Pure and deterministic.
///
/// A non-positive container width yields no rows; invalid items are still
/// reported.
pub fn layout(items: &[LayoutItem], opts: &LayoutOptions) -> LayoutOutcome {
    let mut outcome = LayoutOutcome::default();
    let mut pending: Vec<&LayoutItem> = Vec::with_capacity(items.len());
    for item in items {
        match validate_aspect_ratio(&item.id, item.aspect_ratio) {
            Ok(()) => pending.push(item),
            Err(err) => outcome.rejected.push(err),
        }
    }
    if !(opts.container_width > 0.0) || pending.is_empty() {
        return outcome;
    }

    let target = opts.target_row_height;
    let mut row: Vec<&LayoutItem> = Vec::new();
    let mut aspect_sum = 0.0;
    let mut next = 0;

    while next < pending.len() {
        let item = pending[next];
        next += 1;
        row.push(item);
        aspect_sum += item.aspect_ratio;

        let row_width = aspect_sum * target + gaps(row.len(), opts.margin);
        if row_width < opts.container_width {
            continue;
        }

        let mut height = fitted_height(aspect_sum, row.len(), opts);
        // Overcrowded: hand the newest photo back to the queue until the row
        // is tall enough or only one photo remains.
        while height < opts.min_row_height && row.len() > 1 {
            if let Some(shed) = row.pop() {
                aspect_sum -= shed.aspect_ratio;
                next -= 1;
            }
            height = fitted_height(aspect_sum, row.len(), opts);
        }

        let closed = if height < opts.min_row_height {
            // Lone panorama: fit it to the container instead of overflowing.
            GalleryRow::build(&row, height, RowFit::Clamped, opts.container_width)
        } else if height > opts.max_row_height {
            GalleryRow::build(
                &row,
                opts.max_row_height,
                RowFit::Clamped,
                opts.container_width,
            )
        } else {
            GalleryRow::build(&row, height, RowFit::Justified, opts.container_width)
        };
        outcome.rows.push(closed);
        row.clear();
        aspect_sum = 0.0;
    }

    if !row.is_empty() {
        outcome.rows.push(trailing_row(&row, aspect_sum, opts));
    }
    outcome
}

fn trailing_row(row: &[&LayoutItem], aspect_sum: f64, opts: &LayoutOptions) -> GalleryRow {
    let unscaled = aspect_sum * opts.target_row_height + gaps(row.len(), opts.margin);
    let wants_stretch = opts.justify_last_row
        || unscaled >= opts.container_width * opts.last_row_fill_threshold;
    if wants_stretch {
        let height = fitted_height(aspect_sum, row.len(), opts);
        if height <= opts.max_row_height {
            return GalleryRow::build(row, height, RowFit::Justified, opts.container_width);
        }
        if opts.justify_last_row {
            return GalleryRow::build(
                row,
                opts.max_row_height,
                RowFit::Clamped,
                opts.container_width,
            );
        }
    }
    GalleryRow::build(
        row,
        opts.target_row_height,
        RowFit::Trailing,
        opts.container_width,
    )
}

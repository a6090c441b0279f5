use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::error::{EngineError, StateError};
use crate::events::RowDiff;
use crate::model::{PhotoId, PhotoSummary};
use crate::processing::layout::{self, GalleryRow, LayoutItem, LayoutOptions};

/// Outcome of a mutation: what to re-render and what to report.
#[derive(Debug, Default)]
pub struct Applied {
    pub diff: RowDiff,
    pub errors: Vec<EngineError>,
}

#[derive(Debug, Clone, Copy)]
struct PendingResize {
    width: f64,
    deadline: Instant,
}

/// Owns the live photo list and the row list derived from it.
///
/// Rules:
/// - Photos are held in `ordinal` order; equal ordinals keep arrival order.
/// - Ids are unique; the first occurrence wins.
/// - Invisible entries and photos with an unusable aspect ratio never reach
///   layout. Each rejected id is reported once.
/// - Appends and removals recompute rows from the first affected row onward;
///   earlier rows are kept as-is.
/// - Container resizes are debounced and then trigger a full relayout.
/// - Row lists are replaced wholesale, never edited in place.
pub struct UpdateManager {
    options: LayoutOptions,
    debounce: Duration,
    photos: Vec<Arc<PhotoSummary>>,
    index: HashMap<PhotoId, Arc<PhotoSummary>>,
    rejected: HashSet<PhotoId>,
    rows: Arc<Vec<GalleryRow>>,
    /// Photo index at which each row starts.
    row_starts: Vec<usize>,
    pending_resize: Option<PendingResize>,
}

impl UpdateManager {
    pub fn new(config: &Configuration, container_width: f64) -> Self {
        Self {
            options: config.layout_options(container_width),
            debounce: config.resize_debounce(),
            photos: Vec::new(),
            index: HashMap::new(),
            rejected: HashSet::new(),
            rows: Arc::new(Vec::new()),
            row_starts: Vec::new(),
            pending_resize: None,
        }
    }

    pub fn rows(&self) -> &Arc<Vec<GalleryRow>> {
        &self.rows
    }

    pub fn photos(&self) -> impl Iterator<Item = &PhotoSummary> {
        self.photos.iter().map(|photo| photo.as_ref())
    }

    pub fn photo(&self, id: &PhotoId) -> Option<&PhotoSummary> {
        self.index.get(id).map(|photo| photo.as_ref())
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    pub fn container_width(&self) -> f64 {
        self.options.container_width
    }

    pub fn margin(&self) -> f64 {
        self.options.margin
    }

    pub fn append(&mut self, incoming: Vec<PhotoSummary>) -> Applied {
        let mut errors = Vec::new();
        let mut first_changed: Option<usize> = None;
        let mut accepted = 0usize;

        for photo in incoming {
            if !photo.visible {
                debug!(id = %photo.id, "skipping invisible photo");
                continue;
            }
            if self.index.contains_key(&photo.id) {
                warn!(id = %photo.id, "duplicate photo dropped; keeping first occurrence");
                errors.push(StateError::DuplicatePhoto { id: photo.id }.into());
                continue;
            }
            if let Err(err) = layout::validate_aspect_ratio(&photo.id, photo.aspect_ratio()) {
                if self.rejected.insert(photo.id.clone()) {
                    warn!(id = %photo.id, width = photo.width, height = photo.height, "photo excluded from layout");
                    errors.push(err.into());
                }
                continue;
            }

            let pos = self
                .photos
                .partition_point(|held| held.ordinal <= photo.ordinal);
            let photo = Arc::new(photo);
            self.index.insert(photo.id.clone(), Arc::clone(&photo));
            self.photos.insert(pos, photo);
            first_changed = Some(first_changed.map_or(pos, |first| first.min(pos)));
            accepted += 1;
        }

        let diff = match first_changed {
            Some(pos) => self.relayout_from(self.first_affected_row(pos)),
            None => RowDiff::default(),
        };
        debug!(
            accepted,
            total = self.photos.len(),
            rows = self.rows.len(),
            "append applied"
        );
        Applied { diff, errors }
    }

    pub fn remove(&mut self, ids: &[PhotoId]) -> Applied {
        let doomed: HashSet<&PhotoId> = ids
            .iter()
            .filter(|id| self.index.contains_key(*id))
            .collect();
        if doomed.is_empty() {
            debug!(requested = ids.len(), "remove ignored; no held photos matched");
            return Applied::default();
        }

        let first_removed = self
            .photos
            .iter()
            .position(|photo| doomed.contains(&photo.id))
            .unwrap_or(self.photos.len());
        let start_row = self.first_affected_row(first_removed);
        self.photos.retain(|photo| !doomed.contains(&photo.id));
        for id in &doomed {
            self.index.remove(*id);
        }

        let removed = doomed.len();
        let diff = self.relayout_from(start_row);
        debug!(removed, total = self.photos.len(), "remove applied");
        Applied {
            diff,
            errors: Vec::new(),
        }
    }

    /// Drops every photo and row.
    pub fn clear(&mut self) -> RowDiff {
        self.photos.clear();
        self.index.clear();
        self.rejected.clear();
        self.pending_resize = None;
        self.install(Vec::new(), 0)
    }

    /// Records a new container width; the relayout happens in `poll_resize`
    /// once no further resize arrived for the debounce period.
    pub fn on_container_resize(&mut self, width: f64, now: Instant) {
        if !(width.is_finite() && width > 0.0) {
            warn!(width, "ignoring non-positive container width");
            return;
        }
        self.pending_resize = Some(PendingResize {
            width,
            deadline: now + self.debounce,
        });
    }

    pub fn resize_deadline(&self) -> Option<Instant> {
        self.pending_resize.map(|pending| pending.deadline)
    }

    pub fn poll_resize(&mut self, now: Instant) -> Option<RowDiff> {
        let pending = self.pending_resize?;
        if now < pending.deadline {
            return None;
        }
        self.pending_resize = None;
        if pending.width == self.options.container_width {
            debug!(width = pending.width, "resize settled at the current width");
            return None;
        }
        info!(
            from = self.options.container_width,
            to = pending.width,
            "container resized; full relayout"
        );
        self.options.container_width = pending.width;
        Some(self.relayout())
    }

    /// Full recomputation of every row.
    pub fn relayout(&mut self) -> RowDiff {
        self.relayout_from(0)
    }

    /// Row whose closing decision may depend on the photo at `pos`. A row
    /// looks one photo past its end before closing, so the row holding the
    /// preceding photo is the first that can change.
    fn first_affected_row(&self, pos: usize) -> usize {
        let probe = pos.saturating_sub(1);
        self.row_starts
            .partition_point(|start| *start <= probe)
            .saturating_sub(1)
    }

    fn relayout_from(&mut self, row: usize) -> RowDiff {
        let row = row.min(self.rows.len());
        // Past the last row only happens when there are no rows at all.
        let start = self.row_starts.get(row).copied().unwrap_or(0);
        let items: Vec<LayoutItem> = self.photos[start..]
            .iter()
            .map(|photo| LayoutItem::from(photo.as_ref()))
            .collect();
        let outcome = layout::layout(&items, &self.options);
        debug_assert!(outcome.rejected.is_empty());

        let mut rows = Vec::with_capacity(row + outcome.rows.len());
        rows.extend_from_slice(&self.rows[..row]);
        rows.extend(outcome.rows);
        self.install(rows, row)
    }

    fn install(&mut self, rows: Vec<GalleryRow>, from: usize) -> RowDiff {
        let diff = RowDiff::between(&self.rows, &rows, from);
        let mut starts = Vec::with_capacity(rows.len());
        let mut next = 0;
        for row in &rows {
            starts.push(next);
            next += row.len();
        }
        self.row_starts = starts;
        self.rows = Arc::new(rows);
        diff
    }
}

use std::collections::HashMap;

use tracing::debug;

use crate::config::Configuration;
use crate::error::CatalogError;
use crate::events::{DecodeRequest, LoadStatus, RowDiff, RowRange};
use crate::model::{CatalogPage, PageToken, PhotoId, PhotoSummary, VariantTier};
use crate::processing::layout::GalleryRow;
use crate::processing::variant::{Resolved, VariantResolver};

/// Snapshot of what the host is showing. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pub container_width: f64,
    pub viewport_height: f64,
    pub scroll_offset: f64,
    pub visible_row_range: Option<RowRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Forward,
    Backward,
}

/// Tracks row geometry against the scroll position.
///
/// Row tops are kept as prefix sums of row heights plus the row gap, so
/// visibility lookups are binary searches.
pub struct ViewportCoordinator {
    row_gap: f64,
    preload_row_margin: usize,
    trigger_distance: f64,
    viewport_height: f64,
    scroll_offset: f64,
    direction: ScrollDirection,
    device_pixel_ratio: f64,
    /// `tops[i]` is the top of row `i`; the final entry is the content height
    /// plus one trailing gap.
    tops: Vec<f64>,
    visible: Option<RowRange>,
    /// Largest tier already submitted for decoding, per photo.
    requested: HashMap<PhotoId, VariantTier>,
}

impl ViewportCoordinator {
    pub fn new(config: &Configuration, viewport_height: f64, device_pixel_ratio: f64) -> Self {
        Self {
            row_gap: config.margin,
            preload_row_margin: config.preload_row_margin,
            trigger_distance: config.pagination_trigger_distance,
            viewport_height: viewport_height.max(0.0),
            scroll_offset: 0.0,
            direction: ScrollDirection::Forward,
            device_pixel_ratio,
            tops: vec![0.0],
            visible: None,
            requested: HashMap::new(),
        }
    }

    pub fn state(&self, container_width: f64) -> ViewportState {
        ViewportState {
            container_width,
            viewport_height: self.viewport_height,
            scroll_offset: self.scroll_offset,
            visible_row_range: self.visible,
        }
    }

    pub fn direction(&self) -> ScrollDirection {
        self.direction
    }

    pub fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }

    pub fn set_device_pixel_ratio(&mut self, dpr: f64) {
        self.device_pixel_ratio = dpr;
    }

    pub fn content_height(&self) -> f64 {
        let rows = self.tops.len() - 1;
        if rows == 0 {
            0.0
        } else {
            self.tops[rows] - self.row_gap
        }
    }

    pub fn row_top(&self, row: usize) -> Option<f64> {
        (row + 1 < self.tops.len()).then(|| self.tops[row])
    }

    /// Installs a new row list. Returns the visible rows whose content
    /// changed, which have to be announced again.
    pub fn set_rows(&mut self, rows: &[GalleryRow], diff: &RowDiff) -> Vec<RowRange> {
        let mut tops = Vec::with_capacity(rows.len() + 1);
        let mut top = 0.0;
        tops.push(top);
        for row in rows {
            top += row.computed_height + self.row_gap;
            tops.push(top);
        }
        self.tops = tops;

        let previous = self.visible;
        self.visible = self.compute_visible();
        let mut entering = newly_visible(previous, self.visible);
        if let Some(visible) = self.visible {
            for row in diff.touched().filter(|row| visible.contains(*row)) {
                if !entering.iter().any(|range| range.contains(row)) {
                    entering.push(RowRange::new(row, row));
                }
            }
        }
        entering.sort_by_key(|range| range.start);
        entering
    }

    /// Moves the viewport. Returns row ranges that just came into view.
    pub fn scroll_to(&mut self, offset: f64) -> Vec<RowRange> {
        let offset = if offset.is_finite() { offset.max(0.0) } else { 0.0 };
        if offset > self.scroll_offset {
            self.direction = ScrollDirection::Forward;
        } else if offset < self.scroll_offset {
            self.direction = ScrollDirection::Backward;
        }
        self.scroll_offset = offset;
        self.refresh_visible()
    }

    pub fn set_viewport_height(&mut self, height: f64) -> Vec<RowRange> {
        self.viewport_height = if height.is_finite() { height.max(0.0) } else { 0.0 };
        self.refresh_visible()
    }

    fn refresh_visible(&mut self) -> Vec<RowRange> {
        let previous = self.visible;
        self.visible = self.compute_visible();
        newly_visible(previous, self.visible)
    }

    pub fn visible_range(&self) -> Option<RowRange> {
        self.visible
    }

    fn compute_visible(&self) -> Option<RowRange> {
        let rows = self.tops.len() - 1;
        if rows == 0 {
            return None;
        }
        let top = self.scroll_offset;
        let bottom = self.scroll_offset + self.viewport_height;
        // First row whose bottom edge is below the viewport top.
        let first = self.tops[1..].partition_point(|next_top| next_top - self.row_gap <= top);
        if first >= rows {
            return None;
        }
        // Rows whose top edge is above the viewport bottom.
        let past_last = self.tops[..rows].partition_point(|row_top| *row_top < bottom);
        let last = past_last.max(first + 1) - 1;
        Some(RowRange::new(first, last))
    }

    /// Visible rows extended by the preload margin in scroll direction.
    pub fn preload_range(&self) -> Option<RowRange> {
        let visible = self.visible?;
        let rows = self.tops.len() - 1;
        let range = match self.direction {
            ScrollDirection::Forward => RowRange::new(
                visible.start,
                (visible.end + self.preload_row_margin).min(rows - 1),
            ),
            ScrollDirection::Backward => RowRange::new(
                visible.start.saturating_sub(self.preload_row_margin),
                visible.end,
            ),
        };
        Some(range)
    }

    /// True when the content left below the viewport is within the trigger
    /// distance, so the next page should be requested.
    pub fn wants_next_page(&self) -> bool {
        let remaining = self.content_height() - (self.scroll_offset + self.viewport_height);
        remaining <= self.trigger_distance * self.viewport_height
    }

    /// Resolves every tile in the preload range and returns decode requests
    /// for tiles whose sufficient tier grew past what was already requested.
    pub fn warm<'a>(
        &mut self,
        rows: &[GalleryRow],
        lookup: impl Fn(&PhotoId) -> Option<&'a PhotoSummary>,
        resolver: &VariantResolver,
    ) -> Vec<DecodeRequest> {
        let Some(range) = self.preload_range() else {
            return Vec::new();
        };
        let mut requests = Vec::new();
        for row in range.iter().filter_map(|idx| rows.get(idx)) {
            for tile in &row.tiles {
                let Some(photo) = lookup(&tile.id) else {
                    continue;
                };
                let Resolved::Variant { tier, url } =
                    resolver.resolve(photo, tile.width, self.device_pixel_ratio)
                else {
                    continue;
                };
                let upgrade = match self.requested.get(&tile.id) {
                    Some(held) => tier > *held,
                    None => true,
                };
                if upgrade {
                    self.requested.insert(tile.id.clone(), tier);
                    requests.push(DecodeRequest {
                        id: tile.id.clone(),
                        tier,
                        url,
                    });
                }
            }
        }
        if !requests.is_empty() {
            debug!(?range, requests = requests.len(), "warming variants");
        }
        requests
    }

    pub fn forget(&mut self, ids: &[PhotoId]) {
        for id in ids {
            self.requested.remove(id);
        }
    }

    pub fn reset(&mut self) {
        self.scroll_offset = 0.0;
        self.direction = ScrollDirection::Forward;
        self.tops = vec![0.0];
        self.visible = None;
        self.requested.clear();
    }
}

/// Parts of `current` not covered by `previous`.
fn newly_visible(previous: Option<RowRange>, current: Option<RowRange>) -> Vec<RowRange> {
    let Some(current) = current else {
        return Vec::new();
    };
    let Some(previous) = previous else {
        return vec![current];
    };
    if current.end < previous.start || current.start > previous.end {
        return vec![current];
    }
    let mut ranges = Vec::new();
    if current.start < previous.start {
        ranges.push(RowRange::new(current.start, previous.start - 1));
    }
    if current.end > previous.end {
        ranges.push(RowRange::new(previous.end + 1, current.end));
    }
    ranges
}

/// A fetch the coordinator decided to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub sequence: u64,
    pub token: Option<PageToken>,
}

/// Pagination bookkeeping: one fetch in flight, stale responses dropped.
#[derive(Debug, Clone)]
pub struct LoadState {
    next_page_token: Option<PageToken>,
    in_flight: bool,
    request_sequence: u64,
    exhausted: bool,
    status: LoadStatus,
}

impl Default for LoadState {
    fn default() -> Self {
        Self {
            next_page_token: None,
            in_flight: false,
            request_sequence: 0,
            exhausted: false,
            status: LoadStatus::Idle,
        }
    }
}

impl LoadState {
    pub fn status(&self) -> &LoadStatus {
        &self.status
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn request_sequence(&self) -> u64 {
        self.request_sequence
    }

    pub fn next_page_token(&self) -> Option<&PageToken> {
        self.next_page_token.as_ref()
    }

    /// Issues a ticket unless a fetch is outstanding, the catalog is
    /// exhausted, or a failed fetch is waiting for an explicit retry.
    pub fn begin_fetch(&mut self) -> Option<FetchTicket> {
        if self.in_flight
            || self.exhausted
            || matches!(self.status, LoadStatus::RetryAvailable { .. })
        {
            return None;
        }
        self.request_sequence += 1;
        self.in_flight = true;
        self.status = LoadStatus::Loading;
        Some(FetchTicket {
            sequence: self.request_sequence,
            token: self.next_page_token.clone(),
        })
    }

    /// Accepts a page for `sequence`. Returns `None` for stale responses,
    /// which leave the state untouched.
    pub fn complete(&mut self, sequence: u64, page: CatalogPage) -> Option<Vec<PhotoSummary>> {
        if sequence != self.request_sequence {
            debug!(
                sequence,
                current = self.request_sequence,
                "discarding stale page"
            );
            return None;
        }
        self.in_flight = false;
        self.next_page_token = page.next_page_token;
        if self.next_page_token.is_none() {
            self.exhausted = true;
            self.status = LoadStatus::Exhausted;
        } else {
            self.status = LoadStatus::Idle;
        }
        Some(page.photos)
    }

    /// Records a fetch whose retries ran out. Returns false for stale failures.
    pub fn fail(&mut self, sequence: u64, attempts: u32, error: CatalogError) -> bool {
        if sequence != self.request_sequence {
            debug!(sequence, "discarding stale fetch failure");
            return false;
        }
        self.in_flight = false;
        self.status = LoadStatus::RetryAvailable { attempts, error };
        true
    }

    /// Clears a retry-available failure and issues a fresh ticket.
    pub fn retry(&mut self) -> Option<FetchTicket> {
        if matches!(self.status, LoadStatus::RetryAvailable { .. }) {
            self.status = LoadStatus::Idle;
        }
        self.begin_fetch()
    }

    /// Forgets pagination progress; any outstanding response becomes stale.
    pub fn reset(&mut self) {
        self.request_sequence += 1;
        self.next_page_token = None;
        self.in_flight = false;
        self.exhausted = false;
        self.status = LoadStatus::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::layout::{RowFit, Tile};

    fn rows(heights: &[f64]) -> Vec<GalleryRow> {
        heights
            .iter()
            .enumerate()
            .map(|(idx, h)| GalleryRow {
                tiles: vec![Tile {
                    id: format!("p{idx}").into(),
                    aspect_ratio: 1.0,
                    width: *h,
                }],
                computed_height: *h,
                justified: true,
                fit: RowFit::Justified,
                container_width_at_computation: 900.0,
            })
            .collect()
    }

    fn coordinator(viewport_height: f64) -> ViewportCoordinator {
        ViewportCoordinator::new(&Configuration::default(), viewport_height, 1.0)
    }

    fn page(ids: &[&str], next: Option<&str>) -> CatalogPage {
        CatalogPage {
            photos: ids
                .iter()
                .enumerate()
                .map(|(idx, id)| PhotoSummary::new(*id, 100, 100, idx as u64))
                .collect(),
            next_page_token: next.map(|t| PageToken(t.into())),
        }
    }

    #[test]
    fn visible_range_follows_scroll() {
        // Rows are 200px tall with a 10px gap: tops at 0, 210, 420, ...
        let mut vp = coordinator(400.0);
        let entering = vp.set_rows(&rows(&[200.0; 10]), &RowDiff::default());
        assert_eq!(entering, vec![RowRange::new(0, 1)]);
        assert_eq!(vp.visible_range(), Some(RowRange::new(0, 1)));

        let entering = vp.scroll_to(300.0);
        assert_eq!(vp.visible_range(), Some(RowRange::new(1, 3)));
        assert_eq!(entering, vec![RowRange::new(2, 3)]);
        assert_eq!(vp.direction(), ScrollDirection::Forward);

        let entering = vp.scroll_to(0.0);
        assert_eq!(entering, vec![RowRange::new(0, 0)]);
        assert_eq!(vp.direction(), ScrollDirection::Backward);
    }

    #[test]
    fn preload_extends_in_scroll_direction() {
        let mut vp = coordinator(400.0);
        vp.set_rows(&rows(&[200.0; 10]), &RowDiff::default());
        vp.scroll_to(1050.0);
        assert_eq!(vp.visible_range(), Some(RowRange::new(5, 6)));
        assert_eq!(vp.preload_range(), Some(RowRange::new(5, 8)));
        vp.scroll_to(840.0);
        assert_eq!(vp.visible_range(), Some(RowRange::new(4, 5)));
        assert_eq!(vp.preload_range(), Some(RowRange::new(2, 5)));
    }

    #[test]
    fn next_page_wanted_near_the_end() {
        let mut vp = coordinator(400.0);
        vp.set_rows(&rows(&[200.0; 10]), &RowDiff::default());
        // Content height: 10 * 210 - 10 = 2090.
        assert_eq!(vp.content_height(), 2090.0);
        assert!(!vp.wants_next_page());
        vp.scroll_to(1200.0);
        assert!(!vp.wants_next_page());
        vp.scroll_to(1290.0);
        assert!(vp.wants_next_page());
    }

    #[test]
    fn empty_gallery_wants_a_page() {
        let vp = coordinator(400.0);
        assert!(vp.wants_next_page());
    }

    #[test]
    fn changed_visible_rows_are_announced_again() {
        let mut vp = coordinator(400.0);
        vp.set_rows(&rows(&[200.0; 4]), &RowDiff::default());
        let diff = RowDiff {
            changed: vec![1, 3],
            ..RowDiff::default()
        };
        let entering = vp.set_rows(&rows(&[200.0; 4]), &diff);
        assert_eq!(entering, vec![RowRange::new(1, 1)]);
    }

    #[test]
    fn warm_requests_only_upgrades() {
        let mut vp = coordinator(400.0);
        let layout = rows(&[200.0; 3]);
        vp.set_rows(&layout, &RowDiff::default());
        let photos: HashMap<PhotoId, PhotoSummary> = (0..3)
            .map(|idx| {
                let photo = PhotoSummary::new(format!("p{idx}"), 4000, 4000, idx)
                    .with_variant(VariantTier::Thumb, format!("t{idx}"))
                    .with_variant(VariantTier::Large, format!("l{idx}"));
                (photo.id.clone(), photo)
            })
            .collect();
        let resolver = VariantResolver::default();

        let first = vp.warm(&layout, |id| photos.get(id), &resolver);
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|req| req.tier == VariantTier::Thumb));
        assert!(vp.warm(&layout, |id| photos.get(id), &resolver).is_empty());

        vp.set_device_pixel_ratio(3.0);
        let upgrades = vp.warm(&layout, |id| photos.get(id), &resolver);
        assert_eq!(upgrades.len(), 3);
        assert!(upgrades.iter().all(|req| req.tier == VariantTier::Large));

        vp.set_device_pixel_ratio(1.0);
        assert!(vp.warm(&layout, |id| photos.get(id), &resolver).is_empty());
    }

    #[test]
    fn only_one_fetch_in_flight() {
        let mut load = LoadState::default();
        let ticket = load.begin_fetch().expect("first fetch");
        assert_eq!(ticket.sequence, 1);
        assert!(load.begin_fetch().is_none());
        assert!(load.begin_fetch().is_none());
        assert!(load.complete(1, page(&["a"], Some("n1"))).is_some());
        let next = load.begin_fetch().expect("second fetch");
        assert_eq!(next.token, Some(PageToken("n1".into())));
    }

    #[test]
    fn stale_pages_are_discarded() {
        let mut load = LoadState::default();
        let old = load.begin_fetch().expect("fetch");
        load.reset();
        let fresh = load.begin_fetch().expect("fetch after reset");
        assert!(fresh.sequence > old.sequence);
        assert!(fresh.token.is_none());

        assert!(load.complete(old.sequence, page(&["old"], Some("x"))).is_none());
        assert!(load.in_flight());
        let photos = load.complete(fresh.sequence, page(&["new"], None)).expect("fresh page");
        assert_eq!(photos[0].id.as_str(), "new");
        assert_eq!(load.status(), &LoadStatus::Exhausted);
        assert!(load.begin_fetch().is_none());
    }

    #[test]
    fn failures_wait_for_an_explicit_retry() {
        let mut load = LoadState::default();
        let ticket = load.begin_fetch().expect("fetch");
        assert!(load.fail(ticket.sequence, 3, CatalogError::Request("boom".into())));
        assert!(matches!(load.status(), LoadStatus::RetryAvailable { attempts: 3, .. }));
        assert!(load.begin_fetch().is_none());
        let retry = load.retry().expect("retry");
        assert_eq!(retry.sequence, ticket.sequence + 1);
        assert_eq!(load.status(), &LoadStatus::Loading);
    }
}

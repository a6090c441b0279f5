use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::Configuration;
use crate::error::{AssetError, EngineError};
use crate::events::{
    AssetReady, DecodeComplete, DecodeRequest, FetchRequest, GalleryCommand, LoadStatus,
    PageResult, RenderUpdate, RowDiff, RowRange, TileVisible,
};
use crate::gallery::Container;
use crate::model::{PhotoId, PhotoSummary};
use crate::processing::layout::GalleryRow;
use crate::processing::variant::{Resolved, VariantResolver};
use crate::tasks::manager::UpdateManager;
use crate::tasks::viewport::{FetchTicket, LoadState, ViewportCoordinator};

/// Everything the gallery task publishes.
#[derive(Clone)]
pub struct Outputs {
    pub render: broadcast::Sender<RenderUpdate>,
    pub rows_entering: broadcast::Sender<RowRange>,
    pub tiles: broadcast::Sender<TileVisible>,
    pub assets: broadcast::Sender<AssetReady>,
    pub errors: broadcast::Sender<EngineError>,
    pub load_status: watch::Sender<LoadStatus>,
    pub rows: watch::Sender<Arc<Vec<GalleryRow>>>,
}

impl Outputs {
    pub fn new(capacity: usize) -> Self {
        Self {
            render: broadcast::channel(capacity).0,
            rows_entering: broadcast::channel(capacity).0,
            tiles: broadcast::channel(capacity).0,
            assets: broadcast::channel(capacity).0,
            errors: broadcast::channel(capacity).0,
            load_status: watch::channel(LoadStatus::Idle).0,
            rows: watch::channel(Arc::new(Vec::new())).0,
        }
    }
}

/// Inputs feeding the gallery task.
pub struct Inputs {
    pub commands: Receiver<GalleryCommand>,
    pub pages: Receiver<PageResult>,
    pub removals: Receiver<Vec<PhotoId>>,
    pub decoded: Receiver<DecodeComplete>,
}

/// Sole owner of the photo list, row list and load state of one gallery.
///
/// Rules:
/// - Every mutation goes through the update manager; each resulting diff is
///   published once and the rows it touched inside the viewport are
///   announced again.
/// - Pagination is driven by the viewport: a page is requested whenever the
///   loaded content runs short, and only one request is ever outstanding.
/// - Decode requests queue locally and are handed to the decoder as it frees
///   capacity, so a slow decoder never stalls layout.
#[instrument(skip_all, fields(width = container.width))]
pub async fn run(
    config: Configuration,
    container: Container,
    inputs: Inputs,
    to_pager: Sender<FetchRequest>,
    to_decoder: Sender<DecodeRequest>,
    outputs: Outputs,
    cancel: CancellationToken,
) -> Result<()> {
    let Inputs {
        mut commands,
        mut pages,
        mut removals,
        mut decoded,
    } = inputs;
    let mut gallery = GalleryState::new(&config, container, to_pager, outputs);

    // The empty gallery always wants its first page.
    gallery.maybe_paginate().await;

    loop {
        let resize_deadline = gallery.manager.resize_deadline();
        select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting gallery task");
                break;
            }

            cmd = commands.recv() => match cmd {
                Some(cmd) => gallery.handle(cmd).await,
                None => {
                    debug!("all gallery handles dropped; exiting gallery task");
                    break;
                }
            },

            Some(result) = pages.recv() => gallery.on_page(result).await,

            Some(ids) = removals.recv() => {
                info!(count = ids.len(), "catalog removals received");
                gallery.remove(ids).await;
            }

            Some(done) = decoded.recv() => gallery.on_decoded(done),

            _ = async move {
                match resize_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                    None => std::future::pending().await,
                }
            } => gallery.on_resize_deadline().await,

            permit = to_decoder.reserve(), if !gallery.pending_decodes.is_empty() => match permit {
                Ok(permit) => {
                    if let Some(request) = gallery.pending_decodes.pop_front() {
                        permit.send(request);
                    }
                }
                Err(_) => {
                    warn!("decoder channel closed; dropping queued decodes");
                    gallery.pending_decodes.clear();
                }
            },
        }
    }
    Ok(())
}

struct GalleryState {
    manager: UpdateManager,
    viewport: ViewportCoordinator,
    load: LoadState,
    resolver: VariantResolver,
    pending_decodes: VecDeque<DecodeRequest>,
    /// Photos already reported as having no stored variant.
    reported_missing: HashSet<PhotoId>,
    to_pager: Sender<FetchRequest>,
    outputs: Outputs,
}

impl GalleryState {
    fn new(
        config: &Configuration,
        container: Container,
        to_pager: Sender<FetchRequest>,
        outputs: Outputs,
    ) -> Self {
        Self {
            manager: UpdateManager::new(config, container.width),
            viewport: ViewportCoordinator::new(
                config,
                container.viewport_height,
                container.device_pixel_ratio,
            ),
            load: LoadState::default(),
            resolver: VariantResolver::new(config.variants),
            pending_decodes: VecDeque::new(),
            reported_missing: HashSet::new(),
            to_pager,
            outputs,
        }
    }

    async fn handle(&mut self, cmd: GalleryCommand) {
        match cmd {
            GalleryCommand::Append(photos) => self.append(photos).await,
            GalleryCommand::Remove(ids) => self.remove(ids).await,
            GalleryCommand::ForceRelayout => {
                let diff = self.manager.relayout();
                self.after_layout(diff).await;
            }
            GalleryCommand::Resize(width) => {
                self.manager.on_container_resize(width, Instant::now());
            }
            GalleryCommand::Scroll(offset) => {
                let entering = self.viewport.scroll_to(offset);
                self.after_viewport_change(entering).await;
            }
            GalleryCommand::ViewportHeight(height) => {
                let entering = self.viewport.set_viewport_height(height);
                self.after_viewport_change(entering).await;
            }
            GalleryCommand::DevicePixelRatio(dpr) => {
                self.viewport.set_device_pixel_ratio(dpr);
                self.warm();
            }
            GalleryCommand::RetryPagination => {
                let ticket = self.load.retry();
                self.issue(ticket).await;
            }
            GalleryCommand::Reset => self.reset().await,
        }
    }

    async fn append(&mut self, photos: Vec<PhotoSummary>) {
        let applied = self.manager.append(photos);
        self.report(applied.errors);
        self.after_layout(applied.diff).await;
    }

    async fn remove(&mut self, ids: Vec<PhotoId>) {
        let applied = self.manager.remove(&ids);
        self.viewport.forget(&ids);
        self.pending_decodes.retain(|req| !ids.contains(&req.id));
        self.report(applied.errors);
        self.after_layout(applied.diff).await;
    }

    async fn reset(&mut self) {
        info!(photos = self.manager.len(), "resetting gallery");
        let diff = self.manager.clear();
        self.viewport.reset();
        self.load.reset();
        self.pending_decodes.clear();
        self.reported_missing.clear();
        self.publish_status();
        self.after_layout(diff).await;
        // An empty gallery with nothing published still needs its first page.
        self.maybe_paginate().await;
    }

    async fn on_page(&mut self, result: PageResult) {
        match result.outcome {
            Ok(page) => {
                let count = page.photos.len();
                match self.load.complete(result.sequence, page) {
                    Some(photos) => {
                        debug!(sequence = result.sequence, count, "page received");
                        self.publish_status();
                        self.append(photos).await;
                    }
                    None => return,
                }
            }
            Err(err) => {
                if self.load.fail(result.sequence, err.attempts, err.source.clone()) {
                    warn!("pagination paused until retried: {err}");
                    self.report(vec![err.into()]);
                    self.publish_status();
                }
                return;
            }
        }
        self.maybe_paginate().await;
    }

    fn on_decoded(&mut self, done: DecodeComplete) {
        let DecodeComplete { request, outcome } = done;
        if self.manager.photo(&request.id).is_none() {
            debug!(id = %request.id, "decoded asset for a photo no longer held");
            return;
        }
        match outcome {
            Ok(()) => {
                let _ = self.outputs.assets.send(AssetReady {
                    id: request.id,
                    tier: request.tier,
                    url: request.url,
                });
            }
            Err(reason) => self.report(vec![
                AssetError::Decode {
                    id: request.id,
                    tier: request.tier,
                    url: request.url,
                    reason,
                }
                .into(),
            ]),
        }
    }

    async fn on_resize_deadline(&mut self) {
        if let Some(diff) = self.manager.poll_resize(Instant::now()) {
            self.after_layout(diff).await;
        }
    }

    /// Publishes a finished layout pass and refreshes everything derived
    /// from row geometry.
    async fn after_layout(&mut self, diff: RowDiff) {
        if !diff.is_empty() {
            let rows = Arc::clone(self.manager.rows());
            debug!(
                rows = rows.len(),
                added = diff.added.len(),
                changed = diff.changed.len(),
                removed = diff.removed.len(),
                "publishing layout"
            );
            let entering = self.viewport.set_rows(&rows, &diff);
            // Watchers of `rows` may subscribe to updates once they see a new
            // list, so the update goes out first.
            let _ = self.outputs.render.send(RenderUpdate {
                rows: Arc::clone(&rows),
                diff,
            });
            self.outputs.rows.send_replace(rows);
            self.announce(entering);
            self.warm();
        }
        self.maybe_paginate().await;
    }

    async fn after_viewport_change(&mut self, entering: Vec<RowRange>) {
        self.announce(entering);
        self.warm();
        self.maybe_paginate().await;
    }

    fn announce(&mut self, ranges: Vec<RowRange>) {
        let rows = Arc::clone(self.manager.rows());
        let dpr = self.viewport.device_pixel_ratio();
        for range in ranges {
            let _ = self.outputs.rows_entering.send(range);
            for (idx, row) in range.iter().filter_map(|idx| rows.get(idx).map(|row| (idx, row))) {
                for tile in &row.tiles {
                    let Some(photo) = self.manager.photo(&tile.id) else {
                        continue;
                    };
                    let asset = self.resolver.resolve(photo, tile.width, dpr);
                    if asset == Resolved::Missing && self.reported_missing.insert(tile.id.clone()) {
                        let err = AssetError::Missing {
                            id: tile.id.clone(),
                        };
                        let _ = self.outputs.errors.send(err.into());
                    }
                    let _ = self.outputs.tiles.send(TileVisible {
                        id: tile.id.clone(),
                        row: idx,
                        width: tile.width,
                        height: row.computed_height,
                        asset,
                    });
                }
            }
        }
    }

    fn warm(&mut self) {
        let requests = self.viewport.warm(
            self.manager.rows(),
            |id| self.manager.photo(id),
            &self.resolver,
        );
        self.pending_decodes.extend(requests);
    }

    async fn maybe_paginate(&mut self) {
        if !self.viewport.wants_next_page() {
            return;
        }
        let ticket = self.load.begin_fetch();
        self.issue(ticket).await;
    }

    async fn issue(&mut self, ticket: Option<FetchTicket>) {
        let Some(FetchTicket { sequence, token }) = ticket else {
            return;
        };
        self.publish_status();
        if self
            .to_pager
            .send(FetchRequest { sequence, token })
            .await
            .is_err()
        {
            warn!("pager task gone; pagination unavailable");
        }
    }

    fn publish_status(&self) {
        self.outputs.load_status.send_replace(self.load.status().clone());
    }

    fn report(&self, errors: Vec<EngineError>) {
        for err in errors {
            let _ = self.outputs.errors.send(err);
        }
    }
}

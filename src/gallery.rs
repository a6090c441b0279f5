use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::assets::AssetLoader;
use crate::catalog::CatalogService;
use crate::config::Configuration;
use crate::error::{EngineError, GalleryError};
use crate::events::{
    AssetReady, GalleryCommand, LoadStatus, RenderUpdate, RowRange, TileVisible,
};
use crate::model::{PhotoId, PhotoSummary};
use crate::processing::layout::GalleryRow;
use crate::tasks;
use crate::tasks::gallery::{Inputs, Outputs};

/// Host measurements a gallery is mounted with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Container {
    pub width: f64,
    pub viewport_height: f64,
    pub device_pixel_ratio: f64,
}

impl Container {
    pub fn new(width: f64, viewport_height: f64) -> Self {
        Self {
            width,
            viewport_height,
            device_pixel_ratio: 1.0,
        }
    }

    pub fn with_device_pixel_ratio(mut self, dpr: f64) -> Self {
        self.device_pixel_ratio = dpr;
        self
    }
}

/// One mounted gallery.
///
/// Owns three tasks: the gallery loop (layout and viewport state), the pager
/// (catalog fetches) and the decoder (asset loads). Commands are queued to
/// the gallery loop; outputs are observed through the subscription methods.
/// Dropping the handle cancels all three; `destroy` also waits for them.
pub struct Gallery {
    commands: mpsc::Sender<GalleryCommand>,
    outputs: Outputs,
    cancel: CancellationToken,
    tasks: JoinSet<anyhow::Result<()>>,
}

impl Gallery {
    /// Validates `config`, wires the catalog and asset loader, and starts
    /// fetching the first page. Must be called within a tokio runtime.
    pub async fn initialize<C, L>(
        container: Container,
        config: Configuration,
        catalog: Arc<C>,
        assets: Arc<L>,
    ) -> Result<Self, GalleryError>
    where
        C: CatalogService,
        L: AssetLoader,
    {
        let config = config.validated().map_err(GalleryError::Config)?;
        let buffer = config.event_buffer;

        let (commands_tx, commands_rx) = mpsc::channel::<GalleryCommand>(buffer); // Host -> Gallery
        let (fetch_tx, fetch_rx) = mpsc::channel(4); // Gallery -> Pager
        let (page_tx, page_rx) = mpsc::channel(4); // Pager -> Gallery
        let (removal_tx, removal_rx) = mpsc::channel::<Vec<PhotoId>>(64); // Catalog -> Gallery
        let (decode_tx, decode_rx) = mpsc::channel(config.decoder_max_in_flight); // Gallery -> Decoder
        let (decoded_tx, decoded_rx) = mpsc::channel(config.decoder_max_in_flight); // Decoder -> Gallery

        catalog.subscribe_to_removals(removal_tx)?;

        let outputs = Outputs::new(buffer);
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        tasks.spawn({
            let cancel = cancel.clone();
            let fetch = config.fetch.clone();
            async move {
                tasks::pager::run(fetch_rx, page_tx, catalog, fetch, cancel)
                    .await
                    .context("pager task failed")
            }
        });

        tasks.spawn({
            let cancel = cancel.clone();
            let max_in_flight = config.decoder_max_in_flight;
            async move {
                tasks::decoder::run(decode_rx, decoded_tx, assets, cancel, max_in_flight)
                    .await
                    .context("decoder task failed")
            }
        });

        tasks.spawn({
            let cancel = cancel.clone();
            let outputs = outputs.clone();
            let inputs = Inputs {
                commands: commands_rx,
                pages: page_rx,
                removals: removal_rx,
                decoded: decoded_rx,
            };
            async move {
                tasks::gallery::run(config, container, inputs, fetch_tx, decode_tx, outputs, cancel)
                    .await
                    .context("gallery task failed")
            }
        });

        info!(
            width = container.width,
            viewport_height = container.viewport_height,
            "gallery initialized"
        );
        Ok(Self {
            commands: commands_tx,
            outputs,
            cancel,
            tasks,
        })
    }

    async fn send(&self, cmd: GalleryCommand) -> Result<(), GalleryError> {
        self.commands.send(cmd).await.map_err(|_| GalleryError::Closed)
    }

    pub async fn append_photos(&self, photos: Vec<PhotoSummary>) -> Result<(), GalleryError> {
        self.send(GalleryCommand::Append(photos)).await
    }

    pub async fn remove_photos(&self, ids: Vec<PhotoId>) -> Result<(), GalleryError> {
        self.send(GalleryCommand::Remove(ids)).await
    }

    /// Recomputes every row at the current width.
    pub async fn force_relayout(&self) -> Result<(), GalleryError> {
        self.send(GalleryCommand::ForceRelayout).await
    }

    /// Container width changed. Applied after the resize debounce.
    pub async fn resize(&self, width: f64) -> Result<(), GalleryError> {
        self.send(GalleryCommand::Resize(width)).await
    }

    pub async fn scroll_to(&self, offset: f64) -> Result<(), GalleryError> {
        self.send(GalleryCommand::Scroll(offset)).await
    }

    pub async fn set_viewport_height(&self, height: f64) -> Result<(), GalleryError> {
        self.send(GalleryCommand::ViewportHeight(height)).await
    }

    pub async fn set_device_pixel_ratio(&self, dpr: f64) -> Result<(), GalleryError> {
        self.send(GalleryCommand::DevicePixelRatio(dpr)).await
    }

    /// Resumes pagination after `LoadStatus::RetryAvailable`.
    pub async fn retry_pagination(&self) -> Result<(), GalleryError> {
        self.send(GalleryCommand::RetryPagination).await
    }

    /// Drops all photos and restarts from the first page. Responses to
    /// fetches issued before the reset are discarded.
    pub async fn reset(&self) -> Result<(), GalleryError> {
        self.send(GalleryCommand::Reset).await
    }

    pub fn on_tile_visible(&self) -> broadcast::Receiver<TileVisible> {
        self.outputs.tiles.subscribe()
    }

    pub fn on_rows_entering_view(&self) -> broadcast::Receiver<RowRange> {
        self.outputs.rows_entering.subscribe()
    }

    pub fn on_asset_ready(&self) -> broadcast::Receiver<AssetReady> {
        self.outputs.assets.subscribe()
    }

    pub fn render_updates(&self) -> broadcast::Receiver<RenderUpdate> {
        self.outputs.render.subscribe()
    }

    pub fn errors(&self) -> broadcast::Receiver<EngineError> {
        self.outputs.errors.subscribe()
    }

    pub fn load_status(&self) -> watch::Receiver<LoadStatus> {
        self.outputs.load_status.subscribe()
    }

    /// Latest row list; updated after every layout pass that changed rows.
    pub fn rows(&self) -> watch::Receiver<Arc<Vec<GalleryRow>>> {
        self.outputs.rows.subscribe()
    }

    /// Stops every task and waits for them to finish.
    pub async fn destroy(mut self) {
        self.cancel.cancel();
        let mut tasks = std::mem::take(&mut self.tasks);
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("task error: {e:?}"),
                Err(e) => error!("join error: {e}"),
            }
        }
        debug!("gallery destroyed");
    }
}

impl Drop for Gallery {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

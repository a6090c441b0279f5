use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use justified_gallery::config::{Configuration, FetchOptions};
use justified_gallery::error::{CatalogError, EngineError};
use justified_gallery::events::LoadStatus;
use justified_gallery::model::{CatalogPage, PageToken, PhotoSummary, VariantTier};
use justified_gallery::processing::layout::GalleryRow;
use justified_gallery::processing::variant::Resolved;
use justified_gallery::{CatalogService, Container, Gallery, MemoryCatalog, NullAssetLoader};
use tokio::sync::{Notify, Semaphore, watch};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(3);

fn config() -> Configuration {
    Configuration {
        resize_debounce_ms: 60,
        fetch: FetchOptions {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..FetchOptions::default()
        },
        ..Configuration::default()
    }
}

fn photos(prefix: &str, range: std::ops::Range<u64>) -> Vec<PhotoSummary> {
    range
        .map(|n| {
            let (w, h) = if n % 3 == 0 { (3000, 2000) } else { (2000, 2000) };
            PhotoSummary::new(format!("{prefix}{n:03}"), w, h, n)
                .with_variant(VariantTier::Thumb, format!("mem://{prefix}{n}/thumb"))
                .with_variant(VariantTier::Medium, format!("mem://{prefix}{n}/medium"))
        })
        .collect()
}

fn ids(rows: &[GalleryRow]) -> Vec<String> {
    rows.iter()
        .flat_map(|row| row.photo_ids().map(|id| id.0.clone()))
        .collect()
}

async fn wait_rows(
    rows: &mut watch::Receiver<Arc<Vec<GalleryRow>>>,
    pred: impl FnMut(&Arc<Vec<GalleryRow>>) -> bool,
) -> Arc<Vec<GalleryRow>> {
    let found = timeout(WAIT, rows.wait_for(pred))
        .await
        .expect("rows did not reach the expected state")
        .expect("gallery stopped");
    Arc::clone(&found)
}

async fn wait_status(
    status: &mut watch::Receiver<LoadStatus>,
    pred: impl FnMut(&LoadStatus) -> bool,
) -> LoadStatus {
    let found = timeout(WAIT, status.wait_for(pred))
        .await
        .expect("load status did not reach the expected state")
        .expect("gallery stopped");
    found.clone()
}

/// Serves pages of ten; every call waits for a permit first.
struct GatedCatalog {
    gate: Semaphore,
    calls: AtomicUsize,
    pages: usize,
}

impl GatedCatalog {
    fn new(pages: usize) -> Self {
        Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            pages,
        }
    }
}

impl CatalogService for GatedCatalog {
    async fn fetch_page(&self, token: Option<PageToken>) -> Result<CatalogPage, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate
            .acquire()
            .await
            .map_err(|err| CatalogError::Unavailable(err.to_string()))?
            .forget();
        let page: usize = token.map_or(0, |t| t.0.parse().unwrap());
        let start = page as u64 * 10;
        Ok(CatalogPage {
            photos: photos("p", start..start + 10),
            next_page_token: (page + 1 < self.pages).then(|| PageToken((page + 1).to_string())),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scroll_bursts_never_duplicate_an_outstanding_fetch() {
    let catalog = Arc::new(GatedCatalog::new(5));
    let gallery = Gallery::initialize(
        Container::new(900.0, 600.0),
        config(),
        Arc::clone(&catalog),
        Arc::new(NullAssetLoader),
    )
    .await
    .unwrap();
    let mut status = gallery.load_status();
    wait_status(&mut status, |s| *s == LoadStatus::Loading).await;

    for step in 0..25 {
        gallery.scroll_to(f64::from(step) * 40.0).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 1);

    catalog.gate.add_permits(1);
    let mut rows = gallery.rows();
    let loaded = wait_rows(&mut rows, |rows| !rows.is_empty()).await;
    assert_eq!(ids(&loaded).len(), 10);

    gallery.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pages_load_while_scrolling_until_exhausted() {
    let catalog = Arc::new(GatedCatalog::new(4));
    catalog.gate.add_permits(100);
    let gallery = Gallery::initialize(
        Container::new(900.0, 400.0),
        config(),
        Arc::clone(&catalog),
        Arc::new(NullAssetLoader),
    )
    .await
    .unwrap();
    let mut rows = gallery.rows();
    let mut status = gallery.load_status();

    wait_rows(&mut rows, |rows| !rows.is_empty()).await;
    for step in 1..=40 {
        gallery.scroll_to(f64::from(step) * 200.0).await.unwrap();
    }
    wait_status(&mut status, |s| *s == LoadStatus::Exhausted).await;
    let all = wait_rows(&mut rows, |rows| ids(rows).len() == 40).await;

    let order = ids(&all);
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(order, sorted);
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 4);

    gallery.destroy().await;
}

/// First call blocks until released and serves `old*` photos; later calls
/// answer at once with `new*` photos.
struct ResettableCatalog {
    calls: AtomicUsize,
    release_first: Notify,
}

impl CatalogService for ResettableCatalog {
    async fn fetch_page(&self, _token: Option<PageToken>) -> Result<CatalogPage, CatalogError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let prefix = if call == 0 {
            self.release_first.notified().await;
            "old"
        } else {
            "new"
        };
        Ok(CatalogPage {
            photos: photos(prefix, 0..6),
            next_page_token: None,
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn responses_issued_before_a_reset_are_discarded() {
    let catalog = Arc::new(ResettableCatalog {
        calls: AtomicUsize::new(0),
        release_first: Notify::new(),
    });
    let gallery = Gallery::initialize(
        Container::new(900.0, 600.0),
        config(),
        Arc::clone(&catalog),
        Arc::new(NullAssetLoader),
    )
    .await
    .unwrap();
    let mut status = gallery.load_status();
    wait_status(&mut status, |s| *s == LoadStatus::Loading).await;

    gallery.reset().await.unwrap();
    let mut rows = gallery.rows();
    let fresh = wait_rows(&mut rows, |rows| !rows.is_empty()).await;
    assert!(ids(&fresh).iter().all(|id| id.starts_with("new")));

    catalog.release_first.notify_one();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after = Arc::clone(&rows.borrow());
    assert_eq!(ids(&after).len(), 6);
    assert!(ids(&after).iter().all(|id| id.starts_with("new")));
    assert_eq!(*status.borrow(), LoadStatus::Exhausted);

    gallery.destroy().await;
}

/// Fails the first `failures` calls, then serves one final page.
struct FlakyCatalog {
    failures: usize,
    calls: AtomicUsize,
}

impl CatalogService for FlakyCatalog {
    async fn fetch_page(&self, _token: Option<PageToken>) -> Result<CatalogPage, CatalogError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(CatalogError::Request(format!("timeout #{}", call + 1)));
        }
        Ok(CatalogPage {
            photos: photos("p", 0..4),
            next_page_token: None,
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_retries_surface_as_retry_available() {
    let catalog = Arc::new(FlakyCatalog {
        failures: 3,
        calls: AtomicUsize::new(0),
    });
    let gallery = Gallery::initialize(
        Container::new(900.0, 600.0),
        config(),
        Arc::clone(&catalog),
        Arc::new(NullAssetLoader),
    )
    .await
    .unwrap();
    let mut status = gallery.load_status();

    let failed = wait_status(&mut status, |s| matches!(s, LoadStatus::RetryAvailable { .. })).await;
    assert_eq!(
        failed,
        LoadStatus::RetryAvailable {
            attempts: 3,
            error: CatalogError::Request("timeout #3".into()),
        }
    );
    // Scrolling does not restart a failed pagination on its own.
    gallery.scroll_to(500.0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 3);

    let mut errors = gallery.errors();
    gallery.retry_pagination().await.unwrap();
    wait_status(&mut status, |s| *s == LoadStatus::Exhausted).await;
    let mut rows = gallery.rows();
    let loaded = wait_rows(&mut rows, |rows| !rows.is_empty()).await;
    assert_eq!(ids(&loaded).len(), 4);
    assert_eq!(catalog.calls.load(Ordering::SeqCst), 4);
    assert!(errors.try_recv().is_err());

    gallery.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn catalog_removals_propagate_to_rows() {
    let catalog = Arc::new(MemoryCatalog::new(photos("p", 0..8), 20));
    let gallery = Gallery::initialize(
        Container::new(900.0, 600.0),
        config(),
        Arc::clone(&catalog),
        Arc::new(NullAssetLoader),
    )
    .await
    .unwrap();
    let mut rows = gallery.rows();
    wait_rows(&mut rows, |rows| ids(rows).len() == 8).await;

    catalog.soft_delete(vec!["p002".into(), "p005".into()]).await;
    let remaining = wait_rows(&mut rows, |rows| ids(rows).len() == 6).await;
    let remaining = ids(&remaining);
    assert!(!remaining.contains(&"p002".to_string()));
    assert!(!remaining.contains(&"p005".to_string()));

    gallery.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn host_appends_and_removals_keep_ordinal_order() {
    let catalog = Arc::new(MemoryCatalog::new(Vec::new(), 10));
    let gallery = Gallery::initialize(
        Container::new(900.0, 600.0),
        config(),
        Arc::clone(&catalog),
        Arc::new(NullAssetLoader),
    )
    .await
    .unwrap();
    let mut status = gallery.load_status();
    wait_status(&mut status, |s| *s == LoadStatus::Exhausted).await;
    let mut errors = gallery.errors();

    let mut batch = photos("p", 0..12);
    batch.reverse();
    batch.push(photos("p", 3..4).remove(0));
    gallery.append_photos(batch).await.unwrap();

    let mut rows = gallery.rows();
    let loaded = wait_rows(&mut rows, |rows| ids(rows).len() == 12).await;
    let order = ids(&loaded);
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(order, sorted);

    let dup = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(dup, EngineError::State(_)));

    gallery.remove_photos(vec!["p000".into()]).await.unwrap();
    let trimmed = wait_rows(&mut rows, |rows| ids(rows).len() == 11).await;
    assert_eq!(ids(&trimmed)[0], "p001");

    gallery.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resize_bursts_collapse_into_one_relayout() {
    let catalog = Arc::new(MemoryCatalog::new(photos("p", 0..20), 20));
    let gallery = Gallery::initialize(
        Container::new(900.0, 2000.0),
        config(),
        Arc::clone(&catalog),
        Arc::new(NullAssetLoader),
    )
    .await
    .unwrap();
    let mut rows = gallery.rows();
    wait_rows(&mut rows, |rows| ids(rows).len() == 20).await;

    let mut updates = gallery.render_updates();
    for width in [800.0, 760.0, 700.0, 640.0] {
        gallery.resize(width).await.unwrap();
    }
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert!(
        update
            .rows
            .iter()
            .all(|row| row.container_width_at_computation == 640.0)
    );
    let quiet = timeout(Duration::from_millis(300), updates.recv()).await;
    assert!(quiet.is_err(), "expected a single relayout");

    gallery.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn visible_tiles_are_announced_with_resolved_assets() {
    let catalog = Arc::new(GatedCatalog::new(1));
    let gallery = Gallery::initialize(
        Container::new(900.0, 300.0).with_device_pixel_ratio(2.0),
        config(),
        Arc::clone(&catalog),
        Arc::new(NullAssetLoader),
    )
    .await
    .unwrap();
    let mut entering = gallery.on_rows_entering_view();
    let mut tiles = gallery.on_tile_visible();
    let mut ready = gallery.on_asset_ready();
    catalog.gate.add_permits(1);

    let first = timeout(WAIT, entering.recv()).await.unwrap().unwrap();
    assert_eq!(first.start, 0);

    let tile = timeout(WAIT, tiles.recv()).await.unwrap().unwrap();
    assert_eq!(tile.row, 0);
    // Tiles are a few hundred px wide at 2x density: thumb is too small.
    assert!(matches!(
        tile.asset,
        Resolved::Variant {
            tier: VariantTier::Medium,
            ..
        }
    ));

    let asset = timeout(WAIT, ready.recv()).await.unwrap().unwrap();
    assert_eq!(asset.tier, VariantTier::Medium);
    assert!(asset.url.ends_with("/medium"));

    gallery.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_configuration_is_rejected() {
    let cfg = Configuration {
        min_row_height: 500.0,
        ..config()
    };
    let err = Gallery::initialize(
        Container::new(900.0, 600.0),
        cfg,
        Arc::new(MemoryCatalog::new(Vec::new(), 10)),
        Arc::new(NullAssetLoader),
    )
    .await
    .err()
    .expect("configuration should be rejected");
    assert!(err.to_string().contains("min-row-height"));
}

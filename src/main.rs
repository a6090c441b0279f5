use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use justified_gallery::{
    AssetLoader, CatalogService, Configuration, Container, DirectoryCatalog, Gallery,
    GalleryRow, ImageAssetLoader, LoadStatus, MemoryCatalog, NullAssetLoader,
};

#[derive(Debug, Parser)]
#[command(
    name = "justified-gallery",
    version,
    about = "lay out a photo catalog as justified rows"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// JSON file with photo summaries, or a directory of images
    #[arg(long, value_name = "FILE|DIR")]
    catalog: PathBuf,
    /// Container width in CSS pixels
    #[arg(long, value_name = "PX", default_value_t = 1200.0)]
    width: f64,
    /// Viewport height in CSS pixels
    #[arg(long = "viewport-height", value_name = "PX", default_value_t = 800.0)]
    viewport_height: f64,
    /// Device pixel ratio used for variant selection
    #[arg(long, default_value_t = 1.0)]
    dpr: f64,
    /// Photos per catalog page
    #[arg(long = "page-size", value_name = "N", default_value_t = 50)]
    page_size: usize,
    /// Scroll down one viewport this many times before printing
    #[arg(long = "scroll-steps", value_name = "N", default_value_t = 0)]
    scroll_steps: usize,
    /// Decode local image files while warming variants
    #[arg(long)]
    decode: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // init tracing (RUST_LOG controls level, default = info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = Configuration::from_yaml_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?
        .validated()
        .context("invalid configuration values")?;
    tracing::debug!("Loaded configuration from {}:\n{:#?}", args.config.display(), cfg);

    if args.catalog.is_dir() {
        let root = args.catalog.clone();
        let page_size = args.page_size;
        let catalog = tokio::task::spawn_blocking(move || DirectoryCatalog::scan(root, page_size))
            .await
            .context("directory scan panicked")?
            .with_context(|| format!("failed to scan {}", args.catalog.display()))?;
        with_assets(&args, cfg, Arc::new(catalog)).await
    } else if is_json(&args.catalog) {
        let catalog = MemoryCatalog::from_json_file(&args.catalog, args.page_size)
            .with_context(|| format!("failed to read catalog {}", args.catalog.display()))?;
        with_assets(&args, cfg, Arc::new(catalog)).await
    } else {
        bail!(
            "{} is neither a directory nor a .json file",
            args.catalog.display()
        );
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

async fn with_assets<C: CatalogService>(
    args: &Args,
    cfg: Configuration,
    catalog: Arc<C>,
) -> Result<()> {
    if args.decode {
        run_session(args, cfg, catalog, Arc::new(ImageAssetLoader::default())).await
    } else {
        run_session(args, cfg, catalog, Arc::new(NullAssetLoader)).await
    }
}

async fn run_session<C: CatalogService, L: AssetLoader>(
    args: &Args,
    cfg: Configuration,
    catalog: Arc<C>,
    assets: Arc<L>,
) -> Result<()> {
    let container =
        Container::new(args.width, args.viewport_height).with_device_pixel_ratio(args.dpr);
    let gallery = Gallery::initialize(container, cfg, catalog, assets).await?;
    let mut status = gallery.load_status();
    let rows = gallery.rows();

    let session = async {
        let mut last = settle(&mut status).await?;
        let mut offset = 0.0;
        for step in 1..=args.scroll_steps {
            offset += args.viewport_height;
            gallery.scroll_to(offset).await?;
            last = settle(&mut status).await?;
            tracing::info!(step, offset, status = ?last, "scrolled");
        }
        anyhow::Ok(last)
    };

    let outcome = tokio::select! {
        res = session => Some(res?),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received; shutting down");
            None
        }
    };

    if let Some(status) = outcome {
        print_rows(&rows.borrow(), &status);
    }
    gallery.destroy().await;
    Ok(())
}

/// Waits until the gallery is no longer fetching.
async fn settle(status: &mut watch::Receiver<LoadStatus>) -> Result<LoadStatus> {
    // Give the gallery task a moment to pick up the last command.
    tokio::time::sleep(Duration::from_millis(25)).await;
    let settled = tokio::time::timeout(
        Duration::from_secs(30),
        status.wait_for(|s| *s != LoadStatus::Loading),
    )
    .await
    .context("timed out waiting for the catalog")?
    .context("gallery stopped")?;
    Ok(settled.clone())
}

fn print_rows(rows: &[GalleryRow], status: &LoadStatus) {
    println!("# rows: {}\n# load status: {:?}\n", rows.len(), status);
    for (idx, row) in rows.iter().enumerate() {
        let tiles = row
            .tiles
            .iter()
            .map(|tile| format!("{}:{:.1}", tile.id, tile.width))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "  {:>4}: h={:>6.1} {:<9} {}",
            idx + 1,
            row.computed_height,
            format!("{:?}", row.fit),
            tiles
        );
    }
}

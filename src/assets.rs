use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tracing::debug;

/// Decodes one resource locator. Completion re-enters the gallery as an
/// asset-ready or error event.
pub trait AssetLoader: Send + Sync + 'static {
    fn load(&self, url: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Accepts every locator without touching it. For hosts that fetch the
/// bytes themselves and only want the ready notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAssetLoader;

impl AssetLoader for NullAssetLoader {
    async fn load(&self, _url: &str) -> Result<()> {
        Ok(())
    }
}

/// Decodes local files (plain paths or `file://` locators) to RGBA8 with EXIF
/// orientation applied and keeps the most recent results.
pub struct ImageAssetLoader {
    capacity: usize,
    cache: Mutex<DecodedCache>,
}

#[derive(Default)]
struct DecodedCache {
    images: HashMap<String, Arc<image::RgbaImage>>,
    order: VecDeque<String>,
}

impl ImageAssetLoader {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            cache: Mutex::new(DecodedCache::default()),
        }
    }

    /// Pixels of a previously loaded locator, if still cached.
    pub fn decoded(&self, url: &str) -> Option<Arc<image::RgbaImage>> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.images.get(url).cloned()
    }

    fn insert(&self, url: &str, img: image::RgbaImage) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.images.insert(url.to_owned(), Arc::new(img)).is_none() {
            cache.order.push_back(url.to_owned());
        }
        while cache.order.len() > self.capacity {
            if let Some(evicted) = cache.order.pop_front() {
                cache.images.remove(&evicted);
            }
        }
    }
}

impl Default for ImageAssetLoader {
    fn default() -> Self {
        Self::new(64)
    }
}

impl AssetLoader for ImageAssetLoader {
    async fn load(&self, url: &str) -> Result<()> {
        if self.decoded(url).is_some() {
            return Ok(());
        }
        let path = locator_path(url);
        let img = tokio::task::spawn_blocking(move || decode_rgba8_apply_exif(&path))
            .await
            .context("decode task panicked")??;
        debug!(url, width = img.width(), height = img.height(), "decoded asset");
        self.insert(url, img);
        Ok(())
    }
}

fn locator_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}

/// Decodes an image to RGBA8 and rotates it upright per its EXIF orientation.
pub fn decode_rgba8_apply_exif(path: &Path) -> Result<image::RgbaImage> {
    let img = image::ImageReader::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgba8();

    let img = match read_orientation(path).unwrap_or(1) {
        2 => image::imageops::flip_horizontal(&img),
        3 => image::imageops::rotate180(&img),
        4 => image::imageops::flip_vertical(&img),
        5 => image::imageops::flip_horizontal(&image::imageops::rotate90(&img)),
        6 => image::imageops::rotate90(&img),
        7 => image::imageops::flip_horizontal(&image::imageops::rotate270(&img)),
        8 => image::imageops::rotate270(&img),
        _ => img,
    };
    Ok(img)
}

pub(crate) fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let value = field.value.get_uint(0)?;
    Some(value as u16)
}

/// Width and height as displayed, i.e. swapped for the transposing EXIF
/// orientations 5 through 8.
pub fn oriented_dimensions(path: &Path) -> Result<(u32, u32)> {
    let (width, height) = image::image_dimensions(path)
        .with_context(|| format!("reading dimensions of {}", path.display()))?;
    Ok(match read_orientation(path) {
        Some(5..=8) => (height, width),
        _ => (width, height),
    })
}

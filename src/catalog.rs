use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::assets::oriented_dimensions;
use crate::error::CatalogError;
use crate::model::{CatalogPage, PageToken, PhotoId, PhotoSummary, VariantTier};

/// The external photo catalog, consumed at its interface boundary.
pub trait CatalogService: Send + Sync + 'static {
    /// Fetches the page following `token`; `None` requests the first page.
    fn fetch_page(
        &self,
        token: Option<PageToken>,
    ) -> impl Future<Output = Result<CatalogPage, CatalogError>> + Send;

    /// Registers a sink for soft-delete notifications. Catalogs without
    /// removal propagation keep the default.
    fn subscribe_to_removals(&self, _sink: Sender<Vec<PhotoId>>) -> Result<(), CatalogError> {
        Ok(())
    }
}

/// Paging over a photo list guarded by a mutex.
///
/// Each entry keeps the position it was loaded at. Page tokens name the
/// position to resume from, so removals never shift later pages.
#[derive(Debug)]
struct PagedList {
    photos: Mutex<Vec<(usize, PhotoSummary)>>,
    loaded: usize,
    page_size: usize,
}

impl PagedList {
    fn new(photos: Vec<PhotoSummary>, page_size: usize) -> Self {
        Self {
            loaded: photos.len(),
            photos: Mutex::new(photos.into_iter().enumerate().collect()),
            page_size: page_size.max(1),
        }
    }

    fn page(&self, token: Option<&PageToken>) -> Result<CatalogPage, CatalogError> {
        let resume = match token {
            None => 0,
            Some(PageToken(raw)) => raw
                .parse::<usize>()
                .ok()
                .filter(|position| *position <= self.loaded)
                .ok_or_else(|| CatalogError::BadToken(raw.clone()))?,
        };
        let photos = self.photos.lock().unwrap_or_else(PoisonError::into_inner);
        let start = photos.partition_point(|(position, _)| *position < resume);
        let end = (start + self.page_size).min(photos.len());
        let served = &photos[start..end];
        let next_page_token = match served.last() {
            Some((position, _)) if end < photos.len() => Some(PageToken((position + 1).to_string())),
            _ => None,
        };
        Ok(CatalogPage {
            photos: served.iter().map(|(_, photo)| photo.clone()).collect(),
            next_page_token,
        })
    }

    /// Drops the matching entries and returns the ids that were present.
    fn remove(&self, ids: &[PhotoId]) -> Vec<PhotoId> {
        let mut photos = self.photos.lock().unwrap_or_else(PoisonError::into_inner);
        let before = photos.len();
        let mut removed = Vec::new();
        photos.retain(|(_, photo)| {
            let doomed = ids.contains(&photo.id);
            if doomed {
                removed.push(photo.id.clone());
            }
            !doomed
        });
        debug!(removed = before - photos.len(), "catalog entries removed");
        removed
    }

    fn len(&self) -> usize {
        self.photos.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Catalog held in memory, served in fixed-size pages.
#[derive(Debug)]
pub struct MemoryCatalog {
    list: PagedList,
    fetches: AtomicUsize,
    removals: Mutex<Option<Sender<Vec<PhotoId>>>>,
}

impl MemoryCatalog {
    pub fn new(photos: Vec<PhotoSummary>, page_size: usize) -> Self {
        Self {
            list: PagedList::new(photos, page_size),
            fetches: AtomicUsize::new(0),
            removals: Mutex::new(None),
        }
    }

    /// Loads a JSON array of photo summaries.
    pub fn from_json_file(path: impl AsRef<Path>, page_size: usize) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let photos: Vec<PhotoSummary> = serde_json::from_str(&raw)?;
        Ok(Self::new(photos, page_size))
    }

    /// Number of `fetch_page` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes photos and notifies the subscribed gallery, if any.
    pub async fn soft_delete(&self, ids: Vec<PhotoId>) {
        let removed = self.list.remove(&ids);
        if removed.is_empty() {
            return;
        }
        let sink = self
            .removals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sink) = sink
            && sink.send(removed).await.is_err()
        {
            debug!("removal subscriber went away");
        }
    }
}

impl CatalogService for MemoryCatalog {
    async fn fetch_page(&self, token: Option<PageToken>) -> Result<CatalogPage, CatalogError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.list.page(token.as_ref())
    }

    fn subscribe_to_removals(&self, sink: Sender<Vec<PhotoId>>) -> Result<(), CatalogError> {
        *self.removals.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Ok(())
    }
}

/// Photos found under a directory. Ids are paths relative to the root, the
/// `original` tier points at the file itself.
pub struct DirectoryCatalog {
    root: PathBuf,
    list: Arc<PagedList>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl DirectoryCatalog {
    /// Recursively scans `root`, skipping hidden directories and files whose
    /// dimensions cannot be read.
    pub fn scan(root: impl Into<PathBuf>, page_size: usize) -> Result<Self, CatalogError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(CatalogError::Unavailable(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(&root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| !is_hidden_dir(entry))
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && is_image(entry.path()))
            .map(DirEntry::into_path)
            .collect();
        paths.sort();

        let mut photos = Vec::with_capacity(paths.len());
        for path in paths {
            match oriented_dimensions(&path) {
                Ok((width, height)) => {
                    let ordinal = photos.len() as u64;
                    photos.push(
                        PhotoSummary::new(photo_id(&root, &path), width, height, ordinal)
                            .with_variant(VariantTier::Original, path.display().to_string()),
                    );
                }
                Err(err) => warn!(path = %path.display(), "skipping unreadable image: {err:#}"),
            }
        }
        info!(root = %root.display(), discovered = photos.len(), "directory scan complete");

        Ok(Self {
            root,
            list: Arc::new(PagedList::new(photos, page_size)),
            watcher: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CatalogService for DirectoryCatalog {
    async fn fetch_page(&self, token: Option<PageToken>) -> Result<CatalogPage, CatalogError> {
        self.list.page(token.as_ref())
    }

    /// Watches the root, drops deleted or moved-away images from the list and
    /// forwards their ids.
    fn subscribe_to_removals(&self, sink: Sender<Vec<PhotoId>>) -> Result<(), CatalogError> {
        let root = self.root.clone();
        let list = Arc::clone(&self.list);
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let gone = removed_ids(&root, event);
                if gone.is_empty() {
                    return;
                }
                let ids = list.remove(&gone);
                if !ids.is_empty() {
                    info!(count = ids.len(), "fs: photos removed");
                    let _ = sink.blocking_send(ids);
                }
            }
            Err(err) => error!("watch error: {err}"),
        })
        .map_err(|err| CatalogError::Unavailable(err.to_string()))?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|err| CatalogError::Unavailable(err.to_string()))?;
        info!(watching = %self.root.display(), "notify watcher initialized (recursive)");
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);
        Ok(())
    }
}

fn removed_ids(root: &Path, event: Event) -> Vec<PhotoId> {
    let gone = match event.kind {
        EventKind::Remove(RemoveKind::File | RemoveKind::Any) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => true,
        // Some platforms report moves without a direction; decide by existence.
        EventKind::Modify(ModifyKind::Name(_)) => false,
        _ => {
            debug!(kind = ?event.kind, "fs: ignored");
            return Vec::new();
        }
    };
    event
        .paths
        .into_iter()
        .filter(|path| is_image(path) && (gone || !path.exists()))
        .map(|path| photo_id(root, &path))
        .collect()
}

fn photo_id(root: &Path, path: &Path) -> PhotoId {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<_> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect();
    PhotoId(parts.join("/"))
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry.file_name().to_str().is_some_and(|n| n.starts_with('.'))
}

fn is_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase()),
        Some(ref e) if ["jpg", "jpeg", "png", "gif", "webp"].contains(&e.as_str())
    )
}

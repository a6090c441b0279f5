use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::catalog::CatalogService;
use crate::config::FetchOptions;
use crate::error::NetworkError;
use crate::events::{FetchRequest, PageResult};
use crate::model::{CatalogPage, PageToken};

/// Executes page fetches on behalf of the gallery task.
///
/// Rules:
/// - Every request runs to completion (with retries) on its own; the gallery
///   decides afterwards whether the result is stale.
/// - Failed attempts back off exponentially with jitter; after the last
///   attempt the failure is reported, never dropped.
/// - Cancellation aborts outstanding fetches.
#[instrument(skip_all)]
pub async fn run<C: CatalogService>(
    mut requests: Receiver<FetchRequest>,
    to_gallery: Sender<PageResult>,
    catalog: Arc<C>,
    options: FetchOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let mut fetches: JoinSet<PageResult> = JoinSet::new();

    loop {
        select! {
            _ = cancel.cancelled() => {
                info!(outstanding = fetches.len(), "cancel received; exiting pager task");
                break;
            }

            Some(FetchRequest { sequence, token }) = requests.recv() => {
                debug!(sequence, ?token, "fetching page");
                let catalog = Arc::clone(&catalog);
                let options = options.clone();
                fetches.spawn(async move {
                    let outcome = fetch_with_retry(catalog.as_ref(), token, &options).await;
                    PageResult { sequence, outcome }
                });
            }

            Some(joined) = fetches.join_next() => match joined {
                Ok(result) => {
                    if to_gallery.send(result).await.is_err() {
                        debug!("gallery task gone; exiting pager task");
                        break;
                    }
                }
                Err(err) => warn!("fetch task failed: {err}"),
            },

            else => break,
        }
    }
    fetches.abort_all();
    Ok(())
}

/// Calls the catalog until it answers or `max_attempts` is spent.
pub async fn fetch_with_retry<C: CatalogService>(
    catalog: &C,
    token: Option<PageToken>,
    options: &FetchOptions,
) -> Result<CatalogPage, NetworkError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match catalog.fetch_page(token.clone()).await {
            Ok(page) => {
                if attempt > 1 {
                    info!(attempt, "page fetch recovered");
                }
                return Ok(page);
            }
            Err(source) if attempt >= options.max_attempts => {
                warn!(attempt, "page fetch failed; giving up: {source}");
                return Err(NetworkError {
                    attempts: attempt,
                    source,
                });
            }
            Err(err) => {
                let delay = jittered(options.backoff_for(attempt), options.jitter);
                warn!(attempt, ?delay, "page fetch failed; retrying: {err}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let shave = rand::rng().random_range(0.0..jitter);
    delay.mul_f64(1.0 - shave)
}

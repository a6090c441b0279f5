use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::assets::AssetLoader;
use crate::events::{DecodeComplete, DecodeRequest};

/// Decodes warmed variants with at most `max_in_flight` loads at once.
///
/// Rules:
/// - A locator already being decoded is not started twice; the repeat is
///   dropped.
/// - New requests are only accepted while under the limit, so back pressure
///   reaches the gallery through the bounded request channel.
/// - Every started decode produces exactly one completion, including one
///   whose loader panicked.
#[instrument(skip(requests, to_gallery, loader, cancel))]
pub async fn run<L: AssetLoader>(
    mut requests: Receiver<DecodeRequest>,
    to_gallery: Sender<DecodeComplete>,
    loader: Arc<L>,
    cancel: CancellationToken,
    max_in_flight: usize,
) -> Result<()> {
    let mut in_flight: HashSet<String> = HashSet::new();
    let mut started: HashMap<Id, DecodeRequest> = HashMap::new();
    let mut tasks: JoinSet<DecodeComplete> = JoinSet::new();

    loop {
        select! {
            _ = cancel.cancelled() => {
                info!(in_flight = in_flight.len(), "cancel received; exiting decoder task");
                break;
            }

            Some(request) = requests.recv(), if in_flight.len() < max_in_flight => {
                if !in_flight.insert(request.url.clone()) {
                    debug!(url = %request.url, "decode already in flight");
                    continue;
                }
                let loader = Arc::clone(&loader);
                let job = request.clone();
                let handle = tasks.spawn(async move {
                    let outcome = loader
                        .load(&job.url)
                        .await
                        .map_err(|err| format!("{err:#}"));
                    DecodeComplete { request: job, outcome }
                });
                started.insert(handle.id(), request);
            }

            Some(joined) = tasks.join_next_with_id() => {
                let done = match joined {
                    Ok((id, done)) => {
                        started.remove(&id);
                        done
                    }
                    Err(err) => {
                        let Some(request) = started.remove(&err.id()) else {
                            warn!("untracked decode task failed: {err}");
                            continue;
                        };
                        DecodeComplete {
                            request,
                            outcome: Err(format!("decode task failed: {err}")),
                        }
                    }
                };
                in_flight.remove(&done.request.url);
                match &done.outcome {
                    Ok(()) => debug!(id = %done.request.id, tier = %done.request.tier, "decoded"),
                    Err(reason) => warn!(id = %done.request.id, url = %done.request.url, "decode failed: {reason}"),
                }
                if to_gallery.send(done).await.is_err() {
                    debug!("gallery task gone; exiting decoder task");
                    break;
                }
            }

            // Requests closed and nothing left to join.
            else => break,
        }
    }
    tasks.abort_all();
    Ok(())
}

//! Pipeline stages and the two dispatch strategies.

use super::coalesce::LoadOutcome;
use super::SchedulerInner;
use crate::decoder::{AssetKind, AudioTransport};
use crate::downloader::{fetch_with_retry, Downloader};
use crate::error::LoadError;
use crate::request::Request;
use bytes::Bytes;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Streaming dispatch: every queued request gets its own task that flows
/// through download and decode back to back. Slot pools bound how many of
/// those tasks are actually in each stage at once.
pub(super) async fn run_balanced<D: Downloader, A: AudioTransport>(
    inner: &Arc<SchedulerInner<D, A>>,
) {
    loop {
        let request = inner.queue.lock().unwrap().dequeue().ok();
        let Some(request) = request else { break };
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let outcome = run_pipeline(&inner, &request).await;
            finish(&inner, &request, outcome).await;
        });
    }
}

/// Result of the download phase of an eager batch.
enum EagerStage {
    Downloaded(Bytes),
    Done(LoadOutcome),
}

/// Batch dispatch: drain the queue, complete every download, then run
/// every decode, then resolve the whole batch in one pass. Keeps the
/// network fully busy first and delivers results together.
pub(super) async fn run_eager<D: Downloader, A: AudioTransport>(inner: &Arc<SchedulerInner<D, A>>) {
    loop {
        let batch = {
            let mut queue = inner.queue.lock().unwrap();
            let mut batch = Vec::with_capacity(queue.len());
            while let Ok(request) = queue.dequeue() {
                batch.push(request);
            }
            batch
        };
        if batch.is_empty() {
            break;
        }
        debug!(size = batch.len(), "eager batch start");

        let mut downloads = JoinSet::new();
        for request in batch {
            let inner = Arc::clone(inner);
            downloads.spawn(async move {
                let stage = if request.kind == AssetKind::Audio {
                    EagerStage::Done(audio_stage(&inner, &request).await)
                } else {
                    match download_stage(&inner, &request).await {
                        Ok(bytes) => EagerStage::Downloaded(bytes),
                        Err(err) => EagerStage::Done(Err(err)),
                    }
                };
                (request, stage)
            });
        }

        let mut downloaded = Vec::new();
        while let Some(joined) = downloads.join_next().await {
            match joined {
                Ok(pair) => downloaded.push(pair),
                Err(err) => warn!(error = %err, "download task failed"),
            }
        }

        let mut decodes = JoinSet::new();
        let mut completed = Vec::new();
        for (request, stage) in downloaded {
            match stage {
                EagerStage::Done(outcome) => completed.push((request, outcome)),
                EagerStage::Downloaded(bytes) => {
                    let inner = Arc::clone(inner);
                    decodes.spawn(async move {
                        let outcome = decode_stage(&inner, &request, bytes).await;
                        (request, outcome)
                    });
                }
            }
        }
        while let Some(joined) = decodes.join_next().await {
            match joined {
                Ok(pair) => completed.push(pair),
                Err(err) => warn!(error = %err, "decode task failed"),
            }
        }

        for (request, outcome) in completed {
            finish(inner, &request, outcome).await;
        }
    }
}

async fn run_pipeline<D: Downloader, A: AudioTransport>(
    inner: &Arc<SchedulerInner<D, A>>,
    request: &Request,
) -> LoadOutcome {
    if request.kind == AssetKind::Audio {
        return audio_stage(inner, request).await;
    }
    let bytes = download_stage(inner, request).await?;
    decode_stage(inner, request, bytes).await
}

/// Caches successes under the request's stamped group, then resolves the
/// coalescer so every waiter observes the outcome. Failures resolve
/// without caching.
pub(super) async fn finish<D: Downloader, A: AudioTransport>(
    inner: &Arc<SchedulerInner<D, A>>,
    request: &Request,
    outcome: LoadOutcome,
) {
    match &outcome {
        Ok(asset) => inner.cache.put(&request.group, &request.key, asset.clone()),
        Err(err) => warn!(id = %request.id, key = %request.key, error = %err, "request failed"),
    }
    inner
        .coalescer
        .resolve(&request.group, &request.key, outcome)
        .await;
}

async fn download_stage<D: Downloader, A: AudioTransport>(
    inner: &Arc<SchedulerInner<D, A>>,
    request: &Request,
) -> Result<Bytes, LoadError> {
    let _slot = tokio::select! {
        biased;
        _ = inner.shutdown.cancelled() => return Err(LoadError::Cancelled),
        slot = inner.governor.acquire_download() => slot?,
    };
    fetch_with_retry(
        &inner.downloader,
        &request.key,
        &inner.retry,
        inner.governor.monitor(),
        &inner.shutdown,
    )
    .await
}

async fn decode_stage<D: Downloader, A: AudioTransport>(
    inner: &Arc<SchedulerInner<D, A>>,
    request: &Request,
    bytes: Bytes,
) -> LoadOutcome {
    let decoder = inner
        .registry
        .get(request.kind)
        .ok_or(LoadError::NoDecoder(request.kind))?;
    let _slot = tokio::select! {
        biased;
        _ = inner.shutdown.cancelled() => return Err(LoadError::Cancelled),
        slot = inner.governor.acquire_decode() => slot?,
    };

    let key = request.key.clone();
    let config = request.config.clone();
    let joined = tokio::task::spawn_blocking(move || decoder.decode(&key, &bytes, &config)).await;

    match joined {
        Ok(Ok(asset)) => Ok(asset),
        Ok(Err(err)) => Err(LoadError::Decode {
            key: request.key.to_string(),
            kind: request.kind,
            message: err.0,
        }),
        Err(err) => Err(LoadError::Internal(format!("decode task failed: {}", err))),
    }
}

/// Audio fetches and decodes in one transport call; it occupies a download
/// slot for the whole operation and follows the same retry policy.
async fn audio_stage<D: Downloader, A: AudioTransport>(
    inner: &Arc<SchedulerInner<D, A>>,
    request: &Request,
) -> LoadOutcome {
    let _slot = tokio::select! {
        biased;
        _ = inner.shutdown.cancelled() => return Err(LoadError::Cancelled),
        slot = inner.governor.acquire_download() => slot?,
    };

    let policy = &inner.retry;
    let mut last_error = String::new();
    for attempt in 1..=policy.max_attempts {
        let outcome = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return Err(LoadError::Cancelled),
            result = tokio::time::timeout(
                policy.timeout,
                inner.audio.fetch_audio(request.key.as_str(), &request.config),
            ) => result,
        };

        match outcome {
            Ok(Ok(asset)) => return Ok(asset),
            Ok(Err(err)) => {
                last_error = err.message;
                if !err.transient {
                    return Err(LoadError::DownloadFailed {
                        key: request.key.to_string(),
                        attempts: attempt,
                        last_error,
                    });
                }
                warn!(key = %request.key, attempt, error = %last_error, "audio fetch failed");
            }
            Err(_) => {
                last_error = format!("timed out after {:?}", policy.timeout);
                warn!(key = %request.key, attempt, "audio fetch timed out");
            }
        }

        if attempt < policy.max_attempts {
            let backoff = policy.backoff_base * 2u32.pow(attempt - 1);
            tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => return Err(LoadError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    Err(LoadError::DownloadFailed {
        key: request.key.to_string(),
        attempts: policy.max_attempts,
        last_error,
    })
}

//! Bounded concurrent fan-out to provider clients.
//!
//! Every call runs as its own task in a [`JoinSet`], gated by a semaphore and
//! wrapped in its own timeout. One provider timing out, failing, or even
//! panicking never affects its siblings. The fan-out returns only after all
//! calls have settled, or immediately with [`SearchError::Cancelled`] when
//! the caller's token fires, aborting whatever is still in flight.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::clients::FetchOutcome;
use crate::error::{ProviderError, SearchError};
use crate::query::Query;
use crate::registry::RegisteredProvider;

/// How one provider call ended.
#[derive(Debug)]
pub(crate) struct CallResult {
    pub provider: String,
    pub latency_ms: u64,
    pub outcome: Result<FetchOutcome, ProviderError>,
}

/// Call every provider once. Results come back in the order of `providers`.
pub(crate) async fn fan_out(
    providers: Vec<RegisteredProvider>,
    query: &Query,
    limit: usize,
    timeout: Duration,
    max_concurrency: usize,
    cancel: &CancellationToken,
) -> Result<Vec<CallResult>, SearchError> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let query = Arc::new(query.clone());
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

    let mut tasks = JoinSet::new();
    let mut pending: BTreeMap<usize, String> = BTreeMap::new();

    for (index, provider) in providers.into_iter().enumerate() {
        pending.insert(index, provider.endpoint.id.clone());
        let semaphore = Arc::clone(&semaphore);
        let query = Arc::clone(&query);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                timeout,
                provider.client.fetch(&provider.endpoint, &query, limit),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(timeout_ms)),
            };
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            (
                index,
                CallResult {
                    provider: provider.endpoint.id,
                    latency_ms,
                    outcome,
                },
            )
        });
    }

    let mut settled: BTreeMap<usize, CallResult> = BTreeMap::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(in_flight = pending.len(), "search cancelled; aborting provider calls");
                tasks.shutdown().await;
                return Err(SearchError::Cancelled);
            }
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok((index, result))) => {
                    pending.remove(&index);
                    settled.insert(index, result);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "provider task did not complete");
                }
            },
        }
    }

    // Whatever never reported back panicked; it still gets a log entry.
    for (index, provider) in pending {
        tracing::warn!(%provider, "provider client panicked");
        settled.insert(
            index,
            CallResult {
                provider,
                latency_ms: 0,
                outcome: Err(ProviderError::Parse("provider client panicked".into())),
            },
        );
    }

    Ok(settled.into_values().collect())
}

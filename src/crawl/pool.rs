//! Bounded pool of exclusive fetch handles and the workers that use them.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::crawl::results::ResultSet;
use crate::error::{CrawlError, CrawlResult, FetchFailure};
use crate::models::{ArticleRecord, ArticleStub};
use crate::scrapers::types::RawDetail;
use crate::scrapers::DetailSource;

/// Set of handles. A handle is owned by at most one task at a time.
///
/// A handle whose operation was abandoned is retired rather than returned,
/// so the set can shrink and be topped up while the pool runs.
pub struct HandlePool<H> {
    idle: StdMutex<Vec<H>>,
    permits: Arc<Semaphore>,
    live: AtomicUsize,
}

impl<H: Send + 'static> HandlePool<H> {
    pub fn new(handles: Vec<H>) -> Self {
        let size = handles.len();
        Self {
            idle: StdMutex::new(handles),
            permits: Arc::new(Semaphore::new(size)),
            live: AtomicUsize::new(size),
        }
    }

    /// Handles currently owned by the pool, idle or checked out
    pub fn size(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free handle. It goes back to the pool when the guard drops.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledHandle<H>, FetchFailure> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| FetchFailure::HandleUnavailable("pool is shut down".into()))?;
        let handle = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| FetchFailure::HandleUnavailable("no idle handle behind permit".into()))?;
        Ok(PooledHandle {
            handle: Some(handle),
            pool: Arc::clone(self),
            permit: Some(permit),
        })
    }

    /// Add a fresh handle, e.g. one replacing a retired handle
    pub fn replenish(&self, handle: H) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        self.live.fetch_add(1, Ordering::SeqCst);
        self.permits.add_permits(1);
    }

    /// Fail every waiter if the last handle is gone
    fn close_if_exhausted(&self) -> bool {
        if self.size() == 0 {
            self.permits.close();
            return true;
        }
        false
    }

    /// Refuse further acquisitions and hand back every idle handle
    pub fn drain(&self) -> Vec<H> {
        self.permits.close();
        std::mem::take(&mut *self.idle.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Exclusive access to one pooled handle
pub struct PooledHandle<H> {
    handle: Option<H>,
    pool: Arc<HandlePool<H>>,
    // dropped after the handle is back in the pool
    permit: Option<OwnedSemaphorePermit>,
}

impl<H> PooledHandle<H> {
    /// Take the handle out of circulation for good. The pool shrinks by one.
    pub fn retire(mut self) -> Option<H> {
        if let Some(permit) = self.permit.take() {
            permit.forget();
        }
        self.pool.live.fetch_sub(1, Ordering::SeqCst);
        self.handle.take()
    }
}

impl<H> Deref for PooledHandle<H> {
    type Target = H;

    fn deref(&self) -> &H {
        match self.handle.as_ref() {
            Some(handle) => handle,
            None => unreachable!("handle is only taken on drop or retire"),
        }
    }
}

impl<H> DerefMut for PooledHandle<H> {
    fn deref_mut(&mut self) -> &mut H {
        match self.handle.as_mut() {
            Some(handle) => handle,
            None => unreachable!("handle is only taken on drop or retire"),
        }
    }
}

impl<H> Drop for PooledHandle<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }
    }
}

/// Counters for the detail phase
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FetchStats {
    pub workers: usize,
    pub dispatched: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub fetch_failures: usize,
    pub malformed_payloads: usize,
    pub article_cap_reached: bool,
    pub handles_retired: usize,
    pub handles_closed: usize,
}

/// Resolves article stubs into records using at most `width()` concurrent fetches
pub struct DetailWorkerPool<D: DetailSource> {
    source: Arc<D>,
    handles: Arc<HandlePool<D::Handle>>,
    timeout: Duration,
}

impl<D: DetailSource> DetailWorkerPool<D> {
    /// Open up to `workers` handles. Having none at all is fatal.
    pub async fn open(source: Arc<D>, workers: usize, timeout: Duration) -> CrawlResult<Self> {
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            match source.open_handle().await {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!("Could not open worker handle {}/{}: {}", i + 1, workers, e),
            }
        }
        if handles.is_empty() {
            return Err(CrawlError::SurfaceLost(format!(
                "none of {} fetch handles could be opened",
                workers
            )));
        }
        info!("🔧 {} worker handles ready", handles.len());
        Ok(Self {
            source,
            handles: Arc::new(HandlePool::new(handles)),
            timeout,
        })
    }

    pub fn width(&self) -> usize {
        self.handles.size()
    }

    /// Fetch details for `items` in order, issuing at most `cap` fetches.
    ///
    /// Returns once every dispatched fetch has finished. Records land in
    /// `results`; `known_complexes` is the registry snapshot taken before the phase.
    pub async fn run(
        &self,
        items: Vec<ArticleStub>,
        known_complexes: Arc<HashSet<String>>,
        results: Arc<Mutex<ResultSet>>,
        cap: usize,
    ) -> FetchStats {
        let mut stats = FetchStats {
            workers: self.width(),
            ..FetchStats::default()
        };
        let mut issued = HashSet::new();
        let mut tasks = JoinSet::new();

        for stub in items {
            if stats.dispatched >= cap {
                info!("🛑 Article cap {} reached, draining in-flight fetches", cap);
                stats.article_cap_reached = true;
                break;
            }
            if !issued.insert(stub.id.clone()) || results.lock().await.contains(&stub.id) {
                stats.duplicates += 1;
                continue;
            }
            stats.dispatched += 1;
            tasks.spawn(fetch_one(
                Arc::clone(&self.source),
                Arc::clone(&self.handles),
                stub,
                Arc::clone(&known_complexes),
                Arc::clone(&results),
                self.timeout,
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            let joined = joined.map(|(outcome, retired)| {
                if retired {
                    stats.handles_retired += 1;
                }
                outcome
            });
            match joined {
                Ok(Ok(true)) => {
                    stats.stored += 1;
                    if stats.stored % 100 == 0 {
                        info!("   Progress: {}/{} details stored", stats.stored, stats.dispatched);
                    }
                }
                Ok(Ok(false)) => stats.duplicates += 1,
                Ok(Err(CrawlError::MalformedPayload { article_id, field })) => {
                    warn!("Dropping article {}: missing {}", article_id, field);
                    stats.malformed_payloads += 1;
                }
                Ok(Err(e)) => {
                    warn!("Dropping article: {}", e);
                    stats.fetch_failures += 1;
                }
                Err(e) => {
                    warn!("Detail worker task failed: {}", e);
                    stats.fetch_failures += 1;
                }
            }
        }
        stats
    }

    /// Close every handle. Call after `run` has returned.
    pub async fn shutdown(self) -> usize {
        let handles = self.handles.drain();
        let closed = handles.len();
        for handle in handles {
            self.source.close_handle(handle).await;
        }
        if closed < self.handles.size() {
            warn!("{} handles were still checked out at shutdown", self.handles.size() - closed);
        }
        debug!(closed, "worker handles closed");
        closed
    }
}

/// Outcome of one fetch task: whether a record was stored, and whether its handle was retired
type FetchOutcome = (CrawlResult<bool>, bool);

async fn fetch_one<D: DetailSource>(
    source: Arc<D>,
    handles: Arc<HandlePool<D::Handle>>,
    stub: ArticleStub,
    known_complexes: Arc<HashSet<String>>,
    results: Arc<Mutex<ResultSet>>,
    timeout: Duration,
) -> FetchOutcome {
    let mut handle = match handles.acquire().await {
        Ok(handle) => handle,
        Err(e) => return (Err(e.into()), false),
    };
    let fetched =
        tokio::time::timeout(timeout, source.fetch_detail(&mut *handle, &stub.id, timeout)).await;
    let raw = match fetched {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => return (Err(e.into()), false),
        Err(_) => {
            // the source may still be working on this handle
            retire_handle(&source, &handles, handle).await;
            let err = FetchFailure::Timeout {
                article_id: stub.id.clone(),
                after: timeout,
            };
            return (Err(err.into()), true);
        }
    };
    drop(handle);

    let stored = match resolve_record(stub, raw, &known_complexes) {
        Ok(record) => Ok(results.lock().await.insert(record)),
        Err(e) => Err(e),
    };
    (stored, false)
}

/// Replace an abandoned handle, then close it once the source lets go of it
async fn retire_handle<D: DetailSource>(
    source: &Arc<D>,
    handles: &Arc<HandlePool<D::Handle>>,
    handle: PooledHandle<D::Handle>,
) {
    let stale = handle.retire();
    match source.open_handle().await {
        Ok(fresh) => handles.replenish(fresh),
        Err(e) => {
            warn!("Could not replace a timed out handle: {}", e);
            if handles.close_if_exhausted() {
                warn!("No fetch handles left, remaining articles are dropped");
            }
        }
    }
    if let Some(stale) = stale {
        source.close_handle(stale).await;
    }
}

/// Merge list-level and detail-level fields into a record
pub fn resolve_record(
    stub: ArticleStub,
    raw: RawDetail,
    known_complexes: &HashSet<String>,
) -> CrawlResult<ArticleRecord> {
    let malformed = |field: &'static str| CrawlError::MalformedPayload {
        article_id: stub.id.clone(),
        field,
    };
    if !known_complexes.contains(&stub.complex_ref) {
        return Err(malformed("complex_ref"));
    }
    if raw.article_id.as_deref() != Some(stub.id.as_str()) {
        return Err(malformed("article_id"));
    }

    let mut phones = raw.phones.into_iter();
    Ok(ArticleRecord {
        id: stub.id,
        complex_ref: stub.complex_ref,
        name: stub.name,
        asset_type: stub.asset_type,
        deal_type: stub.deal_type,
        price: stub.price,
        floor: stub.floor,
        area: stub.area,
        exclusive_area: stub.exclusive_area,
        direction: stub.direction,
        features: stub.features,
        registered_at: stub.registered_at,
        broker_office: raw.broker_office,
        broker_name: raw.broker_name,
        broker_contact_primary: phones.next().unwrap_or_default(),
        broker_contact_secondary: phones.next().unwrap_or_default(),
        latest_jeonse: raw.latest_jeonse,
        jeonse_history: raw.jeonse_window.into_iter().collect(),
        fetched_at: Utc::now(),
    })
}

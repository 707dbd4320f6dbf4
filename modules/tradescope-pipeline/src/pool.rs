use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use browserless_client::{BrowserlessClient, RenderOptions, RenderedContent};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// A bounded pool of browser sessions.
///
/// `acquire` waits cooperatively until an idle session exists or the pool is
/// allowed to create a new one; dropping the returned lease puts the session
/// back on the idle list, so a session is returned on every exit path. A
/// background sweep closes sessions idle longer than the TTL.
///
/// This is the only shared mutable state in the pipeline. All mutation is
/// serialized through acquire/release, and the pool is constructed and
/// passed by reference — never ambient.
pub struct BrowserPool {
    inner: Arc<PoolInner>,
    sweeper: tokio::task::JoinHandle<()>,
}

struct PoolInner {
    base_url: String,
    token: Option<String>,
    idle_ttl: Duration,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<IdleSession>>,
    next_id: AtomicU64,
}

struct IdleSession {
    session: BrowserSession,
    since: Instant,
}

/// One leased browser session.
pub struct BrowserSession {
    id: u64,
    client: BrowserlessClient,
}

impl BrowserSession {
    pub async fn render(
        &self,
        url: &str,
        options: &RenderOptions,
    ) -> browserless_client::Result<RenderedContent> {
        self.client.content_with_partial_fallback(url, options).await
    }
}

/// RAII lease on a pooled session. Dropping it releases the session back to
/// the idle list along with the capacity permit.
pub struct BrowserLease {
    session: Option<BrowserSession>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl BrowserLease {
    pub fn session(&self) -> &BrowserSession {
        self.session
            .as_ref()
            .expect("session present until lease drops")
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let id = session.id;
            self.pool.idle.lock().expect("pool idle lock").push(IdleSession {
                session,
                since: Instant::now(),
            });
            debug!(session_id = id, "Browser session released");
        }
    }
}

impl BrowserPool {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        capacity: usize,
        idle_ttl: Duration,
        sweep_interval: Duration,
    ) -> Self {
        let inner = Arc::new(PoolInner {
            base_url: base_url.to_string(),
            token: token.map(String::from),
            idle_ttl,
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
            idle: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        });

        info!(base_url, capacity, "Browser pool initialized");

        let sweep_inner = Arc::clone(&inner);
        let sweeper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                sweep_inner.sweep();
            }
        });

        Self { inner, sweeper }
    }

    /// Lease a session, waiting until capacity frees up. Creating a fresh
    /// session can fail; that failure propagates to the caller and the
    /// capacity permit is returned.
    pub async fn acquire(&self) -> browserless_client::Result<BrowserLease> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .expect("pool semaphore never closed");

        let reused = self
            .inner
            .idle
            .lock()
            .expect("pool idle lock")
            .pop()
            .map(|idle| idle.session);

        let session = match reused {
            Some(session) => {
                debug!(session_id = session.id, "Reusing idle browser session");
                session
            }
            None => {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let client =
                    BrowserlessClient::new(&self.inner.base_url, self.inner.token.as_deref())?;
                debug!(session_id = id, "Created browser session");
                BrowserSession { id, client }
            }
        };

        Ok(BrowserLease {
            session: Some(session),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Return a lease to the pool. Dropping the lease does the same thing;
    /// this exists for call sites that want the release to be explicit.
    pub fn release(&self, lease: BrowserLease) {
        drop(lease);
    }

    #[cfg(test)]
    fn idle_count(&self) -> usize {
        self.inner.idle.lock().expect("pool idle lock").len()
    }
}

impl PoolInner {
    fn sweep(&self) {
        let mut idle = self.idle.lock().expect("pool idle lock");
        let before = idle.len();
        idle.retain(|entry| entry.since.elapsed() < self.idle_ttl);
        let evicted = before - idle.len();
        if evicted > 0 {
            info!(evicted, remaining = idle.len(), "Swept idle browser sessions");
        }
    }
}

impl Drop for BrowserPool {
    fn drop(&mut self) {
        self.sweeper.abort();
        let idle = self.inner.idle.lock().expect("pool idle lock").len();
        if idle > 0 {
            warn!(idle, "Browser pool dropped with idle sessions");
        }
    }
}

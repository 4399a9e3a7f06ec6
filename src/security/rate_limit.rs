//! Fixed-window rate limiting.
//!
//! Each key owns a counter and a reset instant. A key can admit up to
//! `2 * max_requests` calls in a short span straddling a window boundary;
//! this limiter is meant for coarse protection of destructive operations.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::task::JoinHandle;

use crate::error::GuardError;

/// Longest window or grace period a limiter accepts.
pub const MAX_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// `now + period`, clamped to [`MAX_WINDOW`] when the sum would overflow.
fn deadline(now: Instant, period: Duration) -> Instant {
    now.checked_add(period).unwrap_or_else(|| now + MAX_WINDOW)
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
    /// Whether rate limiting is enabled.
    pub enabled: bool,
    /// How often expired windows are swept.
    pub sweep_interval: Duration,
    /// How long an expired window is kept before the sweep removes it.
    pub grace: Duration,
    /// Operation class prefixed to every key built by the middleware.
    pub class: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
            enabled: true,
            sweep_interval: Duration::from_secs(300),
            grace: Duration::from_secs(60),
            class: "destructive".to_string(),
        }
    }
}

impl RateLimitConfig {
    /// Create a disabled rate limiter config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Custom rate limit.
    pub fn custom(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            ..Default::default()
        }
    }
}

/// Check-and-increment storage behind the limiter.
///
/// `allow` returns `Ok(remaining)` when admitted and `Err(retry_after)` when
/// denied. Implementations must make each call atomic per key.
pub trait RateLimitStore: Send + Sync + fmt::Debug {
    fn allow(&self, key: &str, max_requests: u32, window: Duration) -> Result<u32, Duration>;

    /// Remove windows that expired more than `grace` ago. Returns the count removed.
    fn sweep(&self, grace: Duration) -> usize;

    /// Number of keys currently tracked.
    fn tracked_keys(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    reset_at: Instant,
}

/// Process-local store guarded by a single mutex.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    counters: Mutex<HashMap<String, WindowCounter>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Counters stay consistent across a panicking holder: every mutation is a
    // single field write.
    fn counters(&self) -> MutexGuard<'_, HashMap<String, WindowCounter>> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// [`RateLimitStore::allow`] evaluated at `now`.
    pub fn allow_at(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now: Instant,
    ) -> Result<u32, Duration> {
        let mut counters = self.counters();

        match counters.get_mut(key) {
            Some(counter) if now <= counter.reset_at => {
                if counter.count < max_requests {
                    counter.count += 1;
                    Ok(max_requests - counter.count)
                } else {
                    Err(counter.reset_at.saturating_duration_since(now))
                }
            }
            Some(counter) => {
                counter.count = 1;
                counter.reset_at = deadline(now, window);
                Ok(max_requests.saturating_sub(1))
            }
            None => {
                counters.insert(
                    key.to_string(),
                    WindowCounter {
                        count: 1,
                        reset_at: deadline(now, window),
                    },
                );
                Ok(max_requests.saturating_sub(1))
            }
        }
    }

    /// [`RateLimitStore::sweep`] evaluated at `now`.
    pub fn sweep_at(&self, grace: Duration, now: Instant) -> usize {
        let mut counters = self.counters();
        let before = counters.len();
        counters.retain(|_, counter| deadline(counter.reset_at, grace) > now);
        before - counters.len()
    }
}

impl RateLimitStore for InMemoryStore {
    fn allow(&self, key: &str, max_requests: u32, window: Duration) -> Result<u32, Duration> {
        self.allow_at(key, max_requests, window, Instant::now())
    }

    fn sweep(&self, grace: Duration) -> usize {
        self.sweep_at(grace, Instant::now())
    }

    fn tracked_keys(&self) -> usize {
        self.counters().len()
    }
}

/// Rate limiter: a store plus the configured defaults.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a limiter backed by an [`InMemoryStore`].
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    /// Create a limiter backed by a custom store.
    pub fn with_store(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self { store, config }
    }

    /// Create a disabled rate limiter.
    pub fn disabled() -> Self {
        Self::new(RateLimitConfig::disabled())
    }

    /// Check if rate limiting is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check `key` against the configured limit.
    pub fn check(&self, key: &str) -> Result<u32, Duration> {
        self.allow(key, self.config.max_requests, self.config.window)
    }

    /// Check `key` against an explicit limit.
    pub fn allow(&self, key: &str, max_requests: u32, window: Duration) -> Result<u32, Duration> {
        if !self.config.enabled {
            return Ok(max_requests);
        }
        self.store.allow(key, max_requests, window)
    }

    /// Like [`RateLimiter::check`], mapped into the crate error type.
    pub fn guard(&self, key: &str) -> crate::Result<u32> {
        self.check(key)
            .map_err(|retry_after| GuardError::RateLimited { retry_after })
    }

    /// Spawn the periodic sweep on the current tokio runtime.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        spawn_sweeper(
            Arc::clone(&self.store),
            self.config.sweep_interval,
            self.config.grace,
        )
    }

    /// Get current stats.
    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            tracked_keys: self.store.tracked_keys(),
            max_requests: self.config.max_requests,
            window_secs: self.config.window.as_secs(),
            enabled: self.config.enabled,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Rate limit statistics.
#[derive(Debug, Clone)]
pub struct RateLimitStats {
    pub tracked_keys: usize,
    pub max_requests: u32,
    pub window_secs: u64,
    pub enabled: bool,
}

/// Run `store.sweep(grace)` every `every` until the task is aborted.
pub fn spawn_sweeper(
    store: Arc<dyn RateLimitStore>,
    every: Duration,
    grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = store.sweep(grace);
            if removed > 0 {
                tracing::debug!(removed, "swept expired rate-limit windows");
            }
        }
    })
}

/// Client identity used in rate-limit keys.
pub fn client_identity(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate limit middleware for axum, keyed by `<class>:<client ip>`.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = format!("{}:{}", limiter.config.class, client_identity(&request));
    let limit = HeaderValue::from(limiter.config.max_requests);

    match limiter.check(&key) {
        Ok(remaining) => {
            let mut response = next.run(request).await;

            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", limit);
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));

            response
        }
        Err(retry_after) => {
            tracing::info!(
                key = %key,
                retry_after_secs = retry_after.as_secs(),
                "rate limit exceeded"
            );

            let mut response = GuardError::RateLimited { retry_after }.into_response();
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", limit);
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));

            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;
    use tokio_test::{assert_err, assert_ok};

    const WINDOW: Duration = Duration::from_millis(1000);

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 10);
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert!(config.enabled);
    }

    #[test]
    fn test_fixed_window_admits_then_denies() {
        let store = InMemoryStore::new();
        let t0 = Instant::now();

        assert_eq!(store.allow_at("k", 3, WINDOW, t0), Ok(2));
        assert_eq!(store.allow_at("k", 3, WINDOW, t0), Ok(1));
        assert_eq!(store.allow_at("k", 3, WINDOW, t0), Ok(0));
        assert!(store.allow_at("k", 3, WINDOW, t0).is_err());
    }

    #[test]
    fn test_denied_call_does_not_increment() {
        let store = InMemoryStore::new();
        let t0 = Instant::now();

        store.allow_at("k", 1, WINDOW, t0).unwrap();
        for _ in 0..5 {
            assert!(store.allow_at("k", 1, WINDOW, t0).is_err());
        }
        let after = t0 + WINDOW + Duration::from_millis(1);
        assert_eq!(store.allow_at("k", 1, WINDOW, after), Ok(0));
    }

    #[test]
    fn test_window_rollover_resets_count() {
        let store = InMemoryStore::new();
        let t0 = Instant::now();

        for _ in 0..3 {
            store.allow_at("k", 3, WINDOW, t0).unwrap();
        }
        assert!(store.allow_at("k", 3, WINDOW, t0).is_err());

        // Still inside the window at exactly the reset instant.
        assert!(store.allow_at("k", 3, WINDOW, t0 + WINDOW).is_err());

        let later = t0 + WINDOW + Duration::from_millis(1);
        assert_eq!(store.allow_at("k", 3, WINDOW, later), Ok(2));
    }

    #[test]
    fn test_retry_after_counts_down() {
        let store = InMemoryStore::new();
        let t0 = Instant::now();

        store.allow_at("k", 1, WINDOW, t0).unwrap();
        let retry = store
            .allow_at("k", 1, WINDOW, t0 + Duration::from_millis(400))
            .unwrap_err();
        assert_eq!(retry, Duration::from_millis(600));
    }

    #[test]
    fn test_keys_are_independent() {
        let store = InMemoryStore::new();
        let t0 = Instant::now();

        assert_ok!(store.allow_at("delete:10.0.0.1", 1, WINDOW, t0));
        assert_err!(store.allow_at("delete:10.0.0.1", 1, WINDOW, t0));
        assert_ok!(store.allow_at("delete:10.0.0.2", 1, WINDOW, t0));
        assert_ok!(store.allow_at("restart:10.0.0.1", 1, WINDOW, t0));
    }

    #[test]
    fn test_sweep_removes_only_expired_after_grace() {
        let store = InMemoryStore::new();
        let t0 = Instant::now();
        let grace = Duration::from_secs(60);

        store.allow_at("old", 5, WINDOW, t0).unwrap();
        store
            .allow_at("fresh", 5, WINDOW, t0 + Duration::from_secs(30))
            .unwrap();

        // "old" expired at t0+1s, but is still within its grace period.
        assert_eq!(store.sweep_at(grace, t0 + Duration::from_secs(30)), 0);

        assert_eq!(store.sweep_at(grace, t0 + Duration::from_secs(62)), 1);
        assert_eq!(store.tracked_keys(), 1);

        assert_eq!(store.sweep_at(grace, t0 + Duration::from_secs(200)), 1);
        assert_eq!(store.tracked_keys(), 0);
    }

    #[test]
    fn test_oversized_window_and_grace_do_not_overflow() {
        let store = InMemoryStore::new();
        let t0 = Instant::now();
        let huge = Duration::from_secs(u64::MAX);

        assert_eq!(store.allow_at("k", 1, huge, t0), Ok(0));
        let retry = store.allow_at("k", 1, huge, t0).unwrap_err();
        assert!(retry <= MAX_WINDOW);

        assert_eq!(store.sweep_at(huge, t0 + Duration::from_secs(1)), 0);
        assert_eq!(store.tracked_keys(), 1);
    }

    #[test]
    fn test_concurrent_admission_is_exact() {
        const MAX: u32 = 8;
        let store = Arc::new(InMemoryStore::new());
        let barrier = Arc::new(Barrier::new((MAX * 2) as usize));
        let admitted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..MAX * 2)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    barrier.wait();
                    if store.allow("fresh-key", MAX, Duration::from_secs(60)).is_ok() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), MAX);
    }

    #[test]
    fn test_rate_limiter_disabled() {
        let limiter = RateLimiter::disabled();
        for _ in 0..100 {
            assert_ok!(limiter.check("anyone"));
        }
        assert_eq!(limiter.stats().tracked_keys, 0);
    }

    #[test]
    fn test_rate_limiter_guard_maps_error() {
        let limiter = RateLimiter::new(RateLimitConfig::custom(1, Duration::from_secs(60)));
        assert_ok!(limiter.guard("k"));
        assert!(matches!(
            limiter.guard("k"),
            Err(GuardError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_rate_limiter_stats() {
        let limiter = RateLimiter::new(RateLimitConfig::custom(10, Duration::from_secs(30)));
        limiter.check("a").ok();
        limiter.check("b").ok();

        let stats = limiter.stats();
        assert_eq!(stats.tracked_keys, 2);
        assert_eq!(stats.max_requests, 10);
        assert_eq!(stats.window_secs, 30);
        assert!(stats.enabled);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_expired_windows() {
        let store = Arc::new(InMemoryStore::new());
        store.allow("k", 1, Duration::from_millis(10)).unwrap();

        let handle = spawn_sweeper(
            store.clone(),
            Duration::from_millis(20),
            Duration::from_millis(0),
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.tracked_keys(), 0);
        handle.abort();
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Remote API a call was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ApiService {
    Discord,
    Roblox,
}

impl ApiService {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Roblox => "roblox",
        }
    }
}

impl fmt::Display for ApiService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// HTTP 429; also counted as a failure.
    RateLimited,
    Failed,
}

/// Counters for one operation against one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub requests: u64,
    pub failures: u64,
    pub rate_limited: u64,
    pub total_latency_ms: u64,
}

impl EndpointStats {
    pub fn average_latency_ms(&self) -> u64 {
        self.total_latency_ms.checked_div(self.requests).unwrap_or(0)
    }
}

/// Outbound API usage, keyed by service and operation name.
#[derive(Debug, Default)]
pub struct PlatformApiMetrics {
    endpoints: Mutex<BTreeMap<(ApiService, String), EndpointStats>>,
    avatar_cache_hits: AtomicU64,
    avatar_cache_misses: AtomicU64,
}

impl PlatformApiMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self, service: ApiService, operation: &str, outcome: CallOutcome, elapsed: Duration) {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = endpoints.entry((service, operation.to_string())).or_default();
        stats.requests += 1;
        stats.total_latency_ms += u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match outcome {
            CallOutcome::Success => {}
            CallOutcome::Failed => stats.failures += 1,
            CallOutcome::RateLimited => {
                stats.failures += 1;
                stats.rate_limited += 1;
                warn!(%service, operation, "API rate limit hit");
            }
        }
    }

    pub fn record_avatar_cache(&self, hit: bool) {
        let counter = if hit {
            &self.avatar_cache_hits
        } else {
            &self.avatar_cache_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn endpoint(&self, service: ApiService, operation: &str) -> Option<EndpointStats> {
        let endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        endpoints.get(&(service, operation.to_string())).cloned()
    }

    pub fn get_stats(&self) -> PlatformApiStats {
        let endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stats = PlatformApiStats {
            avatar_cache_hits: self.avatar_cache_hits.load(Ordering::Relaxed),
            avatar_cache_misses: self.avatar_cache_misses.load(Ordering::Relaxed),
            ..PlatformApiStats::default()
        };
        for ((service, _), endpoint) in endpoints.iter() {
            stats.total_requests += endpoint.requests;
            stats.errors += endpoint.failures;
            stats.rate_limit_hits += endpoint.rate_limited;
            if *service == ApiService::Roblox {
                stats.identity_requests += endpoint.requests;
            }
        }
        stats
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            requests = stats.total_requests,
            identity_requests = stats.identity_requests,
            rate_limits = stats.rate_limit_hits,
            errors = stats.errors,
            avatar_cache_hits = stats.avatar_cache_hits,
            avatar_cache_misses = stats.avatar_cache_misses,
            "API metrics"
        );
        let endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        for ((service, operation), endpoint) in endpoints.iter() {
            debug!(
                %service,
                operation = operation.as_str(),
                requests = endpoint.requests,
                failures = endpoint.failures,
                rate_limited = endpoint.rate_limited,
                avg_latency_ms = endpoint.average_latency_ms(),
                "Endpoint metrics"
            );
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformApiStats {
    pub total_requests: u64,
    pub identity_requests: u64,
    pub rate_limit_hits: u64,
    pub errors: u64,
    pub avatar_cache_hits: u64,
    pub avatar_cache_misses: u64,
}

static PLATFORM_METRICS: std::sync::LazyLock<PlatformApiMetrics> =
    std::sync::LazyLock::new(PlatformApiMetrics::new);

pub fn platform_metrics() -> &'static PlatformApiMetrics {
    &PLATFORM_METRICS
}

/// Logs the elapsed time of a workflow step when finished.
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        info!(
            operation = self.operation,
            duration_ms = self.start.elapsed().as_millis() as u64,
            "Operation completed"
        );
    }
}

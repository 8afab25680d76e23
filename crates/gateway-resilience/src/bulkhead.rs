//! Bulkhead pattern for resource isolation.
//!
//! A bulkhead is a bounded-admission gate: at most `limit` permits are out at
//! any time and callers wait for one until their deadline.

use gateway_core::{CapacityScope, GatewayError, GatewayResult};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Bulkhead for limiting concurrent calls
#[derive(Debug)]
pub struct Bulkhead {
    /// Which gate this is, reported in capacity errors
    scope: CapacityScope,
    /// Maximum concurrent permits
    limit: usize,
    /// Semaphore for concurrency control
    semaphore: Arc<Semaphore>,
    /// Permits currently held
    in_flight: Arc<AtomicUsize>,
    /// Highest observed `in_flight`
    peak: Arc<AtomicUsize>,
}

impl Bulkhead {
    /// Create a new bulkhead; a zero limit is raised to one
    #[must_use]
    pub fn new(scope: CapacityScope, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            scope,
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Gate scope
    #[must_use]
    pub fn scope(&self) -> &CapacityScope {
        &self.scope
    }

    /// Configured ceiling
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn permit(&self, permit: OwnedSemaphorePermit) -> BulkheadPermit {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        debug!(gate = %self.scope, in_flight = now, limit = self.limit, "Bulkhead permit acquired");
        BulkheadPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Acquire a permit, waiting as long as it takes
    pub async fn acquire(&self) -> GatewayResult<BulkheadPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::internal(format!("{} gate closed", self.scope)))?;
        Ok(self.permit(permit))
    }

    /// Acquire a permit before `deadline`
    pub async fn acquire_until(&self, deadline: Instant) -> GatewayResult<BulkheadPermit> {
        let start = Instant::now();
        match tokio::time::timeout_at(deadline, Arc::clone(&self.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(self.permit(permit)),
            Ok(Err(_)) => Err(GatewayError::internal(format!("{} gate closed", self.scope))),
            Err(_) => {
                let waited = start.elapsed();
                warn!(gate = %self.scope, limit = self.limit, waited = ?waited, "Bulkhead acquire timed out");
                Err(GatewayError::capacity_exhausted(self.scope.clone(), waited))
            }
        }
    }

    /// Acquire a permit within `timeout`
    pub async fn acquire_timeout(&self, timeout: Duration) -> GatewayResult<BulkheadPermit> {
        self.acquire_until(Instant::now() + timeout).await
    }

    /// Try to acquire without waiting
    #[must_use]
    pub fn try_acquire(&self) -> Option<BulkheadPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.permit(permit))
    }

    /// Wait until a permit is free without keeping it
    ///
    /// Another caller may take the slot before this one retries.
    pub async fn wait_available(&self, deadline: Instant) -> GatewayResult<()> {
        let start = Instant::now();
        match tokio::time::timeout_at(deadline, self.semaphore.acquire()).await {
            Ok(Ok(_released)) => Ok(()),
            Ok(Err(_)) => Err(GatewayError::internal(format!("{} gate closed", self.scope))),
            Err(_) => Err(GatewayError::capacity_exhausted(
                self.scope.clone(),
                start.elapsed(),
            )),
        }
    }

    /// Permits currently held
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits ever held at once
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Check if the bulkhead is at capacity
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Get bulkhead statistics
    #[must_use]
    pub fn stats(&self) -> BulkheadStats {
        let active = self.in_flight();
        BulkheadStats {
            active,
            limit: self.limit,
            available: self.limit.saturating_sub(active),
        }
    }
}

/// Permit held while a call is in flight
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Live counters for one gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulkheadStats {
    /// Permits held
    pub active: usize,
    /// Ceiling
    pub limit: usize,
    /// Permits free
    pub available: usize,
}

impl BulkheadStats {
    /// Calculate utilization percentage
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            self.active.min(self.limit) as f64 / self.limit as f64 * 100.0
        }
    }
}

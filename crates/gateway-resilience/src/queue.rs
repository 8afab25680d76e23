//! Degradation queue for requests parked during total unavailability.
//!
//! Strict FIFO by enqueue time. A failed replay goes to the back of the queue
//! with a later eligibility time; after the last allowed retry the request is
//! dropped and reported. Capacity counts queued entries plus replays in
//! flight, so a request being replayed still holds its slot.

use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use gateway_core::{
    ExecuteRequest, GatewayError, GatewayResult, ModelId, ModelResponse, QueueTicket, QueuedAck,
    RequestId,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Queue bounds and replay schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum queued plus in-flight requests
    pub max_size: usize,
    /// Delay before the first replay; doubles after each failure
    pub base_delay: Duration,
    /// Failed replays before a request is dropped
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            base_delay: Duration::from_secs(5),
            max_retries: 5,
        }
    }
}

/// A parked request
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    /// Ticket handed to the caller
    pub ticket: QueueTicket,
    /// The original request
    pub request: ExecuteRequest,
    /// Model the request was aimed at when parked
    pub target_model: Option<ModelId>,
    /// Enqueue time
    pub enqueued_at: Instant,
    /// Enqueue time, wall clock
    pub enqueued_at_utc: DateTime<Utc>,
    /// Failed replays so far
    pub retries: u32,
    /// Earliest next replay
    pub next_attempt_at: Instant,
    /// Failure of the last replay
    pub last_error: Option<GatewayError>,
}

/// What happened to a request after a failed replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Back in the queue; eligible again after `delay`
    Requeued {
        /// Failed replays so far
        retries: u32,
        /// Pause before the next replay
        delay: Duration,
    },
    /// Out of retries
    Dropped {
        /// Failed replays
        retries: u32,
    },
}

/// Final result of a queued request
#[derive(Debug, Clone)]
pub enum ReplayResult {
    /// A replay succeeded
    Completed(ModelResponse),
    /// Every replay failed
    Dropped {
        /// Failed replays
        retries: u32,
        /// Failure of the last replay
        last_error: GatewayError,
    },
}

/// Broadcast when a queued request leaves the queue
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    /// Ticket from the queued acknowledgment
    pub ticket: QueueTicket,
    /// Original request id
    pub request_id: RequestId,
    /// Enqueue to completion
    pub queued_for: Duration,
    /// Completion or drop
    pub result: ReplayResult,
}

impl ReplayOutcome {
    /// Whether the request was eventually served
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self.result, ReplayResult::Completed(_))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<QueuedRequest>,
    in_flight: usize,
}

/// Bounded FIFO of parked requests
#[derive(Debug)]
pub struct RequestQueue {
    config: QueueConfig,
    schedule: RetryPolicy,
    state: Mutex<QueueState>,
}

impl RequestQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            schedule: RetryPolicy::doubling(config.base_delay, config.max_retries),
            config,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Queue configuration
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Delay before replay number `retries + 1`
    #[must_use]
    pub fn delay_after(&self, retries: u32) -> Duration {
        self.schedule.delay_for_attempt(retries)
    }

    /// Park a request; a full queue is a hard rejection
    pub fn enqueue(
        &self,
        request: ExecuteRequest,
        target_model: Option<ModelId>,
    ) -> GatewayResult<QueuedAck> {
        let mut state = self.state.lock();
        if state.entries.len() + state.in_flight >= self.config.max_size {
            warn!(
                request_id = %request.id,
                capacity = self.config.max_size,
                "Degradation queue full"
            );
            return Err(GatewayError::queue_full(self.config.max_size));
        }

        let now = Instant::now();
        let ticket = QueueTicket::next();
        let request_id = request.id.clone();
        state.entries.push_back(QueuedRequest {
            ticket,
            request,
            target_model: target_model.clone(),
            enqueued_at: now,
            enqueued_at_utc: Utc::now(),
            retries: 0,
            next_attempt_at: now + self.delay_after(0),
            last_error: None,
        });
        let position = state.entries.len() + state.in_flight;
        debug!(request_id = %request_id, ticket = %ticket, position, "Request queued");

        Ok(QueuedAck {
            ticket,
            position,
            target_model,
            message: format!(
                "All providers are unavailable; request queued at position {position}, retry later"
            ),
        })
    }

    /// Remove every entry eligible at `now`, oldest first
    ///
    /// Taken entries count as in flight until passed to [`Self::complete`] or
    /// [`Self::requeue_or_drop`].
    pub fn take_eligible(&self, now: Instant) -> Vec<QueuedRequest> {
        let mut state = self.state.lock();
        let (ready, waiting): (VecDeque<_>, VecDeque<_>) = state
            .entries
            .drain(..)
            .partition(|entry| entry.next_attempt_at <= now);
        state.entries = waiting;
        state.in_flight += ready.len();
        ready.into()
    }

    /// Release the slot of a successfully replayed entry
    pub fn complete(&self, entry: &QueuedRequest) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        debug!(ticket = %entry.ticket, retries = entry.retries, "Queued request completed");
    }

    /// Requeue a failed entry at the back, or drop it when out of retries
    pub fn requeue_or_drop(&self, mut entry: QueuedRequest, error: GatewayError) -> (RequeueOutcome, QueuedRequest) {
        entry.retries += 1;
        entry.last_error = Some(error);

        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        if entry.retries >= self.config.max_retries {
            return (
                RequeueOutcome::Dropped {
                    retries: entry.retries,
                },
                entry,
            );
        }

        let delay = self.delay_after(entry.retries);
        entry.next_attempt_at = Instant::now() + delay;
        let outcome = RequeueOutcome::Requeued {
            retries: entry.retries,
            delay,
        };
        state.entries.push_back(entry.clone());
        (outcome, entry)
    }

    /// Queued entries, excluding replays in flight
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether nothing is queued or in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.entries.is_empty() && state.in_flight == 0
    }

    /// Replays in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Earliest eligibility time among queued entries
    #[must_use]
    pub fn next_eligible_at(&self) -> Option<Instant> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|entry| entry.next_attempt_at)
            .min()
    }

    /// Tickets in queue order
    #[must_use]
    pub fn tickets(&self) -> Vec<QueueTicket> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|entry| entry.ticket)
            .collect()
    }
}

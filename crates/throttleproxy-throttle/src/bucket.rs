//! Byte-denominated token bucket
//!
//! Tokens are bytes. The bucket refills continuously at the current rate and
//! holds at most `rate × burst` tokens. Consumers are served strictly in
//! arrival order: the head of the queue is granted its whole request, in
//! installments as tokens accrue, before the next consumer is looked at.
//!
//! The rate can be changed at any time with [`TokenBucket::set_rate`]; a
//! consumer that is currently sleeping for tokens is woken and recomputes its
//! wait against the new rate.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use throttleproxy_core::domain::BytesPerSecond;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Shortest sleep between two grant attempts.
const MIN_WAIT: Duration = Duration::from_millis(1);

// ============================================================================
// Ledger
// ============================================================================

/// Mutable token accounting, protected by a Mutex and held only for arithmetic.
#[derive(Debug)]
struct Ledger {
    rate: BytesPerSecond,
    /// Current number of available tokens (fractional for smooth refill)
    tokens: f64,
    /// Timestamp of the last refill calculation
    last_refill: Instant,
}

impl Ledger {
    /// Adds the tokens accrued since the last refill, capped at `capacity`.
    fn refill(&mut self, capacity: f64) {
        let now = Instant::now();
        let elapsed_secs = now.duration_since(self.last_refill).as_secs_f64();

        if elapsed_secs > 0.0 {
            self.tokens = (self.tokens + elapsed_secs * self.rate.as_f64()).min(capacity);
            self.last_refill = now;
        }
    }
}

// ============================================================================
// TokenBucket
// ============================================================================

/// Token bucket shared by every channel of one throttle group.
#[derive(Debug)]
pub struct TokenBucket {
    /// FIFO grant queue; tokio's mutex hands the lock out in request order.
    queue: tokio::sync::Mutex<()>,
    ledger: Mutex<Ledger>,
    /// Signalled whenever the rate changes
    retargeted: Notify,
    /// Seconds of traffic the bucket can hold
    burst: Duration,
}

impl TokenBucket {
    /// Creates a bucket for `rate` holding `burst` worth of traffic.
    ///
    /// The bucket starts full.
    pub fn new(rate: BytesPerSecond, burst: Duration) -> Self {
        let burst = if burst.is_zero() { MIN_WAIT } else { burst };
        let tokens = Self::capacity_for(rate, burst);
        Self {
            queue: tokio::sync::Mutex::new(()),
            ledger: Mutex::new(Ledger {
                rate,
                tokens,
                last_refill: Instant::now(),
            }),
            retargeted: Notify::new(),
            burst,
        }
    }

    /// Bucket depth in whole bytes, never less than one.
    fn capacity_for(rate: BytesPerSecond, burst: Duration) -> f64 {
        (rate.as_f64() * burst.as_secs_f64()).floor().max(1.0)
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current refill rate.
    pub fn rate(&self) -> BytesPerSecond {
        self.ledger().rate
    }

    /// Current capacity in bytes.
    pub fn capacity(&self) -> u64 {
        Self::capacity_for(self.rate(), self.burst) as u64
    }

    /// Tokens available right now (after refill).
    pub fn available(&self) -> f64 {
        let mut ledger = self.ledger();
        let capacity = Self::capacity_for(ledger.rate, self.burst);
        ledger.refill(capacity);
        ledger.tokens
    }

    /// Changes the refill rate in place.
    ///
    /// Tokens accrued so far are credited at the old rate, then clamped to the
    /// new capacity. Waiting consumers are woken to recompute their wait.
    pub fn set_rate(&self, rate: BytesPerSecond) {
        {
            let mut ledger = self.ledger();
            let old_capacity = Self::capacity_for(ledger.rate, self.burst);
            ledger.refill(old_capacity);
            ledger.rate = rate;
            ledger.tokens = ledger.tokens.min(Self::capacity_for(rate, self.burst));
        }
        self.retargeted.notify_waiters();
    }

    /// Waits until `bytes` tokens have been granted to the caller.
    ///
    /// Requests larger than the bucket are served in capacity-sized
    /// installments. Dropping the future gives up the place in the queue;
    /// tokens already granted are not returned.
    pub async fn consume(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }

        let _turn = self.queue.lock().await;
        let mut outstanding = bytes;

        loop {
            let notified = self.retargeted.notified();
            tokio::pin!(notified);
            // Register before reading the rate so a concurrent retarget is not missed.
            notified.as_mut().enable();

            let wait = {
                let mut ledger = self.ledger();
                let capacity = Self::capacity_for(ledger.rate, self.burst);
                ledger.refill(capacity);

                let granted = (ledger.tokens.floor() as u64).min(outstanding);
                ledger.tokens -= granted as f64;
                outstanding -= granted;

                if outstanding == 0 {
                    return;
                }

                let needed = (outstanding as f64).min(capacity) - ledger.tokens;
                Duration::from_secs_f64(needed.max(0.0) / ledger.rate.as_f64()).max(MIN_WAIT)
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = &mut notified => {}
            }
        }
    }
}

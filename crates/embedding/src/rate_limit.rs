// Sliding-window request limiter with refundable slots.
//
// A slot is recorded per outgoing request. Requests that fail before the
// provider could count them (network faults, 5xx) refund their slot so
// the local window stays aligned with the provider's.

use std::{
  collections::VecDeque,
  time::{Duration, Instant},
};

use tracing::trace;

#[derive(Debug, Clone)]
pub struct WindowConfig {
  /// Requests allowed inside one window.
  pub max_requests: usize,
  pub window: Duration,
  /// Upper bound on the total time a caller waits for a slot.
  pub max_wait: Duration,
}

impl Default for WindowConfig {
  fn default() -> Self {
    Self {
      max_requests: 60,
      window: Duration::from_secs(10),
      max_wait: Duration::from_secs(60),
    }
  }
}

/// Handle for refunding a recorded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot(u64);

#[derive(Debug)]
pub struct RequestWindow {
  config: WindowConfig,
  entries: VecDeque<(Instant, u64)>,
  next_slot: u64,
}

impl RequestWindow {
  pub fn new(config: WindowConfig) -> Self {
    let capacity = config.max_requests + 1;
    Self {
      config,
      entries: VecDeque::with_capacity(capacity),
      next_slot: 0,
    }
  }

  pub fn max_wait(&self) -> Duration {
    self.config.max_wait
  }

  fn evict_expired(&mut self) {
    let cutoff = Instant::now() - self.config.window;
    while let Some(&(ts, _)) = self.entries.front() {
      if ts < cutoff {
        self.entries.pop_front();
      } else {
        break;
      }
    }
  }

  /// Record a request if the window has room; otherwise return how long
  /// until the oldest entry expires.
  pub fn try_acquire(&mut self) -> Result<Slot, Duration> {
    self.evict_expired();

    if self.entries.len() < self.config.max_requests {
      let id = self.next_slot;
      self.next_slot = self.next_slot.wrapping_add(1);
      self.entries.push_back((Instant::now(), id));
      return Ok(Slot(id));
    }

    let wait = self
      .entries
      .front()
      .map(|&(ts, _)| (ts + self.config.window).saturating_duration_since(Instant::now()))
      .unwrap_or_default();
    Err(wait)
  }

  /// Return a slot recorded by `try_acquire`. A slot that already aged
  /// out of the window is a no-op.
  pub fn refund(&mut self, slot: Slot) -> bool {
    if let Some(pos) = self.entries.iter().position(|&(_, id)| id == slot.0) {
      self.entries.remove(pos);
      trace!(slot = slot.0, in_window = self.entries.len(), "Rate-limit slot refunded");
      true
    } else {
      false
    }
  }
}

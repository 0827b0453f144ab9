//! Failure monitoring: alert rules over the `processing.failed` stream.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bus::{EventHandler, Message};
use chrono::{DateTime, Utc};
use sift_core::CoreError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::ProcessingFailed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
  Warning,
  Critical,
}

/// Raise an alert when `max_failures` failures of `kind` (or any kind,
/// when `None`) land within `window`.
#[derive(Debug, Clone)]
pub struct AlertRule {
  pub id: Uuid,
  pub name: String,
  pub kind: Option<String>,
  pub max_failures: usize,
  pub window: Duration,
  pub severity: AlertSeverity,
}

impl AlertRule {
  pub fn any_kind(name: &str, max_failures: usize, window: Duration) -> Self {
    Self {
      id: Uuid::new_v4(),
      name: name.to_string(),
      kind: None,
      max_failures: max_failures.max(1),
      window,
      severity: AlertSeverity::Warning,
    }
  }

  pub fn for_kind(name: &str, kind: &str, max_failures: usize, window: Duration) -> Self {
    Self {
      kind: Some(kind.to_string()),
      ..Self::any_kind(name, max_failures, window)
    }
  }

  pub fn critical(mut self) -> Self {
    self.severity = AlertSeverity::Critical;
    self
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
  pub id: Uuid,
  pub rule_id: Uuid,
  pub message: String,
  pub severity: AlertSeverity,
  pub triggered_at: DateTime<Utc>,
}

struct RuleState {
  rule: AlertRule,
  recent: VecDeque<DateTime<Utc>>,
}

/// Consumes `processing.failed` and evaluates the configured rules.
pub struct Monitor {
  states: Mutex<Vec<RuleState>>,
  alerts: Mutex<Vec<Alert>>,
}

impl Monitor {
  pub fn new(rules: Vec<AlertRule>) -> Self {
    Self {
      states: Mutex::new(rules.into_iter().map(|rule| RuleState {
        rule,
        recent: VecDeque::new(),
      }).collect()),
      alerts: Mutex::new(Vec::new()),
    }
  }

  /// One default rule: five failures of any kind inside a minute.
  pub fn with_default_rules() -> Self {
    Self::new(vec![AlertRule::any_kind("failure-burst", 5, Duration::from_secs(60))])
  }

  pub fn alerts(&self) -> Vec<Alert> {
    self.alerts.lock().unwrap().clone()
  }

  fn record_failure(&self, kind: &str, now: DateTime<Utc>) -> Vec<Alert> {
    let mut raised = Vec::new();
    let mut states = self.states.lock().unwrap();

    for state in states.iter_mut() {
      if state.rule.kind.as_deref().is_some_and(|k| k != kind) {
        continue;
      }
      state.recent.push_back(now);
      let window = chrono::Duration::from_std(state.rule.window).unwrap_or_else(|_| chrono::Duration::seconds(60));
      let cutoff = now - window;
      while state.recent.front().is_some_and(|t| *t < cutoff) {
        state.recent.pop_front();
      }

      if state.recent.len() >= state.rule.max_failures {
        let alert = Alert {
          id: Uuid::new_v4(),
          rule_id: state.rule.id,
          message: format!(
            "{}: {} failures within {}s",
            state.rule.name,
            state.recent.len(),
            state.rule.window.as_secs()
          ),
          severity: state.rule.severity,
          triggered_at: now,
        };
        warn!(rule = %state.rule.name, count = state.recent.len(), "Alert raised");
        raised.push(alert);
        // Reset the window so one burst raises one alert.
        state.recent.clear();
      }
    }

    if !raised.is_empty() {
      self.alerts.lock().unwrap().extend(raised.clone());
    }
    raised
  }
}

#[async_trait]
impl EventHandler for Monitor {
  async fn handle(&self, message: &Message) -> Result<(), CoreError> {
    if message.topic != bus::topics::PROCESSING_FAILED {
      return Ok(());
    }
    let event: ProcessingFailed = serde_json::from_value(message.envelope.data.clone())
      .map_err(|e| CoreError::validation(format!("malformed failure payload: {e}")))?;
    debug!(job_id = %event.job_id, kind = %event.kind, "Failure observed");
    self.record_failure(&event.kind, Utc::now());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn test_burst_raises_one_alert() {
    let monitor = Monitor::new(vec![AlertRule::any_kind("burst", 3, Duration::from_secs(60))]);
    let now = Utc::now();

    assert!(monitor.record_failure("embed", now).is_empty());
    assert!(monitor.record_failure("embed", now).is_empty());
    let raised = monitor.record_failure("embed", now);
    assert_eq!(raised.len(), 1);
    assert!(raised[0].message.contains("burst"));

    // Window reset: the next failure starts a fresh count.
    assert!(monitor.record_failure("embed", now).is_empty());
  }

  #[test]
  fn test_old_failures_age_out() {
    let monitor = Monitor::new(vec![AlertRule::any_kind("burst", 2, Duration::from_secs(10))]);
    let start = Utc::now();

    assert!(monitor.record_failure("chunk", start).is_empty());
    // Second failure lands outside the window.
    let later = start + chrono::Duration::seconds(30);
    assert!(monitor.record_failure("chunk", later).is_empty());
  }

  #[test]
  fn test_kind_scoped_rule_ignores_other_kinds() {
    let monitor = Monitor::new(vec![AlertRule::for_kind("embed-burst", "embed", 2, Duration::from_secs(60))]);
    let now = Utc::now();

    assert!(monitor.record_failure("extract", now).is_empty());
    assert!(monitor.record_failure("embed", now).is_empty());
    let raised = monitor.record_failure("embed", now);
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].severity, AlertSeverity::Warning);
  }
}

//! In-memory topic-partitioned log with consumer groups.
//!
//! Semantics mirror the broker contract the engine is written against:
//! per-key ordering via hash partitioning, exclusive partition ownership
//! within a group, at-least-once delivery with commit-after-handling, and
//! dead-lettering instead of redelivery loops for poison messages.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{BusError, EventBus, EventEnvelope, EventHandler, Message, Result, topics};

const DEFAULT_PARTITIONS: usize = 4;

struct TopicLog {
  partitions: Vec<RwLock<Vec<Message>>>,
}

impl TopicLog {
  fn new(num_partitions: usize) -> Self {
    Self {
      partitions: (0..num_partitions).map(|_| RwLock::new(Vec::new())).collect(),
    }
  }
}

struct BusInner {
  num_partitions: usize,
  topics: DashMap<String, Arc<TopicLog>>,
  /// `(group, topic) -> member consumer ids`, in join order.
  members: DashMap<(String, String), Vec<u64>>,
  /// `(group, topic, partition) -> next uncommitted offset`.
  offsets: DashMap<(String, String, usize), u64>,
  next_consumer_id: AtomicU64,
  round_robin: AtomicUsize,
}

impl BusInner {
  fn topic(&self, name: &str) -> Arc<TopicLog> {
    self
      .topics
      .entry(name.to_string())
      .or_insert_with(|| Arc::new(TopicLog::new(self.num_partitions)))
      .clone()
  }

  fn partition_for(&self, key: Option<&str>) -> usize {
    match key {
      Some(key) => {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.num_partitions
      }
      None => self.round_robin.fetch_add(1, Ordering::Relaxed) % self.num_partitions,
    }
  }

  async fn append(
    &self,
    topic: &str,
    key: Option<&str>,
    envelope: EventEnvelope,
    headers: BTreeMap<String, String>,
  ) {
    let log = self.topic(topic);
    let partition = self.partition_for(key);
    let mut messages = log.partitions[partition].write().await;
    let offset = messages.len() as u64;
    messages.push(Message {
      topic: topic.to_string(),
      partition,
      offset,
      key: key.map(str::to_string),
      headers,
      envelope,
    });
    trace!(topic, partition, offset, "Message published");
  }
}

/// In-process event bus.
#[derive(Clone)]
pub struct MemoryBus {
  inner: Arc<BusInner>,
}

impl Default for MemoryBus {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryBus {
  pub fn new() -> Self {
    Self::with_partitions(DEFAULT_PARTITIONS)
  }

  pub fn with_partitions(num_partitions: usize) -> Self {
    Self {
      inner: Arc::new(BusInner {
        num_partitions: num_partitions.max(1),
        topics: DashMap::new(),
        members: DashMap::new(),
        offsets: DashMap::new(),
        next_consumer_id: AtomicU64::new(0),
        round_robin: AtomicUsize::new(0),
      }),
    }
  }

  /// Join `group` on `topics`. Partition ownership is recomputed from the
  /// member list on every poll, so later joiners rebalance the group.
  pub fn subscribe(&self, group: &str, subscribed: &[&str]) -> Consumer {
    let id = self.inner.next_consumer_id.fetch_add(1, Ordering::Relaxed);
    for topic in subscribed {
      self
        .inner
        .members
        .entry((group.to_string(), topic.to_string()))
        .or_default()
        .push(id);
    }
    debug!(group, consumer_id = id, topics = subscribed.len(), "Consumer subscribed");
    Consumer {
      id,
      group: group.to_string(),
      topics: subscribed.iter().map(|s| s.to_string()).collect(),
      inner: self.inner.clone(),
      poll_interval: Duration::from_millis(10),
    }
  }

  /// Total messages appended to a topic, across partitions. Test support.
  pub async fn topic_len(&self, topic: &str) -> usize {
    let Some(log) = self.inner.topics.get(topic).map(|e| e.clone()) else {
      return 0;
    };
    let mut total = 0;
    for partition in &log.partitions {
      total += partition.read().await.len();
    }
    total
  }
}

#[async_trait]
impl EventBus for MemoryBus {
  async fn publish_with_headers(
    &self,
    topic: &str,
    key: Option<&str>,
    envelope: EventEnvelope,
    headers: BTreeMap<String, String>,
  ) -> Result<()> {
    self.inner.append(topic, key, envelope, headers).await;
    Ok(())
  }
}

/// One member of a consumer group.
pub struct Consumer {
  id: u64,
  group: String,
  topics: Vec<String>,
  inner: Arc<BusInner>,
  poll_interval: Duration,
}

impl Consumer {
  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  fn assigned_partitions(&self, topic: &str) -> Vec<usize> {
    let Some(members) = self.inner.members.get(&(self.group.clone(), topic.to_string())) else {
      return Vec::new();
    };
    let Some(my_index) = members.iter().position(|m| *m == self.id) else {
      return Vec::new();
    };
    (0..self.inner.num_partitions)
      .filter(|p| p % members.len() == my_index)
      .collect()
  }

  /// Drain every owned partition once. Returns the number of messages
  /// handled. Offsets commit after each handler invocation regardless of
  /// its outcome; failures go to the dead-letter topic.
  pub async fn poll_once(&self, handler: &dyn EventHandler) -> Result<usize> {
    let mut handled = 0;
    for topic in &self.topics {
      let log = self.inner.topic(topic);
      for partition in self.assigned_partitions(topic) {
        let offset_key = (self.group.clone(), topic.clone(), partition);
        loop {
          let committed = self.inner.offsets.get(&offset_key).map(|o| *o).unwrap_or(0);
          let next = {
            let messages = log.partitions[partition].read().await;
            messages.get(committed as usize).cloned()
          };
          let Some(message) = next else { break };

          if let Err(err) = handler.handle(&message).await {
            warn!(
              topic = %message.topic,
              partition,
              offset = message.offset,
              error = %err,
              "Handler failed, dead-lettering message"
            );
            let dead_letter = EventEnvelope::new(
              "processing_failed",
              json!({
                "original_topic": message.topic,
                "error_kind": err.kind.as_str(),
                "error_message": err.message,
                "envelope": serde_json::to_value(&message.envelope).map_err(BusError::Serialization)?,
              }),
            );
            self
              .inner
              .append(topics::DEAD_LETTER, message.key.as_deref(), dead_letter, BTreeMap::new())
              .await;
          }

          // Commit even on failure: a poison message must not wedge its
          // partition.
          self.inner.offsets.insert(offset_key.clone(), committed + 1);
          handled += 1;
        }
      }
    }
    Ok(handled)
  }

  /// Poll until `cancel` fires. An in-flight handler always finishes
  /// before the loop exits.
  pub async fn run(&self, handler: Arc<dyn EventHandler>, cancel: CancellationToken) -> Result<()> {
    debug!(group = %self.group, consumer_id = self.id, "Consumer loop starting");
    loop {
      if cancel.is_cancelled() {
        break;
      }
      let handled = self.poll_once(handler.as_ref()).await?;
      if handled == 0 {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = tokio::time::sleep(self.poll_interval) => {}
        }
      }
    }
    debug!(group = %self.group, consumer_id = self.id, "Consumer loop stopped");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use pretty_assertions::assert_eq;
  use sift_core::CoreError;

  use super::*;

  struct Collector {
    seen: Mutex<Vec<String>>,
    fail_on: Option<String>,
  }

  impl Collector {
    fn new() -> Self {
      Self {
        seen: Mutex::new(Vec::new()),
        fail_on: None,
      }
    }

    fn failing_on(event: &str) -> Self {
      Self {
        seen: Mutex::new(Vec::new()),
        fail_on: Some(event.to_string()),
      }
    }

    fn events(&self) -> Vec<String> {
      self.seen.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl EventHandler for Collector {
    async fn handle(&self, message: &Message) -> std::result::Result<(), CoreError> {
      self.seen.lock().unwrap().push(message.envelope.event_type.clone());
      if self.fail_on.as_deref() == Some(message.envelope.event_type.as_str()) {
        return Err(CoreError::internal("handler blew up"));
      }
      Ok(())
    }
  }

  #[tokio::test]
  async fn test_per_key_ordering() {
    let bus = MemoryBus::new();
    let consumer = bus.subscribe("g", &["t"]);

    for i in 0..20 {
      bus
        .publish("t", Some("doc-1"), EventEnvelope::new(format!("e{i}"), json!({})))
        .await
        .unwrap();
    }

    let handler = Collector::new();
    consumer.poll_once(&handler).await.unwrap();

    let expected: Vec<String> = (0..20).map(|i| format!("e{i}")).collect();
    assert_eq!(handler.events(), expected);
  }

  #[tokio::test]
  async fn test_group_processes_each_message_once() {
    let bus = MemoryBus::new();
    let a = bus.subscribe("g", &["t"]);
    let b = bus.subscribe("g", &["t"]);

    for i in 0..40 {
      bus
        .publish("t", Some(&format!("key-{i}")), EventEnvelope::new(format!("e{i}"), json!({})))
        .await
        .unwrap();
    }

    let handler_a = Collector::new();
    let handler_b = Collector::new();
    a.poll_once(&handler_a).await.unwrap();
    b.poll_once(&handler_b).await.unwrap();

    let mut all = handler_a.events();
    all.extend(handler_b.events());
    all.sort();
    let mut expected: Vec<String> = (0..40).map(|i| format!("e{i}")).collect();
    expected.sort();
    assert_eq!(all, expected, "every message handled exactly once across the group");
    assert!(!handler_a.events().is_empty() && !handler_b.events().is_empty());
  }

  #[tokio::test]
  async fn test_independent_groups_both_receive() {
    let bus = MemoryBus::new();
    let g1 = bus.subscribe("group-1", &["t"]);
    let g2 = bus.subscribe("group-2", &["t"]);

    bus
      .publish("t", Some("k"), EventEnvelope::new("evt", json!({})))
      .await
      .unwrap();

    let h1 = Collector::new();
    let h2 = Collector::new();
    g1.poll_once(&h1).await.unwrap();
    g2.poll_once(&h2).await.unwrap();

    assert_eq!(h1.events(), vec!["evt"]);
    assert_eq!(h2.events(), vec!["evt"]);
  }

  #[tokio::test]
  async fn test_handler_error_commits_and_dead_letters() {
    let bus = MemoryBus::new();
    let consumer = bus.subscribe("g", &["t"]);

    for event in ["ok-1", "poison", "ok-2"] {
      bus
        .publish("t", Some("k"), EventEnvelope::new(event, json!({})))
        .await
        .unwrap();
    }

    let handler = Collector::failing_on("poison");
    consumer.poll_once(&handler).await.unwrap();

    // The poison message did not block the partition.
    assert_eq!(handler.events(), vec!["ok-1", "poison", "ok-2"]);
    assert_eq!(bus.topic_len(topics::DEAD_LETTER).await, 1);

    // A second poll redelivers nothing.
    let again = Collector::new();
    consumer.poll_once(&again).await.unwrap();
    assert!(again.events().is_empty());
  }

  #[tokio::test]
  async fn test_run_stops_on_cancel() {
    let bus = MemoryBus::new();
    let consumer = bus.subscribe("g", &["t"]);
    let handler = Arc::new(Collector::new());
    let cancel = CancellationToken::new();

    let join = {
      let handler = handler.clone();
      let cancel = cancel.clone();
      tokio::spawn(async move { consumer.run(handler, cancel).await })
    };

    bus
      .publish("t", Some("k"), EventEnvelope::new("evt", json!({})))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    join.await.unwrap().unwrap();

    assert_eq!(handler.events(), vec!["evt"]);
  }
}

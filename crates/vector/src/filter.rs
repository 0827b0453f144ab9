//! Payload filters: boolean conjunction of equality, range and
//! nested-path conditions, evaluated against the payload's JSON form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Condition {
  /// Equality on the value at `path`.
  Match { path: String, value: Value },
  /// Numeric range on the value at `path`; unset bounds are open.
  Range {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    gte: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lte: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lt: Option<f64>,
  },
}

impl Condition {
  fn matches(&self, payload: &Value) -> bool {
    match self {
      Condition::Match { path, value } => lookup(payload, path).is_some_and(|found| values_equal(found, value)),
      Condition::Range { path, gte, lte, gt, lt } => {
        let Some(found) = lookup(payload, path).and_then(Value::as_f64) else {
          return false;
        };
        gte.is_none_or(|b| found >= b)
          && lte.is_none_or(|b| found <= b)
          && gt.is_none_or(|b| found > b)
          && lt.is_none_or(|b| found < b)
      }
    }
  }
}

/// Dotted-path lookup into a JSON object (`user_metadata.lang`).
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
  let mut current = value;
  for segment in path.split('.') {
    current = current.as_object()?.get(segment)?;
  }
  Some(current)
}

/// Equality that treats integer and float representations of the same
/// number as equal, since payload numbers arrive from JSON both ways.
fn values_equal(a: &Value, b: &Value) -> bool {
  match (a.as_f64(), b.as_f64()) {
    (Some(x), Some(y)) => x == y,
    _ => a == b,
  }
}

/// Conjunction of conditions; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub must: Vec<Condition>,
}

impl Filter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
    self.must.push(Condition::Match {
      path: path.into(),
      value: value.into(),
    });
    self
  }

  pub fn gte(mut self, path: impl Into<String>, bound: f64) -> Self {
    self.must.push(Condition::Range {
      path: path.into(),
      gte: Some(bound),
      lte: None,
      gt: None,
      lt: None,
    });
    self
  }

  pub fn lte(mut self, path: impl Into<String>, bound: f64) -> Self {
    self.must.push(Condition::Range {
      path: path.into(),
      gte: None,
      lte: Some(bound),
      gt: None,
      lt: None,
    });
    self
  }

  pub fn is_empty(&self) -> bool {
    self.must.is_empty()
  }

  pub fn matches(&self, payload: &Value) -> bool {
    self.must.iter().all(|c| c.matches(payload))
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn payload() -> Value {
    json!({
      "document_id": "3e0170cb-0a70-4867-a9a9-2a0dcba8e04a",
      "chunk_index": 4,
      "page": 2,
      "user_metadata": { "lang": "en", "score": 0.5 }
    })
  }

  #[test]
  fn test_empty_filter_matches_everything() {
    assert!(Filter::new().matches(&payload()));
  }

  #[test]
  fn test_equality_on_top_level_and_nested_paths() {
    let filter = Filter::new()
      .eq("document_id", "3e0170cb-0a70-4867-a9a9-2a0dcba8e04a")
      .eq("user_metadata.lang", "en");
    assert!(filter.matches(&payload()));

    let miss = Filter::new().eq("user_metadata.lang", "ko");
    assert!(!miss.matches(&payload()));
  }

  #[test]
  fn test_missing_path_never_matches() {
    let filter = Filter::new().eq("no_such_field", 1);
    assert!(!filter.matches(&payload()));
  }

  #[test]
  fn test_range_bounds() {
    assert!(Filter::new().gte("page", 2.0).matches(&payload()));
    assert!(Filter::new().lte("page", 2.0).matches(&payload()));
    assert!(!Filter::new().gte("page", 3.0).matches(&payload()));

    let strict = Filter {
      must: vec![Condition::Range {
        path: "page".into(),
        gte: None,
        lte: None,
        gt: Some(2.0),
        lt: None,
      }],
    };
    assert!(!strict.matches(&payload()));
  }

  #[test]
  fn test_conjunction_requires_all() {
    let filter = Filter::new().eq("page", 2).gte("chunk_index", 10.0);
    assert!(!filter.matches(&payload()));
  }

  #[test]
  fn test_numeric_equality_across_representations() {
    let filter = Filter::new().eq("user_metadata.score", 0.5);
    assert!(filter.matches(&payload()));
  }

  #[test]
  fn test_filter_serde_round_trip() {
    let filter = Filter::new().eq("page", 2).gte("chunk_index", 1.0);
    let json = serde_json::to_string(&filter).unwrap();
    let back: Filter = serde_json::from_str(&json).unwrap();
    assert_eq!(back, filter);
  }
}

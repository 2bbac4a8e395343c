//! Time-based staleness decisions for the held collection.

use chrono::{DateTime, Duration, Utc};

/// Default staleness window, in minutes.
pub const DEFAULT_STALE_AFTER_MINUTES: i64 = 10;

/// Decides whether a held collection may still be served from memory.
///
/// Purely time-based: it never tries to detect server-side changes made by
/// other clients. Callers pass `now` explicitly so the decision can be
/// driven by virtual time in tests.
#[derive(Debug, Clone, Copy)]
pub struct StalenessPolicy {
  stale_after: Duration,
}

impl StalenessPolicy {
  pub fn new(stale_after: Duration) -> Self {
    Self { stale_after }
  }

  /// True when the collection held for `held_scope` cannot serve `scope`:
  /// on a scope switch, when no fetch has ever succeeded, or when the last
  /// successful fetch is older than the staleness window.
  pub fn should_refetch(
    &self,
    held_scope: Option<&str>,
    last_fetch_at: Option<DateTime<Utc>>,
    scope: &str,
    now: DateTime<Utc>,
  ) -> bool {
    if held_scope != Some(scope) {
      return true;
    }
    match last_fetch_at {
      Some(at) => now - at > self.stale_after,
      None => true,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn policy() -> StalenessPolicy {
    StalenessPolicy::new(Duration::minutes(10))
  }

  #[test]
  fn refetch_when_nothing_is_held() {
    let now = Utc::now();
    assert!(policy().should_refetch(None, None, "u1", now));
  }

  #[test]
  fn refetch_on_scope_switch() {
    let now = Utc::now();
    assert!(policy().should_refetch(Some("u1"), Some(now), "u2", now));
  }

  #[test]
  fn refetch_when_never_fetched() {
    let now = Utc::now();
    assert!(policy().should_refetch(Some("u1"), None, "u1", now));
  }

  #[test]
  fn fresh_immediately_after_a_fetch() {
    let now = Utc::now();
    assert!(!policy().should_refetch(Some("u1"), Some(now), "u1", now));
  }

  #[test]
  fn stale_once_the_window_passes() {
    let fetched = Utc::now();
    let policy = policy();

    let just_inside = fetched + Duration::minutes(9);
    assert!(!policy.should_refetch(Some("u1"), Some(fetched), "u1", just_inside));

    let past_window = fetched + Duration::minutes(11);
    assert!(policy.should_refetch(Some("u1"), Some(fetched), "u1", past_window));
  }
}

//! Typed cache keys for case API resources.

use sha2::{Digest, Sha256};
use std::fmt;

/// A remote resource kind addressable by kind + id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
  Case,
  Comment,
  Attachment,
  Group,
  /// Membership of a group, keyed by account
  GroupUsers,
}

impl ResourceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceKind::Case => "case",
      ResourceKind::Comment => "comment",
      ResourceKind::Attachment => "attachment",
      ResourceKind::Group => "group",
      ResourceKind::GroupUsers => "group_users",
    }
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A value that can be turned into a stable cache key.
pub trait QueryKey {
  /// Deterministic key used for storage lookups.
  fn cache_key(&self) -> String;

  /// Human readable description for logs.
  fn description(&self) -> String;
}

/// Prefix shared by every paginated filter-result entry.
pub const FILTER_PREFIX: &str = "filter:";

/// Query key types for case API calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaseQueryKey {
  /// A single case by number
  Case { number: String },
  /// Comment thread of a case
  Comments { case: String },
  /// Attachment list of a case
  Attachments { case: String },
  /// Groups visible to an account
  Groups { account: String },
  /// A single group of an account
  Group { account: String, group: String },
  /// Members of a group
  GroupUsers { account: String, group: String },
  /// One page of a filtered case list.
  /// `canonical` is the canonical rendering of the filter parameters.
  FilterPage {
    canonical: String,
    start: usize,
    count: usize,
  },
}

impl QueryKey for CaseQueryKey {
  fn cache_key(&self) -> String {
    match self {
      Self::Case { number } => format!("case:{}", number),
      Self::Comments { case } => format!("comments:{}", case),
      Self::Attachments { case } => format!("attachments:{}", case),
      Self::Groups { account } => format!("groups:{}", account),
      Self::Group { account, group } => format!("group:{}:{}", account, group),
      Self::GroupUsers { account, group } => format!("group_users:{}:{}", account, group),
      Self::FilterPage {
        canonical,
        start,
        count,
      } => {
        // Hash the filter so keys stay short regardless of keyword length
        let input = format!("{}|start={}|count={}", canonical, start, count);
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        let digest = hasher.finalize();
        format!("{}{}", FILTER_PREFIX, hex::encode(&digest[..12]))
      }
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Case { number } => format!("case {}", number),
      Self::Comments { case } => format!("comments of case {}", case),
      Self::Attachments { case } => format!("attachments of case {}", case),
      Self::Groups { account } => format!("groups of account {}", account),
      Self::Group { account, group } => format!("group {} of account {}", group, account),
      Self::GroupUsers { account, group } => {
        format!("users of group {} (account {})", group, account)
      }
      Self::FilterPage {
        canonical,
        start,
        count,
      } => {
        if canonical.is_empty() {
          format!("cases [{}..{})", start, start + count)
        } else {
          format!("cases {} [{}..{})", canonical, start, start + count)
        }
      }
    }
  }
}

/// A set of keys to drop from the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyPattern {
  Exact(String),
  Prefix(String),
}

impl KeyPattern {
  pub fn exact(key: &impl QueryKey) -> Self {
    KeyPattern::Exact(key.cache_key())
  }

  pub fn matches(&self, key: &str) -> bool {
    match self {
      KeyPattern::Exact(k) => k == key,
      KeyPattern::Prefix(p) => key.starts_with(p.as_str()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn page(canonical: &str, start: usize) -> CaseQueryKey {
    CaseQueryKey::FilterPage {
      canonical: canonical.to_string(),
      start,
      count: 10,
    }
  }

  #[test]
  fn test_resource_keys() {
    let key = CaseQueryKey::Case {
      number: "7".to_string(),
    };
    assert_eq!(key.cache_key(), "case:7");

    let key = CaseQueryKey::Attachments {
      case: "7".to_string(),
    };
    assert_eq!(key.cache_key(), "attachments:7");

    let key = CaseQueryKey::Group {
      account: "540155".to_string(),
      group: "12".to_string(),
    };
    assert_eq!(key.cache_key(), "group:540155:12");
  }

  #[test]
  fn test_filter_keys_are_stable_and_prefixed() {
    let a = page("status=open", 0).cache_key();
    let b = page("status=open", 0).cache_key();
    assert_eq!(a, b);
    assert!(a.starts_with(FILTER_PREFIX));
  }

  #[test]
  fn test_filter_keys_differ_by_params_and_offset() {
    let base = page("status=open", 0).cache_key();
    assert_ne!(base, page("status=closed", 0).cache_key());
    assert_ne!(base, page("status=open", 10).cache_key());
  }

  #[test]
  fn test_patterns() {
    assert!(KeyPattern::Prefix(FILTER_PREFIX.to_string()).matches(&page("", 0).cache_key()));
    assert!(!KeyPattern::Prefix(FILTER_PREFIX.to_string()).matches("case:7"));
    assert!(KeyPattern::Exact("case:7".to_string()).matches("case:7"));
    assert!(!KeyPattern::Exact("case:7".to_string()).matches("case:70"));
  }
}

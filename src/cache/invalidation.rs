//! Cache invalidation after successful writes.
//!
//! Filter predicates are opaque to the cache, so any change to a case drops
//! every cached filter page along with the case's own entries.

use tracing::info;

use super::keys::{CaseQueryKey, KeyPattern, ResourceKind, FILTER_PREFIX};
use super::store::CacheStore;

/// A successful write against the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
  CaseUpdated { case: String },
  CommentPosted { case: String },
  AttachmentAdded { case: String },
  GroupUpdated { account: String, group: String },
  GroupUsersUpdated { account: String, group: String },
  /// A group changed but the owning account is unknown
  AnyGroupChanged,
}

impl Mutation {
  /// Map a kind + id (+ related scope) triple onto a mutation.
  ///
  /// For case-scoped kinds `id` is the case number. For group kinds `id` is
  /// the group id and `scope` is the account.
  pub fn from_parts(kind: ResourceKind, id: &str, scope: Option<&str>) -> Self {
    let id = id.to_string();
    match kind {
      ResourceKind::Case => Mutation::CaseUpdated { case: id },
      ResourceKind::Comment => Mutation::CommentPosted { case: id },
      ResourceKind::Attachment => Mutation::AttachmentAdded { case: id },
      ResourceKind::Group => match scope {
        Some(account) => Mutation::GroupUpdated {
          account: account.to_string(),
          group: id,
        },
        None => Mutation::AnyGroupChanged,
      },
      ResourceKind::GroupUsers => match scope {
        Some(account) => Mutation::GroupUsersUpdated {
          account: account.to_string(),
          group: id,
        },
        None => Mutation::AnyGroupChanged,
      },
    }
  }

  /// Whether the mutation can change the content or order of case lists.
  pub fn affects_case_lists(&self) -> bool {
    matches!(
      self,
      Mutation::CaseUpdated { .. }
        | Mutation::CommentPosted { .. }
        | Mutation::AttachmentAdded { .. }
    )
  }

  /// Keys made stale by this mutation.
  pub fn stale_patterns(&self) -> Vec<KeyPattern> {
    let all_filters = KeyPattern::Prefix(FILTER_PREFIX.to_string());

    match self {
      Mutation::CaseUpdated { case } => vec![
        KeyPattern::exact(&CaseQueryKey::Case {
          number: case.clone(),
        }),
        all_filters,
      ],
      Mutation::CommentPosted { case } => vec![
        KeyPattern::exact(&CaseQueryKey::Comments { case: case.clone() }),
        KeyPattern::exact(&CaseQueryKey::Case {
          number: case.clone(),
        }),
        all_filters,
      ],
      Mutation::AttachmentAdded { case } => vec![
        KeyPattern::exact(&CaseQueryKey::Attachments { case: case.clone() }),
        KeyPattern::exact(&CaseQueryKey::Case {
          number: case.clone(),
        }),
        all_filters,
      ],
      Mutation::GroupUpdated { account, .. } | Mutation::GroupUsersUpdated { account, .. } => {
        account_patterns(account)
      }
      Mutation::AnyGroupChanged => vec![
        KeyPattern::Prefix("groups:".to_string()),
        KeyPattern::Prefix("group:".to_string()),
        KeyPattern::Prefix("group_users:".to_string()),
      ],
    }
  }
}

/// Every group-related entry of an account.
fn account_patterns(account: &str) -> Vec<KeyPattern> {
  vec![
    KeyPattern::exact(&CaseQueryKey::Groups {
      account: account.to_string(),
    }),
    KeyPattern::Prefix(format!("group:{}:", account)),
    KeyPattern::Prefix(format!("group_users:{}:", account)),
  ]
}

/// Drops cache entries made stale by writes.
#[derive(Clone)]
pub struct InvalidationRouter {
  store: CacheStore,
}

impl InvalidationRouter {
  pub fn new(store: CacheStore) -> Self {
    Self { store }
  }

  /// Invalidate after a write on `kind`/`id`. Never fails; absent keys are skipped.
  pub fn on_mutation(&self, kind: ResourceKind, id: &str, scope: Option<&str>) -> Mutation {
    let mutation = Mutation::from_parts(kind, id, scope);
    self.apply(&mutation);
    mutation
  }

  /// Remove every entry the mutation makes stale. Returns the number of entries removed.
  pub fn apply(&self, mutation: &Mutation) -> usize {
    let removed: usize = mutation
      .stale_patterns()
      .iter()
      .map(|pattern| self.store.remove_pattern(pattern))
      .sum();

    info!(?mutation, removed, "invalidated cache entries");
    removed
  }
}

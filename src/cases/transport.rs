//! The request/response seam between the cache engine and the remote API.

use async_trait::async_trait;
use serde_json::Value;

use super::filter::FilterParams;
use super::types::ListPage;
use crate::cache::ResourceKind;
use crate::error::FetchError;

/// A list request: filter plus the forward-paging window `[start, start + count)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
  pub filter: FilterParams,
  pub start: usize,
  pub count: usize,
}

/// Transport to the case API.
///
/// Records travel as raw JSON; callers decode into their record types.
#[async_trait]
pub trait CaseTransport: Send + Sync + 'static {
  /// List records of `kind` matching the request.
  async fn fetch_list(
    &self,
    kind: ResourceKind,
    request: &ListRequest,
  ) -> Result<ListPage<Value>, FetchError>;

  /// Fetch one resource (or a per-case collection such as comments) by id.
  async fn fetch_one(&self, kind: ResourceKind, id: &str) -> Result<Value, FetchError>;

  /// Apply a write and return the resulting record.
  async fn mutate(&self, kind: ResourceKind, id: &str, patch: &Value) -> Result<Value, FetchError>;
}

//! Session-scoped access to the case API.
//!
//! A `Session` owns everything that lives as long as one signed-in user:
//! the response cache, its invalidation router, and the case-list window.
//! Reads go through the cache; writes go to the API and then invalidate.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::cache::{
  CacheResult, CacheStore, CaseQueryKey, InvalidationRouter, Mutation, ResourceKind,
};
use crate::cases::filter::FilterParams;
use crate::cases::transport::{CaseTransport, ListRequest};
use crate::cases::types::{Attachment, Case, Comment, Group};
use crate::error::FetchError;
use crate::search::{FetchState, IncrementalFetcher, Page};

/// Upper bound on groups fetched for one account
const GROUP_LIST_LIMIT: usize = 500;

pub struct Session<X> {
  transport: Arc<X>,
  cache: CacheStore,
  router: InvalidationRouter,
  cases: IncrementalFetcher<Case, X>,
  authenticated: Arc<AtomicBool>,
  page_size: usize,
}

impl<X> Clone for Session<X> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      cache: self.cache.clone(),
      router: self.router.clone(),
      cases: self.cases.clone(),
      authenticated: Arc::clone(&self.authenticated),
      page_size: self.page_size,
    }
  }
}

impl<X: CaseTransport> Session<X> {
  /// Start an unauthenticated session.
  pub fn new(transport: X, cache: CacheStore, page_size: usize) -> Self {
    let transport = Arc::new(transport);
    let authenticated = Arc::new(AtomicBool::new(false));
    let cases = IncrementalFetcher::new(
      Arc::clone(&transport),
      cache.clone(),
      Arc::clone(&authenticated),
      page_size,
    );

    Self {
      transport,
      router: InvalidationRouter::new(cache.clone()),
      cache,
      cases,
      authenticated,
      page_size: page_size.max(1),
    }
  }

  /// Mark the session as signed in. Requests are refused until this is called.
  pub fn authenticate(&self) {
    self.authenticated.store(true, Ordering::SeqCst);
  }

  pub fn is_authenticated(&self) -> bool {
    self.authenticated.load(Ordering::SeqCst)
  }

  /// Sign out: drop every cached response and the search window.
  pub fn logout(&self) {
    self.authenticated.store(false, Ordering::SeqCst);
    self.cases.clear();
    self.cache.clear();
    info!("session ended");
  }

  /// Forget the current search (new search, navigation away).
  pub fn clear(&self) {
    self.cases.clear();
  }

  pub fn cache(&self) -> &CacheStore {
    &self.cache
  }

  pub fn transport(&self) -> &Arc<X> {
    &self.transport
  }

  /// Begin or continue an incremental case search.
  pub fn search(&self, filter: FilterParams) -> SearchHandle<X> {
    SearchHandle {
      fetcher: self.cases.clone(),
      filter,
      page_size: self.page_size,
    }
  }

  /// Drop everything a successful write on `kind`/`id` made stale.
  pub fn invalidate(&self, kind: ResourceKind, id: &str) -> Mutation {
    self.invalidate_scoped(kind, id, None)
  }

  /// As `invalidate`, with the owning scope (account) of group resources.
  pub fn invalidate_scoped(&self, kind: ResourceKind, id: &str, scope: Option<&str>) -> Mutation {
    // The window goes first so an in-flight page can no longer be cached
    if Mutation::from_parts(kind, id, scope).affects_case_lists() {
      self.cases.clear();
    }
    self.router.on_mutation(kind, id, scope)
  }

  fn ensure_authenticated(&self) -> Result<(), FetchError> {
    if self.is_authenticated() {
      Ok(())
    } else {
      Err(FetchError::Unauthorized(
        "session is not authenticated".to_string(),
      ))
    }
  }

  /// Cache-first read of a single resource.
  async fn read_through<T>(
    &self,
    key: CaseQueryKey,
    kind: ResourceKind,
    id: &str,
  ) -> Result<CacheResult<T>, FetchError>
  where
    T: Serialize + DeserializeOwned,
  {
    self.ensure_authenticated()?;

    if let Some(hit) = self.cache.get::<T>(&key) {
      return Ok(hit);
    }

    let value = self.transport.fetch_one(kind, id).await?;
    let data: T = serde_json::from_value(value)?;
    self.cache.put(&key, &data);
    Ok(CacheResult::from_network(data))
  }

  /// Apply a write, then invalidate whether or not the response decodes.
  async fn write<T: DeserializeOwned>(
    &self,
    kind: ResourceKind,
    id: &str,
    scope: Option<&str>,
    patch: &Value,
  ) -> Result<T, FetchError> {
    self.ensure_authenticated()?;

    let value = self.transport.mutate(kind, id, patch).await?;
    self.invalidate_scoped(kind, id, scope);
    Ok(serde_json::from_value(value)?)
  }

  pub async fn case(&self, number: &str) -> Result<CacheResult<Case>, FetchError> {
    let key = CaseQueryKey::Case {
      number: number.to_string(),
    };
    self.read_through(key, ResourceKind::Case, number).await
  }

  pub async fn comments(&self, number: &str) -> Result<CacheResult<Vec<Comment>>, FetchError> {
    let key = CaseQueryKey::Comments {
      case: number.to_string(),
    };
    self.read_through(key, ResourceKind::Comment, number).await
  }

  pub async fn attachments(&self, number: &str) -> Result<CacheResult<Vec<Attachment>>, FetchError> {
    let key = CaseQueryKey::Attachments {
      case: number.to_string(),
    };
    self.read_through(key, ResourceKind::Attachment, number).await
  }

  /// Case groups visible to `account`.
  pub async fn groups(&self, account: &str) -> Result<CacheResult<Vec<Group>>, FetchError> {
    self.ensure_authenticated()?;

    let key = CaseQueryKey::Groups {
      account: account.to_string(),
    };
    if let Some(hit) = self.cache.get::<Vec<Group>>(&key) {
      return Ok(hit);
    }

    let request = ListRequest {
      filter: FilterParams::default(),
      start: 0,
      count: GROUP_LIST_LIMIT,
    };
    let page = self
      .transport
      .fetch_list(ResourceKind::Group, &request)
      .await?;
    let groups = page
      .records
      .into_iter()
      .map(serde_json::from_value::<Group>)
      .collect::<Result<Vec<_>, _>>()?;

    self.cache.put(&key, &groups);
    Ok(CacheResult::from_network(groups))
  }

  pub async fn update_case(&self, number: &str, patch: &Value) -> Result<Case, FetchError> {
    self.write(ResourceKind::Case, number, None, patch).await
  }

  pub async fn post_comment(&self, number: &str, text: &str) -> Result<Comment, FetchError> {
    let body = json!({ "text": text, "public": true });
    self.write(ResourceKind::Comment, number, None, &body).await
  }

  pub async fn update_group(
    &self,
    account: &str,
    group: &str,
    patch: &Value,
  ) -> Result<Group, FetchError> {
    self
      .write(ResourceKind::Group, group, Some(account), patch)
      .await
  }
}

/// A search bound to one filter and page size.
pub struct SearchHandle<X> {
  fetcher: IncrementalFetcher<Case, X>,
  filter: FilterParams,
  page_size: usize,
}

impl<X: CaseTransport> SearchHandle<X> {
  pub fn with_page_size(mut self, page_size: usize) -> Self {
    self.page_size = page_size.max(1);
    self
  }

  pub fn filter(&self) -> &FilterParams {
    &self.filter
  }

  pub fn page_size(&self) -> usize {
    self.page_size
  }

  /// Page `page` (1-based) of the search results.
  pub async fn request_page(&self, page: usize) -> Result<Page<Case>, FetchError> {
    self
      .fetcher
      .request_page(&self.filter, page, self.page_size)
      .await
  }

  pub fn state(&self) -> FetchState {
    self.fetcher.state()
  }

  pub fn total(&self) -> Option<usize> {
    self.fetcher.total_reported()
  }
}

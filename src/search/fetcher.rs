//! Incremental, window-backed paging over filtered case lists.
//!
//! A page request is answered, in order of preference, from the in-memory
//! window, from cached page responses, or from the case API. Network
//! requests always extend the window at its end, one page at a time, and
//! only one such request runs per window. Concurrent requests for the same
//! page share one in-flight future; requests for later pages queue behind it.
//!
//! Every window generation carries a context id. Changing the filter (or
//! calling `clear`) bumps it, and any response that arrives for an older
//! context is dropped instead of merged.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::window::{page_range, ResultWindow};
use crate::cache::{CacheStore, PageSource, Record};
use crate::cases::filter::FilterParams;
use crate::cases::transport::{CaseTransport, ListRequest};
use crate::cases::types::ListPage;
use crate::error::FetchError;

/// Where the fetcher stands with respect to its most recent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
  /// Nothing requested since construction or the last reset
  Idle,
  /// A page request is waiting on the network
  Fetching,
  /// The last requested page was fully available
  Satisfied,
  /// The window holds the whole result set
  Exhausted,
  /// The last network request failed; the window is unchanged
  Failed,
}

/// A slice of the window handed back to a caller.
#[derive(Debug, Clone)]
pub struct Page<T> {
  pub items: Vec<T>,
  /// 1-based page number
  pub number: usize,
  pub page_size: usize,
  /// Server-reported total, if known
  pub total: Option<usize>,
  /// Whether the whole result set has been fetched
  pub complete: bool,
  pub source: PageSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FlightKey {
  context: u64,
  page: usize,
  page_size: usize,
}

type Flight<T> = Shared<BoxFuture<'static, Result<Page<T>, FetchError>>>;

struct SearchState<T> {
  window: ResultWindow<T>,
  /// Canonical filter the window was built for
  canonical: Option<String>,
  context: u64,
  state: FetchState,
  /// The filter changed: the first page must come from the network
  revalidate: bool,
}

impl<T: Clone> SearchState<T> {
  fn reset(&mut self, canonical: Option<String>, page_size: usize) {
    self.context += 1;
    self.window.clear();
    self.window.set_page_size(page_size);
    self.revalidate = self.canonical.is_some() && canonical.is_some();
    self.canonical = canonical;
    self.state = FetchState::Idle;
  }

  fn page(&mut self, number: usize, page_size: usize, source: PageSource) -> Page<T> {
    let complete = self.window.is_complete();
    self.state = if complete {
      FetchState::Exhausted
    } else {
      FetchState::Satisfied
    };
    Page {
      items: self.window.slice(&page_range(number, page_size)),
      number,
      page_size,
      total: self.window.total_reported(),
      complete,
      source,
    }
  }
}

struct Inner<T, X> {
  transport: Arc<X>,
  cache: CacheStore,
  authenticated: Arc<AtomicBool>,
  search: Mutex<SearchState<T>>,
  flights: Mutex<HashMap<FlightKey, Flight<T>>>,
  /// Held for the duration of one window extension
  turn: tokio::sync::Mutex<()>,
}

/// Pages through a filtered list of `T`, accumulating results in a window.
pub struct IncrementalFetcher<T, X> {
  inner: Arc<Inner<T, X>>,
}

impl<T, X> Clone for IncrementalFetcher<T, X> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Record, X: CaseTransport> IncrementalFetcher<T, X> {
  /// Requests proceed only while `authenticated` is set.
  pub fn new(
    transport: Arc<X>,
    cache: CacheStore,
    authenticated: Arc<AtomicBool>,
    page_size: usize,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        transport,
        cache,
        authenticated,
        search: Mutex::new(SearchState {
          window: ResultWindow::new(page_size),
          canonical: None,
          context: 0,
          state: FetchState::Idle,
          revalidate: false,
        }),
        flights: Mutex::new(HashMap::new()),
        turn: tokio::sync::Mutex::new(()),
      }),
    }
  }

  /// Return page `page` (1-based) of the results for `filter`.
  ///
  /// A filter different from the previous request's discards the window
  /// first. The returned page may be short, or empty, once the end of the
  /// result set is reached.
  pub async fn request_page(
    &self,
    filter: &FilterParams,
    page: usize,
    page_size: usize,
  ) -> Result<Page<T>, FetchError> {
    if !self.inner.authenticated.load(Ordering::SeqCst) {
      return Err(FetchError::Unauthorized(
        "session is not authenticated".to_string(),
      ));
    }

    let page = page.max(1);
    let page_size = page_size.max(1);
    let range = page_range(page, page_size);
    let canonical = filter.canonical();

    let context = {
      let mut search = self.inner.lock_search();
      if search.canonical.as_deref() != Some(canonical.as_str()) {
        if search.canonical.is_some() {
          info!(filter = %canonical, "search filter changed, discarding window");
        }
        search.reset(Some(canonical), page_size);
        self.inner.drop_flights_before(search.context);
      }

      if search.window.covers(&range) {
        debug!(page, page_size, "page served from window");
        return Ok(search.page(page, page_size, PageSource::Window));
      }
      search.context
    };

    self.flight(context, filter, page, page_size).await
  }

  /// Join the in-flight request for this page, or start one.
  fn flight(&self, context: u64, filter: &FilterParams, page: usize, page_size: usize) -> Flight<T> {
    let key = FlightKey {
      context,
      page,
      page_size,
    };

    let mut flights = self.inner.lock_flights();
    if let Some(existing) = flights.get(&key) {
      debug!(page, "joining in-flight page request");
      return existing.clone();
    }

    let inner = Arc::clone(&self.inner);
    let filter = filter.clone();
    let flight = async move {
      let result = inner.fill(context, &filter, page, page_size).await;
      inner.lock_flights().remove(&key);
      result
    }
    .boxed()
    .shared();

    flights.insert(key, flight.clone());
    flight
  }

  /// Discard the window and the last-used filter. In-flight responses are dropped on arrival.
  pub fn clear(&self) {
    let mut search = self.inner.lock_search();
    let page_size = search.window.page_size();
    search.reset(None, page_size);
    self.inner.drop_flights_before(search.context);
    debug!("search window cleared");
  }

  pub fn state(&self) -> FetchState {
    self.inner.lock_search().state
  }

  /// Number of records accumulated so far.
  pub fn len(&self) -> usize {
    self.inner.lock_search().window.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn total_reported(&self) -> Option<usize> {
    self.inner.lock_search().window.total_reported()
  }

  pub fn is_complete(&self) -> bool {
    self.inner.lock_search().window.is_complete()
  }

  /// Copy of every record accumulated so far.
  pub fn items(&self) -> Vec<T> {
    self.inner.lock_search().window.items().to_vec()
  }
}

impl<T, X> Inner<T, X> {
  fn lock_search(&self) -> MutexGuard<'_, SearchState<T>> {
    self.search.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn lock_flights(&self) -> MutexGuard<'_, HashMap<FlightKey, Flight<T>>> {
    self.flights.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn drop_flights_before(&self, context: u64) {
    self.lock_flights().retain(|key, _| key.context >= context);
  }
}

impl<T: Record, X: CaseTransport> Inner<T, X> {
  /// Extend the window until it covers `page` or the result set ends.
  async fn fill(
    &self,
    context: u64,
    filter: &FilterParams,
    page: usize,
    page_size: usize,
  ) -> Result<Page<T>, FetchError> {
    let range = page_range(page, page_size);
    let _turn = self.turn.lock().await;
    let mut source = PageSource::Window;

    loop {
      let (start, revalidate) = {
        let mut search = self.lock_search();
        if search.context != context {
          return Err(FetchError::Superseded);
        }
        if search.window.covers(&range) {
          return Ok(search.page(page, page_size, source));
        }
        search.state = FetchState::Fetching;
        (search.window.start(), search.revalidate)
      };

      let key = filter.page_key(start, page_size);
      let cached = if revalidate && start == 0 {
        None
      } else {
        self.cache.get::<ListPage<T>>(&key)
      };
      let (chunk, from) = match cached {
        Some(hit) => (hit.data, PageSource::Cache),
        None => match self.fetch_chunk(filter, start, page_size).await {
          Ok(chunk) => (chunk, PageSource::Network),
          Err(e) => {
            let mut search = self.lock_search();
            if search.context == context {
              search.state = FetchState::Failed;
            }
            warn!(start, error = %e, "case page fetch failed");
            return Err(e);
          }
        },
      };

      let mut search = self.lock_search();
      if search.context != context {
        debug!(start, "discarding response for superseded search");
        return Err(FetchError::Superseded);
      }
      // Only under the search lock, after the context check
      if from == PageSource::Network {
        self.cache.put(&key, &chunk);
      }
      search.revalidate = false;
      let total = chunk.total_count;
      let kept = search.window.append(chunk.records, total);
      debug!(start, kept, total, source = ?from, "merged page into window");

      source = match (source, from) {
        (PageSource::Network, _) | (_, PageSource::Network) => PageSource::Network,
        _ => PageSource::Cache,
      };
    }
  }

  /// One list request, retried once with a relaxed scope if the server
  /// reports the filter as stale.
  async fn fetch_chunk(
    &self,
    filter: &FilterParams,
    start: usize,
    count: usize,
  ) -> Result<ListPage<T>, FetchError> {
    let kind = T::kind();
    let request = ListRequest {
      filter: filter.clone(),
      start,
      count,
    };

    info!(%kind, start, count, "fetching page from case api");
    let first = self.transport.fetch_list(kind, &request).await;
    let page = match first {
      Err(e) if e.is_stale() => {
        // TODO: confirm with the API owners whether the relaxed scope is the intended fallback
        warn!(error = %e, "filter rejected as stale, retrying once with relaxed scope");
        let relaxed = ListRequest {
          filter: filter.relaxed(),
          ..request
        };
        self.transport.fetch_list(kind, &relaxed).await?
      }
      result => result?,
    };

    let records = page
      .records
      .into_iter()
      .map(serde_json::from_value::<T>)
      .collect::<Result<Vec<T>, _>>()?;

    Ok(ListPage {
      records,
      total_count: page.total_count,
    })
  }
}

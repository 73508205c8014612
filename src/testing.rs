//! Scripted in-memory case API for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::ResourceKind;
use crate::cases::filter::CaseStatus;
use crate::cases::transport::{CaseTransport, ListRequest};
use crate::cases::types::{Case, ListPage};
use crate::error::FetchError;

pub fn case(number: usize, status: &str) -> Case {
  Case {
    case_number: format!("{:08}", number),
    summary: format!("Case {}", number),
    status: status.to_string(),
    product: Some("Red Hat Enterprise Linux".to_string()),
    version: None,
    severity: Some("3 (Normal)".to_string()),
    owner: None,
    contact_name: None,
    group_number: None,
    created_date: None,
    last_modified_date: None,
  }
}

/// `open` open cases followed by `closed` closed ones.
pub fn cases(open: usize, closed: usize) -> Vec<Case> {
  (0..open)
    .map(|n| case(n, "Waiting on Customer"))
    .chain((open..open + closed).map(|n| case(n, "Closed")))
    .collect()
}

#[derive(Default)]
pub struct MockTransport {
  cases: Vec<Case>,
  delay: Option<Duration>,
  mutate_delays: Mutex<VecDeque<Duration>>,
  list_failures: Mutex<VecDeque<FetchError>>,
  one_failures: Mutex<VecDeque<FetchError>>,
  resources: Mutex<HashMap<(ResourceKind, String), Value>>,
  list_requests: Mutex<Vec<ListRequest>>,
  list_calls: AtomicUsize,
  one_calls: AtomicUsize,
  mutations: Mutex<Vec<(ResourceKind, String, Value)>>,
}

impl MockTransport {
  pub fn with_cases(cases: Vec<Case>) -> Self {
    Self {
      cases,
      ..Self::default()
    }
  }

  /// Delay every list response, to keep requests in flight.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  /// Hold the next write for `delay` before it completes.
  pub fn delay_next_mutate(&self, delay: Duration) {
    self.mutate_delays.lock().unwrap().push_back(delay);
  }

  /// Fail the next list call with `error`.
  pub fn fail_next_list(&self, error: FetchError) {
    self.list_failures.lock().unwrap().push_back(error);
  }

  /// Fail the next single-resource call with `error`.
  pub fn fail_next_one(&self, error: FetchError) {
    self.one_failures.lock().unwrap().push_back(error);
  }

  pub fn set_resource(&self, kind: ResourceKind, id: &str, value: Value) {
    self
      .resources
      .lock()
      .unwrap()
      .insert((kind, id.to_string()), value);
  }

  pub fn list_calls(&self) -> usize {
    self.list_calls.load(Ordering::SeqCst)
  }

  pub fn one_calls(&self) -> usize {
    self.one_calls.load(Ordering::SeqCst)
  }

  pub fn list_requests(&self) -> Vec<ListRequest> {
    self.list_requests.lock().unwrap().clone()
  }

  pub fn mutations(&self) -> Vec<(ResourceKind, String, Value)> {
    self.mutations.lock().unwrap().clone()
  }

  fn matching(&self, status: CaseStatus) -> Vec<&Case> {
    self
      .cases
      .iter()
      .filter(|c| match status {
        CaseStatus::Open => c.status != "Closed",
        CaseStatus::Closed => c.status == "Closed",
        CaseStatus::Both => true,
      })
      .collect()
  }
}

#[async_trait]
impl CaseTransport for MockTransport {
  async fn fetch_list(
    &self,
    _kind: ResourceKind,
    request: &ListRequest,
  ) -> Result<ListPage<Value>, FetchError> {
    self.list_calls.fetch_add(1, Ordering::SeqCst);
    self.list_requests.lock().unwrap().push(request.clone());

    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }

    if let Some(error) = self.list_failures.lock().unwrap().pop_front() {
      return Err(error);
    }

    let matching = self.matching(request.filter.status);
    let records = matching
      .iter()
      .skip(request.start)
      .take(request.count)
      .map(|c| serde_json::to_value(c).unwrap())
      .collect();

    Ok(ListPage {
      records,
      total_count: matching.len(),
    })
  }

  async fn fetch_one(&self, kind: ResourceKind, id: &str) -> Result<Value, FetchError> {
    self.one_calls.fetch_add(1, Ordering::SeqCst);

    if let Some(error) = self.one_failures.lock().unwrap().pop_front() {
      return Err(error);
    }

    if kind == ResourceKind::Case {
      if let Some(found) = self.cases.iter().find(|c| c.case_number == id) {
        return Ok(serde_json::to_value(found).unwrap());
      }
    }

    self
      .resources
      .lock()
      .unwrap()
      .get(&(kind, id.to_string()))
      .cloned()
      .ok_or_else(|| FetchError::StaleResource(format!("{} {} not found", kind, id)))
  }

  async fn mutate(&self, kind: ResourceKind, id: &str, patch: &Value) -> Result<Value, FetchError> {
    self
      .mutations
      .lock()
      .unwrap()
      .push((kind, id.to_string(), patch.clone()));

    let delay = self.mutate_delays.lock().unwrap().pop_front();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    Ok(patch.clone())
  }
}

//! Attachment uploads, batched per case.
//!
//! The byte transfer happens elsewhere; this module registers the attachment
//! metadata with the case API and, once every upload in a case's batch has
//! settled, drops the cached views of that case.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::cache::ResourceKind;
use crate::cases::transport::CaseTransport;
use crate::cases::types::Attachment;
use crate::error::FetchError;
use crate::session::Session;

/// Metadata registered for one uploaded file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMeta {
  pub file_name: String,
  pub length: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

impl UploadMeta {
  pub fn from_path(path: &Path) -> Result<Self> {
    let metadata = std::fs::metadata(path)
      .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
    if !metadata.is_file() {
      return Err(eyre!("Not a file: {}", path.display()));
    }

    let file_name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .ok_or_else(|| eyre!("No file name in {}", path.display()))?;

    Ok(Self {
      file_name,
      length: metadata.len(),
      description: None,
    })
  }
}

#[derive(Debug, Default)]
struct Batch {
  /// Uploads announced by `begin` that have not started yet
  reserved: usize,
  /// Uploads announced or started that have not settled
  outstanding: usize,
  succeeded: usize,
}

pub struct UploadAggregator<X> {
  session: Session<X>,
  batches: Mutex<HashMap<String, Batch>>,
}

impl<X: CaseTransport> UploadAggregator<X> {
  pub fn new(session: Session<X>) -> Self {
    Self {
      session,
      batches: Mutex::new(HashMap::new()),
    }
  }

  fn lock_batches(&self) -> MutexGuard<'_, HashMap<String, Batch>> {
    self.batches.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Expect `count` more uploads for `case` before invalidating.
  pub fn begin(&self, case: &str, count: usize) {
    let mut batches = self.lock_batches();
    let batch = batches.entry(case.to_string()).or_default();
    batch.reserved += count;
    batch.outstanding += count;
  }

  /// Start one upload: take a slot announced by `begin`, or join the batch as an extra one.
  fn claim(&self, case: &str) {
    let mut batches = self.lock_batches();
    let batch = batches.entry(case.to_string()).or_default();
    if batch.reserved > 0 {
      batch.reserved -= 1;
    } else {
      batch.outstanding += 1;
    }
  }

  /// Uploads still outstanding for `case`.
  pub fn pending(&self, case: &str) -> usize {
    self
      .lock_batches()
      .get(case)
      .map(|b| b.outstanding)
      .unwrap_or(0)
  }

  /// Register one finished upload. Without a prior `begin` it joins the
  /// case's current batch, or starts a batch of one.
  pub async fn upload(&self, case: &str, meta: &UploadMeta) -> Result<Attachment, FetchError> {
    self.claim(case);

    let result = self.register(case, meta).await;
    self.settle(case, result.is_ok());

    let value = result?;
    Ok(serde_json::from_value(value)?)
  }

  /// Register a whole batch concurrently; results are in input order.
  pub async fn upload_all(
    &self,
    case: &str,
    files: &[UploadMeta],
  ) -> Vec<Result<Attachment, FetchError>> {
    self.begin(case, files.len());
    join_all(files.iter().map(|meta| self.upload(case, meta))).await
  }

  async fn register(&self, case: &str, meta: &UploadMeta) -> Result<serde_json::Value, FetchError> {
    if !self.session.is_authenticated() {
      return Err(FetchError::Unauthorized(
        "session is not authenticated".to_string(),
      ));
    }

    let body = serde_json::to_value(meta)?;
    let result = self
      .session
      .transport()
      .mutate(ResourceKind::Attachment, case, &body)
      .await;

    match &result {
      Ok(_) => debug!(case, file = %meta.file_name, "attachment registered"),
      Err(e) => warn!(case, file = %meta.file_name, error = %e, "attachment registration failed"),
    }
    result
  }

  /// Count one upload as done; invalidate when the batch empties.
  fn settle(&self, case: &str, ok: bool) {
    let finished = {
      let mut batches = self.lock_batches();
      let Some(batch) = batches.get_mut(case) else {
        return;
      };
      batch.outstanding = batch.outstanding.saturating_sub(1);
      if ok {
        batch.succeeded += 1;
      }
      if batch.outstanding > 0 {
        return;
      }
      batches.remove(case).map(|b| b.succeeded).unwrap_or(0)
    };

    if finished > 0 {
      info!(case, uploads = finished, "upload batch complete");
      self.session.invalidate(ResourceKind::Attachment, case);
    }
  }
}

//! Errors surfaced by the case API transport and the incremental fetcher.

use thiserror::Error;

/// Failure of a remote read or write.
///
/// Cloneable so that every caller coalesced onto one in-flight fetch can
/// receive the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// The session is not authenticated, or the server rejected the credentials.
  #[error("not authorized: {0}")]
  Unauthorized(String),

  /// The server does not recognize the requested resource or filter.
  /// Usually transient: the remote store lags behind a concurrent write.
  #[error("stale or missing resource: {0}")]
  StaleResource(String),

  /// Network, protocol or server failure.
  #[error("transport error: {0}")]
  Transport(String),

  /// The response body did not match the expected record shape.
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// The search this request belonged to was replaced by a newer one
  /// before the response arrived; the response was discarded.
  #[error("request superseded by a newer search")]
  Superseded,
}

impl FetchError {
  /// Whether this failure warrants the single relaxed-scope retry.
  pub fn is_stale(&self) -> bool {
    matches!(self, FetchError::StaleResource(_))
  }
}

impl From<serde_json::Error> for FetchError {
  fn from(err: serde_json::Error) -> Self {
    FetchError::Decode(err.to_string())
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(err: reqwest::Error) -> Self {
    match err.status() {
      Some(status) if status == reqwest::StatusCode::UNAUTHORIZED => {
        FetchError::Unauthorized(err.to_string())
      }
      Some(status) if status == reqwest::StatusCode::FORBIDDEN => {
        FetchError::Unauthorized(err.to_string())
      }
      Some(status) if status == reqwest::StatusCode::NOT_FOUND => {
        FetchError::StaleResource(err.to_string())
      }
      _ if err.is_decode() => FetchError::Decode(err.to_string()),
      _ => FetchError::Transport(err.to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_only_stale_is_retryable() {
    assert!(FetchError::StaleResource("filter".into()).is_stale());
    assert!(!FetchError::Unauthorized("nope".into()).is_stale());
    assert!(!FetchError::Transport("reset".into()).is_stale());
    assert!(!FetchError::Superseded.is_stale());
  }

  #[test]
  fn test_json_error_maps_to_decode() {
    let err = serde_json::from_str::<u32>("not a number").unwrap_err();
    assert!(matches!(FetchError::from(err), FetchError::Decode(_)));
  }
}

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::transport::{CaseTransport, ListRequest};
use super::types::ListPage;
use crate::cache::ResourceKind;
use crate::config::Config;
use crate::error::FetchError;

/// Case API response for a filtered case list
#[derive(Debug, Deserialize)]
struct ApiCaseList {
  #[serde(rename = "case", default)]
  cases: Vec<Value>,
  #[serde(rename = "totalCount", default)]
  total_count: Option<usize>,
}

/// Case API client over HTTPS
#[derive(Clone)]
pub struct RestTransport {
  client: reqwest::Client,
  base: Url,
  username: String,
  token: String,
}

impl RestTransport {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    Self::with_token(&config.api.url, &config.api.username, token)
  }

  pub fn with_token(base_url: &str, username: &str, token: String) -> Result<Self> {
    let mut base =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API url {}: {}", base_url, e))?;
    // Url::join replaces the last segment unless the base ends with a slash
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .gzip(true)
      .user_agent(concat!("casesync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      username: username.to_string(),
      token,
    })
  }

  fn url(&self, path: &str) -> Result<Url, FetchError> {
    self
      .base
      .join(path)
      .map_err(|e| FetchError::Transport(format!("bad request path {}: {}", path, e)))
  }

  async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, FetchError> {
    let url = self.url(path)?;
    debug!(%method, %url, "case api request");

    let mut request = self
      .client
      .request(method, url)
      .basic_auth(&self.username, Some(&self.token))
      .header(reqwest::header::ACCEPT, "application/json");
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request.send().await?.error_for_status()?;
    if response.status() == StatusCode::NO_CONTENT {
      return Ok(Value::Null);
    }

    let text = response.text().await?;
    if text.trim().is_empty() {
      return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
  }
}

/// Request path of a single resource or per-case collection.
fn resource_path(kind: ResourceKind, id: &str) -> String {
  match kind {
    ResourceKind::Case => format!("rs/cases/{}", id),
    ResourceKind::Comment => format!("rs/cases/{}/comments", id),
    ResourceKind::Attachment => format!("rs/cases/{}/attachments", id),
    ResourceKind::Group => format!("rs/groups/{}", id),
    ResourceKind::GroupUsers => format!("rs/groups/{}/users", id),
  }
}

/// Body of the case filter endpoint.
fn case_filter_body(request: &ListRequest) -> Value {
  let mut body = serde_json::Map::new();
  for (name, value) in request.filter.fields() {
    body.insert(name.to_string(), Value::String(value));
  }
  body.insert("associate".to_string(), json!(request.filter.associate));
  body.insert("startIndex".to_string(), json!(request.start));
  body.insert("maxResults".to_string(), json!(request.count));
  Value::Object(body)
}

#[async_trait]
impl CaseTransport for RestTransport {
  async fn fetch_list(
    &self,
    kind: ResourceKind,
    request: &ListRequest,
  ) -> Result<ListPage<Value>, FetchError> {
    match kind {
      ResourceKind::Case => {
        let body = case_filter_body(request);
        let response = self.send(Method::POST, "rs/cases/filter", Some(&body)).await?;
        let list: ApiCaseList = serde_json::from_value(response)?;
        let total_count = list
          .total_count
          .unwrap_or(request.start + list.cases.len());
        Ok(ListPage {
          records: list.cases,
          total_count,
        })
      }
      ResourceKind::Group => {
        // Groups come back whole; page locally so callers see one shape
        let response = self.send(Method::GET, "rs/groups", None).await?;
        let groups: Vec<Value> = serde_json::from_value(response)?;
        let total_count = groups.len();
        let records = groups
          .into_iter()
          .skip(request.start)
          .take(request.count)
          .collect();
        Ok(ListPage {
          records,
          total_count,
        })
      }
      other => Err(FetchError::Transport(format!(
        "{} records cannot be listed without a parent id",
        other
      ))),
    }
  }

  async fn fetch_one(&self, kind: ResourceKind, id: &str) -> Result<Value, FetchError> {
    self.send(Method::GET, &resource_path(kind, id), None).await
  }

  async fn mutate(&self, kind: ResourceKind, id: &str, patch: &Value) -> Result<Value, FetchError> {
    let path = resource_path(kind, id);
    // Collections take new members by POST, single resources are updated by PUT
    let method = match kind {
      ResourceKind::Comment | ResourceKind::Attachment => Method::POST,
      _ => Method::PUT,
    };

    let result = self.send(method, &path, Some(patch)).await?;
    if !result.is_null() {
      return Ok(result);
    }
    match empty_reply(kind, patch) {
      Some(created) => Ok(created),
      None => self.fetch_one(kind, id).await,
    }
  }
}

/// Result of a write the server answered without a body.
///
/// A single resource is read back (`None`). A GET on a collection path would
/// return the whole collection, so a new member stands for itself.
fn empty_reply(kind: ResourceKind, patch: &Value) -> Option<Value> {
  match kind {
    ResourceKind::Comment | ResourceKind::Attachment => Some(patch.clone()),
    ResourceKind::Case | ResourceKind::Group | ResourceKind::GroupUsers => None,
  }
}

//! Case-list filter parameters and their canonical form.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::cache::CaseQueryKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
  #[default]
  Open,
  Closed,
  Both,
}

impl CaseStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      CaseStatus::Open => "open",
      CaseStatus::Closed => "closed",
      CaseStatus::Both => "both",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
  #[default]
  LastModified,
  Created,
  Severity,
  Status,
  CaseNumber,
  Owner,
}

impl SortField {
  pub fn as_str(&self) -> &'static str {
    match self {
      SortField::LastModified => "lastModifiedDate",
      SortField::Created => "createdDate",
      SortField::Severity => "severity",
      SortField::Status => "status",
      SortField::CaseNumber => "caseNumber",
      SortField::Owner => "owner",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  Asc,
  #[default]
  Desc,
}

impl SortOrder {
  pub fn as_str(&self) -> &'static str {
    match self {
      SortOrder::Asc => "ASC",
      SortOrder::Desc => "DESC",
    }
  }
}

/// Which cases the account sees
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaseView {
  #[default]
  All,
  /// Only cases owned by the signed-in contact
  Mine,
  /// Only cases in one case group
  Group(String),
}

impl fmt::Display for CaseView {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CaseView::All => f.write_str("all"),
      CaseView::Mine => f.write_str("mine"),
      CaseView::Group(id) => write!(f, "group:{}", id),
    }
  }
}

impl FromStr for CaseView {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    match s.to_lowercase().as_str() {
      "all" | "" => Ok(CaseView::All),
      "mine" => Ok(CaseView::Mine),
      _ => match s.split_once(':') {
        Some((prefix, id)) if prefix.eq_ignore_ascii_case("group") && !id.is_empty() => {
          Ok(CaseView::Group(id.to_string()))
        }
        _ => Err(format!("unknown view '{}' (expected all, mine or group:<id>)", s)),
      },
    }
  }
}

/// Query fields that decide which cases a list request returns and in what order.
///
/// Two filters select the same window iff their `canonical` forms are equal,
/// and equality is defined by that form. Setters normalize input (trimmed,
/// empty means unset) but fields set directly are normalized on comparison.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterParams {
  pub status: CaseStatus,
  pub product: Option<String>,
  pub severity: Option<String>,
  pub owner: Option<String>,
  pub group: Option<String>,
  pub sort_field: SortField,
  pub sort_order: SortOrder,
  pub keyword: Option<String>,
  pub view: CaseView,
  /// Include cases the account is associated with but does not own
  pub associate: bool,
}

impl PartialEq for FilterParams {
  fn eq(&self, other: &Self) -> bool {
    self.canonical() == other.canonical()
  }
}

impl Eq for FilterParams {}

fn normalize(value: Option<&str>) -> Option<String> {
  value
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(String::from)
}

impl FilterParams {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_status(mut self, status: CaseStatus) -> Self {
    self.status = status;
    self
  }

  pub fn with_product(mut self, product: Option<&str>) -> Self {
    self.product = normalize(product);
    self
  }

  pub fn with_severity(mut self, severity: Option<&str>) -> Self {
    self.severity = normalize(severity);
    self
  }

  pub fn with_owner(mut self, owner: Option<&str>) -> Self {
    self.owner = normalize(owner);
    self
  }

  pub fn with_group(mut self, group: Option<&str>) -> Self {
    self.group = normalize(group);
    self
  }

  pub fn with_sort(mut self, field: SortField, order: SortOrder) -> Self {
    self.sort_field = field;
    self.sort_order = order;
    self
  }

  pub fn with_keyword(mut self, keyword: Option<&str>) -> Self {
    self.keyword = normalize(keyword);
    self
  }

  pub fn with_view(mut self, view: CaseView) -> Self {
    self.view = view;
    self
  }

  pub fn with_associate(mut self, associate: bool) -> Self {
    self.associate = associate;
    self
  }

  /// Set fields keyed by name, in a stable order.
  pub fn fields(&self) -> BTreeMap<&'static str, String> {
    let mut fields = BTreeMap::new();
    fields.insert("status", self.status.as_str().to_string());
    fields.insert("sortField", self.sort_field.as_str().to_string());
    fields.insert("sortOrder", self.sort_order.as_str().to_string());
    fields.insert("view", self.view.to_string());
    if self.associate {
      fields.insert("associate", "true".to_string());
    }

    let optional = [
      ("product", &self.product),
      ("severity", &self.severity),
      ("owner", &self.owner),
      ("group", &self.group),
      ("keyword", &self.keyword),
    ];
    for (name, value) in optional {
      if let Some(v) = normalize(value.as_deref()) {
        fields.insert(name, v);
      }
    }
    fields
  }

  /// Canonical rendering: form-encoded fields sorted by name.
  pub fn canonical(&self) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in self.fields() {
      serializer.append_pair(name, &value);
    }
    serializer.finish()
  }

  /// The same filter with the association scope toggled.
  ///
  /// Used for the one retry after the server rejects a filter as unknown.
  pub fn relaxed(&self) -> Self {
    Self {
      associate: !self.associate,
      ..self.clone()
    }
  }

  /// Cache key of the page `[start, start + count)` of this filter.
  pub fn page_key(&self, start: usize, count: usize) -> CaseQueryKey {
    CaseQueryKey::FilterPage {
      canonical: self.canonical(),
      start,
      count,
    }
  }
}

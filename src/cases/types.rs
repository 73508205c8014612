use serde::{Deserialize, Serialize};

use crate::cache::{Record, ResourceKind};

/// A support case as listed and shown by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
  pub case_number: String,
  #[serde(default)]
  pub summary: String,
  #[serde(default)]
  pub status: String,
  pub product: Option<String>,
  pub version: Option<String>,
  pub severity: Option<String>,
  pub owner: Option<String>,
  pub contact_name: Option<String>,
  pub group_number: Option<String>,
  pub created_date: Option<String>,
  pub last_modified_date: Option<String>,
}

/// Comment on a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
  /// Empty when the server acknowledged the write without a body
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub text: String,
  pub created_by: Option<String>,
  pub created_date: Option<String>,
  #[serde(default = "default_public")]
  pub public: bool,
}

fn default_public() -> bool {
  true
}

/// File attached to a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
  #[serde(default)]
  pub uuid: String,
  pub file_name: String,
  #[serde(default)]
  pub length: u64,
  pub description: Option<String>,
  pub created_by: Option<String>,
  pub created_date: Option<String>,
}

/// Case group of an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
  pub number: String,
  pub name: String,
  #[serde(default)]
  pub is_private: bool,
  #[serde(default)]
  pub is_default: bool,
}

/// One page of a list response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage<T> {
  pub records: Vec<T>,
  /// Server-reported number of records matching the filter
  pub total_count: usize,
}

impl Record for Case {
  fn kind() -> ResourceKind {
    ResourceKind::Case
  }
}

impl Record for Comment {
  fn kind() -> ResourceKind {
    ResourceKind::Comment
  }
}

impl Record for Attachment {
  fn kind() -> ResourceKind {
    ResourceKind::Attachment
  }
}

impl Record for Group {
  fn kind() -> ResourceKind {
    ResourceKind::Group
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_case_deserializes_from_api_shape() {
    let json = r#"{
      "caseNumber": "01234567",
      "summary": "Kernel panic on boot",
      "status": "Waiting on Red Hat",
      "severity": "2 (High)",
      "lastModifiedDate": "2024-03-01T10:00:00Z",
      "unknownField": 42
    }"#;

    let case: Case = serde_json::from_str(json).unwrap();
    assert_eq!(case.case_number, "01234567");
    assert_eq!(case.severity.as_deref(), Some("2 (High)"));
    assert_eq!(case.owner, None);
  }

  #[test]
  fn test_comment_defaults_to_public() {
    let comment: Comment = serde_json::from_str(r#"{"id": "c1", "text": "hi"}"#).unwrap();
    assert!(comment.public);
  }
}

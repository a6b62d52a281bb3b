//! Models for the Azure Resource Graph.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Azure Resource Graph request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GraphReq {
  pub query: String,
  pub subscriptions: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub facets: Vec<Value>,
  #[serde(
    rename = "managementGroupId",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub management_group_id: Option<String>,
  /// Free-form query options. Carries `$top`, `$skip` and
  /// `$skipToken`.
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub options: Map<String, Value>,
}

impl GraphReq {
  pub fn new(
    query: impl Into<String>,
    subscriptions: Vec<String>,
  ) -> GraphReq {
    GraphReq {
      query: query.into(),
      subscriptions,
      facets: Vec::new(),
      management_group_id: None,
      options: Map::new(),
    }
  }

  /// The follow-up request for the next page.
  ///
  /// `$skipToken` and `$skip` override each other on the service
  /// side, so the token replaces any caller-provided `$skip`.
  pub fn with_skip_token(
    mut self,
    token: impl Into<String>,
  ) -> GraphReq {
    self.options.remove("$skip");
    self.options.insert(
      String::from("$skipToken"),
      Value::String(token.into()),
    );
    self
  }
}

/// Azure Resource Graph response.
#[derive(
  Serialize, Deserialize, Debug, Clone, PartialEq, Default,
)]
pub struct GraphRes {
  #[serde(rename = "totalRecords", default)]
  pub total_records: i64,
  #[serde(default)]
  pub count: i64,
  #[serde(rename = "resultTruncated", default)]
  pub result_truncated: Value,
  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub facets: Value,
  #[serde(default)]
  pub data: Vec<Value>,
  #[serde(
    rename = "$skipToken",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub skip_token: Option<String>,
}

impl GraphRes {
  /// Fold the next page onto this result. Data concatenates in
  /// arrival order, counts add, and everything else (including
  /// the trailing `skipToken`) comes from the newer page.
  pub fn append(self, next: GraphRes) -> GraphRes {
    GraphRes {
      count: self.count + next.count,
      data: {
        let mut data = self.data;
        data.extend(next.data);
        data
      },
      ..next
    }
  }
}

/// Any failure of a Resource Graph query.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
  /// An error the service reported. The only retriable kind.
  #[error("Resource Graph error | code: {code} | {message}")]
  Azure {
    code: String,
    message: String,
    details: Value,
  },

  /// A non-2xx response without a graph error envelope.
  #[error("HTTP error {status} from the Resource Graph")]
  Http { status: u16, body: String },

  /// A 2xx body which is not a graph response.
  #[error("failed to deserialize graph response | {source}")]
  Deserialize {
    source: serde_json::Error,
    body: String,
  },

  /// A request url which could not be composed.
  #[error("failed to build graph url | {0}")]
  Url(#[from] url::ParseError),

  /// A network-level failure. Propagated without retry.
  #[error(transparent)]
  Request(#[from] reqwest::Error),
}

impl GraphError {
  pub fn retriable(&self) -> bool {
    matches!(self, GraphError::Azure { .. })
  }
}

/// Bound on re-attempts for queries the service failed.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Additional attempts after the initial try.
  pub retries: u32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    RetryPolicy { retries: 10 }
  }
}

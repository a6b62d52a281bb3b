//! Request and response models for the Azure REST API.

use std::{collections::HashMap, marker::PhantomData};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Api version used for the `/batch` endpoint itself.
pub const BATCH_API_VERSION: &str = "2020-06-01";

/// Marker for fields Azure manages and ignores on write.
pub type ReadOnly<T> = Option<T>;

/// An HTTP method accepted by the Azure management plane.
#[derive(
  Serialize,
  Deserialize,
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Display,
  EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
  Get,
  Put,
  Post,
  Patch,
  Delete,
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Put => reqwest::Method::PUT,
      Method::Post => reqwest::Method::POST,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// A single request against the Azure REST API.
///
/// The type parameter is the declared return type. It drives
/// deserialisation in the client and is the only part of the
/// descriptor which never crosses the wire.
pub struct Req<T> {
  /// Human readable name, only used for logging and batch keys.
  pub name: String,
  /// Path relative to the management base url.
  pub path: String,
  pub method: Method,
  /// Injected into the query as `api-version`.
  pub apiv: Option<String>,
  /// Json body, serialised with nulls omitted.
  pub body: Option<Value>,
  /// Extra query params. Merged left-to-right.
  pub params: IndexMap<String, String>,
  ret: PhantomData<fn() -> T>,
}

impl<T> Req<T> {
  fn new(
    name: impl Into<String>,
    path: impl Into<String>,
    method: Method,
    apiv: impl Into<String>,
    body: Option<Value>,
  ) -> Req<T> {
    Req {
      name: name.into(),
      path: path.into(),
      method,
      apiv: Some(apiv.into()),
      body,
      params: IndexMap::new(),
      ret: PhantomData,
    }
  }

  /// Create a GET request.
  pub fn get(
    name: impl Into<String>,
    path: impl Into<String>,
    apiv: impl Into<String>,
  ) -> Req<T> {
    Req::new(name, path, Method::Get, apiv, None)
  }

  /// Create a DELETE request.
  pub fn delete(
    name: impl Into<String>,
    path: impl Into<String>,
    apiv: impl Into<String>,
  ) -> Req<T> {
    Req::new(name, path, Method::Delete, apiv, None)
  }

  /// Create a PUT request.
  pub fn put(
    name: impl Into<String>,
    path: impl Into<String>,
    apiv: impl Into<String>,
    body: Option<Value>,
  ) -> Req<T> {
    Req::new(name, path, Method::Put, apiv, body)
  }

  /// Create a POST request.
  pub fn post(
    name: impl Into<String>,
    path: impl Into<String>,
    apiv: impl Into<String>,
    body: Option<Value>,
  ) -> Req<T> {
    Req::new(name, path, Method::Post, apiv, body)
  }

  /// Create a PATCH request.
  pub fn patch(
    name: impl Into<String>,
    path: impl Into<String>,
    apiv: impl Into<String>,
    body: Option<Value>,
  ) -> Req<T> {
    Req::new(name, path, Method::Patch, apiv, body)
  }

  /// Add query params to this request.
  /// Later params override earlier ones with the same key.
  pub fn add_params(
    mut self,
    params: impl IntoIterator<Item = (String, String)>,
  ) -> Req<T> {
    self.params.extend(params);
    self
  }

  /// Override the declared return type.
  pub fn with_ret<U>(self) -> Req<U> {
    Req {
      name: self.name,
      path: self.path,
      method: self.method,
      apiv: self.apiv,
      body: self.body,
      params: self.params,
      ret: PhantomData,
    }
  }
}

impl<T> Clone for Req<T> {
  fn clone(&self) -> Self {
    Req {
      name: self.name.clone(),
      path: self.path.clone(),
      method: self.method,
      apiv: self.apiv.clone(),
      body: self.body.clone(),
      params: self.params.clone(),
      ret: PhantomData,
    }
  }
}

impl<T> std::fmt::Debug for Req<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    f.debug_struct("Req")
      .field("name", &self.name)
      .field("path", &self.path)
      .field("method", &self.method)
      .field("apiv", &self.apiv)
      .field("body", &self.body)
      .field("params", &self.params)
      .finish()
  }
}

/// Azure's paginated list envelope.
///
/// The client unwraps this into a flat `Vec` when the declared
/// return type is a list, following `nextLink` for further pages.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AzList<T> {
  pub value: Vec<T>,
  #[serde(
    rename = "nextLink",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub next_link: Option<String>,
}

impl<T> Default for AzList<T> {
  fn default() -> Self {
    AzList {
      value: Vec::new(),
      next_link: None,
    }
  }
}

/// A named batch of requests for the Azure batch API.
///
/// All entries share a declared return type. Mixed batches erase to
/// [serde_json::Value] with [Req::with_ret] first.
#[derive(Debug, Clone)]
pub struct BatchReq<T> {
  /// Caller-keyed requests. Ids must be unique;
  /// responses are matched back by id, not by order.
  pub requests: IndexMap<String, Req<T>>,
  pub name: String,
  pub apiv: String,
}

impl<T> BatchReq<T> {
  pub fn new(requests: IndexMap<String, Req<T>>) -> BatchReq<T> {
    BatchReq {
      requests,
      name: String::from("batch"),
      apiv: String::from(BATCH_API_VERSION),
    }
  }

  /// Gather many requests into a batch,
  /// automatically assigning each a fresh id.
  pub fn gather(
    reqs: impl IntoIterator<Item = Req<T>>,
  ) -> BatchReq<T> {
    BatchReq::new(
      reqs
        .into_iter()
        .map(|r| (Uuid::new_v4().to_string(), r))
        .collect(),
    )
  }
}

/// A single response within a batch response envelope.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AzBatchResponse {
  /// Echo of the id the sub-request was submitted under.
  pub name: String,
  #[serde(rename = "httpStatusCode")]
  pub http_status_code: u16,
  #[serde(default)]
  pub headers: HashMap<String, String>,
  #[serde(default)]
  pub content: Option<Value>,
}

/// The bundle of responses from the Azure batch API.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AzBatchResponses {
  pub responses: Vec<AzBatchResponse>,
}

/// The container of an Azure error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AzureErrorResponse {
  pub error: AzureErrorDetails,
}

/// An Azure-specific error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AzureErrorDetails {
  pub code: String,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub details: Vec<AzureErrorDetails>,
  #[serde(
    rename = "additionalInfo",
    default,
    skip_serializing_if = "Vec::is_empty"
  )]
  pub additional_info: Vec<AzureErrorAdditionInfo>,
}

/// The resource management error additional info.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AzureErrorAdditionInfo {
  #[serde(rename = "type")]
  pub info_type: String,
  #[serde(default)]
  pub info: Value,
}

/// Any failure of a call against the Azure API.
#[derive(thiserror::Error, Debug)]
pub enum AzureError {
  /// An error decoded from Azure's error envelope.
  /// The only retriable kind.
  #[error("Azure API error | code: {} | {}", .0.code, .0.message)]
  Api(AzureErrorDetails),

  /// A non-2xx response whose body is not an error envelope.
  #[error("HTTP error {status} without Azure error envelope")]
  Http { status: u16, body: String },

  /// A long-running operation which could not be followed
  /// to a terminal state.
  #[error("long-running operation failed | {0}")]
  LongOperation(String),

  /// A 2xx body which does not match the declared return type.
  #[error("failed to deserialize response | {source}")]
  Deserialize {
    source: serde_json::Error,
    body: String,
  },

  /// A request url which could not be composed.
  #[error("failed to build request url | {0}")]
  Url(#[from] url::ParseError),

  /// A network-level failure. Propagated without retry.
  #[error(transparent)]
  Request(#[from] reqwest::Error),
}

impl AzureError {
  /// Whether the retry layer may re-attempt the call.
  pub fn retriable(&self) -> bool {
    matches!(self, AzureError::Api(_))
  }
}

/// Decode a response body into the declared return type.
/// An empty body decodes as json `null` so unit-like and optional
/// returns succeed on `204 No Content`.
pub fn deserialize_body<T: DeserializeOwned>(
  body: &[u8],
) -> Result<T, AzureError> {
  let body = if body.is_empty() { b"null" } else { body };
  serde_json::from_slice(body).map_err(|e| {
    AzureError::Deserialize {
      source: e,
      body: String::from_utf8_lossy(body).into_owned(),
    }
  })
}

/// Decode a non-2xx response, preferring the Azure error envelope
/// and falling back to the raw body.
pub fn decode_error(status: u16, body: &[u8]) -> AzureError {
  match serde_json::from_slice::<AzureErrorResponse>(body) {
    Ok(res) => AzureError::Api(res.error),
    Err(_) => AzureError::Http {
      status,
      body: String::from_utf8_lossy(body).into_owned(),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn add_params_merges_left_to_right() {
    let req = Req::<Value>::get("r", "/things", "2024-01-01")
      .add_params([(String::from("$filter"), String::from("a"))])
      .add_params([
        (String::from("$filter"), String::from("b")),
        (String::from("$top"), String::from("10")),
      ]);
    assert_eq!(req.params.get("$filter").unwrap(), "b");
    assert_eq!(req.params.get("$top").unwrap(), "10");
  }

  #[test]
  fn with_ret_keeps_descriptor() {
    let req = Req::<Value>::put(
      "r",
      "/things/t0",
      "2024-01-01",
      Some(serde_json::json!({"a": 1})),
    );
    let req = req.with_ret::<AzList<Value>>();
    assert_eq!(req.name, "r");
    assert_eq!(req.method, Method::Put);
    assert_eq!(req.body, Some(serde_json::json!({"a": 1})));
  }

  #[test]
  fn method_serializes_uppercase() {
    assert_eq!(Method::Get.to_string(), "GET");
    assert_eq!(
      serde_json::to_value(Method::Patch).unwrap(),
      Value::String(String::from("PATCH"))
    );
  }

  #[test]
  fn az_list_reads_next_link() {
    let list: AzList<String> = serde_json::from_value(
      serde_json::json!({"value": ["a"], "nextLink": "https://x"}),
    )
    .unwrap();
    assert_eq!(list.value, vec![String::from("a")]);
    assert_eq!(list.next_link.as_deref(), Some("https://x"));
  }

  #[test]
  fn gather_assigns_unique_ids() {
    let batch = BatchReq::gather([
      Req::<Value>::get("a", "/a", "v"),
      Req::<Value>::get("b", "/b", "v"),
    ]);
    assert_eq!(batch.requests.len(), 2);
    assert_eq!(batch.name, "batch");
    assert_eq!(batch.apiv, BATCH_API_VERSION);
  }

  #[test]
  fn error_envelope_decodes_recursively() {
    let err = decode_error(
      404,
      serde_json::json!({"error": {
        "code": "NotFound",
        "message": "no such thing",
        "details": [{"code": "Inner", "message": "inner"}],
        "additionalInfo": [{"type": "PolicyViolation", "info": {}}]
      }})
      .to_string()
      .as_bytes(),
    );
    let AzureError::Api(details) = err else {
      panic!("expected api error");
    };
    assert_eq!(details.code, "NotFound");
    assert_eq!(details.details[0].code, "Inner");
    assert_eq!(
      details.additional_info[0].info_type,
      "PolicyViolation"
    );
  }

  #[test]
  fn undecodable_error_falls_back_to_http() {
    let err = decode_error(500, b"gateway exploded");
    assert!(matches!(
      &err,
      AzureError::Http { status: 500, .. }
    ));
    assert!(!err.retriable());
  }

  #[test]
  fn empty_body_deserializes_as_null() {
    let v: Option<Value> = deserialize_body(b"").unwrap();
    assert_eq!(v, None);
  }
}

//! Typed client runtime for the Azure REST management plane.
//!
//! Callers build a [Req] describing a single call (usually through
//! generated bindings), then hand it to [AzRest]:
//!
//! - [AzRest::call] for scalar returns
//! - [AzRest::call_list] for paginated [AzList] returns
//! - [AzRest::call_long_operation] for async (LRO) operations
//! - [AzRest::call_batch] for the `/batch` endpoint
//!
//! Azure-typed errors are retried up to the configured bound,
//! network failures propagate unchanged.

use std::time::Duration;

use anyhow::Context;
use indexmap::IndexMap;
use reqwest::{
  StatusCode,
  header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER},
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::models::{
  AzBatchResponse, AzBatchResponses, AzList, AzureError, BatchReq,
  Req, decode_error, deserialize_body,
};

pub mod models;

/// The default Azure management plane endpoint.
pub const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

/// The default token scope for the management plane.
pub const DEFAULT_SCOPE: &str =
  "https://management.azure.com//.default";

const DEFAULT_RETRIES: u32 = 10;
const DEFAULT_LONG_RUNNING_RETRIES: u32 = 10;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// A bearer token obtained from a credential provider.
#[derive(Debug, Clone)]
pub struct AccessToken {
  pub token: String,
  /// Unix timestamp of expiry, if the provider reports one.
  pub expires_on: Option<i64>,
}

/// External credential contract. Token refresh is the provider's
/// responsibility; the client reads the token once at construction.
pub trait TokenCredential {
  fn get_token(&self, scope: &str) -> anyhow::Result<AccessToken>;
}

/// Client for the Azure management plane.
#[derive(Debug, Clone)]
pub struct AzRest {
  /// Long-lived session carrying the `Authorization` header.
  session: reqwest::Client,
  base_url: Url,
  retries: u32,
  long_running_retries: u32,
  poll_interval: Duration,
}

impl AzRest {
  /// Create a client against `base_url` with a bearer token
  /// installed on the underlying session.
  pub fn new(
    token: &str,
    base_url: &str,
  ) -> anyhow::Result<AzRest> {
    let mut auth =
      HeaderValue::from_str(&format!("Bearer {token}"))
        .context("token is not a valid header value")?;
    auth.set_sensitive(true);
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, auth);
    let session = reqwest::Client::builder()
      .default_headers(headers)
      .build()
      .context("failed to build http client")?;
    let base_url = Url::parse(base_url)
      .context("failed to parse base url")?;
    Ok(AzRest {
      session,
      base_url,
      retries: DEFAULT_RETRIES,
      long_running_retries: DEFAULT_LONG_RUNNING_RETRIES,
      poll_interval: DEFAULT_POLL_INTERVAL,
    })
  }

  /// Create a client for the default management endpoint
  /// from an Azure credential.
  pub fn from_credential(
    credential: &impl TokenCredential,
  ) -> anyhow::Result<AzRest> {
    let token = credential.get_token(DEFAULT_SCOPE)?;
    AzRest::new(&token.token, MANAGEMENT_ENDPOINT)
  }

  /// Set the retry bound. The client makes at most
  /// `retries + 1` attempts per logical request.
  pub fn with_retries(mut self, retries: u32) -> AzRest {
    self.retries = retries;
    self
  }

  /// Set the poll bound for long-running operations.
  pub fn with_long_running_retries(
    mut self,
    retries: u32,
  ) -> AzRest {
    self.long_running_retries = retries;
    self
  }

  /// Set the fallback sleep between long-running operation polls,
  /// used when the service sends no `Retry-After`.
  pub fn with_poll_interval(
    mut self,
    interval: Duration,
  ) -> AzRest {
    self.poll_interval = interval;
    self
  }

  /// Build the http request for a [Req] without sending it.
  ///
  /// The url is the base url joined with the request path, with
  /// `api-version` injected into the query. A json body sets
  /// `Content-Type: application/json`.
  pub fn to_request<T>(
    &self,
    req: &Req<T>,
  ) -> Result<reqwest::Request, AzureError> {
    let url = self.base_url.join(&req.path)?;
    let mut query = req.params.clone();
    if let Some(apiv) = &req.apiv {
      query.insert(String::from("api-version"), apiv.clone());
    }
    let mut builder =
      self.session.request(req.method.into(), url);
    if !query.is_empty() {
      builder = builder.query(&query);
    }
    if let Some(body) = &req.body {
      builder = builder.json(body);
    }
    Ok(builder.build()?)
  }

  /// Make a single call, deserialising into the declared
  /// return type. Azure errors are retried.
  pub async fn call<T: DeserializeOwned>(
    &self,
    req: &Req<T>,
  ) -> Result<T, AzureError> {
    self.retrying(req.name.clone(), || self.call_once(req)).await
  }

  /// Make a paginated call, following `nextLink` until exhausted
  /// and returning the flat list of values. Each page is retried
  /// independently.
  pub async fn call_list<T: DeserializeOwned>(
    &self,
    req: &Req<AzList<T>>,
  ) -> Result<Vec<T>, AzureError> {
    let mut acc = Vec::new();
    let mut page = self
      .retrying(req.name.clone(), || self.call_once(req))
      .await?;
    loop {
      acc.extend(page.value);
      let Some(next) =
        page.next_link.filter(|link| !link.is_empty())
      else {
        break;
      };
      page = self
        .retrying(req.name.clone(), || self.get_absolute(&next))
        .await?;
    }
    Ok(acc)
  }

  /// Start a long-running operation and follow it to its
  /// terminal state.
  ///
  /// The initial request goes through the retry layer. The poll
  /// location is taken from `Azure-AsyncOperation`, falling back
  /// to `Location`, and is honoured as an absolute url. Polls
  /// sleep for `Retry-After` seconds when the service sends it.
  pub async fn call_long_operation<T: DeserializeOwned>(
    &self,
    req: &Req<T>,
  ) -> Result<T, AzureError> {
    let (status, headers) = self
      .retrying(req.name.clone(), || self.call_initial(req))
      .await?;

    if !matches!(status.as_u16(), 201 | 202) {
      warn!(
        "unexpected status starting long-running operation | req: {} | status: {status}",
        req.name
      );
    }

    let poll_url = headers
      .get("Azure-AsyncOperation")
      .or_else(|| headers.get("Location"))
      .and_then(|value| value.to_str().ok())
      .ok_or_else(|| {
        AzureError::LongOperation(format!(
          "no Azure-AsyncOperation or Location header | req: {}",
          req.name
        ))
      })?
      .to_string();

    for _ in 0..self.long_running_retries {
      let res = self.session.get(&poll_url).send().await?;
      let status = res.status();
      match status.as_u16() {
        200 | 204 => {
          let body = res.bytes().await?;
          return deserialize_body(&body);
        }
        201 | 202 => {
          tokio::time::sleep(self.retry_after(res.headers()))
            .await;
        }
        _ => {
          let body = res.bytes().await?;
          return Err(match decode_error(
            status.as_u16(),
            &body,
          ) {
            AzureError::Http { status, body } => {
              AzureError::LongOperation(format!(
                "poll failed with status {status} | body: {body}"
              ))
            }
            e => e,
          });
        }
      }
    }

    Err(AzureError::LongOperation(format!(
      "not terminal after {} polls | req: {}",
      self.long_running_retries, req.name
    )))
  }

  /// Pack the batch into a single `/batch` call and demultiplex
  /// the response.
  ///
  /// Per-entry failures come back in-band in the result map,
  /// keyed by the ids the caller supplied, whatever order the
  /// service answered in.
  pub async fn call_batch<T: DeserializeOwned>(
    &self,
    batch: &BatchReq<T>,
  ) -> Result<IndexMap<String, Result<T, AzureError>>, AzureError>
  {
    let mut requests = Vec::with_capacity(batch.requests.len());
    for (id, req) in &batch.requests {
      // Prepare without sending to reuse the session's
      // url assembly for the sub-request.
      let prepared = self.to_request(req)?;
      let mut entry = json!({
        "httpMethod": req.method.to_string(),
        "name": id,
        "url": prepared.url().as_str(),
      });
      if let Some(body) = &req.body {
        entry["content"] = body.clone();
      }
      requests.push(entry);
    }

    let req = Req::<AzBatchResponses>::post(
      batch.name.clone(),
      "/batch",
      batch.apiv.clone(),
      Some(json!({ "requests": requests })),
    );
    let responses =
      self.retrying(req.name.clone(), || self.call_once(&req)).await?;

    let mut out = IndexMap::with_capacity(batch.requests.len());
    for res in responses.responses {
      if !batch.requests.contains_key(&res.name) {
        warn!(
          "batch response for unknown request | batch: {} | name: {}",
          batch.name, res.name
        );
        continue;
      }
      out.insert(res.name.clone(), decode_batch_entry(res));
    }
    Ok(out)
  }

  /// One attempt: send and decode into the declared return type.
  async fn call_once<T: DeserializeOwned>(
    &self,
    req: &Req<T>,
  ) -> Result<T, AzureError> {
    let request = self.to_request(req)?;
    let res = self.session.execute(request).await?;
    Self::decode(res).await
  }

  /// One attempt of the initial request of a long-running
  /// operation. Success keeps status and headers for the
  /// poll phase instead of a body.
  async fn call_initial<T>(
    &self,
    req: &Req<T>,
  ) -> Result<(StatusCode, HeaderMap), AzureError> {
    let request = self.to_request(req)?;
    let res = self.session.execute(request).await?;
    let status = res.status();
    if !status.is_success() {
      let body = res.bytes().await?;
      return Err(decode_error(status.as_u16(), &body));
    }
    let headers = res.headers().clone();
    Ok((status, headers))
  }

  /// GET an absolute url (a `nextLink`) on the shared session.
  /// The query is already embedded in the link.
  async fn get_absolute<T: DeserializeOwned>(
    &self,
    url: &str,
  ) -> Result<T, AzureError> {
    let res = self.session.get(url).send().await?;
    Self::decode(res).await
  }

  async fn decode<T: DeserializeOwned>(
    res: reqwest::Response,
  ) -> Result<T, AzureError> {
    let status = res.status();
    let body = res.bytes().await?;
    if !status.is_success() {
      return Err(decode_error(status.as_u16(), &body));
    }
    deserialize_body(&body)
  }

  /// Run `attempt` until success, a non-retriable error, or
  /// exhaustion of the retry bound. At most `retries + 1`
  /// attempts are made; the last error surfaces.
  async fn retrying<T, F, Fut>(
    &self,
    name: String,
    attempt: F,
  ) -> Result<T, AzureError>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AzureError>>,
  {
    let mut failures = 0;
    loop {
      match attempt().await {
        Ok(res) => return Ok(res),
        Err(e) if e.retriable() && failures < self.retries => {
          failures += 1;
          debug!(
            "retrying | req: {name} | attempt: {} | {e}",
            failures + 1
          );
        }
        Err(e) => return Err(e),
      }
    }
  }

  /// Parse `Retry-After` seconds, falling back to the configured
  /// poll interval on absence or a non-numeric value.
  fn retry_after(&self, headers: &HeaderMap) -> Duration {
    headers
      .get(RETRY_AFTER)
      .and_then(|value| value.to_str().ok())
      .and_then(|value| value.trim().parse::<u64>().ok())
      .map(Duration::from_secs)
      .unwrap_or(self.poll_interval)
  }
}

/// Decode one sub-response of a batch into the declared return
/// type or the typed error for that entry.
fn decode_batch_entry<T: DeserializeOwned>(
  res: AzBatchResponse,
) -> Result<T, AzureError> {
  let ok = (200..300).contains(&res.http_status_code);
  match res.content {
    Some(content) => {
      if content.get("error").is_some() {
        Err(decode_error(
          res.http_status_code,
          content.to_string().as_bytes(),
        ))
      } else if ok {
        let body = content.to_string();
        serde_json::from_value(content).map_err(|e| {
          AzureError::Deserialize { source: e, body }
        })
      } else {
        Err(AzureError::Http {
          status: res.http_status_code,
          body: content.to_string(),
        })
      }
    }
    None if ok => deserialize_body(b""),
    None => Err(AzureError::Http {
      status: res.http_status_code,
      body: String::new(),
    }),
  }
}

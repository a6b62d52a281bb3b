//! Client for the Azure Resource Graph.
//!
//! Queries are KQL strings scoped to a set of subscriptions.
//! The client owns retry and `skipToken` pagination; service
//! errors come back in-band as [GraphError::Azure].

use anyhow::Context;
use azrest_client::{
  DEFAULT_SCOPE, MANAGEMENT_ENDPOINT, TokenCredential,
};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::models::{
  GraphError, GraphReq, GraphRes, RetryPolicy,
};

pub mod models;

const GRAPH_PATH: &str =
  "/providers/Microsoft.ResourceGraph/resources";
const GRAPH_API_VERSION: &str = "2022-10-01";
const SUBSCRIPTIONS_API_VERSION: &str = "2020-01-01";

/// Access the Azure Resource Graph.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Long-lived session carrying the `Authorization` header.
  session: reqwest::Client,
  endpoint: Url,
  retry: RetryPolicy,
  /// Subscriptions queries are scoped to by default.
  pub subscriptions: Vec<String>,
}

impl Graph {
  /// Create a client scoped to the given subscriptions.
  pub fn new(
    token: &str,
    subscriptions: Vec<String>,
  ) -> anyhow::Result<Graph> {
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
    let endpoint = Url::parse(MANAGEMENT_ENDPOINT)
      .context("failed to parse management endpoint")?;
    Ok(Graph {
      session,
      endpoint,
      retry: RetryPolicy::default(),
      subscriptions,
    })
  }

  /// Create from an Azure credential, scoped to every
  /// subscription the token can see.
  pub async fn from_credential(
    credential: &impl TokenCredential,
  ) -> anyhow::Result<Graph> {
    let token = credential.get_token(DEFAULT_SCOPE)?;
    let mut graph = Graph::new(&token.token, Vec::new())?;
    graph.subscriptions = graph.fetch_subscriptions().await?;
    Ok(graph)
  }

  /// Point the client at a different endpoint.
  pub fn with_endpoint(
    mut self,
    endpoint: &str,
  ) -> anyhow::Result<Graph> {
    self.endpoint =
      Url::parse(endpoint).context("failed to parse endpoint")?;
    Ok(self)
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Graph {
    self.retry = retry;
    self
  }

  /// List the ids of the subscriptions visible to the session.
  async fn fetch_subscriptions(
    &self,
  ) -> anyhow::Result<Vec<String>> {
    let url = self
      .endpoint
      .join("/subscriptions")
      .context("failed to build subscriptions url")?;
    let raw: Value = self
      .session
      .get(url)
      .query(&[("api-version", SUBSCRIPTIONS_API_VERSION)])
      .send()
      .await
      .context("failed to list subscriptions")?
      .error_for_status()
      .context("listing subscriptions failed")?
      .json()
      .await
      .context("failed to decode subscriptions")?;
    Ok(
      raw["value"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|s| s["subscriptionId"].as_str())
        .map(String::from)
        .collect(),
    )
  }

  /// Make a graph query against the stored subscriptions and
  /// return the rows.
  pub async fn q(
    &self,
    query: &str,
  ) -> Result<Vec<Value>, GraphError> {
    self
      .query(&GraphReq::new(query, self.subscriptions.clone()))
      .await
      .map(|res| res.data)
  }

  /// Make a graph query, following `skipToken` pages until
  /// exhausted and folding them with [GraphRes::append].
  /// Errors short-circuit.
  pub async fn query(
    &self,
    req: &GraphReq,
  ) -> Result<GraphRes, GraphError> {
    let mut res = self.query_single(req).await?;
    while let Some(token) =
      res.skip_token.clone().filter(|t| !t.is_empty())
    {
      let paginated = req.clone().with_skip_token(token);
      let next = self.query_single(&paginated).await?;
      res = res.append(next);
    }
    Ok(res)
  }

  /// One retried query, without pagination.
  async fn query_single(
    &self,
    req: &GraphReq,
  ) -> Result<GraphRes, GraphError> {
    let mut failures = 0;
    loop {
      match self.exec_query(req).await {
        Ok(res) => return Ok(res),
        Err(e)
          if e.retriable() && failures < self.retry.retries =>
        {
          failures += 1;
          debug!(
            "retrying graph query | attempt: {} | {e}",
            failures + 1
          );
        }
        Err(e) => return Err(e),
      }
    }
  }

  async fn exec_query(
    &self,
    req: &GraphReq,
  ) -> Result<GraphRes, GraphError> {
    let url = self.endpoint.join(GRAPH_PATH)?;
    let res = self
      .session
      .post(url)
      .query(&[("api-version", GRAPH_API_VERSION)])
      .json(req)
      .send()
      .await?;
    let status = res.status().as_u16();
    let body = res.bytes().await?;
    decode(status, &body)
  }
}

/// Decode a graph response, preferring the error envelope.
fn decode(status: u16, body: &[u8]) -> Result<GraphRes, GraphError> {
  let raw: Value = match serde_json::from_slice(body) {
    Ok(raw) => raw,
    Err(_) => {
      return Err(GraphError::Http {
        status,
        body: String::from_utf8_lossy(body).into_owned(),
      });
    }
  };
  if let Some(error) = raw.get("error") {
    return Err(GraphError::Azure {
      code: error["code"].as_str().unwrap_or_default().to_string(),
      message: error["message"]
        .as_str()
        .unwrap_or_default()
        .to_string(),
      details: error.get("details").cloned().unwrap_or_default(),
    });
  }
  if !(200..300).contains(&status) {
    return Err(GraphError::Http {
      status,
      body: String::from_utf8_lossy(body).into_owned(),
    });
  }
  serde_json::from_value(raw).map_err(|e| {
    GraphError::Deserialize {
      source: e,
      body: String::from_utf8_lossy(body).into_owned(),
    }
  })
}

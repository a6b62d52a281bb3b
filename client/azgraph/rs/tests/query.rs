//! Behaviour tests for the Resource Graph client against a mock
//! graph endpoint.

use azgraph_client::{
  Graph,
  models::{GraphError, GraphReq, GraphRes, RetryPolicy},
};
use serde_json::{Value, json};
use wiremock::{
  Mock, MockServer, Request, ResponseTemplate,
  matchers::{method, path},
};

const SUB: &str = "00000000-0000-0000-0000-000000000000";
const GRAPH_PATH: &str =
  "/providers/Microsoft.ResourceGraph/resources";

async fn graph_for(
  server: &MockServer,
  retries: u32,
) -> Graph {
  Graph::new("test-token", vec![String::from(SUB)])
    .unwrap()
    .with_endpoint(&server.uri())
    .unwrap()
    .with_retry(RetryPolicy { retries })
}

fn failed_res() -> ResponseTemplate {
  ResponseTemplate::new(400).set_body_json(json!({
    "error": {
      "code": "BadThings",
      "message": "Bad things happened",
      "details": [
        {"code": "BadThings", "message": "Bad things happened"}
      ],
    }
  }))
}

fn page(data: Vec<Value>, skip_token: Option<&str>) -> Value {
  let mut body = json!({
    "totalRecords": 2,
    "count": data.len(),
    "resultTruncated": "false",
    "data": data,
  });
  if let Some(token) = skip_token {
    body["$skipToken"] = json!(token);
  }
  body
}

#[tokio::test]
async fn successful_query_does_not_retry() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_json(page(vec![], None)),
    )
    .expect(1)
    .mount(&server)
    .await;

  let g = graph_for(&server, 5).await;
  let res = g
    .query(&GraphReq::new("Resources", vec![String::from(SUB)]))
    .await
    .unwrap();
  assert_eq!(res.data, Vec::<Value>::new());
}

#[tokio::test]
async fn errors_are_retried_until_success() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(failed_res())
    .up_to_n_times(2)
    .expect(2)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_json(page(vec![json!("0")], None)),
    )
    .expect(1)
    .mount(&server)
    .await;

  let g = graph_for(&server, 5).await;
  let res = g
    .query(&GraphReq::new("Resources", vec![String::from(SUB)]))
    .await
    .unwrap();
  assert_eq!(res.data, vec![json!("0")]);
}

#[tokio::test]
async fn exceeding_retries_returns_the_error() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(failed_res())
    .expect(6)
    .mount(&server)
    .await;

  let g = graph_for(&server, 5).await;
  let err = g
    .query(&GraphReq::new("Resources", vec![String::from(SUB)]))
    .await
    .unwrap_err();
  assert!(
    matches!(err, GraphError::Azure { code, .. } if code == "BadThings")
  );
}

#[tokio::test]
async fn pagination_aggregates_pages() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_json(page(vec![json!("0")], Some("continued"))),
    )
    .up_to_n_times(1)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_json(page(vec![json!("1")], None)),
    )
    .mount(&server)
    .await;

  let g = graph_for(&server, 1).await;
  let res = g
    .query(&GraphReq::new("Resources", vec![String::from(SUB)]))
    .await
    .unwrap();
  assert_eq!(res.data, vec![json!("0"), json!("1")]);
  assert_eq!(res.count, 2);
}

#[tokio::test]
async fn retry_within_pagination() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_json(page(vec![json!("0")], Some("continued"))),
    )
    .up_to_n_times(1)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(failed_res())
    .up_to_n_times(1)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_json(page(vec![json!("1")], None)),
    )
    .mount(&server)
    .await;

  let g = graph_for(&server, 1).await;
  let res = g
    .query(&GraphReq::new("Resources", vec![String::from(SUB)]))
    .await
    .unwrap();
  assert_eq!(res.data, vec![json!("0"), json!("1")]);
  assert_eq!(res.count, 2);
}

#[tokio::test]
async fn failure_within_pagination_propagates() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(
      ResponseTemplate::new(200)
        .set_body_json(page(vec![json!("0")], Some("continued"))),
    )
    .up_to_n_times(1)
    .mount(&server)
    .await;
  // page two keeps failing until retries run out
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(failed_res())
    .expect(2)
    .mount(&server)
    .await;

  let g = graph_for(&server, 1).await;
  let err = g
    .query(&GraphReq::new("Resources", vec![String::from(SUB)]))
    .await
    .unwrap_err();
  assert!(matches!(err, GraphError::Azure { .. }));
}

#[tokio::test]
async fn second_page_carries_token_and_drops_skip() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(|req: &Request| {
      let body: Value =
        serde_json::from_slice(&req.body).unwrap();
      let options =
        body.get("options").cloned().unwrap_or(json!({}));
      if let Some(token) = options.get("$skipToken") {
        // follow-up page: the token must have replaced $skip
        assert_eq!(token, &json!("tok"));
        assert!(options.get("$skip").is_none());
        ResponseTemplate::new(200)
          .set_body_json(page(vec![json!("1")], None))
      } else {
        assert_eq!(options.get("$skip"), Some(&json!(100)));
        ResponseTemplate::new(200)
          .set_body_json(page(vec![json!("0")], Some("tok")))
      }
    })
    .expect(2)
    .mount(&server)
    .await;

  let g = graph_for(&server, 1).await;
  let mut req =
    GraphReq::new("Resources", vec![String::from(SUB)]);
  req.options.insert(String::from("$skip"), json!(100));

  let res = g.query(&req).await.unwrap();
  assert_eq!(res.data, vec![json!("0"), json!("1")]);
}

#[tokio::test]
async fn q_returns_rows() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path(GRAPH_PATH))
    .respond_with(ResponseTemplate::new(200).set_body_json(
      page(vec![json!({"id": "r0"})], None),
    ))
    .mount(&server)
    .await;

  let g = graph_for(&server, 0).await;
  let rows = g.q("Resources | project id").await.unwrap();
  assert_eq!(rows, vec![json!({"id": "r0"})]);
}

#[tokio::test]
async fn append_law_holds_for_folded_result() {
  let a = GraphRes {
    count: 1,
    data: vec![json!("0")],
    skip_token: Some(String::from("t")),
    ..Default::default()
  };
  let b = GraphRes {
    count: 1,
    data: vec![json!("1")],
    ..Default::default()
  };
  let folded = a.append(b);
  assert_eq!(folded.count, 2);
  assert_eq!(folded.data.len(), 2);
  assert_eq!(folded.skip_token, None);
}

//! Engine against an HTTP embedding service.
//!
//! A wiremock server speaks the Ollama `/api/embed` protocol and answers
//! with the mock provider's hashed vectors, so results match the in-process
//! tests while exercising the real client.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use e2e_tests::{TestHarness, MOCK_DIM};
use vecsync_embeddings::{HttpEmbedder, HttpEmbedderConfig, MockEmbedder};
use vecsync_engine::{HostHooks, NoOpProgress};
use vecsync_types::Settings;

struct HashedEmbeddings {
    mock: MockEmbedder,
}

impl Respond for HashedEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(|i| i.as_str())
                    .map(|i| self.mock.vector_for(i).values)
                    .collect()
            })
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

async fn embedding_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_string_contains("poison"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(HashedEmbeddings {
            mock: MockEmbedder::new("nomic-embed-text", MOCK_DIM),
        })
        .mount(&server)
        .await;
    server
}

fn http_settings(harness: &TestHarness, server: &MockServer) -> Settings {
    Settings {
        model_name: "nomic-embed-text".to_string(),
        embedding_size: MOCK_DIM,
        provider_url: server.uri(),
        max_retries: 1,
        batch_size: 2,
        search_results_limit: 1,
        index_path: harness.index_path.to_string_lossy().to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_sync_and_search_over_http() {
    let harness = TestHarness::new();
    harness.put(5, "cat gato", 10);
    harness.put(9, "fig leaf", 20);
    harness.put(12, "sun sol", 30);
    let server = embedding_server().await;
    let settings = http_settings(&harness, &server);

    let provider = Arc::new(HttpEmbedder::new(HttpEmbedderConfig::from_settings(&settings)).unwrap());
    let (hooks, outcome) =
        HostHooks::on_init(&settings, provider, harness.store.clone(), &NoOpProgress)
            .await
            .unwrap();

    assert_eq!(outcome.stats.indexed, 3);
    assert_eq!(outcome.stats.batches, 2);
    assert_eq!(hooks.engine().watermark(), 30);
    assert_eq!(hooks.on_search_query("vec:cat").await, "(nid:5)");
}

#[tokio::test]
async fn test_http_failure_is_held_back() {
    let harness = TestHarness::new();
    harness.put(1, "cat gato", 10);
    harness.put(2, "fig leaf", 20);
    harness.put(3, "poison apple", 30);
    harness.put(4, "sun sol", 40);
    let server = embedding_server().await;
    let settings = http_settings(&harness, &server);

    let provider = Arc::new(HttpEmbedder::new(HttpEmbedderConfig::from_settings(&settings)).unwrap());
    let (hooks, outcome) =
        HostHooks::on_init(&settings, provider, harness.store.clone(), &NoOpProgress)
            .await
            .unwrap();

    assert_eq!(outcome.stats.indexed, 2);
    assert_eq!(outcome.stats.failed, 2);
    assert_eq!(hooks.engine().watermark(), 29);
    assert!(!hooks.engine().contains(4).unwrap());
}

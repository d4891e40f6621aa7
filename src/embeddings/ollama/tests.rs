use super::*;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, batch_size: u32) -> OllamaConfig {
    let address = server.address();
    OllamaConfig {
        protocol: "http".to_string(),
        host: address.ip().to_string(),
        port: address.port(),
        model: "test-model".to_string(),
        batch_size,
    }
}

fn client_for(server: &MockServer, batch_size: u32) -> OllamaClient {
    OllamaClient::new(&config_for(server, batch_size))
        .expect("Failed to create client")
        .with_retry_policy(RetryPolicy {
            attempts: 3,
            base_delay: Duration::ZERO,
        })
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model(), "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry, RetryPolicy::default());
}

#[test]
fn builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_connect_timeout(Duration::from_secs(2))
        .with_retry_policy(RetryPolicy::with_retries(5));

    assert_eq!(client.retry.attempts, 6);
}

#[tokio::test]
async fn embeds_in_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_json(json!({"model": "test-model", "input": ["a", "b"]})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"embeddings": [[1.0, 0.0], [0.0, 1.0]]})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_json(json!({"model": "test-model", "input": ["c"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.5, 0.5]]})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let embeddings = client
        .embed_documents(&texts)
        .await
        .expect("should embed texts");

    assert_eq!(
        embeddings,
        vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]]
    );
}

#[tokio::test]
async fn embed_query_returns_single_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.1, 0.2, 0.3]]})),
        )
        .mount(&server)
        .await;

    let vector = client_for(&server, 16)
        .embed_query("battery life")
        .await
        .expect("should embed query");
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0]]})))
        .mount(&server)
        .await;

    let vector = client_for(&server, 16)
        .embed_query("retry me")
        .await
        .expect("third attempt should succeed");
    assert_eq!(vector, vec![1.0]);
}

#[tokio::test]
async fn client_errors_become_provider_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server, 16).embed_query("anything").await;
    assert!(matches!(result, Err(RagError::Provider(_))));
}

#[tokio::test]
async fn count_mismatch_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0]]})))
        .mount(&server)
        .await;

    let texts = vec!["one".to_string(), "two".to_string()];
    let result = client_for(&server, 16).embed_documents(&texts).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn empty_input_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let embeddings = client_for(&server, 16)
        .embed_documents(&[])
        .await
        .expect("empty input");
    assert!(embeddings.is_empty());
}

#[tokio::test]
async fn health_check_requires_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "test-model", "size": 1024}, {"name": "other"}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 16);
    tokio::task::spawn_blocking(move || {
        client.health_check().expect("model is listed");

        let missing = OllamaClient {
            model: "absent".to_string(),
            ..client.clone()
        };
        assert!(missing.health_check().is_err());
    })
    .await
    .expect("blocking task");
}

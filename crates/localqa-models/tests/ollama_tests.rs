use std::sync::Arc;
use std::time::Duration;

use localqa_core::{CallOptions, Embedder, Error, GenerationConfig, GenerationRequest, Generator, ModelStatus};
use localqa_models::{EmbeddingProvider, GenerationProvider, ModelGate, OllamaClient, OllamaEmbedder, OllamaGenerator};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest {
        system: "Answer from context.".into(),
        prompt: prompt.into(),
        config: GenerationConfig::default(),
    }
}

#[tokio::test]
async fn embed_posts_batched_input() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(serde_json::json!({
            "model": "nomic-embed-text",
            "input": ["a", "b"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "nomic-embed-text",
            "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(OllamaClient::new(server.uri()), "nomic-embed-text");
    let out = embedder.embed_batch(&["a".to_string(), "b".to_string()]).await.unwrap();
    assert_eq!(out, vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]);
}

#[tokio::test]
async fn server_error_maps_to_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(OllamaClient::new(server.uri()), "nomic-embed-text");
    let err = embedder.embed_batch(&["a".to_string()]).await.unwrap_err();
    match err {
        Error::EmbeddingUnavailable(msg) => assert!(msg.contains("500"), "{msg}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn malformed_body_maps_to_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let generator = OllamaGenerator::new(OllamaClient::new(server.uri()), "mistral");
    let err = generator.generate(&request("Q")).await.unwrap_err();
    assert!(matches!(err, Error::GenerationUnavailable(_)), "{err}");
}

#[tokio::test]
async fn slow_embedding_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "embeddings": [[1.0]] }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(OllamaClient::new(server.uri()), "nomic-embed-text");
    let provider = EmbeddingProvider::new(Arc::new(embedder), ModelGate::new(1))
        .with_timeout(Duration::from_millis(100));
    let err = provider.embed_query("sky", &CallOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::EmbeddingTimeout(_)), "{err}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unreachable_server_is_unavailable() {
    // Nothing listens on port 9 locally.
    let embedder = OllamaEmbedder::new(OllamaClient::new("http://127.0.0.1:9"), "nomic-embed-text")
        .with_timeout(Duration::from_secs(2));
    let err = embedder.embed_batch(&["a".to_string()]).await.unwrap_err();
    assert!(matches!(err, Error::EmbeddingUnavailable(_) | Error::EmbeddingTimeout(_)), "{err}");
    assert_eq!(embedder.status().await, ModelStatus::Unreachable);
}

#[tokio::test]
async fn chat_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({ "model": "mistral", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "mistral",
            "message": { "role": "assistant", "content": " The sky is blue. [a.txt]\n" },
            "done": true,
            "prompt_eval_count": 42,
            "eval_count": 7
        })))
        .mount(&server)
        .await;

    let generator = OllamaGenerator::new(OllamaClient::new(server.uri()), "mistral");
    let provider = GenerationProvider::new(Arc::new(generator), ModelGate::default());
    let answer = provider.generate(&request("What color is the sky?"), &CallOptions::default()).await.unwrap();
    assert_eq!(answer, "The sky is blue. [a.txt]");
}

#[tokio::test]
async fn cancelling_a_slow_generation_returns_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "message": { "role": "assistant", "content": "late" } }))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let generator = OllamaGenerator::new(OllamaClient::new(server.uri()), "mistral");
    let provider = GenerationProvider::new(Arc::new(generator), ModelGate::new(1));
    let opts = CallOptions::default();
    let cancel = opts.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let err = provider.generate(&request("Q"), &opts).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn tags_endpoint_reports_installed_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{ "name": "nomic-embed-text:latest" }, { "name": "mistral:7b" }]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri());
    assert_eq!(client.list_models().await.unwrap(), vec!["nomic-embed-text:latest", "mistral:7b"]);
    assert_eq!(client.model_status("nomic-embed-text").await, ModelStatus::Ready);
    assert_eq!(client.model_status("llama3").await, ModelStatus::NotInstalled);

    let embedder = OllamaEmbedder::new(client.clone(), "nomic-embed-text");
    assert_eq!(embedder.status().await, ModelStatus::Ready);
    let generator = OllamaGenerator::new(client, "koesn/mistral-7b-instruct");
    assert_eq!(Generator::status(&generator).await, ModelStatus::NotInstalled);
}

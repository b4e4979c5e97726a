#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Ollama collaborators against a mocked HTTP server

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serial_test::serial;
use std::time::Duration;
use style_search::Facet;
use style_search::caption::{Caption, CaptionClient, ImageSource};
use style_search::config::{Config, OllamaConfig};
use style_search::embeddings::{EMBEDDING_DIMENSION, EmbeddingAdapter, OllamaClient};
use style_search::index::IndexKind;
use style_search::ingest;
use style_search::service::{IndexLoad, StyleSearchService};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const FAKE_IMAGE: &[u8] = b"\x89PNG\r\n\x1a\nnot really a png";

/// Raw 1792-d embedding derived from the text bytes
fn raw_embedding(text: &str) -> Vec<f32> {
    let bytes = text.as_bytes();
    (0..1792)
        .map(|i| {
            let byte = bytes.get(i % bytes.len().max(1)).copied().unwrap_or(0);
            f32::from(byte) / 255.0 + (i % 3) as f32 * 0.01
        })
        .collect()
}

/// Answers `/api/embed` with one embedding per input text
struct EmbedResponder;

impl Respond for EmbedResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).unwrap_or(serde_json::Value::Null);
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .map(|text| raw_embedding(text.as_str().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "test-embed",
            "embeddings": embeddings,
        }))
    }
}

fn test_config(server: &MockServer, base_dir: &std::path::Path) -> Config {
    let address = server.address();
    Config {
        ollama: OllamaConfig {
            protocol: "http".to_string(),
            host: address.ip().to_string(),
            port: address.port(),
            embedding_model: "test-embed".to_string(),
            vision_model: "test-vision".to_string(),
            batch_size: 2,
            ..OllamaConfig::default()
        },
        base_dir: base_dir.to_path_buf(),
        ..Config::default()
    }
}

fn chat_stream(content: &str) -> String {
    // Split the reply across several chunks the way a streaming model does
    let chars: Vec<char> = content.chars().collect();
    let mut lines: Vec<String> = chars
        .chunks(7)
        .map(|piece| {
            serde_json::json!({
                "model": "test-vision",
                "message": {"role": "assistant", "content": piece.iter().collect::<String>()},
                "done": false,
            })
            .to_string()
        })
        .collect();
    lines.push(r#"{"model":"test-vision","message":{"role":"assistant","content":""},"done":true}"#.to_string());
    lines.join("\n")
}

#[tokio::test(flavor = "multi_thread")]
async fn batches_follow_configured_size() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(EmbedResponder)
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new()?;
    let client = OllamaClient::new(&test_config(&server, dir.path()))?;
    let texts: Vec<String> = ["油画", "水彩", "素描", "版画", "国画"]
        .iter()
        .map(ToString::to_string)
        .collect();

    let embeddings = tokio::task::spawn_blocking(move || client.generate_embeddings_batch(&texts))
        .await??;

    assert_eq!(embeddings.len(), 5);
    assert!(embeddings.iter().all(|e| e.len() == 1792));
    assert_eq!(embeddings[2], raw_embedding("素描"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn adapter_fits_model_output() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(EmbedResponder)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new()?;
    let adapter = EmbeddingAdapter::new(OllamaClient::new(&test_config(&server, dir.path()))?);

    let vector = tokio::task::spawn_blocking(move || adapter.embed_and_fit("赛博朋克")).await??;

    assert_eq!(vector.len(), EMBEDDING_DIMENSION);
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn server_errors_are_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(EmbedResponder)
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new()?;
    let client = OllamaClient::new(&test_config(&server, dir.path()))?.with_retry_attempts(2);

    let embedding = tokio::task::spawn_blocking(move || client.generate_embedding("重试")).await??;
    assert_eq!(embedding, raw_embedding("重试"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn client_errors_are_not_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new()?;
    let client = OllamaClient::new(&test_config(&server, dir.path()))?.with_retry_attempts(3);

    let result = tokio::task::spawn_blocking(move || client.generate_embedding("missing")).await?;
    assert!(result.is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_finds_model() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [
                {"name": "test-embed", "size": 1024, "digest": "abc"},
                {"name": "test-vision"}
            ]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new()?;
    let mut config = test_config(&server, dir.path());
    let client = OllamaClient::new(&config)?;
    assert!(tokio::task::spawn_blocking(move || client.health_check()).await?.is_ok());

    config.ollama.embedding_model = "absent-model".to_string();
    let client = OllamaClient::new(&config)?;
    assert!(tokio::task::spawn_blocking(move || client.health_check()).await?.is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn captions_image_from_url() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/images/cat.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(FAKE_IMAGE))
        .expect(1)
        .mount(&server)
        .await;
    let reply = "```json\n{\"desc\": \"一只橘猫\", \"style\": \"插画\", \"features\": \"圆眼睛\", \"color\": \"橙色\"}\n```";
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(chat_stream(reply)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new()?;
    let client = CaptionClient::new(&test_config(&server, dir.path()))?;
    let source = ImageSource::parse_url(&format!("{}/images/cat.png", server.uri()))?;

    let caption = tokio::task::spawn_blocking(move || client.try_caption(&source)).await??;

    assert_eq!(
        caption,
        Caption {
            desc: "一只橘猫".to_string(),
            style: "插画".to_string(),
            features: "圆眼睛".to_string(),
            color: "橙色".to_string(),
        }
    );

    let requests = server.received_requests().await.unwrap_or_default();
    let chat = requests
        .iter()
        .find(|r| r.url.path() == "/api/chat")
        .expect("chat request was sent");
    let body: serde_json::Value = serde_json::from_slice(&chat.body)?;
    assert_eq!(body["model"], "test-vision");
    assert_eq!(body["messages"][0]["images"][0], BASE64.encode(FAKE_IMAGE));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn caption_failure_degrades_to_empty() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(chat_stream("I cannot help with that")))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new()?;
    let client = CaptionClient::new(&test_config(&server, dir.path()))?.with_retry_attempts(1);
    let source = ImageSource::Bytes(FAKE_IMAGE.to_vec());

    let caption = tokio::task::spawn_blocking(move || client.caption(&source)).await?;
    assert_eq!(caption, Caption::default());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_image_degrades_to_empty() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/images/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new()?;
    let client = CaptionClient::new(&test_config(&server, dir.path()))?;
    let source = ImageSource::parse_url(&format!("{}/images/gone.png", server.uri()))?;

    let caption = tokio::task::spawn_blocking(move || client.caption(&source)).await?;
    assert!(caption.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn ingest_then_search_by_text() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(EmbedResponder)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new()?;
    let config = test_config(&server, dir.path());
    let source = dir.path().join("catalog.jsonl");
    std::fs::write(
        &source,
        [
            r#"{"slug_new": "ink", "img_url": "u-ink", "desc_zh": "山水", "ai_desc_zh": "山水", "ai_style_zh": "水墨", "ai_features_zh": "留白", "ai_color_zh": "黑白"}"#,
            r#"{"slug_new": "neon", "img_url": "u-neon", "desc_zh": "城市", "ai_desc_zh": "城市", "ai_style_zh": "赛博朋克", "ai_features_zh": "霓虹灯", "ai_color_zh": "紫色"}"#,
            r#"{"slug_new": "oil", "img_url": "u-oil", "desc_zh": "花", "ai_desc_zh": "花", "ai_style_zh": "油画", "ai_features_zh": "厚涂", "ai_color_zh": "暖色"}"#,
        ]
        .join("\n"),
    )?;

    let result = tokio::task::spawn_blocking(move || -> Result<_> {
        let adapter = EmbeddingAdapter::new(OllamaClient::new(&config)?);
        ingest::ingest_file(&source, &config.store_path(), &adapter, false)?;

        let service = StyleSearchService::open_with(&config, IndexLoad::Reuse)?;
        assert_eq!(service.indices().get(Facet::Style).kind(), IndexKind::Flat);
        Ok(service.search_text(&adapter, "赛博朋克", Facet::Style, 3)?)
    })
    .await??;

    assert_eq!(result.slugs[0], "neon");
    assert!(result.distances[0] < 1e-6);
    assert_eq!(result.len(), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn text_search_degrades_when_ollama_is_down() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new()?;
    let config = test_config(&server, dir.path());
    let store = style_search::store::VectorStore::empty();
    store.save(&config.store_path())?;

    let results = tokio::task::spawn_blocking(move || -> Result<_> {
        let service = StyleSearchService::open(&config)?;
        let adapter = EmbeddingAdapter::new(OllamaClient::new(&config)?.with_timeout(Duration::from_secs(5)));
        Ok(service.search_text(&adapter, "anything", Facet::Content, 5)?)
    })
    .await??;

    assert!(results.is_empty());
    Ok(())
}

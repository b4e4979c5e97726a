use super::*;
use crate::config::OllamaConfig;

fn caption(desc: &str, style: &str, features: &str, color: &str) -> Caption {
    Caption {
        desc: desc.to_string(),
        style: style.to_string(),
        features: features.to_string(),
        color: color.to_string(),
    }
}

#[test]
fn combined_text_joins_fields_in_order() {
    let c = caption("一只猫", "水彩", "柔和线条", "暖色调");
    assert_eq!(c.combined_text(), "一只猫 水彩 柔和线条 暖色调");
}

#[test]
fn empty_caption_has_empty_text() {
    assert!(Caption::default().is_empty());
    assert_eq!(Caption::default().combined_text(), "");
    assert!(caption(" ", "", "\n", "").is_empty());
    assert!(!caption("", "", "", "蓝色").is_empty());
}

#[test]
fn stream_contents_are_concatenated() {
    let body = concat!(
        r#"{"model":"gemma3:27b","message":{"role":"assistant","content":"```json\n{\"desc\": "},"done":false}"#,
        "\n",
        r#"{"model":"gemma3:27b","message":{"role":"assistant","content":"\"山水\"}"},"done":false}"#,
        "\n",
        "not json at all\n",
        r#"{"model":"gemma3:27b","message":{"role":"assistant","content":"\n```"},"done":true}"#,
        "\n"
    );

    assert_eq!(collect_stream(body), "```json\n{\"desc\": \"山水\"}\n```");
}

#[test]
fn stream_without_messages_is_empty() {
    let body = r#"{"done":true,"total_duration":12}"#;
    assert_eq!(collect_stream(body), "");
}

#[test]
fn parses_fenced_reply() {
    let reply = "```json\n{\"desc\": \"山水\", \"style\": \"国画\", \"features\": \"留白\", \"color\": \"墨色\"}\n```";
    assert_eq!(
        parse_caption(reply).expect("parses"),
        caption("山水", "国画", "留白", "墨色")
    );
}

#[test]
fn parses_bare_reply_with_missing_fields() {
    let reply = "{\"desc\": \"城市夜景\", \"color\": \"霓虹\"}";
    assert_eq!(
        parse_caption(reply).expect("parses"),
        caption("城市夜景", "", "", "霓虹")
    );
}

#[test]
fn parses_reply_with_surrounding_chatter() {
    let reply = "Here is the result: {\"desc\": \"a\", \"style\": \"b\"} hope it helps";
    assert_eq!(parse_caption(reply).expect("parses"), caption("a", "b", "", ""));
}

#[test]
fn rejects_reply_without_json() {
    assert!(parse_caption("I cannot see the image").is_err());
    assert!(parse_caption("").is_err());
}

#[test]
fn rejects_reply_without_content() {
    assert!(parse_caption("{}").is_err());
    assert!(parse_caption("{\"desc\": \"\"}").is_err());
}

#[test]
fn image_url_must_be_http() {
    assert!(matches!(
        ImageSource::parse_url("https://img.example.com/a.jpg"),
        Ok(ImageSource::Url(_))
    ));
    assert!(ImageSource::parse_url("file:///etc/passwd").is_err());
    assert!(ImageSource::parse_url("not a url").is_err());
}

#[test]
fn client_configuration() {
    let config = Config {
        ollama: OllamaConfig {
            host: "vision-host".to_string(),
            port: 8080,
            vision_model: "llava:13b".to_string(),
            temperature: 0.3,
            ..OllamaConfig::default()
        },
        ..Config::default()
    };
    let client = CaptionClient::new(&config)
        .expect("Failed to create client")
        .with_retry_attempts(0);

    assert_eq!(client.model, "llava:13b");
    assert_eq!(client.temperature, 0.3);
    assert_eq!(client.base_url.host_str(), Some("vision-host"));
    assert_eq!(client.retry_attempts, 1);
}

#[test]
fn chat_request_serialization() {
    let request = ChatRequest {
        model: "gemma3:27b",
        messages: [ChatMessage {
            role: "user",
            content: "describe",
            images: vec!["aGVsbG8=".to_string()],
        }],
        options: ChatOptions { temperature: 0.5 },
        stream: true,
    };

    let json = serde_json::to_value(&request).expect("serializes");
    assert_eq!(
        json,
        serde_json::json!({
            "model": "gemma3:27b",
            "messages": [{"role": "user", "content": "describe", "images": ["aGVsbG8="]}],
            "options": {"temperature": 0.5},
            "stream": true,
        })
    );
}

#[test]
fn empty_image_degrades_to_empty_caption() {
    let client = CaptionClient::new(&Config::default()).expect("Failed to create client");
    let source = ImageSource::Bytes(Vec::new());

    assert!(client.try_caption(&source).is_err());
    assert_eq!(client.caption(&source), Caption::default());
}

#[test]
fn image_formats_are_recognized_by_magic_bytes() {
    assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]), Some(ImageFormat::Jpeg));
    assert_eq!(
        ImageFormat::sniff(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
        Some(ImageFormat::Png)
    );
    assert_eq!(ImageFormat::sniff(b"GIF89a\x01\0"), Some(ImageFormat::Gif));
    assert_eq!(ImageFormat::sniff(b"GIF87a"), Some(ImageFormat::Gif));
    assert_eq!(
        ImageFormat::sniff(b"RIFF\x24\0\0\0WEBPVP8 "),
        Some(ImageFormat::WebP)
    );

    assert_eq!(ImageFormat::sniff(b"RIFF\x24\0\0\0WAVEfmt "), None);
    assert_eq!(ImageFormat::sniff(b"%PDF-1.7"), None);
    assert_eq!(ImageFormat::sniff(b"\x89PN"), None);
}

#[test]
fn unsupported_bytes_are_not_sent_to_the_model() {
    // Nothing listens on this port; the format check fails before any request
    let config = Config {
        ollama: OllamaConfig {
            port: 9,
            ..OllamaConfig::default()
        },
        ..Config::default()
    };
    let client = CaptionClient::new(&config)
        .expect("Failed to create client")
        .with_retry_attempts(1);
    let source = ImageSource::Bytes(b"plain text, not an image".to_vec());

    let err = client.try_caption(&source).expect_err("unsupported format");
    assert!(format!("{:#}", err).contains("Unsupported image format"));
    assert_eq!(client.caption(&source), Caption::default());
}

#[test]
fn json_object_is_located_inside_prose() {
    let reply = "好的：{\"desc\": \"山\", \"color\": \"青\"} 以上";
    assert_eq!(parse_caption(reply).expect("parses"), caption("山", "", "", "青"));
    assert!(parse_caption("} reversed {").is_err());
}

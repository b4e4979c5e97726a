//! Image captioning through an Ollama vision model.
//!
//! The model is asked for a small JSON object describing the image. Any
//! failure along the way (fetching the image, calling the model, parsing its
//! answer) yields an empty [`Caption`] so that callers simply find no matches.

#[cfg(test)]
mod tests;

use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::embeddings::ollama::{
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT_SECONDS, build_agent, request_with_retry,
};

/// Vision models are much slower than the embedding endpoint
const CAPTION_TIMEOUT_SECONDS: u64 = DEFAULT_TIMEOUT_SECONDS * 4;
const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

const CAPTION_PROMPT: &str = "\
请用中文简要描述这张图片，分为四个方面：画面内容、图片风格、图片特征、图片色彩。
只返回一个 JSON 对象，包含以下四个字符串字段：
desc: 画面内容
style: 图片风格
features: 图片特征
color: 图片色彩
不要返回 JSON 以外的任何内容。";

/// Structured description of an image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Caption {
    pub desc: String,
    pub style: String,
    pub features: String,
    pub color: String,
}

impl Caption {
    #[inline]
    pub fn is_empty(&self) -> bool {
        [&self.desc, &self.style, &self.features, &self.color]
            .iter()
            .all(|field| field.trim().is_empty())
    }

    /// The fields joined by spaces, in the order desc, style, features, color
    #[inline]
    pub fn combined_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.desc, self.style, self.features, self.color
        )
        .trim()
        .to_string()
    }
}

/// Where the image to caption comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(Url),
    Bytes(Vec<u8>),
}

impl ImageSource {
    /// Parse an http(s) image URL
    #[inline]
    pub fn parse_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).with_context(|| format!("Invalid image URL: {}", raw))?;
        match url.scheme() {
            "http" | "https" => Ok(Self::Url(url)),
            other => Err(anyhow::anyhow!(
                "Unsupported image URL scheme '{}', expected http or https",
                other
            )),
        }
    }
}

/// Image encodings the vision model accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageFormat {
    /// Recognize an image by its leading magic bytes
    #[inline]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n', ..] => Some(Self::Png),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::WebP),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    options: ChatOptions,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    message: Option<ChunkMessage>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Client for the Ollama chat endpoint with a vision model
#[derive(Debug, Clone)]
pub struct CaptionClient {
    base_url: Url,
    model: String,
    temperature: f32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

impl CaptionClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.ollama.vision_model.clone(),
            temperature: config.ollama.temperature,
            agent: build_agent(Duration::from_secs(CAPTION_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Caption an image, returning an empty caption on any failure
    #[inline]
    pub fn caption(&self, source: &ImageSource) -> Caption {
        match self.try_caption(source) {
            Ok(caption) => caption,
            Err(e) => {
                warn!("Captioning failed, continuing without a caption: {:#}", e);
                Caption::default()
            }
        }
    }

    /// Caption an image, reporting failures to the caller
    #[inline]
    pub fn try_caption(&self, source: &ImageSource) -> Result<Caption> {
        let fetched;
        let bytes = match source {
            ImageSource::Url(url) => {
                fetched = self.fetch_image(url)?;
                &fetched
            }
            ImageSource::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Err(anyhow::anyhow!("Image is empty"));
                }
                bytes
            }
        };
        let format = ImageFormat::sniff(bytes).ok_or_else(|| {
            anyhow::anyhow!("Unsupported image format, expected JPEG, PNG, GIF or WebP")
        })?;
        debug!("Encoding {} byte {:?} image", bytes.len(), format);
        let encoded = BASE64.encode(bytes);

        let reply = self.chat(encoded)?;
        let caption = parse_caption(&reply)?;
        info!(
            "Captioned image with {} ({} characters)",
            self.model,
            caption.combined_text().chars().count()
        );
        Ok(caption)
    }

    /// Download the image at `url`
    #[inline]
    pub fn fetch_image(&self, url: &Url) -> Result<Vec<u8>> {
        debug!("Fetching image from {}", url);

        let bytes = request_with_retry(self.retry_attempts, url, || {
            self.agent.get(url.as_str()).call().and_then(|mut resp| {
                resp.body_mut()
                    .with_config()
                    .limit(MAX_IMAGE_BYTES)
                    .read_to_vec()
            })
        })
        .with_context(|| format!("Failed to fetch image from {}", url))?;

        if bytes.is_empty() {
            return Err(anyhow::anyhow!("Image at {} is empty", url));
        }

        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }

    fn chat(&self, image_base64: String) -> Result<String> {
        let url = self
            .base_url
            .join("/api/chat")
            .context("Failed to build chat URL")?;

        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: CAPTION_PROMPT,
                images: vec![image_base64],
            }],
            options: ChatOptions {
                temperature: self.temperature,
            },
            stream: true,
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize chat request")?;

        debug!("Requesting caption from {} at {}", self.model, url);

        let response_text = request_with_retry(self.retry_attempts, &self.base_url, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to request caption")?;

        Ok(collect_stream(&response_text))
    }
}

/// Concatenate the message contents of a streamed (newline-delimited JSON)
/// chat response. Lines that are not chunks are skipped.
fn collect_stream(body: &str) -> String {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<ChatChunk>(line) {
            Ok(chunk) => chunk.message.map(|m| m.content),
            Err(e) => {
                debug!("Skipping unparsable stream line: {}", e);
                None
            }
        })
        .collect()
}

/// Parse the model's answer, tolerating a surrounding Markdown code fence
fn parse_caption(reply: &str) -> Result<Caption> {
    let mut text = reply.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest.strip_prefix("json").unwrap_or(rest);
    }
    text = text.trim_end().trim_end_matches('`').trim();

    let json = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => text.get(start..=end),
        _ => None,
    }
    .ok_or_else(|| anyhow::anyhow!("Caption reply contains no JSON object"))?;

    let caption: Caption =
        serde_json::from_str(json).context("Failed to parse caption JSON")?;
    if caption.is_empty() {
        return Err(anyhow::anyhow!("Caption reply has no content"));
    }
    Ok(caption)
}

// src/extract/client.rs

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::VisionModel;
use crate::config::{VisionBackend, VisionSection};
use crate::error::ExtractionError;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone)]
struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: String,
}

/// OpenAI-compatible chat-completions client with image input.
pub struct HttpVisionModel {
    client: Client,
    backend: VisionBackend,
    endpoint: Result<ResolvedEndpoint, String>,
    healthy: OnceCell<bool>,
}

impl HttpVisionModel {
    /// Never fails: a misconfigured backend surfaces per scan as `NotConfigured`.
    pub fn from_config(vision: &VisionSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(vision.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });
        Self {
            client,
            backend: vision.backend,
            endpoint: resolve_endpoint(vision),
            healthy: OnceCell::new(),
        }
    }

    async fn ensure_reachable(&self, endpoint: &ResolvedEndpoint) -> Result<(), ExtractionError> {
        if self.backend != VisionBackend::Ollama {
            return Ok(());
        }
        let healthy = *self
            .healthy
            .get_or_init(|| check_ollama_health(&self.client, &endpoint.base_url))
            .await;
        if healthy {
            Ok(())
        } else {
            Err(ExtractionError::NotConfigured(format!(
                "Ollama is not running at {}",
                endpoint.base_url
            )))
        }
    }
}

fn resolve_endpoint(vision: &VisionSection) -> Result<ResolvedEndpoint, String> {
    let cfg = match vision.backend {
        VisionBackend::Remote => &vision.remote,
        VisionBackend::Ollama => &vision.ollama,
    };
    let api_key = match (&cfg.api_key_env, vision.backend) {
        (Some(var), _) => match std::env::var(var) {
            Ok(key) => key,
            Err(_) if vision.backend == VisionBackend::Ollama => "ollama".to_string(),
            Err(_) => return Err(format!("{var} env var required for remote backend")),
        },
        (None, VisionBackend::Ollama) => "ollama".to_string(), // required by API but ignored
        (None, VisionBackend::Remote) => return Err("remote backend needs api_key_env".to_string()),
    };
    info!(
        backend = ?vision.backend,
        url = %cfg.base_url,
        model = %cfg.model,
        "Vision endpoint resolved"
    );
    Ok(ResolvedEndpoint {
        base_url: cfg.base_url.trim_end_matches('/').to_string(),
        model: cfg.model.clone(),
        api_key,
    })
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches('/').trim_end_matches("/v1");

    match client
        .get(health_url)
        .timeout(Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => {
            info!("Ollama server is reachable");
            true
        }
        Ok(resp) => {
            warn!(status = %resp.status(), "Ollama server returned non-OK status");
            false
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

/// URLs pass through; local paths are inlined as a base64 `data:` URL.
pub async fn image_url(image_ref: &str) -> Result<String, ExtractionError> {
    if image_ref.contains("://") || image_ref.starts_with("data:") {
        return Ok(image_ref.to_string());
    }
    let bytes = tokio::fs::read(image_ref)
        .await
        .map_err(|e| ExtractionError::Http(format!("could not read image {image_ref}: {e}")))?;
    Ok(format!(
        "data:{};base64,{}",
        mime_for(Path::new(image_ref)),
        STANDARD.encode(bytes)
    ))
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        _ => "image/jpeg",
    }
}

#[async_trait]
impl VisionModel for HttpVisionModel {
    async fn complete(&self, image_ref: &str, prompt: &str) -> Result<Option<String>, ExtractionError> {
        let endpoint = self
            .endpoint
            .as_ref()
            .map_err(|e| ExtractionError::NotConfigured(e.clone()))?;
        self.ensure_reachable(endpoint).await?;

        let request = ChatRequest {
            model: endpoint.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image_url(image_ref).await?,
                        },
                    },
                ],
            }],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", endpoint.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", endpoint.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Api { status, body });
        }

        let chat_response: ChatResponse = response.json().await?;
        Ok(chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use std::io::Write;

    #[tokio::test]
    async fn remote_urls_pass_through() {
        let url = image_url("https://storage.example.com/scans/a.jpg").await.unwrap();
        assert_eq!(url, "https://storage.example.com/scans/a.jpg");
    }

    #[tokio::test]
    async fn local_files_become_data_urls() {
        let path = std::env::temp_dir().join("invoice_points_image_url_test.png");
        std::fs::File::create(&path).unwrap().write_all(b"\x89PNG").unwrap();

        let url = image_url(path.to_str().unwrap()).await.unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert!(url.ends_with(&STANDARD.encode(b"\x89PNG")));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn request_serializes_as_multimodal_message() {
        let part = ContentPart::ImageUrl {
            image_url: ImageUrl { url: "u".into() },
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "image_url");
        assert_eq!(json["image_url"]["url"], "u");
    }

    #[tokio::test]
    async fn unconfigured_remote_backend_fails_per_call() {
        let vision = VisionSection {
            remote: EndpointConfig {
                base_url: "https://example.invalid/v1".into(),
                model: "m".into(),
                api_key_env: Some("INVOICE_POINTS_TEST_KEY_THAT_IS_NEVER_SET".into()),
            },
            ..VisionSection::default()
        };
        let model = HttpVisionModel::from_config(&vision);
        let err = model.complete("https://x/a.jpg", "p").await.unwrap_err();
        assert!(matches!(err, ExtractionError::NotConfigured(_)));
    }
}

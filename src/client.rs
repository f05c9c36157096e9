use crate::error::{StreamError, StreamResult};
use crate::protocol::{ChatRequest, NewDocumentRequest, ToolInfo};
use crate::session::{ByteStream, TurnTransport};
use crate::store::StoredDocument;
use futures::StreamExt;
use futures::future::BoxFuture;
use reqwest::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::Response;

pub struct ClientConfig {
    pub base_url: String,
}

/// HTTP client for the mock backend. As a [`TurnTransport`] it hands the
/// raw SSE body to the session, which does its own framing.
#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    http: HttpClient,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            base_url: normalize_base_url(&config.base_url),
            http: HttpClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn open_stream(&self, request: &ChatRequest) -> StreamResult<ByteStream> {
        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response, "open chat stream").await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));
        if !is_event_stream {
            return Err(StreamError::Transport(
                "chat endpoint did not answer with an event stream".to_string(),
            ));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(StreamError::from))
            .boxed())
    }

    pub async fn list_documents(&self) -> StreamResult<Vec<StoredDocument>> {
        let response = self
            .http
            .get(format!("{}/api/documents", self.base_url))
            .send()
            .await?;
        let response = ensure_success(response, "list documents").await?;
        Ok(response.json().await?)
    }

    pub async fn add_document(&self, title: &str, content: &str) -> StreamResult<StoredDocument> {
        let request = NewDocumentRequest {
            title: title.to_string(),
            content: content.to_string(),
        };
        let response = self
            .http
            .post(format!("{}/api/documents", self.base_url))
            .json(&request)
            .send()
            .await?;
        let response = ensure_success(response, "add document").await?;
        Ok(response.json().await?)
    }

    pub async fn list_tools(&self) -> StreamResult<Vec<ToolInfo>> {
        let response = self
            .http
            .get(format!("{}/api/tools", self.base_url))
            .send()
            .await?;
        let response = ensure_success(response, "list tools").await?;
        Ok(response.json().await?)
    }
}

impl TurnTransport for ChatClient {
    fn open(&self, request: ChatRequest) -> BoxFuture<'static, StreamResult<ByteStream>> {
        let client = self.clone();
        Box::pin(async move { client.open_stream(&request).await })
    }
}

async fn ensure_success(response: Response, action: &str) -> StreamResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(StreamError::Transport(format!(
        "Failed to {}: {} - {}",
        action, status, body
    )))
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = ChatClient::new(ClientConfig {
            base_url: "http://localhost:3000//".to_string(),
        });
        assert_eq!(client.base_url(), "http://localhost:3000");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let client = ChatClient::new(ClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
        });
        match client.open_stream(&ChatRequest::new("hi")).await {
            Err(err) => assert!(err.is_retryable()),
            Ok(_) => panic!("expected connection failure"),
        }
    }
}

//! Remote morphological analysis through an OpenAI-compatible chat completion API.

use async_trait::async_trait;
use docsearch_core::{NormalizeError, Normalizer};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenAiNormalizer {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiNormalizer {
    pub fn new(base_url: &str, api_key: String, model: String, timeout: Duration) -> Result<Self, NormalizeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NormalizeError::Unavailable(e.to_string()))?;
        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        Ok(Self { client, endpoint, api_key, model })
    }

    fn prompt(text: &str) -> String {
        // Quote through JSON so embedded quotes cannot break the instruction.
        let quoted = serde_json::to_string(text).unwrap_or_else(|_| format!("\"{text}\""));
        format!(
            "Please analyze the following text into its morphological components and return them as a JSON array of strings: {quoted}"
        )
    }
}

/// Interpret a completion as a JSON array of strings and join it into content.
pub fn parse_token_array(content: &str) -> Result<String, NormalizeError> {
    let tokens: Vec<String> = serde_json::from_str(content.trim())
        .map_err(|e| NormalizeError::Malformed(format!("expected a JSON array of strings: {e}")))?;
    Ok(tokens
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" "))
}

#[async_trait]
impl Normalizer for OpenAiNormalizer {
    async fn normalize(&self, raw: &str) -> Result<String, NormalizeError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user", content: Self::prompt(raw) },
            ],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| NormalizeError::Unavailable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(%status, "normalizer request rejected");
            return Err(NormalizeError::Unavailable(format!("normalizer responded with {status}")));
        }
        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| NormalizeError::Malformed(format!("undecodable completion: {e}")))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| NormalizeError::Malformed("completion has no content".into()))?;
        parse_token_array(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn mock(status: StatusCode, reply: Value) -> String {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |Json(_req): Json<Value>| {
                let reply = reply.clone();
                async move { (status, Json(reply)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    fn normalizer(base: &str) -> OpenAiNormalizer {
        OpenAiNormalizer::new(base, "test-key".into(), "gpt-4".into(), Duration::from_secs(5)).unwrap()
    }

    fn completion(content: &str) -> Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    #[test]
    fn parses_token_arrays() {
        assert_eq!(parse_token_array(r#"["나", "는", " 학생 "]"#).unwrap(), "나 는 학생");
        assert!(matches!(parse_token_array("나 는 학생"), Err(NormalizeError::Malformed(_))));
        assert!(matches!(parse_token_array(r#"[1, 2]"#), Err(NormalizeError::Malformed(_))));
    }

    #[test]
    fn prompt_quotes_input() {
        let p = OpenAiNormalizer::prompt("say \"hi\"");
        assert!(p.ends_with(r#""say \"hi\"""#));
    }

    #[tokio::test]
    async fn normalizes_through_completion() {
        let base = mock(StatusCode::OK, completion(r#"["quick", "brown", "fox"]"#)).await;
        assert_eq!(normalizer(&base).normalize("quick brown fox").await.unwrap(), "quick brown fox");
    }

    #[tokio::test]
    async fn prose_reply_is_malformed() {
        let base = mock(StatusCode::OK, completion("Sure! Here are the tokens.")).await;
        assert!(matches!(normalizer(&base).normalize("x").await, Err(NormalizeError::Malformed(_))));
    }

    #[tokio::test]
    async fn empty_choices_is_malformed() {
        let base = mock(StatusCode::OK, json!({ "choices": [] })).await;
        assert!(matches!(normalizer(&base).normalize("x").await, Err(NormalizeError::Malformed(_))));
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let base = mock(StatusCode::SERVICE_UNAVAILABLE, json!({ "error": "overloaded" })).await;
        assert!(matches!(normalizer(&base).normalize("x").await, Err(NormalizeError::Unavailable(_))));
    }

    #[tokio::test]
    async fn unreachable_is_unavailable() {
        let n = normalizer("http://127.0.0.1:1/v1");
        assert!(matches!(n.normalize("x").await, Err(NormalizeError::Unavailable(_))));
    }
}

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::LlmProvider;
use super::types::ChatRequest;
use crate::core::config::settings::{EmbeddingSettings, LlmSettings};
use crate::core::errors::RagError;

/// Client for any server speaking the OpenAI `/chat/completions` and
/// `/embeddings` protocol (Groq, OpenAI, text-embeddings-inference, LM Studio).
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        client: Client,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            timeout,
            client,
        }
    }

    pub fn for_chat(client: Client, settings: &LlmSettings) -> Self {
        Self::new(
            "chat",
            client,
            &settings.base_url,
            settings.api_key.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    pub fn for_embeddings(client: Client, settings: &EmbeddingSettings) -> Self {
        Self::new(
            "embeddings",
            client,
            &settings.base_url,
            settings.api_key.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.timeout(self.timeout);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn post_json(&self, path: &str, body: &Value, what: &str) -> Result<Response, RagError> {
        let url = self.endpoint(path);
        let res = self
            .authorized(self.client.post(&url))
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::Upstream(format!("{} request to {} failed: {}", what, url, e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(RagError::Upstream(format!(
                "{} error ({}): {}",
                what, status, text
            )));
        }
        Ok(res)
    }
}

fn chat_body(request: ChatRequest, model_id: &str, stream: bool) -> Value {
    let mut body = json!({
        "model": model_id,
        "messages": request.messages,
        "stream": stream,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(t) = request.temperature { obj.insert("temperature".to_string(), json!(t)); }
        if let Some(t) = request.top_p { obj.insert("top_p".to_string(), json!(t)); }
        if let Some(t) = request.max_tokens { obj.insert("max_tokens".to_string(), json!(t)); }
        if let Some(s) = request.stop { obj.insert("stop".to_string(), json!(s)); }
    }
    body
}

/// Collects raw bytes and hands out complete lines. Network chunks may split
/// both lines and multibyte characters, so decoding waits for the newline.
#[derive(Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&self.pending).into_owned())
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseEvent {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(json) => match json["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => SseEvent::Token(content.to_string()),
            _ => SseEvent::Skip,
        },
        Err(_) => SseEvent::Skip,
    }
}

fn parse_embeddings(payload: &Value) -> Result<Vec<Vec<f32>>, RagError> {
    let data = payload["data"]
        .as_array()
        .ok_or_else(|| RagError::Upstream("Embedding response has no data array".to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let values = item["embedding"]
            .as_array()
            .ok_or_else(|| RagError::Upstream("Embedding item has no vector".to_string()))?;
        let vector: Vec<f32> = values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        let index = item["index"]
            .as_u64()
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<bool, RagError> {
        let url = self.endpoint("models");
        let res = self.authorized(self.client.get(&url)).send().await;
        match res {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, RagError> {
        let body = chat_body(request, model_id, false);
        let res = self.post_json("chat/completions", &body, "Chat").await?;

        let payload: Value = res.json().await.map_err(RagError::upstream)?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| RagError::Upstream("Chat response has no content".to_string()))?
            .to_string();

        Ok(content)
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        model_id: &str,
    ) -> Result<mpsc::Receiver<Result<String, RagError>>, RagError> {
        let body = chat_body(request, model_id, true);
        let res = self.post_json("chat/completions", &body, "Chat stream").await?;

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            let mut lines = SseLineBuffer::default();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        for line in lines.push(&bytes) {
                            match parse_sse_line(&line) {
                                SseEvent::Done => return,
                                SseEvent::Token(content) => {
                                    if tx.send(Ok(content)).await.is_err() {
                                        return;
                                    }
                                }
                                SseEvent::Skip => {}
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(RagError::upstream(e))).await;
                        return;
                    }
                }
            }
            if let Some(SseEvent::Token(content)) = lines.finish().as_deref().map(parse_sse_line) {
                let _ = tx.send(Ok(content)).await;
            }
        });

        Ok(rx)
    }

    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, RagError> {
        let body = json!({
            "model": model_id,
            "input": inputs,
        });
        let res = self.post_json("embeddings", &body, "Embedding").await?;

        let payload: Value = res.json().await.map_err(RagError::upstream)?;
        parse_embeddings(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;

    #[test]
    fn endpoints_join_without_double_slashes() {
        let provider = OpenAiCompatProvider::new(
            "test",
            Client::new(),
            "https://api.groq.com/openai/v1/",
            Some("  ".to_string()),
            Duration::from_secs(1),
        );
        assert_eq!(
            provider.endpoint("/chat/completions"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn chat_body_includes_only_set_options() {
        let mut request = ChatRequest::new(vec![ChatMessage::user("hello")]);
        request.temperature = Some(0.2);
        let body = chat_body(request, "llama", true);

        assert_eq!(body["model"], "llama");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["temperature"], 0.2);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn sse_lines_are_classified() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
            SseEvent::Token("Hi".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseEvent::Done);
        assert_eq!(parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#), SseEvent::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), SseEvent::Skip);
    }

    #[test]
    fn multibyte_characters_split_across_chunks_survive() {
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n\ndata: [DONE]\n";
        let bytes = event.as_bytes();
        let split = event.find('é').expect("accent") + 1;

        let mut buffer = SseLineBuffer::default();
        let mut lines = buffer.push(&bytes[..split]);
        assert!(lines.is_empty());
        lines.extend(buffer.push(&bytes[split..]));

        let events: Vec<SseEvent> = lines.iter().map(|line| parse_sse_line(line)).collect();
        assert_eq!(
            events,
            vec![
                SseEvent::Token("café".to_string()),
                SseEvent::Skip,
                SseEvent::Done
            ]
        );
        assert!(buffer.finish().is_none());
    }

    #[test]
    fn trailing_line_without_newline_is_kept() {
        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}").is_empty());
        let rest = buffer.finish().expect("pending line");
        assert_eq!(parse_sse_line(&rest), SseEvent::Token("end".to_string()));
    }

    #[test]
    fn embeddings_follow_response_indices() {
        let payload = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_embeddings(&payload).expect("parse");
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn malformed_embedding_payload_is_upstream_error() {
        let err = parse_embeddings(&json!({"error": "nope"})).expect_err("no data");
        assert!(matches!(err, RagError::Upstream(_)));
    }
}

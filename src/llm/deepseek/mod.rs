
use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use url::Url;

use super::{ChatModel, ChatPrompt, FragmentStream};
use crate::config::LlmConfig;
use crate::database::sessions::ChatMessage;
use crate::transport::{RetryPolicy, send_with_retry};
use crate::{RagError, Result};

const CONNECT_TIMEOUT_SECONDS: u64 = 10;
const FRAGMENT_BUFFER: usize = 64;

/// Streaming client for an OpenAI-compatible chat completions endpoint
#[derive(Clone)]
pub struct DeepSeekClient {
    endpoint: Url,
    model: String,
    temperature: f32,
    api_key: String,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

impl fmt::Debug for DeepSeekClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepSeekClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("api_key", &"<redacted>")
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// One meaningful line of a server-sent event stream
#[derive(Debug, PartialEq, Eq)]
enum StreamLine {
    Fragment(String),
    Done,
    Ignored,
}

fn parse_stream_line(line: &str) -> anyhow::Result<StreamLine> {
    let Some(data) = line.trim_end().strip_prefix("data:") else {
        return Ok(StreamLine::Ignored);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(StreamLine::Done);
    }

    let chunk: CompletionChunk =
        serde_json::from_str(data).with_context(|| format!("Malformed stream event: {}", data))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map_or(StreamLine::Ignored, StreamLine::Fragment))
}

/// Forward fragments until `[DONE]`, the end of input, or a closed receiver
fn pump_fragments(reader: impl Read, sender: &mpsc::Sender<Result<String>>) {
    let mut fragments = 0_usize;
    for line in BufReader::new(reader).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                let _ = sender.blocking_send(Err(RagError::Provider(format!(
                    "Chat stream interrupted: {}",
                    e
                ))));
                return;
            }
        };

        match parse_stream_line(&line) {
            Ok(StreamLine::Fragment(text)) => {
                fragments += 1;
                if sender.blocking_send(Ok(text)).is_err() {
                    debug!("Chat stream consumer went away after {} fragments", fragments);
                    return;
                }
            }
            Ok(StreamLine::Done) => {
                debug!("Chat stream finished with {} fragments", fragments);
                return;
            }
            Ok(StreamLine::Ignored) => {}
            Err(e) => {
                warn!("{:#}", e);
                let _ = sender.blocking_send(Err(RagError::Provider(format!("{:#}", e))));
                return;
            }
        }
    }

    let _ = sender.blocking_send(Err(RagError::Provider(
        "Chat stream ended before completion".to_string(),
    )));
}

impl DeepSeekClient {
    #[inline]
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint_url()
            .context("Failed to build chat completions URL from config")?;

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            temperature: config.temperature,
            api_key: api_key.into(),
            agent: Self::build_agent(Duration::from_secs(CONNECT_TIMEOUT_SECONDS)),
            retry: RetryPolicy::with_retries(config.max_retries),
        })
    }

    fn build_agent(connect_timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_connect(Some(connect_timeout))
            .build()
            .into()
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request_body(&self, prompt: &ChatPrompt) -> anyhow::Result<String> {
        let messages = prompt.messages();
        let request = CompletionRequest {
            model: &self.model,
            messages: &messages,
            temperature: self.temperature,
            stream: true,
        };
        serde_json::to_string(&request).context("Failed to serialize chat request")
    }

    /// Send the request and hand the open body to `pump_fragments`.
    ///
    /// Only the initial request is retried; a stream that breaks part way is
    /// reported, not replayed.
    fn run_stream(
        &self,
        body: &str,
        opened: oneshot::Sender<anyhow::Result<()>>,
        sender: mpsc::Sender<Result<String>>,
    ) {
        let authorization = format!("Bearer {}", self.api_key);
        let response = send_with_retry(self.retry, self.endpoint.as_str(), || {
            self.agent
                .post(self.endpoint.as_str())
                .header("Authorization", &authorization)
                .header("Content-Type", "application/json")
                .header("Accept", "text/event-stream")
                .send(body)
        });

        match response {
            Ok(response) => {
                if opened.send(Ok(())).is_err() {
                    return;
                }
                pump_fragments(response.into_body().into_reader(), &sender);
            }
            Err(e) => {
                let _ = opened.send(Err(e.context("Chat completion request failed")));
            }
        }
    }
}

#[async_trait]
impl ChatModel for DeepSeekClient {
    #[inline]
    async fn stream_chat(&self, prompt: &ChatPrompt) -> Result<FragmentStream> {
        let body = self.request_body(prompt)?;
        debug!(
            "Requesting completion from {} with {} history messages",
            self.model,
            prompt.history.len()
        );

        let (sender, receiver) = mpsc::channel(FRAGMENT_BUFFER);
        let (opened_tx, opened_rx) = oneshot::channel();
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.run_stream(&body, opened_tx, sender));

        opened_rx
            .await
            .map_err(|_| RagError::Provider("Chat request task ended unexpectedly".to_string()))?
            .map_err(|e| RagError::Provider(format!("{:#}", e)))?;

        Ok(futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed())
    }
}

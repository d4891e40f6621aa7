// Answer orchestration
// Retrieval, history and the chat model combined into one streamed turn

#[cfg(test)]
mod tests;

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{AssistantConfig, Config};
use crate::database::sessions::{ChatMessage, SessionLocks, SessionStore};
use crate::database::vector_store::{SearchHit, VectorIndexStore};
use crate::llm::{ChatModel, ChatPrompt};
use crate::{RagError, Result};

const EVENT_BUFFER: usize = 64;

/// System prompt; `{job}` and `{skills}` are substituted
pub const SYSTEM_TEMPLATE: &str = "\nYou are a {job}, specialized in {skills}.\nWhen answering questions:\n1. First consult the provided context from the knowledge base\n2. Then consider the conversation history\n3. Finally provide a comprehensive answer\n";

#[inline]
pub fn system_prompt(assistant: &AssistantConfig) -> String {
    SYSTEM_TEMPLATE
        .replace("{job}", &assistant.job)
        .replace("{skills}", &assistant.skills)
}

#[inline]
pub fn human_prompt(context: &str, question: &str) -> String {
    format!("Context:\n{}\n\nQuestion: {}", context, question)
}

/// Chunk texts in retrieval order, separated by blank lines
#[inline]
pub fn join_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug)]
pub enum AnswerEvent {
    Fragment(String),
    /// Terminal; the full answer has been added to the session history
    Completed { answer: String },
    /// Terminal; nothing was added to the session history
    Failed(RagError),
}

impl AnswerEvent {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnswerEvent::Fragment(_))
    }
}

/// Single-consumer answer stream.
///
/// Yields fragments followed by exactly one terminal event. Dropping it
/// cancels the turn and releases the session.
#[derive(Debug)]
pub struct AnswerStream {
    receiver: mpsc::Receiver<AnswerEvent>,
}

impl AnswerStream {
    /// Drain the stream into the full answer text
    #[inline]
    pub async fn collect_answer(mut self) -> Result<String> {
        while let Some(event) = self.next().await {
            match event {
                AnswerEvent::Fragment(_) => {}
                AnswerEvent::Completed { answer } => return Ok(answer),
                AnswerEvent::Failed(error) => return Err(error),
            }
        }
        Err(RagError::Provider("Answer stream closed early".to_string()))
    }
}

impl Stream for AnswerStream {
    type Item = AnswerEvent;

    #[inline]
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<AnswerEvent>> {
        self.receiver.poll_recv(cx)
    }
}

/// Retrieved chunks and the context string built from them
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub hits: Vec<SearchHit>,
    pub context: String,
}

pub struct Orchestrator {
    index: Arc<VectorIndexStore>,
    sessions: Arc<dyn SessionStore>,
    model: Arc<dyn ChatModel>,
    locks: Arc<SessionLocks>,
    system_prompt: String,
    k: usize,
}

impl std::fmt::Debug for Orchestrator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("index", &self.index)
            .field("k", &self.k)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[inline]
    pub fn new(
        index: Arc<VectorIndexStore>,
        sessions: Arc<dyn SessionStore>,
        model: Arc<dyn ChatModel>,
        config: &Config,
    ) -> Self {
        Self {
            index,
            sessions,
            model,
            locks: Arc::new(SessionLocks::new()),
            system_prompt: system_prompt(&config.assistant),
            k: config.retrieval.k,
        }
    }

    #[inline]
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    #[inline]
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    #[inline]
    pub fn index(&self) -> &Arc<VectorIndexStore> {
        &self.index
    }

    #[inline]
    pub async fn retrieve_context(&self, question: &str) -> Result<RetrievedContext> {
        let hits = self.index.similarity_search(question, self.k).await?;
        let context = join_context(&hits);
        debug!("Retrieved {} chunks for question", hits.len());
        Ok(RetrievedContext { hits, context })
    }

    /// Assemble the prompt for one turn from the current history
    #[inline]
    pub async fn build_prompt(&self, session_id: &str, question: &str) -> Result<ChatPrompt> {
        let RetrievedContext { context, .. } = self.retrieve_context(question).await?;
        let history = self.sessions.get_or_create(session_id).await?;
        Ok(ChatPrompt {
            system: self.system_prompt.clone(),
            history,
            human: human_prompt(&context, question),
        })
    }

    /// Answer `question` within `session_id`.
    ///
    /// Turns on the same session run one at a time; the session stays locked
    /// until the returned stream finishes or is dropped.
    #[inline]
    pub async fn answer(&self, session_id: &str, question: &str) -> Result<AnswerStream> {
        let guard = self.locks.lock(session_id).await;

        let prompt = self.build_prompt(session_id, question).await?;
        let mut fragments = self.model.stream_chat(&prompt).await?;

        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        let sessions = Arc::clone(&self.sessions);
        let session_id = session_id.to_string();
        let question = question.to_string();

        tokio::spawn(async move {
            let mut answer = String::new();
            let mut failure = None;

            loop {
                let item = tokio::select! {
                    item = fragments.next() => item,
                    () = sender.closed() => None,
                };
                match item {
                    Some(Ok(fragment)) => {
                        answer.push_str(&fragment);
                        if sender.send(AnswerEvent::Fragment(fragment)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        failure = Some(error);
                        break;
                    }
                    None => break,
                }
            }

            if sender.is_closed() {
                debug!("Answer for session {} cancelled by consumer", session_id);
                return;
            }

            let terminal = match failure {
                Some(error) => {
                    warn!("Answer for session {} failed: {}", session_id, error);
                    AnswerEvent::Failed(error)
                }
                None => match sessions.append_turn(&session_id, &question, &answer).await {
                    Ok(()) => {
                        info!(
                            "Answered in session {} ({} chars)",
                            session_id,
                            answer.chars().count()
                        );
                        AnswerEvent::Completed { answer }
                    }
                    Err(error) => AnswerEvent::Failed(error),
                },
            };

            drop(guard);
            let _ = sender.send(terminal).await;
        });

        Ok(AnswerStream { receiver })
    }

    #[inline]
    pub async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.sessions.get_or_create(session_id).await
    }

    /// Clear one session, waiting for any turn in progress
    #[inline]
    pub async fn clear_session(&self, session_id: &str) -> Result<()> {
        let _guard = self.locks.lock(session_id).await;
        self.sessions.clear(session_id).await
    }

    /// Clear every session, waiting for all turns in progress
    #[inline]
    pub async fn clear_all_sessions(&self) -> Result<()> {
        let mut ids = self.sessions.session_ids().await?;
        ids.extend(self.locks.active_ids());
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            guards.push(self.locks.lock(id).await);
        }
        let cleared = self.sessions.clear_all().await;
        drop(guards);
        cleared
    }
}

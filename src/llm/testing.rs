// Scripted chat model for tests

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use super::{ChatModel, ChatPrompt, FragmentStream};
use crate::{RagError, Result};

/// Replays fixed fragments, optionally failing part way through
#[derive(Debug, Default)]
pub(crate) struct ScriptedChatModel {
    fragments: Vec<String>,
    fail_after: Option<usize>,
    refuse: bool,
    pub(crate) prompts: Mutex<Vec<ChatPrompt>>,
}

impl ScriptedChatModel {
    pub(crate) fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Emit `count` fragments, then a provider error
    pub(crate) fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Fail before producing a stream
    pub(crate) fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub(crate) fn last_prompt(&self) -> Option<ChatPrompt> {
        self.prompts.lock().last().cloned()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn stream_chat(&self, prompt: &ChatPrompt) -> Result<FragmentStream> {
        self.prompts.lock().push(prompt.clone());
        if self.refuse {
            return Err(RagError::Provider("model unavailable".to_string()));
        }

        let mut items: Vec<Result<String>> = match self.fail_after {
            Some(count) => self.fragments.iter().take(count).cloned().map(Ok).collect(),
            None => self.fragments.iter().cloned().map(Ok).collect(),
        };
        if self.fail_after.is_some() {
            items.push(Err(RagError::Provider("connection reset".to_string())));
        }
        Ok(futures::stream::iter(items).boxed())
    }
}

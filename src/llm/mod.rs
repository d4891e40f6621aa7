// Chat model seam
// Prompts go in, a stream of text fragments comes out

pub mod deepseek;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::Result;
use crate::database::sessions::{ChatMessage, Role};

pub use deepseek::DeepSeekClient;

/// Fragments in arrival order; an `Err` item ends the stream
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// System text, prior turns and the new human turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatPrompt {
    pub system: String,
    pub history: Vec<ChatMessage>,
    pub human: String,
}

impl ChatPrompt {
    /// Flatten into the message list sent to the provider
    #[inline]
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(self.system.as_str()));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::new(Role::User, self.human.as_str()));
        messages
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streamed completion.
    ///
    /// Failing to start is reported here; failures after the first fragment
    /// arrive as an `Err` item on the stream.
    async fn stream_chat(&self, prompt: &ChatPrompt) -> Result<FragmentStream>;
}

pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

use crate::event::{MediaRef, MessageRef};

/// Operations the relay needs from the chat platform
#[async_trait]
pub trait Platform: Send + Sync {
    /// Turn a media reference into an address the analysis backend can fetch.
    async fn resolve_media(&self, media: &MediaRef) -> Result<String>;

    /// Reply with plain text; returns the sent message.
    async fn send_reply(&self, to: MessageRef, text: &str) -> Result<MessageRef>;

    /// Reply with HTML markup, degrading to plain text if the platform rejects it.
    async fn send_html_reply(&self, to: MessageRef, html: &str) -> Result<()>;

    async fn delete_message(&self, message: MessageRef) -> Result<()>;
}

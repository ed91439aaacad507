use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::aggregation::{AggregationBuffer, GroupSink, MergedGroup};
use crate::analyzer::Analyzer;
use crate::classifier::{self, Arrival, ContentDescriptor};
use crate::config::AggregationConfig;
use crate::dispatch::DispatchCoordinator;
use crate::event::{ChatKind, ForwardOrigin, IncomingEvent, MessageRef};
use crate::format::{format_analysis, split_message, MESSAGE_CHUNK};
use crate::platform::Platform;
use crate::resolver::{self, Resolution};

pub const PROCESSING_POST: &str = "🔍 Аналізую пост... Очікуйте.";
pub const PROCESSING_GROUP: &str = "🔍 Аналізую медіа групу... Очікуйте.";
pub const DIRECT_SOURCE: &str = "Direct Message";

/// The bot's own account
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: u64,
    pub username: String,
}

/// Why an event reached the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRoute {
    /// Typed straight into a private chat
    Direct,
    /// Forwarded into a private chat
    Forwarded,
    /// Group or channel message that may mention the bot
    Mention,
}

/// Typed by the user in a private chat rather than forwarded there.
fn is_direct(event: &IncomingEvent) -> bool {
    event.chat.kind == ChatKind::Private && !event.is_forwarded()
}

/// Runs one post through analysis and answers it on the platform.
pub struct Responder {
    coordinator: DispatchCoordinator,
    platform: Arc<dyn Platform>,
}

impl Responder {
    pub fn new(analyzer: Arc<dyn Analyzer>, platform: Arc<dyn Platform>) -> Self {
        Self {
            coordinator: DispatchCoordinator::new(analyzer, Arc::clone(&platform)),
            platform,
        }
    }

    async fn analyze_post(
        &self,
        anchor: MessageRef,
        descriptor: &ContentDescriptor,
        instruction: Option<&str>,
        placeholder_text: &str,
    ) {
        let placeholder = match self.platform.send_reply(anchor, placeholder_text).await {
            Ok(sent) => Some(sent),
            Err(e) => {
                warn!("Failed to send processing message: {:#}", e);
                None
            }
        };

        let outcome = self.coordinator.dispatch(descriptor, instruction).await;

        if let Some(placeholder) = placeholder {
            if let Err(e) = self.platform.delete_message(placeholder).await {
                warn!("Failed to delete processing message: {:#}", e);
            }
        }

        self.reply_html(anchor, &format_analysis(&outcome)).await;
    }

    async fn answer_question(&self, anchor: MessageRef, question: &str) {
        let answer = self.coordinator.answer(question).await;
        self.reply_html(anchor, &answer).await;
    }

    async fn reply_html(&self, anchor: MessageRef, html: &str) {
        for chunk in split_message(html, MESSAGE_CHUNK) {
            if let Err(e) = self.platform.send_html_reply(anchor, &chunk).await {
                warn!("Failed to send reply to {}: {:#}", anchor.message_id, e);
            }
        }
    }
}

#[async_trait]
impl GroupSink for Responder {
    async fn on_group(&self, mut group: MergedGroup) {
        if is_direct(&group.anchor) {
            group.descriptor.source_label = DIRECT_SOURCE.to_string();
        }
        let anchor = group.anchor.message_ref();
        debug!("Answering group {} at message {}", group.group_id, anchor.message_id);
        self.analyze_post(anchor, &group.descriptor, None, PROCESSING_GROUP)
            .await;
    }
}

/// Entry point for every event the platform delivers.
pub struct Relay {
    bot: BotIdentity,
    buffer: AggregationBuffer,
    responder: Arc<Responder>,
}

impl Relay {
    pub fn new(
        bot: BotIdentity,
        aggregation: &AggregationConfig,
        analyzer: Arc<dyn Analyzer>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        let responder = Arc::new(Responder::new(analyzer, platform));
        let buffer = AggregationBuffer::new(
            aggregation,
            Arc::clone(&responder) as Arc<dyn GroupSink>,
        );
        Self {
            bot,
            buffer,
            responder,
        }
    }

    pub fn bot(&self) -> &BotIdentity {
        &self.bot
    }

    pub async fn handle(&self, event: IncomingEvent, route: EventRoute) {
        match route {
            EventRoute::Direct | EventRoute::Forwarded => self.handle_post(event, route).await,
            EventRoute::Mention => self.handle_mention(event).await,
        }
    }

    async fn handle_post(&self, event: IncomingEvent, route: EventRoute) {
        if let Some(ForwardOrigin::User { id, .. }) = &event.origin {
            if *id == self.bot.id {
                debug!("Ignoring forward of the bot's own message");
                return;
            }
        }

        let anchor = event.message_ref();
        match classifier::classify(&event) {
            Arrival::Grouped(group_id) => {
                debug!(
                    "Message {} (sent {}) belongs to group {}",
                    event.message_id, event.date, group_id
                );
                self.buffer.on_event(event).await;
            }
            Arrival::Single(mut descriptor) => {
                if route == EventRoute::Direct && is_direct(&event) {
                    descriptor.source_label = DIRECT_SOURCE.to_string();
                }
                self.responder
                    .analyze_post(anchor, &descriptor, None, PROCESSING_POST)
                    .await;
            }
        }
    }

    async fn handle_mention(&self, event: IncomingEvent) {
        let Some(span) = resolver::find_bot_mention(&event, &self.bot.username) else {
            return;
        };
        if resolver::is_reply_to_bot(&event, self.bot.id) {
            debug!("Ignoring mention in a reply to the bot");
            return;
        }

        let anchor = event.message_ref();
        match resolver::resolve(&event, span) {
            Resolution::Analyze(ctx) => {
                info!(
                    "Mention in chat {} targets a {:?} post via {}",
                    event.chat.id,
                    ctx.target.kind,
                    ctx.source.name()
                );
                let instruction = Some(ctx.custom_instruction.as_str()).filter(|i| !i.is_empty());
                self.responder
                    .analyze_post(anchor, &ctx.target, instruction, PROCESSING_POST)
                    .await;
            }
            Resolution::Freeform { question } => {
                info!("Mention in chat {} is a free-form question", event.chat.id);
                self.responder.answer_question(anchor, &question).await;
            }
        }
    }
}

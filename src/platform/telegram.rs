use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, FileId, MediaKind as TgMediaKind, MessageEntity, MessageEntityKind, MessageId,
    MessageKind, MessageOrigin, ParseMode, ReplyParameters,
};
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::event::{
    ChatInfo, ChatKind, ForwardOrigin, IncomingEvent, MediaKind, MediaRef, MentionSpan,
    MessageRef,
};
use crate::platform::Platform;
use crate::relay::{EventRoute, Relay};

const WELCOME: &str = "🤖 Welcome to the Post Analyzer Bot!\n\n\
I can analyze posts shared from any channel using AI.\n\n\
How to use:\n\
1. Forward any message from a channel to me\n\
2. I'll analyze the content and provide insights\n\
3. You can also send me text directly for analysis\n\
4. In groups, mention me in a reply to the post you want checked\n\n\
Commands:\n\
/start - Show this welcome message\n\
/help - Show help information";

const HELP: &str = "📚 Post Analyzer Bot Help\n\n\
What I do:\n\
I rate posts for propaganda, falsehood, manipulation and panic, check the facts and describe the source.\n\n\
Supported content:\n\
• ✅ Text messages\n\
• ✅ Images and albums (with or without captions)\n\
• ✅ Other media with text captions (text only analysis)\n\
• ❌ Other media without text\n\n\
In groups and channels: reply to a post (or quote part of it) and mention me. \
Text after the mention is treated as your own question about the post. \
A mention without a reply is answered as a general question.";

/// Telegram side of the relay: file lookups and replies
pub struct TelegramPlatform {
    bot: Bot,
    http: reqwest::Client,
    inline_images: bool,
}

impl TelegramPlatform {
    pub fn new(bot: Bot, inline_images: bool) -> Self {
        Self {
            bot,
            http: reqwest::Client::new(),
            inline_images,
        }
    }
}

#[async_trait]
impl Platform for TelegramPlatform {
    async fn resolve_media(&self, media: &MediaRef) -> Result<String> {
        let file = self
            .bot
            .get_file(FileId(media.file_id.clone()))
            .await
            .context("Failed to look up Telegram file")?;

        // Telegram file URL format: https://api.telegram.org/file/bot<token>/<file_path>
        let url = format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.bot.token(),
            file.path
        );
        if !self.inline_images {
            return Ok(url);
        }

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to download Telegram file")?;
        if !response.status().is_success() {
            bail!("Failed to download Telegram file: HTTP {}", response.status());
        }
        let data = response
            .bytes()
            .await
            .context("Failed to read Telegram file")?;

        // Telegram photos are JPEG
        Ok(format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&data)
        ))
    }

    async fn send_reply(&self, to: MessageRef, text: &str) -> Result<MessageRef> {
        let sent = self
            .bot
            .send_message(ChatId(to.chat_id), text)
            .reply_parameters(reply_to(to))
            .await
            .context("Failed to send Telegram message")?;
        Ok(MessageRef {
            chat_id: sent.chat.id.0,
            message_id: sent.id.0,
        })
    }

    async fn send_html_reply(&self, to: MessageRef, html: &str) -> Result<()> {
        let result = self
            .bot
            .send_message(ChatId(to.chat_id), html)
            .parse_mode(ParseMode::Html)
            .reply_parameters(reply_to(to))
            .await;

        if let Err(e) = result {
            warn!("HTML parsing failed, sending as plain text: {}", e);
            self.send_reply(to, html).await?;
        }
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<()> {
        self.bot
            .delete_message(ChatId(message.chat_id), MessageId(message.message_id))
            .await
            .context("Failed to delete Telegram message")?;
        Ok(())
    }
}

fn reply_to(to: MessageRef) -> ReplyParameters {
    ReplyParameters::new(MessageId(to.message_id)).allow_sending_without_reply()
}

/// Run the Telegram bot platform
pub async fn run(bot: Bot, relay: Arc<Relay>, config: TelegramConfig) -> Result<()> {
    info!("Starting Telegram platform as @{}...", relay.bot().username);

    let config = Arc::new(config);
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_channel_post().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay, config])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    relay: Arc<Relay>,
    config: Arc<TelegramConfig>,
) -> ResponseResult<()> {
    let sender = msg.from.as_ref().map(|user| user.id.0);
    if sender == Some(relay.bot().id) || !config.is_allowed(sender) {
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if let Some(command) = parse_command(text, &relay.bot().username) {
            return handle_command(&bot, &msg, &command).await;
        }
    }

    let route = if msg.chat.is_private() {
        if msg.forward_origin().is_some() {
            EventRoute::Forwarded
        } else {
            EventRoute::Direct
        }
    } else if msg.text().is_some() && has_mention_entity(&msg) {
        EventRoute::Mention
    } else {
        return Ok(());
    };

    info!(
        "Telegram message {} in chat {} routed as {:?}",
        msg.id.0, msg.chat.id.0, route
    );

    if msg.media_group_id().is_none() {
        bot.send_chat_action(msg.chat.id, ChatAction::Typing)
            .await
            .ok();
    }

    relay.handle(to_event(&msg), route).await;
    Ok(())
}

async fn handle_command(bot: &Bot, msg: &Message, command: &str) -> ResponseResult<()> {
    let reply = match command {
        "start" => WELCOME,
        "help" => HELP,
        _ => return Ok(()),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Command name of `/cmd` or `/cmd@this_bot`; commands aimed at other bots yield None.
fn parse_command(text: &str, bot_username: &str) -> Option<String> {
    let word = text.split_whitespace().next()?.strip_prefix('/')?;
    let (name, target) = match word.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (word, None),
    };
    if name.is_empty() {
        return None;
    }
    match target {
        Some(target) if !target.eq_ignore_ascii_case(bot_username) => None,
        _ => Some(name.to_lowercase()),
    }
}

fn has_mention_entity(msg: &Message) -> bool {
    msg.entities()
        .is_some_and(|entities| entities.iter().any(|e| e.kind == MessageEntityKind::Mention))
}

/// Convert a Telegram message into the platform-neutral event.
pub fn to_event(msg: &Message) -> IncomingEvent {
    let (text, caption, media) = extract_content(msg);
    let mentions = text
        .as_deref()
        .map(|t| mention_spans(t, msg.entities().unwrap_or_default()))
        .unwrap_or_default();

    IncomingEvent {
        chat: chat_info(&msg.chat),
        message_id: msg.id.0,
        sender_id: msg.from.as_ref().map(|user| user.id.0),
        date: msg.date,
        group_id: msg.media_group_id().map(|id| id.to_string()),
        text,
        caption,
        media,
        origin: msg.forward_origin().map(forward_origin),
        reply_to: msg.reply_to_message().map(|reply| Box::new(to_event(reply))),
        quote: quoted_text(msg),
        mentions,
    }
}

fn chat_info(chat: &teloxide::types::Chat) -> ChatInfo {
    let kind = if chat.is_private() {
        ChatKind::Private
    } else if chat.is_channel() {
        ChatKind::Channel
    } else {
        ChatKind::Group
    };
    ChatInfo {
        id: chat.id.0,
        kind,
        title: chat.title().map(str::to_string),
        username: chat.username().map(str::to_string),
    }
}

fn forward_origin(origin: &MessageOrigin) -> ForwardOrigin {
    match origin {
        MessageOrigin::User { sender_user, .. } => ForwardOrigin::User { id: sender_user.id.0 },
        MessageOrigin::HiddenUser { .. } => ForwardOrigin::HiddenUser,
        MessageOrigin::Chat { sender_chat, .. } => ForwardOrigin::Chat(chat_info(sender_chat)),
        MessageOrigin::Channel { chat, .. } => ForwardOrigin::Chat(chat_info(chat)),
    }
}

fn quoted_text(msg: &Message) -> Option<String> {
    match &msg.kind {
        MessageKind::Common(common) => common.quote.as_ref().map(|q| q.text.clone()),
        _ => None,
    }
}

/// Text, caption and attachments. Only the largest size of a photo is kept.
fn extract_content(msg: &Message) -> (Option<String>, Option<String>, Vec<MediaRef>) {
    let MessageKind::Common(common) = &msg.kind else {
        return (None, None, Vec::new());
    };

    let file = |id: &FileId, kind: MediaKind| MediaRef {
        file_id: id.0.clone(),
        kind,
    };

    match &common.media_kind {
        TgMediaKind::Text(t) => (Some(t.text.clone()), None, Vec::new()),
        TgMediaKind::Photo(p) => (
            None,
            p.caption.clone(),
            p.photo
                .last()
                .map(|ps| MediaRef::photo(ps.file.id.0.clone()))
                .into_iter()
                .collect(),
        ),
        TgMediaKind::Video(v) => (
            None,
            v.caption.clone(),
            vec![file(&v.video.file.id, MediaKind::Video)],
        ),
        TgMediaKind::Audio(a) => (
            None,
            a.caption.clone(),
            vec![file(&a.audio.file.id, MediaKind::Audio)],
        ),
        TgMediaKind::Voice(v) => (
            None,
            v.caption.clone(),
            vec![file(&v.voice.file.id, MediaKind::Voice)],
        ),
        TgMediaKind::VideoNote(v) => (
            None,
            None,
            vec![file(&v.video_note.file.id, MediaKind::VideoNote)],
        ),
        TgMediaKind::Document(d) => (
            None,
            d.caption.clone(),
            vec![file(&d.document.file.id, MediaKind::Document)],
        ),
        TgMediaKind::Animation(a) => (
            None,
            a.caption.clone(),
            vec![file(&a.animation.file.id, MediaKind::Animation)],
        ),
        _ => (None, None, Vec::new()),
    }
}

/// Byte ranges of `@mention` entities. Telegram counts offsets in UTF-16 code
/// units; entities that do not map onto the text are dropped.
fn mention_spans(text: &str, entities: &[MessageEntity]) -> Vec<MentionSpan> {
    entities
        .iter()
        .filter(|e| e.kind == MessageEntityKind::Mention)
        .filter_map(|e| {
            let start = utf16_to_byte(text, e.offset)?;
            let end = utf16_to_byte(text, e.offset + e.length)?;
            Some(MentionSpan { start, end })
        })
        .collect()
}

fn utf16_to_byte(text: &str, target: usize) -> Option<usize> {
    let mut units = 0;
    for (byte, c) in text.char_indices() {
        if units == target {
            return Some(byte);
        }
        if units > target {
            return None;
        }
        units += c.len_utf16();
    }
    (units == target).then_some(text.len())
}

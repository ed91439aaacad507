use chrono::{DateTime, Utc};

/// Label used when a post carries no usable origin metadata
pub const UNKNOWN_SOURCE: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

/// Identity of a chat as seen by the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
    pub username: Option<String>,
}

impl ChatInfo {
    /// `@handle` when the chat has one, otherwise its title.
    pub fn label(&self) -> String {
        match (&self.username, &self.title) {
            (Some(username), _) if !username.is_empty() => format!("@{}", username),
            (_, Some(title)) if !title.is_empty() => title.clone(),
            _ => UNKNOWN_SOURCE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Voice,
    VideoNote,
    Document,
    Animation,
}

/// Platform reference to one attached file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub file_id: String,
    pub kind: MediaKind,
}

impl MediaRef {
    pub fn photo(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            kind: MediaKind::Photo,
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind == MediaKind::Photo
    }
}

/// Where a forwarded post originally came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOrigin {
    Chat(ChatInfo),
    User { id: u64 },
    HiddenUser,
}

impl ForwardOrigin {
    /// Only chats carry a source label; people forwarded from stay anonymous.
    pub fn label(&self) -> String {
        match self {
            ForwardOrigin::Chat(chat) => chat.label(),
            ForwardOrigin::User { .. } | ForwardOrigin::HiddenUser => UNKNOWN_SOURCE.to_string(),
        }
    }
}

/// Byte range of a mention entity within the event text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MentionSpan {
    pub start: usize,
    pub end: usize,
}

/// Address of a message in some chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

/// One message delivered by the platform, already stripped of platform types.
#[derive(Debug, Clone)]
pub struct IncomingEvent {
    pub chat: ChatInfo,
    pub message_id: i32,
    pub sender_id: Option<u64>,
    pub date: DateTime<Utc>,
    pub group_id: Option<String>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub media: Vec<MediaRef>,
    pub origin: Option<ForwardOrigin>,
    pub reply_to: Option<Box<IncomingEvent>>,
    pub quote: Option<String>,
    pub mentions: Vec<MentionSpan>,
}

impl IncomingEvent {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat.id,
            message_id: self.message_id,
        }
    }

    /// Label of the forwarding origin, falling back to "Unknown".
    pub fn source_label(&self) -> String {
        self.origin
            .as_ref()
            .map(ForwardOrigin::label)
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
    }

    pub fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn non_empty_caption(&self) -> Option<&str> {
        self.caption.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn is_forwarded(&self) -> bool {
        self.origin.is_some()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_chat_label_prefers_handle() {
        assert_eq!(channel("News", Some("newsroom")).label(), "@newsroom");
        assert_eq!(channel("News", None).label(), "News");
        assert_eq!(private_chat(1).label(), UNKNOWN_SOURCE);
    }

    #[test]
    fn test_source_label_defaults_to_unknown() {
        let mut ev = text_event(1, "hello");
        assert_eq!(ev.source_label(), "Unknown");

        ev.origin = Some(ForwardOrigin::Chat(channel("Daily", Some("daily"))));
        assert_eq!(ev.source_label(), "@daily");

        ev.origin = Some(ForwardOrigin::HiddenUser);
        assert_eq!(ev.source_label(), "Unknown");
    }

    #[test]
    fn test_user_origin_is_labelled_unknown() {
        let mut ev = text_event(1, "hello");
        ev.origin = Some(ForwardOrigin::User { id: 55 });
        assert!(ev.is_forwarded());
        assert_eq!(ev.source_label(), UNKNOWN_SOURCE);
    }
}

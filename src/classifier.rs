use crate::event::{IncomingEvent, MediaRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Text,
    Image,
    OtherMediaWithCaption,
    Unsupported,
}

/// What should be analyzed for one logical post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescriptor {
    pub kind: DescriptorKind,
    /// Body text; for grouped posts, every part's text joined by newlines
    pub text: String,
    /// First non-empty caption, kept apart from the merged text
    pub caption: String,
    /// Image references in arrival order
    pub media: Vec<MediaRef>,
    pub source_label: String,
}

impl ContentDescriptor {
    /// Text-only descriptor for content that never existed as its own message.
    pub fn text(text: impl Into<String>, source_label: impl Into<String>) -> Self {
        Self {
            kind: DescriptorKind::Text,
            text: text.into(),
            caption: String::new(),
            media: Vec::new(),
            source_label: source_label.into(),
        }
    }

    pub fn unsupported(source_label: impl Into<String>) -> Self {
        Self {
            kind: DescriptorKind::Unsupported,
            text: String::new(),
            caption: String::new(),
            media: Vec::new(),
            source_label: source_label.into(),
        }
    }
}

/// How an arriving event has to be handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    /// Part of a multi-part post; belongs to the aggregation buffer
    Grouped(String),
    Single(ContentDescriptor),
}

pub fn classify(event: &IncomingEvent) -> Arrival {
    match &event.group_id {
        Some(group_id) => Arrival::Grouped(group_id.clone()),
        None => Arrival::Single(describe(event)),
    }
}

/// Classify an event on its own, disregarding any group membership.
///
/// Rules are checked in order and the first match wins:
/// text without media, then images, then other media with a caption.
/// Anything else is unsupported.
pub fn describe(event: &IncomingEvent) -> ContentDescriptor {
    let source_label = event.source_label();

    if let Some(text) = event.non_empty_text() {
        if event.media.is_empty() {
            return ContentDescriptor::text(text, source_label);
        }
    }

    let images: Vec<MediaRef> = event
        .media
        .iter()
        .filter(|m| m.is_image())
        .cloned()
        .collect();
    let caption = event.non_empty_caption().unwrap_or_default().to_string();

    if !images.is_empty() {
        return ContentDescriptor {
            kind: DescriptorKind::Image,
            text: caption.clone(),
            caption,
            media: images,
            source_label,
        };
    }

    if !event.media.is_empty() && !caption.is_empty() {
        return ContentDescriptor {
            kind: DescriptorKind::OtherMediaWithCaption,
            text: caption,
            caption: String::new(),
            media: Vec::new(),
            source_label,
        };
    }

    ContentDescriptor::unsupported(source_label)
}

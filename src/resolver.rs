use tracing::debug;

use crate::classifier::{self, ContentDescriptor};
use crate::event::{ChatInfo, IncomingEvent, MentionSpan};

/// Shortest trimmed instruction, in characters, that still counts as absent.
const INSTRUCTION_MIN_EXCLUSIVE: usize = 3;

/// Whether `instruction` is long enough to replace the default analysis template.
pub fn has_instruction(instruction: &str) -> bool {
    instruction.trim().chars().count() > INSTRUCTION_MIN_EXCLUSIVE
}

/// What a mention asks the bot to look at
#[derive(Debug, Clone)]
pub enum AnalysisSource {
    Quoted { chat: ChatInfo, text: String },
    Reply(Box<IncomingEvent>),
}

impl AnalysisSource {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisSource::Quoted { .. } => "quote",
            AnalysisSource::Reply(_) => "reply",
        }
    }

    pub fn describe(&self) -> ContentDescriptor {
        match self {
            AnalysisSource::Quoted { chat, text } => {
                ContentDescriptor::text(text.clone(), chat.label())
            }
            AnalysisSource::Reply(original) => classifier::describe(original),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedContext {
    pub source: AnalysisSource,
    pub target: ContentDescriptor,
    /// Trimmed text after the mention; empty when absent
    pub custom_instruction: String,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Analyze(ResolvedContext),
    /// Nothing to analyze; answer the mention text as a question
    Freeform { question: String },
}

/// First entity span that spells `@username`, compared case-insensitively.
/// Spans that do not fit the text are skipped.
pub fn find_bot_mention(event: &IncomingEvent, username: &str) -> Option<MentionSpan> {
    let text = event.text.as_deref()?;
    let handle = format!("@{}", username.trim_start_matches('@'));

    event.mentions.iter().copied().find(|span| {
        span_text(text, *span).is_some_and(|mention| mention.eq_ignore_ascii_case(&handle))
    })
}

/// The event answers one of the bot's own messages.
pub fn is_reply_to_bot(event: &IncomingEvent, bot_id: u64) -> bool {
    event
        .reply_to
        .as_ref()
        .is_some_and(|reply| reply.sender_id == Some(bot_id))
}

fn span_text(text: &str, span: MentionSpan) -> Option<&str> {
    if span.start > span.end {
        return None;
    }
    text.get(span.start..span.end)
}

/// Trimmed text after the mention span. Inconsistent offsets and instructions
/// that are too short both yield an empty string.
pub fn extract_instruction(text: &str, span: MentionSpan) -> String {
    match text.get(span.end..) {
        Some(rest) if span.start <= span.end && has_instruction(rest) => rest.trim().to_string(),
        Some(_) => String::new(),
        None => {
            debug!(
                "Mention span {}..{} does not fit the message, ignoring instruction",
                span.start, span.end
            );
            String::new()
        }
    }
}

/// Decide what a mention refers to.
///
/// A replied-to message wins over a quote. Without either, the mention becomes a
/// free-form question. Callers drop replies to the bot itself before getting here.
pub fn resolve(event: &IncomingEvent, mention: MentionSpan) -> Resolution {
    let text = event.text.as_deref().unwrap_or_default();
    let custom_instruction = extract_instruction(text, mention);

    let source = if let Some(original) = &event.reply_to {
        debug!("Mention replies to message {}", original.message_id);
        AnalysisSource::Reply(original.clone())
    } else if let Some(quote) = event.quote.as_deref().filter(|q| !q.trim().is_empty()) {
        debug!("Mention quotes {} bytes of text", quote.len());
        AnalysisSource::Quoted {
            chat: event.chat.clone(),
            text: quote.to_string(),
        }
    } else {
        return Resolution::Freeform {
            question: text.trim().to_string(),
        };
    };

    Resolution::Analyze(ResolvedContext {
        target: source.describe(),
        source,
        custom_instruction,
    })
}

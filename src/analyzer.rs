use anyhow::Result;
use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::llm::{ChatMessage, ContentPart, ImageUrl, LlmClient, MessageContent};
use crate::resolver::has_instruction;

/// Content-analysis backend. Every call is a single attempt.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze_text(
        &self,
        text: &str,
        source_label: &str,
        instruction: Option<&str>,
    ) -> Result<String>;

    /// `image_urls` are fetchable addresses (http or data URLs).
    async fn analyze_images(
        &self,
        image_urls: &[String],
        text: &str,
        caption: &str,
        source_label: &str,
        instruction: Option<&str>,
    ) -> Result<String>;

    async fn answer_freeform(&self, question: &str) -> Result<String>;
}

const ANALYST_ROLE: &str =
    "You are a master of information warfare, an expert in detecting propaganda, manipulation, and fake news.";

const ASSISTANT_ROLE: &str = "You are a helpful assistant, you will receive a Message, Channel and a Question about the Message, Answer please on the Question(-s).";

const ALLOWED_TAGS: &str =
    r#"<b>, <strong>, <i>, <em>, <code>, <s>, <strike>, <del>, <u>, <pre language="c++">"#;

const DEFAULT_TEMPLATE: &str = r#"Your task is to evaluate a news or social media post quickly and accurately.

Instructions:
1. Answer only in {language}.
2. Keep the format short, structured and easy to read on a phone in Telegram.
3. Use emoji to separate blocks of information.
4. If there is a link or a mention of a source, characterize it (official / fake / propaganda / tabloid / expert / blog / etc.).
5. If the source is a repost, try to identify the original.
6. Always answer, even if the post is a meme, a joke or an emotional outburst.
7. Pay special attention to war and panic topics.
8. Allowed tags: {tags}

📥 Analyze the following post:
CHANNEL: {channel}
POST: {post}

📤 Answer format:

📰 Summary: [one short sentence]
---
📊 Assessment (0–100%):
• Propaganda: XX% – [1 sentence explaining the score]
• Falsehood: XX% – [1 sentence explaining the score]
• Populism: XX% – [1 sentence explaining the score]
• Emotional manipulation: XX% – [1 sentence explaining the score]
• Toxicity: XX% – [1 sentence explaining the score]
• War panic: XX% – [1 sentence explaining the score]
• Shitposting/trolling: XX% – [1 sentence explaining the score]
---
🔍 Source: [source or channel name] — [type: official / tabloid / gossip / bot / propaganda / russian / anonymous / etc.]
---
📑 Fact check:
• [claim 1 from the post]: true / false / unverified [with a short explanation or source if needed]
• [claim 2 from the post]: ...
---
✅ Conclusion: [1–2 sentences with the overall assessment and advice to the reader]
---
📎 Warning: [If relevant, e.g.: This channel often spreads panic, fakes or unverified information.]
"#;

/// Prompt construction for the chat-completions backend
pub struct Prompts {
    language: String,
}

impl Prompts {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    fn header(&self) -> String {
        format!(
            "Answer only in {}. Use Telegram (HTML) formatting.\nAllowed tags: {}.",
            self.language, ALLOWED_TAGS
        )
    }

    fn default_analysis(&self, channel: &str, post: &str) -> String {
        DEFAULT_TEMPLATE
            .replace("{language}", &self.language)
            .replace("{tags}", ALLOWED_TAGS)
            .replace("{channel}", channel)
            .replace("{post}", post)
    }

    /// System + user text for a text post.
    pub fn text(&self, text: &str, source: &str, instruction: Option<&str>) -> (String, String) {
        match instruction.filter(|i| has_instruction(i)) {
            Some(question) => (
                ASSISTANT_ROLE.to_string(),
                format!(
                    "{}\nChannel: {}\nMessage: {}\nQuestion: {}",
                    self.header(),
                    source,
                    text,
                    question.trim()
                ),
            ),
            None => (ANALYST_ROLE.to_string(), self.default_analysis(source, text)),
        }
    }

    /// System + user text for an image post.
    pub fn images(
        &self,
        text: &str,
        caption: &str,
        source: &str,
        instruction: Option<&str>,
    ) -> (String, String) {
        let caption = if caption.trim().is_empty() {
            "No text provided"
        } else {
            caption
        };
        match instruction.filter(|i| has_instruction(i)) {
            Some(question) => (
                ASSISTANT_ROLE.to_string(),
                format!(
                    "{}\nChannel: {}\nPost: {}\nCaption: {}\nQuestion: {}",
                    self.header(),
                    source,
                    text,
                    caption,
                    question.trim()
                ),
            ),
            None => (
                ANALYST_ROLE.to_string(),
                format!("{}\nCaption: {}", self.default_analysis(source, text), caption),
            ),
        }
    }

    pub fn freeform_system(&self) -> String {
        format!(
            "You are a helpful assistant. Answer the user's question in {}. Use only simple HTML tags for formatting if needed.",
            self.language
        )
    }
}

/// Analyzer backed by an OpenAI-compatible model
pub struct LlmAnalyzer {
    llm: LlmClient,
    prompts: Prompts,
}

impl LlmAnalyzer {
    pub fn new(config: LlmConfig) -> Self {
        let prompts = Prompts::new(config.language.clone());
        Self {
            llm: LlmClient::new(config),
            prompts,
        }
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze_text(
        &self,
        text: &str,
        source_label: &str,
        instruction: Option<&str>,
    ) -> Result<String> {
        let (system, prompt) = self.prompts.text(text, source_label, instruction);
        let messages = [
            ChatMessage::system(system),
            ChatMessage::user(MessageContent::Text(prompt)),
        ];
        self.llm.complete(&messages).await
    }

    async fn analyze_images(
        &self,
        image_urls: &[String],
        text: &str,
        caption: &str,
        source_label: &str,
        instruction: Option<&str>,
    ) -> Result<String> {
        let (system, prompt) = self.prompts.images(text, caption, source_label, instruction);

        let mut parts = vec![ContentPart::Text { text: prompt }];
        parts.extend(image_urls.iter().map(|url| ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.clone() },
        }));

        let messages = [
            ChatMessage::system(system),
            ChatMessage::user(MessageContent::Parts(parts)),
        ];
        self.llm.complete(&messages).await
    }

    async fn answer_freeform(&self, question: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(self.prompts.freeform_system()),
            ChatMessage::user(MessageContent::Text(question.to_string())),
        ];
        self.llm.complete(&messages).await
    }
}

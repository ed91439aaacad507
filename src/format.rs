use crate::dispatch::AnalysisOutcome;

/// Telegram rejects messages longer than 4096 characters
pub const MESSAGE_CHUNK: usize = 4000;

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// HTML card wrapping one verdict.
pub fn format_analysis(outcome: &AnalysisOutcome) -> String {
    format!(
        "📊 <b>Аналіз посту</b>\n\n<b>Джерело:</b> {}\n\n{}\n\n---\n<i>Analysis powered by AI</i>",
        escape_html(&outcome.source_label),
        escape_html(outcome.display_text.trim()),
    )
}

/// Split long messages for Telegram's 4096 char limit
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // Chunk narrower than the next character; emit that character alone
            end += text[start..].chars().next().map_or(1, char::len_utf8);
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b>"Tom & Jerry's"</b>"#),
            "&lt;b&gt;&quot;Tom &amp; Jerry&#39;s&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_format_analysis_escapes_both_fields() {
        let html = format_analysis(&AnalysisOutcome {
            display_text: "  1 < 2  ".to_string(),
            source_label: "A&B".to_string(),
        });
        assert!(html.starts_with("📊 <b>Аналіз посту</b>"));
        assert!(html.contains("<b>Джерело:</b> A&amp;B"));
        assert!(html.contains("\n\n1 &lt; 2\n\n"));
    }

    #[test]
    fn test_split_prefers_line_breaks() {
        let text = format!("{}\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = split_message(&text, 40);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{}\n", "a".repeat(30)));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_always_makes_progress() {
        let chunks = split_message(" їїї", 1);
        assert_eq!(chunks, vec![" ", "ї", "ї", "ї"]);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "ї".repeat(50);
        let chunks = split_message(&text, 9);
        assert!(chunks.iter().all(|c| c.len() <= 9));
        assert_eq!(chunks.concat(), text);
    }
}

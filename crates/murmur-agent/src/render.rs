//! Markdown to Telegram HTML.
//!
//! Models answer in loose Markdown. Telegram understands a small HTML subset
//! and nothing like lists or headings, so [`MarkdownRenderer`] walks the
//! `pulldown-cmark` event stream and maps each node through a
//! [`RenderRules`] table: headings become bold lines, list items become
//! bullet lines, fenced code becomes `<pre>`.
//!
//! Rendering never fails. When Telegram rejects the result anyway (unknown
//! tags the model typed itself, or an over-long payload) the caller resends
//! the raw text.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Markup emitted around a node's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wrap {
    pub open: &'static str,
    pub close: &'static str,
}

impl Wrap {
    pub const fn new(open: &'static str, close: &'static str) -> Self {
        Self { open, close }
    }

    pub const NONE: Wrap = Wrap::new("", "");
}

/// Per-node rendering rules, keyed by node type.
#[derive(Debug, Clone, Copy)]
pub struct RenderRules {
    pub heading: Wrap,
    pub strong: Wrap,
    pub emphasis: Wrap,
    pub strikethrough: Wrap,
    pub inline_code: Wrap,
    pub list: Wrap,
    pub list_item: Wrap,
    pub paragraph: Wrap,
    pub hard_break: &'static str,
    pub soft_break: &'static str,
    pub rule: &'static str,
    /// Opening markup for a link to the given destination.
    pub link_open: fn(&str) -> String,
    pub link_close: &'static str,
    /// Whole block for a code block, given its language and raw body.
    pub code_block: fn(&str, &str) -> String,
    /// Escaping applied to plain text.
    pub escape: fn(&str) -> String,
}

impl RenderRules {
    /// The rule set for Telegram's `parse_mode=HTML`.
    pub fn telegram_html() -> Self {
        Self {
            heading: Wrap::new("<b>", "</b>\n"),
            strong: Wrap::new("<b>", "</b>"),
            emphasis: Wrap::new("<i>", "</i>"),
            strikethrough: Wrap::new("<s>", "</s>"),
            inline_code: Wrap::new("<code>", "</code>"),
            list: Wrap::new("\n", ""),
            list_item: Wrap::new("• ", ""),
            paragraph: Wrap::new("", "\n"),
            hard_break: "\n",
            soft_break: "\n",
            rule: "\n",
            link_open: |href| format!("<a href=\"{}\">", escape_html(href)),
            link_close: "</a>",
            code_block: |language, body| {
                format!("<pre language=\"{}\">{}</pre>", escape_html(language), escape_html(body))
            },
            escape: escape_html,
        }
    }

    /// Rules that drop all markup and keep text as-is.
    pub fn plain() -> Self {
        Self {
            heading: Wrap::new("", "\n"),
            strong: Wrap::NONE,
            emphasis: Wrap::NONE,
            strikethrough: Wrap::NONE,
            inline_code: Wrap::NONE,
            list: Wrap::new("\n", ""),
            list_item: Wrap::new("• ", ""),
            paragraph: Wrap::new("", "\n"),
            hard_break: "\n",
            soft_break: "\n",
            rule: "\n",
            link_open: |_| String::new(),
            link_close: "",
            code_block: |_, body| body.to_owned(),
            escape: str::to_owned,
        }
    }
}

impl Default for RenderRules {
    fn default() -> Self {
        Self::telegram_html()
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    rules: RenderRules,
    options: Options,
}

impl MarkdownRenderer {
    pub fn new(rules: RenderRules) -> Self {
        Self {
            rules,
            options: Options::ENABLE_STRIKETHROUGH
                | Options::ENABLE_TASKLISTS
                | Options::ENABLE_SMART_PUNCTUATION,
        }
    }

    pub fn rules(&self) -> &RenderRules {
        &self.rules
    }

    pub fn render(&self, markdown: &str) -> String {
        let r = &self.rules;
        let mut out = String::with_capacity(markdown.len() + markdown.len() / 4);
        let mut code: Option<(String, String)> = None;

        for event in Parser::new_ext(markdown, self.options) {
            if let Some((language, body)) = code.as_mut() {
                match event {
                    Event::Text(text) => body.push_str(&text),
                    Event::End(TagEnd::CodeBlock) => {
                        out.push_str(&(r.code_block)(language, body));
                        out.push('\n');
                        code = None;
                    }
                    _ => {}
                }
                continue;
            }

            match event {
                Event::Start(tag) => match tag {
                    Tag::Heading { .. } => out.push_str(r.heading.open),
                    Tag::Strong => out.push_str(r.strong.open),
                    Tag::Emphasis => out.push_str(r.emphasis.open),
                    Tag::Strikethrough => out.push_str(r.strikethrough.open),
                    Tag::List(_) => out.push_str(r.list.open),
                    Tag::Item => out.push_str(r.list_item.open),
                    Tag::Paragraph => out.push_str(r.paragraph.open),
                    Tag::Link { dest_url, .. } => out.push_str(&(r.link_open)(&dest_url)),
                    Tag::CodeBlock(kind) => {
                        let language = match kind {
                            CodeBlockKind::Fenced(info) => {
                                info.split_whitespace().next().unwrap_or_default().to_owned()
                            }
                            CodeBlockKind::Indented => String::new(),
                        };
                        code = Some((language, String::new()));
                    }
                    _ => {}
                },
                Event::End(tag) => match tag {
                    TagEnd::Heading(_) => out.push_str(r.heading.close),
                    TagEnd::Strong => out.push_str(r.strong.close),
                    TagEnd::Emphasis => out.push_str(r.emphasis.close),
                    TagEnd::Strikethrough => out.push_str(r.strikethrough.close),
                    TagEnd::List(_) => out.push_str(r.list.close),
                    TagEnd::Item => {
                        out.push_str(r.list_item.close);
                        // Tight list items carry no paragraph of their own.
                        if !out.ends_with('\n') {
                            out.push('\n');
                        }
                    }
                    TagEnd::Paragraph => out.push_str(r.paragraph.close),
                    TagEnd::Link => out.push_str(r.link_close),
                    _ => {}
                },
                Event::Text(text) => out.push_str(&(r.escape)(&text)),
                Event::Code(text) => {
                    out.push_str(r.inline_code.open);
                    out.push_str(&(r.escape)(&text));
                    out.push_str(r.inline_code.close);
                }
                Event::Html(html) | Event::InlineHtml(html) => out.push_str(&html),
                Event::SoftBreak => out.push_str(r.soft_break),
                Event::HardBreak => out.push_str(r.hard_break),
                Event::Rule => out.push_str(r.rule),
                Event::TaskListMarker(done) => out.push_str(if done { "[x] " } else { "[ ] " }),
                _ => {}
            }
        }

        // An unterminated fence still renders its body.
        if let Some((language, body)) = code {
            out.push_str(&(r.code_block)(&language, &body));
        }

        out.trim().to_owned()
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new(RenderRules::telegram_html())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Split `text` into consecutive slices of at most `max_chars` characters.
///
/// Empty input yields no chunks; `max_chars == 0` disables splitting.
pub fn chunk(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if max_chars == 0 {
        return vec![text.to_owned()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|piece| piece.iter().collect())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn html(md: &str) -> String {
        MarkdownRenderer::default().render(md)
    }

    #[test]
    fn headings_become_bold_lines() {
        assert_eq!(html("# Title\n\nbody"), "<b>Title</b>\nbody");
        assert_eq!(html("### Deep"), "<b>Deep</b>");
    }

    #[test]
    fn strong_and_emphasis() {
        assert_eq!(html("**bold** and *soft*"), "<b>bold</b> and <i>soft</i>");
    }

    #[test]
    fn bullet_lists_use_bullets_without_list_markup() {
        assert_eq!(html("Items:\n\n- one\n- two"), "Items:\n\n• one\n• two");
        assert_eq!(html("1. first\n2. second"), "• first\n• second");
    }

    #[test]
    fn fenced_code_keeps_language_and_escapes_body() {
        let rendered = html("```rust\nif a < b && c {}\n```");
        assert_eq!(
            rendered,
            "<pre language=\"rust\">if a &lt; b &amp;&amp; c {}\n</pre>"
        );
    }

    #[test]
    fn fence_info_uses_first_word_only() {
        assert!(html("```python title=x\npass\n```").starts_with("<pre language=\"python\">"));
    }

    #[test]
    fn plain_text_is_escaped() {
        assert_eq!(html("1 < 2 & 3 > 2"), "1 &lt; 2 &amp; 3 &gt; 2");
    }

    #[test]
    fn hard_breaks_are_newlines() {
        assert_eq!(html("a  \nb"), "a\nb");
    }

    #[test]
    fn paragraphs_close_with_newline() {
        assert_eq!(html("one\n\ntwo"), "one\ntwo");
    }

    #[test]
    fn links_and_inline_code() {
        assert_eq!(
            html("see [docs](https://x.io/?a=1&b=2) or `a<b`"),
            "see <a href=\"https://x.io/?a=1&amp;b=2\">docs</a> or <code>a&lt;b</code>"
        );
    }

    #[test]
    fn custom_rules_replace_defaults() {
        let rules = RenderRules {
            strong: Wrap::new("*", "*"),
            ..RenderRules::plain()
        };
        assert_eq!(MarkdownRenderer::new(rules).render("**hey** <you>"), "*hey* <you>");
    }

    #[test]
    fn chunking_reconstructs_the_input() {
        let line: String = "абвгд".repeat(1000);
        let len = line.chars().count();
        let pieces = chunk(&line, 4096);

        assert_eq!(pieces.len(), len.div_ceil(4096));
        assert!(pieces.iter().all(|p| p.chars().count() <= 4096));
        assert_eq!(pieces.concat(), line);
    }

    #[test]
    fn chunking_edge_cases() {
        assert!(chunk("", 10).is_empty());
        assert_eq!(chunk("abc", 3), vec!["abc"]);
        assert_eq!(chunk("abcd", 3), vec!["abc", "d"]);
        assert_eq!(chunk("abc", 0), vec!["abc"]);
    }
}

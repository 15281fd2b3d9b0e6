//! Thinking block extraction from model responses.
//!
//! Reasoning models emit their chain of thought inline, wrapped in one of a
//! handful of tag names. This module separates that reasoning from the text
//! the user should see.
//!
//! Detection rules:
//! - Complete `<tag>...</tag>` pairs of every recognized kind are extracted,
//!   in document order, and removed from the visible text.
//! - If no complete pair exists but an opening tag does, the generation was
//!   truncated mid-thought: everything after the tag is thinking and nothing
//!   is visible.
//! - Blocks that are empty or whitespace-only are dropped.

use once_cell::sync::Lazy;
use regex::Regex;

use parley_core::defaults::THINKING_BLOCK_SEPARATOR;

/// Recognized thinking tag names (matched case-insensitively).
pub const THINKING_TAGS: [&str; 7] = [
    "think",
    "thinking",
    "reasoning",
    "thought",
    "scratchpad",
    "reflection",
    "ant_thinking",
];

static COMPLETE_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    THINKING_TAGS
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}>(.*?)</{tag}>")).expect("static thinking tag regex")
        })
        .collect()
});

static OPENING_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)<(?:{})>", THINKING_TAGS.join("|")))
        .expect("static opening tag regex")
});

static EXCESS_NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("static newline regex"));

/// Result of separating thinking from visible content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingExtraction {
    /// Extracted reasoning, blocks joined by a separator. `None` if nothing non-empty.
    pub thinking_content: Option<String>,
    /// Text meant for the user.
    pub visible_content: String,
    /// Number of non-empty blocks extracted.
    pub block_count: usize,
}

/// A complete tag pair located in the source text.
#[derive(Debug, Clone, Copy)]
struct BlockSpan {
    start: usize,
    end: usize,
    body_start: usize,
    body_end: usize,
}

/// Split model output into reasoning and visible text.
///
/// # Examples
///
/// ```
/// use parley_inference::thinking::extract_thinking_blocks;
///
/// let parsed = extract_thinking_blocks("<think>x</think>y");
/// assert_eq!(parsed.thinking_content.as_deref(), Some("x"));
/// assert_eq!(parsed.visible_content, "y");
/// assert_eq!(parsed.block_count, 1);
///
/// // Truncated generation: the tag never closed.
/// let truncated = extract_thinking_blocks("<reasoning>still going");
/// assert_eq!(truncated.thinking_content.as_deref(), Some("still going"));
/// assert_eq!(truncated.visible_content, "");
/// ```
pub fn extract_thinking_blocks(content: &str) -> ThinkingExtraction {
    let spans = complete_block_spans(content);

    if spans.is_empty() {
        return match OPENING_TAG.find(content) {
            Some(open) => {
                let body = content[open.end()..].trim();
                ThinkingExtraction {
                    thinking_content: (!body.is_empty()).then(|| body.to_string()),
                    visible_content: String::new(),
                    block_count: usize::from(!body.is_empty()),
                }
            }
            None => ThinkingExtraction {
                thinking_content: None,
                visible_content: tidy_visible(content),
                block_count: 0,
            },
        };
    }

    let mut visible = String::with_capacity(content.len());
    let mut bodies = Vec::with_capacity(spans.len());
    let mut cursor = 0;

    for span in &spans {
        visible.push_str(&content[cursor..span.start]);
        let body = content[span.body_start..span.body_end].trim();
        if !body.is_empty() {
            bodies.push(body);
        }
        cursor = span.end;
    }
    visible.push_str(&content[cursor..]);

    ThinkingExtraction {
        thinking_content: (!bodies.is_empty()).then(|| bodies.join(THINKING_BLOCK_SEPARATOR)),
        visible_content: tidy_visible(&visible),
        block_count: bodies.len(),
    }
}

/// Whether the content carries any thinking block, closed or not.
pub fn has_thinking_blocks(content: &str) -> bool {
    OPENING_TAG.is_match(content)
}

/// Every complete tag pair of every kind, in document order, without overlaps.
///
/// When pairs of different kinds nest, the outermost wins.
fn complete_block_spans(content: &str) -> Vec<BlockSpan> {
    let mut spans: Vec<BlockSpan> = COMPLETE_BLOCKS
        .iter()
        .flat_map(|re| re.captures_iter(content))
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let body = caps.get(1)?;
            Some(BlockSpan {
                start: whole.start(),
                end: whole.end(),
                body_start: body.start(),
                body_end: body.end(),
            })
        })
        .collect();

    spans.sort_by_key(|s| (s.start, std::cmp::Reverse(s.end)));

    let mut kept: Vec<BlockSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        if kept.last().map_or(true, |last| span.start >= last.end) {
            kept.push(span);
        }
    }
    kept
}

fn tidy_visible(text: &str) -> String {
    EXCESS_NEWLINES.replace_all(text, "\n\n").trim().to_string()
}

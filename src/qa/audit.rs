use regex::Regex;
use serde::Serialize;

use crate::docs::types::DocumentChunk;
use crate::qa::filter::meaningful_words;

/// Below this many shared meaningful words, the answer is flagged as a
/// possible fabrication.
const MIN_OVERLAP_WORDS: usize = 5;
/// Answers shorter than this are flagged as possibly under-elaborated.
const MIN_ANSWER_CHARS: usize = 100;

/// Contact details and links lifted out of the context chunks for display.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Entities {
    pub links: Vec<String>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
}

impl Entities {
    pub fn is_empty(&self) -> bool {
        self.links.is_empty() && self.emails.is_empty() && self.phones.is_empty()
    }
}

pub struct EntityExtractor {
    link_re: Regex,
    email_re: Regex,
    phone_re: Regex,
}

impl EntityExtractor {
    pub fn new() -> Self {
        Self {
            link_re: Regex::new(r"https?://[^\s)>\]]+").expect("valid link regex"),
            email_re: Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}")
                .expect("valid email regex"),
            phone_re: Regex::new(r"\+?[0-9][0-9()\-\s.]{7,}[0-9]").expect("valid phone regex"),
        }
    }

    /// Pull links, emails, and phone numbers out of a text, deduplicated in
    /// first-seen order.
    pub fn extract(&self, text: &str) -> Entities {
        Entities {
            links: dedup(self.link_re.find_iter(text).map(|m| m.as_str().to_string())),
            emails: dedup(self.email_re.find_iter(text).map(|m| m.as_str().to_string())),
            phones: dedup(
                self.phone_re
                    .find_iter(text)
                    .map(|m| m.as_str().trim().to_string()),
            ),
        }
    }

    pub fn extract_from_chunks(&self, chunks: &[DocumentChunk]) -> Entities {
        let joined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.extract(&joined)
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.filter(|i| seen.insert(i.clone())).collect()
}

/// Advisory pass over a finished answer. The warnings are appended to the
/// user-visible response and never alter or suppress the answer itself.
pub fn audit_answer(answer: &str, context_chunks: &[DocumentChunk]) -> Vec<String> {
    let mut advisories = Vec::new();
    let answer_lower = answer.to_lowercase();

    // (a) Answer repeats a document title verbatim: it may be leaning on
    // the title rather than the content.
    for chunk in context_chunks {
        let title = chunk.meta.title.trim();
        if title.len() > 3 && answer_lower.contains(&title.to_lowercase()) {
            advisories.push(format!(
                "The answer repeats the document title \"{}\"; verify it reflects the document's content, not just its name.",
                title
            ));
            break;
        }
    }

    // (b) Too few meaningful words shared with the context.
    let context_text = context_chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let overlap = meaningful_words(&context_text)
        .intersection(&meaningful_words(answer))
        .count();
    if overlap < MIN_OVERLAP_WORDS {
        advisories.push(format!(
            "Only {} meaningful words of the answer appear in the source documents; it may not be grounded in them.",
            overlap
        ));
    }

    // (c) Suspiciously short answer.
    if answer.chars().count() < MIN_ANSWER_CHARS {
        advisories.push(
            "The answer is very short; the documents may contain more detail than was used."
                .to_string(),
        );
    }

    advisories
}

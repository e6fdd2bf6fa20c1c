//! Question-answering prompt with sources.
//!
//! The model is shown the retrieved passages as `Content:`/`Source:` pairs and
//! asked to finish with a `SOURCES:` line, which [`parse_answer`] splits back
//! out of the completion.

use std::collections::HashSet;

use serde::Serialize;

use super::types::ChatMessage;
use crate::rag::context_builder::RetrievedContext;

const SOURCE_WORD: &str = "SOURCE";
const RULE: &str = "=========";

const SYSTEM_PROMPT: &str = "You are given extracted parts of web pages and a question. \
Answer the question using only those extracted parts. \
If the extracted parts do not contain the answer, say that you don't know instead of making one up. \
Always finish your answer with a line of the form \"SOURCES: <url>, <url>\" listing the sources you used.";

/// Final answer with the sources it cites.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
}

pub fn build_messages(context: &RetrievedContext) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(user_prompt(context)),
    ]
}

fn user_prompt(context: &RetrievedContext) -> String {
    let passages = context
        .chunks
        .iter()
        .map(|sc| format!("Content: {}\nSource: {}", sc.chunk.content, sc.chunk.source))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{rule}\n{passages}\n{rule}\nQUESTION: {question}\nFINAL ANSWER:",
        rule = RULE,
        passages = passages,
        question = context.query.trim()
    )
}

/// Splits a completion into answer text and cited sources.
///
/// The first line after the last `SOURCES:` or `SOURCE:` marker (any case)
/// is read as the citation list. Only URLs and names of known sources count
/// as citations. When none remain, `fallback_sources` are used.
pub fn parse_answer(completion: &str, fallback_sources: &[String]) -> Answer {
    let (answer, cited) = match find_sources_marker(completion) {
        Some((start, end)) => {
            let citation_line = completion[end..]
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("");
            (
                &completion[..start],
                split_sources(citation_line, fallback_sources),
            )
        }
        None => (completion, Vec::new()),
    };

    let sources = if cited.is_empty() {
        dedupe(fallback_sources.iter().cloned())
    } else {
        cited
    };

    Answer {
        answer: answer.trim().to_string(),
        sources,
    }
}

/// Byte offset where the answer text of `completion` ends.
pub fn answer_end(completion: &str) -> usize {
    find_sources_marker(completion)
        .map(|(start, _)| start)
        .unwrap_or(completion.len())
}

/// How much of a still-growing completion can be shown as answer text.
///
/// A tail that could be the start of a sources marker is held back until
/// the next token settles it.
pub fn visible_answer_len(completion: &str) -> usize {
    let end = answer_end(completion);
    if end < completion.len() {
        return end;
    }
    let marker = "SOURCES:";
    completion
        .char_indices()
        .rev()
        .take(marker.len() - 1)
        .map(|(idx, _)| idx)
        .filter(|idx| {
            let tail = completion[*idx..].to_ascii_uppercase();
            marker.starts_with(tail.as_str())
        })
        .last()
        .unwrap_or(end)
}

/// Byte range of the last `SOURCE:`/`SOURCES:` marker.
fn find_sources_marker(completion: &str) -> Option<(usize, usize)> {
    // ASCII uppercasing keeps byte offsets intact.
    let upper = completion.to_ascii_uppercase();
    upper
        .match_indices(SOURCE_WORD)
        .filter(|(start, _)| {
            !upper[..*start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric())
        })
        .filter_map(|(start, _)| {
            let rest = &upper[start + SOURCE_WORD.len()..];
            if rest.starts_with("S:") {
                Some((start, start + SOURCE_WORD.len() + 2))
            } else if rest.starts_with(':') {
                Some((start, start + SOURCE_WORD.len() + 1))
            } else {
                None
            }
        })
        .last()
}

fn split_sources(raw: &str, known_sources: &[String]) -> Vec<String> {
    let tokens = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|token| {
            token
                .trim_matches(|c: char| matches!(c, '[' | ']' | '(' | ')' | '<' | '>' | '"' | '\'' | '`'))
                .trim_end_matches(['.', ';'])
                .to_string()
        })
        .filter(|token| is_citation(token, known_sources));
    dedupe(tokens)
}

fn is_citation(token: &str, known_sources: &[String]) -> bool {
    let lower = token.to_ascii_lowercase();
    let is_url = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .is_some_and(|rest| !rest.is_empty());
    is_url || known_sources.iter().any(|source| source == token)
}

fn dedupe(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

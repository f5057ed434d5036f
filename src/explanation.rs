//! Best-effort extraction of the three coaching sections from generated text.
//!
//! The generator is asked for a numbered list with bold headers, but nothing
//! holds it to that. Parsing therefore runs in layers and never fails:
//!
//! 1. split on list markers (`1.`, `2.` ...) and match headers per item,
//! 2. if nothing came out, cut the text into regions between headers,
//! 3. if still nothing, hand back the raw text as the first section.
//!
//! The [`ParseConfidence`] tag says which layer produced the result.

use serde::{Deserialize, Serialize};

const PREAMBLE: &str = "Here are the explanations:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplanationSections {
    pub best_move_explanation: String,
    pub strategic_idea: String,
    pub tactical_motif: String,
}

impl ExplanationSections {
    fn is_empty(&self) -> bool {
        self.best_move_explanation.is_empty()
            && self.strategic_idea.is_empty()
            && self.tactical_motif.is_empty()
    }

    fn is_complete(&self) -> bool {
        !self.best_move_explanation.is_empty()
            && !self.strategic_idea.is_empty()
            && !self.tactical_motif.is_empty()
    }

    fn slot(&mut self, section: Section) -> &mut String {
        match section {
            Section::BestMove => &mut self.best_move_explanation,
            Section::StrategicIdea => &mut self.strategic_idea,
            Section::TacticalMotif => &mut self.tactical_motif,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseConfidence {
    /// Every section found under its own list item.
    Structured,
    /// Some sections found, or found only by region matching.
    PartialMatch,
    /// Nothing recognisable; the raw text sits in the first section.
    RawFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedExplanation {
    #[serde(flatten)]
    pub sections: ExplanationSections,
    pub confidence: ParseConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    BestMove,
    StrategicIdea,
    TacticalMotif,
}

/// Header text per section, lowercase, in matching priority order.
const HEADERS: [(Section, &str); 3] = [
    (Section::BestMove, "best move explanation"),
    (Section::StrategicIdea, "strategic idea"),
    (Section::TacticalMotif, "tactical motif"),
];

pub fn parse(text: &str) -> ParsedExplanation {
    let body = text.replace(PREAMBLE, "");
    let body = body.trim();

    let sections = by_list_items(body);
    if sections.is_complete() {
        return ParsedExplanation {
            sections,
            confidence: ParseConfidence::Structured,
        };
    }
    if !sections.is_empty() {
        return ParsedExplanation {
            sections,
            confidence: ParseConfidence::PartialMatch,
        };
    }

    let sections = by_regions(body);
    if !sections.is_empty() {
        return ParsedExplanation {
            sections,
            confidence: ParseConfidence::PartialMatch,
        };
    }

    ParsedExplanation {
        sections: ExplanationSections {
            best_move_explanation: text.to_string(),
            ..Default::default()
        },
        confidence: ParseConfidence::RawFallback,
    }
}

fn by_list_items(body: &str) -> ExplanationSections {
    let mut sections = ExplanationSections::default();
    for item in split_list_items(body) {
        let lower = item.to_ascii_lowercase();
        let found = HEADERS.iter().find_map(|&(section, header)| {
            lower.find(header).map(|at| (section, at, header.len()))
        });
        if let Some((section, at, len)) = found {
            let content = item[skip_header_tail(item, at + len)..].trim();
            *sections.slot(section) = content.to_string();
        }
    }
    sections
}

fn by_regions(body: &str) -> ExplanationSections {
    let lower = body.to_ascii_lowercase();
    let mut sections = ExplanationSections::default();

    for &(section, header) in &HEADERS {
        let Some(at) = lower.find(header) else {
            continue;
        };
        let start = skip_header_tail(body, at + header.len());
        // region runs until the next occurrence of any other header
        let end = HEADERS
            .iter()
            .filter(|&&(other, _)| other != section)
            .filter_map(|&(_, other)| lower[start..].find(other).map(|i| start + i))
            .min()
            .unwrap_or(body.len());
        let region = body[start..end].trim_end_matches(|c: char| c == '*' || c.is_whitespace());
        *sections.slot(section) = strip_list_marker(region).to_string();
    }
    sections
}

/// Split on list markers: a run of digits followed by `.` that starts a word
/// and is followed by whitespace, `*` or the end of text.
fn split_list_items(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut items = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let starts_word = i == 0 || bytes[i - 1].is_ascii_whitespace();
        if !(starts_word && bytes[i].is_ascii_digit()) {
            i += 1;
            continue;
        }
        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        let is_marker = bytes.get(j) == Some(&b'.')
            && bytes
                .get(j + 1)
                .is_none_or(|b| b.is_ascii_whitespace() || *b == b'*');
        if is_marker {
            items.push(&text[start..i]);
            j += 1;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            start = j;
        }
        i = j;
    }
    items.push(&text[start..]);
    items
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Index just past a header's closing `**`, `:` and whitespace.
fn skip_header_tail(text: &str, from: usize) -> usize {
    let rest = &text[from..];
    let trimmed = rest.trim_start_matches(['*', ':']).trim_start();
    from + rest.len() - trimmed.len()
}

/// Drop list markers left at either end of a region.
fn strip_list_marker(region: &str) -> &str {
    let mut region = region.trim();
    let leading = region.trim_start_matches(|c: char| c.is_ascii_digit());
    if leading.len() < region.len() {
        if let Some(rest) = leading.strip_prefix('.') {
            region = rest.trim_start();
        }
    }
    let trailing = region.trim_end_matches('.');
    if trailing.len() + 1 == region.len() {
        let digits = trailing.trim_end_matches(|c: char| c.is_ascii_digit());
        if digits.len() < trailing.len() && digits.ends_with(char::is_whitespace) {
            region = digits.trim_end();
        }
    }
    region
}

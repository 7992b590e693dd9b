//! Heuristic section detection for research-paper text.
//!
//! Produces a mapping from canonical section names (abstract, introduction,
//! methodology, results, conclusion, references) plus any other detected
//! headings to their body text. A line is treated as a heading when it is
//! standalone and passes one of:
//!
//! 1. case-insensitive match against a known heading alias,
//! 2. numbered-heading match (Arabic `1.` / `2.3` or Roman `IV.`) followed
//!    by a heading-like phrase,
//! 3. short ALL-CAPS line.
//!
//! The abstract has a three-strategy fallback: explicit `abstract` header,
//! `summary` header, or position-based extraction between the title/author
//! block and the introduction, gated by a 50–2000 word validity check.

use std::collections::BTreeMap;

pub const SECTION_ABSTRACT: &str = "abstract";
pub const SECTION_INTRODUCTION: &str = "introduction";
pub const SECTION_METHODOLOGY: &str = "methodology";
pub const SECTION_RESULTS: &str = "results";
pub const SECTION_CONCLUSION: &str = "conclusion";
pub const SECTION_REFERENCES: &str = "references";

/// Longest heading line we will consider, in characters.
const MAX_HEADING_CHARS: usize = 80;
/// Most words a heading line may contain.
const MAX_HEADING_WORDS: usize = 8;
/// Abstract validity window, in words.
const ABSTRACT_MIN_WORDS: usize = 50;
const ABSTRACT_MAX_WORDS: usize = 2000;

/// Map a heading phrase to its canonical section name, if it has one.
fn canonical_name(phrase: &str) -> Option<&'static str> {
    match phrase {
        "abstract" => Some(SECTION_ABSTRACT),
        "introduction" => Some(SECTION_INTRODUCTION),
        "methodology" | "methods" | "method" | "materials and methods" | "experimental setup" => {
            Some(SECTION_METHODOLOGY)
        }
        "results" | "results and discussion" | "findings" | "evaluation" => Some(SECTION_RESULTS),
        "conclusion" | "conclusions" | "concluding remarks" | "summary and conclusions" => {
            Some(SECTION_CONCLUSION)
        }
        "references" | "bibliography" | "works cited" => Some(SECTION_REFERENCES),
        _ => None,
    }
}

/// Phrases that are headings even without numbering or capitalization.
fn is_known_heading(phrase: &str) -> bool {
    canonical_name(phrase).is_some()
        || matches!(
            phrase,
            "related work"
                | "background"
                | "discussion"
                | "literature review"
                | "acknowledgments"
                | "acknowledgements"
                | "appendix"
                | "future work"
                | "limitations"
                | "summary"
        )
}

/// Strip leading Arabic (`1.`, `2.3`, `4)`) or Roman (`IV.`, `ix)`)
/// numbering from a candidate heading. Returns the remainder and whether
/// numbering was present.
fn strip_numbering(line: &str) -> (&str, bool) {
    let trimmed = line.trim_start();

    // Arabic: digits and dots, e.g. "3", "3.", "3.2.1".
    let prefix_len = trimmed
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    if prefix_len > 0 && trimmed[..prefix_len].chars().any(|c| c.is_ascii_digit()) {
        let rest = trimmed[prefix_len..].trim_start_matches([')', '.', ' ', '\t']);
        if !rest.is_empty() {
            return (rest, true);
        }
    }

    // Roman: a run of roman-numeral letters ended by '.' or ')'.
    if let Some(sep) = trimmed.find(['.', ')']) {
        let head = &trimmed[..sep];
        if !head.is_empty()
            && head
                .chars()
                .all(|c| "IVXLCDMivxlcdm".contains(c))
        {
            let rest = trimmed[sep + 1..].trim_start();
            if !rest.is_empty() {
                return (rest, true);
            }
        }
    }

    (trimmed, false)
}

/// Share of letters in `s` that are uppercase. 0.0 when there are no letters.
fn uppercase_ratio(s: &str) -> f64 {
    let letters: Vec<char> = s.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return 0.0;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters.len() as f64
}

/// Decide whether a standalone line is a section heading. Returns the
/// normalized (lowercased, unnumbered) heading name.
fn heading_name(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_HEADING_CHARS {
        return None;
    }
    // A heading does not end like a sentence.
    if trimmed.ends_with(['.', ',', ';', ':']) && !trimmed.ends_with("..") {
        // Allow a trailing '.' only as part of numbering like "1." alone.
        if trimmed.split_whitespace().count() > 1 {
            return None;
        }
    }
    if trimmed.split_whitespace().count() > MAX_HEADING_WORDS {
        return None;
    }

    let (phrase, numbered) = strip_numbering(trimmed);
    let normalized = phrase
        .trim_end_matches([':', '.'])
        .trim()
        .to_lowercase();
    if normalized.is_empty() || normalized.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    if is_known_heading(&normalized) {
        return Some(
            canonical_name(&normalized)
                .map(str::to_string)
                .unwrap_or(normalized),
        );
    }
    if numbered && normalized.split_whitespace().count() <= MAX_HEADING_WORDS {
        return Some(normalized);
    }
    if uppercase_ratio(phrase) >= 0.8 && phrase.chars().filter(|c| c.is_alphabetic()).count() >= 4 {
        return Some(normalized);
    }

    None
}

/// Split full text into sections keyed by canonical (or detected) heading
/// name. Text before the first detected heading is not included; the
/// abstract fallback in [`extract_abstract`] covers that region.
pub fn detect_sections(text: &str) -> BTreeMap<String, String> {
    let mut sections: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut body = String::new();

    for line in text.lines() {
        if let Some(name) = heading_name(line) {
            if let Some(section) = current.take() {
                push_section(&mut sections, section, &body);
            }
            body.clear();
            current = Some(name);
        } else if current.is_some() {
            body.push_str(line);
            body.push('\n');
        }
    }

    if let Some(section) = current {
        push_section(&mut sections, section, &body);
    }

    sections
}

fn push_section(sections: &mut BTreeMap<String, String>, name: String, body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    // Split headings (e.g. "results" appearing twice) concatenate.
    sections
        .entry(name)
        .and_modify(|existing| {
            existing.push_str("\n\n");
            existing.push_str(trimmed);
        })
        .or_insert_with(|| trimmed.to_string());
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Three-strategy abstract extraction.
pub fn extract_abstract(text: &str, sections: &BTreeMap<String, String>) -> Option<String> {
    // Strategy 1: explicit abstract header.
    if let Some(explicit) = sections.get(SECTION_ABSTRACT) {
        return Some(explicit.clone());
    }
    // Strategy 2: a summary header standing in for the abstract.
    if let Some(summary) = sections.get("summary") {
        return Some(summary.clone());
    }

    // Strategy 3: the block between the title/author lines and the
    // introduction heading, when it looks abstract-sized.
    let mut preamble = String::new();
    let mut lines = text.lines();

    // Skip the title/author block: leading non-empty lines up to the first
    // blank line.
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
    }

    for line in lines {
        if heading_name(line).is_some() {
            break;
        }
        preamble.push_str(line);
        preamble.push('\n');
    }

    let candidate = preamble.trim();
    let words = word_count(candidate);
    if (ABSTRACT_MIN_WORDS..=ABSTRACT_MAX_WORDS).contains(&words) {
        Some(candidate.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAPER: &str = "\
Deep Learning for Example Mining
A. Author, B. Author

Abstract
We present a method for mining examples from large corpora. The method
scales linearly and outperforms strong baselines on three benchmarks.

1. Introduction
Example mining is hard. Prior work has focused on small corpora.

2. Methods
We train a transformer on pairs of examples with contrastive loss.

3. Results and Discussion
Our method improves recall by 14 points over the best baseline.

IV. Conclusion
We presented a method for example mining.

REFERENCES
[1] Someone et al. 2019.
";

    #[test]
    fn detects_canonical_sections() {
        let sections = detect_sections(PAPER);
        assert!(sections.contains_key("abstract"));
        assert!(sections.contains_key("introduction"));
        assert!(sections.contains_key("methodology"));
        assert!(sections.contains_key("results"));
        assert!(sections.contains_key("conclusion"));
        assert!(sections.contains_key("references"));
    }

    #[test]
    fn bodies_attach_to_their_headings() {
        let sections = detect_sections(PAPER);
        assert!(sections["introduction"].contains("Example mining is hard"));
        assert!(sections["methodology"].contains("contrastive loss"));
        assert!(sections["results"].contains("14 points"));
    }

    #[test]
    fn numbered_heading_variants() {
        assert_eq!(heading_name("1. Introduction"), Some("introduction".into()));
        assert_eq!(heading_name("2.3 Results"), Some("results".into()));
        assert_eq!(heading_name("IV. Conclusion"), Some("conclusion".into()));
        assert_eq!(heading_name("ix) Methods"), Some("methodology".into()));
    }

    #[test]
    fn all_caps_line_is_heading() {
        assert_eq!(heading_name("RELATED WORK"), Some("related work".into()));
        assert_eq!(heading_name("THREAT MODEL"), Some("threat model".into()));
    }

    #[test]
    fn prose_lines_are_not_headings() {
        assert!(heading_name("We present a method for mining examples.").is_none());
        assert!(heading_name("the introduction of noise helps regularize training").is_none());
        assert!(heading_name("").is_none());
        // Too long to be a heading even in caps.
        let long_caps = "A VERY LONG LINE THAT KEEPS GOING WITH MANY WORDS IN IT AND MORE WORDS";
        assert!(heading_name(long_caps).is_none());
    }

    #[test]
    fn numbered_noncanonical_headings_are_kept() {
        let text = "1. Introduction\nBody one.\n2. Threat Model\nBody two.\n";
        let sections = detect_sections(text);
        assert!(sections.contains_key("introduction"));
        assert_eq!(sections["threat model"], "Body two.");
    }

    #[test]
    fn abstract_from_explicit_header() {
        let sections = detect_sections(PAPER);
        let abs = extract_abstract(PAPER, &sections).unwrap();
        assert!(abs.contains("mining examples"));
    }

    #[test]
    fn abstract_from_summary_header() {
        let text = "\
Title Line
Author Line

Summary
This paper summarizes itself admirably and at length.

1. Introduction
Body.
";
        let sections = detect_sections(text);
        let abs = extract_abstract(text, &sections).unwrap();
        assert!(abs.contains("admirably"));
    }

    #[test]
    fn abstract_position_fallback_requires_plausible_length() {
        // No abstract/summary header; preamble between authors and the
        // introduction is long enough to qualify.
        let filler = "word ".repeat(80);
        let text = format!(
            "Title Line\nAuthor Line\n\n{}\n1. Introduction\nBody.\n",
            filler
        );
        let sections = detect_sections(&text);
        assert!(extract_abstract(&text, &sections).is_some());

        // Too short to be an abstract.
        let text_short = "Title Line\nAuthor Line\n\nTiny preamble.\n1. Introduction\nBody.\n";
        let sections_short = detect_sections(text_short);
        assert!(extract_abstract(text_short, &sections_short).is_none());
    }

    #[test]
    fn duplicate_headings_concatenate() {
        let text = "Results\nFirst block.\nIntroduction\nMiddle.\nResults\nSecond block.\n";
        let sections = detect_sections(text);
        assert!(sections["results"].contains("First block."));
        assert!(sections["results"].contains("Second block."));
    }
}

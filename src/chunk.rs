//! Deterministic fixed-size chunker.
//!
//! Splits section text into character windows of `chunk_size` with
//! `chunk_overlap` characters shared between consecutive windows. A chunk
//! never crosses a section boundary; the residue at a section end is
//! emitted as a short final chunk rather than dropped. Chunk indices are
//! contiguous from 0 across the whole document.

use uuid::Uuid;

use crate::models::{Chunk, ChunkKind};

/// One span of input text to be chunked, tagged with its section.
pub struct SectionText<'a> {
    pub name: Option<&'a str>,
    pub text: &'a str,
    pub page: Option<i64>,
    pub kind: ChunkKind,
}

/// Chunk every section in order. Windows are computed over characters, not
/// bytes, so multi-byte text never splits mid-scalar.
pub fn chunk_document(
    document_id: i64,
    sections: &[SectionText<'_>],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Chunk> {
    debug_assert!(chunk_overlap < chunk_size);

    let mut chunks = Vec::new();
    let mut index: i64 = 0;

    for section in sections {
        let trimmed = section.text.trim();
        if trimmed.is_empty() {
            continue;
        }

        let chars: Vec<char> = trimmed.chars().collect();
        let step = chunk_size - chunk_overlap;
        let mut start = 0usize;

        loop {
            let end = (start + chunk_size).min(chars.len());
            let text: String = chars[start..end].iter().collect();
            chunks.push(make_chunk(document_id, index, text, section));
            index += 1;

            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    chunks
}

fn make_chunk(document_id: i64, index: i64, text: String, section: &SectionText<'_>) -> Chunk {
    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id,
        chunk_index: index,
        text,
        section: section.name.map(|s| s.to_string()),
        page: section.page,
        kind: section.kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(text: &str) -> SectionText<'_> {
        SectionText {
            name: None,
            text,
            page: None,
            kind: ChunkKind::Text,
        }
    }

    fn named<'a>(name: &'a str, text: &'a str) -> SectionText<'a> {
        SectionText {
            name: Some(name),
            text,
            page: None,
            kind: ChunkKind::Text,
        }
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_document(1, &[plain("Hello, world!")], 500, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_document(1, &[], 500, 50).is_empty());
        assert!(chunk_document(1, &[plain("   \n  ")], 500, 50).is_empty());
    }

    #[test]
    fn windows_overlap_by_configured_amount() {
        let text: String = ('a'..='z').cycle().take(120).collect();
        let chunks = chunk_document(1, &[plain(&text)], 100, 20);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text.chars().count(), 100);
        // Second window starts at 80: tail of chunk 0 == head of chunk 1.
        let tail: String = chunks[0].text.chars().skip(80).collect();
        let head: String = chunks[1].text.chars().take(20).collect();
        assert_eq!(tail, head);
    }

    #[test]
    fn residue_shorter_than_overlap_still_emitted() {
        // 105 chars, size 100, overlap 20: second window is 80..105.
        let text: String = std::iter::repeat('x').take(105).collect();
        let chunks = chunk_document(1, &[plain(&text)], 100, 20);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text.chars().count(), 25);
    }

    #[test]
    fn chunks_never_cross_sections() {
        let intro: String = std::iter::repeat('i').take(150).collect();
        let methods: String = std::iter::repeat('m').take(150).collect();
        let chunks = chunk_document(
            1,
            &[named("introduction", &intro), named("methodology", &methods)],
            100,
            20,
        );
        for chunk in &chunks {
            let distinct: std::collections::HashSet<char> = chunk.text.chars().collect();
            assert_eq!(distinct.len(), 1, "chunk mixes sections: {:?}", chunk.section);
        }
        assert_eq!(chunks[0].section.as_deref(), Some("introduction"));
        assert_eq!(chunks.last().unwrap().section.as_deref(), Some("methodology"));
    }

    #[test]
    fn indices_contiguous_across_sections() {
        let a: String = std::iter::repeat('a').take(350).collect();
        let b: String = std::iter::repeat('b').take(350).collect();
        let chunks = chunk_document(7, &[named("results", &a), named("conclusion", &b)], 100, 10);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i64);
            assert_eq!(chunk.document_id, 7);
        }
    }

    #[test]
    fn multibyte_text_splits_cleanly() {
        let text: String = std::iter::repeat('λ').take(130).collect();
        let chunks = chunk_document(1, &[plain(&text)], 100, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text.chars().count(), 100);
        assert_eq!(chunks[1].text.chars().count(), 40);
    }

    #[test]
    fn deterministic_apart_from_ids() {
        let text: String = ('a'..='z').cycle().take(400).collect();
        let first = chunk_document(1, &[plain(&text)], 120, 30);
        let second = chunk_document(1, &[plain(&text)], 120, 30);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }
}

use crate::models::{Chunk, ContentKind, ContentUnit, IMAGE_PLACEHOLDER};

const SENTENCE_DELIMITER: &str = ". ";

/// Splits `text` into sentence-aligned chunks shorter than `max_chars` characters.
///
/// Sentences are approximated by the literal `". "` delimiter, packed greedily,
/// and each one gets `". "` back. Only the final sentence of the text is spared
/// a second period when it already ends in `.`. A sentence that is longer than
/// `max_chars` on its own is kept whole, so the bound is best-effort.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let flattened = text.replace("\r\n", " ").replace(['\n', '\r'], " ");
    let sentences: Vec<&str> = flattened.split(SENTENCE_DELIMITER).collect();
    let last = sentences.len().saturating_sub(1);

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for (position, sentence) in sentences.into_iter().enumerate() {
        let is_last = position == last;
        if is_last && sentence.trim().is_empty() {
            break;
        }

        let sentence_len = sentence.chars().count();
        if current_len + sentence_len + SENTENCE_DELIMITER.len() >= max_chars {
            flush(&mut chunks, &current);
            current.clear();
            current_len = 0;
        }

        current.push_str(sentence);
        current_len += sentence_len;
        if !(is_last && sentence.ends_with('.')) {
            current.push_str(SENTENCE_DELIMITER);
            current_len += SENTENCE_DELIMITER.len();
        }
    }

    flush(&mut chunks, &current);
    chunks
}

/// Turns content units into embeddable chunks, preserving unit order.
///
/// Text and table units go through [`chunk_text`]; every image unit becomes
/// exactly one chunk holding its OCR text, or `"[image]"` when OCR found nothing.
pub fn chunk_units(units: Vec<ContentUnit>, max_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for unit in units {
        let (kind, text, image_payload, page, source) = unit.into_parts();
        match kind {
            ContentKind::Text | ContentKind::Table => {
                chunks.extend(chunk_text(&text, max_chars).into_iter().map(|piece| Chunk {
                    text: piece,
                    kind,
                    page,
                    source: source.clone(),
                    image_payload: None,
                }));
            }
            ContentKind::Image => {
                let text = if text.trim().is_empty() {
                    IMAGE_PLACEHOLDER.to_string()
                } else {
                    text
                };
                chunks.push(Chunk {
                    text,
                    kind,
                    page,
                    source,
                    image_payload,
                });
            }
        }
    }

    chunks
}

fn flush(chunks: &mut Vec<String>, buffer: &str) {
    let trimmed = buffer.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("Cats are mammals. Dogs are mammals too.", 1_500);
        assert_eq!(chunks, vec!["Cats are mammals. Dogs are mammals too.".to_string()]);
    }

    #[test]
    fn sentences_are_packed_below_the_limit() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota. Kappa lambda mu.";
        let chunks = chunk_text(text, 40);

        assert_eq!(
            chunks,
            vec![
                "Alpha beta gamma. Delta epsilon zeta.".to_string(),
                "Eta theta iota. Kappa lambda mu.".to_string(),
            ]
        );
        assert!(chunks.iter().all(|chunk| chunk.chars().count() < 40));
    }

    #[test]
    fn oversized_sentence_is_kept_whole() {
        let long = "x".repeat(60);
        let text = format!("Short one. {long}. Tail here.");
        let chunks = chunk_text(&text, 30);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "Short one.");
        assert_eq!(chunks[1], format!("{long}."));
        assert_eq!(chunks[2], "Tail here.");
    }

    #[test]
    fn newlines_are_flattened() {
        let chunks = chunk_text("Line one\ncontinues. Line two.", 1_500);
        assert_eq!(chunks, vec!["Line one continues. Line two.".to_string()]);
    }

    #[test]
    fn whitespace_only_text_yields_nothing() {
        assert!(chunk_text("   \n  ", 1_500).is_empty());
        assert!(chunk_text("", 1_500).is_empty());
    }

    #[test]
    fn ellipses_inside_the_text_keep_every_period() {
        assert_eq!(chunk_text("I waited... Then left.", 1_500), vec!["I waited... Then left.".to_string()]);
        assert_eq!(chunk_text("Wait.. what. Done", 1_500), vec!["Wait.. what. Done.".to_string()]);
    }

    #[test]
    fn empty_pieces_between_delimiters_are_kept() {
        assert_eq!(chunk_text("One. . Two.", 1_500), vec!["One. . Two.".to_string()]);
    }

    #[test]
    fn trailing_delimiter_adds_nothing() {
        assert_eq!(chunk_text("One. Two. ", 1_500), vec!["One. Two.".to_string()]);
    }

    #[test]
    fn chunking_is_idempotent() {
        let text = "One. Two two. Three three three. ".repeat(40);
        assert_eq!(chunk_text(&text, 100), chunk_text(&text, 100));
    }

    #[test]
    fn length_bound_holds_for_regular_sentences() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(200);
        let chunks = chunk_text(&text, 300);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() < 300));
    }

    #[test]
    fn image_units_without_ocr_text_use_placeholder() {
        let units = vec![
            ContentUnit::text("Hello there. General Kenobi.", 1, "a.pdf"),
            ContentUnit::image("  \u{000c}", vec![1, 2, 3], 1, "a.pdf"),
            ContentUnit::image("Figure 1", vec![4], 2, "a.pdf"),
        ];

        let chunks = chunk_units(units, 1_500);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].kind, ContentKind::Text);
        assert!(chunks[0].image_payload.is_none());
        assert_eq!(chunks[1].text, IMAGE_PLACEHOLDER);
        assert_eq!(chunks[1].image_payload.as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(chunks[2].text, "Figure 1");
        assert_eq!(chunks[2].page, 2);
    }
}

//! Fixed-window chunking with overlap.
//!
//! Sizes and offsets are counted in `char`s so a boundary never lands inside a UTF-8 sequence.
//! Chunk `i` starts `size - overlap` characters after chunk `i - 1`; only the final chunk may
//! be shorter than `size`, and the window stops as soon as a chunk reaches the end of the text.

use super::types::ChunkingError;

/// Separator placed between page texts before chunking.
pub const PAGE_SEPARATOR: &str = "\n";

/// Join page texts in order with [`PAGE_SEPARATOR`].
pub fn join_pages<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

/// Split `text` into overlapping windows of `size` characters.
///
/// Returns an empty vector for empty text and a single chunk for text no longer than `size`.
/// `size == 0` and `overlap >= size` are rejected rather than clamped.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<String>, ChunkingError> {
    if size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if overlap >= size {
        return Err(ChunkingError::OverlapTooLarge { overlap, size });
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;
    let stride = size - overlap;

    let mut chunks = Vec::with_capacity(char_count.div_ceil(stride));
    let mut start = 0;
    loop {
        let end = (start + size).min(char_count);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());
        if end == char_count {
            break;
        }
        start += stride;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(chunks: &[String], overlap: usize) -> String {
        let mut text = String::new();
        for (index, chunk) in chunks.iter().enumerate() {
            if index == 0 {
                text.push_str(chunk);
            } else {
                text.extend(chunk.chars().skip(overlap));
            }
        }
        text
    }

    #[test]
    fn splits_with_overlap() {
        let chunks = chunk_text("ABCDEFGHIJ", 4, 1).expect("chunks");
        assert_eq!(chunks, vec!["ABCD", "DEFG", "GHIJ"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 4, 1).expect("chunks").is_empty());
    }

    #[test]
    fn short_text_yields_single_chunk() {
        assert_eq!(chunk_text("ABC", 4, 1).expect("chunks"), vec!["ABC"]);
        assert_eq!(chunk_text("ABCD", 4, 1).expect("chunks"), vec!["ABCD"]);
    }

    #[test]
    fn final_chunk_may_be_short() {
        let chunks = chunk_text("ABCDEFGHIJK", 4, 1).expect("chunks");
        assert_eq!(chunks, vec!["ABCD", "DEFG", "GHIJ", "JK"]);
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(matches!(
            chunk_text("abc", 0, 0),
            Err(ChunkingError::InvalidChunkSize)
        ));
        assert!(matches!(
            chunk_text("abc", 3, 3),
            Err(ChunkingError::OverlapTooLarge { overlap: 3, size: 3 })
        ));
        assert!(chunk_text("abc", 3, 4).is_err());
    }

    #[test]
    fn chunks_reconstruct_the_text() {
        let text = "The quick brown fox jumps over the lazy dog.\nSecond page: ünïcödé ✓ text.";
        for (size, overlap) in [(1, 0), (5, 0), (5, 2), (7, 6), (500, 20), (13, 4)] {
            let chunks = chunk_text(text, size, overlap).expect("chunks");
            assert_eq!(reconstruct(&chunks, overlap), text, "size={size} overlap={overlap}");
            let (last, rest) = chunks.split_last().expect("non-empty");
            for chunk in rest {
                assert_eq!(chunk.chars().count(), size);
            }
            assert!(last.chars().count() <= size);
        }
    }

    #[test]
    fn multibyte_boundaries_are_respected() {
        let chunks = chunk_text("ééééé", 2, 1).expect("chunks");
        assert_eq!(chunks, vec!["éé", "éé", "éé", "éé"]);
    }

    #[test]
    fn pages_join_with_newline() {
        assert_eq!(join_pages(&["one", "", "three"]), "one\n\nthree");
        assert_eq!(join_pages::<String>(&[]), "");
    }
}

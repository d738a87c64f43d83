/// Split text into overlapping segments for embedding.
///
/// Each chunk holds at most `size` characters; consecutive chunks share
/// exactly `overlap` characters so context survives the boundary. The final
/// chunk may be shorter and carries no trailing overlap. Operates on chars,
/// so multi-byte text never splits inside a code point.
pub fn chunk(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if size == 0 || text.is_empty() {
        return Vec::new();
    }
    let step = size.saturating_sub(overlap).max(1);

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CHUNK_OVERLAP, CHUNK_SIZE};

    #[test]
    fn consecutive_chunks_share_exactly_the_overlap() {
        let text: String = ('a'..='z').cycle().take(4500).collect();
        let chunks = chunk(&text, CHUNK_SIZE, CHUNK_OVERLAP);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 2000);
        assert_eq!(chunks[1].chars().count(), 2000);
        // Starts walk in steps of size - overlap, so the tail picks up
        // whatever remains past 3600.
        assert_eq!(chunks[2].chars().count(), 900);

        for pair in chunks.windows(2) {
            let head: Vec<char> = pair[0].chars().collect();
            let tail_of_head: String = head[head.len() - CHUNK_OVERLAP..].iter().collect();
            let start_of_next: String = pair[1].chars().take(CHUNK_OVERLAP).collect();
            assert_eq!(tail_of_head, start_of_next);
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk("just a headline", CHUNK_SIZE, CHUNK_OVERLAP);
        assert_eq!(chunks, vec!["just a headline".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk("", CHUNK_SIZE, CHUNK_OVERLAP).is_empty());
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text: String = "é".repeat(25);
        let chunks = chunk(&text, 10, 2);
        assert_eq!(chunks[0].chars().count(), 10);
        for c in &chunks {
            assert!(c.chars().all(|ch| ch == 'é'));
        }
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let text: String = "x".repeat(2000);
        let chunks = chunk(&text, CHUNK_SIZE, CHUNK_OVERLAP);
        assert_eq!(chunks.len(), 1);
    }
}

//! Recursive character splitter.
//!
//! Text is cut into pieces along the coarsest separator available (paragraph
//! break, line break, space, then single characters). A piece longer than
//! `(chunk_size - chunk_overlap) / 2` chars (400 with the defaults, or
//! `chunk_size` when there is no overlap) is cut again with the finer
//! separators. So a 900-char paragraph is broken at spaces even though it
//! would fit in one chunk, and chunk boundaries can fall inside paragraphs
//! that are shorter than `chunk_size`. The pieces are then merged back, in
//! document order, into chunks of at most `chunk_size` characters where every
//! chunk restarts inside the tail of the previous one.
//!
//! Lengths are counted in chars. Chunk texts are exact slices of the input, so
//! the overlap between two neighbours can be checked through `start_index`.

use std::ops::Range;

use crate::error::{Error, Result};
use crate::types::{Chunk, Meta, PageText, META_START_INDEX};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Coarsest first. The empty separator means "split into chars".
pub const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Byte span of the input plus its length in chars.
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    chars: usize,
}

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE, chunk_overlap: DEFAULT_CHUNK_OVERLAP }
    }
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be greater than 0".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    pub fn chunk_size(&self) -> usize { self.chunk_size }

    pub fn chunk_overlap(&self) -> usize { self.chunk_overlap }

    /// Split `text` into ordered chunks, each carrying `metadata` plus its `start_index`.
    pub fn split(&self, text: &str, metadata: &Meta) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let mut pieces = Vec::new();
        self.split_recursive(text, 0, &SEPARATORS, &mut pieces);
        self.merge(text, &pieces, metadata)
    }

    /// `split` applied to every unit, flattened in order.
    pub fn split_units(&self, units: &[PageText]) -> Vec<Chunk> {
        units.iter().flat_map(|unit| self.split(&unit.text, &unit.metadata)).collect()
    }

    /// Largest piece the merge step accepts. Keeping pieces at or below half of
    /// the non-overlapping budget means a tail covering `chunk_overlap` chars
    /// plus the next piece always fits in a new chunk.
    fn piece_limit(&self) -> usize {
        if self.chunk_overlap == 0 {
            self.chunk_size
        } else {
            ((self.chunk_size - self.chunk_overlap) / 2).max(1)
        }
    }

    fn split_recursive(&self, text: &str, offset: usize, separators: &[&str], out: &mut Vec<Piece>) {
        let limit = self.piece_limit();
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(*sep));
        let Some(position) = position else {
            out.push(Piece { start: offset, end: offset + text.len(), chars: text.chars().count() });
            return;
        };
        let separator = separators[position];
        let finer = &separators[position + 1..];

        if separator.is_empty() {
            for (i, c) in text.char_indices() {
                out.push(Piece { start: offset + i, end: offset + i + c.len_utf8(), chars: 1 });
            }
            return;
        }

        for range in segments(text, separator) {
            let segment = &text[range.clone()];
            let chars = segment.chars().count();
            if chars <= limit || finer.is_empty() {
                out.push(Piece { start: offset + range.start, end: offset + range.end, chars });
            } else {
                self.split_recursive(segment, offset + range.start, finer, out);
            }
        }
    }

    fn merge(&self, text: &str, pieces: &[Piece], metadata: &Meta) -> Vec<Chunk> {
        let mut char_starts = Vec::with_capacity(pieces.len());
        let mut position = 0usize;
        for piece in pieces {
            char_starts.push(position);
            position += piece.chars;
        }

        let mut chunks = Vec::new();
        let mut first = 0usize;
        while first < pieces.len() {
            let mut last = first;
            let mut len = pieces[first].chars;
            while last + 1 < pieces.len() && len + pieces[last + 1].chars <= self.chunk_size {
                last += 1;
                len += pieces[last].chars;
            }

            let body = &text[pieces[first].start..pieces[last].end];
            if !body.trim().is_empty() {
                let mut meta = metadata.clone();
                meta.insert(META_START_INDEX.to_string(), serde_json::Value::from(char_starts[first]));
                chunks.push(Chunk::new(body, meta));
            }
            if last + 1 >= pieces.len() {
                break;
            }

            // Walk back over the tail until it covers the overlap; never back to `first`.
            let mut next = last + 1;
            let mut carried = 0usize;
            while next > first + 1 && carried < self.chunk_overlap {
                next -= 1;
                carried += pieces[next].chars;
            }
            first = next;
        }
        chunks
    }
}

/// Byte ranges of `text` cut after every occurrence of `separator`.
fn segments(text: &str, separator: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0usize;
    for (i, _) in text.match_indices(separator) {
        let end = i + separator.len();
        ranges.push(start..end);
        start = end;
    }
    if start < text.len() {
        ranges.push(start..text.len());
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_keep_separator_on_the_left() {
        let text = "a b  c";
        let parts: Vec<&str> = segments(text, " ").into_iter().map(|r| &text[r]).collect();
        assert_eq!(parts, vec!["a ", "b ", " ", "c"]);
    }

    #[test]
    fn pieces_tile_the_input() {
        let splitter = TextSplitter::new(20, 4).expect("splitter");
        let text = "first paragraph here\n\nsecond one is a good deal longer than the limit\nand wraps";
        let mut pieces = Vec::new();
        splitter.split_recursive(text, 0, &SEPARATORS, &mut pieces);
        let mut cursor = 0;
        for p in &pieces {
            assert_eq!(p.start, cursor);
            assert!(p.chars <= splitter.piece_limit());
            cursor = p.end;
        }
        assert_eq!(cursor, text.len());
    }

    #[test]
    fn piece_limit_is_half_the_non_overlapping_budget() {
        assert_eq!(TextSplitter::default().piece_limit(), 400);
        assert_eq!(TextSplitter::new(100, 0).expect("splitter").piece_limit(), 100);
        assert_eq!(TextSplitter::new(10, 9).expect("splitter").piece_limit(), 1);
    }

    #[test]
    fn paragraph_over_the_piece_limit_is_split_at_spaces() {
        let splitter = TextSplitter::default();
        let mut paragraph = String::new();
        while paragraph.len() < 900 {
            paragraph.push_str("hay bales stack ");
        }
        let text = format!("{}\n\nshort closing paragraph", paragraph.trim_end());
        let mut pieces = Vec::new();
        splitter.split_recursive(&text, 0, &SEPARATORS, &mut pieces);
        let in_first: Vec<_> = pieces.iter().filter(|p| p.end <= paragraph.trim_end().len() + 2).collect();
        assert!(in_first.len() > 1, "first paragraph was kept whole");
        assert!(pieces.iter().all(|p| p.chars <= 400));
    }
}

use docqa_core::chunker::TextSplitter;
use docqa_core::types::{Chunk, Meta};
use docqa_core::Error;

fn sample_text(words: usize) -> String {
    let vocab = ["alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliet"];
    let mut out = String::new();
    for i in 0..words {
        if i > 0 {
            if i % 97 == 0 {
                out.push_str("\n\n");
            } else if i % 31 == 0 {
                out.push('\n');
            } else {
                out.push(' ');
            }
        }
        if i % 211 == 0 {
            // an unbreakable token longer than small chunk sizes
            out.push_str(&"z".repeat(150));
        } else {
            out.push_str(vocab[i % vocab.len()]);
        }
    }
    out
}

fn char_len(s: &str) -> usize { s.chars().count() }

fn assert_chunk_invariants(chunks: &[Chunk], chunk_size: usize, chunk_overlap: usize) {
    for c in chunks {
        assert!(
            char_len(&c.text) <= chunk_size,
            "chunk of {} chars exceeds size {}",
            char_len(&c.text),
            chunk_size
        );
    }
    for pair in chunks.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let a_start = a.start_index().expect("start_index");
        let b_start = b.start_index().expect("start_index");
        assert!(b_start > a_start, "chunks must advance through the document");
        let a_end = a_start + char_len(&a.text);
        assert!(a_end >= b_start, "consecutive chunks must not leave a gap");
        let shared = a_end - b_start;
        assert!(shared >= chunk_overlap, "overlap {shared} is below {chunk_overlap}");
        let a_tail: String = a.text.chars().skip(char_len(&a.text) - shared).collect();
        let b_head: String = b.text.chars().take(shared).collect();
        assert_eq!(a_tail, b_head, "overlapping text must match");
    }
}

#[test]
fn empty_and_whitespace_text_produce_no_chunks() {
    let splitter = TextSplitter::default();
    assert!(splitter.split("", &Meta::new()).is_empty());
    assert!(splitter.split("   \n\n\t  \n", &Meta::new()).is_empty());
}

#[test]
fn rejects_overlap_not_smaller_than_size() {
    assert!(matches!(TextSplitter::new(100, 100), Err(Error::InvalidConfig(_))));
    assert!(matches!(TextSplitter::new(0, 0), Err(Error::InvalidConfig(_))));
    assert!(TextSplitter::new(100, 99).is_ok());
}

#[test]
fn size_ceiling_and_overlap_hold_across_parameters() {
    let text = sample_text(2500);
    for (size, overlap) in [(1000, 200), (300, 50), (120, 40), (64, 0), (50, 49), (10, 3)] {
        let splitter = TextSplitter::new(size, overlap).expect("splitter");
        let chunks = splitter.split(&text, &Meta::new());
        assert!(chunks.len() > 1, "size {size} should need several chunks");
        assert_chunk_invariants(&chunks, size, overlap);
    }
}

#[test]
fn short_text_is_a_single_chunk() {
    let splitter = TextSplitter::default();
    let chunks = splitter.split("Short text", &Meta::new());
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "Short text");
    assert_eq!(chunks[0].start_index(), Some(0));
}

#[test]
fn prefers_paragraph_boundaries() {
    let para1 = "a".repeat(20) + " " + &"b".repeat(20);
    let para2 = "c".repeat(20) + " " + &"d".repeat(20);
    let text = format!("{para1}\n\n{para2}");
    let splitter = TextSplitter::new(60, 0).expect("splitter");
    let chunks = splitter.split(&text, &Meta::new());
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text.trim_end(), para1);
    assert_eq!(chunks[1].text, para2);
}

#[test]
fn metadata_is_carried_to_every_chunk() {
    let mut meta = Meta::new();
    meta.insert("source".into(), "notes.txt".into());
    meta.insert("page".into(), 3.into());
    let splitter = TextSplitter::new(100, 20).expect("splitter");
    let chunks = splitter.split(&sample_text(300), &meta);
    assert!(chunks.len() > 1);
    for c in &chunks {
        assert_eq!(c.source(), Some("notes.txt"));
        assert_eq!(c.page(), Some(3));
        assert!(c.start_index().is_some());
    }
}

#[test]
fn counts_characters_not_bytes() {
    let text = "héllo wörld ñandú ".repeat(40);
    let splitter = TextSplitter::new(50, 10).expect("splitter");
    let chunks = splitter.split(&text, &Meta::new());
    assert_chunk_invariants(&chunks, 50, 10);
    // multi-byte text still fills chunks close to the char limit
    assert!(char_len(&chunks[0].text) > 30);
}

//! Markdown chunking for knowledge ingestion: ~500-char chunks that respect
//! paragraph boundaries.

/// Target chunk size in characters. Paragraphs are packed until the next one
/// would overflow; a single oversized paragraph becomes its own chunk split
/// at the cap.
pub const CHUNK_TARGET_CHARS: usize = 500;

/// One chunk with its 1-based line span in the source document.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
}

struct Paragraph {
    text: String,
    start_line: usize,
    end_line: usize,
}

fn paragraphs(input: &str) -> Vec<Paragraph> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut start_line = 1usize;
    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(Paragraph {
                    text: current.join("\n"),
                    start_line,
                    end_line: line_no - 1,
                });
                current.clear();
            }
            start_line = line_no + 1;
        } else {
            if current.is_empty() {
                start_line = line_no;
            }
            current.push(line);
        }
    }
    if !current.is_empty() {
        let end_line = input.lines().count();
        out.push(Paragraph {
            text: current.join("\n"),
            start_line,
            end_line,
        });
    }
    out
}

/// Splits a document into chunks of roughly [`CHUNK_TARGET_CHARS`].
pub fn chunk_markdown(input: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut span: Option<(usize, usize)> = None;

    let flush = |chunks: &mut Vec<Chunk>, buffer: &mut String, span: &mut Option<(usize, usize)>| {
        if let Some((start, end)) = span.take() {
            let text = std::mem::take(buffer);
            if !text.trim().is_empty() {
                chunks.push(Chunk {
                    text,
                    start_line: start,
                    end_line: end,
                });
            }
        }
    };

    for para in paragraphs(input) {
        if para.text.chars().count() > CHUNK_TARGET_CHARS {
            // Oversized paragraph: flush the buffer, then hard-split it.
            flush(&mut chunks, &mut buffer, &mut span);
            let chars: Vec<char> = para.text.chars().collect();
            for piece in chars.chunks(CHUNK_TARGET_CHARS) {
                chunks.push(Chunk {
                    text: piece.iter().collect(),
                    start_line: para.start_line,
                    end_line: para.end_line,
                });
            }
            continue;
        }
        let would_be = buffer.chars().count() + para.text.chars().count() + 2;
        if span.is_some() && would_be > CHUNK_TARGET_CHARS {
            flush(&mut chunks, &mut buffer, &mut span);
        }
        match span {
            Some((start, _)) => {
                buffer.push_str("\n\n");
                buffer.push_str(&para.text);
                span = Some((start, para.end_line));
            }
            None => {
                buffer.push_str(&para.text);
                span = Some((para.start_line, para.end_line));
            }
        }
    }
    flush(&mut chunks, &mut buffer, &mut span);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_nothing() {
        assert!(chunk_markdown("").is_empty());
        assert!(chunk_markdown("\n\n\n").is_empty());
    }

    #[test]
    fn small_paragraphs_pack_into_one_chunk() {
        let chunks = chunk_markdown("first paragraph\n\nsecond paragraph");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("first"));
        assert!(chunks[0].text.contains("second"));
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn paragraph_boundaries_are_respected() {
        let p1 = "a".repeat(300);
        let p2 = "b".repeat(300);
        let doc = format!("{}\n\n{}", p1, p2);
        let chunks = chunk_markdown(&doc);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.chars().all(|c| c == 'a'));
        assert!(chunks[1].text.chars().all(|c| c == 'b'));
    }

    #[test]
    fn oversized_paragraph_is_hard_split() {
        let doc = "x".repeat(CHUNK_TARGET_CHARS * 2 + 10);
        let chunks = chunk_markdown(&doc);
        assert_eq!(chunks.len(), 3);
        assert!(chunks
            .iter()
            .all(|c| c.text.chars().count() <= CHUNK_TARGET_CHARS));
    }

    #[test]
    fn line_spans_track_source() {
        let doc = "one\ntwo\n\nthree";
        let chunks = chunk_markdown(doc);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 4);
    }
}

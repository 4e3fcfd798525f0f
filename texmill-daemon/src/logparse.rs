//! Incremental parsing of the engine's diagnostic (log) stream.
//!
//! The stream arrives in arbitrary pipe-sized chunks. Stage one
//! reassembles complete lines; stage two classifies them into page
//! markers, error blocks and the fatal sentinel. Results are independent
//! of how the stream was chunked.

/// Lines accumulated per error block before it is emitted.
const MAX_ERROR_LINES: usize = 3;

/// The line TeX prints when it gives up after its hundredth error.
pub const FATAL_SENTINEL: &str = "(That makes 100 errors; please try again.)";

/// One classified event from the diagnostic stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TexEvent {
    /// The engine finished shipping out page `n`.
    PageDone(u32),
    /// An error block (joined lines, leading `!` stripped).
    Error(String),
    /// The fatal sentinel line.
    Fatal(String),
}

/// Diagnostics the session watcher hands to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A page completed, with the error lines logged while building it.
    Page {
        number: u32,
        errors: Vec<String>,
    },
    /// The engine declared itself unusable.
    Fatal {
        errors: Vec<String>,
    },
}

/// Stage one: byte chunks in, complete lines out.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    /// Append a chunk and drain the complete lines it closes. The
    /// trailing partial line stays buffered for the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(nl) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(nl + 1);
            self.buf.pop();
            lines.push(String::from_utf8_lossy(&self.buf).into_owned());
            self.buf = rest;
        }
        lines
    }
}

/// Stage two: line classification.
#[derive(Debug)]
pub struct Classifier {
    /// Highest page number seen; markers must strictly increase.
    page: u32,
    /// Open error block, when a `!` line has been seen.
    block: Option<Vec<String>>,
    sentinel: String,
}

impl Classifier {
    /// Classifier with the given fatal sentinel line.
    #[must_use]
    pub fn new(sentinel: &str) -> Self {
        Self {
            page: 0,
            block: None,
            sentinel: sentinel.to_owned(),
        }
    }

    /// Classify one complete line into zero or more events.
    pub fn classify(&mut self, line: &str) -> Vec<TexEvent> {
        if let Some(block) = self.block.as_mut() {
            block.push(line.to_owned());
            if block.len() >= MAX_ERROR_LINES {
                let joined = block.join("\n");
                self.block = None;
                return vec![TexEvent::Error(joined)];
            }
            return Vec::new();
        }

        if let Some(rest) = line.strip_prefix('!') {
            self.block = Some(vec![rest.to_owned()]);
            return Vec::new();
        }

        if line == self.sentinel {
            return vec![TexEvent::Fatal(line.to_owned())];
        }

        let mut events = Vec::new();
        for n in page_markers(line) {
            if n > self.page {
                self.page = n;
                events.push(TexEvent::PageDone(n));
            }
        }
        events
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(FATAL_SENTINEL)
    }
}

/// Extract the `[<digits>]` page markers from a line, left to right.
/// Whitespace may sit between the digits and the closing bracket.
fn page_markers(line: &str) -> Vec<u32> {
    let bytes = line.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'[' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut j = start;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j == start {
            i += 1;
            continue;
        }
        let mut k = j;
        while k < bytes.len() && (bytes[k] == b' ' || bytes[k] == b'\t') {
            k += 1;
        }
        if k < bytes.len() && bytes[k] == b']' {
            if let Ok(n) = line[start..j].parse() {
                out.push(n);
            }
            i = k + 1;
        } else {
            i += 1;
        }
    }
    out
}

/// The composed two-stage parser.
#[derive(Debug)]
pub struct LogParser {
    lines: LineAssembler,
    classifier: Classifier,
}

impl LogParser {
    /// Parser with the given fatal sentinel line.
    #[must_use]
    pub fn new(sentinel: &str) -> Self {
        Self {
            lines: LineAssembler::default(),
            classifier: Classifier::new(sentinel),
        }
    }

    /// Feed a chunk of engine output, draining the events it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<TexEvent> {
        self.lines
            .push(chunk)
            .iter()
            .flat_map(|line| self.classifier.classify(line))
            .collect()
    }
}

impl Default for LogParser {
    fn default() -> Self {
        Self::new(FATAL_SENTINEL)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_retains_the_trailing_partial() {
        let mut asm = LineAssembler::default();
        assert!(asm.push(b"he").is_empty(), "no newline, no line");
        assert_eq!(asm.push(b"llo\nwor"), vec!["hello".to_owned()]);
        assert_eq!(asm.push(b"ld\n\n"), vec!["world".to_owned(), String::new()]);
    }

    #[test]
    fn markers_parse_with_internal_whitespace() {
        assert_eq!(page_markers("[1] foo [23 ] [x] [45"), vec![1, 23]);
        assert_eq!(page_markers("no markers here"), Vec::<u32>::new());
    }

    #[test]
    fn page_numbers_must_strictly_increase() {
        let mut c = Classifier::default();
        assert_eq!(
            c.classify("[1] [1] [2]"),
            vec![TexEvent::PageDone(1), TexEvent::PageDone(2)]
        );
        assert!(c.classify("[2]").is_empty(), "repeats are dropped");
        assert_eq!(c.classify("[5]"), vec![TexEvent::PageDone(5)]);
    }

    #[test]
    fn stale_markers_between_fresh_ones_are_dropped() {
        let mut c = Classifier::default();
        assert_eq!(
            c.classify("[3] [2] [4]"),
            vec![TexEvent::PageDone(3), TexEvent::PageDone(4)],
            "the bar rises as markers are consumed left to right"
        );
    }

    #[test]
    fn error_block_emits_after_three_lines() {
        let mut c = Classifier::default();
        assert!(c.classify("! Undefined control sequence.").is_empty());
        assert!(c.classify("l.5 \\badmacro").is_empty());
        assert_eq!(
            c.classify("The control sequence was never defined."),
            vec![TexEvent::Error(
                " Undefined control sequence.\nl.5 \\badmacro\n\
                 The control sequence was never defined."
                    .to_owned()
            )]
        );
        // The block is closed; markers classify normally again.
        assert_eq!(c.classify("[1]"), vec![TexEvent::PageDone(1)]);
    }

    #[test]
    fn markers_inside_an_error_block_do_not_count_as_pages() {
        let mut c = Classifier::default();
        assert!(c.classify("! boom").is_empty());
        assert!(c.classify("[1]").is_empty(), "swallowed into the block");
        let events = c.classify("last");
        assert!(matches!(events.as_slice(), [TexEvent::Error(_)]));
        assert_eq!(c.classify("[1]"), vec![TexEvent::PageDone(1)]);
    }

    #[test]
    fn fatal_sentinel_is_detected() {
        let mut c = Classifier::default();
        assert_eq!(
            c.classify(FATAL_SENTINEL),
            vec![TexEvent::Fatal(FATAL_SENTINEL.to_owned())]
        );
    }

    #[test]
    fn custom_sentinel_replaces_the_default() {
        let mut c = Classifier::new("GAME OVER");
        assert!(c.classify(FATAL_SENTINEL).is_empty());
        assert_eq!(
            c.classify("GAME OVER"),
            vec![TexEvent::Fatal("GAME OVER".to_owned())]
        );
    }

    #[test]
    fn chunk_boundaries_do_not_change_the_events() {
        let mut p = LogParser::default();
        let mut events = Vec::new();
        events.extend(p.push(b"[1"));
        events.extend(p.push(b"] text\n! Undefined"));
        events.extend(p.push(b" control sequence\nmore\nmore\n"));
        assert_eq!(
            events,
            vec![
                TexEvent::PageDone(1),
                TexEvent::Error(
                    " Undefined control sequence\nmore\nmore".to_owned()
                ),
            ]
        );
    }
}

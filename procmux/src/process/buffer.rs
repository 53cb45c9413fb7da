//! Framing of drained output into records.
//!
//! Framing is chunk-local: every non-empty chunk read in one drain is trimmed
//! and split on its own. A line that straddles two drains is therefore stored
//! as two records, and callers rely on that exact behavior.

/// How raw bytes read from a child are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BufferMode {
    /// Each chunk is trimmed and split on `\n`; every piece is one record.
    #[default]
    Line,
    /// Bytes are appended verbatim to a single growing buffer.
    Binary,
}

/// Bytes stripped from both ends of a chunk before it becomes records.
const TRIMMED: &[u8] = b" \t\n\r\0\x0B";

/// Strip surrounding whitespace (and NUL) from a raw chunk.
pub fn trim_record(chunk: &[u8]) -> &[u8] {
    let start = chunk
        .iter()
        .position(|b| !TRIMMED.contains(b))
        .unwrap_or(chunk.len());
    let end = chunk
        .iter()
        .rposition(|b| !TRIMMED.contains(b))
        .map_or(start, |i| i + 1);
    &chunk[start..end]
}

/// Accumulated stdout of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputBuffer {
    Lines(Vec<String>),
    Binary(Vec<u8>),
}

/// A borrowed window into an [`OutputBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSlice<'a> {
    Lines(&'a [String]),
    Binary(&'a [u8]),
}

impl OutputBuffer {
    /// An empty buffer for `mode`.
    pub const fn new(mode: BufferMode) -> Self {
        match mode {
            BufferMode::Line => Self::Lines(Vec::new()),
            BufferMode::Binary => Self::Binary(Vec::new()),
        }
    }

    pub const fn mode(&self) -> BufferMode {
        match self {
            Self::Lines(_) => BufferMode::Line,
            Self::Binary(_) => BufferMode::Binary,
        }
    }

    /// Append one drained chunk and return what the append callback receives:
    /// the trimmed chunk in line mode, the raw chunk in binary mode.
    pub fn append<'c>(&mut self, chunk: &'c [u8]) -> &'c [u8] {
        match self {
            Self::Lines(lines) => {
                let trimmed = trim_record(chunk);
                lines.extend(
                    String::from_utf8_lossy(trimmed)
                        .split('\n')
                        .map(str::to_owned),
                );
                trimmed
            }
            Self::Binary(bytes) => {
                bytes.extend_from_slice(chunk);
                chunk
            }
        }
    }

    /// Records stored so far; empty in binary mode.
    pub fn lines(&self) -> &[String] {
        match self {
            Self::Lines(lines) => lines,
            Self::Binary(_) => &[],
        }
    }

    /// Bytes stored so far; empty in line mode.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Lines(_) => &[],
            Self::Binary(bytes) => bytes,
        }
    }

    /// Number of records (line mode) or bytes (binary mode).
    pub fn len(&self) -> usize {
        match self {
            Self::Lines(lines) => lines.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Everything from `cursor` (a previous [`len`](Self::len)) onwards.
    pub fn since(&self, cursor: usize) -> OutputSlice<'_> {
        match self {
            Self::Lines(lines) => OutputSlice::Lines(&lines[cursor.min(lines.len())..]),
            Self::Binary(bytes) => OutputSlice::Binary(&bytes[cursor.min(bytes.len())..]),
        }
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(BufferMode::default())
    }
}

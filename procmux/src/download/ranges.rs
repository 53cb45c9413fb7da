//! Byte range partitioning for parallel downloads.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// An inclusive byte range, as used by HTTP `Range` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Errors from building or parsing byte ranges.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RangeError {
    #[error("cannot split content into zero parts")]
    ZeroParts,

    #[error("cannot split {len} bytes into {parts} parts")]
    TooManyParts { len: u64, parts: usize },

    #[error("invalid byte range `{0}`: expected `start-end`")]
    Malformed(String),

    #[error("invalid byte range `{0}`: end precedes start")]
    Inverted(String),
}

impl ByteRange {
    /// Number of bytes covered.
    pub const fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for an HTTP `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for ByteRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| RangeError::Malformed(s.to_string()))?;
        let start: u64 = start
            .parse()
            .map_err(|_| RangeError::Malformed(s.to_string()))?;
        let end: u64 = end
            .parse()
            .map_err(|_| RangeError::Malformed(s.to_string()))?;
        if end < start {
            return Err(RangeError::Inverted(s.to_string()));
        }
        Ok(Self { start, end })
    }
}

/// Split `[0, len)` into `parts` contiguous ranges of equal size, the last
/// one absorbing the remainder.
pub fn partition(len: u64, parts: usize) -> Result<Vec<ByteRange>, RangeError> {
    if parts == 0 {
        return Err(RangeError::ZeroParts);
    }
    let count = parts as u64;
    if len < count {
        return Err(RangeError::TooManyParts { len, parts });
    }

    let part_len = len / count;
    Ok((0..count)
        .map(|i| {
            let start = i * part_len;
            let end = if i + 1 == count {
                len - 1
            } else {
                start + part_len - 1
            };
            ByteRange { start, end }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_even() {
        let ranges = partition(100, 4).unwrap();
        let rendered: Vec<String> = ranges.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["0-24", "25-49", "50-74", "75-99"]);
    }

    #[test]
    fn partition_last_absorbs_remainder() {
        let ranges = partition(10, 3).unwrap();
        assert_eq!(
            ranges,
            [
                ByteRange { start: 0, end: 2 },
                ByteRange { start: 3, end: 5 },
                ByteRange { start: 6, end: 9 },
            ]
        );
        assert_eq!(ranges.iter().map(ByteRange::len).sum::<u64>(), 10);
    }

    #[test]
    fn partition_single_part() {
        assert_eq!(partition(7, 1).unwrap(), [ByteRange { start: 0, end: 6 }]);
    }

    #[test]
    fn partition_rejects_bad_counts() {
        assert_eq!(partition(10, 0), Err(RangeError::ZeroParts));
        assert_eq!(
            partition(2, 3),
            Err(RangeError::TooManyParts { len: 2, parts: 3 })
        );
        assert_eq!(partition(0, 1), Err(RangeError::TooManyParts { len: 0, parts: 1 }));
    }

    #[test]
    fn parse_and_render() {
        let range: ByteRange = "25-49".parse().unwrap();
        assert_eq!(range, ByteRange { start: 25, end: 49 });
        assert_eq!(range.len(), 25);
        assert_eq!(range.header_value(), "bytes=25-49");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!("abc".parse::<ByteRange>(), Err(RangeError::Malformed(_))));
        assert!(matches!("1-x".parse::<ByteRange>(), Err(RangeError::Malformed(_))));
        assert!(matches!("9-3".parse::<ByteRange>(), Err(RangeError::Inverted(_))));
    }
}

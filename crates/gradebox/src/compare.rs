//! Output comparison
//!
//! Program output matches the expected output when both contain the same
//! sequence of non-blank lines after trailing whitespace is stripped from
//! every line. Internal whitespace and line order are significant. Input is
//! treated as raw bytes and read incrementally.

use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

/// Bytes ignored at the end of a line
const TRAILING_WHITESPACE: &[u8] = b" \t\r\x0b\x0c";

/// Length of `line` once the newline and trailing whitespace are dropped
fn trimmed_len(line: &[u8]) -> usize {
    line.iter()
        .rposition(|b| *b != b'\n' && !TRAILING_WHITESPACE.contains(b))
        .map_or(0, |i| i + 1)
}

/// Non-blank lines of a stream, trailing whitespace removed
struct SignificantLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> SignificantLines<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> io::Result<Option<&[u8]>> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
                return Ok(None);
            }
            let len = trimmed_len(&self.buf);
            if len > 0 {
                return Ok(Some(&self.buf[..len]));
            }
        }
    }
}

/// Compare two buffered streams line by line
pub async fn streams_match<A, E>(actual: A, expected: E) -> io::Result<bool>
where
    A: AsyncBufRead + Unpin,
    E: AsyncBufRead + Unpin,
{
    let mut actual = SignificantLines::new(actual);
    let mut expected = SignificantLines::new(expected);

    loop {
        let a = actual.next_line().await?;
        let e = expected.next_line().await?;
        match (a, e) {
            (None, None) => return Ok(true),
            (Some(a), Some(e)) if a == e => {}
            _ => return Ok(false),
        }
    }
}

/// Compare a produced output file against the expected output file
///
/// Any I/O failure counts as a mismatch.
pub async fn outputs_match(actual: &Path, expected: &Path) -> bool {
    let result = async {
        let actual_file = File::open(actual).await?;
        let expected_file = File::open(expected).await?;
        streams_match(BufReader::new(actual_file), BufReader::new(expected_file)).await
    }
    .await;

    match result {
        Ok(matched) => {
            debug!(actual = %actual.display(), matched, "compared output");
            matched
        }
        Err(e) => {
            warn!(
                actual = %actual.display(),
                expected = %expected.display(),
                error = %e,
                "output comparison failed"
            );
            false
        }
    }
}

//! Textual hex dumps.
//!
//! Reads the byte columns of dumps such as CoSine L2 debug output:
//!
//! ```text
//!         00 D0 D8 D2 FF 03 C0 21  09 29 00 08 6B 60 84 AA
//!         4C 4D 4E 4F
//! ```
//!
//! A line holds up to 16 two-digit byte values, optionally after an
//! `offset:` token. A longer token after the values (an ASCII gutter) ends
//! the line. A dump ends at the first empty line.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{HexDumpError, Result};

/// Byte values per line.
pub const BYTES_PER_LINE: usize = 16;

fn is_empty_line(line: &str) -> bool {
    line.trim().is_empty()
}

/// Parse one line, appending its bytes to `out`.
///
/// `line_no` is 1-based and only used in errors. Returns the number of
/// bytes read.
pub fn parse_line(line: &str, line_no: usize, out: &mut BytesMut) -> Result<usize> {
    let mut tokens = line.split_whitespace().peekable();
    if tokens.peek().map_or(false, |t| t.ends_with(':')) {
        tokens.next();
    }

    let mut count = 0;
    for token in tokens {
        if count == BYTES_PER_LINE || token.len() > 2 {
            break;
        }
        let value = u8::from_str_radix(token, 16).map_err(|_| HexDumpError::InvalidByte {
            line: line_no,
            token: token.to_string(),
        })?;
        out.put_u8(value);
        count += 1;
    }

    if count == 0 {
        return Err(HexDumpError::NoValues { line: line_no }.into());
    }
    Ok(count)
}

/// Parse a dump up to its first empty line.
///
/// Leading empty lines are skipped.
pub fn parse(text: &str) -> Result<Bytes> {
    let mut out = BytesMut::new();
    let mut started = false;
    for (i, line) in text.lines().enumerate() {
        if is_empty_line(line) {
            if started {
                break;
            }
            continue;
        }
        started = true;
        parse_line(line, i + 1, &mut out)?;
    }
    Ok(out.freeze())
}

/// Parse a dump that should hold `expected` bytes.
///
/// Reads at most as many lines as `expected` bytes need and fails with
/// [`HexDumpError::Short`] when fewer bytes are found.
pub fn parse_expected(text: &str, expected: usize) -> Result<Bytes> {
    let max_lines = expected.div_ceil(BYTES_PER_LINE);
    let mut out = BytesMut::with_capacity(expected);

    let lines = text
        .lines()
        .enumerate()
        .skip_while(|(_, line)| is_empty_line(line))
        .take(max_lines);
    for (i, line) in lines {
        if is_empty_line(line) {
            break;
        }
        parse_line(line, i + 1, &mut out)?;
    }

    if out.len() < expected {
        return Err(HexDumpError::Short {
            expected,
            actual: out.len(),
        }
        .into());
    }
    out.truncate(expected);
    Ok(out.freeze())
}

/// Parse every dump in `text`; dumps are separated by empty lines.
pub fn parse_all(text: &str) -> Result<Vec<Bytes>> {
    let mut dumps = Vec::new();
    let mut current = BytesMut::new();
    for (i, line) in text.lines().enumerate() {
        if is_empty_line(line) {
            if !current.is_empty() {
                dumps.push(current.split().freeze());
            }
            continue;
        }
        parse_line(line, i + 1, &mut current)?;
    }
    if !current.is_empty() {
        dumps.push(current.freeze());
    }
    Ok(dumps)
}

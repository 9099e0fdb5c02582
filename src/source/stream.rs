//! Feeding sessions from async readers and files.

use std::path::Path;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::diagnostics::Diagnostic;
use crate::driver::{Driver, Scan, ScanOutcome, StreamSession};
use crate::error::{DecodeError, Error, Result};
use crate::handler::DecodedRecord;

/// Bytes requested per read.
pub const READ_BUF_LEN: usize = 64 * 1024;

/// Everything a reader produced before it ended.
#[derive(Debug, Clone)]
pub struct StreamScan {
    pub records: Vec<DecodedRecord>,
    pub diagnostics: Vec<Diagnostic>,
    /// Session outcome when the reader hit end of file, or the terminal
    /// outcome if the session stopped earlier.
    pub outcome: ScanOutcome,
    pub bytes_read: u64,
}

/// Read `reader` to the end, feeding every chunk into `session`.
///
/// Reading stops early once the session terminates. At end of file the
/// session is closed, so a pending partial record shows up as a
/// `StreamClosed` warning.
pub async fn read_stream<R: AsyncRead + Unpin>(
    mut reader: R,
    session: &mut StreamSession,
) -> Result<StreamScan> {
    use tokio::io::AsyncReadExt;

    let mut buf = vec![0u8; READ_BUF_LEN];
    let mut records = Vec::new();
    let mut bytes_read = 0u64;

    let outcome = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                let outcome = session.outcome();
                session.close();
                break outcome;
            }
            Ok(n) => n,
            Err(e) => return Err(Error::Io(e)),
        };
        bytes_read += n as u64;

        match session.feed(&buf[..n]) {
            Ok(feed) => {
                records.extend(feed.records);
                if session.is_terminated() {
                    tracing::debug!("session stopped at offset {}", session.offset());
                    break feed.outcome;
                }
            }
            Err(DecodeError::StreamTerminated) => break session.outcome(),
            Err(e) => return Err(e.into()),
        }
    };

    Ok(StreamScan {
        records,
        diagnostics: session.drain_diagnostics(),
        outcome,
        bytes_read,
    })
}

/// Read a whole file.
pub async fn read_file(path: impl AsRef<Path>) -> Result<Bytes> {
    let data = tokio::fs::read(path.as_ref()).await?;
    Ok(Bytes::from(data))
}

/// Read a file and scan it as one buffer.
pub async fn scan_file(driver: &Driver, path: impl AsRef<Path>) -> Result<Scan> {
    let data = read_file(path).await?;
    tracing::debug!("scanning {} bytes as {}", data.len(), driver.format().name);
    Ok(driver.scan(data))
}

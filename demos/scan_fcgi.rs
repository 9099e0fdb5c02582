//! FastCGI scan - decode a request arriving in small chunks.
//!
//! This example demonstrates:
//! - Building FastCGI records with the format helpers
//! - Feeding a stream session from an async reader
//! - Rendering the result as a JSON report
//!
//! ```text
//! cargo run --example scan_fcgi
//! ```

use tlvscan::formats::fcgi;
use tlvscan::source::read_stream;
use tlvscan::{Report, Scan};
use tokio::io::AsyncWriteExt;

fn request() -> tlvscan::Result<Vec<u8>> {
    let mut wire = fcgi::encode_record(fcgi::BEGIN_REQUEST, 1, &[0, 1, 0, 0, 0, 0, 0, 0])?;
    let params = fcgi::encode_pairs([
        ("REQUEST_METHOD", "GET"),
        ("SCRIPT_FILENAME", "/srv/www/index.php"),
        ("QUERY_STRING", "page=2"),
    ]);
    wire.extend(fcgi::encode_record(fcgi::PARAMS, 1, &params)?);
    wire.extend(fcgi::encode_record(fcgi::PARAMS, 1, &[])?);
    wire.extend(fcgi::encode_record(fcgi::STDIN, 1, &[])?);
    Ok(wire)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let wire = request()?;

    // A tiny pipe forces records to straddle reads
    let (mut tx, rx) = tokio::io::duplex(7);
    let writer = tokio::spawn(async move { tx.write_all(&wire).await });

    let driver = fcgi::driver()?;
    let mut session = driver.session();
    let stream = read_stream(rx, &mut session).await?;
    writer.await??;

    for record in &stream.records {
        for (name, value) in fcgi::pairs(record) {
            println!("{} = {}", name, value);
        }
    }

    let scan = Scan {
        records: stream.records,
        diagnostics: stream.diagnostics,
        outcome: stream.outcome,
        consumed: stream.bytes_read as usize,
    };
    println!("{}", Report::new(fcgi::NAME, scan).to_json_pretty()?);

    Ok(())
}

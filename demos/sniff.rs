//! Sniff - detect the protocol of a hex dump and dissect it.
//!
//! Reads a hex dump from the file given as the first argument, or uses a
//! built-in MNDP announcement.
//!
//! ```text
//! cargo run --example sniff -- packet.txt
//! ```

use tlvscan::formats::protocol_table;
use tlvscan::source::hexdump;
use tlvscan::Report;

const SAMPLE: &str = "
    00 00 00 2A 00 01 00 06  00 0C 42 11 22 33 00 05
    00 04 67 77 2D 31 00 0A  00 04 10 0E 00 00
";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let text = match std::env::args().nth(1) {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => SAMPLE.to_string(),
    };
    let packet = hexdump::parse(&text)?;

    let table = protocol_table()?;
    for candidate in table.candidates(&packet) {
        println!("{:>3}  {}", candidate.confidence, candidate.name);
    }

    match table.dissect(packet) {
        Some((found, scan)) => println!("{}", Report::new(found.name, scan).to_json_pretty()?),
        None => println!("no known protocol"),
    }

    Ok(())
}

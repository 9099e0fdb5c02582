//! Input sources: async readers, files and textual hex dumps.

pub mod hexdump;
mod stream;

pub use stream::{read_file, read_stream, scan_file, StreamScan, READ_BUF_LEN};

mod locator;
mod reader;

pub use locator::{replace_extension, Locator};
pub use reader::{fetch_bytes, reader_for, ByteReader, FileReader, HttpReader};

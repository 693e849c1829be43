// JSON decoding: token scanner, byte window, serde seam and the streaming reader.
pub mod parse;
pub mod reader;
pub mod scanner;
pub mod window;

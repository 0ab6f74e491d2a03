//! JPEG 2000 codestream (ISO/IEC 15444-1, with the Part 2 MCT markers).
//!
//! - `markers`: one reader and writer per marker segment, and the table
//!   mapping marker codes to readers and the states they are legal in.
//! - `parser` / `writer`: main header and tile-part sequencing.
//! - `decoder` / `encoder`: sessions driving the parser or writer and the
//!   tile coder.
//! - `params`: the coding parameter model the markers describe.
//! - `tile_coder`: the interface to wavelet and entropy coding.

pub mod decoder;
pub mod encoder;
pub mod image;
pub mod index;
pub mod markers;
pub mod params;
pub mod parser;
pub mod procedure;
pub mod quantization;
pub mod state;
pub mod tile_coder;
pub mod tile_data;
pub mod writer;

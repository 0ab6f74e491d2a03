//! JPEG 2000 codestream reader and writer.
//!
//! The codestream layer parses and emits the marker segments of a J2K
//! codestream, keeps the coding parameter model they describe and drives
//! tile by tile decoding and encoding through a [`TileCoder`].
//!
//! ```no_run
//! use j2kcodec_rs::{DecompressParams, J2kDecoder, MemoryStream};
//!
//! let bytes = std::fs::read("image.j2k").unwrap();
//! let mut stream = MemoryStream::from_bytes(bytes);
//! let mut decoder = J2kDecoder::new(DecompressParams::default());
//! let mut image = decoder.read_header(&mut stream).unwrap();
//! decoder.decode(&mut stream, &mut image).unwrap();
//! ```

pub mod byte_codec;
pub mod constants;
pub mod error;
pub mod jpeg2000;
pub mod marker_code;
pub mod stream;

pub use error::J2kError;
pub use jpeg2000::decoder::{DecompressParams, J2kDecoder};
pub use jpeg2000::encoder::{CompressParams, J2kEncoder};
pub use jpeg2000::image::{ImageComponent, J2kImage, Rect};
pub use jpeg2000::params::{MctMode, ProgressionOrder, QuantizationStyle};
pub use jpeg2000::tile_coder::{StoredTileCoder, TileCoder};
pub use marker_code::J2kMarkerCode;
pub use stream::{J2kStream, MemoryStream};

/// Decodes a whole codestream held in memory.
pub fn decode(bytes: &[u8], params: DecompressParams) -> Result<J2kImage, J2kError> {
    let mut stream = MemoryStream::from_bytes(bytes);
    let mut decoder = J2kDecoder::new(params);
    let mut image = decoder.read_header(&mut stream)?;
    decoder.decode(&mut stream, &mut image)?;
    Ok(image)
}

/// Encodes `image` into a new codestream.
pub fn encode(image: &mut J2kImage, params: CompressParams) -> Result<Vec<u8>, J2kError> {
    let mut stream = MemoryStream::new();
    let mut encoder = J2kEncoder::new(params);
    encoder.start_compress(&mut stream, image)?;
    encoder.encode(&mut stream, image)?;
    encoder.end_compress(&mut stream)?;
    Ok(stream.into_inner())
}

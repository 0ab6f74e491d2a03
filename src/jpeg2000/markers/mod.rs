//! Marker segment codecs.
//!
//! Each submodule owns the payload layout of one marker family: a reader
//! that applies a payload to the [`DecodeContext`] and writer functions used
//! by the encoder. [`MarkerTable`] maps marker codes to their readers and to
//! the decoder states in which they are legal.

pub mod cod;
pub mod length;
pub mod mct;
pub mod misc;
pub mod poc;
pub mod ppm;
pub mod qcd;
pub mod rgn;
pub mod siz;
pub mod sot;

use super::image::{J2kImage, Rect};
use super::index::CodestreamIndex;
use super::params::{CodingParams, TileCodingParams};
use super::state::DecoderState;
use crate::error::J2kError;
use crate::marker_code::J2kMarkerCode;
use crate::stream::J2kStream;
use std::collections::HashMap;

/// Reads one marker payload (length field excluded) into the context.
pub type MarkerReadFn = fn(&mut DecodeContext, &[u8]) -> Result<(), J2kError>;

#[derive(Clone, Copy)]
pub struct MarkerHandler {
    pub marker: J2kMarkerCode,
    /// States in which the marker may appear.
    pub states: DecoderState,
    pub read: MarkerReadFn,
}

/// Immutable marker dispatch table.
pub struct MarkerTable {
    handlers: HashMap<u16, MarkerHandler>,
}

impl MarkerTable {
    pub fn new() -> Self {
        use DecoderState as S;
        use J2kMarkerCode as M;

        let main_or_tile = S::MAIN_HEADER | S::TILE_PART_HEADER;
        let entries: [(J2kMarkerCode, DecoderState, MarkerReadFn); 20] = [
            (M::StartOfTile, S::MAIN_HEADER | S::TILE_PART_HEADER_SOT, sot::read_sot),
            (M::CodingStyleDefault, main_or_tile, cod::read_cod),
            (M::CodingStyleComponent, main_or_tile, cod::read_coc),
            (M::RegionOfInterest, main_or_tile, rgn::read_rgn),
            (M::QuantizationDefault, main_or_tile, qcd::read_qcd),
            (M::QuantizationComponent, main_or_tile, qcd::read_qcc),
            (M::ProgressionOrderChange, main_or_tile, poc::read_poc),
            (M::ImageAndTileSize, S::MAIN_HEADER_SIZ, siz::read_siz),
            (M::Capability, S::MAIN_HEADER, misc::read_cap),
            (M::TilePartLengths, S::MAIN_HEADER, length::read_tlm),
            (M::PacketLengthMain, S::MAIN_HEADER, length::read_plm),
            (M::PacketLengthTilePart, S::TILE_PART_HEADER, length::read_plt),
            (M::PackedPacketHeadersMain, S::MAIN_HEADER, ppm::read_ppm),
            (M::PackedPacketHeadersTilePart, S::TILE_PART_HEADER, ppm::read_ppt),
            (M::ComponentRegistration, S::MAIN_HEADER, misc::read_crg),
            (M::Comment, main_or_tile, misc::read_com),
            (M::MultipleComponentTransform, main_or_tile, mct::read_mct),
            (M::MultipleComponentCollection, main_or_tile, mct::read_mcc),
            (M::MultipleComponentOrdering, main_or_tile, mct::read_mco),
            (M::ComponentBitDepth, S::MAIN_HEADER, mct::read_cbd),
        ];

        let handlers = entries
            .into_iter()
            .map(|(marker, states, read)| {
                (
                    marker.code(),
                    MarkerHandler {
                        marker,
                        states,
                        read,
                    },
                )
            })
            .collect();
        Self { handlers }
    }

    pub fn get(&self, code: u16) -> Option<&MarkerHandler> {
        self.handlers.get(&code)
    }
}

impl Default for MarkerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Tile rows and columns a decode touches, as half-open index ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileWindow {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl TileWindow {
    pub fn contains(&self, tile_x: u32, tile_y: u32) -> bool {
        tile_x >= self.x0 && tile_x < self.x1 && tile_y >= self.y0 && tile_y < self.y1
    }
}

/// Mutable state shared by the marker readers while a codestream is parsed.
#[derive(Debug, Clone, Default)]
pub struct DecodeContext {
    pub state: DecoderState,
    /// Image geometry from SIZ (component buffers are never allocated here).
    pub image: J2kImage,
    pub cp: CodingParams,
    /// Main header parameters, cloned into every tile once the main header ends.
    pub default_tcp: TileCodingParams,
    /// Tile of the tile-part being read.
    pub current_tile: u16,
    /// Bytes of the current tile-part not consumed yet.
    pub tile_part_data_length: u64,
    /// A SOT with Psot = 0 was read: its tile-part runs to the end of the codestream.
    pub last_tile_part_in_codestream: bool,
    /// The last tile-part of the current tile was read.
    pub last_tile_part_read: bool,
    pub skip_tile_data: bool,
    pub tile_window: TileWindow,
    pub tile_to_decode: Option<u16>,
    /// Resolution levels discarded at decode time.
    pub reduce: u32,
    /// Added to every signalled TNsot once an off-by-one codestream is detected.
    pub tile_part_correction: u8,
    pub tile_part_correction_checked: bool,
    /// Offset of the most recent SOT read.
    pub last_sot_position: u64,
    pub index: Option<CodestreamIndex>,
}

impl DecodeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_main_header(&self) -> bool {
        self.state.intersects(DecoderState::MAIN_HEADER)
    }

    pub fn component_count(&self) -> u32 {
        self.image.components.len() as u32
    }

    /// Parameters updated by the marker being read: the main header
    /// template, or the tile of the current tile-part.
    pub fn current_tcp_mut(&mut self) -> &mut TileCodingParams {
        if self.in_main_header() || self.cp.tcps.is_empty() {
            &mut self.default_tcp
        } else {
            &mut self.cp.tcps[self.current_tile as usize]
        }
    }

    pub fn current_tcp(&self) -> &TileCodingParams {
        if self.in_main_header() || self.cp.tcps.is_empty() {
            &self.default_tcp
        } else {
            &self.cp.tcps[self.current_tile as usize]
        }
    }

    /// Copies the main header template into every tile.
    pub fn specialize_tiles(&mut self) {
        let num_tiles = self.cp.num_tiles();
        self.cp.tcps = (0..num_tiles)
            .map(|tile| self.default_tcp.clone_and_specialize(tile as u16))
            .collect();
    }

    pub fn image_bounds(&self) -> Rect {
        self.image.bounds()
    }
}

/// Writes `marker`, its length and `payload`.
pub fn write_segment(
    stream: &mut dyn J2kStream,
    marker: J2kMarkerCode,
    payload: &[u8],
) -> Result<(), J2kError> {
    let length = payload.len() + 2;
    if length > u16::MAX as usize {
        log::error!("{} segment payload of {} bytes does not fit", marker.name(), payload.len());
        return Err(J2kError::InvalidMarkerSegmentSize {
            marker: marker.code(),
        });
    }
    stream.write_u16(marker.code())?;
    stream.write_u16(length as u16)?;
    stream.write_all(payload)
}

/// Writes a marker without a segment (SOC, SOD, EOC).
pub fn write_marker(stream: &mut dyn J2kStream, marker: J2kMarkerCode) -> Result<(), J2kError> {
    stream.write_u16(marker.code())
}

/// Writes a component index on one byte for up to 256 components and two otherwise.
pub(crate) fn push_component_index(payload: &mut Vec<u8>, component: u32, component_count: u32) {
    if crate::byte_codec::component_index_width(component_count) == 1 {
        payload.push(component as u8);
    } else {
        payload.extend_from_slice(&(component as u16).to_be_bytes());
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::jpeg2000::image::ImageComponent;

    /// A context positioned in the main header of a `width` x `height`
    /// single-tile image with `components` 8-bit components.
    pub fn main_header_context(width: u32, height: u32, components: u16) -> DecodeContext {
        let mut ctx = DecodeContext::new();
        let comps = (0..components)
            .map(|_| ImageComponent::new(8, false, 1, 1))
            .collect();
        ctx.image = J2kImage::new(0, 0, width, height, comps).unwrap();
        ctx.cp.t_width = width;
        ctx.cp.t_height = height;
        ctx.cp.compute_tile_grid(ctx.image.bounds()).unwrap();
        ctx.default_tcp = TileCodingParams::new(components as usize);
        ctx.state = DecoderState::MAIN_HEADER;
        ctx
    }

    /// Moves the context into the tile-part header of tile 0.
    pub fn enter_tile_part_header(ctx: &mut DecodeContext) {
        ctx.specialize_tiles();
        ctx.current_tile = 0;
        ctx.state = DecoderState::TILE_PART_HEADER;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    #[test]
    fn test_table_states() {
        let table = MarkerTable::new();
        let siz = table.get(0xFF51).unwrap();
        assert_eq!(siz.states, DecoderState::MAIN_HEADER_SIZ);
        let plt = table.get(0xFF58).unwrap();
        assert!(!plt.states.intersects(DecoderState::MAIN_HEADER));
        let sot = table.get(0xFF90).unwrap();
        assert!(sot.states.intersects(DecoderState::TILE_PART_HEADER_SOT));
        assert!(table.get(0xFF93).is_none()); // SOD has no segment
        assert!(table.get(0xFF30).is_none());
    }

    #[test]
    fn test_write_segment() {
        let mut stream = MemoryStream::new();
        write_segment(&mut stream, J2kMarkerCode::Comment, &[0x00, 0x01, b'a']).unwrap();
        assert_eq!(
            stream.into_inner(),
            vec![
                0xFF, 0x64, // COM
                0x00, 0x05, // Lcom
                0x00, 0x01, // Rcom = Latin
                b'a',
            ]
        );
    }
}

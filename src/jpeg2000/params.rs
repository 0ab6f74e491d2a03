//! Coding parameter model.
//!
//! `CodingParams` is created once per codec session and owns one
//! `TileCodingParams` per tile. While the main header is parsed, marker
//! readers update a default tile template; once the main header is
//! complete the template is cloned into every tile with
//! [`TileCodingParams::clone_and_specialize`].

use super::image::Rect;
use super::markers::length::{PacketLengthMarkers, TileLengthMarkers};
use super::markers::ppm::PpmMarkers;
use super::tile_data::TileData;
use crate::constants::{DEFAULT_PRECINCT_EXPONENT, MAXIMUM_BANDS, MAXIMUM_RESOLUTIONS};
use crate::error::J2kError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::collections::BTreeMap;

/// Scod / Scoc coding style bits.
pub const CODING_STYLE_PRECINCTS: u8 = 0x01;
pub const CODING_STYLE_SOP: u8 = 0x02;
pub const CODING_STYLE_EPH: u8 = 0x04;
pub const CODING_STYLE_ALL: u8 = CODING_STYLE_PRECINCTS | CODING_STYLE_SOP | CODING_STYLE_EPH;

/// Code-block style bits (Table A.19).
pub const CBLK_STYLE_LAZY: u8 = 0x01;
pub const CBLK_STYLE_RESET: u8 = 0x02;
pub const CBLK_STYLE_TERMALL: u8 = 0x04;
pub const CBLK_STYLE_VSC: u8 = 0x08;
pub const CBLK_STYLE_PTERM: u8 = 0x10;
pub const CBLK_STYLE_SEGSYM: u8 = 0x20;
/// The two high bits are reserved in Part 1.
pub const CBLK_STYLE_RESERVED: u8 = 0xC0;

/// Wavelet filter identifiers.
pub const TRANSFORM_IRREVERSIBLE_9_7: u8 = 0;
pub const TRANSFORM_REVERSIBLE_5_3: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ProgressionOrder {
    /// Layer-resolution-component-position.
    #[default]
    Lrcp = 0,
    /// Resolution-layer-component-position.
    Rlcp = 1,
    /// Resolution-position-component-layer.
    Rpcl = 2,
    /// Position-component-resolution-layer.
    Pcrl = 3,
    /// Component-position-resolution-layer.
    Cprl = 4,
}

impl ProgressionOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lrcp => "LRCP",
            Self::Rlcp => "RLCP",
            Self::Rpcl => "RPCL",
            Self::Pcrl => "PCRL",
            Self::Cprl => "CPRL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "LRCP" => Some(Self::Lrcp),
            "RLCP" => Some(Self::Rlcp),
            "RPCL" => Some(Self::Rpcl),
            "PCRL" => Some(Self::Pcrl),
            "CPRL" => Some(Self::Cprl),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum QuantizationStyle {
    #[default]
    NoQuantization = 0,
    ScalarDerived = 1,
    ScalarExpounded = 2,
}

/// Multiple component transform applied to a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MctMode {
    #[default]
    Off,
    /// Fixed RCT/ICT on the first three components.
    Rgb,
    /// Part 2 matrix transform defined by MCT/MCC/MCO markers.
    Custom,
}

impl MctMode {
    /// Value of the COD SGcod multiple component transform byte.
    pub fn cod_byte(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Rgb | Self::Custom => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MctElementType {
    Int16 = 0,
    Int32 = 1,
    Float32 = 2,
    Float64 = 3,
}

impl MctElementType {
    pub fn size(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Decodes one big-endian element.
    pub fn read(self, bytes: &[u8]) -> f32 {
        match self {
            Self::Int16 => i16::from_be_bytes([bytes[0], bytes[1]]) as f32,
            Self::Int32 => i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            Self::Float32 => crate::byte_codec::read_f32(bytes),
            Self::Float64 => crate::byte_codec::read_f64(bytes) as f32,
        }
    }

    pub fn encode(self, value: f32, out: &mut Vec<u8>) {
        match self {
            Self::Int16 => out.extend_from_slice(&(value.round() as i16).to_be_bytes()),
            Self::Int32 => out.extend_from_slice(&(value.round() as i32).to_be_bytes()),
            Self::Float32 => out.extend_from_slice(&value.to_be_bytes()),
            Self::Float64 => out.extend_from_slice(&(value as f64).to_be_bytes()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MctArrayType {
    Dependency = 0,
    Decorrelation = 1,
    Offset = 2,
}

/// Quantization step size of one sub-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepSize {
    /// 5-bit exponent.
    pub exponent: u8,
    /// 11-bit mantissa.
    pub mantissa: u16,
}

/// MCT marker payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MctRecord {
    pub index: u8,
    pub array_type: MctArrayType,
    pub element_type: MctElementType,
    pub data: Vec<u8>,
}

impl MctRecord {
    pub fn element_count(&self) -> usize {
        self.data.len() / self.element_type.size()
    }

    pub fn values(&self) -> Vec<f32> {
        self.data
            .chunks_exact(self.element_type.size())
            .map(|bytes| self.element_type.read(bytes))
            .collect()
    }
}

/// MCC collection binding MCT arrays to the image components.
/// Arrays are referenced by their MCT index, not owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MccRecord {
    pub index: u8,
    pub component_count: u32,
    pub decorrelation: Option<u8>,
    pub offset: Option<u8>,
    pub irreversible: bool,
}

/// Progression order change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Poc {
    pub res_start: u8,
    pub comp_start: u16,
    pub layer_end: u16,
    pub res_end: u8,
    pub comp_end: u16,
    pub progression: ProgressionOrder,
}

impl Poc {
    /// Ranges must be non-empty and fit the image and tile.
    pub fn validate(
        &self,
        num_resolutions: u32,
        num_components: u32,
        num_layers: u16,
    ) -> Result<(), J2kError> {
        if self.res_start >= self.res_end
            || self.comp_start >= self.comp_end
            || self.layer_end == 0
            || self.res_start as u32 >= num_resolutions
            || self.comp_start as u32 >= num_components
            || self.layer_end > num_layers.max(1)
        {
            return Err(J2kError::InvalidPoc);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub data: Vec<u8>,
    pub is_binary: bool,
}

/// Coding parameters of one component within one tile.
#[derive(Debug, Clone)]
pub struct TileComponentCodingParams {
    /// Scoc precinct bit.
    pub csty: u8,
    pub num_resolutions: u32,
    /// Code-block width exponent.
    pub cblkw: u32,
    /// Code-block height exponent.
    pub cblkh: u32,
    pub cblk_style: u8,
    /// Wavelet transform, see `TRANSFORM_*`.
    pub qmfbid: u8,
    pub quantization_style: QuantizationStyle,
    /// Step sizes for every band; derived styles are expanded to all bands.
    pub step_sizes: Vec<StepSize>,
    /// Number of step sizes signalled in the QCD/QCC segment.
    pub num_step_sizes: u32,
    pub num_guard_bits: u8,
    pub roi_shift: u8,
    /// Precinct width exponent per resolution.
    pub precinct_width_exp: Vec<u32>,
    /// Precinct height exponent per resolution.
    pub precinct_height_exp: Vec<u32>,
    pub dc_level_shift: i32,
    /// A QCD or QCC segment applied to this component.
    pub quantization_set: bool,
    /// Quantization was set by a QCC segment.
    pub from_qcc: bool,
    /// Quantization was set in a tile-part header.
    pub from_tile_header: bool,
}

impl Default for TileComponentCodingParams {
    fn default() -> Self {
        Self {
            csty: 0,
            num_resolutions: 0,
            cblkw: 0,
            cblkh: 0,
            cblk_style: 0,
            qmfbid: TRANSFORM_REVERSIBLE_5_3,
            quantization_style: QuantizationStyle::NoQuantization,
            step_sizes: vec![StepSize::default(); MAXIMUM_BANDS as usize],
            num_step_sizes: 0,
            num_guard_bits: 0,
            roi_shift: 0,
            precinct_width_exp: vec![DEFAULT_PRECINCT_EXPONENT; MAXIMUM_RESOLUTIONS as usize],
            precinct_height_exp: vec![DEFAULT_PRECINCT_EXPONENT; MAXIMUM_RESOLUTIONS as usize],
            dc_level_shift: 0,
            quantization_set: false,
            from_qcc: false,
            from_tile_header: false,
        }
    }
}

impl TileComponentCodingParams {
    /// Fills every band from the LL step size:
    /// band `b` gets exponent `expn0 - (b - 1) / 3` (floored at zero) and mantissa `mant0`.
    pub fn expand_derived_step_sizes(&mut self) {
        let base = self.step_sizes[0];
        for band in 1..self.step_sizes.len() {
            let decrement = ((band - 1) / 3) as i32;
            self.step_sizes[band] = StepSize {
                exponent: (base.exponent as i32 - decrement).max(0) as u8,
                mantissa: base.mantissa,
            };
        }
    }

    /// Copies the SPcod/SPcoc fields, which is what COD propagates to other components.
    pub fn copy_coding_style_from(&mut self, other: &TileComponentCodingParams) {
        self.num_resolutions = other.num_resolutions;
        self.cblkw = other.cblkw;
        self.cblkh = other.cblkh;
        self.cblk_style = other.cblk_style;
        self.qmfbid = other.qmfbid;
        self.precinct_width_exp.clone_from(&other.precinct_width_exp);
        self.precinct_height_exp.clone_from(&other.precinct_height_exp);
    }

    /// Step sizes that must be signalled in a QCD/QCC segment.
    pub fn signalled_step_sizes(&self) -> usize {
        match self.quantization_style {
            QuantizationStyle::ScalarDerived => 1,
            _ => (3 * self.num_resolutions as usize).saturating_sub(2),
        }
    }
}

/// Coding parameters of one tile.
#[derive(Debug, Clone, Default)]
pub struct TileCodingParams {
    pub index: u16,
    /// Scod coding style bits.
    pub csty: u8,
    pub progression: ProgressionOrder,
    pub num_layers: u16,
    pub mct: MctMode,
    /// Target compression ratio per layer, 0 meaning lossless.
    pub rates: Vec<f64>,
    /// Target distortion per layer.
    pub distortions: Vec<f64>,
    pub pocs: Vec<Poc>,
    pub tccps: Vec<TileComponentCodingParams>,
    /// Tile-part count, 0 until known.
    pub num_tile_parts: u8,
    /// Index of the last tile-part read, `None` before the first.
    pub current_tile_part: Option<u8>,
    /// A COD segment was read for this tile.
    pub cod_seen: bool,
    /// Quantization style of the main header QCD.
    pub main_qcd_style: QuantizationStyle,
    /// Number of step sizes signalled by the main header QCD.
    pub main_qcd_num_step_sizes: u32,
    /// PPT fragments by Zppt index.
    pub ppt_fragments: BTreeMap<u8, Vec<u8>>,
    /// Packed packet headers from PPM or merged PPT segments.
    pub packet_headers: Vec<u8>,
    /// Packet lengths from PLT segments.
    pub packet_lengths: Vec<u32>,
    pub mct_records: Vec<MctRecord>,
    pub mcc_records: Vec<MccRecord>,
    /// Row-major `numcomps x numcomps` decoding matrix from MCO.
    pub mct_decoding_matrix: Option<Vec<f32>>,
    /// Row-major forward matrix for custom MCT encoding.
    pub mct_coding_matrix: Option<Vec<f32>>,
    /// Coded data accumulated from this tile's tile-parts.
    pub tile_data: Option<TileData>,
}

impl TileCodingParams {
    pub fn new(component_count: usize) -> Self {
        Self {
            num_layers: 1,
            tccps: vec![TileComponentCodingParams::default(); component_count],
            ..Default::default()
        }
    }

    /// Clones the main header template into tile `tile_index`, dropping
    /// state that belongs to a single tile.
    pub fn clone_and_specialize(&self, tile_index: u16) -> TileCodingParams {
        let mut tcp = self.clone();
        tcp.index = tile_index;
        tcp.cod_seen = false;
        tcp.num_tile_parts = 0;
        tcp.current_tile_part = None;
        tcp.ppt_fragments.clear();
        tcp.packet_headers.clear();
        tcp.packet_lengths.clear();
        tcp.tile_data = None;
        for tccp in &mut tcp.tccps {
            tccp.from_tile_header = false;
        }
        tcp
    }

    pub fn uses_sop(&self) -> bool {
        self.csty & CODING_STYLE_SOP != 0
    }

    pub fn uses_eph(&self) -> bool {
        self.csty & CODING_STYLE_EPH != 0
    }

    pub fn max_resolutions(&self) -> u32 {
        self.tccps.iter().map(|t| t.num_resolutions).max().unwrap_or(0)
    }

    /// Checks the quantization invariants once all header segments for the
    /// tile (or the main header) are known.
    pub fn validate_quantization(&self) -> Result<(), J2kError> {
        for (compno, tccp) in self.tccps.iter().enumerate() {
            if tccp.qmfbid == TRANSFORM_IRREVERSIBLE_9_7
                && tccp.quantization_style == QuantizationStyle::NoQuantization
            {
                log::error!(
                    "Irreversible component {compno} must have quantization parameters in QCD/QCC"
                );
                return Err(J2kError::IrreversibleWithoutQuantization {
                    component: compno as u16,
                });
            }
        }
        if self.main_qcd_style == QuantizationStyle::ScalarDerived {
            return Ok(());
        }

        // Main QCD scope: components not overridden by QCC or a tile header.
        let max_decompositions = self
            .tccps
            .iter()
            .filter(|t| t.num_resolutions > 0 && !t.from_qcc && !t.from_tile_header)
            .map(|t| t.num_resolutions - 1)
            .max()
            .unwrap_or(0);
        let required = 3 * max_decompositions + 1;
        if self.main_qcd_num_step_sizes < required
            && self
                .tccps
                .iter()
                .any(|t| !t.from_qcc && !t.from_tile_header)
        {
            log::error!(
                "From main QCD marker, number of step sizes ({}) is less than 3 * (maximum decompositions) + 1 = {}",
                self.main_qcd_num_step_sizes,
                required
            );
            return Err(J2kError::TooFewStepSizes {
                found: self.main_qcd_num_step_sizes,
                required,
            });
        }

        // Tile QCD scope.
        let tile_qcd = self
            .tccps
            .iter()
            .find(|t| t.from_tile_header && !t.from_qcc);
        if let Some(qcd) = tile_qcd {
            if qcd.quantization_style != QuantizationStyle::ScalarDerived {
                let max_tile_decompositions = self
                    .tccps
                    .iter()
                    .filter(|t| t.num_resolutions > 0 && !(t.from_qcc && t.from_tile_header))
                    .map(|t| t.num_resolutions - 1)
                    .max()
                    .unwrap_or(0);
                let required = 3 * max_tile_decompositions + 1;
                if qcd.num_step_sizes < required {
                    log::error!(
                        "From tile QCD marker, number of step sizes ({}) is less than {}",
                        qcd.num_step_sizes,
                        required
                    );
                    return Err(J2kError::TooFewStepSizes {
                        found: qcd.num_step_sizes,
                        required,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Parameters of the whole codestream.
#[derive(Debug, Clone, Default)]
pub struct CodingParams {
    /// Rsiz capabilities word.
    pub rsiz: u16,
    /// CAP Pcap word.
    pub pcap: u32,
    /// CAP Ccap words.
    pub ccap: Vec<u16>,
    /// Tile grid origin.
    pub tx0: u32,
    pub ty0: u32,
    /// Nominal tile size.
    pub t_width: u32,
    pub t_height: u32,
    pub t_grid_width: u32,
    pub t_grid_height: u32,
    pub comments: Vec<Comment>,
    /// CRG component offsets (Xcrg, Ycrg) in 1/65536 sample units.
    pub registration: Vec<(u16, u16)>,
    pub ppm: Option<PpmMarkers>,
    pub tlm: Option<TileLengthMarkers>,
    pub plm: Option<PacketLengthMarkers>,
    pub tcps: Vec<TileCodingParams>,
}

impl CodingParams {
    pub fn num_tiles(&self) -> u32 {
        self.t_grid_width * self.t_grid_height
    }

    /// Reference grid rectangle of tile `tile_index`, clipped to `image`.
    pub fn tile_rect(&self, tile_index: u32, image: Rect) -> Rect {
        let p = tile_index % self.t_grid_width.max(1);
        let q = tile_index / self.t_grid_width.max(1);
        let x0 = self.tx0.saturating_add(p.saturating_mul(self.t_width));
        let y0 = self.ty0.saturating_add(q.saturating_mul(self.t_height));
        Rect {
            x0: x0.max(image.x0),
            y0: y0.max(image.y0),
            x1: x0.saturating_add(self.t_width).min(image.x1),
            y1: y0.saturating_add(self.t_height).min(image.y1),
        }
    }

    /// Derives the tile grid from image and tile geometry.
    pub fn compute_tile_grid(&mut self, image: Rect) -> Result<(), J2kError> {
        if self.t_width == 0 || self.t_height == 0 {
            return Err(J2kError::InvalidTileSize);
        }
        let width = super::image::ceil_div(image.x1 - self.tx0, self.t_width);
        let height = super::image::ceil_div(image.y1 - self.ty0, self.t_height);
        if width == 0
            || height == 0
            || width as u64 * height as u64 > crate::constants::MAXIMUM_TILES as u64
        {
            log::error!("Invalid grid of tiles: {width} x {height}");
            return Err(J2kError::InvalidTileGrid { width, height });
        }
        self.t_grid_width = width;
        self.t_grid_height = height;
        Ok(())
    }

    pub fn is_part2(&self) -> bool {
        self.rsiz & crate::constants::PROFILE_PART2 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_step_sizes_five_resolutions() {
        let mut tccp = TileComponentCodingParams {
            num_resolutions: 5,
            quantization_style: QuantizationStyle::ScalarDerived,
            ..Default::default()
        };
        tccp.step_sizes[0] = StepSize {
            exponent: 10,
            mantissa: 0x123,
        };
        tccp.expand_derived_step_sizes();
        // 3 * 5 - 2 bands: LL then HL/LH/HH per decomposition level.
        let expected_exponents = [10, 10, 10, 10, 9, 9, 9, 8, 8, 8, 7, 7, 7];
        for (band, exponent) in expected_exponents.iter().enumerate() {
            assert_eq!(tccp.step_sizes[band].exponent, *exponent, "band {band}");
            assert_eq!(tccp.step_sizes[band].mantissa, 0x123);
        }
        // Floored at zero for deep bands.
        assert_eq!(tccp.step_sizes[96].exponent, 0);
    }

    #[test]
    fn test_clone_and_specialize_resets_tile_state() {
        let mut template = TileCodingParams::new(3);
        template.cod_seen = true;
        template.num_tile_parts = 4;
        template.ppt_fragments.insert(0, vec![1, 2, 3]);
        template.tccps[1].from_tile_header = true;
        template.num_layers = 7;

        let tcp = template.clone_and_specialize(5);
        assert_eq!(tcp.index, 5);
        assert!(!tcp.cod_seen);
        assert_eq!(tcp.num_tile_parts, 0);
        assert!(tcp.ppt_fragments.is_empty());
        assert!(!tcp.tccps[1].from_tile_header);
        assert_eq!(tcp.num_layers, 7);
        assert_eq!(tcp.tccps.len(), 3);
    }

    #[test]
    fn test_tile_grid_and_rects() {
        let mut cp = CodingParams {
            t_width: 32,
            t_height: 32,
            ..Default::default()
        };
        let image = Rect::new(0, 0, 64, 50);
        cp.compute_tile_grid(image).unwrap();
        assert_eq!((cp.t_grid_width, cp.t_grid_height), (2, 2));
        assert_eq!(cp.tile_rect(3, image), Rect::new(32, 32, 64, 50));
    }

    #[test]
    fn test_too_few_step_sizes() {
        let mut tcp = TileCodingParams::new(1);
        tcp.tccps[0].num_resolutions = 6;
        tcp.main_qcd_style = QuantizationStyle::ScalarExpounded;
        tcp.main_qcd_num_step_sizes = 10;
        tcp.tccps[0].quantization_style = QuantizationStyle::ScalarExpounded;
        tcp.tccps[0].qmfbid = TRANSFORM_IRREVERSIBLE_9_7;
        assert_eq!(
            tcp.validate_quantization(),
            Err(J2kError::TooFewStepSizes {
                found: 10,
                required: 16
            })
        );
        tcp.main_qcd_num_step_sizes = 16;
        assert!(tcp.validate_quantization().is_ok());
    }

    #[test]
    fn test_poc_validation() {
        let poc = Poc {
            res_start: 0,
            comp_start: 0,
            layer_end: 1,
            res_end: 3,
            comp_end: 3,
            progression: ProgressionOrder::Rlcp,
        };
        assert!(poc.validate(3, 3, 1).is_ok());
        let empty = Poc { res_end: 0, ..poc };
        assert_eq!(empty.validate(3, 3, 1), Err(J2kError::InvalidPoc));
    }
}

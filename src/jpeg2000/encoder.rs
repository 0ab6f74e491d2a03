//! Codestream encoder.
//!
//! [`J2kEncoder`] validates the [`CompressParams`], derives the coding
//! parameters, writes the main header and then one or more tile-parts per
//! tile from what the [`TileCoder`] produces.

use super::image::{J2kImage, Rect, ceil_div_pow2};
use super::index::CodestreamIndex;
use super::markers::mct::{mct_rsiz, prepare_custom_mct};
use super::markers::siz::validate_rsiz;
use super::params::{
    CODING_STYLE_EPH, CODING_STYLE_PRECINCTS, CODING_STYLE_SOP, CBLK_STYLE_RESERVED, CodingParams,
    Comment, MctMode, Poc, ProgressionOrder, QuantizationStyle, TRANSFORM_IRREVERSIBLE_9_7,
    TRANSFORM_REVERSIBLE_5_3, TileCodingParams,
};
use super::procedure::ProcedureList;
use super::quantization::calc_step_sizes;
use super::tile_coder::{EncodedTile, StoredTileCoder, TileCoder, TileComponentSamples, TileInfo, TileSamples};
use super::writer::{HeaderOptions, J2kWriter, TilePart};
use crate::constants::{
    MAXIMUM_COMMENT_LENGTH, MAXIMUM_POCS, MAXIMUM_RESOLUTIONS, MAXIMUM_SUPPORTED_PRECISION,
    MAXIMUM_TILE_AREA, MAXIMUM_TILE_PARTS, PROFILE_CAPABILITIES,
};
use crate::error::J2kError;
use crate::stream::J2kStream;

/// Options of an encode session. Setters consume and return the
/// parameters so they can be chained.
#[derive(Debug, Clone)]
pub struct CompressParams {
    /// Nominal tile size, a single tile covering the image when `None`.
    pub tile_size: Option<(u32, u32)>,
    pub tile_offset: (u32, u32),
    /// Added to the image origin on the reference grid.
    pub image_offset: (u32, u32),
    pub num_resolutions: u32,
    /// Code-block width and height in samples.
    pub code_block_size: (u32, u32),
    pub code_block_style: u8,
    pub irreversible: bool,
    /// Quantization style, derived from the transform when `None`.
    pub quantization_style: Option<QuantizationStyle>,
    pub guard_bits: u8,
    pub progression: ProgressionOrder,
    pub num_layers: u16,
    /// Compression ratio per layer, 0 for lossless.
    pub rates: Vec<f64>,
    /// Precinct sizes from the highest resolution down. Lower resolutions
    /// halve the last size.
    pub precincts: Vec<(u32, u32)>,
    pub sop: bool,
    pub eph: bool,
    pub mct: MctMode,
    /// Row-major forward matrix for [`MctMode::Custom`].
    pub mct_matrix: Option<Vec<f32>>,
    pub pocs: Vec<Poc>,
    /// Starts a new tile-part whenever this progression dimension
    /// (`R`, `L`, `C` or `P`) changes.
    pub tile_part_flag: Option<char>,
    /// Component and shift of a region of interest.
    pub roi: Option<(u16, u8)>,
    pub rsiz: u16,
    pub pcap: u32,
    pub ccap: Vec<u16>,
    pub comment: Option<String>,
    pub write_tlm: bool,
    pub write_plt: bool,
    pub num_threads: u32,
    pub build_index: bool,
}

impl Default for CompressParams {
    fn default() -> Self {
        Self {
            tile_size: None,
            tile_offset: (0, 0),
            image_offset: (0, 0),
            num_resolutions: 6,
            code_block_size: (64, 64),
            code_block_style: 0,
            irreversible: false,
            quantization_style: None,
            guard_bits: 2,
            progression: ProgressionOrder::Lrcp,
            num_layers: 1,
            rates: Vec::new(),
            precincts: Vec::new(),
            sop: false,
            eph: false,
            mct: MctMode::Off,
            mct_matrix: None,
            pocs: Vec::new(),
            tile_part_flag: None,
            roi: None,
            rsiz: 0,
            pcap: 0,
            ccap: Vec::new(),
            comment: None,
            write_tlm: false,
            write_plt: false,
            num_threads: 1,
            build_index: false,
        }
    }
}

impl CompressParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_size = Some((width, height));
        self
    }

    pub fn tile_offset(mut self, x: u32, y: u32) -> Self {
        self.tile_offset = (x, y);
        self
    }

    pub fn image_offset(mut self, x: u32, y: u32) -> Self {
        self.image_offset = (x, y);
        self
    }

    pub fn resolutions(mut self, num_resolutions: u32) -> Self {
        self.num_resolutions = num_resolutions;
        self
    }

    pub fn code_block_size(mut self, width: u32, height: u32) -> Self {
        self.code_block_size = (width, height);
        self
    }

    pub fn code_block_style(mut self, style: u8) -> Self {
        self.code_block_style = style;
        self
    }

    pub fn irreversible(mut self, irreversible: bool) -> Self {
        self.irreversible = irreversible;
        self
    }

    pub fn quantization(mut self, style: QuantizationStyle) -> Self {
        self.quantization_style = Some(style);
        self
    }

    pub fn guard_bits(mut self, guard_bits: u8) -> Self {
        self.guard_bits = guard_bits;
        self
    }

    pub fn progression(mut self, progression: ProgressionOrder) -> Self {
        self.progression = progression;
        self
    }

    /// One layer per rate.
    pub fn layer_rates(mut self, rates: Vec<f64>) -> Self {
        self.num_layers = rates.len().max(1) as u16;
        self.rates = rates;
        self
    }

    pub fn precincts(mut self, sizes: Vec<(u32, u32)>) -> Self {
        self.precincts = sizes;
        self
    }

    pub fn sop(mut self, sop: bool) -> Self {
        self.sop = sop;
        self
    }

    pub fn eph(mut self, eph: bool) -> Self {
        self.eph = eph;
        self
    }

    pub fn mct(mut self, mct: MctMode) -> Self {
        self.mct = mct;
        self
    }

    pub fn custom_mct(mut self, matrix: Vec<f32>) -> Self {
        self.mct = MctMode::Custom;
        self.mct_matrix = Some(matrix);
        self
    }

    pub fn poc(mut self, poc: Poc) -> Self {
        self.pocs.push(poc);
        self
    }

    pub fn tile_parts(mut self, flag: char) -> Self {
        self.tile_part_flag = Some(flag);
        self
    }

    pub fn roi(mut self, component: u16, shift: u8) -> Self {
        self.roi = Some((component, shift));
        self
    }

    pub fn rsiz(mut self, rsiz: u16) -> Self {
        self.rsiz = rsiz;
        self
    }

    pub fn capabilities(mut self, pcap: u32, ccap: Vec<u16>) -> Self {
        self.pcap = pcap;
        self.ccap = ccap;
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_owned());
        self
    }

    pub fn tlm(mut self, write_tlm: bool) -> Self {
        self.write_tlm = write_tlm;
        self
    }

    pub fn plt(mut self, write_plt: bool) -> Self {
        self.write_plt = write_plt;
        self
    }

    pub fn threads(mut self, num_threads: u32) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn index(mut self, build_index: bool) -> Self {
        self.build_index = build_index;
        self
    }
}

/// Extent of every progression dimension within one progression group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressionExtent {
    pub layers: u32,
    pub resolutions: u32,
    pub components: u32,
    pub precincts: u32,
}

/// Tile-parts a progression group is split into: the product of the
/// dimension extents up to and including `flag`, in progression order.
pub fn tile_parts_in_group(
    progression: ProgressionOrder,
    flag: Option<char>,
    extent: &ProgressionExtent,
) -> u32 {
    let Some(flag) = flag.map(|flag| flag.to_ascii_uppercase()) else {
        return 1;
    };
    let mut count = 1u32;
    for dimension in progression.as_str().chars() {
        let size = match dimension {
            'L' => extent.layers,
            'R' => extent.resolutions,
            'C' => extent.components,
            _ => extent.precincts,
        };
        count = count.saturating_mul(size.max(1));
        if dimension == flag {
            break;
        }
    }
    count
}

/// Largest precinct count of any resolution of any component of the tile.
fn max_precincts(rect: Rect, image: &J2kImage, tcp: &TileCodingParams) -> u32 {
    let mut max = 1;
    for (component, tccp) in image.components.iter().zip(&tcp.tccps) {
        let full = rect.subsampled(component.dx, component.dy);
        for resolution in 0..tccp.num_resolutions {
            let area = full.reduced(tccp.num_resolutions - 1 - resolution);
            if area.is_empty() {
                continue;
            }
            let pw = tccp.precinct_width_exp[resolution as usize];
            let ph = tccp.precinct_height_exp[resolution as usize];
            let across = ceil_div_pow2(area.x1, pw) - (area.x0 >> pw);
            let down = ceil_div_pow2(area.y1, ph) - (area.y0 >> ph);
            max = max.max(across.saturating_mul(down));
        }
    }
    max
}

fn exponent(size: u32) -> Option<u32> {
    size.is_power_of_two().then(|| size.trailing_zeros())
}

/// What the setup procedures read and build.
struct SetupJob<'a> {
    params: &'a CompressParams,
    /// Caller image translated by the image offset, without samples.
    image: J2kImage,
    cp: CodingParams,
    tcp: TileCodingParams,
    tile_parts: Vec<u8>,
}

fn validation_procedures<'a>(params: &CompressParams) -> ProcedureList<SetupJob<'a>> {
    let mut list: ProcedureList<SetupJob<'a>> = ProcedureList::new();
    list.push("check_image", |job| {
        if job.image.components.is_empty() {
            log::error!("Cannot encode an image without components");
            return Err(J2kError::InvalidComponentCount(0));
        }
        for (index, component) in job.image.components.iter().enumerate() {
            if component.precision == 0 || component.precision > MAXIMUM_SUPPORTED_PRECISION {
                log::error!("Unsupported precision {} for component {index}", component.precision);
                return Err(J2kError::UnsupportedPrecision {
                    component: index as u16,
                    precision: component.precision,
                });
            }
            if !(1..=255).contains(&component.dx) || !(1..=255).contains(&component.dy) {
                log::error!("Invalid subsampling {}x{} for component {index}", component.dx, component.dy);
                return Err(J2kError::InvalidSubsampling { component: index as u16 });
            }
        }
        Ok(())
    });
    list.push("check_tiling", |job| {
        let image = job.image.bounds();
        let (tx0, ty0) = job.params.tile_offset;
        let (tw, th) = job
            .params
            .tile_size
            .unwrap_or((image.x1 - tx0.min(image.x0), image.y1 - ty0.min(image.y0)));
        if tw == 0 || th == 0 {
            log::error!("Invalid tile size {tw}x{th}");
            return Err(J2kError::InvalidTileSize);
        }
        if tx0 > image.x0 || ty0 > image.y0 {
            log::error!("Tile offset ({tx0}, {ty0}) lies past the image origin ({}, {})", image.x0, image.y0);
            return Err(J2kError::InvalidTileOrigin);
        }
        if tx0 as u64 + tw as u64 <= image.x0 as u64 || ty0 as u64 + th as u64 <= image.y0 as u64 {
            log::error!("First tile does not overlap the image");
            return Err(J2kError::TileDoesNotOverlapImage);
        }
        if tw as u64 * th as u64 > MAXIMUM_TILE_AREA {
            log::error!("Tile area {tw}x{th} exceeds the implementation limit");
            return Err(J2kError::TileAreaTooLarge);
        }
        Ok(())
    });
    list.push("check_resolutions", |job| {
        let resolutions = job.params.num_resolutions;
        if resolutions == 0 || resolutions > MAXIMUM_RESOLUTIONS {
            log::error!("Number of resolutions must be between 1 and {MAXIMUM_RESOLUTIONS}");
            return Err(J2kError::InvalidResolutionCount(resolutions));
        }
        let image = job.image.bounds();
        let (tw, th) = job.params.tile_size.unwrap_or((image.width(), image.height()));
        for component in &job.image.components {
            let width = tw.min(image.width()) / component.dx;
            let height = th.min(image.height()) / component.dy;
            let lowest = |size: u32| size.checked_shr(resolutions - 1).unwrap_or(0);
            if lowest(width) == 0 || lowest(height) == 0 {
                log::error!(
                    "Number of resolutions {resolutions} is too high for {width}x{height} tile components"
                );
                return Err(J2kError::InvalidResolutionCount(resolutions));
            }
        }
        Ok(())
    });
    list.push("check_code_blocks", |job| {
        let (width, height) = job.params.code_block_size;
        let valid = |size: u32| (4..=1024).contains(&size) && size.is_power_of_two();
        if !valid(width) || !valid(height) || width * height > 4096 {
            log::error!("Invalid code-block size {width}x{height}");
            return Err(J2kError::InvalidCodeBlockSize);
        }
        if job.params.code_block_style & CBLK_STYLE_RESERVED != 0 {
            return Err(J2kError::InvalidCodeBlockStyle(job.params.code_block_style));
        }
        Ok(())
    });
    list.push("check_quantization", |job| {
        match (job.params.irreversible, job.params.quantization_style) {
            (true, Some(QuantizationStyle::NoQuantization)) => {
                log::error!("The irreversible transform needs scalar quantization");
                Err(J2kError::IrreversibleWithoutQuantization { component: 0 })
            }
            (false, Some(style)) if style != QuantizationStyle::NoQuantization => {
                log::error!("The reversible transform does not quantize");
                Err(J2kError::InvalidQuantizationStyle(style.into()))
            }
            _ if job.params.guard_bits > 7 => Err(J2kError::InvalidArgument),
            _ => Ok(()),
        }
    });
    list.push("check_layers", |job| {
        let params = job.params;
        if params.num_layers == 0 {
            return Err(J2kError::InvalidLayerCount);
        }
        if !params.rates.is_empty() && params.rates.len() != params.num_layers as usize {
            log::error!("{} rates given for {} layers", params.rates.len(), params.num_layers);
            return Err(J2kError::InvalidLayerCount);
        }
        let lossy: Vec<f64> = params.rates.iter().copied().filter(|&rate| rate != 0.0).collect();
        if lossy.iter().any(|&rate| rate < 1.0) || lossy.windows(2).any(|pair| pair[1] >= pair[0]) {
            log::error!("Layer rates must be decreasing and at least 1");
            return Err(J2kError::InvalidArgument);
        }
        Ok(())
    });
    if !params.precincts.is_empty() {
        list.push("check_precincts", |job| {
            for &(width, height) in &job.params.precincts {
                match (exponent(width), exponent(height)) {
                    (Some(pw), Some(ph)) if pw <= 15 && ph <= 15 => {}
                    _ => {
                        log::error!("Invalid precinct size {width}x{height}");
                        return Err(J2kError::InvalidPrecinctSize);
                    }
                }
            }
            Ok(())
        });
    }
    if params.mct != MctMode::Off {
        list.push("check_mct", |job| {
            let components = &job.image.components;
            match job.params.mct {
                MctMode::Rgb => {
                    if components.len() < 3
                        || components[1..3]
                            .iter()
                            .any(|c| c.dx != components[0].dx || c.dy != components[0].dy)
                    {
                        log::error!("RGB MCT needs three components with identical subsampling");
                        return Err(J2kError::InvalidMct(1));
                    }
                }
                MctMode::Custom => {
                    let n = components.len();
                    if job.params.mct_matrix.as_ref().is_none_or(|matrix| matrix.len() != n * n) {
                        log::error!("Custom MCT needs a {n}x{n} matrix");
                        return Err(J2kError::InvalidArgument);
                    }
                }
                MctMode::Off => {}
            }
            Ok(())
        });
    }
    if !params.pocs.is_empty() {
        list.push("check_pocs", |job| {
            if job.params.pocs.len() > MAXIMUM_POCS {
                return Err(J2kError::TooManyPocs);
            }
            let components = job.image.components.len() as u32;
            for poc in &job.params.pocs {
                poc.validate(job.params.num_resolutions, components, job.params.num_layers)
                    .inspect_err(|_| log::error!("Invalid POC {poc:?}"))?;
            }
            Ok(())
        });
    }
    if params.tile_part_flag.is_some() {
        list.push("check_tile_part_flag", |job| match job.params.tile_part_flag {
            Some('R' | 'L' | 'C' | 'P' | 'r' | 'l' | 'c' | 'p') | None => Ok(()),
            Some(flag) => {
                log::error!("Tile-part flag must be one of R, L, C or P, not {flag:?}");
                Err(J2kError::InvalidTilePartFlag)
            }
        });
    }
    if params.roi.is_some() {
        list.push("check_roi", |job| {
            if let Some((component, shift)) = job.params.roi {
                if component as usize >= job.image.components.len() {
                    return Err(J2kError::InvalidComponentIndex {
                        component: component as u32,
                    });
                }
                if shift > 37 {
                    log::error!("ROI shift {shift} is above the maximum of 37");
                    return Err(J2kError::InvalidArgument);
                }
            }
            Ok(())
        });
    }
    list.push("check_profile", |job| {
        validate_rsiz(job.params.rsiz)?;
        if job.params.ccap.len() != job.params.pcap.count_ones() as usize {
            log::error!(
                "Pcap announces {} parts but {} Ccap values were given",
                job.params.pcap.count_ones(),
                job.params.ccap.len()
            );
            return Err(J2kError::InvalidArgument);
        }
        if job
            .params
            .comment
            .as_ref()
            .is_some_and(|comment| comment.is_empty() || comment.len() > MAXIMUM_COMMENT_LENGTH)
        {
            return Err(J2kError::InvalidArgument);
        }
        Ok(())
    });
    list
}

fn execution_procedures<'a>(params: &CompressParams) -> ProcedureList<SetupJob<'a>> {
    let mut list: ProcedureList<SetupJob<'a>> = ProcedureList::new();
    list.push("build_coding_params", |job| {
        let params = job.params;
        let image = job.image.bounds();
        let (tx0, ty0) = params.tile_offset;
        let (t_width, t_height) = params
            .tile_size
            .unwrap_or((image.x1 - tx0, image.y1 - ty0));
        let mut cp = CodingParams {
            rsiz: params.rsiz,
            pcap: params.pcap,
            ccap: params.ccap.clone(),
            tx0,
            ty0,
            t_width,
            t_height,
            ..Default::default()
        };
        if !cp.ccap.is_empty() {
            cp.rsiz |= PROFILE_CAPABILITIES;
        }
        if let Some(comment) = &params.comment {
            cp.comments.push(Comment {
                data: comment.as_bytes().to_vec(),
                is_binary: false,
            });
        }
        cp.compute_tile_grid(image)?;
        job.cp = cp;
        Ok(())
    });
    list.push("init_tile_parameters", |job| {
        let params = job.params;
        let mut tcp = TileCodingParams::new(job.image.components.len());
        if !params.precincts.is_empty() {
            tcp.csty |= CODING_STYLE_PRECINCTS;
        }
        if params.sop {
            tcp.csty |= CODING_STYLE_SOP;
        }
        if params.eph {
            tcp.csty |= CODING_STYLE_EPH;
        }
        tcp.progression = params.progression;
        tcp.num_layers = params.num_layers;
        tcp.rates.clone_from(&params.rates);
        tcp.pocs.clone_from(&params.pocs);
        tcp.mct = if params.mct == MctMode::Custom { MctMode::Off } else { params.mct };

        let quantization = params.quantization_style.unwrap_or(if params.irreversible {
            QuantizationStyle::ScalarExpounded
        } else {
            QuantizationStyle::NoQuantization
        });
        let (cblk_width, cblk_height) = params.code_block_size;
        let resolutions = params.num_resolutions;
        for (tccp, component) in tcp.tccps.iter_mut().zip(&job.image.components) {
            tccp.csty = tcp.csty & CODING_STYLE_PRECINCTS;
            tccp.num_resolutions = resolutions;
            tccp.cblkw = cblk_width.trailing_zeros();
            tccp.cblkh = cblk_height.trailing_zeros();
            tccp.cblk_style = params.code_block_style;
            tccp.qmfbid = if params.irreversible {
                TRANSFORM_IRREVERSIBLE_9_7
            } else {
                TRANSFORM_REVERSIBLE_5_3
            };
            tccp.quantization_style = quantization;
            tccp.num_guard_bits = params.guard_bits;
            tccp.quantization_set = true;
            tccp.dc_level_shift = if component.signed {
                0
            } else {
                1 << (component.precision - 1)
            };
            if let Some(&(last_width, last_height)) = params.precincts.last() {
                for level in 0..resolutions as usize {
                    let resolution = resolutions as usize - 1 - level;
                    let (pw, ph) = match params.precincts.get(level) {
                        Some(&(width, height)) => (width.trailing_zeros(), height.trailing_zeros()),
                        None => {
                            let extra = (level + 1 - params.precincts.len()) as u32;
                            (
                                last_width.trailing_zeros().saturating_sub(extra).max(1),
                                last_height.trailing_zeros().saturating_sub(extra).max(1),
                            )
                        }
                    };
                    tccp.precinct_width_exp[resolution] = pw;
                    tccp.precinct_height_exp[resolution] = ph;
                }
            }
            calc_step_sizes(tccp, component.precision);
        }
        if let Some((component, shift)) = params.roi {
            tcp.tccps[component as usize].roi_shift = shift;
        }
        tcp.main_qcd_style = quantization;
        tcp.main_qcd_num_step_sizes = tcp.tccps[0].num_step_sizes;
        job.tcp = tcp;
        Ok(())
    });
    if params.mct == MctMode::Custom {
        list.push("setup_custom_mct", |job| {
            job.tcp.mct_coding_matrix = job.params.mct_matrix.clone();
            prepare_custom_mct(&mut job.tcp)?;
            job.cp.rsiz = mct_rsiz(job.cp.rsiz);
            Ok(())
        });
    }
    list.push("compute_tile_parts", |job| {
        let num_tiles = job.cp.num_tiles();
        let components = job.image.components.len() as u32;
        let flag = job.params.tile_part_flag;
        let mut counts = Vec::with_capacity(num_tiles as usize);
        for tile in 0..num_tiles {
            let rect = job.cp.tile_rect(tile, job.image.bounds());
            let precincts = max_precincts(rect, &job.image, &job.tcp);
            let resolutions = job.tcp.max_resolutions();
            let mut groups: Vec<(ProgressionOrder, ProgressionExtent)> = job
                .tcp
                .pocs
                .iter()
                .map(|poc| {
                    let extent = ProgressionExtent {
                        layers: poc.layer_end as u32,
                        resolutions: (poc.res_end as u32).min(resolutions) - poc.res_start as u32,
                        components: (poc.comp_end as u32).min(components) - poc.comp_start as u32,
                        precincts,
                    };
                    (poc.progression, extent)
                })
                .collect();
            if groups.is_empty() {
                let extent = ProgressionExtent {
                    layers: job.tcp.num_layers as u32,
                    resolutions,
                    components,
                    precincts,
                };
                groups.push((job.tcp.progression, extent));
            }
            let total: u32 = groups
                .iter()
                .map(|(progression, extent)| tile_parts_in_group(*progression, flag, extent))
                .fold(0, u32::saturating_add);
            if total > MAXIMUM_TILE_PARTS {
                log::error!("Tile {tile} would need {total} tile-parts, at most {MAXIMUM_TILE_PARTS} are allowed");
                return Err(J2kError::TooManyTileParts { tile: tile as u16 });
            }
            counts.push(total as u8);
        }
        job.tile_parts = counts;
        Ok(())
    });
    list
}

pub struct J2kEncoder {
    params: CompressParams,
    coder: Box<dyn TileCoder>,
    writer: J2kWriter,
    /// Image geometry on the reference grid, without samples.
    image: Option<J2kImage>,
    cp: CodingParams,
    tcp: TileCodingParams,
    tile_parts: Vec<u8>,
    tiles_written: Vec<bool>,
}

impl J2kEncoder {
    pub fn new(params: CompressParams) -> Self {
        Self::with_coder(params, Box::new(StoredTileCoder::new()))
    }

    pub fn with_coder(params: CompressParams, coder: Box<dyn TileCoder>) -> Self {
        Self {
            params,
            coder,
            writer: J2kWriter::new(),
            image: None,
            cp: CodingParams::default(),
            tcp: TileCodingParams::default(),
            tile_parts: Vec::new(),
            tiles_written: Vec::new(),
        }
    }

    pub fn params(&self) -> &CompressParams {
        &self.params
    }

    pub fn coding_params(&self) -> &CodingParams {
        &self.cp
    }

    pub fn tile_coding_params(&self) -> &TileCodingParams {
        &self.tcp
    }

    /// Tile-parts every tile is written as.
    pub fn tile_part_counts(&self) -> &[u8] {
        &self.tile_parts
    }

    pub fn index(&self) -> Option<&CodestreamIndex> {
        self.writer.index()
    }

    /// Validates the parameters against `image` and writes the main header.
    pub fn start_compress(&mut self, stream: &mut dyn J2kStream, image: &J2kImage) -> Result<(), J2kError> {
        if self.image.is_some() {
            log::error!("start_compress called twice");
            return Err(J2kError::InvalidOperation);
        }
        image.validate_buffers()?;
        let (ox, oy) = self.params.image_offset;
        let (Some(x1), Some(y1)) = (image.x1.checked_add(ox), image.y1.checked_add(oy)) else {
            log::error!("Image offset ({ox}, {oy}) moves the image past the reference grid");
            return Err(J2kError::InvalidArgument);
        };
        let mut geometry =
            J2kImage::new(image.x0 + ox, image.y0 + oy, x1, y1, image.components.clone())?;
        for (component, source) in geometry.components.iter_mut().zip(&image.components) {
            if component.data.is_some() && component.sample_count() != source.sample_count() {
                log::error!("Image offset changes the component sample grid");
                return Err(J2kError::InvalidImageBuffer);
            }
            component.data = None;
        }
        geometry.metadata = image.metadata.clone();

        let mut job = SetupJob {
            params: &self.params,
            image: geometry,
            cp: CodingParams::default(),
            tcp: TileCodingParams::default(),
            tile_parts: Vec::new(),
        };
        validation_procedures(&self.params).execute(&mut job)?;
        execution_procedures(&self.params).execute(&mut job)?;
        let SetupJob {
            image: geometry,
            cp,
            tcp,
            tile_parts,
            ..
        } = job;

        let total_tile_parts = tile_parts.iter().map(|&count| count as usize).sum();
        let options = HeaderOptions {
            write_tlm: self.params.write_tlm,
            build_index: self.params.build_index,
        };
        self.writer
            .write_main_header(stream, &geometry, &cp, &tcp, total_tile_parts, options)?;
        self.coder.init(&geometry, self.params.num_threads)?;
        log::info!(
            "Encoding {}x{} image: {} tiles, {total_tile_parts} tile-parts",
            geometry.x1 - geometry.x0,
            geometry.y1 - geometry.y0,
            cp.num_tiles()
        );

        self.tiles_written = vec![false; cp.num_tiles() as usize];
        self.tile_parts = tile_parts;
        self.cp = cp;
        self.tcp = tcp;
        self.image = Some(geometry);
        Ok(())
    }

    fn geometry(&self) -> Result<&J2kImage, J2kError> {
        self.image.as_ref().ok_or_else(|| {
            log::error!("start_compress must be called first");
            J2kError::InvalidOperation
        })
    }

    /// Encodes every tile of `image`. The sample buffers of a single tile
    /// image are moved to the tile coder and back instead of copied.
    pub fn encode(&mut self, stream: &mut dyn J2kStream, image: &mut J2kImage) -> Result<(), J2kError> {
        let geometry = self.geometry()?;
        if image.components.len() != geometry.components.len()
            || image
                .components
                .iter()
                .zip(&geometry.components)
                .any(|(c, g)| c.data.as_ref().is_none_or(|data| data.len() != g.sample_count()))
        {
            log::error!("Image buffers do not match the image geometry");
            return Err(J2kError::InvalidImageBuffer);
        }

        let num_tiles = self.cp.num_tiles();
        if num_tiles == 1 {
            let samples = self.take_single_tile(image)?;
            let result = self.encode_tile(stream, 0, &samples);
            for (component, plane) in image.components.iter_mut().zip(samples.components) {
                component.data = Some(plane.data);
            }
            return result;
        }
        for tile in 0..num_tiles as u16 {
            let samples = self.gather_tile(tile, image)?;
            self.encode_tile(stream, tile, &samples)?;
        }
        Ok(())
    }

    /// Encodes tile `tile` from planar samples: every component's tile
    /// area row by row, on one byte up to 8 bits and two big-endian bytes
    /// above.
    pub fn write_tile(&mut self, stream: &mut dyn J2kStream, tile: u16, data: &[u8]) -> Result<(), J2kError> {
        let geometry = self.geometry()?;
        if tile as u32 >= self.cp.num_tiles() {
            return Err(J2kError::InvalidTileIndex { tile: tile as u32 });
        }
        let rect = self.cp.tile_rect(tile as u32, geometry.bounds());
        let mut components = Vec::with_capacity(geometry.components.len());
        let mut remaining = data;
        for component in &geometry.components {
            let area = rect.subsampled(component.dx, component.dy);
            let width = if component.precision <= 8 { 1 } else { 2 };
            let length = area.area() as usize * width;
            if remaining.len() < length {
                log::error!("Tile {tile}: {} bytes given, more are needed", data.len());
                return Err(J2kError::InvalidImageBuffer);
            }
            let (plane, rest) = remaining.split_at(length);
            remaining = rest;
            let samples = plane
                .chunks_exact(width)
                .map(|bytes| match (bytes, component.signed) {
                    ([byte], false) => *byte as i32,
                    ([byte], true) => *byte as i8 as i32,
                    ([high, low], false) => u16::from_be_bytes([*high, *low]) as i32,
                    ([high, low], true) => i16::from_be_bytes([*high, *low]) as i32,
                    _ => 0,
                })
                .collect();
            components.push(TileComponentSamples {
                rect: area,
                resolutions_decoded: self.tcp.tccps[0].num_resolutions,
                data: samples,
            });
        }
        if !remaining.is_empty() {
            log::error!("Tile {tile}: {} bytes left over", remaining.len());
            return Err(J2kError::InvalidImageBuffer);
        }
        self.encode_tile(stream, tile, &TileSamples { components })
    }

    /// Writes EOC and completes the TLM segments.
    pub fn end_compress(&mut self, stream: &mut dyn J2kStream) -> Result<(), J2kError> {
        self.geometry()?;
        if let Some(missing) = self.tiles_written.iter().position(|written| !written) {
            log::error!("Tile {missing} was never written");
            return Err(J2kError::InvalidOperation);
        }
        self.writer.finish(stream)
    }

    fn take_single_tile(&self, image: &mut J2kImage) -> Result<TileSamples, J2kError> {
        let geometry = self.geometry()?;
        let resolutions = self.tcp.tccps[0].num_resolutions;
        let mut components = Vec::with_capacity(image.components.len());
        for (component, shape) in image.components.iter_mut().zip(&geometry.components) {
            components.push(TileComponentSamples {
                rect: shape.rect(),
                resolutions_decoded: resolutions,
                data: component.data.take().ok_or(J2kError::InvalidImageBuffer)?,
            });
        }
        Ok(TileSamples { components })
    }

    fn gather_tile(&self, tile: u16, image: &J2kImage) -> Result<TileSamples, J2kError> {
        let geometry = self.geometry()?;
        let rect = self.cp.tile_rect(tile as u32, geometry.bounds());
        let resolutions = self.tcp.tccps[0].num_resolutions;
        let mut components = Vec::with_capacity(geometry.components.len());
        for (shape, source) in geometry.components.iter().zip(&image.components) {
            let data = source.data.as_ref().ok_or(J2kError::InvalidImageBuffer)?;
            let area = rect.subsampled(shape.dx, shape.dy);
            let mut samples = Vec::with_capacity(area.area() as usize);
            for y in area.y0..area.y1 {
                let start = (y - shape.y0) as usize * shape.width as usize + (area.x0 - shape.x0) as usize;
                samples.extend_from_slice(&data[start..start + area.width() as usize]);
            }
            components.push(TileComponentSamples {
                rect: area,
                resolutions_decoded: resolutions,
                data: samples,
            });
        }
        Ok(TileSamples { components })
    }

    fn encode_tile(&mut self, stream: &mut dyn J2kStream, tile: u16, samples: &TileSamples) -> Result<(), J2kError> {
        let geometry = self.image.as_ref().ok_or(J2kError::InvalidOperation)?;
        match self.tiles_written.get(tile as usize) {
            None => return Err(J2kError::InvalidTileIndex { tile: tile as u32 }),
            Some(true) => {
                log::error!("Tile {tile} was already written");
                return Err(J2kError::InvalidOperation);
            }
            Some(false) => {}
        }
        let info = TileInfo {
            index: tile,
            rect: self.cp.tile_rect(tile as u32, geometry.bounds()),
            tcp: &self.tcp,
            components: &geometry.components,
            reduce: 0,
            max_layers: 0,
        };
        self.coder.init_encode_tile(&info)?;
        let budget = self.coder.encoded_tile_size(&info);
        let encoded = self.coder.encode_tile(&info, samples).map_err(|error| {
            log::error!("Tile {tile} could not be encoded: {error}");
            J2kError::TileCoderFailed { tile }
        })?;
        if encoded.data.len() as u64 > budget {
            log::error!("Tile {tile}: {} coded bytes exceed the {budget} byte budget", encoded.data.len());
            return Err(J2kError::TileCoderFailed { tile });
        }
        self.write_tile_parts(stream, tile, &encoded)?;
        self.tiles_written[tile as usize] = true;
        log::info!("Tile {}/{} encoded", tile + 1, self.tiles_written.len());
        Ok(())
    }

    /// Splits the tile's packets over its tile-parts, in order. A
    /// tile-part may end up without packets.
    fn write_tile_parts(&mut self, stream: &mut dyn J2kStream, tile: u16, encoded: &EncodedTile) -> Result<(), J2kError> {
        let num_tile_parts = self.tile_parts[tile as usize];
        let total: u64 = encoded.packet_lengths.iter().map(|&l| l as u64).sum();
        let whole = [encoded.data.len() as u32];
        let lengths: &[u32] = if encoded.packet_lengths.is_empty() || total != encoded.data.len() as u64 {
            if !encoded.packet_lengths.is_empty() {
                log::warn!("Tile {tile}: packet lengths do not add up to the coded data. Writing a single packet");
            }
            &whole
        } else {
            &encoded.packet_lengths
        };

        let mut offsets = Vec::with_capacity(lengths.len() + 1);
        offsets.push(0usize);
        for &length in lengths {
            offsets.push(offsets[offsets.len() - 1] + length as usize);
        }
        let parts = num_tile_parts as usize;
        for part in 0..parts {
            let first = part * lengths.len() / parts;
            let last = (part + 1) * lengths.len() / parts;
            let tile_part = TilePart {
                tile,
                tile_part: part as u8,
                num_tile_parts,
                packet_lengths: &lengths[first..last],
                write_plt: self.params.write_plt,
                data: &encoded.data[offsets[first]..offsets[last]],
            };
            self.writer.write_tile_part(stream, &tile_part)?;
        }
        Ok(())
    }
}

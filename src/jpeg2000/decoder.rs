//! Codestream decoder.
//!
//! [`J2kDecoder`] drives a [`J2kParser`] over the main header and then over
//! the tile-parts, hands the data of every complete tile to a [`TileCoder`]
//! and copies the returned samples into the output image.

use super::image::{J2kImage, Rect, ceil_div};
use super::index::CodestreamIndex;
use super::markers::{DecodeContext, TileWindow};
use super::params::CodingParams;
use super::parser::J2kParser;
use super::procedure::ProcedureList;
use super::state::DecoderState;
use super::tile_coder::{StoredTileCoder, TileCoder, TileInfo, TileSamples};
use crate::constants::MAXIMUM_RESOLUTIONS;
use crate::error::J2kError;
use crate::stream::J2kStream;

/// Options of a decode session.
#[derive(Debug, Clone, Default)]
pub struct DecompressParams {
    /// Resolution levels to discard.
    pub reduce: u32,
    /// Quality layers to decode, 0 for all.
    pub max_layers: u16,
    /// Region of the reference grid to decode, the whole image when `None`.
    pub area: Option<Rect>,
    /// Decode only this tile.
    pub tile_index: Option<u16>,
    /// Output precision per component. The last entry applies to the
    /// remaining components, 0 keeps the coded precision.
    pub precision: Vec<u8>,
    pub num_threads: u32,
    pub build_index: bool,
}

/// What the header procedures work on.
struct HeaderJob<'a> {
    stream: &'a mut dyn J2kStream,
    parser: &'a mut J2kParser,
    coder: &'a mut dyn TileCoder,
    params: &'a DecompressParams,
    image: Option<J2kImage>,
}

pub struct J2kDecoder {
    params: DecompressParams,
    coder: Box<dyn TileCoder>,
    parser: J2kParser,
    /// Parser state right after the main header, restored before every decode pass.
    header: Option<DecodeContext>,
    area: Option<Rect>,
    window: TileWindow,
}

impl J2kDecoder {
    pub fn new(params: DecompressParams) -> Self {
        Self::with_coder(params, Box::new(StoredTileCoder::new()))
    }

    pub fn with_coder(params: DecompressParams, coder: Box<dyn TileCoder>) -> Self {
        let parser = J2kParser::new(params.build_index);
        Self {
            params,
            coder,
            parser,
            header: None,
            area: None,
            window: TileWindow::default(),
        }
    }

    pub fn params(&self) -> &DecompressParams {
        &self.params
    }

    /// Main header state, once [`read_header`](Self::read_header) succeeded.
    pub fn header(&self) -> Option<&DecodeContext> {
        self.header.as_ref()
    }

    pub fn coding_params(&self) -> Option<&CodingParams> {
        self.header.as_ref().map(|header| &header.cp)
    }

    /// Area set by [`set_decode_area`](Self::set_decode_area), clamped to the image.
    pub fn decode_area(&self) -> Option<Rect> {
        self.area
    }

    /// Codestream index built so far, when indexing is enabled. It covers
    /// every tile-part read by `decode` and `get_tile` calls on this decoder.
    pub fn index(&self) -> Option<&CodestreamIndex> {
        self.parser.ctx.index.as_ref()
    }

    /// Reads the main header and returns the output image, sized for the
    /// requested reduction and area, with no sample buffers.
    pub fn read_header(&mut self, stream: &mut dyn J2kStream) -> Result<J2kImage, J2kError> {
        let mut image = {
            let mut validation: ProcedureList<HeaderJob<'_>> = ProcedureList::new();
            validation.push("check_decoder_state", |job| {
                if job.parser.ctx.state != DecoderState::NONE {
                    log::error!("The main header was already read");
                    return Err(J2kError::InvalidOperation);
                }
                Ok(())
            });
            validation.push("check_reduce", |job| {
                if job.params.reduce >= MAXIMUM_RESOLUTIONS {
                    log::error!("Cannot discard {} resolution levels", job.params.reduce);
                    return Err(J2kError::InvalidArgument);
                }
                Ok(())
            });
            validation.push("check_precision", |job| {
                if job.params.precision.iter().any(|&p| p > 16) {
                    log::error!("Output precision above 16 bits is not supported");
                    return Err(J2kError::InvalidArgument);
                }
                Ok(())
            });

            let mut execution: ProcedureList<HeaderJob<'_>> = ProcedureList::new();
            execution.push("read_header_procedure", |job| {
                job.parser.ctx.reduce = job.params.reduce;
                job.parser.read_header(job.stream)
            });
            execution.push("create_output_image", |job| {
                let mut image = job.parser.ctx.image.clone();
                image.update_component_geometry(image.bounds(), job.params.reduce);
                for component in &mut image.components {
                    component.data = None;
                }
                job.image = Some(image);
                Ok(())
            });
            execution.push("init_tile_coder", |job| match &job.image {
                Some(image) => job.coder.init(image, job.params.num_threads),
                None => Err(J2kError::InvalidOperation),
            });

            let mut job = HeaderJob {
                stream,
                parser: &mut self.parser,
                coder: self.coder.as_mut(),
                params: &self.params,
                image: None,
            };
            validation.execute(&mut job)?;
            execution.execute(&mut job)?;
            job.image.take().ok_or(J2kError::InvalidOperation)?
        };

        self.window = self.parser.ctx.tile_window;
        self.header = Some(self.parser.ctx.clone());
        if let Some(area) = self.params.area {
            self.set_decode_area(&mut image, area)?;
        }
        log::info!(
            "Main header read: {}x{} image, {} components, {} tiles",
            image.x1 - image.x0,
            image.y1 - image.y0,
            image.components.len(),
            self.parser.ctx.cp.num_tiles()
        );
        Ok(image)
    }

    /// Restricts decoding to `area` of the reference grid. Edges past the
    /// image are clamped; an area outside the image is rejected.
    pub fn set_decode_area(&mut self, image: &mut J2kImage, area: Rect) -> Result<(), J2kError> {
        let header = self.header.as_ref().ok_or_else(|| {
            log::error!("Need to decode the main header before setting a decode area");
            J2kError::InvalidOperation
        })?;
        let bounds = header.image.bounds();
        if area.x0 >= area.x1 || area.y0 >= area.y1 {
            log::error!(
                "Empty decode area ({}, {}) - ({}, {})",
                area.x0,
                area.y0,
                area.x1,
                area.y1
            );
            return Err(J2kError::InvalidDecodeArea);
        }
        if area.x0 >= bounds.x1 || area.y0 >= bounds.y1 || area.x1 <= bounds.x0 || area.y1 <= bounds.y0 {
            log::error!(
                "Decode area ({}, {}) - ({}, {}) is outside the image ({}, {}) - ({}, {})",
                area.x0,
                area.y0,
                area.x1,
                area.y1,
                bounds.x0,
                bounds.y0,
                bounds.x1,
                bounds.y1
            );
            return Err(J2kError::InvalidDecodeArea);
        }
        let clamped = area.intersection(&bounds);
        if clamped != area {
            log::warn!(
                "Decode area clamped to the image: ({}, {}) - ({}, {})",
                clamped.x0,
                clamped.y0,
                clamped.x1,
                clamped.y1
            );
        }

        let cp = &header.cp;
        self.window = TileWindow {
            x0: (clamped.x0 - cp.tx0) / cp.t_width,
            y0: (clamped.y0 - cp.ty0) / cp.t_height,
            x1: ceil_div(clamped.x1 - cp.tx0, cp.t_width).min(cp.t_grid_width),
            y1: ceil_div(clamped.y1 - cp.ty0, cp.t_height).min(cp.t_grid_height),
        };
        self.area = Some(clamped);
        image.update_component_geometry(clamped, self.params.reduce);
        for component in &mut image.components {
            component.data = None;
        }
        log::debug!(
            "Decode area covers tiles x {}..{}, y {}..{}",
            self.window.x0,
            self.window.x1,
            self.window.y0,
            self.window.y1
        );
        Ok(())
    }

    /// Decodes every tile of the decode area into `image`.
    pub fn decode(&mut self, stream: &mut dyn J2kStream, image: &mut J2kImage) -> Result<(), J2kError> {
        if let Some(tile) = self.params.tile_index {
            return self.get_tile(stream, image, tile);
        }
        let mut ctx = self.restore_header()?;
        Self::check_output(&ctx, image)?;
        ctx.tile_window = self.window;
        ctx.tile_to_decode = None;
        self.begin_pass(ctx);

        let expected = (self.window.x1 - self.window.x0) * (self.window.y1 - self.window.y0);
        let start = self.parser.main_header_end();
        self.parser.begin_tiles(stream, start, expected)?;

        let mut decoded = 0;
        while let Some(tile) = self.parser.next_tile(stream)? {
            self.decode_tile(tile, image)?;
            decoded += 1;
        }
        if decoded == 0 {
            log::error!("No tiles were decoded");
            return Err(J2kError::NoTilesDecoded);
        }
        if decoded < expected {
            log::warn!("Only {decoded} of {expected} tiles were decoded");
        }
        self.finish_image(image);
        Ok(())
    }

    /// Decodes a single tile into `image`, resized to the tile's area.
    pub fn get_tile(
        &mut self,
        stream: &mut dyn J2kStream,
        image: &mut J2kImage,
        tile: u16,
    ) -> Result<(), J2kError> {
        let mut ctx = self.restore_header()?;
        Self::check_output(&ctx, image)?;
        let num_tiles = ctx.cp.num_tiles();
        if tile as u32 >= num_tiles {
            log::error!("Tile index {tile} is out of range, the image has {num_tiles} tiles");
            return Err(J2kError::InvalidTileIndex { tile: tile as u32 });
        }
        ctx.tile_to_decode = Some(tile);

        let main_header_end = self.parser.main_header_end();
        let start = self.tile_start(&ctx, tile);
        if start != main_header_end {
            // TLM entries are matched in codestream order from the first tile-part.
            ctx.cp.tlm = None;
            log::debug!("Seeking to tile {tile} at offset {start}");
        }
        let rect = ctx.cp.tile_rect(tile as u32, ctx.image.bounds());
        self.begin_pass(ctx);
        image.update_component_geometry(rect, self.params.reduce);
        for component in &mut image.components {
            component.data = None;
        }

        self.parser.begin_tiles(stream, start, 1)?;
        match self.parser.next_tile(stream)? {
            Some(found) if found == tile => self.decode_tile(tile, image)?,
            Some(found) => {
                log::error!("Tile read is not the desired one ({found} vs {tile})");
                return Err(J2kError::WrongTileDecoded { found, wanted: tile });
            }
            None => {
                log::error!("Tile {tile} was not found in the codestream");
                return Err(J2kError::NoTilesDecoded);
            }
        }
        self.finish_image(image);
        Ok(())
    }

    /// Hands a fresh header state to the parser. The codestream index
    /// carries over so records from earlier passes are kept.
    fn begin_pass(&mut self, mut ctx: DecodeContext) {
        if let Some(index) = self.parser.ctx.index.take() {
            ctx.index = Some(index);
        }
        self.parser.ctx = ctx;
    }

    fn restore_header(&self) -> Result<DecodeContext, J2kError> {
        self.header.clone().ok_or_else(|| {
            log::error!("The main header must be read before decoding");
            J2kError::InvalidOperation
        })
    }

    fn check_output(ctx: &DecodeContext, image: &J2kImage) -> Result<(), J2kError> {
        if image.components.len() != ctx.image.components.len() {
            log::error!(
                "Output image has {} components, the codestream {}",
                image.components.len(),
                ctx.image.components.len()
            );
            return Err(J2kError::InvalidImageBuffer);
        }
        image.validate_buffers()
    }

    /// Where a scan for `tile` can start: a TLM offset or a position seen
    /// in an earlier pass. PPM and PLM data are consumed in codestream
    /// order, so with either present the scan starts at the first tile-part.
    fn tile_start(&self, ctx: &DecodeContext, tile: u16) -> u64 {
        let main_header_end = self.parser.main_header_end();
        if ctx.cp.ppm.is_some() || ctx.cp.plm.is_some() {
            return main_header_end;
        }
        ctx.cp
            .tlm
            .as_ref()
            .and_then(|tlm| tlm.tile_offset(tile))
            .map(|offset| main_header_end + offset)
            .or_else(|| self.parser.tile_start(tile))
            .or_else(|| {
                self.parser
                    .ctx
                    .index
                    .as_ref()
                    .and_then(|index| index.first_tile_part_position(tile))
            })
            .unwrap_or(main_header_end)
    }

    fn decode_tile(&mut self, tile: u16, image: &mut J2kImage) -> Result<(), J2kError> {
        let ctx = &mut self.parser.ctx;
        let rect = ctx.cp.tile_rect(tile as u32, ctx.image.bounds());
        let tcp = &mut ctx.cp.tcps[tile as usize];
        let data = tcp.tile_data.take().unwrap_or_default();
        let info = TileInfo {
            index: tile,
            rect,
            tcp: &*tcp,
            components: &ctx.image.components,
            reduce: ctx.reduce,
            max_layers: self.params.max_layers,
        };
        log::debug!(
            "Decoding tile {tile}: {} bytes in, {} bytes of samples out",
            data.len(),
            self.coder.decoded_tile_size(&info)
        );
        self.coder.init_decode_tile(&info)?;
        let samples = self
            .coder
            .decode_tile(&info, &data.contiguous())
            .map_err(|error| {
                log::error!("Tile {tile} could not be decoded: {error}");
                J2kError::TileCoderFailed { tile }
            })?;
        drop(data);
        tcp.packet_headers.clear();
        tcp.packet_lengths.clear();

        store_tile_samples(image, samples)?;
        log::info!("Tile {}/{} decoded", tile + 1, ctx.cp.num_tiles());
        Ok(())
    }

    fn finish_image(&self, image: &mut J2kImage) {
        image.allocate();
        if self.params.precision.is_empty() {
            return;
        }
        for (c, component) in image.components.iter_mut().enumerate() {
            let wanted = self
                .params
                .precision
                .get(c)
                .or(self.params.precision.last())
                .copied()
                .unwrap_or(0);
            if wanted == 0 || wanted == component.precision {
                continue;
            }
            if let Some(data) = component.data.as_mut() {
                if wanted < component.precision {
                    let shift = component.precision - wanted;
                    data.iter_mut().for_each(|sample| *sample >>= shift);
                } else {
                    let shift = wanted - component.precision;
                    data.iter_mut().for_each(|sample| *sample <<= shift);
                }
            }
            component.precision = wanted;
        }
    }
}

/// Copies tile samples into the overlapping part of every output
/// component. A plane covering a whole unallocated component is moved in.
fn store_tile_samples(image: &mut J2kImage, samples: TileSamples) -> Result<(), J2kError> {
    if samples.components.len() != image.components.len() {
        return Err(J2kError::InvalidImageBuffer);
    }
    for (component, plane) in image.components.iter_mut().zip(samples.components) {
        if plane.data.len() as u64 != plane.rect.area() {
            log::error!(
                "Tile coder returned {} samples for a {}x{} area",
                plane.data.len(),
                plane.rect.width(),
                plane.rect.height()
            );
            return Err(J2kError::InvalidImageBuffer);
        }
        component.resolutions_decoded = plane.resolutions_decoded;
        let target = component.rect();
        if plane.rect == target && component.data.is_none() {
            component.data = Some(plane.data);
            continue;
        }
        let overlap = plane.rect.intersection(&target);
        if overlap.is_empty() {
            continue;
        }
        component.allocate();
        let Some(data) = component.data.as_mut() else {
            continue;
        };
        let width = overlap.width() as usize;
        let source_stride = plane.rect.width() as usize;
        let target_stride = target.width() as usize;
        for y in overlap.y0..overlap.y1 {
            let source = (y - plane.rect.y0) as usize * source_stride + (overlap.x0 - plane.rect.x0) as usize;
            let dest = (y - target.y0) as usize * target_stride + (overlap.x0 - target.x0) as usize;
            data[dest..dest + width].copy_from_slice(&plane.data[source..source + width]);
        }
    }
    Ok(())
}

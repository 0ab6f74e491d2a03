//! Codestream writer.
//!
//! The main header is written by a [`ProcedureList`] assembled from the
//! coding parameters: optional segments (CAP, COC/QCC, TLM, POC, RGN, COM,
//! the Part 2 MCT group) are appended only when they apply. Tile-parts are
//! written with a zero Psot that is patched once their length is known.

use super::image::J2kImage;
use super::index::CodestreamIndex;
use super::markers::cod::{needs_coc, write_coc, write_cod};
use super::markers::length::{TlmWriter, write_plt};
use super::markers::mct::write_mct_group;
use super::markers::misc::{write_cap, write_com, write_crg};
use super::markers::poc::write_poc;
use super::markers::qcd::{needs_qcc, write_qcc, write_qcd};
use super::markers::rgn::write_rgn;
use super::markers::siz::write_siz;
use super::markers::sot::{patch_psot, write_sot};
use super::markers::write_marker;
use super::params::{CodingParams, MctMode, TileCodingParams};
use super::procedure::ProcedureList;
use crate::error::J2kError;
use crate::marker_code::J2kMarkerCode;
use crate::stream::J2kStream;

/// Everything the main header procedures read or produce.
pub struct HeaderContext<'a> {
    pub stream: &'a mut dyn J2kStream,
    pub image: &'a J2kImage,
    pub cp: &'a CodingParams,
    /// Parameters shared by every tile.
    pub tcp: &'a TileCodingParams,
    /// Tile-parts the codestream will hold, used to size TLM.
    pub total_tile_parts: usize,
    pub tlm: Option<TlmWriter>,
    pub index: Option<CodestreamIndex>,
}

impl HeaderContext<'_> {
    fn record(&mut self, marker: J2kMarkerCode, start: u64) {
        let length = (self.stream.tell() - start) as u32;
        if let Some(index) = self.index.as_mut() {
            index.add_main_marker(marker.code(), start, length);
        }
    }
}

fn push_segment<'a, F>(
    list: &mut ProcedureList<HeaderContext<'a>>,
    name: &'static str,
    marker: J2kMarkerCode,
    mut write: F,
) where
    F: FnMut(&mut HeaderContext<'a>) -> Result<(), J2kError> + 'static,
{
    list.push(name, move |ctx| {
        let start = ctx.stream.tell();
        write(ctx)?;
        ctx.record(marker, start);
        Ok(())
    });
}

/// Main header options that are not part of the coding parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderOptions {
    pub write_tlm: bool,
    pub build_index: bool,
}

/// One tile-part ready to be written.
#[derive(Debug, Clone, Copy)]
pub struct TilePart<'a> {
    pub tile: u16,
    pub tile_part: u8,
    pub num_tile_parts: u8,
    /// Lengths of the packets in `data`, written as PLT when `write_plt` is set.
    pub packet_lengths: &'a [u32],
    pub write_plt: bool,
    pub data: &'a [u8],
}

/// Writer state between the main header and EOC.
#[derive(Debug, Default)]
pub struct J2kWriter {
    codestream_start: u64,
    tlm: Option<TlmWriter>,
    index: Option<CodestreamIndex>,
    tile_parts_written: usize,
}

impl J2kWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Main header procedures for `cp` and `tcp`, in codestream order.
    pub fn header_procedures<'a>(
        cp: &CodingParams,
        tcp: &TileCodingParams,
        options: HeaderOptions,
    ) -> ProcedureList<HeaderContext<'a>> {
        use J2kMarkerCode as M;

        let mut list = ProcedureList::new();
        list.push("write_soc", |ctx: &mut HeaderContext<'a>| {
            let start = ctx.stream.tell();
            write_marker(ctx.stream, M::StartOfCodestream)?;
            ctx.record(M::StartOfCodestream, start);
            Ok(())
        });
        push_segment(&mut list, "write_siz", M::ImageAndTileSize, |ctx| {
            write_siz(ctx.stream, ctx.image, ctx.cp)
        });
        if cp.pcap != 0 || !cp.ccap.is_empty() {
            push_segment(&mut list, "write_cap", M::Capability, |ctx| {
                write_cap(ctx.stream, ctx.cp.pcap, &ctx.cp.ccap)
            });
        }
        push_segment(&mut list, "write_cod", M::CodingStyleDefault, |ctx| {
            write_cod(ctx.stream, ctx.tcp)
        });
        for component in 1..tcp.tccps.len() {
            if needs_coc(tcp, component) {
                push_segment(&mut list, "write_coc", M::CodingStyleComponent, move |ctx| {
                    write_coc(ctx.stream, ctx.tcp, component as u32)
                });
            }
        }
        push_segment(&mut list, "write_qcd", M::QuantizationDefault, |ctx| {
            write_qcd(ctx.stream, ctx.tcp)
        });
        for component in 1..tcp.tccps.len() {
            if needs_qcc(tcp, component) {
                push_segment(&mut list, "write_qcc", M::QuantizationComponent, move |ctx| {
                    write_qcc(ctx.stream, ctx.tcp, component as u32)
                });
            }
        }
        if options.write_tlm {
            push_segment(&mut list, "write_tlm", M::TilePartLengths, |ctx| {
                let num_tiles = ctx.cp.num_tiles();
                ctx.tlm = Some(TlmWriter::reserve(ctx.stream, ctx.total_tile_parts, num_tiles)?);
                Ok(())
            });
        }
        if !tcp.pocs.is_empty() {
            push_segment(&mut list, "write_poc", M::ProgressionOrderChange, |ctx| {
                write_poc(ctx.stream, &ctx.tcp.pocs, ctx.tcp.tccps.len() as u32)
            });
        }
        for (component, tccp) in tcp.tccps.iter().enumerate() {
            if tccp.roi_shift != 0 {
                push_segment(&mut list, "write_rgn", M::RegionOfInterest, move |ctx| {
                    let shift = ctx.tcp.tccps[component].roi_shift;
                    write_rgn(ctx.stream, component as u32, ctx.tcp.tccps.len() as u32, shift)
                });
            }
        }
        if !cp.registration.is_empty() {
            push_segment(&mut list, "write_crg", M::ComponentRegistration, |ctx| {
                write_crg(ctx.stream, &ctx.cp.registration)
            });
        }
        for position in 0..cp.comments.len() {
            push_segment(&mut list, "write_com", M::Comment, move |ctx| {
                write_com(ctx.stream, &ctx.cp.comments[position])
            });
        }
        if tcp.mct == MctMode::Custom {
            // CBD, MCT, MCC and MCO are recorded as one entry.
            push_segment(&mut list, "write_mct_group", M::MultipleComponentTransform, |ctx| {
                write_mct_group(ctx.stream, ctx.tcp, ctx.image)
            });
        }
        list
    }

    /// Writes SOC through the last main header segment.
    pub fn write_main_header(
        &mut self,
        stream: &mut dyn J2kStream,
        image: &J2kImage,
        cp: &CodingParams,
        tcp: &TileCodingParams,
        total_tile_parts: usize,
        options: HeaderOptions,
    ) -> Result<(), J2kError> {
        self.codestream_start = stream.tell();
        let mut procedures = Self::header_procedures(cp, tcp, options);
        let mut ctx = HeaderContext {
            stream,
            image,
            cp,
            tcp,
            total_tile_parts,
            tlm: None,
            index: options.build_index.then(|| CodestreamIndex::new(cp.num_tiles())),
        };
        if let Some(index) = ctx.index.as_mut() {
            index.main_header_start = self.codestream_start;
        }
        procedures.execute(&mut ctx)?;
        self.tlm = ctx.tlm.take();
        self.index = ctx.index.take();
        if let Some(index) = self.index.as_mut() {
            index.main_header_end = ctx.stream.tell();
        }
        log::debug!(
            "Main header written: {} bytes",
            ctx.stream.tell() - self.codestream_start
        );
        Ok(())
    }

    /// Writes SOT, optional PLT, SOD and the data of one tile-part, and
    /// returns its Psot.
    pub fn write_tile_part(
        &mut self,
        stream: &mut dyn J2kStream,
        part: &TilePart<'_>,
    ) -> Result<u32, J2kError> {
        let start = stream.tell();
        let psot_position = write_sot(stream, part.tile, part.tile_part, part.num_tile_parts)?;
        if let Some(index) = self.index.as_mut() {
            index.begin_tile_part(part.tile, part.tile_part, part.num_tile_parts, start);
            index.add_tile_marker(part.tile, J2kMarkerCode::StartOfTile.code(), start, 12);
        }
        if part.write_plt && !part.packet_lengths.is_empty() {
            let plt_start = stream.tell();
            write_plt(stream, part.packet_lengths)?;
            if let Some(index) = self.index.as_mut() {
                let length = (stream.tell() - plt_start) as u32;
                index.add_tile_marker(part.tile, J2kMarkerCode::PacketLengthTilePart.code(), plt_start, length);
            }
        }
        let sod = stream.tell();
        write_marker(stream, J2kMarkerCode::StartOfData)?;
        if let Some(index) = self.index.as_mut() {
            index.add_tile_marker(part.tile, J2kMarkerCode::StartOfData.code(), sod, 2);
            index.end_tile_part_header(part.tile, stream.tell());
        }
        stream.write_all(part.data)?;

        let end = stream.tell();
        let psot = u32::try_from(end - start).map_err(|_| {
            log::error!("Tile-part {} of tile {} exceeds 4 GiB", part.tile_part, part.tile);
            J2kError::InvalidOperation
        })?;
        patch_psot(stream, psot_position, psot)?;
        if let Some(tlm) = self.tlm.as_mut() {
            tlm.push(part.tile, psot)?;
        }
        if let Some(index) = self.index.as_mut() {
            index.end_tile_part(part.tile, end);
        }
        self.tile_parts_written += 1;
        log::trace!(
            "Tile {} part {}/{}: Psot {psot}",
            part.tile,
            part.tile_part,
            part.num_tile_parts
        );
        Ok(psot)
    }

    /// Writes EOC, then fills in the reserved TLM segments.
    pub fn finish(&mut self, stream: &mut dyn J2kStream) -> Result<(), J2kError> {
        write_marker(stream, J2kMarkerCode::EndOfCodestream)?;
        if let Some(tlm) = self.tlm.as_ref() {
            tlm.finish(stream)?;
        }
        if let Some(index) = self.index.as_mut() {
            index.codestream_size = stream.tell() - self.codestream_start;
        }
        stream.flush()?;
        log::debug!(
            "Codestream complete: {} tile-parts, {} bytes",
            self.tile_parts_written,
            stream.tell() - self.codestream_start
        );
        Ok(())
    }

    pub fn tile_parts_written(&self) -> usize {
        self.tile_parts_written
    }

    pub fn index(&self) -> Option<&CodestreamIndex> {
        self.index.as_ref()
    }

    pub fn take_index(&mut self) -> Option<CodestreamIndex> {
        self.index.take()
    }
}

//! SOT: start of tile-part.

use super::DecodeContext;
use crate::byte_codec::PayloadReader;
use crate::constants::{SOT_PAYLOAD_LENGTH, SOT_SEGMENT_LENGTH};
use crate::error::J2kError;
use crate::jpeg2000::state::DecoderState;
use crate::marker_code::J2kMarkerCode;
use crate::stream::J2kStream;
use std::io::SeekFrom;

/// Smallest Psot of a tile-part carrying a SOD marker.
const MINIMUM_PSOT: u32 = SOT_SEGMENT_LENGTH + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SotHeader {
    pub tile: u16,
    /// Tile-part length from the SOT marker to the end of its data, 0 for
    /// a tile-part running to the end of the codestream.
    pub psot: u32,
    pub tile_part: u8,
    /// Tile-part count, 0 if not signalled here.
    pub num_tile_parts: u8,
}

impl SotHeader {
    pub fn parse(payload: &[u8]) -> Result<Self, J2kError> {
        if payload.len() != SOT_PAYLOAD_LENGTH as usize {
            log::error!("Error reading SOT marker");
            return Err(J2kError::InvalidMarkerSegmentSize {
                marker: J2kMarkerCode::StartOfTile.code(),
            });
        }
        let mut reader = PayloadReader::new(payload, "SOT");
        Ok(Self {
            tile: reader.read_u16()?,
            psot: reader.read_u32()?,
            tile_part: reader.read_u8()?,
            num_tile_parts: reader.read_u8()?,
        })
    }

    pub fn is_last_signalled(&self) -> bool {
        self.num_tile_parts != 0 && self.tile_part as u16 + 1 == self.num_tile_parts as u16
    }
}

pub fn read_sot(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let header = SotHeader::parse(payload)?;
    let num_tiles = ctx.cp.num_tiles();
    if header.tile as u32 >= num_tiles {
        log::error!("Invalid tile number {}", header.tile);
        return Err(J2kError::InvalidTileIndex {
            tile: header.tile as u32,
        });
    }
    let tile = header.tile;
    let correction = ctx.tile_part_correction;
    let tcp = &mut ctx.cp.tcps[tile as usize];

    let expected = tcp.current_tile_part.map_or(0, |part| part as u16 + 1);
    if header.tile_part as u16 != expected {
        log::error!(
            "Invalid tile-part index for tile {tile}: expected {expected}, got {}",
            header.tile_part
        );
        return Err(J2kError::TilePartIndexDiscontinuity {
            tile,
            expected: expected.min(u8::MAX as u16) as u8,
            found: header.tile_part,
        });
    }

    if header.psot == SOT_SEGMENT_LENGTH {
        log::warn!("Empty SOT marker detected: Psot = {}", header.psot);
    } else if header.psot != 0 && header.psot < MINIMUM_PSOT {
        log::error!("Illegal Psot value {}", header.psot);
        return Err(J2kError::InvalidPsot(header.psot));
    }
    // A.4.2: Psot may be zero for the last tile-part of the codestream.
    if header.psot == 0 {
        ctx.last_tile_part_in_codestream = true;
    }

    if tcp.num_tile_parts != 0 && header.tile_part >= tcp.num_tile_parts {
        log::error!(
            "Current tile-part number ({}) read from SOT marker is greater than total number of tile-parts ({})",
            header.tile_part,
            tcp.num_tile_parts
        );
        ctx.last_tile_part_in_codestream = true;
        return Err(J2kError::InvalidTilePartIndex {
            tile,
            index: header.tile_part,
            count: tcp.num_tile_parts,
        });
    }

    if header.num_tile_parts != 0 {
        let declared = header.num_tile_parts as u16 + correction as u16;
        if declared > u8::MAX as u16 {
            return Err(J2kError::TooManyTileParts { tile });
        }
        let declared = declared as u8;
        if tcp.num_tile_parts != 0 && declared != tcp.num_tile_parts {
            log::error!(
                "Invalid number of tile-parts for tile number {tile}. Got {declared}, expected {} as signalled in previous tile-part(s)",
                tcp.num_tile_parts
            );
            return Err(J2kError::TilePartCountMismatch {
                tile,
                declared,
                known: tcp.num_tile_parts,
            });
        }
        if header.tile_part >= declared {
            log::error!(
                "In SOT marker, TPsot ({}) must be less than the number of tile-parts ({declared})",
                header.tile_part
            );
            ctx.last_tile_part_in_codestream = true;
            return Err(J2kError::InvalidTilePartIndex {
                tile,
                index: header.tile_part,
                count: declared,
            });
        }
        tcp.num_tile_parts = declared;
    }

    tcp.current_tile_part = Some(header.tile_part);
    let num_tile_parts = tcp.num_tile_parts;
    ctx.last_tile_part_read = num_tile_parts != 0 && num_tile_parts as u16 == header.tile_part as u16 + 1;
    ctx.tile_part_data_length = if header.psot == 0 {
        0
    } else {
        (header.psot - SOT_SEGMENT_LENGTH) as u64
    };
    ctx.current_tile = tile;
    ctx.state = DecoderState::TILE_PART_HEADER;

    let tile_x = tile as u32 % ctx.cp.t_grid_width;
    let tile_y = tile as u32 / ctx.cp.t_grid_width;
    ctx.skip_tile_data = match ctx.tile_to_decode {
        Some(wanted) => wanted != tile,
        None => !ctx.tile_window.contains(tile_x, tile_y),
    };
    log::debug!(
        "SOT: tile {tile}, tile-part {}/{num_tile_parts}, Psot {}{}",
        header.tile_part,
        header.psot,
        if ctx.skip_tile_data { " (skipped)" } else { "" }
    );

    if let Some(tlm) = ctx.cp.tlm.as_mut() {
        tlm.check_next(tile, header.psot);
    }
    if let Some(index) = ctx.index.as_mut() {
        index.begin_tile_part(tile, header.tile_part, num_tile_parts, ctx.last_sot_position);
    }
    Ok(())
}

/// Detects codestreams whose encoder wrote TNsot one lower than the real
/// tile-part count.
///
/// Called with the stream positioned after a SOT payload. When that SOT
/// claims to be the last tile-part of its tile, the following SOT segments
/// are scanned; finding another tile-part of the same tile with
/// TPsot == TNsot means every signalled count is off by one. The stream
/// position is restored afterwards. Only the first such SOT is examined.
pub fn check_tile_part_correction(
    ctx: &mut DecodeContext,
    stream: &mut dyn J2kStream,
    payload: &[u8],
) -> Result<(), J2kError> {
    if ctx.tile_part_correction_checked {
        return Ok(());
    }
    let header = SotHeader::parse(payload)?;
    if !header.is_last_signalled() || header.psot < MINIMUM_PSOT {
        return Ok(());
    }
    ctx.tile_part_correction_checked = true;

    let start = stream.tell();
    let needed = scan_for_extra_tile_part(stream, header);
    stream.seek(SeekFrom::Start(start))?;
    if needed? {
        log::warn!(
            "Non conformant codestream TPsot==TNsot. Adding one to the number of tile-parts of every tile"
        );
        ctx.tile_part_correction = 1;
        for tcp in &mut ctx.cp.tcps {
            if tcp.num_tile_parts != 0 {
                tcp.num_tile_parts = tcp.num_tile_parts.saturating_add(1);
            }
        }
    }
    Ok(())
}

fn scan_for_extra_tile_part(
    stream: &mut dyn J2kStream,
    current: SotHeader,
) -> Result<bool, J2kError> {
    let mut skip = (current.psot - SOT_SEGMENT_LENGTH) as u64;
    loop {
        if stream.bytes_left() < skip + SOT_SEGMENT_LENGTH as u64 {
            return Ok(false);
        }
        stream.skip(skip as i64)?;
        if stream.read_u16()? != J2kMarkerCode::StartOfTile.code() {
            return Ok(false);
        }
        if stream.read_u16()? != SOT_PAYLOAD_LENGTH + 2 {
            return Ok(false);
        }
        let mut payload = [0u8; SOT_PAYLOAD_LENGTH as usize];
        stream.read_exact(&mut payload)?;
        let next = SotHeader::parse(&payload)?;
        if next.tile == current.tile {
            return Ok(next.tile_part == next.num_tile_parts);
        }
        if next.psot < MINIMUM_PSOT {
            return Ok(false);
        }
        skip = (next.psot - SOT_SEGMENT_LENGTH) as u64;
    }
}

/// Writes a SOT segment with a zero Psot and returns the offset of Psot
/// for [`patch_psot`].
pub fn write_sot(
    stream: &mut dyn J2kStream,
    tile: u16,
    tile_part: u8,
    num_tile_parts: u8,
) -> Result<u64, J2kError> {
    stream.write_u16(J2kMarkerCode::StartOfTile.code())?;
    stream.write_u16(SOT_PAYLOAD_LENGTH + 2)?;
    stream.write_u16(tile)?;
    let psot_position = stream.tell();
    stream.write_u32(0)?;
    stream.write_u8(tile_part)?;
    stream.write_u8(num_tile_parts)?;
    Ok(psot_position)
}

pub fn patch_psot(stream: &mut dyn J2kStream, psot_position: u64, psot: u32) -> Result<(), J2kError> {
    let current = stream.tell();
    stream.seek(SeekFrom::Start(psot_position))?;
    stream.write_u32(psot)?;
    stream.seek(SeekFrom::Start(current))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::markers::test_support::main_header_context;
    use crate::stream::MemoryStream;

    fn tile_part_context() -> DecodeContext {
        let mut ctx = main_header_context(64, 64, 1);
        ctx.cp.t_width = 32;
        ctx.cp.t_height = 32;
        ctx.cp.compute_tile_grid(ctx.image.bounds()).unwrap();
        ctx.tile_window = crate::jpeg2000::markers::TileWindow {
            x0: 0,
            y0: 0,
            x1: 2,
            y1: 2,
        };
        ctx.specialize_tiles();
        ctx.state = DecoderState::TILE_PART_HEADER_SOT;
        ctx
    }

    fn sot(tile: u16, psot: u32, tile_part: u8, num_tile_parts: u8) -> Vec<u8> {
        let mut payload = tile.to_be_bytes().to_vec();
        payload.extend_from_slice(&psot.to_be_bytes());
        payload.push(tile_part);
        payload.push(num_tile_parts);
        payload
    }

    #[test]
    fn test_tile_part_sequence() {
        let mut ctx = tile_part_context();
        read_sot(&mut ctx, &sot(1, 100, 0, 0)).unwrap();
        assert_eq!(ctx.current_tile, 1);
        assert_eq!(ctx.tile_part_data_length, 88);
        assert_eq!(ctx.state, DecoderState::TILE_PART_HEADER);
        assert!(!ctx.last_tile_part_read);
        assert!(!ctx.skip_tile_data);

        // 0 -> 2 skips a tile-part.
        assert_eq!(
            read_sot(&mut ctx, &sot(1, 100, 2, 0)),
            Err(J2kError::TilePartIndexDiscontinuity {
                tile: 1,
                expected: 1,
                found: 2
            })
        );
        // 0 -> 1 is accepted.
        read_sot(&mut ctx, &sot(1, 100, 1, 2)).unwrap();
        assert_eq!(ctx.cp.tcps[1].num_tile_parts, 2);
        assert!(ctx.last_tile_part_read);
    }

    #[test]
    fn test_psot_values() {
        let mut ctx = tile_part_context();
        assert_eq!(read_sot(&mut ctx, &sot(0, 13, 0, 1)), Err(J2kError::InvalidPsot(13)));

        let mut ctx = tile_part_context();
        read_sot(&mut ctx, &sot(0, 12, 0, 1)).unwrap();
        assert_eq!(ctx.tile_part_data_length, 0);

        let mut ctx = tile_part_context();
        read_sot(&mut ctx, &sot(3, 0, 0, 1)).unwrap();
        assert!(ctx.last_tile_part_in_codestream);
        assert_eq!(ctx.tile_part_data_length, 0);
    }

    #[test]
    fn test_tile_part_counts() {
        let mut ctx = tile_part_context();
        assert_eq!(
            read_sot(&mut ctx, &sot(4, 20, 0, 1)),
            Err(J2kError::InvalidTileIndex { tile: 4 })
        );
        read_sot(&mut ctx, &sot(0, 20, 0, 0)).unwrap();
        read_sot(&mut ctx, &sot(0, 20, 1, 3)).unwrap();
        assert_eq!(
            read_sot(&mut ctx, &sot(0, 20, 2, 4)),
            Err(J2kError::TilePartCountMismatch {
                tile: 0,
                declared: 4,
                known: 3
            })
        );

        let mut ctx = tile_part_context();
        read_sot(&mut ctx, &sot(2, 20, 0, 0)).unwrap();
        assert_eq!(
            read_sot(&mut ctx, &sot(2, 20, 1, 1)),
            Err(J2kError::InvalidTilePartIndex {
                tile: 2,
                index: 1,
                count: 1
            })
        );
    }

    #[test]
    fn test_skip_outside_window() {
        let mut ctx = tile_part_context();
        ctx.tile_to_decode = Some(2);
        read_sot(&mut ctx, &sot(1, 20, 0, 1)).unwrap();
        assert!(ctx.skip_tile_data);
        read_sot(&mut ctx, &sot(2, 20, 0, 1)).unwrap();
        assert!(!ctx.skip_tile_data);
    }

    #[test]
    fn test_tile_part_count_correction() {
        let mut ctx = tile_part_context();
        // Tile 0 in two tile-parts, both claiming TNsot = 1.
        let first = sot(0, 16, 0, 1);
        let mut codestream = Vec::new();
        codestream.extend_from_slice(&[0xFF, 0x93, 0xAA, 0xBB]); // SOD + data of the first part
        codestream.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A]);
        codestream.extend_from_slice(&sot(0, 16, 1, 1));
        codestream.extend_from_slice(&[0xFF, 0x93, 0xCC, 0xDD]);
        let mut stream = MemoryStream::from_bytes(codestream);

        check_tile_part_correction(&mut ctx, &mut stream, &first).unwrap();
        assert_eq!(stream.tell(), 0);
        assert_eq!(ctx.tile_part_correction, 1);
        read_sot(&mut ctx, &first).unwrap();
        assert_eq!(ctx.cp.tcps[0].num_tile_parts, 2);
        assert!(!ctx.last_tile_part_read);
        read_sot(&mut ctx, &sot(0, 16, 1, 1)).unwrap();
        assert!(ctx.last_tile_part_read);
    }

    #[test]
    fn test_no_correction_for_conformant_stream() {
        let mut ctx = tile_part_context();
        let first = sot(0, 16, 0, 1);
        let mut codestream = vec![0xFF, 0x93, 0xAA, 0xBB];
        codestream.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A]);
        codestream.extend_from_slice(&sot(1, 16, 0, 1));
        codestream.extend_from_slice(&[0xFF, 0x93, 0xCC, 0xDD, 0xFF, 0xD9]);
        let mut stream = MemoryStream::from_bytes(codestream);
        check_tile_part_correction(&mut ctx, &mut stream, &first).unwrap();
        assert_eq!(ctx.tile_part_correction, 0);
        assert!(ctx.tile_part_correction_checked);
    }

    #[test]
    fn test_write_sot_and_patch() {
        let mut stream = MemoryStream::new();
        let position = write_sot(&mut stream, 3, 0, 2).unwrap();
        stream.write_all(&[0xFF, 0x93]).unwrap();
        patch_psot(&mut stream, position, 14).unwrap();
        assert_eq!(stream.tell(), 14);
        assert_eq!(
            stream.into_inner(),
            vec![
                0xFF, 0x90, 0x00, 0x0A, // SOT, Lsot
                0x00, 0x03, // Isot
                0x00, 0x00, 0x00, 0x0E, // Psot
                0x00, 0x02, // TPsot, TNsot
                0xFF, 0x93,
            ]
        );
    }
}

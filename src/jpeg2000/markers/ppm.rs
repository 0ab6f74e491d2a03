//! PPM / PPT: packed packet headers in the main header or in tile-part headers.
//!
//! Fragments are indexed by their Z value and may arrive out of order; they
//! are concatenated in index order before use. PPM data is a sequence of
//! `[Nppm: u32][Nppm bytes]` groups, one per tile-part in codestream order,
//! and a group may straddle two PPM segments.

use super::DecodeContext;
use crate::byte_codec::PayloadReader;
use crate::error::J2kError;
use crate::jpeg2000::params::TileCodingParams;
use crate::marker_code::J2kMarkerCode;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct PpmMarkers {
    fragments: BTreeMap<u8, Vec<u8>>,
    /// Packet headers per tile-part, available once merged.
    tile_part_headers: VecDeque<Vec<u8>>,
}

impl PpmMarkers {
    pub fn add_fragment(&mut self, index: u8, data: &[u8]) -> Result<(), J2kError> {
        if self.fragments.contains_key(&index) {
            log::error!("Zppm {index} already read");
            return Err(J2kError::DuplicatePpmIndex(index));
        }
        self.fragments.insert(index, data.to_vec());
        Ok(())
    }

    /// Splits the concatenated fragments into per tile-part packet headers.
    pub fn merge(&mut self) -> Result<(), J2kError> {
        let data: Vec<u8> = std::mem::take(&mut self.fragments)
            .into_values()
            .flatten()
            .collect();
        let mut reader = PayloadReader::new(&data, "PPM");
        while !reader.is_empty() {
            let length = reader.read_u32().map_err(|_| {
                log::error!("Not enough bytes to read Nppm");
                J2kError::CorruptedPpm
            })?;
            let headers = reader.read_bytes(length as usize).map_err(|_| {
                log::error!("Corrupted PPM markers");
                J2kError::CorruptedPpm
            })?;
            self.tile_part_headers.push_back(headers.to_vec());
        }
        log::debug!("PPM: {} tile-part packet header groups", self.tile_part_headers.len());
        Ok(())
    }

    /// Packet headers of the next tile-part in codestream order.
    pub fn next_tile_part(&mut self) -> Result<Vec<u8>, J2kError> {
        self.tile_part_headers.pop_front().ok_or_else(|| {
            log::error!("Not enough PPM data for the tile-parts of this codestream");
            J2kError::CorruptedPpm
        })
    }

    pub fn remaining_tile_parts(&self) -> usize {
        self.tile_part_headers.len()
    }
}

fn check_fragment_size(payload: &[u8], marker: J2kMarkerCode) -> Result<(), J2kError> {
    // Z index plus at least one byte of packet header data.
    if payload.len() < 2 {
        log::error!("Error reading {} marker", marker.name());
        return Err(J2kError::InvalidMarkerSegmentSize {
            marker: marker.code(),
        });
    }
    Ok(())
}

pub fn read_ppm(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    check_fragment_size(payload, J2kMarkerCode::PackedPacketHeadersMain)?;
    ctx.cp
        .ppm
        .get_or_insert_with(PpmMarkers::default)
        .add_fragment(payload[0], &payload[1..])
}

pub fn read_ppt(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    check_fragment_size(payload, J2kMarkerCode::PackedPacketHeadersTilePart)?;
    if ctx.cp.ppm.is_some() {
        log::error!(
            "Error reading PPT marker: packet headers have been previously found in the main header (PPM marker)"
        );
        return Err(J2kError::PpmAndPptPresent);
    }
    let index = payload[0];
    let tcp = ctx.current_tcp_mut();
    if tcp.ppt_fragments.contains_key(&index) {
        log::error!("Zppt {index} already read");
        return Err(J2kError::DuplicatePptIndex(index));
    }
    tcp.ppt_fragments.insert(index, payload[1..].to_vec());
    Ok(())
}

/// Appends the tile's PPT fragments, in index order, to its packet headers.
pub fn merge_ppt(tcp: &mut TileCodingParams) {
    for (_, fragment) in std::mem::take(&mut tcp.ppt_fragments) {
        tcp.packet_headers.extend_from_slice(&fragment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::markers::test_support::{enter_tile_part_header, main_header_context};

    #[test]
    fn test_ppm_groups_span_fragments() {
        let mut ctx = main_header_context(64, 64, 1);
        // Second fragment first: Zppm ordering decides, not arrival.
        read_ppm(&mut ctx, &[0x01, 0xCC, 0x00, 0x00, 0x00, 0x01, 0xDD]).unwrap();
        read_ppm(&mut ctx, &[0x00, 0x00, 0x00, 0x00, 0x03, 0xAA, 0xBB]).unwrap();

        let ppm = ctx.cp.ppm.as_mut().unwrap();
        ppm.merge().unwrap();
        assert_eq!(ppm.remaining_tile_parts(), 2);
        assert_eq!(ppm.next_tile_part().unwrap(), vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(ppm.next_tile_part().unwrap(), vec![0xDD]);
        assert_eq!(ppm.next_tile_part(), Err(J2kError::CorruptedPpm));
    }

    #[test]
    fn test_ppm_truncated_group() {
        let mut ctx = main_header_context(64, 64, 1);
        read_ppm(&mut ctx, &[0x00, 0x00, 0x00, 0x00, 0x05, 0xAA]).unwrap();
        assert_eq!(
            read_ppm(&mut ctx, &[0x00, 0x01]),
            Err(J2kError::DuplicatePpmIndex(0))
        );
        assert_eq!(ctx.cp.ppm.as_mut().unwrap().merge(), Err(J2kError::CorruptedPpm));
    }

    #[test]
    fn test_ppt_merge() {
        let mut ctx = main_header_context(64, 64, 1);
        enter_tile_part_header(&mut ctx);
        read_ppt(&mut ctx, &[0x01, 0x03, 0x04]).unwrap();
        read_ppt(&mut ctx, &[0x00, 0x01, 0x02]).unwrap();
        assert_eq!(
            read_ppt(&mut ctx, &[0x01, 0x09]),
            Err(J2kError::DuplicatePptIndex(1))
        );

        let tcp = &mut ctx.cp.tcps[0];
        merge_ppt(tcp);
        assert_eq!(tcp.packet_headers, vec![0x01, 0x02, 0x03, 0x04]);
        assert!(tcp.ppt_fragments.is_empty());
    }

    #[test]
    fn test_ppt_with_ppm_rejected() {
        let mut ctx = main_header_context(64, 64, 1);
        read_ppm(&mut ctx, &[0x00, 0x00, 0x00, 0x00, 0x00]).unwrap();
        enter_tile_part_header(&mut ctx);
        assert_eq!(
            read_ppt(&mut ctx, &[0x00, 0x01]),
            Err(J2kError::PpmAndPptPresent)
        );
    }
}

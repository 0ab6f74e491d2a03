//! COD / COC: coding style default and coding style component.

use super::{DecodeContext, push_component_index, write_segment};
use crate::byte_codec::PayloadReader;
use crate::constants::{
    MAXIMUM_CODEBLOCK_EXPONENT, MAXIMUM_CODEBLOCK_EXPONENT_SUM, MAXIMUM_DECOMPOSITION_LEVELS,
};
use crate::error::J2kError;
use crate::jpeg2000::params::{
    CBLK_STYLE_RESERVED, CODING_STYLE_ALL, CODING_STYLE_PRECINCTS, MctMode, ProgressionOrder,
    TileCodingParams, TileComponentCodingParams,
};
use crate::marker_code::J2kMarkerCode;
use crate::stream::J2kStream;

/// Reads the SPcod/SPcoc fields shared by COD and COC into `tccp`.
fn read_spcod_spcoc(
    reader: &mut PayloadReader<'_>,
    tccp: &mut TileComponentCodingParams,
    reduce: u32,
) -> Result<(), J2kError> {
    let decompositions = reader.read_u8()? as u32;
    if decompositions > MAXIMUM_DECOMPOSITION_LEVELS {
        log::error!(
            "Invalid number of decomposition levels: {decompositions}. At most {MAXIMUM_DECOMPOSITION_LEVELS} are allowed"
        );
        return Err(J2kError::InvalidResolutionCount(decompositions + 1));
    }
    let num_resolutions = decompositions + 1;
    if reduce >= num_resolutions {
        log::error!(
            "The number of resolutions to remove ({reduce}) must be strictly less than the number of resolutions ({num_resolutions})"
        );
        return Err(J2kError::InvalidResolutionCount(num_resolutions));
    }

    let cblkw = reader.read_u8()? as u32 + 2;
    let cblkh = reader.read_u8()? as u32 + 2;
    if cblkw > MAXIMUM_CODEBLOCK_EXPONENT
        || cblkh > MAXIMUM_CODEBLOCK_EXPONENT
        || cblkw + cblkh > MAXIMUM_CODEBLOCK_EXPONENT_SUM
    {
        log::error!(
            "Illegal code-block width/height (2^{cblkw}, 2^{cblkh}) found in COD/COC marker segment"
        );
        return Err(J2kError::InvalidCodeBlockSize);
    }

    let cblk_style = reader.read_u8()?;
    if cblk_style & CBLK_STYLE_RESERVED != 0 {
        log::error!("Unrecognized code-block style byte {cblk_style:#x} found in COD/COC marker segment");
        return Err(J2kError::InvalidCodeBlockStyle(cblk_style));
    }

    let qmfbid = reader.read_u8()?;
    if qmfbid > 1 {
        log::error!("Invalid wavelet transform {qmfbid}. Should be either 0 or 1");
        return Err(J2kError::InvalidTransform(qmfbid));
    }

    tccp.num_resolutions = num_resolutions;
    tccp.cblkw = cblkw;
    tccp.cblkh = cblkh;
    tccp.cblk_style = cblk_style;
    tccp.qmfbid = qmfbid;

    if tccp.csty & CODING_STYLE_PRECINCTS != 0 {
        for resolution in 0..num_resolutions as usize {
            let size = reader.read_u8()?;
            let width = (size & 0x0F) as u32;
            let height = (size >> 4) as u32;
            // Exponent 0 is only allowed at the lowest resolution level.
            if resolution != 0 && (width == 0 || height == 0) {
                log::error!("Invalid precinct size");
                return Err(J2kError::InvalidPrecinctSize);
            }
            tccp.precinct_width_exp[resolution] = width;
            tccp.precinct_height_exp[resolution] = height;
        }
    } else {
        let default = TileComponentCodingParams::default();
        tccp.precinct_width_exp.clone_from(&default.precinct_width_exp);
        tccp.precinct_height_exp.clone_from(&default.precinct_height_exp);
    }
    Ok(())
}

pub fn read_cod(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let reduce = ctx.reduce;
    let tcp = ctx.current_tcp_mut();
    if tcp.cod_seen {
        log::warn!(
            "Multiple COD markers detected for tile {}. The JPEG 2000 standard does not allow more than one COD marker per tile",
            tcp.index
        );
    }
    tcp.cod_seen = true;

    let mut reader = PayloadReader::new(payload, "COD");
    let csty = reader.read_u8()?;
    if csty & !CODING_STYLE_ALL != 0 {
        log::error!("Unknown Scod value {csty:#x} in COD marker");
        return Err(J2kError::InvalidCodingStyle(csty));
    }
    let progression = reader.read_u8()?;
    let progression = ProgressionOrder::try_from(progression).map_err(|_| {
        log::error!("Unknown progression order {progression} in COD marker");
        J2kError::InvalidProgressionOrder(progression)
    })?;
    let num_layers = reader.read_u16()?;
    if num_layers == 0 {
        log::error!("Number of layers must be positive");
        return Err(J2kError::InvalidLayerCount);
    }
    let mct = reader.read_u8()?;
    let mct = match mct {
        0 => MctMode::Off,
        1 if tcp.mct == MctMode::Custom => MctMode::Custom,
        1 => MctMode::Rgb,
        _ => {
            log::error!("Invalid MCT value: {mct}. Should be either 0 or 1");
            return Err(J2kError::InvalidMct(mct));
        }
    };

    tcp.csty = csty;
    tcp.progression = progression;
    tcp.num_layers = num_layers;
    tcp.mct = mct;
    for tccp in &mut tcp.tccps {
        tccp.csty = csty & CODING_STYLE_PRECINCTS;
    }

    let (first, rest) = tcp
        .tccps
        .split_first_mut()
        .ok_or(J2kError::InvalidComponentCount(0))?;
    read_spcod_spcoc(&mut reader, first, reduce)?;
    if !reader.is_empty() {
        log::error!("Error reading COD marker: {} trailing bytes", reader.remaining());
        return Err(reader.error());
    }
    for tccp in rest {
        tccp.copy_coding_style_from(first);
    }
    Ok(())
}

pub fn read_coc(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let reduce = ctx.reduce;
    let component_count = ctx.component_count();
    let mut reader = PayloadReader::new(payload, "COC");
    let component = reader.read_component_index(component_count)?;
    if component >= component_count {
        log::error!("Error reading COC marker: invalid component number {component}");
        return Err(J2kError::InvalidComponentIndex { component });
    }
    let csty = reader.read_u8()?;

    let tccp = &mut ctx.current_tcp_mut().tccps[component as usize];
    tccp.csty = csty;
    read_spcod_spcoc(&mut reader, tccp, reduce)?;
    if !reader.is_empty() {
        log::error!("Error reading COC marker: {} trailing bytes", reader.remaining());
        return Err(reader.error());
    }
    Ok(())
}

fn push_spcod_spcoc(payload: &mut Vec<u8>, tccp: &TileComponentCodingParams) {
    payload.push((tccp.num_resolutions - 1) as u8);
    payload.push((tccp.cblkw - 2) as u8);
    payload.push((tccp.cblkh - 2) as u8);
    payload.push(tccp.cblk_style);
    payload.push(tccp.qmfbid);
    if tccp.csty & CODING_STYLE_PRECINCTS != 0 {
        for resolution in 0..tccp.num_resolutions as usize {
            let width = tccp.precinct_width_exp[resolution] as u8;
            let height = tccp.precinct_height_exp[resolution] as u8;
            payload.push((height << 4) | (width & 0x0F));
        }
    }
}

pub fn write_cod(stream: &mut dyn J2kStream, tcp: &TileCodingParams) -> Result<(), J2kError> {
    let tccp = tcp.tccps.first().ok_or(J2kError::InvalidComponentCount(0))?;
    let mut payload = vec![tcp.csty, tcp.progression.into()];
    payload.extend_from_slice(&tcp.num_layers.to_be_bytes());
    payload.push(tcp.mct.cod_byte());
    push_spcod_spcoc(&mut payload, tccp);
    write_segment(stream, J2kMarkerCode::CodingStyleDefault, &payload)
}

pub fn write_coc(
    stream: &mut dyn J2kStream,
    tcp: &TileCodingParams,
    component: u32,
) -> Result<(), J2kError> {
    let component_count = tcp.tccps.len() as u32;
    let tccp = tcp
        .tccps
        .get(component as usize)
        .ok_or(J2kError::InvalidComponentIndex { component })?;
    let mut payload = Vec::new();
    push_component_index(&mut payload, component, component_count);
    payload.push(tccp.csty);
    push_spcod_spcoc(&mut payload, tccp);
    write_segment(stream, J2kMarkerCode::CodingStyleComponent, &payload)
}

/// True when component `component` cannot be described by the COD of `tcp`.
pub fn needs_coc(tcp: &TileCodingParams, component: usize) -> bool {
    let (Some(reference), Some(tccp)) = (tcp.tccps.first(), tcp.tccps.get(component)) else {
        return false;
    };
    let resolutions = tccp.num_resolutions as usize;
    tccp.csty != reference.csty
        || tccp.num_resolutions != reference.num_resolutions
        || tccp.cblkw != reference.cblkw
        || tccp.cblkh != reference.cblkh
        || tccp.cblk_style != reference.cblk_style
        || tccp.qmfbid != reference.qmfbid
        || (tccp.csty & CODING_STYLE_PRECINCTS != 0
            && (tccp.precinct_width_exp[..resolutions] != reference.precinct_width_exp[..resolutions]
                || tccp.precinct_height_exp[..resolutions]
                    != reference.precinct_height_exp[..resolutions]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::markers::test_support::{enter_tile_part_header, main_header_context};
    use crate::stream::MemoryStream;

    #[test]
    fn test_read_cod() {
        let mut ctx = main_header_context(64, 64, 3);
        let payload = [
            0x01, // Scod: explicit precincts
            0x02, // RPCL
            0x00, 0x03, // 3 layers
            0x01, // MCT
            0x02, // 2 decompositions
            0x04, 0x04, // 64x64 code-blocks
            0x00, // code-block style
            0x01, // 5/3 reversible
            0x77, 0x88, 0x88, // precincts per resolution
        ];
        read_cod(&mut ctx, &payload).unwrap();

        let tcp = &ctx.default_tcp;
        assert_eq!(tcp.progression, ProgressionOrder::Rpcl);
        assert_eq!(tcp.num_layers, 3);
        assert_eq!(tcp.mct, MctMode::Rgb);
        for tccp in &tcp.tccps {
            assert_eq!(tccp.num_resolutions, 3);
            assert_eq!((tccp.cblkw, tccp.cblkh), (6, 6));
            assert_eq!(tccp.precinct_width_exp[..3], [7, 8, 8]);
        }
    }

    #[test]
    fn test_code_block_sum_over_twelve_rejected() {
        let mut ctx = main_header_context(64, 64, 1);
        let payload = [
            0x00, 0x00, 0x00, 0x01, 0x00, // Scod, LRCP, 1 layer, no MCT
            0x05, // 5 decompositions
            0x05, 0x04, // 2^7 x 2^6: exponent sum 13
            0x00, 0x01,
        ];
        assert_eq!(read_cod(&mut ctx, &payload), Err(J2kError::InvalidCodeBlockSize));
    }

    #[test]
    fn test_invalid_cod_fields() {
        let mut ctx = main_header_context(64, 64, 1);
        let base = [0x00, 0x00, 0x00, 0x01, 0x00, 0x05, 0x04, 0x04, 0x00, 0x01];

        let mut bad_progression = base;
        bad_progression[1] = 5;
        assert_eq!(
            read_cod(&mut ctx, &bad_progression),
            Err(J2kError::InvalidProgressionOrder(5))
        );

        let mut no_layers = base;
        no_layers[3] = 0;
        assert_eq!(read_cod(&mut ctx, &no_layers), Err(J2kError::InvalidLayerCount));

        let mut reserved_style = base;
        reserved_style[8] = 0x80;
        assert_eq!(
            read_cod(&mut ctx, &reserved_style),
            Err(J2kError::InvalidCodeBlockStyle(0x80))
        );

        let mut trailing = base.to_vec();
        trailing.push(0);
        assert!(matches!(
            read_cod(&mut ctx, &trailing),
            Err(J2kError::InvalidMarkerContent { name: "COD" })
        ));
    }

    #[test]
    fn test_precinct_exponent_zero_above_lowest_resolution() {
        let mut ctx = main_header_context(64, 64, 1);
        let payload = [
            0x01, 0x00, 0x00, 0x01, 0x00, // Scod precincts, LRCP, 1 layer
            0x01, 0x04, 0x04, 0x00, 0x01, // 1 decomposition
            0x00, 0x70, // resolution 1 has a zero width exponent
        ];
        assert_eq!(read_cod(&mut ctx, &payload), Err(J2kError::InvalidPrecinctSize));
    }

    #[test]
    fn test_reduce_must_leave_a_resolution() {
        let mut ctx = main_header_context(64, 64, 1);
        ctx.reduce = 2;
        let payload = [0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x04, 0x04, 0x00, 0x01];
        assert_eq!(
            read_cod(&mut ctx, &payload),
            Err(J2kError::InvalidResolutionCount(2))
        );
    }

    #[test]
    fn test_coc_in_tile_header() {
        let mut ctx = main_header_context(64, 64, 2);
        read_cod(&mut ctx, &[0x00, 0x00, 0x00, 0x01, 0x00, 0x05, 0x04, 0x04, 0x00, 0x01]).unwrap();
        enter_tile_part_header(&mut ctx);

        let coc = [
            0x01, // Ccoc = component 1
            0x00, // Scoc
            0x02, 0x03, 0x03, 0x00, 0x00, // 2 decompositions, 32x32, 9/7
        ];
        read_coc(&mut ctx, &coc).unwrap();
        let tcp = &ctx.cp.tcps[0];
        assert_eq!(tcp.tccps[1].num_resolutions, 3);
        assert_eq!(tcp.tccps[1].qmfbid, 0);
        assert_eq!(tcp.tccps[0].num_resolutions, 6);
        assert_eq!(ctx.default_tcp.tccps[1].num_resolutions, 6);

        assert_eq!(
            read_coc(&mut ctx, &[0x02, 0x00, 0x02, 0x03, 0x03, 0x00, 0x00]),
            Err(J2kError::InvalidComponentIndex { component: 2 })
        );
    }

    #[test]
    fn test_write_cod_and_coc() {
        let mut ctx = main_header_context(64, 64, 2);
        let cod = [0x01, 0x01, 0x00, 0x02, 0x00, 0x01, 0x04, 0x04, 0x00, 0x01, 0x66, 0x77];
        read_cod(&mut ctx, &cod).unwrap();
        ctx.default_tcp.tccps[1].cblk_style = 0x08;
        assert!(!needs_coc(&ctx.default_tcp, 0));
        assert!(needs_coc(&ctx.default_tcp, 1));

        let mut stream = MemoryStream::new();
        write_cod(&mut stream, &ctx.default_tcp).unwrap();
        write_coc(&mut stream, &ctx.default_tcp, 1).unwrap();
        let written = stream.into_inner();
        assert_eq!(&written[..4], &[0xFF, 0x52, 0x00, 0x0E]);
        assert_eq!(&written[4..16], &cod);
        assert_eq!(
            &written[16..],
            &[
                0xFF, 0x53, 0x00, 0x0B, // COC, Lcoc
                0x01, 0x01, // component 1, Scoc precincts
                0x01, 0x04, 0x04, 0x08, 0x01, // SPcoc
                0x66, 0x77, // precincts
            ]
        );
    }
}

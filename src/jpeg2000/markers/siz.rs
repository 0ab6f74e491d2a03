//! SIZ: image and tile size.

use super::{DecodeContext, TileWindow, write_segment};
use crate::byte_codec::PayloadReader;
use crate::constants::{
    MAXIMUM_COMPONENTS, MAXIMUM_SUPPORTED_PRECISION, MAXIMUM_TILE_AREA, PROFILE_CINEMA_LTS,
    PROFILE_MASK, PROFILE_PART2, SIZ_FIXED_PAYLOAD_LENGTH, is_broadcast_profile, is_imf_profile,
};
use crate::error::J2kError;
use crate::jpeg2000::image::{ImageComponent, J2kImage};
use crate::jpeg2000::params::{CodingParams, TileCodingParams};
use crate::jpeg2000::state::DecoderState;
use crate::marker_code::J2kMarkerCode;
use crate::stream::J2kStream;

/// Checks the Rsiz capabilities word.
pub fn validate_rsiz(rsiz: u16) -> Result<(), J2kError> {
    if rsiz & PROFILE_PART2 != 0 {
        return Ok(());
    }
    if rsiz & 0x3000 != 0 {
        log::warn!(
            "SIZ marker segment's Rsiz word must have bits 12 and 13 equal to 0 unless the Part-2 flag (bit 15) is set"
        );
    }
    let profile = rsiz & PROFILE_MASK;
    if profile > PROFILE_CINEMA_LTS && !is_broadcast_profile(profile) && !is_imf_profile(profile) {
        log::error!("Non-compliant Rsiz value {rsiz:#x} in SIZ marker");
        return Err(J2kError::InvalidRsiz(rsiz));
    }
    Ok(())
}

pub fn read_siz(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let fixed = SIZ_FIXED_PAYLOAD_LENGTH as usize;
    if payload.len() < fixed || (payload.len() - fixed) % 3 != 0 {
        log::error!("Error with SIZ marker size");
        return Err(J2kError::InvalidMarkerSegmentSize {
            marker: J2kMarkerCode::ImageAndTileSize.code(),
        });
    }
    let derived_components = ((payload.len() - fixed) / 3) as u32;

    let mut reader = PayloadReader::new(payload, "SIZ");
    let rsiz = reader.read_u16()?;
    validate_rsiz(rsiz)?;

    let x1 = reader.read_u32()?;
    let y1 = reader.read_u32()?;
    let x0 = reader.read_u32()?;
    let y0 = reader.read_u32()?;
    let t_width = reader.read_u32()?;
    let t_height = reader.read_u32()?;
    let tx0 = reader.read_u32()?;
    let ty0 = reader.read_u32()?;
    let csiz = reader.read_u16()? as u32;

    if csiz == 0 || csiz > MAXIMUM_COMPONENTS {
        log::error!("SIZ marker: invalid number of components {csiz}");
        return Err(J2kError::InvalidComponentCount(csiz));
    }
    if csiz != derived_components {
        log::error!(
            "SIZ marker: signalled number of components is not compatible with remaining number of components ({csiz} vs {derived_components})"
        );
        return Err(J2kError::InvalidComponentCount(csiz));
    }
    if x0 >= x1 || y0 >= y1 {
        log::error!(
            "SIZ marker: negative or zero image dimensions ({} x {})",
            x1 as i64 - x0 as i64,
            y1 as i64 - y0 as i64
        );
        return Err(J2kError::InvalidImageDimensions);
    }
    if t_width == 0 || t_height == 0 {
        log::error!("SIZ marker: invalid tile size ({t_width}, {t_height})");
        return Err(J2kError::InvalidTileSize);
    }
    if tx0 > x0 || ty0 > y0 {
        log::error!(
            "SIZ marker: tile origin ({tx0},{ty0}) cannot lie in the region to the right and bottom of image origin ({x0},{y0})"
        );
        return Err(J2kError::InvalidTileOrigin);
    }
    if tx0.saturating_add(t_width) <= x0 || ty0.saturating_add(t_height) <= y0 {
        log::error!("SIZ marker: first tile must overlap the image");
        return Err(J2kError::TileDoesNotOverlapImage);
    }
    let clipped_area = t_width.min(x1 - x0) as u64 * t_height.min(y1 - y0) as u64;
    if clipped_area > MAXIMUM_TILE_AREA {
        log::error!("SIZ marker: tile area {clipped_area} exceeds the supported maximum");
        return Err(J2kError::TileAreaTooLarge);
    }

    let mut components = Vec::with_capacity(csiz as usize);
    for index in 0..csiz {
        let ssiz = reader.read_u8()?;
        let dx = reader.read_u8()?;
        let dy = reader.read_u8()?;
        let precision = (ssiz & 0x7F) + 1;
        let signed = ssiz & 0x80 != 0;
        if dx == 0 || dy == 0 {
            log::error!("Invalid values for comp = {index} : dx={dx} dy={dy} (should be between 1 and 255)");
            return Err(J2kError::InvalidSubsampling {
                component: index as u16,
            });
        }
        if precision > MAXIMUM_SUPPORTED_PRECISION {
            log::error!(
                "Precision {precision} of component {index} exceeds the supported maximum of {MAXIMUM_SUPPORTED_PRECISION}"
            );
            return Err(J2kError::UnsupportedPrecision {
                component: index as u16,
                precision,
            });
        }
        components.push(ImageComponent::new(precision, signed, dx as u32, dy as u32));
    }

    let image = J2kImage::new(x0, y0, x1, y1, components)?;
    let mut cp = CodingParams {
        rsiz,
        tx0,
        ty0,
        t_width,
        t_height,
        ..Default::default()
    };
    cp.compute_tile_grid(image.bounds())?;

    let mut default_tcp = TileCodingParams::new(csiz as usize);
    for (tccp, component) in default_tcp.tccps.iter_mut().zip(&image.components) {
        if !component.signed {
            tccp.dc_level_shift = 1 << (component.precision - 1);
        }
    }

    ctx.tile_window = TileWindow {
        x0: 0,
        y0: 0,
        x1: cp.t_grid_width,
        y1: cp.t_grid_height,
    };
    log::debug!(
        "SIZ: {}x{} image, {} components, {}x{} tiles",
        image.x1 - image.x0,
        image.y1 - image.y0,
        csiz,
        cp.t_grid_width,
        cp.t_grid_height
    );
    ctx.image = image;
    ctx.cp = cp;
    ctx.default_tcp = default_tcp;
    ctx.state = DecoderState::MAIN_HEADER;
    Ok(())
}

pub fn write_siz(
    stream: &mut dyn J2kStream,
    image: &J2kImage,
    cp: &CodingParams,
) -> Result<(), J2kError> {
    let mut payload = Vec::with_capacity(SIZ_FIXED_PAYLOAD_LENGTH as usize + 3 * image.components.len());
    payload.extend_from_slice(&cp.rsiz.to_be_bytes());
    for value in [
        image.x1, image.y1, image.x0, image.y0, cp.t_width, cp.t_height, cp.tx0, cp.ty0,
    ] {
        payload.extend_from_slice(&value.to_be_bytes());
    }
    payload.extend_from_slice(&(image.components.len() as u16).to_be_bytes());
    for component in &image.components {
        let ssiz = (component.precision - 1) | if component.signed { 0x80 } else { 0 };
        payload.push(ssiz);
        payload.push(component.dx as u8);
        payload.push(component.dy as u8);
    }
    write_segment(stream, J2kMarkerCode::ImageAndTileSize, &payload)
}

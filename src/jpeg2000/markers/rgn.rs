//! RGN: region of interest.

use super::{DecodeContext, push_component_index, write_segment};
use crate::byte_codec::PayloadReader;
use crate::error::J2kError;
use crate::marker_code::J2kMarkerCode;
use crate::stream::J2kStream;

/// The only Srgn value defined by Part 1: implicit (max-shift) ROI.
const ROI_STYLE_IMPLICIT: u8 = 0;

pub fn read_rgn(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let component_count = ctx.component_count();
    let mut reader = PayloadReader::new(payload, "RGN");
    let component = reader.read_component_index(component_count)?;
    let style = reader.read_u8()?;
    let shift = reader.read_u8()?;
    if !reader.is_empty() {
        log::error!("Error reading RGN marker");
        return Err(reader.error());
    }
    if style != ROI_STYLE_IMPLICIT {
        log::error!("RGN marker RS value of {style} is not supported by JPEG 2000 Part 1");
        return Err(J2kError::InvalidRoiStyle(style));
    }
    if component >= component_count {
        log::error!(
            "Bad component number in RGN ({component} when there are only {component_count})"
        );
        return Err(J2kError::InvalidComponentIndex { component });
    }
    ctx.current_tcp_mut().tccps[component as usize].roi_shift = shift;
    Ok(())
}

pub fn write_rgn(
    stream: &mut dyn J2kStream,
    component: u32,
    component_count: u32,
    shift: u8,
) -> Result<(), J2kError> {
    let mut payload = Vec::with_capacity(4);
    push_component_index(&mut payload, component, component_count);
    payload.push(ROI_STYLE_IMPLICIT);
    payload.push(shift);
    write_segment(stream, J2kMarkerCode::RegionOfInterest, &payload)
}

//! QCD / QCC: quantization default and quantization component.
//!
//! Precedence, highest first: tile-part QCC, tile-part QCD, main QCC, main QCD.

use super::{DecodeContext, push_component_index, write_segment};
use crate::byte_codec::PayloadReader;
use crate::constants::MAXIMUM_BANDS;
use crate::error::J2kError;
use crate::jpeg2000::params::{
    QuantizationStyle, StepSize, TileCodingParams, TileComponentCodingParams,
};
use crate::marker_code::J2kMarkerCode;
use crate::stream::J2kStream;

/// Decoded SQcd/SQcc and SPqcd/SPqcc fields.
struct Quantization {
    style: QuantizationStyle,
    guard_bits: u8,
    num_step_sizes: u32,
    step_sizes: Vec<StepSize>,
}

fn read_sqcd_sqcc(reader: &mut PayloadReader<'_>) -> Result<Quantization, J2kError> {
    let sqcx = reader.read_u8()?;
    let raw_style = sqcx & 0x1F;
    let style = QuantizationStyle::try_from(raw_style).map_err(|_| {
        log::error!("Undefined quantization style {raw_style}");
        J2kError::InvalidQuantizationStyle(raw_style)
    })?;

    let num_step_sizes = match style {
        QuantizationStyle::ScalarDerived => 1,
        QuantizationStyle::NoQuantization => reader.remaining(),
        QuantizationStyle::ScalarExpounded => reader.remaining() / 2,
    } as u32;
    if num_step_sizes > MAXIMUM_BANDS {
        log::warn!(
            "While reading QCD or QCC marker segment, number of step sizes ({num_step_sizes}) is greater than {MAXIMUM_BANDS}. Only the first {MAXIMUM_BANDS} are kept"
        );
    }

    let mut step_sizes = vec![StepSize::default(); MAXIMUM_BANDS as usize];
    for band in 0..num_step_sizes as usize {
        let step = if style == QuantizationStyle::NoQuantization {
            StepSize {
                exponent: reader.read_u8()? >> 3,
                mantissa: 0,
            }
        } else {
            let value = reader.read_u16()?;
            StepSize {
                exponent: (value >> 11) as u8,
                mantissa: value & 0x7FF,
            }
        };
        if band < step_sizes.len() {
            step_sizes[band] = step;
        }
    }

    Ok(Quantization {
        style,
        guard_bits: sqcx >> 5,
        num_step_sizes,
        step_sizes,
    })
}

/// True when a segment of the given scope may replace the component's current quantization.
fn takes_precedence(tccp: &TileComponentCodingParams, from_qcc: bool, from_tile_header: bool) -> bool {
    if !tccp.quantization_set {
        return true;
    }
    let set_main_qcd = !tccp.from_qcc && !tccp.from_tile_header;
    let set_main_qcc = tccp.from_qcc && !tccp.from_tile_header;
    let set_tile_qcd = !tccp.from_qcc && tccp.from_tile_header;
    let set_tile_qcc = tccp.from_qcc && tccp.from_tile_header;
    if !from_tile_header {
        let main_qcd = !from_qcc;
        !(set_main_qcc || (main_qcd && set_main_qcd))
    } else {
        !(set_tile_qcc || (set_tile_qcd && !from_qcc))
    }
}

fn apply(
    tccp: &mut TileComponentCodingParams,
    quantization: &Quantization,
    from_qcc: bool,
    from_tile_header: bool,
) {
    tccp.quantization_set = true;
    tccp.from_qcc = from_qcc;
    tccp.from_tile_header = from_tile_header;
    tccp.quantization_style = quantization.style;
    tccp.num_guard_bits = quantization.guard_bits;
    tccp.num_step_sizes = quantization.num_step_sizes;
    tccp.step_sizes.clone_from(&quantization.step_sizes);
    if quantization.style == QuantizationStyle::ScalarDerived {
        tccp.expand_derived_step_sizes();
    }
}

pub fn read_qcd(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let from_tile_header = !ctx.in_main_header();
    let mut reader = PayloadReader::new(payload, "QCD");
    let quantization = read_sqcd_sqcc(&mut reader)?;
    if !reader.is_empty() {
        log::error!("Error reading QCD marker: {} trailing bytes", reader.remaining());
        return Err(reader.error());
    }

    let tcp = ctx.current_tcp_mut();
    if !from_tile_header {
        tcp.main_qcd_style = quantization.style;
        tcp.main_qcd_num_step_sizes = quantization.num_step_sizes;
    }
    for tccp in &mut tcp.tccps {
        if takes_precedence(tccp, false, from_tile_header) {
            apply(tccp, &quantization, false, from_tile_header);
        }
    }
    Ok(())
}

pub fn read_qcc(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let from_tile_header = !ctx.in_main_header();
    let component_count = ctx.component_count();
    let mut reader = PayloadReader::new(payload, "QCC");
    let component = reader.read_component_index(component_count)?;
    if component >= component_count {
        log::error!(
            "QCC component: component number {component} must be less than total number of components {component_count}"
        );
        return Err(J2kError::InvalidComponentIndex { component });
    }
    let quantization = read_sqcd_sqcc(&mut reader)?;
    if !reader.is_empty() {
        log::error!("Error reading QCC marker: {} trailing bytes", reader.remaining());
        return Err(reader.error());
    }

    let tccp = &mut ctx.current_tcp_mut().tccps[component as usize];
    if takes_precedence(tccp, true, from_tile_header) {
        apply(tccp, &quantization, true, from_tile_header);
    }
    Ok(())
}

fn push_sqcd_sqcc(payload: &mut Vec<u8>, tccp: &TileComponentCodingParams) {
    let style: u8 = tccp.quantization_style.into();
    payload.push((tccp.num_guard_bits << 5) | style);
    for step in tccp.step_sizes.iter().take(tccp.signalled_step_sizes()) {
        if tccp.quantization_style == QuantizationStyle::NoQuantization {
            payload.push(step.exponent << 3);
        } else {
            let value = ((step.exponent as u16) << 11) | (step.mantissa & 0x7FF);
            payload.extend_from_slice(&value.to_be_bytes());
        }
    }
}

pub fn write_qcd(stream: &mut dyn J2kStream, tcp: &TileCodingParams) -> Result<(), J2kError> {
    let tccp = tcp.tccps.first().ok_or(J2kError::InvalidComponentCount(0))?;
    let mut payload = Vec::new();
    push_sqcd_sqcc(&mut payload, tccp);
    write_segment(stream, J2kMarkerCode::QuantizationDefault, &payload)
}

pub fn write_qcc(
    stream: &mut dyn J2kStream,
    tcp: &TileCodingParams,
    component: u32,
) -> Result<(), J2kError> {
    let tccp = tcp
        .tccps
        .get(component as usize)
        .ok_or(J2kError::InvalidComponentIndex { component })?;
    let mut payload = Vec::new();
    push_component_index(&mut payload, component, tcp.tccps.len() as u32);
    push_sqcd_sqcc(&mut payload, tccp);
    write_segment(stream, J2kMarkerCode::QuantizationComponent, &payload)
}

/// True when component `component` cannot be described by the QCD of `tcp`.
pub fn needs_qcc(tcp: &TileCodingParams, component: usize) -> bool {
    let (Some(reference), Some(tccp)) = (tcp.tccps.first(), tcp.tccps.get(component)) else {
        return false;
    };
    let count = tccp.signalled_step_sizes();
    tccp.quantization_style != reference.quantization_style
        || tccp.num_guard_bits != reference.num_guard_bits
        || count != reference.signalled_step_sizes()
        || tccp.step_sizes[..count] != reference.step_sizes[..count]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::markers::cod::read_cod;
    use crate::jpeg2000::markers::test_support::{enter_tile_part_header, main_header_context};
    use crate::stream::MemoryStream;

    #[test]
    fn test_read_qcd_no_quantization() {
        let mut ctx = main_header_context(64, 64, 2);
        let payload = [
            0x40, // 2 guard bits, no quantization
            0x48, 0x50, 0x50, 0x50, // exponents 9, 10, 10, 10
        ];
        read_qcd(&mut ctx, &payload).unwrap();
        let tcp = &ctx.default_tcp;
        assert_eq!(tcp.main_qcd_num_step_sizes, 4);
        for tccp in &tcp.tccps {
            assert_eq!(tccp.num_guard_bits, 2);
            assert_eq!(tccp.step_sizes[0].exponent, 9);
            assert_eq!(tccp.step_sizes[3].exponent, 10);
            assert!(!tccp.from_qcc);
        }
    }

    #[test]
    fn test_read_qcd_derived() {
        let mut ctx = main_header_context(64, 64, 1);
        let payload = [
            0x21, // 1 guard bit, scalar derived
            0x50, 0x12, // exponent 10, mantissa 0x012
        ];
        read_qcd(&mut ctx, &payload).unwrap();
        let tccp = &ctx.default_tcp.tccps[0];
        assert_eq!(tccp.quantization_style, QuantizationStyle::ScalarDerived);
        assert_eq!(tccp.num_step_sizes, 1);
        assert_eq!(tccp.step_sizes[4], StepSize { exponent: 9, mantissa: 0x12 });
    }

    #[test]
    fn test_qcc_scoping() {
        let mut ctx = main_header_context(64, 64, 3);
        let qcc = [
            0x01, // component 1
            0x02, // expounded, no guard bits
            0x50, 0x01, 0x48, 0x02, 0x48, 0x03, 0x48, 0x04,
        ];
        read_qcc(&mut ctx, &qcc).unwrap();
        read_qcd(&mut ctx, &[0x40, 0x48]).unwrap();

        let tcp = &ctx.default_tcp;
        assert_eq!(tcp.tccps[0].quantization_style, QuantizationStyle::NoQuantization);
        assert_eq!(tcp.tccps[1].quantization_style, QuantizationStyle::ScalarExpounded);
        assert!(tcp.tccps[1].from_qcc);
        assert_eq!(tcp.tccps[1].num_step_sizes, 4);

        // A tile-part QCD overrides the main QCC, a tile-part QCC overrides both.
        enter_tile_part_header(&mut ctx);
        read_qcd(&mut ctx, &[0x00, 0x58]).unwrap();
        read_qcc(&mut ctx, &[0x02, 0x00, 0x60]).unwrap();
        read_qcd(&mut ctx, &[0x00, 0x30]).unwrap();
        let tcp = &ctx.cp.tcps[0];
        assert_eq!(tcp.tccps[0].step_sizes[0].exponent, 11);
        assert_eq!(tcp.tccps[1].step_sizes[0].exponent, 11);
        assert!(!tcp.tccps[1].from_qcc && tcp.tccps[1].from_tile_header);
        assert_eq!(tcp.tccps[2].step_sizes[0].exponent, 12);
    }

    #[test]
    fn test_invalid_quantization() {
        let mut ctx = main_header_context(64, 64, 1);
        assert_eq!(
            read_qcd(&mut ctx, &[0x03, 0x00]),
            Err(J2kError::InvalidQuantizationStyle(3))
        );
        assert_eq!(
            read_qcd(&mut ctx, &[0x02, 0x48, 0x00, 0x48]),
            Err(J2kError::InvalidMarkerContent { name: "QCD" })
        );
        assert_eq!(
            read_qcc(&mut ctx, &[0x01, 0x00, 0x48]),
            Err(J2kError::InvalidComponentIndex { component: 1 })
        );
    }

    #[test]
    fn test_write_qcd_qcc() {
        let mut ctx = main_header_context(64, 64, 2);
        read_cod(&mut ctx, &[0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x04, 0x04, 0x00, 0x00]).unwrap();
        read_qcd(&mut ctx, &[0x21, 0x50, 0x12]).unwrap();
        read_qcc(&mut ctx, &[0x01, 0x42, 0x50, 0x01, 0x48, 0x02, 0x48, 0x03, 0x48, 0x04]).unwrap();
        assert!(needs_qcc(&ctx.default_tcp, 1));

        let mut stream = MemoryStream::new();
        write_qcd(&mut stream, &ctx.default_tcp).unwrap();
        write_qcc(&mut stream, &ctx.default_tcp, 1).unwrap();
        assert_eq!(
            stream.into_inner(),
            vec![
                0xFF, 0x5C, 0x00, 0x05, 0x21, 0x50, 0x12, // QCD
                0xFF, 0x5D, 0x00, 0x0C, 0x01, 0x42, // QCC, component 1
                0x50, 0x01, 0x48, 0x02, 0x48, 0x03, 0x48, 0x04,
            ]
        );
    }
}

//! POC: progression order change.

use super::{DecodeContext, push_component_index, write_segment};
use crate::byte_codec::{PayloadReader, component_index_width};
use crate::constants::{MAXIMUM_POCS, MAXIMUM_RESOLUTIONS};
use crate::error::J2kError;
use crate::jpeg2000::params::{Poc, ProgressionOrder};
use crate::marker_code::J2kMarkerCode;
use crate::stream::J2kStream;

pub fn read_poc(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let component_count = ctx.component_count();
    let width = component_index_width(component_count);
    let record_size = 5 + 2 * width;
    if payload.is_empty() || payload.len() % record_size != 0 {
        log::error!("Error reading POC marker");
        return Err(J2kError::InvalidMarkerSegmentSize {
            marker: J2kMarkerCode::ProgressionOrderChange.code(),
        });
    }
    let count = payload.len() / record_size;

    let tcp = ctx.current_tcp_mut();
    let old_count = tcp.pocs.len();
    if old_count + count > MAXIMUM_POCS {
        log::error!(
            "read_poc: number of POCs {} exceeds the maximum of {MAXIMUM_POCS}",
            old_count + count
        );
        return Err(J2kError::TooManyPocs);
    }

    let max_resolutions = match tcp.max_resolutions() {
        0 => MAXIMUM_RESOLUTIONS,
        n => n,
    };
    let num_layers = tcp.num_layers;
    let mut reader = PayloadReader::new(payload, "POC");
    let mut pocs = Vec::with_capacity(count);
    for _ in 0..count {
        let res_start = reader.read_u8()?;
        let comp_start = reader.read_uint(width)? as u16;
        let layer_end = reader.read_u16()?.min(num_layers.max(1));
        let res_end = reader.read_u8()?.min(MAXIMUM_RESOLUTIONS as u8);
        // A one byte Cepoc of 0 stands for 256.
        let comp_end = match reader.read_uint(width)? {
            0 if width == 1 => 256,
            value => value,
        }
        .min(component_count) as u16;
        let progression = reader.read_u8()?;
        let progression = ProgressionOrder::try_from(progression).map_err(|_| {
            log::error!("Unknown progression order {progression} in POC marker");
            J2kError::InvalidProgressionOrder(progression)
        })?;
        let poc = Poc {
            res_start,
            comp_start,
            layer_end,
            res_end,
            comp_end,
            progression,
        };
        poc.validate(max_resolutions, component_count, num_layers)?;
        pocs.push(poc);
    }
    tcp.pocs.extend(pocs);
    Ok(())
}

pub fn write_poc(
    stream: &mut dyn J2kStream,
    pocs: &[Poc],
    component_count: u32,
) -> Result<(), J2kError> {
    let width = component_index_width(component_count);
    let mut payload = Vec::with_capacity(pocs.len() * (5 + 2 * width));
    for poc in pocs {
        payload.push(poc.res_start);
        push_component_index(&mut payload, poc.comp_start as u32, component_count);
        payload.extend_from_slice(&poc.layer_end.to_be_bytes());
        payload.push(poc.res_end);
        push_component_index(&mut payload, poc.comp_end as u32, component_count);
        payload.push(poc.progression.into());
    }
    write_segment(stream, J2kMarkerCode::ProgressionOrderChange, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::markers::cod::read_cod;
    use crate::jpeg2000::markers::test_support::main_header_context;
    use crate::stream::MemoryStream;

    fn context() -> DecodeContext {
        let mut ctx = main_header_context(64, 64, 3);
        // 2 layers, 4 decompositions.
        read_cod(&mut ctx, &[0x00, 0x00, 0x00, 0x02, 0x00, 0x04, 0x04, 0x04, 0x00, 0x01]).unwrap();
        ctx
    }

    #[test]
    fn test_read_poc_appends() {
        let mut ctx = context();
        let first = [
            0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x01, // RSpoc, CSpoc, LYEpoc, REpoc, CEpoc, RLCP
        ];
        let second = [
            0x02, 0x00, 0x00, 0x02, 0x05, 0x03, 0x04, // remaining resolutions in CPRL
        ];
        read_poc(&mut ctx, &first).unwrap();
        read_poc(&mut ctx, &second).unwrap();

        let pocs = &ctx.default_tcp.pocs;
        assert_eq!(pocs.len(), 2);
        assert_eq!(pocs[0].progression, ProgressionOrder::Rlcp);
        assert_eq!((pocs[1].res_start, pocs[1].res_end), (2, 5));
        assert_eq!(pocs[1].progression, ProgressionOrder::Cprl);
    }

    #[test]
    fn test_read_poc_clamps_and_validates() {
        let mut ctx = context();
        // Layer and component ends beyond the codestream are clamped.
        read_poc(&mut ctx, &[0x00, 0x00, 0x00, 0x09, 0x05, 0x00, 0x00]).unwrap();
        let poc = ctx.default_tcp.pocs[0];
        assert_eq!((poc.layer_end, poc.comp_end), (2, 3));

        // Empty resolution range.
        assert_eq!(
            read_poc(&mut ctx, &[0x03, 0x00, 0x00, 0x01, 0x03, 0x03, 0x00]),
            Err(J2kError::InvalidPoc)
        );
        assert_eq!(
            read_poc(&mut ctx, &[0x00, 0x00, 0x00, 0x01, 0x03, 0x03, 0x07]),
            Err(J2kError::InvalidProgressionOrder(7))
        );
        assert!(read_poc(&mut ctx, &[0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_too_many_pocs() {
        let mut ctx = context();
        let record = [0x00, 0x00, 0x00, 0x01, 0x05, 0x03, 0x00];
        let payload: Vec<u8> = record.iter().copied().cycle().take(7 * 32).collect();
        read_poc(&mut ctx, &payload).unwrap();
        assert_eq!(read_poc(&mut ctx, &record), Err(J2kError::TooManyPocs));
    }

    #[test]
    fn test_write_poc() {
        let pocs = [Poc {
            res_start: 0,
            comp_start: 0,
            layer_end: 1,
            res_end: 3,
            comp_end: 2,
            progression: ProgressionOrder::Pcrl,
        }];
        let mut stream = MemoryStream::new();
        write_poc(&mut stream, &pocs, 2).unwrap();
        assert_eq!(
            stream.into_inner(),
            vec![0xFF, 0x5F, 0x00, 0x09, 0x00, 0x00, 0x00, 0x01, 0x03, 0x02, 0x03]
        );
    }
}

//! CAP, CRG and COM: capabilities, component registration and comments.

use super::{DecodeContext, write_segment};
use crate::byte_codec::PayloadReader;
use crate::constants::{MAXIMUM_COMMENT_LENGTH, MAXIMUM_COMMENTS};
use crate::error::J2kError;
use crate::jpeg2000::params::Comment;
use crate::marker_code::J2kMarkerCode;
use crate::stream::J2kStream;

const COMMENT_BINARY: u16 = 0;
const COMMENT_LATIN: u16 = 1;

pub fn read_cap(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let mut reader = PayloadReader::new(payload, "CAP");
    let pcap = reader.read_u32()?;
    // One Ccap word per bit set in Pcap.
    let count = pcap.count_ones() as usize;
    if reader.remaining() != 2 * count {
        log::error!(
            "CAP marker: Pcap {pcap:#010x} announces {count} Ccap words but {} bytes remain",
            reader.remaining()
        );
        return Err(J2kError::InvalidMarkerSegmentSize {
            marker: J2kMarkerCode::Capability.code(),
        });
    }
    let mut ccap = Vec::with_capacity(count);
    for _ in 0..count {
        ccap.push(reader.read_u16()?);
    }
    ctx.cp.pcap = pcap;
    ctx.cp.ccap = ccap;
    Ok(())
}

pub fn write_cap(stream: &mut dyn J2kStream, pcap: u32, ccap: &[u16]) -> Result<(), J2kError> {
    if pcap.count_ones() as usize != ccap.len() {
        log::error!("CAP: {} Ccap words for Pcap {pcap:#010x}", ccap.len());
        return Err(J2kError::InvalidArgument);
    }
    let mut payload = Vec::with_capacity(4 + 2 * ccap.len());
    payload.extend_from_slice(&pcap.to_be_bytes());
    for word in ccap {
        payload.extend_from_slice(&word.to_be_bytes());
    }
    write_segment(stream, J2kMarkerCode::Capability, &payload)
}

pub fn read_crg(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let component_count = ctx.component_count() as usize;
    if payload.len() != component_count * 4 {
        log::error!("Error reading CRG marker");
        return Err(J2kError::InvalidMarkerSegmentSize {
            marker: J2kMarkerCode::ComponentRegistration.code(),
        });
    }
    let mut reader = PayloadReader::new(payload, "CRG");
    let mut registration = Vec::with_capacity(component_count);
    for _ in 0..component_count {
        let x = reader.read_u16()?;
        let y = reader.read_u16()?;
        registration.push((x, y));
    }
    ctx.cp.registration = registration;
    Ok(())
}

pub fn write_crg(stream: &mut dyn J2kStream, registration: &[(u16, u16)]) -> Result<(), J2kError> {
    let payload: Vec<u8> = registration
        .iter()
        .flat_map(|(x, y)| x.to_be_bytes().into_iter().chain(y.to_be_bytes()))
        .collect();
    write_segment(stream, J2kMarkerCode::ComponentRegistration, &payload)
}

pub fn read_com(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let mut reader = PayloadReader::new(payload, "COM");
    let registration = reader.read_u16().map_err(|e| {
        log::error!("Corrupt COM segment");
        e
    })?;
    if reader.is_empty() {
        log::warn!("Empty COM segment. Ignoring");
        return Ok(());
    }
    if ctx.cp.comments.len() == MAXIMUM_COMMENTS {
        log::warn!("Only {MAXIMUM_COMMENTS} comments are supported. Ignoring");
        return Ok(());
    }
    if registration > COMMENT_LATIN {
        log::warn!(
            "Unrecognized comment type {registration:#x}. Assuming IS 8859-15:1999 (Latin) values"
        );
    }
    ctx.cp.comments.push(Comment {
        data: reader.remaining_data().to_vec(),
        is_binary: registration == COMMENT_BINARY,
    });
    Ok(())
}

pub fn write_com(stream: &mut dyn J2kStream, comment: &Comment) -> Result<(), J2kError> {
    if comment.data.is_empty() || comment.data.len() > MAXIMUM_COMMENT_LENGTH {
        log::error!("Comment of {} bytes cannot be written", comment.data.len());
        return Err(J2kError::InvalidArgument);
    }
    let registration = if comment.is_binary {
        COMMENT_BINARY
    } else {
        COMMENT_LATIN
    };
    let mut payload = Vec::with_capacity(2 + comment.data.len());
    payload.extend_from_slice(&registration.to_be_bytes());
    payload.extend_from_slice(&comment.data);
    write_segment(stream, J2kMarkerCode::Comment, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::markers::test_support::main_header_context;
    use crate::stream::MemoryStream;

    #[test]
    fn test_read_cap() {
        let mut ctx = main_header_context(16, 16, 1);
        let payload = [
            0x00, 0x02, 0x00, 0x01, // Pcap: bits 17 and 0
            0x00, 0x20, 0x00, 0x03, // Ccap
        ];
        read_cap(&mut ctx, &payload).unwrap();
        assert_eq!(ctx.cp.pcap, 0x0002_0001);
        assert_eq!(ctx.cp.ccap, vec![0x20, 0x03]);

        assert!(read_cap(&mut ctx, &payload[..6]).is_err());
    }

    #[test]
    fn test_write_cap() {
        let mut stream = MemoryStream::new();
        write_cap(&mut stream, 0x0002_0000, &[0x000F]).unwrap();
        assert_eq!(
            stream.into_inner(),
            vec![0xFF, 0x50, 0x00, 0x08, 0x00, 0x02, 0x00, 0x00, 0x00, 0x0F]
        );
        assert_eq!(
            write_cap(&mut MemoryStream::new(), 0x0002_0000, &[]),
            Err(J2kError::InvalidArgument)
        );
    }

    #[test]
    fn test_read_crg() {
        let mut ctx = main_header_context(16, 16, 2);
        read_crg(&mut ctx, &[0x00, 0x01, 0x00, 0x02, 0x80, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(ctx.cp.registration, vec![(1, 2), (0x8000, 0)]);
        assert!(read_crg(&mut ctx, &[0x00, 0x01, 0x00, 0x02]).is_err());

        let mut stream = MemoryStream::new();
        write_crg(&mut stream, &ctx.cp.registration).unwrap();
        assert_eq!(&stream.as_slice()[..4], &[0xFF, 0x63, 0x00, 0x0A]);
    }

    #[test]
    fn test_read_com() {
        let mut ctx = main_header_context(16, 16, 1);
        read_com(&mut ctx, &[0x00, 0x01, b'h', b'i']).unwrap();
        read_com(&mut ctx, &[0x00, 0x00, 0xDE, 0xAD]).unwrap();
        // Empty: ignored.
        read_com(&mut ctx, &[0x00, 0x01]).unwrap();
        assert_eq!(ctx.cp.comments.len(), 2);
        assert_eq!(ctx.cp.comments[0].data, b"hi");
        assert!(!ctx.cp.comments[0].is_binary);
        assert!(ctx.cp.comments[1].is_binary);
        assert!(read_com(&mut ctx, &[0x00]).is_err());
    }

    #[test]
    fn test_comment_limit() {
        let mut ctx = main_header_context(16, 16, 1);
        for _ in 0..MAXIMUM_COMMENTS + 3 {
            read_com(&mut ctx, &[0x00, 0x01, b'x']).unwrap();
        }
        assert_eq!(ctx.cp.comments.len(), MAXIMUM_COMMENTS);
    }
}

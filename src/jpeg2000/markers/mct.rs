//! Part 2 multiple component transform: MCT, MCC, MCO and CBD.
//!
//! Only single segment arrays (Zmct = 0, Ymct = 0), single collection MCC
//! segments with array based decorrelation over all components in order, and
//! one MCO stage are supported. Anything else is skipped with a warning.

use super::{DecodeContext, write_segment};
use crate::byte_codec::PayloadReader;
use crate::constants::{EXTENSION_MCT, MAXIMUM_SUPPORTED_PRECISION, PROFILE_PART2};
use crate::error::J2kError;
use crate::jpeg2000::image::{ImageComponent, J2kImage};
use crate::jpeg2000::params::{
    MccRecord, MctArrayType, MctElementType, MctMode, MctRecord, TileCodingParams,
};
use crate::marker_code::J2kMarkerCode;
use crate::stream::J2kStream;

/// Array based decorrelation, the only Xmcci value supported.
const MCC_ARRAY_DECORRELATION: u8 = 1;
/// MCT index of the decorrelation array written by the encoder.
const ENCODER_DECORRELATION_INDEX: u8 = 1;
const ENCODER_OFFSET_INDEX: u8 = 2;
const ENCODER_MCC_INDEX: u8 = 1;

pub fn read_mct(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let mut reader = PayloadReader::new(payload, "MCT");
    let zmct = reader.read_u16()?;
    if zmct != 0 {
        log::warn!("Cannot take in charge MCT data spanning multiple segments");
        return Ok(());
    }
    if reader.remaining() <= 4 {
        log::error!("Error reading MCT marker");
        return Err(reader.error());
    }
    let imct = reader.read_u16()?;
    let index = (imct & 0xFF) as u8;
    let array_type = MctArrayType::try_from(((imct >> 8) & 0x3) as u8).map_err(|_| {
        log::error!("MCT marker: reserved array type in Imct {imct:#06x}");
        J2kError::InvalidMctRecord
    })?;
    let element_type = MctElementType::try_from(((imct >> 10) & 0x3) as u8)
        .map_err(|_| J2kError::InvalidMctRecord)?;
    let ymct = reader.read_u16()?;
    if ymct != 0 {
        log::warn!("Cannot take in charge multiple MCT markers");
        return Ok(());
    }
    let data = reader.remaining_data();
    if data.len() % element_type.size() != 0 {
        log::error!(
            "MCT marker: {} bytes of data is not a whole number of {:?} elements",
            data.len(),
            element_type
        );
        return Err(J2kError::InvalidMctRecord);
    }

    let record = MctRecord {
        index,
        array_type,
        element_type,
        data: data.to_vec(),
    };
    let tcp = ctx.current_tcp_mut();
    match tcp.mct_records.iter_mut().find(|r| r.index == index) {
        Some(existing) => *existing = record,
        None => tcp.mct_records.push(record),
    }
    Ok(())
}

/// Reads a list of component indices that must be exactly `0..count`.
fn read_identity_indices(reader: &mut PayloadReader, count: u32, width: usize) -> Result<bool, J2kError> {
    let mut in_order = true;
    for expected in 0..count {
        if reader.read_uint(width)? != expected {
            in_order = false;
        }
    }
    Ok(in_order)
}

pub fn read_mcc(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let mut reader = PayloadReader::new(payload, "MCC");
    let zmcc = reader.read_u16()?;
    if zmcc != 0 {
        log::warn!("Cannot take in charge multiple data spanning");
        return Ok(());
    }
    if reader.remaining() < 5 {
        log::error!("Error reading MCC marker");
        return Err(reader.error());
    }
    let index = reader.read_u8()?;
    let ymcc = reader.read_u16()?;
    if ymcc != 0 {
        log::warn!("Cannot take in charge multiple data spanning");
        return Ok(());
    }
    let collections = reader.read_u16()?;
    if collections != 1 {
        log::warn!("Cannot take in charge {collections} collections in MCC marker");
        return Ok(());
    }

    let transform = reader.read_u8()?;
    if transform != MCC_ARRAY_DECORRELATION {
        log::warn!("Cannot take in charge collections other than array decorrelation");
        return Ok(());
    }
    let nmcc = reader.read_u16()?;
    let input_width = 1 + (nmcc >> 15) as usize;
    let component_count = (nmcc & 0x7FFF) as u32;
    if !read_identity_indices(&mut reader, component_count, input_width)? {
        log::warn!("Cannot take in charge collections with index shuffle");
        return Ok(());
    }
    let mmcc = reader.read_u16()?;
    let output_width = 1 + (mmcc >> 15) as usize;
    if (mmcc & 0x7FFF) as u32 != component_count {
        log::warn!("Cannot take in charge collections without same number of indices");
        return Ok(());
    }
    if !read_identity_indices(&mut reader, component_count, output_width)? {
        log::warn!("Cannot take in charge collections with index shuffle");
        return Ok(());
    }
    let tmcc = reader.read_u24()?;
    if !reader.is_empty() {
        log::error!("Error reading MCC marker: {} trailing bytes", reader.remaining());
        return Err(J2kError::InvalidMccRecord);
    }

    let tcp = ctx.current_tcp_mut();
    let find_array = |array_index: u8| -> Result<Option<u8>, J2kError> {
        if array_index == 0 {
            return Ok(None);
        }
        if tcp.mct_records.iter().any(|r| r.index == array_index) {
            Ok(Some(array_index))
        } else {
            log::error!("MCC marker references undefined MCT record {array_index}");
            Err(J2kError::MissingMctRecord(array_index))
        }
    };
    let record = MccRecord {
        index,
        component_count,
        decorrelation: find_array((tmcc & 0xFF) as u8)?,
        offset: find_array(((tmcc >> 8) & 0xFF) as u8)?,
        irreversible: (tmcc >> 16) & 1 == 0,
    };
    match tcp.mcc_records.iter_mut().find(|r| r.index == index) {
        Some(existing) => *existing = record,
        None => tcp.mcc_records.push(record),
    }
    Ok(())
}

/// Installs the arrays of collection `index` as the tile's decoding
/// matrix and DC offsets.
fn apply_collection(
    tcp: &mut TileCodingParams,
    component_count: u32,
    index: u8,
) -> Result<(), J2kError> {
    let Some(mcc) = tcp.mcc_records.iter().find(|r| r.index == index).cloned() else {
        log::error!("MCO marker references undefined MCC record {index}");
        return Err(J2kError::MissingMccRecord(index));
    };
    if mcc.component_count != component_count {
        log::warn!(
            "MCC record {index} covers {} components but the image has {component_count}. Ignoring",
            mcc.component_count
        );
        return Ok(());
    }
    let array = |array_index: u8| {
        tcp.mct_records
            .iter()
            .find(|r| r.index == array_index)
            .ok_or(J2kError::MissingMctRecord(array_index))
    };
    let n = component_count as usize;
    let matrix = match mcc.decorrelation {
        Some(array_index) => {
            let record = array(array_index)?;
            if record.element_count() != n * n {
                log::error!(
                    "MCT decorrelation record {array_index} holds {} elements, expected {}",
                    record.element_count(),
                    n * n
                );
                return Err(J2kError::InvalidMctRecord);
            }
            Some(record.values())
        }
        None => None,
    };
    let offsets = match mcc.offset {
        Some(array_index) => {
            let record = array(array_index)?;
            if record.element_count() != n {
                log::error!(
                    "MCT offset record {array_index} holds {} elements, expected {n}",
                    record.element_count()
                );
                return Err(J2kError::InvalidMctRecord);
            }
            Some(record.values())
        }
        None => None,
    };

    if matrix.is_some() {
        tcp.mct_decoding_matrix = matrix;
    }
    if let Some(offsets) = offsets {
        for (tccp, offset) in tcp.tccps.iter_mut().zip(offsets) {
            tccp.dc_level_shift = offset as i32;
        }
    }
    Ok(())
}

pub fn read_mco(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let mut reader = PayloadReader::new(payload, "MCO");
    let stages = reader.read_u8()?;
    if stages > 1 {
        log::warn!("Cannot take in charge multiple transformation stages");
        return Ok(());
    }
    if reader.remaining() != stages as usize {
        log::error!("Error reading MCO marker");
        return Err(J2kError::InvalidMarkerSegmentSize {
            marker: J2kMarkerCode::MultipleComponentOrdering.code(),
        });
    }
    let component_count = ctx.component_count();
    let tcp = ctx.current_tcp_mut();
    for tccp in &mut tcp.tccps {
        tccp.dc_level_shift = 0;
    }
    tcp.mct_decoding_matrix = None;
    for _ in 0..stages {
        let index = reader.read_u8()?;
        apply_collection(tcp, component_count, index)?;
    }
    tcp.mct = MctMode::Custom;
    Ok(())
}

pub fn read_cbd(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let component_count = ctx.component_count();
    if payload.len() != component_count as usize + 2 {
        log::error!("Error reading CBD marker");
        return Err(J2kError::InvalidMarkerSegmentSize {
            marker: J2kMarkerCode::ComponentBitDepth.code(),
        });
    }
    let mut reader = PayloadReader::new(payload, "CBD");
    let ncbd = reader.read_u16()?;
    if (ncbd & 0x7FFF) as u32 != component_count {
        log::error!(
            "CBD marker: {} components signalled, image has {component_count}",
            ncbd & 0x7FFF
        );
        return Err(J2kError::InvalidComponentCount(ncbd as u32 & 0x7FFF));
    }
    let mut depths = Vec::with_capacity(component_count as usize);
    for component in 0..component_count {
        let byte = reader.read_u8()?;
        let precision = (byte & 0x7F) + 1;
        if precision > MAXIMUM_SUPPORTED_PRECISION {
            log::error!("CBD marker: unsupported precision {precision} for component {component}");
            return Err(J2kError::UnsupportedPrecision {
                component: component as u16,
                precision,
            });
        }
        depths.push((precision, byte & 0x80 != 0));
    }
    for (component, (precision, signed)) in ctx.image.components.iter_mut().zip(depths) {
        component.precision = precision;
        component.signed = signed;
    }
    Ok(())
}

pub fn write_mct(stream: &mut dyn J2kStream, record: &MctRecord) -> Result<(), J2kError> {
    let imct = (u8::from(record.element_type) as u16) << 10
        | (u8::from(record.array_type) as u16) << 8
        | record.index as u16;
    let mut payload = Vec::with_capacity(6 + record.data.len());
    payload.extend_from_slice(&0u16.to_be_bytes()); // Zmct
    payload.extend_from_slice(&imct.to_be_bytes());
    payload.extend_from_slice(&0u16.to_be_bytes()); // Ymct
    payload.extend_from_slice(&record.data);
    write_segment(stream, J2kMarkerCode::MultipleComponentTransform, &payload)
}

pub fn write_mcc(stream: &mut dyn J2kStream, record: &MccRecord) -> Result<(), J2kError> {
    let wide = record.component_count > 255;
    let count = record.component_count as u16 | if wide { 0x8000 } else { 0 };
    let mut payload = Vec::new();
    payload.extend_from_slice(&0u16.to_be_bytes()); // Zmcc
    payload.push(record.index);
    payload.extend_from_slice(&0u16.to_be_bytes()); // Ymcc
    payload.extend_from_slice(&1u16.to_be_bytes()); // Qmcc
    payload.push(MCC_ARRAY_DECORRELATION);
    for _ in 0..2 {
        // Input components, then output components.
        payload.extend_from_slice(&count.to_be_bytes());
        for component in 0..record.component_count {
            if wide {
                payload.extend_from_slice(&(component as u16).to_be_bytes());
            } else {
                payload.push(component as u8);
            }
        }
    }
    let tmcc = (u32::from(!record.irreversible) << 16)
        | (record.offset.unwrap_or(0) as u32) << 8
        | record.decorrelation.unwrap_or(0) as u32;
    payload.extend_from_slice(&tmcc.to_be_bytes()[1..]);
    write_segment(stream, J2kMarkerCode::MultipleComponentCollection, &payload)
}

pub fn write_mco(stream: &mut dyn J2kStream, collections: &[u8]) -> Result<(), J2kError> {
    let mut payload = Vec::with_capacity(1 + collections.len());
    payload.push(collections.len() as u8);
    payload.extend_from_slice(collections);
    write_segment(stream, J2kMarkerCode::MultipleComponentOrdering, &payload)
}

pub fn write_cbd(stream: &mut dyn J2kStream, components: &[ImageComponent]) -> Result<(), J2kError> {
    let mut payload = Vec::with_capacity(2 + components.len());
    payload.extend_from_slice(&(components.len() as u16).to_be_bytes());
    for component in components {
        let sign = if component.signed { 0x80 } else { 0 };
        payload.push(sign | (component.precision - 1));
    }
    write_segment(stream, J2kMarkerCode::ComponentBitDepth, &payload)
}

/// Inverts a row-major `n x n` matrix by Gauss-Jordan elimination with
/// partial pivoting. `None` if the matrix is singular.
pub fn invert_matrix(matrix: &[f32], n: usize) -> Option<Vec<f32>> {
    if matrix.len() != n * n {
        return None;
    }
    let width = 2 * n;
    let mut work = vec![0f64; n * width];
    for row in 0..n {
        for col in 0..n {
            work[row * width + col] = matrix[row * n + col] as f64;
        }
        work[row * width + n + row] = 1.0;
    }
    for col in 0..n {
        let pivot = (col..n).max_by(|&a, &b| {
            work[a * width + col]
                .abs()
                .total_cmp(&work[b * width + col].abs())
        })?;
        if work[pivot * width + col].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for k in 0..width {
                work.swap(pivot * width + k, col * width + k);
            }
        }
        let scale = work[col * width + col];
        for k in 0..width {
            work[col * width + k] /= scale;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[row * width + col];
            if factor != 0.0 {
                for k in 0..width {
                    work[row * width + k] -= factor * work[col * width + k];
                }
            }
        }
    }
    Some(
        (0..n)
            .flat_map(|row| (0..n).map(move |col| (row, col)))
            .map(|(row, col)| work[row * width + n + col] as f32)
            .collect(),
    )
}

/// Builds the MCT and MCC records describing the tile's custom forward
/// matrix: the inverse matrix as float32 decorrelation array and the DC
/// level shifts as int32 offset array.
pub fn prepare_custom_mct(tcp: &mut TileCodingParams) -> Result<(), J2kError> {
    let n = tcp.tccps.len();
    let coding = tcp.mct_coding_matrix.as_ref().ok_or_else(|| {
        log::error!("Custom MCT requested without a matrix");
        J2kError::InvalidArgument
    })?;
    let decoding = invert_matrix(coding, n).ok_or_else(|| {
        log::error!("Custom MCT matrix is not invertible");
        J2kError::InvalidArgument
    })?;

    let mut decorrelation = Vec::with_capacity(4 * n * n);
    for &value in &decoding {
        MctElementType::Float32.encode(value, &mut decorrelation);
    }
    let mut offsets = Vec::with_capacity(4 * n);
    for tccp in &tcp.tccps {
        MctElementType::Int32.encode(tccp.dc_level_shift as f32, &mut offsets);
    }
    tcp.mct_records = vec![
        MctRecord {
            index: ENCODER_DECORRELATION_INDEX,
            array_type: MctArrayType::Decorrelation,
            element_type: MctElementType::Float32,
            data: decorrelation,
        },
        MctRecord {
            index: ENCODER_OFFSET_INDEX,
            array_type: MctArrayType::Offset,
            element_type: MctElementType::Int32,
            data: offsets,
        },
    ];
    tcp.mcc_records = vec![MccRecord {
        index: ENCODER_MCC_INDEX,
        component_count: n as u32,
        decorrelation: Some(ENCODER_DECORRELATION_INDEX),
        offset: Some(ENCODER_OFFSET_INDEX),
        irreversible: true,
    }];
    tcp.mct_decoding_matrix = Some(decoding);
    tcp.mct = MctMode::Custom;
    Ok(())
}

/// Rsiz bits announcing Part 2 MCT usage.
pub fn mct_rsiz(rsiz: u16) -> u16 {
    rsiz | PROFILE_PART2 | EXTENSION_MCT
}

/// Writes CBD, the MCT arrays, the MCC collections and MCO.
pub fn write_mct_group(
    stream: &mut dyn J2kStream,
    tcp: &TileCodingParams,
    image: &J2kImage,
) -> Result<(), J2kError> {
    write_cbd(stream, &image.components)?;
    for record in &tcp.mct_records {
        write_mct(stream, record)?;
    }
    for record in &tcp.mcc_records {
        write_mcc(stream, record)?;
    }
    let order: Vec<u8> = tcp.mcc_records.iter().map(|r| r.index).collect();
    write_mco(stream, &order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::markers::test_support::main_header_context;
    use crate::stream::MemoryStream;

    fn mct_payload(imct: u16, data: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x00, 0x00]; // Zmct
        payload.extend_from_slice(&imct.to_be_bytes());
        payload.extend_from_slice(&[0x00, 0x00]); // Ymct
        payload.extend_from_slice(data);
        payload
    }

    fn mcc_payload(index: u8, tmcc: u32) -> Vec<u8> {
        let mut payload = vec![
            0x00, 0x00, // Zmcc
            index, // Imcc
            0x00, 0x00, // Ymcc
            0x00, 0x01, // Qmcc
            0x01, // Xmcci: array decorrelation
            0x00, 0x02, 0x00, 0x01, // Nmcci, Cmcci
            0x00, 0x02, 0x00, 0x01, // Mmcci, Wmcci
        ];
        payload.extend_from_slice(&tmcc.to_be_bytes()[1..]);
        payload
    }

    #[test]
    fn test_mct_mcc_mco() {
        let mut ctx = main_header_context(16, 16, 2);
        // Index 1, decorrelation, int16: swap the two components.
        read_mct(&mut ctx, &mct_payload(0x0101, &[0, 0, 0, 1, 0, 1, 0, 0])).unwrap();
        // Index 2, offset, int32.
        read_mct(&mut ctx, &mct_payload(0x0602, &[0, 0, 0, 5, 0, 0, 0, 7])).unwrap();
        read_mcc(&mut ctx, &mcc_payload(3, 0x01_02_01)).unwrap();
        read_mco(&mut ctx, &[0x01, 0x03]).unwrap();

        let tcp = &ctx.default_tcp;
        assert_eq!(tcp.mct, MctMode::Custom);
        assert_eq!(tcp.mct_decoding_matrix, Some(vec![0.0, 1.0, 1.0, 0.0]));
        assert_eq!(tcp.tccps[0].dc_level_shift, 5);
        assert_eq!(tcp.tccps[1].dc_level_shift, 7);
        assert!(!tcp.mcc_records[0].irreversible);
    }

    #[test]
    fn test_mct_record_replaced_and_ignored() {
        let mut ctx = main_header_context(16, 16, 2);
        read_mct(&mut ctx, &mct_payload(0x0101, &[0, 1])).unwrap();
        read_mct(&mut ctx, &mct_payload(0x0101, &[0, 2, 0, 3])).unwrap();
        assert_eq!(ctx.default_tcp.mct_records.len(), 1);
        assert_eq!(ctx.default_tcp.mct_records[0].values(), vec![2.0, 3.0]);

        // Zmct != 0: skipped.
        read_mct(&mut ctx, &[0x00, 0x01, 0x01, 0x05, 0x00, 0x00, 0x00, 0x01]).unwrap();
        assert_eq!(ctx.default_tcp.mct_records.len(), 1);
        // Int32 data not a multiple of 4 bytes.
        assert_eq!(
            read_mct(&mut ctx, &mct_payload(0x0505, &[0, 0, 1])),
            Err(J2kError::InvalidMctRecord)
        );
    }

    #[test]
    fn test_mcc_missing_array() {
        let mut ctx = main_header_context(16, 16, 2);
        assert_eq!(
            read_mcc(&mut ctx, &mcc_payload(1, 0x00_00_04)),
            Err(J2kError::MissingMctRecord(4))
        );
        let mut trailing = mcc_payload(1, 0);
        trailing.push(0);
        assert_eq!(read_mcc(&mut ctx, &trailing), Err(J2kError::InvalidMccRecord));
        assert_eq!(read_mco(&mut ctx, &[0x01, 0x09]), Err(J2kError::MissingMccRecord(9)));
    }

    #[test]
    fn test_read_cbd() {
        let mut ctx = main_header_context(16, 16, 2);
        read_cbd(&mut ctx, &[0x00, 0x02, 0x0B, 0x87]).unwrap();
        assert_eq!(ctx.image.components[0].precision, 12);
        assert!(!ctx.image.components[0].signed);
        assert_eq!(ctx.image.components[1].precision, 8);
        assert!(ctx.image.components[1].signed);
        assert!(read_cbd(&mut ctx, &[0x00, 0x03, 0x0B, 0x87]).is_err());
        assert!(read_cbd(&mut ctx, &[0x00, 0x02, 0x0B]).is_err());
    }

    #[test]
    fn test_invert_matrix() {
        let matrix = [2.0, 1.0, 1.0, 1.0];
        let inverse = invert_matrix(&matrix, 2).unwrap();
        let expected = [1.0, -1.0, -1.0, 2.0];
        for (value, want) in inverse.iter().zip(expected) {
            assert!((value - want).abs() < 1e-6);
        }
        assert!(invert_matrix(&[1.0, 2.0, 2.0, 4.0], 2).is_none());
    }

    #[test]
    fn test_custom_mct_round_trip() {
        let mut tcp = TileCodingParams::new(2);
        tcp.tccps[0].dc_level_shift = 128;
        tcp.tccps[1].dc_level_shift = 128;
        tcp.mct_coding_matrix = Some(vec![2.0, 1.0, 1.0, 1.0]);
        prepare_custom_mct(&mut tcp).unwrap();

        let image = J2kImage::new(
            0,
            0,
            16,
            16,
            vec![ImageComponent::new(8, false, 1, 1), ImageComponent::new(8, false, 1, 1)],
        )
        .unwrap();
        let mut stream = MemoryStream::new();
        write_mct_group(&mut stream, &tcp, &image).unwrap();
        let bytes = stream.into_inner();
        assert_eq!(&bytes[..8], &[0xFF, 0x78, 0x00, 0x06, 0x00, 0x02, 0x07, 0x07]);

        // Parse the segments back into a fresh context.
        let mut ctx = main_header_context(16, 16, 2);
        let mut position = 8;
        while position < bytes.len() {
            let marker = u16::from_be_bytes([bytes[position], bytes[position + 1]]);
            let length = u16::from_be_bytes([bytes[position + 2], bytes[position + 3]]) as usize;
            let payload = &bytes[position + 4..position + 2 + length];
            match marker {
                0xFF74 => read_mct(&mut ctx, payload).unwrap(),
                0xFF75 => read_mcc(&mut ctx, payload).unwrap(),
                0xFF77 => read_mco(&mut ctx, payload).unwrap(),
                other => panic!("unexpected marker {other:#06x}"),
            }
            position += 2 + length;
        }
        assert_eq!(ctx.default_tcp.mct, MctMode::Custom);
        assert_eq!(ctx.default_tcp.mct_decoding_matrix, tcp.mct_decoding_matrix);
        assert_eq!(ctx.default_tcp.tccps[1].dc_level_shift, 128);
        assert!(ctx.default_tcp.mcc_records[0].irreversible);
        assert_eq!(mct_rsiz(0), 0x8100);
    }
}

//! Codestream tests through the public encoder and decoder.

use j2kcodec_rs::jpeg2000::params::{QuantizationStyle, TRANSFORM_REVERSIBLE_5_3};
use j2kcodec_rs::jpeg2000::parser::J2kParser;
use j2kcodec_rs::jpeg2000::writer::{HeaderOptions, J2kWriter};
use j2kcodec_rs::{
    CompressParams, DecompressParams, ImageComponent, J2kDecoder, J2kEncoder, J2kError, J2kImage,
    MctMode, MemoryStream, ProgressionOrder,
};

/// Sample values stay below 100 so stored data never holds a 0xFF byte.
fn sample(component: u32, x: u32, y: u32) -> i32 {
    ((x * 3 + y * 5 + component * 17) % 100) as i32
}

fn test_image(width: u32, height: u32, components: u32) -> J2kImage {
    let mut image = J2kImage::new(
        0,
        0,
        width,
        height,
        vec![ImageComponent::new(8, false, 1, 1); components as usize],
    )
    .unwrap();
    for (c, component) in image.components.iter_mut().enumerate() {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.push(sample(c as u32, x, y));
            }
        }
        component.data = Some(data);
    }
    image
}

fn block(component: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> Vec<i32> {
    let mut data = Vec::new();
    for y in y0..y1 {
        for x in x0..x1 {
            data.push(sample(component, x, y));
        }
    }
    data
}

fn count_marker(bytes: &[u8], marker: [u8; 2]) -> usize {
    bytes.windows(2).filter(|pair| *pair == marker).count()
}

fn compress(image: &mut J2kImage, params: CompressParams) -> Vec<u8> {
    let mut stream = MemoryStream::new();
    let mut encoder = J2kEncoder::new(params);
    encoder.start_compress(&mut stream, image).unwrap();
    encoder.encode(&mut stream, image).unwrap();
    encoder.end_compress(&mut stream).unwrap();
    stream.into_inner()
}

/// 8x8, one 8 bit component, a single tile with one decomposition level.
fn main_header() -> Vec<u8> {
    let mut bytes = vec![
        0xFF, 0x4F, // SOC
        0xFF, 0x51, 0x00, 0x29, // SIZ, Lsiz = 41
        0x00, 0x00, // Rsiz
        0x00, 0x00, 0x00, 0x08, // Xsiz
        0x00, 0x00, 0x00, 0x08, // Ysiz
        0x00, 0x00, 0x00, 0x00, // XOsiz
        0x00, 0x00, 0x00, 0x00, // YOsiz
        0x00, 0x00, 0x00, 0x08, // XTsiz
        0x00, 0x00, 0x00, 0x08, // YTsiz
        0x00, 0x00, 0x00, 0x00, // XTOsiz
        0x00, 0x00, 0x00, 0x00, // YTOsiz
        0x00, 0x01, // Csiz
        0x07, 0x01, 0x01, // 8 bits unsigned, no subsampling
    ];
    bytes.extend_from_slice(&cod(0x04, 0x04));
    bytes.extend_from_slice(&[
        0xFF, 0x5C, 0x00, 0x07, // QCD, Lqcd = 7
        0x40, // 2 guard bits, no quantization
        0x40, 0x48, 0x48, 0x50, // exponents 8, 9, 9, 10
    ]);
    bytes
}

fn cod(xcb: u8, ycb: u8) -> [u8; 14] {
    [
        0xFF, 0x52, 0x00, 0x0C, // COD, Lcod = 12
        0x00, // Scod
        0x00, 0x00, 0x01, 0x00, // LRCP, 1 layer, no MCT
        0x01, xcb, ycb, 0x00, 0x01, // 1 decomposition, code-block exponents, 5/3
    ]
}

fn decode_bytes(bytes: Vec<u8>, params: DecompressParams) -> Result<J2kImage, J2kError> {
    let mut stream = MemoryStream::from_bytes(bytes);
    let mut decoder = J2kDecoder::new(params);
    let mut image = decoder.read_header(&mut stream)?;
    decoder.decode(&mut stream, &mut image)?;
    Ok(image)
}

#[test]
fn test_header_round_trip() {
    let mut image = test_image(64, 64, 3);
    let params = CompressParams::new()
        .resolutions(5)
        .irreversible(true)
        .quantization(QuantizationStyle::ScalarDerived)
        .mct(MctMode::Rgb)
        .progression(ProgressionOrder::Rpcl)
        .layer_rates(vec![20.0])
        .comment("round trip");
    let mut stream = MemoryStream::new();
    let mut encoder = J2kEncoder::new(params);
    encoder.start_compress(&mut stream, &image).unwrap();
    encoder.encode(&mut stream, &mut image).unwrap();
    encoder.end_compress(&mut stream).unwrap();
    let written = encoder.tile_coding_params().clone();
    let bytes = stream.into_inner();
    assert!(bytes.starts_with(&[0xFF, 0x4F, 0xFF, 0x51]));
    assert!(bytes.ends_with(&[0xFF, 0xD9]));
    assert_eq!(count_marker(&bytes, [0xFF, 0x4F]), 1);
    assert_eq!(count_marker(&bytes, [0xFF, 0xD9]), 1);

    let mut stream = MemoryStream::from_bytes(bytes);
    let mut decoder = J2kDecoder::new(DecompressParams {
        build_index: true,
        ..Default::default()
    });
    let mut decoded = decoder.read_header(&mut stream).unwrap();
    let header = decoder.header().unwrap();
    assert_eq!(header.cp.rsiz, 0);
    assert_eq!(header.cp.num_tiles(), 1);
    assert_eq!(header.cp.comments[0].data, b"round trip");
    let tcp = &header.default_tcp;
    assert_eq!(tcp.progression, ProgressionOrder::Rpcl);
    assert_eq!(tcp.num_layers, 1);
    assert_eq!(tcp.mct, MctMode::Rgb);
    assert_eq!(written.rates, vec![20.0]);
    for (read, tccp) in tcp.tccps.iter().zip(&written.tccps) {
        assert_eq!(read.num_resolutions, 5);
        assert_eq!(read.qmfbid, 0);
        assert_eq!(read.cblkw, 6);
        assert_eq!(read.cblkh, 6);
        assert_eq!(read.quantization_style, QuantizationStyle::ScalarDerived);
        assert_eq!(read.num_guard_bits, 2);
        // Derived step sizes expand from the LL band alike on both sides.
        assert_eq!(read.step_sizes[..13], tccp.step_sizes[..13]);
    }

    decoder.decode(&mut stream, &mut decoded).unwrap();
    for c in 0..3 {
        assert_eq!(decoded.components[c].data.as_deref(), Some(&block(c as u32, 0, 0, 64, 64)[..]));
    }
    let index = decoder.index().unwrap();
    assert_eq!(index.tiles.len(), 1);
    assert_eq!(index.tiles[0].tile_parts.len(), 1);
}

/// Parses a main header and writes it back out.
fn rewrite_main_header(header: &[u8]) -> (Vec<u8>, J2kParser) {
    let mut bytes = header.to_vec();
    bytes.extend_from_slice(&[0xFF, 0x90]);
    let mut stream = MemoryStream::from_bytes(bytes);
    let mut parser = J2kParser::new(false);
    parser.read_header(&mut stream).unwrap();
    let ctx = &parser.ctx;
    let mut out = MemoryStream::new();
    J2kWriter::new()
        .write_main_header(&mut out, &ctx.image, &ctx.cp, &ctx.default_tcp, 0, HeaderOptions::default())
        .unwrap();
    (out.into_inner(), parser)
}

#[test]
fn test_main_header_rewrite_is_stable() {
    let mut image = test_image(48, 40, 3);
    let params = CompressParams::new()
        .tile_size(32, 32)
        .resolutions(3)
        .precincts(vec![(64, 64), (32, 32)])
        .roi(1, 4)
        .comment("stable header");
    let bytes = compress(&mut image, params);
    let first_sot = bytes.windows(2).position(|pair| pair == [0xFF, 0x90]).unwrap();

    let (rewritten, parser) = rewrite_main_header(&bytes[..first_sot]);
    let (again, reparsed) = rewrite_main_header(&rewritten);
    assert_eq!(rewritten, again);

    let (a, b) = (&parser.ctx, &reparsed.ctx);
    assert_eq!(a.image.bounds(), b.image.bounds());
    assert_eq!(a.cp.num_tiles(), 4);
    assert_eq!(b.cp.num_tiles(), 4);
    assert_eq!(a.cp.comments, b.cp.comments);
    for (x, y) in a.default_tcp.tccps.iter().zip(&b.default_tcp.tccps) {
        assert_eq!(x.num_resolutions, y.num_resolutions);
        assert_eq!(x.precinct_width_exp[..3], y.precinct_width_exp[..3]);
        assert_eq!(x.step_sizes[..7], y.step_sizes[..7]);
        assert_eq!(x.roi_shift, y.roi_shift);
    }
    assert_eq!(b.default_tcp.tccps[1].roi_shift, 4);
    assert_eq!(b.default_tcp.tccps[0].precinct_width_exp[..3], [4, 5, 6]);
}

#[test]
fn test_tiled_decode_and_single_tiles() {
    let mut image = test_image(64, 64, 1);
    let bytes = compress(&mut image, CompressParams::new().tile_size(32, 32).tlm(true));
    assert_eq!(count_marker(&bytes, [0xFF, 0x90]), 4);
    assert_eq!(count_marker(&bytes, [0xFF, 0x93]), 4);
    assert_eq!(count_marker(&bytes, [0xFF, 0x55]), 1);

    let decoded = decode_bytes(bytes.clone(), DecompressParams::default()).unwrap();
    assert_eq!(decoded.components[0].data.as_deref(), Some(&block(0, 0, 0, 64, 64)[..]));

    for tile in 0..4u16 {
        let x0 = (tile as u32 % 2) * 32;
        let y0 = (tile as u32 / 2) * 32;
        let params = DecompressParams {
            tile_index: Some(tile),
            ..Default::default()
        };
        let decoded = decode_bytes(bytes.clone(), params).unwrap();
        let component = &decoded.components[0];
        assert_eq!((component.width, component.height), (32, 32));
        assert_eq!(
            component.data.as_deref(),
            Some(&block(0, x0, y0, x0 + 32, y0 + 32)[..]),
            "tile {tile}"
        );
    }
}

#[test]
fn test_tiles_out_of_order_on_one_decoder() {
    let mut image = test_image(64, 64, 1);
    let bytes = compress(&mut image, CompressParams::new().tile_size(32, 32).tlm(true));
    let mut stream = MemoryStream::from_bytes(bytes);
    let mut decoder = J2kDecoder::new(DecompressParams::default());
    let mut tile_image = decoder.read_header(&mut stream).unwrap();
    assert!(decoder.coding_params().unwrap().tlm.is_some());
    for tile in [3u16, 0, 2, 1] {
        decoder.get_tile(&mut stream, &mut tile_image, tile).unwrap();
        let x0 = (tile as u32 % 2) * 32;
        let y0 = (tile as u32 / 2) * 32;
        assert_eq!(
            tile_image.components[0].data.as_deref(),
            Some(&block(0, x0, y0, x0 + 32, y0 + 32)[..])
        );
    }
    assert_eq!(
        decoder.get_tile(&mut stream, &mut tile_image, 4),
        Err(J2kError::InvalidTileIndex { tile: 4 })
    );
}

#[test]
fn test_tile_parts_with_packet_lengths() {
    let mut image = test_image(16, 16, 2);
    let params = CompressParams::new()
        .resolutions(2)
        .progression(ProgressionOrder::Rlcp)
        .tile_parts('R')
        .plt(true)
        .sop(true)
        .eph(true);
    let bytes = compress(&mut image, params);
    assert_eq!(count_marker(&bytes, [0xFF, 0x90]), 2);
    assert_eq!(count_marker(&bytes, [0xFF, 0x58]), 2);

    let decoded = j2kcodec_rs::decode(&bytes, DecompressParams::default()).unwrap();
    for c in 0..2 {
        assert_eq!(decoded.components[c].data.as_deref(), Some(&block(c as u32, 0, 0, 16, 16)[..]));
    }
}

#[test]
fn test_convenience_round_trip() {
    let mut image = test_image(20, 12, 1);
    let bytes = j2kcodec_rs::encode(&mut image, CompressParams::new().resolutions(3)).unwrap();
    let decoded = j2kcodec_rs::decode(&bytes, DecompressParams::default()).unwrap();
    assert_eq!(decoded.components[0].data, image.components[0].data);
    assert_eq!((decoded.x1, decoded.y1), (20, 12));
}

#[test]
fn test_missing_qcd() {
    let mut bytes = main_header();
    bytes.truncate(bytes.len() - 9);
    bytes.extend_from_slice(&[
        0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0F, 0x00, 0x01, // SOT, Psot = 15
        0xFF, 0x93, 0x00, // SOD and data
        0xFF, 0xD9,
    ]);
    let mut stream = MemoryStream::from_bytes(bytes);
    let mut decoder = J2kDecoder::new(DecompressParams::default());
    assert_eq!(
        decoder.read_header(&mut stream).err(),
        Some(J2kError::RequiredMarkerNotFound("QCD"))
    );
}

#[test]
fn test_code_block_exponent_sum() {
    let mut bytes = main_header();
    // 128x128 code-blocks: 2^7 * 2^7 exceeds 4096 samples.
    bytes[45..59].copy_from_slice(&cod(0x05, 0x05));
    let mut stream = MemoryStream::from_bytes(bytes);
    let mut decoder = J2kDecoder::new(DecompressParams::default());
    assert_eq!(
        decoder.read_header(&mut stream).err(),
        Some(J2kError::InvalidCodeBlockSize)
    );
}

#[test]
fn test_tile_part_index_gap() {
    let mut bytes = main_header();
    bytes.extend_from_slice(&[
        0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0F, 0x00, 0x00, // SOT, TPsot 0
        0xFF, 0x93, 0x80, // SOD and data
        0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0F, 0x02, 0x00, // SOT, TPsot 2
        0xFF, 0x93, 0x80, // SOD and data
        0xFF, 0xD9,
    ]);
    assert_eq!(
        decode_bytes(bytes, DecompressParams::default()).err(),
        Some(J2kError::TilePartIndexDiscontinuity {
            tile: 0,
            expected: 1,
            found: 2
        })
    );
}

#[test]
fn test_unterminated_packet_length() {
    let mut bytes = main_header();
    bytes.extend_from_slice(&[
        0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x16, 0x00, 0x01, // SOT, Psot = 22
        0xFF, 0x58, 0x00, 0x05, // PLT, Lplt = 5
        0x00, // Zplt
        0x05, 0x81, // 5, then a length with its continuation bit set
        0xFF, 0x93, 0x00, // SOD and data
        0xFF, 0xD9,
    ]);
    assert_eq!(
        decode_bytes(bytes, DecompressParams::default()).err(),
        Some(J2kError::CorruptedPacketLength)
    );
}

#[test]
fn test_hand_written_codestream() {
    let mut bytes = main_header();
    let psot = 12 + 2 + 64u32;
    bytes.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00]);
    bytes.extend_from_slice(&psot.to_be_bytes());
    bytes.extend_from_slice(&[0x00, 0x01, 0xFF, 0x93]);
    bytes.extend((0..64u8).map(|v| v.wrapping_add(128)));
    bytes.extend_from_slice(&[0xFF, 0xD9]);

    let mut stream = MemoryStream::from_bytes(bytes);
    let mut decoder = J2kDecoder::new(DecompressParams::default());
    let mut image = decoder.read_header(&mut stream).unwrap();
    let tccp = &decoder.header().unwrap().default_tcp.tccps[0];
    assert_eq!(tccp.qmfbid, TRANSFORM_REVERSIBLE_5_3);
    assert_eq!(tccp.num_resolutions, 2);
    decoder.decode(&mut stream, &mut image).unwrap();
    assert_eq!(image.components[0].data, Some((0..64).collect::<Vec<i32>>()));
}

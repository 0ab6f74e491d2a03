//! j2kcodec CLI - JPEG 2000 codestream encoder, decoder and inspector.

use clap::{Parser, Subcommand, ValueEnum};
use j2kcodec_rs::jpeg2000::decoder::{DecompressParams, J2kDecoder};
use j2kcodec_rs::jpeg2000::encoder::{CompressParams, J2kEncoder};
use j2kcodec_rs::jpeg2000::image::{ImageComponent, J2kImage, Rect};
use j2kcodec_rs::jpeg2000::params::{MctMode, ProgressionOrder, TileCodingParams};
use j2kcodec_rs::stream::MemoryStream;
use std::fs;
use std::path::{Path, PathBuf};

/// JPEG 2000 codestream tool
#[derive(Parser)]
#[command(name = "j2kcodec")]
#[command(version)]
#[command(about = "Encode, decode and inspect JPEG 2000 codestreams", long_about = None)]
#[command(after_help = "EXAMPLES:
    j2kcodec encode -i pixels.raw -o image.j2k -w 512 -H 512 -n 3 --tile 256x256 --tlm
    j2kcodec decode -i image.j2k -o image.ppm -f pnm --reduce 1
    j2kcodec decode -i image.j2k -o tile.raw --tile 3
    j2kcodec info -i image.j2k --index

RAW FORMAT:
    Planar samples, component after component, row by row. One byte per
    sample up to 8 bits, two big-endian bytes above.")]
struct Cli {
    /// Log more (repeat for trace output)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode raw samples to a J2K codestream
    #[command(visible_alias = "e")]
    Encode {
        /// Raw sample file
        #[arg(short, long)]
        input: PathBuf,

        /// Output codestream
        #[arg(short, long)]
        output: PathBuf,

        /// Image width in samples
        #[arg(short, long)]
        width: u32,

        /// Image height in samples
        #[arg(short = 'H', long)]
        height: u32,

        /// Number of components
        #[arg(short = 'n', long, default_value = "1")]
        components: u16,

        /// Bits per sample
        #[arg(short, long, default_value = "8")]
        precision: u8,

        /// Samples are signed
        #[arg(long)]
        signed: bool,

        /// Tile size as WIDTHxHEIGHT
        #[arg(short, long, value_parser = parse_size)]
        tile: Option<(u32, u32)>,

        /// Number of resolution levels
        #[arg(short, long, default_value = "6")]
        resolutions: u32,

        /// Code-block size as WIDTHxHEIGHT
        #[arg(short = 'b', long, default_value = "64x64", value_parser = parse_size)]
        code_block: (u32, u32),

        /// Progression order
        #[arg(long, default_value = "lrcp", value_enum)]
        progression: Progression,

        /// Start a tile-part at every change of R, L, C or P
        #[arg(long)]
        tile_parts: Option<char>,

        /// Use the irreversible 9/7 transform
        #[arg(long)]
        irreversible: bool,

        /// Multiple component transform
        #[arg(long, default_value = "off", value_enum)]
        mct: Mct,

        /// Compression ratio of every layer, highest first
        #[arg(long, value_delimiter = ',')]
        rates: Vec<f64>,

        /// Write SOP markers
        #[arg(long)]
        sop: bool,

        /// Write EPH markers
        #[arg(long)]
        eph: bool,

        /// Write TLM markers
        #[arg(long)]
        tlm: bool,

        /// Write PLT markers
        #[arg(long)]
        plt: bool,

        /// Comment written to a COM marker
        #[arg(short = 'C', long)]
        comment: Option<String>,

        /// Threads made available to the tile coder
        #[arg(long, default_value = "1")]
        threads: u32,
    },

    /// Decode a J2K codestream to raw samples or PNM
    #[command(visible_alias = "d")]
    Decode {
        /// Input codestream
        #[arg(short, long)]
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "raw", value_enum)]
        format: OutputFormat,

        /// Resolution levels to discard
        #[arg(short, long, default_value = "0")]
        reduce: u32,

        /// Quality layers to decode, 0 for all
        #[arg(short, long, default_value = "0")]
        layers: u16,

        /// Area to decode as x0,y0,x1,y1
        #[arg(short, long, value_parser = parse_area)]
        area: Option<Rect>,

        /// Decode a single tile
        #[arg(short, long)]
        tile: Option<u16>,

        /// Output precision of every component
        #[arg(short, long, value_delimiter = ',')]
        precision: Vec<u8>,

        /// Threads made available to the tile coder
        #[arg(long, default_value = "1")]
        threads: u32,
    },

    /// Show the main header, tile parameters and codestream index
    #[command(visible_alias = "i")]
    Info {
        /// Input codestream
        #[arg(short, long)]
        input: PathBuf,

        /// Scan every tile-part and list the codestream index
        #[arg(long)]
        index: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Planar samples
    Raw,
    /// PGM for one component, PPM for three
    Pnm,
}

#[derive(Clone, Copy, ValueEnum)]
enum Progression {
    Lrcp,
    Rlcp,
    Rpcl,
    Pcrl,
    Cprl,
}

impl From<Progression> for ProgressionOrder {
    fn from(progression: Progression) -> Self {
        match progression {
            Progression::Lrcp => Self::Lrcp,
            Progression::Rlcp => Self::Rlcp,
            Progression::Rpcl => Self::Rpcl,
            Progression::Pcrl => Self::Pcrl,
            Progression::Cprl => Self::Cprl,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Mct {
    Off,
    /// RCT or ICT on the first three components
    Rgb,
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value}"))?;
    let parse = |part: &str| part.trim().parse::<u32>().map_err(|e| e.to_string());
    Ok((parse(width)?, parse(height)?))
}

fn parse_area(value: &str) -> Result<Rect, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<u32>().map_err(|e| e.to_string()))
        .collect::<Result<Vec<u32>, String>>()?;
    match parts[..] {
        [x0, y0, x1, y1] => Ok(Rect::new(x0, y0, x1, y1)),
        _ => Err(format!("expected x0,y0,x1,y1, got {value}")),
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Encode {
            input,
            output,
            width,
            height,
            components,
            precision,
            signed,
            tile,
            resolutions,
            code_block,
            progression,
            tile_parts,
            irreversible,
            mct,
            rates,
            sop,
            eph,
            tlm,
            plt,
            comment,
            threads,
        } => {
            let mut params = CompressParams::new()
                .resolutions(resolutions)
                .code_block_size(code_block.0, code_block.1)
                .progression(progression.into())
                .irreversible(irreversible)
                .mct(match mct {
                    Mct::Off => MctMode::Off,
                    Mct::Rgb => MctMode::Rgb,
                })
                .sop(sop)
                .eph(eph)
                .tlm(tlm)
                .plt(plt)
                .threads(threads);
            if let Some((tile_width, tile_height)) = tile {
                params = params.tile_size(tile_width, tile_height);
            }
            if let Some(flag) = tile_parts {
                params = params.tile_parts(flag);
            }
            if !rates.is_empty() {
                params = params.layer_rates(rates);
            }
            if let Some(comment) = comment {
                params = params.comment(&comment);
            }
            let shape = RawShape {
                width,
                height,
                components,
                precision,
                signed,
            };
            encode_image(&input, &output, &shape, params)
        }
        Commands::Decode {
            input,
            output,
            format,
            reduce,
            layers,
            area,
            tile,
            precision,
            threads,
        } => {
            let params = DecompressParams {
                reduce,
                max_layers: layers,
                area,
                tile_index: tile,
                precision,
                num_threads: threads,
                build_index: false,
            };
            decode_image(&input, &output, &format, params)
        }
        Commands::Info { input, index } => show_info(&input, index),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

struct RawShape {
    width: u32,
    height: u32,
    components: u16,
    precision: u8,
    signed: bool,
}

fn encode_image(
    input: &Path,
    output: &Path,
    shape: &RawShape,
    params: CompressParams,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = fs::read(input)?;
    let components = vec![ImageComponent::new(shape.precision, shape.signed, 1, 1); shape.components as usize];
    let mut image = J2kImage::new(0, 0, shape.width, shape.height, components)?;

    let bytes_per_sample = if shape.precision <= 8 { 1 } else { 2 };
    let plane_length = shape.width as usize * shape.height as usize * bytes_per_sample;
    if raw.len() < plane_length * shape.components as usize {
        return Err(format!(
            "{} bytes of raw data, {} expected",
            raw.len(),
            plane_length * shape.components as usize
        )
        .into());
    }
    for (component, plane) in image.components.iter_mut().zip(raw.chunks_exact(plane_length)) {
        component.data = Some(
            plane
                .chunks_exact(bytes_per_sample)
                .map(|bytes| match (bytes, shape.signed) {
                    ([byte], false) => *byte as i32,
                    ([byte], true) => *byte as i8 as i32,
                    ([high, low], false) => u16::from_be_bytes([*high, *low]) as i32,
                    ([high, low], true) => i16::from_be_bytes([*high, *low]) as i32,
                    _ => 0,
                })
                .collect(),
        );
    }

    let mut stream = MemoryStream::new();
    let mut encoder = J2kEncoder::new(params);
    encoder.start_compress(&mut stream, &image)?;
    encoder.encode(&mut stream, &mut image)?;
    encoder.end_compress(&mut stream)?;
    let tiles = encoder.coding_params().num_tiles();
    let bytes = stream.into_inner();
    fs::write(output, &bytes)?;

    println!(
        "Encoded {}x{} image ({} components, {tiles} tiles) to {:?}: {} bytes",
        shape.width,
        shape.height,
        shape.components,
        output,
        bytes.len()
    );
    Ok(())
}

fn decode_image(
    input: &Path,
    output: &Path,
    format: &OutputFormat,
    params: DecompressParams,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    let mut stream = MemoryStream::from_bytes(data);
    let mut decoder = J2kDecoder::new(params);
    let mut image = decoder.read_header(&mut stream)?;
    decoder.decode(&mut stream, &mut image)?;

    let bytes = match format {
        OutputFormat::Raw => raw_bytes(&image),
        OutputFormat::Pnm => pnm_bytes(&image)?,
    };
    fs::write(output, bytes)?;

    let first = &image.components[0];
    println!(
        "Decoded {}x{} image ({} components) to {:?}",
        first.width,
        first.height,
        image.components.len(),
        output
    );
    Ok(())
}

fn push_sample(out: &mut Vec<u8>, sample: i32, precision: u8) {
    if precision <= 8 {
        out.push(sample as u8);
    } else {
        out.extend_from_slice(&(sample as u16).to_be_bytes());
    }
}

fn raw_bytes(image: &J2kImage) -> Vec<u8> {
    let mut out = Vec::new();
    for component in &image.components {
        for &sample in component.data.iter().flatten() {
            push_sample(&mut out, sample, component.precision);
        }
    }
    out
}

fn pnm_bytes(image: &J2kImage) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let components = match image.components.len() {
        1 => &image.components[..1],
        n if n >= 3 => &image.components[..3],
        n => return Err(format!("PNM output needs 1 or 3 components, the image has {n}").into()),
    };
    let first = &components[0];
    if components
        .iter()
        .any(|c| c.width != first.width || c.height != first.height || c.precision != first.precision)
    {
        return Err("PNM output needs components of identical size and precision".into());
    }
    let magic = if components.len() == 1 { "P5" } else { "P6" };
    let max_value = (1u32 << first.precision) - 1;
    let mut out = format!("{magic}\n{} {}\n{max_value}\n", first.width, first.height).into_bytes();
    let planes: Vec<&[i32]> = components
        .iter()
        .map(|c| c.data.as_deref().unwrap_or(&[]))
        .collect();
    for index in 0..first.sample_count() {
        for (plane, component) in planes.iter().zip(components) {
            let sample = plane.get(index).copied().unwrap_or(0);
            let unsigned = if component.signed {
                sample + (1 << (component.precision - 1))
            } else {
                sample
            };
            push_sample(&mut out, unsigned.clamp(0, max_value as i32), component.precision);
        }
    }
    Ok(out)
}

fn describe_tile(tcp: &TileCodingParams) {
    println!(
        "  Progression {}, {} layers, MCT {:?}, SOP {}, EPH {}",
        tcp.progression.as_str(),
        tcp.num_layers,
        tcp.mct,
        tcp.uses_sop(),
        tcp.uses_eph()
    );
    for (index, tccp) in tcp.tccps.iter().enumerate() {
        println!(
            "  Component {index}: {} resolutions, code-blocks {}x{}, {}, {:?} with {} guard bits, {} step sizes",
            tccp.num_resolutions,
            1u32 << tccp.cblkw,
            1u32 << tccp.cblkh,
            if tccp.qmfbid == 1 { "5/3 reversible" } else { "9/7 irreversible" },
            tccp.quantization_style,
            tccp.num_guard_bits,
            tccp.num_step_sizes
        );
        if tccp.roi_shift != 0 {
            println!("    ROI shift {}", tccp.roi_shift);
        }
    }
    for poc in &tcp.pocs {
        println!(
            "  POC {}: resolutions {}..{}, components {}..{}, layers ..{}",
            poc.progression.as_str(),
            poc.res_start,
            poc.res_end,
            poc.comp_start,
            poc.comp_end,
            poc.layer_end
        );
    }
}

fn show_info(input: &Path, scan: bool) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    let size = data.len();
    let mut stream = MemoryStream::from_bytes(data);
    let mut decoder = J2kDecoder::new(DecompressParams {
        build_index: true,
        ..Default::default()
    });
    let mut image = decoder.read_header(&mut stream)?;
    if scan {
        decoder.decode(&mut stream, &mut image)?;
    }
    let header = decoder.header().ok_or("main header not read")?;
    let cp = &header.cp;

    println!("File: {input:?} ({size} bytes)");
    println!(
        "Image: ({}, {}) - ({}, {}), {} components",
        image.x0,
        image.y0,
        image.x1,
        image.y1,
        image.components.len()
    );
    for (index, component) in header.image.components.iter().enumerate() {
        println!(
            "  Component {index}: {} bits {}, subsampling {}x{}, {}x{} samples",
            component.precision,
            if component.signed { "signed" } else { "unsigned" },
            component.dx,
            component.dy,
            component.width,
            component.height
        );
    }
    println!("Rsiz: {:#06x}", cp.rsiz);
    println!(
        "Tiles: {}x{} grid of {}x{} at ({}, {})",
        cp.t_grid_width, cp.t_grid_height, cp.t_width, cp.t_height, cp.tx0, cp.ty0
    );
    for comment in &cp.comments {
        if comment.is_binary {
            println!("Comment: {} binary bytes", comment.data.len());
        } else {
            println!("Comment: {}", String::from_utf8_lossy(&comment.data));
        }
    }
    println!("Default coding parameters:");
    describe_tile(&header.default_tcp);

    if let Some(index) = decoder.index() {
        println!(
            "Main header: {} - {}, codestream {} bytes",
            index.main_header_start, index.main_header_end, index.codestream_size
        );
        for marker in &index.markers {
            println!("  {:#06x} at {} ({} bytes)", marker.marker, marker.position, marker.length);
        }
        for tile in index.tiles.iter().filter(|tile| !tile.tile_parts.is_empty()) {
            println!("Tile {}: {} tile-parts", tile.tile, tile.tile_parts.len());
            for part in &tile.tile_parts {
                println!("  {} - {} - {}", part.start, part.end_header, part.end);
            }
            for marker in &tile.markers {
                println!("  {:#06x} at {} ({} bytes)", marker.marker, marker.position, marker.length);
            }
        }
    }
    Ok(())
}

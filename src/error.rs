use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum J2kError {
    // Protocol errors
    #[error("Expected a SOC marker")]
    StartOfCodestreamNotFound,
    #[error("Marker {marker:#06x} is not compliant with its position")]
    MarkerNotCompliant { marker: u16 },
    #[error("Inconsistent marker size for marker {marker:#06x}")]
    InvalidMarkerSegmentSize { marker: u16 },
    #[error("Error reading {name} marker")]
    InvalidMarkerContent { name: &'static str },
    #[error("Marker size inconsistent with stream length")]
    MarkerSizeExceedsStream,
    #[error("Required {0} marker not found in main header")]
    RequiredMarkerNotFound(&'static str),
    #[error("Unable to resynchronize after unknown marker")]
    UnknownMarkerRecoveryFailed,
    #[error("Invalid tile number {tile}")]
    InvalidTileIndex { tile: u32 },
    #[error("Invalid tile-part index for tile {tile}: expected {expected}, found {found}")]
    TilePartIndexDiscontinuity { tile: u16, expected: u8, found: u8 },
    #[error("Invalid tile-part index {index} for tile {tile} with {count} tile-parts")]
    InvalidTilePartIndex { tile: u16, index: u8, count: u8 },
    #[error("Tile {tile} declares {declared} tile-parts but {known} were previously declared")]
    TilePartCountMismatch { tile: u16, declared: u8, known: u8 },
    #[error("Invalid Psot value {0}")]
    InvalidPsot(u32),
    #[error("PPT marker found but PPM markers are present")]
    PpmAndPptPresent,
    #[error("Duplicate PPM marker index {0}")]
    DuplicatePpmIndex(u8),
    #[error("Duplicate PPT marker index {0}")]
    DuplicatePptIndex(u8),
    #[error("Corrupted PPM marker data")]
    CorruptedPpm,
    #[error("Packet length marker has an incomplete packet length")]
    CorruptedPacketLength,
    #[error("Invalid TLM marker")]
    InvalidTlm,
    #[error("Corrupt TLM marker: zero tile-part length")]
    CorruptTlm,
    #[error("Missing SOT marker")]
    MissingSotMarker,
    #[error("Missing SOD marker")]
    MissingSodMarker,
    #[error("Expected EOC or SOT but found marker {marker:#06x} with tiles remaining")]
    UnexpectedMarkerAtEndOfTile { marker: u16 },
    #[error("No tiles were decoded")]
    NoTilesDecoded,
    #[error("Tile read is not the desired one ({found} vs {wanted})")]
    WrongTileDecoded { found: u16, wanted: u16 },

    // Parameter-range errors
    #[error("Invalid Rsiz value {0:#06x} in SIZ marker")]
    InvalidRsiz(u16),
    #[error("Negative or zero image dimensions")]
    InvalidImageDimensions,
    #[error("Invalid tile size")]
    InvalidTileSize,
    #[error("Tile origin must not lie to the right or bottom of the image origin")]
    InvalidTileOrigin,
    #[error("First tile must overlap the image")]
    TileDoesNotOverlapImage,
    #[error("Invalid grid of tiles {width} x {height}")]
    InvalidTileGrid { width: u32, height: u32 },
    #[error("Tile area exceeds implementation limit")]
    TileAreaTooLarge,
    #[error("Invalid number of components {0}")]
    InvalidComponentCount(u32),
    #[error("Invalid subsampling for component {component}")]
    InvalidSubsampling { component: u16 },
    #[error("Unsupported precision {precision} for component {component}")]
    UnsupportedPrecision { component: u16, precision: u8 },
    #[error("Invalid component index {component}")]
    InvalidComponentIndex { component: u32 },
    #[error("Unknown coding style {0:#04x}")]
    InvalidCodingStyle(u8),
    #[error("Unknown progression order {0}")]
    InvalidProgressionOrder(u8),
    #[error("Number of layers must be between 1 and 65535")]
    InvalidLayerCount,
    #[error("Invalid multiple component transformation {0}")]
    InvalidMct(u8),
    #[error("Invalid number of resolutions {0}")]
    InvalidResolutionCount(u32),
    #[error("Invalid code-block size")]
    InvalidCodeBlockSize,
    #[error("Invalid code-block style {0:#04x}")]
    InvalidCodeBlockStyle(u8),
    #[error("Invalid wavelet transform {0}")]
    InvalidTransform(u8),
    #[error("Invalid precinct size")]
    InvalidPrecinctSize,
    #[error("Invalid quantization style {0}")]
    InvalidQuantizationStyle(u8),
    #[error("Number of step sizes {found} is less than the required {required}")]
    TooFewStepSizes { found: u32, required: u32 },
    #[error("Irreversible component {component} has no quantization parameters")]
    IrreversibleWithoutQuantization { component: u16 },
    #[error("Invalid region of interest style {0}")]
    InvalidRoiStyle(u8),
    #[error("Too many POC records")]
    TooManyPocs,
    #[error("Invalid POC record")]
    InvalidPoc,
    #[error("Invalid MCT record")]
    InvalidMctRecord,
    #[error("MCT record {0} referenced but not defined")]
    MissingMctRecord(u8),
    #[error("Invalid MCC record")]
    InvalidMccRecord,
    #[error("MCC record {0} referenced but not defined")]
    MissingMccRecord(u8),
    #[error("Invalid decode area")]
    InvalidDecodeArea,
    #[error("Invalid tile-part flag")]
    InvalidTilePartFlag,
    #[error("Too many tile-parts for tile {tile}")]
    TooManyTileParts { tile: u16 },

    // Resource and stream errors
    #[error("Stream too short")]
    StreamTooShort,
    #[error("Problem with seek function")]
    SeekFailed,
    #[error("Stream is not writable")]
    StreamNotWritable,
    #[error("Not enough memory")]
    NotEnoughMemory,
    #[error("Tile coder failed on tile {tile}")]
    TileCoderFailed { tile: u16 },

    // Logic errors
    #[error("Invalid operation")]
    InvalidOperation,
    #[error("Invalid argument")]
    InvalidArgument,
    #[error("Image buffer does not match the image geometry")]
    InvalidImageBuffer,
}

pub const MARKER_START_BYTE: u8 = 0xFF;
/// Size of a marker code or of a marker segment length field.
pub const MARKER_LENGTH: u16 = 2;

// ISO/IEC 15444-1, Table A.9 and A.13: 32 decomposition levels at most.
pub const MAXIMUM_DECOMPOSITION_LEVELS: u32 = 32;
pub const MAXIMUM_RESOLUTIONS: u32 = MAXIMUM_DECOMPOSITION_LEVELS + 1;
pub const MAXIMUM_BANDS: u32 = 3 * MAXIMUM_RESOLUTIONS - 2;

pub const MAXIMUM_CODEBLOCK_EXPONENT: u32 = 10;
pub const MAXIMUM_CODEBLOCK_EXPONENT_SUM: u32 = 12;
pub const DEFAULT_PRECINCT_EXPONENT: u32 = 15;

pub const MAXIMUM_POCS: usize = 32;
pub const MAXIMUM_TILES: u32 = 65535;
pub const MAXIMUM_COMPONENTS: u32 = 16384;
pub const MAXIMUM_TILE_AREA: u64 = 1 << 31;
pub const MAXIMUM_SUPPORTED_PRECISION: u8 = 16;
pub const MAXIMUM_LAYERS: u32 = 65535;
pub const MAXIMUM_COMMENTS: usize = 256;
pub const MAXIMUM_COMMENT_LENGTH: usize = u16::MAX as usize - 4;
pub const MAXIMUM_TILE_PARTS: u32 = 255;

/// Fixed SOT segment payload: Isot(2), Psot(4), TPsot(1), TNsot(1).
pub const SOT_PAYLOAD_LENGTH: u16 = 8;
/// SOT marker segment including its marker code.
pub const SOT_SEGMENT_LENGTH: u32 = 12;
pub const SIZ_FIXED_PAYLOAD_LENGTH: u16 = 36;

// Rsiz profile word (ISO/IEC 15444-1 amendments, Table A.10).
pub const PROFILE_NONE: u16 = 0x0000;
pub const PROFILE_0: u16 = 0x0001;
pub const PROFILE_1: u16 = 0x0002;
pub const PROFILE_CINEMA_2K: u16 = 0x0003;
pub const PROFILE_CINEMA_4K: u16 = 0x0004;
pub const PROFILE_CINEMA_S2K: u16 = 0x0005;
pub const PROFILE_CINEMA_S4K: u16 = 0x0006;
pub const PROFILE_CINEMA_LTS: u16 = 0x0007;
pub const PROFILE_BC_SINGLE: u16 = 0x0100;
pub const PROFILE_BC_MULTI: u16 = 0x0200;
pub const PROFILE_BC_MULTI_R: u16 = 0x0300;
pub const PROFILE_IMF_2K: u16 = 0x0400;
pub const PROFILE_IMF_8K_R: u16 = 0x0900;
pub const PROFILE_MASK: u16 = 0x0FFF;
pub const PROFILE_PART2: u16 = 0x8000;
/// A CAP segment is present in the main header.
pub const PROFILE_CAPABILITIES: u16 = 0x4000;
pub const PROFILE_PART2_EXTENSIONS_MASK: u16 = 0x3FFF;
pub const EXTENSION_MCT: u16 = 0x0100;

pub fn is_broadcast_profile(rsiz: u16) -> bool {
    (PROFILE_BC_SINGLE..=(PROFILE_BC_MULTI_R | 0x000B)).contains(&rsiz) && (rsiz & 0xF) <= 0xB
}

pub fn is_imf_profile(rsiz: u16) -> bool {
    (PROFILE_IMF_2K..=(PROFILE_IMF_8K_R | 0x009B)).contains(&rsiz)
        && (rsiz & 0xF) <= 0xB
        && (rsiz & 0xF0) <= 0x90
}

pub fn is_cinema_profile(rsiz: u16) -> bool {
    (PROFILE_CINEMA_2K..=PROFILE_CINEMA_S4K).contains(&rsiz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_classification() {
        assert!(is_broadcast_profile(PROFILE_BC_MULTI | 0x0005));
        assert!(!is_broadcast_profile(PROFILE_BC_MULTI | 0x000C));
        assert!(is_imf_profile(PROFILE_IMF_2K | 0x0045));
        assert!(!is_imf_profile(PROFILE_IMF_2K | 0x00A5));
        assert!(is_cinema_profile(PROFILE_CINEMA_4K));
        assert!(!is_cinema_profile(PROFILE_CINEMA_LTS));
        assert_eq!(MAXIMUM_BANDS, 97);
    }
}

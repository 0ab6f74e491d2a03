use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Position of the decoder within the codestream, as a bit set so marker
/// handlers can declare every state they are legal in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DecoderState(u16);

impl DecoderState {
    pub const NONE: Self = Self(0x0000);
    /// SOC read, SIZ expected.
    pub const MAIN_HEADER_SOC: Self = Self(0x0001);
    /// SIZ expected next.
    pub const MAIN_HEADER_SIZ: Self = Self(0x0002);
    /// Inside the main header.
    pub const MAIN_HEADER: Self = Self(0x0004);
    /// A SOT marker is expected.
    pub const TILE_PART_HEADER_SOT: Self = Self(0x0008);
    /// Inside a tile-part header.
    pub const TILE_PART_HEADER: Self = Self(0x0010);
    /// Stream ended without an EOC marker.
    pub const NO_EOC: Self = Self(0x0040);
    /// Tile-part data is being consumed.
    pub const DATA: Self = Self(0x0080);
    pub const EOC: Self = Self(0x0100);
    pub const ERROR: Self = Self(0x8000);

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// True when the two sets share a state.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for DecoderState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for DecoderState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(DecoderState, &str); 9] = [
            (DecoderState::MAIN_HEADER_SOC, "MHSOC"),
            (DecoderState::MAIN_HEADER_SIZ, "MHSIZ"),
            (DecoderState::MAIN_HEADER, "MH"),
            (DecoderState::TILE_PART_HEADER_SOT, "TPHSOT"),
            (DecoderState::TILE_PART_HEADER, "TPH"),
            (DecoderState::NO_EOC, "NEOC"),
            (DecoderState::DATA, "DATA"),
            (DecoderState::EOC, "EOC"),
            (DecoderState::ERROR, "ERR"),
        ];
        if self.0 == 0 {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (state, name) in NAMES {
            if self.intersects(state) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_sets() {
        let legal = DecoderState::MAIN_HEADER | DecoderState::TILE_PART_HEADER;
        assert!(legal.intersects(DecoderState::TILE_PART_HEADER));
        assert!(!legal.intersects(DecoderState::MAIN_HEADER_SIZ));

        let mut state = DecoderState::TILE_PART_HEADER_SOT | DecoderState::DATA;
        state.remove(DecoderState::DATA);
        assert_eq!(state, DecoderState::TILE_PART_HEADER_SOT);
        assert_eq!(format!("{:?}", legal), "MH|TPH");
    }
}

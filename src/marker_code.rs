use num_enum::{IntoPrimitive, TryFromPrimitive};

/// JPEG 2000 codestream marker codes (ISO/IEC 15444-1 Table A.2, 15444-2 Table A.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum J2kMarkerCode {
    /// SOC: Start of codestream.
    StartOfCodestream = 0xFF4F,
    /// CAP: Extended capabilities (15444-1 AMD, Part 15).
    Capability = 0xFF50,
    /// SIZ: Image and tile size.
    ImageAndTileSize = 0xFF51,
    /// COD: Coding style default.
    CodingStyleDefault = 0xFF52,
    /// COC: Coding style component.
    CodingStyleComponent = 0xFF53,
    /// TLM: Tile-part lengths.
    TilePartLengths = 0xFF55,
    /// PLM: Packet lengths, main header.
    PacketLengthMain = 0xFF57,
    /// PLT: Packet lengths, tile-part header.
    PacketLengthTilePart = 0xFF58,
    /// QCD: Quantization default.
    QuantizationDefault = 0xFF5C,
    /// QCC: Quantization component.
    QuantizationComponent = 0xFF5D,
    /// RGN: Region of interest.
    RegionOfInterest = 0xFF5E,
    /// POC: Progression order change.
    ProgressionOrderChange = 0xFF5F,
    /// PPM: Packed packet headers, main header.
    PackedPacketHeadersMain = 0xFF60,
    /// PPT: Packed packet headers, tile-part header.
    PackedPacketHeadersTilePart = 0xFF61,
    /// CRG: Component registration.
    ComponentRegistration = 0xFF63,
    /// COM: Comment.
    Comment = 0xFF64,
    /// MCT: Multiple component transformation definition (Part 2).
    MultipleComponentTransform = 0xFF74,
    /// MCC: Multiple component collection (Part 2).
    MultipleComponentCollection = 0xFF75,
    /// MCO: Multiple component transformation ordering (Part 2).
    MultipleComponentOrdering = 0xFF77,
    /// CBD: Component bit depth definition (Part 2).
    ComponentBitDepth = 0xFF78,
    /// SOT: Start of tile-part.
    StartOfTile = 0xFF90,
    /// SOP: Start of packet.
    StartOfPacket = 0xFF91,
    /// EPH: End of packet header.
    EndOfPacketHeader = 0xFF92,
    /// SOD: Start of data.
    StartOfData = 0xFF93,
    /// EOC: End of codestream.
    EndOfCodestream = 0xFFD9,
}

impl J2kMarkerCode {
    /// Three-letter mnemonic used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::StartOfCodestream => "SOC",
            Self::Capability => "CAP",
            Self::ImageAndTileSize => "SIZ",
            Self::CodingStyleDefault => "COD",
            Self::CodingStyleComponent => "COC",
            Self::TilePartLengths => "TLM",
            Self::PacketLengthMain => "PLM",
            Self::PacketLengthTilePart => "PLT",
            Self::QuantizationDefault => "QCD",
            Self::QuantizationComponent => "QCC",
            Self::RegionOfInterest => "RGN",
            Self::ProgressionOrderChange => "POC",
            Self::PackedPacketHeadersMain => "PPM",
            Self::PackedPacketHeadersTilePart => "PPT",
            Self::ComponentRegistration => "CRG",
            Self::Comment => "COM",
            Self::MultipleComponentTransform => "MCT",
            Self::MultipleComponentCollection => "MCC",
            Self::MultipleComponentOrdering => "MCO",
            Self::ComponentBitDepth => "CBD",
            Self::StartOfTile => "SOT",
            Self::StartOfPacket => "SOP",
            Self::EndOfPacketHeader => "EPH",
            Self::StartOfData => "SOD",
            Self::EndOfCodestream => "EOC",
        }
    }

    /// Delimiting markers carry no length field.
    pub fn has_segment(self) -> bool {
        !matches!(
            self,
            Self::StartOfCodestream
                | Self::StartOfData
                | Self::EndOfCodestream
                | Self::EndOfPacketHeader
        )
    }

    pub fn code(self) -> u16 {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_conversion() {
        assert_eq!(
            J2kMarkerCode::try_from(0xFF90u16).unwrap(),
            J2kMarkerCode::StartOfTile
        );
        assert!(J2kMarkerCode::try_from(0xFF30u16).is_err());
        assert_eq!(J2kMarkerCode::ImageAndTileSize.code(), 0xFF51);
        assert!(!J2kMarkerCode::StartOfData.has_segment());
        assert!(J2kMarkerCode::StartOfTile.has_segment());
    }
}

//! Tile coder interface.
//!
//! The codestream layer hands each tile's coded bytes to a [`TileCoder`]
//! and receives samples back, or the reverse when encoding. Wavelet,
//! quantization and entropy coding live behind this trait.
//!
//! [`StoredTileCoder`] is a lossless reference coder: every component is
//! one packet holding its samples, DC shifted, on one or two big-endian
//! bytes. Component transforms are recorded in the headers but not applied.

use super::image::{ImageComponent, J2kImage, Rect};
use super::params::TileCodingParams;
use crate::error::J2kError;

/// A tile as seen by the tile coder.
#[derive(Debug, Clone, Copy)]
pub struct TileInfo<'a> {
    pub index: u16,
    /// Tile area on the reference grid.
    pub rect: Rect,
    pub tcp: &'a TileCodingParams,
    pub components: &'a [ImageComponent],
    /// Resolution levels discarded when decoding.
    pub reduce: u32,
    /// Quality layers to decode, 0 for all.
    pub max_layers: u16,
}

impl TileInfo<'_> {
    /// Full resolution area of component `component` on its own sample grid.
    pub fn component_rect(&self, component: usize) -> Rect {
        let comp = &self.components[component];
        self.rect.subsampled(comp.dx, comp.dy)
    }

    /// Area of component `component` at the decoded resolution.
    pub fn decoded_component_rect(&self, component: usize) -> Rect {
        self.component_rect(component).reduced(self.reduce)
    }

    pub fn resolutions_decoded(&self, component: usize) -> u32 {
        self.tcp
            .tccps
            .get(component)
            .map_or(1, |tccp| tccp.num_resolutions.saturating_sub(self.reduce).max(1))
    }
}

/// Samples of one tile component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileComponentSamples {
    /// Area covered on the component's sample grid, at `resolutions_decoded`.
    pub rect: Rect,
    pub resolutions_decoded: u32,
    /// Row-major, `rect.width() * rect.height()` samples.
    pub data: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileSamples {
    pub components: Vec<TileComponentSamples>,
}

/// Coded bytes of one tile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedTile {
    pub data: Vec<u8>,
    /// Length of every packet in `data`, in codestream order.
    pub packet_lengths: Vec<u32>,
}

pub trait TileCoder {
    /// Called once per codec session before any tile is coded.
    fn init(&mut self, _image: &J2kImage, _num_threads: u32) -> Result<(), J2kError> {
        Ok(())
    }

    fn init_decode_tile(&mut self, _tile: &TileInfo<'_>) -> Result<(), J2kError> {
        Ok(())
    }

    /// Decodes the concatenated tile-part data of a tile.
    fn decode_tile(&mut self, tile: &TileInfo<'_>, data: &[u8]) -> Result<TileSamples, J2kError>;

    fn init_encode_tile(&mut self, _tile: &TileInfo<'_>) -> Result<(), J2kError> {
        Ok(())
    }

    /// Encodes full resolution tile samples.
    fn encode_tile(
        &mut self,
        tile: &TileInfo<'_>,
        samples: &TileSamples,
    ) -> Result<EncodedTile, J2kError>;

    /// Bytes of samples `decode_tile` returns for `tile`.
    fn decoded_tile_size(&self, tile: &TileInfo<'_>) -> u64 {
        (0..tile.components.len())
            .map(|component| tile.decoded_component_rect(component).area() * 4)
            .sum()
    }

    /// Upper bound on the coded bytes `encode_tile` produces for `tile`.
    fn encoded_tile_size(&self, tile: &TileInfo<'_>) -> u64 {
        (0..tile.components.len())
            .map(|component| tile.component_rect(component).area() * 4)
            .sum()
    }
}

fn sample_width(component: &ImageComponent) -> usize {
    if component.precision <= 8 { 1 } else { 2 }
}

#[derive(Debug, Default)]
pub struct StoredTileCoder {
    num_threads: u32,
}

impl StoredTileCoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_threads(&self) -> u32 {
        self.num_threads
    }

    /// Byte ranges of the component packets within the tile data.
    fn packet_offsets(tile: &TileInfo<'_>) -> Vec<(usize, usize)> {
        let component_count = tile.components.len();
        let lengths: Vec<usize> = if tile.tcp.packet_lengths.len() == component_count {
            tile.tcp.packet_lengths.iter().map(|&l| l as usize).collect()
        } else {
            (0..component_count)
                .map(|c| tile.component_rect(c).area() as usize * sample_width(&tile.components[c]))
                .collect()
        };
        let mut offset = 0;
        lengths
            .into_iter()
            .map(|length| {
                let range = (offset, length);
                offset += length;
                range
            })
            .collect()
    }
}

impl TileCoder for StoredTileCoder {
    fn init(&mut self, image: &J2kImage, num_threads: u32) -> Result<(), J2kError> {
        self.num_threads = num_threads.max(1);
        log::debug!(
            "Stored tile coder: {} components, {} threads",
            image.components.len(),
            self.num_threads
        );
        Ok(())
    }

    fn decode_tile(&mut self, tile: &TileInfo<'_>, data: &[u8]) -> Result<TileSamples, J2kError> {
        let mut truncated = false;
        let mut components = Vec::with_capacity(tile.components.len());
        for (c, (offset, length)) in Self::packet_offsets(tile).into_iter().enumerate() {
            let component = &tile.components[c];
            let width = sample_width(component);
            let full = tile.component_rect(c);
            let rect = tile.decoded_component_rect(c);
            let shift = tile.tcp.tccps[c].dc_level_shift;
            let packet = data.get(offset..).unwrap_or(&[]);
            let packet = &packet[..length.min(packet.len())];

            let reduce = tile.reduce;
            let mut samples = Vec::with_capacity(rect.area() as usize);
            for y in rect.y0..rect.y1 {
                let row = (((y as u64) << reduce) - full.y0 as u64) as usize;
                for x in rect.x0..rect.x1 {
                    let column = (((x as u64) << reduce) - full.x0 as u64) as usize;
                    let at = (row * full.width() as usize + column) * width;
                    let value = match packet.get(at..at + width) {
                        Some([byte]) => *byte as i8 as i32,
                        Some([high, low]) => i16::from_be_bytes([*high, *low]) as i32,
                        _ => {
                            truncated = true;
                            0
                        }
                    };
                    samples.push(value + shift);
                }
            }
            components.push(TileComponentSamples {
                rect,
                resolutions_decoded: tile.resolutions_decoded(c),
                data: samples,
            });
        }
        if truncated {
            log::warn!("Tile {} data is truncated. Missing samples are zero filled", tile.index);
        }
        Ok(TileSamples { components })
    }

    fn encode_tile(
        &mut self,
        tile: &TileInfo<'_>,
        samples: &TileSamples,
    ) -> Result<EncodedTile, J2kError> {
        if samples.components.len() != tile.components.len() {
            return Err(J2kError::InvalidImageBuffer);
        }
        let mut encoded = EncodedTile::default();
        for (c, plane) in samples.components.iter().enumerate() {
            let component = &tile.components[c];
            if plane.data.len() as u64 != tile.component_rect(c).area() {
                log::error!(
                    "Tile {} component {c}: {} samples for a {}x{} area",
                    tile.index,
                    plane.data.len(),
                    plane.rect.width(),
                    plane.rect.height()
                );
                return Err(J2kError::InvalidImageBuffer);
            }
            let shift = tile.tcp.tccps[c].dc_level_shift;
            let start = encoded.data.len();
            for &sample in &plane.data {
                let value = sample.clamp(component.min_value() as i32, component.max_value() as i32)
                    - shift;
                if sample_width(component) == 1 {
                    encoded.data.push(value as i8 as u8);
                } else {
                    encoded.data.extend_from_slice(&(value as i16).to_be_bytes());
                }
            }
            encoded.packet_lengths.push((encoded.data.len() - start) as u32);
        }
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(components: usize, resolutions: u32) -> TileCodingParams {
        let mut tcp = TileCodingParams::new(components);
        for tccp in &mut tcp.tccps {
            tccp.num_resolutions = resolutions;
            tccp.dc_level_shift = 128;
        }
        tcp
    }

    fn plane(rect: Rect, data: Vec<i32>) -> TileComponentSamples {
        TileComponentSamples {
            rect,
            resolutions_decoded: 3,
            data,
        }
    }

    #[test]
    fn test_stored_round_trip() {
        let components = vec![ImageComponent::new(8, false, 1, 1); 2];
        let tcp = tcp(2, 3);
        let tile = TileInfo {
            index: 0,
            rect: Rect::new(0, 0, 4, 2),
            tcp: &tcp,
            components: &components,
            reduce: 0,
            max_layers: 0,
        };
        let samples = TileSamples {
            components: vec![
                plane(tile.rect, (0..8).collect()),
                plane(tile.rect, vec![255; 8]),
            ],
        };
        let mut coder = StoredTileCoder::new();
        let encoded = coder.encode_tile(&tile, &samples).unwrap();
        assert_eq!(encoded.packet_lengths, vec![8, 8]);
        assert_eq!(encoded.data[0], 0x80); // 0 - 128
        assert_eq!(encoded.data[8], 0x7F); // 255 - 128

        let decoded = coder.decode_tile(&tile, &encoded.data).unwrap();
        assert_eq!(decoded, samples);
        assert_eq!(coder.decoded_tile_size(&tile), 64);
        assert_eq!(coder.encoded_tile_size(&tile), 64);
    }

    #[test]
    fn test_reduce_decimates() {
        let components = vec![ImageComponent::new(12, false, 1, 1)];
        let mut tcp = tcp(1, 3);
        tcp.tccps[0].dc_level_shift = 2048;
        let mut tile = TileInfo {
            index: 0,
            rect: Rect::new(0, 0, 4, 4),
            tcp: &tcp,
            components: &components,
            reduce: 0,
            max_layers: 0,
        };
        let samples = TileSamples {
            components: vec![plane(tile.rect, (0..16).map(|v| v * 100).collect())],
        };
        let mut coder = StoredTileCoder::new();
        let encoded = coder.encode_tile(&tile, &samples).unwrap();
        assert_eq!(encoded.data.len(), 32);

        tile.reduce = 1;
        let decoded = coder.decode_tile(&tile, &encoded.data).unwrap();
        let plane = &decoded.components[0];
        assert_eq!(plane.rect, Rect::new(0, 0, 2, 2));
        assert_eq!(plane.resolutions_decoded, 2);
        assert_eq!(plane.data, vec![0, 200, 800, 1000]);
    }

    #[test]
    fn test_reduce_to_one_sample() {
        let components = vec![ImageComponent::new(8, false, 1, 1)];
        let tcp = tcp(1, 33);
        let tile = TileInfo {
            index: 0,
            rect: Rect::new(0, 0, 4, 4),
            tcp: &tcp,
            components: &components,
            reduce: 32,
            max_layers: 0,
        };
        let data: Vec<u8> = (0..16).map(|v| 0x80 + v).collect();
        let decoded = StoredTileCoder::new().decode_tile(&tile, &data).unwrap();
        let plane = &decoded.components[0];
        assert_eq!(plane.rect, Rect::new(0, 0, 1, 1));
        assert_eq!(plane.resolutions_decoded, 1);
        assert_eq!(plane.data, vec![0]);
    }

    #[test]
    fn test_truncated_data_is_zero_filled() {
        let components = vec![ImageComponent::new(8, false, 1, 1)];
        let tcp = tcp(1, 1);
        let tile = TileInfo {
            index: 3,
            rect: Rect::new(0, 0, 2, 2),
            tcp: &tcp,
            components: &components,
            reduce: 0,
            max_layers: 0,
        };
        let decoded = StoredTileCoder::new().decode_tile(&tile, &[0x00, 0x01]).unwrap();
        assert_eq!(decoded.components[0].data, vec![128, 129, 128, 128]);
    }

    #[test]
    fn test_packet_lengths_locate_components() {
        let components = vec![ImageComponent::new(8, true, 1, 1); 2];
        let mut tcp = TileCodingParams::new(2);
        // The first packet carries a trailing byte the sample count does not cover.
        tcp.packet_lengths = vec![2, 1];
        let tile = TileInfo {
            index: 0,
            rect: Rect::new(0, 0, 1, 1),
            tcp: &tcp,
            components: &components,
            reduce: 0,
            max_layers: 0,
        };
        let decoded = StoredTileCoder::new().decode_tile(&tile, &[0x05, 0xEE, 0xFB]).unwrap();
        assert_eq!(decoded.components[0].data, vec![5]);
        assert_eq!(decoded.components[1].data, vec![-5]);
    }
}

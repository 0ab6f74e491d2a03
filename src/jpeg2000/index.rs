//! Codestream index: byte offsets of markers and tile-parts, recorded while
//! reading or writing so callers can inspect the codestream layout.

/// One marker segment occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerInfo {
    pub marker: u16,
    /// Offset of the marker code.
    pub position: u64,
    /// Segment length including the marker code.
    pub length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TilePartInfo {
    /// Offset of the SOT marker.
    pub start: u64,
    /// Offset of the first byte after SOD.
    pub end_header: u64,
    /// Offset of the first byte after the tile-part.
    pub end: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TileIndex {
    pub tile: u16,
    /// Tile-part count, 0 while unknown.
    pub num_tile_parts: u8,
    pub tile_parts: Vec<TilePartInfo>,
    pub markers: Vec<MarkerInfo>,
    /// Tile-part the next header and end offsets belong to.
    current_part: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CodestreamIndex {
    pub main_header_start: u64,
    /// Offset of the first SOT marker.
    pub main_header_end: u64,
    pub codestream_size: u64,
    pub markers: Vec<MarkerInfo>,
    pub tiles: Vec<TileIndex>,
}

impl CodestreamIndex {
    pub fn new(num_tiles: u32) -> Self {
        Self {
            tiles: (0..num_tiles)
                .map(|tile| TileIndex {
                    tile: tile as u16,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn add_main_marker(&mut self, marker: u16, position: u64, length: u32) {
        self.markers.push(MarkerInfo {
            marker,
            position,
            length,
        });
    }

    pub fn add_tile_marker(&mut self, tile: u16, marker: u16, position: u64, length: u32) {
        let Some(entry) = self.tiles.get_mut(tile as usize) else {
            return;
        };
        let info = MarkerInfo {
            marker,
            position,
            length,
        };
        // A tile read again in a later pass reports the same markers.
        if !entry.markers.contains(&info) {
            entry.markers.push(info);
        }
    }

    /// Records a tile-part starting at `start`, the offset of its SOT.
    pub fn begin_tile_part(&mut self, tile: u16, tile_part: u8, num_tile_parts: u8, start: u64) {
        let Some(entry) = self.tiles.get_mut(tile as usize) else {
            return;
        };
        if num_tile_parts != 0 {
            entry.num_tile_parts = num_tile_parts;
        }
        let part = tile_part as usize;
        if entry.tile_parts.len() <= part {
            entry.tile_parts.resize(part + 1, TilePartInfo::default());
        }
        entry.tile_parts[part].start = start;
        entry.current_part = part;
    }

    pub fn end_tile_part_header(&mut self, tile: u16, position: u64) {
        if let Some(part) = self.current_part(tile) {
            part.end_header = position;
        }
    }

    pub fn end_tile_part(&mut self, tile: u16, position: u64) {
        if let Some(part) = self.current_part(tile) {
            part.end = position;
        }
    }

    /// Offset of the SOT of the first tile-part of `tile`, if it was seen.
    pub fn first_tile_part_position(&self, tile: u16) -> Option<u64> {
        self.tiles
            .get(tile as usize)
            .and_then(|entry| entry.tile_parts.first())
            .map(|part| part.start)
            .filter(|&start| start != 0)
    }

    fn current_part(&mut self, tile: u16) -> Option<&mut TilePartInfo> {
        self.tiles
            .get_mut(tile as usize)
            .and_then(|entry| entry.tile_parts.get_mut(entry.current_part))
    }
}

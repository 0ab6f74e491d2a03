use crate::stream::DataChunk;
use std::borrow::Cow;

/// Coded bytes of one tile, accumulated tile-part by tile-part.
///
/// Chunks alias the input buffer when the stream supports zero-copy reads,
/// so holding a `TileData` never copies more than the owned fallback did.
#[derive(Debug, Clone, Default)]
pub struct TileData {
    chunks: Vec<DataChunk>,
}

impl TileData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: DataChunk) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    pub fn chunks(&self) -> &[DataChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(DataChunk::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All coded bytes in order. Borrows when there is a single chunk.
    pub fn contiguous(&self) -> Cow<'_, [u8]> {
        match self.chunks.as_slice() {
            [] => Cow::Borrowed(&[]),
            [single] => Cow::Borrowed(single.as_slice()),
            chunks => {
                let mut data = Vec::with_capacity(self.len());
                for chunk in chunks {
                    data.extend_from_slice(chunk.as_slice());
                }
                Cow::Owned(data)
            }
        }
    }
}

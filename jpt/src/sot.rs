use log::{info, warn};

use crate::error::{CodestreamError, Result};
use crate::marker::MARKER_SYMBOL_SOT;
use crate::stream::{StreamRead, StreamWrite};

// Lsot is fixed.
pub const SOT_MARKER_SEGMENT_LENGTH: u16 = 10;

// SOT marker plus its segment: the smallest possible tile-part.
pub const SOT_MARKER_SEGMENT_SIZE: u32 = 2 + SOT_MARKER_SEGMENT_LENGTH as u32;

// A.4.2
//
// Start of tile-part (SOT)
//
// Function: Marks the beginning of a tile-part, the index of its tile, and
// the index of its tile-part. The tile-parts of a given tile shall appear in
// order (see TPsot) in the codestream. However, tile-parts from other tiles
// may be interleaved in the codestream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StartOfTileSegment {
    // Byte offset of the SOT marker itself.
    offset: u64,

    // Lsot: Length of marker segment in bytes (not including the marker).
    length: u16,

    // Isot: Tile index.
    //
    // This number refers to the tiles in raster order starting at the number 0
    tile_index: u16,

    // Psot: Length, in bytes, from the beginning of the first byte of this SOT
    // marker segment of the tile-part to the end of the data of that tile-part.
    //
    // Only the last tile-part in the codestream may contain a 0 for Psot.
    //
    // If the Psot is 0, this tile-part is assumed to contain all data until the
    // EOC marker.
    tile_length: u32,

    // TPsot: Tile-part index.
    //
    // There is a specific order required for decoding tile-parts; this index
    // denotes the order from 0.
    tile_part_index: u8,

    // TNsot: Number of tile-parts of a tile in the codestream.
    //
    // Two values are allowed: the correct number of tile-parts for that tile
    // and zero. A zero value indicates that the number of tile-parts of this
    // tile is not specified in this tile-part.
    no_tile_parts: u8,
}

impl StartOfTileSegment {
    pub fn new(
        tile_index: u16,
        tile_length: u32,
        tile_part_index: u8,
        no_tile_parts: u8,
    ) -> StartOfTileSegment {
        StartOfTileSegment {
            offset: 0,
            length: SOT_MARKER_SEGMENT_LENGTH,
            tile_index,
            tile_length,
            tile_part_index,
            no_tile_parts,
        }
    }

    pub fn at_offset(mut self, offset: u64) -> StartOfTileSegment {
        self.offset = offset;
        self
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn tile_index(&self) -> u16 {
        self.tile_index
    }

    pub fn tile_length(&self) -> u32 {
        self.tile_length
    }

    pub fn tile_part_index(&self) -> u8 {
        self.tile_part_index
    }

    pub fn no_tile_parts(&self) -> u8 {
        self.no_tile_parts
    }

    pub fn is_last_in_codestream(&self) -> bool {
        self.tile_length == 0
    }

    /// A tile-part made of nothing but its SOT segment.
    pub fn is_empty(&self) -> bool {
        self.tile_length == SOT_MARKER_SEGMENT_SIZE
    }

    /// Byte offset one past the tile-part, unknown for an open-ended part.
    pub fn end_offset(&self) -> Option<u64> {
        match self.tile_length {
            0 => None,
            length => Some(self.offset + length as u64),
        }
    }
}

/// Decode the SOT segment body; the marker itself has already been consumed
/// and sat at `offset`.
pub fn decode_sot<R: StreamRead + ?Sized>(
    reader: &mut R,
    offset: u64,
) -> Result<StartOfTileSegment> {
    info!("SOT start at byte offset {}", offset);

    // Lsot
    let length = reader.read_u16()?;
    if length != SOT_MARKER_SEGMENT_LENGTH {
        return Err(CodestreamError::InvalidMarkerLength {
            marker: MARKER_SYMBOL_SOT,
            offset,
            length,
        });
    }

    let segment = StartOfTileSegment {
        offset,
        length,
        // Isot
        tile_index: reader.read_u16()?,
        // Psot
        tile_length: reader.read_u32()?,
        // TPsot
        tile_part_index: reader.read_u8()?,
        // TNsot
        no_tile_parts: reader.read_u8()?,
    };

    info!("SOT end at byte offset {}", reader.tell()?);
    Ok(segment)
}

/// Sequencing state of one tile's tile-parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TilePartState {
    AwaitingFirstPart,
    InProgress {
        last_tile_part_index: u8,
        no_tile_parts: Option<u8>,
    },
    LastPartSeen {
        no_tile_parts: u16,
    },
}

impl Default for TilePartState {
    fn default() -> Self {
        TilePartState::AwaitingFirstPart
    }
}

impl TilePartState {
    /// State after accepting `segment`, or the reason it must be rejected.
    /// `self` is never modified so a rejected tile-part leaves no trace.
    pub fn advance(&self, segment: &StartOfTileSegment) -> Result<TilePartState> {
        let tile_index = segment.tile_index();
        let tile_part_index = segment.tile_part_index();
        let declared_now = segment.no_tile_parts();

        if declared_now != 0 && tile_part_index >= declared_now {
            return Err(CodestreamError::TilePartIndexOutOfRange {
                tile_index,
                tile_part_index,
                no_tile_parts: declared_now,
            });
        }

        let (expected, declared_before) = match *self {
            TilePartState::AwaitingFirstPart => (0, None),
            TilePartState::InProgress {
                last_tile_part_index,
                no_tile_parts,
            } => match last_tile_part_index.checked_add(1) {
                Some(expected) => (expected, no_tile_parts),
                None => {
                    return Err(CodestreamError::TilePartIndexOutOfRange {
                        tile_index,
                        tile_part_index,
                        no_tile_parts: u8::MAX,
                    })
                }
            },
            TilePartState::LastPartSeen { .. } => {
                return Err(CodestreamError::TilePartAfterLast {
                    tile_index,
                    tile_part_index,
                })
            }
        };
        if tile_part_index != expected {
            return Err(CodestreamError::TilePartOutOfSequence {
                tile_index,
                expected,
                found: tile_part_index,
            });
        }

        // A Psot between 1 and 13 cannot hold SOT plus SOD; 12 is the one
        // tolerated value, an SOT with no data at all.
        let tile_length = segment.tile_length();
        if tile_length != 0
            && tile_length < SOT_MARKER_SEGMENT_SIZE + 2
            && !segment.is_empty()
        {
            return Err(CodestreamError::InvalidTilePartLength {
                tile_index,
                tile_part_index,
                length: tile_length,
            });
        }

        let declared = match (declared_before, declared_now) {
            (Some(before), now) if now != 0 && now != before => {
                return Err(CodestreamError::TilePartCountMismatch {
                    tile_index,
                    declared: before,
                    found: now,
                })
            }
            (Some(before), _) => Some(before),
            (None, 0) => None,
            (None, now) => Some(now),
        };
        if let Some(no_tile_parts) = declared {
            if tile_part_index >= no_tile_parts {
                return Err(CodestreamError::TilePartIndexOutOfRange {
                    tile_index,
                    tile_part_index,
                    no_tile_parts,
                });
            }
        }

        let parts_read = tile_part_index as u16 + 1;
        if segment.is_last_in_codestream() || declared.map(u16::from) == Some(parts_read) {
            Ok(TilePartState::LastPartSeen {
                no_tile_parts: parts_read,
            })
        } else {
            Ok(TilePartState::InProgress {
                last_tile_part_index: tile_part_index,
                no_tile_parts: declared,
            })
        }
    }

    pub fn last_tile_part_was_read(&self) -> bool {
        matches!(self, TilePartState::LastPartSeen { .. })
    }

    /// Declared (or, once complete, observed) number of tile-parts.
    pub fn no_tile_parts(&self) -> Option<u16> {
        match *self {
            TilePartState::AwaitingFirstPart => None,
            TilePartState::InProgress { no_tile_parts, .. } => no_tile_parts.map(u16::from),
            TilePartState::LastPartSeen { no_tile_parts } => Some(no_tile_parts),
        }
    }
}

/// Writer side of SOT. When the tile-part length is not known up front the
/// Psot location is remembered and patched by `write_psot`.
#[derive(Debug, Default)]
pub struct SotMarker {
    psot_location: Option<u64>,
}

impl SotMarker {
    pub fn new() -> SotMarker {
        SotMarker::default()
    }

    pub fn write<W: StreamWrite + ?Sized>(
        &mut self,
        writer: &mut W,
        segment: &StartOfTileSegment,
    ) -> Result<()> {
        writer.write_marker(MARKER_SYMBOL_SOT)?;
        writer.write_u16(SOT_MARKER_SEGMENT_LENGTH)?;
        writer.write_u16(segment.tile_index())?;
        self.psot_location = Some(writer.tell()?);
        writer.write_u32(segment.tile_length())?;
        writer.write_u8(segment.tile_part_index())?;
        writer.write_u8(segment.no_tile_parts())?;
        Ok(())
    }

    pub fn write_psot<W: StreamWrite + ?Sized>(
        &mut self,
        writer: &mut W,
        tile_part_length: u32,
    ) -> Result<()> {
        let location = match self.psot_location.take() {
            Some(location) => location,
            None => {
                return Err(CodestreamError::MarkerError {
                    marker: MARKER_SYMBOL_SOT,
                    error: "Psot patched before any SOT was written".to_owned(),
                })
            }
        };
        if tile_part_length != 0 && tile_part_length < SOT_MARKER_SEGMENT_SIZE {
            warn!("tile-part length {} shorter than its SOT", tile_part_length);
        }
        let current = writer.tell()?;
        writer.seek_to(location)?;
        writer.write_u32(tile_part_length)?;
        writer.seek_to(current)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;
    use std::io::Cursor;

    fn sot(tile_length: u32, tile_part_index: u8, no_tile_parts: u8) -> StartOfTileSegment {
        StartOfTileSegment::new(0, tile_length, tile_part_index, no_tile_parts)
    }

    #[test]
    fn test_sequence_with_declared_count() {
        let state = TilePartState::default();
        let state = state.advance(&sot(100, 0, 2)).unwrap();
        assert_eq!(
            state,
            TilePartState::InProgress {
                last_tile_part_index: 0,
                no_tile_parts: Some(2)
            }
        );
        let state = state.advance(&sot(100, 1, 0)).unwrap();
        assert!(state.last_tile_part_was_read());
        assert_eq!(state.no_tile_parts(), Some(2));
        assert!(matches!(
            state.advance(&sot(100, 2, 0)),
            Err(CodestreamError::TilePartAfterLast { .. })
        ));
    }

    #[test]
    fn test_rejects_gap_repeat_and_mismatch() {
        let state = TilePartState::default().advance(&sot(50, 0, 0)).unwrap();
        assert!(matches!(
            state.advance(&sot(50, 2, 0)),
            Err(CodestreamError::TilePartOutOfSequence {
                expected: 1,
                found: 2,
                ..
            })
        ));
        assert!(matches!(
            state.advance(&sot(50, 0, 0)),
            Err(CodestreamError::TilePartOutOfSequence { .. })
        ));

        let declared = TilePartState::default().advance(&sot(50, 0, 3)).unwrap();
        assert!(matches!(
            declared.advance(&sot(50, 1, 4)),
            Err(CodestreamError::TilePartCountMismatch {
                declared: 3,
                found: 4,
                ..
            })
        ));
        assert!(matches!(
            TilePartState::default().advance(&sot(50, 2, 2)),
            Err(CodestreamError::TilePartIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_psot_limits() {
        let state = TilePartState::default();
        assert!(matches!(
            state.advance(&sot(13, 0, 1)),
            Err(CodestreamError::InvalidTilePartLength { length: 13, .. })
        ));
        assert!(state.advance(&sot(1, 0, 1)).is_err());
        assert!(state.advance(&sot(12, 0, 1)).is_ok());
        assert!(state.advance(&sot(14, 0, 1)).is_ok());
        let last = state.advance(&sot(0, 0, 0)).unwrap();
        assert_eq!(last, TilePartState::LastPartSeen { no_tile_parts: 1 });
    }

    #[test]
    fn test_write_and_patch_psot() {
        let mut cursor = Cursor::new(Vec::new());
        let mut marker = SotMarker::new();
        marker.write(&mut cursor, &sot(0, 1, 3)).unwrap();
        cursor.write_zeros(20).unwrap();
        marker.write_psot(&mut cursor, 32).unwrap();
        assert_eq!(cursor.tell().unwrap(), 32);
        assert!(marker.write_psot(&mut cursor, 32).is_err());

        cursor.seek_to(2).unwrap();
        let segment = decode_sot(&mut cursor, 0).unwrap();
        assert_eq!(segment.tile_length(), 32);
        assert_eq!(segment.tile_part_index(), 1);
        assert_eq!(segment.no_tile_parts(), 3);
        assert_eq!(segment.end_offset(), Some(32));
    }
}

use std::error;
use std::fmt;
use std::io;

use crate::marker::{marker_name, MarkerSymbol};

pub type Result<T> = std::result::Result<T, CodestreamError>;

#[derive(Debug)]
pub enum CodestreamError {
    MarkerError {
        marker: MarkerSymbol,
        error: String,
    },
    MarkerMissing {
        marker: MarkerSymbol,
    },
    MarkerUnexpected {
        marker: MarkerSymbol,
        offset: u64,
    },
    InvalidMarkerLength {
        marker: MarkerSymbol,
        offset: u64,
        length: u16,
    },
    TileSizeOverflow {
        image_horizontal_offset: u32,
        image_vertical_offset: u32,
        tile_horizontal_offset: u32,
        tile_vertical_offset: u32,
        reference_tile_width: u32,
        reference_tile_height: u32,
    },
    TileGridOffsetOverflow {
        tile_horizontal_offset: u32,
        tile_vertical_offset: u32,
        image_horizontal_offset: u32,
        image_vertical_offset: u32,
    },
    UnknownProgressionOrder {
        value: u8,
    },
    InvalidTileIndex {
        tile_index: u16,
        no_tiles: u32,
    },
    TilePartOutOfSequence {
        tile_index: u16,
        expected: u8,
        found: u8,
    },
    TilePartIndexOutOfRange {
        tile_index: u16,
        tile_part_index: u8,
        no_tile_parts: u8,
    },
    TilePartCountMismatch {
        tile_index: u16,
        declared: u8,
        found: u8,
    },
    InvalidTilePartLength {
        tile_index: u16,
        tile_part_index: u8,
        length: u32,
    },
    TilePartAfterLast {
        tile_index: u16,
        tile_part_index: u8,
    },
    TileNotFound {
        tile_index: u16,
    },
    InvalidGeometry {
        error: String,
    },
    Allocation {
        requested: usize,
    },
    Io(io::Error),
}

impl error::Error for CodestreamError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for CodestreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MarkerError { marker, error } => {
                write!(
                    f,
                    "marker {} 0x{:0>2X?}{:0>2X?} error {:?}",
                    marker_name(*marker),
                    marker[0],
                    marker[1],
                    error
                )
            }
            Self::MarkerMissing { marker } => {
                write!(
                    f,
                    "missing marker {} 0x{:0>2X?}{:0>2X?}",
                    marker_name(*marker),
                    marker[0],
                    marker[1]
                )
            }
            Self::MarkerUnexpected { marker, offset } => {
                write!(
                    f,
                    "unexpected marker 0x{:0>2X?}{:0>2X?} at byte offset {}",
                    marker[0], marker[1], offset
                )
            }
            Self::InvalidMarkerLength {
                marker,
                offset,
                length,
            } => {
                write!(
                    f,
                    "marker {} at byte offset {} has invalid length {}",
                    marker_name(*marker),
                    offset,
                    length
                )
            }
            Self::TileGridOffsetOverflow {
                image_horizontal_offset,
                image_vertical_offset,
                tile_horizontal_offset,
                tile_vertical_offset,
            } => {
                write!(
                    f,
                    "tile grid offset overflow: XOSiz = {:?}, YOsiz = {:?}, XTOsiz = {:?}, YTOsiz = {:?}",
                    image_horizontal_offset,
                    image_vertical_offset,
                    tile_horizontal_offset,
                    tile_vertical_offset,
                )
            }
            // XTsiz + XTOsiz > XOsiz
            // YTsiz + YTOsiz > YOsiz
            Self::TileSizeOverflow {
                image_horizontal_offset,
                image_vertical_offset,
                tile_horizontal_offset,
                tile_vertical_offset,
                reference_tile_width,
                reference_tile_height,
            } => {
                write!(
                    f,
                    "tile size overflow: XOSiz = {:?}, YOsiz = {:?}, XTOsiz = {:?}, YTOsiz = {:?}, XTsize = {:?}, YTsize = {:?}",
                    image_horizontal_offset,
                    image_vertical_offset,
                    tile_horizontal_offset,
                    tile_vertical_offset,
                    reference_tile_width,
                    reference_tile_height,
                )
            }
            Self::UnknownProgressionOrder { value } => {
                write!(f, "unknown progression order {}", value)
            }
            Self::InvalidTileIndex {
                tile_index,
                no_tiles,
            } => {
                write!(
                    f,
                    "tile index {} is outside the tile grid of {} tiles",
                    tile_index, no_tiles
                )
            }
            Self::TilePartOutOfSequence {
                tile_index,
                expected,
                found,
            } => {
                write!(
                    f,
                    "tile {}: tile-part index {} out of sequence, expected {}",
                    tile_index, found, expected
                )
            }
            Self::TilePartIndexOutOfRange {
                tile_index,
                tile_part_index,
                no_tile_parts,
            } => {
                write!(
                    f,
                    "tile {}: tile-part index {} not below declared number of tile-parts {}",
                    tile_index, tile_part_index, no_tile_parts
                )
            }
            Self::TilePartCountMismatch {
                tile_index,
                declared,
                found,
            } => {
                write!(
                    f,
                    "tile {}: number of tile-parts {} differs from previously declared {}",
                    tile_index, found, declared
                )
            }
            Self::InvalidTilePartLength {
                tile_index,
                tile_part_index,
                length,
            } => {
                write!(
                    f,
                    "tile {}: tile-part {} has invalid length Psot = {}",
                    tile_index, tile_part_index, length
                )
            }
            Self::TilePartAfterLast {
                tile_index,
                tile_part_index,
            } => {
                write!(
                    f,
                    "tile {}: tile-part {} found after the last tile-part was read",
                    tile_index, tile_part_index
                )
            }
            Self::TileNotFound { tile_index } => {
                write!(f, "tile {} not present in codestream index", tile_index)
            }
            Self::InvalidGeometry { error } => write!(f, "invalid geometry: {}", error),
            Self::Allocation { requested } => {
                write!(f, "unable to allocate {} samples", requested)
            }
            Self::Io(error) => write!(f, "io error: {}", error),
        }
    }
}

impl From<io::Error> for CodestreamError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

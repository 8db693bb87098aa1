//! Tiled JPEG 2000 codestream engine.
//!
//! Covers the parts of a JPEG 2000 codec that sit between the marker parser
//! and the entropy coder: tile, resolution, subband and precinct geometry;
//! packet iteration in the five progression orders; tile-part sequencing and
//! the tile-part length index; and the per tile-component window buffer used
//! for reduced-resolution and region decoding.

pub mod codestream;
pub mod error;
pub mod geometry;
pub mod header;
pub mod length_cache;
pub mod marker;
pub mod packet_iter;
pub mod parallel;
pub mod progression;
pub mod sot;
pub mod stream;
pub mod subband;
pub mod tile;
pub mod window;

pub use codestream::{index_codestream, CodestreamIndex, CodestreamWriter, ScanOptions};
pub use error::{CodestreamError, Result};
pub use geometry::Rect;
pub use packet_iter::{PacketCoordinate, PacketIter, PacketIterParams};
pub use progression::ProgressionOrder;
pub use tile::TileGeometry;
pub use window::TileComponentWindowBuffer;

// Byte-range index of a codestream: where the main header, every marker and
// every tile-part lives, plus the tile-part (TLM) and packet (PLT/PLM)
// length lists that let a reader skip data without parsing it.
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use crate::error::{CodestreamError, Result};
use crate::marker::{
    marker_id, marker_name, MarkerSymbol, MARKER_SYMBOL_PLM, MARKER_SYMBOL_PLT, MARKER_SYMBOL_TLM,
};
use crate::sot::{StartOfTileSegment, TilePartState};
use crate::stream::{StreamRead, StreamWrite};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkerInfo {
    marker: MarkerSymbol,

    // Byte offset of the marker.
    position: u64,

    // Segment length (Lxxx), zero for delimiting markers.
    length: u32,
}

impl MarkerInfo {
    pub fn new(marker: MarkerSymbol, position: u64, length: u32) -> MarkerInfo {
        MarkerInfo {
            marker,
            position,
            length,
        }
    }

    pub fn marker(&self) -> MarkerSymbol {
        self.marker
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    fn dump<W: io::Write + ?Sized>(&self, out: &mut W, indent: &str) -> io::Result<()> {
        writeln!(
            out,
            "{}{} (0x{:04X}) pos={} len={}",
            indent,
            marker_name(self.marker),
            marker_id(self.marker),
            self.position,
            self.length
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TilePartInfo {
    // Offset of the SOT marker.
    start_position: u64,

    // Offset just past the SOD marker.
    end_header_position: u64,

    // Offset one past the last byte of tile-part data.
    end_position: u64,
}

impl TilePartInfo {
    pub fn new(start_position: u64, end_header_position: u64, end_position: u64) -> TilePartInfo {
        TilePartInfo {
            start_position,
            end_header_position,
            end_position,
        }
    }

    pub fn start_position(&self) -> u64 {
        self.start_position
    }

    pub fn end_header_position(&self) -> u64 {
        self.end_header_position
    }

    pub fn end_position(&self) -> u64 {
        self.end_position
    }

    pub fn length(&self) -> u64 {
        self.end_position.saturating_sub(self.start_position)
    }

    pub fn data_length(&self) -> u64 {
        self.end_position.saturating_sub(self.end_header_position)
    }
}

#[derive(Debug, Default)]
pub struct TileInfo {
    tile_index: u16,
    state: TilePartState,
    tile_parts: Vec<TilePartInfo>,
    markers: Vec<MarkerInfo>,
    packet_lengths: PacketLengthMarkers,
}

impl TileInfo {
    fn new(tile_index: u16) -> TileInfo {
        TileInfo {
            tile_index,
            ..Default::default()
        }
    }

    pub fn tile_index(&self) -> u16 {
        self.tile_index
    }

    pub fn state(&self) -> TilePartState {
        self.state
    }

    pub fn no_tile_parts(&self) -> Option<u16> {
        self.state.no_tile_parts()
    }

    pub fn no_tile_parts_read(&self) -> usize {
        self.tile_parts.len()
    }

    pub fn last_tile_part_was_read(&self) -> bool {
        self.state.last_tile_part_was_read()
    }

    pub fn tile_part_info(&self, tile_part_index: u8) -> Option<&TilePartInfo> {
        self.tile_parts.get(tile_part_index as usize)
    }

    pub fn tile_parts(&self) -> &[TilePartInfo] {
        &self.tile_parts
    }

    pub fn markers(&self) -> &[MarkerInfo] {
        &self.markers
    }

    pub fn packet_lengths(&self) -> &PacketLengthMarkers {
        &self.packet_lengths
    }

    pub fn packet_lengths_mut(&mut self) -> &mut PacketLengthMarkers {
        &mut self.packet_lengths
    }

    pub fn push_marker(&mut self, marker: MarkerSymbol, position: u64, length: u32) {
        self.markers.push(MarkerInfo::new(marker, position, length));
    }

    fn dump<W: io::Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(
            out,
            "  tile {}: {} tile-part(s) read, declared {}, complete {}",
            self.tile_index,
            self.tile_parts.len(),
            self.no_tile_parts()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_owned()),
            self.last_tile_part_was_read()
        )?;
        for (index, tile_part) in self.tile_parts.iter().enumerate() {
            writeln!(
                out,
                "    tile-part {}: start={} end_header={} end={} data={}",
                index,
                tile_part.start_position,
                tile_part.end_header_position,
                tile_part.end_position,
                tile_part.data_length()
            )?;
        }
        for marker in &self.markers {
            marker.dump(out, "    ")?;
        }
        if !self.packet_lengths.is_empty() {
            writeln!(out, "    {} packet length(s)", self.packet_lengths.len())?;
        }
        Ok(())
    }
}

/// What the indexer learns from an accepted SOT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TilePartAcceptance {
    pub tile_index: u16,
    pub tile_part_index: u8,
    pub last_of_tile: bool,
    pub last_in_codestream: bool,
}

#[derive(Debug, Default)]
pub struct CodeStreamInfo {
    main_header_start: u64,
    main_header_end: u64,
    markers: Vec<MarkerInfo>,
    no_tiles: u32,
    tiles: Vec<TileInfo>,
    last_tile_part_in_codestream: bool,
    tile_lengths: Option<TileLengthMarkers>,
    packet_lengths: PacketLengthMarkers,
}

impl CodeStreamInfo {
    pub fn new(no_tiles: u32) -> CodeStreamInfo {
        CodeStreamInfo {
            no_tiles,
            ..Default::default()
        }
    }

    pub fn no_tiles(&self) -> u32 {
        self.no_tiles
    }

    pub fn set_no_tiles(&mut self, no_tiles: u32) {
        self.no_tiles = no_tiles;
    }

    pub fn main_header_start(&self) -> u64 {
        self.main_header_start
    }

    pub fn set_main_header_start(&mut self, position: u64) {
        self.main_header_start = position;
    }

    pub fn main_header_end(&self) -> u64 {
        self.main_header_end
    }

    pub fn set_main_header_end(&mut self, position: u64) {
        self.main_header_end = position;
    }

    pub fn push_marker(&mut self, marker: MarkerSymbol, position: u64, length: u32) {
        self.markers.push(MarkerInfo::new(marker, position, length));
    }

    pub fn markers(&self) -> &[MarkerInfo] {
        &self.markers
    }

    pub fn last_tile_part_in_codestream(&self) -> bool {
        self.last_tile_part_in_codestream
    }

    pub fn tile_lengths(&self) -> Option<&TileLengthMarkers> {
        self.tile_lengths.as_ref()
    }

    pub fn tile_lengths_mut(&mut self) -> &mut TileLengthMarkers {
        self.tile_lengths.get_or_insert_with(TileLengthMarkers::default)
    }

    pub fn packet_lengths(&self) -> &PacketLengthMarkers {
        &self.packet_lengths
    }

    pub fn packet_lengths_mut(&mut self) -> &mut PacketLengthMarkers {
        &mut self.packet_lengths
    }

    /// Tile state after `segment`, if the tile-part is acceptable. Nothing
    /// is recorded.
    pub fn check_tile_part(&self, segment: &StartOfTileSegment) -> Result<TilePartState> {
        let tile_index = segment.tile_index();
        if tile_index as u32 >= self.no_tiles {
            return Err(CodestreamError::InvalidTileIndex {
                tile_index,
                no_tiles: self.no_tiles,
            });
        }
        let current = self
            .tiles
            .get(tile_index as usize)
            .map(|tile| tile.state)
            .unwrap_or_default();
        current.advance(segment)
    }

    /// Validate a tile-part against its tile's sequencing state and, only if
    /// it is acceptable, record it. The SOT offset becomes the tile-part
    /// start; header end and end are filled in as the reader learns them.
    /// An empty tile-part has no header past SOT and no data.
    pub fn update_tile_info(&mut self, segment: &StartOfTileSegment) -> Result<TilePartAcceptance> {
        let tile_index = segment.tile_index();
        let next = self.check_tile_part(segment)?;

        if segment.is_empty() {
            warn!(
                "tile {}: empty SOT marker for tile-part {}",
                tile_index,
                segment.tile_part_index()
            );
        }

        if self.tiles.len() <= tile_index as usize {
            let start = self.tiles.len();
            self.tiles
                .extend((start..=tile_index as usize).map(|index| TileInfo::new(index as u16)));
        }
        let tile = &mut self.tiles[tile_index as usize];
        tile.state = next;
        let end = segment.end_offset().unwrap_or(segment.offset());
        tile.tile_parts.push(TilePartInfo::new(
            segment.offset(),
            if segment.is_empty() { end } else { segment.offset() },
            end,
        ));

        if segment.is_last_in_codestream() {
            info!(
                "tile {}: tile-part {} is the last tile-part of the codestream",
                tile_index,
                segment.tile_part_index()
            );
            self.last_tile_part_in_codestream = true;
        }

        Ok(TilePartAcceptance {
            tile_index,
            tile_part_index: segment.tile_part_index(),
            last_of_tile: next.last_tile_part_was_read(),
            last_in_codestream: segment.is_last_in_codestream(),
        })
    }

    /// Seen tile with at least one accepted tile-part.
    pub fn tile_info(&self, tile_index: u16) -> Option<&TileInfo> {
        self.tiles
            .get(tile_index as usize)
            .filter(|tile| !tile.tile_parts.is_empty())
    }

    pub fn tile_info_mut(&mut self, tile_index: u16) -> Option<&mut TileInfo> {
        self.tiles
            .get_mut(tile_index as usize)
            .filter(|tile| !tile.tile_parts.is_empty())
    }

    pub fn tile_part_info(&self, tile_index: u16, tile_part_index: u8) -> Option<&TilePartInfo> {
        self.tile_info(tile_index)
            .and_then(|tile| tile.tile_part_info(tile_part_index))
    }

    pub fn set_tile_part_end_header(
        &mut self,
        tile_index: u16,
        tile_part_index: u8,
        position: u64,
    ) -> bool {
        match self.tile_part_info_mut(tile_index, tile_part_index) {
            Some(tile_part) => {
                tile_part.end_header_position = position;
                true
            }
            None => false,
        }
    }

    pub fn set_tile_part_end(&mut self, tile_index: u16, tile_part_index: u8, position: u64) -> bool {
        match self.tile_part_info_mut(tile_index, tile_part_index) {
            Some(tile_part) => {
                tile_part.end_position = position;
                true
            }
            None => false,
        }
    }

    fn tile_part_info_mut(&mut self, tile_index: u16, tile_part_index: u8) -> Option<&mut TilePartInfo> {
        self.tiles
            .get_mut(tile_index as usize)
            .and_then(|tile| tile.tile_parts.get_mut(tile_part_index as usize))
    }

    /// Tiles with at least one tile-part, in tile index order.
    pub fn tiles(&self) -> impl Iterator<Item = &TileInfo> {
        self.tiles.iter().filter(|tile| !tile.tile_parts.is_empty())
    }

    /// Position `reader` at the first tile-part of `tile_index`. Returns
    /// `false` when the tile has not been indexed.
    pub fn skip_to_tile<R: StreamRead + ?Sized>(&self, reader: &mut R, tile_index: u16) -> Result<bool> {
        match self.tile_part_info(tile_index, 0) {
            Some(tile_part) => {
                debug!(
                    "seeking to tile {} at byte offset {}",
                    tile_index, tile_part.start_position
                );
                reader.seek_to(tile_part.start_position)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn dump<W: io::Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Codestream index")?;
        writeln!(
            out,
            "  main header: start={} end={}",
            self.main_header_start, self.main_header_end
        )?;
        writeln!(out, "  markers:")?;
        for marker in &self.markers {
            marker.dump(out, "    ")?;
        }
        if let Some(tile_lengths) = &self.tile_lengths {
            writeln!(out, "  TLM entries: {}", tile_lengths.len())?;
        }
        if !self.packet_lengths.is_empty() {
            writeln!(out, "  PLM packet lengths: {}", self.packet_lengths.len())?;
        }
        writeln!(
            out,
            "  tiles: {} of {} indexed",
            self.tiles().count(),
            self.no_tiles
        )?;
        for tile in self.tiles() {
            tile.dump(out)?;
        }
        Ok(())
    }
}

// A.7.1
//
// Tile-part lengths (TLM)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TilePartLength {
    // Ttlm^i: Tile index of the ith tile-part. Absent when Stlm says so, in
    // which case tiles are in order with one tile-part each.
    tile_index: Option<u16>,

    // Ptlm^i: Length in bytes, from the beginning of the SOT marker of the ith
    // tile-part to the end of the bit stream data for that tile-part.
    length: u32,
}

impl TilePartLength {
    pub fn new(tile_index: Option<u16>, length: u32) -> TilePartLength {
        TilePartLength { tile_index, length }
    }

    pub fn tile_index(&self) -> Option<u16> {
        self.tile_index
    }

    pub fn length(&self) -> u32 {
        self.length
    }
}

// Ttlm 16 bit, Ptlm 32 bit.
const TLM_WRITE_PARAMETER_SIZES: u8 = 0b0110_0000;
const TLM_WRITE_ENTRY_SIZE: usize = 6;

#[derive(Clone, Debug, Default)]
pub struct TileLengthMarkers {
    // Ztlm -> entries of that segment.
    markers: BTreeMap<u8, Vec<TilePartLength>>,
    cursor: SegmentCursor,
    reserved_position: Option<u64>,
    reserved_entries: usize,
    pending: Vec<TilePartLength>,
}

impl TileLengthMarkers {
    /// Decode one TLM segment body; `length` is Ltlm, already read.
    pub fn decode<R: StreamRead + ?Sized>(&mut self, reader: &mut R, length: u16) -> Result<()> {
        let offset = reader.tell()?.saturating_sub(4);
        info!("TLM start at byte offset {}", offset);
        if length < 4 {
            return Err(CodestreamError::InvalidMarkerLength {
                marker: MARKER_SYMBOL_TLM,
                offset,
                length,
            });
        }

        // Ztlm
        let index = reader.read_u8()?;
        // Stlm
        let parameter_sizes = reader.read_u8()?;

        // ST: 0 = no Ttlm, 1 = 8 bit, 2 = 16 bit
        let tile_index_size = match parameter_sizes << 2 >> 6 {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => {
                return Err(CodestreamError::MarkerError {
                    marker: MARKER_SYMBOL_TLM,
                    error: format!("reserved Stlm value 0x{:02X}", parameter_sizes),
                })
            }
        };
        // SP: 0 = 16 bit, 1 = 32 bit
        let length_size = if parameter_sizes << 1 >> 7 == 0 { 2 } else { 4 };

        let entry_size = tile_index_size + length_size;
        let body = length as usize - 4;
        if body % entry_size != 0 {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_TLM,
                error: format!(
                    "segment body of {} bytes is not a multiple of entry size {}",
                    body, entry_size
                ),
            });
        }

        let entries = self.markers.entry(index).or_default();
        for _ in 0..body / entry_size {
            let tile_index = match tile_index_size {
                1 => Some(reader.read_u8()? as u16),
                2 => Some(reader.read_u16()?),
                _ => None,
            };
            let length = match length_size {
                2 => reader.read_u16()? as u32,
                _ => reader.read_u32()?,
            };
            entries.push(TilePartLength::new(tile_index, length));
        }
        info!("TLM end at byte offset {}", reader.tell()?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.markers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rewind(&mut self) {
        self.cursor = SegmentCursor::default();
    }

    /// Next entry in Ztlm order with its implied tile index resolved.
    pub fn next_entry(&mut self) -> Option<TilePartLength> {
        let (position, entry) = self.cursor.next(&self.markers)?;
        Some(TilePartLength::new(
            Some(entry.tile_index.unwrap_or(position as u16)),
            entry.length,
        ))
    }

    /// Seek to the first tile-part of `tile_index` by summing the lengths
    /// of every tile-part before it, starting at the first SOT.
    pub fn skip_to<R: StreamRead + ?Sized>(
        &mut self,
        reader: &mut R,
        tile_index: u16,
        first_sot_position: u64,
    ) -> Result<bool> {
        self.rewind();
        let mut skip: u64 = 0;
        while let Some(entry) = self.next_entry() {
            if entry.tile_index == Some(tile_index) {
                reader.seek_to(first_sot_position + skip)?;
                return Ok(true);
            }
            skip += entry.length as u64;
        }
        Ok(false)
    }

    /// Reserve a TLM segment for `no_tile_parts` entries, to be filled by
    /// `write_end` once the tile-part lengths are known.
    pub fn write_begin<W: StreamWrite + ?Sized>(
        &mut self,
        writer: &mut W,
        no_tile_parts: usize,
    ) -> Result<()> {
        let segment_length = 4 + no_tile_parts * TLM_WRITE_ENTRY_SIZE;
        if segment_length > u16::MAX as usize {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_TLM,
                error: format!("{} tile-parts do not fit in one TLM", no_tile_parts),
            });
        }
        self.reserved_position = Some(writer.tell()?);
        self.reserved_entries = no_tile_parts;
        writer.write_marker(MARKER_SYMBOL_TLM)?;
        writer.write_u16(segment_length as u16)?;
        writer.write_u8(0)?;
        writer.write_u8(TLM_WRITE_PARAMETER_SIZES)?;
        writer.write_zeros(no_tile_parts * TLM_WRITE_ENTRY_SIZE)?;
        Ok(())
    }

    pub fn push(&mut self, tile_index: u16, length: u32) {
        self.pending.push(TilePartLength::new(Some(tile_index), length));
    }

    pub fn write_end<W: StreamWrite + ?Sized>(&mut self, writer: &mut W) -> Result<()> {
        let position = match self.reserved_position {
            Some(position) => position,
            None => return Ok(()),
        };
        if self.pending.len() != self.reserved_entries {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_TLM,
                error: format!(
                    "reserved {} tile-part lengths but wrote {}",
                    self.reserved_entries,
                    self.pending.len()
                ),
            });
        }
        self.reserved_position = None;
        let current = writer.tell()?;
        // marker, Ltlm, Ztlm, Stlm
        writer.seek_to(position + 6)?;
        for entry in &self.pending {
            writer.write_u16(entry.tile_index.unwrap_or(0))?;
            writer.write_u32(entry.length)?;
        }
        writer.seek_to(current)?;
        self.markers.insert(0, std::mem::take(&mut self.pending));
        Ok(())
    }
}

// A.7.2 / A.7.3
//
// Packet length, main header (PLM) and tile-part header (PLT)
//
// Packet lengths are split into 7-bit groups, most significant group first;
// every byte but the last of a length has its high bit set.
#[derive(Clone, Debug, Default)]
pub struct PacketLengthMarkers {
    // Zplt / Zplm -> lengths declared by that segment.
    markers: BTreeMap<u8, Vec<u32>>,
    cursor: SegmentCursor,
    // Iplm state carried into the next PLM segment.
    partial: Option<PartialLength>,
    group_remaining: usize,
    pending: Vec<u32>,
}

impl PacketLengthMarkers {
    /// Decode one PLT segment body; `length` is Lplt, already read.
    pub fn decode_plt<R: StreamRead + ?Sized>(&mut self, reader: &mut R, length: u16) -> Result<()> {
        let offset = reader.tell()?.saturating_sub(4);
        info!("PLT start at byte offset {}", offset);
        if length < 3 {
            return Err(CodestreamError::InvalidMarkerLength {
                marker: MARKER_SYMBOL_PLT,
                offset,
                length,
            });
        }
        // Zplt
        let index = reader.read_u8()?;
        let mut bytes = vec![0; length as usize - 3];
        reader.read_exact(&mut bytes)?;

        let mut partial = None;
        let lengths = self.markers.entry(index).or_default();
        decode_packet_lengths(MARKER_SYMBOL_PLT, &bytes, &mut partial, lengths)?;
        if partial.is_some() {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_PLT,
                error: "segment ends inside a packet length".to_owned(),
            });
        }
        info!("PLT end at byte offset {}", reader.tell()?);
        Ok(())
    }

    /// Decode one PLM segment body; `length` is Lplm, already read.
    pub fn decode_plm<R: StreamRead + ?Sized>(&mut self, reader: &mut R, length: u16) -> Result<()> {
        let offset = reader.tell()?.saturating_sub(4);
        info!("PLM start at byte offset {}", offset);
        if length < 3 {
            return Err(CodestreamError::InvalidMarkerLength {
                marker: MARKER_SYMBOL_PLM,
                offset,
                length,
            });
        }
        // Zplm
        let index = reader.read_u8()?;
        let mut remaining = length as usize - 3;
        let mut partial = self.partial.take();
        let mut group_remaining = self.group_remaining;
        let lengths = self.markers.entry(index).or_default();
        while remaining > 0 {
            // Nplm counts the Iplm bytes of one tile-part; the series may
            // carry on in the next PLM segment without a fresh Nplm.
            if group_remaining == 0 {
                group_remaining = reader.read_u8()? as usize;
                remaining -= 1;
                continue;
            }
            let no_bytes = group_remaining.min(remaining);
            let mut bytes = vec![0; no_bytes];
            reader.read_exact(&mut bytes)?;
            remaining -= no_bytes;
            group_remaining -= no_bytes;
            decode_packet_lengths(MARKER_SYMBOL_PLM, &bytes, &mut partial, lengths)?;
        }
        self.group_remaining = group_remaining;
        self.partial = partial;
        info!("PLM end at byte offset {}", reader.tell()?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.markers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lengths(&self, marker_index: u8) -> Option<&[u32]> {
        self.markers.get(&marker_index).map(Vec::as_slice)
    }

    pub fn rewind(&mut self) {
        self.cursor = SegmentCursor::default();
    }

    /// Next packet length across all segments in Z order.
    pub fn next_length(&mut self) -> Option<u32> {
        self.cursor.next(&self.markers).map(|(_, &length)| length)
    }

    /// Move the lengths of `other` after the lengths already held under
    /// the same segment index.
    pub fn append(&mut self, other: PacketLengthMarkers) {
        for (index, mut lengths) in other.markers {
            self.markers.entry(index).or_default().append(&mut lengths);
        }
    }

    pub fn push(&mut self, length: u32) {
        self.pending.push(length);
    }

    /// Emit the pushed lengths as one or more PLT segments; returns the
    /// number of bytes written.
    pub fn write_plt<W: StreamWrite + ?Sized>(&mut self, writer: &mut W) -> Result<u64> {
        let start = writer.tell()?;
        let mut encoded: Vec<Vec<u8>> = Vec::with_capacity(self.pending.len());
        for &length in &self.pending {
            let mut bytes = Vec::with_capacity(5);
            encode_packet_length(length, &mut bytes);
            encoded.push(bytes);
        }

        let mut index: u8 = 0;
        let mut chunk: Vec<u8> = Vec::new();
        let max_body = u16::MAX as usize - 3;
        for bytes in &encoded {
            if chunk.len() + bytes.len() > max_body {
                write_plt_segment(writer, index, &chunk)?;
                index = index.checked_add(1).ok_or_else(|| CodestreamError::MarkerError {
                    marker: MARKER_SYMBOL_PLT,
                    error: "more than 256 PLT segments".to_owned(),
                })?;
                chunk.clear();
            }
            chunk.extend_from_slice(bytes);
        }
        if !chunk.is_empty() {
            write_plt_segment(writer, index, &chunk)?;
        }
        self.pending.clear();
        Ok(writer.tell()? - start)
    }
}

fn write_plt_segment<W: StreamWrite + ?Sized>(writer: &mut W, index: u8, body: &[u8]) -> Result<()> {
    writer.write_marker(MARKER_SYMBOL_PLT)?;
    writer.write_u16(body.len() as u16 + 3)?;
    writer.write_u8(index)?;
    writer.write_all(body)?;
    Ok(())
}

// Position in the entries of segments keyed by their Z index.
#[derive(Clone, Copy, Debug, Default)]
struct SegmentCursor {
    segment: u8,
    entry: usize,
    position: usize,
}

impl SegmentCursor {
    // Entry under the cursor with its position across all segments.
    fn next<'a, T>(&mut self, markers: &'a BTreeMap<u8, Vec<T>>) -> Option<(usize, &'a T)> {
        loop {
            let (&segment, entries) = markers.range(self.segment..).next()?;
            if segment != self.segment {
                self.segment = segment;
                self.entry = 0;
            }
            if let Some(entry) = entries.get(self.entry) {
                let position = self.position;
                self.entry += 1;
                self.position += 1;
                return Some((position, entry));
            }
            self.segment = segment.checked_add(1)?;
            self.entry = 0;
        }
    }
}

// Packet lengths are at most 32 bits, so at most five 7-bit groups.
const MAX_PACKET_LENGTH_GROUPS: u8 = 5;

#[derive(Clone, Copy, Debug)]
struct PartialLength {
    value: u32,
    groups: u8,
}

fn decode_packet_lengths(
    marker: MarkerSymbol,
    bytes: &[u8],
    partial: &mut Option<PartialLength>,
    lengths: &mut Vec<u32>,
) -> Result<()> {
    for &byte in bytes {
        let (value, groups) = partial.map_or((0, 0), |partial| (partial.value, partial.groups));
        if groups == MAX_PACKET_LENGTH_GROUPS || value > u32::MAX >> 7 {
            return Err(CodestreamError::MarkerError {
                marker,
                error: format!(
                    "packet length runs past {} bytes",
                    MAX_PACKET_LENGTH_GROUPS
                ),
            });
        }
        let value = (value << 7) | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            // 0xxx xxxx - Last 7 bits of packet length, terminate number
            lengths.push(value);
            *partial = None;
        } else {
            // 1xxx xxxx - Continue reading
            *partial = Some(PartialLength {
                value,
                groups: groups + 1,
            });
        }
    }
    Ok(())
}

pub(crate) fn encode_packet_length(length: u32, out: &mut Vec<u8>) {
    let mut groups = [0u8; 5];
    let mut count = 0;
    let mut value = length;
    loop {
        groups[count] = (value & 0x7F) as u8;
        count += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i == 0 { 0 } else { 0x80 };
        out.push(groups[i] | continuation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;
    use std::io::Cursor;

    #[test]
    fn test_packet_length_coding() {
        let mut bytes = Vec::new();
        encode_packet_length(0, &mut bytes);
        encode_packet_length(127, &mut bytes);
        encode_packet_length(128, &mut bytes);
        encode_packet_length(300_000, &mut bytes);
        assert_eq!(&bytes[..4], &[0x00, 0x7F, 0x81, 0x00]);

        let mut lengths = Vec::new();
        let mut partial = None;
        decode_packet_lengths(MARKER_SYMBOL_PLT, &bytes, &mut partial, &mut lengths).unwrap();
        assert_eq!(lengths, vec![0, 127, 128, 300_000]);
        assert!(partial.is_none());

        let mut bytes = Vec::new();
        encode_packet_length(u32::MAX, &mut bytes);
        assert_eq!(bytes, vec![0x8F, 0xFF, 0xFF, 0xFF, 0x7F]);
        let mut lengths = Vec::new();
        decode_packet_lengths(MARKER_SYMBOL_PLT, &bytes, &mut partial, &mut lengths).unwrap();
        assert_eq!(lengths, vec![u32::MAX]);
    }

    #[test]
    fn test_packet_length_longer_than_five_bytes() {
        // Zplt 0, six continuation groups for the value 1
        let data = vec![0, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        let mut plt = PacketLengthMarkers::default();
        assert!(matches!(
            plt.decode_plt(&mut Cursor::new(data), 9),
            Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_PLT,
                ..
            })
        ));

        // five groups whose value needs more than 32 bits
        let data = vec![0, 5, 0x9F, 0xFF, 0xFF, 0xFF, 0x7F];
        let mut plm = PacketLengthMarkers::default();
        assert!(matches!(
            plm.decode_plm(&mut Cursor::new(data), 9),
            Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_PLM,
                ..
            })
        ));
    }

    #[test]
    fn test_lengths_walk_segments_in_order() {
        let mut plt = PacketLengthMarkers::default();
        plt.decode_plt(&mut Cursor::new(vec![2, 0x05, 0x06]), 5).unwrap();
        plt.decode_plt(&mut Cursor::new(vec![0, 0x01]), 4).unwrap();
        let mut other = PacketLengthMarkers::default();
        other.decode_plt(&mut Cursor::new(vec![0, 0x02]), 4).unwrap();
        plt.append(other);
        assert_eq!(plt.lengths(0), Some(&[1, 2][..]));

        let mut lengths = Vec::new();
        while let Some(length) = plt.next_length() {
            lengths.push(length);
        }
        assert_eq!(lengths, vec![1, 2, 5, 6]);
        plt.rewind();
        assert_eq!(plt.next_length(), Some(1));
    }

    #[test]
    fn test_plm_continuation_across_segments() {
        // Zplm 0, Nplm 2, [0x81, 0x00] ; Zplm 1, Nplm 2, [0x82] ; Zplm 2, [0x05]
        let data = vec![0, 2, 0x81, 0x00, 1, 2, 0x82, 2, 0x05];
        let mut cursor = Cursor::new(data);
        let mut plm = PacketLengthMarkers::default();
        plm.decode_plm(&mut cursor, 6).unwrap();
        plm.decode_plm(&mut cursor, 5).unwrap();
        plm.decode_plm(&mut cursor, 4).unwrap();
        assert_eq!(plm.lengths(0), Some(&[128][..]));
        assert_eq!(plm.lengths(2), Some(&[0x105][..]));
        assert_eq!(plm.len(), 2);
    }

    #[test]
    fn test_tlm_implied_tile_indices() {
        // Ztlm 0, Stlm: no Ttlm, 16-bit Ptlm
        let data = vec![0, 0b0000_0000, 0, 100, 0, 200, 0, 50];
        let mut cursor = Cursor::new(data);
        let mut tlm = TileLengthMarkers::default();
        tlm.decode(&mut cursor, 10).unwrap();
        assert_eq!(tlm.len(), 3);
        assert_eq!(tlm.next_entry(), Some(TilePartLength::new(Some(0), 100)));
        assert_eq!(tlm.next_entry(), Some(TilePartLength::new(Some(1), 200)));

        let mut stream = Cursor::new(vec![0u8; 400]);
        assert!(tlm.skip_to(&mut stream, 2, 10).unwrap());
        assert_eq!(stream.tell().unwrap(), 310);
        assert!(!tlm.skip_to(&mut stream, 3, 10).unwrap());
    }

    #[test]
    fn test_tlm_entries_across_segments() {
        // Ztlm 3 then Ztlm 1, each with 8-bit Ttlm and 16-bit Ptlm
        let mut tlm = TileLengthMarkers::default();
        let mut cursor = Cursor::new(vec![3, 0b0001_0000, 2, 0, 30, 1, 0b0001_0000, 0, 0, 10, 1, 0, 20]);
        tlm.decode(&mut cursor, 7).unwrap();
        tlm.decode(&mut cursor, 10).unwrap();
        assert_eq!(tlm.len(), 3);

        let mut entries = Vec::new();
        while let Some(entry) = tlm.next_entry() {
            entries.push((entry.tile_index(), entry.length()));
        }
        assert_eq!(entries, vec![(Some(0), 10), (Some(1), 20), (Some(2), 30)]);

        let mut stream = Cursor::new(vec![0u8; 100]);
        assert!(tlm.skip_to(&mut stream, 2, 5).unwrap());
        assert_eq!(stream.tell().unwrap(), 35);
        assert!(tlm.skip_to(&mut stream, 0, 5).unwrap());
        assert_eq!(stream.tell().unwrap(), 5);
    }

    #[test]
    fn test_tlm_write_end_keeps_reservation_on_mismatch() {
        let mut stream = Cursor::new(Vec::new());
        let mut tlm = TileLengthMarkers::default();
        tlm.write_begin(&mut stream, 2).unwrap();
        tlm.push(0, 100);
        assert!(matches!(
            tlm.write_end(&mut stream),
            Err(CodestreamError::MarkerError { .. })
        ));
        tlm.push(1, 200);
        tlm.write_end(&mut stream).unwrap();

        let bytes = stream.into_inner();
        assert_eq!(&bytes[6..], &[0, 0, 0, 0, 0, 100, 0, 1, 0, 0, 0, 200]);
        assert_eq!(tlm.len(), 2);
    }

    #[test]
    fn test_tlm_rejects_reserved_sizes() {
        let mut cursor = Cursor::new(vec![0, 0b0011_0000, 0, 0]);
        let mut tlm = TileLengthMarkers::default();
        assert!(matches!(
            tlm.decode(&mut cursor, 6),
            Err(CodestreamError::MarkerError { .. })
        ));
    }

    #[test]
    fn test_update_tile_info_grows_and_bounds_checks() {
        let mut info = CodeStreamInfo::new(4);
        assert!(info.tile_info(3).is_none());
        info.update_tile_info(&StartOfTileSegment::new(3, 40, 0, 1).at_offset(100))
            .unwrap();
        let tile = info.tile_info(3).unwrap();
        assert_eq!(tile.no_tile_parts(), Some(1));
        assert_eq!(tile.tile_part_info(0).unwrap().end_position(), 140);
        assert!(tile.tile_part_info(1).is_none());
        assert!(info.tile_info(0).is_none());
        assert!(info.tile_info(9).is_none());
        assert!(matches!(
            info.update_tile_info(&StartOfTileSegment::new(4, 40, 0, 1)),
            Err(CodestreamError::InvalidTileIndex { .. })
        ));

        let mut out = Vec::new();
        info.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("tile 3: 1 tile-part(s) read"));
    }
}

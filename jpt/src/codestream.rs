// Indexing and writing of raw codestreams.
//
// The indexer walks the main header and every tile-part header once,
// recording byte ranges in a `CodeStreamInfo` so later reads can go straight
// to a tile. The writer produces the same structure for an encoder.
use log::{error, info, warn};
use std::io::{self, Write};

use crate::error::{CodestreamError, Result};
use crate::header::{
    decode_cod, decode_poc, decode_siz, write_poc, CodingStyleMarkerSegment,
    ImageAndTileSizeMarkerSegment,
};
use crate::length_cache::{CodeStreamInfo, MarkerInfo, PacketLengthMarkers, TilePartAcceptance};
use crate::marker::*;
use crate::progression::ProgressionChange;
use crate::sot::{decode_sot, SotMarker, StartOfTileSegment, SOT_MARKER_SEGMENT_SIZE};
use crate::stream::{StreamRead, StreamWrite};
use crate::tile::TileGeometry;

/// Indexing behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Fail on the first tile-level error instead of recording it and
    /// continuing with the remaining tiles.
    pub strict: bool,
}

/// Main header segments the engine uses.
#[derive(Clone, Debug)]
pub struct MainHeader {
    siz: ImageAndTileSizeMarkerSegment,
    cod: Option<CodingStyleMarkerSegment>,
    progression_changes: Vec<ProgressionChange>,
    comments: Vec<String>,
}

impl MainHeader {
    pub fn siz(&self) -> &ImageAndTileSizeMarkerSegment {
        &self.siz
    }

    pub fn cod(&self) -> Option<&CodingStyleMarkerSegment> {
        self.cod.as_ref()
    }

    pub fn progression_changes(&self) -> &[ProgressionChange] {
        &self.progression_changes
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }
}

/// A tile-part the indexer rejected or could not read.
#[derive(Debug)]
pub struct TileError {
    pub tile_index: u16,
    pub tile_part_index: u8,
    pub error: CodestreamError,
}

/// Result of indexing a codestream.
#[derive(Debug)]
pub struct CodestreamIndex {
    header: MainHeader,
    info: CodeStreamInfo,
    tile_errors: Vec<TileError>,
}

impl CodestreamIndex {
    pub fn header(&self) -> &MainHeader {
        &self.header
    }

    pub fn info(&self) -> &CodeStreamInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut CodeStreamInfo {
        &mut self.info
    }

    pub fn tile_errors(&self) -> &[TileError] {
        &self.tile_errors
    }

    /// Positions `reader` at the first tile-part of `tile_index`, from the
    /// tile-part index or, failing that, from the TLM lengths.
    pub fn seek_to_tile<R: StreamRead + ?Sized>(&mut self, reader: &mut R, tile_index: u16) -> Result<()> {
        if tile_index as u32 >= self.info.no_tiles() {
            return Err(CodestreamError::InvalidTileIndex {
                tile_index,
                no_tiles: self.info.no_tiles(),
            });
        }
        if self.info.skip_to_tile(reader, tile_index)? {
            return Ok(());
        }
        let first_sot = self.info.main_header_end();
        if self.info.tile_lengths().is_some()
            && self
                .info
                .tile_lengths_mut()
                .skip_to(reader, tile_index, first_sot)?
        {
            return Ok(());
        }
        Err(CodestreamError::TileNotFound { tile_index })
    }

    /// Geometry of a tile, with the main header POC records applied.
    pub fn tile_geometry(&self, tile_index: u16) -> Result<TileGeometry> {
        let cod = self.header.cod().ok_or(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_COD,
        })?;
        Ok(TileGeometry::new(self.header.siz(), cod, tile_index)?
            .with_progression_changes(self.header.progression_changes.clone()))
    }

    /// Bytes between SOD and the end of a tile-part.
    pub fn tile_part_data<R: StreamRead + ?Sized>(
        &self,
        reader: &mut R,
        tile_index: u16,
        tile_part_index: u8,
    ) -> Result<Vec<u8>> {
        let tile_part = self
            .info
            .tile_part_info(tile_index, tile_part_index)
            .ok_or(CodestreamError::TileNotFound { tile_index })?;
        let len = tile_part.data_length() as usize;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| CodestreamError::Allocation { requested: len })?;
        data.resize(len, 0);
        reader.seek_to(tile_part.end_header_position())?;
        reader.read_exact(&mut data)?;
        Ok(data)
    }
}

// Lxxx of a marker segment that is recorded but not interpreted, with the
// reader moved past it.
fn skip_segment<R: StreamRead + ?Sized>(reader: &mut R, marker: MarkerSymbol, offset: u64) -> Result<u16> {
    let length = reader.read_u16()?;
    if length < 2 {
        return Err(CodestreamError::InvalidMarkerLength {
            marker,
            offset,
            length,
        });
    }
    reader.skip(length as i64 - 2)?;
    Ok(length)
}

fn read_comment<R: StreamRead + ?Sized>(reader: &mut R, offset: u64) -> Result<(u16, String)> {
    let length = reader.read_u16()?;
    if length < 4 {
        return Err(CodestreamError::InvalidMarkerLength {
            marker: MARKER_SYMBOL_COM,
            offset,
            length,
        });
    }
    // Rcom
    let registration = reader.read_u16()?;
    let mut text = vec![0; length as usize - 4];
    reader.read_exact(&mut text)?;
    let comment = match registration {
        1 => String::from_utf8_lossy(&text).into_owned(),
        _ => format!("<{} bytes of binary data>", text.len()),
    };
    Ok((length, comment))
}

/// Reads the main header and indexes every tile-part of a codestream.
///
/// Main header problems are fatal. Tile-part problems are fatal in strict
/// mode; otherwise they are recorded per tile and the scan carries on when
/// the rejected tile-part's length allows skipping it.
pub fn index_codestream<R: StreamRead + ?Sized>(reader: &mut R, options: ScanOptions) -> Result<CodestreamIndex> {
    let start = reader.tell()?;
    let mut info = CodeStreamInfo::new(0);
    info.set_main_header_start(start);

    if reader.read_marker()? != MARKER_SYMBOL_SOC {
        return Err(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_SOC,
        });
    }
    info!("SOC start at byte offset {}", start);
    info.push_marker(MARKER_SYMBOL_SOC, start, 0);

    let position = reader.tell()?;
    if reader.read_marker()? != MARKER_SYMBOL_SIZ {
        return Err(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_SIZ,
        });
    }
    let siz = decode_siz(reader)?;
    info.set_no_tiles(siz.no_tiles());
    info.push_marker(MARKER_SYMBOL_SIZ, position, siz.length() as u32);

    let mut header = MainHeader {
        siz,
        cod: None,
        progression_changes: Vec::new(),
        comments: Vec::new(),
    };
    let mut seen_qcd = false;

    let first_sot = loop {
        let position = reader.tell()?;
        let marker = reader.read_marker()?;
        match marker {
            MARKER_SYMBOL_SOT => break position,
            MARKER_SYMBOL_COD => {
                let cod = decode_cod(reader)?;
                info.push_marker(marker, position, cod.length() as u32);
                header.cod = Some(cod);
            }
            MARKER_SYMBOL_POC => {
                let changes = decode_poc(reader, header.siz.no_components())?;
                info.push_marker(marker, position, (reader.tell()? - position - 2) as u32);
                header.progression_changes.extend(changes);
            }
            MARKER_SYMBOL_TLM => {
                let length = reader.read_u16()?;
                info.tile_lengths_mut().decode(reader, length)?;
                info.push_marker(marker, position, length as u32);
            }
            MARKER_SYMBOL_PLM => {
                let length = reader.read_u16()?;
                info.packet_lengths_mut().decode_plm(reader, length)?;
                info.push_marker(marker, position, length as u32);
            }
            MARKER_SYMBOL_COM => {
                let (length, comment) = read_comment(reader, position)?;
                warn!("COM at byte offset {}: {}", position, comment);
                info.push_marker(marker, position, length as u32);
                header.comments.push(comment);
            }
            MARKER_SYMBOL_QCD | MARKER_SYMBOL_QCC | MARKER_SYMBOL_COC | MARKER_SYMBOL_RGN
            | MARKER_SYMBOL_CRG | MARKER_SYMBOL_PPM => {
                seen_qcd |= marker == MARKER_SYMBOL_QCD;
                info!("{} start at byte offset {}", marker_name(marker), position);
                let length = skip_segment(reader, marker, position)?;
                info.push_marker(marker, position, length as u32);
            }
            // A.1.2: 0xFF30 to 0xFF3F carry no parameters
            [0xFF, 0x30..=0x3F] => {
                warn!(
                    "skipping reserved marker 0x{:02X}{:02X} at byte offset {}",
                    marker[0], marker[1], position
                );
            }
            [0xFF, id] if id >= 0x40 && marker_name(marker) == "UNK" => {
                warn!(
                    "skipping unknown marker 0xFF{:02X} at byte offset {}",
                    id, position
                );
                let length = skip_segment(reader, marker, position)?;
                info.push_marker(marker, position, length as u32);
            }
            _ => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker,
                    offset: position,
                })
            }
        }
    };
    info.set_main_header_end(first_sot);
    if !seen_qcd {
        warn!("main header has no QCD marker");
    }
    if header.cod.is_none() {
        warn!("main header has no COD marker");
    }
    info!("main header end at byte offset {}", first_sot);

    let mut index = CodestreamIndex {
        header,
        info,
        tile_errors: Vec::new(),
    };
    index_tile_parts(reader, &mut index, first_sot, options)?;
    Ok(index)
}

fn index_tile_parts<R: StreamRead + ?Sized>(
    reader: &mut R,
    index: &mut CodestreamIndex,
    first_sot: u64,
    options: ScanOptions,
) -> Result<()> {
    let stream_length = reader.stream_length()?;
    let mut position = first_sot;
    loop {
        // the SOT marker at `position` has been consumed
        let segment = decode_sot(reader, position)?;
        let outcome = index
            .info
            .check_tile_part(&segment)
            .and_then(|_| {
                if segment.is_empty() {
                    return Ok(None);
                }
                read_tile_part_header(reader, segment.tile_index()).map(Some)
            })
            .and_then(|header| {
                let acceptance = index.info.update_tile_info(&segment)?;
                if let Some(header) = header {
                    header.commit(&mut index.info, &acceptance);
                }
                Ok(acceptance)
            });

        match outcome {
            Ok(acceptance) => {
                let end = match segment.end_offset() {
                    Some(end) => end,
                    None => codestream_end(reader, stream_length)?,
                };
                index
                    .info
                    .set_tile_part_end(acceptance.tile_index, acceptance.tile_part_index, end);
                if acceptance.last_in_codestream {
                    if end + 2 <= stream_length {
                        index.info.push_marker(MARKER_SYMBOL_EOC, end, 0);
                    }
                    return Ok(());
                }
                reader.seek_to(end)?;
            }
            Err(error) => {
                if options.strict {
                    return Err(error);
                }
                error!(
                    "tile {} tile-part {}: {}",
                    segment.tile_index(),
                    segment.tile_part_index(),
                    error
                );
                index.tile_errors.push(TileError {
                    tile_index: segment.tile_index(),
                    tile_part_index: segment.tile_part_index(),
                    error,
                });
                if segment.tile_length() < SOT_MARKER_SEGMENT_SIZE {
                    warn!("cannot skip tile-part at byte offset {}, stopping", position);
                    return Ok(());
                }
                reader.seek_to(position + segment.tile_length() as u64)?;
            }
        }

        let next = reader.tell()?;
        match reader.read_marker() {
            Ok(MARKER_SYMBOL_SOT) => position = next,
            Ok(MARKER_SYMBOL_EOC) => {
                info!("EOC at byte offset {}", next);
                index.info.push_marker(MARKER_SYMBOL_EOC, next, 0);
                return Ok(());
            }
            Ok(marker) => {
                let error = CodestreamError::MarkerUnexpected {
                    marker,
                    offset: next,
                };
                if options.strict {
                    return Err(error);
                }
                warn!("{}, stopping", error);
                return Ok(());
            }
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                warn!("codestream ends at byte offset {} without EOC", next);
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        }
    }
}

// End of the last tile-part (Psot = 0): the EOC marker, or the end of the
// stream when EOC is missing.
fn codestream_end<R: StreamRead + ?Sized>(reader: &mut R, stream_length: u64) -> Result<u64> {
    if stream_length < 2 {
        return Ok(stream_length);
    }
    let position = reader.tell()?;
    reader.seek_to(stream_length - 2)?;
    let marker = reader.read_marker()?;
    reader.seek_to(position)?;
    if marker == MARKER_SYMBOL_EOC {
        Ok(stream_length - 2)
    } else {
        warn!("last tile-part runs to end of stream without EOC");
        Ok(stream_length)
    }
}

// Tile-part header markers up to and including SOD, held back until the
// whole header has been read.
#[derive(Debug, Default)]
struct TilePartHeader {
    markers: Vec<MarkerInfo>,
    packet_lengths: PacketLengthMarkers,
    // Offset just past SOD.
    end_position: u64,
}

impl TilePartHeader {
    fn commit(self, info: &mut CodeStreamInfo, acceptance: &TilePartAcceptance) {
        info.set_tile_part_end_header(
            acceptance.tile_index,
            acceptance.tile_part_index,
            self.end_position,
        );
        if let Some(tile) = info.tile_info_mut(acceptance.tile_index) {
            for marker in self.markers {
                tile.push_marker(marker.marker(), marker.position(), marker.length());
            }
            tile.packet_lengths_mut().append(self.packet_lengths);
        }
    }
}

fn read_tile_part_header<R: StreamRead + ?Sized>(
    reader: &mut R,
    tile_index: u16,
) -> Result<TilePartHeader> {
    let mut header = TilePartHeader::default();
    loop {
        let position = reader.tell()?;
        let marker = reader.read_marker()?;
        let length = match marker {
            MARKER_SYMBOL_SOD => {
                info!("SOD at byte offset {}", position);
                header.end_position = position + 2;
                return Ok(header);
            }
            MARKER_SYMBOL_PLT => {
                let length = reader.read_u16()?;
                header.packet_lengths.decode_plt(reader, length)?;
                length
            }
            MARKER_SYMBOL_COM => {
                let (length, comment) = read_comment(reader, position)?;
                warn!("tile {} COM: {}", tile_index, comment);
                length
            }
            MARKER_SYMBOL_COD | MARKER_SYMBOL_COC | MARKER_SYMBOL_QCD | MARKER_SYMBOL_QCC
            | MARKER_SYMBOL_RGN | MARKER_SYMBOL_POC | MARKER_SYMBOL_PPT => {
                info!("{} start at byte offset {}", marker_name(marker), position);
                skip_segment(reader, marker, position)?
            }
            _ => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker,
                    offset: position,
                })
            }
        };
        header
            .markers
            .push(MarkerInfo::new(marker, position, length as u32));
    }
}

#[derive(Clone, Copy, Debug)]
struct OpenTilePart {
    tile_index: u16,
    tile_part_index: u8,
    no_tile_parts: u8,
    start: u64,
    end_header: u64,
}

/// Writes the codestream framing around tile-part data: main header, SOT
/// with patched Psot, optional PLT and TLM, and EOC.
pub struct CodestreamWriter<W: StreamWrite> {
    writer: W,
    info: CodeStreamInfo,
    sot: SotMarker,
    open: Option<OpenTilePart>,
    tile_lengths: bool,
}

impl<W: StreamWrite> CodestreamWriter<W> {
    /// Writes SOC, SIZ, COD, POC when `progression_changes` is not empty, and
    /// a TLM segment reserved for `tlm_tile_parts` entries when given.
    pub fn new(
        mut writer: W,
        siz: &ImageAndTileSizeMarkerSegment,
        cod: &CodingStyleMarkerSegment,
        progression_changes: &[ProgressionChange],
        tlm_tile_parts: Option<usize>,
    ) -> Result<CodestreamWriter<W>> {
        let mut info = CodeStreamInfo::new(siz.no_tiles());
        let start = writer.tell()?;
        info.set_main_header_start(start);
        writer.write_marker(MARKER_SYMBOL_SOC)?;
        info.push_marker(MARKER_SYMBOL_SOC, start, 0);

        let position = writer.tell()?;
        siz.write(&mut writer)?;
        info.push_marker(MARKER_SYMBOL_SIZ, position, (writer.tell()? - position - 2) as u32);

        let position = writer.tell()?;
        cod.write(&mut writer)?;
        info.push_marker(MARKER_SYMBOL_COD, position, (writer.tell()? - position - 2) as u32);

        if !progression_changes.is_empty() {
            let position = writer.tell()?;
            write_poc(&mut writer, progression_changes, siz.no_components())?;
            info.push_marker(MARKER_SYMBOL_POC, position, (writer.tell()? - position - 2) as u32);
        }

        if let Some(no_tile_parts) = tlm_tile_parts {
            let position = writer.tell()?;
            info.tile_lengths_mut().write_begin(&mut writer, no_tile_parts)?;
            info.push_marker(MARKER_SYMBOL_TLM, position, (writer.tell()? - position - 2) as u32);
        }

        info.set_main_header_end(writer.tell()?);
        Ok(CodestreamWriter {
            writer,
            info,
            sot: SotMarker::new(),
            open: None,
            tile_lengths: tlm_tile_parts.is_some(),
        })
    }

    pub fn info(&self) -> &CodeStreamInfo {
        &self.info
    }

    /// Writes SOT (Psot patched later), a PLT for `packet_lengths` when not
    /// empty, and SOD.
    pub fn begin_tile_part(
        &mut self,
        tile_index: u16,
        tile_part_index: u8,
        no_tile_parts: u8,
        packet_lengths: &[u32],
    ) -> Result<()> {
        if let Some(open) = self.open {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_SOT,
                error: format!(
                    "tile {} tile-part {} is still open",
                    open.tile_index, open.tile_part_index
                ),
            });
        }
        let start = self.writer.tell()?;
        let segment =
            StartOfTileSegment::new(tile_index, 0, tile_part_index, no_tile_parts).at_offset(start);
        self.sot.write(&mut self.writer, &segment)?;

        if !packet_lengths.is_empty() {
            let mut plt = PacketLengthMarkers::default();
            packet_lengths.iter().for_each(|&length| plt.push(length));
            plt.write_plt(&mut self.writer)?;
        }
        self.writer.write_marker(MARKER_SYMBOL_SOD)?;

        self.open = Some(OpenTilePart {
            tile_index,
            tile_part_index,
            no_tile_parts,
            start,
            end_header: self.writer.tell()?,
        });
        Ok(())
    }

    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        if self.open.is_none() {
            return Err(CodestreamError::MarkerMissing {
                marker: MARKER_SYMBOL_SOT,
            });
        }
        self.writer.write_all(data)?;
        Ok(())
    }

    /// Closes the open tile-part, patching its Psot.
    pub fn end_tile_part(&mut self) -> Result<TilePartAcceptance> {
        self.close_tile_part(false)
    }

    /// Closes the open tile-part as the last of the codestream (Psot = 0).
    pub fn end_final_tile_part(&mut self) -> Result<TilePartAcceptance> {
        self.close_tile_part(true)
    }

    fn close_tile_part(&mut self, last_in_codestream: bool) -> Result<TilePartAcceptance> {
        let open = self.open.take().ok_or(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_SOT,
        })?;
        let end = self.writer.tell()?;
        let length = u32::try_from(end - open.start).map_err(|_| CodestreamError::InvalidTilePartLength {
            tile_index: open.tile_index,
            tile_part_index: open.tile_part_index,
            length: u32::MAX,
        })?;
        let psot = if last_in_codestream { 0 } else { length };
        self.sot.write_psot(&mut self.writer, psot)?;

        let segment = StartOfTileSegment::new(open.tile_index, psot, open.tile_part_index, open.no_tile_parts)
            .at_offset(open.start);
        let acceptance = self.info.update_tile_info(&segment)?;
        self.info
            .set_tile_part_end_header(open.tile_index, open.tile_part_index, open.end_header);
        self.info
            .set_tile_part_end(open.tile_index, open.tile_part_index, end);
        if self.tile_lengths {
            self.info.tile_lengths_mut().push(open.tile_index, length);
        }
        Ok(acceptance)
    }

    /// Writes EOC and the reserved TLM entries; returns the underlying writer
    /// and the index of what was written.
    pub fn finish(mut self) -> Result<(W, CodeStreamInfo)> {
        if let Some(open) = self.open {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_SOT,
                error: format!(
                    "tile {} tile-part {} was not closed",
                    open.tile_index, open.tile_part_index
                ),
            });
        }
        let position = self.writer.tell()?;
        self.writer.write_marker(MARKER_SYMBOL_EOC)?;
        self.info.push_marker(MARKER_SYMBOL_EOC, position, 0);
        if self.tile_lengths {
            self.info.tile_lengths_mut().write_end(&mut self.writer)?;
        }
        self.writer.flush()?;
        Ok((self.writer, self.info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::header::{CodingStyleParameters, ComponentSize};
    use crate::progression::ProgressionOrder;
    use std::io::Cursor;

    fn headers() -> (ImageAndTileSizeMarkerSegment, CodingStyleMarkerSegment) {
        let siz = ImageAndTileSizeMarkerSegment::new(
            Rect::new(0, 0, 64, 32),
            (32, 32),
            (0, 0),
            vec![ComponentSize::new(8, false, 1, 1)],
        )
        .unwrap();
        let cod = CodingStyleMarkerSegment::new(
            ProgressionOrder::Lrcp,
            1,
            CodingStyleParameters::new(1, (4, 4), true, None),
        );
        (siz, cod)
    }

    #[test]
    fn test_main_header_requires_soc() {
        let mut cursor = Cursor::new(vec![0xFF, 0x51, 0, 0]);
        assert!(matches!(
            index_codestream(&mut cursor, ScanOptions::default()),
            Err(CodestreamError::MarkerMissing {
                marker: MARKER_SYMBOL_SOC
            })
        ));
    }

    #[test]
    fn test_write_then_index() {
        let (siz, cod) = headers();
        let mut writer = CodestreamWriter::new(Cursor::new(Vec::new()), &siz, &cod, &[], None).unwrap();
        writer.begin_tile_part(0, 0, 1, &[3, 200]).unwrap();
        writer.write_data(&[1; 203]).unwrap();
        let acceptance = writer.end_tile_part().unwrap();
        assert!(acceptance.last_of_tile);
        writer.begin_tile_part(1, 0, 1, &[]).unwrap();
        writer.write_data(&[2; 10]).unwrap();
        writer.end_final_tile_part().unwrap();
        let (cursor, written) = writer.finish().unwrap();

        let mut cursor = Cursor::new(cursor.into_inner());
        let index = index_codestream(&mut cursor, ScanOptions { strict: true }).unwrap();
        assert!(index.tile_errors().is_empty());
        assert_eq!(index.info().main_header_end(), written.main_header_end());
        assert!(index.info().last_tile_part_in_codestream());
        let tile = index.info().tile_info(0).unwrap();
        assert_eq!(tile.packet_lengths().lengths(0), Some(&[3, 200][..]));
        assert_eq!(tile.tile_part_info(0).unwrap().data_length(), 203);
        assert_eq!(
            index.tile_part_data(&mut cursor, 1, 0).unwrap(),
            vec![2; 10]
        );
        assert_eq!(
            index.info().markers().last().map(|marker| marker.marker()),
            Some(MARKER_SYMBOL_EOC)
        );
    }
}

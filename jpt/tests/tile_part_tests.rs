use std::io::{Cursor, Write};

use jpt::codestream::{index_codestream, ScanOptions};
use jpt::error::CodestreamError;
use jpt::geometry::Rect;
use jpt::header::{
    CodingStyleMarkerSegment, CodingStyleParameters, ComponentSize, ImageAndTileSizeMarkerSegment,
};
use jpt::length_cache::CodeStreamInfo;
use jpt::marker::{
    MarkerSymbol, MARKER_SYMBOL_EOC, MARKER_SYMBOL_PLT, MARKER_SYMBOL_SOC, MARKER_SYMBOL_SOD,
    MARKER_SYMBOL_TLM,
};
use jpt::progression::ProgressionOrder;
use jpt::sot::{SotMarker, StartOfTileSegment, TilePartState};
use jpt::stream::{Stream, StreamWrite};

fn sot(tile_index: u16, tile_length: u32, tile_part_index: u8, no_tile_parts: u8) -> StartOfTileSegment {
    StartOfTileSegment::new(tile_index, tile_length, tile_part_index, no_tile_parts)
}

#[test]
fn test_tile_parts_in_sequence_are_accepted() {
    let mut info = CodeStreamInfo::new(4);
    for (i, offset) in [100u64, 300, 500].iter().enumerate() {
        let acceptance = info
            .update_tile_info(&sot(2, 200, i as u8, 0).at_offset(*offset))
            .unwrap();
        assert_eq!(acceptance.tile_part_index, i as u8);
        assert!(!acceptance.last_of_tile);
    }
    let tile = info.tile_info(2).unwrap();
    assert_eq!(tile.no_tile_parts_read(), 3);
    assert_eq!(tile.no_tile_parts(), None);
    assert!(!tile.last_tile_part_was_read());
    assert_eq!(tile.tile_part_info(1).unwrap().start_position(), 300);
    assert_eq!(tile.tile_part_info(1).unwrap().end_position(), 500);
    assert!(info.tile_info(0).is_none());
}

#[test]
fn test_skipped_tile_part_is_rejected_without_trace() {
    let mut info = CodeStreamInfo::new(1);
    info.update_tile_info(&sot(0, 100, 0, 0).at_offset(0)).unwrap();
    let before = info.tile_info(0).unwrap().state();

    assert!(matches!(
        info.update_tile_info(&sot(0, 100, 2, 0).at_offset(100)),
        Err(CodestreamError::TilePartOutOfSequence {
            tile_index: 0,
            expected: 1,
            found: 2
        })
    ));
    assert!(matches!(
        info.update_tile_info(&sot(0, 100, 0, 0).at_offset(100)),
        Err(CodestreamError::TilePartOutOfSequence {
            tile_index: 0,
            expected: 1,
            found: 0
        })
    ));
    let tile = info.tile_info(0).unwrap();
    assert_eq!(tile.state(), before);
    assert_eq!(tile.no_tile_parts_read(), 1);

    // the expected tile-part is still accepted afterwards
    info.update_tile_info(&sot(0, 100, 1, 0).at_offset(100)).unwrap();
    assert_eq!(info.tile_info(0).unwrap().no_tile_parts_read(), 2);
}

#[test]
fn test_declared_tile_part_count() {
    let mut info = CodeStreamInfo::new(2);
    info.update_tile_info(&sot(1, 50, 0, 2).at_offset(0)).unwrap();
    assert!(matches!(
        info.update_tile_info(&sot(1, 50, 1, 3).at_offset(50)),
        Err(CodestreamError::TilePartCountMismatch {
            tile_index: 1,
            declared: 2,
            found: 3
        })
    ));
    // TNsot may be left at zero on later tile-parts
    let acceptance = info.update_tile_info(&sot(1, 50, 1, 0).at_offset(50)).unwrap();
    assert!(acceptance.last_of_tile);
    assert!(matches!(
        info.update_tile_info(&sot(1, 50, 2, 0).at_offset(100)),
        Err(CodestreamError::TilePartAfterLast {
            tile_index: 1,
            tile_part_index: 2
        })
    ));
    assert_eq!(info.tile_info(1).unwrap().no_tile_parts(), Some(2));
    assert_eq!(
        info.tile_info(1).unwrap().state(),
        TilePartState::LastPartSeen { no_tile_parts: 2 }
    );
}

#[test]
fn test_invalid_segments() {
    let mut info = CodeStreamInfo::new(6);
    assert!(matches!(
        info.update_tile_info(&sot(6, 50, 0, 1)),
        Err(CodestreamError::InvalidTileIndex {
            tile_index: 6,
            no_tiles: 6
        })
    ));
    assert!(matches!(
        info.update_tile_info(&sot(0, 50, 1, 1)),
        Err(CodestreamError::TilePartIndexOutOfRange {
            tile_index: 0,
            tile_part_index: 1,
            no_tile_parts: 1
        })
    ));
    assert!(matches!(
        info.update_tile_info(&sot(0, 5, 0, 1)),
        Err(CodestreamError::InvalidTilePartLength {
            tile_index: 0,
            tile_part_index: 0,
            length: 5
        })
    ));
    assert!(info.tiles().next().is_none());

    // SOT with nothing after it
    let segment = sot(0, 12, 0, 1);
    assert!(segment.is_empty());
    assert!(info.update_tile_info(&segment).unwrap().last_of_tile);
    let tile_part = info.tile_part_info(0, 0).unwrap();
    assert_eq!((tile_part.end_header_position(), tile_part.end_position()), (12, 12));
    assert_eq!(tile_part.data_length(), 0);
}

#[test]
fn test_last_tile_of_three_by_two_grid() {
    let mut info = CodeStreamInfo::new(6);
    info.update_tile_info(&sot(5, 100, 0, 3).at_offset(1000)).unwrap();
    info.update_tile_info(&sot(5, 200, 1, 3).at_offset(1100)).unwrap();
    let acceptance = info.update_tile_info(&sot(5, 0, 2, 3).at_offset(1300)).unwrap();
    assert!(acceptance.last_of_tile);
    assert!(acceptance.last_in_codestream);
    assert!(info.last_tile_part_in_codestream());

    assert!(info.set_tile_part_end_header(5, 2, 1320));
    assert!(info.set_tile_part_end(5, 2, 1500));
    assert!(!info.set_tile_part_end(5, 3, 1500));

    let tile = info.tile_info(5).unwrap();
    assert_eq!(tile.no_tile_parts(), Some(3));
    assert_eq!(tile.no_tile_parts_read(), 3);
    assert!(tile.last_tile_part_was_read());
    assert_eq!(tile.tile_part_info(0).unwrap().length(), 100);
    assert_eq!(tile.tile_part_info(1).unwrap().length(), 200);
    assert_eq!(tile.tile_part_info(2).unwrap().length(), 200);
    assert_eq!(tile.tile_part_info(2).unwrap().data_length(), 180);
    assert_eq!(info.tiles().count(), 1);
}

// SOC, SIZ and COD for two 32 x 32 tiles side by side.
fn main_header() -> Cursor<Vec<u8>> {
    let siz = ImageAndTileSizeMarkerSegment::new(
        Rect::new(0, 0, 64, 32),
        (32, 32),
        (0, 0),
        vec![ComponentSize::new(8, false, 1, 1)],
    )
    .expect("valid SIZ");
    let cod = CodingStyleMarkerSegment::new(
        ProgressionOrder::Lrcp,
        1,
        CodingStyleParameters::new(1, (4, 4), true, None),
    );
    let mut stream = Cursor::new(Vec::new());
    stream.write_marker(MARKER_SYMBOL_SOC).unwrap();
    siz.write(&mut stream).unwrap();
    cod.write(&mut stream).unwrap();
    stream
}

// SOT followed by `body` verbatim; returns the SOT offset.
fn write_tile_part(
    stream: &mut Cursor<Vec<u8>>,
    tile_index: u16,
    tile_part_index: u8,
    no_tile_parts: u8,
    body: &[u8],
) -> u64 {
    let start = stream.tell().unwrap();
    let tile_length = 12 + body.len() as u32;
    let segment = StartOfTileSegment::new(tile_index, tile_length, tile_part_index, no_tile_parts);
    SotMarker::new().write(stream, &segment).unwrap();
    stream.write_all(body).unwrap();
    start
}

fn segment(marker: MarkerSymbol, parameters: &[u8]) -> Vec<u8> {
    let mut bytes = marker.to_vec();
    bytes.extend_from_slice(&(parameters.len() as u16 + 2).to_be_bytes());
    bytes.extend_from_slice(parameters);
    bytes
}

fn data(bytes: &[u8]) -> Vec<u8> {
    let mut out = MARKER_SYMBOL_SOD.to_vec();
    out.extend_from_slice(bytes);
    out
}

#[test]
fn test_indexed_empty_tile_part_has_no_data() {
    let mut stream = main_header();
    let empty = write_tile_part(&mut stream, 0, 0, 2, &[]);
    let second = write_tile_part(&mut stream, 0, 1, 2, &data(&[1, 2, 3, 4, 5]));
    write_tile_part(&mut stream, 1, 0, 1, &data(&[9, 9]));
    stream.write_marker(MARKER_SYMBOL_EOC).unwrap();
    stream.seek_to(0).unwrap();

    let index = index_codestream(&mut stream, ScanOptions { strict: true }).unwrap();
    assert!(index.tile_errors().is_empty());
    let tile = index.info().tile_info(0).unwrap();
    assert!(tile.last_tile_part_was_read());
    assert_eq!(tile.no_tile_parts(), Some(2));

    let part = tile.tile_part_info(0).unwrap();
    assert_eq!(part.start_position(), empty);
    assert_eq!(part.end_header_position(), empty + 12);
    assert_eq!(part.end_position(), empty + 12);
    assert_eq!(part.data_length(), 0);
    assert_eq!(tile.tile_part_info(1).unwrap().start_position(), second);
    assert_eq!(tile.tile_part_info(1).unwrap().data_length(), 5);

    assert!(index.tile_part_data(&mut stream, 0, 0).unwrap().is_empty());
    assert_eq!(index.tile_part_data(&mut stream, 0, 1).unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_rejected_tile_part_header_leaves_no_trace() {
    // PLT, then a main-header-only TLM before SOD
    let mut body = segment(MARKER_SYMBOL_PLT, &[0, 0x05]);
    body.extend(segment(MARKER_SYMBOL_TLM, &[0, 0x50, 0, 0, 0, 40]));
    body.extend(data(&[7; 5]));

    let mut stream = main_header();
    let rejected = write_tile_part(&mut stream, 0, 0, 1, &body);
    let accepted = write_tile_part(&mut stream, 0, 0, 1, &data(&[1; 4]));
    write_tile_part(&mut stream, 1, 0, 1, &data(&[2; 3]));
    stream.write_marker(MARKER_SYMBOL_EOC).unwrap();
    let bytes = stream.into_inner();

    let mut reader = Cursor::new(bytes.clone());
    let mut index = index_codestream(&mut reader, ScanOptions::default()).unwrap();
    assert_eq!(index.tile_errors().len(), 1);
    let tile_error = &index.tile_errors()[0];
    assert_eq!((tile_error.tile_index, tile_error.tile_part_index), (0, 0));
    assert!(matches!(
        tile_error.error,
        CodestreamError::MarkerUnexpected { marker: MARKER_SYMBOL_TLM, offset }
            if offset == rejected + 12 + 6
    ));

    // the repeated tile-part 0 is the one recorded
    let tile = index.info().tile_info(0).unwrap();
    assert_eq!(tile.no_tile_parts_read(), 1);
    assert!(tile.last_tile_part_was_read());
    assert_eq!(tile.tile_part_info(0).unwrap().start_position(), accepted);
    assert!(tile.markers().is_empty());
    assert!(tile.packet_lengths().is_empty());
    assert_eq!(index.tile_part_data(&mut reader, 0, 0).unwrap(), vec![1; 4]);
    assert!(index.info().tile_info(1).unwrap().last_tile_part_was_read());

    index.seek_to_tile(&mut reader, 0).unwrap();
    assert_eq!(reader.position(), accepted);

    let mut reader = Cursor::new(bytes);
    assert!(matches!(
        index_codestream(&mut reader, ScanOptions { strict: true }),
        Err(CodestreamError::MarkerUnexpected {
            marker: MARKER_SYMBOL_TLM,
            ..
        })
    ));
}

#[test]
fn test_rejected_only_tile_part_is_not_indexed() {
    let mut body = segment(MARKER_SYMBOL_PLT, &[0, 0x05]);
    body.extend(segment(MARKER_SYMBOL_TLM, &[0, 0x50, 0, 0, 0, 40]));
    body.extend(data(&[7; 5]));

    let mut stream = main_header();
    write_tile_part(&mut stream, 0, 0, 1, &body);
    write_tile_part(&mut stream, 1, 0, 1, &data(&[2; 3]));
    stream.write_marker(MARKER_SYMBOL_EOC).unwrap();
    stream.seek_to(0).unwrap();

    let mut index = index_codestream(&mut stream, ScanOptions::default()).unwrap();
    assert_eq!(index.tile_errors().len(), 1);
    assert!(index.info().tile_info(0).is_none());
    assert!(index.info().tile_part_info(0, 0).is_none());
    assert_eq!(index.info().tiles().count(), 1);
    assert!(matches!(
        index.seek_to_tile(&mut stream, 0),
        Err(CodestreamError::TileNotFound { tile_index: 0 })
    ));
}

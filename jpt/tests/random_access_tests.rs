use std::io::Cursor;

use jpt::codestream::{index_codestream, CodestreamWriter, ScanOptions};
use jpt::error::CodestreamError;
use jpt::geometry::Rect;
use jpt::header::{
    CodingStyleMarkerSegment, CodingStyleParameters, ComponentSize, ImageAndTileSizeMarkerSegment,
};
use jpt::marker::{MARKER_SYMBOL_EOC, MARKER_SYMBOL_SOT};
use jpt::progression::{ProgressionChange, ProgressionOrder};
use jpt::sot::decode_sot;
use jpt::stream::{Stream, StreamRead};

// SOT segment plus SOD
const TILE_PART_OVERHEAD: usize = 14;

fn headers() -> (ImageAndTileSizeMarkerSegment, CodingStyleMarkerSegment) {
    // 3 x 2 grid of 32 x 32 tiles
    let siz = ImageAndTileSizeMarkerSegment::new(
        Rect::new(0, 0, 96, 64),
        (32, 32),
        (0, 0),
        vec![
            ComponentSize::new(8, false, 1, 1),
            ComponentSize::new(8, false, 2, 2),
        ],
    )
    .expect("valid SIZ");
    let cod = CodingStyleMarkerSegment::new(
        ProgressionOrder::Rpcl,
        2,
        CodingStyleParameters::new(2, (4, 4), false, None),
    );
    (siz, cod)
}

// Tiles 0 to 4 in one tile-part each, tile 5 in three: 100 and 200 bytes,
// then the last tile-part of the codestream with Psot = 0.
fn write_codestream(tile_lengths: bool) -> (Vec<u8>, jpt::length_cache::CodeStreamInfo) {
    let (siz, cod) = headers();
    let changes = [ProgressionChange {
        resolution_start: 0,
        component_start: 0,
        layer_end: 2,
        resolution_end: 3,
        component_end: 2,
        progression_order: ProgressionOrder::Lrcp,
    }];
    let mut writer = CodestreamWriter::new(
        Cursor::new(Vec::new()),
        &siz,
        &cod,
        &changes,
        if tile_lengths { Some(8) } else { None },
    )
    .unwrap();
    for tile_index in 0..5u16 {
        writer.begin_tile_part(tile_index, 0, 1, &[]).unwrap();
        writer.write_data(&vec![tile_index as u8; 20 + tile_index as usize]).unwrap();
        assert!(writer.end_tile_part().unwrap().last_of_tile);
    }
    writer.begin_tile_part(5, 0, 3, &[]).unwrap();
    writer.write_data(&[0xA0; 100 - TILE_PART_OVERHEAD]).unwrap();
    writer.end_tile_part().unwrap();
    writer.begin_tile_part(5, 1, 3, &[]).unwrap();
    writer.write_data(&[0xA1; 200 - TILE_PART_OVERHEAD]).unwrap();
    writer.end_tile_part().unwrap();
    writer.begin_tile_part(5, 2, 3, &[]).unwrap();
    writer.write_data(&[0xA2; 40]).unwrap();
    let acceptance = writer.end_final_tile_part().unwrap();
    assert!(acceptance.last_of_tile && acceptance.last_in_codestream);
    let (cursor, info) = writer.finish().unwrap();
    (cursor.into_inner(), info)
}

#[test]
fn test_index_matches_writer() {
    let (bytes, written) = write_codestream(false);
    let mut reader = Cursor::new(bytes);
    let index = index_codestream(&mut reader, ScanOptions { strict: true }).unwrap();

    assert!(index.tile_errors().is_empty());
    assert_eq!(index.header().siz().no_tiles(), 6);
    assert_eq!(index.header().progression_changes().len(), 1);
    assert_eq!(index.info().main_header_end(), written.main_header_end());
    assert_eq!(index.info().tiles().count(), 6);
    for tile_index in 0..6u16 {
        let indexed = index.info().tile_info(tile_index).unwrap();
        let expected = written.tile_info(tile_index).unwrap();
        assert_eq!(indexed.tile_parts(), expected.tile_parts());
        assert!(indexed.last_tile_part_was_read());
    }

    let tile = index.info().tile_info(5).unwrap();
    assert_eq!(tile.no_tile_parts(), Some(3));
    assert_eq!(tile.tile_part_info(0).unwrap().length(), 100);
    assert_eq!(tile.tile_part_info(1).unwrap().length(), 200);
    assert_eq!(tile.tile_part_info(2).unwrap().data_length(), 40);
    assert!(index.info().last_tile_part_in_codestream());
    assert_eq!(
        index.info().markers().last().map(|marker| marker.marker()),
        Some(MARKER_SYMBOL_EOC)
    );
    assert_eq!(index.tile_part_data(&mut reader, 3, 0).unwrap(), vec![3; 23]);
}

#[test]
fn test_seek_to_tile() {
    let (bytes, _) = write_codestream(false);
    let mut reader = Cursor::new(bytes);
    let mut index = index_codestream(&mut reader, ScanOptions::default()).unwrap();

    for &tile_index in &[4u16, 0, 5] {
        index.seek_to_tile(&mut reader, tile_index).unwrap();
        let position = reader.tell().unwrap();
        assert_eq!(reader.read_marker().unwrap(), MARKER_SYMBOL_SOT);
        let segment = decode_sot(&mut reader, position).unwrap();
        assert_eq!(segment.tile_index(), tile_index);
        assert_eq!(segment.tile_part_index(), 0);
    }
    assert!(matches!(
        index.seek_to_tile(&mut reader, 6),
        Err(CodestreamError::InvalidTileIndex { tile_index: 6, .. })
    ));
}

#[test]
fn test_tile_lengths_locate_tiles() {
    let (bytes, written) = write_codestream(true);
    let mut reader = Cursor::new(bytes);
    let mut index = index_codestream(&mut reader, ScanOptions { strict: true }).unwrap();
    assert_eq!(index.info().tile_lengths().map(|tlm| tlm.len()), Some(8));

    let first_sot = index.info().main_header_end();
    for tile_index in 0..6u16 {
        let found = index
            .info_mut()
            .tile_lengths_mut()
            .skip_to(&mut reader, tile_index, first_sot)
            .unwrap();
        assert!(found);
        let expected = written.tile_part_info(tile_index, 0).unwrap().start_position();
        assert_eq!(reader.tell().unwrap(), expected);
    }
}

#[test]
fn test_tile_geometry_from_index() {
    let (bytes, _) = write_codestream(false);
    let mut reader = Cursor::new(bytes);
    let index = index_codestream(&mut reader, ScanOptions::default()).unwrap();

    let geometry = index.tile_geometry(4).unwrap();
    assert_eq!(geometry.bounds(), Rect::new(32, 32, 64, 64));
    assert_eq!(geometry.component(1).unwrap().bounds(), Rect::new(16, 16, 32, 32));
    assert_eq!(geometry.progression_changes().len(), 1);
    let packets = geometry.packet_sequence().unwrap();
    assert_eq!(packets.len() as u64, geometry.no_packets());
    // one precinct per resolution: 2 components x 3 resolutions x 2 layers
    assert_eq!(packets.len(), 12);
    assert!(packets.windows(2).all(|pair| pair[0].layer <= pair[1].layer));
}

#[test]
fn test_out_of_sequence_tile_part() {
    let (siz, cod) = headers();
    let mut writer = CodestreamWriter::new(Cursor::new(Vec::new()), &siz, &cod, &[], None).unwrap();
    writer.begin_tile_part(0, 0, 0, &[4, 6]).unwrap();
    writer.write_data(&[1; 10]).unwrap();
    writer.end_tile_part().unwrap();
    writer.begin_tile_part(0, 1, 0, &[]).unwrap();
    writer.write_data(&[2; 10]).unwrap();
    writer.end_tile_part().unwrap();
    writer.begin_tile_part(1, 0, 1, &[]).unwrap();
    writer.write_data(&[3; 10]).unwrap();
    writer.end_final_tile_part().unwrap();
    let (cursor, info) = writer.finish().unwrap();

    // rewrite TPsot of the second tile-part of tile 0 from 1 to 2
    let mut bytes = cursor.into_inner();
    let second = info.tile_part_info(0, 1).unwrap().start_position() as usize;
    assert_eq!(bytes[second + 10], 1);
    bytes[second + 10] = 2;

    let mut reader = Cursor::new(bytes.clone());
    let index = index_codestream(&mut reader, ScanOptions::default()).unwrap();
    assert_eq!(index.tile_errors().len(), 1);
    let tile_error = &index.tile_errors()[0];
    assert_eq!((tile_error.tile_index, tile_error.tile_part_index), (0, 2));
    assert!(matches!(
        tile_error.error,
        CodestreamError::TilePartOutOfSequence {
            tile_index: 0,
            expected: 1,
            found: 2
        }
    ));
    let tile = index.info().tile_info(0).unwrap();
    assert_eq!(tile.no_tile_parts_read(), 1);
    assert_eq!(tile.packet_lengths().lengths(0), Some(&[4, 6][..]));
    assert!(index.info().tile_info(1).unwrap().last_tile_part_was_read());

    let mut reader = Cursor::new(bytes);
    assert!(matches!(
        index_codestream(&mut reader, ScanOptions { strict: true }),
        Err(CodestreamError::TilePartOutOfSequence { .. })
    ));
}

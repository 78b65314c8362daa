mod common;

use jpip::{
    encode_response, parse_stream, reconstruct_j2k, reconstruct_jp2, BinRef, CacheModel,
    Enqueuer, EorReason, JPIPError, MemorySink, MetadataRequest, StreamWriter, Target,
    ViewWindowRequest,
};

use common::Fixture;

// Serves `request`, commits it to `cache` and returns the response bytes.
fn serve(target: &Target, cache: &mut CacheModel, request: &ViewWindowRequest) -> Vec<u8> {
    let enqueued = Enqueuer::new(target, cache).enqueue(request).unwrap();
    let bytes = encode_response(&enqueued.queue, target.source(), EorReason::WindowDone).unwrap();
    cache.commit(&enqueued.marks);
    bytes
}

fn rebuild(stream: &[u8], level: u8) -> Result<jpip::Reconstruction, JPIPError> {
    let queue = parse_stream(stream).unwrap();
    reconstruct_j2k(stream, &queue, 0, level, &MemorySink::new())
}

#[test]
fn test_tile_parts_rebuild_original() {
    for parts_per_tile in [1, 2, 3] {
        let fixture = Fixture {
            parts_per_tile,
            ..Default::default()
        };
        let target = common::open(fixture.codestream(), 0);
        let mut cache = CacheModel::new(target.index(), 0);
        let stream = serve(&target, &mut cache, &ViewWindowRequest::new(0).level(0));

        let reconstruction = rebuild(&stream, 0).unwrap();
        assert!(reconstruction.is_complete());
        assert_eq!(reconstruction.data, fixture.codestream());
    }
}

#[test]
fn test_precincts_rebuild_original() {
    let fixture = Fixture {
        packet_lengths: true,
        ..Default::default()
    };
    let target = common::open(fixture.codestream(), 0);
    let mut cache = CacheModel::new(target.index(), 0);
    let stream = serve(&target, &mut cache, &ViewWindowRequest::new(0).level(0).layers(2));

    // Packet lengths are dropped from the rebuilt tile headers.
    let expected = Fixture {
        packet_lengths: false,
        ..fixture
    }
    .codestream();
    assert_eq!(rebuild(&stream, 0).unwrap().into_complete().unwrap(), expected);
}

#[test]
fn test_precincts_across_responses() {
    let fixture = Fixture {
        packet_lengths: true,
        eph: true,
        ..Default::default()
    };
    let target = common::open(fixture.codestream(), 0);
    let mut cache = CacheModel::new(target.index(), 0);
    let mut writer = StreamWriter::new();
    let mut stream = Vec::new();
    for layers in [1, 2] {
        let enqueued = Enqueuer::new(&target, &cache)
            .enqueue(&ViewWindowRequest::new(0).level(0).layers(layers))
            .unwrap();
        writer.emit(&enqueued.queue, target.source(), &mut stream).unwrap();
        writer.end_of_response(EorReason::WindowDone, &mut stream).unwrap();
        cache.commit(&enqueued.marks);
    }

    let expected = Fixture {
        packet_lengths: false,
        ..fixture
    }
    .codestream();
    assert_eq!(rebuild(&stream, 0).unwrap().data, expected);
}

#[test]
fn test_reduced_precincts() {
    let fixture = Fixture {
        packet_lengths: true,
        ..Default::default()
    };
    let target = common::open(fixture.codestream(), 0);
    let mut cache = CacheModel::new(target.index(), 0);
    let stream = serve(&target, &mut cache, &ViewWindowRequest::new(0).level(1).layers(2));
    let data = rebuild(&stream, 1).unwrap().into_complete().unwrap();

    // The finest resolution is replaced by empty packets.
    let mut expected = fixture.main_header();
    for t in 0..4 {
        let mut body = Vec::new();
        for l in 0..2 {
            for r in 0..3 {
                if r == 2 {
                    body.push(0x00);
                } else {
                    body.extend_from_slice(&fixture.packet(t, l * 3 + r));
                }
            }
        }
        expected.extend_from_slice(
            &jpc::StartOfTileSegment::new(t as u16, 14 + body.len() as u32, 0, 1).encode(),
        );
        expected.extend_from_slice(&[0xFF, 0x93]);
        expected.extend_from_slice(&body);
    }
    expected.extend_from_slice(&[0xFF, 0xD9]);
    assert_eq!(data, expected);
}

#[test]
fn test_reduced_tile_parts() {
    let fixture = Fixture {
        parts_per_tile: 3,
        ..Default::default()
    };
    let target = common::open(fixture.codestream(), 0);
    let mut cache = CacheModel::new(target.index(), 0);
    let stream = serve(&target, &mut cache, &ViewWindowRequest::new(0).level(2));

    let mut expected = fixture.main_header();
    for t in 0..4 {
        let mut first = fixture.tile_parts(t).remove(0);
        first[11] = 1;
        expected.extend_from_slice(&first);
    }
    expected.extend_from_slice(&[0xFF, 0xD9]);
    assert_eq!(rebuild(&stream, 2).unwrap().data, expected);
    assert_eq!(rebuild(&stream, 0).unwrap().data, expected);
}

#[test]
fn test_missing_main_header() {
    let target = common::open(Fixture::default().codestream(), 0);
    let mut cache = CacheModel::new(target.index(), 0);
    cache.mark(BinRef::MainHeader);
    let stream = serve(&target, &mut cache, &ViewWindowRequest::new(0).level(0));
    assert!(!stream.is_empty());

    let result = rebuild(&stream, 0);
    assert!(matches!(result, Err(JPIPError::IncompleteHeader)));
    assert_eq!(result.unwrap_err().kind(), jpip::ErrorKind::IncompleteData);
}

#[test]
fn test_missing_tiles() {
    let fixture = Fixture::default();
    let target = common::open(fixture.codestream(), 0);
    let mut cache = CacheModel::new(target.index(), 0);
    let stream = serve(
        &target,
        &mut cache,
        &ViewWindowRequest::new(0).level(0).region((0, 0), (16, 16)),
    );

    let reconstruction = rebuild(&stream, 0).unwrap();
    assert_eq!(reconstruction.missing_tiles, vec![1, 2, 3]);

    let mut expected = fixture.main_header();
    expected.extend_from_slice(&fixture.tile_parts(0)[0]);
    for t in 1..4u16 {
        expected.extend_from_slice(&jpc::StartOfTileSegment::new(t, 14, 0, 1).encode());
        expected.extend_from_slice(&[0xFF, 0x93]);
    }
    expected.extend_from_slice(&[0xFF, 0xD9]);
    assert_eq!(reconstruction.data, expected);

    match reconstruction.into_complete() {
        Err(JPIPError::IncompleteRegion { missing_tiles }) => {
            assert_eq!(missing_tiles, vec![1, 2, 3])
        }
        other => panic!("expected IncompleteRegion, got {:?}", other),
    }
}

#[test]
fn test_reconstruction_is_repeatable() {
    let fixture = Fixture {
        parts_per_tile: 2,
        ..Default::default()
    };
    let target = common::open(fixture.codestream(), 0);
    let mut cache = CacheModel::new(target.index(), 0);
    let once = serve(&target, &mut cache, &ViewWindowRequest::new(0).level(0));

    let first = rebuild(&once, 0).unwrap();
    let second = rebuild(&once, 0).unwrap();
    assert_eq!(first, second);

    // The same messages delivered twice change nothing.
    let fresh = CacheModel::new(target.index(), 0);
    let enqueued = Enqueuer::new(&target, &fresh)
        .enqueue(&ViewWindowRequest::new(0).level(0))
        .unwrap();
    let mut writer = StreamWriter::new();
    let mut twice = Vec::new();
    for _ in 0..2 {
        writer.emit(&enqueued.queue, target.source(), &mut twice).unwrap();
        writer.end_of_response(EorReason::WindowDone, &mut twice).unwrap();
    }
    assert_eq!(rebuild(&twice, 0).unwrap(), first);
}

#[test]
fn test_jp2_round_trip() {
    let fixture = Fixture::default();
    let original = common::jp2(&fixture, &[common::xml_box("<caption>whole</caption>")]);
    let target = common::open(original.clone(), 0);
    let mut cache = CacheModel::new(target.index(), 0);
    let stream = serve(
        &target,
        &mut cache,
        &ViewWindowRequest::new(0)
            .level(0)
            .metadata(MetadataRequest::All),
    );

    let queue = parse_stream(&stream).unwrap();
    let sink = MemorySink::new();
    let reconstruction = reconstruct_jp2(&stream, &queue, 0, 0, &sink).unwrap();
    assert!(reconstruction.is_complete());
    assert_eq!(reconstruction.data, original);
    assert!(sink.warnings().is_empty());
}

#[test]
fn test_jp2_without_metadata_bin() {
    let fixture = Fixture::default();
    let target = common::open(common::jp2(&fixture, &[common::xml_box("<a/>")]), 0);
    let mut cache = CacheModel::new(target.index(), 0);
    let stream = serve(
        &target,
        &mut cache,
        &ViewWindowRequest::new(0)
            .level(0)
            .metadata(MetadataRequest::Bin(0)),
    );

    let queue = parse_stream(&stream).unwrap();
    let sink = MemorySink::new();
    let reconstruction = reconstruct_jp2(&stream, &queue, 0, 0, &sink).unwrap();
    assert_eq!(
        reconstruction.data,
        common::jp2(&fixture, &[]),
        "the undelivered XML box is left out"
    );
    assert_eq!(sink.warnings().len(), 1);
}

#[test]
fn test_jp2_missing_image_header() {
    let target = common::open(Fixture::default().codestream(), 0);
    let mut cache = CacheModel::new(target.index(), 0);
    let stream = serve(&target, &mut cache, &ViewWindowRequest::new(0).level(0));
    let queue = parse_stream(&stream).unwrap();
    assert!(matches!(
        reconstruct_jp2(&stream, &queue, 0, 0, &MemorySink::new()),
        Err(JPIPError::MissingIhdr)
    ));
}

#[test]
fn test_jp2_needs_top_level_bin() {
    let target = common::open(common::jp2(&Fixture::default(), &[]), 0);
    let mut cache = CacheModel::new(target.index(), 0);
    let stream = serve(&target, &mut cache, &ViewWindowRequest::new(0).level(0));
    let queue = parse_stream(&stream).unwrap();
    assert!(queue.iter().all(|m| m.class_id != jpip::ClassId::Metadata));
    assert!(matches!(
        reconstruct_jp2(&stream, &queue, 0, 0, &MemorySink::new()),
        Err(JPIPError::MissingIhdr)
    ));
    assert!(rebuild(&stream, 0).unwrap().is_complete());
}

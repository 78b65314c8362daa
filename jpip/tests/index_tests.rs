mod common;

use jp2::{
    encode_signature, FileTypeBox, JBox, BOX_TYPE_CONTIGUOUS_CODESTREAM, BOX_TYPE_FILE_TYPE,
    BOX_TYPE_HEADER, BOX_TYPE_SIGNATURE, BOX_TYPE_XML, PLACEHOLDER_FLAG_CODESTREAM,
    PLACEHOLDER_FLAG_ORIGINAL,
};
use jpip::metadata::MetadataEntry;
use jpip::{build_index, write_indexed_jp2, JPIPError, MemorySink, MemorySource};

use common::Fixture;

#[test]
fn test_scan_raw_codestream() {
    let fixture = Fixture {
        parts_per_tile: 2,
        ..Default::default()
    };
    let codestream = fixture.codestream();
    let sink = MemorySink::new();
    let index = build_index(&MemorySource::new(codestream.clone()), &sink).unwrap();

    assert!(!index.is_jp2);
    assert!(!index.from_index_box);
    assert_eq!(index.codestream_offset, 0);
    assert_eq!(index.codestream_length, codestream.len() as u64);
    assert_eq!(index.main_header_length(), fixture.main_header().len() as u64);
    assert_eq!(index.no_tiles(), 4);
    assert_eq!(index.levels(), 2);
    assert_eq!(index.layers(), 2);
    assert!(index.precincts.is_none());
    assert!(index.metadata.is_empty());
    assert!(sink.warnings().is_empty());

    let mut offset = index.main_header_length();
    for t in 0..4 {
        let parts = fixture.tile_parts(t);
        assert_eq!(index.tile_part_count(t), 2);
        for (entry, part) in index.tile_parts_of(t).zip(&parts) {
            assert_eq!(entry.offset, offset);
            assert_eq!(entry.length, part.len() as u64);
            assert_eq!(&codestream[entry.offset as usize..][..part.len()], &part[..]);
            offset += entry.length;
        }
        // No marker segments between SOT and SOD.
        let header = index.tile_headers[t as usize].unwrap();
        assert_eq!(header.length, 0);
    }
}

#[test]
fn test_scan_packet_lengths() {
    let fixture = Fixture {
        packet_lengths: true,
        ..Default::default()
    };
    let codestream = fixture.codestream();
    let index = build_index(&MemorySource::new(codestream.clone()), &MemorySink::new()).unwrap();

    let precincts = index.precincts.as_ref().unwrap();
    assert_eq!(precincts.len(), 1);
    for t in 0..4u32 {
        let header = index.tile_headers[t as usize].unwrap();
        assert_eq!(&codestream[header.offset as usize..][..2], &[0xFF, 0x58]);

        // One precinct per resolution; packets in LRCP order.
        for l in 0..2u16 {
            for s in 0..3u32 {
                let packet = index.precinct_packet(0, t, s, l).unwrap();
                let expected = fixture.packet(t, l as usize * 3 + s as usize);
                assert_eq!(
                    &codestream[packet.offset as usize..][..packet.length as usize],
                    &expected[..]
                );
            }
        }
        assert!(index.precinct_packet(0, t, 3, 0).is_none());
    }
}

#[test]
fn test_jp2_metadata_bins() {
    let fixture = Fixture::default();
    let bytes = common::jp2(&fixture, &[common::xml_box("<note/>")]);
    let index = build_index(&MemorySource::new(bytes.clone()), &MemorySink::new()).unwrap();

    assert!(index.is_jp2);
    assert!(!index.from_index_box);
    assert_eq!(
        &bytes[index.codestream_offset as usize..][..2],
        &[0xFF, 0x4F]
    );
    assert_eq!(index.codestream_length, fixture.codestream().len() as u64);
    assert_eq!(index.metadata.len(), 2);

    let root = index.metadata_bin(0).unwrap();
    let types: Vec<_> = root.entries.iter().map(|e| e.box_type()).collect();
    assert_eq!(
        types,
        vec![
            Some(BOX_TYPE_SIGNATURE),
            Some(BOX_TYPE_FILE_TYPE),
            Some(BOX_TYPE_HEADER),
            Some(BOX_TYPE_XML),
            Some(BOX_TYPE_CONTIGUOUS_CODESTREAM),
        ]
    );
    match &root.entries[0] {
        MetadataEntry::Box { offset, length, .. } => {
            assert_eq!((*offset, *length), (0, 12));
        }
        other => panic!("expected a copied box, got {:?}", other),
    }
    match &root.entries[3] {
        MetadataEntry::Placeholder(placeholder) => {
            assert_eq!(placeholder.flags(), PLACEHOLDER_FLAG_ORIGINAL);
            assert_eq!(placeholder.original_id(), 1);
            assert_eq!(placeholder.original_header().unwrap().box_length, 7);
        }
        other => panic!("expected a placeholder, got {:?}", other),
    }
    match &root.entries[4] {
        MetadataEntry::Placeholder(placeholder) => {
            assert_eq!(placeholder.flags(), PLACEHOLDER_FLAG_CODESTREAM);
            assert_eq!(placeholder.original_id(), 0);
        }
        other => panic!("expected a placeholder, got {:?}", other),
    }
    assert_eq!(root.referenced_bins(None), vec![1]);

    let xml = index.metadata_bin(1).unwrap();
    match &xml.entries[..] {
        [MetadataEntry::Contents { offset, length }] => {
            assert_eq!(&bytes[*offset as usize..][..*length as usize], b"<note/>");
        }
        other => panic!("expected raw contents, got {:?}", other),
    }
}

#[test]
fn test_index_box_matches_scan() {
    let fixture = Fixture {
        packet_lengths: true,
        parts_per_tile: 2,
        ..Default::default()
    };
    let raw = MemorySource::new(fixture.codestream());
    let sink = MemorySink::new();
    let scanned = build_index(&raw, &sink).unwrap();

    let wrapped = write_indexed_jp2(&raw, &sink).unwrap();
    let indexed = build_index(&MemorySource::new(wrapped.clone()), &sink).unwrap();
    assert!(sink.warnings().is_empty(), "{:?}", sink.warnings());

    assert!(indexed.is_jp2);
    assert!(indexed.from_index_box);
    assert_eq!(indexed.codestream_length, scanned.codestream_length);
    assert_eq!(indexed.main_header_length(), scanned.main_header_length());
    assert_eq!(indexed.tile_parts, scanned.tile_parts);
    assert_eq!(indexed.tile_headers, scanned.tile_headers);
    assert_eq!(indexed.precincts, scanned.precincts);
    assert_eq!(indexed.levels(), scanned.levels());
    assert_eq!(indexed.layers(), scanned.layers());
    assert_eq!(
        &wrapped[indexed.codestream_offset as usize..][..scanned.codestream_length as usize],
        &fixture.codestream()[..]
    );

    // The index box itself is not a metadata-bin.
    assert_eq!(indexed.metadata.len(), 1);
    assert_eq!(indexed.metadata[0].entries.len(), 4);
}

#[test]
fn test_index_box_without_packets() {
    let fixture = Fixture::default();
    let raw = MemorySource::new(common::jp2(&fixture, &[]));
    let wrapped = write_indexed_jp2(&raw, &MemorySink::new()).unwrap();
    let indexed = build_index(&MemorySource::new(wrapped), &MemorySink::new()).unwrap();
    let scanned = build_index(&raw, &MemorySink::new()).unwrap();

    assert!(indexed.from_index_box);
    assert!(indexed.precincts.is_none());
    assert_eq!(indexed.tile_parts, scanned.tile_parts);
    // Same boxes at the same offsets, the index box trailing the codestream.
    assert_eq!(indexed.metadata, scanned.metadata);
}

#[test]
fn test_corrupt_index_box_falls_back() {
    let fixture = Fixture::default();
    let mut wrapped =
        write_indexed_jp2(&MemorySource::new(fixture.codestream()), &MemorySink::new()).unwrap();

    let cidx = wrapped.windows(4).rposition(|w| w == b"cidx").unwrap();
    let cptr = cidx + wrapped[cidx..].windows(4).position(|w| w == b"cptr").unwrap();
    // COFF follows DR and CONT.
    wrapped[cptr + 8..cptr + 16].copy_from_slice(&3u64.to_be_bytes());

    let sink = MemorySink::new();
    let index = build_index(&MemorySource::new(wrapped), &sink).unwrap();
    assert!(!index.from_index_box);
    assert_eq!(index.no_tiles(), 4);
    let warnings = sink.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("scanning"));
}

#[test]
fn test_unrecognised_formats() {
    let sink = MemorySink::new();
    assert!(matches!(
        build_index(&MemorySource::new(b"GIF89a, not an image we serve".to_vec()), &sink),
        Err(JPIPError::NotJP2Format)
    ));
    assert!(matches!(
        build_index(&MemorySource::new(vec![0xFF]), &sink),
        Err(JPIPError::NotJP2Format)
    ));

    let mut no_codestream = encode_signature();
    no_codestream.extend_from_slice(&FileTypeBox::default().to_bytes());
    no_codestream.extend_from_slice(&common::image_header_box(&Fixture::default()));
    assert!(matches!(
        build_index(&MemorySource::new(no_codestream), &sink),
        Err(JPIPError::NoCodestream)
    ));
}

#[test]
fn test_truncated_codestream() {
    let fixture = Fixture::default();
    let mut codestream = fixture.codestream();
    // Cut inside the second tile-part.
    codestream.truncate(fixture.main_header().len() + fixture.tile_parts(0)[0].len() + 16);
    let result = build_index(&MemorySource::new(codestream), &MemorySink::new());
    assert!(result.is_err());
}

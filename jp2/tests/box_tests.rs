use std::io::Cursor;

use jp2::{
    decode_box_header, decode_box_tree, decode_boxes, decode_signature, encode_signature,
    BoxHeader, BoxWriter, CodestreamFinderBox, ColourSpecificationBox, FileTypeBox,
    FragmentArrayIndexBox, FragmentEntry, HeaderIndexTableBox, ImageHeaderBox, JBox, JP2Error,
    ManifestBox, ManifestEntry, MarkerIndexEntry, PlaceholderBox, BOX_TYPE_CODESTREAM_FINDER,
    BOX_TYPE_CODESTREAM_INDEX, BOX_TYPE_COLOUR_SPECIFICATION, BOX_TYPE_CONTIGUOUS_CODESTREAM,
    BOX_TYPE_FILE_TYPE, BOX_TYPE_HEADER, BOX_TYPE_HEADER_INDEX_TABLE, BOX_TYPE_IMAGE_HEADER,
    BOX_TYPE_XML, ENUMERATED_COLOUR_SPACE_SRGB, PLACEHOLDER_FLAG_CODESTREAM,
    PLACEHOLDER_FLAG_ORIGINAL,
};

fn decode_contents<T: JBox>(bytes: &[u8]) -> Result<T, JP2Error> {
    let header = BoxHeader::from_bytes(bytes)?;
    let mut reader = Cursor::new(&bytes[header.header_length as usize..]);
    T::decode(&mut reader, header.box_length)
}

#[test]
fn test_box_header_lengths() {
    let mut reader = Cursor::new(vec![0, 0, 0, 20, b'x', b'm', b'l', b' ']);
    let header = decode_box_header(&mut reader, 20).unwrap();
    assert_eq!(header.box_type, BOX_TYPE_XML);
    assert_eq!(header.box_length, 12);
    assert_eq!(header.header_length, 8);
    assert_eq!(header.total_length(), 20);

    // XLBox
    let mut bytes = vec![0, 0, 0, 1];
    bytes.extend_from_slice(&BOX_TYPE_CONTIGUOUS_CODESTREAM);
    bytes.extend_from_slice(&40u64.to_be_bytes());
    let header = decode_box_header(&mut Cursor::new(bytes), 100).unwrap();
    assert_eq!(header.header_length, 16);
    assert_eq!(header.box_length, 24);

    // LBox 0 runs to the end of the enclosing box.
    let mut bytes = vec![0, 0, 0, 0];
    bytes.extend_from_slice(&BOX_TYPE_CONTIGUOUS_CODESTREAM);
    let header = decode_box_header(&mut Cursor::new(bytes), 58).unwrap();
    assert_eq!(header.box_length, 50);
}

#[test]
fn test_box_header_errors() {
    let bytes = [0, 0, 0, 5, b'x', b'm', b'l', b' '];
    assert!(matches!(
        decode_box_header(&mut Cursor::new(bytes), 8),
        Err(JP2Error::BoxLengthReserved { length: 5, offset: 0 })
    ));

    let bytes = [0, 0, 0, 64, b'x', b'm', b'l', b' '];
    assert!(matches!(
        decode_box_header(&mut Cursor::new(bytes), 32),
        Err(JP2Error::BoxOverflow { length: 64, .. })
    ));

    assert!(matches!(
        decode_box_header(&mut Cursor::new([0, 0, 0]), 8),
        Err(JP2Error::Io(_))
    ));
}

#[test]
fn test_box_header_encode() {
    let small = BoxHeader::new(BOX_TYPE_XML, 12);
    assert_eq!(small.encode(), vec![0, 0, 0, 20, b'x', b'm', b'l', b' ']);
    assert_eq!(BoxHeader::from_bytes(&small.encode()).unwrap(), small);

    let large = BoxHeader::new(BOX_TYPE_CONTIGUOUS_CODESTREAM, 1 << 33);
    assert_eq!(large.header_length, 16);
    let bytes = large.encode();
    assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
    assert_eq!(BoxHeader::from_bytes(&bytes).unwrap(), large);
}

#[test]
fn test_signature() {
    let signature = encode_signature();
    assert_eq!(signature.len(), 12);
    assert!(decode_signature(&mut Cursor::new(signature.clone())).is_ok());

    let mut wrong = signature;
    wrong[11] = 0x0B;
    assert!(matches!(
        decode_signature(&mut Cursor::new(wrong)),
        Err(JP2Error::InvalidSignature { .. })
    ));
}

#[test]
fn test_box_tree() {
    let mut jp2h = BoxWriter::new(BOX_TYPE_HEADER);
    jp2h.write_bytes(&ImageHeaderBox::new(640, 480, 3, 8, false).to_bytes());
    let mut file = encode_signature();
    file.extend_from_slice(&FileTypeBox::default().to_bytes());
    jp2h.finish_into(&mut file);
    let mut xml = BoxWriter::new(BOX_TYPE_XML);
    xml.write_bytes(b"<a/>");
    xml.finish_into(&mut file);

    let length = file.len() as u64;
    let mut reader = Cursor::new(file);
    let top = decode_boxes(&mut reader, 0, length).unwrap();
    assert_eq!(top.len(), 4);
    assert_eq!(top[1].box_type(), BOX_TYPE_FILE_TYPE);
    assert_eq!(top[3].end(), length);

    let tree = decode_box_tree(&mut reader, 0, length).unwrap();
    let header = tree.find(None, BOX_TYPE_HEADER).unwrap();
    let ihdr = tree.find(Some(header), BOX_TYPE_IMAGE_HEADER).unwrap();
    let node = tree.get(ihdr).unwrap();
    assert_eq!(node.parent, Some(header));
    assert_eq!(node.contents_length(), 14);
    assert_eq!(tree.roots().len(), 4);
    assert!(tree.find(None, BOX_TYPE_IMAGE_HEADER).is_none());

    reader.set_position(node.contents_offset());
    let decoded = ImageHeaderBox::decode(&mut reader, node.contents_length()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (640, 480));
    assert_eq!(decoded.components_num(), 3);
    assert_eq!(decoded.components_bits(), 8);
}

#[test]
fn test_box_overflowing_superbox() {
    let mut file = vec![0, 0, 0, 16];
    file.extend_from_slice(&BOX_TYPE_HEADER);
    file.extend_from_slice(&[0, 0, 0, 20]);
    file.extend_from_slice(&BOX_TYPE_IMAGE_HEADER);
    let length = file.len() as u64;
    assert!(matches!(
        decode_box_tree(&mut Cursor::new(file), 0, length),
        Err(JP2Error::BoxOverflow { .. })
    ));
}

#[test]
fn test_placeholder() {
    let original = BoxHeader::new(BOX_TYPE_XML, 300);
    let placeholder = PlaceholderBox::new(PLACEHOLDER_FLAG_ORIGINAL, 5, &original);
    let bytes = placeholder.to_bytes();
    assert_eq!(bytes.len() as u64, placeholder.length());
    assert_eq!(placeholder.length(), 28);

    let decoded = PlaceholderBox::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, placeholder);
    assert_eq!(decoded.original_id(), 5);
    assert_eq!(decoded.original_header().unwrap(), original);

    let codestream = PlaceholderBox::new(
        PLACEHOLDER_FLAG_CODESTREAM,
        0,
        &BoxHeader::new(BOX_TYPE_CONTIGUOUS_CODESTREAM, 1 << 32),
    );
    assert_eq!(codestream.length(), 36);
    assert!(PlaceholderBox::from_bytes(&bytes[..20]).is_err());
}

#[test]
fn test_fragment_array_versions() {
    let rows = vec![
        vec![FragmentEntry::new(100, 20), FragmentEntry::new(120, 30)],
        vec![FragmentEntry::new(150, 40)],
    ];
    let faix = FragmentArrayIndexBox::from_rows(&rows);
    assert_eq!(faix.version(), 0);
    assert_eq!(faix.max_fragments(), 2);
    assert_eq!(faix.rows(), 2);
    assert_eq!(faix.fragment_count(1), 1);
    assert!(faix.row(1)[1].is_padding());
    assert!(faix.get(0, 2).is_none());
    assert_eq!(decode_contents::<FragmentArrayIndexBox>(&faix.to_bytes()).unwrap(), faix);

    let wide = FragmentArrayIndexBox::from_rows(&[vec![FragmentEntry::new(1 << 33, 8)]]);
    assert_eq!(wide.version(), 1);
    assert_eq!(decode_contents::<FragmentArrayIndexBox>(&wide.to_bytes()).unwrap(), wide);

    let with_aux = FragmentArrayIndexBox::from_rows(&[vec![FragmentEntry {
        offset: 10,
        length: 5,
        aux: 2,
    }]]);
    assert_eq!(with_aux.version(), 2);
    let decoded = decode_contents::<FragmentArrayIndexBox>(&with_aux.to_bytes()).unwrap();
    assert_eq!(decoded.get(0, 0).unwrap().aux, 2);

    let mut bad = faix.to_bytes();
    bad.pop();
    bad[3] -= 1;
    assert!(decode_contents::<FragmentArrayIndexBox>(&bad).is_err());
}

#[test]
fn test_index_boxes() {
    let cptr = CodestreamFinderBox::new(85, 4000);
    let bytes = cptr.to_bytes();
    assert_eq!(&bytes[4..8], &BOX_TYPE_CODESTREAM_FINDER);
    let decoded: CodestreamFinderBox = decode_contents(&bytes).unwrap();
    assert!(decoded.is_contiguous());
    assert_eq!((decoded.offset(), decoded.length()), (85, 4000));

    let mhix = HeaderIndexTableBox::new(
        71,
        vec![
            MarkerIndexEntry {
                marker: 0xFF51,
                remaining: 0,
                offset: 2,
                length: 41,
            },
            MarkerIndexEntry {
                marker: 0xFF52,
                remaining: 0,
                offset: 45,
                length: 12,
            },
        ],
    );
    let bytes = mhix.to_bytes();
    assert_eq!(&bytes[4..8], &BOX_TYPE_HEADER_INDEX_TABLE);
    let decoded: HeaderIndexTableBox = decode_contents(&bytes).unwrap();
    assert_eq!(decoded, mhix);
    assert_eq!(decoded.find(0xFF52).unwrap().offset, 45);

    let manf = ManifestBox::new(vec![ManifestEntry {
        length: bytes.len() as u32,
        box_type: BOX_TYPE_HEADER_INDEX_TABLE,
    }]);
    let decoded: ManifestBox = decode_contents(&manf.to_bytes()).unwrap();
    assert_eq!(decoded, manf);

    let mut cidx = BoxWriter::new(BOX_TYPE_CODESTREAM_INDEX);
    cidx.write_bytes(&cptr.to_bytes());
    cidx.write_bytes(&manf.to_bytes());
    cidx.write_bytes(&mhix.to_bytes());
    let cidx = cidx.finish();
    let length = cidx.len() as u64;
    let tree = decode_box_tree(&mut Cursor::new(cidx), 0, length).unwrap();
    let root = tree.find(None, BOX_TYPE_CODESTREAM_INDEX).unwrap();
    assert_eq!(tree.children(Some(root)).len(), 3);
}

#[test]
fn test_colour_specification() {
    let srgb = ColourSpecificationBox::enumerated(ENUMERATED_COLOUR_SPACE_SRGB);
    let decoded: ColourSpecificationBox = decode_contents(&srgb.to_bytes()).unwrap();
    assert_eq!(decoded.enumerated_colour_space(), Some(ENUMERATED_COLOUR_SPACE_SRGB));

    // A restricted ICC profile is skipped and the next box still decodes.
    let mut bytes = BoxHeader::new(BOX_TYPE_COLOUR_SPECIFICATION, 3 + 6).encode();
    bytes.extend_from_slice(&[2, 0, 0, 1, 2, 3, 4, 5, 6]);
    let length = bytes.len() as u64;
    bytes.extend_from_slice(&srgb.to_bytes());
    let mut reader = Cursor::new(&bytes[8..]);
    let profile = ColourSpecificationBox::decode(&mut reader, length - 8).unwrap();
    assert_eq!(profile.enumerated_colour_space(), None);
    assert_eq!(reader.position(), length - 8);
}

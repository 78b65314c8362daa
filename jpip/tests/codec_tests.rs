mod common;

use jpip::vbas::{decode_vbas, encode_vbas, vbas_len, BinIdHeader};
use jpip::{
    encode_response, parse_stream, CacheModel, ClassId, Enqueuer, EorReason, JPIPError,
    MessageQueue, StreamParser, StreamWriter, ViewWindowRequest,
};

use common::Fixture;

fn vbas(value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    encode_vbas(value, &mut out);
    out
}

#[test]
fn test_vbas_known_values() {
    assert_eq!(vbas(0), vec![0x00]);
    assert_eq!(vbas(127), vec![0x7F]);
    assert_eq!(vbas(128), vec![0x81, 0x00]);
    assert_eq!(vbas(16_383), vec![0xFF, 0x7F]);
    assert_eq!(vbas(16_384), vec![0x81, 0x80, 0x00]);
}

#[test]
fn test_vbas_minimal_length() {
    for value in [0u64, 1, 127, 128, 300, (1 << 14) - 1, 1 << 14, 1 << 21, 1 << 35, (1 << 56) - 1] {
        let bits = 64 - value.leading_zeros() as usize;
        let expected = ((bits + 6) / 7).max(1);
        let bytes = vbas(value);
        assert_eq!(bytes.len(), expected, "length of {}", value);
        assert_eq!(vbas_len(value), expected);
        assert_eq!(decode_vbas(&bytes, 0).unwrap(), (value, expected));
    }
}

#[test]
fn test_vbas_truncated() {
    match decode_vbas(&[0x81, 0x80], 0) {
        Err(JPIPError::Truncated { offset }) => assert_eq!(offset, 2),
        other => panic!("expected Truncated, got {:?}", other),
    }
    match decode_vbas(&[], 0) {
        Err(JPIPError::Truncated { offset }) => assert_eq!(offset, 0),
        other => panic!("expected Truncated, got {:?}", other),
    }
}

#[test]
fn test_vbas_overflow() {
    let mut bytes = vec![0xFF; 10];
    bytes.push(0x7F);
    assert!(matches!(
        decode_vbas(&bytes, 0),
        Err(JPIPError::ParseError { offset: 0 })
    ));
}

#[test]
fn test_bin_id_header_new_class_and_csn() {
    let header = BinIdHeader {
        bb: 3,
        last_byte: true,
        in_class_id: 0,
    };
    let mut out = Vec::new();
    header.encode(&mut out);
    assert_eq!(out, vec![0x70]);
    assert_eq!(BinIdHeader::decode(&out, 0).unwrap(), (header, 1));
}

#[test]
fn test_bin_id_header_continues() {
    let header = BinIdHeader {
        bb: 1,
        last_byte: false,
        in_class_id: 300,
    };
    let mut out = Vec::new();
    header.encode(&mut out);
    assert_eq!(out, vec![0xA2, 0x2C]);
    assert_eq!(header.encoded_len(), 2);
    assert_eq!(BinIdHeader::decode(&out, 0).unwrap(), (header, 2));

    let large = BinIdHeader {
        bb: 2,
        last_byte: true,
        in_class_id: 1 << 40,
    };
    let mut out = Vec::new();
    large.encode(&mut out);
    assert_eq!(BinIdHeader::decode(&out, 0).unwrap(), (large, out.len()));
}

fn full_response(fixture: &Fixture) -> (jpip::Target, Vec<u8>, MessageQueue) {
    let target = common::open(fixture.codestream(), 0);
    let cache = CacheModel::new(target.index(), 0);
    let enqueued = Enqueuer::new(&target, &cache)
        .enqueue(&ViewWindowRequest::new(0).level(0))
        .unwrap();
    let bytes = encode_response(&enqueued.queue, target.source(), EorReason::WindowDone).unwrap();
    (target, bytes, enqueued.queue)
}

#[test]
fn test_stream_parse_matches_queue() {
    let fixture = Fixture {
        parts_per_tile: 2,
        ..Default::default()
    };
    let (target, bytes, sent) = full_response(&fixture);
    let received = parse_stream(&bytes).unwrap();

    assert_eq!(received.len(), sent.len());
    for (sent, received) in sent.iter().zip(received.iter()) {
        assert_eq!(received.class_id, sent.class_id);
        assert_eq!(received.in_class_id, sent.in_class_id);
        assert_eq!(received.csn, sent.csn);
        assert_eq!(received.bin_offset, sent.bin_offset);
        assert_eq!(received.length, sent.length);
        assert_eq!(received.aux, sent.aux);
        assert_eq!(received.last_byte, sent.last_byte);
        assert_eq!(
            MessageQueue::payload(&bytes, received).unwrap(),
            target.read_at(sent.res_offset, sent.length).unwrap().as_slice()
        );
    }
    assert_eq!(&bytes[bytes.len() - 3..], &[0x00, 0x01, 0x00]);
}

#[test]
fn test_stream_header_compression() {
    let (_, bytes, sent) = full_response(&Fixture::default());
    // Main header first: new class and csn.
    assert_eq!((bytes[0] >> 5) & 0b11, 3);
    assert_eq!(sent.messages()[0].class_id, ClassId::MainHeader);

    // The second message switches to tile data of the same codestream.
    let received = parse_stream(&bytes).unwrap();
    let second = &received.messages()[1];
    assert_eq!(second.class_id, ClassId::ExtTile);
    let header_start = (received.messages()[0].res_offset + received.messages()[0].length) as usize;
    assert_eq!((bytes[header_start] >> 5) & 0b11, 2);

    // The third stays on the same class.
    let third_start = (second.res_offset + second.length) as usize;
    assert_eq!((bytes[third_start] >> 5) & 0b11, 1);
}

#[test]
fn test_stream_parser_byte_by_byte() {
    let (_, bytes, _) = full_response(&Fixture::default());
    let whole = parse_stream(&bytes).unwrap();

    let mut parser = StreamParser::new();
    let mut decoded = 0;
    for byte in &bytes {
        decoded += parser.feed(std::slice::from_ref(byte)).unwrap();
    }
    parser.finish().unwrap();
    assert_eq!(decoded, whole.len());
    assert_eq!(parser.queue(), &whole);
    assert_eq!(parser.last_eor(), Some(EorReason::WindowDone));
}

#[test]
fn test_stream_parser_truncated_tail() {
    let (_, bytes, _) = full_response(&Fixture::default());
    let mut parser = StreamParser::new();
    parser.feed(&bytes[..bytes.len() - 5]).unwrap();
    assert!(matches!(parser.finish(), Err(JPIPError::Truncated { .. })));
    parser.feed(&bytes[bytes.len() - 5..]).unwrap();
    assert!(parser.finish().is_ok());
}

#[test]
fn test_stream_without_context() {
    // bb = 1 as the very first message.
    let bytes = [0x20, 0x00, 0x01, 0xAA];
    assert!(matches!(
        parse_stream(&bytes),
        Err(JPIPError::ParseError { offset: 0 })
    ));
}

#[test]
fn test_each_response_starts_fresh() {
    let target = common::open(Fixture::default().codestream(), 0);
    let mut cache = CacheModel::new(target.index(), 0);
    let mut writer = StreamWriter::new();
    let mut bytes = Vec::new();

    let first = Enqueuer::new(&target, &cache)
        .enqueue(&ViewWindowRequest::new(0))
        .unwrap();
    writer.emit(&first.queue, target.source(), &mut bytes).unwrap();
    writer.end_of_response(EorReason::WindowDone, &mut bytes).unwrap();
    cache.commit(&first.marks);
    let split = bytes.len();

    let second = Enqueuer::new(&target, &cache)
        .enqueue(&ViewWindowRequest::new(0).level(0))
        .unwrap();
    writer.emit(&second.queue, target.source(), &mut bytes).unwrap();
    writer.end_of_response(EorReason::WindowDone, &mut bytes).unwrap();

    // The first message after an EOR carries its class and csn.
    assert_eq!((bytes[split] >> 5) & 0b11, 3);
    let alone = parse_stream(&bytes[split..]).unwrap();
    assert_eq!(alone.len(), second.queue.len());

    let received = parse_stream(&bytes).unwrap();
    assert_eq!(received.len(), first.queue.len() + second.queue.len());
    assert!(received
        .iter()
        .skip(1)
        .all(|m| m.class_id == ClassId::ExtTile && m.csn == 0));
}

#[test]
fn test_parser_forgets_context_at_eor() {
    let target = common::open(Fixture::default().codestream(), 0);
    let cache = CacheModel::new(target.index(), 0);
    let enqueued = Enqueuer::new(&target, &cache)
        .enqueue(&ViewWindowRequest::new(0).level(0))
        .unwrap();
    let response = encode_response(&enqueued.queue, target.source(), EorReason::WindowDone).unwrap();

    // A message relying on the previous class after an EOR is malformed.
    let mut bytes = response.clone();
    bytes.extend_from_slice(&[0x20, 0x00, 0x00]);
    let mut parser = StreamParser::new();
    assert!(matches!(parser.feed(&bytes), Err(JPIPError::ParseError { .. })));
    assert_eq!(parser.queue().len(), enqueued.queue.len());
    assert_eq!(parser.last_eor(), Some(EorReason::WindowDone));
}

#[test]
fn test_eor_reason_codes() {
    assert_eq!(EorReason::WindowDone.code(), 0x01);
    assert_eq!(EorReason::ByteLimit.code(), 0x02);
    assert_eq!(EorReason::from_code(0x02), EorReason::ByteLimit);
    assert_eq!(EorReason::from_code(0x04), EorReason::Other(0x04));
}

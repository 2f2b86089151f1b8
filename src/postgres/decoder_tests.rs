use bytes::{BufMut, BytesMut};

use super::decoder::*;
use super::types::{ColumnValue, LogicalMessage, Lsn};

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put(s.as_bytes());
    buf.put_u8(0);
}

fn begin_message(final_lsn: u64, xid: u32) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(b'B');
    buf.put_u64(final_lsn);
    buf.put_i64(0); // commit timestamp
    buf.put_u32(xid);
    buf
}

fn commit_message(commit_lsn: u64, end_lsn: u64) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(b'C');
    buf.put_u8(0); // flags
    buf.put_u64(commit_lsn);
    buf.put_u64(end_lsn);
    buf.put_i64(0);
    buf
}

fn relation_message(id: u32, schema: &str, table: &str, columns: &[(&str, u32, bool)]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(b'R');
    buf.put_u32(id);
    put_cstr(&mut buf, schema);
    put_cstr(&mut buf, table);
    buf.put_u8(b'd'); // replica identity default
    buf.put_u16(columns.len() as u16);

    for (name, oid, key) in columns {
        buf.put_u8(if *key { 1 } else { 0 });
        put_cstr(&mut buf, name);
        buf.put_u32(*oid);
        buf.put_i32(-1);
    }

    buf
}

fn put_tuple(buf: &mut BytesMut, values: &[Option<&str>]) {
    buf.put_u16(values.len() as u16);

    for value in values {
        match value {
            Some(v) => {
                buf.put_u8(b't');
                buf.put_u32(v.len() as u32);
                buf.put(v.as_bytes());
            }
            None => buf.put_u8(b'n'),
        }
    }
}

fn insert_message(relation_id: u32, values: &[Option<&str>]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(b'I');
    buf.put_u32(relation_id);
    buf.put_u8(b'N');
    put_tuple(&mut buf, values);
    buf
}

#[test]
fn test_parse_begin() {
    let buf = begin_message(0x0158_C328, 762);

    match parse_logical_message(&buf, false).unwrap().unwrap() {
        LogicalMessage::Begin(m) => {
            assert_eq!(m.final_lsn, Lsn(0x0158_C328));
            assert_eq!(m.xid, 762);
        }
        other => panic!("expected Begin, got {other:?}"),
    }
}

#[test]
fn test_parse_commit() {
    let buf = commit_message(22_570_448, 22_570_496);

    match parse_logical_message(&buf, false).unwrap().unwrap() {
        LogicalMessage::Commit(m) => {
            assert_eq!(m.commit_lsn, Lsn(22_570_448));
            assert_eq!(m.end_lsn, Lsn(22_570_496));
            assert_eq!(m.flags, 0);
        }
        other => panic!("expected Commit, got {other:?}"),
    }
}

#[test]
fn test_parse_relation() {
    let buf = relation_message(
        16394,
        "public",
        "names",
        &[("id", 23, true), ("name", 25, false)],
    );

    match parse_logical_message(&buf, false).unwrap().unwrap() {
        LogicalMessage::Relation(m) => {
            assert_eq!(m.id, 16394);
            assert_eq!(m.namespace, "public");
            assert_eq!(m.name, "names");
            assert_eq!(m.replica_identity, b'd');
            assert_eq!(m.columns.len(), 2);
            assert_eq!(m.columns[0].name, "id");
            assert_eq!(m.columns[0].type_oid, 23);
            assert!(m.columns[0].key());
            assert_eq!(m.columns[1].name, "name");
            assert!(!m.columns[1].key());
            assert_eq!(m.columns[1].type_modifier, -1);
        }
        other => panic!("expected Relation, got {other:?}"),
    }
}

#[test]
fn test_parse_insert() {
    let buf = insert_message(16394, &[Some("1"), Some("hello"), None]);

    match parse_logical_message(&buf, false).unwrap().unwrap() {
        LogicalMessage::Insert(m) => {
            assert_eq!(m.relation_id, 16394);
            assert_eq!(m.new_tuple.columns.len(), 3);
            assert!(matches!(&m.new_tuple.columns[0], ColumnValue::Text(s) if s == "1"));
            assert!(matches!(&m.new_tuple.columns[1], ColumnValue::Text(s) if s == "hello"));
            assert!(matches!(m.new_tuple.columns[2], ColumnValue::Null));
        }
        other => panic!("expected Insert, got {other:?}"),
    }
}

#[test]
fn test_parse_insert_binary_and_toast_columns() {
    let mut buf = BytesMut::new();
    buf.put_u8(b'I');
    buf.put_u32(1);
    buf.put_u8(b'N');
    buf.put_u16(2);
    buf.put_u8(b'b');
    buf.put_u32(2);
    buf.put(&[0xDE, 0xAD][..]);
    buf.put_u8(b'u');

    match parse_logical_message(&buf, false).unwrap().unwrap() {
        LogicalMessage::Insert(m) => {
            assert!(matches!(&m.new_tuple.columns[0], ColumnValue::Binary(b) if b[..] == [0xDE, 0xAD]));
            assert!(matches!(
                m.new_tuple.columns[1],
                ColumnValue::UnchangedToast
            ));
        }
        other => panic!("expected Insert, got {other:?}"),
    }
}

#[test]
fn test_parse_update_without_old_tuple() {
    let mut buf = BytesMut::new();
    buf.put_u8(b'U');
    buf.put_u32(16394);
    buf.put_u8(b'N');
    put_tuple(&mut buf, &[Some("1"), Some("updated")]);

    match parse_logical_message(&buf, false).unwrap().unwrap() {
        LogicalMessage::Update(m) => {
            assert!(m.old_tuple.is_none());
            assert_eq!(m.new_tuple.columns.len(), 2);
        }
        other => panic!("expected Update, got {other:?}"),
    }
}

#[test]
fn test_parse_update_with_key_tuple() {
    let mut buf = BytesMut::new();
    buf.put_u8(b'U');
    buf.put_u32(16394);
    buf.put_u8(b'K');
    put_tuple(&mut buf, &[Some("1"), None]);
    buf.put_u8(b'N');
    put_tuple(&mut buf, &[Some("2"), Some("moved")]);

    match parse_logical_message(&buf, false).unwrap().unwrap() {
        LogicalMessage::Update(m) => {
            let old = m.old_tuple.expect("old tuple");
            assert!(matches!(&old.columns[0], ColumnValue::Text(s) if s == "1"));
            assert!(matches!(&m.new_tuple.columns[1], ColumnValue::Text(s) if s == "moved"));
        }
        other => panic!("expected Update, got {other:?}"),
    }
}

#[test]
fn test_parse_delete() {
    let mut buf = BytesMut::new();
    buf.put_u8(b'D');
    buf.put_u32(16394);
    buf.put_u8(b'O');
    put_tuple(&mut buf, &[Some("1"), Some("gone")]);

    match parse_logical_message(&buf, false).unwrap().unwrap() {
        LogicalMessage::Delete(m) => {
            assert_eq!(m.relation_id, 16394);
            assert_eq!(m.old_tuple.columns.len(), 2);
        }
        other => panic!("expected Delete, got {other:?}"),
    }
}

#[test]
fn test_parse_truncate() {
    let mut buf = BytesMut::new();
    buf.put_u8(b'T');
    buf.put_u32(2);
    buf.put_u8(0);
    buf.put_u32(16394);
    buf.put_u32(16401);

    match parse_logical_message(&buf, false).unwrap().unwrap() {
        LogicalMessage::Truncate(m) => {
            assert_eq!(m.relation_ids, vec![16394, 16401]);
            assert_eq!(m.options, 0);
        }
        other => panic!("expected Truncate, got {other:?}"),
    }
}

#[test]
fn test_parse_logical_decoding_message() {
    let mut buf = BytesMut::new();
    buf.put_u8(b'M');
    buf.put_u8(1); // transactional
    buf.put_u64(42);
    put_cstr(&mut buf, "wal_hook");
    buf.put_u32(5);
    buf.put(&b"hello"[..]);

    match parse_logical_message(&buf, false).unwrap().unwrap() {
        LogicalMessage::LogicalDecoding(m) => {
            assert!(m.transactional);
            assert_eq!(m.lsn, Lsn(42));
            assert_eq!(m.prefix, "wal_hook");
            assert_eq!(&m.content[..], b"hello");
        }
        other => panic!("expected LogicalDecoding, got {other:?}"),
    }
}

#[test]
fn test_parse_stream_messages() {
    let mut buf = BytesMut::new();
    buf.put_u8(b'S');
    buf.put_u32(9);
    buf.put_u8(1);

    assert!(matches!(
        parse_logical_message(&buf, false).unwrap().unwrap(),
        LogicalMessage::StreamStart {
            xid: 9,
            first_segment: true
        }
    ));

    assert!(matches!(
        parse_logical_message(&[b'E'], true).unwrap().unwrap(),
        LogicalMessage::StreamStop
    ));

    let mut buf = BytesMut::new();
    buf.put_u8(b'c');
    buf.put_u32(9);
    buf.put_u8(0);
    buf.put_u64(100);
    buf.put_u64(200);
    buf.put_i64(0);

    assert!(matches!(
        parse_logical_message(&buf, false).unwrap().unwrap(),
        LogicalMessage::StreamCommit {
            xid: 9,
            commit_lsn: Lsn(100),
            end_lsn: Lsn(200)
        }
    ));

    let mut buf = BytesMut::new();
    buf.put_u8(b'A');
    buf.put_u32(9);
    buf.put_u32(10);

    assert!(matches!(
        parse_logical_message(&buf, false).unwrap().unwrap(),
        LogicalMessage::StreamAbort { xid: 9, subxid: 10 }
    ));
}

#[test]
fn test_in_stream_messages_carry_xid_prefix() {
    let mut buf = BytesMut::new();
    buf.put_u8(b'I');
    buf.put_u32(77); // xid prefix, present inside a stream
    buf.put_u32(16394);
    buf.put_u8(b'N');
    put_tuple(&mut buf, &[Some("1")]);

    match parse_logical_message(&buf, true).unwrap().unwrap() {
        LogicalMessage::Insert(m) => assert_eq!(m.relation_id, 16394),
        other => panic!("expected Insert, got {other:?}"),
    }

    // Without stream context the xid prefix misaligns the tuple parse.
    assert!(parse_logical_message(&buf, false).is_err());
}

#[test]
fn test_unknown_tag_is_ignored() {
    assert!(parse_logical_message(&[b'Z', 1, 2, 3], false)
        .unwrap()
        .is_none());
}

#[test]
fn test_truncated_message_is_an_error() {
    let buf = begin_message(1, 1);
    assert!(parse_logical_message(&buf[..5], false).is_err());
}

#[test]
fn test_parse_keepalive() {
    let mut buf = BytesMut::new();
    buf.put_u64(0x0158_C328);
    buf.put_i64(734_269_123_270_804);
    buf.put_u8(1);

    let keepalive = parse_keepalive(&buf).unwrap();
    assert_eq!(keepalive.wal_end, Lsn(0x0158_C328));
    assert!(keepalive.reply_requested);

    buf[16] = 0;
    assert!(!parse_keepalive(&buf).unwrap().reply_requested);
}

#[test]
fn test_parse_xlog_data() {
    let mut buf = BytesMut::new();
    buf.put_u64(100);
    buf.put_u64(200);
    buf.put_i64(0);
    buf.put(&b"payload"[..]);

    let xld = parse_xlog_data(&buf).unwrap();
    assert_eq!(xld.wal_start, Lsn(100));
    assert_eq!(xld.wal_end, Lsn(200));
    assert_eq!(&xld.data[..], b"payload");
}

//! Parser for the pgoutput logical replication protocol, version 2.
//!
//! The walsender wraps every payload in a CopyData frame whose first byte is
//! either a primary keepalive (`k`) or XLogData (`w`). XLogData carries one
//! logical message, decoded here into [`LogicalMessage`]. Message tags this
//! parser does not know are dropped, not treated as errors.

use bytes::Bytes;
use tracing::debug;

use crate::postgres::buf::Cursor;
use crate::postgres::types::{
    BeginMessage, ColumnValue, CommitMessage, DeleteMessage, InsertMessage, Keepalive,
    LogicalDecodingMessage, LogicalMessage, Lsn, OriginMessage, RelationColumn, RelationMessage,
    TruncateMessage, TupleData, TypeMessage, UpdateMessage, XLogData,
};
use crate::{Error, Result};

/// Parses the body of a primary keepalive frame (after the `k` tag byte).
pub fn parse_keepalive(body: &[u8]) -> Result<Keepalive> {
    let mut cur = Cursor::new(body);

    Ok(Keepalive {
        wal_end: Lsn(cur.u64_be()?),
        timestamp: cur.i64_be()?,
        reply_requested: cur.take(1)?[0] != 0,
    })
}

/// Parses the body of an XLogData frame (after the `w` tag byte).
pub fn parse_xlog_data(body: &[u8]) -> Result<XLogData> {
    let mut cur = Cursor::new(body);

    let wal_start = Lsn(cur.u64_be()?);
    let wal_end = Lsn(cur.u64_be()?);
    let timestamp = cur.i64_be()?;
    let data = Bytes::copy_from_slice(cur.take(cur.remaining())?);

    Ok(XLogData {
        wal_start,
        wal_end,
        timestamp,
        data,
    })
}

/// Decodes one logical message from an XLogData payload. `in_stream` must be
/// true between StreamStart and StreamStop: transactional messages inside a
/// stream carry an extra xid prefix.
pub fn parse_logical_message(data: &[u8], in_stream: bool) -> Result<Option<LogicalMessage>> {
    let mut cur = Cursor::new(data);
    let tag = cur.take(1)?[0];

    if in_stream && matches!(tag, b'R' | b'Y' | b'I' | b'U' | b'D' | b'T' | b'M') {
        let _xid = cur.u32_be()?;
    }

    let msg = match tag {
        b'B' => LogicalMessage::Begin(BeginMessage {
            final_lsn: Lsn(cur.u64_be()?),
            timestamp: cur.i64_be()?,
            xid: cur.u32_be()?,
        }),
        b'C' => LogicalMessage::Commit(CommitMessage {
            flags: cur.take(1)?[0],
            commit_lsn: Lsn(cur.u64_be()?),
            end_lsn: Lsn(cur.u64_be()?),
            timestamp: cur.i64_be()?,
        }),
        b'O' => LogicalMessage::Origin(OriginMessage {
            commit_lsn: Lsn(cur.u64_be()?),
            name: cstr(&mut cur)?,
        }),
        b'R' => LogicalMessage::Relation(parse_relation(&mut cur)?),
        b'Y' => LogicalMessage::Type(TypeMessage {
            oid: cur.u32_be()?,
            namespace: cstr(&mut cur)?,
            name: cstr(&mut cur)?,
        }),
        b'I' => {
            let relation_id = cur.u32_be()?;
            expect_tuple_tag(&mut cur, b'N')?;
            LogicalMessage::Insert(InsertMessage {
                relation_id,
                new_tuple: parse_tuple(&mut cur)?,
            })
        }
        b'U' => {
            let relation_id = cur.u32_be()?;
            let mut old_tuple = None;

            let mut tag = cur.take(1)?[0];
            if tag == b'K' || tag == b'O' {
                old_tuple = Some(parse_tuple(&mut cur)?);
                tag = cur.take(1)?[0];
            }

            if tag != b'N' {
                return Err(Error::Protocol(format!(
                    "unexpected tuple tag {:?} in update message",
                    tag as char
                )));
            }

            LogicalMessage::Update(UpdateMessage {
                relation_id,
                old_tuple,
                new_tuple: parse_tuple(&mut cur)?,
            })
        }
        b'D' => {
            let relation_id = cur.u32_be()?;
            let tag = cur.take(1)?[0];

            if tag != b'K' && tag != b'O' {
                return Err(Error::Protocol(format!(
                    "unexpected tuple tag {:?} in delete message",
                    tag as char
                )));
            }

            LogicalMessage::Delete(DeleteMessage {
                relation_id,
                old_tuple: parse_tuple(&mut cur)?,
            })
        }
        b'T' => {
            let nrelations = cur.u32_be()?;
            let options = cur.take(1)?[0];

            let mut relation_ids = Vec::with_capacity(nrelations as usize);
            for _ in 0..nrelations {
                relation_ids.push(cur.u32_be()?);
            }

            LogicalMessage::Truncate(TruncateMessage {
                options,
                relation_ids,
            })
        }
        b'M' => {
            let flags = cur.take(1)?[0];
            let lsn = Lsn(cur.u64_be()?);
            let prefix = cstr(&mut cur)?;
            let len = cur.u32_be()?;
            let content = Bytes::copy_from_slice(cur.take(len as usize)?);

            LogicalMessage::LogicalDecoding(LogicalDecodingMessage {
                transactional: flags & 1 != 0,
                lsn,
                prefix,
                content,
            })
        }
        b'S' => LogicalMessage::StreamStart {
            xid: cur.u32_be()?,
            first_segment: cur.take(1)?[0] == 1,
        },
        b'E' => LogicalMessage::StreamStop,
        b'c' => {
            let xid = cur.u32_be()?;
            let _flags = cur.take(1)?[0];
            LogicalMessage::StreamCommit {
                xid,
                commit_lsn: Lsn(cur.u64_be()?),
                end_lsn: Lsn(cur.u64_be()?),
            }
        }
        b'A' => LogicalMessage::StreamAbort {
            xid: cur.u32_be()?,
            subxid: cur.u32_be()?,
        },
        other => {
            debug!("ignoring unknown pgoutput message tag {:?}", other as char);
            return Ok(None);
        }
    };

    Ok(Some(msg))
}

fn parse_relation(cur: &mut Cursor<'_>) -> Result<RelationMessage> {
    let id = cur.u32_be()?;
    let namespace = cstr(cur)?;
    let name = cstr(cur)?;
    let replica_identity = cur.take(1)?[0];
    let ncolumns = cur.u16_be()?;

    let mut columns = Vec::with_capacity(ncolumns as usize);

    for _ in 0..ncolumns {
        columns.push(RelationColumn {
            flags: cur.take(1)?[0],
            name: cstr(cur)?,
            type_oid: cur.u32_be()?,
            type_modifier: cur.i32_be()?,
        });
    }

    Ok(RelationMessage {
        id,
        namespace,
        name,
        replica_identity,
        columns,
    })
}

fn parse_tuple(cur: &mut Cursor<'_>) -> Result<TupleData> {
    let ncolumns = cur.u16_be()?;
    let mut columns = Vec::with_capacity(ncolumns as usize);

    for _ in 0..ncolumns {
        let tag = cur.take(1)?[0];

        let value = match tag {
            b'n' => ColumnValue::Null,
            b'u' => ColumnValue::UnchangedToast,
            b't' => {
                let len = cur.u32_be()?;
                let data = cur.take(len as usize)?;
                ColumnValue::Text(String::from_utf8_lossy(data).into_owned())
            }
            b'b' => {
                let len = cur.u32_be()?;
                ColumnValue::Binary(Bytes::copy_from_slice(cur.take(len as usize)?))
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unknown tuple column tag {:?}",
                    other as char
                )))
            }
        };

        columns.push(value);
    }

    Ok(TupleData { columns })
}

fn expect_tuple_tag(cur: &mut Cursor<'_>, want: u8) -> Result<()> {
    let got = cur.take(1)?[0];

    if got != want {
        return Err(Error::Protocol(format!(
            "expected tuple tag {:?}, got {:?}",
            want as char, got as char
        )));
    }

    Ok(())
}

fn cstr(cur: &mut Cursor<'_>) -> Result<String> {
    let mut out = Vec::new();

    loop {
        let b = cur.take(1)?[0];
        if b == 0 {
            break;
        }
        out.push(b);
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}

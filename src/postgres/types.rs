//! Wire-level types for the logical replication stream.

use bytes::Bytes;
use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use crate::Error;

/// A Log Sequence Number: a 64-bit, monotonically non-decreasing position in
/// the upstream write-ahead log. Serialized as `HIGH/LOW` in uppercase hex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s.split_once('/').ok_or_else(|| Error::InvalidLsn(s.to_string()))?;

        let hi = u64::from_str_radix(hi, 16).map_err(|_| Error::InvalidLsn(s.to_string()))?;
        let lo = u64::from_str_radix(lo, 16).map_err(|_| Error::InvalidLsn(s.to_string()))?;

        if lo > u32::MAX as u64 {
            return Err(Error::InvalidLsn(s.to_string()));
        }

        Ok(Lsn(hi << 32 | lo))
    }
}

impl From<u64> for Lsn {
    fn from(v: u64) -> Self {
        Lsn(v)
    }
}

impl Add<u64> for Lsn {
    type Output = Lsn;

    fn add(self, rhs: u64) -> Lsn {
        Lsn(self.0 + rhs)
    }
}

/// A logical replication message decoded from the pgoutput stream. Unknown
/// tags never reach this enum; the parser drops them.
#[derive(Debug, Clone)]
pub enum LogicalMessage {
    Relation(RelationMessage),
    Begin(BeginMessage),
    Commit(CommitMessage),
    Insert(InsertMessage),
    Update(UpdateMessage),
    Delete(DeleteMessage),
    Truncate(TruncateMessage),
    Type(TypeMessage),
    Origin(OriginMessage),
    LogicalDecoding(LogicalDecodingMessage),
    StreamStart { xid: u32, first_segment: bool },
    StreamStop,
    StreamCommit { xid: u32, commit_lsn: Lsn, end_lsn: Lsn },
    StreamAbort { xid: u32, subxid: u32 },
}

/// Schema description for a relation. Sent before the first change touching
/// the relation and again whenever its definition changes.
#[derive(Debug, Clone)]
pub struct RelationMessage {
    pub id: u32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: u8,
    pub columns: Vec<RelationColumn>,
}

#[derive(Debug, Clone)]
pub struct RelationColumn {
    pub flags: u8,
    pub name: String,
    pub type_oid: u32,
    pub type_modifier: i32,
}

impl RelationColumn {
    /// True when the column is part of the replica identity key.
    pub fn key(&self) -> bool {
        self.flags == 1
    }
}

#[derive(Debug, Clone)]
pub struct BeginMessage {
    pub final_lsn: Lsn,
    pub timestamp: i64,
    pub xid: u32,
}

#[derive(Debug, Clone)]
pub struct CommitMessage {
    pub flags: u8,
    pub commit_lsn: Lsn,
    pub end_lsn: Lsn,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct InsertMessage {
    pub relation_id: u32,
    pub new_tuple: TupleData,
}

#[derive(Debug, Clone)]
pub struct UpdateMessage {
    pub relation_id: u32,
    /// Previous row image, present when the replica identity changed or the
    /// table has REPLICA IDENTITY FULL.
    pub old_tuple: Option<TupleData>,
    pub new_tuple: TupleData,
}

#[derive(Debug, Clone)]
pub struct DeleteMessage {
    pub relation_id: u32,
    pub old_tuple: TupleData,
}

#[derive(Debug, Clone)]
pub struct TruncateMessage {
    pub options: u8,
    pub relation_ids: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct TypeMessage {
    pub oid: u32,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct OriginMessage {
    pub commit_lsn: Lsn,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct LogicalDecodingMessage {
    pub transactional: bool,
    pub lsn: Lsn,
    pub prefix: String,
    pub content: Bytes,
}

/// One row image from an Insert/Update/Delete message.
#[derive(Debug, Clone)]
pub struct TupleData {
    pub columns: Vec<ColumnValue>,
}

/// A single column of a tuple, positional against the relation's columns.
#[derive(Debug, Clone)]
pub enum ColumnValue {
    Null,
    /// TOASTed value that did not change; omitted from generated SQL.
    UnchangedToast,
    Text(String),
    Binary(Bytes),
}

/// Primary keepalive frame (`k`) from the walsender.
#[derive(Debug, Clone, Copy)]
pub struct Keepalive {
    pub wal_end: Lsn,
    pub timestamp: i64,
    pub reply_requested: bool,
}

/// XLogData frame (`w`) carrying one logical message.
#[derive(Debug, Clone)]
pub struct XLogData {
    pub wal_start: Lsn,
    pub wal_end: Lsn,
    pub timestamp: i64,
    pub data: Bytes,
}

/// Row returned by `IDENTIFY_SYSTEM`.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub system_id: String,
    pub timeline: i32,
    pub xlogpos: String,
    pub dbname: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsn_round_trip() {
        let lsn = Lsn(0x0000_0001_58C3_2800);
        assert_eq!(lsn.to_string(), "1/58C32800");
        assert_eq!("1/58C32800".parse::<Lsn>().unwrap(), lsn);
    }

    #[test]
    fn test_lsn_zero() {
        assert_eq!(Lsn(0).to_string(), "0/0");
        assert_eq!("0/0".parse::<Lsn>().unwrap(), Lsn(0));
    }

    #[test]
    fn test_lsn_ordering_is_unsigned() {
        let low = "0/10".parse::<Lsn>().unwrap();
        let high = "FFFFFFFF/0".parse::<Lsn>().unwrap();
        assert!(low < high);
    }

    #[test]
    fn test_lsn_parse_rejects_garbage() {
        assert!("".parse::<Lsn>().is_err());
        assert!("1".parse::<Lsn>().is_err());
        assert!("zz/10".parse::<Lsn>().is_err());
        assert!("1/FFFFFFFF0".parse::<Lsn>().is_err());
    }

    #[test]
    fn test_lsn_advance() {
        let lsn = "0/FFFFFFFF".parse::<Lsn>().unwrap();
        assert_eq!((lsn + 1).to_string(), "1/0");
    }
}

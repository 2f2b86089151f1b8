//! Translates logical replication messages and copy rows into SQL for the
//! local store.
//!
//! The generator is the only owner of the relation table and the live
//! schema. The live schema is kept in lockstep with the DDL this module
//! emits: after every Relation message it reflects the columns the local
//! store will have once the statement is applied.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::postgres::types::{
    BeginMessage, ColumnValue, CommitMessage, DeleteMessage, InsertMessage, LogicalMessage, Lsn,
    RelationMessage, TruncateMessage, TupleData, UpdateMessage,
};
use crate::sqlite::driver::POSITION_TABLE;
use crate::sqlite::types::{ColDef, ColType, Schema};
use crate::{Error, Result};

/// Identity of the mirrored source; the position table is keyed by it.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub source_db: String,
    pub plugin: String,
    pub publication: String,
}

pub struct SqliteGenerator {
    relations: HashMap<u32, RelationMessage>,
    current: Schema,
    cfg: SqliteConfig,
    pos: Lsn,
}

impl SqliteGenerator {
    pub fn new(cfg: SqliteConfig, current: Schema) -> Self {
        Self {
            relations: HashMap::new(),
            current,
            cfg,
            pos: Lsn::default(),
        }
    }

    /// The live schema as the generator currently understands it.
    pub fn schema(&self) -> &Schema {
        &self.current
    }

    /// Dispatches one logical message. `None` means the message produces no
    /// local SQL (Type, Origin, and logical decoding messages).
    pub fn translate(&mut self, msg: LogicalMessage) -> Result<Option<String>> {
        match msg {
            LogicalMessage::Relation(m) => self.relation(m).map(Some),
            LogicalMessage::Begin(m) => self.begin(&m).map(Some),
            LogicalMessage::Commit(m) => self.commit(&m).map(Some),
            LogicalMessage::Insert(m) => self.insert(&m).map(Some),
            LogicalMessage::Update(m) => self.update(&m).map(Some),
            LogicalMessage::Delete(m) => self.delete(&m).map(Some),
            LogicalMessage::Truncate(m) => self.truncate(&m).map(Some),
            LogicalMessage::StreamStart { .. } => Ok(Some("BEGIN TRANSACTION;".to_string())),
            LogicalMessage::StreamStop => Ok(Some("COMMIT;".to_string())),
            LogicalMessage::StreamCommit { .. } => Ok(Some("COMMIT;".to_string())),
            LogicalMessage::StreamAbort { .. } => Ok(Some("ROLLBACK;".to_string())),
            LogicalMessage::Type(m) => {
                debug!(oid = m.oid, name = %m.name, "type message");
                Ok(None)
            }
            LogicalMessage::Origin(m) => {
                debug!(origin = %m.name, "origin message");
                Ok(None)
            }
            LogicalMessage::LogicalDecoding(m) => {
                debug!(
                    prefix = %m.prefix,
                    content = %String::from_utf8_lossy(&m.content),
                    "logical decoding message"
                );
                Ok(None)
            }
        }
    }

    /// Upserts the relation entry and emits whatever DDL brings the local
    /// table in line: CREATE TABLE for new tables, ALTER TABLE ADD/DROP
    /// COLUMN diffs for known ones. Primary-key and type changes are
    /// detected but the local engine cannot express them.
    pub fn relation(&mut self, msg: RelationMessage) -> Result<String> {
        let sql = match self.current.get_mut(&msg.name) {
            None => {
                let mut cols_sql = Vec::with_capacity(msg.columns.len());
                let mut pk = Vec::new();
                let mut current_cols = BTreeMap::new();

                for col in &msg.columns {
                    let (_, array) = ColType::from_oid(col.type_oid);
                    let local = local_type_for_oid(col.type_oid);

                    if col.key() {
                        pk.push(col.name.clone());
                    }

                    cols_sql.push(format!("{} {}", col.name, local));

                    current_cols.insert(
                        col.name.clone(),
                        ColDef {
                            name: col.name.clone(),
                            col_type: local,
                            primary_key: col.key(),
                            array,
                        },
                    );
                }

                let pk_clause = if pk.is_empty() {
                    String::new()
                } else {
                    format!(", PRIMARY KEY ({})", pk.join(", "))
                };

                self.current.insert(msg.name.clone(), current_cols);

                format!(
                    "CREATE TABLE IF NOT EXISTS {} ({}{});",
                    msg.name,
                    cols_sql.join(", "),
                    pk_clause
                )
            }
            Some(current_cols) => {
                let mut statements = Vec::new();
                let mut dropped: Vec<String> = current_cols.keys().cloned().collect();

                for col in &msg.columns {
                    dropped.retain(|name| name != &col.name);

                    let local = local_type_for_oid(col.type_oid);

                    match current_cols.get(&col.name) {
                        None => {
                            statements.push(format!(
                                "ALTER TABLE {} ADD COLUMN {} {};",
                                msg.name, col.name, local
                            ));

                            current_cols.insert(
                                col.name.clone(),
                                ColDef::new(col.name.clone(), local),
                            );
                        }
                        Some(existing) => {
                            if existing.primary_key != col.key() {
                                debug!(
                                    table = %msg.name,
                                    column = %col.name,
                                    "primary key change cannot be applied locally"
                                );
                            }

                            if existing.col_type != local {
                                debug!(
                                    table = %msg.name,
                                    column = %col.name,
                                    "column type change cannot be applied locally"
                                );
                            }
                        }
                    }
                }

                for name in dropped {
                    let is_pk = current_cols
                        .get(&name)
                        .map(|c| c.primary_key)
                        .unwrap_or(false);

                    // Dropping primary key columns is not supported locally.
                    if is_pk {
                        continue;
                    }

                    statements.push(format!("ALTER TABLE {} DROP COLUMN {};", msg.name, name));
                    current_cols.remove(&name);
                }

                statements.join(" ")
            }
        };

        self.relations.insert(msg.id, msg);

        Ok(sql)
    }

    /// One single-row insert. A multi-row upstream INSERT arrives as one
    /// Insert message per row.
    pub fn insert(&self, msg: &InsertMessage) -> Result<String> {
        let rel = self.relation_for(msg.relation_id)?;
        let cols = parse_columns(rel, &msg.new_tuple)?;

        let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
        let values: Vec<String> = cols.iter().map(Column::render).collect();

        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({});",
            rel.name,
            names.join(", "),
            values.join(", ")
        ))
    }

    /// SET every column of the new tuple, except replica-identity columns
    /// when no old tuple was supplied; the WHERE clause is built from the
    /// replica-identity columns of the old tuple (or the new tuple when no
    /// old image was sent).
    pub fn update(&self, msg: &UpdateMessage) -> Result<String> {
        let rel = self.relation_for(msg.relation_id)?;
        let new_cols = parse_columns(rel, &msg.new_tuple)?;

        let where_cols = match &msg.old_tuple {
            Some(old) => parse_columns(rel, old)?,
            None => new_cols.clone(),
        };

        let set: Vec<String> = new_cols
            .iter()
            .filter(|c| !(c.key && msg.old_tuple.is_none()))
            .map(Column::assignment)
            .collect();

        let keys: Vec<String> = where_cols
            .iter()
            .filter(|c| c.key)
            .map(Column::assignment)
            .collect();

        if keys.is_empty() {
            return Err(Error::NoReplicaIdentity(rel.name.clone()));
        }

        Ok(format!(
            "UPDATE {} SET {} WHERE {};",
            rel.name,
            set.join(", "),
            keys.join(" AND ")
        ))
    }

    pub fn delete(&self, msg: &DeleteMessage) -> Result<String> {
        let rel = self.relation_for(msg.relation_id)?;
        let cols = parse_columns(rel, &msg.old_tuple)?;

        let keys: Vec<String> = cols
            .iter()
            .filter(|c| c.key)
            .map(Column::assignment)
            .collect();

        if keys.is_empty() {
            return Err(Error::NoReplicaIdentity(rel.name.clone()));
        }

        Ok(format!(
            "DELETE FROM {} WHERE {};",
            rel.name,
            keys.join(" AND ")
        ))
    }

    /// The local engine has no TRUNCATE; each relation becomes a DELETE.
    pub fn truncate(&self, msg: &TruncateMessage) -> Result<String> {
        let mut statements = Vec::with_capacity(msg.relation_ids.len());

        for id in &msg.relation_ids {
            let rel = self.relation_for(*id)?;
            statements.push(format!("DELETE FROM {};", rel.name));
        }

        Ok(statements.join(" "))
    }

    /// Records the transaction's commit position and opens a local
    /// transaction.
    pub fn begin(&mut self, msg: &BeginMessage) -> Result<String> {
        self.pos = msg.final_lsn;
        Ok("BEGIN TRANSACTION;".to_string())
    }

    /// Persists the position recorded at Begin in the same local transaction
    /// as the data, then commits.
    pub fn commit(&self, _msg: &CommitMessage) -> Result<String> {
        Ok(format!(
            "INSERT OR REPLACE INTO {} (source_db, plugin, publication, pos) \
             VALUES ('{}', '{}', '{}', '{}');\n COMMIT;",
            POSITION_TABLE, self.cfg.source_db, self.cfg.plugin, self.cfg.publication, self.pos
        ))
    }

    /// Sets the cursor and returns the bare position upsert, used to record
    /// the starting point after the initial copy.
    pub fn position_sql(&mut self, pos: Lsn) -> String {
        self.pos = pos;

        format!(
            "INSERT OR REPLACE INTO {} (source_db, plugin, publication, pos) \
             VALUES ('{}', '{}', '{}', '{}');",
            POSITION_TABLE, self.cfg.source_db, self.cfg.plugin, self.cfg.publication, self.pos
        )
    }

    /// DDL for one table of the initial copy. The introspector carries no
    /// primary-key information, so copy-created tables have none; the first
    /// Relation message for the table reconciles the rest.
    pub fn copy_create_table(&mut self, table: &str, defs: &[ColDef]) -> String {
        let mut cols_sql = Vec::with_capacity(defs.len());
        let mut current_cols = BTreeMap::new();

        for def in defs {
            let local = if def.array {
                ColType::Text
            } else {
                def.col_type.local()
            };

            cols_sql.push(format!("{} {}", def.name, local));

            current_cols.insert(
                def.name.clone(),
                ColDef {
                    name: def.name.clone(),
                    col_type: local,
                    primary_key: false,
                    array: def.array,
                },
            );
        }

        self.current.insert(table.to_string(), current_cols);

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            table,
            cols_sql.join(", ")
        )
    }

    /// One row of the initial copy. Values arrive already rendered by the
    /// copy decoder; everything except the `null` literal is quoted.
    pub fn insert_copy_row(&self, table: &str, values: &[String]) -> String {
        let rendered: Vec<String> = values
            .iter()
            .map(|v| {
                if v == "null" {
                    v.clone()
                } else {
                    quote_text(v)
                }
            })
            .collect();

        format!("INSERT INTO {} VALUES ({});", table, rendered.join(", "))
    }

    fn relation_for(&self, id: u32) -> Result<&RelationMessage> {
        self.relations.get(&id).ok_or(Error::UnknownRelation(id))
    }
}

fn local_type_for_oid(oid: u32) -> ColType {
    let (col_type, array) = ColType::from_oid(oid);

    if array {
        ColType::Text
    } else {
        col_type.local()
    }
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    key: bool,
    value: Value,
}

#[derive(Debug, Clone)]
enum Value {
    Null,
    Text(String),
    Binary(Bytes),
}

impl Column {
    fn render(&self) -> String {
        match &self.value {
            Value::Null => "null".to_string(),
            Value::Text(s) => quote_text(s),
            Value::Binary(b) => format!("x'{}'", hex(b)),
        }
    }

    fn assignment(&self) -> String {
        format!("{}={}", self.name, self.render())
    }
}

/// Resolves a tuple against its relation's column list. Toast-unchanged
/// columns carry no value and are omitted.
fn parse_columns(rel: &RelationMessage, tuple: &TupleData) -> Result<Vec<Column>> {
    if tuple.columns.len() != rel.columns.len() {
        return Err(Error::FieldCountMismatch {
            expected: rel.columns.len(),
            got: tuple.columns.len(),
        });
    }

    let mut out = Vec::with_capacity(tuple.columns.len());

    for (meta, value) in rel.columns.iter().zip(&tuple.columns) {
        let value = match value {
            ColumnValue::UnchangedToast => continue,
            ColumnValue::Null => Value::Null,
            ColumnValue::Text(s) => Value::Text(s.clone()),
            ColumnValue::Binary(b) => Value::Binary(b.clone()),
        };

        out.push(Column {
            name: meta.name.clone(),
            key: meta.key(),
            value,
        });
    }

    Ok(out)
}

/// Single-quotes a text value, doubling embedded quotes.
fn quote_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);

    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0F) as usize] as char);
    }

    out
}

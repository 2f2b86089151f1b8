//! Step-machine parser for the CREATE TABLE statements the local store
//! keeps in `sqlite_schema`. Recovers the column set so the live schema can
//! be rebuilt on restart. This is not a general SQL parser; it understands
//! exactly the DDL shape the generator emits plus inline `NOT NULL` and
//! composite `PRIMARY KEY` clauses.

use crate::sqlite::types::{ColDef, ColType};
use crate::{Error, Result};

const TOKENS: &[&str] = &[
    "CREATE TABLE",
    "IF NOT EXISTS",
    "PRIMARY KEY",
    "NOT NULL",
    "AS",
    "(",
    ")",
    ",",
    ";",
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Start,
    AfterCreate,
    TableName,
    Columns,
    Constraints,
    CompositePk,
}

pub struct Parser {
    sql: String,
    i: usize,
    step: Step,
    table: String,
    cols: Vec<ColDef>,
}

impl Parser {
    pub fn new(sql: &str) -> Self {
        let sql = sql.replace(['\n', '\t'], " ").trim().to_string();

        Self {
            sql,
            i: 0,
            step: Step::Start,
            table: String::new(),
            cols: Vec::new(),
        }
    }

    /// Returns the table name and its ordered column definitions.
    pub fn parse(mut self) -> Result<(String, Vec<ColDef>)> {
        loop {
            if self.i >= self.sql.len() {
                return Ok((self.table, self.cols));
            }

            match self.step {
                Step::Start => {
                    let peeked = self.peek();
                    if peeked != "CREATE TABLE" {
                        return Err(Error::NotCreateTable(peeked));
                    }
                    self.pop();
                    self.step = Step::AfterCreate;
                }
                Step::AfterCreate => {
                    if self.peek() == "IF NOT EXISTS" {
                        self.pop();
                    }
                    self.step = Step::TableName;
                }
                Step::TableName => {
                    self.table = self.pop();

                    match self.peek().as_str() {
                        "AS" => return Err(Error::UnsupportedCTASTable),
                        "(" => {
                            self.pop();
                            self.step = Step::Columns;
                        }
                        token => {
                            return Err(Error::UnexpectedToken {
                                token: token.to_string(),
                                context: "table name",
                            })
                        }
                    }
                }
                Step::Columns => {
                    if self.peek() == "PRIMARY KEY" {
                        self.pop();
                        self.step = Step::CompositePk;
                        continue;
                    }

                    let name = self.pop();
                    let type_name = self.pop();

                    self.cols.push(ColDef::new(name, ColType::from_ddl(&type_name)));

                    match self.peek().as_str() {
                        "," => {
                            self.pop();
                        }
                        ")" => {
                            self.pop();
                            return Ok((self.table, self.cols));
                        }
                        _ => self.step = Step::Constraints,
                    }
                }
                Step::Constraints => match self.peek().as_str() {
                    "NOT NULL" => {
                        self.pop();
                    }
                    "PRIMARY KEY" => {
                        self.pop();
                        if let Some(col) = self.cols.last_mut() {
                            col.primary_key = true;
                        }
                    }
                    "," => {
                        self.pop();
                        self.step = Step::Columns;
                    }
                    ")" => {
                        self.pop();
                        return Ok((self.table, self.cols));
                    }
                    token => {
                        return Err(Error::UnexpectedToken {
                            token: token.to_string(),
                            context: "column constraints",
                        })
                    }
                },
                Step::CompositePk => match self.peek().as_str() {
                    "(" | "," => {
                        self.pop();
                        let name = self.pop();
                        self.mark_primary_key(&name);
                    }
                    ")" => self.step = Step::Constraints,
                    token => {
                        return Err(Error::UnexpectedToken {
                            token: token.to_string(),
                            context: "composite primary key",
                        })
                    }
                },
            }
        }
    }

    fn mark_primary_key(&mut self, name: &str) {
        for col in &mut self.cols {
            if col.name == name {
                col.primary_key = true;
                return;
            }
        }
    }

    fn peek(&self) -> String {
        self.peek_with_length().0
    }

    fn pop(&mut self) -> String {
        let (token, len) = self.peek_with_length();
        self.i += len;
        self.pop_whitespace();
        token
    }

    fn peek_with_length(&self) -> (String, usize) {
        if self.i >= self.sql.len() {
            return (String::new(), 0);
        }

        let rest = &self.sql[self.i..];

        for token in TOKENS {
            if rest.len() < token.len() || !rest.is_char_boundary(token.len()) {
                continue;
            }

            if !rest[..token.len()].eq_ignore_ascii_case(token) {
                continue;
            }

            // Keyword tokens must end at a word boundary so that an
            // identifier like "asset" is not read as AS.
            let last_is_word = token.as_bytes()[token.len() - 1].is_ascii_alphanumeric();
            let next_is_word = rest.as_bytes().get(token.len()).is_some_and(is_ident_byte);

            if last_is_word && next_is_word {
                continue;
            }

            return (token.to_string(), token.len());
        }

        self.peek_identifier_with_length()
    }

    fn peek_identifier_with_length(&self) -> (String, usize) {
        let rest = &self.sql[self.i..];

        let end = rest
            .bytes()
            .position(|b| !is_ident_byte(&b))
            .unwrap_or(rest.len());

        if end == 0 {
            // Surface the unrecognized character as a one-token string so
            // the caller fails with UnexpectedToken instead of spinning.
            let len = rest.chars().next().map(char::len_utf8).unwrap_or(1);
            return (rest[..len].to_string(), len);
        }

        (rest[..end].to_string(), end)
    }

    fn pop_whitespace(&mut self) {
        while self.i < self.sql.len() && self.sql.as_bytes()[self.i] == b' ' {
            self.i += 1;
        }
    }
}

fn is_ident_byte(b: &u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(*b, b'_' | b'.' | b'*')
}

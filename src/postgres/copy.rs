//! Framing decoder for `COPY ... TO STDOUT WITH BINARY` bodies.

use crate::postgres::buf::Cursor;
use crate::postgres::fields::FieldDecoder;
use crate::{Error, Result};

// 11-byte signature, 4-byte flags, 4-byte header extension length.
const HEADER_LEN: usize = 19;

/// Decodes the complete binary COPY body for one table into rows of
/// per-column textual renderings. NULL fields become the literal `null`.
pub fn decode_copy_rows(body: &[u8], decs: &[Box<dyn FieldDecoder>]) -> Result<Vec<Vec<String>>> {
    let mut cur = Cursor::new(body);

    cur.take(HEADER_LEN)?;

    let mut rows = Vec::new();

    loop {
        // A field count of -1 marks the end of the stream.
        if cur.peek_all(0xFF, 2) {
            cur.take(2)?;
            break;
        }

        let nfields = cur.i16_be()?;

        if nfields as usize != decs.len() {
            return Err(Error::FieldCountMismatch {
                expected: decs.len(),
                got: nfields as usize,
            });
        }

        let mut row = Vec::with_capacity(decs.len());

        for dec in decs {
            if cur.peek_all(0xFF, 4) {
                cur.take(4)?;
                row.push("null".to_string());
                continue;
            }

            let len = cur.i32_be()?;
            let data = cur.take(len as usize)?;
            row.push(dec.decode(data)?);
        }

        rows.push(row);
    }

    Ok(rows)
}

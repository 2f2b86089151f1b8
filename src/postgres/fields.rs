//! Binary-format field decoders for the initial table copy.
//!
//! Each decoder turns one binary-encoded column value into the textual
//! rendering that gets inlined into local SQL. The `numeric` flag is only
//! consulted by the array decoder, which quotes non-numeric elements.

use crate::postgres::buf::Cursor;
use crate::sqlite::types::{ColDef, ColType};
use crate::{Error, Result};

pub trait FieldDecoder: Send + Sync {
    fn decode(&self, b: &[u8]) -> Result<String>;
    fn numeric(&self) -> bool;
}

/// Builds the positional decoder vector for one table. Array columns wrap
/// their element decoder. A column whose type has no binary decoder fails
/// with `UnknownType`; the live path is unaffected because pgoutput delivers
/// those values in text form.
pub fn decoders(defs: &[ColDef]) -> Result<Vec<Box<dyn FieldDecoder>>> {
    let mut out: Vec<Box<dyn FieldDecoder>> = Vec::with_capacity(defs.len());

    for def in defs {
        let elem: Box<dyn FieldDecoder> = match def.col_type {
            ColType::Text | ColType::Json => Box::new(Str),
            ColType::Jsonb => Box::new(Jsonb),
            ColType::Int2 => Box::new(Int2),
            ColType::Int4 => Box::new(Int4),
            ColType::Int8 => Box::new(Int8),
            ColType::Numeric => Box::new(Numeric),
            ColType::Float4 => Box::new(Float4),
            ColType::Float8 => Box::new(Float8),
            ColType::Bytea => Box::new(Bytea),
            ColType::Bool => Box::new(Boolean),
            _ => return Err(Error::UnknownType(def.col_type.to_string())),
        };

        if def.array {
            out.push(Box::new(Arr { elem }));
        } else {
            out.push(elem);
        }
    }

    Ok(out)
}

struct Str;

impl FieldDecoder for Str {
    fn numeric(&self) -> bool {
        false
    }

    fn decode(&self, b: &[u8]) -> Result<String> {
        Ok(String::from_utf8_lossy(b).into_owned())
    }
}

struct Jsonb;

impl FieldDecoder for Jsonb {
    fn numeric(&self) -> bool {
        false
    }

    // The payload leads with a one-byte jsonb version tag.
    fn decode(&self, b: &[u8]) -> Result<String> {
        let body = b.get(1..).ok_or(Error::ShortBuffer { need: 1, have: 0 })?;
        Ok(String::from_utf8_lossy(body).into_owned())
    }
}

struct Int2;

impl FieldDecoder for Int2 {
    fn numeric(&self) -> bool {
        true
    }

    fn decode(&self, b: &[u8]) -> Result<String> {
        Ok(Cursor::new(b).i16_be()?.to_string())
    }
}

struct Int4;

impl FieldDecoder for Int4 {
    fn numeric(&self) -> bool {
        true
    }

    fn decode(&self, b: &[u8]) -> Result<String> {
        Ok(Cursor::new(b).i32_be()?.to_string())
    }
}

struct Int8;

impl FieldDecoder for Int8 {
    fn numeric(&self) -> bool {
        true
    }

    fn decode(&self, b: &[u8]) -> Result<String> {
        Ok(Cursor::new(b).i64_be()?.to_string())
    }
}

struct Float4;

impl FieldDecoder for Float4 {
    fn numeric(&self) -> bool {
        true
    }

    fn decode(&self, b: &[u8]) -> Result<String> {
        Ok(f32::from_bits(Cursor::new(b).u32_be()?).to_string())
    }
}

struct Float8;

impl FieldDecoder for Float8 {
    fn numeric(&self) -> bool {
        true
    }

    fn decode(&self, b: &[u8]) -> Result<String> {
        Ok(f64::from_bits(Cursor::new(b).u64_be()?).to_string())
    }
}

struct Numeric;

impl FieldDecoder for Numeric {
    fn numeric(&self) -> bool {
        true
    }

    /// Header is four i16 fields (ndigits, weight, sign, dscale) followed by
    /// `ndigits` base-10000 digit groups. The groups compose into one integer
    /// which is then scaled down by `dscale` decimal places. Trailing zeros of
    /// the last group are stripped before composition.
    fn decode(&self, b: &[u8]) -> Result<String> {
        let mut cur = Cursor::new(b);

        let ndigits = cur.i16_be()?;
        let mut weight = cur.i16_be()?;
        let _sign = cur.i16_be()?;
        let dscale = cur.i16_be()?;

        let mut composed = String::new();

        for i in 0..ndigits {
            let mut group = cur.i16_be()? as i64;

            if weight > 0 {
                group *= 10i64.pow(weight as u32);
                weight -= 1;
            }

            if i == ndigits - 1 {
                group = without_trailing_zeros(group);
            }

            composed.push_str(&group.to_string());
        }

        let v: i64 = composed.parse().unwrap_or(0);
        let out = v as f64 / 10f64.powi(dscale as i32);

        Ok(out.to_string())
    }
}

fn without_trailing_zeros(mut v: i64) -> i64 {
    while v != 0 && v % 10 == 0 {
        v /= 10;
    }
    v
}

struct Bytea;

impl FieldDecoder for Bytea {
    fn numeric(&self) -> bool {
        false
    }

    fn decode(&self, b: &[u8]) -> Result<String> {
        Ok(String::from_utf8_lossy(b).into_owned())
    }
}

struct Boolean;

impl FieldDecoder for Boolean {
    fn numeric(&self) -> bool {
        false
    }

    fn decode(&self, b: &[u8]) -> Result<String> {
        Ok(if b.first() == Some(&0x01) {
            "true".to_string()
        } else {
            "false".to_string()
        })
    }
}

/// One-dimensional array decoder. Renders a brace-list literal with NULL
/// elements as `null` and non-numeric elements double-quoted.
struct Arr {
    elem: Box<dyn FieldDecoder>,
}

impl FieldDecoder for Arr {
    fn numeric(&self) -> bool {
        self.elem.numeric()
    }

    fn decode(&self, b: &[u8]) -> Result<String> {
        let mut cur = Cursor::new(b);

        let ndim = cur.i32_be()?;
        if ndim > 1 || ndim < 0 {
            return Err(Error::UnsupportedArrayShape(ndim));
        }
        if ndim == 0 {
            return Ok("{}".to_string());
        }

        let has_null = cur.i32_be()?;
        let _elem_oid = cur.i32_be()?;
        let dim = cur.i32_be()?;
        let _lower_bound = cur.i32_be()?;

        let mut out = String::from("{");

        for i in 0..dim {
            // NULL elements are encoded as an all-ones length.
            if has_null == 1 && cur.peek_all(0xFF, 4) {
                cur.take(4)?;
                out.push_str("null");

                if i < dim - 1 {
                    out.push_str(", ");
                }

                continue;
            }

            let len = cur.i32_be()?;
            let data = cur.take(len as usize)?;

            if !self.elem.numeric() {
                out.push('"');
            }

            out.push_str(&self.elem.decode(data)?);

            if !self.elem.numeric() {
                out.push('"');
            }

            if i < dim - 1 {
                out.push_str(", ");
            }
        }

        out.push('}');

        Ok(out)
    }
}

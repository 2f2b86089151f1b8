//! Upstream schema introspection for the initial copy.

use std::collections::BTreeMap;
use tokio_postgres::Client;
use tracing::debug;

use crate::sqlite::types::{ColDef, ColType};
use crate::Result;

/// Lists every table of `schema` with its ordered column definitions, using
/// an ordinary (non-replication) connection. A `udt_name` with a leading
/// underscore marks an array column; the underscore is stripped and the
/// array flag set.
pub async fn table_col_defs(
    client: &Client,
    schema: &str,
) -> Result<BTreeMap<String, Vec<ColDef>>> {
    let rows = client
        .query(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = $1 \
             ORDER BY table_name",
            &[&schema],
        )
        .await?;

    let mut out = BTreeMap::new();

    for row in rows {
        let table: String = row.get(0);
        let defs = col_defs(client, schema, &table).await?;
        debug!(table = %table, columns = defs.len(), "introspected table");
        out.insert(table, defs);
    }

    Ok(out)
}

async fn col_defs(client: &Client, schema: &str, table: &str) -> Result<Vec<ColDef>> {
    let rows = client
        .query(
            "SELECT column_name, udt_name FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await?;

    let mut defs = Vec::with_capacity(rows.len());

    for row in rows {
        let name: String = row.get(0);
        let mut udt: String = row.get(1);

        let array = udt.starts_with('_');
        if array {
            udt.remove(0);
        }

        defs.push(ColDef {
            name,
            col_type: ColType::from_udt(&udt),
            primary_key: false,
            array,
        });
    }

    Ok(defs)
}

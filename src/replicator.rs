//! The mirror orchestrator.
//!
//! Wires the replication session, the SQL generator, and the apply driver
//! together: resolves the starting position, runs the initial snapshot copy
//! when starting fresh, then streams logical messages and applies them one
//! at a time. Every upstream commit persists its LSN in the same local
//! transaction as the data, so the durable position never leads the applied
//! state.

use futures::{FutureExt, TryStreamExt};
use std::panic::AssertUnwindSafe;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use crate::postgres::connection::{ReplicationConnection, Slot};
use crate::postgres::types::Lsn;
use crate::postgres::{copy, fields, schema};
use crate::sqlite::{SqliteConfig, SqliteDriver, SqliteGenerator};
use crate::{Config, Error, Result};

pub struct Replicator {
    config: Config,
}

impl Replicator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Runs the mirror until the upstream connection fails or an
    /// unrecoverable error occurs. Returns `Ok` only on a clean stream end.
    pub async fn run(&mut self) -> Result<()> {
        let sqlite_cfg = SqliteConfig {
            source_db: self.config.upstream.database.clone(),
            plugin: self.config.replication.plugin.clone(),
            publication: self.config.replication.publication.clone(),
        };

        let driver = SqliteDriver::open(sqlite_cfg.clone(), &self.config.local.path)?;
        driver
            .init_position_table()
            .map_err(|e| Error::context("init position tracking", e))?;

        let current = driver
            .current_schema()
            .map_err(|e| Error::context("load current schema", e))?;

        let mut generator = SqliteGenerator::new(sqlite_cfg, current);

        let mut conn = ReplicationConnection::connect(
            &self.config.replication_url(),
            &self.config.replication.publication,
        )
        .await?;

        let system = conn.identify().await?;
        info!(
            system_id = %system.system_id,
            xlogpos = %system.xlogpos,
            "identified upstream system"
        );

        let pos = driver
            .position()
            .map_err(|e| Error::context("find starting pos", e))?;

        if !pos.is_empty() {
            match pos.parse::<Lsn>() {
                Ok(lsn) => conn.set_position(lsn),
                // An unreadable position falls back to the xlogpos cached by
                // identify; the copy is not re-run.
                Err(e) => error!(pos = %pos, "ignoring stored position: {}", e),
            }
        }

        conn.drop_publication()
            .await
            .map_err(|e| Error::context("drop publication", e))?;
        conn.create_publication()
            .await
            .map_err(|e| Error::context("create publication", e))?;

        let slot = conn
            .create_slot(
                &self.config.replication.slot_name,
                &self.config.replication.plugin,
                self.config.replication.create_slot,
                self.config.replication.temporary,
            )
            .await
            .map_err(|e| Error::context("build slot", e))?;

        if pos.is_empty() {
            info!("no stored position, starting initial copy");

            self.initial_copy(&slot, &driver, &mut generator)
                .await
                .map_err(|e| Error::context("initial copy", e))?;

            driver
                .execute(&generator.position_sql(conn.position()))
                .map_err(|e| Error::context("track position after copy", e))?;

            info!(pos = %conn.position(), "initial copy finished");
        }

        let mut stream = conn.start(&slot).await?;

        while let Some(msg) = stream.recv().await {
            let msg = msg?;

            let sql = generator
                .translate(msg)
                .map_err(|e| Error::context("generate sql", e))?;

            let Some(sql) = sql else {
                continue;
            };

            if sql.is_empty() {
                continue;
            }

            driver
                .execute(&sql)
                .map_err(|e| Error::context("apply sql", e))?;
        }

        info!("replication stream ended");
        Ok(())
    }

    /// Copies every table of the configured schema through a second,
    /// non-replication connection pinned to the slot's exported snapshot.
    /// The snapshot transaction is rolled back on any error, panics
    /// included, so a failed copy leaves no starting position behind and
    /// the next run re-attempts it.
    async fn initial_copy(
        &self,
        slot: &Slot,
        driver: &SqliteDriver,
        generator: &mut SqliteGenerator,
    ) -> Result<()> {
        let (client, connection) =
            tokio_postgres::connect(&self.config.postgres_url(), NoTls).await?;

        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("snapshot connection error: {}", e);
            }
        });

        let mut begin =
            "BEGIN TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY;".to_string();

        if let Some(snapshot) = &slot.snapshot_name {
            begin.push_str(&format!(" SET TRANSACTION SNAPSHOT '{snapshot}';"));
        }

        debug!(sql = %begin, "opening snapshot transaction");
        client.batch_execute(&begin).await?;

        let result = AssertUnwindSafe(copy_tables(
            &client,
            &self.config.upstream.schema,
            driver,
            generator,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(Error::Replication {
                message: "initial copy panicked".to_string(),
            })
        });

        match &result {
            Ok(()) => {
                client.batch_execute("COMMIT;").await?;
                debug!("snapshot transaction committed");
            }
            Err(_) => {
                // Best effort: the transaction dies with the connection
                // anyway, but an explicit rollback frees the snapshot early.
                if let Err(e) = client.batch_execute("ROLLBACK;").await {
                    error!("rollback of snapshot transaction failed: {}", e);
                } else {
                    debug!("snapshot transaction rolled back");
                }
            }
        }

        connection_task.abort();
        result
    }
}

async fn copy_tables(
    client: &Client,
    schema_name: &str,
    driver: &SqliteDriver,
    generator: &mut SqliteGenerator,
) -> Result<()> {
    let defs = schema::table_col_defs(client, schema_name)
        .await
        .map_err(|e| Error::context("load col defs", e))?;

    for (table, columns) in &defs {
        let ddl = generator.copy_create_table(table, columns);
        debug!(sql = %ddl, "copy create table");
        driver.execute(&ddl)?;

        let decoders = fields::decoders(columns)?;

        let copy_query = format!("COPY {table} TO STDOUT WITH BINARY;");
        let copy_stream = client
            .copy_out(copy_query.as_str())
            .await
            .map_err(|e| Error::context("copy table", e))?;

        futures::pin_mut!(copy_stream);

        let mut body = Vec::new();
        while let Some(chunk) = copy_stream.try_next().await? {
            body.extend_from_slice(&chunk);
        }

        let rows = copy::decode_copy_rows(&body, &decoders)?;
        info!(table = %table, rows = rows.len(), "copying table");

        for row in rows {
            driver.execute(&generator.insert_copy_row(table, &row))?;
        }
    }

    Ok(())
}

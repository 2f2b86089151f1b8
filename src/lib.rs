//! # sqledge
//!
//! A read-replica edge cache for PostgreSQL: continuously mirrors an
//! upstream database into a local embedded SQLite file over logical
//! replication, so nearby clients can read a recent state of the primary
//! without running a full Postgres replica.
//!
//! ## Overview
//!
//! `sqledge` connects to PostgreSQL as a logical replication client,
//! performs an initial consistent snapshot copy of every table in the
//! configured schema, then consumes the `pgoutput` stream and translates
//! each change into SQL against the local store. It provides:
//!
//! - **Snapshot-then-tail** startup: the initial copy runs under the
//!   replication slot's exported snapshot, so no change is lost or applied
//!   twice across the handoff
//! - **Durable resume**: the last-applied LSN is stored in the local
//!   database, in the same transaction as the data it covers
//! - **Schema following**: upstream `ADD COLUMN`/`DROP COLUMN` (non-key)
//!   are mirrored as local `ALTER TABLE` statements
//! - **At-least-once apply**: a crash never loses a committed upstream
//!   transaction and never leaves a partial one behind
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sqledge::{Config, Replicator, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Load configuration from environment variables
//!     let config = Config::from_env()?;
//!
//!     // Create and run the mirror
//!     let mut replicator = Replicator::new(config);
//!     replicator.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Configuration is loaded from `SQLEDGE_*` environment variables; every
//! variable has a default except the upstream password. See [`Config`] for
//! the full list.
//!
//! ## PostgreSQL Setup
//!
//! 1. Enable logical replication in `postgresql.conf`:
//!    ```ini
//!    wal_level = logical
//!    max_replication_slots = 4
//!    max_wal_senders = 4
//!    ```
//!
//! 2. Connect as a user with the REPLICATION attribute:
//!    ```sql
//!    CREATE USER replicator WITH REPLICATION LOGIN PASSWORD 'secret';
//!    GRANT CONNECT ON DATABASE mydb TO replicator;
//!    GRANT USAGE ON SCHEMA public TO replicator;
//!    GRANT SELECT ON ALL TABLES IN SCHEMA public TO replicator;
//!    ```
//!
//! The publication named in the configuration is dropped and recreated
//! `FOR ALL TABLES` at startup.
//!
//! ## Architecture
//!
//! - [`replicator`] - mirror orchestrator: position resolution, initial
//!   copy, stream-and-apply loop
//! - [`postgres`] - upstream side: replication session, pgoutput parser,
//!   binary COPY decoding, schema introspection
//! - [`sqlite`] - local side: SQL generation, DDL parsing, apply driver
//! - [`config`] - configuration structures and parsing
//! - [`error`] - error types and handling

/// Configuration structures and environment variable parsing
pub mod config;

/// Error types and result handling
pub mod error;

/// Mirror orchestrator that coordinates copy and streaming
pub mod replicator;

/// PostgreSQL logical replication connection and protocol handling
pub mod postgres;

/// Local store SQL generation and apply driver
pub mod sqlite;

pub use config::Config;
pub use error::{Error, Result};
pub use replicator::Replicator;

//! The long-lived logical replication session.
//!
//! One connection in `replication=database` mode runs the replication
//! commands (`IDENTIFY_SYSTEM`, slot and publication management) and then
//! switches into CopyBoth for `START_REPLICATION`. A background reader task
//! pumps frames off the socket, answers keepalives with standby status
//! updates, and hands decoded logical messages to the consumer through a
//! capacity-1 channel so the reported position never runs ahead of the
//! applier by more than the in-flight message.

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_postgres::{Client, Config, CopyBothDuplex, NoTls, SimpleQueryMessage};
use tracing::{debug, error, info, trace};

use crate::postgres::decoder;
use crate::postgres::types::{LogicalMessage, Lsn, SystemInfo};
use crate::{Error, Result};

/// Interval between standby status updates while the stream is quiet.
const STANDBY_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// Microseconds between the Unix epoch and 2000-01-01, the PostgreSQL epoch.
const POSTGRES_EPOCH_UNIX_MICROS: i64 = 946_684_800_000_000;

/// A replication slot handle. `snapshot_name` is only present when the slot
/// was freshly created in this session.
#[derive(Debug, Clone)]
pub struct Slot {
    pub name: String,
    pub snapshot_name: Option<String>,
}

pub struct ReplicationConnection {
    client: Client,
    connection_task: JoinHandle<()>,
    publication: String,
    pos: Lsn,
}

impl ReplicationConnection {
    /// Connects in replication mode. The connection string must carry
    /// `replication=database`.
    pub async fn connect(conn_string: &str, publication: &str) -> Result<Self> {
        let config = conn_string.parse::<Config>()?;
        let (client, connection) = config.connect(NoTls).await?;

        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("replication connection error: {}", e);
            }
        });

        info!("connected to upstream in replication mode");

        Ok(Self {
            client,
            connection_task,
            publication: publication.to_string(),
            pos: Lsn::default(),
        })
    }

    /// Runs `IDENTIFY_SYSTEM` and caches `xlogpos` as the initial position.
    pub async fn identify(&mut self) -> Result<SystemInfo> {
        let rows = self.client.simple_query("IDENTIFY_SYSTEM").await?;

        for message in rows {
            if let SimpleQueryMessage::Row(row) = message {
                let info = SystemInfo {
                    system_id: row.get("systemid").unwrap_or_default().to_string(),
                    timeline: row.get("timeline").unwrap_or("1").parse().unwrap_or(1),
                    xlogpos: row.get("xlogpos").unwrap_or("0/0").to_string(),
                    dbname: row.get("dbname").map(|s| s.to_string()),
                };

                self.pos = info.xlogpos.parse()?;
                debug!(?info, "identified upstream");
                return Ok(info);
            }
        }

        Err(Error::Replication {
            message: "IDENTIFY_SYSTEM returned no rows".to_string(),
        })
    }

    pub fn position(&self) -> Lsn {
        self.pos
    }

    /// Overrides the session cursor, normally with the position recovered
    /// from the local store.
    pub fn set_position(&mut self, pos: Lsn) {
        self.pos = pos;
    }

    pub async fn drop_publication(&self) -> Result<()> {
        self.client
            .simple_query(&format!("DROP PUBLICATION IF EXISTS {};", self.publication))
            .await?;
        Ok(())
    }

    pub async fn create_publication(&self) -> Result<()> {
        self.client
            .simple_query(&format!(
                "CREATE PUBLICATION {} FOR ALL TABLES;",
                self.publication
            ))
            .await?;
        Ok(())
    }

    /// Creates the replication slot, or adopts an existing one. The snapshot
    /// name comes back only on creation; it lets a second connection read
    /// the database state the slot was created at.
    pub async fn create_slot(
        &self,
        name: &str,
        plugin: &str,
        create: bool,
        temporary: bool,
    ) -> Result<Slot> {
        if !create {
            return Ok(Slot {
                name: name.to_string(),
                snapshot_name: None,
            });
        }

        let query = format!(
            "CREATE_REPLICATION_SLOT {}{} LOGICAL {}",
            name,
            if temporary { " TEMPORARY" } else { "" },
            plugin
        );

        match self.client.simple_query(&query).await {
            Ok(messages) => {
                for message in messages {
                    if let SimpleQueryMessage::Row(row) = message {
                        let consistent_point = row.get("consistent_point").unwrap_or("unknown");
                        let snapshot_name = row
                            .get("snapshot_name")
                            .filter(|s| !s.is_empty())
                            .map(|s| s.to_string());

                        info!(
                            slot = name,
                            lsn = consistent_point,
                            snapshot = ?snapshot_name,
                            "created replication slot"
                        );

                        return Ok(Slot {
                            name: name.to_string(),
                            snapshot_name,
                        });
                    }
                }

                Err(Error::Replication {
                    message: "slot creation returned no rows".to_string(),
                })
            }
            Err(e) if e.to_string().contains("already exists") => {
                info!(slot = name, "adopting existing replication slot");
                Ok(Slot {
                    name: name.to_string(),
                    snapshot_name: None,
                })
            }
            Err(e) => Err(Error::Postgres(e)),
        }
    }

    /// Issues `START_REPLICATION` from the session cursor and spawns the
    /// reader task. Consumes the connection; the returned stream owns it.
    pub async fn start(self, slot: &Slot) -> Result<MessageStream> {
        let query = format!(
            "START_REPLICATION SLOT {} LOGICAL {} (proto_version '2', \
             publication_names '{}', messages 'true', streaming 'false')",
            slot.name, self.pos, self.publication
        );

        info!(slot = %slot.name, pos = %self.pos, "starting replication");

        let duplex = self.client.copy_both_simple::<Bytes>(&query).await?;

        let (tx, rx) = mpsc::channel(1);
        let pos = self.pos;
        let client = self.client;

        let reader = tokio::spawn(async move {
            run_reader(Box::pin(duplex), client, pos, tx).await;
        });

        Ok(MessageStream {
            rx,
            reader,
            connection_task: self.connection_task,
        })
    }
}

/// The consumer half of the replication stream. Dropping it stops the
/// reader and closes the upstream connection.
pub struct MessageStream {
    rx: mpsc::Receiver<Result<LogicalMessage>>,
    reader: JoinHandle<()>,
    connection_task: JoinHandle<()>,
}

impl MessageStream {
    /// Receives the next logical message, in strict upstream order.
    /// `None` means the reader has shut down.
    pub async fn recv(&mut self) -> Option<Result<LogicalMessage>> {
        self.rx.recv().await
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.reader.abort();
        self.connection_task.abort();
    }
}

async fn run_reader(
    mut stream: Pin<Box<CopyBothDuplex<Bytes>>>,
    _client: Client,
    mut pos: Lsn,
    tx: mpsc::Sender<Result<LogicalMessage>>,
) {
    let mut deadline = Instant::now() + STANDBY_UPDATE_INTERVAL;
    let mut in_stream = false;

    loop {
        if Instant::now() >= deadline {
            trace!(pos = %pos, "status heartbeat");

            if let Err(e) = send_status_update(&mut stream, pos).await {
                let _ = tx.send(Err(e)).await;
                return;
            }

            deadline = Instant::now() + STANDBY_UPDATE_INTERVAL;
        }

        let frame = match timeout_at(deadline, stream.next()).await {
            // Deadline reached: loop around to send the heartbeat.
            Err(_) => continue,
            Ok(None) => {
                let _ = tx
                    .send(Err(Error::Connection(
                        "replication stream closed by upstream".to_string(),
                    )))
                    .await;
                return;
            }
            Ok(Some(Err(e))) => {
                let _ = tx.send(Err(Error::Postgres(e))).await;
                return;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        if frame.is_empty() {
            continue;
        }

        match frame[0] {
            b'k' => match decoder::parse_keepalive(&frame[1..]) {
                Ok(keepalive) => {
                    trace!(wal_end = %keepalive.wal_end, "keepalive");

                    if keepalive.reply_requested {
                        deadline = Instant::now();
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(Error::context("parse keepalive", e))).await;
                    return;
                }
            },
            b'w' => {
                let xld = match decoder::parse_xlog_data(&frame[1..]) {
                    Ok(xld) => xld,
                    Err(e) => {
                        let _ = tx.send(Err(Error::context("parse xlog data", e))).await;
                        return;
                    }
                };

                let msg = match decoder::parse_logical_message(&xld.data, in_stream) {
                    Ok(msg) => msg,
                    Err(e) => {
                        let _ = tx
                            .send(Err(Error::context("parse logical replication message", e)))
                            .await;
                        return;
                    }
                };

                if let Some(msg) = msg {
                    match &msg {
                        LogicalMessage::StreamStart { .. } => in_stream = true,
                        LogicalMessage::StreamStop => in_stream = false,
                        _ => {}
                    }

                    // Blocks until the applier takes the previous message;
                    // a closed channel means the consumer is gone.
                    if tx.send(Ok(msg)).await.is_err() {
                        return;
                    }
                }

                pos = xld.wal_start + xld.data.len() as u64;
            }
            other => {
                let _ = tx
                    .send(Err(Error::Protocol(format!(
                        "unexpected replication frame tag {:?}",
                        other as char
                    ))))
                    .await;
                return;
            }
        }
    }
}

/// Standby Status Update: reports `pos` as the written, flushed, and applied
/// position. Never requests a reply.
async fn send_status_update(
    stream: &mut Pin<Box<CopyBothDuplex<Bytes>>>,
    pos: Lsn,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(34);
    buf.put_u8(b'r');
    buf.put_u64(pos.0);
    buf.put_u64(pos.0);
    buf.put_u64(pos.0);
    buf.put_i64(postgres_epoch_micros());
    buf.put_u8(0);

    stream.send(buf.freeze()).await?;
    Ok(())
}

fn postgres_epoch_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
        - POSTGRES_EPOCH_UNIX_MICROS
}

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use sqledge::config::{Config, LocalConfig, ProxyConfig, ReplicationConfig, UpstreamConfig};
use tokio_postgres::{Client, NoTls};

/// Builds a mirror configuration against the TEST_PG_* upstream, with a
/// per-test slot, publication, and local store so runs do not collide.
pub fn test_config(tag: &str, local_path: PathBuf) -> Config {
    let unique = format!("sqledge_test_{}_{}", tag, std::process::id());

    Config {
        upstream: UpstreamConfig {
            user: env::var("TEST_PG_USERNAME").unwrap_or_else(|_| "postgres".to_string()),
            password: env::var("TEST_PG_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
            address: env::var("TEST_PG_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("TEST_PG_PORT")
                .unwrap_or_else(|_| "5432".to_string())
                .parse()
                .unwrap_or(5432),
            database: env::var("TEST_PG_DATABASE").unwrap_or_else(|_| "postgres".to_string()),
            schema: "public".to_string(),
        },
        replication: ReplicationConfig {
            plugin: "pgoutput".to_string(),
            slot_name: unique.clone(),
            create_slot: true,
            temporary: true,
            publication: unique,
        },
        local: LocalConfig { path: local_path },
        proxy: ProxyConfig {
            address: "localhost".to_string(),
            port: 5433,
        },
    }
}

/// Ordinary (non-replication) client against the test upstream.
pub async fn upstream_client(config: &Config) -> Client {
    let (client, connection) = tokio_postgres::connect(&config.postgres_url(), NoTls)
        .await
        .expect("connect to test upstream");

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("test connection error: {e}");
        }
    });

    client
}

/// Polls `check` until it returns true or the convergence window expires.
pub async fn wait_until<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);

    loop {
        if check() {
            return;
        }

        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Reads an entire local table as text, ordered by the first column.
pub fn local_rows(path: &std::path::Path, query: &str) -> Vec<Vec<Option<String>>> {
    let conn = match rusqlite::Connection::open(path) {
        Ok(conn) => conn,
        Err(_) => return Vec::new(),
    };

    let mut stmt = match conn.prepare(query) {
        Ok(stmt) => stmt,
        Err(_) => return Vec::new(),
    };

    let width = stmt.column_count();

    let rows = stmt.query_map([], |row| {
        let mut out = Vec::with_capacity(width);
        for i in 0..width {
            out.push(row.get::<_, Option<String>>(i)?);
        }
        Ok(out)
    });

    match rows {
        Ok(rows) => rows.filter_map(|r| r.ok()).collect(),
        Err(_) => Vec::new(),
    }
}

pub fn row(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

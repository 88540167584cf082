use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_WAL_FLUSH_MS: u64 = 50;
pub const DEFAULT_STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Directory for the write-ahead logs. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub wal_flush: Duration,
    pub compact_interval: Option<Duration>,
    /// Records buffered between the store and a slow list reader.
    pub stream_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            data_dir: None,
            wal_flush: Duration::from_millis(DEFAULT_WAL_FLUSH_MS),
            compact_interval: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `TANK_LISTEN` wins; without it the server binds every interface on
    /// `PORT`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let listen = match lookup("TANK_LISTEN") {
            Some(listen) => listen,
            None => format!("0.0.0.0:{}", parsed(&lookup, "PORT", DEFAULT_PORT)),
        };
        let listen: SocketAddr = listen
            .parse()
            .with_context(|| format!("TANK_LISTEN is not a socket address: {listen}"))?;
        let data_dir = lookup("TANK_DATA")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        let flush_ms = parsed(&lookup, "TANK_WAL_FLUSH_MS", DEFAULT_WAL_FLUSH_MS).max(1);
        let compact_interval = parsed::<u64>(&lookup, "TANK_COMPACT_INTERVAL_SECS", 0);
        let stream_buffer = parsed(&lookup, "TANK_STREAM_BUFFER", DEFAULT_STREAM_BUFFER).max(1);
        Ok(Self {
            listen,
            data_dir,
            wal_flush: Duration::from_millis(flush_ms),
            compact_interval: (compact_interval > 0).then(|| Duration::from_secs(compact_interval)),
            stream_buffer,
        })
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, %default, "unparseable setting, using default");
            default
        }),
    }
}

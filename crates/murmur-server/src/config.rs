use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use murmur_gateway::hub::DEFAULT_QUEUE_CAPACITY;
use murmur_gateway::session::SessionConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub queue_capacity: usize,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests never touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = lookup("MURMUR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse(&lookup, "MURMUR_PORT", 3000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("MURMUR_HOST {:?} is not a valid address", host))?;

        let db_path = PathBuf::from(lookup("MURMUR_DB_PATH").unwrap_or_else(|| "murmur.db".into()));
        let queue_capacity = parse(&lookup, "MURMUR_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        if queue_capacity == 0 {
            anyhow::bail!("MURMUR_QUEUE_CAPACITY must be at least 1");
        }

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            ping_interval: secs(&lookup, "MURMUR_PING_INTERVAL_SECS", defaults.ping_interval)?,
            read_deadline: secs(&lookup, "MURMUR_READ_DEADLINE_SECS", defaults.read_deadline)?,
            write_deadline: secs(&lookup, "MURMUR_WRITE_DEADLINE_SECS", defaults.write_deadline)?,
            max_frame_size: parse(&lookup, "MURMUR_MAX_FRAME_BYTES", defaults.max_frame_size)?,
        };
        if session.read_deadline <= session.ping_interval {
            anyhow::bail!("MURMUR_READ_DEADLINE_SECS must be longer than MURMUR_PING_INTERVAL_SECS");
        }

        Ok(Self {
            addr,
            db_path,
            queue_capacity,
            session,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value {:?}", key, raw)),
        None => Ok(default),
    }
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> anyhow::Result<Duration> {
    let value: u64 = parse(lookup, key, default.as_secs())?;
    if value == 0 {
        anyhow::bail!("{} must be at least 1", key);
    }
    Ok(Duration::from_secs(value))
}

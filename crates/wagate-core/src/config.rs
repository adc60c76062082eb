use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed runtime configuration.
///
/// All values come from the environment (a `.env` file is honored without
/// overriding already-set variables) with defaults matching the original
/// deployment.
#[derive(Clone, Debug)]
pub struct Config {
    // Operator control surface
    pub http_addr: SocketAddr,

    // Sessions
    pub sessions_dir: PathBuf,
    pub default_session_id: String,

    // Lifecycle
    /// Wait before requesting a pairing code on an unregistered transport.
    /// A heuristic, not a correctness guarantee: the transport has no
    /// readiness signal, and it rejects pairing requests issued too early.
    pub pairing_settle_delay: Duration,
    /// Delay between automatic reconnect attempts.
    pub reconnect_delay: Duration,
    /// Automatic reconnect attempts before giving up in the `error` phase.
    /// 0 means retry forever.
    pub max_reconnect_attempts: u32,

    // Dispatch
    pub dispatch_pacing: Duration,
    pub dispatch_max_targets: usize,
    pub burst_count: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let http_addr = env_str("WAGATE_HTTP_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("WAGATE_HTTP_ADDR: {e}")))?;

        let sessions_dir =
            env_path("WAGATE_SESSIONS_DIR").unwrap_or_else(|| PathBuf::from("./sessions"));
        fs::create_dir_all(&sessions_dir)?;

        let default_session_id =
            env_str("WAGATE_SESSION_ID").unwrap_or_else(|| "server_main".to_string());
        if default_session_id.trim().is_empty() {
            return Err(Error::Config(
                "WAGATE_SESSION_ID must not be empty".to_string(),
            ));
        }

        let pairing_settle_delay =
            Duration::from_millis(env_u64("WAGATE_PAIRING_SETTLE_MS").unwrap_or(5_000));
        let reconnect_delay =
            Duration::from_millis(env_u64("WAGATE_RECONNECT_DELAY_MS").unwrap_or(1_000));
        let max_reconnect_attempts = env_u32("WAGATE_MAX_RECONNECT_ATTEMPTS").unwrap_or(0);

        let dispatch_pacing =
            Duration::from_millis(env_u64("WAGATE_DISPATCH_PACING_MS").unwrap_or(2_000));
        let dispatch_max_targets = env_usize("WAGATE_DISPATCH_MAX_TARGETS").unwrap_or(1_000);
        if dispatch_max_targets == 0 {
            return Err(Error::Config(
                "WAGATE_DISPATCH_MAX_TARGETS must be at least 1".to_string(),
            ));
        }
        let burst_count = env_usize("WAGATE_BURST_COUNT").unwrap_or(5);

        Ok(Self {
            http_addr,
            sessions_dir,
            default_session_id,
            pairing_settle_delay,
            reconnect_delay,
            max_reconnect_attempts,
            dispatch_pacing,
            dispatch_max_targets,
            burst_count,
        })
    }
}

impl Default for Config {
    /// Defaults without touching the environment. Used by tests and by
    /// embedders that configure programmatically.
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8080".parse().expect("valid socket addr"),
            sessions_dir: PathBuf::from("./sessions"),
            default_session_id: "server_main".to_string(),
            pairing_settle_delay: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 0,
            dispatch_pacing: Duration::from_secs(2),
            dispatch_max_targets: 1_000,
            burst_count: 5,
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

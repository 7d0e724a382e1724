use std::env;
use std::time::Duration;

use dotenvy::dotenv;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Capacity of the global replay buffer, shared across workspaces.
    pub replay_capacity: usize,
    /// Interval between comment-only keepalive frames.
    pub heartbeat_interval: Duration,
    /// Optional inline JSON for the static directory, see
    /// [`StaticDirectory::from_json`](crate::auth::StaticDirectory::from_json).
    pub directory_json: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let replay_capacity = env::var("REPLAY_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);
        if replay_capacity == 0 {
            return Err(AppError::Config("REPLAY_CAPACITY must be positive".into()));
        }

        let heartbeat_secs: u64 = env::var("HEARTBEAT_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        if heartbeat_secs == 0 {
            return Err(AppError::Config(
                "HEARTBEAT_INTERVAL_SECS must be positive".into(),
            ));
        }

        let directory_json = env::var("DIRECTORY_JSON").ok().filter(|s| !s.trim().is_empty());

        Ok(Self {
            port,
            replay_capacity,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            directory_json,
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            port: 3000,
            replay_capacity: 100,
            heartbeat_interval: Duration::from_secs(30),
            directory_json: None,
        }
    }
}

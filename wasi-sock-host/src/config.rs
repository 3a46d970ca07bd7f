//! Context configuration and builder
//!
//! ```text
//! WasiConfig (serde)          collaborators
//! ──────────────────          ─────────────
//! recv/send buffer sizes      Connector     (transport factory)
//! /dev, /dev/tcp, urandom     RngCore       (random device)
//!          │                  clock         (clock_time_get)
//!          └──────────┬──────────┘
//!                     ▼
//!              WasiCtxBuilder::build()
//!                     │
//!                     ▼
//!        WasiCtx { fd 3: /dev, fd 4: /dev/tcp }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use wasi_sock_host::{TcpConnector, WasiConfig, WasiCtx};
//!
//! let ctx = WasiCtx::builder()
//!     .with_config(WasiConfig::default())
//!     .with_connector(TcpConnector)
//!     .build()?;
//! ```

use crate::ctx::{Clock, WasiCtx};
use crate::error::HostError;
use crate::transport::Connector;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Tunables of one shim instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WasiConfig {
    /// Capacity of each socket's receive buffer
    pub recv_buffer_size: usize,

    /// Capacity of each socket's transmit buffer
    pub send_buffer_size: usize,

    /// Guest path of the device directory (preopen 3)
    pub dev_dir: String,

    /// Guest path of the socket namespace (preopen 4)
    pub tcp_dir: String,

    /// File name of the random device inside `dev_dir`
    pub random_device: String,
}

impl Default for WasiConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: DEFAULT_BUFFER_SIZE,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
            dev_dir: "/dev".to_string(),
            tcp_dir: "/dev/tcp".to_string(),
            random_device: "urandom".to_string(),
        }
    }
}

impl WasiConfig {
    /// Check the values a context cannot run with
    pub fn validate(&self) -> Result<(), HostError> {
        if self.recv_buffer_size == 0 {
            return Err(HostError::invalid_config("recv_buffer_size must be non-zero"));
        }
        if self.send_buffer_size == 0 {
            return Err(HostError::invalid_config("send_buffer_size must be non-zero"));
        }
        for (field, dir) in [("dev_dir", &self.dev_dir), ("tcp_dir", &self.tcp_dir)] {
            if !dir.starts_with('/') || (dir.len() > 1 && dir.ends_with('/')) {
                return Err(HostError::invalid_config(format!(
                    "{} must be absolute without a trailing slash, got '{}'",
                    field, dir
                )));
            }
        }
        if self.dev_dir == self.tcp_dir {
            return Err(HostError::invalid_config("dev_dir and tcp_dir must differ"));
        }
        if self.random_device.is_empty() || self.random_device.contains('/') {
            return Err(HostError::invalid_config(format!(
                "random_device must be a plain file name, got '{}'",
                self.random_device
            )));
        }
        Ok(())
    }
}

/// Builder for [`WasiCtx`]
pub struct WasiCtxBuilder {
    config: WasiConfig,
    connector: Option<Arc<dyn Connector>>,
    random: Option<Box<dyn RngCore + Send>>,
    clock: Option<Clock>,
}

impl WasiCtxBuilder {
    pub fn new() -> Self {
        Self {
            config: WasiConfig::default(),
            connector: None,
            random: None,
            clock: None,
        }
    }

    pub fn with_config(mut self, config: WasiConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the transport factory used by socket paths
    ///
    /// Without one, opening a socket path fails with `nosys`.
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Share an already wrapped transport factory
    pub fn with_shared_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the random source (defaults to the OS generator)
    pub fn with_random(mut self, random: impl RngCore + Send + 'static) -> Self {
        self.random = Some(Box::new(random));
        self
    }

    /// Replace the wall clock read by `clock_time_get`
    pub fn with_clock(mut self, clock: impl Fn() -> SystemTime + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Validate the configuration and create the context
    ///
    /// # Errors
    ///
    /// Returns [`HostError::InvalidConfig`] if a buffer size is zero or the
    /// namespace paths are malformed.
    pub fn build(self) -> Result<WasiCtx, HostError> {
        self.config.validate()?;

        let random: Box<dyn RngCore + Send> = match self.random {
            Some(random) => random,
            None => Box::new(rand::rngs::OsRng),
        };
        let clock: Clock = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemTime::now),
        };

        if self.connector.is_none() {
            tracing::debug!("No connector configured; socket paths will report nosys");
        }

        Ok(WasiCtx::new(self.config, self.connector, random, clock))
    }
}

impl Default for WasiCtxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WasiCtxBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasiCtxBuilder")
            .field("config", &self.config)
            .field("connector", &self.connector.is_some())
            .field("random", &self.random.is_some())
            .field("clock", &self.clock.is_some())
            .finish()
    }
}

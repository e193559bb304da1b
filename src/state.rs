//! Shared application state.
//!
//! One [`AppState`] instance backs the whole server: the loaded
//! configuration, the backend connector every relay session dials through,
//! and the WebSocket connection accounting used by the connection-limit
//! middleware.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::config::ServerConfig;
use crate::core::relay::{BackendConnector, RealtimeBackendConnector, RelayResult};

/// Why a connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    /// The server-wide WebSocket connection cap is reached
    GlobalLimitReached,
    /// The per-IP connection cap is reached
    PerIpLimitReached,
}

/// Application state shared across handlers and middleware.
pub struct AppState {
    /// Loaded server configuration
    pub config: ServerConfig,
    /// Connector relay sessions dial the AI backend through
    backend_connector: Arc<dyn BackendConnector>,
    /// Live WebSocket connections, server-wide
    ws_connections: AtomicUsize,
    /// Live WebSocket connections per client IP
    connections_per_ip: DashMap<IpAddr, usize>,
}

impl AppState {
    /// Build state with the production backend connector.
    pub fn new(config: ServerConfig) -> RelayResult<Arc<Self>> {
        let connector = RealtimeBackendConnector::new(config.backend_config())?;
        Ok(Self::with_connector(config, Arc::new(connector)))
    }

    /// Build state around an injected connector. This is how tests host
    /// relay sessions against a fake backend.
    pub fn with_connector(config: ServerConfig, connector: Arc<dyn BackendConnector>) -> Arc<Self> {
        Arc::new(Self {
            config,
            backend_connector: connector,
            ws_connections: AtomicUsize::new(0),
            connections_per_ip: DashMap::new(),
        })
    }

    /// The connector relay sessions dial through.
    pub fn backend_connector(&self) -> Arc<dyn BackendConnector> {
        self.backend_connector.clone()
    }

    /// Reserve a connection slot for `ip`, or say why it cannot have one.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        if let Some(max) = self.config.max_websocket_connections
            && self.ws_connections.load(Ordering::SeqCst) >= max
        {
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        {
            let mut entry = self.connections_per_ip.entry(ip).or_insert(0);
            if *entry >= self.config.max_connections_per_ip {
                return Err(ConnectionLimitError::PerIpLimitReached);
            }
            *entry += 1;
        }

        self.ws_connections.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Release a slot previously acquired for `ip`. Releasing an IP with no
    /// live connections is a no-op.
    pub fn release_connection(&self, ip: IpAddr) {
        let Some(mut entry) = self.connections_per_ip.get_mut(&ip) else {
            return;
        };
        if *entry == 0 {
            return;
        }
        *entry -= 1;
        let now_empty = *entry == 0;
        drop(entry);
        if now_empty {
            self.connections_per_ip.remove_if(&ip, |_, count| *count == 0);
        }

        let _ = self
            .ws_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            });
    }

    /// Live WebSocket connections, server-wide.
    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    /// Live WebSocket connections for one client IP.
    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.connections_per_ip
            .get(ip)
            .map(|entry| *entry)
            .unwrap_or(0)
    }
}

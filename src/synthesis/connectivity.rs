//! Pre-flight network connectivity checks

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, Result};

/// Reports whether the remote provider is worth trying
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Connectivity flag set by the host (e.g. from an OS network callback)
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    #[must_use]
    pub const fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    #[must_use]
    pub const fn online() -> Self {
        Self::new(true)
    }

    #[must_use]
    pub const fn offline() -> Self {
        Self::new(false)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connectivity for StaticConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Probes connectivity with a short TCP connect to the provider host
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe `host:port` directly
    #[must_use]
    pub const fn new(addr: String, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    /// Probe the host serving `url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL has no host
    pub fn for_url(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid probe URL {url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::Config(format!("probe URL has no host: {url}")))?;
        let port = parsed.port_or_known_default().unwrap_or(443);

        Ok(Self::new(format!("{host}:{port}"), timeout))
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Connectivity for TcpProbe {
    async fn is_online(&self) -> bool {
        match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.addr)).await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(addr = %self.addr, error = %e, "connectivity probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(addr = %self.addr, "connectivity probe timed out");
                false
            }
        }
    }
}

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// Answers "is something accepting connections on `host:port`?".
///
/// The allocator and supervisor only see this trait, so tests can substitute
/// a fixed view of the network.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_in_use(&self, host: &str, port: u16) -> bool;
}

/// Probe by attempting a real TCP connect.
///
/// A completed handshake within the timeout means "in use"; refusal, timeout,
/// or any other error means "free". A port held in `LISTEN` by a process that
/// resets connections therefore reads as free.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

#[async_trait]
impl PortProbe for TcpProbe {
    async fn is_in_use(&self, host: &str, port: u16) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }
}

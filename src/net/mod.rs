//! Network helpers shared by the stream and datagram transports

use std::future::Future;
use std::time::Duration;

pub use tokio::net::{TcpStream, UdpSocket};

/// Runtime abstraction for common operations
pub struct Runtime;

impl Runtime {
    /// Sleep for the specified duration
    pub async fn sleep(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Run a future with a timeout
    ///
    /// # Errors
    ///
    /// Returns `TimeoutError` if the future does not complete within the specified duration.
    pub async fn timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(duration, future)
            .await
            .map_err(|_| TimeoutError)
    }

    /// Get current timestamp
    #[must_use]
    pub fn now() -> tokio::time::Instant {
        tokio::time::Instant::now()
    }
}

/// Timeout error
#[derive(Debug, Clone, Copy)]
pub struct TimeoutError;

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation timed out")
    }
}

impl std::error::Error for TimeoutError {}

/// Open a TCP stream with a connect timeout and Nagle disabled
///
/// # Errors
///
/// Returns an I/O error on refusal or `TimedOut` when the timeout elapses.
pub async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> std::io::Result<TcpStream> {
    let stream = Runtime::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, TimeoutError))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Bind a UDP socket for the datagram transport
///
/// # Errors
///
/// Returns an I/O error if the address cannot be bound.
pub async fn bind_udp(addr: &str) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(addr).await
}

/// Milliseconds since the Unix epoch, saturating on clock errors
#[must_use]
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

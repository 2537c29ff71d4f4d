//! Rendezvous over TCP
//!
//! Two rooms behind NATs learn each other's public endpoint through a
//! broker both can reach.
//!
//! ## Protocol
//!
//! The client sends its public endpoint as ASCII `"<ip>:<port>"`. The broker
//! holds the connection until a second client registers, then sends each
//! client the other's line. A reply that does not parse is treated as "not
//! yet available" and the client sends its registration again.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::retry::RetryPolicy;

/// Largest rendezvous message we read
const MAX_MESSAGE: usize = 2048;

/// How long the broker waits for a client's registration line
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Format an endpoint as `"<ip>:<port>"`
pub fn encode_endpoint(addr: SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

/// Parse `"<ip>:<port>"`, ignoring surrounding whitespace and NUL padding
pub fn decode_endpoint(data: &[u8]) -> Option<SocketAddr> {
    let text = std::str::from_utf8(data).ok()?;
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    let (ip, port) = text.rsplit_once(':')?;
    let ip: IpAddr = ip.parse().ok()?;
    let port: u16 = port.parse().ok()?;
    Some(SocketAddr::new(ip, port))
}

// === Client ===

/// Exchanges endpoints with a peer through a rendezvous broker
#[derive(Debug, Clone)]
pub struct RendezvousClient {
    host: String,
    port: u16,
    retry: RetryPolicy,
}

impl RendezvousClient {
    pub fn new(host: &str, port: u16, retry: RetryPolicy) -> Self {
        Self {
            host: host.to_string(),
            port,
            retry,
        }
    }

    /// Register `own` and wait for the peer's endpoint.
    ///
    /// A refused or closed connection fails immediately; malformed replies
    /// are retried on the same connection per the retry policy.
    pub async fn exchange(&self, own: SocketAddr, cancel: &CancellationToken) -> Result<SocketAddr> {
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(LinkError::Cancelled),
            stream = TcpStream::connect((self.host.as_str(), self.port)) => stream.map_err(|e| {
                LinkError::Rendezvous(format!(
                    "could not connect to broker {}:{}: {}",
                    self.host, self.port, e
                ))
            })?,
        };
        info!("Connected to rendezvous broker {}:{}", self.host, self.port);

        let message = encode_endpoint(own);
        let mut buf = vec![0u8; MAX_MESSAGE];
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if !self.retry.allows(attempt) {
                return Err(LinkError::RendezvousExhausted {
                    attempts: attempt - 1,
                });
            }

            stream
                .write_all(message.as_bytes())
                .await
                .map_err(|e| LinkError::Rendezvous(format!("write to broker: {}", e)))?;
            debug!("Sent {} to broker", message);

            let len = tokio::select! {
                _ = cancel.cancelled() => return Err(LinkError::Cancelled),
                read = stream.read(&mut buf) => {
                    read.map_err(|e| LinkError::Rendezvous(format!("read from broker: {}", e)))?
                }
            };
            if len == 0 {
                return Err(LinkError::Rendezvous(
                    "broker closed the connection".to_string(),
                ));
            }

            if let Some(peer) = decode_endpoint(&buf[..len]) {
                info!("Received peer address {}", peer);
                return Ok(peer);
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                "Malformed broker reply {:?}, retrying in {:?}",
                String::from_utf8_lossy(&buf[..len]),
                delay
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(LinkError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

// === Broker server ===

struct Registration {
    stream: TcpStream,
    line: String,
    from: SocketAddr,
}

/// Pairs rendezvous clients two at a time
pub struct RendezvousBroker {
    listener: TcpListener,
}

impl RendezvousBroker {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and pair clients until cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!("Rendezvous broker listening on {}", self.local_addr()?);

        let (tx, mut rx) = mpsc::channel::<Registration>(16);
        let mut waiting: Option<Registration> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Rendezvous broker stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, from)) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            if let Some(registration) = read_registration(stream, from).await {
                                let _ = tx.send(registration).await;
                            }
                        });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
                Some(registration) = rx.recv() => {
                    match waiting.take() {
                        None => waiting = Some(registration),
                        Some(first) => waiting = pair(first, registration).await,
                    }
                }
            }
        }
    }
}

async fn read_registration(mut stream: TcpStream, from: SocketAddr) -> Option<Registration> {
    let mut buf = vec![0u8; MAX_MESSAGE];
    let len = match tokio::time::timeout(REGISTRATION_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(len)) if len > 0 => len,
        Ok(Ok(_)) => return None,
        Ok(Err(e)) => {
            warn!("Read from {} failed: {}", from, e);
            return None;
        }
        Err(_) => {
            warn!("{} sent no registration in time", from);
            return None;
        }
    };

    match decode_endpoint(&buf[..len]) {
        Some(endpoint) => {
            info!("Received address info {} from {}", endpoint, from);
            Some(Registration {
                stream,
                line: encode_endpoint(endpoint),
                from,
            })
        }
        None => {
            warn!(
                "Rejected registration {:?} from {}",
                String::from_utf8_lossy(&buf[..len]),
                from
            );
            None
        }
    }
}

/// Send each client the other's endpoint. If the earlier client has gone
/// away, the later one is handed back to wait for the next registration.
async fn pair(mut first: Registration, mut second: Registration) -> Option<Registration> {
    if let Err(e) = first.stream.write_all(second.line.as_bytes()).await {
        warn!("{} left before pairing: {}", first.from, e);
        return Some(second);
    }

    match second.stream.write_all(first.line.as_bytes()).await {
        Ok(()) => info!("Exchanged addresses of {} and {}", first.from, second.from),
        Err(e) => warn!("Address exchange with {} incomplete: {}", second.from, e),
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_endpoint() {
        assert_eq!(
            decode_endpoint(b"203.0.113.7:27001"),
            Some("203.0.113.7:27001".parse().unwrap())
        );
        assert_eq!(
            decode_endpoint(b"10.0.0.1:5000\0\0\0"),
            Some("10.0.0.1:5000".parse().unwrap())
        );
        assert_eq!(
            decode_endpoint(b"::1:27001"),
            Some(SocketAddr::new("::1".parse().unwrap(), 27001))
        );
    }

    #[test]
    fn test_decode_rejects_short_and_malformed() {
        assert_eq!(decode_endpoint(b""), None);
        assert_eq!(decode_endpoint(b"10.0.0.1"), None);
        assert_eq!(decode_endpoint(b"10.0.0.1:"), None);
        assert_eq!(decode_endpoint(b"host:27001"), None);
        assert_eq!(decode_endpoint(b"10.0.0.1:99999"), None);
    }

    #[test]
    fn test_encode_matches_decode() {
        let addr: SocketAddr = "198.51.100.2:27003".parse().unwrap();
        assert_eq!(encode_endpoint(addr), "198.51.100.2:27003");
        assert_eq!(decode_endpoint(encode_endpoint(addr).as_bytes()), Some(addr));
    }
}

//! FTP protocol client
//!
//! The crawler talks to servers through the [`FtpClient`] trait so that
//! sessions can be driven by scripted doubles in tests. [`TcpFtpClient`] is
//! the real implementation: a plain-text control connection with passive
//! mode data transfers, enough for `LIST` walks.

use async_trait::async_trait;
use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

static RE_PASV: OnceLock<Regex> = OnceLock::new();

/// Upper bound on one listing transfer
const MAX_LISTING_BYTES: u64 = 64 * 1024 * 1024;

/// Errors raised while talking to an FTP server
#[derive(Debug, Error)]
pub enum FtpError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Unexpected reply {code}: {message}")]
    UnexpectedReply { code: u16, message: String },

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Passive mode is required")]
    ActiveModeUnsupported,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One FTP control session
///
/// A client may be closed and connected again any number of times.
#[async_trait]
pub trait FtpClient: Send {
    /// Open the control connection and log in
    async fn connect(&mut self, host: &str, port: u16, login: &str, password: &str) -> Result<(), FtpError>;

    /// Choose passive (`true`) or active data connections
    async fn set_passive(&mut self, passive: bool) -> Result<(), FtpError>;

    /// Raw lines of a directory listing; the root when `path` is `None`
    async fn list(&mut self, path: Option<&[u8]>) -> Result<Vec<Vec<u8>>, FtpError>;

    /// Close the control connection; a no-op when already closed
    async fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// Creates one client per crawl session
pub trait FtpConnector: Send + Sync {
    fn client(&self) -> Box<dyn FtpClient>;
}

// ============================================================================
// TCP implementation
// ============================================================================

/// Connector producing [`TcpFtpClient`]s
#[derive(Debug, Clone)]
pub struct TcpFtpConnector {
    timeout: Duration,
}

impl TcpFtpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl FtpConnector for TcpFtpConnector {
    fn client(&self) -> Box<dyn FtpClient> {
        Box::new(TcpFtpClient::new(self.timeout))
    }
}

struct Control {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: IpAddr,
    /// Deadline for each write and each reply line
    timeout: Duration,
}

impl Control {
    async fn send(&mut self, command: &[u8]) -> Result<(), FtpError> {
        let mut framed = command.to_vec();
        framed.extend_from_slice(b"\r\n");
        let writer = &mut self.writer;
        with_timeout(self.timeout, async move {
            writer.write_all(&framed).await?;
            writer.flush().await?;
            Ok::<_, FtpError>(())
        })
        .await
    }

    /// Read one possibly multi-line reply
    async fn reply(&mut self) -> Result<(u16, String), FtpError> {
        let first = self.line().await?;
        let code = reply_code(&first)?;

        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{} ", code);
            loop {
                let line = self.line().await?;
                if line.starts_with(&terminator) {
                    break;
                }
            }
        }

        Ok((code, first.get(4..).unwrap_or_default().trim().to_string()))
    }

    async fn line(&mut self) -> Result<String, FtpError> {
        let mut buf = Vec::new();
        let read = with_timeout(self.timeout, async {
            Ok::<_, FtpError>(self.reader.read_until(b'\n', &mut buf).await?)
        })
        .await?;
        if read == 0 {
            return Err(FtpError::ConnectionFailed("control connection closed".into()));
        }
        Ok(String::from_utf8_lossy(&buf).trim_end().to_string())
    }

    async fn command(&mut self, command: &[u8]) -> Result<(u16, String), FtpError> {
        self.send(command).await?;
        self.reply().await
    }
}

/// FTP client over a tokio TCP stream
pub struct TcpFtpClient {
    control: Option<Control>,
    passive: bool,
    timeout: Duration,
}

impl TcpFtpClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            control: None,
            passive: true,
            timeout,
        }
    }

    async fn open_data(&mut self) -> Result<TcpStream, FtpError> {
        let timeout = self.timeout;
        let control = self.control.as_mut().ok_or(FtpError::NotConnected)?;
        let (code, message) = control.command(b"PASV").await?;
        if code != 227 {
            return Err(FtpError::UnexpectedReply { code, message });
        }
        let port = pasv_port(&message)?;
        // Servers behind NAT often advertise a private address; reuse the control peer
        let addr = SocketAddr::new(control.peer, port);
        connect_with_timeout(addr, timeout).await
    }
}

#[async_trait]
impl FtpClient for TcpFtpClient {
    async fn connect(&mut self, host: &str, port: u16, login: &str, password: &str) -> Result<(), FtpError> {
        self.close().await;

        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(stream) => stream.map_err(|e| FtpError::ConnectionFailed(format!("{}:{}: {}", host, port, e)))?,
            Err(_) => return Err(FtpError::Timeout(self.timeout)),
        };
        let peer = stream.peer_addr()?.ip();
        let (read, write) = stream.into_split();
        let mut control = Control {
            reader: BufReader::new(read),
            writer: write,
            peer,
            timeout: self.timeout,
        };

        let (code, message) = control.reply().await?;
        if code != 220 {
            return Err(FtpError::UnexpectedReply { code, message });
        }

        let (mut code, mut message) = control.command(format!("USER {}", login).as_bytes()).await?;
        if code == 331 {
            (code, message) = control.command(format!("PASS {}", password).as_bytes()).await?;
        }
        if code != 230 && code != 202 {
            return Err(FtpError::LoginRejected(format!("{} {}", code, message)));
        }

        debug!("Logged in to {}:{} as {}", host, port, login);
        self.control = Some(control);
        Ok(())
    }

    async fn set_passive(&mut self, passive: bool) -> Result<(), FtpError> {
        if !passive {
            return Err(FtpError::ActiveModeUnsupported);
        }
        self.passive = passive;
        Ok(())
    }

    async fn list(&mut self, path: Option<&[u8]>) -> Result<Vec<Vec<u8>>, FtpError> {
        if !self.passive {
            return Err(FtpError::ActiveModeUnsupported);
        }
        let data = self.open_data().await?;
        let control = self.control.as_mut().ok_or(FtpError::NotConnected)?;

        let mut command = b"LIST".to_vec();
        if let Some(path) = path {
            command.push(b' ');
            command.extend_from_slice(path);
        }
        let (code, message) = control.command(&command).await?;
        if code != 125 && code != 150 {
            return Err(FtpError::UnexpectedReply { code, message });
        }

        let mut raw = Vec::new();
        with_timeout(self.timeout, async {
            Ok::<_, FtpError>(data.take(MAX_LISTING_BYTES).read_to_end(&mut raw).await?)
        })
        .await?;

        let (code, message) = control.reply().await?;
        if code != 226 && code != 250 {
            return Err(FtpError::UnexpectedReply { code, message });
        }

        Ok(raw
            .split(|b| *b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
            .filter(|line| !line.is_empty())
            .collect())
    }

    async fn close(&mut self) {
        if let Some(mut control) = self.control.take() {
            // Best effort; the connection is dropped either way
            let _ = control.command(b"QUIT").await;
        }
    }

    fn is_connected(&self) -> bool {
        self.control.is_some()
    }
}

/// Run `io`, failing with [`FtpError::Timeout`] once `timeout` elapses
async fn with_timeout<T, F>(timeout: Duration, io: F) -> Result<T, FtpError>
where
    F: std::future::Future<Output = Result<T, FtpError>>,
{
    tokio::time::timeout(timeout, io)
        .await
        .unwrap_or(Err(FtpError::Timeout(timeout)))
}

async fn connect_with_timeout(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, FtpError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(FtpError::Timeout(timeout)),
    }
}

fn reply_code(line: &str) -> Result<u16, FtpError> {
    line.get(..3)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| FtpError::MalformedReply(line.to_string()))
}

/// Data port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply
fn pasv_port(message: &str) -> Result<u16, FtpError> {
    let re = RE_PASV.get_or_init(|| {
        Regex::new(r"(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})")
            .expect("valid pasv regex")
    });
    let caps = re
        .captures(message)
        .ok_or_else(|| FtpError::MalformedReply(message.to_string()))?;
    let high: u16 = caps[5].parse().map_err(|_| FtpError::MalformedReply(message.to_string()))?;
    let low: u16 = caps[6].parse().map_err(|_| FtpError::MalformedReply(message.to_string()))?;
    if high > 255 || low > 255 {
        return Err(FtpError::MalformedReply(message.to_string()));
    }
    Ok(high * 256 + low)
}

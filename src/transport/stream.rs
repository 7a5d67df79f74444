//! Server addresses and stream connect.
//!
//! # Example
//!
//! ```
//! use iproto_client::transport::Address;
//!
//! let addr: Address = "127.0.0.1:3301".parse().unwrap();
//! assert_eq!(addr, Address::Tcp("127.0.0.1:3301".into()));
//!
//! let addr: Address = "unix:/var/run/tarantool.sock".parse().unwrap();
//! assert_eq!(addr.to_string(), "unix:/var/run/tarantool.sock");
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Any byte stream the connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased connected stream.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// `host:port`
    Tcp(String),
    /// Path of a Unix domain socket.
    Unix(PathBuf),
}

impl FromStr for Address {
    type Err = io::Error;

    fn from_str(s: &str) -> io::Result<Self> {
        let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidInput, format!("{}: '{}'", msg, s));

        if let Some(path) = s.strip_prefix("unix:") {
            let path = path.strip_prefix("//").unwrap_or(path);
            if path.is_empty() {
                return Err(invalid("empty unix socket path"));
            }
            return Ok(Address::Unix(PathBuf::from(path)));
        }

        let host_port = s.strip_prefix("tcp://").unwrap_or(s);
        match host_port.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Address::Tcp(host_port.to_string()))
            }
            _ => Err(invalid("expected host:port")),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp(host_port) => f.write_str(host_port),
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Open a stream to `addr`.
pub async fn connect(addr: &Address) -> io::Result<BoxedStream> {
    match addr {
        Address::Tcp(host_port) => {
            let stream = TcpStream::connect(host_port.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Address::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        Address::Unix(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix sockets are not available on this platform",
        )),
    }
}

//! Server greeting.
//!
//! Right after accepting a connection the server sends a fixed 128-byte
//! banner made of two 64-byte lines:
//!
//! ```text
//! Tarantool 1.10.3 (Binary) 7d5e8a5a-7e2c-4b8f-9d51-6c3c0a7f3e11   \n
//! 8nV4Ur0ZIEY1yA0SstQkzQJqHdY8Sq0uIq4AvDNWPBM=                    \n
//! ```
//!
//! The first line names the server and its version, the second carries the
//! base64 salt used for authentication.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CodecError, CodecResult};

/// Size of the greeting banner.
pub const GREETING_SIZE: usize = 128;

const LINE_SIZE: usize = GREETING_SIZE / 2;

/// Server version from the greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `1.10.3`, ignoring any `-build-gHASH` suffix.
    fn parse(text: &str) -> Option<Self> {
        let numeric = text.split(|c: char| !c.is_ascii_digit() && c != '.').next()?;
        let mut parts = numeric.split('.').map(str::parse::<u32>);
        let major = parts.next()?.ok()?;
        let minor = parts.next().unwrap_or(Ok(0)).ok()?;
        let patch = parts.next().unwrap_or(Ok(0)).ok()?;
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Parsed greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub version: Version,
    /// Protocol named after the version, e.g. `Binary`.
    pub protocol: String,
    /// Instance uuid, when the server sends one.
    pub uuid: Option<String>,
    /// Base64 authentication salt.
    pub salt: String,
}

impl Greeting {
    /// Parse the 128-byte banner.
    pub fn parse(raw: &[u8]) -> CodecResult<Self> {
        if raw.len() < GREETING_SIZE {
            return Err(CodecError::Incomplete {
                needed: GREETING_SIZE - raw.len(),
            });
        }

        let (first, second) = raw[..GREETING_SIZE].split_at(LINE_SIZE);
        let first = line(first)?;
        let salt = line(second)?.to_string();

        let mut words = first.split_whitespace();
        if words.next() != Some("Tarantool") {
            return Err(CodecError::malformed(format!(
                "unexpected greeting '{}'",
                first
            )));
        }

        let version = words
            .next()
            .and_then(Version::parse)
            .ok_or_else(|| CodecError::malformed(format!("no version in greeting '{}'", first)))?;
        let protocol = words
            .next()
            .map(|p| p.trim_matches(|c| c == '(' || c == ')').to_string())
            .unwrap_or_else(|| "Binary".to_string());
        let uuid = words.next().map(str::to_string);

        Ok(Self {
            version,
            protocol,
            uuid,
            salt,
        })
    }

    /// Read and parse the greeting from a freshly connected stream.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Self> {
        let mut raw = [0u8; GREETING_SIZE];
        reader.read_exact(&mut raw).await?;
        Self::parse(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Encode a banner (used when serving connections).
    pub fn encode(&self) -> [u8; GREETING_SIZE] {
        let mut raw = [b' '; GREETING_SIZE];
        let mut first = format!("Tarantool {} ({})", self.version, self.protocol);
        if let Some(uuid) = &self.uuid {
            first.push(' ');
            first.push_str(uuid);
        }
        fill_line(&mut raw[..LINE_SIZE], &first);
        fill_line(&mut raw[LINE_SIZE..], &self.salt);
        raw
    }
}

fn line(raw: &[u8]) -> CodecResult<&str> {
    std::str::from_utf8(raw)
        .map(|s| s.trim_end_matches(['\n', ' ', '\0']))
        .map_err(|e| CodecError::malformed(format!("greeting is not utf-8: {}", e)))
}

fn fill_line(dst: &mut [u8], text: &str) {
    let n = text.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&text.as_bytes()[..n]);
    dst[dst.len() - 1] = b'\n';
}

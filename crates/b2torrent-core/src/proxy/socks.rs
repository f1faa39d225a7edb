//! SOCKS5 client negotiation over an established stream.
//!
//! Because the handshake only needs a byte stream, it can run inside a
//! tunnel that an earlier hop already opened. That is what makes hops stack.

use super::{check_network, BoxedStream, Dialer};
use crate::error::{Error, Result};
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(super) const SOCKS_VERSION: u8 = 0x05;
pub(super) const AUTH_NONE: u8 = 0x00;
pub(super) const AUTH_USER_PASS: u8 = 0x02;
pub(super) const AUTH_REJECTED: u8 = 0xFF;
pub(super) const CMD_CONNECT: u8 = 0x01;
pub(super) const ATYP_IPV4: u8 = 0x01;
pub(super) const ATYP_DOMAIN: u8 = 0x03;
pub(super) const ATYP_IPV6: u8 = 0x04;

/// Username/password pair for RFC 1929 sub-negotiation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username (1..=255 bytes).
    pub username: String,
    /// Password (1..=255 bytes).
    pub password: String,
}

impl Credentials {
    /// Fresh random credentials.
    ///
    /// Tor's `IsolateSOCKSAuth` places streams with distinct credentials on
    /// distinct circuits.
    pub fn random() -> Self {
        let mut user = [0u8; 8];
        let mut pass = [0u8; 8];
        OsRng.fill_bytes(&mut user);
        OsRng.fill_bytes(&mut pass);
        Self {
            username: hex::encode(user),
            password: hex::encode(pass),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials([REDACTED])")
    }
}

/// Split `host:port`, accepting bracketed IPv6 literals.
pub fn split_host_port(addr: &str) -> Result<(&str, u16)> {
    let invalid = || Error::Validation(format!("invalid address: {}", addr));

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        (host, tail.strip_prefix(':').ok_or_else(invalid)?)
    } else {
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        if host.contains(':') {
            return Err(invalid());
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host, port))
}

fn encode_connect_request(target: &str) -> Result<Vec<u8>> {
    let (host, port) = split_host_port(target)?;

    let mut request = Vec::with_capacity(7 + host.len());
    request.push(SOCKS_VERSION);
    request.push(CMD_CONNECT);
    request.push(0x00); // Reserved

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            // Names are resolved by the proxy, never locally.
            let name = host.as_bytes();
            if name.len() > 255 {
                return Err(Error::Validation("hostname too long".into()));
            }
            request.push(ATYP_DOMAIN);
            request.push(name.len() as u8);
            request.extend_from_slice(name);
        }
    }

    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}

async fn authenticate<S>(stream: &mut S, creds: &Credentials) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let user = creds.username.as_bytes();
    let pass = creds.password.as_bytes();
    if user.is_empty() || user.len() > 255 || pass.is_empty() || pass.len() > 255 {
        return Err(Error::Validation("invalid SOCKS5 credentials".into()));
    }

    let mut request = Vec::with_capacity(3 + user.len() + pass.len());
    request.push(0x01); // Sub-negotiation version
    request.push(user.len() as u8);
    request.extend_from_slice(user);
    request.push(pass.len() as u8);
    request.extend_from_slice(pass);

    stream
        .write_all(&request)
        .await
        .map_err(|e| Error::Socks(format!("auth request failed: {}", e)))?;

    let mut response = [0u8; 2];
    stream
        .read_exact(&mut response)
        .await
        .map_err(|e| Error::Socks(format!("auth response failed: {}", e)))?;

    if response[1] != 0x00 {
        return Err(Error::Socks("SOCKS5 authentication rejected".into()));
    }
    Ok(())
}

/// Run a SOCKS5 CONNECT to `target` over `stream`.
///
/// On success the stream is a tunnel to `target`.
pub async fn connect<S>(stream: &mut S, target: &str, auth: Option<&Credentials>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let request = encode_connect_request(target)?;

    let greeting: &[u8] = match auth {
        Some(_) => &[SOCKS_VERSION, 0x02, AUTH_NONE, AUTH_USER_PASS],
        None => &[SOCKS_VERSION, 0x01, AUTH_NONE],
    };
    stream
        .write_all(greeting)
        .await
        .map_err(|e| Error::Socks(format!("greeting failed: {}", e)))?;

    let mut response = [0u8; 2];
    stream
        .read_exact(&mut response)
        .await
        .map_err(|e| Error::Socks(format!("greeting response failed: {}", e)))?;

    if response[0] != SOCKS_VERSION {
        return Err(Error::Socks("invalid SOCKS5 version in greeting".into()));
    }

    match (response[1], auth) {
        (AUTH_NONE, _) => {}
        (AUTH_USER_PASS, Some(creds)) => authenticate(stream, creds).await?,
        (AUTH_REJECTED, _) => return Err(Error::Socks("no acceptable auth method".into())),
        (method, _) => {
            return Err(Error::Socks(format!("unexpected auth method {}", method)));
        }
    }

    stream
        .write_all(&request)
        .await
        .map_err(|e| Error::Socks(format!("connect request failed: {}", e)))?;

    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| Error::Socks(format!("connect response failed: {}", e)))?;

    if header[0] != SOCKS_VERSION {
        return Err(Error::Socks("invalid SOCKS5 version in response".into()));
    }
    if header[1] != 0x00 {
        return Err(Error::Socks(format!(
            "connect failed: {} (code {})",
            reply_message(header[1]),
            header[1]
        )));
    }

    // Bound address is unused but must be consumed.
    let remaining = match header[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .map_err(|e| Error::Socks(e.to_string()))?;
            len[0] as usize + 2
        }
        _ => return Err(Error::Socks("invalid SOCKS5 address type".into())),
    };
    let mut bound = vec![0u8; remaining];
    stream
        .read_exact(&mut bound)
        .await
        .map_err(|e| Error::Socks(e.to_string()))?;

    Ok(())
}

/// One proxy hop layered on top of another dialer.
pub struct Socks5Hop {
    proxy: String,
    inner: Arc<dyn Dialer>,
    auth: Option<Credentials>,
}

impl Socks5Hop {
    /// Reach `proxy` through `inner`, then CONNECT onward.
    pub fn new(proxy: impl Into<String>, inner: Arc<dyn Dialer>, auth: Option<Credentials>) -> Self {
        Self {
            proxy: proxy.into(),
            inner,
            auth,
        }
    }
}

#[async_trait]
impl Dialer for Socks5Hop {
    async fn dial(&self, network: &str, addr: &str) -> Result<BoxedStream> {
        check_network(network)?;
        let mut stream = self.inner.dial(network, &self.proxy).await?;
        connect(&mut stream, addr, self.auth.as_ref()).await?;
        Ok(stream)
    }
}

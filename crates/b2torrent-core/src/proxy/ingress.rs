//! Loopback SOCKS5 endpoint that carries each CONNECT through a [`Dialer`].
//!
//! Engines that can only be pointed at one SOCKS5 proxy are given this
//! endpoint's URL. Every stream they open then leaves the host through the
//! composed chain, and the target name is passed on unresolved.

use super::socks::{
    ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_NONE, AUTH_REJECTED, AUTH_USER_PASS, CMD_CONNECT,
    SOCKS_VERSION,
};
use super::Dialer;
use crate::error::{Error, Result};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

/// Pause after a failed accept so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A SOCKS5 server bound to `127.0.0.1` on an ephemeral port.
///
/// Dropping it stops the listener and closes every relayed stream.
pub struct SocksIngress {
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl SocksIngress {
    /// Bind and start relaying CONNECTs through `dialer`.
    pub async fn bind(dialer: Arc<dyn Dialer>) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(listener, dialer, shutdown.clone()));
        tracing::info!(port = addr.port(), "SOCKS ingress listening on loopback");

        Ok(Self { addr, shutdown })
    }

    /// Bound loopback address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `socks5://` URL for clients that take a proxy URL.
    pub fn proxy_url(&self) -> String {
        format!("socks5://{}", self.addr)
    }
}

impl Drop for SocksIngress {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, dialer: Arc<dyn Dialer>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let dialer = Arc::clone(&dialer);
                    let token = shutdown.child_token();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            result = relay(stream, dialer.as_ref()) => {
                                if let Err(e) = result {
                                    tracing::debug!(error = %e, "Ingress stream ended with error");
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ingress accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
    tracing::debug!("SOCKS ingress stopped");
}

async fn relay(mut client: TcpStream, dialer: &dyn Dialer) -> Result<()> {
    client.set_nodelay(true)?;
    let target = accept_connect(&mut client).await?;

    let mut upstream = match dialer.dial("tcp", &target).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = client.write_all(&reply(REPLY_GENERAL_FAILURE)).await;
            return Err(e);
        }
    };

    client
        .write_all(&reply(REPLY_SUCCEEDED))
        .await
        .map_err(|e| Error::Socks(format!("connect reply failed: {}", e)))?;
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}

/// Server side of the greeting and CONNECT request.
///
/// Returns the requested target as `host:port`. Credentials, when offered,
/// are accepted without inspection.
async fn accept_connect<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut head = [0u8; 2];
    read(stream, &mut head).await?;
    if head[0] != SOCKS_VERSION {
        return Err(Error::Socks(format!("unsupported SOCKS version {}", head[0])));
    }
    let mut methods = vec![0u8; head[1] as usize];
    read(stream, &mut methods).await?;

    if methods.contains(&AUTH_NONE) {
        write(stream, &[SOCKS_VERSION, AUTH_NONE]).await?;
    } else if methods.contains(&AUTH_USER_PASS) {
        write(stream, &[SOCKS_VERSION, AUTH_USER_PASS]).await?;
        skip_credentials(stream).await?;
        write(stream, &[0x01, 0x00]).await?;
    } else {
        write(stream, &[SOCKS_VERSION, AUTH_REJECTED]).await?;
        return Err(Error::Socks("no acceptable auth method offered".into()));
    }

    let mut request = [0u8; 4];
    read(stream, &mut request).await?;
    if request[0] != SOCKS_VERSION {
        return Err(Error::Socks("invalid SOCKS5 version in request".into()));
    }
    if request[1] != CMD_CONNECT {
        write(stream, &reply(REPLY_COMMAND_NOT_SUPPORTED)).await?;
        return Err(Error::Socks(format!("unsupported command {}", request[1])));
    }

    let host = match request[3] {
        ATYP_IPV4 => {
            let mut ip = [0u8; 4];
            read(stream, &mut ip).await?;
            Ipv4Addr::from(ip).to_string()
        }
        ATYP_IPV6 => {
            let mut ip = [0u8; 16];
            read(stream, &mut ip).await?;
            format!("[{}]", Ipv6Addr::from(ip))
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            read(stream, &mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            read(stream, &mut name).await?;
            String::from_utf8(name).map_err(|_| Error::Socks("hostname is not UTF-8".into()))?
        }
        other => {
            write(stream, &reply(REPLY_ADDRESS_NOT_SUPPORTED)).await?;
            return Err(Error::Socks(format!("unsupported address type {}", other)));
        }
    };

    let mut port = [0u8; 2];
    read(stream, &mut port).await?;
    Ok(format!("{}:{}", host, u16::from_be_bytes(port)))
}

async fn skip_credentials<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut version_len = [0u8; 2];
    read(stream, &mut version_len).await?;
    let mut user = vec![0u8; version_len[1] as usize];
    read(stream, &mut user).await?;
    let mut pass_len = [0u8; 1];
    read(stream, &mut pass_len).await?;
    let mut pass = vec![0u8; pass_len[0] as usize];
    read(stream, &mut pass).await
}

/// Reply with an unspecified IPv4 bound address.
fn reply(code: u8) -> [u8; 10] {
    [SOCKS_VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
}

async fn read<S>(stream: &mut S, buf: &mut [u8]) -> Result<()>
where
    S: AsyncRead + Unpin + ?Sized,
{
    stream
        .read_exact(buf)
        .await
        .map(|_| ())
        .map_err(|e| Error::Socks(format!("ingress read failed: {}", e)))
}

async fn write<S>(stream: &mut S, buf: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream
        .write_all(buf)
        .await
        .map_err(|e| Error::Socks(format!("ingress write failed: {}", e)))
}

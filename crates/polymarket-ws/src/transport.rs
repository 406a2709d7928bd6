//! Byte-stream transports underneath the WebSocket framing
//!
//! The connection only needs "something readable and writable"; how it was
//! established (plain TCP, rustls, an in-memory pipe in tests) is hidden
//! behind [`Transport`] and produced by a [`Connector`].

use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Bidirectional byte stream, already past any TLS negotiation
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed transport handed to the connection
pub type BoxedTransport = Box<dyn Transport>;

/// Opens a fresh transport to `host:port`
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, io::Result<BoxedTransport>>;
}

/// Plain TCP (`ws://`)
#[derive(Clone, Debug, Default)]
pub struct TcpConnector;

impl TcpConnector {
    async fn open(host: &str, port: u16) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!("TCP connected to {}:{}", host, port);
        Ok(stream)
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, io::Result<BoxedTransport>> {
        Box::pin(async move {
            let stream = Self::open(host, port).await?;
            Ok(Box::new(stream) as BoxedTransport)
        })
    }
}

#[cfg(feature = "tls")]
pub use tls::TlsConnector;

#[cfg(feature = "tls")]
mod tls {
    use super::*;

    use tokio_rustls::rustls::{self, pki_types::ServerName, RootCertStore};

    /// TCP + rustls (`wss://`), trusting the webpki root set
    #[derive(Clone)]
    pub struct TlsConnector {
        inner: tokio_rustls::TlsConnector,
    }

    impl TlsConnector {
        /// Build a connector using the *ring* provider and webpki roots
        pub fn new() -> Result<Self, rustls::Error> {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let provider = rustls::crypto::CryptoProvider::get_default()
                .cloned()
                .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

            let mut config = rustls::ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()?
                .with_root_certificates(roots)
                .with_no_client_auth();
            config.alpn_protocols = vec![b"http/1.1".to_vec()];

            Ok(Self { inner: tokio_rustls::TlsConnector::from(Arc::new(config)) })
        }
    }

    impl std::fmt::Debug for TlsConnector {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("TlsConnector").finish_non_exhaustive()
        }
    }

    impl Connector for TlsConnector {
        fn connect<'a>(
            &'a self,
            host: &'a str,
            port: u16,
        ) -> BoxFuture<'a, io::Result<BoxedTransport>> {
            Box::pin(async move {
                let domain = ServerName::try_from(host.to_string())
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid dnsname"))?;
                let tcp = TcpConnector::open(host, port).await?;
                let tls = self.inner.connect(domain, tcp).await?;
                debug!("TLS established with {}", host);
                Ok(Box::new(tls) as BoxedTransport)
            })
        }
    }
}

/// Connector matching the endpoint scheme. Fails only if the TLS client
/// configuration cannot be built.
pub fn default_connector(tls: bool) -> io::Result<Arc<dyn Connector>> {
    if tls {
        #[cfg(feature = "tls")]
        return match TlsConnector::new() {
            Ok(connector) => Ok(Arc::new(connector)),
            Err(e) => Err(io::Error::other(e)),
        };
        #[cfg(not(feature = "tls"))]
        tracing::warn!("Built without the `tls` feature; connecting over plain TCP");
    }
    Ok(Arc::new(TcpConnector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connector_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut transport = TcpConnector.connect("127.0.0.1", port).await.unwrap();
        transport.write_all(b"ping").await.unwrap();
        let mut echoed = [0u8; 4];
        transport.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(TcpConnector.connect("127.0.0.1", port).await.is_err());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_tls_connector_builds() {
        assert!(TlsConnector::new().is_ok());
    }

    #[test]
    fn test_default_connector_for_both_schemes() {
        assert!(default_connector(false).is_ok());
        assert!(default_connector(true).is_ok());
    }
}

//! Broker addressing and the TLS dialer.
//!
//! A [`BrokerTarget`] is validated completely when it is built: the URL is
//! parsed, the server name checked and the rustls `ClientConfig` assembled
//! from the configured CA bundle (and client credentials, for mutual TLS).
//! Dialing then only does network work.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::error::{ReverseError, ReverseResult, TimeoutKind};
use crate::pem;
use crate::settings::{ClientAuth, ReverseSettings, TrustSource};
use crate::transport::Dialer;

/// Port used when the broker URL does not name one.
pub const DEFAULT_BROKER_PORT: u16 = 443;

/// The parsed broker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Always starts with `/`.
    pub path: String,
}

impl BrokerEndpoint {
    /// Parses `scheme://host[:port][/path]`. IPv6 hosts are bracketed.
    pub fn parse(url: &str) -> ReverseResult<Self> {
        let invalid = |why: &str| ReverseError::config(format!("broker url {url:?}: {why}"));

        let (scheme, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        if scheme.is_empty() {
            return Err(invalid("missing scheme"));
        }

        let (authority, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, "/"),
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 address"))?;
            match after {
                "" => (host, None),
                _ => (
                    host,
                    Some(after.strip_prefix(':').ok_or_else(|| invalid("malformed port"))?),
                ),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            None => DEFAULT_BROKER_PORT,
            Some(p) => match p.parse::<u16>() {
                Ok(0) | Err(_) => return Err(invalid("invalid port")),
                Ok(port) => port,
            },
        };

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// `host:port`, with IPv6 hosts bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.address(), self.path)
    }
}

/// A broker endpoint together with everything needed to authenticate it.
#[derive(Debug, Clone)]
pub struct BrokerTarget {
    endpoint: BrokerEndpoint,
    server_name: ServerName<'static>,
    tls: Arc<ClientConfig>,
}

impl BrokerTarget {
    /// Builds the target described by the broker fields of `settings`.
    pub fn from_settings(settings: &ReverseSettings) -> ReverseResult<Self> {
        let endpoint = BrokerEndpoint::parse(&settings.broker_url)?;
        let trust = settings
            .trust
            .as_ref()
            .ok_or_else(|| ReverseError::config("broker CA certificate is required"))?;
        Self::new(
            endpoint,
            settings.server_name.as_deref(),
            trust,
            settings.client_auth.as_ref(),
        )
    }

    pub fn new(
        endpoint: BrokerEndpoint,
        server_name: Option<&str>,
        trust: &TrustSource,
        client_auth: Option<&ClientAuth>,
    ) -> ReverseResult<Self> {
        let name = server_name.unwrap_or(&endpoint.host);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|e| ReverseError::config(format!("invalid TLS server name {name:?}: {e}")))?;
        let tls = Arc::new(client_config(trust, client_auth)?);

        Ok(Self {
            endpoint,
            server_name,
            tls,
        })
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn client_config(&self) -> &Arc<ClientConfig> {
        &self.tls
    }
}

fn read_pem(path: &std::path::Path, what: &str) -> ReverseResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        ReverseError::config(format!("failed to read {what} {}: {e}", path.display()))
    })
}

/// A client config trusting only the broker CA.
fn client_config(
    trust: &TrustSource,
    client_auth: Option<&ClientAuth>,
) -> ReverseResult<ClientConfig> {
    let ca_pem = match trust {
        TrustSource::CaFile(path) => read_pem(path, "broker CA file")?,
        TrustSource::CaPem(pem) => pem.clone(),
    };
    let ca_certs = pem::certificates(&ca_pem)
        .map_err(|e| ReverseError::config(format!("broker CA: {e}")))?;

    let mut roots = RootCertStore::empty();
    for cert in ca_certs {
        roots
            .add(cert)
            .map_err(|e| ReverseError::config(format!("broker CA rejected: {e}")))?;
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ReverseError::config(format!("TLS protocol setup: {e}")))?
    .with_root_certificates(roots);

    let Some(auth) = client_auth else {
        return Ok(builder.with_no_client_auth());
    };

    let chain = pem::certificates(&read_pem(&auth.cert_path, "client certificate")?)
        .map_err(|e| {
            ReverseError::config(format!("client certificate {}: {e}", auth.cert_path.display()))
        })?;
    let key = pem::private_key(&read_pem(&auth.key_path, "client key")?).map_err(|e| {
        ReverseError::config(format!("client key {}: {e}", auth.key_path.display()))
    })?;

    builder
        .with_client_auth_cert(chain, key)
        .map_err(|e| ReverseError::config(format!("client certificate rejected: {e}")))
}

/// Dials the broker over TCP and performs the TLS handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsDialer;

impl Dialer for TlsDialer {
    type Stream = TlsStream<TcpStream>;

    fn dial(
        &self,
        target: &BrokerTarget,
        timeout: Duration,
    ) -> impl Future<Output = ReverseResult<Self::Stream>> + Send {
        let host = target.endpoint.host.clone();
        let port = target.endpoint.port;
        let addr = target.endpoint.address();
        let server_name = target.server_name.clone();
        let connector = TlsConnector::from(Arc::clone(&target.tls));

        async move {
            let handshake = async {
                let tcp = TcpStream::connect((host.as_str(), port))
                    .await
                    .map_err(|source| ReverseError::Dial {
                        addr: addr.clone(),
                        source,
                    })?;
                if let Err(e) = tcp.set_nodelay(true) {
                    tracing::debug!(error = %e, "failed to set TCP_NODELAY");
                }
                connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| ReverseError::Handshake(e.to_string()))
            };

            // One deadline across both phases.
            tokio::time::timeout(timeout, handshake)
                .await
                .map_err(|_| ReverseError::Timeout(TimeoutKind::Dial))?
        }
    }
}

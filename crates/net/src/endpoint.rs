//! QUIC endpoints for deepmine sessions.
//!
//! Hosts present a throwaway self-signed certificate for [`SERVER_NAME`].
//! Clients skip chain validation but still check handshake signatures, and
//! both sides refuse a connection that did not negotiate [`ALPN`].

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use quinn::crypto::rustls::{HandshakeData, QuicClientConfig, QuicServerConfig};
use quinn::{ClientConfig, Connection, Endpoint, RecvStream, SendStream, ServerConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// ALPN identifier negotiated by both sides.
pub const ALPN: &[u8] = b"deepmine";

/// TLS server name on host certificates and in client dials.
pub const SERVER_NAME: &str = "deepmine.host";

/// Largest frame accepted on a reliable stream.
pub const MAX_FRAME_LEN: usize = 1 << 20;

const FRAME_PREFIX_LEN: usize = 4;
const KEEP_ALIVE: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn transport_config() -> Result<Arc<quinn::TransportConfig>> {
    let mut config = quinn::TransportConfig::default();
    config.keep_alive_interval(Some(KEEP_ALIVE));
    config.max_idle_timeout(Some(IDLE_TIMEOUT.try_into()?));
    Ok(Arc::new(config))
}

fn host_config() -> Result<ServerConfig> {
    let (cert, key) = host_certificate()?;
    let mut tls = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .context("Failed to build host TLS config")?;
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let mut config = ServerConfig::with_crypto(Arc::new(
        QuicServerConfig::try_from(tls).context("Host TLS config is not QUIC capable")?,
    ));
    config.transport_config(transport_config()?);
    Ok(config)
}

fn dial_config() -> Result<ClientConfig> {
    let provider = crypto_provider();
    let mut tls = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(HostCertificate(provider)))
        .with_no_client_auth();
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let mut config = ClientConfig::new(Arc::new(
        QuicClientConfig::try_from(tls).context("Client TLS config is not QUIC capable")?,
    ));
    config.transport_config(transport_config()?);
    Ok(config)
}

/// Protocol agreed during the TLS handshake, if any.
pub fn negotiated_alpn(connection: &Connection) -> Option<Vec<u8>> {
    connection
        .handshake_data()?
        .downcast::<HandshakeData>()
        .ok()?
        .protocol
}

fn require_deepmine(connection: &Connection) -> Result<()> {
    match negotiated_alpn(connection) {
        Some(protocol) if protocol == ALPN => Ok(()),
        other => {
            connection.close(0u32.into(), b"not a deepmine session");
            bail!(
                "peer {} negotiated {:?} instead of deepmine",
                connection.remote_address(),
                other.map(|p| String::from_utf8_lossy(&p).into_owned())
            )
        }
    }
}

/// Host endpoint accepting deepmine sessions.
#[derive(Clone)]
pub struct ServerEndpoint {
    endpoint: Endpoint,
    addr: SocketAddr,
}

impl ServerEndpoint {
    /// Bind to `addr` with a freshly generated certificate.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let endpoint = Endpoint::server(host_config()?, addr)
            .with_context(|| format!("Failed to bind game port {addr}"))?;
        let addr = endpoint.local_addr()?;
        info!(%addr, "accepting deepmine sessions");
        Ok(Self { endpoint, addr })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next incoming connection attempt; `None` once the endpoint is closed.
    pub async fn accept(&self) -> Option<quinn::Incoming> {
        self.endpoint.accept().await
    }

    /// Finish the QUIC handshake for `incoming` and check its ALPN.
    pub async fn establish(incoming: quinn::Incoming) -> Result<Connection> {
        let connection = incoming.await.context("Failed to accept connection")?;
        require_deepmine(&connection)?;
        Ok(connection)
    }

    /// Stop accepting and close every session.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"host shutting down");
    }
}

/// Client endpoint for dialling hosts.
pub struct ClientEndpoint {
    endpoint: Endpoint,
}

impl ClientEndpoint {
    /// Create a client endpoint on an ephemeral port.
    pub fn new() -> Result<Self> {
        let mut endpoint = Endpoint::client(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
            .context("Failed to open client socket")?;
        endpoint.set_default_client_config(dial_config()?);
        debug!(addr = %endpoint.local_addr()?, "client endpoint ready");
        Ok(Self { endpoint })
    }

    /// Dial `host` and wait for a deepmine session.
    pub async fn connect(&self, host: SocketAddr) -> Result<Connection> {
        let connection = self
            .endpoint
            .connect(host, SERVER_NAME)
            .with_context(|| format!("Failed to dial {host}"))?
            .await
            .with_context(|| format!("QUIC handshake with {host} failed"))?;
        require_deepmine(&connection)?;
        info!(%host, "session established");
        Ok(connection)
    }

    /// Close the endpoint and every connection on it.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"client shutting down");
    }

    /// Wait until close frames have been flushed.
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }
}

/// Write one `u32` length-prefixed frame.
pub async fn write_frame(send: &mut SendStream, data: &[u8]) -> Result<()> {
    if data.len() > MAX_FRAME_LEN {
        bail!("frame of {} bytes exceeds {MAX_FRAME_LEN}", data.len());
    }
    let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN + data.len());
    frame.write_u32::<LittleEndian>(data.len() as u32)?;
    frame.extend_from_slice(data);
    send.write_all(&frame)
        .await
        .context("Failed to write frame")?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer finished the stream cleanly
/// between frames.
pub async fn read_frame(recv: &mut RecvStream) -> Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; FRAME_PREFIX_LEN];
    match recv.read_exact(&mut prefix).await {
        Ok(()) => {}
        Err(quinn::ReadExactError::FinishedEarly(0)) => return Ok(None),
        Err(err) => return Err(err).context("Failed to read frame length"),
    }
    let len = prefix.as_slice().read_u32::<LittleEndian>()? as usize;
    if len > MAX_FRAME_LEN {
        bail!("frame of {len} bytes exceeds {MAX_FRAME_LEN}");
    }
    let mut data = vec![0u8; len];
    recv.read_exact(&mut data)
        .await
        .context("Failed to read frame body")?;
    Ok(Some(data))
}

/// Throwaway certificate for [`SERVER_NAME`].
fn host_certificate() -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
    let cert = rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()])
        .context("Failed to generate host certificate")?;
    let key = PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
    Ok((cert.cert.into(), key))
}

/// Accepts any host certificate chain but verifies handshake signatures
/// against the certificate presented.
#[derive(Debug)]
struct HostCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for HostCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};

use lansync_config::{CERT_ORGANIZATION, CERT_SERIAL, CERT_VALIDITY_DAYS, CHUNK_SIZE};
use lansync_core::helpers::create_buffer;
use lansync_core::utils::Logger;
use rcgen::{Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, KeyPair, KeyUsagePurpose, SerialNumber};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use time::{Duration, OffsetDateTime};

static LOGGER: Logger = Logger::verbose("Transport");

/// TLS is confidentiality only on a trusted LAN: every peer certificate is
/// accepted as-is.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }
    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }
    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

/// Fresh throwaway certificate, one per process: an RSA-2048 key, PKCS#8
/// encoded, self-signed through rcgen.
fn generate_identity() -> io::Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let key_der = key
        .to_pkcs8_der()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let key_pair = KeyPair::from_der(key_der.as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    let mut params = CertificateParams::new(vec![String::from("lansync")]);
    params.alg = &rcgen::PKCS_RSA_SHA256;
    params.key_pair = Some(key_pair);
    params
        .distinguished_name
        .push(DnType::OrganizationName, CERT_ORGANIZATION);
    params.serial_number = Some(SerialNumber::from(CERT_SERIAL.to_be_bytes().to_vec()));
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(CERT_VALIDITY_DAYS);
    params.key_usages = vec![
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let cert = Certificate::from_params(params)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let cert_der = cert
        .serialize_der()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    Ok((
        CertificateDer::from(cert_der),
        PrivateKeyDer::Pkcs8(key_der.as_bytes().to_vec().into()),
    ))
}

/// Both roles share the one process identity; both sides accept any peer.
pub struct TlsContext {
    client: Arc<ClientConfig>,
    server: Arc<ServerConfig>,
}

impl TlsContext {
    pub fn new() -> io::Result<TlsContext> {
        let (cert, key) = generate_identity()?;

        let client = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_client_auth_cert(vec![cert.clone()], key.clone_key())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let server = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        Ok(TlsContext {
            client: Arc::new(client),
            server: Arc::new(server),
        })
    }
}

/// One TLS connection, split for full duplex use from multiple threads.
///
/// rustls streams cannot be cloned the way a TcpStream can, so the pieces are
/// held separately: the TLS state machine behind its own mutex, one socket
/// handle that only the session's read loop touches, and a second socket
/// handle behind the mutex that doubles as the connection write lock.
///
/// Lock order is write socket before TLS state, everywhere. The read path
/// never sleeps while holding the TLS state lock.
pub struct TlsStream {
    conn: Mutex<Connection>,
    read_sock: TcpStream,
    write_sock: Mutex<TcpStream>,
    peer: SocketAddr,
}

impl TlsStream {
    /// Dial a peer and run the handshake to completion.
    pub fn connect(addr: &str, tls: &TlsContext) -> io::Result<TlsStream> {
        let sock = TcpStream::connect(addr)?;
        let host = addr.rsplit_once(':').map(|(h, _)| h).unwrap_or(addr);
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad peer address"))?;
        let conn = ClientConnection::new(tls.client.clone(), server_name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        TlsStream::new(Connection::from(conn), sock)
    }

    /// Wrap an accepted socket and run the handshake to completion.
    pub fn accept(sock: TcpStream, tls: &TlsContext) -> io::Result<TlsStream> {
        let conn = ServerConnection::new(tls.server.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        TlsStream::new(Connection::from(conn), sock)
    }

    fn new(conn: Connection, sock: TcpStream) -> io::Result<TlsStream> {
        let peer = sock.peer_addr()?;
        let stream = TlsStream {
            read_sock: sock.try_clone()?,
            write_sock: Mutex::new(sock),
            conn: Mutex::new(conn),
            peer,
        };
        stream.handshake()?;
        LOGGER.debug(format!("handshake with {} complete", peer));
        Ok(stream)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn handshake(&self) -> io::Result<()> {
        loop {
            let (handshaking, wants_write) = {
                let conn = self.conn.lock().unwrap();
                (conn.is_handshaking(), conn.wants_write())
            };
            if wants_write {
                self.flush_tls()?;
                continue;
            }
            if !handshaking {
                return Ok(());
            }
            if !self.pump_read()? {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed during handshake",
                ));
            }
        }
    }

    /// Block on the read socket, feed whatever arrives to the TLS machine.
    /// Returns false once the peer has closed the transport.
    fn pump_read(&self) -> io::Result<bool> {
        let mut raw = create_buffer(CHUNK_SIZE);
        let n = (&self.read_sock).read(&mut raw)?;
        if n == 0 {
            return Ok(false);
        }
        {
            let mut conn = self.conn.lock().unwrap();
            let mut cursor = &raw[..n];
            while !cursor.is_empty() {
                if conn.read_tls(&mut cursor)? == 0 {
                    break;
                }
                conn.process_new_packets()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            }
        }
        // Post-handshake messages the peer may be waiting on
        if self.conn.lock().unwrap().wants_write() {
            self.flush_tls()?;
        }
        Ok(true)
    }

    fn flush_tls(&self) -> io::Result<()> {
        let mut sock = self.write_sock.lock().unwrap();
        let mut conn = self.conn.lock().unwrap();
        while conn.wants_write() {
            conn.write_tls(&mut *sock)?;
        }
        Ok(())
    }

    /// Read decrypted bytes. Ok(0) means the peer is gone. Only the session's
    /// own read loop may call this.
    pub fn read_plain(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            {
                let mut conn = self.conn.lock().unwrap();
                match conn.reader().read(buf) {
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
            }
            if !self.pump_read()? {
                return Ok(0);
            }
        }
    }

    /// Acquire the connection write lock. Everything written through one
    /// guard reaches the wire as one contiguous span: this is what keeps a
    /// FILE header and its payload from interleaving with other frames.
    pub fn writer(&self) -> TlsWriter<'_> {
        TlsWriter {
            stream: self,
            sock: self.write_sock.lock().unwrap(),
        }
    }

    /// Best-effort close from either side; unblocks the read loop.
    pub fn shutdown(&self) {
        self.conn.lock().unwrap().send_close_notify();
        let _ = self.flush_tls();
        let _ = self.read_sock.shutdown(Shutdown::Both);
    }
}

/// Read-side adapter for the session loop and everything layered on it.
pub struct PlainReader {
    pub stream: Arc<TlsStream>,
}

impl Read for PlainReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read_plain(buf)
    }
}

/// Write half of a TlsStream; holding it is holding the connection write lock.
pub struct TlsWriter<'a> {
    stream: &'a TlsStream,
    sock: MutexGuard<'a, TcpStream>,
}

impl Write for TlsWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut conn = self.stream.conn.lock().unwrap();
        let n = conn.writer().write(buf)?;
        while conn.wants_write() {
            conn.write_tls(&mut *self.sock)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        {
            let mut conn = self.stream.conn.lock().unwrap();
            while conn.wants_write() {
                conn.write_tls(&mut *self.sock)?;
            }
        }
        self.sock.flush()
    }
}

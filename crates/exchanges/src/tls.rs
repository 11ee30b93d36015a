//! Monoio-native TLS stream
//!
//! rustls drives the record layer; monoio's owned-buffer TCP stream moves
//! the bytes. Used by the WebSocket transport for `wss://` endpoints.
//!
//! A [`TlsStream`] is driven sequentially through the handshakes. After that
//! it is split: a [`TlsReader`] owns the read half, and every write goes
//! through a [`TlsSession`] that encrypts synchronously and queues whole
//! records for a writer task. An in-flight socket write is therefore never
//! abandoned halfway through a record.

use crate::errors::{Result, StreamError};
use flume::{Receiver, Sender};
use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt, Splitable};
use monoio::net::TcpStream;
use monoio::net::tcp::{TcpOwnedReadHalf, TcpOwnedWriteHalf};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, warn};

const TCP_READ_CHUNK: usize = 8192;

/// Client TLS configuration trusting the Mozilla root set
pub fn default_client_config() -> Arc<ClientConfig> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}

/// TLS session over a monoio TCP stream
pub struct TlsStream {
    stream: TcpStream,
    tls: ClientConnection,
    write_buf: Vec<u8>,
    read_buf: Option<Vec<u8>>,
}

impl TlsStream {
    /// Connect TCP, then run the TLS handshake to completion
    pub async fn connect(config: Arc<ClientConfig>, host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| StreamError::Connection(format!("TCP connect to {host}:{port} failed: {e}")))?;

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| StreamError::Connection(format!("Invalid server name {host}: {e}")))?;
        let tls = ClientConnection::new(config, server_name)
            .map_err(|e| StreamError::Connection(format!("TLS setup failed: {e}")))?;

        let mut tls_stream = Self {
            stream,
            tls,
            write_buf: Vec::with_capacity(TCP_READ_CHUNK),
            read_buf: Some(Vec::with_capacity(TCP_READ_CHUNK)),
        };
        tls_stream.handshake().await?;
        debug!("✅ TLS handshake completed with {}", host);

        Ok(tls_stream)
    }

    async fn handshake(&mut self) -> Result<()> {
        while self.tls.is_handshaking() {
            self.flush_tls().await?;
            if !self.tls.is_handshaking() {
                break;
            }
            if self.tls.wants_read() {
                if self.fill_from_tcp().await? == 0 {
                    return Err(StreamError::Connection("Connection closed during TLS handshake".to_string()));
                }
            } else if !self.tls.wants_write() {
                return Err(StreamError::Connection("TLS handshake stalled".to_string()));
            }
        }
        self.flush_tls().await
    }

    /// Push every pending TLS record to the socket
    async fn flush_tls(&mut self) -> Result<()> {
        while self.tls.wants_write() {
            self.write_buf.clear();
            self.tls
                .write_tls(&mut self.write_buf)
                .map_err(|e| StreamError::Network(format!("TLS write failed: {e}")))?;
            if self.write_buf.is_empty() {
                continue;
            }

            let (result, buf) = self.stream.write_all(std::mem::take(&mut self.write_buf)).await;
            self.write_buf = buf;
            result.map_err(|e| StreamError::Network(format!("TCP write failed: {e}")))?;
        }
        Ok(())
    }

    /// Read one TCP chunk into the TLS engine; returns bytes read (0 on EOF)
    async fn fill_from_tcp(&mut self) -> Result<usize> {
        let mut buf = self.read_buf.take().unwrap_or_else(|| Vec::with_capacity(TCP_READ_CHUNK));
        buf.clear();

        let (result, buf) = self.stream.read(buf).await;
        let read = match result {
            Ok(n) => n,
            Err(e) => {
                self.read_buf = Some(buf);
                return Err(StreamError::Network(format!("TCP read failed: {e}")));
            }
        };

        let processed = if read > 0 { self.feed_tls(&buf[..read]) } else { Ok(()) };
        self.read_buf = Some(buf);
        processed?;

        Ok(read)
    }

    fn feed_tls(&mut self, data: &[u8]) -> Result<()> {
        self.tls
            .read_tls(&mut std::io::Cursor::new(data))
            .map_err(|e| StreamError::Network(format!("TLS read failed: {e}")))?;
        self.tls
            .process_new_packets()
            .map_err(|e| StreamError::Network(format!("TLS process failed: {e}")))?;
        Ok(())
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.tls
            .writer()
            .write_all(data)
            .map_err(|e| StreamError::Network(format!("TLS application write failed: {e}")))?;
        self.flush_tls().await
    }

    /// Read decrypted application bytes; `Ok(0)` means the peer closed
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.tls.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(e) => return Err(StreamError::Network(format!("TLS read failed: {e}"))),
            }

            if self.fill_from_tcp().await? == 0 {
                return Ok(0);
            }
            // Post-handshake messages (key updates, tickets) may need answering.
            self.flush_tls().await?;
        }
    }

    /// Hand the session over to a writer task and a [`TlsReader`]
    pub fn into_split(self) -> (TlsSession, TlsReader) {
        let (read_half, write_half) = self.stream.into_split();
        let (outbound_tx, outbound_rx) = flume::unbounded();
        monoio::spawn(write_loop(write_half, outbound_rx));

        let session = TlsSession {
            tls: Rc::new(RefCell::new(self.tls)),
            outbound: outbound_tx,
        };
        let reader = TlsReader {
            stream: read_half,
            session: session.clone(),
            read_buf: self.read_buf.unwrap_or_else(|| Vec::with_capacity(TCP_READ_CHUNK)),
        };
        (session, reader)
    }
}

/// Encrypted bytes queued for the socket, with an optional completion signal
pub(crate) struct Outbound {
    bytes: Vec<u8>,
    done: Option<Sender<Result<()>>>,
}

/// Writer task: owns the write half and writes queued records in order
async fn write_loop(mut stream: TcpOwnedWriteHalf, outbound: Receiver<Outbound>) {
    while let Ok(Outbound { bytes, done }) = outbound.recv_async().await {
        let result = if bytes.is_empty() {
            Ok(())
        } else {
            let (result, _) = stream.write_all(bytes).await;
            result
                .map(|_| ())
                .map_err(|e| StreamError::Network(format!("TCP write failed: {e}")))
        };

        let failed = result.is_err();
        if let Err(e) = &result {
            warn!("TLS writer stopping: {}", e);
        }
        if let Some(done) = done {
            let _ = done.send(result);
        }
        if failed {
            break;
        }
    }

    let _ = stream.shutdown().await;
    debug!("TLS writer stopped");
}

/// Shared write side of a split TLS session
#[derive(Clone)]
pub struct TlsSession {
    tls: Rc<RefCell<ClientConnection>>,
    outbound: Sender<Outbound>,
}

impl TlsSession {
    /// Encrypt `data` and wait until its records reach the socket.
    ///
    /// Dropping the returned future does not cancel the write: the records are
    /// already queued when the first poll returns.
    pub async fn write_all(&self, data: &[u8]) -> Result<()> {
        let (done, completion) = flume::bounded(1);
        self.encrypt(data, Some(done))?;
        completion
            .recv_async()
            .await
            .map_err(|_| StreamError::Closed("TLS writer stopped".to_string()))?
    }

    /// Encrypt `data` and queue it without waiting
    pub fn write_detached(&self, data: &[u8]) -> Result<()> {
        self.encrypt(data, None)
    }

    /// Queue close_notify
    pub fn close_notify(&self) -> Result<()> {
        let mut tls = self.tls.borrow_mut();
        tls.send_close_notify();
        self.queue_pending(&mut tls, None)
    }

    fn encrypt(&self, data: &[u8], done: Option<Sender<Result<()>>>) -> Result<()> {
        let mut tls = self.tls.borrow_mut();
        tls.writer()
            .write_all(data)
            .map_err(|e| StreamError::Network(format!("TLS application write failed: {e}")))?;
        self.queue_pending(&mut tls, done)
    }

    /// Feed ciphertext from the socket and queue any records it provokes
    fn ingest(&self, data: &[u8]) -> Result<()> {
        let mut tls = self.tls.borrow_mut();
        let mut cursor = std::io::Cursor::new(data);
        while (cursor.position() as usize) < data.len() {
            tls.read_tls(&mut cursor)
                .map_err(|e| StreamError::Network(format!("TLS read failed: {e}")))?;
            tls.process_new_packets()
                .map_err(|e| StreamError::Network(format!("TLS process failed: {e}")))?;
        }
        self.queue_pending(&mut tls, None)
    }

    /// Drain pending records into one queue entry. Runs under the session
    /// borrow so queue order matches record sequence order.
    fn queue_pending(&self, tls: &mut ClientConnection, done: Option<Sender<Result<()>>>) -> Result<()> {
        if self.outbound.is_disconnected() {
            return Err(StreamError::Closed("TLS writer stopped".to_string()));
        }

        let mut bytes = Vec::new();
        while tls.wants_write() {
            tls.write_tls(&mut bytes)
                .map_err(|e| StreamError::Network(format!("TLS write failed: {e}")))?;
        }
        if bytes.is_empty() && done.is_none() {
            return Ok(());
        }

        self.outbound
            .send(Outbound { bytes, done })
            .map_err(|_| StreamError::Closed("TLS writer stopped".to_string()))
    }
}

/// Read side of a split TLS session
pub struct TlsReader {
    stream: TcpOwnedReadHalf,
    session: TlsSession,
    read_buf: Vec<u8>,
}

impl TlsReader {
    /// Read decrypted application bytes; `Ok(0)` means the peer closed
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let plaintext = self.session.tls.borrow_mut().reader().read(buf);
            match plaintext {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(e) => return Err(StreamError::Network(format!("TLS read failed: {e}"))),
            }

            let mut chunk = std::mem::take(&mut self.read_buf);
            chunk.clear();
            if chunk.capacity() == 0 {
                chunk.reserve(TCP_READ_CHUNK);
            }

            let (result, chunk) = self.stream.read(chunk).await;
            self.read_buf = chunk;
            let read = result.map_err(|e| StreamError::Network(format!("TCP read failed: {e}")))?;
            if read == 0 {
                return Ok(0);
            }
            self.session.ingest(&self.read_buf[..read])?;
        }
    }
}

#[cfg(test)]
impl TlsSession {
    /// Session with no socket behind it; queued writes land on the receiver
    pub(crate) fn unconnected() -> (Self, Receiver<Outbound>) {
        let server_name = ServerName::try_from("api.hyperliquid.xyz".to_string()).unwrap();
        let tls = ClientConnection::new(default_client_config(), server_name).unwrap();
        let (outbound, queued) = flume::unbounded();
        (
            Self {
                tls: Rc::new(RefCell::new(tls)),
                outbound,
            },
            queued,
        )
    }
}

//! Monoio-native WebSocket client and transport
//!
//! RFC 6455 client framing over [`TlsStream`], plus the [`WebSocketTransport`]
//! that hands the connection supervisor a [`Channel`] per connection.
//! Control frames are handled here: pings are answered, an idle receive
//! window sends a keepalive ping, and a close frame or EOF surfaces as
//! [`StreamError::Closed`]. A payload that is not UTF-8 surfaces as
//! [`StreamError::Serialization`] and the connection carries on.

use crate::errors::{Result, StreamError};
use crate::tls::{TlsReader, TlsSession, TlsStream, default_client_config};
use crate::traits::{Channel, Transport};
use hyperstream_core::{PerfTimer, nanos};

use async_trait::async_trait;
use base64::Engine;
use flume::{Receiver, Sender};
use rustls::ClientConfig;
use sha1::{Digest, Sha1};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HANDSHAKE_BYTES: usize = 16 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xa => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

/// A single WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: OpCode, payload: Vec<u8>) -> Self {
        Self { fin: true, opcode, payload }
    }

    pub fn text(data: &str) -> Self {
        Self::new(OpCode::Text, data.as_bytes().to_vec())
    }

    pub fn ping(data: Vec<u8>) -> Self {
        Self::new(OpCode::Ping, data)
    }

    pub fn pong(data: Vec<u8>) -> Self {
        Self::new(OpCode::Pong, data)
    }

    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::new(OpCode::Close, payload)
    }

    /// Encode as a masked client frame
    pub fn encode(&self, mask: [u8; 4]) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = Vec::with_capacity(len + 14);

        out.push(if self.fin { 0x80 } else { 0x00 } | self.opcode as u8);
        if len < 126 {
            out.push(0x80 | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(0x80 | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(0x80 | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
        out.extend_from_slice(&mask);
        out.extend(self.payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        out
    }

    /// Decode one frame from the front of `data`.
    ///
    /// `Ok(None)` means more bytes are needed; `Err` means the stream is corrupt.
    pub fn decode(data: &[u8]) -> Result<Option<(Frame, usize)>> {
        if data.len() < 2 {
            return Ok(None);
        }

        let fin = data[0] & 0x80 != 0;
        let opcode = OpCode::from_u8(data[0] & 0x0f)
            .ok_or_else(|| StreamError::Network(format!("Invalid WebSocket opcode {:#x}", data[0] & 0x0f)))?;
        let masked = data[1] & 0x80 != 0;

        let mut offset = 2;
        let payload_len = match data[1] & 0x7f {
            126 => {
                if data.len() < offset + 2 {
                    return Ok(None);
                }
                let len = u16::from_be_bytes([data[2], data[3]]) as usize;
                offset += 2;
                len
            }
            127 => {
                if data.len() < offset + 8 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&data[2..10]);
                offset += 8;
                usize::try_from(u64::from_be_bytes(raw))
                    .map_err(|_| StreamError::Network("WebSocket frame too large".to_string()))?
            }
            short => short as usize,
        };

        let mask = if masked {
            if data.len() < offset + 4 {
                return Ok(None);
            }
            let mask = [data[offset], data[offset + 1], data[offset + 2], data[offset + 3]];
            offset += 4;
            Some(mask)
        } else {
            None
        };

        if data.len() < offset + payload_len {
            return Ok(None);
        }

        let mut payload = data[offset..offset + payload_len].to_vec();
        if let Some(mask) = mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        Ok(Some((Frame { fin, opcode, payload }, offset + payload_len)))
    }
}

thread_local! {
    static ENTROPY_COUNTER: Cell<u64> = const { Cell::new(0) };
}

/// Client-side entropy for masks and handshake keys.
/// Masking only defeats proxy cache poisoning, so a hashed clock is enough.
fn entropy() -> [u8; 20] {
    let counter = ENTROPY_COUNTER.with(|c| {
        let next = c.get().wrapping_add(1);
        c.set(next);
        next
    });
    let mut hasher = Sha1::new();
    hasher.update(nanos().to_be_bytes());
    hasher.update(counter.to_be_bytes());
    let mut out = [0u8; 20];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn frame_mask() -> [u8; 4] {
    let bytes = entropy();
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn handshake_key() -> String {
    base64::engine::general_purpose::STANDARD.encode(&entropy()[..16])
}

/// Expected `Sec-WebSocket-Accept` for a handshake key
pub fn accept_key(ws_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(ws_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Outcome of feeding one frame to a [`MessageAssembler`]
#[derive(Debug, PartialEq, Eq)]
pub enum Assembled {
    /// A complete data message; `Err` when its payload is not UTF-8
    Message(Result<String>),
    /// A control frame that must be answered
    Reply(Frame),
    /// Peer sent a close frame with this status code
    Closed(u16),
    /// Fragment stored or control frame absorbed
    Pending,
}

/// Reassembles fragmented data frames and classifies control frames
#[derive(Debug, Default)]
pub struct MessageAssembler {
    fragments: Option<Vec<u8>>,
}

impl MessageAssembler {
    pub fn push(&mut self, frame: Frame) -> Result<Assembled> {
        match frame.opcode {
            OpCode::Ping => Ok(Assembled::Reply(Frame::pong(frame.payload))),
            OpCode::Pong => Ok(Assembled::Pending),
            OpCode::Close => {
                let code = frame
                    .payload
                    .get(..2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .unwrap_or(1005);
                Ok(Assembled::Closed(code))
            }
            OpCode::Text | OpCode::Binary if frame.fin => Ok(Assembled::Message(decode_text(frame.payload))),
            OpCode::Text | OpCode::Binary => {
                self.fragments = Some(frame.payload);
                Ok(Assembled::Pending)
            }
            OpCode::Continuation => {
                let Some(mut data) = self.fragments.take() else {
                    return Err(StreamError::Network("Continuation frame without a start".to_string()));
                };
                data.extend_from_slice(&frame.payload);
                if frame.fin {
                    return Ok(Assembled::Message(decode_text(data)));
                }
                self.fragments = Some(data);
                Ok(Assembled::Pending)
            }
        }
    }
}

fn decode_text(payload: Vec<u8>) -> Result<String> {
    String::from_utf8(payload).map_err(|e| StreamError::Serialization(format!("Invalid UTF-8 in frame: {e}")))
}

/// Monoio-native WebSocket client; performs the opening handshake and is
/// then turned into a [`WebSocketChannel`]
pub struct MonoioWebSocket {
    stream: TlsStream,
    buffer: Vec<u8>,
}

impl MonoioWebSocket {
    pub async fn connect(url: &Url, tls_config: Arc<ClientConfig>) -> Result<Self> {
        let timer = PerfTimer::start("websocket_connect");

        if url.scheme() != "wss" {
            return Err(StreamError::InvalidUrl(format!("Unsupported WebSocket scheme: {}", url.scheme())));
        }
        let host = url
            .host_str()
            .ok_or_else(|| StreamError::InvalidUrl("No host in WebSocket URL".to_string()))?;
        let port = url.port().unwrap_or(443);

        info!("🔗 Connecting to WebSocket: {}", url);
        let stream = TlsStream::connect(tls_config, host, port).await?;

        let mut websocket = Self {
            stream,
            buffer: Vec::with_capacity(8192),
        };
        websocket
            .perform_handshake(url, host)
            .await
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        timer.log_elapsed();
        info!("✅ WebSocket connection established to {}", url);
        Ok(websocket)
    }

    async fn perform_handshake(&mut self, url: &Url, host: &str) -> Result<()> {
        let ws_key = handshake_key();
        let path = if url.path().is_empty() { "/" } else { url.path() };
        let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();

        let request = format!(
            "GET {path}{query} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {ws_key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
        self.stream.write_all(request.as_bytes()).await?;

        // Read until the end of the response head; anything after it is frame data.
        let mut head = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            if let Some(pos) = head.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            if head.len() > MAX_HANDSHAKE_BYTES {
                return Err(StreamError::Handshake("response head too large".to_string()));
            }
            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(StreamError::Handshake("connection closed during handshake".to_string()));
            }
            head.extend_from_slice(&chunk[..read]);
        };

        let response = String::from_utf8_lossy(&head[..head_end]);
        validate_handshake_response(&response, &ws_key)?;
        self.buffer.extend_from_slice(&head[head_end..]);

        debug!("✅ WebSocket handshake completed");
        Ok(())
    }

    /// Spawn the reader task and return the channel fed by it
    pub fn into_channel(self) -> WebSocketChannel {
        let (session, reader) = self.stream.into_split();
        let (inbound_tx, inbound) = flume::unbounded();
        let (shutdown, shutdown_rx) = flume::bounded(1);
        let closing = Rc::new(Cell::new(false));

        let frames = FrameReader {
            reader,
            session: session.clone(),
            buffer: self.buffer,
            assembler: MessageAssembler::default(),
            closing: closing.clone(),
        };
        monoio::spawn(frames.run(inbound_tx, shutdown_rx));

        WebSocketChannel {
            session,
            inbound,
            shutdown: Some(shutdown),
            closing,
        }
    }
}

fn encode(frame: &Frame) -> Vec<u8> {
    frame.encode(frame_mask())
}

/// Reader task state: owns the TLS read half and decodes frames off it
struct FrameReader {
    reader: TlsReader,
    session: TlsSession,
    buffer: Vec<u8>,
    assembler: MessageAssembler,
    closing: Rc<Cell<bool>>,
}

impl FrameReader {
    async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some((frame, consumed)) = Frame::decode(&self.buffer)? {
                self.buffer.drain(..consumed);
                return Ok(frame);
            }

            let mut chunk = [0u8; 4096];
            let read = self.reader.read(&mut chunk).await?;
            if read == 0 {
                return Err(StreamError::Closed("connection closed by peer".to_string()));
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    /// Next data message. Control frames are answered inline; an undecodable
    /// payload is returned as an item, not as a reader failure.
    async fn next_message(&mut self) -> Result<Result<String>> {
        loop {
            let frame = self.next_frame().await?;
            match self.assembler.push(frame)? {
                Assembled::Message(message) => return Ok(message),
                Assembled::Reply(reply) => {
                    debug!("Received ping, sending pong");
                    if !self.closing.get() {
                        self.session.write_detached(&encode(&reply))?;
                    }
                }
                Assembled::Closed(code) => {
                    if !self.closing.replace(true) {
                        let _ = self.session.write_detached(&encode(&Frame::close(1000, "Normal closure")));
                    }
                    return Err(StreamError::Closed(format!("close frame received (code {code})")));
                }
                Assembled::Pending => {}
            }
        }
    }

    /// Forward messages until the peer goes away or the channel is dropped.
    /// Only this task reads the socket, so no read is ever abandoned midway
    /// while the connection is in use.
    async fn run(mut self, inbound: Sender<Result<String>>, shutdown: Receiver<()>) {
        loop {
            let next = monoio::select! {
                _ = shutdown.recv_async() => None,
                next = self.next_message() => Some(next),
            };
            let Some(next) = next else {
                break;
            };

            let (item, terminal) = match next {
                Ok(message) => (message, false),
                Err(e) => (Err(e), true),
            };
            if inbound.send(item).is_err() || terminal {
                break;
            }
        }
        debug!("WebSocket reader stopped");
    }
}

fn validate_handshake_response(response: &str, ws_key: &str) -> Result<()> {
    let status_ok = response
        .lines()
        .next()
        .map(|line| line.starts_with("HTTP/1.1 101"))
        .unwrap_or(false);
    if !status_ok {
        let status = response.lines().next().unwrap_or_default();
        return Err(StreamError::Handshake(format!("unexpected status: {status}")));
    }

    let expected = accept_key(ws_key);
    let accepted = response.lines().any(|line| {
        line.split_once(':')
            .map(|(name, value)| {
                name.trim().eq_ignore_ascii_case("sec-websocket-accept") && value.trim() == expected
            })
            .unwrap_or(false)
    });
    if !accepted {
        return Err(StreamError::Handshake("invalid accept key".to_string()));
    }
    Ok(())
}

/// Opens TLS WebSocket channels
pub struct WebSocketTransport {
    tls_config: Arc<ClientConfig>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self { tls_config: default_client_config() }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<Box<dyn Channel>> {
        let websocket = MonoioWebSocket::connect(url, self.tls_config.clone())
            .await
            .map_err(|e| match e {
                StreamError::Connection(_) => e,
                other => StreamError::Connection(other.to_string()),
            })?;
        Ok(Box::new(websocket.into_channel()))
    }
}

/// [`Channel`] over one WebSocket connection.
///
/// Reads happen on the reader task and arrive over a queue; writes are
/// encrypted and queued whole. Dropping a `receive` or `send` future mid-wait
/// loses nothing.
pub struct WebSocketChannel {
    session: TlsSession,
    inbound: Receiver<Result<String>>,
    /// Dropping this stops the reader task
    shutdown: Option<Sender<()>>,
    closing: Rc<Cell<bool>>,
}

impl WebSocketChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.closing.get() {
            return Err(StreamError::Closed("WebSocket already closing".to_string()));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl Channel for WebSocketChannel {
    async fn send(&mut self, text: &str) -> Result<()> {
        self.ensure_open()?;
        self.session.write_all(&encode(&Frame::text(text))).await
    }

    async fn receive(&mut self, timeout: Duration) -> Result<String> {
        match monoio::time::timeout(timeout, self.inbound.recv_async()).await {
            Ok(Ok(item)) => item,
            Ok(Err(_)) => Err(StreamError::Closed("WebSocket reader stopped".to_string())),
            Err(_) => {
                // Idle window: keep the connection warm before reporting the timeout.
                self.ensure_open()?;
                if let Err(e) = self.session.write_detached(&encode(&Frame::ping(Vec::new()))) {
                    warn!("Keepalive ping failed: {}", e);
                    return Err(e);
                }
                Err(StreamError::Timeout(format!("no message within {}ms", timeout.as_millis())))
            }
        }
    }

    /// Best-effort close handshake; the reader task stops either way
    async fn close(&mut self) -> Result<()> {
        self.shutdown.take();
        if self.closing.replace(true) {
            return Ok(());
        }

        info!("🔌 Closing WebSocket connection");
        self.session.write_all(&encode(&Frame::close(1000, "Normal closure"))).await?;
        self.session.close_notify()
    }
}

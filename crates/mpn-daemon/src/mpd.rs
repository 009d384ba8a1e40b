/// MPD client over a single TCP connection.
///
/// Architecture:
///
/// ```text
///   MpdClient::connect()
///         │
///         └── Framed<TcpStream, ResponseCodec>
///               ├── request()     ← one command line, reads `key: value` pairs until OK / ACK
///               ├── send_idle()   ← writes `idle player`, returns immediately
///               ├── wait_idle()   ← reads the idle response; cancel-safe
///               └── cancel_idle() ← writes `noidle`, drains the idle response
/// ```
///
/// While an idle is armed no other request may be written; `request()`
/// cancels the idle first if the caller forgot.
use bytes::{Buf, BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use mpn_proto::platform::MpdAddress;
use mpn_proto::protocol::{
    quote_argument, split_pair, Ack, PlayerCommand, ServerSnapshot, Subsystem, TrackInfo,
    GREETING_PREFIX, RESPONSE_ACK, RESPONSE_OK,
};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, info, warn};

use crate::error::{MpdError, TransportError};

/// Response lines longer than this are cut; the rest of the line is dropped.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Newline-delimited framing for the MPD text protocol.
///
/// Unlike `LinesCodec` nothing a server puts inside a line can fail the
/// stream: invalid UTF-8 is decoded lossily and overlong lines are truncated
/// to `max_length` bytes.
#[derive(Debug)]
pub struct ResponseCodec {
    max_length: usize,
    /// Bytes already searched for a newline.
    next_index: usize,
    /// Skipping the tail of a truncated line.
    discarding: bool,
}

impl ResponseCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

impl Decoder for ResponseCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, std::io::Error> {
        loop {
            let newline = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match (self.discarding, newline) {
                (true, Some(end)) => {
                    buf.advance(end + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                (true, None) => {
                    buf.advance(buf.len());
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(end)) if end <= self.max_length => {
                    let line = buf.split_to(end + 1);
                    self.next_index = 0;
                    return Ok(Some(decode_line(&line[..end])));
                }
                (false, _) if buf.len() > self.max_length => {
                    let line = buf.split_to(self.max_length);
                    self.next_index = 0;
                    self.discarding = true;
                    warn!("mpd: response line over {} bytes truncated", self.max_length);
                    return Ok(Some(decode_line(&line)));
                }
                (false, _) => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }
}

impl<T: AsRef<str>> Encoder<T> for ResponseCodec {
    type Error = std::io::Error;

    fn encode(&mut self, line: T, buf: &mut BytesMut) -> Result<(), std::io::Error> {
        let line = line.as_ref();
        buf.reserve(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
        Ok(())
    }
}

/// The operations the engine needs from the server connection.
///
/// Every method that talks to the server fails with [`MpdError::Transport`]
/// when the connection is unusable and with [`MpdError::Ack`] when the server
/// merely rejected the request.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn connect(&mut self) -> Result<(), MpdError>;
    /// Best effort; never fails.
    async fn disconnect(&mut self);
    async fn status(&mut self) -> Result<ServerSnapshot, MpdError>;
    async fn current_song(&mut self) -> Result<TrackInfo, MpdError>;
    async fn send_idle(&mut self) -> Result<(), MpdError>;
    /// Resolves once the armed idle returns.  Pending forever when no idle is
    /// armed.  Must be safe to drop and call again.
    async fn wait_idle(&mut self) -> Result<Vec<Subsystem>, MpdError>;
    /// Returns whatever subsystems the interrupted idle had already reported.
    async fn cancel_idle(&mut self) -> Result<Vec<Subsystem>, MpdError>;
    async fn command(&mut self, command: PlayerCommand) -> Result<(), MpdError>;
}

type Connection = Framed<TcpStream, ResponseCodec>;

pub struct MpdClient {
    address: MpdAddress,
    conn: Option<Connection>,
    idling: bool,
    /// Pairs of the idle response read so far; survives a cancelled wait.
    idle_pairs: Vec<(String, String)>,
}

impl MpdClient {
    pub fn new(address: MpdAddress) -> Self {
        Self {
            address,
            conn: None,
            idling: false,
            idle_pairs: Vec::new(),
        }
    }

    fn conn(&mut self) -> Result<&mut Connection, TransportError> {
        self.conn.as_mut().ok_or(TransportError::Closed)
    }

    /// Send one request line and collect the response pairs.
    async fn request(&mut self, line: &str) -> Result<Vec<(String, String)>, MpdError> {
        if self.idling {
            warn!("mpd: '{}' issued while idle was armed, cancelling idle", line);
            self.cancel_idle().await?;
        }
        debug!("mpd: send {}", line);
        let conn = self.conn()?;
        if let Err(e) = conn.send(line).await {
            return Err(TransportError::from(e).into());
        }
        read_response(conn).await
    }
}

async fn next_line(conn: &mut Connection) -> Result<String, TransportError> {
    match conn.next().await {
        Some(Ok(line)) => Ok(line),
        Some(Err(e)) => Err(e.into()),
        None => Err(TransportError::Closed),
    }
}

/// Outcome of one response line.
enum Line {
    Pair(String, String),
    Ok,
    Ack(Ack),
}

fn classify(line: String) -> Result<Option<Line>, TransportError> {
    if line == RESPONSE_OK {
        return Ok(Some(Line::Ok));
    }
    if line.starts_with(RESPONSE_ACK) {
        return match Ack::parse(&line) {
            Some(ack) => Ok(Some(Line::Ack(ack))),
            None => Err(TransportError::Protocol(format!("malformed error line '{}'", line))),
        };
    }
    match split_pair(&line) {
        Some((key, value)) => Ok(Some(Line::Pair(key.to_string(), value.to_string()))),
        None => {
            debug!("mpd: ignoring line '{}'", line);
            Ok(None)
        }
    }
}

async fn read_response(conn: &mut Connection) -> Result<Vec<(String, String)>, MpdError> {
    let mut pairs = Vec::new();
    loop {
        let line = next_line(conn).await?;
        match classify(line)? {
            Some(Line::Pair(key, value)) => pairs.push((key, value)),
            Some(Line::Ok) => return Ok(pairs),
            Some(Line::Ack(ack)) => return Err(MpdError::Ack(ack)),
            None => {}
        }
    }
}

impl Transport for MpdClient {
    async fn connect(&mut self) -> Result<(), MpdError> {
        self.conn = None;
        self.idling = false;
        self.idle_pairs.clear();

        let address = self.address.socket_address();
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|source| TransportError::Connect {
                address: address.clone(),
                source,
            })?;
        let mut conn = Framed::new(stream, ResponseCodec::new(MAX_LINE_LENGTH));

        let greeting = next_line(&mut conn).await?;
        let version = greeting
            .strip_prefix(GREETING_PREFIX)
            .ok_or_else(|| TransportError::Protocol(format!("unexpected greeting '{}'", greeting)))?;
        info!("mpd: connected to {} (protocol {})", address, version);
        self.conn = Some(conn);

        if let Some(password) = self.address.password.clone() {
            self.request(&format!("password {}", quote_argument(&password)))
                .await?;
            debug!("mpd: password accepted");
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            // Server closes its side on `close`; errors mean it is already gone.
            let _ = conn.send("close").await;
            debug!("mpd: disconnected");
        }
        self.idling = false;
        self.idle_pairs.clear();
    }

    async fn status(&mut self) -> Result<ServerSnapshot, MpdError> {
        let pairs = self.request("status").await?;
        Ok(ServerSnapshot::from_pairs(&pairs))
    }

    async fn current_song(&mut self) -> Result<TrackInfo, MpdError> {
        let pairs = self.request("currentsong").await?;
        Ok(TrackInfo::from_pairs(&pairs))
    }

    async fn send_idle(&mut self) -> Result<(), MpdError> {
        if self.idling {
            return Ok(());
        }
        let conn = self.conn()?;
        conn.send("idle player").await.map_err(TransportError::from)?;
        self.idling = true;
        self.idle_pairs.clear();
        debug!("mpd: idle armed");
        Ok(())
    }

    async fn wait_idle(&mut self) -> Result<Vec<Subsystem>, MpdError> {
        if !self.idling {
            return std::future::pending().await;
        }
        let conn = self.conn.as_mut().ok_or(TransportError::Closed)?;
        loop {
            let line = next_line(conn).await?;
            match classify(line)? {
                Some(Line::Pair(key, value)) => self.idle_pairs.push((key, value)),
                Some(Line::Ok) => {
                    self.idling = false;
                    let pairs = std::mem::take(&mut self.idle_pairs);
                    return Ok(Subsystem::from_pairs(&pairs));
                }
                Some(Line::Ack(ack)) => {
                    self.idling = false;
                    self.idle_pairs.clear();
                    return Err(MpdError::Ack(ack));
                }
                None => {}
            }
        }
    }

    async fn cancel_idle(&mut self) -> Result<Vec<Subsystem>, MpdError> {
        if !self.idling {
            return Ok(Vec::new());
        }
        let conn = self.conn.as_mut().ok_or(TransportError::Closed)?;
        conn.send("noidle").await.map_err(TransportError::from)?;
        // The server answers the pending idle; there is no separate reply to noidle.
        let result = read_response(conn).await;
        self.idling = false;
        let mut pairs = std::mem::take(&mut self.idle_pairs);
        pairs.extend(result?);
        debug!("mpd: idle cancelled");
        Ok(Subsystem::from_pairs(&pairs))
    }

    async fn command(&mut self, command: PlayerCommand) -> Result<(), MpdError> {
        self.request(command.request()).await?;
        Ok(())
    }
}

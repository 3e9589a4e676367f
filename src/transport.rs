use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// How long a socket read may block before the worker checks for commands.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    Send(String),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    /// A binary frame whose bytes are not valid UTF-8.
    InvalidText(Vec<u8>),
    Closed,
    Failed(String),
}

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

enum Flow {
    Continue,
    Stop,
}

pub fn spawn_socket_worker(url: String) -> (Sender<TransportCommand>, Receiver<TransportEvent>) {
    let (tx_cmd, rx_cmd) = mpsc::channel::<TransportCommand>();
    let (tx_evt, rx_evt) = mpsc::channel::<TransportEvent>();

    thread::spawn(move || {
        debug!(%url, "dialing");
        let mut socket = match tungstenite::connect(url.as_str()) {
            Ok((socket, _response)) => socket,
            Err(err) => {
                warn!(%url, error = %err, "connect failed");
                let _ = tx_evt.send(TransportEvent::Failed(err.to_string()));
                return;
            }
        };
        if let Err(err) = set_read_timeout(&mut socket) {
            let _ = tx_evt.send(TransportEvent::Failed(err.to_string()));
            return;
        }
        info!(%url, "connected");
        if tx_evt.send(TransportEvent::Opened).is_err() {
            let _ = socket.close(None);
            return;
        }

        loop {
            if let Flow::Stop = drain_commands(&mut socket, &rx_cmd, &tx_evt) {
                break;
            }
            if let Flow::Stop = read_once(&mut socket, &tx_evt) {
                break;
            }
        }
        debug!(%url, "socket worker stopped");
    });

    (tx_cmd, rx_evt)
}

fn set_read_timeout(socket: &mut Socket) -> std::io::Result<()> {
    match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(READ_POLL_INTERVAL)),
        MaybeTlsStream::NativeTls(stream) => stream
            .get_ref()
            .set_read_timeout(Some(READ_POLL_INTERVAL)),
        _ => Err(std::io::Error::new(
            ErrorKind::Unsupported,
            "unsupported socket stream",
        )),
    }
}

fn drain_commands(
    socket: &mut Socket,
    rx_cmd: &Receiver<TransportCommand>,
    tx_evt: &Sender<TransportEvent>,
) -> Flow {
    loop {
        match rx_cmd.try_recv() {
            Ok(TransportCommand::Send(payload)) => {
                if let Err(err) = socket.send(Message::Text(payload)) {
                    if is_timeout(&err) {
                        // Frame is queued; the next read or send flushes it.
                        continue;
                    }
                    let _ = tx_evt.send(TransportEvent::Failed(err.to_string()));
                    return Flow::Stop;
                }
            }
            Ok(TransportCommand::Close) | Err(TryRecvError::Disconnected) => {
                let _ = socket.close(None);
                let _ = socket.flush();
                let _ = tx_evt.send(TransportEvent::Closed);
                return Flow::Stop;
            }
            Err(TryRecvError::Empty) => return Flow::Continue,
        }
    }
}

fn read_once(socket: &mut Socket, tx_evt: &Sender<TransportEvent>) -> Flow {
    let event = match socket.read() {
        Ok(Message::Text(text)) => TransportEvent::Message(text),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
            Ok(text) => TransportEvent::Message(text),
            Err(err) => TransportEvent::InvalidText(err.into_bytes()),
        },
        Ok(Message::Close(_)) => TransportEvent::Closed,
        Ok(_) => return Flow::Continue,
        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
            TransportEvent::Closed
        }
        Err(err) if is_timeout(&err) => return Flow::Continue,
        Err(err) => TransportEvent::Failed(err.to_string()),
    };
    let stop = !matches!(
        event,
        TransportEvent::Message(_) | TransportEvent::InvalidText(_)
    );
    if tx_evt.send(event).is_err() || stop {
        return Flow::Stop;
    }
    Flow::Continue
}

fn is_timeout(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::Io(io_err)
            if matches!(io_err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
    )
}

/// The far end of an in-memory transport. Plays the backend for code that
/// holds the other end through a `ConnectionManager`.
#[cfg(test)]
pub(crate) struct LoopbackPeer {
    commands: Receiver<TransportCommand>,
    events: Sender<TransportEvent>,
}

#[cfg(test)]
pub(crate) fn loopback() -> (
    Sender<TransportCommand>,
    Receiver<TransportEvent>,
    LoopbackPeer,
) {
    let (tx_cmd, rx_cmd) = mpsc::channel::<TransportCommand>();
    let (tx_evt, rx_evt) = mpsc::channel::<TransportEvent>();
    (
        tx_cmd,
        rx_evt,
        LoopbackPeer {
            commands: rx_cmd,
            events: tx_evt,
        },
    )
}

#[cfg(test)]
impl LoopbackPeer {
    pub fn accept(&self) {
        let _ = self.events.send(TransportEvent::Opened);
    }

    pub fn reply(&self, payload: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(payload.into()));
    }

    pub fn hang_up(&self) {
        let _ = self.events.send(TransportEvent::Closed);
    }

    pub fn reply_bytes(&self, frame: Vec<u8>) {
        let _ = self.events.send(TransportEvent::InvalidText(frame));
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Failed(reason.into()));
    }

    pub fn take_commands(&self) -> Vec<TransportCommand> {
        self.commands.try_iter().collect()
    }

    /// Payloads sent so far, skipping close requests.
    pub fn take_sent(&self) -> Vec<String> {
        self.take_commands()
            .into_iter()
            .filter_map(|cmd| match cmd {
                TransportCommand::Send(payload) => Some(payload),
                TransportCommand::Close => None,
            })
            .collect()
    }
}

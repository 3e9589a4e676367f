use crate::error::ClientError;
use crate::transport::{spawn_socket_worker, TransportCommand, TransportEvent};
use std::fmt;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Errored,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What `poll_events` hands back to the owner after observers have run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StatusChanged(ConnectionState),
    Message(String),
    /// A frame that arrived while open but could not be read as text.
    InvalidText(Vec<u8>),
}

type StatusObserver = Box<dyn FnMut(ConnectionState)>;
type MessageObserver = Box<dyn FnMut(&str)>;

/// Owns the one channel to the backend for the lifetime of the app.
///
/// State only moves while transport events are applied in [`poll_events`]
/// or through [`close`]. Observers run inside `poll_events`, so they are
/// invoked on whichever thread drives the host event loop, one at a time.
///
/// [`poll_events`]: ConnectionManager::poll_events
/// [`close`]: ConnectionManager::close
pub struct ConnectionManager {
    url: String,
    state: ConnectionState,
    last_error: Option<String>,
    commands: Sender<TransportCommand>,
    events: Receiver<TransportEvent>,
    status_observers: Vec<StatusObserver>,
    message_observers: Vec<MessageObserver>,
}

impl ConnectionManager {
    pub fn open(url: &str) -> Self {
        let (commands, events) = spawn_socket_worker(url.to_string());
        Self::with_transport(url, commands, events)
    }

    pub fn with_transport(
        url: &str,
        commands: Sender<TransportCommand>,
        events: Receiver<TransportEvent>,
    ) -> Self {
        Self {
            url: url.to_string(),
            state: ConnectionState::Connecting,
            last_error: None,
            commands,
            events,
            status_observers: Vec::new(),
            message_observers: Vec::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn on_status_change(&mut self, observer: impl FnMut(ConnectionState) + 'static) {
        self.status_observers.push(Box::new(observer));
    }

    pub fn on_message(&mut self, observer: impl FnMut(&str) + 'static) {
        self.message_observers.push(Box::new(observer));
    }

    pub fn send(&mut self, payload: &str) -> Result<(), ClientError> {
        if self.state != ConnectionState::Open {
            return Err(ClientError::NotConnected { state: self.state });
        }
        if self
            .commands
            .send(TransportCommand::Send(payload.to_string()))
            .is_err()
        {
            self.fail("socket worker is unavailable".to_string());
            return Err(ClientError::NotConnected { state: self.state });
        }
        debug!(payload, "sent");
        Ok(())
    }

    /// Safe to call any number of times.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let _ = self.commands.send(TransportCommand::Close);
        info!(url = %self.url, "connection closed by client");
        self.transition(ConnectionState::Closed);
    }

    pub fn poll_events(&mut self) -> Vec<ConnectionEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply(event, &mut out),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.state.is_terminal() {
                        self.fail("socket worker exited".to_string());
                        out.push(ConnectionEvent::StatusChanged(self.state));
                    }
                    break;
                }
            }
        }
        out
    }

    fn apply(&mut self, event: TransportEvent, out: &mut Vec<ConnectionEvent>) {
        match event {
            TransportEvent::Opened => {
                if self.state == ConnectionState::Connecting {
                    info!(url = %self.url, "connection open");
                    self.transition(ConnectionState::Open);
                    out.push(ConnectionEvent::StatusChanged(self.state));
                }
            }
            TransportEvent::Message(payload) => {
                if self.state != ConnectionState::Open {
                    debug!(state = %self.state, "dropping message on inactive connection");
                    return;
                }
                for observer in &mut self.message_observers {
                    observer(payload.as_str());
                }
                out.push(ConnectionEvent::Message(payload));
            }
            TransportEvent::InvalidText(frame) => {
                if self.state == ConnectionState::Open {
                    warn!(len = frame.len(), "frame is not valid UTF-8");
                    out.push(ConnectionEvent::InvalidText(frame));
                }
            }
            TransportEvent::Closed => {
                if !self.state.is_terminal() {
                    info!(url = %self.url, "connection closed by backend");
                    self.transition(ConnectionState::Closed);
                    out.push(ConnectionEvent::StatusChanged(self.state));
                }
            }
            TransportEvent::Failed(reason) => {
                if !self.state.is_terminal() {
                    self.fail(reason);
                    out.push(ConnectionEvent::StatusChanged(self.state));
                }
            }
        }
    }

    fn fail(&mut self, reason: String) {
        warn!(url = %self.url, error = %reason, "transport failure");
        self.last_error = Some(ClientError::TransportFailure(reason).to_string());
        self.transition(ConnectionState::Errored);
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        self.state = next;
        for observer in &mut self.status_observers {
            observer(next);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.commands.send(TransportCommand::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{loopback, LoopbackPeer};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn manager() -> (ConnectionManager, LoopbackPeer) {
        let (commands, events, peer) = loopback();
        (
            ConnectionManager::with_transport("ws://test/ws", commands, events),
            peer,
        )
    }

    #[test]
    fn starts_connecting_and_opens_on_handshake() {
        let (mut conn, peer) = manager();
        assert_eq!(conn.state(), ConnectionState::Connecting);

        peer.accept();
        let events = conn.poll_events();

        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(
            events,
            vec![ConnectionEvent::StatusChanged(ConnectionState::Open)]
        );
    }

    #[test]
    fn send_before_open_reports_not_connected() {
        let (mut conn, peer) = manager();

        let err = conn.send(r#"{"q":"a"}"#).expect_err("must not send");

        assert!(matches!(
            err,
            ClientError::NotConnected {
                state: ConnectionState::Connecting
            }
        ));
        assert!(peer.take_sent().is_empty());
    }

    #[test]
    fn send_when_open_reaches_transport() {
        let (mut conn, peer) = manager();
        peer.accept();
        conn.poll_events();

        conn.send(r#"{"q":"a"}"#).expect("send");

        assert_eq!(peer.take_sent(), vec![r#"{"q":"a"}"#.to_string()]);
    }

    #[test]
    fn close_twice_is_harmless_and_stays_closed() {
        let (mut conn, peer) = manager();
        peer.accept();
        conn.poll_events();
        let changes = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&changes);
        conn.on_status_change(move |state| seen.borrow_mut().push(state));

        conn.close();
        conn.close();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(*changes.borrow(), vec![ConnectionState::Closed]);
        assert_eq!(peer.take_commands(), vec![TransportCommand::Close]);
    }

    #[test]
    fn send_after_close_reports_not_connected() {
        let (mut conn, peer) = manager();
        peer.accept();
        conn.poll_events();
        conn.close();

        assert!(matches!(
            conn.send("x"),
            Err(ClientError::NotConnected {
                state: ConnectionState::Closed
            })
        ));
    }

    #[test]
    fn transport_fault_moves_to_errored_and_keeps_reason() {
        let (mut conn, peer) = manager();
        peer.fail("connection refused");

        conn.poll_events();

        assert_eq!(conn.state(), ConnectionState::Errored);
        assert!(conn
            .last_error()
            .is_some_and(|e| e.contains("connection refused")));
    }

    #[test]
    fn terminal_state_ignores_late_transport_events() {
        let (mut conn, peer) = manager();
        peer.fail("boom");
        conn.poll_events();

        peer.accept();
        peer.reply(r#"{"data":[]}"#);
        peer.hang_up();
        let events = conn.poll_events();

        assert!(events.is_empty());
        assert_eq!(conn.state(), ConnectionState::Errored);
    }

    #[test]
    fn backend_close_moves_open_to_closed() {
        let (mut conn, peer) = manager();
        peer.accept();
        peer.hang_up();

        let events = conn.poll_events();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(
            events.last(),
            Some(&ConnectionEvent::StatusChanged(ConnectionState::Closed))
        );
    }

    #[test]
    fn message_observers_run_during_poll_in_arrival_order() {
        let (mut conn, peer) = manager();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        conn.on_message(move |payload| sink.borrow_mut().push(payload.to_string()));
        peer.accept();
        peer.reply("one");
        peer.reply("two");

        assert!(seen.borrow().is_empty());
        let events = conn.poll_events();

        assert_eq!(*seen.borrow(), vec!["one".to_string(), "two".to_string()]);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn non_utf8_frame_is_surfaced_without_reaching_observers() {
        let (mut conn, peer) = manager();
        let seen = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&seen);
        conn.on_message(move |_| *sink.borrow_mut() += 1);
        peer.accept();
        peer.reply_bytes(vec![b'{', 0xff, b'}']);

        let events = conn.poll_events();

        assert_eq!(*seen.borrow(), 0);
        assert_eq!(
            events.last(),
            Some(&ConnectionEvent::InvalidText(vec![b'{', 0xff, b'}']))
        );
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[test]
    fn vanished_worker_is_a_transport_failure() {
        let (mut conn, peer) = manager();
        peer.accept();
        conn.poll_events();
        drop(peer);

        let events = conn.poll_events();

        assert_eq!(conn.state(), ConnectionState::Errored);
        assert_eq!(
            events,
            vec![ConnectionEvent::StatusChanged(ConnectionState::Errored)]
        );
        assert!(matches!(conn.send("x"), Err(ClientError::NotConnected { .. })));
    }
}

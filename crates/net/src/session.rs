//! Connection/session lifecycle.
//!
//! `Idle → Discovering → Connecting → Connected → Disconnected`. The last
//! state is terminal: retrying means creating a fresh [`Session`].

use crate::codec::DecodeError;
use crate::protocol::{RejectReason, PROTOCOL_VERSION};
use crate::transport::ConnectionStatus;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing started.
    #[default]
    Idle,
    /// Looking for hosts.
    Discovering,
    /// Handshake sent, waiting for the host.
    Connecting,
    /// Host accepted the handshake.
    Connected,
    /// Ended; see [`Session::end`].
    Disconnected,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Host refused the handshake.
    Rejected(RejectReason),
    /// Transport reported the connection gone.
    ConnectionLost,
    /// Closed locally.
    Closed(String),
}

/// Errors surfaced by the synchronization layer. None of them are fatal to
/// the process; each maps to a visible state transition or a skipped message.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed or unknown message; the session continues.
    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),
    /// Host refused the handshake; no retry without user action.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(RejectReason),
    /// Transport reported the connection gone.
    #[error("connection lost")]
    ConnectionLost,
    /// Operation not valid in the current state.
    #[error("cannot {action} while {from:?}")]
    InvalidTransition {
        /// State the session was in.
        from: SessionState,
        /// Attempted operation.
        action: &'static str,
    },
}

/// Observable outcome of feeding a transport event to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    /// Nothing changed.
    Unchanged,
    /// Handshake accepted; derived state must be reset before anything else.
    Established,
    /// Host refused the handshake.
    Rejected(RejectReason),
    /// Connection dropped after or during connect.
    Lost,
}

/// One client-host connection attempt and its lifetime.
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: SessionState,
    remote: Option<SocketAddr>,
    protocol_version: Option<String>,
    last_rejection: Option<RejectReason>,
    end: Option<SessionEnd>,
}

impl Session {
    /// Fresh idle session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Host endpoint, once connecting.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Version agreed with the host, once connected.
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Most recent rejection reason.
    pub fn last_rejection(&self) -> Option<&RejectReason> {
        self.last_rejection.as_ref()
    }

    /// Why the session ended, once disconnected.
    pub fn end(&self) -> Option<&SessionEnd> {
        self.end.as_ref()
    }

    /// Whether the session is connected.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            from: self.state,
            action,
        }
    }

    /// `Idle → Discovering`.
    pub fn begin_discovery(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Discovering;
                Ok(())
            }
            _ => Err(self.invalid("discover")),
        }
    }

    /// `Discovering → Idle` once the candidate list is in.
    pub fn finish_discovery(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Discovering => {
                self.state = SessionState::Idle;
                Ok(())
            }
            _ => Err(self.invalid("finish discovery")),
        }
    }

    /// `Idle | Discovering → Connecting`.
    pub fn begin_connect(&mut self, endpoint: SocketAddr) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle | SessionState::Discovering => {
                info!(%endpoint, "connecting");
                self.state = SessionState::Connecting;
                self.remote = Some(endpoint);
                Ok(())
            }
            _ => Err(self.invalid("connect")),
        }
    }

    /// Apply a transport status change.
    pub fn on_status(&mut self, status: ConnectionStatus) -> SessionTransition {
        match (self.state, status) {
            (SessionState::Connecting, ConnectionStatus::Connected) => {
                self.state = SessionState::Connected;
                self.protocol_version = Some(PROTOCOL_VERSION.to_string());
                info!(remote = ?self.remote, "session established");
                SessionTransition::Established
            }
            (SessionState::Connecting | SessionState::Connected, ConnectionStatus::Disconnected) => {
                warn!(remote = ?self.remote, "connection lost");
                self.state = SessionState::Disconnected;
                self.end = Some(SessionEnd::ConnectionLost);
                SessionTransition::Lost
            }
            (state, status) => {
                debug!(?state, ?status, "ignoring status change");
                SessionTransition::Unchanged
            }
        }
    }

    /// Apply a host rejection. Moves straight to `Disconnected`.
    pub fn on_rejected(&mut self, reason: RejectReason) -> SessionTransition {
        match self.state {
            SessionState::Connecting | SessionState::Connected => {
                warn!(%reason, "handshake rejected");
                self.state = SessionState::Disconnected;
                self.last_rejection = Some(reason.clone());
                self.end = Some(SessionEnd::Rejected(reason.clone()));
                SessionTransition::Rejected(reason)
            }
            state => {
                debug!(?state, %reason, "ignoring rejection outside a connect");
                SessionTransition::Unchanged
            }
        }
    }

    /// Close locally. Returns `false` when already disconnected.
    pub fn disconnect(&mut self, reason: &str) -> bool {
        if self.state == SessionState::Disconnected {
            return false;
        }
        info!(reason, "session closed");
        self.state = SessionState::Disconnected;
        self.end = Some(SessionEnd::Closed(reason.to_string()));
        true
    }

    /// Error describing how this session ended, if it did.
    pub fn end_error(&self) -> Option<SessionError> {
        match self.end.as_ref()? {
            SessionEnd::Rejected(reason) => Some(SessionError::HandshakeRejected(reason.clone())),
            SessionEnd::ConnectionLost => Some(SessionError::ConnectionLost),
            SessionEnd::Closed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:5565".parse().unwrap()
    }

    #[test]
    fn happy_path() {
        let mut session = Session::new();
        session.begin_discovery().unwrap();
        session.finish_discovery().unwrap();
        session.begin_connect(addr()).unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(
            session.on_status(ConnectionStatus::Connected),
            SessionTransition::Established
        );
        assert!(session.is_connected());
        assert_eq!(session.protocol_version(), Some(PROTOCOL_VERSION));
        assert_eq!(session.remote(), Some(addr()));
    }

    #[test]
    fn rejection_goes_straight_to_disconnected() {
        let mut session = Session::new();
        session.begin_connect(addr()).unwrap();
        let t = session.on_rejected(RejectReason::Banned);
        assert_eq!(t, SessionTransition::Rejected(RejectReason::Banned));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.last_rejection(), Some(&RejectReason::Banned));
        assert!(matches!(
            session.end_error(),
            Some(SessionError::HandshakeRejected(RejectReason::Banned))
        ));
    }

    #[test]
    fn disconnected_is_terminal() {
        let mut session = Session::new();
        session.begin_connect(addr()).unwrap();
        session.on_status(ConnectionStatus::Disconnected);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.begin_connect(addr()).is_err());
        assert_eq!(
            session.on_status(ConnectionStatus::Connected),
            SessionTransition::Unchanged
        );
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut session = Session::new();
        session.begin_connect(addr()).unwrap();
        assert!(session.disconnect("quit"));
        assert!(!session.disconnect("quit"));
        assert_eq!(
            session.end(),
            Some(&SessionEnd::Closed("quit".to_string()))
        );
    }

    #[test]
    fn cannot_discover_while_connecting() {
        let mut session = Session::new();
        session.begin_connect(addr()).unwrap();
        let err = session.begin_discovery().unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                from: SessionState::Connecting,
                ..
            }
        ));
    }
}

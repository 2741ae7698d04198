//! Session state: endpoint credentials and the live connection record

use crate::transport::{SessionEvents, SessionHandle};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Broker endpoint credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Broker URL
    pub host: String,
    /// Virtual namespace on the broker
    pub vpn: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            vpn: None,
            username: None,
            password: None,
        }
    }

    pub fn with_vpn<S: Into<String>>(mut self, vpn: S) -> Self {
        self.vpn = Some(vpn.into());
        self
    }

    pub fn with_login<U: Into<String>, P: Into<String>>(mut self, username: U, password: P) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

// Passwords never reach logs through Debug.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("vpn", &self.vpn)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// One logical connection, owned exclusively by the session manager
pub struct Session<H: SessionHandle> {
    pub state: ConnectionState,
    pub credentials: Credentials,
    pub handle: H,
    pub events: SessionEvents,
}

impl<H: SessionHandle> Session<H> {
    pub fn new(credentials: Credentials, handle: H, events: SessionEvents) -> Self {
        Self {
            state: ConnectionState::Connecting,
            credentials,
            handle,
            events,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

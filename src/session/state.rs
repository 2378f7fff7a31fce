use std::fmt;

/// Protocol state of one connection.
///
/// `New → Negotiating → Connected → Closed`; a rejected CONNECT goes back to
/// `New`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    New,
    Negotiating,
    Connected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Protocol versions this broker speaks, most preferred first.
pub const SUPPORTED_VERSIONS: [&str; 3] = ["1.2", "1.1", "1.0"];

/// Pick the version for CONNECTED from the client's `accept-version`.
/// A client that sends no `accept-version` speaks 1.0.
pub fn negotiate_version(accept_version: Option<&str>) -> Option<&'static str> {
    let Some(accepted) = accept_version else {
        return Some("1.0");
    };
    let offered: Vec<&str> = accepted.split(',').map(str::trim).collect();
    SUPPORTED_VERSIONS
        .into_iter()
        .find(|version| offered.contains(version))
}

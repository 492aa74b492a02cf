// Server configuration: compiled-in defaults, the key/value config file,
// and the timing knobs the match engine runs on.
//
// The config file is line-oriented `KEY VALUE` pairs separated by
// whitespace. Recognized keys: `LOBBY_COUNT` (1..=1000), `IP` (bind address
// or `localhost`), `PORT` (1..=65535). A missing file, unknown keys, or
// unusable values fall back to the compiled-in defaults with a logged
// complaint, never an exit. CLI flags (parsed in `main.rs`) override
// whatever the file produced.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use log::warn;

pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
pub const DEFAULT_PORT: u16 = 4545;
pub const DEFAULT_LOBBY_COUNT: usize = 5;
pub const MAX_LOBBY_COUNT: usize = 1000;

/// Timing constants of the protocol. Defaults are the wire contract; the
/// fields exist so integration tests can shrink the windows instead of
/// sleeping through half-minute timeouts.
#[derive(Clone, Copy, Debug)]
pub struct Timing {
    /// Turn deadline; also the seconds advertised in `C45T`.
    pub turn_timeout: Duration,
    /// Reconnect window after a mid-match disconnect; advertised in `C45OD`.
    pub reconnect_window: Duration,
    /// Cadence of server `C45PI` probes to the player it is waiting on.
    pub ping_interval: Duration,
    /// A peer with no liveness signal for this long is considered dead.
    pub liveness_grace: Duration,
    /// Pause before a reconnect attempt inspects the lobbies, giving the
    /// match task time to mark the old transport as detached.
    pub reconnect_grace: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            turn_timeout: Duration::from_secs(30),
            reconnect_window: Duration::from_secs(30),
            ping_interval: Duration::from_secs(5),
            liveness_grace: Duration::from_secs(10),
            reconnect_grace: Duration::from_millis(200),
        }
    }
}

/// Configuration for starting a server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_ip: IpAddr,
    /// Listen port; 0 lets the OS pick (useful in tests).
    pub port: u16,
    pub lobby_count: usize,
    pub timing: Timing,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: DEFAULT_BIND_IP,
            port: DEFAULT_PORT,
            lobby_count: DEFAULT_LOBBY_COUNT,
            timing: Timing::default(),
        }
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} with {} lobbies",
            self.bind_ip, self.port, self.lobby_count
        )
    }
}

/// Load configuration from `path`, starting from defaults. Every field the
/// file cannot supply keeps its default.
pub fn load_file(path: &Path) -> ServerConfig {
    let mut config = ServerConfig::default();
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(
                "config file {} not readable ({err}); using defaults",
                path.display()
            );
            return config;
        }
    };
    apply_contents(&mut config, &contents);
    config
}

fn apply_contents(config: &mut ServerConfig, contents: &str) {
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        match key {
            "IP" => match parse_bind_ip(value) {
                Some(ip) => config.bind_ip = ip,
                None => warn!("config IP {value:?} is not a bind address; keeping default"),
            },
            "PORT" => match value.parse::<u16>() {
                Ok(port) if port >= 1 => config.port = port,
                _ => warn!("config PORT {value:?} is not in 1..=65535; keeping default"),
            },
            "LOBBY_COUNT" => match value.parse::<usize>() {
                Ok(n) if (1..=MAX_LOBBY_COUNT).contains(&n) => config.lobby_count = n,
                _ => warn!(
                    "config LOBBY_COUNT {value:?} is not in 1..={MAX_LOBBY_COUNT}; keeping default"
                ),
            },
            _ => {}
        }
    }
}

/// `localhost` is accepted alongside literal addresses.
fn parse_bind_ip(value: &str) -> Option<IpAddr> {
    if value == "localhost" {
        return Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_contents(contents: &str) -> ServerConfig {
        let mut config = ServerConfig::default();
        apply_contents(&mut config, contents);
        config
    }

    #[test]
    fn full_file_overrides_everything() {
        let config = from_contents("IP 127.0.0.1\nPORT 9000\nLOBBY_COUNT 3\n");
        assert_eq!(config.bind_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.port, 9000);
        assert_eq!(config.lobby_count, 3);
    }

    #[test]
    fn localhost_is_accepted() {
        let config = from_contents("IP localhost\n");
        assert_eq!(config.bind_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn invalid_fields_keep_defaults() {
        let config = from_contents("IP not-an-ip\nPORT 0\nLOBBY_COUNT 5000\n");
        assert_eq!(config.bind_ip, DEFAULT_BIND_IP);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.lobby_count, DEFAULT_LOBBY_COUNT);
    }

    #[test]
    fn unknown_keys_and_blank_lines_are_ignored() {
        let config = from_contents("\nCOLOR green\n\nPORT 7000\n");
        assert_eq!(config.port, 7000);
        assert_eq!(config.lobby_count, DEFAULT_LOBBY_COUNT);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_file(Path::new("/definitely/not/here/config.txt"));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.lobby_count, DEFAULT_LOBBY_COUNT);
    }
}

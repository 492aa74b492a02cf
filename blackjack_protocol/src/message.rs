// Protocol messages for client-server communication.
//
// The vocabulary has two directions:
// - Client lines are parsed with small state-oriented helpers
//   (`parse_handshake`, `parse_join`, `parse_legacy_join`, `classify_back`,
//   `is_ping`/`is_pong`/...). Which helper applies depends on the session
//   state — the same bytes can be a legacy join at lobby selection and a
//   plain name during the handshake — so there is deliberately no single
//   client-line classifier.
// - Server lines are the `ServerLine` enum, emitted through `Display` and
//   parsed back with `ServerLine::parse`. Parsing is used by clients and by
//   the integration tests, which act as clients.
//
// Every line begins with the `C45` prefix and tokens obey the exact-match
// rule from `frame.rs`. Two tokens share a spelling across directions:
// `C45B` is "back/refresh" from a client and "bust" from the server.

use std::fmt;

use thiserror::Error;

use crate::cards::Card;
use crate::frame::{matches_token, strip_frame, token_args, MAX_NAME_LEN};

/// Wire tokens, client direction and server direction.
pub mod tokens {
    pub const OK: &str = "C45OK";
    pub const WRONG: &str = "C45WRONG";
    pub const REC: &str = "C45REC";
    pub const REC_OK: &str = "C45REC_OK";
    pub const LOBBIES: &str = "C45L";
    pub const JOIN: &str = "C45J";
    /// Client direction: back to lobby selection / refresh the snapshot.
    pub const BACK: &str = "C45B";
    pub const HIT: &str = "C45H";
    pub const STAND: &str = "C45S";
    pub const PING: &str = "C45PI";
    pub const PONG: &str = "C45PO";
    /// Stale waiting-phase echo from older clients; tolerated, never acted on.
    pub const YES: &str = "C45YES";
    pub const DEAL: &str = "C45D";
    pub const TURN: &str = "C45T";
    pub const CARD: &str = "C45C";
    /// Server direction: bust notification. Same spelling as `BACK`.
    pub const BUST: &str = "C45B";
    pub const TIMEOUT: &str = "C45TO";
    pub const RESULT: &str = "C45R";
    pub const OPP_DOWN: &str = "C45OD";
    pub const OPP_BACK: &str = "C45OB";
    pub const DOWN: &str = "C45DOWN";
}

/// Winner field of `C45R` when the match is a draw.
pub const WINNER_PUSH: &str = "PUSH";

/// Suffix of the legacy back request `C45<name>back`.
const LEGACY_BACK_SUFFIX: &str = "back";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line does not carry the C45 prefix")]
    MissingPrefix,
    #[error("invalid player name")]
    BadName,
    #[error("malformed {0} field")]
    BadField(&'static str),
    #[error("unrecognized line")]
    UnknownLine,
}

/// Player name rule: non-empty, at most `MAX_NAME_LEN` bytes, no whitespace
/// anywhere (the protocol uses whitespace as its only delimiter).
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && !name.chars().any(char::is_whitespace)
}

pub fn is_ping(line: &str) -> bool {
    matches_token(line, tokens::PING)
}

pub fn is_pong(line: &str) -> bool {
    matches_token(line, tokens::PONG)
}

pub fn is_yes(line: &str) -> bool {
    matches_token(line, tokens::YES)
}

pub fn is_hit(line: &str) -> bool {
    matches_token(line, tokens::HIT)
}

pub fn is_stand(line: &str) -> bool {
    matches_token(line, tokens::STAND)
}

/// First non-keep-alive line of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Handshake {
    /// `C45<name>` — fresh login.
    Login { name: String },
    /// `C45REC <name> <lobby>` — reconnect; lobby is 1-based, 0 = unknown.
    Reconnect { name: String, lobby: u32 },
}

/// Parse a handshake line. Keep-alives must be filtered out by the caller
/// beforehand; anything that is neither a well-formed reconnect nor a valid
/// plain name is an error.
pub fn parse_handshake(line: &str) -> Result<Handshake, ParseError> {
    if let Some(args) = token_args(line, tokens::REC) {
        let mut fields = args.split_whitespace();
        let name = fields.next().ok_or(ParseError::BadField("name"))?;
        let lobby = fields
            .next()
            .and_then(|f| f.parse::<u32>().ok())
            .ok_or(ParseError::BadField("lobby"))?;
        if fields.next().is_some() {
            return Err(ParseError::BadField("lobby"));
        }
        if !valid_name(name) {
            return Err(ParseError::BadName);
        }
        return Ok(Handshake::Reconnect {
            name: name.to_string(),
            lobby,
        });
    }

    let payload = strip_frame(line).ok_or(ParseError::MissingPrefix)?;
    let name = payload.trim_matches([' ', '\t']);
    if !valid_name(name) {
        return Err(ParseError::BadName);
    }
    Ok(Handshake::Login {
        name: name.to_string(),
    })
}

/// Parse a modern join request `C45J <lobby>`. Returns `None` when the line
/// is not a join at all; `Some(Err(..))` when it is a join with an unusable
/// lobby field (the session treats that as a range error and stays alive).
pub fn parse_join(line: &str) -> Option<Result<u32, ParseError>> {
    let args = token_args(line, tokens::JOIN)?;
    Some(args.parse::<u32>().map_err(|_| ParseError::BadField("lobby")))
}

/// Parse the legacy join form `C45<name><digit>`: the single trailing digit
/// names the lobby, everything before it is the player name. Returns `None`
/// unless the payload has that exact shape with a well-formed name.
pub fn parse_legacy_join(line: &str) -> Option<(String, u32)> {
    let payload = strip_frame(line)?.trim_start_matches([' ', '\t']);
    let last = payload.chars().last()?;
    let lobby = last.to_digit(10)?;
    let name = payload[..payload.len() - last.len_utf8()].trim_end_matches([' ', '\t']);
    if !valid_name(name) {
        return None;
    }
    Some((name.to_string(), lobby))
}

/// Classification of a line as a back-to-lobby request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackRequest {
    /// Not a back request of either form.
    NotBack,
    /// Modern `C45B` with no arguments; the sender is implied.
    Bare,
    /// Legacy `C45<name>back`; `matches` is true when the embedded name is
    /// the expected one. A mismatch (or an empty name) is a protocol error,
    /// not a foreign player's request.
    Named { matches: bool },
}

/// Classify `line` as a back request on behalf of `expected` (the only name
/// a legacy back may legitimately carry on this transport).
pub fn classify_back(line: &str, expected: &str) -> BackRequest {
    if let Some(args) = token_args(line, tokens::BACK) {
        if args.is_empty() {
            return BackRequest::Bare;
        }
        // `C45B <something>` is the server's bust spelling, never a client
        // back request; fall through to the legacy check.
    }

    let Some(payload) = strip_frame(line) else {
        return BackRequest::NotBack;
    };
    let trimmed = payload.trim_matches([' ', '\t']);
    let Some(stem) = trimmed.strip_suffix(LEGACY_BACK_SUFFIX) else {
        return BackRequest::NotBack;
    };
    let name = stem.trim_end_matches([' ', '\t']);
    if name.is_empty() {
        return BackRequest::Named { matches: false };
    }
    BackRequest::Named {
        matches: name == expected,
    }
}

/// Occupancy and phase of one lobby, as carried in the snapshot line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LobbyStat {
    /// Seated players, 0..=2.
    pub players: u8,
    /// True while a match is running.
    pub running: bool,
}

/// The `C45L <n> <pairs>` snapshot: `n` lobbies, then 2·n digits where each
/// pair is the player count followed by the running status.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LobbySnapshot {
    pub lobbies: Vec<LobbyStat>,
}

impl LobbySnapshot {
    fn pairs(&self) -> String {
        let mut digits = String::with_capacity(self.lobbies.len() * 2);
        for stat in &self.lobbies {
            digits.push(char::from(b'0' + stat.players.min(2)));
            digits.push(if stat.running { '1' } else { '0' });
        }
        digits
    }

    fn parse_fields(args: &str) -> Result<LobbySnapshot, ParseError> {
        let mut fields = args.split_whitespace();
        let count: usize = fields
            .next()
            .and_then(|f| f.parse().ok())
            .ok_or(ParseError::BadField("lobby count"))?;
        let pairs = fields.next().unwrap_or("");
        if fields.next().is_some() || pairs.len() != count * 2 {
            return Err(ParseError::BadField("lobby pairs"));
        }
        let digits: Vec<u32> = pairs
            .chars()
            .map(|c| c.to_digit(10).ok_or(ParseError::BadField("lobby pairs")))
            .collect::<Result<_, _>>()?;
        let mut lobbies = Vec::with_capacity(count);
        for pair in digits.chunks(2) {
            let (players, status) = (pair[0], pair[1]);
            if players > 2 || status > 1 {
                return Err(ParseError::BadField("lobby pairs"));
            }
            lobbies.push(LobbyStat {
                players: players as u8,
                running: status == 1,
            });
        }
        Ok(LobbySnapshot { lobbies })
    }
}

/// A server-to-client protocol line. `Display` renders the wire form without
/// the terminating `\n`; `parse` accepts a line with or without it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerLine {
    /// `C45OK` — handshake or join accepted.
    Ok,
    /// `C45WRONG [<reason>]` — protocol error.
    Wrong { reason: Option<String> },
    /// `C45REC_OK` — reconnect accepted.
    ReconnectOk,
    /// `C45L <n> <pairs>` — lobby snapshot.
    Lobbies(LobbySnapshot),
    /// `C45D <c1> <c2>` — initial deal, private to each player.
    Deal { first: Card, second: Card },
    /// `C45T <name> <sec>` — turn notification, sent to both players.
    Turn { name: String, seconds: u64 },
    /// `C45C <card>` — card drawn, private to the drawing player.
    CardDrawn { card: Card },
    /// `C45B <name> <value>` — bust notification, private to the busted player.
    Bust { name: String, value: i32 },
    /// `C45TO` — turn expired, auto-stand.
    TimedOut,
    /// `C45R <n1> <v1> <n2> <v2> WINNER <name|PUSH>` — match result.
    /// Busted hands report the value −1.
    MatchResult {
        name_a: String,
        value_a: i32,
        name_b: String,
        value_b: i32,
        winner: String,
    },
    /// `C45OD <name> <sec>` — opponent disconnected, reconnect window open.
    OpponentDown { name: String, seconds: u64 },
    /// `C45OB <name>` — opponent reconnected.
    OpponentBack { name: String },
    /// `C45PI` — protocol-level keep-alive probe.
    Ping,
    /// `C45PO` — keep-alive answer.
    Pong,
    /// `C45DOWN [<reason>]` — server shutting down.
    Down { reason: Option<String> },
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerLine::Ok => write!(f, "{}", tokens::OK),
            ServerLine::Wrong { reason: None } => write!(f, "{}", tokens::WRONG),
            ServerLine::Wrong { reason: Some(r) } => write!(f, "{} {r}", tokens::WRONG),
            ServerLine::ReconnectOk => write!(f, "{}", tokens::REC_OK),
            ServerLine::Lobbies(snapshot) => {
                write!(f, "{} {}", tokens::LOBBIES, snapshot.lobbies.len())?;
                if !snapshot.lobbies.is_empty() {
                    write!(f, " {}", snapshot.pairs())?;
                }
                Ok(())
            }
            ServerLine::Deal { first, second } => {
                write!(f, "{} {first} {second}", tokens::DEAL)
            }
            ServerLine::Turn { name, seconds } => {
                write!(f, "{} {name} {seconds}", tokens::TURN)
            }
            ServerLine::CardDrawn { card } => write!(f, "{} {card}", tokens::CARD),
            ServerLine::Bust { name, value } => {
                write!(f, "{} {name} {value}", tokens::BUST)
            }
            ServerLine::TimedOut => write!(f, "{}", tokens::TIMEOUT),
            ServerLine::MatchResult {
                name_a,
                value_a,
                name_b,
                value_b,
                winner,
            } => write!(
                f,
                "{} {name_a} {value_a} {name_b} {value_b} WINNER {winner}",
                tokens::RESULT
            ),
            ServerLine::OpponentDown { name, seconds } => {
                write!(f, "{} {name} {seconds}", tokens::OPP_DOWN)
            }
            ServerLine::OpponentBack { name } => write!(f, "{} {name}", tokens::OPP_BACK),
            ServerLine::Ping => write!(f, "{}", tokens::PING),
            ServerLine::Pong => write!(f, "{}", tokens::PONG),
            ServerLine::Down { reason: None } => write!(f, "{}", tokens::DOWN),
            ServerLine::Down { reason: Some(r) } => write!(f, "{} {r}", tokens::DOWN),
        }
    }
}

impl ServerLine {
    pub fn parse(line: &str) -> Result<ServerLine, ParseError> {
        if !line.starts_with(crate::frame::FRAME_PREFIX) {
            return Err(ParseError::MissingPrefix);
        }
        if matches_token(line, tokens::OK) {
            return Ok(ServerLine::Ok);
        }
        if let Some(args) = token_args(line, tokens::WRONG) {
            return Ok(ServerLine::Wrong {
                reason: (!args.is_empty()).then(|| args.to_string()),
            });
        }
        if matches_token(line, tokens::REC_OK) {
            return Ok(ServerLine::ReconnectOk);
        }
        if matches_token(line, tokens::TIMEOUT) {
            return Ok(ServerLine::TimedOut);
        }
        if matches_token(line, tokens::PING) {
            return Ok(ServerLine::Ping);
        }
        if matches_token(line, tokens::PONG) {
            return Ok(ServerLine::Pong);
        }
        if let Some(args) = token_args(line, tokens::DOWN) {
            return Ok(ServerLine::Down {
                reason: (!args.is_empty()).then(|| args.to_string()),
            });
        }
        if let Some(args) = token_args(line, tokens::LOBBIES) {
            return LobbySnapshot::parse_fields(args).map(ServerLine::Lobbies);
        }
        if let Some(args) = token_args(line, tokens::DEAL) {
            let mut fields = args.split_whitespace();
            let first = fields
                .next()
                .and_then(Card::from_wire)
                .ok_or(ParseError::BadField("card"))?;
            let second = fields
                .next()
                .and_then(Card::from_wire)
                .ok_or(ParseError::BadField("card"))?;
            if fields.next().is_some() {
                return Err(ParseError::BadField("card"));
            }
            return Ok(ServerLine::Deal { first, second });
        }
        if let Some(args) = token_args(line, tokens::TURN) {
            let (name, seconds) = name_and_number(args)?;
            return Ok(ServerLine::Turn { name, seconds });
        }
        if let Some(args) = token_args(line, tokens::CARD) {
            let card = Card::from_wire(args).ok_or(ParseError::BadField("card"))?;
            return Ok(ServerLine::CardDrawn { card });
        }
        if let Some(args) = token_args(line, tokens::BUST) {
            let mut fields = args.split_whitespace();
            let name = fields.next().ok_or(ParseError::BadField("name"))?;
            let value = fields
                .next()
                .and_then(|f| f.parse::<i32>().ok())
                .ok_or(ParseError::BadField("value"))?;
            if fields.next().is_some() {
                return Err(ParseError::BadField("value"));
            }
            return Ok(ServerLine::Bust {
                name: name.to_string(),
                value,
            });
        }
        if let Some(args) = token_args(line, tokens::RESULT) {
            let mut fields = args.split_whitespace();
            let name_a = fields.next().ok_or(ParseError::BadField("name"))?.to_string();
            let value_a = fields
                .next()
                .and_then(|f| f.parse::<i32>().ok())
                .ok_or(ParseError::BadField("value"))?;
            let name_b = fields.next().ok_or(ParseError::BadField("name"))?.to_string();
            let value_b = fields
                .next()
                .and_then(|f| f.parse::<i32>().ok())
                .ok_or(ParseError::BadField("value"))?;
            if fields.next() != Some("WINNER") {
                return Err(ParseError::BadField("winner"));
            }
            let winner = fields.next().ok_or(ParseError::BadField("winner"))?.to_string();
            if fields.next().is_some() {
                return Err(ParseError::BadField("winner"));
            }
            return Ok(ServerLine::MatchResult {
                name_a,
                value_a,
                name_b,
                value_b,
                winner,
            });
        }
        if let Some(args) = token_args(line, tokens::OPP_DOWN) {
            let (name, seconds) = name_and_number(args)?;
            return Ok(ServerLine::OpponentDown { name, seconds });
        }
        if let Some(args) = token_args(line, tokens::OPP_BACK) {
            if args.is_empty() || args.contains(char::is_whitespace) {
                return Err(ParseError::BadField("name"));
            }
            return Ok(ServerLine::OpponentBack {
                name: args.to_string(),
            });
        }
        Err(ParseError::UnknownLine)
    }
}

/// Parse `<name> <number>` argument pairs (`C45T`, `C45OD`).
fn name_and_number(args: &str) -> Result<(String, u64), ParseError> {
    let mut fields = args.split_whitespace();
    let name = fields.next().ok_or(ParseError::BadField("name"))?;
    let number = fields
        .next()
        .and_then(|f| f.parse::<u64>().ok())
        .ok_or(ParseError::BadField("seconds"))?;
    if fields.next().is_some() {
        return Err(ParseError::BadField("seconds"));
    }
    Ok((name.to_string(), number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::Suit;

    fn roundtrip(line: &ServerLine) {
        let wire = line.to_string();
        let recovered = ServerLine::parse(&wire).unwrap();
        assert_eq!(&recovered, line, "wire form was {wire:?}");
    }

    #[test]
    fn name_rules() {
        assert!(valid_name("alice"));
        assert!(valid_name("B"));
        assert!(valid_name("alice2"));
        assert!(!valid_name(""));
        assert!(!valid_name("al ice"));
        assert!(!valid_name("alice\t"));
        assert!(!valid_name(&"x".repeat(64)));
        assert!(valid_name(&"x".repeat(63)));
    }

    #[test]
    fn handshake_plain_name() {
        assert_eq!(
            parse_handshake("C45alice\n"),
            Ok(Handshake::Login {
                name: "alice".into()
            })
        );
    }

    #[test]
    fn handshake_name_with_token_prefix_is_a_name() {
        // `PIOTR` starts with the ping token's spelling but is a login.
        assert_eq!(
            parse_handshake("C45PIOTR\n"),
            Ok(Handshake::Login {
                name: "PIOTR".into()
            })
        );
    }

    #[test]
    fn handshake_rejects_garbage() {
        assert_eq!(parse_handshake("HELLO\n"), Err(ParseError::MissingPrefix));
        assert_eq!(parse_handshake("C45\n"), Err(ParseError::BadName));
        assert_eq!(parse_handshake("C45a b\n"), Err(ParseError::BadName));
    }

    #[test]
    fn handshake_reconnect() {
        assert_eq!(
            parse_handshake("C45REC alice 2\n"),
            Ok(Handshake::Reconnect {
                name: "alice".into(),
                lobby: 2
            })
        );
        // Lobby 0 means "unknown, scan everywhere".
        assert_eq!(
            parse_handshake("C45REC bob 0\n"),
            Ok(Handshake::Reconnect {
                name: "bob".into(),
                lobby: 0
            })
        );
        assert_eq!(
            parse_handshake("C45REC alice\n"),
            Err(ParseError::BadField("lobby"))
        );
        assert_eq!(
            parse_handshake("C45REC alice two\n"),
            Err(ParseError::BadField("lobby"))
        );
    }

    #[test]
    fn join_modern_form() {
        assert_eq!(parse_join("C45J 3\n"), Some(Ok(3)));
        assert_eq!(parse_join("C45J\n"), Some(Err(ParseError::BadField("lobby"))));
        assert_eq!(parse_join("C45J x\n"), Some(Err(ParseError::BadField("lobby"))));
        assert_eq!(parse_join("C45alice1\n"), None);
    }

    #[test]
    fn join_legacy_form() {
        assert_eq!(parse_legacy_join("C45alice1\n"), Some(("alice".into(), 1)));
        // A digit-bearing name gives up its last digit to the lobby field.
        assert_eq!(parse_legacy_join("C45alice23\n"), Some(("alice2".into(), 3)));
        // `C45J1` is a legacy join for a player named `J`, not a modern join.
        assert_eq!(parse_legacy_join("C45J1\n"), Some(("J".into(), 1)));
        assert_eq!(parse_legacy_join("C45alice\n"), None);
        assert_eq!(parse_legacy_join("C455\n"), None); // empty name
    }

    #[test]
    fn back_request_forms() {
        assert_eq!(classify_back("C45B\n", "alice"), BackRequest::Bare);
        assert_eq!(
            classify_back("C45aliceback\n", "alice"),
            BackRequest::Named { matches: true }
        );
        assert_eq!(
            classify_back("C45bobback\n", "alice"),
            BackRequest::Named { matches: false }
        );
        // Bare `back` with no name is a malformed request, not a miss.
        assert_eq!(
            classify_back("C45back\n", "alice"),
            BackRequest::Named { matches: false }
        );
        assert_eq!(classify_back("C45HIT\n", "alice"), BackRequest::NotBack);
        // The server's bust spelling never reads as a client back request.
        assert_eq!(classify_back("C45B alice 22\n", "alice"), BackRequest::NotBack);
    }

    #[test]
    fn keepalive_tokens_are_exact() {
        assert!(is_ping("C45PI\n"));
        assert!(is_pong("C45PO\n"));
        assert!(is_yes("C45YES\n"));
        assert!(!is_ping("C45PIOTR\n"));
        assert!(!is_pong("C45POLLY\n"));
        assert!(is_hit("C45H\n"));
        assert!(is_stand("C45S\n"));
        assert!(!is_hit("C45Harry\n"));
    }

    #[test]
    fn roundtrip_simple_lines() {
        roundtrip(&ServerLine::Ok);
        roundtrip(&ServerLine::ReconnectOk);
        roundtrip(&ServerLine::TimedOut);
        roundtrip(&ServerLine::Ping);
        roundtrip(&ServerLine::Pong);
        roundtrip(&ServerLine::Wrong { reason: None });
        roundtrip(&ServerLine::Wrong {
            reason: Some("NAME_TAKEN".into()),
        });
        roundtrip(&ServerLine::Down { reason: None });
        roundtrip(&ServerLine::Down {
            reason: Some("NETWORK_LOST".into()),
        });
    }

    #[test]
    fn roundtrip_game_lines() {
        roundtrip(&ServerLine::Deal {
            first: Card { rank: 1, suit: Suit::Spades },
            second: Card { rank: 10, suit: Suit::Diamonds },
        });
        roundtrip(&ServerLine::Turn {
            name: "alice".into(),
            seconds: 30,
        });
        roundtrip(&ServerLine::CardDrawn {
            card: Card { rank: 13, suit: Suit::Hearts },
        });
        roundtrip(&ServerLine::Bust {
            name: "alice".into(),
            value: 22,
        });
        roundtrip(&ServerLine::MatchResult {
            name_a: "alice".into(),
            value_a: -1,
            name_b: "bob".into(),
            value_b: 20,
            winner: "bob".into(),
        });
        roundtrip(&ServerLine::MatchResult {
            name_a: "alice".into(),
            value_a: 19,
            name_b: "bob".into(),
            value_b: 19,
            winner: WINNER_PUSH.into(),
        });
        roundtrip(&ServerLine::OpponentDown {
            name: "alice".into(),
            seconds: 30,
        });
        roundtrip(&ServerLine::OpponentBack {
            name: "alice".into(),
        });
    }

    #[test]
    fn snapshot_roundtrip() {
        let snapshot = LobbySnapshot {
            lobbies: vec![
                LobbyStat { players: 0, running: false },
                LobbyStat { players: 2, running: true },
                LobbyStat { players: 1, running: false },
            ],
        };
        let line = ServerLine::Lobbies(snapshot.clone());
        assert_eq!(line.to_string(), "C45L 3 002110");
        roundtrip(&line);
    }

    #[test]
    fn snapshot_rejects_malformed_pairs() {
        assert!(ServerLine::parse("C45L 2 0010").is_ok());
        assert!(ServerLine::parse("C45L 2 001").is_err());
        assert!(ServerLine::parse("C45L 2 00103").is_err());
        assert!(ServerLine::parse("C45L x 00\n").is_err());
        assert!(ServerLine::parse("C45L 1 31\n").is_err()); // players > 2
        assert!(ServerLine::parse("C45L 1 02\n").is_err()); // status > 1
    }

    #[test]
    fn parse_distinguishes_near_tokens() {
        // `C45TO` is a timeout, not a turn for a player named `O`.
        assert_eq!(ServerLine::parse("C45TO\n"), Ok(ServerLine::TimedOut));
        // `C45DOWN` is a shutdown, not a deal.
        assert_eq!(
            ServerLine::parse("C45DOWN\n"),
            Ok(ServerLine::Down { reason: None })
        );
        assert_eq!(ServerLine::parse("C45OK\n"), Ok(ServerLine::Ok));
        assert_eq!(
            ServerLine::parse("C45OB alice\n"),
            Ok(ServerLine::OpponentBack {
                name: "alice".into()
            })
        );
    }

    #[test]
    fn parse_rejects_unknown_lines() {
        assert_eq!(ServerLine::parse("nonsense"), Err(ParseError::MissingPrefix));
        assert_eq!(ServerLine::parse("C45XYZZY"), Err(ParseError::UnknownLine));
        assert_eq!(
            ServerLine::parse("C45T alice\n"),
            Err(ParseError::BadField("seconds"))
        );
        assert_eq!(
            ServerLine::parse("C45D AS\n"),
            Err(ParseError::BadField("card"))
        );
    }
}

// blackjack_protocol — wire protocol for the blackjack lobby server.
//
// This crate defines the line protocol spoken between the blackjack server
// (`blackjack_server`) and game clients over TCP. It is shared between both
// sides and has no dependency on the server's game state or sockets.
//
// Module overview:
// - `frame.rs`:   Line discipline — the `C45` frame prefix, exact token
//                 matching, line and name bounds.
// - `cards.rs`:   `Suit` and `Card` with their two-character wire encoding.
// - `message.rs`: Server-to-client lines (`ServerLine`, emitted and parsed),
//                 client-line parsing helpers, lobby snapshots, name rules.
//
// Design decisions:
// - **Text lines, not serialized structs.** Every message is one ASCII line
//   terminated by `\n`, beginning with the `C45` prefix. Fields are
//   whitespace-separated with bounded widths, so parsing is plain string
//   splitting — there is nothing for serde to do here.
// - **Exact token matching.** A token only matches when followed by
//   end-of-line or whitespace, so a player name that merely starts with a
//   token's spelling (say `PIOTR` after the prefix) is never misread as a
//   keep-alive. See `frame::matches_token`.
// - **No async runtime.** The crate is pure string handling; blocking I/O
//   and timeouts belong to the server's transport layer.

pub mod cards;
pub mod frame;
pub mod message;

pub use cards::{Card, Suit};
pub use frame::{matches_token, strip_frame, token_args, FRAME_PREFIX, MAX_LINE, MAX_NAME_LEN};
pub use message::{
    classify_back, parse_handshake, parse_join, parse_legacy_join, valid_name, BackRequest,
    Handshake, LobbySnapshot, LobbyStat, ParseError, ServerLine, WINNER_PUSH,
};

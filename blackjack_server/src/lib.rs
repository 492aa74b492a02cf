// blackjack_server — multi-lobby TCP server for two-player blackjack.
//
// Clients connect over TCP, present a name, pick a lobby, wait for an
// opponent, and play a turn-based match; afterwards they return to lobby
// selection. A player whose connection drops mid-match may reconnect within
// a bounded window and resume with their hand intact.
//
// Module overview:
// - `config.rs`:    Defaults, key/value config file, timing knobs.
// - `transport.rs`: Line I/O over one TCP connection — timed byte-at-a-time
//                   reads, readiness probes, best-effort writes.
// - `registry.rs`:  Process-wide name reservations with reconnect tokens.
// - `deck.rs`:      Deck, draw-with-reshuffle, hand valuation.
// - `lobby.rs`:     Per-lobby seats, admission, and the match-start gate.
// - `game.rs`:      The match task — deal, turns, keep-alive, the
//                   disconnect/reconnect window, resolution.
// - `session.rs`:   Per-connection state machine from handshake to close.
// - `server.rs`:    Accept loop, connection set, shutdown broadcast, and the
//                   embeddable `start_server` API.
//
// Concurrency: one thread per session, one per running match, one acceptor.
// Shared state lives behind narrow mutexes (identity registry, each lobby,
// the connection set — acquired in that order, never nested) and no lock is
// held across network I/O. Each transport is written by one task at a time:
// the session hands the connection to the match task for the duration of a
// match and takes it back afterwards.

pub mod config;
pub mod deck;
pub mod game;
pub mod lobby;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{ServerConfig, Timing};
pub use server::{start_server, ServerHandle};

// Lobby state: two seats, a deck, and the match-start gate.
//
// Every lobby sits behind its own mutex guarding all seat fields and the
// `running` flag. Critical sections are short — lock, mutate, unlock; no
// network I/O ever happens under a lobby lock. When several lobbies must be
// inspected (snapshots, name scans) they are locked one at a time, never
// two together.
//
// Seat invariants:
// - occupancy equals the number of seats with `connected == true`;
// - a seat that is not connected has no transport;
// - while `running`, seat names never change — only the transport may flip
//   between attached and detached (mid-match disconnect, reconnect).

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::info;

use blackjack_protocol::{Card, LobbySnapshot, LobbyStat};

use crate::deck::Deck;
use crate::transport::{ConnId, Transport};

pub const LOBBY_SIZE: usize = 2;

/// Hands never grow past this in practice; preallocated to avoid mid-match
/// reallocation.
pub const HAND_CAPACITY: usize = 12;

/// One seat in a lobby.
pub struct Seat {
    /// Empty when the seat is free.
    pub name: String,
    pub hand: Vec<Card>,
    pub connected: bool,
    /// `None` while detached (free seat, or mid-match disconnect).
    pub transport: Option<Transport>,
    pub stood: bool,
    pub busted: bool,
}

impl Seat {
    fn new() -> Seat {
        Seat {
            name: String::new(),
            hand: Vec::with_capacity(HAND_CAPACITY),
            connected: false,
            transport: None,
            stood: false,
            busted: false,
        }
    }

    pub fn occupied_by(&self, name: &str) -> bool {
        self.connected && self.name == name
    }

    /// Free the seat entirely.
    pub fn clear(&mut self) {
        self.name.clear();
        self.hand.clear();
        self.connected = false;
        self.transport = None;
        self.stood = false;
        self.busted = false;
    }

    /// A clone of the seat's transport, if one is attached.
    pub fn transport_clone(&self) -> Option<Transport> {
        self.transport.as_ref().and_then(|t| t.try_clone().ok())
    }
}

pub struct Lobby {
    pub seats: [Seat; LOBBY_SIZE],
    pub occupancy: usize,
    pub running: bool,
    pub deck: Deck,
}

impl Lobby {
    fn new(deck: Deck) -> Lobby {
        Lobby {
            seats: [Seat::new(), Seat::new()],
            occupancy: 0,
            running: false,
            deck,
        }
    }

    pub fn seat_of(&self, name: &str) -> Option<usize> {
        self.seats.iter().position(|s| s.occupied_by(name))
    }
}

/// Admission outcome for `try_add_player`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Added,
    Full,
    Invalid,
}

/// The fixed pool of lobbies, sized at startup.
pub struct Lobbies {
    lobbies: Vec<Mutex<Lobby>>,
}

impl Lobbies {
    /// Create `count` lobbies, each with a freshly shuffled deck.
    pub fn new(count: usize) -> Lobbies {
        let mut rng = rand::rng();
        let lobbies = (0..count)
            .map(|_| {
                let mut deck = Deck::new();
                deck.shuffle(&mut rng);
                Mutex::new(Lobby::new(deck))
            })
            .collect();
        Lobbies { lobbies }
    }

    pub fn count(&self) -> usize {
        self.lobbies.len()
    }

    /// Lock one lobby. Callers pass indexes they have already range-checked.
    pub(crate) fn guard(&self, index: usize) -> MutexGuard<'_, Lobby> {
        self.lobbies[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Seat `name` in the first free seat of lobby `index`.
    pub fn try_add_player(&self, index: usize, name: &str) -> Admission {
        if index >= self.lobbies.len() {
            return Admission::Invalid;
        }
        let mut lobby = self.guard(index);
        if lobby.occupancy >= LOBBY_SIZE {
            return Admission::Full;
        }
        let Some(seat) = lobby.seats.iter_mut().find(|s| !s.connected) else {
            return Admission::Full;
        };
        seat.name = name.to_string();
        seat.hand.clear();
        seat.connected = true;
        seat.stood = false;
        seat.busted = false;
        lobby.occupancy += 1;
        info!(
            "lobby #{}: '{name}' seated ({}/{LOBBY_SIZE})",
            index + 1,
            lobby.occupancy
        );
        Admission::Added
    }

    /// Attach a transport to `name`'s seat. Used on join and on reconnect.
    pub fn attach_transport(&self, index: usize, name: &str, transport: Transport) -> bool {
        if index >= self.lobbies.len() {
            return false;
        }
        let mut lobby = self.guard(index);
        match lobby.seats.iter_mut().find(|s| s.occupied_by(name)) {
            Some(seat) => {
                seat.transport = Some(transport);
                true
            }
            None => false,
        }
    }

    /// Remove `name` from whichever lobby seats it.
    pub fn remove_player(&self, name: &str) {
        for (i, slot) in self.lobbies.iter().enumerate() {
            let mut lobby = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(seat) = lobby.seats.iter_mut().find(|s| s.occupied_by(name)) {
                seat.clear();
                lobby.occupancy -= 1;
                info!(
                    "lobby #{}: '{name}' removed ({}/{LOBBY_SIZE})",
                    i + 1,
                    lobby.occupancy
                );
                return;
            }
        }
    }

    /// Remove `name` from lobby `index` only while its seat still holds the
    /// caller's connection — a reconnect that has taken the seat over keeps it.
    pub fn remove_player_if_conn(&self, index: usize, name: &str, conn: ConnId) -> bool {
        if index >= self.lobbies.len() {
            return false;
        }
        let mut lobby = self.guard(index);
        if let Some(seat) = lobby.seats.iter_mut().find(|s| s.occupied_by(name)) {
            if seat.transport.as_ref().map(Transport::id) == Some(conn) {
                seat.clear();
                lobby.occupancy -= 1;
                info!("lobby #{}: '{name}' withdrew", index + 1);
                return true;
            }
        }
        false
    }

    /// Clear a seat's transport without unseating the player, provided the
    /// seat still holds the caller's connection.
    pub fn detach_if_conn(&self, index: usize, name: &str, conn: ConnId) -> bool {
        if index >= self.lobbies.len() {
            return false;
        }
        let mut lobby = self.guard(index);
        if let Some(seat) = lobby.seats.iter_mut().find(|s| s.occupied_by(name)) {
            if seat.transport.as_ref().map(Transport::id) == Some(conn) {
                seat.transport = None;
                return true;
            }
        }
        false
    }

    /// Which lobby, if any, seats `name`.
    pub fn find_player(&self, name: &str) -> Option<usize> {
        for (i, slot) in self.lobbies.iter().enumerate() {
            let lobby = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if lobby.seat_of(name).is_some() {
                return Some(i);
            }
        }
        None
    }

    pub fn seated_in(&self, index: usize, name: &str) -> bool {
        index < self.lobbies.len() && self.guard(index).seat_of(name).is_some()
    }

    pub fn is_running(&self, index: usize) -> bool {
        index < self.lobbies.len() && self.guard(index).running
    }

    /// Flip `running` when the lobby is full and idle. Returns true exactly
    /// once per match — the caller that sees true spawns the match task.
    pub fn start_if_ready(&self, index: usize) -> bool {
        if index >= self.lobbies.len() {
            return false;
        }
        let mut lobby = self.guard(index);
        if !lobby.running && lobby.occupancy == LOBBY_SIZE {
            lobby.running = true;
            true
        } else {
            false
        }
    }

    /// Reattach `transport` to a detached seat of a running match.
    pub fn try_reconnect_running(&self, index: usize, name: &str, transport: Transport) -> bool {
        if index >= self.lobbies.len() {
            return false;
        }
        let mut lobby = self.guard(index);
        if !lobby.running {
            return false;
        }
        match lobby
            .seats
            .iter_mut()
            .find(|s| s.occupied_by(name) && s.transport.is_none())
        {
            Some(seat) => {
                seat.transport = Some(transport);
                true
            }
            None => false,
        }
    }

    /// Replace the transport of a waiting (not running) seat, shutting the
    /// one it displaces so the previous session unblocks and exits.
    pub fn take_over_waiting(&self, index: usize, name: &str, transport: Transport) -> bool {
        if index >= self.lobbies.len() {
            return false;
        }
        let mut lobby = self.guard(index);
        if lobby.running {
            return false;
        }
        match lobby.seats.iter_mut().find(|s| s.occupied_by(name)) {
            Some(seat) => {
                if let Some(old) = seat.transport.replace(transport) {
                    old.shutdown();
                }
                true
            }
            None => false,
        }
    }

    /// Occupancy/status digest of every lobby for the `C45L` line.
    pub fn snapshot(&self) -> LobbySnapshot {
        let lobbies = self
            .lobbies
            .iter()
            .map(|slot| {
                let lobby = slot.lock().unwrap_or_else(PoisonError::into_inner);
                LobbyStat {
                    players: lobby.occupancy as u8,
                    running: lobby.running,
                }
            })
            .collect();
        LobbySnapshot { lobbies }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn transport(id: u64) -> (TcpStream, Transport) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, Transport::new(server, ConnId(id)))
    }

    #[test]
    fn admission_fills_seats_in_order() {
        let lobbies = Lobbies::new(2);
        assert_eq!(lobbies.try_add_player(0, "alice"), Admission::Added);
        assert_eq!(lobbies.try_add_player(0, "bob"), Admission::Added);
        assert_eq!(lobbies.try_add_player(0, "carol"), Admission::Full);
        assert_eq!(lobbies.try_add_player(9, "carol"), Admission::Invalid);
        assert_eq!(lobbies.find_player("alice"), Some(0));
        assert_eq!(lobbies.find_player("carol"), None);
    }

    #[test]
    fn occupancy_tracks_connected_seats() {
        let lobbies = Lobbies::new(1);
        lobbies.try_add_player(0, "alice");
        lobbies.try_add_player(0, "bob");
        assert_eq!(lobbies.guard(0).occupancy, 2);
        lobbies.remove_player("alice");
        assert_eq!(lobbies.guard(0).occupancy, 1);
        let lobby = lobbies.guard(0);
        let connected = lobby.seats.iter().filter(|s| s.connected).count();
        assert_eq!(connected, lobby.occupancy);
    }

    #[test]
    fn detached_seats_have_no_transport() {
        let lobbies = Lobbies::new(1);
        lobbies.try_add_player(0, "alice");
        let lobby = lobbies.guard(0);
        for seat in &lobby.seats {
            if !seat.connected {
                assert!(seat.transport.is_none());
            }
        }
    }

    #[test]
    fn start_gate_fires_exactly_once() {
        let lobbies = Lobbies::new(1);
        lobbies.try_add_player(0, "alice");
        assert!(!lobbies.start_if_ready(0), "half-full lobby must not start");
        lobbies.try_add_player(0, "bob");
        assert!(lobbies.start_if_ready(0));
        assert!(!lobbies.start_if_ready(0), "second caller must see the gate shut");
        assert!(lobbies.is_running(0));
    }

    #[test]
    fn guarded_removal_respects_takeover() {
        let lobbies = Lobbies::new(1);
        lobbies.try_add_player(0, "alice");
        let (_c1, t1) = transport(1);
        assert!(lobbies.attach_transport(0, "alice", t1));

        // A reconnect replaces the seat's transport with a new connection.
        let (_c2, t2) = transport(2);
        assert!(lobbies.take_over_waiting(0, "alice", t2));

        // The displaced session's guarded removal must be a no-op.
        assert!(!lobbies.remove_player_if_conn(0, "alice", ConnId(1)));
        assert!(lobbies.seated_in(0, "alice"));

        assert!(lobbies.remove_player_if_conn(0, "alice", ConnId(2)));
        assert!(!lobbies.seated_in(0, "alice"));
    }

    #[test]
    fn reconnect_running_needs_a_detached_seat() {
        let lobbies = Lobbies::new(1);
        lobbies.try_add_player(0, "alice");
        lobbies.try_add_player(0, "bob");
        lobbies.start_if_ready(0);

        let (_c1, t1) = transport(1);
        // Seat still has no transport at all — that counts as detached.
        assert!(lobbies.try_reconnect_running(0, "alice", t1));

        let (_c2, t2) = transport(2);
        assert!(
            !lobbies.try_reconnect_running(0, "alice", t2),
            "an attached seat must refuse a second reconnect"
        );
    }

    #[test]
    fn snapshot_reports_occupancy_and_phase() {
        let lobbies = Lobbies::new(3);
        lobbies.try_add_player(1, "alice");
        lobbies.try_add_player(2, "bob");
        lobbies.try_add_player(2, "carol");
        lobbies.start_if_ready(2);

        let snapshot = lobbies.snapshot();
        assert_eq!(snapshot.lobbies.len(), 3);
        assert_eq!(snapshot.lobbies[0], LobbyStat { players: 0, running: false });
        assert_eq!(snapshot.lobbies[1], LobbyStat { players: 1, running: false });
        assert_eq!(snapshot.lobbies[2], LobbyStat { players: 2, running: true });
    }
}

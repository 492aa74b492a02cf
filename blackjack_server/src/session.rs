// Per-connection session driver.
//
// One thread per accepted transport, walking the connection through:
// handshake → (reconnect resolution | fresh login) → lobby selection →
// waiting for an opponent → in-match → post-match disposition → back to
// selection, until the client leaves or misbehaves.
//
// Two rules shape the code:
// - During a match the session never touches the socket — the match task
//   owns game-phase I/O. The session just watches the lobby's `running`
//   flag and its own seat, then takes the connection back.
// - Every exit goes through `close()`, which removes the name reservation
//   only while this session's token is still current (`remove_if_token`),
//   so a reconnected successor is never evicted by its predecessor's
//   cleanup.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use blackjack_protocol::message::{is_hit, is_ping, is_pong, is_stand, is_yes};
use blackjack_protocol::{
    classify_back, parse_handshake, parse_join, parse_legacy_join, BackRequest, Handshake,
    ServerLine, MAX_LINE,
};

use crate::game;
use crate::lobby::Admission;
use crate::registry::Reservation;
use crate::server::Shared;
use crate::transport::{Probe, ReadOutcome, Transport};

/// Cadence of lobby-state polls while waiting on the match lifecycle.
const WAIT_POLL: Duration = Duration::from_millis(100);
/// Cadence of seat-cleared polls right after a match ends.
const CLEAR_POLL: Duration = Duration::from_millis(10);
/// Wait for the rest of a line the readiness probe saw starting.
const LINE_WAIT: Duration = Duration::from_secs(1);

enum State {
    LobbySelect,
    WaitStart(usize),
    InMatch(usize),
    PostMatch,
    Close,
}

pub(crate) fn run_session(shared: Arc<Shared>, transport: Transport) {
    let peer = transport
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "?".into());
    info!("{}: session opened from {peer}", transport.id());
    if transport.set_io_timeouts().is_err() {
        shared.connections.remove(transport.id());
        transport.shutdown();
        return;
    }
    Session {
        shared,
        transport,
        name: None,
        token: 0,
    }
    .run();
}

struct Session {
    shared: Arc<Shared>,
    transport: Transport,
    /// Reserved player name, once the handshake succeeds.
    name: Option<String>,
    /// Registry token guarding this session's cleanup.
    token: u64,
}

impl Session {
    fn run(mut self) {
        let mut state = self.handshake();
        loop {
            state = match state {
                State::LobbySelect => self.lobby_select(),
                State::WaitStart(index) => self.wait_start(index),
                State::InMatch(index) => self.in_match(index),
                State::PostMatch => self.post_match(),
                State::Close => break,
            };
        }
        self.close();
    }

    fn send(&self, line: &ServerLine) -> bool {
        self.transport.send(line).is_ok()
    }

    fn send_wrong(&self, reason: Option<&str>) {
        let _ = self.transport.send(&ServerLine::Wrong {
            reason: reason.map(String::from),
        });
    }

    fn send_snapshot(&self) -> bool {
        self.send(&ServerLine::Lobbies(self.shared.lobbies.snapshot()))
    }

    fn session_name(&self) -> String {
        self.name.clone().unwrap_or_default()
    }

    /// S0 + S1: skip keep-alives, then classify the first real line.
    fn handshake(&mut self) -> State {
        let line = loop {
            match self.transport.read_line(MAX_LINE) {
                ReadOutcome::Line(line) => {
                    if is_ping(&line) {
                        if !self.send(&ServerLine::Pong) {
                            return State::Close;
                        }
                    } else if is_pong(&line) {
                        // Ignore and keep waiting for the handshake proper.
                    } else {
                        break line;
                    }
                }
                _ => return State::Close,
            }
        };
        match parse_handshake(&line) {
            Ok(Handshake::Reconnect { name, lobby }) => self.reconnect(name, lobby),
            Ok(Handshake::Login { name }) => self.fresh_login(name),
            Err(err) => {
                debug!("{}: bad handshake {line:?} ({err})", self.transport.id());
                self.send_wrong(None);
                State::Close
            }
        }
    }

    /// S3: reserve the name, acknowledge, send the first snapshot.
    fn fresh_login(&mut self, name: String) -> State {
        if self.shared.registry.has(&name) || self.shared.lobbies.find_player(&name).is_some() {
            info!("{}: name '{name}' is taken", self.transport.id());
            self.send_wrong(Some("NAME_TAKEN"));
            return State::Close;
        }
        match self.shared.registry.reserve(&name, self.transport.id()) {
            Reservation::Reserved { token } => {
                self.token = token;
                self.name = Some(name.clone());
            }
            Reservation::NameTaken => {
                self.send_wrong(Some("NAME_TAKEN"));
                return State::Close;
            }
            Reservation::Full => {
                self.send_wrong(None);
                return State::Close;
            }
        }
        info!("{}: '{name}' logged in", self.transport.id());
        if !self.send(&ServerLine::Ok) || !self.send_snapshot() {
            return State::Close;
        }
        State::LobbySelect
    }

    /// S2: resolve a reconnect request, in order — resume a running match,
    /// take over a waiting seat, refuse a race, or fall back to fresh login.
    fn reconnect(&mut self, name: String, lobby: u32) -> State {
        let count = self.shared.lobbies.count();
        if lobby as usize > count {
            self.send_wrong(Some("RECONNECT"));
            return State::Close;
        }
        // Give a running match task time to notice the dead transport and
        // detach the seat before we go looking for it.
        thread::sleep(self.shared.timing.reconnect_grace);

        // Hinted lobby first, then everywhere (hint 0 means "unknown").
        let hinted: Option<usize> = (lobby >= 1).then(|| lobby as usize - 1);
        let order: Vec<usize> = hinted
            .into_iter()
            .chain((0..count).filter(|i| Some(*i) != hinted))
            .collect();

        for &index in &order {
            let Ok(clone) = self.transport.try_clone() else {
                return State::Close;
            };
            if self.shared.lobbies.try_reconnect_running(index, &name, clone) {
                if !self.bind_identity(&name) {
                    self.shared
                        .lobbies
                        .detach_if_conn(index, &name, self.transport.id());
                    self.send_wrong(Some("RECONNECT"));
                    return State::Close;
                }
                if !self.send(&ServerLine::ReconnectOk) {
                    return State::Close;
                }
                info!(
                    "{}: '{name}' resumed its match in lobby #{}",
                    self.transport.id(),
                    index + 1
                );
                return State::InMatch(index);
            }
        }

        for &index in &order {
            let Ok(clone) = self.transport.try_clone() else {
                return State::Close;
            };
            if self.shared.lobbies.take_over_waiting(index, &name, clone) {
                if !self.bind_identity(&name) {
                    self.shared
                        .lobbies
                        .remove_player_if_conn(index, &name, self.transport.id());
                    self.send_wrong(Some("RECONNECT"));
                    return State::Close;
                }
                if !self.send(&ServerLine::ReconnectOk) {
                    return State::Close;
                }
                info!(
                    "{}: '{name}' took its waiting seat back in lobby #{}",
                    self.transport.id(),
                    index + 1
                );
                if self.shared.lobbies.start_if_ready(index) {
                    let shared = self.shared.clone();
                    thread::spawn(move || game::run_match(shared, index));
                }
                return State::WaitStart(index);
            }
        }

        if self.shared.lobbies.find_player(&name).is_some() {
            // Seated with a live transport: a reconnect race. Close and let
            // the client retry rather than promote to a second login.
            info!("{}: reconnect race for '{name}'; closing", self.transport.id());
            return State::Close;
        }

        // Nothing to resume: fresh login that takes over the reservation.
        if !self.bind_identity(&name) {
            self.send_wrong(None);
            return State::Close;
        }
        info!("{}: '{name}' reconnected to the lobby list", self.transport.id());
        if !self.send(&ServerLine::Ok) || !self.send_snapshot() {
            return State::Close;
        }
        State::LobbySelect
    }

    /// Bind this connection to `name` in the registry (creating the record
    /// when needed) and remember the fresh token.
    fn bind_identity(&mut self, name: &str) -> bool {
        match self.shared.registry.register(name, self.transport.id()) {
            Some(token) => {
                self.token = token;
                self.name = Some(name.to_string());
                true
            }
            None => false,
        }
    }

    /// S4: lobby selection loop. Range errors keep the session alive;
    /// everything else unparseable ends it.
    fn lobby_select(&mut self) -> State {
        let name = self.session_name();
        loop {
            let line = match self.transport.read_line(MAX_LINE) {
                ReadOutcome::Line(line) => line,
                _ => return State::Close,
            };
            debug!("{}: selection input {line:?}", self.transport.id());

            if is_ping(&line) {
                if !self.send(&ServerLine::Pong) {
                    return State::Close;
                }
                continue;
            }
            if is_pong(&line) {
                continue;
            }
            match classify_back(&line, &name) {
                BackRequest::Bare | BackRequest::Named { matches: true } => {
                    if !self.send_snapshot() {
                        return State::Close;
                    }
                    continue;
                }
                BackRequest::Named { matches: false } => {
                    self.send_wrong(None);
                    return State::Close;
                }
                BackRequest::NotBack => {}
            }

            let lobby_num = if let Some(parsed) = parse_join(&line) {
                match parsed {
                    Ok(n) => n,
                    Err(_) => {
                        self.send_wrong(None);
                        continue;
                    }
                }
            } else if let Some((join_name, n)) = parse_legacy_join(&line) {
                if join_name != name {
                    warn!(
                        "{}: legacy join for '{join_name}' on '{name}'s connection",
                        self.transport.id()
                    );
                    self.send_wrong(None);
                    return State::Close;
                }
                n
            } else {
                self.send_wrong(None);
                return State::Close;
            };

            if lobby_num < 1 || lobby_num as usize > self.shared.lobbies.count() {
                self.send_wrong(None);
                continue;
            }
            let index = lobby_num as usize - 1;
            match self.shared.lobbies.try_add_player(index, &name) {
                Admission::Added => {
                    let attached = self
                        .transport
                        .try_clone()
                        .map(|clone| self.shared.lobbies.attach_transport(index, &name, clone))
                        .unwrap_or(false);
                    if !attached || !self.send(&ServerLine::Ok) {
                        self.shared.lobbies.remove_player(&name);
                        return State::Close;
                    }
                    if self.shared.lobbies.start_if_ready(index) {
                        let shared = self.shared.clone();
                        thread::spawn(move || game::run_match(shared, index));
                    }
                    return State::WaitStart(index);
                }
                Admission::Full | Admission::Invalid => {
                    self.send_wrong(None);
                    continue;
                }
            }
        }
    }

    /// S5: seated, waiting for the opponent. Watch `running`, answer
    /// keep-alives, honor back requests, drop on anything else.
    fn wait_start(&mut self, index: usize) -> State {
        let name = self.session_name();
        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                self.withdraw(index, &name);
                return State::Close;
            }
            if self.shared.lobbies.is_running(index) {
                return State::InMatch(index);
            }
            match self.transport.probe() {
                Probe::Idle => thread::sleep(WAIT_POLL),
                Probe::Closed | Probe::Failed => {
                    self.withdraw(index, &name);
                    return State::Close;
                }
                Probe::Readable => {
                    // The match may have started since the probe; re-check
                    // before consuming anything so game traffic stays with
                    // the match task.
                    if self.shared.lobbies.is_running(index) {
                        return State::InMatch(index);
                    }
                    match self.transport.read_line_timeout(MAX_LINE, LINE_WAIT) {
                        ReadOutcome::TimedOut => {} // partial line still trickling in
                        ReadOutcome::Eof | ReadOutcome::Failed => {
                            self.withdraw(index, &name);
                            return State::Close;
                        }
                        ReadOutcome::Line(line) => {
                            if is_ping(&line) {
                                if !self.send(&ServerLine::Pong) {
                                    self.withdraw(index, &name);
                                    return State::Close;
                                }
                            } else if is_pong(&line) || is_yes(&line) {
                                // Tolerated while waiting.
                            } else {
                                match classify_back(&line, &name) {
                                    BackRequest::Bare
                                    | BackRequest::Named { matches: true } => {
                                        self.withdraw(index, &name);
                                        if !self.send_snapshot() {
                                            return State::Close;
                                        }
                                        return State::LobbySelect;
                                    }
                                    _ => {
                                        self.send_wrong(None);
                                        self.withdraw(index, &name);
                                        return State::Close;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Leave the seat, but only while it is still bound to this connection.
    fn withdraw(&self, index: usize, name: &str) {
        self.shared
            .lobbies
            .remove_player_if_conn(index, name, self.transport.id());
    }

    /// S6: the match task owns the transport. Wait for the match to end and
    /// for the seat to be cleared, then take the connection back.
    fn in_match(&mut self, index: usize) -> State {
        let name = self.session_name();
        while self.shared.lobbies.is_running(index) {
            thread::sleep(WAIT_POLL);
        }
        while self.shared.lobbies.seated_in(index, &name) {
            thread::sleep(CLEAR_POLL);
        }
        State::PostMatch
    }

    /// S7: a back request set mid-match short-circuits straight to the lobby
    /// list; otherwise read until the client decides.
    fn post_match(&mut self) -> State {
        let name = self.session_name();
        if self
            .shared
            .registry
            .take_back(&name, Some(self.transport.id()))
        {
            if !self.send_snapshot() {
                return State::Close;
            }
            return State::LobbySelect;
        }
        loop {
            let line = match self.transport.read_line(MAX_LINE) {
                ReadOutcome::Line(line) => line,
                _ => return State::Close,
            };
            if is_ping(&line) {
                if !self.send(&ServerLine::Pong) {
                    return State::Close;
                }
                continue;
            }
            if is_pong(&line) || is_yes(&line) {
                continue;
            }
            if is_hit(&line) || is_stand(&line) {
                // A game click racing the match end; ignore.
                continue;
            }
            match classify_back(&line, &name) {
                BackRequest::Bare | BackRequest::Named { matches: true } => {
                    if !self.send_snapshot() {
                        return State::Close;
                    }
                    return State::LobbySelect;
                }
                _ => {
                    self.send_wrong(None);
                    return State::Close;
                }
            }
        }
    }

    /// Common exit: token-guarded registry cleanup, connection-set removal,
    /// socket shutdown.
    fn close(&mut self) {
        if let Some(name) = &self.name {
            self.shared.registry.remove_if_token(name, self.token);
        }
        self.shared.connections.remove(self.transport.id());
        self.transport.shutdown();
        info!("{}: session closed", self.transport.id());
    }
}

// The match task: one per lobby, spawned when the second seat fills, owner
// of all game-phase I/O on both players' transports until the result is out.
//
// Phases: deal → turn loop → (possibly) disconnect wait → resolution. The
// lobby mutex is taken only for short state updates; every read, write, and
// timed wait happens with no lock held. There are two detach flavors:
//
// - an I/O failure closes the socket and clears the seat's transport, which
//   opens the reconnect window;
// - a protocol violation or a back-to-lobby request only clears the seat:
//   the player's session still owns the socket and carries on post-match.
//
// Forced winners short-circuit value comparison at resolution: out-of-turn
// input or garbage forfeits the offender, a back request forfeits the
// requester, an expired reconnect window forfeits the absentee.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::rngs::ThreadRng;

use blackjack_protocol::message::{is_hit, is_ping, is_pong, is_stand, is_yes};
use blackjack_protocol::{classify_back, BackRequest, ServerLine, MAX_LINE, WINNER_PUSH};

use crate::deck::{hand_value, BUST_LIMIT};
use crate::lobby::Seat;
use crate::server::Shared;
use crate::transport::{Probe, ReadOutcome, Transport};

/// Cadence of the short reads and probes that drive the loops below.
const LOOP_READ_WAIT: Duration = Duration::from_secs(1);

/// Run the match in lobby `index` to completion. Called on a dedicated
/// thread by whichever session flipped the start gate.
pub(crate) fn run_match(shared: Arc<Shared>, index: usize) {
    let task = MatchTask {
        shared: &shared,
        index,
        rng: rand::rng(),
        turn: 0,
        forced_winner: None,
    };
    task.run();
}

struct MatchTask<'a> {
    shared: &'a Shared,
    index: usize,
    rng: ThreadRng,
    /// Seat whose turn it is. Seat 0 acts first.
    turn: usize,
    forced_winner: Option<usize>,
}

enum TurnEnd {
    /// Both seats are done, or a forced winner was chosen.
    Finished,
    /// This seat's transport failed; open the reconnect window.
    Disconnect(usize),
}

enum WaitEnd {
    /// The detached player is back; re-enter the turn loop where it stopped.
    Resumed,
    /// The match is over one way or another.
    Finished,
}

impl MatchTask<'_> {
    fn run(mut self) {
        info!("lobby #{}: match started", self.index + 1);
        let mut pending_disconnect = self.deal();
        loop {
            if let Some(down) = pending_disconnect.take() {
                match self.disconnect_wait(down) {
                    WaitEnd::Resumed => {}
                    WaitEnd::Finished => break,
                }
            }
            match self.turn_loop() {
                TurnEnd::Finished => break,
                TurnEnd::Disconnect(seat) => pending_disconnect = Some(seat),
            }
        }
        self.resolve();
    }

    /// Reshuffle, reset both seats, deal two cards each, and deliver the
    /// private `C45D` lines. Returns the seat whose delivery failed, if any.
    fn deal(&mut self) -> Option<usize> {
        let mut deliveries: Vec<(usize, Option<Transport>, ServerLine)> = Vec::new();
        {
            let mut lobby = self.shared.lobbies.guard(self.index);
            let lobby = &mut *lobby;
            lobby.deck.shuffle(&mut self.rng);
            for seat in &mut lobby.seats {
                seat.hand.clear();
                seat.stood = false;
                seat.busted = false;
            }
            for seat in &mut lobby.seats {
                let first = lobby.deck.draw(&mut self.rng);
                let second = lobby.deck.draw(&mut self.rng);
                seat.hand.push(first);
                seat.hand.push(second);
            }
            for (i, seat) in lobby.seats.iter().enumerate() {
                deliveries.push((
                    i,
                    seat.transport_clone(),
                    ServerLine::Deal {
                        first: seat.hand[0],
                        second: seat.hand[1],
                    },
                ));
            }
        }
        for (i, transport, line) in deliveries {
            match transport {
                Some(t) if t.send(&line).is_ok() => {}
                _ => return Some(i),
            }
        }
        None
    }

    /// Drive turns until both seats are done or something ends the match.
    fn turn_loop(&mut self) -> TurnEnd {
        loop {
            let (names, transports) = {
                let lobby = self.shared.lobbies.guard(self.index);
                let done = |s: &Seat| s.stood || s.busted;
                if done(&lobby.seats[0]) && done(&lobby.seats[1]) {
                    return TurnEnd::Finished;
                }
                if done(&lobby.seats[self.turn]) {
                    drop(lobby);
                    self.turn = 1 - self.turn;
                    continue;
                }
                (
                    [lobby.seats[0].name.clone(), lobby.seats[1].name.clone()],
                    [
                        lobby.seats[0].transport_clone(),
                        lobby.seats[1].transport_clone(),
                    ],
                )
            };
            let active = self.turn;
            let other = 1 - active;
            let [t0, t1] = transports;
            let (active_t, other_t) = if active == 0 { (t0, t1) } else { (t1, t0) };
            let Some(active_t) = active_t else {
                return TurnEnd::Disconnect(active);
            };
            let Some(other_t) = other_t else {
                return TurnEnd::Disconnect(other);
            };

            let turn_line = ServerLine::Turn {
                name: names[active].clone(),
                seconds: self.shared.timing.turn_timeout.as_secs(),
            };
            if active_t.send(&turn_line).is_err() {
                return TurnEnd::Disconnect(active);
            }
            if other_t.send(&turn_line).is_err() {
                return TurnEnd::Disconnect(other);
            }
            debug!("lobby #{}: turn of '{}'", self.index + 1, names[active]);

            match self.one_turn(active, &names, &active_t, &other_t) {
                Some(end) => return end,
                None => continue,
            }
        }
    }

    /// Wait out one turn of the active seat. Returns `None` when the turn
    /// completed normally (the caller re-enters the loop), or the way the
    /// match phase ends.
    fn one_turn(
        &mut self,
        active: usize,
        names: &[String; 2],
        active_t: &Transport,
        other_t: &Transport,
    ) -> Option<TurnEnd> {
        let other = 1 - active;
        let deadline = Instant::now() + self.shared.timing.turn_timeout;
        let mut last_alive = Instant::now();
        let mut last_ping = Instant::now();

        loop {
            if Instant::now() >= deadline {
                if last_alive.elapsed() <= self.shared.timing.liveness_grace {
                    // Idle but alive: the turn becomes an automatic stand.
                    if active_t.send(&ServerLine::TimedOut).is_err() {
                        return Some(TurnEnd::Disconnect(active));
                    }
                    self.shared.lobbies.guard(self.index).seats[active].stood = true;
                    info!(
                        "lobby #{}: '{}' timed out; auto-stand",
                        self.index + 1,
                        names[active]
                    );
                    self.turn = other;
                    return None;
                }
                return Some(TurnEnd::Disconnect(active));
            }
            if last_alive.elapsed() > self.shared.timing.liveness_grace {
                return Some(TurnEnd::Disconnect(active));
            }
            if last_ping.elapsed() >= self.shared.timing.ping_interval {
                if active_t.send(&ServerLine::Ping).is_err() {
                    return Some(TurnEnd::Disconnect(active));
                }
                last_ping = Instant::now();
            }

            // Police the non-active transport without blocking on it.
            match other_t.probe() {
                Probe::Idle => {}
                Probe::Closed | Probe::Failed => return Some(TurnEnd::Disconnect(other)),
                Probe::Readable => match other_t.read_line_timeout(MAX_LINE, LOOP_READ_WAIT) {
                    ReadOutcome::TimedOut => {}
                    ReadOutcome::Eof | ReadOutcome::Failed => {
                        return Some(TurnEnd::Disconnect(other))
                    }
                    ReadOutcome::Line(line) => {
                        if is_ping(&line) {
                            if other_t.send(&ServerLine::Pong).is_err() {
                                return Some(TurnEnd::Disconnect(other));
                            }
                        } else if is_pong(&line) || is_yes(&line) {
                            // Stale waiting-phase echoes.
                        } else {
                            match classify_back(&line, &names[other]) {
                                BackRequest::Bare | BackRequest::Named { matches: true } => {
                                    info!(
                                        "lobby #{}: '{}' left mid-match",
                                        self.index + 1,
                                        names[other]
                                    );
                                    self.shared
                                        .registry
                                        .mark_back(&names[other], Some(other_t.id()));
                                    self.detach_seat(other);
                                }
                                _ => {
                                    warn!(
                                        "lobby #{}: out-of-turn input from '{}': {line:?}",
                                        self.index + 1,
                                        names[other]
                                    );
                                    self.detach_seat(other);
                                }
                            }
                            self.forced_winner = Some(active);
                            return Some(TurnEnd::Finished);
                        }
                    }
                },
            }

            // One active-player line with a short wait.
            let line = match active_t.read_line_timeout(MAX_LINE, LOOP_READ_WAIT) {
                ReadOutcome::TimedOut => continue,
                ReadOutcome::Eof | ReadOutcome::Failed => {
                    return Some(TurnEnd::Disconnect(active))
                }
                ReadOutcome::Line(line) => line,
            };
            last_alive = Instant::now();

            if is_ping(&line) {
                if active_t.send(&ServerLine::Pong).is_err() {
                    return Some(TurnEnd::Disconnect(active));
                }
                continue;
            }
            if is_pong(&line) || is_yes(&line) {
                continue;
            }
            match classify_back(&line, &names[active]) {
                BackRequest::Bare | BackRequest::Named { matches: true } => {
                    info!("lobby #{}: '{}' left mid-match", self.index + 1, names[active]);
                    self.shared
                        .registry
                        .mark_back(&names[active], Some(active_t.id()));
                    self.forced_winner = Some(other);
                    return Some(TurnEnd::Finished);
                }
                BackRequest::Named { matches: false } => {
                    self.detach_seat(active);
                    self.forced_winner = Some(other);
                    return Some(TurnEnd::Finished);
                }
                BackRequest::NotBack => {}
            }
            if is_hit(&line) {
                let (card, value, busted) = {
                    let mut lobby = self.shared.lobbies.guard(self.index);
                    let lobby = &mut *lobby;
                    let card = lobby.deck.draw(&mut self.rng);
                    let seat = &mut lobby.seats[active];
                    seat.hand.push(card);
                    let value = hand_value(&seat.hand);
                    let busted = value > BUST_LIMIT;
                    if busted {
                        seat.busted = true;
                    }
                    (card, value, busted)
                };
                if active_t.send(&ServerLine::CardDrawn { card }).is_err() {
                    return Some(TurnEnd::Disconnect(active));
                }
                if busted {
                    // Private: the opponent only learns the value from C45R.
                    let bust = ServerLine::Bust {
                        name: names[active].clone(),
                        value: value as i32,
                    };
                    if active_t.send(&bust).is_err() {
                        return Some(TurnEnd::Disconnect(active));
                    }
                    info!(
                        "lobby #{}: '{}' busted at {value}",
                        self.index + 1,
                        names[active]
                    );
                }
                // Hit or bust, the turn moves to the other player.
                self.turn = other;
                return None;
            }
            if is_stand(&line) {
                self.shared.lobbies.guard(self.index).seats[active].stood = true;
                self.turn = other;
                return None;
            }

            warn!(
                "lobby #{}: protocol violation from '{}': {line:?}",
                self.index + 1,
                names[active]
            );
            self.detach_seat(active);
            self.forced_winner = Some(other);
            return Some(TurnEnd::Finished);
        }
    }

    /// Hold the match while seat `down` is gone: keep the survivor alive,
    /// watch for a reattached transport, give up when the window expires.
    fn disconnect_wait(&mut self, down: usize) -> WaitEnd {
        self.close_seat(down);
        let survivor = 1 - down;
        let (names, survivor_t) = {
            let lobby = self.shared.lobbies.guard(self.index);
            (
                [lobby.seats[0].name.clone(), lobby.seats[1].name.clone()],
                lobby.seats[survivor].transport_clone(),
            )
        };
        let Some(survivor_t) = survivor_t else {
            info!(
                "lobby #{}: both transports lost; ending the match",
                self.index + 1
            );
            return WaitEnd::Finished;
        };

        let window = self.shared.timing.reconnect_window;
        warn!(
            "lobby #{}: '{}' disconnected mid-match; holding {}s for a reconnect",
            self.index + 1,
            names[down],
            window.as_secs()
        );
        let down_line = ServerLine::OpponentDown {
            name: names[down].clone(),
            seconds: window.as_secs(),
        };
        if survivor_t.send(&down_line).is_err() {
            self.close_seat(survivor);
            return WaitEnd::Finished;
        }

        let deadline = Instant::now() + window;
        let mut last_alive = Instant::now();
        let mut last_ping = Instant::now();
        loop {
            if Instant::now() >= deadline {
                info!(
                    "lobby #{}: reconnect window expired; '{}' wins by default",
                    self.index + 1,
                    names[survivor]
                );
                // The absentee forfeits: reported like a bust (value −1).
                self.shared.lobbies.guard(self.index).seats[down].busted = true;
                self.forced_winner = Some(survivor);
                return WaitEnd::Finished;
            }
            if last_alive.elapsed() > self.shared.timing.liveness_grace {
                // The survivor went quiet too; nobody is forced to win.
                self.close_seat(survivor);
                return WaitEnd::Finished;
            }
            if last_ping.elapsed() >= self.shared.timing.ping_interval {
                if survivor_t.send(&ServerLine::Ping).is_err() {
                    self.close_seat(survivor);
                    return WaitEnd::Finished;
                }
                last_ping = Instant::now();
            }

            // Did a reconnect handshake reattach the seat?
            let reattached = {
                self.shared.lobbies.guard(self.index).seats[down].transport_clone()
            };
            if let Some(returned) = reattached {
                if self.replay_hand(down, &returned).is_err() {
                    // Gone again already; keep waiting out the same window.
                    self.close_seat(down);
                    continue;
                }
                let back_line = ServerLine::OpponentBack {
                    name: names[down].clone(),
                };
                if survivor_t.send(&back_line).is_err() {
                    // The survivor vanished just as their opponent returned;
                    // the turn loop will notice and swap the roles.
                    self.close_seat(survivor);
                }
                info!(
                    "lobby #{}: '{}' reattached; resuming",
                    self.index + 1,
                    names[down]
                );
                return WaitEnd::Resumed;
            }

            match survivor_t.read_line_timeout(MAX_LINE, LOOP_READ_WAIT) {
                ReadOutcome::TimedOut => {}
                ReadOutcome::Eof | ReadOutcome::Failed => {
                    self.close_seat(survivor);
                    return WaitEnd::Finished;
                }
                ReadOutcome::Line(line) => {
                    last_alive = Instant::now();
                    if is_ping(&line) {
                        if survivor_t.send(&ServerLine::Pong).is_err() {
                            self.close_seat(survivor);
                            return WaitEnd::Finished;
                        }
                    } else if is_pong(&line) || is_yes(&line) {
                        // Keep-alive traffic.
                    } else if is_hit(&line) || is_stand(&line) {
                        // A click racing the opponent's drop; not punished.
                    } else {
                        match classify_back(&line, &names[survivor]) {
                            BackRequest::Bare | BackRequest::Named { matches: true } => {
                                info!(
                                    "lobby #{}: '{}' left during the pause; '{}' wins by forfeit",
                                    self.index + 1,
                                    names[survivor],
                                    names[down]
                                );
                                self.shared
                                    .registry
                                    .mark_back(&names[survivor], Some(survivor_t.id()));
                                self.forced_winner = Some(down);
                                return WaitEnd::Finished;
                            }
                            _ => {
                                warn!(
                                    "lobby #{}: violation from survivor '{}': {line:?}",
                                    self.index + 1,
                                    names[survivor]
                                );
                                self.detach_seat(survivor);
                                return WaitEnd::Finished;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Bring a reattached transport up to date: the original deal, then one
    /// `C45C` per card drawn since.
    fn replay_hand(&self, seat: usize, transport: &Transport) -> std::io::Result<()> {
        let hand = self.shared.lobbies.guard(self.index).seats[seat].hand.clone();
        if hand.len() >= 2 {
            transport.send(&ServerLine::Deal {
                first: hand[0],
                second: hand[1],
            })?;
            for card in &hand[2..] {
                transport.send(&ServerLine::CardDrawn { card: *card })?;
            }
        }
        Ok(())
    }

    /// Compute values, pick the winner, deliver `C45R` to whoever is still
    /// attached, and return the lobby to the waiting state. Identity records
    /// are left alone — the sessions own those.
    fn resolve(&mut self) {
        let (result, transports) = {
            let lobby = self.shared.lobbies.guard(self.index);
            let value =
                |s: &Seat| if s.busted { -1 } else { hand_value(&s.hand) as i32 };
            let (value_a, value_b) = (value(&lobby.seats[0]), value(&lobby.seats[1]));
            let winner = match self.forced_winner {
                Some(i) => lobby.seats[i].name.clone(),
                None if value_a > value_b => lobby.seats[0].name.clone(),
                None if value_b > value_a => lobby.seats[1].name.clone(),
                None => WINNER_PUSH.to_string(),
            };
            (
                ServerLine::MatchResult {
                    name_a: lobby.seats[0].name.clone(),
                    value_a,
                    name_b: lobby.seats[1].name.clone(),
                    value_b,
                    winner,
                },
                [
                    lobby.seats[0].transport_clone(),
                    lobby.seats[1].transport_clone(),
                ],
            )
        };
        for transport in transports.into_iter().flatten() {
            if let Err(err) = transport.send(&result) {
                debug!("lobby #{}: result delivery failed: {err}", self.index + 1);
            }
        }
        info!("lobby #{}: {result}", self.index + 1);

        let mut lobby = self.shared.lobbies.guard(self.index);
        lobby.running = false;
        for seat in &mut lobby.seats {
            seat.clear();
        }
        lobby.occupancy = 0;
    }

    /// Clear a seat's transport without closing the socket (violations and
    /// back requests — the session still owns the connection).
    fn detach_seat(&self, seat: usize) {
        self.shared.lobbies.guard(self.index).seats[seat].transport = None;
    }

    /// Close and clear a seat's transport (I/O failures).
    fn close_seat(&self, seat: usize) {
        if let Some(t) = self.shared.lobbies.guard(self.index).seats[seat].transport.take() {
            t.shutdown();
        }
    }
}

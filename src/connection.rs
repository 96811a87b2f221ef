//! C10: the connection state machine, spec §4.10.
//!
//! Grounded on `calimero-network`'s sans-I/O `handler/command/*.rs` split
//! (there, actix `Handler<Command>` implementations turn an inbound command
//! into a swarm effect; here, plain functions turn an inbound
//! `ConnectionEvent` into a list of `Command`s) and on `client-rs/src/
//! ws_client.rs` for the actual socket usage, which now lives in
//! `transport.rs`. Keeping `ConnectionMachine::on_event` free of `async`, a
//! transport, or a reactor means the six transitions in spec §4.10's table
//! are unit-testable without a live socket: `context.rs` is the only place
//! that turns a `Command` into a transport/reactor call.

use std::time::Duration;

use rand::Rng;

use crate::codec::{ControlMsg, Msg};

/// States named directly from spec §4.10's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Handshaking,
    Ready,
    Backoff,
    Closed,
}

/// Inbound occurrences the state machine reacts to. `FrameReceived` carries
/// an already-decoded `Msg` — decoding itself is `codec.rs`'s job, not this
/// module's.
#[derive(Debug)]
pub enum ConnectionEvent {
    Open,
    SocketUp,
    SocketError(String),
    FrameReceived(Msg),
    SocketClosed,
    KeepaliveTimerFired,
    BackoffTimerFired,
    UserClose,
}

/// Effects the state machine wants carried out. `context.rs` executes these
/// against the real `Transport`/`Reactor`; tests execute them against a
/// recording stub.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    OpenSocket,
    SendFrame(String),
    StartKeepaliveTimer,
    StartBackoffTimer(Duration),
    CancelTimers,
    CloseSocket,
    /// Re-send every tracked `on`/`watch` path as a fresh `listen` (spec
    /// §4.7's reconnect rebuild) and flush anything queued while
    /// disconnected.
    ReplayListensAndFlushQueue,
    FailAllPending(String),
    RecordServerOffset { server_time_ms: i64 },
    Reconnect { host: String },
}

/// Exponential backoff with a 1s base and 30s cap, full jitter (spec
/// §4.10): `uniform(0, min(cap, base * 2^attempt))`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << attempt.min(32));
        let ceiling = exp.min(self.cap.as_millis());
        let jittered = rng.gen_range(0..=ceiling.max(1));
        Duration::from_millis(jittered as u64)
    }
}

/// The default keepalive interval (spec §4.10: "45s is the design target",
/// safely under the server's 60s idle limit).
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(45);

/// Pure sans-I/O connection state machine (spec §4.10). Owns no socket, no
/// timer, no registries — it only tracks `state` and the backoff attempt
/// counter, and reports what the caller should do next as a `Vec<Command>`.
pub struct ConnectionMachine {
    state: ConnectionState,
    attempt: u32,
    backoff: BackoffPolicy,
}

impl ConnectionMachine {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Advances the machine for one event, returning the commands the
    /// caller must execute in order.
    pub fn on_event(&mut self, event: ConnectionEvent, rng: &mut impl Rng) -> Vec<Command> {
        use ConnectionState::*;

        if matches!(event, ConnectionEvent::UserClose) {
            self.state = Idle;
            return vec![
                Command::CancelTimers,
                Command::CloseSocket,
                Command::FailAllPending("context closed".into()),
            ];
        }

        match (self.state, event) {
            (Idle, ConnectionEvent::Open) => {
                self.state = Connecting;
                vec![Command::OpenSocket]
            }

            (Connecting, ConnectionEvent::SocketUp) => {
                self.state = Handshaking;
                vec![]
            }
            (Connecting, ConnectionEvent::SocketError(_)) => self.enter_backoff(rng),

            (Handshaking, ConnectionEvent::FrameReceived(Msg::Control(ControlMsg::Handshake {
                server_time_ms,
                ..
            }))) => {
                self.state = Ready;
                self.attempt = 0;
                vec![
                    Command::RecordServerOffset { server_time_ms },
                    Command::ReplayListensAndFlushQueue,
                    Command::StartKeepaliveTimer,
                ]
            }
            (Handshaking, ConnectionEvent::FrameReceived(Msg::Control(ControlMsg::Redirect { host }))) => {
                self.state = Connecting;
                vec![Command::CloseSocket, Command::Reconnect { host }]
            }
            (Handshaking, ConnectionEvent::SocketError(_) | ConnectionEvent::SocketClosed) => {
                self.enter_backoff(rng)
            }

            (Ready, ConnectionEvent::KeepaliveTimerFired) => {
                vec![
                    Command::SendFrame(ping_frame()),
                    Command::StartKeepaliveTimer,
                ]
            }
            (Ready, ConnectionEvent::FrameReceived(Msg::Control(ControlMsg::Shutdown { .. })))
            | (Ready, ConnectionEvent::SocketClosed)
            | (Ready, ConnectionEvent::SocketError(_)) => {
                let mut cmds = vec![
                    Command::CancelTimers,
                    Command::FailAllPending("connection lost".into()),
                ];
                cmds.extend(self.enter_backoff(rng));
                cmds
            }

            (Backoff, ConnectionEvent::BackoffTimerFired) => {
                self.attempt += 1;
                self.state = Connecting;
                vec![Command::OpenSocket]
            }

            // Any other (state, event) pair is a no-op: e.g. a stray frame
            // arriving after the socket already closed. Spec §7: "silently
            // drops any subsequent inbound frame" once the context is
            // tearing down.
            _ => vec![],
        }
    }

    fn enter_backoff(&mut self, rng: &mut impl Rng) -> Vec<Command> {
        self.state = ConnectionState::Backoff;
        let delay = self.backoff.delay(self.attempt, rng);
        vec![Command::StartBackoffTimer(delay)]
    }
}

fn ping_frame() -> String {
    crate::codec::encode(&Msg::Request {
        r: 0,
        action: crate::codec::Action::Ping,
        path: crate::path::Path::root(),
        data: None,
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn rng() -> StepRng {
        StepRng::new(0, 1)
    }

    #[test]
    fn idle_open_moves_to_connecting_and_opens_socket() {
        let mut m = ConnectionMachine::new(BackoffPolicy::default());
        let cmds = m.on_event(ConnectionEvent::Open, &mut rng());
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(cmds, vec![Command::OpenSocket]);
    }

    #[test]
    fn handshake_moves_to_ready_and_replays_listens() {
        let mut m = ConnectionMachine::new(BackoffPolicy::default());
        m.on_event(ConnectionEvent::Open, &mut rng());
        m.on_event(ConnectionEvent::SocketUp, &mut rng());
        let cmds = m.on_event(
            ConnectionEvent::FrameReceived(Msg::Control(ControlMsg::Handshake {
                server_time_ms: 1_700_000_000_000,
                host: "h".into(),
                session: "s".into(),
            })),
            &mut rng(),
        );
        assert_eq!(m.state(), ConnectionState::Ready);
        assert!(cmds.contains(&Command::ReplayListensAndFlushQueue));
        assert!(cmds.contains(&Command::StartKeepaliveTimer));
    }

    #[test]
    fn socket_error_while_connecting_enters_backoff() {
        let mut m = ConnectionMachine::new(BackoffPolicy::default());
        m.on_event(ConnectionEvent::Open, &mut rng());
        let cmds = m.on_event(ConnectionEvent::SocketError("dns".into()), &mut rng());
        assert_eq!(m.state(), ConnectionState::Backoff);
        assert!(matches!(cmds.as_slice(), [Command::StartBackoffTimer(_)]));
    }

    #[test]
    fn backoff_timer_increments_attempt_and_reconnects() {
        let mut m = ConnectionMachine::new(BackoffPolicy::default());
        m.on_event(ConnectionEvent::Open, &mut rng());
        m.on_event(ConnectionEvent::SocketError("x".into()), &mut rng());
        assert_eq!(m.attempt(), 0);
        let cmds = m.on_event(ConnectionEvent::BackoffTimerFired, &mut rng());
        assert_eq!(m.attempt(), 1);
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(cmds, vec![Command::OpenSocket]);
    }

    #[test]
    fn successful_handshake_resets_the_backoff_attempt_counter() {
        let mut m = ConnectionMachine::new(BackoffPolicy::default());
        m.on_event(ConnectionEvent::Open, &mut rng());
        m.on_event(ConnectionEvent::SocketError("x".into()), &mut rng());
        m.on_event(ConnectionEvent::BackoffTimerFired, &mut rng());
        m.on_event(ConnectionEvent::SocketUp, &mut rng());
        m.on_event(
            ConnectionEvent::FrameReceived(Msg::Control(ControlMsg::Handshake {
                server_time_ms: 0,
                host: "h".into(),
                session: "s".into(),
            })),
            &mut rng(),
        );
        assert_eq!(m.attempt(), 0);
    }

    #[test]
    fn ready_socket_close_fails_pending_and_backs_off() {
        let mut m = ConnectionMachine::new(BackoffPolicy::default());
        m.on_event(ConnectionEvent::Open, &mut rng());
        m.on_event(ConnectionEvent::SocketUp, &mut rng());
        m.on_event(
            ConnectionEvent::FrameReceived(Msg::Control(ControlMsg::Handshake {
                server_time_ms: 0,
                host: "h".into(),
                session: "s".into(),
            })),
            &mut rng(),
        );
        let cmds = m.on_event(ConnectionEvent::SocketClosed, &mut rng());
        assert_eq!(m.state(), ConnectionState::Backoff);
        assert!(cmds.iter().any(|c| matches!(c, Command::FailAllPending(_))));
        assert!(cmds.iter().any(|c| matches!(c, Command::StartBackoffTimer(_))));
    }

    #[test]
    fn user_close_from_any_state_goes_idle_and_fails_pending() {
        let mut m = ConnectionMachine::new(BackoffPolicy::default());
        m.on_event(ConnectionEvent::Open, &mut rng());
        let cmds = m.on_event(ConnectionEvent::UserClose, &mut rng());
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(cmds.contains(&Command::CloseSocket));
        assert!(cmds
            .iter()
            .any(|c| matches!(c, Command::FailAllPending(_))));
    }

    #[test]
    fn backoff_delay_never_exceeds_the_cap() {
        let policy = BackoffPolicy::default();
        let mut rng = rand::thread_rng();
        for attempt in 0..10 {
            let d = policy.delay(attempt, &mut rng);
            assert!(d <= policy.cap);
        }
    }
}

//! Small reactor abstraction the connection state machine drives timers
//! through, per spec §9's redesign flag: "the source hard-codes integrations
//! (libev, libuv, libevent)... model this as a small reactor interface that
//! the context consumes; implementations plug in without changing the core."
//!
//! There is no `watch_fd`/`unwatch_fd` here — this crate's default transport
//! (`transport.rs`) is built on `tokio-tungstenite`, which already multiplexes
//! socket readiness through the Tokio runtime, so the only reactor surface the
//! core still needs is timers (keepalive, backoff).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A single outstanding timer. Dropping it cancels the timer, the same way
/// `ev_timer_stop` or `uv_timer_stop` would.
pub trait TimerHandle: Send {
    /// Waits for the timer to fire. Consumes the handle: a fired or dropped
    /// timer cannot be re-armed, matching spec §4.10 where each timer use
    /// (keepalive tick, backoff wait) schedules a fresh one.
    fn wait(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// The timer half of the event-loop integration spec §9 asks to be
/// injectable. `Context` holds one `Box<dyn Reactor>` and never calls
/// `tokio::time` directly, so an embedder could swap in a libuv- or
/// libevent-backed reactor without touching `connection.rs`.
pub trait Reactor: Send {
    fn set_timer(&self, after: Duration) -> Box<dyn TimerHandle>;
}

/// Default reactor, backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioReactor;

struct TokioTimer {
    sleep: Pin<Box<tokio::time::Sleep>>,
}

impl TimerHandle for TokioTimer {
    fn wait(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            self.sleep.await;
        })
    }
}

impl Reactor for TokioReactor {
    fn set_timer(&self, after: Duration) -> Box<dyn TimerHandle> {
        Box::new(TokioTimer {
            sleep: Box::pin(tokio::time::sleep(after)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokio_reactor_timer_resolves() {
        let reactor = TokioReactor;
        let timer = reactor.set_timer(Duration::from_millis(1));
        timer.wait().await;
    }
}

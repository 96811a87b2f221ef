//! C7: server-side listen subscriptions, refcounted per path.
//!
//! Grounded on `calimero-network`'s `handler/command/subscribe.rs` and
//! `unsubscribe.rs` — refcounted subscribe/unsubscribe commands emitted
//! toward a lower transport layer, generalized here from gossipsub topics to
//! Webcom paths.

use std::collections::HashMap;

use crate::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenStatus {
    Pending,
    Active,
}

struct Entry {
    refcount: u32,
    status: ListenStatus,
}

/// A command the registry wants the connection layer to send. Kept separate
/// from the registry's own state so tests can assert on emitted commands
/// without a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenCommand {
    SendListen(Path),
    SendUnlisten(Path),
}

#[derive(Default)]
pub struct ListenRegistry {
    entries: HashMap<Path, Entry>,
}

impl ListenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `path`. Returns a `SendListen` command the
    /// first time interest in `path` goes from zero to one; later calls only
    /// bump the refcount.
    pub fn watch(&mut self, path: &Path) -> Option<ListenCommand> {
        match self.entries.get_mut(path) {
            Some(entry) => {
                entry.refcount += 1;
                None
            }
            None => {
                self.entries.insert(
                    path.clone(),
                    Entry {
                        refcount: 1,
                        status: ListenStatus::Pending,
                    },
                );
                Some(ListenCommand::SendListen(path.clone()))
            }
        }
    }

    /// Decrements `path`'s refcount by `n`. Returns a `SendUnlisten` command
    /// once the refcount reaches zero, and removes the entry.
    pub fn unwatch(&mut self, path: &Path, n: u32) -> Option<ListenCommand> {
        let remove = {
            let entry = self.entries.get_mut(path)?;
            entry.refcount = entry.refcount.saturating_sub(n);
            entry.refcount == 0
        };
        if remove {
            self.entries.remove(path);
            Some(ListenCommand::SendUnlisten(path.clone()))
        } else {
            None
        }
    }

    /// Transitions a pending entry to active on the matching listen
    /// response. No-op if the path isn't tracked (e.g. raced with an
    /// unwatch) or already active.
    pub fn mark_active(&mut self, path: &Path) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.status = ListenStatus::Active;
        }
    }

    pub fn status(&self, path: &Path) -> Option<ListenStatus> {
        self.entries.get(path).map(|e| e.status)
    }

    pub fn refcount(&self, path: &Path) -> u32 {
        self.entries.get(path).map_or(0, |e| e.refcount)
    }

    /// Rebuilds every tracked entry as a fresh listen request on reconnect,
    /// preserving refcounts, and marks everything pending again until the
    /// new handshake's responses come back.
    pub fn rebuild_on_reconnect(&mut self) -> Vec<ListenCommand> {
        let mut commands = Vec::with_capacity(self.entries.len());
        for (path, entry) in &mut self.entries {
            entry.status = ListenStatus::Pending;
            commands.push(ListenCommand::SendListen(path.clone()));
        }
        commands
    }
}

use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::IndexSet;

/// Which of the two presence sets an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Roster {
    Online,
    Typing,
}

#[derive(Default)]
struct Rosters {
    online: IndexSet<String>,
    typing: IndexSet<String>,
}

impl Rosters {
    fn get_mut(&mut self, roster: Roster) -> &mut IndexSet<String> {
        match roster {
            Roster::Online => &mut self.online,
            Roster::Typing => &mut self.typing,
        }
    }
}

/// Display names currently online and currently typing, in first-inserted order.
///
/// Keyed by name, not by connection: two connections sharing a name share one entry.
#[derive(Default)]
pub struct Presence {
    rosters: Mutex<Rosters>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `name` to the online set. When the set changes, `on_change`
    /// receives the new snapshot while the lock is still held, so snapshots
    /// handed out by concurrent callers are observed in mutation order.
    pub fn join(&self, name: &str, on_change: impl FnOnce(Vec<String>)) -> bool {
        self.insert(Roster::Online, name, on_change)
    }

    pub fn leave(&self, name: &str, on_change: impl FnOnce(Vec<String>)) -> bool {
        self.remove(Roster::Online, name, on_change)
    }

    pub fn start_typing(&self, name: &str, on_change: impl FnOnce(Vec<String>)) -> bool {
        self.insert(Roster::Typing, name, on_change)
    }

    pub fn stop_typing(&self, name: &str, on_change: impl FnOnce(Vec<String>)) -> bool {
        self.remove(Roster::Typing, name, on_change)
    }

    pub fn snapshot_online(&self) -> Vec<String> {
        self.snapshot(Roster::Online)
    }

    pub fn snapshot_typing(&self) -> Vec<String> {
        self.snapshot(Roster::Typing)
    }

    fn snapshot(&self, roster: Roster) -> Vec<String> {
        self.lock().get_mut(roster).iter().cloned().collect()
    }

    fn insert(&self, roster: Roster, name: &str, on_change: impl FnOnce(Vec<String>)) -> bool {
        let mut rosters = self.lock();
        let set = rosters.get_mut(roster);
        let changed = set.insert(name.to_owned());
        if changed {
            on_change(set.iter().cloned().collect());
        }
        changed
    }

    /// Removal keeps the order of the remaining names.
    fn remove(&self, roster: Roster, name: &str, on_change: impl FnOnce(Vec<String>)) -> bool {
        let mut rosters = self.lock();
        let set = rosters.get_mut(roster);
        let changed = set.shift_remove(name);
        if changed {
            on_change(set.iter().cloned().collect());
        }
        changed
    }

    fn lock(&self) -> MutexGuard<'_, Rosters> {
        // Every mutation is a single set operation, so a poisoned guard still holds consistent sets.
        self.rosters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Session membership table.
//!
//! Each session has at most one controller and any number of observers.
//! The forward maps (`session -> handle(s)`) are the source of truth; the
//! reverse maps (`handle -> sessions`) are kept in step with every mutation
//! so that a purge only touches the sessions the handle actually belongs to.
//! Session and observer totals are maintained the same way, so no operation
//! walks the whole table.

use crate::connection::ConnectionHandle;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tandem_protocol::SessionId;
use tracing::debug;

/// Sessions a purged handle was bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Sessions the handle was the controller of.
    pub controlled: Vec<SessionId>,
    /// Sessions the handle was observing.
    pub observed: Vec<SessionId>,
}

impl PurgeReport {
    /// Whether the handle had no bindings at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.controlled.is_empty() && self.observed.is_empty()
    }
}

/// The membership table.
#[derive(Debug, Default)]
pub struct Registry {
    /// Controller bindings.
    controllers: HashMap<SessionId, ConnectionHandle>,
    /// Observer bindings. Never holds an empty set.
    observers: HashMap<SessionId, HashSet<ConnectionHandle>>,
    /// Reverse index of `controllers`.
    controlling: HashMap<ConnectionHandle, HashSet<SessionId>>,
    /// Reverse index of `observers`.
    observing: HashMap<ConnectionHandle, HashSet<SessionId>>,
    /// Sessions with a controller or at least one observer.
    session_count: usize,
    /// Observer bindings across all sessions.
    observer_count: usize,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` as the controller of `session`.
    ///
    /// Returns the previous controller if one was replaced. The previous
    /// connection is left untouched.
    pub fn set_controller(
        &mut self,
        session: &str,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        if !self.is_bound(session) {
            self.session_count += 1;
        }
        let previous = self.controllers.insert(session.to_string(), handle);

        if let Some(old) = previous.filter(|old| *old != handle) {
            unindex(&mut self.controlling, old, session);
            debug!(session = %session, previous = %old, connection = %handle, "Controller replaced");
        }
        self.controlling
            .entry(handle)
            .or_default()
            .insert(session.to_string());

        previous
    }

    /// Add `handle` to the observers of `session`.
    ///
    /// Returns `true` if it was not already observing.
    pub fn add_observer(&mut self, session: &str, handle: ConnectionHandle) -> bool {
        let was_bound = self.is_bound(session);
        let added = self
            .observers
            .entry(session.to_string())
            .or_default()
            .insert(handle);

        if added {
            self.observer_count += 1;
            if !was_bound {
                self.session_count += 1;
            }
            self.observing
                .entry(handle)
                .or_default()
                .insert(session.to_string());
        }
        added
    }

    /// The controller bound to `session`, if any.
    #[must_use]
    pub fn controller(&self, session: &str) -> Option<ConnectionHandle> {
        self.controllers.get(session).copied()
    }

    /// The observers bound to `session`. Unknown sessions yield nothing.
    pub fn observers(&self, session: &str) -> impl Iterator<Item = ConnectionHandle> + '_ {
        self.observers
            .get(session)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Number of observers bound to `session`.
    #[must_use]
    pub fn observer_count(&self, session: &str) -> usize {
        self.observers.get(session).map_or(0, HashSet::len)
    }

    /// Remove every binding that references `handle`.
    ///
    /// Sessions left without observers are dropped from the observer map.
    /// Purging a handle with no bindings is a no-op.
    pub fn purge(&mut self, handle: ConnectionHandle) -> PurgeReport {
        let mut report = PurgeReport::default();

        for session in self.controlling.remove(&handle).unwrap_or_default() {
            if self.controllers.get(&session) != Some(&handle) {
                continue;
            }
            self.controllers.remove(&session);
            if !self.observers.contains_key(&session) {
                self.session_count -= 1;
            }
            report.controlled.push(session);
        }

        for session in self.observing.remove(&handle).unwrap_or_default() {
            let Some(set) = self.observers.get_mut(&session) else {
                continue;
            };
            if !set.remove(&handle) {
                continue;
            }
            self.observer_count -= 1;
            if set.is_empty() {
                self.observers.remove(&session);
                if !self.controllers.contains_key(&session) {
                    self.session_count -= 1;
                }
            }
            report.observed.push(session);
        }

        if !report.is_empty() {
            debug!(
                connection = %handle,
                controlled = report.controlled.len(),
                observed = report.observed.len(),
                "Purged bindings"
            );
        }
        report
    }

    /// Number of sessions with a controller or at least one observer.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.session_count
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            session_count: self.session_count,
            controller_count: self.controllers.len(),
            observer_count: self.observer_count,
        }
    }

    fn is_bound(&self, session: &str) -> bool {
        self.controllers.contains_key(session) || self.observers.contains_key(session)
    }
}

fn unindex(
    index: &mut HashMap<ConnectionHandle, HashSet<SessionId>>,
    handle: ConnectionHandle,
    session: &str,
) {
    if let Entry::Occupied(mut entry) = index.entry(handle) {
        entry.get_mut().remove(session);
        if entry.get().is_empty() {
            entry.remove();
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Sessions with a controller or at least one observer.
    pub session_count: usize,
    /// Number of controller bindings.
    pub controller_count: usize,
    /// Number of observer bindings across all sessions.
    pub observer_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(raw: u64) -> ConnectionHandle {
        ConnectionHandle::new(raw)
    }

    fn sorted(iter: impl Iterator<Item = ConnectionHandle>) -> Vec<ConnectionHandle> {
        let mut v: Vec<_> = iter.collect();
        v.sort();
        v
    }

    #[test]
    fn test_unknown_session_is_empty() {
        let registry = Registry::new();
        assert_eq!(registry.controller("nope"), None);
        assert_eq!(registry.observers("nope").count(), 0);
        assert_eq!(registry.observer_count("nope"), 0);
    }

    #[test]
    fn test_set_controller_overwrites() {
        let mut registry = Registry::new();

        assert_eq!(registry.set_controller("A", h(1)), None);
        assert_eq!(registry.set_controller("A", h(3)), Some(h(1)));
        assert_eq!(registry.controller("A"), Some(h(3)));

        // The replaced controller has nothing left to purge.
        assert!(registry.purge(h(1)).is_empty());
        assert_eq!(registry.controller("A"), Some(h(3)));
    }

    #[test]
    fn test_add_observer_is_idempotent() {
        let mut registry = Registry::new();

        assert!(registry.add_observer("A", h(2)));
        assert!(!registry.add_observer("A", h(2)));
        assert!(registry.add_observer("A", h(3)));

        assert_eq!(sorted(registry.observers("A")), vec![h(2), h(3)]);
        assert_eq!(registry.stats().observer_count, 2);
    }

    #[test]
    fn test_purge_removes_every_binding() {
        let mut registry = Registry::new();
        registry.set_controller("A", h(1));
        registry.set_controller("B", h(1));
        registry.add_observer("C", h(1));
        registry.add_observer("C", h(2));
        registry.add_observer("D", h(1));

        let mut report = registry.purge(h(1));
        report.controlled.sort();
        report.observed.sort();

        assert_eq!(report.controlled, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(report.observed, vec!["C".to_string(), "D".to_string()]);
        assert_eq!(registry.controller("A"), None);
        assert_eq!(registry.controller("B"), None);
        assert_eq!(sorted(registry.observers("C")), vec![h(2)]);
        assert_eq!(registry.observers("D").count(), 0);

        // "D" had only h1 and is gone entirely.
        let stats = registry.stats();
        assert_eq!(stats.session_count, 1);
        assert_eq!(stats.controller_count, 0);
        assert_eq!(stats.observer_count, 1);
    }

    #[test]
    fn test_purge_is_idempotent() {
        let mut registry = Registry::new();
        registry.set_controller("A", h(1));
        registry.add_observer("A", h(1));

        assert!(!registry.purge(h(1)).is_empty());
        assert!(registry.purge(h(1)).is_empty());
        assert!(registry.purge(h(99)).is_empty());
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn test_purge_leaves_other_sessions_alone() {
        let mut registry = Registry::new();
        registry.set_controller("A", h(1));
        registry.add_observer("A", h(2));
        registry.set_controller("B", h(3));
        registry.add_observer("B", h(4));

        registry.purge(h(2));

        assert_eq!(registry.controller("A"), Some(h(1)));
        assert_eq!(registry.controller("B"), Some(h(3)));
        assert_eq!(sorted(registry.observers("B")), vec![h(4)]);
    }

    #[test]
    fn test_same_handle_both_roles() {
        let mut registry = Registry::new();
        registry.set_controller("A", h(1));
        registry.add_observer("A", h(1));

        assert_eq!(registry.controller("A"), Some(h(1)));
        assert_eq!(sorted(registry.observers("A")), vec![h(1)]);

        let report = registry.purge(h(1));
        assert_eq!(report.controlled, vec!["A".to_string()]);
        assert_eq!(report.observed, vec!["A".to_string()]);
    }

    #[test]
    fn test_reregistering_same_controller_keeps_binding() {
        let mut registry = Registry::new();
        registry.set_controller("A", h(1));
        assert_eq!(registry.set_controller("A", h(1)), Some(h(1)));

        let report = registry.purge(h(1));
        assert_eq!(report.controlled, vec!["A".to_string()]);
        assert_eq!(registry.controller("A"), None);
    }

    /// Totals recomputed from the maps.
    fn recount(registry: &Registry) -> RegistryStats {
        let sessions: HashSet<&SessionId> = registry
            .controllers
            .keys()
            .chain(registry.observers.keys())
            .collect();
        RegistryStats {
            session_count: sessions.len(),
            controller_count: registry.controllers.len(),
            observer_count: registry.observers.values().map(HashSet::len).sum(),
        }
    }

    #[test]
    fn test_running_totals_match_tables() {
        let mut registry = Registry::new();
        let steps: &[(&str, &str, u64)] = &[
            ("ctrl", "A", 1),
            ("obs", "A", 1),
            ("obs", "A", 2),
            ("obs", "A", 2),
            ("ctrl", "A", 3),
            ("obs", "B", 3),
            ("ctrl", "C", 2),
            ("purge", "", 1),
            ("ctrl", "A", 1),
            ("purge", "", 3),
            ("obs", "C", 4),
            ("purge", "", 2),
            ("purge", "", 2),
            ("purge", "", 4),
            ("purge", "", 1),
        ];

        for &(op, session, raw) in steps {
            match op {
                "ctrl" => {
                    registry.set_controller(session, h(raw));
                }
                "obs" => {
                    registry.add_observer(session, h(raw));
                }
                _ => {
                    registry.purge(h(raw));
                }
            }
            assert_eq!(registry.stats(), recount(&registry), "after {op} {session} {raw}");
        }
        assert_eq!(registry.stats(), RegistryStats::default());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_stats_counts_sessions_once() {
        let mut registry = Registry::new();
        registry.set_controller("A", h(1));
        registry.add_observer("A", h(2));
        registry.add_observer("B", h(2));

        let stats = registry.stats();
        assert_eq!(stats.session_count, 2);
        assert_eq!(stats.controller_count, 1);
        assert_eq!(stats.observer_count, 2);
    }
}

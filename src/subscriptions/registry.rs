/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The set of registered subscribers.
//!
//! The registry is owned by the [consensus set](crate::consensus::ConsensusSet) and only ever touched
//! while holding the consensus set's lock, so registering a subscriber can never interleave with the
//! commit of a change. The registry is keyed by [`SubscriberID`], so a subscriber can be removed without
//! disturbing the others.
//!
//! The notifier never reads the registry itself. Instead, when a change is committed, the consensus set
//! takes a [`Subscribers`] snapshot under the lock and hands it to the notifier together with the change.
//! A subscriber registered after the snapshot is taken never sees that change.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use super::delivery::{ConsensusChangeReceiver, FullSubscriber, PokeReceiver, PokeSubscriber};

/// Identifies a subscription. Unique within one consensus set, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberID(u64);

impl SubscriberID {
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for SubscriberID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriberKind {
    /// Receives every [`ConsensusChange`](crate::types::diffs::ConsensusChange).
    Full,
    /// Receives a coalescing "something changed" token.
    Poke,
}

pub(crate) struct SubscriberRegistry {
    next_id: u64,
    backlog: usize,
    full: BTreeMap<SubscriberID, Arc<FullSubscriber>>,
    pokes: BTreeMap<SubscriberID, Arc<PokeSubscriber>>,
}

/// The subscribers registered at the moment a change was committed.
pub(crate) struct Subscribers {
    pub(crate) full: Vec<Arc<FullSubscriber>>,
    pub(crate) pokes: Vec<Arc<PokeSubscriber>>,
}

impl SubscriberRegistry {
    /// Create an empty registry whose full-diff subscribers each get a queue of `backlog` changes. A
    /// backlog of 0 is treated as 1.
    pub(crate) fn new(backlog: usize) -> SubscriberRegistry {
        SubscriberRegistry {
            next_id: 0,
            backlog: backlog.max(1),
            full: BTreeMap::new(),
            pokes: BTreeMap::new(),
        }
    }

    pub(crate) fn subscribe(&mut self) -> ConsensusChangeReceiver {
        let id = self.next_id();
        let (subscriber, receiver) = FullSubscriber::start(id, self.backlog);
        self.full.insert(id, subscriber);
        receiver
    }

    pub(crate) fn subscribe_poke(&mut self) -> PokeReceiver {
        let id = self.next_id();
        let (subscriber, receiver) = PokeSubscriber::new(id);
        self.pokes.insert(id, subscriber);
        receiver
    }

    /// Revoke and remove the subscriber identified by `id`. Returns its kind, or `None` if no such
    /// subscriber is registered or its revocation was already reported.
    pub(crate) fn unsubscribe(&mut self, id: &SubscriberID) -> Option<SubscriberKind> {
        let (first_to_report, kind) = if let Some(subscriber) = self.full.remove(id) {
            (subscriber.revoke(), SubscriberKind::Full)
        } else if let Some(subscriber) = self.pokes.remove(id) {
            (subscriber.revoke(), SubscriberKind::Poke)
        } else {
            return None;
        };
        first_to_report.then_some(kind)
    }

    /// Drop revoked subscribers. Returns those whose revocation nobody has reported yet, which the caller
    /// must report.
    pub(crate) fn prune_revoked(&mut self) -> Vec<(SubscriberID, SubscriberKind)> {
        let mut unreported = Vec::new();
        self.full.retain(|id, subscriber| {
            if !subscriber.is_revoked() {
                return true;
            }
            if subscriber.revoke() {
                unreported.push((*id, SubscriberKind::Full));
            }
            false
        });
        self.pokes.retain(|id, subscriber| {
            if !subscriber.is_revoked() {
                return true;
            }
            if subscriber.revoke() {
                unreported.push((*id, SubscriberKind::Poke));
            }
            false
        });
        unreported
    }

    /// The live subscribers, in registration order.
    pub(crate) fn snapshot(&self) -> Subscribers {
        Subscribers {
            full: self.full.values().cloned().collect(),
            pokes: self.pokes.values().cloned().collect(),
        }
    }

    pub(crate) fn full_count(&self) -> usize {
        self.full.len()
    }

    pub(crate) fn poke_count(&self) -> usize {
        self.pokes.len()
    }

    fn next_id(&mut self) -> SubscriberID {
        let id = SubscriberID(self.next_id);
        self.next_id += 1;
        id
    }
}

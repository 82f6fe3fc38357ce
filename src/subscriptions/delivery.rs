/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! How changes reach individual subscribers.
//!
//! ## Full-diff subscribers
//!
//! Every full-diff subscriber gets its own delivery worker thread. The notifier never sends to the
//! subscriber directly: it pushes each change into a bounded queue with a non-blocking `try_send`, and the
//! worker pops changes from that queue in order and hands each to the subscriber with a blocking send on a
//! zero-capacity channel. So:
//! - Each subscriber sees changes in exactly the order they were produced.
//! - A slow subscriber only ever blocks its own worker.
//! - A subscriber that falls more than `backlog` changes behind has its queue overflow. The notifier then
//!   revokes it: its queue is closed, the worker stops after its current send, and the subscriber sees
//!   [`SubscriptionClosed`] once it has drained what was already handed over.
//!
//! A subscriber that drops its [`ConsensusChangeReceiver`] is revoked the next time its worker tries to
//! deliver to it. The worker cannot report this, so the revocation is reported by whichever notices it
//! next: the notifier, or the consensus set pruning its registry.
//!
//! Whatever the path, every revocation is reported exactly once.
//!
//! ## Poke subscribers
//!
//! Poke subscribers own a channel with capacity for one token. The notifier `try_send`s a token after
//! every change. If a token is already pending, the send is skipped, so many changes collapse into a
//! single wake-up. Poking never blocks.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::types::diffs::ConsensusChange;

use super::registry::{SubscriberID, SubscriberKind};

const LIVE: u8 = 0;
const REVOKED: u8 = 1;
const REPORTED: u8 = 2;

/// Whether a subscriber was revoked, and whether its revocation has been reported.
struct Revocation(AtomicU8);

impl Revocation {
    fn new() -> Revocation {
        Revocation(AtomicU8::new(LIVE))
    }

    fn is_revoked(&self) -> bool {
        self.0.load(Ordering::Acquire) != LIVE
    }

    // Never downgrades a reported revocation.
    fn mark(&self) {
        let _ = self.0.compare_exchange(LIVE, REVOKED, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Returns `true` to exactly one caller, which must report the revocation.
    fn report(&self) -> bool {
        self.0.swap(REPORTED, Ordering::AcqRel) != REPORTED
    }
}

/// The notifier's handle on a full-diff subscriber.
pub(crate) struct FullSubscriber {
    id: SubscriberID,
    queue: Mutex<Option<SyncSender<Arc<ConsensusChange>>>>,
    revocation: Arc<Revocation>,
}

/// What happened when the notifier tried to hand a change to a subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    /// The change was queued for a full-diff subscriber, or a poke token was sent.
    Delivered,
    /// A poke token was already pending, so this one was skipped.
    Coalesced,
    /// The subscriber is revoked, and this attempt is the first to notice.
    Revoked,
    /// The subscriber's revocation was already reported. Nothing was sent.
    AlreadyRevoked,
}

impl FullSubscriber {
    /// Create a full-diff subscriber with a queue of `backlog` changes and start its delivery worker.
    pub(crate) fn start(id: SubscriberID, backlog: usize) -> (Arc<FullSubscriber>, ConsensusChangeReceiver) {
        let (queue_sender, queue_receiver) = mpsc::sync_channel(backlog);
        let (delivery_sender, delivery_receiver) = mpsc::sync_channel(0);
        let revocation = Arc::new(Revocation::new());

        start_delivery_worker(id, queue_receiver, delivery_sender, revocation.clone());

        let subscriber = Arc::new(FullSubscriber {
            id,
            queue: Mutex::new(Some(queue_sender)),
            revocation,
        });
        let receiver = ConsensusChangeReceiver {
            id,
            receiver: delivery_receiver,
        };
        (subscriber, receiver)
    }

    pub(crate) fn id(&self) -> SubscriberID {
        self.id
    }

    pub(crate) fn is_revoked(&self) -> bool {
        self.revocation.is_revoked()
    }

    /// Queue `change` for delivery without blocking. Revokes the subscriber if its queue is full or its
    /// worker has stopped.
    pub(crate) fn enqueue(&self, change: &Arc<ConsensusChange>) -> DeliveryOutcome {
        if self.is_revoked() {
            return revoked_outcome(self.revoke());
        }

        let result = match self.queue.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(sender) => sender.try_send(change.clone()),
            None => return DeliveryOutcome::AlreadyRevoked,
        };

        match result {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => revoked_outcome(self.revoke()),
        }
    }

    /// Close this subscriber's queue. The worker stops once its in-flight send (if any) completes.
    ///
    /// Returns `true` if the caller is the first to report the revocation.
    pub(crate) fn revoke(&self) -> bool {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.revocation.report()
    }
}

fn revoked_outcome(first_to_report: bool) -> DeliveryOutcome {
    if first_to_report {
        DeliveryOutcome::Revoked
    } else {
        DeliveryOutcome::AlreadyRevoked
    }
}

fn start_delivery_worker(
    id: SubscriberID,
    queue: Receiver<Arc<ConsensusChange>>,
    delivery: SyncSender<Arc<ConsensusChange>>,
    revocation: Arc<Revocation>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        // Exits when the queue is closed by `revoke`, or when the subscriber drops its receiver.
        while let Ok(change) = queue.recv() {
            if revocation.is_revoked() {
                return;
            }
            if delivery.send(change).is_err() {
                log::debug!("Subscriber {} dropped its receiver", id);
                revocation.mark();
                return;
            }
        }
    })
}

/// The notifier's handle on a poke subscriber.
pub(crate) struct PokeSubscriber {
    id: SubscriberID,
    sender: SyncSender<()>,
    revocation: Revocation,
}

impl PokeSubscriber {
    pub(crate) fn new(id: SubscriberID) -> (Arc<PokeSubscriber>, PokeReceiver) {
        let (sender, receiver) = mpsc::sync_channel(1);
        let subscriber = Arc::new(PokeSubscriber {
            id,
            sender,
            revocation: Revocation::new(),
        });
        (subscriber, PokeReceiver { id, receiver })
    }

    pub(crate) fn id(&self) -> SubscriberID {
        self.id
    }

    pub(crate) fn is_revoked(&self) -> bool {
        self.revocation.is_revoked()
    }

    /// Returns `true` if the caller is the first to report the revocation.
    pub(crate) fn revoke(&self) -> bool {
        self.revocation.report()
    }

    /// Send a token without blocking.
    pub(crate) fn poke(&self) -> DeliveryOutcome {
        if self.is_revoked() {
            return DeliveryOutcome::AlreadyRevoked;
        }

        match self.sender.try_send(()) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Full(())) => DeliveryOutcome::Coalesced,
            Err(TrySendError::Disconnected(())) => revoked_outcome(self.revoke()),
        }
    }
}

/// The receiving end of a full-diff subscription, returned by
/// [`ConsensusSet::subscribe`](crate::consensus::ConsensusSet::subscribe).
///
/// The owner is expected to keep draining this. A subscriber that falls too far behind is revoked, after
/// which every receive method returns [`SubscriptionClosed`]. A revoked subscriber should resynchronize
/// its view of the state and subscribe again.
pub struct ConsensusChangeReceiver {
    id: SubscriberID,
    receiver: Receiver<Arc<ConsensusChange>>,
}

impl ConsensusChangeReceiver {
    pub fn id(&self) -> SubscriberID {
        self.id
    }

    /// Block until the next change arrives.
    pub fn recv(&self) -> Result<Arc<ConsensusChange>, SubscriptionClosed> {
        self.receiver.recv().map_err(|_| SubscriptionClosed {
            subscriber: self.id,
            kind: SubscriberKind::Full,
        })
    }

    /// Take the next change if one is ready.
    pub fn try_recv(&self) -> Result<Option<Arc<ConsensusChange>>, SubscriptionClosed> {
        match self.receiver.try_recv() {
            Ok(change) => Ok(Some(change)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.closed()),
        }
    }

    /// Block until the next change arrives, or `timeout` elapses.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Arc<ConsensusChange>>, SubscriptionClosed> {
        match self.receiver.recv_timeout(timeout) {
            Ok(change) => Ok(Some(change)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed()),
        }
    }

    /// An iterator that blocks for each change and ends when the subscription is closed.
    pub fn iter(&self) -> impl Iterator<Item = Arc<ConsensusChange>> + '_ {
        self.receiver.iter()
    }

    fn closed(&self) -> SubscriptionClosed {
        SubscriptionClosed {
            subscriber: self.id,
            kind: SubscriberKind::Full,
        }
    }
}

/// The receiving end of a poke subscription, returned by
/// [`ConsensusSet::subscribe_poke`](crate::consensus::ConsensusSet::subscribe_poke).
///
/// A token means "the consensus set changed at least once since you last took a token". It carries no
/// information about how many changes happened, or what they were.
pub struct PokeReceiver {
    id: SubscriberID,
    receiver: Receiver<()>,
}

impl PokeReceiver {
    pub fn id(&self) -> SubscriberID {
        self.id
    }

    /// Block until poked.
    pub fn recv(&self) -> Result<(), SubscriptionClosed> {
        self.receiver.recv().map_err(|_| self.closed())
    }

    /// Take the pending token, if any. Returns whether there was one.
    pub fn try_recv(&self) -> Result<bool, SubscriptionClosed> {
        match self.receiver.try_recv() {
            Ok(()) => Ok(true),
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => Err(self.closed()),
        }
    }

    /// Block until poked or until `timeout` elapses. Returns whether a token was taken.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<bool, SubscriptionClosed> {
        match self.receiver.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed()),
        }
    }

    fn closed(&self) -> SubscriptionClosed {
        SubscriptionClosed {
            subscriber: self.id,
            kind: SubscriberKind::Poke,
        }
    }
}

/// Returned by a receiver whose subscription has been revoked or whose consensus set has shut down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionClosed {
    pub subscriber: SubscriberID,
    pub kind: SubscriberKind,
}

impl Display for SubscriptionClosed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} subscription {} is closed", self.kind, self.subscriber)
    }
}

impl std::error::Error for SubscriptionClosed {}

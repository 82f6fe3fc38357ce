/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The notifier thread, which fans committed changes out to subscribers.
//!
//! The consensus set hands each committed change to the notifier over an unbounded channel, while still
//! holding its lock. That send never blocks, and because it happens under the lock the notifier receives
//! changes in exactly the order they were committed. Delivering to subscribers happens on the notifier
//! thread after the lock is released.
//!
//! For each change, the notifier:
//! 1. Queues the change for every full-diff subscriber in the snapshot taken at commit time. A subscriber
//!    whose queue is full is revoked (see [`delivery`](crate::subscriptions::delivery)).
//! 2. Pokes every poke subscriber in the snapshot, skipping those with a token already pending.
//!
//! Neither step blocks, so no subscriber can stall the notifier, and the notifier can never stall block
//! acceptance.
//!
//! Events travel through the notifier too, so that they stay ordered after the change they describe. The
//! notifier only forwards them to the [event bus](crate::event_bus) thread, which runs the handlers.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::event_bus::publish_event;
use crate::events::{Event, RevokeSubscriberEvent};
use crate::subscriptions::delivery::DeliveryOutcome;
use crate::subscriptions::registry::{SubscriberID, SubscriberKind, Subscribers};
use crate::types::diffs::ConsensusChange;

pub(crate) enum NotifierMessage {
    /// A committed change, and the subscribers registered when it was committed.
    Change {
        change: Arc<ConsensusChange>,
        subscribers: Subscribers,
    },
    Event(Event),
}

impl NotifierMessage {
    /// Send `message` to the notifier. Messages sent after the notifier has shut down are dropped.
    pub(crate) fn publish(notifier: &Sender<NotifierMessage>, message: NotifierMessage) {
        if notifier.send(message).is_err() {
            log::warn!("Notifier has shut down, dropping notification");
        }
    }
}

pub(crate) fn start_notifier(
    event_publisher: Sender<Event>,
    messages: Receiver<NotifierMessage>,
    shutdown_signal: Receiver<()>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                // Changes committed before shutdown are still delivered.
                while let Ok(message) = messages.try_recv() {
                    handle_message(&event_publisher, message);
                }
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match messages.recv_timeout(poll_interval) {
            Ok(message) => handle_message(&event_publisher, message),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

fn handle_message(event_publisher: &Sender<Event>, message: NotifierMessage) {
    match message {
        NotifierMessage::Change { change, subscribers } => notify_subscribers(event_publisher, &change, &subscribers),
        NotifierMessage::Event(event) => publish_event(event_publisher, event),
    }
}

/// Hand `change` to every subscriber in `subscribers` without blocking.
pub(crate) fn notify_subscribers(event_publisher: &Sender<Event>, change: &Arc<ConsensusChange>, subscribers: &Subscribers) {
    for subscriber in &subscribers.full {
        if subscriber.enqueue(change) == DeliveryOutcome::Revoked {
            log::warn!("Full-diff subscriber {} fell behind and was revoked", subscriber.id());
            publish_revoke(event_publisher, subscriber.id(), SubscriberKind::Full);
        }
    }

    for subscriber in &subscribers.pokes {
        if subscriber.poke() == DeliveryOutcome::Revoked {
            publish_revoke(event_publisher, subscriber.id(), SubscriberKind::Poke);
        }
    }
}

fn publish_revoke(event_publisher: &Sender<Event>, subscriber: SubscriberID, kind: SubscriberKind) {
    publish_event(
        event_publisher,
        Event::RevokeSubscriber(RevokeSubscriberEvent {
            timestamp: SystemTime::now(),
            subscriber,
            kind,
        }),
    );
}

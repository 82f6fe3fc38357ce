/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Registered event handlers, and the event bus thread that dispatches [events](crate::events) to them.
//!
//! Handlers run on their own thread, never on the [notifier](crate::notifier) thread. The notifier
//! forwards each event over an unbounded channel once the change before it has been fanned out, so a
//! handler that blocks or panics delays or stops other handlers, but never delivery to subscribers.
//! Events are dispatched in the order they were emitted.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) accept_block_handlers: Vec<HandlerPtr<AcceptBlockEvent>>,
    pub(crate) reorg_handlers: Vec<HandlerPtr<ReorgEvent>>,
    pub(crate) reject_block_handlers: Vec<HandlerPtr<RejectBlockEvent>>,
    pub(crate) halt_handlers: Vec<HandlerPtr<HaltEvent>>,
    pub(crate) subscribe_handlers: Vec<HandlerPtr<SubscribeEvent>>,
    pub(crate) revoke_subscriber_handlers: Vec<HandlerPtr<RevokeSubscriberEvent>>,
}

impl EventHandlers {
    /// Collect the user-defined handlers and, if `log_events` is set, the default logger for every event.
    pub(crate) fn new(
        log_events: bool,
        accept_block_handler: Option<HandlerPtr<AcceptBlockEvent>>,
        reorg_handler: Option<HandlerPtr<ReorgEvent>>,
        reject_block_handler: Option<HandlerPtr<RejectBlockEvent>>,
        halt_handler: Option<HandlerPtr<HaltEvent>>,
        subscribe_handler: Option<HandlerPtr<SubscribeEvent>>,
        revoke_subscriber_handler: Option<HandlerPtr<RevokeSubscriberEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            accept_block_handlers: handlers(log_events, accept_block_handler),
            reorg_handlers: handlers(log_events, reorg_handler),
            reject_block_handlers: handlers(log_events, reject_block_handler),
            halt_handlers: handlers(log_events, halt_handler),
            subscribe_handlers: handlers(log_events, subscribe_handler),
            revoke_subscriber_handlers: handlers(log_events, revoke_subscriber_handler),
        }
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::AcceptBlock(accept_block_event) => self
                .accept_block_handlers
                .iter()
                .for_each(|handler| handler(&accept_block_event)),

            Event::Reorg(reorg_event) => self.reorg_handlers.iter().for_each(|handler| handler(&reorg_event)),

            Event::RejectBlock(reject_block_event) => self
                .reject_block_handlers
                .iter()
                .for_each(|handler| handler(&reject_block_event)),

            Event::Halt(halt_event) => self.halt_handlers.iter().for_each(|handler| handler(&halt_event)),

            Event::Subscribe(subscribe_event) => self
                .subscribe_handlers
                .iter()
                .for_each(|handler| handler(&subscribe_event)),

            Event::RevokeSubscriber(revoke_subscriber_event) => self
                .revoke_subscriber_handlers
                .iter()
                .for_each(|handler| handler(&revoke_subscriber_event)),
        }
    }
}

fn handlers<T: Logger + 'static>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    handlers.extend(user_handler);
    handlers
}

/// Send `event` to the event bus. Events sent after the event bus has stopped are dropped.
pub(crate) fn publish_event(event_publisher: &Sender<Event>, event: Event) {
    if event_publisher.send(event).is_err() {
        log::warn!("Event bus has stopped, dropping event");
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                while let Ok(event) = event_subscriber.try_recv() {
                    event_handlers.fire_handlers(event);
                }
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(poll_interval) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

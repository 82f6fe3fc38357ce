/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the consensus set's
//! [configuration](crate::config::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how an [AcceptBlock](crate::events::AcceptBlockEvent) is printed:
//!
//! ```text
//! AcceptBlock, 1701329264, fNGCJyk, 12, 0, 1
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the accepted block's ID.
//! - The fourth value is the new height of the canonical chain.
//! - The fifth and sixth values are the number of inverted and applied blocks in the change.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const ACCEPT_BLOCK: &str = "AcceptBlock";
pub const REORG: &str = "Reorg";
pub const REJECT_BLOCK: &str = "RejectBlock";
pub const HALT: &str = "Halt";
pub const SUBSCRIBE: &str = "Subscribe";
pub const REVOKE_SUBSCRIBER: &str = "RevokeSubscriber";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for AcceptBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |accept_block_event: &AcceptBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                ACCEPT_BLOCK,
                secs_since_unix_epoch(accept_block_event.timestamp),
                first_seven_base64_chars(&accept_block_event.block.bytes()),
                accept_block_event.height,
                accept_block_event.inverted_blocks,
                accept_block_event.applied_blocks
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReorgEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reorg_event: &ReorgEvent| {
            log::info!(
                "{}, {}, {}, {}",
                REORG,
                secs_since_unix_epoch(reorg_event.timestamp),
                block_list(&reorg_event.inverted_blocks),
                block_list(&reorg_event.applied_blocks)
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_block_event: &RejectBlockEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                REJECT_BLOCK,
                secs_since_unix_epoch(reject_block_event.timestamp),
                first_seven_base64_chars(&reject_block_event.block.bytes()),
                reject_block_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for HaltEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |halt_event: &HaltEvent| {
            log::error!(
                "{}, {}, {}, {}",
                HALT,
                secs_since_unix_epoch(halt_event.timestamp),
                first_seven_base64_chars(&halt_event.block.bytes()),
                halt_event.error
            )
        };
        Box::new(logger)
    }
}

impl Logger for SubscribeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |subscribe_event: &SubscribeEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                SUBSCRIBE,
                secs_since_unix_epoch(subscribe_event.timestamp),
                subscribe_event.subscriber,
                subscribe_event.kind
            )
        };
        Box::new(logger)
    }
}

impl Logger for RevokeSubscriberEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |revoke_subscriber_event: &RevokeSubscriberEvent| {
            log::warn!(
                "{}, {}, {}, {:?}",
                REVOKE_SUBSCRIBER,
                secs_since_unix_epoch(revoke_subscriber_event.timestamp),
                revoke_subscriber_event.subscriber,
                revoke_subscriber_event.kind
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

// Blocks separated by spaces, so that a list stays one CSV value.
fn block_list(blocks: &[crate::types::data_types::BlockID]) -> String {
    blocks
        .iter()
        .map(|block| first_seven_base64_chars(&block.bytes()))
        .collect::<Vec<String>>()
        .join(" ")
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! User-defined parameters of a consensus set.
//!
//! The configuration is constructed using the builder pattern, for example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .subscriber_backlog(64)
//!     .notifier_poll_interval(Duration::from_millis(5))
//!     .log_events(false)
//!     .build()
//! ```
//!
//! Every field has a default, so `Configuration::builder().build()` is a valid configuration.

use std::time::Duration;

use typed_builder::TypedBuilder;

/// Default for [`Configuration::subscriber_backlog`].
pub const DEFAULT_SUBSCRIBER_BACKLOG: usize = 32;

/// Default for [`Configuration::notifier_poll_interval`].
pub const DEFAULT_NOTIFIER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Stores the user-defined parameters of a consensus set, that is:
/// 1. The subscriber backlog: the number of changes that may be waiting for a single full-diff subscriber
///    before that subscriber is considered unresponsive and revoked.
/// 2. The notifier poll interval: how long the notifier and event bus threads wait for work before
///    checking whether they should shut down.
/// 3. The "Log Events" flag: if set to `true`, every [event](crate::events) is
///    [logged](crate::logging).
///
/// ## Subscriber backlog
///
/// A backlog of `n` means a full-diff subscriber may be up to `n + 1` changes behind the consensus set:
/// `n` waiting in its queue plus one being handed over. A backlog of 0 is treated as 1, since a
/// subscriber without room for a single queued change would be revoked whenever its worker was busy.
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Optional:
    - `.subscriber_backlog(...)`
    - `.notifier_poll_interval(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(
        default = DEFAULT_SUBSCRIBER_BACKLOG,
        setter(doc = "Set the number of undelivered changes a full-diff subscriber may have before it is revoked. Optional.")
    )]
    pub subscriber_backlog: usize,
    #[builder(
        default = DEFAULT_NOTIFIER_POLL_INTERVAL,
        setter(doc = "Set how long the notifier and event bus threads wait for work before checking for shutdown. Optional.")
    )]
    pub notifier_poll_interval: Duration,
    #[builder(default = true, setter(doc = "Enable logging? Optional, defaults to `true`."))]
    pub log_events: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration::builder().build()
    }
}

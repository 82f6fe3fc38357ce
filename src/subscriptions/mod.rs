/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Subscribers to the consensus set, and the channels changes reach them through.
//!
//! There are two kinds of subscribers:
//! 1. **Full-diff subscribers** receive every [`ConsensusChange`](crate::types::diffs::ConsensusChange),
//!    in the order the changes were committed. Wallets and explorers that maintain their own view of the
//!    sets use these.
//! 2. **Poke subscribers** receive a token meaning "something changed". Tokens coalesce, so a poke
//!    subscriber should re-query whatever state it cares about when it wakes up.

pub(crate) mod registry;
pub use registry::{SubscriberID, SubscriberKind};

pub(crate) mod delivery;
pub use delivery::{ConsensusChangeReceiver, PokeReceiver, SubscriptionClosed};

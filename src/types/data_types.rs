/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types: identifiers and amounts that are passed around and compared, but have no active
//! behavior of their own. These types follow the newtype pattern, and the API for using them is defined
//! in this module.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;
use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::Add,
};

pub use sha2::Sha256 as CryptoHasher;

/// A SHA256 digest. Every identifier in this crate is a [`CryptoHash`] of some borsh-serialized value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Hash the borsh serialization of `value`.
    pub fn of<T: BorshSerialize + ?Sized>(value: &T) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        // Safety: writing into a hasher cannot fail.
        value
            .serialize(&mut hasher)
            .expect("serializing into a hasher is infallible");
        CryptoHash(hasher.finalize().into())
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

macro_rules! hash_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshDeserialize, BorshSerialize)]
        pub struct $name(CryptoHash);

        impl $name {
            pub const fn new(hash: CryptoHash) -> Self {
                Self(hash)
            }

            pub const fn bytes(&self) -> [u8; 32] {
                self.0.bytes()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

hash_id!(
    /// Identifies a [block](crate::types::block::Block). Obtained [like this](crate::types::block::Block::id).
    BlockID
);

hash_id!(
    /// Identifies a [transaction](crate::types::block::Transaction).
    TransactionID
);

hash_id!(
    /// Identifies an [output](crate::types::block::Output) in the unspent output set.
    OutputID
);

hash_id!(
    /// Identifies a [file contract](crate::types::block::FileContract) in the open contract set.
    ContractID
);

hash_id!(
    /// The hash of the conditions under which an output may be spent. Who owns the output.
    UnlockHash
);

/// Height of a block in the chain. The genesis block has height 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize)]
pub struct BlockHeight(u64);

impl BlockHeight {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn genesis() -> Self {
        Self(0)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u64) -> Self::Output {
        BlockHeight::new(self.0.add(rhs))
    }
}

/// An amount of coins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize)]
pub struct Currency(u128);

impl Currency {
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The amount of work a block contributes to its chain, as decided by the external validity oracle.
///
/// The canonical chain is the chain with the greatest cumulative `BlockWeight`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize)]
pub struct BlockWeight(u128);

impl BlockWeight {
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl Add<BlockWeight> for BlockWeight {
    type Output = BlockWeight;
    fn add(self, rhs: BlockWeight) -> Self::Output {
        BlockWeight(self.0.saturating_add(rhs.0))
    }
}

impl Display for BlockWeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Every block the consensus set has accepted, canonical or not, arranged as a tree rooted at genesis.
//!
//! Blocks on side branches are kept so that a later block extending them can trigger a reorg without
//! the side branch having to be delivered again.

use std::collections::HashMap;

use crate::types::block::Block;
use crate::types::data_types::{BlockHeight, BlockID, BlockWeight};
use crate::types::diffs::BlockDiff;

pub(crate) struct BlockNode {
    pub(crate) block: Block,
    pub(crate) height: BlockHeight,
    /// Sum of the weights of every block from genesis up to and including this one.
    pub(crate) cumulative_weight: BlockWeight,
    pub(crate) children: Vec<BlockID>,
    /// The forward diff of this block. `None` until the block is first applied to the sets. Always `Some`
    /// for blocks on the canonical chain.
    pub(crate) diff: Option<BlockDiff>,
}

impl BlockNode {
    pub(crate) fn parent(&self) -> BlockID {
        self.block.parent
    }
}

pub(crate) struct BlockMap {
    nodes: HashMap<BlockID, BlockNode>,
}

impl BlockMap {
    /// Create a block map containing only `genesis`, whose applied diff is `genesis_diff`.
    pub(crate) fn new(genesis: Block, genesis_diff: BlockDiff) -> BlockMap {
        let mut nodes = HashMap::new();
        let genesis_id = genesis.id();
        let weight = genesis.weight;
        nodes.insert(
            genesis_id,
            BlockNode {
                block: genesis,
                height: BlockHeight::genesis(),
                cumulative_weight: weight,
                children: Vec::new(),
                diff: Some(genesis_diff),
            },
        );
        BlockMap { nodes }
    }

    pub(crate) fn contains(&self, block: &BlockID) -> bool {
        self.nodes.contains_key(block)
    }

    pub(crate) fn get(&self, block: &BlockID) -> Option<&BlockNode> {
        self.nodes.get(block)
    }

    pub(crate) fn get_mut(&mut self, block: &BlockID) -> Option<&mut BlockNode> {
        self.nodes.get_mut(block)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Insert `block` as a child of its parent, returning its new node's ID.
    ///
    /// Returns `None` if the parent is not in the map.
    pub(crate) fn insert_child(&mut self, block: Block) -> Option<BlockID> {
        let id = block.id();
        let parent = self.nodes.get_mut(&block.parent)?;
        parent.children.push(id);
        let height = parent.height + 1;
        let cumulative_weight = parent.cumulative_weight + block.weight;

        self.nodes.insert(
            id,
            BlockNode {
                block,
                height,
                cumulative_weight,
                children: Vec::new(),
                diff: None,
            },
        );
        Some(id)
    }

    /// Remove `block` and all of its descendants from the map.
    ///
    /// Used to forget blocks whose application turned out to be inconsistent with the sets.
    pub(crate) fn remove_subtree(&mut self, block: &BlockID) {
        let parent = match self.nodes.get(block) {
            Some(node) => node.parent(),
            None => return,
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.retain(|child| child != block);
        }

        let mut stack = vec![*block];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                stack.extend(node.children);
            }
        }
    }
}

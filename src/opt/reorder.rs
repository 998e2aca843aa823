//! Block reordering under the dominator tree.
//!
//! Preorder traversal that prefers laying a block's branch target directly
//! after it, so unconditional jumps become fallthroughs. A visited set
//! keeps the preferred successor from being laid out twice. Blocks the
//! dominator tree never reaches are unreachable; their instructions are
//! dropped along with phi edges arriving from them.

use std::collections::HashSet;

use crate::ir::{BlockId, DomTree, Function, ValueKind};

/// Rewrite `func.layout` according to a preorder walk of the dominator
/// tree. Does not change semantics, only the linear order.
pub fn reorder_blocks(func: &mut Function, dom: &DomTree) {
    let mut order: Vec<BlockId> = Vec::new();
    let mut visited: HashSet<BlockId> = HashSet::new();
    let mut stack: Vec<BlockId> = vec![dom.root()];

    while let Some(block) = stack.pop() {
        if !visited.insert(block) {
            continue;
        }
        order.push(block);

        // The branch target of this block's terminator should be visited
        // next so it falls through.
        let next = match func.terminator(block).map(|t| &func.value(t).kind) {
            Some(ValueKind::Branch { target }) => Some(*target),
            Some(ValueKind::CondBranch { then_block, .. }) => Some(*then_block),
            _ => None,
        };

        let mut preferred = None;
        for child in dom.children(block) {
            if Some(*child) == next {
                preferred = Some(*child);
                continue;
            }
            if !visited.contains(child) {
                stack.push(*child);
            }
        }
        if let Some(child) = preferred {
            if !visited.contains(&child) {
                stack.push(child);
            }
        }
    }

    // Anything the walk never reached is dead; strip phi edges from dead
    // predecessors, then drop the blocks.
    let dead: Vec<BlockId> = func
        .layout
        .iter()
        .copied()
        .filter(|b| !visited.contains(b))
        .collect();
    if !dead.is_empty() {
        strip_dead_phi_edges(func, &visited);
        for block in &dead {
            func.remove_block(*block);
        }
    }

    func.layout = order;
}

fn strip_dead_phi_edges(func: &mut Function, live: &HashSet<BlockId>) {
    for block in func.layout.clone() {
        if !live.contains(&block) {
            continue;
        }
        for inst in func.block(block).insts.clone() {
            let incoming = match &func.value(inst).kind {
                ValueKind::Phi { incoming } => incoming.clone(),
                _ => continue,
            };
            if incoming.iter().all(|(p, _)| live.contains(p)) {
                continue;
            }
            let mut kept = Vec::new();
            let mut dropped = Vec::new();
            for (pred, v) in incoming {
                if live.contains(&pred) {
                    kept.push((pred, v));
                } else {
                    dropped.push(v);
                }
            }
            if let ValueKind::Phi { incoming } = &mut func.value_mut(inst).kind {
                *incoming = kept;
            }
            for v in dropped {
                func.remove_use(v, inst);
            }
        }
    }
}

//! Dominator tree construction.
//!
//! Iterative data-flow formulation over reverse postorder. Only blocks
//! reachable from the entry participate; unreachable blocks have no
//! dominator information and are skipped by the consumers (reordering drops
//! them from the layout entirely).

use std::collections::HashMap;

use super::function::Function;
use super::value::BlockId;

#[derive(Debug)]
pub struct DomTree {
    root: BlockId,
    /// Immediate dominator of each reachable block; the root maps to itself.
    idom: HashMap<BlockId, BlockId>,
    children: HashMap<BlockId, Vec<BlockId>>,
}

impl DomTree {
    pub fn build(func: &Function) -> Self {
        let root = func.entry();

        // Reverse postorder over the reachable CFG.
        let rpo = reverse_postorder(func, root);
        let rpo_number: HashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();

        let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for b in &rpo {
            for s in func.successors(*b) {
                preds.entry(s).or_default().push(*b);
            }
        }

        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        idom.insert(root, root);

        let mut changed = true;
        while changed {
            changed = false;
            for b in rpo.iter().skip(1) {
                let block_preds = match preds.get(b) {
                    Some(p) => p,
                    None => continue,
                };
                let mut new_idom: Option<BlockId> = None;
                for p in block_preds {
                    if !idom.contains_key(p) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => *p,
                        Some(cur) => intersect(&idom, &rpo_number, *p, cur),
                    });
                }
                if let Some(n) = new_idom {
                    if idom.get(b) != Some(&n) {
                        idom.insert(*b, n);
                        changed = true;
                    }
                }
            }
        }

        let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for b in &rpo {
            if *b == root {
                continue;
            }
            if let Some(parent) = idom.get(b) {
                children.entry(*parent).or_default().push(*b);
            }
        }

        Self {
            root,
            idom,
            children,
        }
    }

    pub fn root(&self) -> BlockId {
        self.root
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.idom.contains_key(&block)
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        if block == self.root {
            return None;
        }
        self.idom.get(&block).copied()
    }

    /// Dominator-tree children of a block, in reverse postorder.
    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            if cur == self.root {
                return false;
            }
            match self.idom.get(&cur) {
                Some(parent) => cur = *parent,
                None => return false,
            }
        }
    }
}

fn intersect(
    idom: &HashMap<BlockId, BlockId>,
    rpo_number: &HashMap<BlockId, usize>,
    a: BlockId,
    b: BlockId,
) -> BlockId {
    let mut a = a;
    let mut b = b;
    while a != b {
        while rpo_number[&a] > rpo_number[&b] {
            a = idom[&a];
        }
        while rpo_number[&b] > rpo_number[&a] {
            b = idom[&b];
        }
    }
    a
}

fn reverse_postorder(func: &Function, root: BlockId) -> Vec<BlockId> {
    let mut postorder = Vec::new();
    let mut visited: Vec<bool> = Vec::new();
    fn visit(
        func: &Function,
        block: BlockId,
        visited: &mut Vec<bool>,
        postorder: &mut Vec<BlockId>,
    ) {
        let idx = block.0 as usize;
        if idx >= visited.len() {
            visited.resize(idx + 1, false);
        }
        if visited[idx] {
            return;
        }
        visited[idx] = true;
        for s in func.successors(block) {
            visit(func, s, visited, postorder);
        }
        postorder.push(block);
    }
    visit(func, root, &mut visited, &mut postorder);
    postorder.reverse();
    postorder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Type;
    use crate::ir::value::ValueKind;

    /// entry -> (then | else) -> join
    fn diamond() -> (Function, BlockId, BlockId, BlockId, BlockId) {
        let mut f = Function::new(
            "f",
            Type::func(Type::Integer(64), vec![Type::Integer(64)]),
        );
        let entry = f.add_block("entry");
        let then_b = f.add_block("then");
        let else_b = f.add_block("else");
        let join = f.add_block("join");
        let cond = f.params[0];
        f.append_inst(
            entry,
            ValueKind::CondBranch {
                cond,
                then_block: then_b,
                else_block: else_b,
            },
            Type::Void,
        );
        f.append_inst(then_b, ValueKind::Branch { target: join }, Type::Void);
        f.append_inst(else_b, ValueKind::Branch { target: join }, Type::Void);
        f.append_inst(join, ValueKind::Return { value: None }, Type::Void);
        (f, entry, then_b, else_b, join)
    }

    #[test]
    fn test_diamond_idoms() {
        let (f, entry, then_b, else_b, join) = diamond();
        let dom = DomTree::build(&f);
        assert_eq!(dom.idom(then_b), Some(entry));
        assert_eq!(dom.idom(else_b), Some(entry));
        assert_eq!(dom.idom(join), Some(entry));
        assert!(dom.dominates(entry, join));
        assert!(!dom.dominates(then_b, join));
        assert!(dom.dominates(join, join));
    }

    #[test]
    fn test_unreachable_block() {
        let (mut f, entry, ..) = diamond();
        let orphan = f.add_block("orphan");
        f.append_inst(orphan, ValueKind::Return { value: None }, Type::Void);
        let dom = DomTree::build(&f);
        assert!(dom.is_reachable(entry));
        assert!(!dom.is_reachable(orphan));
    }
}

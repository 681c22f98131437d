//! Iteration over operations and blocks.

use std::iter::FusedIterator;
use std::slice;

use crate::arena::OpIndex;
use crate::block::{Block, BlockId};
use crate::graph::Graph;
use crate::operations::OperationView;

/// Bidirectional iterator over the operations in `[front, back)`.
///
/// Steps with the size table, so both directions are O(1) per operation.
#[derive(Clone)]
pub struct OperationIter<'g, 'zone> {
    graph: &'g Graph<'zone>,
    front: OpIndex,
    back: OpIndex,
}

impl<'g, 'zone> OperationIter<'g, 'zone> {
    pub(crate) fn new(graph: &'g Graph<'zone>, front: OpIndex, back: OpIndex) -> Self {
        OperationIter { graph, front, back }
    }

    /// Indices only.
    pub fn indices(self) -> impl DoubleEndedIterator<Item = OpIndex> {
        self.map(|op| op.index())
    }
}

impl<'g> Iterator for OperationIter<'g, '_> {
    type Item = OperationView<'g>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let op = self.front;
        self.front = self.graph.next_index(op);
        Some(self.graph.get(op))
    }
}

impl DoubleEndedIterator for OperationIter<'_, '_> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        self.back = self.graph.previous_index(self.back);
        Some(self.graph.get(self.back))
    }
}

impl FusedIterator for OperationIter<'_, '_> {}

/// Iterator over bound blocks in binding order.
#[derive(Clone)]
pub struct BlockIter<'g, 'zone> {
    graph: &'g Graph<'zone>,
    ids: slice::Iter<'g, BlockId>,
}

impl<'g, 'zone> BlockIter<'g, 'zone> {
    pub(crate) fn new(graph: &'g Graph<'zone>, ids: &'g [BlockId]) -> Self {
        BlockIter {
            graph,
            ids: ids.iter(),
        }
    }
}

impl<'g> Iterator for BlockIter<'g, '_> {
    type Item = &'g Block;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.ids.next().map(|&id| self.graph.block(id))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl DoubleEndedIterator for BlockIter<'_, '_> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        self.ids.next_back().map(|&id| self.graph.block(id))
    }
}

impl ExactSizeIterator for BlockIter<'_, '_> {}
impl FusedIterator for BlockIter<'_, '_> {}

#[cfg(test)]
mod tests {
    use crate::block::BlockKind;
    use crate::graph::Graph;
    use crate::operations::{Constant, Parameter, Return};
    use crate::zone::Zone;

    #[test]
    fn test_forward_and_backward_agree() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let ids = vec![
            graph.add(Constant::word32(1)),
            graph.add(Parameter::new(0)),
            graph.add(Constant::float64(2.5)),
        ];
        let ret = graph.add(Return::new(ids[2]));

        let forward: Vec<_> = graph.all_operations().indices().collect();
        let mut backward: Vec<_> = graph.all_operations().rev().map(|op| op.index()).collect();
        backward.reverse();
        assert_eq!(forward, backward);
        assert_eq!(forward.last(), Some(&ret));
    }

    #[test]
    fn test_meet_in_the_middle() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let a = graph.add(Parameter::new(0));
        let b = graph.add(Parameter::new(1));
        let c = graph.add(Parameter::new(2));

        let mut iter = graph.all_operations();
        assert_eq!(iter.next().map(|op| op.index()), Some(a));
        assert_eq!(iter.next_back().map(|op| op.index()), Some(c));
        assert_eq!(iter.next().map(|op| op.index()), Some(b));
        assert!(iter.next().is_none());
        assert!(iter.next_back().is_none());
    }

    #[test]
    fn test_block_iteration_follows_binding_order() {
        let zone = Zone::new();
        let mut graph = Graph::new(&zone);
        let entry = graph.new_block(BlockKind::Merge);
        let later = graph.new_block(BlockKind::BranchTarget);
        let sooner = graph.new_block(BlockKind::BranchTarget);
        assert!(graph.add_block(entry));
        graph.finalize_block(entry);
        for block in [sooner, later] {
            graph.add_predecessor(block, entry);
            assert!(graph.add_block(block));
            graph.finalize_block(block);
        }

        let order: Vec<_> = graph.blocks().map(|block| block.index().id()).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(graph.blocks().len(), 3);
        assert_eq!(graph.bound_block_ids(), &[entry, sooner, later]);
    }
}

use core::ops::{Index, IndexMut};
use std::fmt;
use serde::{Deserialize, Serialize};
use crate::face::Face;
use crate::index_space::IndexSpace;




/**
 * A handle to a node in a `Tree`. Handles carry the generation of the arena
 * slot they were issued for, so a handle to a deleted node is never confused
 * with a newer node occupying the same slot.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "node#{}.{}", self.index, self.generation)
    }
}




/**
 * A node of the spatial tree. Child slots are the only owning edges; the
 * parent and neighbor entries are back-references into the same arena.
 * Neighbor entries only ever refer to nodes at the same level.
 */
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) children: Vec<Option<NodeId>>,
    pub(crate) neighbors: [Option<NodeId>; 6],
    pub(crate) parent: Option<NodeId>,
    pub(crate) level_adjust: u32,
    pub(crate) level: u32,
    pub(crate) position: [i64; 3],
}




// ============================================================================
impl Node {

    pub(crate) fn new(num_children: usize, parent: Option<NodeId>, level: u32, position: [i64; 3]) -> Self {
        Self {
            children: vec![None; num_children],
            neighbors: [None; 6],
            parent,
            level_adjust: 0,
            level,
            position,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(Option::is_none)
    }

    pub fn has_all_children(&self) -> bool {
        self.children.iter().all(Option::is_some)
    }

    pub fn child(&self, slot: usize) -> Option<NodeId> {
        self.children.get(slot).copied().flatten()
    }

    /**
     * Iterate over the populated child slots as `(slot, child)` pairs.
     */
    pub fn children(&self) -> impl Iterator<Item = (usize, NodeId)> + '_ {
        self.children.iter().enumerate().filter_map(|(slot, c)| c.map(|c| (slot, c)))
    }

    pub fn neighbor(&self, face: Face) -> Option<NodeId> {
        self.neighbors[face.index()]
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /**
     * The number of uniform refinement levels that were collapsed into this
     * leaf by coalescing.
     */
    pub fn level_adjust(&self) -> u32 {
        self.level_adjust
    }

    /**
     * The level this leaf stands for once its collapsed levels are counted.
     */
    pub fn effective_level(&self) -> u32 {
        self.level + self.level_adjust
    }

    /**
     * Integer coordinates of this node among all nodes of its level.
     */
    pub fn position(&self) -> [i64; 3] {
        self.position
    }

    /**
     * Return the cells covered by this node, in the index space of its own
     * level, for blocks of the given size.
     */
    pub fn region(&self, block_size: [usize; 3]) -> IndexSpace {
        let n = [block_size[0] as i64, block_size[1] as i64, block_size[2] as i64];
        let p = self.position;
        IndexSpace::from_corners(
            [p[0] * n[0], p[1] * n[1], p[2] * n[2]],
            [(p[0] + 1) * n[0], (p[1] + 1) * n[1], (p[2] + 1) * n[2]])
    }
}




struct Slot {
    generation: u32,
    node: Option<Node>,
}




/**
 * Storage for tree nodes with stable, generation-checked handles. Freed slots
 * are recycled.
 */
#[derive(Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    len: usize,
}




// ============================================================================
impl Arena {

    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        self.len += 1;

        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation += 1;
                slot.node = Some(node);
                NodeId { index: index as u32, generation: slot.generation }
            }
            None => {
                self.slots.push(Slot { generation: 0, node: Some(node) });
                NodeId { index: (self.slots.len() - 1) as u32, generation: 0 }
            }
        }
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index())?;

        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        self.free.push(id.index());
        self.len -= 1;
        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|node| (NodeId { index: index as u32, generation: slot.generation }, node))
        })
    }
}

impl Index<NodeId> for Arena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        match self.get(id) {
            Some(node) => node,
            None => panic!("stale node handle {}", id),
        }
    }
}

impl IndexMut<NodeId> for Arena {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("stale node handle {}", id),
        }
    }
}

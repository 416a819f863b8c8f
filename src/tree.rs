use log::debug;
use crate::config::Branching;
use crate::criterion::Criterion;
use crate::error::Error;
use crate::face::{Face, Selector};
use crate::index_space::IndexSpace;
use crate::node::{Arena, Node, NodeId};




/**
 * How the region adjacent to a node in some direction is covered by leaves.
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Adjacency {
    /// The direction points outside the domain.
    Boundary,
    /// A leaf at the same level.
    Same(NodeId),
    /// A node at a coarser level covering the adjacent region.
    Coarser(NodeId),
    /// The children of the same-level node that touch this node.
    Finer(Vec<NodeId>),
}




/**
 * A rank-`d` spatial tree in which every node has up to `k^d` children. Nodes
 * are stored in an arena; each node keeps links to its same-level face
 * neighbors, which are maintained by the create and delete operations so that
 * neighbor queries never descend the tree.
 */
pub struct Tree {
    rank: usize,
    branch: usize,
    nodes: Arena,
    root: NodeId,
    max_level_seen: u32,
}




// ============================================================================
impl Tree {


    /**
     * Create a tree consisting of a single root leaf. The rank must be 1, 2
     * or 3, and the branching factor a power of two in `2..=16`.
     */
    pub fn new(rank: usize, branch: usize) -> Result<Self, Error> {
        if !(1..=3).contains(&rank) {
            return Err(Error::Config(format!("tree rank must be 1, 2 or 3, got {}", rank)));
        }
        if !branch.is_power_of_two() || !(2..=16).contains(&branch) {
            return Err(Error::Config(format!("tree branch must be a power of two in 2..=16, got {}", branch)));
        }
        let mut nodes = Arena::default();
        let root = nodes.insert(Node::new(branch.pow(rank as u32), None, 0, [0, 0, 0]));
        Ok(Self { rank, branch, nodes, root, max_level_seen: 0 })
    }


    pub fn rank(&self) -> usize {
        self.rank
    }


    pub fn branch(&self) -> usize {
        self.branch
    }


    pub fn root(&self) -> NodeId {
        self.root
    }


    /**
     * Return the number of live nodes, including the root.
     */
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }


    /**
     * Return the deepest level any node of this tree has reached.
     */
    pub fn max_level(&self) -> u32 {
        self.max_level_seen
    }


    pub fn num_children(&self) -> usize {
        self.branch.pow(self.rank as u32)
    }


    /**
     * Return the node behind a handle, or `None` if it was deleted.
     */
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }


    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some()
    }


    /**
     * Return the same-level neighbor of a node across one of its faces.
     */
    pub fn neighbor(&self, id: NodeId, face: Face) -> Option<NodeId> {
        self.nodes.get(id)?.neighbor(face)
    }


    /**
     * Return the child of a node's neighbor across `face`, in the slot with
     * coordinates `corner`.
     */
    pub fn cousin(&self, id: NodeId, face: Face, corner: [usize; 3]) -> Option<NodeId> {
        let neighbor = self.neighbor(id, face)?;
        self.nodes.get(neighbor)?.child(self.slot_index(corner))
    }


    /**
     * Return the child slot index for per-axis slot coordinates.
     */
    pub fn slot_index(&self, corner: [usize; 3]) -> usize {
        let k = self.branch;
        corner[0] + k * (corner[1] + k * corner[2])
    }


    /**
     * Return the per-axis coordinates of a child slot.
     */
    pub fn slot_coords(&self, slot: usize) -> [usize; 3] {
        let k = self.branch;
        [slot % k, (slot / k) % k, slot / (k * k)]
    }


    /**
     * Return the slot a node occupies in its parent, if it has a parent.
     */
    pub fn slot_of(&self, id: NodeId) -> Option<usize> {
        let parent = self.nodes.get(id)?.parent?;
        self.nodes[parent].children().find(|&(_, c)| c == id).map(|(slot, _)| slot)
    }


    /**
     * Return all leaves, depth-first in slot order.
     */
    pub fn leaves(&self) -> Vec<NodeId> {
        self.depth_first().into_iter().filter(|&id| self.nodes[id].is_leaf()).collect()
    }


    /**
     * Return all nodes, parents before their children, in slot order.
     */
    pub fn depth_first(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];

        while let Some(id) = stack.pop() {
            order.push(id);
            let node = &self.nodes[id];
            stack.extend(node.children().map(|(_, c)| c).collect::<Vec<_>>().into_iter().rev());
        }
        order
    }


    /**
     * Per-axis refinement factor: `k` on the axes in use and 1 elsewhere.
     */
    pub fn ratio(&self) -> [i64; 3] {
        let mut r = [1; 3];
        r.iter_mut().take(self.rank).for_each(|r| *r = self.branch as i64);
        r
    }




    // ========================================================================
    // Refinement
    // ========================================================================


    /**
     * Refine the tree under the given criterion, creating every node whose
     * region the criterion asks to split, down to `max_level`. Nodes that
     * already have children are descended into, so refining twice with the
     * same criterion changes nothing. Returns the depth reached below the
     * root.
     */
    pub fn refine<C: Criterion + ?Sized>(&mut self, criterion: &C, max_level: u32, mode: Branching) -> usize {
        let domain = criterion.domain();
        self.refine_node(self.root, &domain, criterion, max_level, mode)
    }


    fn refine_node<C: Criterion + ?Sized>(
        &mut self,
        id: NodeId,
        region: &IndexSpace,
        criterion: &C,
        max_level: u32,
        mode: Branching) -> usize
    {
        let level = self.nodes[id].level;

        if level >= max_level || !self.is_splittable(region) {
            return 0;
        }

        let mut depth = 0;

        match mode {
            Branching::Full => {
                if self.nodes[id].is_leaf() {
                    if !criterion.refine(region, level) {
                        return 0;
                    }
                    for slot in 0..self.num_children() {
                        self.create_child(id, slot);
                    }
                }
                for (slot, child) in self.children_of(id) {
                    let sub = region.subdivide(self.branch, self.rank, self.slot_coords(slot));
                    depth = depth.max(1 + self.refine_node(child, &sub, criterion, max_level, mode));
                }
            }
            Branching::Partial => {
                for slot in 0..self.num_children() {
                    let sub = region.subdivide(self.branch, self.rank, self.slot_coords(slot));
                    let child = match self.nodes[id].child(slot) {
                        Some(child) => child,
                        None if criterion.refine(&sub, level) => self.create_child(id, slot),
                        None => continue,
                    };
                    depth = depth.max(1 + self.refine_node(child, &sub, criterion, max_level, mode));
                }
            }
        }
        depth
    }


    fn is_splittable(&self, region: &IndexSpace) -> bool {
        region.dim().iter().take(self.rank).all(|&w| w >= self.branch)
    }


    fn children_of(&self, id: NodeId) -> Vec<(usize, NodeId)> {
        self.nodes[id].children().collect()
    }


    /**
     * Create the child of `parent` in `slot` and wire its neighbor links. A
     * neighbor inside the parent is a sibling; a neighbor outside it is the
     * mirrored child of the parent's neighbor across the same face.
     */
    fn create_child(&mut self, parent: NodeId, slot: usize) -> NodeId {
        let k = self.branch;
        let c = self.slot_coords(slot);
        let (level, mut position) = {
            let p = &self.nodes[parent];
            (p.level + 1, p.position)
        };
        for a in 0..self.rank {
            position[a] = position[a] * k as i64 + c[a] as i64;
        }

        let id = self.nodes.insert(Node::new(self.num_children(), Some(parent), level, position));
        let p = &mut self.nodes[parent];
        p.children[slot] = Some(id);
        p.level_adjust = 0;
        self.max_level_seen = self.max_level_seen.max(level);

        for face in Face::all(self.rank) {
            let a = face.axis().index();
            let interior = if face.is_upper() { c[a] + 1 < k } else { c[a] > 0 };

            let neighbor = if interior {
                let mut s = c;
                if face.is_upper() { s[a] += 1 } else { s[a] -= 1 }
                self.nodes[parent].child(self.slot_index(s))
            } else {
                let mut mirrored = c;
                mirrored[a] = face.opposite().child_layer(k);
                self.cousin(parent, face, mirrored)
            };
            if let Some(neighbor) = neighbor {
                self.make_neighbors(id, neighbor, face);
            }
        }
        id
    }


    fn make_neighbors(&mut self, a: NodeId, b: NodeId, face: Face) {
        self.nodes[a].neighbors[face.index()] = Some(b);
        self.nodes[b].neighbors[face.opposite().index()] = Some(a);
    }




    // ========================================================================
    // Balance
    // ========================================================================


    /**
     * Make one 2:1 balancing pass over the tree and return whether any node
     * was created. Callers repeat passes until nothing changes.
     */
    pub fn balance(&mut self, mode: Branching) -> bool {
        let mut changed = false;
        self.balance_node(self.root, mode, &mut changed);
        changed
    }


    /**
     * Repeat balancing passes until one makes no change. Returns the number of
     * passes that changed the tree.
     */
    pub fn balance_to_fixed_point(&mut self, mode: Branching) -> usize {
        let mut passes = 0;

        while self.balance(mode) {
            passes += 1;
            debug!("balance pass {} changed the tree ({} nodes)", passes, self.node_count());
        }
        passes
    }


    fn balance_node(&mut self, id: NodeId, mode: Branching, changed: &mut bool) {
        match mode {
            Branching::Full => {
                if self.nodes[id].is_leaf() {
                    if !self.leaf_needs_refinement(id) {
                        return;
                    }
                    for slot in 0..self.num_children() {
                        self.create_child(id, slot);
                    }
                    *changed = true;
                }
                for (_, child) in self.children_of(id) {
                    self.balance_node(child, mode, changed);
                }
            }
            Branching::Partial => {
                for slot in 0..self.num_children() {
                    let child = match self.nodes[id].child(slot) {
                        Some(child) => child,
                        None if self.slot_needs_child(id, slot) => {
                            *changed = true;
                            self.create_child(id, slot)
                        }
                        None => continue,
                    };
                    self.balance_node(child, mode, changed);
                }
            }
        }
    }


    /**
     * A leaf must refine when a face-adjacent cousin has children, since those
     * children are two levels finer than the leaf.
     */
    fn leaf_needs_refinement(&self, id: NodeId) -> bool {
        Face::all(self.rank).any(|face| {
            self.touching_children(id, face)
                .into_iter()
                .any(|cousin| !self.nodes[cousin].is_leaf())
        })
    }


    /**
     * Return the children of `id`'s neighbor across `face` which touch `id`.
     */
    fn touching_children(&self, id: NodeId, face: Face) -> Vec<NodeId> {
        match self.neighbor(id, face) {
            Some(neighbor) => self.children_on_face(neighbor, face.opposite()),
            None => Vec::new(),
        }
    }


    /**
     * Return the children of `id` lying against one of its faces.
     */
    fn children_on_face(&self, id: NodeId, face: Face) -> Vec<NodeId> {
        let a = face.axis().index();
        let layer = face.child_layer(self.branch);
        self.nodes[id]
            .children()
            .filter(|&(slot, _)| self.slot_coords(slot)[a] == layer)
            .map(|(_, c)| c)
            .collect()
    }


    /**
     * An absent child slot must be created when the node adjacent to that
     * slot (a sibling, or a cousin across the parent's face) has children
     * touching the slot.
     */
    fn slot_needs_child(&self, id: NodeId, slot: usize) -> bool {
        let k = self.branch;
        let c = self.slot_coords(slot);

        Face::all(self.rank).any(|face| {
            let a = face.axis().index();
            let interior = if face.is_upper() { c[a] + 1 < k } else { c[a] > 0 };

            let adjacent = if interior {
                let mut s = c;
                if face.is_upper() { s[a] += 1 } else { s[a] -= 1 }
                self.nodes[id].child(self.slot_index(s))
            } else {
                let mut mirrored = c;
                mirrored[a] = face.opposite().child_layer(k);
                self.cousin(id, face, mirrored)
            };
            adjacent.map_or(false, |n| !self.children_on_face(n, face.opposite()).is_empty())
        })
    }




    // ========================================================================
    // Coalesce and delete
    // ========================================================================


    /**
     * Make one pass collapsing every node whose children are all present, all
     * leaves, and all share one `level_adjust` value. Returns whether any node
     * collapsed.
     */
    pub fn coalesce(&mut self) -> bool {
        let mut changed = false;
        self.coalesce_node(self.root, &mut changed);
        changed
    }


    /**
     * Repeat coalescing passes until one makes no change. Returns the number
     * of passes that changed the tree.
     */
    pub fn coalesce_to_fixed_point(&mut self) -> usize {
        let mut passes = 0;

        while self.coalesce() {
            passes += 1;
            debug!("coalesce pass {} left {} nodes", passes, self.node_count());
        }
        passes
    }


    fn coalesce_node(&mut self, id: NodeId, changed: &mut bool) {
        let node = &self.nodes[id];

        if node.is_leaf() {
            return;
        }
        let children = self.children_of(id);
        let adjust = self.nodes[children[0].1].level_adjust;
        let collapsible = node.has_all_children() && children.iter().all(|&(_, c)| {
            let child = &self.nodes[c];
            child.is_leaf() && child.level_adjust == adjust
        });

        if collapsible {
            for (_, child) in children {
                self.delete_subtree(child);
            }
            self.nodes[id].level_adjust = adjust + 1;
            *changed = true;
        } else {
            for (_, child) in children {
                self.coalesce_node(child, changed);
            }
        }
    }


    /**
     * Delete a node and all of its descendants. Neighbor links pointing into
     * the deleted subtree are cleared, as is the parent's child slot. The root
     * cannot be deleted.
     */
    pub fn delete(&mut self, id: NodeId) -> Result<(), Error> {
        if id == self.root {
            return Err(Error::State(format!("{} is the root and cannot be deleted", id)));
        }
        if !self.contains(id) {
            return Err(Error::TreeInvariant(format!("{} does not refer to a live node", id)));
        }
        self.delete_subtree(id);
        Ok(())
    }


    fn delete_subtree(&mut self, id: NodeId) {
        for (_, child) in self.children_of(id) {
            self.delete_subtree(child);
        }
        let node = match self.nodes.remove(id) {
            Some(node) => node,
            None => return,
        };
        for face in Face::all(self.rank) {
            if let Some(neighbor) = node.neighbor(face) {
                let slot = &mut self.nodes[neighbor].neighbors[face.opposite().index()];
                if *slot == Some(id) {
                    *slot = None;
                }
            }
        }
        if let Some(parent) = node.parent {
            for slot in self.nodes[parent].children.iter_mut() {
                if *slot == Some(id) {
                    *slot = None;
                }
            }
        }
    }




    // ========================================================================
    // Geometric queries
    // ========================================================================


    /**
     * Return the deepest existing node on the path from the root toward the
     * node at `position` on `level`. The position must lie in the domain.
     */
    pub fn locate(&self, level: u32, position: [i64; 3]) -> NodeId {
        let k = self.branch as i64;
        let mut current = self.root;

        for l in 0..level {
            let shift = k.pow(level - l - 1);
            let mut corner = [0; 3];
            for a in 0..self.rank {
                corner[a] = ((position[a] / shift) % k) as usize;
            }
            match self.nodes[current].child(self.slot_index(corner)) {
                Some(child) => current = child,
                None => break,
            }
        }
        current
    }


    /**
     * Resolve how the region next to a node, in the direction of `selector`,
     * is covered: by a same-level leaf, by a coarser node, by the finer
     * children of a same-level node, or not at all.
     */
    pub fn adjacency(&self, id: NodeId, selector: Selector) -> Adjacency {
        let node = &self.nodes[id];
        let extent = (self.branch as i64).pow(node.level);
        let mut target = node.position;

        for a in 0..self.rank {
            target[a] += selector.get(a) as i64;
            if target[a] < 0 || target[a] >= extent {
                return Adjacency::Boundary;
            }
        }
        if selector.is_whole() {
            return Adjacency::Same(id);
        }
        let found = self.locate(node.level, target);
        let other = &self.nodes[found];

        if other.level < node.level {
            Adjacency::Coarser(found)
        } else if other.is_leaf() {
            Adjacency::Same(found)
        } else {
            let k = self.branch;
            let touching = other.children().filter(|&(slot, _)| {
                let c = self.slot_coords(slot);
                (0..self.rank).all(|a| match selector.get(a) {
                    1 => c[a] == 0,
                    -1 => c[a] == k - 1,
                    _ => true,
                })
            });
            Adjacency::Finer(touching.map(|(_, c)| c).collect())
        }
    }


    /**
     * Rasterize a rank-2 tree into an `n x n` image (first index fastest) of
     * the effective level of the node covering each pixel.
     */
    pub fn level_image(&self, n: usize) -> Result<Vec<u32>, Error> {
        if self.rank != 2 {
            return Err(Error::Unsupported(format!("level image of a rank-{} tree", self.rank)));
        }
        let image_space = IndexSpace::from_extent([n, n, 1]);
        let mut image = vec![0; n * n];

        for id in self.depth_first() {
            let node = &self.nodes[id];
            let extent = (self.branch as i64).pow(node.level);
            let p = node.position;
            let lo = |x: i64| (x * n as i64) / extent;
            let region = IndexSpace::from_corners(
                [lo(p[0]), lo(p[1]), 0],
                [lo(p[0] + 1), lo(p[1] + 1), 1]);

            for index in region.iter() {
                image[image_space.offset_of(index)] = node.effective_level();
            }
        }
        Ok(image)
    }




    // ========================================================================
    // Consistency
    // ========================================================================


    /**
     * Check every structural invariant of the tree: parentage, neighbor
     * symmetry, neighbor completeness, `level_adjust` only on leaves, and
     * that the node count matches the nodes reachable from the root.
     */
    pub fn validate(&self) -> Result<(), Error> {
        let reachable = self.depth_first();

        if reachable.len() != self.nodes.len() {
            return Err(Error::TreeInvariant(format!(
                "{} nodes reachable from the root but {} alive",
                reachable.len(), self.nodes.len())));
        }

        for &id in &reachable {
            let node = &self.nodes[id];

            if node.level_adjust != 0 && !node.is_leaf() {
                return Err(Error::TreeInvariant(format!("{} has children and level adjust {}", id, node.level_adjust)));
            }

            for (slot, child) in node.children() {
                let c = self.nodes.get(child).ok_or_else(|| {
                    Error::TreeInvariant(format!("{} has stale child {}", id, child))
                })?;
                let corner = self.slot_coords(slot);
                let expected: Vec<i64> = (0..3).map(|a| {
                    if a < self.rank { node.position[a] * self.branch as i64 + corner[a] as i64 } else { 0 }
                }).collect();

                if c.parent != Some(id) || c.level != node.level + 1 || c.position[..] != expected[..] {
                    return Err(Error::TreeInvariant(format!("{} in slot {} of {} has inconsistent parentage", child, slot, id)));
                }
            }

            for face in Face::all(self.rank) {
                let a = face.axis().index();
                let mut target = node.position;
                target[a] += if face.is_upper() { 1 } else { -1 };
                let extent = (self.branch as i64).pow(node.level);
                let inside = target[a] >= 0 && target[a] < extent;
                let expected = if inside {
                    Some(self.locate(node.level, target)).filter(|&n| self.nodes[n].level == node.level)
                } else {
                    None
                };

                if node.neighbor(face) != expected {
                    return Err(Error::TreeInvariant(format!(
                        "{} has neighbor {:?} across face {} but {:?} is adjacent",
                        id, node.neighbor(face), face.index(), expected)));
                }
                if let Some(neighbor) = node.neighbor(face) {
                    if self.nodes[neighbor].neighbor(face.opposite()) != Some(id) {
                        return Err(Error::TreeInvariant(format!(
                            "{} points to {} across face {} but not vice versa",
                            id, neighbor, face.index())));
                    }
                }
            }
        }
        Ok(())
    }
}

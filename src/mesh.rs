use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use log::{debug, info};
use rayon::prelude::*;
use crate::adjacency_list::AdjacencyList;
use crate::block::Block;
use crate::config::{Branching, Config, RefreshOptions};
use crate::criterion::Criterion;
use crate::error::Error;
use crate::exchange::{self, FacePlan};
use crate::face::Selector;
use crate::field::FieldDescriptor;
use crate::message::Transport;
use crate::node::NodeId;
use crate::resample::Resample;
use crate::tree::{Adjacency, Tree};




/**
 * A tree whose leaves carry field blocks, distributed over the execution
 * units of a transport group. Every unit holds an identical copy of the tree
 * and the owner table; each leaf's block lives only on its owner. Leaves are
 * dealt out in depth-first order in contiguous runs of nearly equal length.
 */
pub struct Mesh {
    tree: Tree,
    descr: Arc<FieldDescriptor>,
    block_size: [usize; 3],
    rank: usize,
    size: usize,
    owners: HashMap<NodeId, usize>,
    blocks: HashMap<NodeId, Block>,
}




// ============================================================================
impl Mesh {


    /**
     * Distribute the leaves of `tree` over `size` units and allocate the
     * blocks owned by `rank`. Every refined node of the tree must have all
     * of its children.
     */
    pub fn new(tree: Tree, descr: Arc<FieldDescriptor>, block_size: [usize; 3], rank: usize, size: usize) -> Result<Self, Error> {
        if rank >= size {
            return Err(Error::Config(format!("rank {} is outside a group of {}", rank, size)));
        }
        for id in tree.depth_first() {
            let node = tree.node(id).ok_or_else(|| Error::TreeInvariant(format!("{} is not in the tree", id)))?;

            if !node.is_leaf() && !node.has_all_children() {
                return Err(Error::Config(format!("{} is partially refined; a mesh needs full branching", id)));
            }
        }
        let leaves = tree.leaves();
        let owners = leaves.iter().enumerate().map(|(i, &id)| (id, i * size / leaves.len())).collect();

        let mut mesh = Self {
            tree,
            descr,
            block_size,
            rank,
            size,
            owners,
            blocks: HashMap::new(),
        };
        mesh.sync_blocks()?;
        Ok(mesh)
    }


    /**
     * Build the tree a configuration describes, refine it under `criterion`,
     * balance it, and distribute it.
     */
    pub fn from_config<C: Criterion + ?Sized>(config: &Config, criterion: &C, rank: usize, size: usize) -> Result<Self, Error> {
        let mut tree = config.tree()?;
        let depth = tree.refine(criterion, config.max_level, config.branching);
        let passes = tree.balance_to_fixed_point(config.branching);
        info!("refined to depth {} and balanced in {} passes: {} nodes", depth, passes, tree.node_count());

        let descr = Arc::new(config.descriptor()?);
        Self::new(tree, descr, config.block_size, rank, size)
    }


    pub fn tree(&self) -> &Tree {
        &self.tree
    }


    pub fn descriptor(&self) -> &Arc<FieldDescriptor> {
        &self.descr
    }


    pub fn block_size(&self) -> [usize; 3] {
        self.block_size
    }


    pub fn rank(&self) -> usize {
        self.rank
    }


    pub fn owner(&self, id: NodeId) -> Option<usize> {
        self.owners.get(&id).copied()
    }


    pub fn block(&self, id: NodeId) -> Option<&Block> {
        self.blocks.get(&id)
    }


    pub fn block_mut(&mut self, id: NodeId) -> Option<&mut Block> {
        self.blocks.get_mut(&id)
    }


    /**
     * The leaves owned by this unit, in depth-first order.
     */
    pub fn local_leaves(&self) -> Vec<NodeId> {
        self.tree.leaves().into_iter().filter(|id| self.owners.get(id) == Some(&self.rank)).collect()
    }


    /**
     * The ghost data flow of a refresh: an edge from each sending leaf to
     * each receiving leaf, labeled with the direction from the receiver
     * toward the sender. A pair of leaves adjacent in several admitted
     * directions has one edge per direction.
     */
    pub fn exchange_graph(&self, options: &RefreshOptions) -> AdjacencyList<NodeId, Selector> {
        let mut graph = AdjacencyList::new();

        for receiver in self.tree.leaves() {
            for selector in options.selectors(self.tree.rank()) {
                match self.tree.adjacency(receiver, selector) {
                    Adjacency::Boundary => {}
                    Adjacency::Same(sender) | Adjacency::Coarser(sender) => {
                        graph.insert(sender, receiver, selector)
                    }
                    Adjacency::Finer(senders) => {
                        for sender in senders {
                            graph.insert(sender, receiver, selector)
                        }
                    }
                }
            }
        }
        graph
    }


    /**
     * Refresh the ghost zones of every local block. Each pair of blocks
     * exchanges one message carrying the parts for all directions in which
     * they touch. Messages to other units are exchanged one peer at a time in
     * ascending peer order, the lower rank of each pair sending first.
     * Each block's face parts are unpacked before its edge parts, and those
     * before its corner parts. Returns the number of bytes packed on this
     * unit.
     */
    pub fn refresh<T: Transport + ?Sized>(&mut self, transport: &T, resampler: &dyn Resample, options: &RefreshOptions) -> Result<usize, Error> {
        if transport.rank() != self.rank || transport.size() != self.size {
            return Err(Error::Config(format!(
                "transport rank {} of {} does not match mesh rank {} of {}",
                transport.rank(), transport.size(), self.rank, self.size)));
        }
        let graph = self.exchange_graph(options);
        let local = self.local_leaves();

        let sends: Vec<(NodeId, NodeId, Vec<Selector>)> = local
            .iter()
            .flat_map(|&s| graph.outgoing_groups(&s).into_iter().map(move |(r, sels)| (s, r, sels)))
            .collect();

        let packed = sends
            .par_iter()
            .map(|(s, r, sels)| {
                let block = self.blocks.get(s).ok_or_else(|| Error::State(format!("no block for local leaf {}", s)))?;
                let mut bytes = Vec::new();

                for &selector in sels {
                    let plan = FacePlan::new(&self.tree, &self.descr, self.block_size, *r, *s, selector, options)?;
                    bytes.extend(plan.pack(&block.fields)?);
                }
                Ok((*s, *r, bytes))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let num_bytes = packed.iter().map(|(_, _, bytes)| bytes.len()).sum();
        let mut delivered: HashMap<(NodeId, NodeId), Vec<u8>> = HashMap::new();
        let mut outgoing: BTreeMap<usize, Vec<(u64, Vec<u8>)>> = BTreeMap::new();
        let mut incoming: BTreeMap<usize, Vec<(NodeId, NodeId)>> = BTreeMap::new();

        for (s, r, bytes) in packed {
            match self.owner(r) {
                Some(owner) if owner == self.rank => {
                    delivered.insert((s, r), bytes);
                }
                Some(owner) => {
                    outgoing.entry(owner).or_default().push((exchange::message_tag(s, r), bytes))
                }
                None => return Err(Error::State(format!("leaf {} has no owner", r))),
            }
        }
        for &r in &local {
            for (s, _) in graph.incoming_groups(&r) {
                match self.owner(s) {
                    Some(owner) if owner != self.rank => incoming.entry(owner).or_default().push((s, r)),
                    _ => {}
                }
            }
        }

        let mut peers: Vec<usize> = outgoing.keys().chain(incoming.keys()).copied().collect();
        peers.sort_unstable();
        peers.dedup();

        for peer in peers {
            let pairs = incoming.remove(&peer).unwrap_or_default();
            let tags: Vec<u64> = pairs.iter().map(|&(s, r)| exchange::message_tag(s, r)).collect();
            let received = exchange::transfer(transport, peer, outgoing.remove(&peer).unwrap_or_default(), &tags)?;
            debug!("rank {} exchanged {} messages with rank {}", self.rank, received.len() + tags.len(), peer);
            delivered.extend(pairs.into_iter().zip(received));
        }

        let Self { tree, descr, blocks, block_size, .. } = self;
        let (tree, descr, block_size) = (&*tree, &*descr, *block_size);

        blocks
            .par_iter_mut()
            .map(|(&r, block)| {
                let mut parts = Vec::new();

                for (s, sels) in graph.incoming_groups(&r) {
                    let bytes = delivered.get(&(s, r)).ok_or_else(|| {
                        Error::Transport(format!("no ghost data arrived from {} for {}", s, r))
                    })?;
                    let mut cursor = 0;

                    for selector in sels {
                        let plan = FacePlan::new(tree, descr, block_size, r, s, selector, options)?;
                        let len = plan.message_len(&block.fields)?;

                        if cursor + len > bytes.len() {
                            return Err(Error::LayoutMismatch(format!(
                                "message from {} to {} is {} bytes, too short for its parts", s, r, bytes.len())));
                        }
                        parts.push((plan, &bytes[cursor .. cursor + len]));
                        cursor += len;
                    }
                }

                // Faces first, then edges, then corners: a face part may carry
                // the sender's not yet refreshed transverse ghosts, which the
                // edge and corner parts then overwrite.
                parts.sort_by_key(|(plan, _)| Reverse(plan.selector().face_rank(tree.rank())));

                for (plan, bytes) in parts {
                    plan.unpack(&mut block.fields, bytes, resampler)?;
                }
                Ok(())
            })
            .collect::<Result<Vec<()>, Error>>()?;

        Ok(num_bytes)
    }


    /**
     * Balance the tree until no unit's pass changes anything, then create
     * blocks for new local leaves and drop those of refined nodes. New
     * leaves belong to the owner of their nearest owned ancestor, and start
     * zero filled. Returns the number of passes.
     */
    pub fn balance<T: Transport + ?Sized>(&mut self, transport: &T, mode: Branching) -> Result<usize, Error> {
        if mode != Branching::Full {
            return Err(Error::Config("a mesh is balanced with full branching only".to_string()));
        }
        let mut passes = 0;

        loop {
            let changed = self.tree.balance(mode);
            passes += 1;

            if !transport.all_reduce_or(changed)? {
                break;
            }
        }
        debug!("rank {} balanced the mesh in {} passes", self.rank, passes);
        self.sync_blocks()?;
        Ok(passes)
    }


    fn sync_blocks(&mut self) -> Result<(), Error> {
        let leaves = self.tree.leaves();
        let mut owners = HashMap::with_capacity(leaves.len());

        for &leaf in &leaves {
            let mut current = Some(leaf);
            let mut owner = None;

            while let Some(id) = current {
                owner = self.owners.get(&id).copied();
                if owner.is_some() {
                    break;
                }
                current = self.tree.node(id).and_then(|node| node.parent());
            }
            owners.insert(leaf, owner.unwrap_or(0));
        }
        self.owners = owners;

        let owners = &self.owners;
        let rank = self.rank;
        self.blocks.retain(|id, _| owners.get(id) == Some(&rank));

        for leaf in leaves {
            if self.owners.get(&leaf) == Some(&self.rank) && !self.blocks.contains_key(&leaf) {
                self.blocks.insert(leaf, Block::new(leaf, self.descr.clone(), self.block_size)?);
            }
        }
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::sync::Arc;
    use std::thread;
    use super::Mesh;
    use crate::config::{Branching, RefreshOptions};
    use crate::criterion::LevelArray;
    use crate::field::FieldDescriptor;
    use crate::message::ChannelTransport;
    use crate::node::NodeId;
    use crate::resample::PiecewiseConstant;
    use crate::tree::{Adjacency, Tree};

    const N: usize = 4;

    /**
     * Three level-1 leaves and one level-1 quadrant split into four level-2
     * leaves.
     */
    fn two_level_tree() -> Tree {
        let mut tree = Tree::new(2, 2).unwrap();
        let levels = LevelArray::from_fn([4, 4, 1], |[i, j, _]| if i >= 2 && j >= 2 { 2 } else { 1 });
        tree.refine(&levels, 2, Branching::Full);
        tree
    }

    fn descriptor() -> Arc<FieldDescriptor> {
        let mut descr = FieldDescriptor::new();
        descr.insert_field("phi").unwrap();
        Arc::new(descr)
    }

    /**
     * A linear function of the cell center, sampled at a level.
     */
    fn phi(level: u32, global: [i64; 3]) -> f64 {
        let resolution = (N << level) as f64;
        (global[0] as f64 + 0.5) / resolution + 2.0 * (global[1] as f64 + 0.5) / resolution
    }

    fn global(mesh: &Mesh, id: NodeId, local: [i64; 3]) -> (u32, [i64; 3]) {
        let node = mesh.tree().node(id).unwrap();
        let p = node.position();
        (node.level(), [p[0] * N as i64 + local[0], p[1] * N as i64 + local[1], 0])
    }

    fn fill(mesh: &mut Mesh) {
        for id in mesh.local_leaves() {
            for j in 0..N as i64 {
                for i in 0..N as i64 {
                    let (level, g) = global(mesh, id, [i, j, 0]);
                    mesh.block_mut(id).unwrap().fields.set_value(0, [i, j, 0], phi(level, g)).unwrap();
                }
            }
        }
    }

    fn mesh(rank: usize, size: usize) -> Mesh {
        let mut mesh = Mesh::new(two_level_tree(), descriptor(), [N, N, 1], rank, size).unwrap();
        fill(&mut mesh);
        mesh
    }

    fn local_bytes(mesh: &Mesh) -> Vec<(NodeId, Vec<u8>)> {
        mesh.local_leaves().into_iter().map(|id| (id, mesh.block(id).unwrap().fields.field_bytes(0).unwrap().to_vec())).collect()
    }

    #[test]
    fn leaves_are_dealt_out_in_contiguous_runs() {
        let mesh = Mesh::new(two_level_tree(), descriptor(), [N, N, 1], 1, 3).unwrap();
        let owners: Vec<_> = mesh.tree().leaves().into_iter().map(|id| mesh.owner(id).unwrap()).collect();
        assert_eq!(owners, vec![0, 0, 0, 1, 1, 2, 2]);
        assert_eq!(mesh.local_leaves().len(), 2);
    }

    #[test]
    fn exchange_graph_links_every_face_neighbor() {
        let mesh = mesh(0, 1);
        let graph = mesh.exchange_graph(&RefreshOptions::faces_only());
        // 2 coarse-coarse faces (both ways), 2 coarse-fine faces with 2 fine
        // blocks each (both ways), and 4 fine-fine faces (both ways).
        assert_eq!(graph.len(), 2 * 2 + 2 * 2 * 2 + 4 * 2);
    }

    /**
     * Check every ghost cell next to a neighbor in an admitted direction,
     * leaving out the transverse ghost extent of faces and edges.
     */
    fn assert_ghosts_follow_phi(mesh: &Mesh, options: &RefreshOptions) {
        for id in mesh.local_leaves() {
            for selector in options.selectors(2) {
                let adjacency = mesh.tree().adjacency(id, selector);
                if adjacency == Adjacency::Boundary {
                    continue;
                }
                let span = |a: usize| match selector.get(a) {
                    -1 => vec![-1],
                    1 => vec![N as i64],
                    _ => (0..N as i64).collect(),
                };
                for &j in &span(1) {
                    for &i in &span(0) {
                        let local = [i, j, 0];
                        let (level, g) = global(mesh, id, local);
                        let expected = match adjacency {
                            Adjacency::Coarser(_) => phi(level - 1, [g[0].div_euclid(2), g[1].div_euclid(2), 0]),
                            _ => phi(level, g),
                        };
                        let actual = mesh.block(id).unwrap().fields.value(0, local).unwrap();
                        assert!((actual - expected).abs() < 1e-12, "{} {:?} {:?}: {} != {}", id, selector, local, actual, expected);
                    }
                }
            }
        }
    }

    #[test]
    fn ghost_values_follow_the_sampled_function() {
        let mut mesh = mesh(0, 1);
        let transport = ChannelTransport::group(1).pop().unwrap();
        let options = RefreshOptions::faces_only();
        mesh.refresh(&transport, &PiecewiseConstant, &options).unwrap();
        assert_ghosts_follow_phi(&mesh, &options);
    }

    #[test]
    fn corner_ghosts_win_over_stale_transverse_face_ghosts() {
        let mut mesh = mesh(0, 1);
        let transport = ChannelTransport::group(1).pop().unwrap();
        let options = RefreshOptions::default();
        mesh.refresh(&transport, &PiecewiseConstant, &options).unwrap();
        assert_ghosts_follow_phi(&mesh, &options);

        // The level-2 leaf at (2, 2) has a same-level neighbor across its
        // upper x face and a coarser one across its lower-right corner.
        let fine = mesh.tree().locate(2, [2, 2, 0]);
        let value = mesh.block(fine).unwrap().fields.value(0, [4, -1, 0]).unwrap();
        assert!((value - phi(1, [6, 3, 0])).abs() < 1e-12);
    }

    #[test]
    fn distributed_refresh_matches_serial_refresh() {
        let options = RefreshOptions::default();
        let mut serial = mesh(0, 1);
        serial.refresh(&ChannelTransport::group(1).pop().unwrap(), &PiecewiseConstant, &options).unwrap();
        let expected = local_bytes(&serial);

        let handles: Vec<_> = ChannelTransport::group(3).into_iter().enumerate().map(|(rank, transport)| {
            thread::spawn(move || {
                let mut mesh = mesh(rank, 3);
                mesh.refresh(&transport, &PiecewiseConstant, &options).unwrap();
                local_bytes(&mesh)
            })
        }).collect();

        let mut distributed: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        distributed.sort_by_key(|(id, _)| serial.tree().leaves().iter().position(|l| l == id));
        assert_eq!(distributed, expected);
    }

    #[test]
    fn balance_agrees_across_units() {
        let handles: Vec<_> = ChannelTransport::group(2).into_iter().enumerate().map(|(rank, transport)| {
            thread::spawn(move || {
                let mut tree = Tree::new(2, 2).unwrap();
                let levels = LevelArray::from_fn([8, 8, 1], |[i, j, _]| if i == 3 && j == 3 { 3 } else { 0 });
                tree.refine(&levels, 3, Branching::Full);
                let before = tree.node_count();

                let mut mesh = Mesh::new(tree, descriptor(), [2, 2, 1], rank, 2).unwrap();
                let passes = mesh.balance(&transport, Branching::Full).unwrap();
                let leaves = mesh.tree().leaves();
                assert!(mesh.local_leaves().iter().all(|id| mesh.block(*id).is_some()));
                assert!(leaves.iter().all(|id| mesh.owner(*id).is_some()));
                (before, mesh.tree().node_count(), passes)
            })
        }).collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0], results[1]);
        assert!(results[0].1 > results[0].0);
    }

    #[test]
    fn partially_refined_trees_are_rejected() {
        let mut tree = Tree::new(2, 2).unwrap();
        let levels = LevelArray::from_fn([4, 4, 1], |[i, j, _]| if i >= 2 && j >= 2 { 1 } else { 0 });
        tree.refine(&levels, 1, Branching::Partial);
        assert!(Mesh::new(tree, descriptor(), [N, N, 1], 0, 1).is_err());
    }
}

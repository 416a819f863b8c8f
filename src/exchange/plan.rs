use crate::config::RefreshOptions;
use crate::error::Error;
use crate::face::Selector;
use crate::field::{FieldDescriptor, FieldStore};
use crate::index_space::IndexSpace;
use crate::node::NodeId;
use crate::resample::Resample;
use crate::tree::{Adjacency, Tree};
use super::face::{extract, insert, FieldFace};




/**
 * How packed cells are turned into the receiver's ghost values.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resampling {
    /// The sender is one level coarser: its cells are prolonged.
    Prolong,
    /// The sender is one level finer: its cells are restricted.
    Restrict,
}




/**
 * The cross-level transfer of one field. `source` is in the sender's local
 * coordinates; `staging` and `target` are in the receiver's. Resampling the
 * source yields values covering `staging`, of which the `target` part is
 * written into the receiver's ghost zones.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct FieldPlan {
    pub field: usize,
    pub source: IndexSpace,
    pub staging: IndexSpace,
    pub target: IndexSpace,
    pub resampling: Resampling,
}




#[derive(Clone, Debug)]
enum Route {
    Same { send: FieldFace, recv: FieldFace },
    Cross { ratio: [usize; 3], fields: Vec<FieldPlan> },
}




/**
 * Everything one block sends to fill the ghost zones of another, in one
 * direction. A plan is computed identically on the sending and the receiving
 * side from the tree and the field layout, so the packed bytes carry no
 * header.
 */
#[derive(Clone, Debug)]
pub struct FacePlan {
    receiver: NodeId,
    sender: NodeId,
    selector: Selector,
    route: Route,
}




// ============================================================================
impl FacePlan {


    /**
     * Plan the transfer into `receiver`'s ghost zones from `sender`, which
     * must cover part of the region next to `receiver` in the direction of
     * `selector`. Blocks have `block_size` cells and share the layout of
     * `descr`. Blocks more than one level apart, face-centered fields across
     * levels, and block sizes not divisible by the branching factor are
     * layout mismatches.
     */
    pub fn new(
        tree: &Tree,
        descr: &FieldDescriptor,
        block_size: [usize; 3],
        receiver: NodeId,
        sender: NodeId,
        selector: Selector,
        options: &RefreshOptions) -> Result<Self, Error>
    {
        let r = node(tree, receiver)?;
        let s = node(tree, sender)?;
        let adjacent = match tree.adjacency(receiver, selector) {
            Adjacency::Boundary => false,
            Adjacency::Same(id) | Adjacency::Coarser(id) => id == sender,
            Adjacency::Finer(ids) => ids.contains(&sender),
        };
        if !adjacent {
            return Err(Error::LayoutMismatch(format!(
                "{} does not border {} in direction {:?}", sender, receiver, selector)));
        }
        if r.level() == s.level() {
            let send = FieldFace::new(selector.opposite(), options.ghost_axes);
            let recv = FieldFace::new(selector, options.ghost_axes);
            return Ok(Self { receiver, sender, selector, route: Route::Same { send, recv } });
        }
        if r.level().abs_diff(s.level()) > 1 {
            return Err(Error::LayoutMismatch(format!(
                "{} at level {} and {} at level {} are more than one level apart",
                receiver, r.level(), sender, s.level())));
        }

        let ratio = tree.ratio();
        let n = [block_size[0] as i64, block_size[1] as i64, block_size[2] as i64];

        for a in 0..3 {
            if n[a] % ratio[a] != 0 {
                return Err(Error::LayoutMismatch(format!(
                    "block size {:?} is not divisible by the refinement ratio {:?}", block_size, ratio)));
            }
        }
        let sender_is_coarser = s.level() < r.level();
        let pr = r.position();
        let ps = s.position();
        let receiver_origin = [-pr[0] * n[0], -pr[1] * n[1], -pr[2] * n[2]];
        let sender_origin = [-ps[0] * n[0], -ps[1] * n[1], -ps[2] * n[2]];

        let footprint = s.region(block_size);
        let footprint = if sender_is_coarser { footprint.scale(ratio) } else { footprint.coarsen(ratio) };
        let mut fields = Vec::new();

        for id in 0..descr.field_count() {
            let field = &descr.fields()[id];

            if !field.refresh {
                continue;
            }
            if !field.is_cell_centered() {
                return Err(Error::LayoutMismatch(format!(
                    "face-centered field '{}' cannot be exchanged across levels", field.name)));
            }
            let mut start = [0; 3];
            let mut end = [0; 3];

            for a in 0..3 {
                let g = field.ghosts[a] as i64;
                let lo = pr[a] * n[a];
                let hi = lo + n[a];

                let (x0, x1) = match selector.get(a) {
                    -1 => (lo - g, lo),
                    1 => (hi, hi + g),
                    _ if options.ghost_axes[a] => (lo - g, hi + g),
                    _ => (lo, hi),
                };
                start[a] = x0;
                end[a] = x1;
            }
            let target = IndexSpace::from_corners(start, end).intersect(&footprint);

            if target.is_empty() {
                continue;
            }
            let (source, staging, resampling) = if sender_is_coarser {
                let source = target.coarsen(ratio);
                let staging = source.scale(ratio);
                (source, staging, Resampling::Prolong)
            } else {
                (target.scale(ratio), target.clone(), Resampling::Restrict)
            };
            fields.push(FieldPlan {
                field: id,
                source: source.translate(sender_origin),
                staging: staging.translate(receiver_origin),
                target: target.translate(receiver_origin),
                resampling,
            });
        }
        let ratio = [ratio[0] as usize, ratio[1] as usize, ratio[2] as usize];
        Ok(Self { receiver, sender, selector, route: Route::Cross { ratio, fields } })
    }


    pub fn receiver(&self) -> NodeId {
        self.receiver
    }


    pub fn sender(&self) -> NodeId {
        self.sender
    }


    /**
     * The direction from the receiver toward the sender.
     */
    pub fn selector(&self) -> Selector {
        self.selector
    }


    /**
     * Whether the two blocks are at different levels.
     */
    pub fn is_resampled(&self) -> bool {
        matches!(self.route, Route::Cross { .. })
    }


    /**
     * The per-field cross-level transfers; empty for same-level plans.
     */
    pub fn field_plans(&self) -> &[FieldPlan] {
        match &self.route {
            Route::Same { .. } => &[],
            Route::Cross { fields, .. } => fields,
        }
    }


    /**
     * The number of bytes `pack` produces, computed from any store with the
     * shared layout.
     */
    pub fn message_len(&self, store: &FieldStore) -> Result<usize, Error> {
        let descr = store.descriptor();

        match &self.route {
            Route::Same { send, .. } => {
                let mut len = 0;
                for id in send.field_ids(descr) {
                    len += send.load_space(store, id)?.len() * precision_size(descr, id)?;
                }
                Ok(len)
            }
            Route::Cross { fields, .. } => {
                let mut len = 0;
                for plan in fields {
                    len += plan.source.len() * precision_size(descr, plan.field)?;
                }
                Ok(len)
            }
        }
    }


    /**
     * Pack the sender's cells. `store` must belong to the sender and have
     * ghost zones allocated.
     */
    pub fn pack(&self, store: &FieldStore) -> Result<Vec<u8>, Error> {
        match &self.route {
            Route::Same { send, .. } => send.pack(store),
            Route::Cross { fields, .. } => {
                let mut bytes = Vec::new();
                for plan in fields {
                    bytes.extend(extract(store, plan.field, &plan.source)?);
                }
                Ok(bytes)
            }
        }
    }


    /**
     * Write packed bytes into the receiver's ghost zones, resampling across
     * levels. `store` must belong to the receiver and have ghost zones
     * allocated.
     */
    pub fn unpack(&self, store: &mut FieldStore, bytes: &[u8], resampler: &dyn Resample) -> Result<(), Error> {
        let (ratio, fields) = match &self.route {
            Route::Same { recv, .. } => return recv.unpack(store, bytes).map(|_| ()),
            Route::Cross { ratio, fields } => (*ratio, fields),
        };
        let expected = self.message_len(store)?;

        if bytes.len() != expected {
            return Err(Error::LayoutMismatch(format!(
                "message from {} to {} has {} bytes, expected {}",
                self.sender, self.receiver, bytes.len(), expected)));
        }
        let mut cursor = 0;

        for plan in fields {
            let precision = store.descriptor().fields()[plan.field].precision;
            let len = plan.source.len() * precision.size();
            let source = &bytes[cursor .. cursor + len];
            let mut staging = vec![0; plan.staging.len() * precision.size()];
            cursor += len;

            match plan.resampling {
                Resampling::Prolong => {
                    resampler.prolong(precision, &mut staging, plan.staging.dim(), source, plan.source.dim(), ratio)?
                }
                Resampling::Restrict => {
                    resampler.restrict(precision, &mut staging, plan.staging.dim(), source, plan.source.dim(), ratio)?
                }
            }
            let region = plan.target.memory_region_in(&plan.staging);
            let cropped: Vec<u8> = region.iter_slice(&staging, precision.size()).flatten().copied().collect();
            insert(store, plan.field, &plan.target, &cropped)?;
        }
        Ok(())
    }
}




fn node(tree: &Tree, id: NodeId) -> Result<&crate::node::Node, Error> {
    tree.node(id).ok_or_else(|| Error::TreeInvariant(format!("{} is not in the tree", id)))
}




fn precision_size(descr: &FieldDescriptor, id: usize) -> Result<usize, Error> {
    descr.field(id)
        .map(|f| f.precision.size())
        .ok_or_else(|| Error::Config(format!("no field with id {}", id)))
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::sync::Arc;
    use super::{FacePlan, Resampling};
    use crate::config::{Branching, RefreshOptions};
    use crate::criterion::{LevelArray, Predicate};
    use crate::error::Error;
    use crate::face::Selector;
    use crate::field::{FieldDescriptor, FieldStore};
    use crate::index_space::{range3d, IndexSpace};
    use crate::resample::PiecewiseConstant;
    use crate::tree::{Adjacency, Tree};

    /**
     * A rank-2 tree whose root is split once, and whose lower-left child is
     * split again.
     */
    fn two_level_tree() -> Tree {
        let mut tree = Tree::new(2, 2).unwrap();
        let criterion = Predicate::new(range3d(0..4, 0..4, 0..1), |region: &IndexSpace, level: u32| {
            level == 0 || (level == 1 && region.start() == [0, 0, 0])
        });
        tree.refine(&criterion, 2, Branching::Full);
        tree
    }

    fn store(descr: &Arc<FieldDescriptor>) -> FieldStore {
        let mut store = FieldStore::new(descr.clone(), [4, 4, 1]);
        store.allocate().unwrap();
        store.allocate_ghosts().unwrap();
        store
    }

    fn descriptor() -> Arc<FieldDescriptor> {
        let mut descr = FieldDescriptor::new();
        let id = descr.insert_field("density").unwrap();
        descr.set_ghosts(id, [1, 1, 0]).unwrap();
        Arc::new(descr)
    }

    #[test]
    fn coarse_sender_is_prolonged_into_fine_ghosts() {
        let tree = two_level_tree();
        let root = tree.root();
        let coarse = tree.node(root).unwrap().child(1).unwrap();
        let fine = tree.node(tree.node(root).unwrap().child(0).unwrap()).unwrap().child(1).unwrap();
        assert_eq!(tree.adjacency(fine, Selector::new(1, 0, 0)), Adjacency::Coarser(coarse));

        let descr = descriptor();
        let plan = FacePlan::new(&tree, &descr, [4, 4, 1], fine, coarse, Selector::new(1, 0, 0), &RefreshOptions::faces_only()).unwrap();
        assert!(plan.is_resampled());
        assert_eq!(plan.field_plans().len(), 1);
        let field = &plan.field_plans()[0];
        assert_eq!(field.resampling, Resampling::Prolong);
        assert_eq!(field.target, range3d(4..5, 0..4, 0..1));
        assert_eq!(field.source, range3d(0..1, 0..2, 0..1));
        assert_eq!(field.staging, range3d(4..6, 0..4, 0..1));

        let mut sender = store(&descr);
        for j in 0..4 {
            sender.set_value(0, [0, j, 0], 1.0 + j as f64).unwrap();
        }
        let mut receiver = store(&descr);
        let bytes = plan.pack(&sender).unwrap();
        assert_eq!(bytes.len(), plan.message_len(&receiver).unwrap());
        plan.unpack(&mut receiver, &bytes, &PiecewiseConstant).unwrap();

        let ghosts: Vec<f64> = (0..4).map(|j| receiver.value(0, [4, j, 0]).unwrap()).collect();
        assert_eq!(ghosts, vec![1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn fine_senders_are_restricted_into_coarse_ghosts() {
        let tree = two_level_tree();
        let root = tree.root();
        let coarse = tree.node(root).unwrap().child(1).unwrap();
        let parent = tree.node(root).unwrap().child(0).unwrap();
        let upper = tree.node(parent).unwrap().child(3).unwrap();

        let descr = descriptor();
        let plan = FacePlan::new(&tree, &descr, [4, 4, 1], coarse, upper, Selector::new(-1, 0, 0), &RefreshOptions::faces_only()).unwrap();
        let field = &plan.field_plans()[0];
        assert_eq!(field.resampling, Resampling::Restrict);
        assert_eq!(field.target, range3d(-1..0, 2..4, 0..1));
        assert_eq!(field.source, range3d(2..4, 0..4, 0..1));

        let mut sender = store(&descr);
        for j in 0..4 {
            for i in 2..4 {
                sender.set_value(0, [i, j, 0], (i + j) as f64).unwrap();
            }
        }
        let mut receiver = store(&descr);
        plan.unpack(&mut receiver, &plan.pack(&sender).unwrap(), &PiecewiseConstant).unwrap();
        assert_eq!(receiver.value(0, [-1, 2, 0]).unwrap(), 3.0);
        assert_eq!(receiver.value(0, [-1, 3, 0]).unwrap(), 5.0);
        assert_eq!(receiver.value(0, [-1, 1, 0]).unwrap(), 0.0);
    }

    #[test]
    fn non_adjacent_blocks_cannot_be_planned() {
        let tree = two_level_tree();
        let root = tree.root();
        let a = tree.node(root).unwrap().child(1).unwrap();
        let b = tree.node(root).unwrap().child(2).unwrap();
        let result = FacePlan::new(&tree, &descriptor(), [4, 4, 1], a, b, Selector::new(1, 0, 0), &RefreshOptions::default());
        assert!(matches!(result, Err(Error::LayoutMismatch(_))));
    }

    #[test]
    fn blocks_two_levels_apart_are_a_layout_mismatch() {
        let mut tree = Tree::new(2, 2).unwrap();
        let levels = LevelArray::from_fn([16, 16, 1], |[i, j, _]| if i == 7 && j == 7 { 3 } else { 0 });
        tree.refine(&levels, 8, Branching::Full);

        let fine = tree.locate(3, [3, 3, 0]);
        let coarse = tree.locate(1, [1, 0, 0]);
        assert_eq!(tree.node(fine).unwrap().level(), 3);
        assert_eq!(tree.adjacency(fine, Selector::new(1, 0, 0)), Adjacency::Coarser(coarse));

        let result = FacePlan::new(&tree, &descriptor(), [4, 4, 1], fine, coarse, Selector::new(1, 0, 0), &RefreshOptions::faces_only());
        assert!(matches!(result, Err(Error::LayoutMismatch(_))));
    }

    #[test]
    fn block_size_must_divide_by_the_refinement_ratio_across_levels() {
        let tree = two_level_tree();
        let root = tree.root();
        let coarse = tree.node(root).unwrap().child(1).unwrap();
        let fine = tree.node(tree.node(root).unwrap().child(0).unwrap()).unwrap().child(1).unwrap();
        let descr = descriptor();
        let options = RefreshOptions::faces_only();

        let result = FacePlan::new(&tree, &descr, [3, 4, 1], fine, coarse, Selector::new(1, 0, 0), &options);
        assert!(matches!(result, Err(Error::LayoutMismatch(_))));

        let sibling = tree.node(tree.node(root).unwrap().child(0).unwrap()).unwrap().child(0).unwrap();
        assert!(FacePlan::new(&tree, &descr, [3, 4, 1], sibling, fine, Selector::new(1, 0, 0), &options).is_ok());
    }

    #[test]
    fn face_centered_fields_are_not_exchanged_across_levels() {
        let tree = two_level_tree();
        let root = tree.root();
        let coarse = tree.node(root).unwrap().child(1).unwrap();
        let fine = tree.node(tree.node(root).unwrap().child(0).unwrap()).unwrap().child(1).unwrap();

        let mut descr = FieldDescriptor::new();
        let id = descr.insert_field("velocity").unwrap();
        descr.set_centering(id, [false, true, true]).unwrap();
        let descr = Arc::new(descr);

        let result = FacePlan::new(&tree, &descr, [4, 4, 1], fine, coarse, Selector::new(1, 0, 0), &RefreshOptions::faces_only());
        assert!(matches!(result, Err(Error::LayoutMismatch(_))));

        let sibling = tree.node(tree.node(root).unwrap().child(0).unwrap()).unwrap().child(0).unwrap();
        assert!(FacePlan::new(&tree, &descr, [4, 4, 1], sibling, fine, Selector::new(1, 0, 0), &RefreshOptions::faces_only()).is_ok());
    }

    #[test]
    fn deleted_nodes_are_a_tree_invariant_error() {
        let mut tree = two_level_tree();
        let root = tree.root();
        let parent = tree.node(root).unwrap().child(0).unwrap();
        let fine = tree.node(parent).unwrap().child(1).unwrap();
        let coarse = tree.node(root).unwrap().child(1).unwrap();
        tree.delete(parent).unwrap();

        let descr = descriptor();
        let options = RefreshOptions::faces_only();
        let into_deleted = FacePlan::new(&tree, &descr, [4, 4, 1], fine, coarse, Selector::new(1, 0, 0), &options);
        let from_deleted = FacePlan::new(&tree, &descr, [4, 4, 1], coarse, fine, Selector::new(-1, 0, 0), &options);
        assert!(matches!(into_deleted, Err(Error::TreeInvariant(_))));
        assert!(matches!(from_deleted, Err(Error::TreeInvariant(_))));
    }
}

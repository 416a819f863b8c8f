//! Ghost zone exchange between neighboring blocks: packing boundary cells,
//! moving them between execution units in an order that cannot deadlock,
//! resampling across refinement levels, and unpacking into ghost zones.

pub mod face;
pub mod plan;

use log::debug;
use crate::block::Block;
use crate::config::RefreshOptions;
use crate::error::Error;
use crate::face::Selector;
use crate::message::Transport;
use crate::node::NodeId;
use crate::resample::Resample;
use crate::tree::Tree;

pub use face::FieldFace;
pub use plan::{FacePlan, FieldPlan, Resampling};




/**
 * Which half of a pairwise exchange an execution unit does first.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferOrder {
    SendFirst,
    ReceiveFirst,
}




/**
 * The lower rank of a pair sends first and the higher rank receives first.
 * Every pair agrees on the order from the rank values alone.
 */
pub fn transfer_order(rank: usize, peer: usize) -> TransferOrder {
    if rank <= peer {
        TransferOrder::SendFirst
    } else {
        TransferOrder::ReceiveFirst
    }
}




/**
 * The tag of the message carrying ghost data from `sender` to `receiver`.
 */
pub fn message_tag(sender: NodeId, receiver: NodeId) -> u64 {
    ((sender.index() as u64) << 32) | receiver.index() as u64
}




/**
 * Exchange a batch of messages with one peer in the agreed order. Outgoing
 * messages are `(tag, bytes)`; the received messages are returned in the
 * order of `incoming`.
 */
pub fn transfer<T: Transport + ?Sized>(
    transport: &T,
    peer: usize,
    outgoing: Vec<(u64, Vec<u8>)>,
    incoming: &[u64]) -> Result<Vec<Vec<u8>>, Error>
{
    let receive = |transport: &T| -> Result<Vec<Vec<u8>>, Error> {
        let requests: Vec<_> = incoming.iter().map(|&tag| transport.recv_begin(peer, tag)).collect();
        requests.into_iter().map(|r| transport.recv_end(r)).collect()
    };
    let send = |transport: &T, outgoing: Vec<(u64, Vec<u8>)>| -> Result<(), Error> {
        let requests = outgoing
            .into_iter()
            .map(|(tag, bytes)| transport.send_begin(peer, tag, bytes))
            .collect::<Result<Vec<_>, _>>()?;
        requests.into_iter().try_for_each(|r| transport.send_end(r))
    };

    match transfer_order(transport.rank(), peer) {
        TransferOrder::SendFirst => {
            send(transport, outgoing)?;
            receive(transport)
        }
        TransferOrder::ReceiveFirst => {
            let received = receive(transport)?;
            send(transport, outgoing)?;
            Ok(received)
        }
    }
}




/**
 * Refresh the ghost zones of two neighboring blocks from each other's
 * boundary cells. `selector` points from `a` toward `b`. Directions the
 * options do not admit are skipped. Ghost zones are allocated first on
 * either block that lacks them. Returns the number of bytes moved.
 */
pub fn refresh(
    tree: &Tree,
    a: &mut Block,
    b: &mut Block,
    selector: Selector,
    options: &RefreshOptions,
    resampler: &dyn Resample) -> Result<usize, Error>
{
    if !options.admits(tree.rank(), selector) {
        return Ok(0);
    }
    face::ensure_ghosts(&mut a.fields, "refresh")?;
    face::ensure_ghosts(&mut b.fields, "refresh")?;

    let descr = a.fields.descriptor().clone();
    let into_b = FacePlan::new(tree, &descr, b.fields.size(), b.node, a.node, selector.opposite(), options)?;
    let into_a = FacePlan::new(tree, &descr, a.fields.size(), a.node, b.node, selector, options)?;

    let ab = into_b.pack(&a.fields)?;
    let ba = into_a.pack(&b.fields)?;
    into_b.unpack(&mut b.fields, &ab, resampler)?;
    into_a.unpack(&mut a.fields, &ba, resampler)?;

    debug!("refreshed {} <-> {} in direction {:?}: {} bytes", a.node, b.node, selector, ab.len() + ba.len());
    Ok(ab.len() + ba.len())
}




/**
 * Refresh a local block against a neighbor owned by another execution unit,
 * which must make the mirrored call with the opposite selector. Returns the
 * number of bytes moved.
 */
#[allow(clippy::too_many_arguments)]
pub fn refresh_remote<T: Transport + ?Sized>(
    tree: &Tree,
    local: &mut Block,
    remote: NodeId,
    selector: Selector,
    options: &RefreshOptions,
    resampler: &dyn Resample,
    transport: &T,
    peer: usize) -> Result<usize, Error>
{
    if !options.admits(tree.rank(), selector) {
        return Ok(0);
    }
    face::ensure_ghosts(&mut local.fields, "refresh")?;

    let descr = local.fields.descriptor().clone();
    let size = local.fields.size();
    let outgoing = FacePlan::new(tree, &descr, size, remote, local.node, selector.opposite(), options)?;
    let incoming = FacePlan::new(tree, &descr, size, local.node, remote, selector, options)?;

    let bytes = outgoing.pack(&local.fields)?;
    let sent = bytes.len();
    let mut received = transfer(transport, peer, vec![(message_tag(local.node, remote), bytes)], &[message_tag(remote, local.node)])?;
    let bytes = received.pop().ok_or_else(|| Error::Transport(format!("no message from {} on rank {}", remote, peer)))?;
    incoming.unpack(&mut local.fields, &bytes, resampler)?;

    Ok(sent + bytes.len())
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::sync::Arc;
    use std::thread;
    use super::{message_tag, refresh, refresh_remote, transfer_order, TransferOrder};
    use crate::block::Block;
    use crate::config::{Branching, RefreshOptions};
    use crate::criterion::LevelArray;
    use crate::face::Selector;
    use crate::field::{FieldDescriptor, Precision};
    use crate::message::{ChannelTransport, Transport};
    use crate::node::NodeId;
    use crate::resample::{Linear, PiecewiseConstant};
    use crate::tree::Tree;

    fn uniform_tree(rank: usize, level: u32) -> Tree {
        let n = 1 << level;
        let extent = [n, if rank > 1 { n } else { 1 }, if rank > 2 { n } else { 1 }];
        let mut tree = Tree::new(rank, 2).unwrap();
        tree.refine(&LevelArray::from_fn(extent, |_| level), level, Branching::Full);
        tree
    }

    fn descriptor(precision: Precision) -> Arc<FieldDescriptor> {
        let mut descr = FieldDescriptor::new();
        let a = descr.insert_field("density").unwrap();
        let b = descr.insert_field("energy").unwrap();
        descr.set_precision(a, precision).unwrap();
        descr.set_ghosts(b, [2, 2, 2]).unwrap();
        descr.set_alignment(16).unwrap();
        Arc::new(descr)
    }

    fn filled_block(node: NodeId, descr: &Arc<FieldDescriptor>, size: [usize; 3], seed: f64) -> Block {
        let mut block = Block::new(node, descr.clone(), size).unwrap();
        for id in 0..descr.field_count() {
            for k in 0..size[2] as i64 {
                for j in 0..size[1] as i64 {
                    for i in 0..size[0] as i64 {
                        let x = seed + id as f64 * 1000.0 + (i + 7 * j + 49 * k) as f64 * 0.125;
                        block.fields.set_value(id, [i, j, k], x).unwrap();
                    }
                }
            }
        }
        block
    }

    fn leaf_at(tree: &Tree, position: [i64; 3]) -> NodeId {
        tree.leaves().into_iter().find(|&id| tree.node(id).unwrap().position() == position).unwrap()
    }

    #[test]
    fn lower_rank_sends_first() {
        let leaves = uniform_tree(1, 1).leaves();
        assert_eq!(transfer_order(0, 3), TransferOrder::SendFirst);
        assert_eq!(transfer_order(3, 0), TransferOrder::ReceiveFirst);
        assert_ne!(message_tag(leaves[0], leaves[1]), message_tag(leaves[1], leaves[0]));
    }

    #[test]
    fn same_level_refresh_round_trips_bit_for_bit() {
        let tree = uniform_tree(3, 1);
        let descr = descriptor(Precision::Single);
        let size = [4, 3, 2];
        let options = RefreshOptions::faces_only();
        let mut a = filled_block(leaf_at(&tree, [0, 0, 0]), &descr, size, 1.0);
        let mut b = filled_block(leaf_at(&tree, [1, 0, 0]), &descr, size, 2.0);

        let moved = refresh(&tree, &mut a, &mut b, Selector::new(1, 0, 0), &options, &PiecewiseConstant).unwrap();
        assert_eq!(moved, 2 * (3 * 2 * 4 + 2 * 3 * 2 * 8));

        for id in 0..2 {
            let g = descr.field(id).unwrap().ghosts[0] as i64;
            for k in 0..2 {
                for j in 0..3 {
                    for x in 0..g {
                        let a_ghost = a.fields.value(id, [4 + x, j, k]).unwrap();
                        let b_inner = b.fields.value(id, [x, j, k]).unwrap();
                        let b_ghost = b.fields.value(id, [-1 - x, j, k]).unwrap();
                        let a_inner = a.fields.value(id, [3 - x, j, k]).unwrap();
                        assert_eq!(a_ghost.to_bits(), b_inner.to_bits());
                        assert_eq!(b_ghost.to_bits(), a_inner.to_bits());
                    }
                }
            }
        }
    }

    #[test]
    fn disabled_directions_are_skipped() {
        let tree = uniform_tree(2, 1);
        let descr = descriptor(Precision::Double);
        let mut a = filled_block(leaf_at(&tree, [0, 0, 0]), &descr, [2, 2, 1], 0.0);
        let mut b = filled_block(leaf_at(&tree, [1, 1, 0]), &descr, [2, 2, 1], 0.0);
        let moved = refresh(&tree, &mut a, &mut b, Selector::new(1, 1, 0), &RefreshOptions::faces_only(), &Linear).unwrap();
        assert_eq!(moved, 0);
        assert!(refresh(&tree, &mut a, &mut b, Selector::new(1, 1, 0), &RefreshOptions::default(), &Linear).unwrap() > 0);
    }

    #[test]
    fn remote_refresh_matches_local_refresh() {
        let tree = Arc::new(uniform_tree(2, 1));
        let descr = descriptor(Precision::Double);
        let size = [3, 3, 1];
        let left = leaf_at(&tree, [0, 1, 0]);
        let right = leaf_at(&tree, [1, 1, 0]);

        let mut a = filled_block(left, &descr, size, 5.0);
        let mut b = filled_block(right, &descr, size, 9.0);
        refresh(&tree, &mut a, &mut b, Selector::new(1, 0, 0), &RefreshOptions::default(), &PiecewiseConstant).unwrap();
        let expected = (a.fields.field_bytes(1).unwrap().to_vec(), b.fields.field_bytes(1).unwrap().to_vec());

        let handles: Vec<_> = ChannelTransport::group(2).into_iter().map(|transport| {
            let tree = tree.clone();
            let descr = descr.clone();
            thread::spawn(move || {
                let rank = transport.rank();
                let (mine, theirs, selector, seed) = if rank == 0 {
                    (left, right, Selector::new(1, 0, 0), 5.0)
                } else {
                    (right, left, Selector::new(-1, 0, 0), 9.0)
                };
                let mut block = filled_block(mine, &descr, size, seed);
                refresh_remote(&tree, &mut block, theirs, selector, &RefreshOptions::default(), &PiecewiseConstant, &transport, 1 - rank).unwrap();
                block.fields.field_bytes(1).unwrap().to_vec()
            })
        }).collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0], expected.0);
        assert_eq!(results[1], expected.1);
    }
}

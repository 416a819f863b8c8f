use std::sync::Arc;
use crate::error::Error;
use crate::field::{FieldDescriptor, FieldStore};
use crate::node::NodeId;




/**
 * The field data attached to one leaf of the tree.
 */
pub struct Block {
    pub node: NodeId,
    pub fields: FieldStore,
}




// ============================================================================
impl Block {

    /**
     * Create a block for `node` with its field store allocated, ghost zones
     * included, and zero filled.
     */
    pub fn new(node: NodeId, descr: Arc<FieldDescriptor>, size: [usize; 3]) -> Result<Self, Error> {
        let mut fields = FieldStore::new(descr, size);
        fields.allocate_ghosts()?;
        fields.allocate()?;
        Ok(Self { node, fields })
    }
}

use log::info;
use crate::error::Error;
use crate::face::Selector;
use crate::field::{FieldDescriptor, FieldStore};
use crate::index_space::IndexSpace;




/**
 * Packs the cells of a block that lie next to one of its faces, edges, or
 * corners into a flat byte buffer, and unpacks such a buffer into the ghost
 * zones on that side of a block.
 *
 * The selector points from the block toward the region of interest. Loading
 * reads interior cells just inside that side; storing writes ghost cells just
 * outside it. Along axes where the selector is zero, the packed extent covers
 * the whole interior, plus the ghost zones on that axis if `ghost_axes` says
 * so. Fields are packed one after another in field id order, each with the
 * first index increasing fastest.
 */
#[derive(Clone, Debug)]
pub struct FieldFace {
    selector: Selector,
    ghost_axes: [bool; 3],
    fields: Option<Vec<usize>>,
    buffer: Vec<u8>,
}




// ============================================================================
impl FieldFace {


    pub fn new(selector: Selector, ghost_axes: [bool; 3]) -> Self {
        Self {
            selector,
            ghost_axes,
            fields: None,
            buffer: Vec::new(),
        }
    }


    /**
     * Restrict this face to the given fields. Without a restriction every
     * field whose refresh flag is set is transferred.
     */
    pub fn with_fields(mut self, fields: Vec<usize>) -> Self {
        self.fields = Some(fields);
        self
    }


    pub fn selector(&self) -> Selector {
        self.selector
    }


    /**
     * The packed bytes from the last `load`, or those installed with
     * `set_buffer`.
     */
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }


    pub fn set_buffer(&mut self, buffer: Vec<u8>) {
        self.buffer = buffer
    }


    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }


    /**
     * The ids of the fields this face transfers.
     */
    pub fn field_ids(&self, descr: &FieldDescriptor) -> Vec<usize> {
        match &self.fields {
            Some(fields) => fields.clone(),
            None => (0..descr.field_count()).filter(|&id| descr.fields()[id].refresh).collect(),
        }
    }


    /**
     * The interior cells of a field read by `load`, in the field's own
     * coordinates.
     */
    pub fn load_space(&self, store: &FieldStore, id: usize) -> Result<IndexSpace, Error> {
        self.space(store, id, false)
    }


    /**
     * The ghost cells of a field written by `store`.
     */
    pub fn store_space(&self, store: &FieldStore, id: usize) -> Result<IndexSpace, Error> {
        self.space(store, id, true)
    }


    fn space(&self, store: &FieldStore, id: usize, outside: bool) -> Result<IndexSpace, Error> {
        let field = store.descriptor().field(id).ok_or_else(|| Error::Config(format!("no field with id {}", id)))?;
        let mut start = [0; 3];
        let mut end = [0; 3];

        for a in 0..3 {
            let n = (store.size()[a] + !field.centering[a] as usize) as i64;
            let g = field.ghosts[a] as i64;

            let (lo, hi) = match (self.selector.get(a), outside) {
                (-1, false) => (0, g),
                (-1, true) => (-g, 0),
                (1, false) => (n - g, n),
                (1, true) => (n, n + g),
                _ if self.ghost_axes[a] => (-g, n + g),
                _ => (0, n),
            };
            start[a] = lo;
            end[a] = hi;
        }
        Ok(IndexSpace::from_corners(start, end))
    }


    /**
     * Pack this face's cells of `store` into the internal buffer, returning
     * the number of bytes packed. Ghost zones are allocated first if the
     * store has none.
     */
    pub fn load(&mut self, store: &mut FieldStore) -> Result<usize, Error> {
        ensure_ghosts(store, "load")?;
        self.buffer = self.pack(store)?;
        Ok(self.buffer.len())
    }


    /**
     * Unpack the internal buffer into this face's ghost cells of `store`,
     * returning the number of bytes consumed. Ghost zones are allocated first
     * if the store has none.
     */
    pub fn store(&self, store: &mut FieldStore) -> Result<usize, Error> {
        ensure_ghosts(store, "store")?;
        self.unpack(store, &self.buffer)
    }


    /**
     * Pack without touching the store's ghost state. Fails if the packed
     * region needs ghost zones the store does not have.
     */
    pub(crate) fn pack(&self, store: &FieldStore) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::new();

        for id in self.field_ids(store.descriptor()) {
            bytes.extend(extract(store, id, &self.load_space(store, id)?)?);
        }
        Ok(bytes)
    }


    pub(crate) fn unpack(&self, store: &mut FieldStore, bytes: &[u8]) -> Result<usize, Error> {
        let mut cursor = 0;

        for id in self.field_ids(store.descriptor()) {
            let space = self.store_space(store, id)?;
            let len = packed_len(store, id, &space)?;

            if cursor + len > bytes.len() {
                return Err(Error::LayoutMismatch(format!(
                    "face buffer of {} bytes is too short for field {} in direction {:?}",
                    bytes.len(), id, self.selector)));
            }
            insert(store, id, &space, &bytes[cursor .. cursor + len])?;
            cursor += len;
        }
        if cursor != bytes.len() {
            return Err(Error::LayoutMismatch(format!(
                "face buffer of {} bytes has {} unused bytes", bytes.len(), bytes.len() - cursor)));
        }
        Ok(cursor)
    }
}




pub(crate) fn ensure_ghosts(store: &mut FieldStore, what: &str) -> Result<(), Error> {
    if !store.ghosts_allocated() {
        info!("allocating ghost zones of a field store for face {}", what);
        store.allocate_ghosts()?;
    }
    if !store.is_allocated() {
        return Err(Error::State(format!("cannot {} a face of an unallocated field store", what)));
    }
    Ok(())
}




fn packed_len(store: &FieldStore, id: usize, space: &IndexSpace) -> Result<usize, Error> {
    let precision = store.descriptor().field(id).map(|f| f.precision)
        .ok_or_else(|| Error::Config(format!("no field with id {}", id)))?;
    Ok(space.len() * precision.size())
}




/**
 * Copy the values of a field inside `space` out of a store.
 */
pub(crate) fn extract(store: &FieldStore, id: usize, space: &IndexSpace) -> Result<Vec<u8>, Error> {
    let field_space = store.field_space(id)?;

    if !field_space.contains_space(space) {
        return Err(Error::State(format!(
            "region {:?} lies outside field {} of extent {:?}; are ghosts allocated?",
            space, id, field_space)));
    }
    let chunk = packed_len(store, id, &IndexSpace::from_extent([1, 1, 1]))?;
    let region = space.memory_region_in(&field_space);
    let mut bytes = Vec::with_capacity(space.len() * chunk);

    for row in region.iter_slice(store.field_bytes(id)?, chunk) {
        bytes.extend_from_slice(row)
    }
    Ok(bytes)
}




/**
 * Copy packed values of a field into `space` of a store.
 */
pub(crate) fn insert(store: &mut FieldStore, id: usize, space: &IndexSpace, bytes: &[u8]) -> Result<(), Error> {
    let field_space = store.field_space(id)?;

    if !field_space.contains_space(space) {
        return Err(Error::State(format!(
            "region {:?} lies outside field {} of extent {:?}; are ghosts allocated?",
            space, id, field_space)));
    }
    let chunk = packed_len(store, id, &IndexSpace::from_extent([1, 1, 1]))?;
    if bytes.len() != space.len() * chunk {
        return Err(Error::LayoutMismatch(format!(
            "{} bytes cannot fill region {:?} of field {}", bytes.len(), space, id)));
    }
    let region = space.memory_region_in(&field_space);
    let row_len = region.count()[0] * chunk;

    for (row, src) in region.iter_slice_mut(store.field_bytes_mut(id)?, chunk).zip(bytes.chunks(row_len.max(1))) {
        row.copy_from_slice(src)
    }
    Ok(())
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::sync::Arc;
    use super::FieldFace;
    use crate::face::Selector;
    use crate::field::{FieldDescriptor, FieldStore};
    use crate::index_space::range3d;

    fn store(size: [usize; 3], ghosts: [usize; 3]) -> FieldStore {
        let mut descr = FieldDescriptor::new();
        let id = descr.insert_field("density").unwrap();
        descr.set_ghosts(id, ghosts).unwrap();
        let mut store = FieldStore::new(Arc::new(descr), size);
        store.allocate().unwrap();
        store
    }

    #[test]
    fn load_and_store_regions_sit_on_either_side_of_the_face() {
        let mut s = store([4, 4, 1], [2, 2, 0]);
        s.allocate_ghosts().unwrap();
        let face = FieldFace::new(Selector::new(1, 0, 0), [false, true, false]);
        assert_eq!(face.load_space(&s, 0).unwrap(), range3d(2..4, -2..6, 0..1));
        assert_eq!(face.store_space(&s, 0).unwrap(), range3d(4..6, -2..6, 0..1));

        let corner = FieldFace::new(Selector::new(-1, 1, 0), [true; 3]);
        assert_eq!(corner.load_space(&s, 0).unwrap(), range3d(0..2, 2..4, 0..1));
        assert_eq!(corner.store_space(&s, 0).unwrap(), range3d(-2..0, 4..6, 0..1));
    }

    #[test]
    fn load_allocates_missing_ghosts() {
        let mut s = store([3, 3, 3], [1, 1, 1]);
        let mut face = FieldFace::new(Selector::new(0, 0, -1), [true; 3]);
        assert!(!s.ghosts_allocated());
        assert_eq!(face.load(&mut s).unwrap(), 5 * 5 * 8);
        assert!(s.ghosts_allocated());
    }

    #[test]
    fn packed_face_lands_in_the_neighbor_ghosts() {
        let mut a = store([4, 3, 1], [1, 1, 0]);
        let mut b = store([4, 3, 1], [1, 1, 0]);

        for j in 0..3 {
            for i in 0..4 {
                a.set_value(0, [i, j, 0], (10 * i + j) as f64).unwrap();
            }
        }
        let mut send = FieldFace::new(Selector::new(1, 0, 0), [false; 3]);
        send.load(&mut a).unwrap();

        let mut recv = FieldFace::new(Selector::new(-1, 0, 0), [false; 3]);
        recv.set_buffer(send.into_buffer());
        assert_eq!(recv.store(&mut b).unwrap(), 3 * 8);

        for j in 0..3 {
            assert_eq!(b.value(0, [-1, j, 0]).unwrap(), (30 + j) as f64);
        }
    }

    #[test]
    fn short_buffer_is_a_layout_mismatch() {
        let mut s = store([2, 2, 1], [1, 1, 0]);
        let mut face = FieldFace::new(Selector::new(0, 1, 0), [false; 3]);
        face.set_buffer(vec![0; 8]);
        assert!(face.store(&mut s).is_err());
    }
}

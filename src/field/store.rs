use std::ops::Range;
use std::sync::Arc;
use log::warn;
use crate::error::Error;
use crate::index_space::IndexSpace;
use super::descr::{FieldDescriptor, FieldInfo};
use super::precision::{Element, Precision};




/**
 * Round `x` up to the next multiple of `m`; a zero multiple leaves `x`
 * unchanged.
 */
fn round_up(x: usize, m: usize) -> usize {
    if m <= 1 { x } else { (x + m - 1) / m * m }
}




/**
 * The field data of one block: a single byte buffer holding every field of a
 * `FieldDescriptor` back to back, each starting on an aligned address.
 * Offsets are relative to the first aligned byte of the buffer.
 */
pub struct FieldStore {
    descr: Arc<FieldDescriptor>,
    size: [usize; 3],
    buffer: Vec<u8>,
    base: usize,
    offsets: Vec<usize>,
    allocated: bool,
    ghosts: bool,
}




// ============================================================================
impl FieldStore {


    /**
     * Create an unallocated store for blocks of `size` cells, without ghost
     * zones.
     */
    pub fn new(descr: Arc<FieldDescriptor>, size: [usize; 3]) -> Self {
        Self {
            descr,
            size,
            buffer: Vec::new(),
            base: 0,
            offsets: Vec::new(),
            allocated: false,
            ghosts: false,
        }
    }


    pub fn descriptor(&self) -> &Arc<FieldDescriptor> {
        &self.descr
    }


    /**
     * Number of interior cells on each axis.
     */
    pub fn size(&self) -> [usize; 3] {
        self.size
    }


    pub fn is_allocated(&self) -> bool {
        self.allocated
    }


    pub fn ghosts_allocated(&self) -> bool {
        self.ghosts
    }


    /**
     * Length of the underlying buffer, including the alignment slack.
     */
    pub fn total_bytes(&self) -> usize {
        self.buffer.len()
    }


    /**
     * Compute each field's offset from the first aligned byte, and the buffer
     * length needed, for the current ghost setting.
     */
    pub fn layout(&self) -> (Vec<usize>, usize) {
        let alignment = self.descr.alignment();
        let padding = self.descr.padding();
        let mut offsets = Vec::with_capacity(self.descr.field_count());
        let mut offset = 0;

        for field in self.descr.fields() {
            offsets.push(offset);
            let padded = round_up(field.bytes(self.size, self.ghosts), padding);
            offset = round_up(offset + padded, alignment);
        }
        (offsets, offset + alignment - 1)
    }


    /**
     * Allocate the buffer. Fails if the store is already allocated or has an
     * empty axis. Freezes the descriptor.
     */
    pub fn allocate(&mut self) -> Result<(), Error> {
        if self.allocated {
            return Err(Error::State("field store is already allocated".to_string()));
        }
        if self.size.iter().any(|&n| n == 0) {
            return Err(Error::Allocation(format!("field store has non-positive size {:?}", self.size)));
        }
        self.descr.freeze();

        let (offsets, total) = self.layout();
        let alignment = self.descr.alignment();
        self.buffer = vec![0; total];
        self.base = (alignment - self.buffer.as_ptr() as usize % alignment) % alignment;
        self.offsets = offsets;
        self.allocated = true;
        Ok(())
    }


    /**
     * Release the buffer. Deallocating an unallocated store is a logged no-op.
     */
    pub fn deallocate(&mut self) {
        if !self.allocated {
            warn!("deallocate called on a field store that is not allocated");
            return;
        }
        self.buffer = Vec::new();
        self.offsets.clear();
        self.base = 0;
        self.allocated = false;
    }


    /**
     * Add ghost zones to every field, keeping interior values.
     */
    pub fn allocate_ghosts(&mut self) -> Result<(), Error> {
        if self.ghosts {
            warn!("allocate_ghosts called but ghosts are already allocated");
            return Err(Error::State("ghosts are already allocated".to_string()));
        }
        self.relocate(true)
    }


    /**
     * Remove the ghost zones of every field, keeping interior values.
     */
    pub fn deallocate_ghosts(&mut self) -> Result<(), Error> {
        if !self.ghosts {
            warn!("deallocate_ghosts called but ghosts are not allocated");
            return Err(Error::State("ghosts are not allocated".to_string()));
        }
        self.relocate(false)
    }


    fn relocate(&mut self, ghosts: bool) -> Result<(), Error> {
        if !self.allocated {
            self.ghosts = ghosts;
            return Ok(());
        }
        let old_buffer = std::mem::take(&mut self.buffer);
        let old_base = self.base;
        let old_offsets = std::mem::take(&mut self.offsets);
        let old_ghosts = self.ghosts;

        self.allocated = false;
        self.ghosts = ghosts;

        if let Err(e) = self.allocate() {
            self.buffer = old_buffer;
            self.base = old_base;
            self.offsets = old_offsets;
            self.ghosts = old_ghosts;
            self.allocated = true;
            return Err(e);
        }

        for (id, field) in self.descr.clone().fields().iter().enumerate() {
            let old_dims = field.dims(self.size, old_ghosts);
            let new_dims = field.dims(self.size, ghosts);
            let (src, dst) = overlap(old_dims, new_dims);
            let chunk = field.precision.size();
            let old_start = old_base + old_offsets[id];
            let old_bytes = &old_buffer[old_start .. old_start + field.bytes(self.size, old_ghosts)];
            let new_bytes = self.field_bytes_mut(id)?;

            let src_region = src.memory_region_in(&IndexSpace::from_extent(old_dims));
            let dst_region = dst.memory_region_in(&IndexSpace::from_extent(new_dims));

            for (a, b) in src_region.iter_slice(old_bytes, chunk).zip(dst_region.iter_slice_mut(new_bytes, chunk)) {
                b.copy_from_slice(a)
            }
        }
        Ok(())
    }


    fn field_info(&self, id: usize) -> Result<&FieldInfo, Error> {
        self.descr.field(id).ok_or_else(|| Error::Config(format!("no field with id {}", id)))
    }


    fn check_allocated(&self) -> Result<(), Error> {
        if self.allocated {
            Ok(())
        } else {
            Err(Error::State("field store is not allocated".to_string()))
        }
    }


    /**
     * Byte offset of a field, relative to the first aligned byte.
     */
    pub fn offset(&self, id: usize) -> Option<usize> {
        self.offsets.get(id).copied()
    }


    /**
     * Number of values along each axis of a field's array, under the current
     * ghost setting.
     */
    pub fn field_dims(&self, id: usize) -> Result<[usize; 3], Error> {
        Ok(self.field_info(id)?.dims(self.size, self.ghosts))
    }


    /**
     * The index space of a field's array, in coordinates where the first
     * interior value has index zero and ghost zones have negative indexes.
     */
    pub fn field_space(&self, id: usize) -> Result<IndexSpace, Error> {
        let field = self.field_info(id)?;
        let dims = field.dims(self.size, self.ghosts);
        let g = if self.ghosts { field.ghosts } else { [0; 3] };
        let start = [-(g[0] as i64), -(g[1] as i64), -(g[2] as i64)];
        Ok(IndexSpace::from_extent(dims).translate(start))
    }


    /**
     * Byte offset of the first interior value within a field's array.
     */
    pub fn unknowns_offset(&self, id: usize) -> Result<usize, Error> {
        let space = self.field_space(id)?;
        Ok(space.offset_of([0, 0, 0]) * self.field_info(id)?.precision.size())
    }


    /**
     * The raw bytes of one field's array.
     */
    pub fn field_bytes(&self, id: usize) -> Result<&[u8], Error> {
        self.check_allocated()?;
        let len = self.field_info(id)?.bytes(self.size, self.ghosts);
        let start = self.base + self.offsets[id];
        Ok(&self.buffer[start .. start + len])
    }


    pub fn field_bytes_mut(&mut self, id: usize) -> Result<&mut [u8], Error> {
        self.check_allocated()?;
        let len = self.field_info(id)?.bytes(self.size, self.ghosts);
        let start = self.base + self.offsets[id];
        Ok(&mut self.buffer[start .. start + len])
    }


    fn locate_value(&self, id: usize, index: [i64; 3]) -> Result<(usize, Precision), Error> {
        let space = self.field_space(id)?;
        let field = self.field_info(id)?;

        if !space.contains(index) {
            return Err(Error::LayoutMismatch(format!("index {:?} lies outside field '{}'", index, field.name)));
        }
        Ok((space.offset_of(index) * field.precision.size(), field.precision))
    }


    /**
     * Read one value, widened to `f64`. Indexes are relative to the first
     * interior value.
     */
    pub fn value(&self, id: usize, index: [i64; 3]) -> Result<f64, Error> {
        let (offset, precision) = self.locate_value(id, index)?;
        let bytes = &self.field_bytes(id)?[offset .. offset + precision.size()];

        match precision {
            Precision::Single    => Ok(f32::read(bytes).to_f64()),
            Precision::Double    => Ok(f64::read(bytes)),
            Precision::Quadruple => Err(Error::Unsupported("reading a quadruple precision value".to_string())),
        }
    }


    /**
     * Write one value, rounded to the field's precision.
     */
    pub fn set_value(&mut self, id: usize, index: [i64; 3], value: f64) -> Result<(), Error> {
        let (offset, precision) = self.locate_value(id, index)?;
        let bytes = &mut self.field_bytes_mut(id)?[offset .. offset + precision.size()];

        match precision {
            Precision::Single    => f32::from_f64(value).write(bytes),
            Precision::Double    => value.write(bytes),
            Precision::Quadruple => return Err(Error::Unsupported("writing a quadruple precision value".to_string())),
        }
        Ok(())
    }


    /**
     * Set every value (ghosts included) of the given fields. Quadruple
     * precision fields can only be cleared to zero.
     */
    pub fn clear(&mut self, value: f64, fields: Range<usize>) -> Result<(), Error> {
        for id in fields {
            let precision = self.field_info(id)?.precision;
            let bytes = self.field_bytes_mut(id)?;

            match precision {
                Precision::Single => {
                    bytes.chunks_exact_mut(4).for_each(|b| f32::from_f64(value).write(b))
                }
                Precision::Double => {
                    bytes.chunks_exact_mut(8).for_each(|b| value.write(b))
                }
                Precision::Quadruple if value == 0.0 => {
                    bytes.iter_mut().for_each(|b| *b = 0)
                }
                Precision::Quadruple => {
                    return Err(Error::Unsupported(format!("clearing quadruple precision field {} to {}", id, value)))
                }
            }
        }
        Ok(())
    }
}




/**
 * Return the regions of two centered arrays that hold the same interior
 * values, as index spaces of the first and second array.
 */
fn overlap(a: [usize; 3], b: [usize; 3]) -> (IndexSpace, IndexSpace) {
    let mut sa = [0; 3];
    let mut sb = [0; 3];
    let mut n = [0; 3];

    for x in 0..3 {
        let shift = (a[x] as i64 - b[x] as i64) / 2;
        sa[x] = shift.max(0);
        sb[x] = (-shift).max(0);
        n[x] = a[x].min(b[x]) as i64;
    }
    (
        IndexSpace::from_corners(sa, [sa[0] + n[0], sa[1] + n[1], sa[2] + n[2]]),
        IndexSpace::from_corners(sb, [sb[0] + n[0], sb[1] + n[1], sb[2] + n[2]]),
    )
}

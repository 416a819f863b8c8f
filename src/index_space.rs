use core::ops::Range;
use serde::{Deserialize, Serialize};




/**
 * Identifier for a Cartesian axis
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    I,
    J,
    K,
}

impl Axis {

    pub fn all() -> [Axis; 3] {
        [Axis::I, Axis::J, Axis::K]
    }

    pub fn index(self) -> usize {
        match self {
            Axis::I => 0,
            Axis::J => 1,
            Axis::K => 2,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Axis::I,
            1 => Axis::J,
            2 => Axis::K,
            _ => panic!("axis index {} out of range", index),
        }
    }
}




#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]

/**
 * Represents a rectangular region in a discrete, three-dimensional index
 * space. Lower-rank spaces use the extent `0..1` on unused axes. The index
 * type is signed 64-bit integer, so regions may extend to negative indexes
 * (ghost zones of a block at the domain origin do).
 */
pub struct IndexSpace {
    start: [i64; 3],
    end: [i64; 3],
}




// ============================================================================
impl IndexSpace {


    pub fn new(di: Range<i64>, dj: Range<i64>, dk: Range<i64>) -> Self {

        assert!(
            di.start <= di.end && dj.start <= dj.end && dk.start <= dk.end,
            "index space has negative volume");

        Self {
            start: [di.start, dj.start, dk.start],
            end: [di.end, dj.end, dk.end],
        }
    }


    /**
     * Construct an index space from its lower (inclusive) and upper
     * (exclusive) corners.
     */
    pub fn from_corners(start: [i64; 3], end: [i64; 3]) -> Self {
        Self::new(start[0]..end[0], start[1]..end[1], start[2]..end[2])
    }


    /**
     * The index space `0..n` on each axis.
     */
    pub fn from_extent(extent: [usize; 3]) -> Self {
        Self::new(0..extent[0] as i64, 0..extent[1] as i64, 0..extent[2] as i64)
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn dim(&self) -> [usize; 3] {
        [
            (self.end[0] - self.start[0]) as usize,
            (self.end[1] - self.start[1]) as usize,
            (self.end[2] - self.start[2]) as usize,
        ]
    }


    /**
     * Return the number of elements in this index space.
     */
    pub fn len(&self) -> usize {
        self.dim().iter().product()
    }


    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }


    /**
     * Return the minimum index (inclusive).
     */
    pub fn start(&self) -> [i64; 3] {
        self.start
    }


    /**
     * Return the maximum index (exclusive).
     */
    pub fn end(&self) -> [i64; 3] {
        self.end
    }


    /**
     * Return the range covered on the given axis.
     */
    pub fn range(&self, axis: Axis) -> Range<i64> {
        let a = axis.index();
        self.start[a]..self.end[a]
    }


    /**
     * Determine whether this index space contains the given index.
     */
    pub fn contains(&self, index: [i64; 3]) -> bool {
        (0..3).all(|a| self.start[a] <= index[a] && index[a] < self.end[a])
    }


    /**
     * Determine whether another index space is a subset of this one.
     */
    pub fn contains_space(&self, other: &Self) -> bool {
        (0..3).all(|a| other.start[a] >= self.start[a] && other.end[a] <= self.end[a])
    }


    /**
     * Return the overlapping part of two index spaces. The result is empty
     * (but well-formed) when they do not overlap.
     */
    pub fn intersect(&self, other: &Self) -> Self {
        let mut start = [0; 3];
        let mut end = [0; 3];

        for a in 0..3 {
            start[a] = self.start[a].max(other.start[a]);
            end[a] = self.end[a].min(other.end[a]).max(start[a]);
        }
        Self { start, end }
    }


    /**
     * Expand this index space by the given number of elements on both sides
     * of each axis. Negative values trim.
     */
    pub fn extend(&self, delta: [i64; 3]) -> Self {
        Self::from_corners(
            [self.start[0] - delta[0], self.start[1] - delta[1], self.start[2] - delta[2]],
            [self.end[0] + delta[0], self.end[1] + delta[1], self.end[2] + delta[2]])
    }


    /**
     * Shift this index space by the given offset.
     */
    pub fn translate(&self, offset: [i64; 3]) -> Self {
        Self {
            start: [self.start[0] + offset[0], self.start[1] + offset[1], self.start[2] + offset[2]],
            end: [self.end[0] + offset[0], self.end[1] + offset[1], self.end[2] + offset[2]],
        }
    }


    /**
     * Increase the size of this index space by a per-axis factor. This maps a
     * region at one refinement level onto the next finer one.
     */
    pub fn scale(&self, factor: [i64; 3]) -> Self {
        Self {
            start: [self.start[0] * factor[0], self.start[1] * factor[1], self.start[2] * factor[2]],
            end: [self.end[0] * factor[0], self.end[1] * factor[1], self.end[2] * factor[2]],
        }
    }


    /**
     * Return the smallest coarse index space covering this one, where each
     * coarse index spans `factor` fine indexes on its axis.
     */
    pub fn coarsen(&self, factor: [i64; 3]) -> Self {
        let mut start = [0; 3];
        let mut end = [0; 3];

        for a in 0..3 {
            start[a] = self.start[a].div_euclid(factor[a]);
            end[a] = (self.end[a] + factor[a] - 1).div_euclid(factor[a]);
        }
        Self { start, end }
    }


    /**
     * Return the sub-range occupied by child `slot` when each of the first
     * `rank` axes is split into `k` nearly equal parts. Unsplit axes are
     * returned unchanged.
     */
    pub fn subdivide(&self, k: usize, rank: usize, slot: [usize; 3]) -> Self {
        let mut start = self.start;
        let mut end = self.end;

        for a in 0..rank {
            let w = self.end[a] - self.start[a];
            let k = k as i64;
            let i = slot[a] as i64;
            start[a] = self.start[a] + (i * w) / k;
            end[a] = self.start[a] + ((i + 1) * w) / k;
        }
        Self { start, end }
    }


    /**
     * Return the linear offset for the given index in a memory buffer aligned
     * with the start of this index space, where the first index increases
     * fastest.
     */
    pub fn offset_of(&self, index: [i64; 3]) -> usize {
        let [n0, n1, _] = self.dim();
        let i = (index[0] - self.start[0]) as usize;
        let j = (index[1] - self.start[1]) as usize;
        let k = (index[2] - self.start[2]) as usize;
        i + n0 * (j + n1 * k)
    }


    /**
     * Return a memory region object corresponding to the selection of this
     * index space in the buffer allocated for another one.
     */
    pub fn memory_region_in(&self, parent: &Self) -> MemoryRegion {

        assert!(parent.contains_space(self), "memory region lies outside its parent");

        let start = [
            (self.start[0] - parent.start[0]) as usize,
            (self.start[1] - parent.start[1]) as usize,
            (self.start[2] - parent.start[2]) as usize];
        let count = self.dim();
        let shape = parent.dim();
        MemoryRegion { start, count, shape }
    }


    /**
     * Return an iterator which traverses the index space with the first
     * index increasing fastest.
     */
    pub fn iter(&self) -> impl Iterator<Item = [i64; 3]> + '_ {
        self.range(Axis::K).flat_map(move |k| {
            self.range(Axis::J).flat_map(move |j| {
                self.range(Axis::I).map(move |i| [i, j, k])
            })
        })
    }
}

impl From<(Range<i64>, Range<i64>, Range<i64>)> for IndexSpace {
    fn from(range: (Range<i64>, Range<i64>, Range<i64>)) -> Self {
        Self::new(range.0, range.1, range.2)
    }
}

impl From<IndexSpace> for (Range<i64>, Range<i64>, Range<i64>) {
    fn from(space: IndexSpace) -> Self {
        (space.range(Axis::I), space.range(Axis::J), space.range(Axis::K))
    }
}




/**
 * Less imposing factory function to construct an IndexSpace object.
 */
pub fn range3d(di: Range<i64>, dj: Range<i64>, dk: Range<i64>) -> IndexSpace {
    IndexSpace::new(di, dj, dk)
}




/**
 * A 3D memory region within a contiguous buffer, where the first index
 * increases fastest. Each element occupies `chunk` consecutive items of the
 * underlying slice; for byte buffers the chunk is the element size.
 */
#[derive(Clone, Debug)]
pub struct MemoryRegion {
    start: [usize; 3],
    count: [usize; 3],
    shape: [usize; 3],
}




// ============================================================================
impl MemoryRegion {


    pub fn count(&self) -> [usize; 3] {
        self.count
    }


    pub fn len(&self) -> usize {
        self.count.iter().product()
    }


    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }


    /**
     * Iterate over the contiguous runs (one per selected `(j, k)` pair) of
     * this region within the given slice.
     */
    pub fn iter_slice<'a, T>(&self, slice: &'a [T], chunk: usize) -> impl Iterator<Item = &'a [T]> {
        let [s0, s1, s2] = self.start;
        let [c0, c1, c2] = self.count;
        let r = self.shape[0] * chunk;
        let q = self.shape[1] * r;

        assert!(slice.len() == self.shape.iter().product::<usize>() * chunk, "memory region does not match slice length");

        slice[s2 * q .. (s2 + c2) * q]
        .chunks_exact(q.max(1)).flat_map(move |plane| plane[s1 * r .. (s1 + c1) * r]
        .chunks_exact(r.max(1)).map(move |row| &row[s0 * chunk .. (s0 + c0) * chunk]))
    }


    pub fn iter_slice_mut<'a, T>(&self, slice: &'a mut [T], chunk: usize) -> impl Iterator<Item = &'a mut [T]> {
        let [s0, s1, s2] = self.start;
        let [c0, c1, c2] = self.count;
        let r = self.shape[0] * chunk;
        let q = self.shape[1] * r;

        assert!(slice.len() == self.shape.iter().product::<usize>() * chunk, "memory region does not match slice length");

        slice[s2 * q .. (s2 + c2) * q]
        .chunks_exact_mut(q.max(1)).flat_map(move |plane| plane[s1 * r .. (s1 + c1) * r]
        .chunks_exact_mut(r.max(1)).map(move |row| &mut row[s0 * chunk .. (s0 + c0) * chunk]))
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{range3d, IndexSpace};

    #[test]
    fn subdivide_covers_the_parent_without_overlap() {
        let space = range3d(0..8, 0..8, 0..1);
        let mut total = 0;

        for j in 0..2 {
            for i in 0..2 {
                let child = space.subdivide(2, 2, [i, j, 0]);
                assert_eq!(child.dim(), [4, 4, 1]);
                total += child.len();
            }
        }
        assert_eq!(total, space.len());
        assert_eq!(space.subdivide(2, 2, [1, 1, 0]), range3d(4..8, 4..8, 0..1));
    }

    #[test]
    fn coarsen_rounds_outward() {
        let fine = range3d(-1..5, 3..4, 0..1);
        assert_eq!(fine.coarsen([2, 2, 1]), range3d(-1..3, 1..2, 0..1));
    }

    #[test]
    fn intersect_of_disjoint_spaces_is_empty() {
        let a = range3d(0..4, 0..4, 0..1);
        let b = range3d(4..8, 0..4, 0..1);
        assert!(a.intersect(&b).is_empty());
        assert_eq!(a.intersect(&a.extend([1, 1, 0])), a);
    }

    #[test]
    fn iteration_order_matches_linear_offsets() {
        let space = range3d(1..4, -2..0, 5..7);
        for (n, index) in space.iter().enumerate() {
            assert_eq!(space.offset_of(index), n);
        }
        assert_eq!(space.iter().count(), space.len());
    }

    #[test]
    fn memory_region_yields_rows_of_the_selection() {
        let parent = IndexSpace::from_extent([4, 3, 2]);
        let data: Vec<usize> = (0..parent.len() * 2).collect();
        let child = range3d(1..3, 1..3, 1..2);
        let region = child.memory_region_in(&parent);
        let rows: Vec<_> = region.iter_slice(&data, 2).collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], &[34, 35, 36, 37]);
        assert_eq!(rows[1], &[42, 43, 44, 45]);
    }

    #[test]
    fn mutable_memory_region_writes_only_the_selection() {
        let parent = IndexSpace::from_extent([3, 3, 1]);
        let mut data = vec![0; parent.len()];
        let region = range3d(1..2, 0..3, 0..1).memory_region_in(&parent);

        for row in region.iter_slice_mut(&mut data, 1) {
            row.iter_mut().for_each(|x| *x = 1);
        }
        assert_eq!(data, vec![0, 1, 0, 0, 1, 0, 0, 1, 0]);
    }
}

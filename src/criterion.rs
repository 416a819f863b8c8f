use crate::error::Error;
use crate::index_space::IndexSpace;




/**
 * Decides where a tree is refined. The root of the tree covers `domain()`;
 * each node covers a sub-range of it obtained by repeated subdivision.
 */
pub trait Criterion {

    /**
     * The index space covered by the root node.
     */
    fn domain(&self) -> IndexSpace;

    /**
     * Return true if a node at `level` covering `region` must be split.
     */
    fn refine(&self, region: &IndexSpace, level: u32) -> bool;
}




/**
 * A criterion given by a sampled array of requested levels: a node splits
 * when any sample in its range requests a level deeper than its own.
 */
#[derive(Clone, Debug)]
pub struct LevelArray {
    space: IndexSpace,
    levels: Vec<u32>,
}




// ============================================================================
impl LevelArray {

    pub fn new(extent: [usize; 3], levels: Vec<u32>) -> Result<Self, Error> {
        let space = IndexSpace::from_extent(extent);

        if levels.len() != space.len() {
            return Err(Error::LayoutMismatch(format!(
                "level array has {} samples but extent {:?} needs {}",
                levels.len(), extent, space.len())));
        }
        Ok(Self { space, levels })
    }

    /**
     * Sample a function of the index at every point of the extent.
     */
    pub fn from_fn<F: Fn([i64; 3]) -> u32>(extent: [usize; 3], f: F) -> Self {
        let space = IndexSpace::from_extent(extent);
        let levels = space.iter().map(f).collect();
        Self { space, levels }
    }

    pub fn get(&self, index: [i64; 3]) -> u32 {
        self.levels[self.space.offset_of(index)]
    }
}

impl Criterion for LevelArray {
    fn domain(&self) -> IndexSpace {
        self.space.clone()
    }

    fn refine(&self, region: &IndexSpace, level: u32) -> bool {
        region.intersect(&self.space).iter().any(|index| self.get(index) > level)
    }
}




/**
 * A criterion given by a closure over `(region, level)`.
 */
pub struct Predicate<F> {
    domain: IndexSpace,
    f: F,
}

impl<F> Predicate<F> where F: Fn(&IndexSpace, u32) -> bool {
    pub fn new(domain: IndexSpace, f: F) -> Self {
        Self { domain, f }
    }
}

impl<F> Criterion for Predicate<F> where F: Fn(&IndexSpace, u32) -> bool {
    fn domain(&self) -> IndexSpace {
        self.domain.clone()
    }

    fn refine(&self, region: &IndexSpace, level: u32) -> bool {
        (self.f)(region, level)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{Criterion, LevelArray, Predicate};
    use crate::index_space::{range3d, IndexSpace};

    #[test]
    fn level_array_refines_where_a_deeper_level_is_requested() {
        let levels = LevelArray::from_fn([8, 8, 1], |[i, j, _]| if i >= 4 && j >= 4 { 1 } else { 0 });
        assert!(levels.refine(&range3d(0..8, 0..8, 0..1), 0));
        assert!(levels.refine(&range3d(4..8, 4..8, 0..1), 0));
        assert!(!levels.refine(&range3d(4..8, 4..8, 0..1), 1));
        assert!(!levels.refine(&range3d(0..4, 0..8, 0..1), 0));
    }

    #[test]
    fn level_array_rejects_wrong_sample_count() {
        assert!(LevelArray::new([4, 4, 1], vec![0; 15]).is_err());
    }

    #[test]
    fn predicate_sees_region_and_level() {
        let p = Predicate::new(range3d(0..4, 0..1, 0..1), |region: &IndexSpace, level: u32| region.start()[0] == 0 && level < 2);
        assert!(p.refine(&range3d(0..2, 0..1, 0..1), 1));
        assert!(!p.refine(&range3d(2..4, 0..1, 0..1), 1));
        assert!(!p.refine(&range3d(0..2, 0..1, 0..1), 2));
    }
}

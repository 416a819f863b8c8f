use serde::{Deserialize, Serialize};
use crate::index_space::Axis;




/**
 * One of the `2d` faces of a rank-`d` block. Faces are numbered
 * `2 * axis + side`, where side 0 is the lower face and side 1 is the upper
 * face, so the opposite face is obtained by flipping the low bit.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Face(usize);




// ============================================================================
impl Face {

    pub fn new(axis: Axis, upper: bool) -> Self {
        Self(2 * axis.index() + upper as usize)
    }

    pub fn from_index(index: usize) -> Self {
        assert!(index < 6, "face index {} out of range", index);
        Self(index)
    }

    /**
     * All faces of a rank-`d` block, in index order.
     */
    pub fn all(rank: usize) -> impl Iterator<Item = Face> {
        (0..2 * rank).map(Face)
    }

    pub fn index(self) -> usize {
        self.0
    }

    pub fn axis(self) -> Axis {
        Axis::from_index(self.0 / 2)
    }

    pub fn is_upper(self) -> bool {
        self.0 & 1 == 1
    }

    pub fn opposite(self) -> Self {
        Self(self.0 ^ 1)
    }

    /**
     * Return the direction of this face as a selector: `-1` or `+1` on the
     * face's axis and zero elsewhere.
     */
    pub fn selector(self) -> Selector {
        let mut s = [0; 3];
        s[self.axis().index()] = if self.is_upper() { 1 } else { -1 };
        Selector(s)
    }

    /**
     * Return the child slot coordinate, along this face's axis, of the
     * children that touch this face.
     */
    pub fn child_layer(self, k: usize) -> usize {
        if self.is_upper() { k - 1 } else { 0 }
    }
}




/**
 * A direction in `{-1, 0, 1}^3`. The all-zero selector refers to a whole
 * block; a selector with one nonzero entry is a face, two nonzero entries an
 * edge, three a corner. The face rank of a selector in a rank-`d` space is
 * `d` minus the number of nonzero entries.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Selector(pub [i32; 3]);




// ============================================================================
impl Selector {

    pub const WHOLE: Selector = Selector([0, 0, 0]);

    pub fn new(sx: i32, sy: i32, sz: i32) -> Self {
        assert!(
            [sx, sy, sz].iter().all(|s| (-1..=1).contains(s)),
            "selector entries must be -1, 0 or 1");
        Self([sx, sy, sz])
    }

    pub fn get(self, axis: usize) -> i32 {
        self.0[axis]
    }

    pub fn is_whole(self) -> bool {
        self == Self::WHOLE
    }

    pub fn opposite(self) -> Self {
        Self([-self.0[0], -self.0[1], -self.0[2]])
    }

    pub fn num_nonzero(self) -> usize {
        self.0.iter().filter(|&&s| s != 0).count()
    }

    pub fn face_rank(self, rank: usize) -> usize {
        rank - self.num_nonzero()
    }

    /**
     * Return the faces crossed when moving in this direction, in axis order.
     */
    pub fn faces(self) -> impl Iterator<Item = Face> {
        (0..3).filter(move |&a| self.0[a] != 0).map(move |a| Face::new(Axis::from_index(a), self.0[a] > 0))
    }

    /**
     * Return the single face this selector names, if it has exactly one
     * nonzero entry.
     */
    pub fn as_face(self) -> Option<Face> {
        if self.num_nonzero() == 1 {
            self.faces().next()
        } else {
            None
        }
    }

    /**
     * Iterate over every non-zero selector of a rank-`d` space whose face
     * rank lies in `min_face_rank .. d`: faces, then (if admitted) edges,
     * then corners.
     */
    pub fn iter(rank: usize, min_face_rank: usize) -> impl Iterator<Item = Selector> {
        let span = |a: usize| if a < rank { -1..=1 } else { 0..=0 };
        let mut all = Vec::new();

        for sz in span(2) {
            for sy in span(1) {
                for sx in span(0) {
                    let s = Selector([sx, sy, sz]);
                    let r = s.face_rank(rank);
                    if !s.is_whole() && min_face_rank <= r && r < rank {
                        all.push(s)
                    }
                }
            }
        }
        all.sort_by_key(|s| (s.num_nonzero(), *s));
        all.into_iter()
    }
}

impl From<Face> for Selector {
    fn from(face: Face) -> Self {
        face.selector()
    }
}

use std::io::{Read, Write};
use serde::{Deserialize, Serialize};
use crate::error::Error;
use crate::face::Selector;
use crate::field::{FieldDescriptor, Precision};
use crate::tree::Tree;




/**
 * Whether a node's children are created all together (`Full`), or each child
 * independently (`Partial`).
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branching {
    Full,
    Partial,
}

impl Default for Branching {
    fn default() -> Self {
        Branching::Full
    }
}




/**
 * Which parts of a block's halo a ghost refresh fills. Faces are always
 * refreshed; edges and corners are optional. `ghost_axes` selects, per axis,
 * whether the transverse extent of a face includes the ghost zones along
 * that axis.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOptions {
    pub corners: bool,
    pub edges: bool,
    pub ghost_axes: [bool; 3],
}




// ============================================================================
impl RefreshOptions {

    pub fn faces_only() -> Self {
        Self { corners: false, edges: false, ghost_axes: [false; 3] }
    }

    /**
     * The smallest face rank refreshed in a rank-`d` space: 0 when corners
     * are included, 1 when edges are, 2 otherwise, never more than `d - 1`.
     */
    pub fn min_face_rank(&self, rank: usize) -> usize {
        let r = if self.corners {
            0
        } else if self.edges {
            1
        } else {
            2
        };
        r.min(rank.saturating_sub(1))
    }

    /**
     * All directions a refresh with these options visits.
     */
    pub fn selectors(&self, rank: usize) -> impl Iterator<Item = Selector> {
        Selector::iter(rank, self.min_face_rank(rank))
    }

    /**
     * Whether a refresh with these options visits the given direction.
     */
    pub fn admits(&self, rank: usize, selector: Selector) -> bool {
        !selector.is_whole() && selector.face_rank(rank) >= self.min_face_rank(rank)
    }
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self { corners: true, edges: true, ghost_axes: [true; 3] }
    }
}




/**
 * Declaration of a single field.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default = "FieldConfig::cell_centered")]
    pub centering: [bool; 3],
    #[serde(default = "FieldConfig::unit_ghosts")]
    pub ghosts: [usize; 3],
    #[serde(default = "FieldConfig::refreshed")]
    pub refresh: bool,
}

impl FieldConfig {

    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            precision: Precision::default(),
            centering: Self::cell_centered(),
            ghosts: Self::unit_ghosts(),
            refresh: true,
        }
    }

    fn cell_centered() -> [bool; 3] {
        [true; 3]
    }

    fn unit_ghosts() -> [usize; 3] {
        [1; 3]
    }

    fn refreshed() -> bool {
        true
    }
}




/**
 * Everything needed to set up a tree and the field layout shared by its
 * blocks.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub rank: usize,
    pub branch: usize,
    pub max_level: u32,
    #[serde(default)]
    pub branching: Branching,
    pub block_size: [usize; 3],
    #[serde(default)]
    pub alignment: usize,
    #[serde(default)]
    pub padding: usize,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub refresh: RefreshOptions,
}




// ============================================================================
impl Config {


    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=3).contains(&self.rank) {
            return Err(Error::Config(format!("rank must be 1, 2 or 3, got {}", self.rank)));
        }
        if !self.branch.is_power_of_two() || !(2..=16).contains(&self.branch) {
            return Err(Error::Config(format!("branch must be a power of two in 2..=16, got {}", self.branch)));
        }
        for a in 0..3 {
            if self.block_size[a] == 0 {
                return Err(Error::Config(format!("block size is zero on axis {}", a)));
            }
            if a >= self.rank && self.block_size[a] != 1 {
                return Err(Error::Config(format!("axis {} is unused at rank {} but has block size {}", a, self.rank, self.block_size[a])));
            }
        }
        if self.alignment > 1 && !self.alignment.is_power_of_two() {
            return Err(Error::Config(format!("alignment {} is not a power of two", self.alignment)));
        }
        Ok(())
    }


    /**
     * Build the (unrefined) tree described by this configuration.
     */
    pub fn tree(&self) -> Result<Tree, Error> {
        self.validate()?;
        Tree::new(self.rank, self.branch)
    }


    /**
     * Build the field descriptor described by this configuration. Ghost
     * depths on axes beyond the rank are dropped.
     */
    pub fn descriptor(&self) -> Result<FieldDescriptor, Error> {
        self.validate()?;

        let mut descr = FieldDescriptor::new();
        descr.set_alignment(self.alignment.max(1))?;
        descr.set_padding(self.padding)?;

        for field in &self.fields {
            let id = descr.insert_field(&field.name)?;
            let mut ghosts = field.ghosts;
            ghosts.iter_mut().skip(self.rank).for_each(|g| *g = 0);
            descr.set_precision(id, field.precision)?;
            descr.set_centering(id, field.centering)?;
            descr.set_ghosts(id, ghosts)?;
            descr.set_refresh(id, field.refresh)?;
        }
        Ok(descr)
    }


    /**
     * Read a configuration from CBOR-encoded bytes.
     */
    pub fn from_cbor<R: Read>(reader: R) -> Result<Self, Error> {
        let config: Self = ciborium::de::from_reader(reader).map_err(|e| Error::Config(format!("{:?}", e)))?;
        config.validate()?;
        Ok(config)
    }


    /**
     * Write this configuration as CBOR.
     */
    pub fn to_cbor<W: Write>(&self, writer: W) -> Result<(), Error> {
        ciborium::ser::into_writer(self, writer).map_err(|e| Error::Config(format!("{:?}", e)))
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{Branching, Config, FieldConfig, RefreshOptions};
    use crate::error::Error;
    use crate::field::Precision;

    fn config() -> Config {
        Config {
            rank: 2,
            branch: 2,
            max_level: 3,
            branching: Branching::Full,
            block_size: [8, 8, 1],
            alignment: 16,
            padding: 0,
            fields: vec![FieldConfig::new("density"), FieldConfig::new("energy")],
            refresh: RefreshOptions::default(),
        }
    }

    #[test]
    fn min_face_rank_follows_the_included_parts() {
        let mut options = RefreshOptions::default();
        assert_eq!(options.min_face_rank(3), 0);
        options.corners = false;
        assert_eq!(options.min_face_rank(3), 1);
        options.edges = false;
        assert_eq!(options.min_face_rank(3), 2);
        assert_eq!(options.min_face_rank(2), 1);
        assert_eq!(RefreshOptions::faces_only().selectors(2).count(), 4);
    }

    #[test]
    fn config_survives_a_cbor_round_trip() {
        let mut bytes = Vec::new();
        config().to_cbor(&mut bytes).unwrap();
        assert_eq!(Config::from_cbor(bytes.as_slice()).unwrap(), config());
    }

    #[test]
    fn descriptor_drops_ghosts_on_unused_axes() {
        let descr = config().descriptor().unwrap();
        assert_eq!(descr.field_count(), 2);
        assert_eq!(descr.field(0).unwrap().ghosts, [1, 1, 0]);
        assert_eq!(descr.field(1).unwrap().precision, Precision::Double);
        assert_eq!(descr.alignment(), 16);
    }

    #[test]
    fn invalid_branch_is_rejected() {
        let mut c = config();
        c.branch = 3;
        assert!(matches!(c.validate(), Err(Error::Config(_))));
        c.branch = 2;
        c.block_size = [8, 8, 2];
        assert!(matches!(c.tree(), Err(Error::Config(_))));
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use serde::{Deserialize, Serialize};
use crate::error::Error;
use super::precision::Precision;




/**
 * Layout attributes of one field.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub precision: Precision,
    /// Cell-centered (`true`) or face-centered (`false`) on each axis.
    pub centering: [bool; 3],
    pub ghosts: [usize; 3],
    /// Whether a ghost refresh exchanges this field.
    pub refresh: bool,
}

impl FieldInfo {

    /**
     * Number of values along each axis of the field's array, for blocks with
     * `size` cells, with or without ghost zones.
     */
    pub fn dims(&self, size: [usize; 3], ghosts: bool) -> [usize; 3] {
        let mut d = [0; 3];
        for a in 0..3 {
            d[a] = size[a] + !self.centering[a] as usize + if ghosts { 2 * self.ghosts[a] } else { 0 };
        }
        d
    }

    /**
     * Size of the field's array in bytes.
     */
    pub fn bytes(&self, size: [usize; 3], ghosts: bool) -> usize {
        self.dims(size, ghosts).iter().product::<usize>() * self.precision.size()
    }

    pub fn is_cell_centered(&self) -> bool {
        self.centering.iter().all(|&c| c)
    }
}




/**
 * The catalog of fields stored on every block, together with the memory
 * layout rules of the per-block buffers. A descriptor freezes when the first
 * field store is allocated against it; after that its field list and every
 * per-field layout attribute are immutable. Groups and refresh flags do not
 * affect layout and stay editable.
 */
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FieldDescriptor {
    fields: Vec<FieldInfo>,
    groups: BTreeMap<String, BTreeSet<usize>>,
    alignment: usize,
    padding: usize,
    #[serde(skip)]
    frozen: AtomicBool,
}




// ============================================================================
impl FieldDescriptor {


    pub fn new() -> Self {
        Self { alignment: 1, ..Self::default() }
    }


    pub fn field_count(&self) -> usize {
        self.fields.len()
    }


    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }


    pub fn field(&self, id: usize) -> Option<&FieldInfo> {
        self.fields.get(id)
    }


    pub fn field_id(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }


    /**
     * Byte alignment of each field's start. Never less than 1.
     */
    pub fn alignment(&self) -> usize {
        self.alignment.max(1)
    }


    /**
     * Each field's size is rounded up to a multiple of this many bytes; zero
     * means no padding.
     */
    pub fn padding(&self) -> usize {
        self.padding
    }


    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }


    /**
     * Forbid further layout changes. Called when a store allocates against
     * this descriptor.
     */
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release)
    }


    /**
     * Append a field with double precision, cell centering, and one ghost
     * zone on each axis. Returns its id.
     */
    pub fn insert_field(&mut self, name: &str) -> Result<usize, Error> {
        self.check_mutable(name)?;

        if self.field_id(name).is_some() {
            return Err(Error::Config(format!("field '{}' is already defined", name)));
        }
        self.fields.push(FieldInfo {
            name: name.to_string(),
            precision: Precision::default(),
            centering: [true; 3],
            ghosts: [1; 3],
            refresh: true,
        });
        Ok(self.fields.len() - 1)
    }


    pub fn set_precision(&mut self, id: usize, precision: Precision) -> Result<(), Error> {
        self.layout_field_mut(id)?.precision = precision;
        Ok(())
    }


    pub fn set_centering(&mut self, id: usize, centering: [bool; 3]) -> Result<(), Error> {
        self.layout_field_mut(id)?.centering = centering;
        Ok(())
    }


    pub fn set_ghosts(&mut self, id: usize, ghosts: [usize; 3]) -> Result<(), Error> {
        self.layout_field_mut(id)?.ghosts = ghosts;
        Ok(())
    }


    pub fn set_alignment(&mut self, alignment: usize) -> Result<(), Error> {
        self.check_mutable("alignment")?;

        if alignment > 1 && !alignment.is_power_of_two() {
            return Err(Error::Config(format!("alignment {} is not a power of two", alignment)));
        }
        self.alignment = alignment.max(1);
        Ok(())
    }


    pub fn set_padding(&mut self, padding: usize) -> Result<(), Error> {
        self.check_mutable("padding")?;
        self.padding = padding;
        Ok(())
    }


    pub fn set_refresh(&mut self, id: usize, refresh: bool) -> Result<(), Error> {
        let field = self.fields.get_mut(id).ok_or_else(|| Error::Config(format!("no field with id {}", id)))?;
        field.refresh = refresh;
        Ok(())
    }


    /**
     * Create an empty group. Inserting an existing group is harmless.
     */
    pub fn insert_group(&mut self, group: &str) {
        self.groups.entry(group.to_string()).or_default();
    }


    pub fn add_to_group(&mut self, id: usize, group: &str) -> Result<(), Error> {
        if id >= self.fields.len() {
            return Err(Error::Config(format!("no field with id {}", id)));
        }
        match self.groups.get_mut(group) {
            Some(members) => {
                members.insert(id);
                Ok(())
            }
            None => Err(Error::Config(format!("no group named '{}'", group))),
        }
    }


    pub fn is_in_group(&self, id: usize, group: &str) -> bool {
        self.groups.get(group).map_or(false, |members| members.contains(&id))
    }


    pub fn group_members(&self, group: &str) -> Vec<usize> {
        self.groups.get(group).map_or_else(Vec::new, |members| members.iter().copied().collect())
    }


    fn check_mutable(&self, what: &str) -> Result<(), Error> {
        if self.is_frozen() {
            Err(Error::State(format!("cannot change {}: field descriptor is frozen", what)))
        } else {
            Ok(())
        }
    }


    fn layout_field_mut(&mut self, id: usize) -> Result<&mut FieldInfo, Error> {
        if self.is_frozen() {
            let name = self.fields.get(id).map_or("?", |f| f.name.as_str());
            return Err(Error::State(format!("cannot change field '{}': field descriptor is frozen", name)));
        }
        self.fields.get_mut(id).ok_or_else(|| Error::Config(format!("no field with id {}", id)))
    }
}

impl Clone for FieldDescriptor {

    /**
     * Copies the field catalog. The copy is not frozen, since no store has
     * been allocated against it.
     */
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            groups: self.groups.clone(),
            alignment: self.alignment,
            padding: self.padding,
            frozen: AtomicBool::new(false),
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::FieldDescriptor;
    use crate::error::Error;
    use crate::field::Precision;

    #[test]
    fn fields_are_found_by_name() {
        let mut descr = FieldDescriptor::new();
        let d = descr.insert_field("density").unwrap();
        let v = descr.insert_field("velocity_x").unwrap();
        assert_eq!((d, v), (0, 1));
        assert_eq!(descr.field_id("velocity_x"), Some(1));
        assert_eq!(descr.field_id("pressure"), None);
        assert!(descr.insert_field("density").is_err());
    }

    #[test]
    fn face_centering_adds_one_value_per_axis() {
        let mut descr = FieldDescriptor::new();
        let id = descr.insert_field("bx").unwrap();
        descr.set_centering(id, [false, true, true]).unwrap();
        descr.set_ghosts(id, [2, 2, 0]).unwrap();
        let field = descr.field(id).unwrap();
        assert_eq!(field.dims([4, 4, 1], false), [5, 4, 1]);
        assert_eq!(field.dims([4, 4, 1], true), [9, 8, 1]);
        assert!(!field.is_cell_centered());
    }

    #[test]
    fn frozen_descriptor_rejects_layout_changes() {
        let mut descr = FieldDescriptor::new();
        let id = descr.insert_field("density").unwrap();
        descr.insert_group("conserved");
        descr.freeze();

        assert!(matches!(descr.insert_field("energy"), Err(Error::State(_))));
        assert!(matches!(descr.set_precision(id, Precision::Single), Err(Error::State(_))));
        assert!(matches!(descr.set_alignment(64), Err(Error::State(_))));
        assert!(descr.add_to_group(id, "conserved").is_ok());
        assert!(descr.set_refresh(id, false).is_ok());
        assert!(!descr.clone().is_frozen());
    }

    #[test]
    fn group_membership_is_tracked() {
        let mut descr = FieldDescriptor::new();
        let a = descr.insert_field("density").unwrap();
        let b = descr.insert_field("potential").unwrap();
        descr.insert_group("conserved");
        descr.add_to_group(a, "conserved").unwrap();

        assert!(descr.is_in_group(a, "conserved"));
        assert!(!descr.is_in_group(b, "conserved"));
        assert!(descr.add_to_group(b, "derived").is_err());
        assert_eq!(descr.group_members("conserved"), vec![a]);
    }
}

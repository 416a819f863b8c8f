//! Field catalogs and the per-block byte buffers that hold field data.

mod descr;
mod precision;
mod store;

pub use descr::{FieldDescriptor, FieldInfo};
pub use precision::{decode, encode, Element, Precision};
pub use store::FieldStore;

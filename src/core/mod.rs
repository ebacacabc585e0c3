pub mod error;
pub mod key;
pub mod value;

pub use error::{EntityError, Result};
pub use key::EntityKey;
pub use value::{FieldMap, Value, diff_fields};

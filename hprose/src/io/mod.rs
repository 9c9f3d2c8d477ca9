//! Value codec for the hprose wire format.
//!
//! Only the subset the call grammar needs is supported: scalars, strings,
//! byte strings, lists, maps and string back-references.

pub mod tags;

mod value;
pub use value::Value;

mod value_type;
pub use value_type::ValueType;

mod reader;
pub use reader::Reader;

mod writer;
pub use writer::Writer;

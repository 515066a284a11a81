//! Tuples, schemas, and scans.
//!
//! - **DataType / Value**: fixed-width column types and their values
//! - **TupleDesc / Tuple**: table schemas and rows, with slot encoding
//! - **TupleIterator**: the open/has_next/next/rewind/close protocol that
//!   operators consume, implemented over heap files by `HeapFileIterator`

pub mod scan;
pub mod tuple;
pub mod value;

pub use scan::{HeapFileIterator, TupleIterator};
pub use tuple::{Field, RecordId, Tuple, TupleDesc};
pub use value::{DataType, Value};

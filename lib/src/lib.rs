pub mod consts;
pub mod error;
pub mod interval;
pub mod memory;
pub mod method;
pub mod path;

// re-export
pub use error::{ProcessorError, ProcessorResult};
pub use interval::{Interval, SyncType};
pub use memory::{ItemState, Memory};
pub use method::Method;

//! Driving make and turning its output into compiler invocations.

pub mod line_buffer;
pub mod observer;
pub mod parser;
pub mod session;

pub use line_buffer::LineBuffer;
pub use observer::{BuildObserver, CollectingObserver};
pub use parser::{MakefileParser, MakefileParserBuilder};
pub use session::{BuildSession, PchAliases};

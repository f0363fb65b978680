mod chunk;
pub mod reader;
pub mod writer;

pub use self::reader::{Entries, Entry, TomeReader};
pub use self::writer::{TomeWriter, WriterOptions};

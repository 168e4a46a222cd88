pub mod error;
pub mod path;
pub mod checksum;
pub mod header;
pub mod format;
pub mod index;
pub mod io_stream;
pub mod container;
pub mod mutate;
pub mod extract;

pub use error::{PckError, Result};
pub use header::{Header, ProducerVersion};
pub use index::{Entry, EntryIndex, EntryInfo};
pub use io_stream::{Cutoff, PckReader, PckWriter};
pub use container::{Container, PckOptions, State};
pub use mutate::Editor;

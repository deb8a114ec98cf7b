pub mod codec;
pub mod error;
pub mod index;
pub mod ingest;
pub mod query;
pub mod record;
pub mod store;
pub mod tokenizer;
pub mod tsv;

pub use error::{Error, Result};
pub use index::{Index, MediaId, SeenTitles};
pub use query::Query;
pub use store::{IndexStore, MemoryStore, SledStore};

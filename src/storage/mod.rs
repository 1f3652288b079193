//! Storage backends for panelgraph
//!
//! The pipeline talks to the graph only through the `GraphStore` trait.
//! `SqliteStore` is the bundled persistent implementation.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    with_transaction, EdgeFilter, GraphStore, Merged, NodeFilter, OpenStore, SharedStore,
    StorageError, StorageResult, TxBody,
};

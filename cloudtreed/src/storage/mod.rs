pub mod metadata;
pub mod paths;
pub mod physical;

pub use metadata::{MetadataError, MetadataStore, SqliteMetadataStore};
pub use physical::{LocalDiskStore, PhysicalError, PhysicalStore, StashToken};

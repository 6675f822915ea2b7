//! Local search index: persistent store plus the crawler that fills it.

pub mod crawler;
pub mod store;

pub use crawler::{CollectionCatalog, CrawlError, CrawlProgress, Crawler};
pub use store::{
    Collection, FileRecord, IndexStats, IndexStore, NewFileRecord, SearchResult, StoreError,
};

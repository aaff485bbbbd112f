pub mod crawler;
pub mod fetcher;
pub mod golden_store;
pub mod page_processor;
pub mod pagination;
pub mod run_aggregator;

pub use crawler::*;
pub use fetcher::*;
pub use golden_store::*;
pub use page_processor::*;
pub use pagination::*;
pub use run_aggregator::*;

pub mod catalog;
pub mod search;

pub use catalog::CatalogModule;
pub use search::SearchModule;

pub mod collect;
pub mod commons;
pub mod enrich;
pub mod error;
pub mod geo_core;
pub mod geometric;
pub mod report;

pub use error::OsmHeightError;

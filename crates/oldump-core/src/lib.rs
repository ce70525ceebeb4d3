pub mod archive;
pub mod checkpoint;
pub mod codec;
pub mod compile;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod io;
pub mod orchestrator;
pub mod paths;
pub mod pipe;
pub mod record;
pub mod reduce;
pub mod sitemap;
pub mod sort;
pub mod split;
pub mod types;

pub use error::{DumpError, Result};

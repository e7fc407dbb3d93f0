pub mod assets;
pub mod data_io;
pub mod describe;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod harvest;
pub mod rewrite;
pub mod runtime;
pub mod types;

pub use error::{FillError, Result};
pub use runtime::{RunSummary, run, run_pipeline};
pub use types::{RewriteMode, RunConfig, SiteProfile};

//! Flow execution: the tree-walking runner and its transport seam.

mod runner;
mod transport;

pub use runner::{RunReport, Runner};
pub use transport::{ApiRequest, Transport};

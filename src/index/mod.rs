pub mod idents;
pub mod models;
pub mod registry;

pub use idents::{IdentIndex, PackageIdents};
pub use models::*;
pub use registry::PackageRegistry;

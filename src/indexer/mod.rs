pub mod dirtree;
pub mod extractor;
pub mod package;
pub mod parser;
pub mod progress;

pub use dirtree::{skip_dir, TreeBuilder};
pub use extractor::IdentExtractor;
pub use package::{PackageIndexer, UpdatePass};
pub use parser::{ParsedFile, Parser};
pub use progress::{ProgressSnapshot, UpdateProgress};

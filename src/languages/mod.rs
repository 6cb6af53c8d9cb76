pub mod go;

pub use go::{GoGrammar, ASM_EXTENSION, C_INTEROP_EXTENSIONS, GO_EXTENSION, GO_TEST_SUFFIX};

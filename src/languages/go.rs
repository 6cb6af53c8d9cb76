use once_cell::sync::OnceCell;
use tree_sitter::Query;

/// Tree-sitter handle for Go sources.
pub struct GoGrammar;

// Static query caches for Go
static GO_IMPORTS_QUERY: OnceCell<Query> = OnceCell::new();

pub const GO_EXTENSION: &str = ".go";
pub const GO_TEST_SUFFIX: &str = "_test.go";
pub const ASM_EXTENSION: &str = ".S";

/// Extensions of the C-family sources cgo compiles alongside Go.
pub const C_INTEROP_EXTENSIONS: &[&str] =
    &[".c", ".cc", ".cpp", ".cxx", ".m", ".h", ".hh", ".hpp", ".hxx"];

impl GoGrammar {
    pub fn language(&self) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
    }

    pub fn imports_query(&self) -> &str {
        r#"
        (import_declaration
            (import_spec
                path: (interpreted_string_literal) @import_path
            )
        ) @import

        (import_declaration
            (import_spec_list
                (import_spec
                    path: (interpreted_string_literal) @import_path
                )
            )
        ) @import_list
        "#
    }

    pub fn cached_imports_query(&self) -> Option<&'static Query> {
        GO_IMPORTS_QUERY
            .get_or_try_init(|| Query::new(&self.language(), self.imports_query()))
            .ok()
    }

    /// Go file names are matched case-sensitively: `x.GO` is not a Go file.
    pub fn is_go_file(&self, name: &str) -> bool {
        name.len() > GO_EXTENSION.len() && name.ends_with(GO_EXTENSION)
    }

    pub fn is_test_file(&self, name: &str) -> bool {
        name.ends_with(GO_TEST_SUFFIX)
    }

    /// Preprocessed assembly; lowercase `.s` is plain Go assembly.
    pub fn is_asm_file(&self, name: &str) -> bool {
        name.len() > ASM_EXTENSION.len() && name.ends_with(ASM_EXTENSION)
    }

    pub fn is_c_interop_file(&self, name: &str) -> bool {
        C_INTEROP_EXTENSIONS
            .iter()
            .any(|ext| name.len() > ext.len() && name.ends_with(ext))
    }
}

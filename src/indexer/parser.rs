use std::path::Path;

use tree_sitter::StreamingIterator;

use crate::error::{CorpusError, Result};
use crate::fs::GatedFs;
use crate::languages::GoGrammar;

pub struct Parser {
    grammar: GoGrammar,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self { grammar: GoGrammar }
    }

    pub fn parse_file(&self, fs: &GatedFs, path: &Path) -> Result<ParsedFile> {
        let source = fs.read_file(path)?;
        self.parse_source(source)
    }

    pub fn parse_source(&self, source: impl Into<Vec<u8>>) -> Result<ParsedFile> {
        let source = source.into();
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&self.grammar.language())
            .map_err(|e| CorpusError::Parse(e.to_string()))?;

        let tree = parser
            .parse(&source, None)
            .ok_or_else(|| CorpusError::Parse("Failed to parse source".to_string()))?;

        Ok(ParsedFile { tree, source })
    }

    /// Declared package name of a file, reading nothing past the clause.
    pub fn package_name(&self, fs: &GatedFs, path: &Path) -> Result<String> {
        let parsed = self.parse_file(fs, path)?;
        parsed
            .package_name()
            .map(str::to_string)
            .ok_or_else(|| CorpusError::Parse(format!("{}: missing package clause", path.display())))
    }
}

pub struct ParsedFile {
    pub tree: tree_sitter::Tree,
    pub source: Vec<u8>,
}

impl ParsedFile {
    pub fn root_node(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    pub fn source_bytes(&self) -> &[u8] {
        &self.source
    }

    pub fn node_text(&self, node: &tree_sitter::Node) -> &str {
        node.utf8_text(self.source_bytes()).unwrap_or("")
    }

    /// Name from the package clause, which must be the first non-comment
    /// node of the file and free of syntax errors.
    pub fn package_name(&self) -> Option<&str> {
        let root = self.root_node();
        let mut cursor = root.walk();
        let clause = root
            .named_children(&mut cursor)
            .find(|n| n.kind() != "comment")?;
        if clause.kind() != "package_clause" || clause.has_error() {
            return None;
        }

        let mut cursor = clause.walk();
        let ident = clause
            .named_children(&mut cursor)
            .find(|n| n.kind() == "package_identifier")?;
        let name = self.node_text(&ident);
        (!name.is_empty()).then_some(name)
    }

    /// Unquoted import paths in declaration order.
    pub fn imports(&self) -> Vec<String> {
        let Some(query) = GoGrammar.cached_imports_query() else {
            tracing::warn!("Invalid imports query for go");
            return Vec::new();
        };
        let Some(path_idx) = query.capture_index_for_name("import_path") else {
            return Vec::new();
        };

        let mut imports = Vec::new();
        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(query, self.root_node(), self.source_bytes());
        while let Some(m) = matches.next() {
            for capture in m.captures.iter().filter(|c| c.index == path_idx) {
                let text = self.node_text(&capture.node);
                imports.push(text.trim_matches('"').to_string());
            }
        }
        imports
    }
}

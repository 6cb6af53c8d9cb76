use std::path::Path;
use std::sync::Arc;

use crate::fs::GatedFs;
use crate::index::{Ident, IdentKind, Package, PackageIdents, TypInfo};
use crate::indexer::parser::{ParsedFile, Parser};
use crate::intern::Interner;

/// Package-level attributes shared by every identifier of a package.
struct PackageContext {
    package_name: Arc<str>,
    import_path: Arc<str>,
    dir: Arc<Path>,
}

/// Extracts top-level declarations (consts, vars, types, funcs, methods).
pub struct IdentExtractor<'a> {
    interner: &'a Interner,
}

impl<'a> IdentExtractor<'a> {
    pub fn new(interner: &'a Interner) -> Self {
        Self { interner }
    }

    /// Parses every buildable file of `pkg` and collects its identifiers.
    /// Files that cannot be read are skipped.
    pub fn extract_package(&self, fs: &GatedFs, pkg: &Package) -> PackageIdents {
        let parser = Parser::new();
        let ctx = PackageContext {
            package_name: Arc::clone(&pkg.name),
            import_path: Arc::clone(&pkg.import_path),
            dir: Arc::from(pkg.dir.as_path()),
        };

        let mut out = PackageIdents::default();
        for file in pkg.go_files() {
            match parser.parse_file(fs, &file.path) {
                Ok(parsed) => self.extract_file(&parsed, &file.name, &ctx, &mut out),
                Err(e) => tracing::debug!("skipping identifiers of {}: {}", file.path.display(), e),
            }
        }
        out
    }

    fn extract_file(
        &self,
        parsed: &ParsedFile,
        file: &Arc<str>,
        ctx: &PackageContext,
        out: &mut PackageIdents,
    ) {
        let root = parsed.root_node();
        let mut cursor = root.walk();
        for decl in root.named_children(&mut cursor) {
            match decl.kind() {
                "function_declaration" => {
                    if let Some(name) = decl.child_by_field_name("name") {
                        self.record(parsed, file, ctx, &name, IdentKind::Func, None, out);
                    }
                }
                "method_declaration" => self.extract_method(parsed, file, ctx, &decl, out),
                "type_declaration" => {
                    let mut specs = decl.walk();
                    for spec in decl.named_children(&mut specs) {
                        if matches!(spec.kind(), "type_spec" | "type_alias") {
                            if let Some(name) = spec.child_by_field_name("name") {
                                self.record(parsed, file, ctx, &name, IdentKind::Type, None, out);
                            }
                        }
                    }
                }
                "const_declaration" => {
                    self.extract_values(parsed, file, ctx, &decl, IdentKind::Const, out)
                }
                "var_declaration" => {
                    self.extract_values(parsed, file, ctx, &decl, IdentKind::Var, out)
                }
                _ => {}
            }
        }
    }

    fn extract_method(
        &self,
        parsed: &ParsedFile,
        file: &Arc<str>,
        ctx: &PackageContext,
        decl: &tree_sitter::Node,
        out: &mut PackageIdents,
    ) {
        let Some(name) = decl.child_by_field_name("name") else {
            return;
        };
        let Some(receiver) = decl
            .child_by_field_name("receiver")
            .and_then(|r| receiver_type(parsed, &r))
        else {
            tracing::trace!("skipping method with unsupported receiver at byte {}", decl.start_byte());
            return;
        };
        self.record(parsed, file, ctx, &name, IdentKind::Method, None, out);
        self.record(parsed, file, ctx, &name, IdentKind::Method, Some(receiver), out);
    }

    /// `const_spec`/`var_spec` names, descending into grouped spec lists.
    fn extract_values(
        &self,
        parsed: &ParsedFile,
        file: &Arc<str>,
        ctx: &PackageContext,
        node: &tree_sitter::Node,
        kind: IdentKind,
        out: &mut PackageIdents,
    ) {
        let mut cursor = node.walk();
        for spec in node.named_children(&mut cursor) {
            match spec.kind() {
                "const_spec" | "var_spec" => {
                    let mut names = spec.walk();
                    for name in spec.children_by_field_name("name", &mut names) {
                        self.record(parsed, file, ctx, &name, kind, None, out);
                    }
                }
                "var_spec_list" | "const_spec_list" => {
                    self.extract_values(parsed, file, ctx, &spec, kind, out)
                }
                _ => {}
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        parsed: &ParsedFile,
        file: &Arc<str>,
        ctx: &PackageContext,
        node: &tree_sitter::Node,
        kind: IdentKind,
        receiver: Option<&str>,
        out: &mut PackageIdents,
    ) {
        let text = parsed.node_text(node);
        if text.is_empty() || text == "_" {
            return;
        }
        let name = self.interner.intern(text);
        let key = match receiver {
            Some(recv) => self.interner.intern(&format!("{}.{}", recv, text)),
            None => Arc::clone(&name),
        };
        let (offset, line) = position(parsed, node);

        out.push(
            key,
            Ident {
                name,
                package_name: Arc::clone(&ctx.package_name),
                import_path: Arc::clone(&ctx.import_path),
                dir: Arc::clone(&ctx.dir),
                file: Arc::clone(file),
                info: TypInfo::new(kind, offset, line),
            },
        );
    }
}

/// Byte offset and 1-based line of `node`, or zeros when the parser reports
/// a position outside the source.
fn position(parsed: &ParsedFile, node: &tree_sitter::Node) -> (usize, usize) {
    let offset = node.start_byte();
    if offset >= parsed.source_bytes().len() {
        return (0, 0);
    }
    (offset, node.start_position().row + 1)
}

/// Type name of a method receiver with pointers, parentheses and type
/// arguments stripped; `None` for anything that is not a plain type name.
fn receiver_type<'p>(parsed: &'p ParsedFile, receiver: &tree_sitter::Node) -> Option<&'p str> {
    let mut cursor = receiver.walk();
    let param = receiver
        .named_children(&mut cursor)
        .find(|n| n.kind() == "parameter_declaration")?;
    let mut ty = param.child_by_field_name("type")?;
    loop {
        match ty.kind() {
            "pointer_type" | "parenthesized_type" => ty = ty.named_child(0)?,
            "generic_type" => ty = ty.child_by_field_name("type")?,
            "type_identifier" => {
                let name = parsed.node_text(&ty);
                return (!name.is_empty()).then_some(name);
            }
            _ => return None,
        }
    }
}

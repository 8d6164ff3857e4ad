//! Per-language strategies for the code chunker.
//!
//! A strategy teaches the chunker how to walk one grammar: which node kinds
//! form the file header (package/import/use/preprocessor directives), which
//! node kinds become chunks, and how to pull typed metadata out of a chunk
//! node. Strategies are resolved by (mime, language, extension).

use mnemo_core::CodeMetadata;
use tree_sitter::{Language, Node};

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

pub struct Strategy {
    /// Canonical language id carried on every chunk's metadata.
    pub language: &'static str,
    pub grammar: fn() -> Language,
    /// Top-level node kinds forming the leading header region.
    pub header_kinds: &'static [&'static str],
    /// Node kinds that become chunks. Nested chunkable nodes are owned by
    /// the outermost one.
    pub chunk_kinds: &'static [&'static str],
    extract: fn(&Node, &[u8]) -> CodeMetadata,
}

impl Strategy {
    pub fn should_chunk(&self, node: &Node) -> bool {
        self.chunk_kinds.contains(&node.kind())
    }

    pub fn is_header(&self, node: &Node) -> bool {
        self.header_kinds.contains(&node.kind())
    }

    pub fn extract_metadata(&self, node: &Node, source: &[u8]) -> CodeMetadata {
        let mut meta = (self.extract)(node, source);
        meta.language = self.language.to_string();
        if meta.signature.is_none() {
            meta.signature = Some(signature_of(node, source, self.language == "python"));
        }
        meta
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

fn go_grammar() -> Language {
    tree_sitter_go::LANGUAGE.into()
}
fn python_grammar() -> Language {
    tree_sitter_python::LANGUAGE.into()
}
fn javascript_grammar() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}
fn typescript_grammar() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}
fn java_grammar() -> Language {
    tree_sitter_java::LANGUAGE.into()
}
fn rust_grammar() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}
fn c_grammar() -> Language {
    tree_sitter_c::LANGUAGE.into()
}
fn cpp_grammar() -> Language {
    tree_sitter_cpp::LANGUAGE.into()
}

static GO: Strategy = Strategy {
    language: "go",
    grammar: go_grammar,
    header_kinds: &["package_clause", "import_declaration"],
    chunk_kinds: &["function_declaration", "method_declaration", "type_declaration"],
    extract: extract_go,
};

static PYTHON: Strategy = Strategy {
    language: "python",
    grammar: python_grammar,
    header_kinds: &["import_statement", "import_from_statement", "future_import_statement"],
    chunk_kinds: &["function_definition", "class_definition", "decorated_definition"],
    extract: extract_python,
};

static JAVASCRIPT: Strategy = Strategy {
    language: "javascript",
    grammar: javascript_grammar,
    header_kinds: &["import_statement"],
    chunk_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "class_declaration",
        "method_definition",
    ],
    extract: extract_js,
};

static TYPESCRIPT: Strategy = Strategy {
    language: "typescript",
    grammar: typescript_grammar,
    header_kinds: &["import_statement"],
    chunk_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "class_declaration",
        "abstract_class_declaration",
        "method_definition",
        "interface_declaration",
        "enum_declaration",
        "type_alias_declaration",
        "internal_module",
    ],
    extract: extract_js,
};

static JAVA: Strategy = Strategy {
    language: "java",
    grammar: java_grammar,
    header_kinds: &["package_declaration", "import_declaration"],
    chunk_kinds: &[
        "class_declaration",
        "interface_declaration",
        "enum_declaration",
        "record_declaration",
        "annotation_type_declaration",
        "method_declaration",
    ],
    extract: extract_java,
};

static RUST: Strategy = Strategy {
    language: "rust",
    grammar: rust_grammar,
    header_kinds: &["use_declaration", "extern_crate_declaration"],
    chunk_kinds: &[
        "function_item",
        "struct_item",
        "enum_item",
        "union_item",
        "trait_item",
        "impl_item",
        "type_item",
        "mod_item",
    ],
    extract: extract_rust,
};

static C: Strategy = Strategy {
    language: "c",
    grammar: c_grammar,
    header_kinds: &["preproc_include", "preproc_def", "preproc_function_def"],
    chunk_kinds: &[
        "function_definition",
        "struct_specifier",
        "enum_specifier",
        "union_specifier",
        "type_definition",
    ],
    extract: extract_c,
};

static CPP: Strategy = Strategy {
    language: "cpp",
    grammar: cpp_grammar,
    header_kinds: &["preproc_include", "preproc_def", "preproc_function_def", "using_declaration"],
    chunk_kinds: &[
        "function_definition",
        "class_specifier",
        "struct_specifier",
        "enum_specifier",
        "union_specifier",
        "type_definition",
        "alias_declaration",
        "template_declaration",
        "namespace_definition",
    ],
    extract: extract_cpp,
};

static STRATEGIES: &[&Strategy] =
    &[&GO, &PYTHON, &JAVASCRIPT, &TYPESCRIPT, &JAVA, &RUST, &C, &CPP];

/// Resolve a strategy by language id, mime subtype, or file extension.
pub fn resolve(mime: &str, language: Option<&str>, ext: &str) -> Option<&'static Strategy> {
    if let Some(lang) = language {
        if let Some(s) = STRATEGIES.iter().copied().find(|s| s.language == lang) {
            return Some(s);
        }
    }
    let by_ext = match ext {
        "go" => Some("go"),
        "py" | "pyi" => Some("python"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "ts" | "tsx" => Some("typescript"),
        "java" => Some("java"),
        "rs" => Some("rust"),
        "c" | "h" => Some("c"),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some("cpp"),
        _ => None,
    };
    if let Some(lang) = by_ext {
        return STRATEGIES.iter().copied().find(|s| s.language == lang);
    }
    // Last resort: match on the mime subtype (text/x-go, text/x-rust, ...).
    let subtype = mime.rsplit('/').next().unwrap_or("").trim_start_matches("x-");
    STRATEGIES
        .iter()
        .copied()
        .find(|s| s.language == subtype || (s.language == "cpp" && subtype == "c++"))
}

// ---------------------------------------------------------------------------
// Shared extraction helpers
// ---------------------------------------------------------------------------

fn text<'a>(node: &Node<'a>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn field_text(node: &Node, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field).map(|n| text(&n, source).trim().to_string())
}

/// One-line display signature: first line up to the body opener.
fn signature_of(node: &Node, source: &[u8], python: bool) -> String {
    let first_line = text(node, source).lines().next().unwrap_or("").trim();
    let sig = if python {
        match first_line.find(':') {
            Some(colon) => &first_line[..=colon],
            None => first_line,
        }
    } else {
        match first_line.find('{') {
            Some(brace) => first_line[..brace].trim_end(),
            None => first_line,
        }
    };
    sig.to_string()
}

/// Does any (possibly anonymous) child have this exact kind?
fn has_child_kind(node: &Node, kind: &str) -> bool {
    let mut cursor = node.walk();
    let result = node.children(&mut cursor).any(|c| c.kind() == kind);
    result
}

/// Gather contiguous comment nodes immediately preceding `node`, strip
/// comment markers, and drop tag lines (`@param`-style).
fn preceding_doc(node: &Node, source: &[u8]) -> Option<String> {
    let mut comments: Vec<String> = Vec::new();
    let mut prev = node.prev_sibling();
    let mut next_start_row = node.start_position().row;
    while let Some(sib) = prev {
        let kind = sib.kind();
        if !matches!(kind, "comment" | "line_comment" | "block_comment") {
            break;
        }
        // Only comments directly above the node (no blank-line gap).
        if sib.end_position().row + 1 < next_start_row {
            break;
        }
        next_start_row = sib.start_position().row;
        comments.push(text(&sib, source).to_string());
        prev = sib.prev_sibling();
    }
    if comments.is_empty() {
        return None;
    }
    comments.reverse();
    let cleaned = clean_doc(&comments.join("\n"));
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Strip comment syntax and drop `@tag` lines, keeping the prose body.
fn clean_doc(raw: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in raw.lines() {
        let mut line = line.trim();
        for prefix in ["/**", "/*!", "/*", "*/", "///", "//!", "//", "*", "#"] {
            if let Some(rest) = line.strip_prefix(prefix) {
                line = rest.trim();
                break;
            }
        }
        let line = line.trim_end_matches("*/").trim();
        if line.starts_with('@') || line.starts_with(r"\param") {
            continue;
        }
        lines.push(line);
    }
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Parameter names from a parameter-list node, per-language child handling
/// delegated to `name_of`.
fn param_names(list: Option<Node>, source: &[u8], name_of: fn(&Node, &[u8]) -> Vec<String>) -> Vec<String> {
    let Some(list) = list else { return Vec::new() };
    let mut out = Vec::new();
    let mut cursor = list.walk();
    for child in list.named_children(&mut cursor) {
        out.extend(name_of(&child, source));
    }
    out
}

// ---------------------------------------------------------------------------
// Go
// ---------------------------------------------------------------------------

fn go_param_names(node: &Node, source: &[u8]) -> Vec<String> {
    // parameter_declaration holds one type and one or more names:
    // `a, b int` is a single declaration with two identifiers.
    if node.kind() != "parameter_declaration" && node.kind() != "variadic_parameter_declaration" {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "identifier" {
            out.push(text(&child, source).to_string());
        }
    }
    out
}

fn extract_go(node: &Node, source: &[u8]) -> CodeMetadata {
    let mut meta = CodeMetadata::default();
    let name = field_text(node, "name", source);

    // Visibility by identifier case.
    let exported = name
        .as_deref()
        .and_then(|n| n.chars().next())
        .map(|c| c.is_uppercase())
        .unwrap_or(false);
    meta.is_exported = exported;
    meta.visibility = Some(if exported { "public" } else { "private" }.to_string());

    match node.kind() {
        "function_declaration" | "method_declaration" => {
            meta.function_name = name;
            meta.parameters =
                param_names(node.child_by_field_name("parameters"), source, go_param_names);
            meta.return_type = field_text(node, "result", source);
            if node.kind() == "method_declaration" {
                // Receiver type doubles as the owning type.
                if let Some(receiver) = node.child_by_field_name("receiver") {
                    let recv = text(&receiver, source);
                    let ty = recv
                        .trim_matches(|c| c == '(' || c == ')')
                        .rsplit(|c: char| c.is_whitespace())
                        .next()
                        .unwrap_or("")
                        .trim_start_matches('*');
                    if !ty.is_empty() {
                        meta.parent_class = Some(ty.to_string());
                    }
                }
            }
        }
        "type_declaration" => {
            // type_spec carries the actual name.
            if let Some(spec) = node.named_child(0) {
                let spec_name = field_text(&spec, "name", source);
                let exported = spec_name
                    .as_deref()
                    .and_then(|n| n.chars().next())
                    .map(|c| c.is_uppercase())
                    .unwrap_or(false);
                meta.is_exported = exported;
                meta.visibility =
                    Some(if exported { "public" } else { "private" }.to_string());
                meta.class_name = spec_name;
            }
        }
        _ => {}
    }

    meta.docstring = preceding_doc(node, source);
    meta
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

fn python_param_names(node: &Node, source: &[u8]) -> Vec<String> {
    match node.kind() {
        "identifier" => vec![text(node, source).to_string()],
        "typed_parameter" | "default_parameter" | "typed_default_parameter" => node
            .named_child(0)
            .filter(|c| c.kind() == "identifier")
            .map(|c| vec![text(&c, source).to_string()])
            .unwrap_or_default(),
        "list_splat_pattern" | "dictionary_splat_pattern" => {
            vec![text(node, source).to_string()]
        }
        _ => Vec::new(),
    }
}

/// First statement of a body, when it is a bare string literal.
fn python_docstring(def: &Node, source: &[u8]) -> Option<String> {
    let body = def.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    let raw = text(&expr, source);
    let stripped = raw
        .trim_start_matches(|c| c == 'r' || c == 'b' || c == 'u' || c == 'f' || c == 'R')
        .trim_start_matches(['"', '\''])
        .trim_end_matches(['"', '\'']);
    let cleaned = stripped.trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

fn extract_python(node: &Node, source: &[u8]) -> CodeMetadata {
    // decorated_definition wraps the real definition; keep the decorators
    // and describe the inner node.
    if node.kind() == "decorated_definition" {
        let mut decorators = Vec::new();
        let mut inner = None;
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "decorator" => decorators
                    .push(text(&child, source).trim_start_matches('@').trim().to_string()),
                "function_definition" | "class_definition" => inner = Some(child),
                _ => {}
            }
        }
        let mut meta = match inner {
            Some(ref def) => extract_python(def, source),
            None => CodeMetadata::default(),
        };
        meta.decorators = decorators;
        return meta;
    }

    let mut meta = CodeMetadata::default();
    let name = field_text(node, "name", source);

    // `_`-prefixed names are module/class private by convention.
    let private = name.as_deref().map(|n| n.starts_with('_')).unwrap_or(false);
    meta.is_exported = !private;
    meta.visibility = Some(if private { "private" } else { "public" }.to_string());
    meta.docstring = python_docstring(node, source);

    match node.kind() {
        "function_definition" => {
            meta.function_name = name;
            meta.is_async = has_child_kind(node, "async");
            meta.parameters =
                param_names(node.child_by_field_name("parameters"), source, python_param_names);
            meta.return_type = field_text(node, "return_type", source);
            if let Some(parent) = node.parent().and_then(|b| b.parent()) {
                if parent.kind() == "class_definition" {
                    meta.parent_class = field_text(&parent, "name", source);
                    meta.is_constructor = meta.function_name.as_deref() == Some("__init__");
                }
            }
        }
        "class_definition" => {
            meta.class_name = name;
            if let Some(supers) = node.child_by_field_name("superclasses") {
                let mut cursor = supers.walk();
                for base in supers.named_children(&mut cursor) {
                    meta.implements.push(text(&base, source).to_string());
                }
            }
        }
        _ => {}
    }

    meta
}

// ---------------------------------------------------------------------------
// JavaScript / TypeScript
// ---------------------------------------------------------------------------

fn js_param_names(node: &Node, source: &[u8]) -> Vec<String> {
    match node.kind() {
        "identifier" => vec![text(node, source).to_string()],
        "required_parameter" | "optional_parameter" => node
            .child_by_field_name("pattern")
            .map(|p| vec![text(&p, source).to_string()])
            .unwrap_or_default(),
        "assignment_pattern" => node
            .child_by_field_name("left")
            .map(|p| vec![text(&p, source).to_string()])
            .unwrap_or_default(),
        "rest_pattern" => vec![text(node, source).to_string()],
        _ => Vec::new(),
    }
}

fn extract_js(node: &Node, source: &[u8]) -> CodeMetadata {
    let mut meta = CodeMetadata::default();
    let name = field_text(node, "name", source);

    // Exported when wrapped in an export_statement; accessibility_modifier
    // (TS class members) refines visibility.
    let exported = node.parent().map(|p| p.kind() == "export_statement").unwrap_or(false);
    meta.is_exported = exported;
    let accessibility = {
        let mut cursor = node.walk();
        let result = node.children(&mut cursor)
            .find(|c| c.kind() == "accessibility_modifier")
            .map(|c| text(&c, source).to_string());
        result
    };
    meta.visibility = accessibility
        .or_else(|| Some(if exported { "public" } else { "private" }.to_string()));
    meta.is_async = has_child_kind(node, "async");
    meta.is_static = has_child_kind(node, "static");
    meta.docstring = preceding_doc(node, source);

    match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            meta.function_name = name;
            meta.is_generator = node.kind() == "generator_function_declaration";
            meta.parameters =
                param_names(node.child_by_field_name("parameters"), source, js_param_names);
            meta.return_type = field_text(node, "return_type", source)
                .map(|t| t.trim_start_matches(':').trim().to_string());
        }
        "method_definition" => {
            meta.function_name = name.clone();
            meta.is_generator = has_child_kind(node, "*");
            meta.is_getter = has_child_kind(node, "get");
            meta.is_setter = has_child_kind(node, "set");
            meta.is_constructor = name.as_deref() == Some("constructor");
            meta.parameters =
                param_names(node.child_by_field_name("parameters"), source, js_param_names);
            meta.return_type = field_text(node, "return_type", source)
                .map(|t| t.trim_start_matches(':').trim().to_string());
            if let Some(class_node) = node
                .parent()
                .and_then(|body| body.parent())
                .filter(|p| p.kind().contains("class"))
            {
                meta.parent_class = field_text(&class_node, "name", source);
            }
        }
        "class_declaration" | "abstract_class_declaration" => {
            meta.class_name = name;
            if let Some(heritage) = node
                .children(&mut node.walk())
                .find(|c| c.kind() == "class_heritage")
            {
                let mut cursor = heritage.walk();
                for clause in heritage.children(&mut cursor) {
                    if matches!(clause.kind(), "implements_clause" | "extends_clause") {
                        let mut inner = clause.walk();
                        for ty in clause.named_children(&mut inner) {
                            meta.implements.push(text(&ty, source).to_string());
                        }
                    }
                }
            }
        }
        "interface_declaration" | "enum_declaration" | "type_alias_declaration" => {
            meta.class_name = name;
        }
        "internal_module" => {
            meta.namespace = name;
        }
        _ => {}
    }

    meta
}

// ---------------------------------------------------------------------------
// Java
// ---------------------------------------------------------------------------

fn java_param_names(node: &Node, source: &[u8]) -> Vec<String> {
    if matches!(node.kind(), "formal_parameter" | "spread_parameter") {
        field_text(node, "name", source).map(|n| vec![n]).unwrap_or_default()
    } else {
        Vec::new()
    }
}

fn extract_java(node: &Node, source: &[u8]) -> CodeMetadata {
    let mut meta = CodeMetadata::default();
    let name = field_text(node, "name", source);

    // Modifiers carry visibility, static-ness, and annotations.
    let mut visibility = None;
    if let Some(modifiers) = node
        .children(&mut node.walk())
        .find(|c| c.kind() == "modifiers")
    {
        let mut cursor = modifiers.walk();
        for m in modifiers.children(&mut cursor) {
            match m.kind() {
                "public" | "private" | "protected" => {
                    visibility = Some(text(&m, source).to_string())
                }
                "static" => meta.is_static = true,
                "marker_annotation" | "annotation" => meta
                    .decorators
                    .push(text(&m, source).trim_start_matches('@').trim().to_string()),
                _ => {}
            }
        }
    }
    meta.is_exported = visibility.as_deref() == Some("public");
    meta.visibility = visibility.or_else(|| Some("package".to_string()));
    meta.docstring = preceding_doc(node, source);

    match node.kind() {
        "method_declaration" => {
            meta.function_name = name;
            meta.parameters =
                param_names(node.child_by_field_name("parameters"), source, java_param_names);
            meta.return_type = field_text(node, "type", source);
            if let Some(class_node) = node
                .parent()
                .and_then(|body| body.parent())
                .filter(|p| p.kind().ends_with("_declaration"))
            {
                meta.parent_class = field_text(&class_node, "name", source);
            }
        }
        "class_declaration" | "record_declaration" => {
            meta.class_name = name;
            if let Some(interfaces) = node.child_by_field_name("interfaces") {
                let mut cursor = interfaces.walk();
                for clause in interfaces.named_children(&mut cursor) {
                    let mut inner = clause.walk();
                    for ty in clause.named_children(&mut inner) {
                        meta.implements.push(text(&ty, source).to_string());
                    }
                }
            }
        }
        "interface_declaration" | "enum_declaration" | "annotation_type_declaration" => {
            meta.class_name = name;
        }
        _ => {}
    }

    meta
}

// ---------------------------------------------------------------------------
// Rust
// ---------------------------------------------------------------------------

fn rust_param_names(node: &Node, source: &[u8]) -> Vec<String> {
    match node.kind() {
        "parameter" => node
            .child_by_field_name("pattern")
            .map(|p| vec![text(&p, source).to_string()])
            .unwrap_or_default(),
        "self_parameter" => vec!["self".to_string()],
        _ => Vec::new(),
    }
}

fn extract_rust(node: &Node, source: &[u8]) -> CodeMetadata {
    let mut meta = CodeMetadata::default();
    let name = field_text(node, "name", source);

    let visibility = node
        .children(&mut node.walk())
        .find(|c| c.kind() == "visibility_modifier")
        .map(|v| text(&v, source).to_string());
    meta.is_exported = visibility.as_deref().map(|v| v.starts_with("pub")).unwrap_or(false);
    meta.visibility = Some(visibility.unwrap_or_else(|| "private".to_string()));
    meta.docstring = preceding_doc(node, source);

    // Outer attributes sit as preceding attribute_item siblings.
    let mut prev = node.prev_sibling();
    while let Some(sib) = prev {
        if sib.kind() != "attribute_item" {
            break;
        }
        meta.decorators.insert(
            0,
            text(&sib, source).trim_start_matches("#[").trim_end_matches(']').to_string(),
        );
        prev = sib.prev_sibling();
    }

    match node.kind() {
        "function_item" => {
            meta.function_name = name;
            meta.is_async = has_child_kind(node, "async")
                || node
                    .children(&mut node.walk())
                    .any(|c| c.kind() == "function_modifiers" && text(&c, source).contains("async"));
            meta.parameters =
                param_names(node.child_by_field_name("parameters"), source, rust_param_names);
            meta.return_type = field_text(node, "return_type", source);
            if let Some(imp) = node
                .parent()
                .and_then(|body| body.parent())
                .filter(|p| p.kind() == "impl_item")
            {
                meta.parent_class = field_text(&imp, "type", source);
            }
        }
        "struct_item" | "enum_item" | "union_item" | "type_item" => {
            meta.class_name = name;
        }
        "trait_item" => {
            meta.class_name = name;
        }
        "impl_item" => {
            meta.class_name = field_text(node, "type", source);
            if let Some(trait_name) = field_text(node, "trait", source) {
                meta.implements.push(trait_name);
            }
        }
        "mod_item" => {
            meta.namespace = name;
        }
        _ => {}
    }

    meta
}

// ---------------------------------------------------------------------------
// C / C++
// ---------------------------------------------------------------------------

fn c_param_names(node: &Node, source: &[u8]) -> Vec<String> {
    if node.kind() != "parameter_declaration" {
        return Vec::new();
    }
    // The identifier hides at the bottom of the declarator chain.
    let mut current = node.child_by_field_name("declarator");
    while let Some(decl) = current {
        if matches!(decl.kind(), "identifier" | "field_identifier") {
            return vec![text(&decl, source).to_string()];
        }
        current = decl
            .child_by_field_name("declarator")
            .or_else(|| decl.named_child(0).filter(|c| c.kind().contains("declarator")));
    }
    Vec::new()
}

/// Unwind a C declarator chain to the function name.
fn c_function_name(node: &Node, source: &[u8]) -> Option<String> {
    let mut current = node.child_by_field_name("declarator");
    while let Some(decl) = current {
        match decl.kind() {
            "identifier" | "field_identifier" | "qualified_identifier" | "destructor_name"
            | "operator_name" => return Some(text(&decl, source).to_string()),
            _ => {
                current = decl
                    .child_by_field_name("declarator")
                    .or_else(|| decl.named_child(0));
            }
        }
    }
    None
}

fn extract_c_like(node: &Node, source: &[u8], cpp: bool) -> CodeMetadata {
    let mut meta = CodeMetadata::default();

    let is_static = node
        .children(&mut node.walk())
        .any(|c| c.kind() == "storage_class_specifier" && text(&c, source) == "static");
    meta.is_static = is_static;
    meta.is_exported = !is_static;
    meta.visibility = Some(if is_static { "private" } else { "public" }.to_string());
    meta.docstring = preceding_doc(node, source);

    match node.kind() {
        "function_definition" => {
            let qualified = c_function_name(node, source);
            if cpp {
                if let Some(full) = &qualified {
                    // Out-of-line members keep their owning type.
                    if let Some((owner, bare)) = full.rsplit_once("::") {
                        meta.parent_class = Some(owner.to_string());
                        meta.function_name = Some(bare.to_string());
                    }
                }
            }
            if meta.function_name.is_none() {
                meta.function_name = qualified;
            }
            meta.return_type = field_text(node, "type", source);
            let params = node
                .child_by_field_name("declarator")
                .and_then(|d| d.child_by_field_name("parameters"));
            meta.parameters = param_names(params, source, c_param_names);
        }
        "struct_specifier" | "enum_specifier" | "union_specifier" | "class_specifier" => {
            meta.class_name = field_text(node, "name", source);
        }
        "type_definition" | "alias_declaration" => {
            meta.class_name = field_text(node, "name", source)
                .or_else(|| field_text(node, "declarator", source));
        }
        "namespace_definition" => {
            meta.namespace = field_text(node, "name", source);
        }
        "template_declaration" => {
            // Describe the templated declaration itself.
            let mut cursor = node.walk();
            if let Some(inner) = node.named_children(&mut cursor).find(|c| {
                matches!(
                    c.kind(),
                    "function_definition" | "class_specifier" | "struct_specifier"
                )
            }) {
                let inner_meta = extract_c_like(&inner, source, cpp);
                meta.function_name = inner_meta.function_name;
                meta.class_name = inner_meta.class_name;
                meta.parameters = inner_meta.parameters;
                meta.return_type = inner_meta.return_type;
            };
        }
        _ => {}
    }

    meta
}

fn extract_c(node: &Node, source: &[u8]) -> CodeMetadata {
    extract_c_like(node, source, false)
}

fn extract_cpp(node: &Node, source: &[u8]) -> CodeMetadata {
    extract_c_like(node, source, true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    fn parse(strategy: &Strategy, source: &str) -> tree_sitter::Tree {
        let mut parser = Parser::new();
        parser.set_language(&(strategy.grammar)()).unwrap();
        parser.parse(source, None).unwrap()
    }

    fn first_chunkable<'t>(
        strategy: &Strategy,
        tree: &'t tree_sitter::Tree,
        kind: &str,
    ) -> Node<'t> {
        fn find<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
            if node.kind() == kind {
                return Some(node);
            }
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if let Some(found) = find(child, kind) {
                    return Some(found);
                }
            }
            None
        }
        let node = find(tree.root_node(), kind).expect("node kind not found");
        assert!(strategy.should_chunk(&node));
        node
    }

    #[test]
    fn resolve_by_language_ext_and_mime() {
        assert_eq!(resolve("text/x-go", Some("go"), "go").unwrap().language, "go");
        assert_eq!(resolve("text/plain", None, "rs").unwrap().language, "rust");
        assert_eq!(resolve("text/x-c++", None, "").unwrap().language, "cpp");
        assert!(resolve("text/plain", None, "txt").is_none());
    }

    #[test]
    fn go_function_metadata() {
        let src = "package main\n\nfunc Add(a, b int) int { return a + b }\n";
        let tree = parse(&GO, src);
        let node = first_chunkable(&GO, &tree, "function_declaration");
        let meta = GO.extract_metadata(&node, src.as_bytes());

        assert_eq!(meta.function_name.as_deref(), Some("Add"));
        assert!(meta.is_exported);
        assert_eq!(meta.parameters, vec!["a", "b"]);
        assert_eq!(meta.return_type.as_deref(), Some("int"));
        assert_eq!(meta.language, "go");
    }

    #[test]
    fn go_unexported_method_receiver() {
        let src = "package main\n\nfunc (s *server) run() error { return nil }\n";
        let tree = parse(&GO, src);
        let node = first_chunkable(&GO, &tree, "method_declaration");
        let meta = GO.extract_metadata(&node, src.as_bytes());

        assert_eq!(meta.function_name.as_deref(), Some("run"));
        assert!(!meta.is_exported);
        assert_eq!(meta.parent_class.as_deref(), Some("server"));
    }

    #[test]
    fn python_private_decorated_function() {
        let src = "@cached\ndef _helper(x, y=1):\n    \"\"\"Combine things.\"\"\"\n    return x\n";
        let tree = parse(&PYTHON, src);
        let node = first_chunkable(&PYTHON, &tree, "decorated_definition");
        let meta = PYTHON.extract_metadata(&node, src.as_bytes());

        assert_eq!(meta.function_name.as_deref(), Some("_helper"));
        assert!(!meta.is_exported);
        assert_eq!(meta.decorators, vec!["cached"]);
        assert_eq!(meta.parameters, vec!["x", "y"]);
        assert_eq!(meta.docstring.as_deref(), Some("Combine things."));
    }

    #[test]
    fn python_async_function() {
        let src = "async def fetch(url):\n    pass\n";
        let tree = parse(&PYTHON, src);
        let node = first_chunkable(&PYTHON, &tree, "function_definition");
        let meta = PYTHON.extract_metadata(&node, src.as_bytes());
        assert!(meta.is_async);
        assert!(meta.is_exported);
    }

    #[test]
    fn typescript_exported_class_with_implements() {
        let src = "export class App implements Runnable {\n  run(): void {}\n}\n";
        let tree = parse(&TYPESCRIPT, src);
        let node = first_chunkable(&TYPESCRIPT, &tree, "class_declaration");
        let meta = TYPESCRIPT.extract_metadata(&node, src.as_bytes());

        assert_eq!(meta.class_name.as_deref(), Some("App"));
        assert!(meta.is_exported);
        assert_eq!(meta.implements, vec!["Runnable"]);
    }

    #[test]
    fn rust_pub_async_fn_with_doc() {
        let src = "/// Sends one frame.\npub async fn send(frame: Frame) -> Result<(), Error> {\n    todo!()\n}\n";
        let tree = parse(&RUST, src);
        let node = first_chunkable(&RUST, &tree, "function_item");
        let meta = RUST.extract_metadata(&node, src.as_bytes());

        assert_eq!(meta.function_name.as_deref(), Some("send"));
        assert!(meta.is_exported);
        assert!(meta.is_async);
        assert_eq!(meta.parameters, vec!["frame"]);
        assert_eq!(meta.docstring.as_deref(), Some("Sends one frame."));
        assert_eq!(meta.visibility.as_deref(), Some("pub"));
    }

    #[test]
    fn rust_trait_impl_records_implements() {
        let src = "impl Display for Token {\n    fn fmt(&self) {}\n}\n";
        let tree = parse(&RUST, src);
        let node = first_chunkable(&RUST, &tree, "impl_item");
        let meta = RUST.extract_metadata(&node, src.as_bytes());
        assert_eq!(meta.class_name.as_deref(), Some("Token"));
        assert_eq!(meta.implements, vec!["Display"]);
    }

    #[test]
    fn java_public_static_annotated_method() {
        let src = "class Util {\n  @Deprecated\n  public static int add(int a, int b) { return a + b; }\n}\n";
        let tree = parse(&JAVA, src);
        let node = first_chunkable(&JAVA, &tree, "method_declaration");
        let meta = JAVA.extract_metadata(&node, src.as_bytes());

        assert_eq!(meta.function_name.as_deref(), Some("add"));
        assert!(meta.is_exported);
        assert!(meta.is_static);
        assert_eq!(meta.decorators, vec!["Deprecated"]);
        assert_eq!(meta.parameters, vec!["a", "b"]);
        assert_eq!(meta.return_type.as_deref(), Some("int"));
        assert_eq!(meta.parent_class.as_deref(), Some("Util"));
    }

    #[test]
    fn c_static_function_visibility() {
        let src = "static int helper(int x) { return x; }\n";
        let tree = parse(&C, src);
        let node = first_chunkable(&C, &tree, "function_definition");
        let meta = C.extract_metadata(&node, src.as_bytes());

        assert_eq!(meta.function_name.as_deref(), Some("helper"));
        assert!(meta.is_static);
        assert!(!meta.is_exported);
        assert_eq!(meta.parameters, vec!["x"]);
    }

    #[test]
    fn cpp_out_of_line_method() {
        let src = "int Counter::next() { return ++n; }\n";
        let tree = parse(&CPP, src);
        let node = first_chunkable(&CPP, &tree, "function_definition");
        let meta = CPP.extract_metadata(&node, src.as_bytes());

        assert_eq!(meta.function_name.as_deref(), Some("next"));
        assert_eq!(meta.parent_class.as_deref(), Some("Counter"));
    }

    #[test]
    fn doc_comment_cleaner_strips_tags() {
        let raw = "/**\n * Adds numbers.\n * @param a left\n * @returns sum\n */";
        assert_eq!(clean_doc(raw), "Adds numbers.");
    }
}

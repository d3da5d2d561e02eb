//! Syntax-aware chunk extraction via tree-sitter.
//!
//! Chunk boundaries follow the language's chunkable node kinds
//! (functions and methods preferred). Candidates below the minimum token
//! count fold into their enclosing container's chunk; candidates above the
//! maximum split at their largest enclosed statement boundaries into
//! sequential parts with contiguous byte ranges.

use std::collections::BTreeSet;
use std::path::Path;

use tree_sitter::{Node, Parser};

use quarry_store::{ChunkKind, ChunkRecord};

use crate::error::{IndexError, Result};
use crate::languages::Lang;

/// Wrapper kinds that are skipped through when looking for chunkable nodes
/// (e.g. `export function foo() {}`).
const TRANSPARENT_KINDS: &[&str] = &["export_statement"];

/// Node kinds that hold a definition's statements; split boundaries come
/// from their direct children.
const BODY_KINDS: &[&str] = &[
    "block",
    "body",
    "statement_block",
    "declaration_list",
    "field_declaration_list",
    "class_body",
];

/// Chunker configuration, in estimated tokens.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Candidates below this fold into their parent's chunk (default: 32).
    pub min_tokens: usize,
    /// Candidates above this split at statement boundaries (default: 2000).
    pub max_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_tokens: 32,
            max_tokens: 2000,
        }
    }
}

/// Rough token count: one token per four characters.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Stable chunk id: blake3 of path, start line, and name. Re-indexing an
/// unchanged region reproduces the same id.
#[must_use]
pub fn chunk_id(file: &str, start_line: usize, name: &str) -> String {
    blake3::hash(format!("{file}:{start_line}:{name}").as_bytes())
        .to_hex()
        .to_string()
}

/// Whole-file fallback chunk for files the grammar cannot parse.
#[must_use]
pub fn raw_chunk(source: &str, file: &str, language: &str) -> ChunkRecord {
    let name = file_stem(file);
    let lines = source.lines().count().max(1);
    ChunkRecord {
        id: chunk_id(file, 1, &name),
        file: file.to_string(),
        language: language.to_string(),
        kind: ChunkKind::Raw,
        name,
        signature: None,
        start_line: 1,
        end_line: lines,
        start_byte: 0,
        end_byte: source.len(),
        content: source.to_string(),
        dependencies: BTreeSet::new(),
        docstring: None,
        parent: None,
        part: None,
    }
}

/// Parse and chunk a source file. Pure: same input, same chunks.
///
/// # Errors
///
/// Returns [`IndexError::Parse`] if no grammar is available or tree-sitter
/// fails; callers fall back to [`raw_chunk`].
pub fn extract(
    source: &str,
    file: &str,
    lang: Lang,
    config: &ChunkerConfig,
) -> Result<Vec<ChunkRecord>> {
    let grammar = lang
        .grammar()
        .ok_or_else(|| IndexError::Parse(format!("no grammar for {}", lang.id())))?;

    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| IndexError::Parse(format!("parse failed for {file}")))?;
    let root = tree.root_node();
    if root.has_error() && root.named_child_count() == 0 {
        return Err(IndexError::Parse(format!("unparseable source in {file}")));
    }

    let ctx = ChunkCtx {
        source,
        file,
        lang,
        config,
        imports: import_names(source, &root, lang),
    };

    let mut chunks = Vec::new();
    walk_container(&ctx, &root, None, &mut chunks);

    // Small files may fold entirely into nothing, and empty files have
    // nothing to walk; either way every file yields at least one chunk.
    if chunks.is_empty() {
        let mut fallback = raw_chunk(source, file, lang.id());
        fallback.kind = ChunkKind::Module;
        fallback.dependencies = ctx.imports.clone();
        chunks.push(fallback);
    }

    Ok(chunks)
}

/// Extraction that never fails: parse errors produce exactly one raw chunk
/// and a warning message for the caller to record.
#[must_use]
pub fn extract_or_raw(
    source: &str,
    file: &str,
    lang: Lang,
    config: &ChunkerConfig,
) -> (Vec<ChunkRecord>, Option<String>) {
    match extract(source, file, lang, config) {
        Ok(chunks) => (chunks, None),
        Err(e) => (
            vec![raw_chunk(source, file, lang.id())],
            Some(format!("{file}: fell back to raw chunk: {e}")),
        ),
    }
}

struct ChunkCtx<'a> {
    source: &'a str,
    file: &'a str,
    lang: Lang,
    config: &'a ChunkerConfig,
    imports: BTreeSet<String>,
}

impl ChunkCtx<'_> {
    fn text(&self, node: &Node) -> &str {
        &self.source[node.byte_range()]
    }
}

/// Process the children of a container (file root, class, impl, module).
/// Chunkable children are emitted per policy; everything else folds into a
/// residual chunk owned by the container.
fn walk_container(
    ctx: &ChunkCtx<'_>,
    container: &Node,
    parent: Option<&str>,
    out: &mut Vec<ChunkRecord>,
) {
    let body = body_node(container);
    let scope = body.unwrap_or(*container);

    let mut folded: Vec<Node> = Vec::new();
    let mut folded_tokens = 0usize;

    let mut cursor = scope.walk();
    let children: Vec<Node> = scope.named_children(&mut cursor).collect();
    drop(cursor);

    for child in children {
        let target = unwrap_transparent(&child);
        let kind = target.kind();

        // Comments attach to the following definition as docstrings; they
        // never fold into residual chunks.
        if matches!(kind, "comment" | "line_comment" | "block_comment") {
            continue;
        }

        if !ctx.lang.chunk_node_kinds().contains(&kind) {
            folded_tokens += estimate_tokens(ctx.text(&child));
            folded.push(child);
            continue;
        }

        if ctx.lang.container_node_kinds().contains(&kind) {
            let name = entity_name(&target, ctx.source)
                .unwrap_or_else(|| kind.to_string());
            walk_container(ctx, &target, Some(&name), out);
            continue;
        }

        let tokens = estimate_tokens(ctx.text(&target));
        if tokens > ctx.config.max_tokens {
            split_oversized(ctx, &target, parent, out);
        } else if tokens < ctx.config.min_tokens
            && folded_tokens + tokens <= ctx.config.max_tokens
        {
            folded_tokens += tokens;
            folded.push(child);
        } else {
            out.push(make_chunk(ctx, &target, parent, None));
        }
    }

    flush_residual(ctx, container, parent, &folded, out);
}

/// Build the container's own chunk from everything that was not emitted
/// separately: imports, fields, constants, folded small definitions.
fn flush_residual(
    ctx: &ChunkCtx<'_>,
    container: &Node,
    parent: Option<&str>,
    folded: &[Node],
    out: &mut Vec<ChunkRecord>,
) {
    if folded.is_empty() {
        return;
    }

    let is_root = container.parent().is_none();
    let content: String = folded
        .iter()
        .map(|n| ctx.text(n))
        .collect::<Vec<_>>()
        .join("\n");
    // File-level residue below the minimum is dropped unless it is all the
    // file has; a container always keeps its folded members.
    if is_root && !out.is_empty() && estimate_tokens(&content) < ctx.config.min_tokens {
        return;
    }

    let (name, kind, chunk_parent) = if is_root {
        (file_stem(ctx.file), ChunkKind::Module, None)
    } else {
        let name = entity_name(container, ctx.source)
            .unwrap_or_else(|| container.kind().to_string());
        let kind = ctx.lang.chunk_kind(container.kind(), parent.is_some());
        (name, kind, parent.map(str::to_string))
    };

    let first = &folded[0];
    let last = &folded[folded.len() - 1];
    let (start_line, end_line, start_byte, end_byte, content) = if is_root {
        (
            first.start_position().row + 1,
            last.end_position().row + 1,
            first.start_byte(),
            last.end_byte(),
            content,
        )
    } else {
        // Keep the container's header line for context.
        let header = signature_text(ctx, container).unwrap_or_default();
        (
            container.start_position().row + 1,
            container.end_position().row + 1,
            container.start_byte(),
            container.end_byte(),
            if header.is_empty() {
                content
            } else {
                format!("{header}\n{content}")
            },
        )
    };

    let mut dependencies = BTreeSet::new();
    for node in folded {
        collect_references(ctx, node, &mut dependencies);
    }
    dependencies.remove(&name);

    out.push(ChunkRecord {
        id: chunk_id(ctx.file, start_line, &name),
        file: ctx.file.to_string(),
        language: ctx.lang.id().to_string(),
        kind,
        docstring: None,
        signature: None,
        name,
        start_line,
        end_line,
        start_byte,
        end_byte,
        content,
        dependencies,
        parent: chunk_parent,
        part: None,
    });
}

/// Split an oversized definition at its largest enclosed statement
/// boundaries into sequential parts: contiguous, non-overlapping byte
/// ranges covering the whole node, never cutting mid-token.
fn split_oversized(
    ctx: &ChunkCtx<'_>,
    node: &Node,
    parent: Option<&str>,
    out: &mut Vec<ChunkRecord>,
) {
    let body = body_node(node).unwrap_or(*node);
    let mut cursor = body.walk();
    let statements: Vec<Node> = body.named_children(&mut cursor).collect();
    drop(cursor);

    if statements.len() < 2 {
        // Nothing to split at; emit whole rather than cut mid-token.
        out.push(make_chunk(ctx, node, parent, None));
        return;
    }

    // Cut points are statement starts; greedily pack statements until the
    // next one would push the part past the limit.
    let mut boundaries: Vec<usize> = vec![node.start_byte()];
    let mut part_start = node.start_byte();
    for stmt in &statements {
        if estimate_tokens(&ctx.source[part_start..stmt.end_byte()]) > ctx.config.max_tokens
            && stmt.start_byte() > part_start
        {
            boundaries.push(stmt.start_byte());
            part_start = stmt.start_byte();
        }
    }

    if boundaries.len() < 2 {
        out.push(make_chunk(ctx, node, parent, None));
        return;
    }

    let name =
        entity_name(node, ctx.source).unwrap_or_else(|| node.kind().to_string());
    let has_parent = parent.is_some();
    let kind = ctx.lang.chunk_kind(node.kind(), has_parent);
    let docstring = docstring_for(ctx, node);
    let signature = signature_text(ctx, node);

    let ends = boundaries
        .iter()
        .skip(1)
        .copied()
        .chain(std::iter::once(node.end_byte()));

    for (i, (start, end)) in boundaries.iter().copied().zip(ends).enumerate() {
        let content = &ctx.source[start..end];
        let start_line = line_at(ctx.source, start);
        let end_line = line_at(ctx.source, end.saturating_sub(1).max(start));
        let mut dependencies = BTreeSet::new();
        collect_references(ctx, node, &mut dependencies);
        dependencies.remove(&name);

        #[allow(clippy::cast_possible_truncation)]
        out.push(ChunkRecord {
            id: chunk_id(ctx.file, start_line, &name),
            file: ctx.file.to_string(),
            language: ctx.lang.id().to_string(),
            kind,
            name: name.clone(),
            signature: if i == 0 { signature.clone() } else { None },
            docstring: if i == 0 { docstring.clone() } else { None },
            start_line,
            end_line,
            start_byte: start,
            end_byte: end,
            content: content.to_string(),
            dependencies,
            parent: parent.map(str::to_string),
            part: Some(i as u32),
        });
    }
}

fn make_chunk(
    ctx: &ChunkCtx<'_>,
    node: &Node,
    parent: Option<&str>,
    part: Option<u32>,
) -> ChunkRecord {
    let name =
        entity_name(node, ctx.source).unwrap_or_else(|| node.kind().to_string());
    let mut dependencies = BTreeSet::new();
    collect_references(ctx, node, &mut dependencies);
    dependencies.remove(&name);

    let start_line = node.start_position().row + 1;
    ChunkRecord {
        id: chunk_id(ctx.file, start_line, &name),
        file: ctx.file.to_string(),
        language: ctx.lang.id().to_string(),
        kind: ctx.lang.chunk_kind(node.kind(), parent.is_some()),
        signature: signature_text(ctx, node),
        docstring: docstring_for(ctx, node),
        name,
        start_line,
        end_line: node.end_position().row + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        content: ctx.text(node).to_string(),
        dependencies,
        parent: parent.map(str::to_string),
        part,
    }
}

/// Skip through wrapper nodes like `export_statement` to the definition
/// inside; returns the node itself when nothing applies.
fn unwrap_transparent<'t>(node: &Node<'t>) -> Node<'t> {
    if TRANSPARENT_KINDS.contains(&node.kind()) {
        let mut cursor = node.walk();
        let inner = node.named_children(&mut cursor).next();
        if let Some(inner) = inner {
            return inner;
        }
    }
    *node
}

fn body_node<'t>(node: &Node<'t>) -> Option<Node<'t>> {
    if node.parent().is_none() {
        return None;
    }
    node.child_by_field_name("body").or_else(|| {
        let mut cursor = node.walk();
        let found = node
            .named_children(&mut cursor)
            .find(|c| BODY_KINDS.contains(&c.kind()));
        found
    })
}

/// tree-sitter-rust `impl_item` uses a `type` field; most grammars use
/// `name`. Python decorators wrap the definition one level down.
fn entity_name(node: &Node, source: &str) -> Option<String> {
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .map(|n| source[n.byte_range()].to_string())
        .or_else(|| {
            node.child_by_field_name("definition")
                .and_then(|d| entity_name(&d, source))
        })
}

/// Declaration text up to the body: `fn validate(token: &str) -> bool`.
fn signature_text(ctx: &ChunkCtx<'_>, node: &Node) -> Option<String> {
    let end = body_node(node).map_or_else(
        || {
            let text = ctx.text(node);
            node.start_byte() + text.lines().next().map_or(text.len(), str::len)
        },
        |body| body.start_byte(),
    );
    let sig: String = ctx.source[node.start_byte()..end]
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if sig.is_empty() { None } else { Some(sig) }
}

/// Doc comment directly above the node (or, for Python, the leading string
/// expression of the body).
fn docstring_for(ctx: &ChunkCtx<'_>, node: &Node) -> Option<String> {
    if ctx.lang == Lang::Python {
        let body = body_node(node)?;
        let mut cursor = body.walk();
        let first = body.named_children(&mut cursor).next()?;
        if first.kind() == "expression_statement" {
            let inner = first.named_child(0)?;
            if inner.kind() == "string" {
                let text = ctx.text(&inner);
                return Some(
                    text.trim_matches(|c| c == '"' || c == '\'')
                        .trim()
                        .to_string(),
                );
            }
        }
        return None;
    }

    let mut lines = Vec::new();
    let mut prev = node.prev_named_sibling();
    while let Some(p) = prev {
        let kind = p.kind();
        if kind != "line_comment" && kind != "block_comment" && kind != "comment" {
            break;
        }
        lines.push(
            ctx.text(&p)
                .trim_start_matches('/')
                .trim_start_matches('*')
                .trim()
                .to_string(),
        );
        prev = p.prev_named_sibling();
    }
    if lines.is_empty() {
        None
    } else {
        lines.reverse();
        Some(lines.join("\n"))
    }
}

/// Referenced symbol names inside the node: type identifiers, plus plain
/// identifiers that match an imported name.
fn collect_references(ctx: &ChunkCtx<'_>, node: &Node, out: &mut BTreeSet<String>) {
    let kinds = ctx.lang.reference_node_kinds();
    let mut cursor = node.walk();
    let mut done = false;
    while !done {
        let current = cursor.node();
        if kinds.contains(&current.kind()) {
            let text = ctx.text(&current);
            let head = text.split(['.', ':']).next().unwrap_or(text);
            let referenced = ctx.imports.contains(head)
                || head.chars().next().is_some_and(char::is_uppercase);
            if referenced && !text.is_empty() {
                out.insert(text.to_string());
            }
        }

        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                done = true;
                break;
            }
        }
    }
}

/// Identifier-like tokens appearing in the file's import statements,
/// excluding the import keywords themselves.
fn import_names(source: &str, root: &Node, lang: Lang) -> BTreeSet<String> {
    const KEYWORDS: &[&str] = &["use", "import", "from", "as", "pub", "export", "require"];

    let mut names = BTreeSet::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if !lang.import_node_kinds().contains(&child.kind()) {
            continue;
        }
        let text = &source[child.byte_range()];
        for word in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
            if word.len() > 1 && !KEYWORDS.contains(&word) {
                names.insert(word.to_string());
            }
        }
    }
    names
}

fn file_stem(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .map_or_else(|| file.to_string(), |s| s.to_string_lossy().to_string())
}

/// 1-based line number of a byte offset.
fn line_at(source: &str, byte: usize) -> usize {
    source.as_bytes()[..byte.min(source.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

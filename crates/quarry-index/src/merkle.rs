//! Content-addressed hash tree over the source tree and sub-linear diffing
//! against the persisted manifest.
//!
//! A directory's hash is a pure function of its children's names and hashes,
//! so a subtree whose hash matches the manifest is skipped wholesale during
//! the diff.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;

use crate::error::Result;
use crate::languages::is_indexable;
use crate::manifest::Manifest;

/// Hash assigned to a directory with no indexable children.
pub const EMPTY_DIR_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Content hash and modification time for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub content_hash: String,
    pub mtime: i64,
}

/// The current hash tree: every indexable file and every directory hash,
/// keyed by `/`-separated path relative to the root (the root itself is
/// keyed by the empty string).
#[derive(Debug, Default)]
pub struct TreeSnapshot {
    pub files: BTreeMap<String, FileMeta>,
    pub dirs: BTreeMap<String, String>,
    /// Paths that exist but could not be read this pass. They are absent
    /// from `files`, and the diff must not mistake them for deletions.
    pub failed: BTreeSet<String>,
    /// Per-path problems encountered while walking; never fatal.
    pub warnings: Vec<String>,
}

impl TreeSnapshot {
    #[must_use]
    pub fn root_hash(&self) -> &str {
        self.dirs.get("").map_or(EMPTY_DIR_HASH, String::as_str)
    }
}

/// Result of diffing a snapshot against the manifest.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl TreeDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Walk the tree and hash every indexable file, then derive directory
/// hashes bottom-up.
///
/// Respects gitignore, skips hidden entries and symlinks, and applies the
/// configured include/exclude globs before hashing. Unreadable files are
/// reported in `warnings` and skipped.
///
/// # Errors
///
/// Returns an error only if the include/exclude globs are malformed.
pub fn snapshot(root: &Path, include: &[String], exclude: &[String]) -> Result<TreeSnapshot> {
    let mut overrides = OverrideBuilder::new(root);
    for pat in include {
        overrides
            .add(pat)
            .map_err(|e| crate::error::IndexError::Parse(format!("bad include glob: {e}")))?;
    }
    for pat in exclude {
        // Leading `!` in override syntax means exclusion.
        overrides
            .add(&format!("!{pat}"))
            .map_err(|e| crate::error::IndexError::Parse(format!("bad exclude glob: {e}")))?;
    }
    let overrides = overrides
        .build()
        .map_err(|e| crate::error::IndexError::Parse(format!("bad glob set: {e}")))?;

    let mut snap = TreeSnapshot::default();

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .follow_links(false)
        .overrides(overrides)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                snap.warnings.push(format!("walk error: {e}"));
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if !is_indexable(entry.path()) {
            continue;
        }

        let rel = rel_path(root, entry.path());
        match hash_file(entry.path()) {
            Ok(meta) => {
                snap.files.insert(rel, meta);
            }
            Err(e) => {
                snap.warnings.push(format!("{rel}: {e}"));
                snap.failed.insert(rel);
            }
        }
    }

    snap.dirs = derive_dir_hashes(&snap.files);
    Ok(snap)
}

/// Compute directory hashes bottom-up from a file map. Shared with the
/// manifest so its stored tree stays recomputable from its own records.
#[must_use]
pub fn derive_dir_hashes(files: &BTreeMap<String, FileMeta>) -> BTreeMap<String, String> {
    // dir -> (child name -> child hash); files first, then fold dirs upward.
    let mut children: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    children.entry(String::new()).or_default();

    for (path, meta) in files {
        let (dir, name) = split_parent(path);
        for ancestor in ancestors_of(path) {
            children.entry(ancestor).or_default();
        }
        children
            .entry(dir)
            .or_default()
            .insert(name, meta.content_hash.clone());
    }

    // Deepest directories first: reverse lexicographic order of keys works
    // because a child dir always sorts after its parent prefix.
    let mut hashes: BTreeMap<String, String> = BTreeMap::new();
    let dirs: Vec<String> = children.keys().rev().cloned().collect();
    for dir in dirs {
        let mut entries = children.get(&dir).cloned().unwrap_or_default();
        // Merge in hashes of immediate subdirectories computed earlier.
        for (sub, hash) in &hashes {
            let (parent, name) = split_parent(sub);
            if parent == dir {
                entries.insert(name, hash.clone());
            }
        }
        hashes.insert(dir.clone(), hash_children(&entries));
    }
    hashes
}

/// Hash of the sorted `(child_name, child_hash)` pairs of a directory.
#[must_use]
pub fn hash_children(entries: &BTreeMap<String, String>) -> String {
    if entries.is_empty() {
        return EMPTY_DIR_HASH.to_string();
    }
    let mut hasher = blake3::Hasher::new();
    for (name, hash) in entries {
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

/// Diff the current snapshot against the last-committed manifest.
///
/// Directories whose hash matches the manifest are pruned: none of their
/// descendants are compared. A missing manifest yields everything as added.
/// Unreadable paths are never reported as removed; they keep their manifest
/// record and get retried once they read cleanly again.
#[must_use]
pub fn diff(snapshot: &TreeSnapshot, manifest: Option<&Manifest>) -> TreeDiff {
    let Some(manifest) = manifest else {
        return TreeDiff {
            added: snapshot.files.keys().cloned().collect(),
            ..TreeDiff::default()
        };
    };

    let mut out = TreeDiff::default();
    diff_dir(snapshot, manifest, "", &mut out);
    out.removed.retain(|p| !snapshot.failed.contains(p));
    out.added.sort_unstable();
    out.changed.sort_unstable();
    out.removed.sort_unstable();
    out
}

fn diff_dir(snapshot: &TreeSnapshot, manifest: &Manifest, dir: &str, out: &mut TreeDiff) {
    let snap_hash = snapshot.dirs.get(dir);
    let man_hash = manifest.dirs.get(dir).map(|d| &d.dir_hash);

    // Identical subtree: skip entirely. This is what makes the diff
    // sub-linear in repository size.
    if let (Some(s), Some(m)) = (snap_hash, man_hash)
        && s == m
    {
        return;
    }

    let snap_files = direct_children(snapshot.files.keys(), dir);
    let man_files = direct_children(manifest.files.keys(), dir);

    for path in &snap_files {
        match manifest.files.get(path) {
            None => out.added.push(path.clone()),
            Some(record) => {
                if record.content_hash != snapshot.files[path].content_hash {
                    out.changed.push(path.clone());
                }
            }
        }
    }
    for path in &man_files {
        if !snapshot.files.contains_key(path) {
            out.removed.push(path.clone());
        }
    }

    let snap_dirs = direct_child_dirs(snapshot.dirs.keys(), dir);
    let man_dirs = direct_child_dirs(manifest.dirs.keys(), dir);

    for sub in snap_dirs.iter() {
        if man_dirs.contains(sub) {
            diff_dir(snapshot, manifest, sub, out);
        } else {
            // Entire subtree is new.
            out.added.extend(
                files_under(snapshot.files.keys(), sub).into_iter().cloned(),
            );
        }
    }
    for sub in &man_dirs {
        if !snap_dirs.contains(sub) {
            out.removed.extend(
                files_under(manifest.files.keys(), sub).into_iter().cloned(),
            );
        }
    }
}

fn direct_children<'a>(paths: impl Iterator<Item = &'a String>, dir: &str) -> Vec<String> {
    paths
        .filter(|p| split_parent(p).0 == dir)
        .cloned()
        .collect()
}

fn direct_child_dirs<'a>(
    dirs: impl Iterator<Item = &'a String>,
    dir: &str,
) -> Vec<String> {
    dirs.filter(|d| !d.is_empty() && split_parent(d).0 == dir)
        .cloned()
        .collect()
}

fn files_under<'a>(
    paths: impl Iterator<Item = &'a String>,
    dir: &str,
) -> Vec<&'a String> {
    let prefix = format!("{dir}/");
    paths.filter(|p| p.starts_with(&prefix)).collect()
}

/// `/`-separated path relative to the indexed root; stable across
/// platforms so manifests are portable.
#[must_use]
pub fn rel_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn split_parent(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (String::new(), path.to_string()),
    }
}

fn ancestors_of(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = path;
    while let Some((dir, _)) = current.rsplit_once('/') {
        out.push(dir.to_string());
        current = dir;
    }
    out.push(String::new());
    out
}

fn hash_file(path: &Path) -> std::io::Result<FileMeta> {
    let bytes = std::fs::read(path)?;
    let mtime = std::fs::metadata(path)?
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
    Ok(FileMeta {
        content_hash: blake3::hash(&bytes).to_hex().to_string(),
        mtime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DirRecord, FileRecord, Manifest};

    fn meta(hash: &str) -> FileMeta {
        FileMeta {
            content_hash: hash.to_string(),
            mtime: 0,
        }
    }

    fn snapshot_of(files: &[(&str, &str)]) -> TreeSnapshot {
        let files: BTreeMap<String, FileMeta> = files
            .iter()
            .map(|(p, h)| ((*p).to_string(), meta(h)))
            .collect();
        let dirs = derive_dir_hashes(&files);
        TreeSnapshot {
            files,
            dirs,
            failed: BTreeSet::new(),
            warnings: Vec::new(),
        }
    }

    fn manifest_of(snapshot: &TreeSnapshot) -> Manifest {
        let mut manifest = Manifest::default();
        for (path, m) in &snapshot.files {
            manifest.files.insert(
                path.clone(),
                FileRecord {
                    path: path.clone(),
                    content_hash: m.content_hash.clone(),
                    mtime: m.mtime,
                    chunk_ids: vec!["c".into()],
                },
            );
        }
        for (path, hash) in &snapshot.dirs {
            manifest.dirs.insert(
                path.clone(),
                DirRecord {
                    path: path.clone(),
                    dir_hash: hash.clone(),
                },
            );
        }
        manifest.root_hash = snapshot.root_hash().to_string();
        manifest
    }

    #[test]
    fn diff_without_manifest_adds_everything() {
        let snap = snapshot_of(&[("src/a.py", "h1"), ("src/b.py", "h2")]);
        let d = diff(&snap, None);
        assert_eq!(d.added, vec!["src/a.py", "src/b.py"]);
        assert!(d.changed.is_empty());
        assert!(d.removed.is_empty());
    }

    #[test]
    fn diff_idempotent_when_unchanged() {
        let snap = snapshot_of(&[("src/a.py", "h1"), ("src/b.py", "h2"), ("main.py", "h3")]);
        let manifest = manifest_of(&snap);
        assert!(diff(&snap, Some(&manifest)).is_empty());
        assert!(diff(&snap, Some(&manifest)).is_empty());
    }

    #[test]
    fn edit_changes_only_that_file_and_ancestor_hashes() {
        let before = snapshot_of(&[("src/a.py", "h1"), ("src/b.py", "h2")]);
        let manifest = manifest_of(&before);

        let after = snapshot_of(&[("src/a.py", "h1"), ("src/b.py", "h2-edited")]);
        let d = diff(&after, Some(&manifest));
        assert_eq!(d.changed, vec!["src/b.py"]);
        assert!(d.added.is_empty());
        assert!(d.removed.is_empty());

        // src/ and root hashes move; nothing else exists to move.
        assert_ne!(after.dirs["src"], before.dirs["src"]);
        assert_ne!(after.root_hash(), before.root_hash());
    }

    #[test]
    fn sibling_dir_hash_untouched_by_edit() {
        let before = snapshot_of(&[("a/x.py", "h1"), ("b/y.py", "h2")]);
        let after = snapshot_of(&[("a/x.py", "h1-new"), ("b/y.py", "h2")]);
        assert_ne!(before.dirs["a"], after.dirs["a"]);
        assert_eq!(before.dirs["b"], after.dirs["b"]);
    }

    #[test]
    fn added_and_removed_detected() {
        let before = snapshot_of(&[("src/a.py", "h1"), ("src/old.py", "h9")]);
        let manifest = manifest_of(&before);

        let after = snapshot_of(&[("src/a.py", "h1"), ("src/new.py", "h5")]);
        let d = diff(&after, Some(&manifest));
        assert_eq!(d.added, vec!["src/new.py"]);
        assert_eq!(d.removed, vec!["src/old.py"]);
        assert!(d.changed.is_empty());
    }

    #[test]
    fn rename_is_removed_plus_added() {
        let before = snapshot_of(&[("src/util.py", "same-hash")]);
        let manifest = manifest_of(&before);
        let after = snapshot_of(&[("src/helpers.py", "same-hash")]);
        let d = diff(&after, Some(&manifest));
        assert_eq!(d.added, vec!["src/helpers.py"]);
        assert_eq!(d.removed, vec!["src/util.py"]);
    }

    #[test]
    fn unreadable_file_is_not_reported_removed() {
        let before = snapshot_of(&[("src/a.py", "h1"), ("src/flaky.py", "h2")]);
        let manifest = manifest_of(&before);

        // This pass could not read flaky.py: it is absent from the file
        // map but present in the failed set.
        let mut after = snapshot_of(&[("src/a.py", "h1")]);
        after.failed.insert("src/flaky.py".to_string());

        let d = diff(&after, Some(&manifest));
        assert!(d.removed.is_empty());
        assert!(d.added.is_empty());
        assert!(d.changed.is_empty());

        // A genuinely deleted file still shows up.
        let gone = snapshot_of(&[("src/a.py", "h1")]);
        let d = diff(&gone, Some(&manifest));
        assert_eq!(d.removed, vec!["src/flaky.py"]);
    }

    #[test]
    fn new_subtree_fully_added() {
        let before = snapshot_of(&[("src/a.py", "h1")]);
        let manifest = manifest_of(&before);
        let after = snapshot_of(&[
            ("src/a.py", "h1"),
            ("vendor/lib/one.py", "v1"),
            ("vendor/lib/two.py", "v2"),
        ]);
        let d = diff(&after, Some(&manifest));
        assert_eq!(d.added, vec!["vendor/lib/one.py", "vendor/lib/two.py"]);
    }

    #[test]
    fn removed_subtree_fully_removed() {
        let before = snapshot_of(&[("src/a.py", "h1"), ("gone/x.py", "g1"), ("gone/y.py", "g2")]);
        let manifest = manifest_of(&before);
        let after = snapshot_of(&[("src/a.py", "h1")]);
        let d = diff(&after, Some(&manifest));
        assert_eq!(d.removed, vec!["gone/x.py", "gone/y.py"]);
    }

    #[test]
    fn dir_hash_is_pure_function_of_children() {
        let a = snapshot_of(&[("src/a.py", "h1"), ("src/b.py", "h2")]);
        let b = snapshot_of(&[("src/b.py", "h2"), ("src/a.py", "h1")]);
        assert_eq!(a.dirs["src"], b.dirs["src"]);
        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn empty_tree_hashes_to_sentinel() {
        let snap = snapshot_of(&[]);
        assert_eq!(snap.root_hash(), EMPTY_DIR_HASH);
    }

    #[test]
    fn nested_dir_hash_propagates_upward() {
        let before = snapshot_of(&[("a/b/c/deep.py", "h1"), ("a/top.py", "h2")]);
        let after = snapshot_of(&[("a/b/c/deep.py", "h1-new"), ("a/top.py", "h2")]);
        assert_ne!(before.dirs["a/b/c"], after.dirs["a/b/c"]);
        assert_ne!(before.dirs["a/b"], after.dirs["a/b"]);
        assert_ne!(before.dirs["a"], after.dirs["a"]);
        assert_ne!(before.root_hash(), after.root_hash());
    }

    #[test]
    fn snapshot_walks_real_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn a() {}").unwrap();
        std::fs::write(dir.path().join("src/notes.txt"), "not code").unwrap();

        let snap = snapshot(dir.path(), &[], &[]).unwrap();
        assert!(snap.files.contains_key("src/lib.rs"));
        assert!(!snap.files.contains_key("src/notes.txt"));
        assert!(snap.dirs.contains_key("src"));
        assert_ne!(snap.root_hash(), EMPTY_DIR_HASH);
    }

    #[test]
    fn snapshot_respects_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("gen")).unwrap();
        std::fs::write(dir.path().join("gen/out.rs"), "fn g() {}").unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();

        let snap = snapshot(dir.path(), &[], &["gen/**".to_string()]).unwrap();
        assert!(snap.files.contains_key("main.rs"));
        assert!(!snap.files.contains_key("gen/out.rs"));
    }

    #[test]
    fn snapshot_hash_matches_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        let snap = snapshot(dir.path(), &[], &[]).unwrap();
        let expected = blake3::hash(b"fn a() {}").to_hex().to_string();
        assert_eq!(snap.files["a.rs"].content_hash, expected);
    }
}

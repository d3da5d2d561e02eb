//! End-to-end pipeline tests over the public API: snapshot → diff →
//! chunk → embed → store → search, using the in-memory store and the
//! deterministic hash embedding.

use std::path::Path;
use std::sync::Arc;

use quarry_index::{Config, Engine};
use quarry_store::{HashEmbedding, HybridStore, MemoryStore, SearchFilter};

fn engine_with_store(root: &Path) -> (Engine<HashEmbedding>, Arc<dyn HybridStore>) {
    let store: Arc<dyn HybridStore> = Arc::new(MemoryStore::new());
    let mut config = Config::default();
    config.chunker.min_tokens = 1;
    let engine = Engine::new(
        root.to_path_buf(),
        config,
        Arc::clone(&store),
        HashEmbedding::default(),
    );
    (engine, store)
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn full_index_produces_chunks_for_every_file() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/auth.py",
        "def validate_token(token):\n    return len(token) > 8\n",
    );
    write(
        dir.path(),
        "src/ui.rs",
        "fn render_widget(w: &Widget) {\n    w.draw();\n}\n",
    );
    write(
        dir.path(),
        "main.go",
        "package main\n\nfunc main() {\n\tprintln(\"hi\")\n}\n",
    );

    let (engine, store) = engine_with_store(dir.path());
    let report = engine.reindex(None).await.unwrap();

    assert_eq!(report.files_scanned, 3);
    assert_eq!(report.files_indexed, 3);
    assert!(report.errors.is_empty());

    let mut files = store.indexed_files().await.unwrap();
    files.sort();
    assert_eq!(files, vec!["main.go", "src/auth.py", "src/ui.rs"]);
    assert!(store.chunk_count().await.unwrap() >= 3);
}

#[tokio::test]
async fn rerun_without_changes_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def a():\n    return 1\n");

    let (engine, _store) = engine_with_store(dir.path());
    engine.reindex(None).await.unwrap();

    let report = engine.reindex(None).await.unwrap();
    assert_eq!(report.files_indexed, 0);
    assert_eq!(report.chunks_created, 0);
    assert_eq!(report.files_removed, 0);
}

#[tokio::test]
async fn change_is_isolated_to_the_edited_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/stable.py", "def stable():\n    return 1\n");
    write(dir.path(), "src/volatile.py", "def volatile():\n    return 2\n");

    let (engine, store) = engine_with_store(dir.path());
    engine.reindex(None).await.unwrap();

    let before: Vec<String> = store
        .scroll_chunks()
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.file == "src/stable.py")
        .map(|c| c.id)
        .collect();

    write(
        dir.path(),
        "src/volatile.py",
        "def volatile():\n    return 2000\n",
    );
    let report = engine.reindex(None).await.unwrap();
    assert_eq!(report.files_indexed, 1);

    // The untouched sibling keeps identical chunk ids.
    let after: Vec<String> = store
        .scroll_chunks()
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.file == "src/stable.py")
        .map(|c| c.id)
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn deleting_a_file_purges_its_chunks() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "keep.py", "def keep():\n    return 1\n");
    write(dir.path(), "drop.py", "def drop():\n    return 2\n");

    let (engine, store) = engine_with_store(dir.path());
    engine.reindex(None).await.unwrap();
    assert_eq!(store.indexed_files().await.unwrap().len(), 2);

    std::fs::remove_file(dir.path().join("drop.py")).unwrap();
    let report = engine.reindex(None).await.unwrap();
    assert_eq!(report.files_removed, 1);
    assert_eq!(store.indexed_files().await.unwrap(), vec!["keep.py"]);
}

#[tokio::test]
async fn search_ranks_keyword_overlap_first() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "auth.py",
        "def validate_token(token):\n    return check_signature(token)\n",
    );
    write(
        dir.path(),
        "render.py",
        "def render_widget(widget):\n    widget.draw()\n",
    );
    write(
        dir.path(),
        "net.py",
        "def open_socket(addr):\n    return connect(addr)\n",
    );

    let (engine, _store) = engine_with_store(dir.path());
    engine.reindex(None).await.unwrap();

    let results = engine.search("validate token", 3, None).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].chunk.file, "auth.py");
}

#[tokio::test]
async fn search_is_deterministic_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..5 {
        write(
            dir.path(),
            &format!("mod_{i}.py"),
            &format!("def handler_{i}(request):\n    return process(request)\n"),
        );
    }

    let (engine, _store) = engine_with_store(dir.path());
    engine.reindex(None).await.unwrap();

    let first: Vec<String> = engine
        .search("handler request", 5, None)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.chunk.id)
        .collect();
    for _ in 0..3 {
        let again: Vec<String> = engine
            .search("handler request", 5, None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.chunk.id)
            .collect();
        assert_eq!(first, again);
    }
}

#[tokio::test]
async fn language_filter_excludes_other_languages() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "token.py",
        "def validate_token(token):\n    return True\n",
    );
    write(
        dir.path(),
        "token.rs",
        "fn validate_token(token: &str) -> bool {\n    true\n}\n",
    );

    let (engine, _store) = engine_with_store(dir.path());
    engine.reindex(None).await.unwrap();

    let filter = SearchFilter {
        language: Some("rust".into()),
        ..SearchFilter::default()
    };
    let results = engine
        .search("validate token", 5, Some(filter))
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.chunk.language == "rust"));
}

#[tokio::test]
async fn empty_file_still_gets_a_chunk() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "empty.py", "");
    write(dir.path(), "full.py", "def full():\n    return 1\n");

    let (engine, store) = engine_with_store(dir.path());
    let report = engine.reindex(None).await.unwrap();
    assert_eq!(report.files_indexed, 2);

    let empty_chunks: Vec<_> = store
        .scroll_chunks()
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.file == "empty.py")
        .collect();
    assert_eq!(empty_chunks.len(), 1);
    assert_eq!(empty_chunks[0].start_line, 1);
}

#[tokio::test]
async fn broken_source_still_yields_one_chunk() {
    let dir = tempfile::tempdir().unwrap();
    // tree-sitter is error tolerant; whatever it makes of this, the file
    // must land in the index as a single whole-file chunk.
    write(dir.path(), "broken.py", ")))) ]]]] }}}}\n");

    let (engine, store) = engine_with_store(dir.path());
    let report = engine.reindex(None).await.unwrap();
    assert_eq!(report.files_indexed, 1);

    let chunks: Vec<_> = store
        .scroll_chunks()
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.file == "broken.py")
        .collect();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].start_line, 1);
    assert!(chunks[0].content.contains("))))"));
}

#[tokio::test]
async fn manifest_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "x.py", "def x():\n    return 1\n");

    {
        let (engine, _store) = engine_with_store(dir.path());
        engine.reindex(None).await.unwrap();
    }

    // A fresh engine with an empty store still sees the committed
    // manifest; a no-op diff means no files get reindexed.
    let (engine, _store) = engine_with_store(dir.path());
    let report = engine.reindex(None).await.unwrap();
    assert_eq!(report.files_indexed, 0);
    assert_eq!(engine.status().await.file_count, 1);
}

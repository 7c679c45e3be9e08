use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("recipes")).unwrap();
    fs::write(
        files_dir.join("france.md"),
        "# France\n\nParis is the capital of France. The Seine flows through the city.",
    )
    .unwrap();
    fs::write(
        files_dir.join("recipes/pasta.txt"),
        "Boil the pasta in salted water for nine minutes. Drain and toss with butter.",
    )
    .unwrap();
    fs::write(
        files_dir.join("recipes/bread.md"),
        "Knead the dough until smooth, then let it rise for an hour before baking.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/docqa.sqlite"

[corpus]
root = "{root}/files"
include_globs = ["**/*.md", "**/*.txt"]

[chunking]
max_chunk_chars = 400
overlap_chars = 60

[embedding]
provider = "hash"
dims = 1024

[retrieval]
top_k = 4
similarity_floor = 0.3
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docqa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = env!("CARGO_BIN_EXE_docqa");
    let output = Command::new(binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("DOCQA_CORPUS_DIR")
        .env_remove("DOCQA_DB_PATH")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docqa(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/docqa.sqlite").exists());

    let (_, _, again) = run_docqa(&config_path, &["init"]);
    assert!(again, "second init failed (not idempotent)");
}

#[test]
fn test_ingest_then_reingest() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docqa(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("scanned: 3"));
    assert!(stdout.contains("indexed: 3"));
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_docqa(&config_path, &["ingest"]);
    assert!(success);
    assert!(stdout.contains("indexed: 0"));
    assert!(stdout.contains("unchanged: 3"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docqa(&config_path, &["ingest", "--dry-run"]);
    assert!(success, "dry run failed: {}", stderr);
    assert!(stdout.contains("(dry-run)"));

    let (stdout, _, _) = run_docqa(&config_path, &["stats"]);
    assert!(stdout.contains("entries:  0"), "stats: {}", stdout);
}

#[test]
fn test_ask_cites_source() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["ingest"]);

    let (stdout, stderr, success) =
        run_docqa(&config_path, &["ask", "What is the capital of France?"]);
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Paris"));
    assert!(stdout.contains("Sources:"));
    assert!(stdout.contains("france.md"));
}

#[test]
fn test_ask_without_match() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["ingest"]);

    let (stdout, _, success) = run_docqa(
        &config_path,
        &["ask", "quantum chromodynamics lattice gauge theory"],
    );
    assert!(success);
    assert!(stdout.contains("No relevant documents"));
}

#[test]
fn test_search_limit() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["ingest"]);

    let (stdout, _, success) =
        run_docqa(&config_path, &["search", "capital of France", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("1. ["));
    assert!(stdout.contains("france.md"));
    assert!(!stdout.contains("2. ["));
}

#[test]
fn test_empty_query_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["ingest"]);

    let (_, stderr, success) = run_docqa(&config_path, &["ask", "   "]);
    assert!(!success);
    assert!(stderr.contains("query is empty"), "stderr: {}", stderr);
}

#[test]
fn test_model_change_needs_full() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["ingest"]);

    let config = fs::read_to_string(&config_path)
        .unwrap()
        .replace("dims = 1024", "dims = 128");
    fs::write(&config_path, config).unwrap();

    let (_, stderr, success) = run_docqa(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("--full"), "stderr: {}", stderr);

    let (stdout, stderr, success) = run_docqa(&config_path, &["ingest", "--full"]);
    assert!(success, "full rebuild failed: {}", stderr);
    assert!(stdout.contains("indexed: 3"));

    let (stdout, _, _) = run_docqa(&config_path, &["stats"]);
    assert!(stdout.contains("hash-128 (128 dims)"), "stats: {}", stdout);
}

#[test]
fn test_empty_corpus_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("files")).unwrap();
    fs::create_dir_all(tmp.path().join("files")).unwrap();

    let (_, stderr, success) = run_docqa(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("no matching documents"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_fails_fast() {
    let (_tmp, config_path) = setup_test_env();
    let config = fs::read_to_string(&config_path)
        .unwrap()
        .replace("overlap_chars = 60", "overlap_chars = 400");
    fs::write(&config_path, config).unwrap();

    let (_, stderr, success) = run_docqa(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("overlap_chars"), "stderr: {}", stderr);
}

#[test]
fn test_query_commands_refuse_mismatched_index() {
    let (_tmp, config_path) = setup_test_env();
    run_docqa(&config_path, &["ingest"]);

    let config = fs::read_to_string(&config_path)
        .unwrap()
        .replace("dims = 1024", "dims = 128");
    fs::write(&config_path, config).unwrap();

    for args in [
        &["ask", "What is the capital of France?"][..],
        &["search", "capital of France"][..],
    ] {
        let (stdout, stderr, success) = run_docqa(&config_path, args);
        assert!(!success, "{:?} should fail: stdout={}", args, stdout);
        assert!(stderr.contains("configuration error"), "stderr: {}", stderr);
        assert!(stderr.contains("--full"), "stderr: {}", stderr);
    }
}

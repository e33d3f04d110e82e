use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn ra_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ra");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("papers")).unwrap();

    let config_content = format!(
        r#"[paths]
data_dir = "{root}/papers"
persist_dir = "{root}/storage"

[embedding]
provider = "openai"
model = "text-embedding-3-small"

[llm]
default_model = "gpt-3.5-turbo"
top_k = 3
"#,
        root = root.display()
    );
    let config_path = root.join("config/ra.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ra(root: &Path, config: &Path, args: &[&str]) -> Output {
    Command::new(ra_binary())
        .current_dir(root)
        .arg("--config")
        .arg(config)
        .arg("--progress")
        .arg("off")
        .args(args)
        .env("RUST_LOG", "error")
        .env_remove("OPENAI_API_KEY")
        .output()
        .expect("failed to run ra")
}

#[test]
fn test_stats_without_index() {
    let (tmp, config) = setup_test_env();
    let output = run_ra(tmp.path(), &config, &["stats"]);

    assert!(
        output.status.success(),
        "stats failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Research Assistant Index Stats"));
    assert!(stdout.contains("not loaded"));
    assert!(!tmp.path().join("storage").exists());
}

#[test]
fn test_stats_json_without_index() {
    let (tmp, config) = setup_test_env();
    let output = run_ra(tmp.path(), &config, &["stats", "--json"]);

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["loaded"], false);
    assert_eq!(json["persisted"], false);
    assert!(json["document_count"].is_null());
}

#[test]
fn test_index_fails_on_empty_papers_dir() {
    let (tmp, config) = setup_test_env();
    let output = run_ra(tmp.path(), &config, &["index"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("configuration error"), "stderr: {}", stderr);
    assert!(!tmp.path().join("storage").exists());
}

#[test]
fn test_index_fails_on_missing_papers_dir() {
    let (tmp, config) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("papers")).unwrap();
    let output = run_ra(tmp.path(), &config, &["rebuild"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, config) = setup_test_env();
    fs::write(&config, "[chunking]\nmax_tokens = 0\n").unwrap();
    let output = run_ra(tmp.path(), &config, &["stats"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("max_tokens"), "stderr: {}", stderr);
}

use axum::{http::StatusCode, routing::post, Json, Router};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const KEY_ENV: &str = "OCRFIX_TEST_KEY";

fn ocrfix_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ocrfix"))
}

/// Writes a config pointing the deepseek provider at `base_url`, with no
/// pauses so tests finish quickly.
fn write_config(root: &Path, base_url: &str) -> PathBuf {
    let path = root.join("ocrfix.toml");
    let content = format!(
        r#"[correction]
batch_size = 2
threshold = 0.9
max_attempts = 2
retry_pause_ms = 0

[llm]
provider = "deepseek"
timeout_secs = 5
max_retries = 0
backoff_base_ms = 1

[llm.deepseek]
base_url = "{base_url}"
model = "test-model"
api_key_env = "{KEY_ENV}"

[folder]
pause_secs = 0
"#
    );
    fs::write(&path, content).unwrap();
    path
}

fn run_ocrfix(args: &[&str]) -> Output {
    Command::new(ocrfix_binary())
        .args(args)
        .env(KEY_ENV, "test-key")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run ocrfix")
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

/// Answers each `- OCR: X ; LEN: ...` query with X, letter O replaced by 0.
async fn fixing_handler(Json(body): Json<serde_json::Value>) -> (StatusCode, Json<serde_json::Value>) {
    let user = body["messages"][1]["content"].as_str().unwrap_or_default();
    let answer = user
        .lines()
        .filter_map(|l| l.strip_prefix("- OCR: "))
        .filter_map(|rest| rest.split(" ; LEN: ").next())
        .map(|t| t.replace('O', "0"))
        .collect::<Vec<_>>()
        .join("\n");
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": answer } }]
        })),
    )
}

async fn spawn_mock() -> String {
    let app = Router::new().route("/v1/chat/completions", post(fixing_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1/chat/completions", addr)
}

#[test]
fn test_help_lists_flags() {
    let output = Command::new(ocrfix_binary())
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--input", "--output", "--provider", "--batch_size", "--threshold", "--include_gt"] {
        assert!(stdout.contains(flag), "help is missing {}", flag);
    }
}

#[test]
fn test_passthrough_without_low_confidence_tokens() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in.txt");
    let output = tmp.path().join("out.txt");
    fs::write(&input, "U7||U7 0.9500\nR10||R1O 0.8500\n").unwrap();
    let config = write_config(tmp.path(), "http://127.0.0.1:9/v1/chat/completions");

    // Nothing is below a zero threshold, so no request is ever made.
    let result = run_ocrfix(&[
        "--config",
        arg(&config),
        "--input",
        arg(&input),
        "--output",
        arg(&output),
        "--threshold",
        "0",
    ]);
    assert!(result.status.success(), "stderr: {}", String::from_utf8_lossy(&result.stderr));

    let written = fs::read_to_string(&output).unwrap();
    assert_eq!(written, "U7||U7 0.9500 U7\nR10||R1O 0.8500 R1O\n");
}

#[test]
fn test_missing_input_exits_with_usage_error() {
    let tmp = TempDir::new().unwrap();
    let result = run_ocrfix(&[
        "--input",
        arg(&tmp.path().join("nope.txt")),
        "--output",
        arg(&tmp.path().join("out.txt")),
    ]);
    assert_eq!(result.status.code(), Some(2));
    assert!(!tmp.path().join("out.txt").exists());
}

#[test]
fn test_directory_input_with_file_output_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let input_dir = tmp.path().join("scans");
    fs::create_dir_all(&input_dir).unwrap();
    let output_file = tmp.path().join("out.txt");
    fs::write(&output_file, "already here").unwrap();

    let result = run_ocrfix(&["--input", arg(&input_dir), "--output", arg(&output_file)]);
    assert_eq!(result.status.code(), Some(2));
    assert_eq!(fs::read_to_string(&output_file).unwrap(), "already here");
}

#[test]
fn test_unsupported_provider_is_a_config_error() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in.txt");
    fs::write(&input, "U7||U7 0.9500\n").unwrap();

    let result = run_ocrfix(&[
        "--input",
        arg(&input),
        "--output",
        arg(&tmp.path().join("out.txt")),
        "--provider",
        "claude",
    ]);
    assert_eq!(result.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("claude"), "stderr: {}", stderr);
}

#[test]
fn test_zero_batch_size_is_a_config_error() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in.txt");
    fs::write(&input, "U7||U7 0.9500\n").unwrap();

    let result = run_ocrfix(&[
        "--input",
        arg(&input),
        "--output",
        arg(&tmp.path().join("out.txt")),
        "--batch_size",
        "0",
    ]);
    assert_eq!(result.status.code(), Some(2));
}

#[test]
fn test_missing_api_key_is_a_config_error() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in.txt");
    fs::write(&input, "U7||U7 0.9500\n").unwrap();
    let config = write_config(tmp.path(), "http://127.0.0.1:9/v1/chat/completions");

    let result = Command::new(ocrfix_binary())
        .args([
            "--config",
            arg(&config),
            "--input",
            arg(&input),
            "--output",
            arg(&tmp.path().join("out.txt")),
        ])
        .env_remove(KEY_ENV)
        .env_remove("RUST_LOG")
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains(KEY_ENV), "stderr: {}", stderr);
}

#[test]
fn test_unparseable_config_exits_with_usage_error() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in.txt");
    fs::write(&input, "U7||U7 0.9500\n").unwrap();
    let config = tmp.path().join("broken.toml");
    fs::write(&config, "[correction\nbatch_size = ").unwrap();

    let result = run_ocrfix(&[
        "--config",
        arg(&config),
        "--input",
        arg(&input),
        "--output",
        arg(&tmp.path().join("out.txt")),
    ]);
    assert_eq!(result.status.code(), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_file_end_to_end() {
    let base_url = spawn_mock().await;
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("board.txt");
    let output = tmp.path().join("fixed").join("board.txt");
    fs::write(
        &input,
        "U7||U7 0.9500\nR10||R1O 0.8500\nC3||C3 0.4200\nGND||GNO 0.3000\n",
    )
    .unwrap();
    let config = write_config(tmp.path(), &base_url);
    fs::create_dir_all(output.parent().unwrap()).unwrap();

    let args: Vec<String> = vec![
        "--config".into(),
        arg(&config).into(),
        "--input".into(),
        arg(&input).into(),
        "--output".into(),
        arg(&output).into(),
    ];
    let result = tokio::task::spawn_blocking(move || {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_ocrfix(&args)
    })
    .await
    .unwrap();
    assert!(result.status.success(), "stderr: {}", String::from_utf8_lossy(&result.stderr));

    let written = fs::read_to_string(&output).unwrap();
    assert_eq!(
        written,
        "U7||U7 0.9500 U7\nR10||R1O 0.8500 R10\nC3||C3 0.4200 C3\nGND||GNO 0.3000 GN0\n"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_folder_end_to_end() {
    let base_url = spawn_mock().await;
    let tmp = TempDir::new().unwrap();
    let input_dir = tmp.path().join("scans");
    let output_dir = tmp.path().join("fixed");
    fs::create_dir_all(&input_dir).unwrap();
    fs::write(input_dir.join("a.txt"), "R10||R1O 0.5000\n").unwrap();
    fs::write(input_dir.join("b.txt"), "U7||U7 0.9900\n").unwrap();
    fs::write(input_dir.join("notes.md"), "not an ocr file\n").unwrap();
    let config = write_config(tmp.path(), &base_url);

    let args: Vec<String> = vec![
        "--config".into(),
        arg(&config).into(),
        "--input".into(),
        arg(&input_dir).into(),
        "--output".into(),
        arg(&output_dir).into(),
    ];
    let result = tokio::task::spawn_blocking(move || {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_ocrfix(&args)
    })
    .await
    .unwrap();
    assert!(result.status.success(), "stderr: {}", String::from_utf8_lossy(&result.stderr));

    assert_eq!(
        fs::read_to_string(output_dir.join("a.txt")).unwrap(),
        "R10||R1O 0.5000 R10\n"
    );
    assert_eq!(
        fs::read_to_string(output_dir.join("b.txt")).unwrap(),
        "U7||U7 0.9900 U7\n"
    );
    assert!(!output_dir.join("notes.md").exists());
}

#[test]
fn test_environment_overrides_are_validated() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in.txt");
    fs::write(&input, "U7||U7 0.9500\n").unwrap();

    let result = Command::new(ocrfix_binary())
        .args(["--input", arg(&input), "--output", arg(&tmp.path().join("out.txt"))])
        .current_dir(tmp.path())
        .env("BATCH_SIZE", "0")
        .env_remove("RUST_LOG")
        .output()
        .unwrap();
    assert_eq!(result.status.code(), Some(2));
}

#[test]
fn test_dotenv_file_is_loaded_and_flags_win() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in.txt");
    let output = tmp.path().join("out.txt");
    fs::write(&input, "R10||R1O 0.8500\n").unwrap();
    fs::write(
        tmp.path().join(".env"),
        "LLM_PROVIDER=claude\nDEEPSEEK_API_KEY=from-dotenv\nCONFIDENCE_THRESHOLD=0\n",
    )
    .unwrap();

    let run = |extra: &[&str]| {
        Command::new(ocrfix_binary())
            .args(["--input", arg(&input), "--output", arg(&output)])
            .args(extra)
            .current_dir(tmp.path())
            .env_remove("LLM_PROVIDER")
            .env_remove("DEEPSEEK_API_KEY")
            .env_remove("CONFIDENCE_THRESHOLD")
            .env_remove("RUST_LOG")
            .output()
            .unwrap()
    };

    // The provider from .env is rejected...
    let rejected = run(&[]);
    assert_eq!(rejected.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&rejected.stderr).contains("claude"));

    // ...unless a flag overrides it; the key and threshold still come from .env.
    let accepted = run(&["--provider", "deepseek"]);
    assert!(
        accepted.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&accepted.stderr)
    );
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "R10||R1O 0.8500 R1O\n"
    );
}

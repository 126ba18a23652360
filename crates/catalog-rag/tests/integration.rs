use axum::{
    http::header,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

const ANSWER: &str = "The Trailblazer is a waterproof hiking boot [1].";

fn crag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("crag");
    path
}

/// Find an available port for a test server.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

struct Env {
    provider_port: Option<u16>,
    server_port: u16,
    embeddings: bool,
    embedding_dims: usize,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            provider_port: None,
            server_port: 8000,
            embeddings: false,
            embedding_dims: 3,
        }
    }
}

fn setup_test_env(env: Env) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Port 9 (discard) fails fast when no provider is expected to be called.
    let provider = format!("http://127.0.0.1:{}/v1", env.provider_port.unwrap_or(9));

    let embedding = if env.embeddings {
        format!(
            r#"[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = {}
endpoint = "{}"
batch_size = 2
"#,
            env.embedding_dims, provider
        )
    } else {
        String::new()
    };

    let config_content = format!(
        r#"[db]
url = "sqlite:{}/data/catalog.sqlite"

[chat]
host = "ollama"
model = "gpt-4o-mini"
endpoint = "{}"
timeout_secs = 10

{}
[retrieval]
top = 3

[server]
bind = "127.0.0.1:{}"
"#,
        root.display(),
        provider,
        embedding,
        env.server_port
    );

    let config_path = config_dir.join("crag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_crag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = crag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run crag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Insert three footwear items directly; `crag init` must have run.
fn seed_items(tmp: &TempDir) {
    let url = format!(
        "sqlite:{}",
        tmp.path().join("data/catalog.sqlite").display()
    );
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
        sqlx::query(
            "INSERT INTO items (id, type, brand, name, description, price) VALUES
             (1, 'Footwear', 'Daybird', 'Trailblazer', 'Waterproof hiking boot with a grippy sole', 89.0),
             (2, 'Footwear', 'Gravitator', 'Summit Pro', 'Insulated mountaineering boot for winter climbs', 149.0),
             (3, 'Footwear', 'Daybird', 'Riverside', 'Lightweight sandal for wet trails', 35.0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    });
}

fn init_and_seed(env: Env) -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env(env);
    let (stdout, stderr, success) = run_crag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    seed_items(&tmp);
    (tmp, config_path)
}

// ============ Mock OpenAI-compatible host ============

/// Start an OpenAI-compatible mock on a free port and return the port.
///
/// Requests that offer tools get a `search_database` call for
/// "hiking boot"; other requests get [`ANSWER`], whole or as SSE.
fn start_mock_provider() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let app = Router::new()
                .route("/v1/chat/completions", post(mock_chat))
                .route("/v1/embeddings", post(mock_embeddings));
            axum::serve(listener, app).await.unwrap();
        });
    });

    port
}

async fn mock_chat(Json(body): Json<Value>) -> Response {
    let offers_tools = body["tools"].as_array().is_some_and(|t| !t.is_empty());
    if offers_tools {
        return Json(json!({
            "id": "cmpl-rewrite",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "search_database",
                            "arguments": "{\"search_query\":\"hiking boot\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .into_response();
    }

    if body["stream"] == json!(true) {
        let deltas = ["The Trailblazer ", "is a waterproof ", "hiking boot [1]."];
        let mut sse = String::new();
        for text in deltas {
            let chunk = json!({
                "id": "cmpl-answer",
                "object": "chat.completion.chunk",
                "created": 1,
                "model": "gpt-4o-mini",
                "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
            });
            sse.push_str(&format!("data: {}\n\n", chunk));
        }
        let last = json!({
            "id": "cmpl-answer",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
        });
        sse.push_str(&format!("data: {}\n\n", last));
        // Content-filter frames with no choices must be skipped.
        sse.push_str("data: {\"object\":\"chat.completion.chunk\",\"choices\":[]}\n\n");
        sse.push_str("data: [DONE]\n\n");
        return ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response();
    }

    Json(json!({
        "id": "cmpl-answer",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": ANSWER},
            "finish_reason": "stop"
        }]
    }))
    .into_response()
}

async fn mock_embeddings(Json(body): Json<Value>) -> Json<Value> {
    let inputs = body["input"].as_array().cloned().unwrap_or_default();
    let data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(index, text)| {
            let text = text.as_str().unwrap_or_default().to_lowercase();
            let embedding = if text.contains("boot") {
                [1.0, 0.0, 0.0]
            } else if text.contains("sandal") {
                [0.0, 1.0, 0.0]
            } else {
                [0.0, 0.0, 1.0]
            };
            json!({"object": "embedding", "index": index, "embedding": embedding})
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}

// ============ CLI ============

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env(Env::default());

    let (stdout, stderr, success) = run_crag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/catalog.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env(Env::default());

    let (_, _, success1) = run_crag(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, stderr, success2) = run_crag(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent): {}", stderr);
}

#[test]
fn test_search_text_mode() {
    let (_tmp, config_path) = init_and_seed(Env::default());

    let (stdout, stderr, success) = run_crag(&config_path, &["search", "boot", "--mode", "text"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("Trailblazer"));
    assert!(stdout.contains("Summit Pro"));
    assert!(!stdout.contains("Riverside"));
}

#[test]
fn test_search_text_mode_with_filter() {
    let (_tmp, config_path) = init_and_seed(Env::default());

    let (stdout, stderr, success) = run_crag(
        &config_path,
        &["search", "boot", "--mode", "text", "--filter", "price<100"],
    );
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("Trailblazer"));
    assert!(!stdout.contains("Summit Pro"));
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = init_and_seed(Env::default());

    let (stdout, _, success) = run_crag(&config_path, &["search", "umbrella", "--mode", "text"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_invalid_filter_errors() {
    let (_tmp, config_path) = init_and_seed(Env::default());

    let (_, stderr, success) = run_crag(
        &config_path,
        &["search", "boot", "--mode", "text", "--filter", "color=red"],
    );
    assert!(!success, "Unknown filter column should fail");
    assert!(stderr.contains("cannot be filtered"), "got: {}", stderr);
}

#[test]
fn test_search_hybrid_errors_when_embeddings_disabled() {
    let (_tmp, config_path) = init_and_seed(Env::default());

    let (_, stderr, success) = run_crag(&config_path, &["search", "boot"]);
    assert!(!success, "Hybrid mode should fail when embeddings disabled");
    assert!(stderr.contains("requires embeddings"), "got: {}", stderr);
}

#[test]
fn test_search_unknown_mode_errors() {
    let (_tmp, config_path) = init_and_seed(Env::default());

    let (_, stderr, success) = run_crag(&config_path, &["search", "boot", "--mode", "fuzzy"]);
    assert!(!success, "Unknown mode should fail");
    assert!(stderr.contains("unknown retrieval mode"), "got: {}", stderr);
}

#[test]
fn test_embed_errors_when_disabled() {
    let (_tmp, config_path) = init_and_seed(Env::default());

    let (_, stderr, success) = run_crag(&config_path, &["embed"]);
    assert!(!success, "embed should fail when provider disabled");
    assert!(stderr.contains("disabled"), "got: {}", stderr);
}

#[test]
fn test_embed_then_vector_search() {
    let provider_port = start_mock_provider();
    let (_tmp, config_path) = init_and_seed(Env {
        provider_port: Some(provider_port),
        embeddings: true,
        ..Env::default()
    });

    let (stdout, _, success) = run_crag(&config_path, &["embed", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("items needing embeddings: 3"));

    let (stdout, stderr, success) = run_crag(&config_path, &["embed"]);
    assert!(success, "embed failed: {}", stderr);
    assert!(stdout.contains("embedded: 3"), "got: {}", stdout);
    assert!(stdout.contains("failed: 0"));

    let (stdout, _, success) = run_crag(&config_path, &["embed"]);
    assert!(success);
    assert!(stdout.contains("all items up to date"));

    let (stdout, stderr, success) = run_crag(
        &config_path,
        &["search", "sandal", "--mode", "vectors", "--top", "1"],
    );
    assert!(success, "vector search failed: {}", stderr);
    assert!(stdout.contains("Riverside"), "got: {}", stdout);
    assert!(!stdout.contains("Trailblazer"));
}

#[test]
fn test_search_rejects_query_vector_of_wrong_width() {
    let provider_port = start_mock_provider();
    let (_tmp, config_path) = init_and_seed(Env {
        provider_port: Some(provider_port),
        embeddings: true,
        embedding_dims: 4,
        ..Env::default()
    });

    let (stdout, stderr, success) =
        run_crag(&config_path, &["search", "boot", "--mode", "vectors"]);
    assert!(!success, "mismatched query vector should fail: {}", stdout);
    assert!(
        stderr.contains("dimension mismatch: expected 4, got 3"),
        "got: {}",
        stderr
    );
}

#[test]
fn test_chat_command_with_thoughts() {
    let provider_port = start_mock_provider();
    let (_tmp, config_path) = init_and_seed(Env {
        provider_port: Some(provider_port),
        ..Env::default()
    });

    let (stdout, stderr, success) = run_crag(
        &config_path,
        &["chat", "Do you have hiking boots?", "--thoughts", "--mode", "text"],
    );
    assert!(success, "chat failed: {}", stderr);
    assert!(stdout.contains(ANSWER));
    assert!(stdout.contains("[1]: Waterproof hiking boot"));
    assert!(stdout.contains("== Search using generated search query =="));
    assert!(stdout.contains("hiking boot"));
}

#[test]
fn test_chat_command_streamed() {
    let provider_port = start_mock_provider();
    let (_tmp, config_path) = init_and_seed(Env {
        provider_port: Some(provider_port),
        ..Env::default()
    });

    let (stdout, stderr, success) = run_crag(
        &config_path,
        &["chat", "Do you have hiking boots?", "--stream"],
    );
    assert!(success, "chat failed: {}", stderr);
    assert!(stdout.contains(ANSWER), "got: {}", stdout);
}

// ============ HTTP server ============

/// Start `crag serve` in the background and return the child process.
fn start_server(config_path: &Path) -> std::process::Child {
    let binary = crag_binary();
    Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to start server: {}", e))
}

/// Wait for the server to be ready by polling the health endpoint.
fn wait_for_server(port: u16) {
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        std::thread::sleep(std::time::Duration::from_millis(100));
        if let Ok(resp) = reqwest::blocking::get(&url) {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

fn serve_with_mock() -> (TempDir, std::process::Child, u16) {
    let provider_port = start_mock_provider();
    let port = find_free_port();
    let (tmp, config_path) = init_and_seed(Env {
        provider_port: Some(provider_port),
        server_port: port,
        ..Env::default()
    });
    let server = start_server(&config_path);
    wait_for_server(port);
    (tmp, server, port)
}

#[test]
fn test_server_health() {
    let (_tmp, mut server, port) = serve_with_mock();

    let resp = reqwest::blocking::get(format!("http://127.0.0.1:{}/health", port)).unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());

    server.kill().ok();
    server.wait().ok();
}

#[test]
fn test_server_chat_whole_response() {
    let (_tmp, mut server, port) = serve_with_mock();

    let client = reqwest::blocking::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/chat", port))
        .json(&json!({
            "messages": [{"role": "user", "content": "Do you have hiking boots?"}],
            "stream": false
        }))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().unwrap();
    let choice = &body["choices"][0];
    assert_eq!(choice["message"]["content"], ANSWER);

    let points: Vec<&str> = choice["context"]["data_points"]["text"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(points
        .iter()
        .any(|p| p.starts_with("[1]: Waterproof hiking boot")));
    assert!(!points.iter().any(|p| p.starts_with("[3]:")));

    let thoughts = choice["context"]["thoughts"].as_array().unwrap();
    assert_eq!(thoughts.len(), 4);
    assert_eq!(thoughts[1]["description"], "hiking boot");

    server.kill().ok();
    server.wait().ok();
}

#[test]
fn test_server_chat_ndjson_stream() {
    let (_tmp, mut server, port) = serve_with_mock();

    let client = reqwest::blocking::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/chat", port))
        .json(&json!({
            "messages": [{"role": "user", "content": "Do you have hiking boots?"}]
        }))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("application/x-ndjson"));

    let text = resp.text().unwrap();
    let lines: Vec<Value> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    let first = &lines[0]["choices"][0];
    assert_eq!(first["delta"]["role"], "assistant");
    assert!(first["delta"].get("content").is_none());
    assert!(first["context"]["data_points"]["text"].is_array());
    assert_eq!(first["context"]["thoughts"].as_array().unwrap().len(), 4);

    let answer: String = lines[1..]
        .iter()
        .filter_map(|l| l["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(answer, ANSWER);
    assert!(lines
        .iter()
        .all(|l| !l["choices"].as_array().unwrap().is_empty()));

    server.kill().ok();
    server.wait().ok();
}

#[test]
fn test_server_rejects_non_user_last_turn() {
    let (_tmp, mut server, port) = serve_with_mock();

    let client = reqwest::blocking::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/chat", port))
        .json(&json!({
            "messages": [
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello!"}
            ]
        }))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("http://127.0.0.1:{}/chat", port))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    server.kill().ok();
    server.wait().ok();
}

#[test]
fn test_server_rejects_invalid_caller_filter() {
    let (_tmp, mut server, port) = serve_with_mock();

    let client = reqwest::blocking::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/chat", port))
        .json(&json!({
            "messages": [{"role": "user", "content": "boots?"}],
            "stream": false,
            "context": {"overrides": {"filters": [
                {"column": "color", "comparison_operator": "=", "value": "red"}
            ]}}
        }))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 400);

    server.kill().ok();
    server.wait().ok();
}

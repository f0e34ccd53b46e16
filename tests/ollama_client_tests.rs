//! Ollama client and probe against a throwaway local HTTP listener.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use clipglot::config::PipelineConfig;
use clipglot::supervisor::{Backend, OllamaBackend};
use clipglot::translate::ollama::OllamaClient;
use clipglot::translate::{TranslateError, Translator};

/// Captured request: first line and body.
struct Captured {
    request_line: String,
    body: serde_json::Value,
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Accept one connection, answer with `status` + `body`, return what was sent.
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = find_header_end(&buf) {
                break end;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending body");
            buf.extend_from_slice(&chunk[..n]);
        }

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();

        let body_bytes = &buf[header_end..header_end + content_length];
        Captured {
            request_line: head.lines().next().unwrap_or_default().to_string(),
            body: if body_bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(body_bytes).unwrap()
            },
        }
    });

    (format!("http://{addr}"), task)
}

/// An address nothing listens on.
async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn config_for(url: &str) -> PipelineConfig {
    PipelineConfig {
        backend_url: url.to_string(),
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn posts_non_streaming_generate_and_strips_label() {
    let (url, server) = serve_once(
        "200 OK",
        r#"{"model":"m1","response":"译文: 早上好","done":true}"#,
    )
    .await;
    let client = OllamaClient::new(&config_for(&url)).unwrap();

    let out = client.translate("Good morning", "m1").await.unwrap();
    assert_eq!(out, "早上好");

    let captured = server.await.unwrap();
    assert!(captured.request_line.starts_with("POST /api/generate "));
    assert_eq!(captured.body["model"], "m1");
    assert_eq!(captured.body["stream"], false);
    let prompt = captured.body["prompt"].as_str().unwrap();
    assert!(prompt.contains("Good morning"));
    assert!(prompt.contains("只返回译文"));
}

#[tokio::test]
async fn non_success_status_is_transient() {
    let (url, server) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
    let client = OllamaClient::new(&config_for(&url)).unwrap();

    let err = client.translate("hello", "m1").await.unwrap_err();
    assert!(matches!(err, TranslateError::Status { status: 500, .. }), "{err:?}");
    assert!(err.is_transient());
    server.await.unwrap();
}

#[tokio::test]
async fn missing_response_field_is_parse_error() {
    let (url, server) = serve_once("200 OK", r#"{"model":"m1","done":true}"#).await;
    let client = OllamaClient::new(&config_for(&url)).unwrap();

    let err = client.translate("hello", "m1").await.unwrap_err();
    assert!(matches!(err, TranslateError::Parse(_)), "{err:?}");
    assert!(!err.is_transient());
    server.await.unwrap();
}

#[tokio::test]
async fn connection_refused_is_transient_service_error() {
    let client = OllamaClient::new(&config_for(&dead_url().await)).unwrap();
    let err = client.translate("hello", "m1").await.unwrap_err();
    assert!(matches!(err, TranslateError::Service(_)), "{err:?}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn probe_accepts_any_answer_from_root() {
    let (url, server) = serve_once("404 Not Found", "{}").await;
    let backend = OllamaBackend::new(&config_for(&url)).unwrap();
    assert!(backend.probe().await);
    let captured = server.await.unwrap();
    assert!(captured.request_line.starts_with("GET / "));
}

#[tokio::test]
async fn probe_fails_when_nothing_listens() {
    let backend = OllamaBackend::new(&config_for(&dead_url().await)).unwrap();
    assert!(!backend.probe().await);
}

#[tokio::test]
async fn missing_executable_is_reported_as_fatal() {
    let config = PipelineConfig {
        backend_program: "clipglot-no-such-binary-7f3a".into(),
        ..config_for(&dead_url().await)
    };
    let backend = OllamaBackend::new(&config).unwrap();
    let err = backend.launch().await.unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
    let err = backend.list_models().await.unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
}

//! GeminiClient against a local HTTP server speaking the Gemini wire format.

use std::sync::{Arc, Mutex};

use aligner_core::{
    CollaboratorError, FeedbackGenerator, FeedbackRequest, Inspector, Verdict, VerdictKind,
};
use aligner_gemini::{GeminiClient, GeminiConfig};
use aligner_store::{Embedder, StoreError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// One request as seen by the fake server.
#[derive(Debug, Clone)]
struct Captured {
    request_line: String,
    headers: String,
    body: String,
}

/// Serve `responses` in order, one connection each, recording the requests.
async fn serve(responses: Vec<(u16, String)>) -> (String, Arc<Mutex<Vec<Captured>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let log = captured.clone();

    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            log.lock().unwrap().push(request);

            let response = format!(
                "HTTP/1.1 {status} OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    });

    (format!("http://{addr}"), captured)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Captured {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending headers");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let (request_line, headers) = head.split_once("\r\n").unwrap_or((&head, ""));
    Captured {
        request_line: request_line.to_string(),
        headers: headers.to_lowercase(),
        body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
    }
}

fn candidate_text(text: &str) -> String {
    serde_json::json!({
        "candidates": [{ "content": { "parts": [{ "text": text }], "role": "model" } }]
    })
    .to_string()
}

fn client(base_url: &str) -> GeminiClient {
    GeminiClient::new(
        GeminiConfig::default()
            .with_api_key("test-key")
            .with_base_url(base_url)
            .with_embed_model("text-embedding-004", 3),
    )
    .unwrap()
}

/// Test: inspection posts the prompt and parses a fenced JSON answer
#[tokio::test]
async fn test_inspect_parses_fenced_json() {
    let answer = "```json\n{\"language\": \"python\", \"user_function\": \"magic_pair_finder\", \"predicted_problem\": \"Two Sum\", \"test_input\": \"([2, 7, 11, 15], 9)\"}\n```";
    let (url, captured) = serve(vec![(200, candidate_text(answer))]).await;

    let inspection = client(&url)
        .inspect("def magic_pair_finder(nums, target): pass", "find two numbers")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(inspection.entry_point.as_deref(), Some("magic_pair_finder"));
    assert_eq!(inspection.predicted_problem.as_deref(), Some("Two Sum"));

    let requests = captured.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0]
        .request_line
        .starts_with("POST /v1beta/models/gemini-2.0-flash:generateContent"));
    assert!(requests[0].headers.contains("x-goog-api-key: test-key"));
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
    assert!(prompt.contains("magic_pair_finder"));
    assert!(prompt.contains("find two numbers"));
}

/// Test: a non-JSON answer means the structure could not be determined
#[tokio::test]
async fn test_inspect_prose_answer_is_none() {
    let (url, _) = serve(vec![(200, candidate_text("Looks like Two Sum to me."))]).await;
    let inspection = client(&url).inspect("def f(): pass", "").await.unwrap();
    assert!(inspection.is_none());
}

/// Test: HTTP errors surface as transport failures
#[tokio::test]
async fn test_inspect_server_error_is_transport_error() {
    let (url, _) = serve(vec![(503, r#"{"error": "overloaded"}"#.to_string())]).await;
    let err = client(&url).inspect("def f(): pass", "").await.unwrap_err();
    match err {
        CollaboratorError::Transport(message) => assert!(message.contains("503")),
        other => panic!("expected transport error, got {other:?}"),
    }
}

/// Test: a response without candidates is an invalid response
#[tokio::test]
async fn test_feedback_without_candidates_is_invalid() {
    let (url, _) = serve(vec![(200, r#"{"candidates": []}"#.to_string())]).await;
    let request = FeedbackRequest {
        code: "def f(a): return max(a)".into(),
        language: "python".into(),
        verdict: Verdict::new(VerdictKind::CorrectOptimal, "result matches reference"),
        reference_code: None,
    };
    let err = client(&url).explain(&request).await.unwrap_err();
    assert!(matches!(err, CollaboratorError::InvalidResponse(_)));
}

/// Test: feedback returns the model's text and sends the diagnosis
#[tokio::test]
async fn test_feedback_returns_text() {
    let (url, captured) = serve(vec![(200, candidate_text("**Good code.** O(n)."))]).await;
    let request = FeedbackRequest {
        code: "def f(a): return min(a)".into(),
        language: "python".into(),
        verdict: Verdict::new(VerdictKind::LogicError, "results differ: \"1\" != \"3\""),
        reference_code: None,
    };

    let text = client(&url).explain(&request).await.unwrap();
    assert_eq!(text, "**Good code.** O(n).");

    let requests = captured.lock().unwrap();
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
    assert!(prompt.contains("Issue Type: LOGIC BUG"));
}

/// Test: embeddings are read from embedContent and length-checked
#[tokio::test]
async fn test_embed_reads_values_and_checks_dimensions() {
    let (url, captured) = serve(vec![
        (200, r#"{"embedding": {"values": [0.1, 0.2, 0.3]}}"#.to_string()),
        (200, r#"{"embedding": {"values": [0.1, 0.2]}}"#.to_string()),
    ])
    .await;
    let client = client(&url);

    assert_eq!(client.dimensions(), 3);
    let vector = client.embed("two-sum def f(): pass").await.unwrap();
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);

    let err = client.embed("short").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    ));

    let requests = captured.lock().unwrap();
    assert!(requests[0]
        .request_line
        .starts_with("POST /v1beta/models/text-embedding-004:embedContent"));
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["model"], "models/text-embedding-004");
    assert_eq!(body["content"]["parts"][0]["text"], "two-sum def f(): pass");
}

/// Test: an unreachable server is a transport error
#[tokio::test]
async fn test_unreachable_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = client(&url).inspect("def f(): pass", "").await.unwrap_err();
    assert!(matches!(err, CollaboratorError::Transport(_)));
}

//! Wire-level tests for the Mastodon and LLM clients against local fake
//! HTTP servers, including the tool loop end to end.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tootloom::config::LlmConfig;
use tootloom::llm::OpenAiClient;
use tootloom::mastodon::{MastodonClient, NewStatusParams};
use tootloom::models::ChatMessage;

/// Starts a fake JSON API on a random port. The handler sees
/// `(method, url, body)` and returns `(status_code, response_body)`.
fn spawn_json_server(
    mut handler: impl FnMut(&str, &str, &str) -> (u16, String) + Send + 'static,
) -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();

    std::thread::spawn(move || {
        for mut request in server.incoming_requests() {
            let mut body = String::new();
            let _ = request.as_reader().read_to_string(&mut body);
            let (code, response) = handler(
                request.method().as_str(),
                &request.url().to_string(),
                &body,
            );
            let header =
                tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                    .unwrap();
            let _ = request.respond(
                tiny_http::Response::from_string(response)
                    .with_status_code(code)
                    .with_header(header),
            );
        }
    });

    format!("http://{}", addr)
}

fn mastodon_client(base_url: &str) -> MastodonClient {
    MastodonClient::new(base_url, "test-token".to_string(), 5, 1).unwrap()
}

fn llm_client(base_url: &str) -> OpenAiClient {
    std::env::set_var("OPENAI_API_KEY", "test-key");
    OpenAiClient::from_config(&LlmConfig {
        base_url: base_url.to_string(),
        model: "test-model".to_string(),
        image_model: "test-image".to_string(),
        timeout_secs: 5,
        max_retries: 1,
    })
    .unwrap()
}

const STATUS_JSON: &str = r#"{
    "id": "42",
    "account": {"id": "1", "username": "alice", "acct": "alice", "display_name": "Alice"},
    "content": "<p>hello</p>",
    "in_reply_to_id": null,
    "visibility": "public",
    "created_at": "2024-05-01T12:00:00Z"
}"#;

// ─── Mastodon client ────────────────────────────────────────────────

#[tokio::test]
async fn fetches_and_parses_a_status() {
    let base = spawn_json_server(|method, url, _| {
        assert_eq!(method, "GET");
        assert_eq!(url, "/api/v1/statuses/42");
        (200, STATUS_JSON.to_string())
    });

    let status = mastodon_client(&base).get_status("42").await.unwrap();
    assert_eq!(status.id, "42");
    assert_eq!(status.account.acct, "alice");
    assert_eq!(status.visibility, "public");
    assert!(status.in_reply_to_id.is_none());
}

#[tokio::test]
async fn notifications_carry_since_id_and_type_filters() {
    let base = spawn_json_server(|_, url, _| {
        assert!(url.starts_with("/api/v1/notifications?"));
        assert!(url.contains("since_id=99"));
        assert!(url.contains("mention"));
        (200, "[]".to_string())
    });

    let notifications = mastodon_client(&base)
        .notifications(Some("99"), &["mention"])
        .await
        .unwrap();
    assert!(notifications.is_empty());
}

#[tokio::test]
async fn get_retries_a_server_error_then_succeeds() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let base = spawn_json_server(move |_, _, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            (500, r#"{"error": "flaky"}"#.to_string())
        } else {
            (200, STATUS_JSON.to_string())
        }
    });

    let status = mastodon_client(&base).get_status("42").await.unwrap();
    assert_eq!(status.id, "42");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn post_failure_surfaces_the_response_body() {
    let base = spawn_json_server(|method, url, _| {
        assert_eq!(method, "POST");
        assert_eq!(url, "/api/v1/statuses");
        (422, r#"{"error": "Text can't be blank"}"#.to_string())
    });

    let err = mastodon_client(&base)
        .post_status(&NewStatusParams {
            status: String::new(),
            in_reply_to_id: None,
            media_ids: Vec::new(),
            visibility: None,
            sensitive: false,
        })
        .await
        .unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("422"));
    assert!(msg.contains("Text can't be blank"));
}

#[tokio::test]
async fn posting_a_reply_sends_the_reply_fields() {
    let base = spawn_json_server(|_, _, body| {
        let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(parsed["status"], "hi there");
        assert_eq!(parsed["in_reply_to_id"], "42");
        assert_eq!(parsed["visibility"], "unlisted");
        (200, STATUS_JSON.to_string())
    });

    mastodon_client(&base)
        .post_status(&NewStatusParams {
            status: "hi there".to_string(),
            in_reply_to_id: Some("42".to_string()),
            media_ids: Vec::new(),
            visibility: Some("unlisted".to_string()),
            sensitive: false,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn uploads_media_as_multipart() {
    let base = spawn_json_server(|method, url, body| {
        assert_eq!(method, "POST");
        assert_eq!(url, "/api/v2/media");
        assert!(body.contains("generated-1.png"));
        (200, r#"{"id": "media-7"}"#.to_string())
    });

    let attachment = mastodon_client(&base)
        .upload_media(vec![1, 2, 3], "generated-1.png")
        .await
        .unwrap();
    assert_eq!(attachment.id, "media-7");
}

#[tokio::test]
async fn context_returns_root_first_ancestors() {
    let base = spawn_json_server(|_, url, _| {
        assert_eq!(url, "/api/v1/statuses/42/context");
        let body = format!(
            r#"{{"ancestors": [{STATUS_JSON}], "descendants": []}}"#
        );
        (200, body)
    });

    let context = mastodon_client(&base).get_context("42").await.unwrap();
    assert_eq!(context.ancestors.len(), 1);
    assert_eq!(context.ancestors[0].id, "42");
    assert!(context.descendants.is_empty());
}

// ─── LLM client ─────────────────────────────────────────────────────

#[tokio::test]
async fn chat_without_tool_calls_returns_the_content() {
    let base = spawn_json_server(|method, url, body| {
        assert_eq!(method, "POST");
        assert_eq!(url, "/chat/completions");
        let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(parsed["model"], "test-model");
        assert!(parsed["tools"].is_array());
        (
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"plain answer"}}]}"#
                .to_string(),
        )
    });

    let outcome = llm_client(&base)
        .chat(vec![ChatMessage::user("question", None)])
        .await
        .unwrap();
    assert_eq!(outcome.message, "plain answer");
    assert!(outcome.image_urls.is_empty());
}

#[tokio::test]
async fn tool_loop_feeds_results_back_and_terminates() {
    let round = Arc::new(AtomicUsize::new(0));
    let counter = round.clone();
    let base = spawn_json_server(move |_, _, body| {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => (
                200,
                r#"{"choices":[{"message":{
                    "role":"assistant",
                    "content":null,
                    "tool_calls":[{"id":"call_1","type":"function",
                        "function":{"name":"get_version","arguments":"{}"}}]
                }}]}"#
                    .to_string(),
            ),
            _ => {
                // The second round-trip must carry the tool result
                let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
                let messages = parsed["messages"].as_array().unwrap();
                let tool_turn = messages
                    .iter()
                    .find(|m| m["role"] == "tool")
                    .expect("tool result in transcript");
                assert_eq!(tool_turn["tool_call_id"], "call_1");
                (
                    200,
                    r#"{"choices":[{"message":{"role":"assistant","content":"done"}}]}"#
                        .to_string(),
                )
            }
        }
    });

    let outcome = llm_client(&base)
        .chat(vec![ChatMessage::user("what version are you", None)])
        .await
        .unwrap();
    assert_eq!(outcome.message, "done");
    assert_eq!(round.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn generated_images_surface_in_the_outcome() {
    let round = Arc::new(AtomicUsize::new(0));
    let counter = round.clone();
    let base = spawn_json_server(move |_, url, _| {
        if url == "/images/generations" {
            return (
                200,
                r#"{"data":[{"url":"https://img.example/pic.png"}]}"#.to_string(),
            );
        }
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => (
                200,
                r#"{"choices":[{"message":{
                    "role":"assistant",
                    "content":null,
                    "tool_calls":[{"id":"call_img","type":"function",
                        "function":{"name":"generate_image",
                            "arguments":"{\"prompt\":\"a crab\"}"}}]
                }}]}"#
                    .to_string(),
            ),
            _ => (
                200,
                r#"{"choices":[{"message":{"role":"assistant","content":"here you go"}}]}"#
                    .to_string(),
            ),
        }
    });

    let outcome = llm_client(&base)
        .chat(vec![ChatMessage::user("draw a crab", None)])
        .await
        .unwrap();
    assert_eq!(outcome.message, "here you go");
    assert_eq!(outcome.image_urls, vec!["https://img.example/pic.png"]);
}

#[tokio::test]
async fn unknown_tool_becomes_an_error_result_not_a_crash() {
    let round = Arc::new(AtomicUsize::new(0));
    let counter = round.clone();
    let base = spawn_json_server(move |_, _, body| {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => (
                200,
                r#"{"choices":[{"message":{
                    "role":"assistant",
                    "content":null,
                    "tool_calls":[{"id":"call_x","type":"function",
                        "function":{"name":"launch_rockets","arguments":"{}"}}]
                }}]}"#
                    .to_string(),
            ),
            _ => {
                let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
                let messages = parsed["messages"].as_array().unwrap();
                let tool_turn = messages.iter().find(|m| m["role"] == "tool").unwrap();
                let content = tool_turn["content"].as_str().unwrap();
                assert!(content.starts_with("Error:"));
                assert!(content.contains("launch_rockets"));
                (
                    200,
                    r#"{"choices":[{"message":{"role":"assistant","content":"sorry"}}]}"#
                        .to_string(),
                )
            }
        }
    });

    let outcome = llm_client(&base)
        .chat(vec![ChatMessage::user("do the thing", None)])
        .await
        .unwrap();
    assert_eq!(outcome.message, "sorry");
}

#[tokio::test]
async fn client_error_fails_without_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let base = spawn_json_server(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        (400, r#"{"error": "bad request"}"#.to_string())
    });

    let err = llm_client(&base)
        .chat(vec![ChatMessage::user("hi", None)])
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("400"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

//! Logging and result behavior of generated handlers.

use clapmcp::logging::HandlerKind;
use clapmcp::{
    input_encode_failures, resource_handler, tool_handler, HandlerError, Level, McpServer,
    ResourceHandler, ResourceRequest, ToolHandler,
};
use clapmcp_test_utils::{RecordingNotifier, RecordingSink};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
struct Search {
    query: String,
    limit: Option<u32>,
    tags: Vec<String>,
}

fn search(_input: Search, out: &mut dyn Write) -> anyhow::Result<()> {
    write!(out, "X")?;
    Ok(())
}

fn result_text(result: &clapmcp::CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.clone()))
        .collect()
}

#[tokio::test]
async fn test_success_logs_once_per_sink() {
    let process = RecordingSink::new();
    let session = RecordingNotifier::new();
    let handler = tool_handler("search", search).with_process_sink(Arc::new(process.clone()));

    let result = handler
        .call(
            json!({"query": "rust", "limit": 3, "tags": ["a", "b"]}),
            Arc::new(session.clone()),
        )
        .await
        .unwrap();

    assert_eq!(result_text(&result), "X");
    assert_eq!(process.len(), 1);
    assert_eq!(session.len(), 1);

    let entry = &process.entries()[0];
    assert_eq!(entry.level, Level::Info);
    assert_eq!(entry.name, "search");
    assert_eq!(entry.message, "search");
    assert_eq!(entry.output_length, Some(1));

    let sent = &session.sent()[0];
    assert_eq!(sent.level, Level::Info);
    assert_eq!(sent.logger, "search");
    assert_eq!(sent.data["msg"], "search");
    assert_eq!(sent.data["output_length"], 1);
}

#[tokio::test]
async fn test_failure_logs_once_per_sink_and_returns_no_result() {
    let process = RecordingSink::new();
    let session = RecordingNotifier::new();
    let handler = tool_handler("search", |_: Search, _out: &mut dyn Write| {
        anyhow::bail!("index unavailable")
    })
    .with_process_sink(Arc::new(process.clone()));

    let err = handler
        .call(
            json!({"query": "rust", "tags": []}),
            Arc::new(session.clone()),
        )
        .await
        .unwrap_err();

    assert!(err.is_operation());
    assert_eq!(err.to_string(), "index unavailable");

    assert_eq!(process.at_level(Level::Error).len(), 1);
    assert_eq!(process.len(), 1);
    assert_eq!(process.entries()[0].message, "index unavailable");

    assert_eq!(session.len(), 1);
    assert_eq!(session.sent()[0].level, Level::Error);
    assert_eq!(session.sent()[0].data["msg"], "index unavailable");
}

#[tokio::test]
async fn test_logged_input_round_trips() {
    let process = RecordingSink::new();
    let handler = tool_handler("search", search).with_process_sink(Arc::new(process.clone()));
    let input = Search {
        query: "ünïcode \"quoted\"".to_string(),
        limit: None,
        tags: vec!["x".to_string()],
    };

    handler
        .call(serde_json::to_value(&input).unwrap(), Arc::new(RecordingNotifier::new()))
        .await
        .unwrap();

    let logged = process.entries()[0].input.clone().unwrap();
    let decoded: Search = serde_json::from_str(&logged).unwrap();
    assert_eq!(decoded, input);
    assert_eq!(input_encode_failures(), 0);
}

#[tokio::test]
async fn test_session_throttle_is_scoped_to_one_call() {
    let process = RecordingSink::new();
    let session = RecordingNotifier::new();
    let handler = tool_handler("flaky", |_: Search, _out: &mut dyn Write| {
        anyhow::bail!("timeout")
    })
    .with_process_sink(Arc::new(process.clone()))
    .with_session_interval(Duration::from_secs(60));

    for _ in 0..3 {
        let _ = handler
            .call(json!({"query": "q", "tags": []}), Arc::new(session.clone()))
            .await;
    }

    // Each call builds its own session logger, so throttling is per call.
    assert_eq!(session.len(), 3);
    assert_eq!(process.len(), 3);
}

#[tokio::test]
async fn test_invalid_input_is_logged_and_rejected() {
    let process = RecordingSink::new();
    let session = RecordingNotifier::new();
    let handler = tool_handler("search", search).with_process_sink(Arc::new(process.clone()));

    let err = handler
        .call(json!({"query": 1}), Arc::new(session.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, HandlerError::InvalidInput(_)));
    assert_eq!(process.at_level(Level::Error).len(), 1);
    assert_eq!(session.len(), 1);
}

#[tokio::test]
async fn test_resource_logs_uri_on_both_sinks() {
    let process = RecordingSink::new();
    let session = RecordingNotifier::new();
    let handler = resource_handler("about", "application/json", |req, out| {
        write!(out, r#"{{"uri":"{}"}}"#, req.uri)?;
        Ok(())
    })
    .with_process_sink(Arc::new(process.clone()));

    let result = handler
        .read(ResourceRequest::new("app://about"), Arc::new(session.clone()))
        .await
        .unwrap();
    assert_eq!(result.contents.len(), 1);

    let entry = &process.entries()[0];
    assert_eq!(entry.kind, HandlerKind::Resource);
    assert_eq!(entry.message, "resource read");
    assert_eq!(entry.uri.as_deref(), Some("app://about"));

    let sent = &session.sent()[0];
    assert_eq!(sent.logger, "about");
    assert_eq!(sent.data["uri"], "app://about");
}

#[tokio::test]
async fn test_resource_failure_logs_error_on_both_sinks() {
    let process = RecordingSink::new();
    let session = RecordingNotifier::new();
    let handler = resource_handler("config", "text/plain", |_, _| anyhow::bail!("gone"))
        .with_process_sink(Arc::new(process.clone()));

    let err = handler
        .read(ResourceRequest::new("app://config"), Arc::new(session.clone()))
        .await
        .unwrap_err();
    assert!(err.is_operation());
    assert_eq!(err.to_string(), "gone");

    assert_eq!(process.len(), 1);
    let entry = &process.at_level(Level::Error)[0];
    assert_eq!(entry.kind, HandlerKind::Resource);
    assert_eq!(entry.message, "gone");
    assert_eq!(entry.uri.as_deref(), Some("app://config"));
    assert_eq!(entry.output_length, None);

    assert_eq!(session.len(), 1);
    let sent = &session.sent()[0];
    assert_eq!(sent.level, Level::Error);
    assert_eq!(sent.logger, "config");
    assert_eq!(sent.data["msg"], "gone");
    assert_eq!(sent.data["uri"], "app://config");
}

#[tokio::test]
async fn test_server_reports_tool_failure_in_result() {
    let server = McpServer::new(&clapmcp::Config::new("app", "0.1.0"));
    server.add_tool(
        McpServer::tool_for::<Search>("search", "Search the index"),
        tool_handler("search", |_: Search, _out: &mut dyn Write| {
            anyhow::bail!("E")
        }),
    );

    let result = server
        .dispatch_tool(
            "search",
            json!({"query": "q", "tags": []}),
            Arc::new(RecordingNotifier::new()),
        )
        .await
        .unwrap();

    assert_eq!(result.is_error, Some(true));
    assert_eq!(result_text(&result), "E");
}

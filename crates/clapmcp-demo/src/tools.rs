//! MCP registration of the demo's operations.

use crate::ops::{self, CountInput, UpperInput};
use clapmcp::{resource_handler, tool_handler, McpServer};
use serde_json::json;

/// URI of the `about` resource.
pub const ABOUT_URI: &str = "clapmcp-demo://about";

pub fn register(server: &McpServer) {
    server.add_tool(
        McpServer::tool_for::<UpperInput>("upper", "Convert text to upper case"),
        tool_handler("upper", ops::upper),
    );
    server.add_tool(
        McpServer::tool_for::<CountInput>("count", "Count lines, words and characters of text"),
        tool_handler("count", ops::count),
    );

    let name = server.name().to_string();
    let version = server.version().to_string();
    let tools = server.tool_names();
    server.add_resource(
        McpServer::resource(ABOUT_URI, "about", "application/json"),
        resource_handler("about", "application/json", move |_, out| {
            let about = json!({
                "name": name,
                "version": version,
                "tools": tools,
            });
            serde_json::to_writer_pretty(out, &about)?;
            Ok(())
        }),
    );
}

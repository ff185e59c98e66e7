//! Tool host over stdio: newline-delimited JSON-RPC 2.0.
//!
//! Only stdout carries protocol messages; logging goes to stderr.

use std::io::{self, BufRead, Write};

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::tools::Dispatcher;

const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct StdioServer<'a> {
    dispatcher: Dispatcher<'a>,
}

impl<'a> StdioServer<'a> {
    pub fn new(dispatcher: Dispatcher<'a>) -> Self {
        Self { dispatcher }
    }

    /// Serve until `reader` reaches end of input.
    pub fn run<R: BufRead, W: Write>(&self, reader: R, mut writer: W) -> io::Result<()> {
        info!("stdio server started");
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_message(line) {
                writeln!(writer, "{}", response)?;
                writer.flush()?;
            }
        }
        info!("stdio server stopped");
        Ok(())
    }

    /// `None` for notifications, which get no reply.
    fn handle_message(&self, line: &str) -> Option<Value> {
        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => return Some(error_response(Value::Null, -32700, &format!("Parse error: {}", e))),
        };

        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        debug!(%method, "request");
        let id = request.get("id").cloned()?;
        let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

        let response = match method {
            "initialize" => success_response(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            ),
            "ping" => success_response(id, json!({})),
            "tools/list" => success_response(id, json!({ "tools": self.dispatcher.list_tools() })),
            "tools/call" => self.call_tool(id, &params),
            _ => error_response(id, -32601, &format!("Method not found: {}", method)),
        };
        Some(response)
    }

    fn call_tool(&self, id: Value, params: &Value) -> Value {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return error_response(id, -32602, "Invalid params: missing tool name");
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let result = self.dispatcher.dispatch(name, &arguments);
        match serde_json::to_value(&result) {
            Ok(result) => success_response(id, result),
            Err(e) => error_response(id, -32603, &format!("Internal error: {}", e)),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::oauth::tests::test_config;
    use crate::auth::OAuthFlow;
    use crate::provider::KakaoApi;
    use crate::storage::{Account, AccountRegistry, CredentialStore};
    use crate::tools::{MissingCredentialPolicy, ToolRegistry};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn exchange(input: &str) -> Vec<Value> {
        let tmp = TempDir::new().unwrap();
        let registry = ToolRegistry::standard();
        let accounts = AccountRegistry::new(vec![Account {
            email: "me@example.com".into(),
            account_type: "personal".into(),
            extra_info: String::new(),
        }]);
        let flow = OAuthFlow::new(test_config("http://127.0.0.1:9"), CredentialStore::new(tmp.path()));
        let api = KakaoApi::new("http://127.0.0.1:9");
        let dispatcher = Dispatcher::new(
            &registry,
            &accounts,
            &flow,
            &api,
            MissingCredentialPolicy::ReportUrl,
        );

        let mut output = Vec::new();
        StdioServer::new(dispatcher)
            .run(Cursor::new(input.to_string()), &mut output)
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn initialize_then_list_tools() {
        let responses = exchange(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        ));
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(responses[1]["result"]["tools"].as_array().unwrap().len(), 11);
    }

    #[test]
    fn tool_failures_are_results_not_protocol_errors() {
        let responses = exchange(
            r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"get_calendar_list","arguments":{"__email_address__":"me@example.com"}}}"#,
        );
        let result = &responses[0]["result"];
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("/oauth/authorize?"));
    }

    #[test]
    fn malformed_and_unknown_requests_get_json_rpc_errors() {
        let responses = exchange("{not json\n{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"resources/list\"}\n{\"jsonrpc\":\"2.0\",\"id\":4,\"method\":\"tools/call\",\"params\":{}}\n");
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[1]["error"]["code"], -32601);
        assert_eq!(responses[2]["error"]["code"], -32602);
    }
}

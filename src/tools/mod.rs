//! Tool registry and dispatch.
//!
//! Every tool acts on behalf of one account named by the `__email_address__`
//! argument. [`Dispatcher::dispatch`] resolves that account's credentials,
//! runs the tool, and folds every failure into an error result, so a host
//! never sees a tool call fail outright.

mod calendar;
mod message;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::auth::callback::authorize_with;
use crate::auth::{authorize_interactively, AuthError, CallbackError, OAuthFlow};
use crate::provider::{ApiError, KakaoApi};
use crate::storage::{AccountRegistry, Credential};
use crate::template::ValidationError;

pub use calendar::{
    CreateSubCalendarTool, DeleteSubCalendarTool, GetCalendarListTool, UpdateSubCalendarTool,
};
pub use message::{SendMessageToMe, SendTemplateToMe};

pub const ACCOUNT_ARG: &str = "__email_address__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: EmbeddedResource,
    },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn json(value: &impl Serialize) -> Result<Self, ToolError> {
        Ok(Self::Text {
            text: serde_json::to_string(value)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn success(content: Vec<ContentItem>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(message)],
            is_error: true,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("unknown tool: {name}; available: {available}")]
    UnknownTool { name: String, available: String },
    #[error("missing required parameter: __email_address__")]
    MissingAccount,
    #[error("account {0} is not listed in the accounts file")]
    UnknownAccount(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{}", describe_auth_failure(.0))]
    Auth(#[from] AuthError),
    #[error("authorization failed: {0}")]
    Authorization(#[from] CallbackError),
    #[error("template validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("failed to encode tool output: {0}")]
    Encode(#[from] serde_json::Error),
}

fn describe_auth_failure(err: &AuthError) -> String {
    match err.authorization_url() {
        Some(url) => format!("{}. Please log in again using this URL: {}", err, url),
        None => err.to_string(),
    }
}

/// Everything a tool needs to act for the resolved account.
pub struct ToolContext<'a> {
    pub account: &'a str,
    pub credential: &'a Credential,
    pub api: &'a KakaoApi,
}

pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Schema and description; account choices are embedded so the caller
    /// knows which `__email_address__` values are accepted.
    fn describe(&self, accounts: &AccountRegistry) -> ToolDescription;

    /// Run with the account argument already removed from `args`.
    fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &Map<String, Value>,
    ) -> Result<Vec<ContentItem>, ToolError>;
}

/// JSON schema for the account argument.
pub(crate) fn account_arg_schema(accounts: &AccountRegistry) -> Value {
    json!({
        "type": "string",
        "description": format!(
            "The EMAIL of the kakao account for which you are executing this action. Can be one of: {}",
            accounts.descriptions().join(", ")
        ),
    })
}

/// Object schema with the account argument added to `properties` and `required`.
pub(crate) fn input_schema(
    accounts: &AccountRegistry,
    mut properties: Map<String, Value>,
    required: &[&str],
) -> Value {
    properties.insert(ACCOUNT_ARG.to_string(), account_arg_schema(accounts));
    let mut required: Vec<&str> = required.to_vec();
    required.push(ACCOUNT_ARG);
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Immutable name-to-tool lookup table, built once at startup.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Self {
        Self {
            tools: tools
                .into_iter()
                .map(|tool| (tool.name().to_string(), tool))
                .collect(),
        }
    }

    /// All message and calendar tools.
    pub fn standard() -> Self {
        let mut tools: Vec<Box<dyn Tool>> = vec![Box::new(SendMessageToMe)];
        tools.extend(
            SendTemplateToMe::all()
                .into_iter()
                .map(|tool| Box::new(tool) as Box<dyn Tool>),
        );
        tools.push(Box::new(GetCalendarListTool));
        tools.push(Box::new(CreateSubCalendarTool));
        tools.push(Box::new(UpdateSubCalendarTool));
        tools.push(Box::new(DeleteSubCalendarTool));
        Self::new(tools)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn describe_all(&self, accounts: &AccountRegistry) -> Vec<ToolDescription> {
        self.tools.values().map(|tool| tool.describe(accounts)).collect()
    }
}

/// What to do when an account has no usable credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingCredentialPolicy {
    /// Return the authorization URL in the error result.
    ReportUrl,
    /// Run the local authorization flow, then load credentials again.
    Interactive { launch_browser: bool },
}

pub struct Dispatcher<'a> {
    registry: &'a ToolRegistry,
    accounts: &'a AccountRegistry,
    flow: &'a OAuthFlow,
    api: &'a KakaoApi,
    policy: MissingCredentialPolicy,
    announce: Option<Box<dyn Fn(&str) + 'a>>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        registry: &'a ToolRegistry,
        accounts: &'a AccountRegistry,
        flow: &'a OAuthFlow,
        api: &'a KakaoApi,
        policy: MissingCredentialPolicy,
    ) -> Self {
        Self {
            registry,
            accounts,
            flow,
            api,
            policy,
            announce: None,
        }
    }

    /// Hand interactive authorization URLs to `announce` instead of the
    /// terminal and browser.
    #[cfg(test)]
    fn with_announcer(mut self, announce: impl Fn(&str) + 'a) -> Self {
        self.announce = Some(Box::new(announce));
        self
    }

    pub fn list_tools(&self) -> Vec<ToolDescription> {
        self.registry.describe_all(self.accounts)
    }

    /// Run a tool. Failures are returned as `is_error` results, never raised.
    pub fn dispatch(&self, name: &str, args: &Value) -> CallToolResult {
        match self.try_dispatch(name, args) {
            Ok(content) => CallToolResult::success(content),
            Err(e) => {
                warn!(tool = %name, error = %e, "tool call failed");
                CallToolResult::error(e.to_string())
            }
        }
    }

    fn try_dispatch(&self, name: &str, args: &Value) -> Result<Vec<ContentItem>, ToolError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
                available: self.registry.names().collect::<Vec<_>>().join(", "),
            })?;

        let mut args = match args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => {
                return Err(ToolError::InvalidArguments(
                    "arguments must be a JSON object".into(),
                ))
            }
        };

        let account = match args.remove(ACCOUNT_ARG) {
            Some(Value::String(account)) if !account.is_empty() => account,
            _ => return Err(ToolError::MissingAccount),
        };
        if !self.accounts.contains(&account) {
            return Err(ToolError::UnknownAccount(account));
        }

        let credential = self.credentials(&account)?;
        info!(tool = %name, %account, "running tool");
        let ctx = ToolContext {
            account: &account,
            credential: &credential,
            api: self.api,
        };
        tool.execute(&ctx, &args)
    }

    fn credentials(&self, account: &str) -> Result<Credential, ToolError> {
        match self.flow.ensure_credentials(account) {
            Ok(credential) => Ok(credential),
            Err(e) => match self.policy {
                MissingCredentialPolicy::Interactive { launch_browser }
                    if e.authorization_url().is_some() =>
                {
                    info!(%account, reason = %e, "starting interactive authorization");
                    match &self.announce {
                        Some(announce) => authorize_with(self.flow, |url| announce(url))?,
                        None => authorize_interactively(self.flow, launch_browser)?,
                    };
                    Ok(self.flow.ensure_credentials(account)?)
                }
                _ => Err(e.into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::oauth::tests::{credential, test_config};
    use crate::provider::message::MEMO_SEND_PATH;
    use crate::storage::{Account, CredentialStore};
    use mockito::{Matcher, Server, ServerGuard};
    use std::collections::HashMap;
    use std::net::TcpListener;
    use std::thread;
    use tempfile::TempDir;
    use url::Url;

    struct Fixture {
        server: ServerGuard,
        tmp: TempDir,
        registry: ToolRegistry,
        accounts: AccountRegistry,
        flow: OAuthFlow,
        api: KakaoApi,
    }

    impl Fixture {
        fn new() -> Self {
            let server = Server::new();
            let tmp = TempDir::new().unwrap();
            let flow = OAuthFlow::new(test_config(&server.url()), CredentialStore::new(tmp.path()));
            let api = KakaoApi::new(server.url());
            let accounts = AccountRegistry::new(vec![
                Account {
                    email: "me@example.com".into(),
                    account_type: "personal".into(),
                    extra_info: "main account".into(),
                },
                Account {
                    email: "new@example.com".into(),
                    account_type: "personal".into(),
                    extra_info: String::new(),
                },
            ]);
            Self {
                server,
                tmp,
                registry: ToolRegistry::standard(),
                accounts,
                flow,
                api,
            }
        }

        fn authorize(&self, account: &str) {
            let mut cred = credential(account, 3600, Some("refresh"));
            cred.access_token = "live-token".into();
            self.flow.store().save(&cred, account).unwrap();
        }

        fn dispatcher(&self) -> Dispatcher<'_> {
            Dispatcher::new(
                &self.registry,
                &self.accounts,
                &self.flow,
                &self.api,
                MissingCredentialPolicy::ReportUrl,
            )
        }
    }

    fn error_text(result: &CallToolResult) -> &str {
        assert!(result.is_error, "expected an error result, got {result:?}");
        match &result.content[0] {
            ContentItem::Text { text } => text,
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn standard_registry_lists_every_tool() {
        let registry = ToolRegistry::standard();
        let names: Vec<&str> = registry.names().collect();
        for expected in [
            "send_message_to_me",
            "send_text_template_to_me",
            "send_feed_template_to_me",
            "send_list_template_to_me",
            "send_location_template_to_me",
            "send_calendar_template_to_me",
            "send_commerce_template_to_me",
            "get_calendar_list",
            "create_sub_calendar",
            "update_sub_calendar",
            "delete_sub_calendar",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        assert_eq!(names.len(), 11);
    }

    #[test]
    fn descriptions_require_and_describe_the_account() {
        let fixture = Fixture::new();
        for description in fixture.dispatcher().list_tools() {
            let schema = &description.input_schema;
            assert!(schema["required"]
                .as_array()
                .unwrap()
                .contains(&json!(ACCOUNT_ARG)));
            let account_help = schema["properties"][ACCOUNT_ARG]["description"].as_str().unwrap();
            assert!(account_help.contains("Account for email: me@example.com of type: personal"));
        }
    }

    #[test]
    fn unknown_tool_is_an_error_result() {
        let fixture = Fixture::new();
        let result = fixture.dispatcher().dispatch("send_sticker", &json!({ACCOUNT_ARG: "me@example.com"}));
        assert!(error_text(&result).contains("unknown tool: send_sticker"));
    }

    #[test]
    fn missing_account_argument_is_an_error_result() {
        let fixture = Fixture::new();
        let result = fixture.dispatcher().dispatch("get_calendar_list", &json!({}));
        assert!(error_text(&result).contains(ACCOUNT_ARG));
    }

    #[test]
    fn unlisted_account_is_an_error_result() {
        let fixture = Fixture::new();
        let result = fixture
            .dispatcher()
            .dispatch("get_calendar_list", &json!({ACCOUNT_ARG: "stranger@example.com"}));
        assert!(error_text(&result).contains("stranger@example.com"));
    }

    #[test]
    fn missing_credentials_report_authorization_url() {
        let fixture = Fixture::new();
        let result = fixture
            .dispatcher()
            .dispatch("get_calendar_list", &json!({ACCOUNT_ARG: "new@example.com"}));
        let text = error_text(&result);
        assert!(text.contains("new@example.com"));
        assert!(text.contains("/oauth/authorize?"));
        assert!(text.contains("client_id=client-123"));
    }

    #[test]
    fn sends_memo_with_stored_credentials() {
        let mut fixture = Fixture::new();
        fixture.authorize("me@example.com");
        let mock = fixture
            .server
            .mock("POST", MEMO_SEND_PATH)
            .match_header("authorization", "Bearer live-token")
            .with_status(200)
            .with_body(r#"{"result_code":0}"#)
            .create();

        let result = fixture.dispatcher().dispatch(
            "send_text_template_to_me",
            &json!({ACCOUNT_ARG: "me@example.com", "template_object": {"text": "hi", "link": {}}}),
        );
        assert!(!result.is_error, "{result:?}");
        assert_eq!(result.content, vec![ContentItem::text(r#"{"result_code":0}"#)]);
        mock.assert();
    }

    #[test]
    fn validation_failure_never_reaches_the_api() {
        let mut fixture = Fixture::new();
        fixture.authorize("me@example.com");
        let mock = fixture.server.mock("POST", MEMO_SEND_PATH).expect(0).create();

        let result = fixture.dispatcher().dispatch(
            "send_message_to_me",
            &json!({ACCOUNT_ARG: "me@example.com", "template_object": {"object_type": "list", "header_title": "h", "contents": []}}),
        );
        assert!(error_text(&result).contains("contents cannot be empty"));
        mock.assert();
    }

    #[test]
    fn transport_failure_includes_status_and_body() {
        let mut fixture = Fixture::new();
        fixture.authorize("me@example.com");
        fixture
            .server
            .mock("GET", "/v2/api/calendar/calendars")
            .with_status(500)
            .with_body("internal trouble")
            .create();

        let result = fixture
            .dispatcher()
            .dispatch("get_calendar_list", &json!({ACCOUNT_ARG: "me@example.com"}));
        let text = error_text(&result);
        assert!(text.contains("500"));
        assert!(text.contains("internal trouble"));
    }

    #[test]
    fn interactive_policy_authorizes_then_runs_the_tool() {
        let mut fixture = Fixture::new();
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let mut config = test_config(&fixture.server.url());
        config.redirect_uri = Url::parse(&format!("http://127.0.0.1:{port}/code")).unwrap();
        fixture.flow = OAuthFlow::new(config, CredentialStore::new(fixture.tmp.path()));

        let exchange = fixture
            .server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::UrlEncoded("code".into(), "granted-code".into()))
            .with_status(200)
            .with_body(r#"{"access_token":"fresh-access","refresh_token":"rt","expires_in":3600}"#)
            .expect(1)
            .create();
        fixture
            .server
            .mock("GET", "/v2/user/me")
            .with_status(200)
            .with_body(r#"{"kakao_account":{"email":"new@example.com"}}"#)
            .create();
        let calendars = fixture
            .server
            .mock("GET", "/v2/api/calendar/calendars")
            .match_header("authorization", "Bearer fresh-access")
            .with_status(200)
            .with_body(r#"{"calendars":[]}"#)
            .create();

        let dispatcher = Dispatcher::new(
            &fixture.registry,
            &fixture.accounts,
            &fixture.flow,
            &fixture.api,
            MissingCredentialPolicy::Interactive { launch_browser: false },
        )
        .with_announcer(|url: &str| {
            let params: HashMap<String, String> =
                Url::parse(url).unwrap().query_pairs().into_owned().collect();
            let redirect = format!(
                "{}?code=granted-code&state={}",
                params["redirect_uri"], params["state"]
            );
            thread::spawn(move || reqwest::blocking::get(redirect).unwrap());
        });

        let result = dispatcher.dispatch("get_calendar_list", &json!({ACCOUNT_ARG: "new@example.com"}));
        assert!(!result.is_error, "{result:?}");
        assert_eq!(result.content, vec![ContentItem::text(r#"{"calendars":[]}"#)]);
        exchange.assert();
        calendars.assert();

        let stored = fixture.flow.store().load("new@example.com").unwrap().unwrap();
        assert_eq!(stored.access_token, "fresh-access");
    }

    #[test]
    fn interactive_policy_reports_denied_authorization() {
        let mut fixture = Fixture::new();
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let mut config = test_config(&fixture.server.url());
        config.redirect_uri = Url::parse(&format!("http://127.0.0.1:{port}/code")).unwrap();
        fixture.flow = OAuthFlow::new(config, CredentialStore::new(fixture.tmp.path()));
        let exchange = fixture.server.mock("POST", "/oauth/token").expect(0).create();

        let dispatcher = Dispatcher::new(
            &fixture.registry,
            &fixture.accounts,
            &fixture.flow,
            &fixture.api,
            MissingCredentialPolicy::Interactive { launch_browser: false },
        )
        .with_announcer(|url: &str| {
            let params: HashMap<String, String> =
                Url::parse(url).unwrap().query_pairs().into_owned().collect();
            let redirect = format!("{}?error=access_denied&error_description=cancelled", params["redirect_uri"]);
            thread::spawn(move || reqwest::blocking::get(redirect).unwrap());
        });

        let result = dispatcher.dispatch("get_calendar_list", &json!({ACCOUNT_ARG: "new@example.com"}));
        assert!(error_text(&result).contains("access_denied"));
        exchange.assert();
    }

    #[test]
    fn content_items_use_wire_field_names() {
        let items = vec![
            ContentItem::text("hi"),
            ContentItem::Image {
                data: "aGk=".into(),
                mime_type: "image/png".into(),
            },
            ContentItem::Resource {
                resource: EmbeddedResource {
                    uri: "kakao://calendar/primary".into(),
                    mime_type: Some("application/json".into()),
                    text: Some("{}".into()),
                },
            },
        ];
        assert_eq!(
            serde_json::to_value(CallToolResult::success(items)).unwrap(),
            json!({
                "content": [
                    {"type": "text", "text": "hi"},
                    {"type": "image", "data": "aGk=", "mimeType": "image/png"},
                    {"type": "resource", "resource": {"uri": "kakao://calendar/primary", "mimeType": "application/json", "text": "{}"}},
                ],
                "isError": false,
            })
        );
    }
}

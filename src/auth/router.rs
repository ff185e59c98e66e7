//! Browser-facing authorization endpoints for hosted deployments:
//! `GET /authorize?state=` and `GET /callback?code=&state=&error=&error_description=`.

use std::collections::HashMap;

use serde_json::{json, Value};
use tiny_http::{Header, Method, Response, Server};
use tracing::{error, info, warn};
use url::Url;

use super::callback::{authorization_from_query, CallbackError};
use super::oauth::OAuthFlow;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteResponse {
    pub status: u16,
    pub body: Value,
}

impl RouteResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn bad_request(body: Value) -> Self {
        Self { status: 400, body }
    }
}

/// Route one GET request (path plus query) to its handler.
pub fn route(flow: &OAuthFlow, path_and_query: &str) -> RouteResponse {
    let Ok(url) = Url::parse(&format!("http://localhost{}", path_and_query)) else {
        return RouteResponse::bad_request(json!({"error": "malformed request"}));
    };
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    match url.path() {
        "/authorize" => authorize(flow, params.get("state").map(String::as_str)),
        "/callback" => callback(flow, &params),
        _ => RouteResponse {
            status: 404,
            body: json!({"error": "not found"}),
        },
    }
}

fn authorize(flow: &OAuthFlow, state: Option<&str>) -> RouteResponse {
    let url = flow.authorization_url(state);
    info!(%url, "redirecting to Kakao authorization");
    RouteResponse::ok(json!({ "url": url }))
}

fn callback(flow: &OAuthFlow, params: &HashMap<String, String>) -> RouteResponse {
    let authorization = authorization_from_query(params);
    let state = authorization.state.as_deref();

    if let Some(err) = &authorization.error {
        let description = authorization.error_description.as_deref().unwrap_or_default();
        error!(error = %err, %description, "authorization failed");
        return RouteResponse::bad_request(json!({
            "error": err,
            "error_description": description,
            "authorization_url": flow.authorization_url(state),
        }));
    }

    let Some(code) = authorization.code.as_deref() else {
        error!("no authorization code provided");
        return RouteResponse::bad_request(json!({"error": "no authorization code provided"}));
    };

    match flow.get_credentials(code, state) {
        Ok(credential) => RouteResponse::ok(json!({
            "account_id": credential.account_id,
            "expires_at": credential.expires_at.to_rfc3339(),
        })),
        Err(e) => {
            error!(error = %e, "failed to process login");
            RouteResponse::bad_request(json!({
                "error": e.to_string(),
                "authorization_url": e.authorization_url(),
            }))
        }
    }
}

/// Serve the authorization endpoints until the process is stopped.
pub fn serve(flow: &OAuthFlow, addr: &str) -> Result<(), CallbackError> {
    let server = Server::http(addr).map_err(|e| CallbackError::Bind {
        addr: addr.to_string(),
        message: e.to_string(),
    })?;
    info!(%addr, "authorization endpoints listening");

    for request in server.incoming_requests() {
        let routed = if *request.method() == Method::Get {
            route(flow, request.url())
        } else {
            RouteResponse {
                status: 405,
                body: json!({"error": "method not allowed"}),
            }
        };

        let mut response =
            Response::from_string(routed.body.to_string()).with_status_code(routed.status);
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
            response.add_header(header);
        }
        if let Err(e) = request.respond(response) {
            warn!(error = %e, "failed to write response");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::oauth::tests::test_config;
    use crate::storage::CredentialStore;
    use mockito::Server as MockServer;
    use tempfile::TempDir;

    #[test]
    fn authorize_returns_url_with_state_and_redirect() {
        let flow = OAuthFlow::new(test_config("https://kauth.example"), CredentialStore::new("/unused"));
        let resp = route(&flow, "/authorize?state=xyz");
        assert_eq!(resp.status, 200);

        let url = Url::parse(resp.body["url"].as_str().unwrap()).unwrap();
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["state"], "xyz");
        assert_eq!(pairs["redirect_uri"], "http://localhost:8000/code");
    }

    #[test]
    fn callback_without_code_is_bad_request() {
        let flow = OAuthFlow::new(test_config("https://kauth.example"), CredentialStore::new("/unused"));
        let resp = route(&flow, "/callback?state=abc");
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["error"], "no authorization code provided");
    }

    #[test]
    fn callback_with_provider_error_offers_restart_url() {
        let flow = OAuthFlow::new(test_config("https://kauth.example"), CredentialStore::new("/unused"));
        let resp = route(&flow, "/callback?error=access_denied&error_description=nope&state=s");
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["error"], "access_denied");
        assert!(resp.body["authorization_url"].as_str().unwrap().contains("state=s"));
    }

    #[test]
    fn callback_exchanges_code_and_reports_account() {
        let mut server = MockServer::new();
        let tmp = TempDir::new().unwrap();
        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token":"at","refresh_token":"rt","expires_in":3600}"#)
            .create();
        server
            .mock("GET", "/v2/user/me")
            .with_status(200)
            .with_body(r#"{"kakao_account":{"email":"me@example.com"}}"#)
            .create();

        let flow = OAuthFlow::new(test_config(&server.url()), CredentialStore::new(tmp.path()));
        let resp = route(&flow, "/callback?code=abc&state=s");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["account_id"], "me@example.com");
    }

    #[test]
    fn unknown_path_is_not_found() {
        let flow = OAuthFlow::new(test_config("https://kauth.example"), CredentialStore::new("/unused"));
        assert_eq!(route(&flow, "/nope").status, 404);
    }
}

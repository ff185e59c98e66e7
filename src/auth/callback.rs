use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::mpsc;

use rand::Rng;
use tiny_http::{Header, Request, Response, Server};
use tracing::{info, warn};
use url::Url;

use super::error::AuthError;
use super::oauth::OAuthFlow;
use crate::storage::{AuthorizationState, Credential};

const SUCCESS_PAGE: &str = "<html><body><h1>Auth successful!</h1><p>You can close the tab and return to your terminal.</p></body></html>";

#[derive(thiserror::Error, Debug)]
pub enum CallbackError {
    #[error("failed to start local callback server on {addr}: {message}")]
    Bind { addr: String, message: String },
    #[error("redirect uri {0} has no host")]
    NoHost(String),
    #[error("authorization denied: {error} - {description}")]
    Denied { error: String, description: String },
    #[error("OAuth state mismatch")]
    StateMismatch,
    #[error("callback server stopped before an authorization code arrived")]
    Closed,
    #[error(transparent)]
    Auth(#[from] AuthError),
}

type Outcome = Result<AuthorizationState, CallbackError>;

/// Short-lived local listener that captures one redirected authorization code.
pub struct CallbackReceiver {
    server: Server,
    path: String,
}

impl CallbackReceiver {
    /// Listen on the host and port of the configured redirect URI.
    pub fn bind(redirect_uri: &Url) -> Result<Self, CallbackError> {
        let host = match redirect_uri.host_str() {
            Some("localhost") => "127.0.0.1",
            Some(host) => host,
            None => return Err(CallbackError::NoHost(redirect_uri.to_string())),
        };
        let port = redirect_uri.port_or_known_default().unwrap_or(80);
        Self::bind_addr(&format!("{}:{}", host, port), redirect_uri.path())
    }

    pub fn bind_addr(addr: &str, path: &str) -> Result<Self, CallbackError> {
        let server = Server::http(addr).map_err(|e| CallbackError::Bind {
            addr: addr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            server,
            path: path.to_string(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serve requests until one carries a code (or an error). The handler
    /// writes its response first, then hands the outcome over the channel;
    /// the loop picks it up and returns, which drops the server.
    pub fn wait_for_code(&self, expected_state: Option<&str>) -> Outcome {
        let (tx, rx) = mpsc::channel();
        for request in self.server.incoming_requests() {
            handle_request(request, &self.path, expected_state, &tx);
            if let Ok(outcome) = rx.try_recv() {
                return outcome.and_then(into_granted);
            }
        }
        Err(CallbackError::Closed)
    }
}

/// Redirect query parameters as an [`AuthorizationState`].
pub(crate) fn authorization_from_query(params: &HashMap<String, String>) -> AuthorizationState {
    AuthorizationState {
        code: params.get("code").cloned(),
        state: params.get("state").cloned(),
        error: params.get("error").cloned(),
        error_description: params.get("error_description").cloned(),
    }
}

fn into_granted(authorization: AuthorizationState) -> Outcome {
    match authorization.error {
        Some(error) => Err(CallbackError::Denied {
            error,
            description: authorization.error_description.unwrap_or_default(),
        }),
        None => Ok(authorization),
    }
}

fn respond(request: Request, status: u16, body: &str, html: bool) {
    let mut response = Response::from_string(body).with_status_code(status);
    if html {
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]) {
            response.add_header(header);
        }
    }
    if let Err(e) = request.respond(response) {
        warn!(error = %e, "failed to write callback response");
    }
}

fn handle_request(
    request: Request,
    path: &str,
    expected_state: Option<&str>,
    tx: &mpsc::Sender<Outcome>,
) {
    let Ok(url) = Url::parse(&format!("http://localhost{}", request.url())) else {
        respond(request, 400, "Bad request", false);
        return;
    };
    if url.path() != path {
        respond(request, 404, "Not found", false);
        return;
    }

    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let authorization = authorization_from_query(&params);

    if let Some(error) = &authorization.error {
        let description = authorization.error_description.as_deref().unwrap_or_default();
        respond(
            request,
            400,
            &format!("Authorization failed: {} - {}", error, description),
            false,
        );
        let _ = tx.send(Ok(authorization));
        return;
    }

    if authorization.code.is_none() {
        respond(request, 400, "Missing authorization code", false);
        return;
    }

    if let Some(expected) = expected_state {
        if authorization.state.as_deref() != Some(expected) {
            respond(request, 400, "State mismatch! Please try again.", false);
            let _ = tx.send(Err(CallbackError::StateMismatch));
            return;
        }
    }

    respond(request, 200, SUCCESS_PAGE, true);
    let _ = tx.send(Ok(authorization));
}

pub fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Full interactive authorization: print and open the provider URL, wait for
/// the redirect on the local receiver, then exchange and store credentials.
pub fn authorize_interactively(
    flow: &OAuthFlow,
    launch_browser: bool,
) -> Result<Credential, CallbackError> {
    authorize_with(flow, |url| announce(url, launch_browser))
}

/// [`authorize_interactively`] with the authorization URL handed to
/// `announce`. The receiver is already listening when `announce` runs.
pub fn authorize_with(
    flow: &OAuthFlow,
    announce: impl FnOnce(&str),
) -> Result<Credential, CallbackError> {
    let receiver = CallbackReceiver::bind(&flow.config().redirect_uri)?;
    let state = random_state();
    announce(&flow.authorization_url(Some(&state)));

    info!(addr = ?receiver.local_addr(), "waiting for authorization");
    let authorization = receiver.wait_for_code(Some(&state))?;
    drop(receiver);

    let code = authorization.code.unwrap_or_default();
    let credential = flow.get_credentials(&code, authorization.state.as_deref())?;
    info!(account = %credential.account_id, "authorization complete");
    Ok(credential)
}

fn announce(url: &str, launch_browser: bool) {
    eprintln!("Opening browser for Kakao authentication...");
    eprintln!("If browser doesn't open, visit:\n{}", url);
    if launch_browser {
        if let Err(e) = open_browser(url) {
            warn!(error = %e, "could not open browser");
        }
    }
}

fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    std::process::Command::new("open").arg(url).spawn()?;

    #[cfg(target_os = "linux")]
    std::process::Command::new("xdg-open").arg(url).spawn()?;

    #[cfg(target_os = "windows")]
    std::process::Command::new("cmd")
        .args(["/C", "start", url])
        .spawn()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn spawn_receiver(
        expected_state: Option<&'static str>,
    ) -> (SocketAddr, thread::JoinHandle<Outcome>) {
        let receiver = CallbackReceiver::bind_addr("127.0.0.1:0", "/code").unwrap();
        let addr = receiver.local_addr().unwrap();
        let handle = thread::spawn(move || receiver.wait_for_code(expected_state));
        (addr, handle)
    }

    #[test]
    fn captures_code_after_rejecting_bad_requests() {
        let (addr, handle) = spawn_receiver(Some("s1"));
        let client = reqwest::blocking::Client::new();

        let other = client.get(format!("http://{addr}/other")).send().unwrap();
        assert_eq!(other.status().as_u16(), 404);

        let no_code = client.get(format!("http://{addr}/code")).send().unwrap();
        assert_eq!(no_code.status().as_u16(), 400);

        let ok = client
            .get(format!("http://{addr}/code?code=abc&state=s1"))
            .send()
            .unwrap();
        assert_eq!(ok.status().as_u16(), 200);
        assert!(ok.text().unwrap().contains("Auth successful"));

        let state = handle.join().unwrap().unwrap();
        assert_eq!(state.code.as_deref(), Some("abc"));
        assert_eq!(state.state.as_deref(), Some("s1"));
    }

    #[test]
    fn provider_error_ends_the_wait() {
        let (addr, handle) = spawn_receiver(None);
        let resp = reqwest::blocking::get(format!(
            "http://{addr}/code?error=access_denied&error_description=user%20cancelled"
        ))
        .unwrap();
        assert_eq!(resp.status().as_u16(), 400);

        match handle.join().unwrap() {
            Err(CallbackError::Denied { error, description }) => {
                assert_eq!(error, "access_denied");
                assert_eq!(description, "user cancelled");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn mismatched_state_is_rejected() {
        let (addr, handle) = spawn_receiver(Some("expected"));
        let resp = reqwest::blocking::get(format!("http://{addr}/code?code=abc&state=forged")).unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        assert!(matches!(handle.join().unwrap(), Err(CallbackError::StateMismatch)));
    }

    #[test]
    fn bind_uses_redirect_uri_host_and_path() {
        let receiver = CallbackReceiver::bind(&Url::parse("http://localhost:0/code").unwrap()).unwrap();
        assert_eq!(receiver.path, "/code");
        assert!(receiver.local_addr().unwrap().ip().is_loopback());
    }

    #[test]
    fn query_parameters_fill_authorization_state() {
        let params: HashMap<String, String> = [
            ("error".to_string(), "access_denied".to_string()),
            ("state".to_string(), "s1".to_string()),
        ]
        .into_iter()
        .collect();
        let authorization = authorization_from_query(&params);
        assert_eq!(authorization.code, None);
        assert_eq!(authorization.error.as_deref(), Some("access_denied"));
        assert!(matches!(
            into_granted(authorization),
            Err(CallbackError::Denied { ref description, .. }) if description.is_empty()
        ));
    }

    #[test]
    fn random_state_is_alphanumeric() {
        let state = random_state();
        assert_eq!(state.len(), 32);
        assert!(state.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}

use std::io;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::Value;

use super::serve::StdioServer;
use crate::auth::{authorize_interactively, router, OAuthFlow};
use crate::config::{Overrides, Settings};
use crate::provider::KakaoApi;
use crate::storage::{AccountRegistry, CredentialState, CredentialStore};
use crate::tools::{Dispatcher, MissingCredentialPolicy, ToolRegistry};

/// Resolved settings plus the long-lived services built from them.
pub struct App {
    settings: Settings,
    flow: OAuthFlow,
    api: KakaoApi,
    registry: ToolRegistry,
}

impl App {
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let settings = Settings::load(overrides).context("Failed to load configuration")?;
        let store = CredentialStore::new(&settings.credentials_dir);
        let api = KakaoApi::new(&settings.oauth.api_base);
        let flow = OAuthFlow::new(settings.oauth.clone(), store);
        Ok(Self {
            settings,
            flow,
            api,
            registry: ToolRegistry::standard(),
        })
    }

    fn accounts(&self) -> Result<AccountRegistry> {
        AccountRegistry::load(&self.settings.accounts_file).with_context(|| {
            format!(
                "Failed to load accounts from {}",
                self.settings.accounts_file.display()
            )
        })
    }
}

pub fn cmd_auth(app: &App, account: Option<&str>, no_browser: bool) -> Result<()> {
    if let Some(account) = account {
        let accounts = app.accounts()?;
        if !accounts.contains(account) {
            bail!(
                "Account '{}' is not listed in {}",
                account,
                app.settings.accounts_file.display()
            );
        }
    }

    let credential = authorize_interactively(&app.flow, !no_browser)?;

    if let Some(expected) = account {
        if credential.account_id != expected {
            eprintln!(
                "Warning: signed in as {} but {} was requested. Credentials were stored for {}.",
                credential.account_id, expected, credential.account_id
            );
        }
    }
    eprintln!(
        "Authorized {} (access token expires {})",
        credential.account_id,
        credential.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

pub fn cmd_status(app: &App) -> Result<()> {
    let accounts = app.accounts()?;
    let store = app.flow.store();
    let now = Utc::now();

    println!("credentials: {}", store.dir().display());
    for account in accounts.accounts() {
        let status = match store.load(&account.email)? {
            None => "no credentials".to_string(),
            Some(cred) => match cred.state_at(now) {
                CredentialState::Valid => format!(
                    "valid until {}",
                    cred.expires_at.format("%Y-%m-%d %H:%M UTC")
                ),
                CredentialState::Expired => "expired (will refresh on next use)".to_string(),
                CredentialState::Terminal => "expired, re-authorization required".to_string(),
            },
        };
        println!("  {} ({}) -- {}", account.email, account.account_type, status);
    }
    Ok(())
}

pub fn cmd_tools(app: &App) -> Result<()> {
    let accounts = app.accounts()?;
    let descriptions = app.registry.describe_all(&accounts);
    println!("{}", serde_json::to_string_pretty(&descriptions)?);
    Ok(())
}

pub fn cmd_call(app: &App, tool: &str, args: &str) -> Result<()> {
    let accounts = app.accounts()?;
    let args: Value = serde_json::from_str(args).context("--args must be a JSON object")?;
    let dispatcher = Dispatcher::new(
        &app.registry,
        &accounts,
        &app.flow,
        &app.api,
        MissingCredentialPolicy::ReportUrl,
    );

    let result = dispatcher.dispatch(tool, &args);
    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.is_error {
        bail!("Tool '{}' reported an error", tool);
    }
    Ok(())
}

pub fn cmd_serve(app: &App, no_browser: bool) -> Result<()> {
    let accounts = app.accounts()?;
    let policy = if no_browser {
        MissingCredentialPolicy::ReportUrl
    } else {
        MissingCredentialPolicy::Interactive {
            launch_browser: true,
        }
    };
    let dispatcher = Dispatcher::new(&app.registry, &accounts, &app.flow, &app.api, policy);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let result = StdioServer::new(dispatcher)
        .run(stdin.lock(), stdout.lock())
        .context("stdio server failed");
    result
}

pub fn cmd_web(app: &App, bind: &str) -> Result<()> {
    eprintln!("Serving /authorize and /callback on http://{}", bind);
    router::serve(&app.flow, bind)?;
    Ok(())
}

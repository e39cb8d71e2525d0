//! Command parsing and execution.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::watch;
use tracing::warn;

use seclearn_core::{AuthError, Config, SessionSync, SyncState};

/// How long to wait for the backend to settle the session.
const SETTLE_TIMEOUT_SECS: u64 = 30;

/// Environment variable consulted before prompting for a password.
const ENV_PASSWORD: &str = "SECLEARN_PASSWORD";

pub const USAGE: &str = "\
Usage: seclearn <command>

Commands:
  status                        Show the current session and profile
  login [email]                 Sign in with email and password
  signup <email> [--name NAME]  Create an account
  logout                        Sign out
  oauth <provider>              Print the URL that starts an OAuth sign-in
  watch                         Print every session change until Ctrl+C
  help                          Show this message

Environment:
  SECLEARN_BACKEND_URL, SECLEARN_BACKEND_KEY  Backend location and public key
  SECLEARN_SITE_URL                           Base URL for OAuth redirects
  SECLEARN_PASSWORD                           Password for login/signup
  RUST_LOG                                    Log filter (default: warn)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Login { email: Option<String> },
    Signup { email: String, name: Option<String> },
    Logout,
    OAuth { provider: String },
    Watch,
    Help,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut args = args.iter().map(String::as_str);
        let command = match args.next() {
            None | Some("status") => Command::Status,
            Some("help") | Some("--help") | Some("-h") => Command::Help,
            Some("login") => Command::Login {
                email: args.next().map(str::to_string),
            },
            Some("signup") => {
                let email = args
                    .next()
                    .context("signup needs an email address")?
                    .to_string();
                let name = match args.next() {
                    Some("--name") => Some(args.next().context("--name needs a value")?.to_string()),
                    Some(other) => anyhow::bail!("Unexpected argument: {}", other),
                    None => None,
                };
                Command::Signup { email, name }
            }
            Some("logout") => Command::Logout,
            Some("oauth") => Command::OAuth {
                provider: args.next().context("oauth needs a provider name")?.to_string(),
            },
            Some("watch") => Command::Watch,
            Some(other) => anyhow::bail!("Unknown command: {}", other),
        };

        if let Some(extra) = args.next() {
            anyhow::bail!("Unexpected argument: {}", extra);
        }
        Ok(command)
    }
}

/// Printable view of the state, without tokens.
fn summarize(state: &SyncState) -> serde_json::Value {
    let user = state.session.as_ref().and_then(|s| s.user.as_ref());
    json!({
        "signed_in": state.is_signed_in(),
        "user_id": state.user_id(),
        "email": user.and_then(|u| u.email.as_deref()),
        "display_name": state.profile.as_ref().map(|p| p.display_name()),
        "profile": state.profile,
        "session_loading": state.session_loading,
        "profile_loading": state.profile_loading,
    })
}

fn print_state(state: &SyncState) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&summarize(state))?);
    Ok(())
}

async fn wait_until<F>(rx: &mut watch::Receiver<SyncState>, predicate: F) -> Result<SyncState>
where
    F: FnMut(&SyncState) -> bool,
{
    let state = tokio::time::timeout(Duration::from_secs(SETTLE_TIMEOUT_SECS), rx.wait_for(predicate))
        .await
        .context("Timed out waiting for the session to settle")?
        .context("Session sync stopped")?
        .clone();
    Ok(state)
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn password() -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        return Ok(password);
    }
    Ok(rpassword::prompt_password("Password: ")?)
}

fn action_failed(e: AuthError) -> anyhow::Error {
    anyhow::anyhow!(e.user_message())
}

fn remember_email(config: &mut Config, email: &str) {
    config.last_email = Some(email.to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

pub async fn run(command: Command, sync: &SessionSync, config: &mut Config) -> Result<()> {
    let mut rx = sync.subscribe();
    wait_until(&mut rx, SyncState::is_settled).await?;

    match command {
        Command::Status | Command::Help => print_state(&sync.state()),

        Command::Login { email } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password = password()?;

            sync.sign_in(&email, &password).await.map_err(action_failed)?;
            remember_email(config, &email);

            let state = wait_until(&mut rx, |s| s.is_signed_in() && s.is_settled()).await?;
            print_state(&state)
        }

        Command::Signup { email, name } => {
            let password = password()?;
            let attributes = match name {
                Some(name) => json!({ "name": name }),
                None => json!({}),
            };

            let response = sync
                .sign_up(&email, &password, attributes)
                .await
                .map_err(action_failed)?;
            remember_email(config, &email);

            if response.session.is_none() {
                println!("Account created. Check {} for a confirmation link.", email);
                return Ok(());
            }
            let state = wait_until(&mut rx, |s| s.is_signed_in() && s.is_settled()).await?;
            print_state(&state)
        }

        Command::Logout => {
            sync.sign_out().await.map_err(action_failed)?;
            let state = wait_until(&mut rx, |s| !s.is_signed_in()).await?;
            print_state(&state)
        }

        Command::OAuth { provider } => {
            let redirect = sync
                .sign_in_with_oauth(&provider)
                .await
                .map_err(action_failed)?;
            println!("{}", redirect.url);
            Ok(())
        }

        Command::Watch => {
            print_state(&rx.borrow_and_update())?;
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                        let state = rx.borrow_and_update().clone();
                        println!("{}", serde_json::to_string(&summarize(&state))?);
                    }
                    _ = tokio::signal::ctrl_c() => return Ok(()),
                }
            }
        }
    }
}

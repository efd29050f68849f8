//! Application wiring: pipeline, account store and the command loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parcel_fetch::HttpFetcher;
use parcel_pipeline::{ChannelSink, Credentials, Dispatcher, Request, RequestOutcome};
use parcel_storage::{HttpStorageProvider, StorageProvider};
use parcel_volume::sanitize_file_name;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::accounts::{AccountError, AccountStore};
use crate::commands::{self, Command, HELP};
use crate::config::Config;

/// Runs the agent until input ends or an interrupt arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let accounts = AccountStore::open(config.accounts_path.clone())?;
    let fetcher = Arc::new(HttpFetcher::new()?);
    let storage: Arc<dyn StorageProvider> = Arc::new(HttpStorageProvider::new(config.storage.clone())?);
    let (sink, outcomes) = ChannelSink::new();
    let dispatcher = Dispatcher::new(
        config.pipeline.clone(),
        fetcher,
        Arc::clone(&storage),
        Arc::new(sink),
    );

    let writer = tokio::spawn(write_outcomes(outcomes, config.output_dir.clone()));
    let agent = Agent {
        config,
        accounts,
        storage,
        dispatcher: dispatcher.clone(),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, canceling requests");
                dispatcher.cancel_all();
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Some(reply) = agent.handle_line(&line) {
                        println!("{reply}");
                    }
                }
                None => {
                    info!("input closed, waiting for pending requests");
                    break;
                }
            },
        }
    }

    dispatcher.wait_idle().await;
    drop(agent);
    drop(dispatcher);
    writer.await?;
    Ok(())
}

/// Command handling for one agent instance.
pub struct Agent {
    config: Config,
    accounts: AccountStore,
    storage: Arc<dyn StorageProvider>,
    dispatcher: Dispatcher,
}

impl Agent {
    /// Handles one input line, returning the reply to print.
    pub fn handle_line(&self, line: &str) -> Option<String> {
        match commands::parse(line) {
            Ok(Some(line)) => Some(format!(
                "{}: {}",
                line.identity,
                self.handle(&line.identity, line.command)
            )),
            Ok(None) => None,
            Err(e) => Some(e.to_string()),
        }
    }

    fn handle(&self, identity: &str, command: Command) -> String {
        match command {
            Command::Help => HELP.to_string(),
            Command::Status => self.dispatcher.status(identity).to_string(),
            Command::Cancel => self.dispatcher.cancel(identity).to_string(),
            Command::Get(url) => self.get(identity, url),
            Command::Register { phone, password } => {
                match self.accounts.register(identity, &phone, &password) {
                    Ok(()) => {
                        info!(identity, "account registered");
                        "Account registered.".into()
                    }
                    Err(AccountError::AlreadyRegistered) => {
                        "You are already registered, unregister first.".into()
                    }
                    Err(e) => self.internal_error(identity, e),
                }
            }
            Command::Unregister => {
                if self.dispatcher.is_pending(identity) {
                    return "You have a pending request, wait for it to finish.".into();
                }
                match self.accounts.remove(identity) {
                    Ok(()) => {
                        info!(identity, "account removed");
                        "Account removed.".into()
                    }
                    Err(AccountError::NotRegistered) => "You are not registered.".into(),
                    Err(e) => self.internal_error(identity, e),
                }
            }
            Command::Password => match self.accounts.get(identity) {
                Some(credentials) => credentials.password,
                None => "You are not registered.".into(),
            },
            Command::Token => self.token(identity),
        }
    }

    /// Logs in on a separate task; the token is printed when it arrives.
    fn token(&self, identity: &str) -> String {
        let Some(credentials) = self.accounts.get(identity) else {
            return "You are not registered.".into();
        };
        let storage = Arc::clone(&self.storage);
        let identity = identity.to_string();
        tokio::spawn(async move {
            let reply = request_token(storage.as_ref(), &credentials).await;
            println!("{identity}: {reply}");
        });
        "Requesting a token, please wait.".into()
    }

    fn get(&self, identity: &str, url: Option<String>) -> String {
        let Some(credentials) = self.accounts.get(identity) else {
            return "You are not registered.".into();
        };
        let Some(url) = url else {
            return "You did not give a URL, for example: get https://fsf.org".into();
        };

        let request = Request {
            identity: identity.to_string(),
            url,
            credentials,
            privileged: self.config.is_admin(identity),
        };
        match self.dispatcher.submit(request) {
            Ok(()) => "Your request was queued, please wait.".into(),
            Err(rejection) => format!("{}.", capitalize(&rejection.to_string())),
        }
    }

    fn internal_error(&self, identity: &str, e: AccountError) -> String {
        error!(identity, error = %e, "account store failure");
        "Something went wrong, try again later.".into()
    }
}

async fn request_token(storage: &dyn StorageProvider, credentials: &Credentials) -> String {
    let client = storage.client();
    match client.login(&credentials.phone, &credentials.password).await {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "token request failed");
            format!("Could not get a token: {e}")
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Prints each outcome and stores successful manifests under `output_dir`.
async fn write_outcomes(mut outcomes: mpsc::UnboundedReceiver<RequestOutcome>, output_dir: PathBuf) {
    while let Some(outcome) = outcomes.recv().await {
        let Ok(delivery) = &outcome.result else {
            println!("{}: {}", outcome.identity, outcome.message());
            continue;
        };

        let path = manifest_path(&output_dir, &outcome.identity, &delivery.attachment_name());
        match save_manifest(&path, &delivery.manifest.to_text()).await {
            Ok(()) => {
                info!(identity = %outcome.identity, path = %path.display(), "manifest written");
                println!("{}: {} -> {}", outcome.identity, outcome.message(), path.display());
            }
            Err(e) => {
                warn!(identity = %outcome.identity, error = %e, "failed to write manifest");
                println!("{}: {}\n{}", outcome.identity, outcome.message(), delivery.manifest.to_text());
            }
        }
    }
}

fn manifest_path(output_dir: &Path, identity: &str, attachment: &str) -> PathBuf {
    output_dir
        .join(sanitize_file_name(identity))
        .join(sanitize_file_name(attachment))
}

async fn save_manifest(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, text).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_pipeline::{CancelOutcome, PipelineConfig};
    use parcel_storage::HttpStorageConfig;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn agent(tmp: &Path) -> Agent {
        agent_with_storage(tmp, HttpStorageConfig::default())
    }

    fn agent_with_storage(tmp: &Path, storage: HttpStorageConfig) -> Agent {
        let config = Config {
            accounts_path: tmp.join("accounts.json"),
            output_dir: tmp.join("out"),
            admins: vec!["root".into()],
            storage,
            pipeline: PipelineConfig {
                scratch_dir: Some(tmp.join("scratch")),
                ..PipelineConfig::default()
            },
        };
        let (sink, _outcomes) = ChannelSink::new();
        let storage: Arc<dyn StorageProvider> =
            Arc::new(HttpStorageProvider::new(config.storage.clone()).unwrap());
        let dispatcher = Dispatcher::new(
            config.pipeline.clone(),
            Arc::new(HttpFetcher::new().unwrap()),
            Arc::clone(&storage),
            Arc::new(sink),
        );
        Agent {
            accounts: AccountStore::open(config.accounts_path.clone()).unwrap(),
            config,
            storage,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn get_requires_registration_and_url() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = agent(tmp.path());

        assert_eq!(
            agent.handle_line("a get https://fsf.org").unwrap(),
            "a: You are not registered."
        );
        agent.handle_line("a register 5355555 secret");
        assert!(agent.handle_line("a get").unwrap().contains("did not give a URL"));
    }

    #[tokio::test]
    async fn register_and_unregister() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = agent(tmp.path());

        assert_eq!(
            agent.handle_line("a register 5355555 secret").unwrap(),
            "a: Account registered."
        );
        assert!(agent.handle_line("a register 1 2").unwrap().contains("already registered"));
        assert_eq!(agent.handle_line("a unregister").unwrap(), "a: Account removed.");
        assert_eq!(
            agent.handle_line("a unregister").unwrap(),
            "a: You are not registered."
        );
    }

    #[tokio::test]
    async fn password_requires_registration() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = agent(tmp.path());

        assert_eq!(
            agent.handle_line("a password").unwrap(),
            "a: You are not registered."
        );
        agent.handle_line("a register 5355555 secret");
        assert_eq!(agent.handle_line("a password").unwrap(), "a: secret");
    }

    #[tokio::test]
    async fn token_requires_registration() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = agent(tmp.path());

        assert_eq!(
            agent.handle_line("a token").unwrap(),
            "a: You are not registered."
        );
        agent.handle_line("a register 5355555 secret");
        assert!(agent.handle_line("a token").unwrap().contains("Requesting a token"));
    }

    #[tokio::test]
    async fn token_comes_from_storage_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .and(body_json(serde_json::json!({"phone": "5355555", "password": "secret"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token":"tok-1"}"#))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let agent = agent_with_storage(
            tmp.path(),
            HttpStorageConfig {
                auth_url: format!("{}/auth/token", server.uri()),
                ..HttpStorageConfig::default()
            },
        );
        agent.handle_line("a register 5355555 secret");
        let credentials = agent.accounts.get("a").unwrap();

        assert_eq!(request_token(agent.storage.as_ref(), &credentials).await, "tok-1");
    }

    #[tokio::test]
    async fn token_login_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let agent = agent_with_storage(
            tmp.path(),
            HttpStorageConfig {
                auth_url: format!("{}/auth/token", server.uri()),
                ..HttpStorageConfig::default()
            },
        );
        let credentials = Credentials {
            phone: "5355555".into(),
            password: "wrong".into(),
        };

        let reply = request_token(agent.storage.as_ref(), &credentials).await;
        assert!(reply.starts_with("Could not get a token"));
    }

    #[tokio::test]
    async fn idle_status_and_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = agent(tmp.path());

        assert!(agent.handle_line("a status").unwrap().contains("no pending request"));
        assert_eq!(
            agent.handle_line("a cancel").unwrap(),
            format!("a: {}", CancelOutcome::NothingToCancel)
        );
        assert!(agent.handle_line("a dance").unwrap().contains("unknown command"));
        assert_eq!(agent.handle_line(""), None);
    }

    #[tokio::test]
    async fn pending_request_blocks_unregister_and_resubmit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let agent = agent(tmp.path());
        agent.handle_line("a register 5355555 secret");

        let get = format!("a get {}/file.bin", server.uri());
        assert!(agent.handle_line(&get).unwrap().contains("queued"));
        assert!(agent.handle_line(&get).unwrap().contains("already have a pending request"));
        assert!(agent.handle_line("a unregister").unwrap().contains("pending request"));

        agent.dispatcher.cancel_all();
        agent.dispatcher.wait_idle().await;
        assert_eq!(agent.handle_line("a unregister").unwrap(), "a: Account removed.");
    }

    #[test]
    fn manifest_path_is_per_identity() {
        let path = manifest_path(Path::new("/out"), "a/b@example.org", "video.mp4.txt");
        assert_eq!(path, PathBuf::from("/out/a_b@example.org/video.mp4.txt"));
    }

    #[tokio::test]
    async fn manifest_is_written() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a").join("f.txt");
        save_manifest(&path, "https://s/1\tf.prcl.001").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "https://s/1\tf.prcl.001");
    }
}

//! Per-user lifecycle controller.
//!
//! A [`UserSession`] wraps one persisted user and drives its spawner through
//! `Idle -> SpawnPending -> WaitingForResponse -> Running` and back through
//! `StopPending -> Idle`. Every failure in the start or readiness phase runs
//! the stop cleanup before the original error is returned, so a failed spawn
//! leaves neither a server record nor a token behind.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::models::server::Server;
use crate::models::user::UserRecord;
use crate::persistence::db::Database;
use crate::persistence::server_repo::ServerRepo;
use crate::persistence::token_repo::TokenRepo;
use crate::persistence::user_repo::{StopRecord, UserRepo};
use crate::spawner::{PollStatus, Spawner, SpawnerBinding};
use crate::urls::{default_server_name, escape_name, url_path_join};
use crate::version::{self, HUB_VERSION, VERSION_HEADER};
use crate::{AppError, FailureReason, Result};

use super::{split_host, HubSettings};

/// Caller-supplied options for [`UserSession::spawn`].
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Requested named-server slot. Ignored unless named servers are allowed.
    pub server_name: Option<String>,
    /// Free-form options forwarded to the spawner.
    pub user_options: Map<String, Value>,
}

impl SpawnOptions {
    /// Options requesting a specific named server.
    #[must_use]
    pub fn named(server_name: impl Into<String>) -> Self {
        Self {
            server_name: Some(server_name.into()),
            user_options: Map::new(),
        }
    }
}

/// Runtime controller for one user's single-user server.
pub struct UserSession {
    user: UserRecord,
    db: Arc<Database>,
    settings: HubSettings,
    spawner: Box<dyn Spawner>,
    servers: Vec<Server>,
    base_url: String,
    allow_named_servers: bool,
    spawn_pending: bool,
    stop_pending: bool,
    waiting_for_response: bool,
}

impl UserSession {
    /// Wrap `user`, building and configuring its spawner and loading any
    /// server records left by a previous hub process.
    ///
    /// # Errors
    ///
    /// Returns an error if the spawner cannot be built or the server records
    /// cannot be read.
    pub async fn new(user: UserRecord, db: Arc<Database>, settings: HubSettings) -> Result<Self> {
        let mut spawner = settings.spawner_factory.build(&user)?;
        spawner.configure(&SpawnerBinding {
            user_id: user.id,
            user_name: user.name.clone(),
            hub: settings.hub.clone(),
            authenticator: settings.authenticator.clone(),
            config: settings.spawner_config.clone(),
        });
        if user.state.as_object().is_some_and(|state| !state.is_empty()) {
            spawner.load_state(&user.state);
        }

        let servers = ServerRepo::new(Arc::clone(&db))
            .list_for_user(user.id)
            .await?;
        let base_url =
            url_path_join(&[&settings.base_url, "user", &escape_name(&user.name)]) + "/";
        let allow_named_servers = settings.allow_named_servers;

        Ok(Self {
            user,
            db,
            settings,
            spawner,
            servers,
            base_url,
            allow_named_servers,
            spawn_pending: false,
            stop_pending: false,
            waiting_for_response: false,
        })
    }

    /// Persistent user id.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.user.id
    }

    /// User name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.user.name
    }

    /// Whether the user is a hub admin.
    #[must_use]
    pub fn admin(&self) -> bool {
        self.user.admin
    }

    /// Last start or stop of this user's server.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.user.last_activity
    }

    /// Backend resume state as last persisted.
    #[must_use]
    pub fn state(&self) -> &Value {
        &self.user.state
    }

    /// The wrapped user record.
    #[must_use]
    pub fn record(&self) -> &UserRecord {
        &self.user
    }

    /// User name escaped for URLs, cookies and client ids.
    #[must_use]
    pub fn escaped_name(&self) -> String {
        escape_name(&self.user.name)
    }

    /// Routing path, `{base_url}user/{escaped_name}/`.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Server records currently held by this session.
    #[must_use]
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// The first server record, if any.
    #[must_use]
    pub fn server(&self) -> Option<&Server> {
        self.servers.first()
    }

    /// The session's spawner.
    #[must_use]
    pub fn spawner(&self) -> &dyn Spawner {
        self.spawner.as_ref()
    }

    /// The session's spawner, mutably.
    pub fn spawner_mut(&mut self) -> &mut dyn Spawner {
        self.spawner.as_mut()
    }

    /// Whether named servers are enabled for this session.
    #[must_use]
    pub fn allow_named_servers(&self) -> bool {
        self.allow_named_servers
    }

    /// Between server-record creation and a successful `start()`.
    #[must_use]
    pub fn spawn_pending(&self) -> bool {
        self.spawn_pending
    }

    /// While a stop is in progress.
    #[must_use]
    pub fn stop_pending(&self) -> bool {
        self.stop_pending
    }

    /// While waiting for the started server to answer HTTP.
    #[must_use]
    pub fn waiting_for_response(&self) -> bool {
        self.waiting_for_response
    }

    /// A server exists and no transition is in progress.
    #[must_use]
    pub fn running(&self) -> bool {
        !(self.spawn_pending || self.stop_pending || self.waiting_for_response)
            && !self.servers.is_empty()
    }

    /// `{escaped_name}.{domain}` when subdomain routing is configured.
    #[must_use]
    pub fn domain(&self) -> Option<String> {
        self.settings
            .domain()
            .map(|domain| format!("{}.{domain}", self.escaped_name()))
    }

    /// `{scheme}://{escaped_name}.{domain}` when subdomain routing is configured.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        let (scheme, netloc) = split_host(self.settings.subdomain_host.as_deref()?)?;
        Some(format!("{scheme}://{}.{netloc}", self.escaped_name()))
    }

    /// External URL: domain-qualified under subdomain routing, otherwise the
    /// bare routing path.
    #[must_use]
    pub fn url(&self) -> String {
        match self.host() {
            Some(host) => format!("{host}{}", self.base_url),
            None => self.base_url.clone(),
        }
    }

    /// Route registered with the proxy.
    #[must_use]
    pub fn proxy_spec(&self) -> String {
        match self.domain() {
            Some(domain) => format!("{domain}{}", self.base_url),
            None => self.base_url.clone(),
        }
    }

    fn servers_repo(&self) -> ServerRepo {
        ServerRepo::new(Arc::clone(&self.db))
    }

    fn tokens_repo(&self) -> TokenRepo {
        TokenRepo::new(Arc::clone(&self.db))
    }

    fn users_repo(&self) -> UserRepo {
        UserRepo::new(Arc::clone(&self.db))
    }

    /// Name and base path for the next server.
    fn next_server_slot(&self, requested: Option<String>) -> (String, String) {
        if !self.allow_named_servers {
            return (String::new(), self.base_url.clone());
        }
        let name = requested.unwrap_or_else(|| {
            default_server_name(self.servers.iter().map(|s| s.name.as_str()))
        });
        let base_url = url_path_join(&[&self.base_url, &name]) + "/";
        (name, base_url)
    }

    fn oauth_client_id(&self, server_name: &str) -> String {
        if server_name.is_empty() {
            format!("user-{}", self.escaped_name())
        } else {
            format!("user-{}-{server_name}", self.escaped_name())
        }
    }

    /// Start the user's server and wait until it answers HTTP.
    ///
    /// The caller must make sure no spawn is already pending or running.
    ///
    /// # Errors
    ///
    /// Start and readiness failures come back as [`AppError::Spawn`] tagged
    /// with a [`FailureReason`], after the stop cleanup has run. Pre-spawn
    /// hook and storage failures are returned as they are.
    pub async fn spawn(&mut self, options: SpawnOptions) -> Result<&Self> {
        let span = info_span!("spawn", user = %self.user.name);
        self.spawn_inner(options).instrument(span).await?;
        Ok(&*self)
    }

    async fn spawn_inner(&mut self, options: SpawnOptions) -> Result<()> {
        let (server_name, base_url) = self.next_server_slot(options.server_name);
        let server = self
            .servers_repo()
            .create(&Server::new(self.user.id, server_name.as_str(), base_url))
            .await?;
        self.servers.push(server.clone());
        self.spawn_pending = true;
        debug!(server = %server_name, base_url = %server.base_url, "server record reserved");

        let api_token = match self.prepare_spawner(server, options.user_options).await {
            Ok(token) => token,
            Err(err) => {
                self.abort_spawn().await;
                return Err(err);
            }
        };

        let start_timeout = self.spawner.options().start_timeout;
        let started = match tokio::time::timeout(start_timeout, self.spawner.start()).await {
            Ok(Ok(address)) => address,
            Ok(Err(err)) => {
                error!(user = %self.user.name, %err, "unhandled error starting server");
                return Err(self.fail_spawn(FailureReason::Error, err).await);
            }
            Err(_) => {
                warn!(
                    user = %self.user.name,
                    seconds = start_timeout.as_secs_f64(),
                    "server failed to start in time, giving up"
                );
                let err = AppError::Timeout(format!(
                    "server failed to start in {} seconds",
                    start_timeout.as_secs_f64()
                ));
                return Err(self.fail_spawn(FailureReason::Timeout, err).await);
            }
        };

        if let Err(err) = self.record_start(started, &api_token).await {
            error!(user = %self.user.name, %err, "unhandled error recording server start");
            return Err(self.fail_spawn(FailureReason::Error, err).await);
        }

        self.spawner.start_polling();
        let state = self.spawner.get_state();
        let now = Utc::now();
        if let Err(err) = self
            .users_repo()
            .update_runtime(self.user.id, &state, now)
            .await
        {
            error!(user = %self.user.name, %err, "unhandled error saving spawner state");
            return Err(self.fail_spawn(FailureReason::Error, err).await);
        }
        self.user.state = state;
        self.user.last_activity = now;
        self.spawn_pending = false;

        let Some(server) = self.servers.last().cloned() else {
            let err = AppError::NotFound("server record vanished during spawn".into());
            return Err(self.fail_spawn(FailureReason::Error, err).await);
        };
        self.waiting_for_response = true;
        let http_timeout = self.spawner.options().http_timeout;
        let outcome = server.wait_up(http_timeout, true).await;
        self.waiting_for_response = false;

        match outcome {
            Ok(response) => {
                let reported = response
                    .as_ref()
                    .and_then(|resp| resp.headers().get(VERSION_HEADER))
                    .and_then(|value| value.to_str().ok());
                version::check_version(HUB_VERSION, reported);
                info!(user = %self.user.name, url = %server.url(), "server is ready");
                Ok(())
            }
            Err(err) if err.is_timeout() => {
                warn!(
                    user = %self.user.name,
                    url = %server.url(),
                    seconds = http_timeout.as_secs_f64(),
                    "server never showed up, giving up"
                );
                Err(self.fail_spawn(FailureReason::Timeout, err).await)
            }
            Err(err) => {
                error!(
                    user = %self.user.name,
                    url = %server.url(),
                    %err,
                    "unhandled error waiting for server to show up"
                );
                Err(self.fail_spawn(FailureReason::Error, err).await)
            }
        }
    }

    /// Issue the token, hand the spawner its per-launch fields, register the
    /// OAuth client and run the pre-spawn hook. Returns the issued token.
    async fn prepare_spawner(
        &mut self,
        server: Server,
        user_options: Map<String, Value>,
    ) -> Result<String> {
        let api_token = self
            .tokens_repo()
            .issue(self.user.id, &server.name)
            .await?;
        let client_id = self.oauth_client_id(&server.name);
        let admin_access = self.settings.admin_access;

        self.spawner.clear_state();
        let opts = self.spawner.options_mut();
        opts.api_token.clone_from(&api_token);
        opts.server_name.clone_from(&server.name);
        opts.user_options = user_options;
        opts.admin_access = admin_access;
        opts.oauth_client_id.clone_from(&client_id);
        opts.server = Some(server);

        if let Some(store) = self.settings.oauth_store.clone() {
            let existing = match store.fetch_by_client_id(&client_id).await {
                Ok(client) => Some(client),
                Err(AppError::NotFound(_)) => None,
                Err(err) => return Err(err),
            };
            if existing.is_none() || !self.spawner.will_resume() {
                let redirect_uri = url_path_join(&[&self.url(), "oauth_callback"]);
                store
                    .add_client(&client_id, &api_token, &redirect_uri)
                    .await?;
            } else {
                debug!(client_id = %client_id, "reusing oauth client for resumed server");
            }
        }

        if let Some(authenticator) = self.settings.authenticator.clone() {
            let session: &Self = self;
            authenticator
                .pre_spawn_start(session, session.spawner.as_ref())
                .await
                .map_err(|err| match err {
                    AppError::Hook(_) => err,
                    other => AppError::Hook(format!("pre_spawn_start failed: {other}")),
                })?;
        }

        Ok(api_token)
    }

    /// Store the address `start()` reported and discard the issued token if
    /// the spawner kept its own.
    async fn record_start(&mut self, started: Option<(String, u16)>, api_token: &str) -> Result<()> {
        let servers = self.servers_repo();
        let tokens = self.tokens_repo();
        let Some(server) = self.servers.last_mut() else {
            return Err(AppError::NotFound("server record vanished during spawn".into()));
        };
        let server_id = server.id;

        if let Some((ip, port)) = started {
            server.ip = ip;
            server.port = port;
            servers.update_address(server_id, &server.ip, port).await?;
        } else {
            warn!(
                user = %self.user.name,
                "DEPRECATION: Spawner::start should return (ip, port); using the stored address"
            );
            *server = servers.get(server_id).await?;
        }
        if let Some(opts_server) = self.spawner.options_mut().server.as_mut() {
            opts_server.clone_from(server);
        }

        if self.spawner.options().api_token != api_token {
            debug!(user = %self.user.name, "spawner reused an api token, discarding the new one");
            tokens.delete(api_token).await?;
        }
        Ok(())
    }

    async fn fail_spawn(&mut self, reason: FailureReason, source: AppError) -> AppError {
        self.abort_spawn().await;
        AppError::Spawn {
            reason,
            source: Box::new(source),
        }
    }

    /// Cleanup after a failed spawn; errors are only logged.
    ///
    /// When the stop sequence fails the server and token records are still
    /// released, so the session always ends up idle.
    async fn abort_spawn(&mut self) {
        let api_token = self.spawner.options().api_token.clone();
        let Err(err) = self.stop().await else {
            return;
        };
        error!(
            user = %self.user.name,
            %err,
            "failed to clean up server that failed to start"
        );
        if self.servers.is_empty() {
            return;
        }
        if let Err(err) = self.release_server(&api_token).await {
            error!(
                user = %self.user.name,
                %err,
                "failed to remove records of server that failed to start"
            );
            self.forget_server();
        }
    }

    /// Stop the user's server and clean up its records.
    ///
    /// The post-stop hook runs and `stop_pending` is cleared even when the
    /// stop itself fails.
    ///
    /// # Errors
    ///
    /// Returns backend or storage errors from the stop sequence.
    pub async fn stop(&mut self) -> Result<()> {
        let span = info_span!("stop", user = %self.user.name);
        async move {
            self.spawn_pending = false;
            self.spawner.stop_polling();
            self.stop_pending = true;

            let result = self.stop_inner().await;

            if let Some(authenticator) = self.spawner.options().authenticator.clone() {
                let session: &Self = self;
                if let Err(err) = authenticator
                    .post_spawn_stop(session, session.spawner.as_ref())
                    .await
                {
                    error!(user = %self.user.name, %err, "error in post_spawn_stop hook");
                }
            }
            self.stop_pending = false;
            result
        }
        .instrument(span)
        .await
    }

    async fn stop_inner(&mut self) -> Result<()> {
        let api_token = self.spawner.options().api_token.clone();
        match self.spawner.poll().await? {
            PollStatus::Running => self.spawner.stop(false).await?,
            PollStatus::Exited(code) => {
                debug!(user = %self.user.name, code, "server already exited");
            }
        }

        self.spawner.clear_state();
        self.release_server(&api_token).await?;
        info!(user = %self.user.name, "server stopped");
        Ok(())
    }

    /// Store the spawner state, drop the server records and revoke
    /// `api_token` unless the spawner resumes.
    async fn release_server(&mut self, api_token: &str) -> Result<()> {
        let state = self.spawner.get_state();
        let now = Utc::now();
        let revoke_token = (!self.spawner.will_resume()).then_some(api_token);
        self.users_repo()
            .record_stop(
                self.user.id,
                &StopRecord {
                    state: &state,
                    last_activity: now,
                    revoke_token,
                },
            )
            .await?;

        self.user.state = state;
        self.user.last_activity = now;
        self.forget_server();
        Ok(())
    }

    fn forget_server(&mut self) {
        self.servers.clear();
        self.spawner.options_mut().server = None;
    }
}

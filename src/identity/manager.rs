//! Identity Manager
//!
//! Owns the current identity and its lifecycle: validation, persistence,
//! automatic refresh with tiered retry, and expiration re-evaluation.
//!
//! All state transitions happen on a single owner task. The public
//! [`IdentityManager`] handle only enqueues commands, so operations issued
//! before the persisted identity has been restored are applied, in order,
//! once it has.

use futures::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::{IdentityClient, UID2Client};
use crate::core::{SystemTimeSource, TimeSource};
use crate::error::UID2Result;
use crate::identity::events::{watch_stream, EventBus, IdentityStatusListener};
use crate::identity::storage::IdentityStorage;
use crate::identity::validation::validate;
use crate::resilience::RefreshRetryConfig;
use crate::types::{
    Identity, IdentityConfig, IdentityPackage, IdentityRequest, IdentityStatus, ManagerConfig,
    ManagerState, ResponsePackage,
};

/// Work queued for the owner task.
enum Command {
    SetIdentity(Identity),
    ResetIdentity,
    RefreshIdentity,
    SetAutomaticRefresh(bool),
    SetCheckExpiration(bool),
    Generated {
        response: ResponsePackage,
        done: oneshot::Sender<()>,
    },
    RefreshCompleted {
        epoch: u64,
        response: ResponsePackage,
    },
    ExpirationCheck {
        epoch: u64,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to an identity manager.
///
/// Cloning the handle shares the same manager. The owner task stops once
/// every handle has been dropped.
#[derive(Clone)]
pub struct IdentityManager {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<EventBus>,
    client: Arc<dyn IdentityClient>,
    automatic_refresh: Arc<AtomicBool>,
    check_expiration: Arc<AtomicBool>,
    initialized: watch::Receiver<bool>,
}

impl IdentityManager {
    /// Create a manager talking to the configured environment.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: IdentityConfig, storage: Arc<dyn IdentityStorage>) -> UID2Result<Self> {
        let client = UID2Client::new(config.client)?;
        Ok(Self::with_components(
            config.manager,
            Arc::new(client),
            storage,
            Arc::new(SystemTimeSource),
        ))
    }

    /// Create a manager with custom implementations.
    ///
    /// Starts restoring the persisted identity immediately. Must be called from
    /// within a Tokio runtime.
    pub fn with_components(
        config: ManagerConfig,
        client: Arc<dyn IdentityClient>,
        storage: Arc<dyn IdentityStorage>,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (initialized_tx, initialized) = watch::channel(false);
        let events = Arc::new(EventBus::new());
        let automatic_refresh = Arc::new(AtomicBool::new(config.automatic_refresh_enabled));
        let check_expiration = Arc::new(AtomicBool::new(config.check_expiration));

        let owner = Owner {
            config,
            client: client.clone(),
            storage,
            time_source,
            events: events.clone(),
            commands: commands.downgrade(),
            identity: None,
            status: IdentityStatus::NoIdentity,
            refresh_job: None,
            refresh_epoch: 0,
            expiration_jobs: Vec::new(),
            expiry_epoch: 0,
        };
        tokio::spawn(owner.run(receiver, initialized_tx));

        Self {
            commands,
            events,
            client,
            automatic_refresh,
            check_expiration,
            initialized,
        }
    }

    fn send(&self, command: Command) {
        // The owner only stops once every handle is gone.
        let _ = self.commands.send(command);
    }

    /// Set a new identity, replacing the current one.
    pub fn set_identity(&self, identity: Identity) {
        self.send(Command::SetIdentity(identity));
    }

    /// Clear the current identity and its persisted copy. No-op without one.
    pub fn reset_identity(&self) {
        self.send(Command::ResetIdentity);
    }

    /// Refresh the current identity now. No-op without one.
    pub fn refresh_identity(&self) {
        self.send(Command::RefreshIdentity);
    }

    /// Generate a new identity and make it current.
    ///
    /// The request is normalized before waiting for initialization, so invalid
    /// input fails immediately and the client receives the normalized form.
    /// On failure the current state is left untouched and the error returned.
    pub async fn generate_identity(
        &self,
        request: IdentityRequest,
        subscription_id: &str,
        server_public_key: &str,
    ) -> UID2Result<()> {
        let request = request.normalize()?;
        self.wait_until_initialized().await;

        let response = self
            .client
            .generate_identity(&request, subscription_id, server_public_key)
            .await?;

        let (done, applied) = oneshot::channel();
        self.send(Command::Generated { response, done });
        let _ = applied.await;
        Ok(())
    }

    /// The advertising token, only while the identity is established or refreshed.
    pub fn get_advertising_token(&self) -> Option<String> {
        self.events
            .current()
            .advertising_token()
            .map(str::to_string)
    }

    /// The current identity, if any.
    pub fn current_identity(&self) -> Option<Identity> {
        self.events.current().identity().cloned()
    }

    /// Status of the current identity.
    pub fn current_identity_status(&self) -> IdentityStatus {
        self.events.current().status()
    }

    /// The current published state.
    pub fn state(&self) -> ManagerState {
        self.events.current()
    }

    /// Whether an identity is currently held.
    pub fn has_identity(&self) -> bool {
        self.events.current().identity().is_some()
    }

    /// Whether the persisted identity has been restored.
    pub fn is_initialized(&self) -> bool {
        *self.initialized.borrow()
    }

    /// Wait until the persisted identity has been restored.
    pub async fn wait_until_initialized(&self) {
        let mut initialized = self.initialized.clone();
        let _ = initialized.wait_for(|done| *done).await;
    }

    /// Wait until every previously issued operation has been applied.
    pub async fn flush(&self) {
        let (done, flushed) = oneshot::channel();
        self.send(Command::Flush(done));
        let _ = flushed.await;
    }

    /// Whether the identity is refreshed automatically.
    pub fn automatic_refresh_enabled(&self) -> bool {
        self.automatic_refresh.load(Ordering::SeqCst)
    }

    /// Enable or disable automatic refresh. Disabling cancels any pending refresh.
    pub fn set_automatic_refresh_enabled(&self, enabled: bool) {
        self.automatic_refresh.store(enabled, Ordering::SeqCst);
        self.send(Command::SetAutomaticRefresh(enabled));
    }

    /// Whether expirations are re-evaluated as they pass.
    pub fn check_expiration(&self) -> bool {
        self.check_expiration.load(Ordering::SeqCst)
    }

    /// Enable or disable the expiration checks.
    pub fn set_check_expiration(&self, enabled: bool) {
        self.check_expiration.store(enabled, Ordering::SeqCst);
        self.send(Command::SetCheckExpiration(enabled));
    }

    /// Register a listener for every subsequent state transition.
    pub fn add_listener(&self, listener: impl IdentityStatusListener + 'static) {
        self.events.add_listener(Arc::new(listener));
    }

    /// Receiver holding the latest state.
    pub fn subscribe(&self) -> watch::Receiver<ManagerState> {
        self.events.subscribe()
    }

    /// Stream of states, starting with the current one.
    pub fn state_stream(&self) -> impl Stream<Item = ManagerState> {
        watch_stream(self.events.subscribe())
    }
}

/// Everything a refresh chain needs, detached from the owner.
struct RefreshContext {
    client: Arc<dyn IdentityClient>,
    time_source: Arc<dyn TimeSource>,
    retry: RefreshRetryConfig,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl RefreshContext {
    /// Refresh `identity` until it succeeds, a failure is final, or the
    /// identity can no longer be refreshed.
    async fn run(self, identity: Identity, epoch: u64, delay: Option<Duration>) {
        if let Some(delay) = delay {
            debug!(delay_ms = delay.as_millis() as u64, "Refresh scheduled");
            tokio::time::sleep(delay).await;
        }

        let mut failures: u32 = 0;
        loop {
            info!(attempt = failures + 1, "Refreshing identity");

            let error = match self
                .client
                .refresh_identity(&identity.refresh_token, &identity.refresh_response_key)
                .await
            {
                Ok(response) => {
                    if let Some(commands) = self.commands.upgrade() {
                        let _ = commands.send(Command::RefreshCompleted { epoch, response });
                    }
                    return;
                }
                Err(error) => error,
            };

            if !self.retry.should_retry(&error) {
                error!(error = %error, code = error.error_code(), "Identity refresh failed, not retrying");
                return;
            }

            let delay = self.retry.delay_for(failures);
            failures += 1;
            warn!(
                error = %error,
                code = error.error_code(),
                failures,
                retry_in_ms = delay.as_millis() as u64,
                "Identity refresh failed"
            );
            tokio::time::sleep(delay).await;

            if !validate(Some(&identity), false, self.time_source.now_ms()).valid {
                warn!("Identity can no longer be refreshed, stopping retries");
                return;
            }
        }
    }
}

/// The single writer of manager state.
struct Owner {
    config: ManagerConfig,
    client: Arc<dyn IdentityClient>,
    storage: Arc<dyn IdentityStorage>,
    time_source: Arc<dyn TimeSource>,
    events: Arc<EventBus>,
    commands: mpsc::WeakUnboundedSender<Command>,
    identity: Option<Identity>,
    status: IdentityStatus,
    refresh_job: Option<JoinHandle<()>>,
    refresh_epoch: u64,
    expiration_jobs: Vec<JoinHandle<()>>,
    expiry_epoch: u64,
}

impl Owner {
    async fn run(
        mut self,
        mut receiver: mpsc::UnboundedReceiver<Command>,
        initialized: watch::Sender<bool>,
    ) {
        self.restore().await;
        initialized.send_replace(true);

        while let Some(command) = receiver.recv().await {
            self.handle(command).await;
        }
        debug!("Identity manager stopped");
    }

    async fn restore(&mut self) {
        match self.storage.load().await {
            Ok((identity, status)) => {
                if identity.is_some() {
                    info!(%status, "Restoring previously persisted identity");
                }
                if status == IdentityStatus::OptOut {
                    self.set_state(None, IdentityStatus::OptOut, false).await;
                } else {
                    let package = validate(identity.as_ref(), false, self.now());
                    self.apply(package, false).await;
                }
            }
            Err(error) => {
                warn!(error = %error, "Failed to load persisted identity");
                self.set_state(None, IdentityStatus::NoIdentity, false).await;
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::SetIdentity(identity) => {
                info!("Setting external identity");
                let package = validate(Some(&identity), true, self.now());
                self.apply(package, true).await;
            }
            Command::ResetIdentity => {
                if self.identity.is_none() {
                    return;
                }
                info!("Resetting identity");
                self.set_state(None, IdentityStatus::NoIdentity, true).await;
            }
            Command::RefreshIdentity => {
                if let Some(identity) = self.identity.clone() {
                    info!("Refreshing identity on request");
                    self.start_refresh(identity, None);
                }
            }
            Command::SetAutomaticRefresh(enabled) => {
                self.config.automatic_refresh_enabled = enabled;
                self.schedule_refresh();
            }
            Command::SetCheckExpiration(enabled) => {
                self.config.check_expiration = enabled;
                self.schedule_expiration_checks();
            }
            Command::Generated { response, done } => {
                self.cancel_refresh();
                self.apply_response(response, true).await;
                let _ = done.send(());
            }
            Command::RefreshCompleted { epoch, response } => {
                if epoch != self.refresh_epoch {
                    debug!(epoch, "Discarding superseded refresh result");
                    return;
                }
                self.refresh_job = None;
                info!(status = %response.status, "Identity refresh completed");
                self.apply_response(response, false).await;
            }
            Command::ExpirationCheck { epoch } => {
                if epoch != self.expiry_epoch {
                    return;
                }
                info!("Re-evaluating identity after expiry");
                let package = validate(self.identity.as_ref(), false, self.now());
                self.apply(package, true).await;
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn now(&self) -> i64 {
        self.time_source.now_ms()
    }

    /// Apply a refresh or generate response. Opt-out bypasses validation.
    async fn apply_response(&mut self, response: ResponsePackage, is_new: bool) {
        match (response.status, response.identity) {
            (IdentityStatus::OptOut, _) => {
                info!("User opt-out detected");
                self.set_state(None, IdentityStatus::OptOut, true).await;
            }
            (_, Some(identity)) => {
                let package = validate(Some(&identity), is_new, self.now());
                self.apply(package, true).await;
            }
            (status, None) => {
                self.set_state(None, status, true).await;
            }
        }
    }

    async fn apply(&mut self, package: IdentityPackage, update_storage: bool) {
        debug!(
            valid = package.valid,
            status = %package.status,
            reason = package.message,
            update_storage,
            "Identity validated"
        );
        self.set_state(package.identity, package.status, update_storage)
            .await;
    }

    async fn set_state(
        &mut self,
        identity: Option<Identity>,
        status: IdentityStatus,
        update_storage: bool,
    ) {
        if update_storage {
            self.persist(identity.as_ref(), status).await;
        }

        info!(
            previous = %self.status,
            %status,
            has_identity = identity.is_some(),
            update_storage,
            "Identity status changed"
        );
        self.identity = identity.clone();
        self.status = status;
        self.events.publish(ManagerState::from_parts(identity, status));

        self.schedule_expiration_checks();
        self.schedule_refresh();
    }

    async fn persist(&self, identity: Option<&Identity>, status: IdentityStatus) {
        let result = match identity {
            Some(identity) => self.storage.save(identity, status).await,
            None => self.storage.clear().await.map(|_| ()),
        };

        if let Err(error) = result {
            warn!(error = %error, code = error.error_code(), "Failed to persist identity");
        }
    }

    fn cancel_refresh(&mut self) {
        self.refresh_epoch += 1;
        if let Some(job) = self.refresh_job.take() {
            job.abort();
        }
    }

    /// Replace any refresh chain with one for `identity`.
    fn start_refresh(&mut self, identity: Identity, delay: Option<Duration>) {
        self.cancel_refresh();

        let context = RefreshContext {
            client: self.client.clone(),
            time_source: self.time_source.clone(),
            retry: self.config.retry.clone(),
            commands: self.commands.clone(),
        };
        self.refresh_job = Some(tokio::spawn(context.run(identity, self.refresh_epoch, delay)));
    }

    fn schedule_refresh(&mut self) {
        if !self.config.automatic_refresh_enabled {
            self.cancel_refresh();
            return;
        }

        let Some(identity) = self.identity.clone() else {
            self.cancel_refresh();
            return;
        };

        if self.time_source.has_passed(identity.refresh_from) {
            self.start_refresh(identity, None);
        } else {
            let delay = self.time_source.until(identity.refresh_from);
            self.start_refresh(identity, Some(delay));
        }
    }

    fn cancel_expiration_checks(&mut self) {
        self.expiry_epoch += 1;
        for job in self.expiration_jobs.drain(..) {
            job.abort();
        }
    }

    fn schedule_expiration_checks(&mut self) {
        self.cancel_expiration_checks();

        if !self.config.check_expiration {
            return;
        }
        let Some(identity) = self.identity.as_ref() else {
            return;
        };

        let targets = [identity.refresh_expires, identity.identity_expires];
        for target in targets {
            if self.time_source.has_passed(target) {
                continue;
            }

            let delay = self.time_source.until(target) + self.config.expiration_tolerance;
            let epoch = self.expiry_epoch;
            let commands = self.commands.clone();
            self.expiration_jobs.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.send(Command::ExpirationCheck { epoch });
                }
            }));
        }
    }
}

impl Drop for Owner {
    fn drop(&mut self) {
        if let Some(job) = self.refresh_job.take() {
            job.abort();
        }
        for job in self.expiration_jobs.drain(..) {
            job.abort();
        }
    }
}

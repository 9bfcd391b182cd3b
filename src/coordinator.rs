/// Token refresh coordination between the form, the provider and the UI thread
use crate::callback::BrowserCaptor;
use crate::context::{Completion, Outcome, UiHandle, UiThread};
use crate::error::{FlowError, Result};
use crate::provider::{CodeCaptor, TokenProvider};
use crate::state::{unix_now, CaptureMethod, FlowState, Token};
use crate::view::{Field, FlowView, Notifier};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Notification channel failures are pushed to
    pub channel_id: String,
    /// How long failure notifications stay up
    pub notification_duration: Duration,
    /// How long a browser capture waits for the redirect
    pub capture_timeout: Duration,
    /// Name given to background fetch threads
    pub worker_name: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            channel_id: "dashboard".to_string(),
            notification_duration: Duration::from_secs(10),
            capture_timeout: Duration::from_secs(300),
            worker_name: "codeflow-fetch".to_string(),
        }
    }
}

/// Where a refresh attempt ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to a background worker; the result arrives on a later pump
    Background,
    /// Ran to completion on the UI thread and has already been applied
    Inline,
}

/// Binds one authorization code form to a token provider
///
/// Owns the single [`FlowState`] of the form. All state and widget mutation
/// happens on the UI thread: background fetches send their results through a
/// [`UiHandle`] and they are applied by [`pump`](Self::pump).
///
/// Every `refresh`, `set_state` and `reset` starts a new generation. Results
/// that belong to an older generation are discarded when they arrive, so a
/// fetch that was in flight during a reset never resurrects a token.
pub struct TokenRefreshCoordinator<V: FlowView> {
    view: V,
    provider: Arc<dyn TokenProvider>,
    notifier: Arc<dyn Notifier>,
    embedded: Option<Box<dyn CodeCaptor>>,
    config: CoordinatorConfig,
    state: Option<FlowState>,
    generation: Arc<AtomicU64>,
    handle: UiHandle,
    completions: Receiver<Completion>,
}

impl<V: FlowView> TokenRefreshCoordinator<V> {
    pub fn new(
        _ui: &UiThread,
        view: V,
        provider: Arc<dyn TokenProvider>,
        notifier: Arc<dyn Notifier>,
        config: CoordinatorConfig,
    ) -> Self {
        let (tx, completions) = mpsc::channel();
        let generation = Arc::new(AtomicU64::new(0));
        let handle = UiHandle::new(tx, generation.clone());

        Self {
            view,
            provider,
            notifier,
            embedded: None,
            config,
            state: None,
            generation,
            handle,
            completions,
        }
    }

    /// Attach the embedded web view used for [`CaptureMethod::EmbeddedView`]
    pub fn with_embedded_captor(mut self, captor: Box<dyn CodeCaptor>) -> Self {
        self.embedded = Some(captor);
        self
    }

    /// Called after every completion is queued, from whichever thread queued
    /// it; hosts use it to schedule a [`pump`](Self::pump) on the UI thread
    pub fn with_waker<F>(mut self, waker: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handle.set_waker(Arc::new(waker));
        self
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    /// Held state as last synchronized, without reading the view
    pub fn state(&self) -> Option<&FlowState> {
        self.state.as_ref()
    }

    /// Handle for delivering results from other threads
    pub fn handle(&self) -> UiHandle {
        self.handle.clone()
    }

    fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Button handler: refresh with the capture method selected in the form
    pub fn on_refresh_clicked(&mut self, ui: &UiThread) -> Dispatch {
        let method = self.view.capture_method();
        self.refresh(ui, method)
    }

    /// Fetch a new token
    ///
    /// Browser capture runs on a dedicated background thread and returns at
    /// once; opening a browser never needs the UI thread. Embedded capture
    /// runs here and blocks until the flow ends, since the web view can only
    /// be driven from the UI thread.
    pub fn refresh(&mut self, ui: &UiThread, method: CaptureMethod) -> Dispatch {
        let snapshot = self.sync_from_view(ui).clone();
        let generation = self.advance_generation();
        debug!(generation, ?method, "refreshing authorization code token");

        match method {
            CaptureMethod::Browser => {
                let provider = self.provider.clone();
                let handle = self.handle.clone();
                let timeout = self.config.capture_timeout;

                let spawned = thread::Builder::new()
                    .name(self.config.worker_name.clone())
                    .spawn(move || {
                        let mut captor = BrowserCaptor::new(timeout);
                        let result = provider.fetch(&snapshot, &mut captor);
                        handle.complete(generation, Outcome::Fetched(result));
                    });

                match spawned {
                    Ok(_) => Dispatch::Background,
                    Err(e) => {
                        self.apply(
                            ui,
                            Completion {
                                generation,
                                outcome: Outcome::Fetched(Err(FlowError::WorkerSpawn(e))),
                            },
                        );
                        Dispatch::Inline
                    }
                }
            }
            CaptureMethod::EmbeddedView => {
                let result = match self.embedded.as_mut() {
                    Some(captor) => self.provider.fetch(&snapshot, captor.as_mut()),
                    None => Err(FlowError::CaptureUnavailable(
                        "no embedded view attached".into(),
                    )),
                };
                self.apply(
                    ui,
                    Completion {
                        generation,
                        outcome: Outcome::Fetched(result),
                    },
                );
                Dispatch::Inline
            }
        }
    }

    /// Apply every completion queued so far; returns how many were processed
    pub fn pump(&mut self, ui: &UiThread) -> usize {
        let mut processed = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.apply(ui, completion);
            processed += 1;
        }
        processed
    }

    /// Wait up to `timeout` for a completion, then apply everything queued
    pub fn pump_blocking(&mut self, ui: &UiThread, timeout: Duration) -> usize {
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => {
                self.apply(ui, completion);
                1 + self.pump(ui)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn apply(&mut self, ui: &UiThread, completion: Completion) {
        let current = self.generation.load(Ordering::SeqCst);
        if completion.generation != current {
            debug!(
                generation = completion.generation,
                current, "discarding stale token result"
            );
            return;
        }

        match completion.outcome {
            Outcome::Fetched(Ok(token)) | Outcome::Injected(token) => {
                self.state.get_or_insert_with(FlowState::default).token = Some(token);
                self.on_refresh_succeeded(ui);
            }
            Outcome::Fetched(Err(err)) => self.on_refresh_failed(&err),
        }
    }

    fn on_refresh_succeeded(&mut self, _ui: &UiThread) {
        let Some(token) = self.state.as_ref().and_then(|s| s.token.as_ref()) else {
            return;
        };

        self.view.clear(Field::AccessToken);
        self.view.clear(Field::RefreshToken);
        self.view.set_text(Field::AccessToken, &token.access_token);
        if let Some(refresh_token) = &token.refresh_token {
            self.view.set_text(Field::RefreshToken, refresh_token);
        }

        match token.expires_in(unix_now()) {
            Some(secs) => self.view.show_expiry(Duration::from_secs(secs)),
            None => self.view.hide_expiry(),
        }

        self.view.acknowledge();
    }

    fn on_refresh_failed(&self, err: &FlowError) {
        match err.kind().user_message() {
            Some(message) => {
                self.notifier.push(
                    &self.config.channel_id,
                    message,
                    self.config.notification_duration,
                );
                warn!(error = %err, "{}", message);
            }
            // Already reported by whoever closed the window
            None => warn!(error = %err, "authorization window closed, token not refreshed"),
        }
    }

    /// Current flow state
    ///
    /// The first call on a coordinator with no state creates an empty one
    /// without reading the form. Later calls pull every field from the form
    /// first, including edits to the token fields.
    pub fn get_state(&mut self, ui: &UiThread) -> FlowState {
        match self.state {
            None => self.state.insert(FlowState::default()).clone(),
            Some(_) => self.sync_from_view(ui).clone(),
        }
    }

    /// Replace the held state wholesale and show it in the form
    pub fn set_state(&mut self, ui: &UiThread, state: Option<FlowState>) {
        self.advance_generation();
        self.state = state;
        if self.state.is_some() {
            self.sync_to_view(ui);
        }
    }

    /// Pull the form into the held state, creating it if needed
    pub fn sync_from_view(&mut self, _ui: &UiThread) -> &FlowState {
        let view = &self.view;
        let state = self.state.get_or_insert_with(FlowState::default);

        state.capture_method = view.capture_method();
        state.auth_url = view.text(Field::AuthUrl);
        state.token_url = view.text(Field::TokenUrl);
        state.redirect_url = view.text(Field::RedirectUrl);
        state.client_id = view.text(Field::ClientId);
        state.client_secret = view.text(Field::ClientSecret);
        state.scope = view.text(Field::Scope);
        state.state = view.text(Field::State);
        state.header_prefix = view.text(Field::HeaderPrefix);
        state.enabled = view.is_enabled();
        if let Some(use_pkce) = view.pkce_enabled() {
            state.use_pkce = use_pkce;
        }

        // Token fields are editable in the form
        if let Some(token) = state.token.as_mut() {
            token.access_token = view.text(Field::AccessToken);
            token.refresh_token = Some(view.text(Field::RefreshToken)).filter(|t| !t.is_empty());
        }

        state
    }

    /// Push the held state into the form
    pub fn sync_to_view(&mut self, ui: &UiThread) {
        let Some(state) = self.state.as_ref() else {
            return;
        };

        self.view.set_capture_method(state.capture_method);
        self.view.set_text(Field::AuthUrl, &state.auth_url);
        self.view.set_text(Field::TokenUrl, &state.token_url);
        self.view.set_text(Field::RedirectUrl, &state.redirect_url);
        self.view.set_text(Field::ClientId, &state.client_id);
        self.view.set_text(Field::ClientSecret, &state.client_secret);
        self.view.set_text(Field::Scope, &state.scope);
        self.view.set_text(Field::State, &state.state);
        self.view.set_text(Field::HeaderPrefix, &state.header_prefix);
        self.view.set_enabled(state.enabled);
        self.view.set_pkce_enabled(state.use_pkce);

        if state.token.is_some() {
            self.on_refresh_succeeded(ui);
        } else {
            self.view.clear(Field::AccessToken);
            self.view.clear(Field::RefreshToken);
            self.view.hide_expiry();
        }
    }

    /// Clear the form and discard the held state
    pub fn reset(&mut self, _ui: &UiThread) {
        self.advance_generation();
        for field in Field::ALL {
            self.view.clear(field);
        }
        self.view.hide_expiry();
        self.view.set_enabled(false);
        self.state = None;
    }

    /// Provider handle for the request pipeline
    ///
    /// With embedded capture, an enabled form and no access token, the token
    /// is fetched here first: the web view has to be created on this thread,
    /// and whoever uses the returned handle may be on another one.
    pub fn resolve_auth_provider(&mut self, ui: &UiThread) -> AuthHandle {
        if self.view.text(Field::AccessToken).is_empty()
            && self.view.is_enabled()
            && self.view.capture_method() == CaptureMethod::EmbeddedView
        {
            self.refresh(ui, CaptureMethod::EmbeddedView);
        }

        AuthHandle {
            state: Mutex::new(self.sync_from_view(ui).clone()),
            provider: self.provider.clone(),
            ui: self.handle.clone(),
            generation: self.handle.generation(),
            capture_timeout: self.config.capture_timeout,
        }
    }

    /// Hand a token obtained elsewhere to the coordinator
    ///
    /// Always goes through the completion queue, even on the UI thread; the
    /// form updates on the next pump.
    pub fn set_access_token(&self, token: Token) {
        self.handle.set_access_token(token);
    }
}

/// Thread-safe source of `Authorization` headers for one configured flow
///
/// Tokens it obtains are relayed under the generation the handle was resolved
/// in, so a handle that outlives a `reset` or `set_state` cannot refill the
/// form.
pub struct AuthHandle {
    state: Mutex<FlowState>,
    provider: Arc<dyn TokenProvider>,
    ui: UiHandle,
    generation: u64,
    capture_timeout: Duration,
}

impl AuthHandle {
    /// Snapshot of the flow state this handle works from
    pub fn state(&self) -> FlowState {
        self.state.lock().clone()
    }

    /// `Authorization` header value, or `None` when the flow is disabled
    ///
    /// A missing or expired token is replaced first: through the refresh
    /// token when there is one, otherwise through a browser capture on the
    /// calling thread. New tokens are relayed to the coordinator. Concurrent
    /// callers wait for a single replacement.
    pub fn auth_header(&self) -> Result<Option<String>> {
        let mut state = self.state.lock();
        if !state.enabled {
            return Ok(None);
        }

        let usable = state
            .token
            .as_ref()
            .is_some_and(|t| !t.access_token.is_empty() && !t.is_expired());
        if !usable {
            let token = self.replace_token(&state)?;
            state.token = Some(token.clone());
            self.ui.complete(self.generation, Outcome::Injected(token));
        }

        Ok(state.auth_header())
    }

    fn replace_token(&self, state: &FlowState) -> Result<Token> {
        let refresh_token = state
            .token
            .as_ref()
            .and_then(|t| t.refresh_token.as_deref())
            .filter(|t| !t.is_empty());
        if let Some(refresh_token) = refresh_token {
            return self.provider.refresh(state, refresh_token);
        }

        match state.capture_method {
            CaptureMethod::Browser => {
                let mut captor = BrowserCaptor::new(self.capture_timeout);
                self.provider.fetch(state, &mut captor)
            }
            CaptureMethod::EmbeddedView => Err(FlowError::CaptureUnavailable(
                "embedded view cannot be opened off the UI thread".into(),
            )),
        }
    }
}

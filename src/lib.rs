//! codeflow - OAuth 2.0 Authorization Code coordination for desktop REST clients
//!
//! Binds an authorization code form (URLs, credentials, scope, token fields)
//! to a token provider and keeps the UI thread responsive while the flow
//! runs.
//!
//! # Features
//!
//! - Browser capture on a background worker, embedded web view capture on
//!   the UI thread
//! - Results marshalled back to the UI thread through an explicit completion
//!   queue; stale results from before a reset are dropped
//! - Authorization code and refresh token grants with optional PKCE (RFC 7636)
//! - Pluggable persistence of flow state (memory, JSON files, OS keyring)
//!
//! # Example
//!
//! ```no_run
//! use codeflow::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # struct Form;
//! # impl FlowView for Form {
//! #     fn text(&self, _: Field) -> String { String::new() }
//! #     fn set_text(&mut self, _: Field, _: &str) {}
//! #     fn capture_method(&self) -> CaptureMethod { CaptureMethod::Browser }
//! #     fn set_capture_method(&mut self, _: CaptureMethod) {}
//! #     fn is_enabled(&self) -> bool { true }
//! #     fn set_enabled(&mut self, _: bool) {}
//! #     fn show_expiry(&mut self, _: Duration) {}
//! #     fn hide_expiry(&mut self) {}
//! # }
//! # struct Toasts;
//! # impl Notifier for Toasts {
//! #     fn push(&self, _: &str, _: &str, _: Duration) {}
//! # }
//! let ui = UiThread::declare();
//! let provider = Arc::new(AuthorizationCodeProvider::new().unwrap());
//! let mut coordinator = TokenRefreshCoordinator::new(
//!     &ui,
//!     Form,
//!     provider,
//!     Arc::new(Toasts),
//!     CoordinatorConfig::default(),
//! );
//!
//! // Refresh button
//! coordinator.on_refresh_clicked(&ui);
//!
//! // Later, from the event loop
//! coordinator.pump(&ui);
//! ```

pub mod callback;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod pkce;
pub mod provider;
pub mod state;
pub mod storage;
pub mod view;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::callback::BrowserCaptor;
    pub use crate::context::{UiHandle, UiThread};
    pub use crate::coordinator::{AuthHandle, CoordinatorConfig, Dispatch, TokenRefreshCoordinator};
    pub use crate::error::{ErrorKind, FlowError, Result};
    pub use crate::provider::{AuthorizationCodeProvider, CallbackParams, CodeCaptor, TokenProvider};
    pub use crate::state::{CaptureMethod, FlowState, Token};
    pub use crate::storage::{FileStorage, MemoryStorage, SecureStorage, StateStorage};
    pub use crate::view::{Field, FlowView, Notifier};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use crate::provider::tests::serve_once;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    #[derive(Default)]
    struct Form {
        fields: HashMap<Field, String>,
        method: CaptureMethod,
        enabled: bool,
        expiry: Option<Duration>,
    }

    impl FlowView for Form {
        fn text(&self, field: Field) -> String {
            self.fields.get(&field).cloned().unwrap_or_default()
        }
        fn set_text(&mut self, field: Field, value: &str) {
            self.fields.insert(field, value.to_string());
        }
        fn capture_method(&self) -> CaptureMethod {
            self.method
        }
        fn set_capture_method(&mut self, method: CaptureMethod) {
            self.method = method;
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
        fn set_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
        }
        fn show_expiry(&mut self, remaining: Duration) {
            self.expiry = Some(remaining);
        }
        fn hide_expiry(&mut self) {
            self.expiry = None;
        }
    }

    struct Silent;

    impl Notifier for Silent {
        fn push(&self, _channel_id: &str, message: &str, _duration: Duration) {
            panic!("unexpected notification: {}", message);
        }
    }

    /// Web view stand-in that approves immediately
    struct ApprovingView;

    impl CodeCaptor for ApprovingView {
        fn capture(&mut self, authorization_url: &Url, _redirect_url: &Url) -> Result<CallbackParams> {
            let mut params: CallbackParams = authorization_url
                .query_pairs()
                .into_owned()
                .filter(|(k, _)| k == "state")
                .collect();
            params.insert("code".to_string(), "granted".to_string());
            Ok(params)
        }
    }

    #[test]
    fn test_full_authorization_code_flow() {
        let (token_url, server) = serve_once(
            200,
            r#"{"access_token":"abc","refresh_token":"xyz","token_type":"Bearer","expires_in":3600}"#,
        );

        let ui = UiThread::declare();
        let mut coordinator = TokenRefreshCoordinator::new(
            &ui,
            Form::default(),
            Arc::new(AuthorizationCodeProvider::new().unwrap()),
            Arc::new(Silent),
            CoordinatorConfig::default(),
        )
        .with_embedded_captor(Box::new(ApprovingView));

        let storage = MemoryStorage::new();
        storage
            .save_state(
                "request-1",
                &FlowState {
                    capture_method: CaptureMethod::EmbeddedView,
                    auth_url: "https://auth.example.com/authorize".to_string(),
                    token_url,
                    redirect_url: "http://localhost:52849/callback".to_string(),
                    client_id: "test-client".to_string(),
                    enabled: true,
                    ..FlowState::default()
                },
            )
            .unwrap();

        coordinator.set_state(&ui, storage.load_state("request-1").unwrap());
        let auth = coordinator.resolve_auth_provider(&ui);
        server.join().unwrap();

        assert_eq!(auth.auth_header().unwrap().as_deref(), Some("Bearer abc"));
        assert_eq!(coordinator.view().text(Field::RefreshToken), "xyz");
        assert!(coordinator.view().expiry.is_some());

        storage
            .save_state("request-1", &coordinator.get_state(&ui))
            .unwrap();
        let saved = storage.load_state("request-1").unwrap().unwrap();
        assert_eq!(saved.access_token(), Some("abc"));

        coordinator.reset(&ui);
        assert_eq!(coordinator.get_state(&ui), FlowState::default());
    }
}

/// Widget and notification seams consumed by the coordinator
use crate::state::CaptureMethod;
use std::time::Duration;

/// Text fields of the authorization code form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    AuthUrl,
    TokenUrl,
    RedirectUrl,
    ClientId,
    ClientSecret,
    Scope,
    State,
    HeaderPrefix,
    AccessToken,
    RefreshToken,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::AuthUrl,
        Field::TokenUrl,
        Field::RedirectUrl,
        Field::ClientId,
        Field::ClientSecret,
        Field::Scope,
        Field::State,
        Field::HeaderPrefix,
        Field::AccessToken,
        Field::RefreshToken,
    ];
}

/// Form bindings for one authorization code configuration
///
/// Implemented by the host toolkit. Every method is only ever called on the
/// UI thread.
pub trait FlowView {
    fn text(&self, field: Field) -> String;

    fn set_text(&mut self, field: Field, value: &str);

    fn clear(&mut self, field: Field) {
        self.set_text(field, "");
    }

    fn capture_method(&self) -> CaptureMethod;

    fn set_capture_method(&mut self, method: CaptureMethod);

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// PKCE toggle, `None` when the form has no such control
    fn pkce_enabled(&self) -> Option<bool> {
        None
    }

    fn set_pkce_enabled(&mut self, _enabled: bool) {}

    /// Show the expiry countdown starting at `remaining`
    fn show_expiry(&mut self, remaining: Duration);

    fn hide_expiry(&mut self);

    /// One-shot visual acknowledgment of a new token
    fn acknowledge(&mut self) {}
}

/// Channel for transient user-facing messages
pub trait Notifier: Send + Sync {
    fn push(&self, channel_id: &str, message: &str, duration: Duration);
}

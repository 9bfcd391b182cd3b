/// Execution contexts: the UI thread capability and the completion channel
/// that carries results back to it
use crate::error::Result;
use crate::state::Token;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::debug;

/// Proof that the caller runs on the UI-owning thread
///
/// The host creates one on its UI thread and passes it to every coordinator
/// operation that touches widgets. It is neither `Send` nor `Sync`, so a
/// background worker can never hold one.
#[derive(Debug)]
pub struct UiThread {
    _not_send: PhantomData<*const ()>,
}

impl UiThread {
    /// Declare the current thread as the UI-owning thread
    pub fn declare() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }
}

pub(crate) enum Outcome {
    Fetched(Result<Token>),
    Injected(Token),
}

/// Result of one fetch attempt or injection, tagged with the generation it
/// belongs to
pub(crate) struct Completion {
    pub generation: u64,
    pub outcome: Outcome,
}

pub(crate) type Waker = Arc<dyn Fn() + Send + Sync>;

/// Cloneable, thread-safe handle for marshalling results onto the UI thread
///
/// Nothing sent through a handle touches the view until the coordinator is
/// pumped on the UI thread.
#[derive(Clone)]
pub struct UiHandle {
    tx: Sender<Completion>,
    generation: Arc<AtomicU64>,
    waker: Option<Waker>,
}

impl UiHandle {
    pub(crate) fn new(tx: Sender<Completion>, generation: Arc<AtomicU64>) -> Self {
        Self {
            tx,
            generation,
            waker: None,
        }
    }

    pub(crate) fn set_waker(&mut self, waker: Waker) {
        self.waker = Some(waker);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn complete(&self, generation: u64, outcome: Outcome) {
        if self.tx.send(Completion { generation, outcome }).is_err() {
            debug!(generation, "coordinator gone; dropping completion");
            return;
        }
        if let Some(wake) = &self.waker {
            wake();
        }
    }

    /// Hand a token obtained elsewhere to the coordinator
    ///
    /// Safe from any thread; the token is applied on the next pump.
    pub fn set_access_token(&self, token: Token) {
        self.complete(self.generation(), Outcome::Injected(token));
    }
}

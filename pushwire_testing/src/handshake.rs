//! Handshake with scripted outcomes.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use pushwire::{ClientIdentity, Endpoint, Handshake, HandshakeError};

/// Outcome of one scripted negotiation.
#[derive(Clone, Debug)]
pub enum Step {
    Accept(Endpoint),
    /// Answer with a non-zero gateway code.
    Reject { code: i64, msg: String },
    /// Fail as if the endpoint could not be reached.
    Unavailable,
}

impl Step {
    fn play(self) -> Result<Endpoint, HandshakeError> {
        match self {
            Self::Accept(endpoint) => Ok(endpoint),
            Self::Reject { code, msg } => Err(HandshakeError::Rejected { code, msg }),
            Self::Unavailable => Err(HandshakeError::Unavailable("scripted outage".into())),
        }
    }
}

/// [`Handshake`] that replays queued [`Step`]s, then repeats a fallback.
///
/// Clones share the script and the call counter.
#[derive(Clone, Debug)]
pub struct ScriptedHandshake {
    steps: Arc<Mutex<VecDeque<Step>>>,
    fallback: Step,
    calls: Arc<AtomicUsize>,
}

impl ScriptedHandshake {
    /// Play `steps` in order, then `fallback` forever.
    pub fn new(steps: impl IntoIterator<Item = Step>, fallback: Step) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into_iter().collect())),
            fallback,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always accept with `endpoint`.
    pub fn accepting(endpoint: Endpoint) -> Self { Self::new([], Step::Accept(endpoint)) }

    /// Number of negotiations performed so far.
    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl Handshake for ScriptedHandshake {
    async fn negotiate(&self, _identity: &ClientIdentity) -> Result<Endpoint, HandshakeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        step.unwrap_or_else(|| self.fallback.clone()).play()
    }
}

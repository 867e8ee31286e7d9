use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::errors::AppError;
use crate::models::StreamEvent;
use crate::state::{ConversationState, TurnHandle, TurnOutcome};
use crate::stream::ndjson::{parse_line, LineFramer};

/// Receives every event after it has been applied, e.g. to paint tokens as
/// they arrive.
pub trait TurnObserver {
    fn on_event(&mut self, _event: &StreamEvent, _state: &ConversationState) {}

    fn on_end(&mut self, _outcome: &TurnOutcome, _state: &ConversationState) {}
}

impl TurnObserver for () {}

/// Cancels the turn in flight. Cloneable so it can live outside the client.
///
/// Every turn gets a fresh [`CancellationToken`] from [`AbortHandle::arm`];
/// between turns there is no token and [`AbortHandle::abort`] is a no-op.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the running turn. Returns `false` when nothing was running.
    pub fn abort(&self) -> bool {
        match self.slot().as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Whether a turn is armed and not yet cancelled.
    pub fn is_running(&self) -> bool {
        self.slot().as_ref().is_some_and(|token| !token.is_cancelled())
    }

    /// Start listening for the next abort. Called once per turn.
    pub fn arm(&self) -> AbortListener {
        let token = CancellationToken::new();
        *self.slot() = Some(token.clone());
        AbortListener { token }
    }

    /// The turn is over; later aborts have nothing to cancel.
    pub fn disarm(&self) {
        self.slot().take();
    }

    fn slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The per-turn side of an [`AbortHandle`].
#[derive(Debug, Clone)]
pub struct AbortListener {
    token: CancellationToken,
}

impl AbortListener {
    /// Resolves once `abort()` has been called.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Close the turn as cancelled by the user.
pub(crate) fn close_aborted(state: &mut ConversationState, handle: TurnHandle) -> TurnOutcome {
    state
        .fail_turn(handle, &AppError::TurnAborted)
        .unwrap_or(TurnOutcome::Aborted)
}

/// Consume a response body and fold it into `state` for the given turn.
///
/// Lines are applied in arrival order. Malformed lines are dropped. A body
/// error closes the turn through [`ConversationState::fail_turn`] and is then
/// returned; an abort closes it the same way but returns `Ok(Aborted)`. The
/// abort is checked before every line, so nothing lands after it even when
/// several lines arrived in one chunk.
pub async fn drive_turn<S, B, E, O>(
    state: &mut ConversationState,
    handle: TurnHandle,
    body: S,
    abort: &AbortListener,
    observer: &mut O,
) -> Result<TurnOutcome, AppError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<AppError>,
    O: TurnObserver + ?Sized,
{
    let mut framer = LineFramer::new();
    let mut body = std::pin::pin!(body);

    loop {
        let next = tokio::select! {
            biased;
            _ = abort.aborted() => return Ok(close_aborted(state, handle)),
            next = body.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                for line in framer.push(chunk.as_ref()) {
                    if abort.is_aborted() {
                        return Ok(close_aborted(state, handle));
                    }
                    if let Some(event) = parse_line(&line) {
                        dispatch(state, handle, &event, observer);
                    }
                }
            }
            Some(Err(e)) => {
                let err: AppError = e.into();
                error!(turn_id = %handle.turn_id, "Chat stream failed: {err}");
                state.fail_turn(handle, &err);
                return Err(err);
            }
            None => break,
        }
    }

    if abort.is_aborted() {
        return Ok(close_aborted(state, handle));
    }

    if let Some(line) = framer.finish() {
        match serde_json::from_str::<StreamEvent>(&line) {
            Ok(event) => dispatch(state, handle, &event, observer),
            Err(e) => debug!(turn_id = %handle.turn_id, "Dropping truncated final frame: {e}"),
        }
    }

    if abort.is_aborted() {
        return Ok(close_aborted(state, handle));
    }

    state
        .finish_turn(handle)
        .ok_or_else(|| AppError::Unexpected("turn closed before the stream ended".to_string()))
}

fn dispatch<O>(state: &mut ConversationState, handle: TurnHandle, event: &StreamEvent, observer: &mut O)
where
    O: TurnObserver + ?Sized,
{
    if state.apply(handle, event) {
        observer.on_event(event, state);
    }
}

use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::api::ApiClient;
use crate::cache::{DetailCache, DetailKey};
use crate::errors::AppError;
use crate::models::{
    ApiStatus, LegacyTurnResponse, MetaEvent, Mode, RestaurantDetail, StreamEvent, Tone,
};
use crate::service::health_service::StatusBoard;
use crate::state::{ConversationState, TurnHandle, TurnKind, TurnOutcome};
use crate::stream::turn::close_aborted;
use crate::stream::{drive_turn, AbortHandle, TurnObserver};

/// Owns the conversation and runs one chat turn at a time against the
/// streaming endpoint.
pub struct StreamingChatClient {
    api: ApiClient,
    state: ConversationState,
    cache: DetailCache,
    status: StatusBoard,
    abort: AbortHandle,
}

impl StreamingChatClient {
    pub fn new(api: ApiClient, status: StatusBoard) -> Self {
        let tone = api.config().tone;
        Self {
            api,
            state: ConversationState::new(tone),
            cache: DetailCache::new(),
            status,
            abort: AbortHandle::new(),
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn cache(&self) -> &DetailCache {
        &self.cache
    }

    pub fn set_tone(&mut self, tone: Tone) {
        self.state.set_tone(tone);
    }

    /// Handle for cancelling whatever turn is in flight, usable from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Drop the conversation and start over with the greeting.
    pub fn reset(&mut self) {
        self.abort.abort();
        self.state = ConversationState::new(self.state.tone());
    }

    pub async fn submit_turn(&mut self, query: &str) -> Result<TurnOutcome, AppError> {
        self.submit_turn_with(query, &mut ()).await
    }

    pub async fn submit_turn_with<O>(&mut self, query: &str, observer: &mut O) -> Result<TurnOutcome, AppError>
    where
        O: TurnObserver + ?Sized,
    {
        self.run_turn(query, TurnKind::FreeText, observer).await
    }

    /// Answer the pending options menu with the option at `index` (0-based).
    /// The server expects the 1-based number as the query.
    pub async fn select_pending_option<O>(&mut self, index: usize, observer: &mut O) -> Result<TurnOutcome, AppError>
    where
        O: TurnObserver + ?Sized,
    {
        if let Some(pending) = self.state.pending_options() {
            let available = pending.labels().len();
            if available > 0 && index >= available {
                return Err(AppError::OptionOutOfRange { index: index + 1, available });
            }
        }
        let choice = index + 1;
        self.run_turn(&choice.to_string(), TurnKind::Selection(choice), observer)
            .await
    }

    async fn run_turn<O>(&mut self, query: &str, kind: TurnKind, observer: &mut O) -> Result<TurnOutcome, AppError>
    where
        O: TurnObserver + ?Sized,
    {
        let turn = self.state.begin_turn(query, kind)?;
        let handle = turn.handle;
        let listener = self.abort.arm();

        let opened = tokio::select! {
            biased;
            _ = listener.aborted() => None,
            resp = self.api.open_chat_stream(&turn.request) => Some(resp),
        };

        let result = match opened {
            None => Ok(close_aborted(&mut self.state, handle)),
            Some(Err(e)) => {
                error!(turn_id = %handle.turn_id, "Failed to open chat stream: {e}");
                self.state.fail_turn(handle, &e);
                Err(e)
            }
            Some(Ok(resp)) => {
                drive_turn(&mut self.state, handle, resp.bytes_stream(), &listener, observer).await
            }
        };

        self.abort.disarm();
        self.record_status(&result);
        let outcome = result.as_ref().cloned().unwrap_or(TurnOutcome::Interrupted);
        observer.on_end(&outcome, &self.state);
        result
    }

    fn record_status(&self, result: &Result<TurnOutcome, AppError>) {
        match result {
            Ok(TurnOutcome::Aborted) => {}
            Ok(_) => self.status.set_status(ApiStatus::Connected),
            Err(e) if e.is_transport() => self.status.set_status(ApiStatus::Error),
            Err(_) => {}
        }
    }

    // ── Legacy one-shot turn ──────────────────────────────────────────────────

    /// Run a turn against the non-streaming `/chat` endpoint. The response
    /// goes through the same transitions as a stream would.
    pub async fn submit_turn_legacy(&mut self, query: &str) -> Result<TurnOutcome, AppError> {
        let turn = self.state.begin_turn(query, TurnKind::FreeText)?;
        let handle = turn.handle;
        let listener = self.abort.arm();

        let answered = tokio::select! {
            biased;
            _ = listener.aborted() => None,
            resp = self.api.post_chat(&turn.request) => Some(resp),
        };

        let result = match answered {
            None => Ok(close_aborted(&mut self.state, handle)),
            Some(Ok(resp)) => Ok(self.apply_legacy(handle, resp)),
            Some(Err(e)) => {
                error!(turn_id = %handle.turn_id, "Legacy chat request failed: {e}");
                self.state.fail_turn(handle, &e);
                Err(e)
            }
        };
        self.abort.disarm();
        self.record_status(&result);
        result
    }

    fn apply_legacy(&mut self, handle: TurnHandle, resp: LegacyTurnResponse) -> TurnOutcome {
        let LegacyTurnResponse {
            response,
            mode,
            restaurant_cards,
            locations,
            detail_content,
            conversation_context,
        } = resp;

        let events = [
            StreamEvent::ContextUpdate { context: conversation_context.unwrap_or_default() },
            StreamEvent::Meta(MetaEvent {
                mode,
                cards: Some(restaurant_cards),
                locs: Some(locations),
                pending: None,
            }),
            StreamEvent::Token { content: response },
        ];
        for event in &events {
            self.state.apply(handle, event);
        }

        let outcome = self.state.finish_turn(handle).unwrap_or(TurnOutcome::Completed);
        if mode == Some(Mode::Resumen) {
            if let Some(detail) = detail_content {
                self.state.set_summary(Some(detail));
            }
        }
        outcome
    }

    // ── Restaurant details ────────────────────────────────────────────────────

    fn detail_key(&self, name: &str) -> DetailKey {
        DetailKey::new(name, self.state.context().topic(), self.state.tone())
    }

    pub async fn restaurant_detail(&self, name: &str) -> Result<RestaurantDetail, AppError> {
        self.cache.get_or_fetch(&self.api, self.detail_key(name)).await
    }

    /// Full detail for the one restaurant a `resumen` turn is about, taken
    /// from the only card or, without cards, the only map location. The
    /// turn's summary stands in for the cached `resumen_general`.
    pub async fn inline_detail(&self) -> Result<Option<RestaurantDetail>, AppError> {
        let results = self.state.results();
        let Some(name) = results.inline_subject() else {
            return Ok(None);
        };
        let mut detail = self.restaurant_detail(name).await?;
        if let Some(summary) = &results.summary {
            detail.resumen_general = Some(summary.clone());
        }
        Ok(Some(detail))
    }

    /// Warm the cache for every card on screen. Fetches run concurrently and
    /// failures are only logged.
    pub fn prefetch_details(&self) -> Vec<JoinHandle<()>> {
        self.state
            .results()
            .cards
            .iter()
            .filter_map(|card| card.name())
            .map(|name| {
                let key = self.detail_key(name);
                let cache = self.cache.clone();
                let api = self.api.clone();
                tokio::spawn(async move {
                    if let Err(e) = cache.get_or_fetch(&api, key).await {
                        warn!("Detail prefetch failed: {e}");
                    }
                })
            })
            .collect()
    }
}

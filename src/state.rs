use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    ChatMessage, ChatTurnRequest, ConversationContext, Location, MessageRole, MetaEvent,
    Mode, PendingOptions, RestaurantCard, StreamEvent, Tone,
};

const GREETING: &str = "¿No sabés cuáles son los mejores lugares en Neuquén? Dejá que yo te diga la posta 🍽️\n\n\
Puedo:\n\
- Decirte dónde hay buena pizza.\n\
- Contarte qué opinan de un lugar en particular (ese al que van tus amigos).\n\
- Buscar cuántos locales ofrecen opciones para tu restricción alimentaria.\n\n\
Ejemplos: \"¿Dónde hay buena pizza?\", \"Qué opinan de Growler Bar?\", \"Cuántos restaurantes de sushi hay?\", \"Dónde hay opciones veganas?\"";

const SELECTION_FAILED: &str = "❌ Error al procesar la selección";

// ── Turn bookkeeping ──────────────────────────────────────────────────────────

/// Addresses one turn and its assistant placeholder. Returned by
/// [`ConversationState::begin_turn`]; every later mutation must present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnHandle {
    pub turn_id: Uuid,
    pub message_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    FreeText,
    /// 1-based pick from the pending options menu.
    Selection(usize),
}

/// A turn that has been recorded locally and is ready to be sent.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub handle: TurnHandle,
    pub request: ChatTurnRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// Content arrived but the server also reported errors.
    Degraded { errors: Vec<String> },
    /// The server reported errors and produced no content.
    Failed { errors: Vec<String> },
    /// Transport gave out; any partial content was kept.
    Interrupted,
    Aborted,
}

#[derive(Debug, Clone)]
struct ActiveTurn {
    handle: TurnHandle,
    kind: TurnKind,
    query: String,
    server_errors: Vec<String>,
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Chat alone in the middle of the screen.
    #[default]
    Centered,
    /// Chat moved aside to make room for cards and map.
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardSort {
    #[default]
    Rating,
    Reviews,
    Name,
}

impl std::str::FromStr for CardSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rating" | "puntaje" => Ok(CardSort::Rating),
            "reviews" | "reseñas" => Ok(CardSort::Reviews),
            "name" | "nombre" => Ok(CardSort::Name),
            other => Err(format!("Unknown sort key: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultSet {
    pub cards: Vec<RestaurantCard>,
    pub locations: Vec<Location>,
    /// Active display mode for cards and map.
    pub mode: Mode,
    /// Query that produced the current locations.
    pub last_query: Option<String>,
    pub layout: Layout,
    /// Detail text shown beside a single `resumen` result.
    pub summary: Option<String>,
}

impl Default for ResultSet {
    fn default() -> Self {
        Self {
            cards: Vec::new(),
            locations: Vec::new(),
            mode: Mode::Rag,
            last_query: None,
            layout: Layout::Centered,
            summary: None,
        }
    }
}

impl ResultSet {
    /// Cards in display order. Only statistics mode is re-sorted; the other
    /// modes keep the server's ranking.
    pub fn sorted_cards(&self, sort: CardSort) -> Vec<&RestaurantCard> {
        let mut cards: Vec<&RestaurantCard> = self.cards.iter().collect();
        if self.mode != Mode::Estadisticas {
            return cards;
        }
        match sort {
            CardSort::Rating => cards.sort_by(|a, b| b.rating().total_cmp(&a.rating())),
            CardSort::Reviews => cards.sort_by_key(|c| std::cmp::Reverse(c.total_reviews())),
            CardSort::Name => cards.sort_by(|a, b| {
                a.name().unwrap_or_default().to_lowercase().cmp(&b.name().unwrap_or_default().to_lowercase())
            }),
        }
        cards
    }

    /// Name of the single restaurant a `resumen` result is about: the only
    /// card, or the only location when no cards came back.
    pub fn inline_subject(&self) -> Option<&str> {
        if self.mode != Mode::Resumen {
            return None;
        }
        match (self.cards.as_slice(), self.locations.as_slice()) {
            ([card], _) => card.name(),
            ([], [location]) => location.name(),
            _ => None,
        }
    }
}

// ── Conversation ──────────────────────────────────────────────────────────────

/// Everything the chat screen shows. Mutated only through the transition
/// functions below, one turn at a time.
#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<ChatMessage>,
    context: ConversationContext,
    results: ResultSet,
    tone: Tone,
    active: Option<ActiveTurn>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(Tone::default())
    }
}

impl ConversationState {
    pub fn new(tone: Tone) -> Self {
        Self {
            messages: vec![ChatMessage::new(MessageRole::Assistant, GREETING, Some(Mode::System))],
            context: ConversationContext::default(),
            results: ResultSet::default(),
            tone,
            active: None,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    pub fn tone(&self) -> Tone {
        self.tone
    }

    pub fn set_tone(&mut self, tone: Tone) {
        self.tone = tone;
    }

    pub fn is_loading(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_turn(&self) -> Option<TurnHandle> {
        self.active.as_ref().map(|t| t.handle)
    }

    pub fn pending_options(&self) -> Option<PendingOptions> {
        self.context.pending_options()
    }

    /// Whether anything beyond the seeded greeting has happened.
    pub fn has_user_turns(&self) -> bool {
        self.messages.iter().any(|m| m.role == MessageRole::User)
    }

    pub fn message(&self, id: Uuid) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn message_mut(&mut self, id: Uuid) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn is_current(&self, handle: TurnHandle) -> bool {
        self.active.as_ref().is_some_and(|t| t.handle == handle)
    }

    /// Record the user message and the empty assistant placeholder, and mark
    /// the session as loading. Rejected submissions leave state untouched.
    pub fn begin_turn(&mut self, query: &str, kind: TurnKind) -> Result<PendingTurn, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::EmptyField { field_name: "query".to_string() });
        }
        if self.active.is_some() {
            return Err(AppError::TurnInFlight);
        }

        self.messages.push(ChatMessage::user(query));
        let placeholder = ChatMessage::placeholder();
        let handle = TurnHandle { turn_id: Uuid::new_v4(), message_id: placeholder.id };
        self.messages.push(placeholder);

        self.active = Some(ActiveTurn {
            handle,
            kind,
            query: query.to_string(),
            server_errors: Vec::new(),
        });
        info!(turn_id = %handle.turn_id, "Turn started: {query}");

        Ok(PendingTurn {
            handle,
            request: ChatTurnRequest {
                query: query.to_string(),
                conversation_context: self.context.with_tone(self.tone),
                tone: self.tone,
            },
        })
    }

    /// Apply one decoded stream event. Returns `false` when the handle no
    /// longer names the in-flight turn, in which case nothing changes.
    pub fn apply(&mut self, handle: TurnHandle, event: &StreamEvent) -> bool {
        if !self.is_current(handle) {
            warn!(turn_id = %handle.turn_id, "Ignoring {} event for a finished turn", event.kind());
            return false;
        }

        match event {
            StreamEvent::Token { content } => {
                if let Some(message) = self.message_mut(handle.message_id) {
                    message.content.push_str(content);
                }
            }
            StreamEvent::Meta(meta) => self.apply_meta(handle, meta),
            StreamEvent::ContextUpdate { context } => {
                self.context = context.clone();
            }
            StreamEvent::Error { message } => {
                warn!(turn_id = %handle.turn_id, "Server reported an error: {message}");
                if let Some(turn) = self.active.as_mut() {
                    turn.server_errors.push(message.clone());
                }
            }
            StreamEvent::Done => debug!(turn_id = %handle.turn_id, "Explicit end-of-stream frame"),
        }
        true
    }

    fn apply_meta(&mut self, handle: TurnHandle, meta: &MetaEvent) {
        if let Some(mode) = meta.mode {
            if let Some(message) = self.message_mut(handle.message_id) {
                message.mode = Some(mode);
            }
            self.results.mode = mode;
        }

        if let Some(cards) = &meta.cards {
            self.results.cards = cards.clone();
            if !cards.is_empty() {
                self.results.layout = Layout::Results;
            }
        }

        if let Some(locs) = &meta.locs {
            self.results.locations = locs.clone();
            if !locs.is_empty() {
                self.results.last_query = self.active.as_ref().map(|t| t.query.clone());
            }
        }

        if self.results.mode == Mode::Resumen && !self.results.locations.is_empty() {
            self.results.layout = Layout::Results;
        }

        if let Some(pending) = &meta.pending {
            self.context.set_pending_options(pending.clone());
        }
    }

    /// Close the turn after a clean end of stream.
    pub fn finish_turn(&mut self, handle: TurnHandle) -> Option<TurnOutcome> {
        if !self.is_current(handle) {
            return None;
        }
        let turn = self.active.take()?;
        let message = self.messages.iter_mut().find(|m| m.id == handle.message_id)?;

        let outcome = if turn.server_errors.is_empty() {
            TurnOutcome::Completed
        } else if message.content.is_empty() {
            message.content = AppError::Server { message: turn.server_errors.join("; ") }
                .user_message()
                .to_string();
            message.mode = Some(Mode::Error);
            TurnOutcome::Failed { errors: turn.server_errors }
        } else {
            TurnOutcome::Degraded { errors: turn.server_errors }
        };

        if self.results.mode == Mode::Resumen && !matches!(outcome, TurnOutcome::Failed { .. }) {
            self.results.summary = Some(message.content.clone());
        } else {
            self.results.summary = None;
        }

        info!(turn_id = %handle.turn_id, "Turn finished: {outcome:?}");
        Some(outcome)
    }

    /// Close the turn after a transport failure or abort. Content that was
    /// already streamed is kept and annotated; an empty placeholder is
    /// replaced with the user-facing error text.
    pub fn fail_turn(&mut self, handle: TurnHandle, error: &AppError) -> Option<TurnOutcome> {
        if !self.is_current(handle) {
            return None;
        }
        let turn = self.active.take()?;
        let message = self.messages.iter_mut().find(|m| m.id == handle.message_id)?;

        if message.content.is_empty() {
            message.content = match (turn.kind, error) {
                (TurnKind::Selection(_), e) if !e.is_timeout() && !matches!(e, AppError::TurnAborted) => {
                    SELECTION_FAILED.to_string()
                }
                (_, e) => e.user_message().to_string(),
            };
            message.mode = Some(Mode::Error);
        } else {
            message.content.push_str("\n\n");
            message.content.push_str(&error.annotation());
        }

        let outcome = if matches!(error, AppError::TurnAborted) {
            TurnOutcome::Aborted
        } else {
            TurnOutcome::Interrupted
        };
        warn!(turn_id = %handle.turn_id, "Turn ended early: {error}");
        Some(outcome)
    }

    /// Override the detail text. The non-streaming transport delivers it
    /// apart from the reply.
    pub fn set_summary(&mut self, summary: Option<String>) {
        self.results.summary = summary;
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::AppError;

// ── Roles, modes and tones ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation mode assigned by the server, plus the client-only `system`
/// and `error` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Rag,
    Estadisticas,
    Resumen,
    General,
    System,
    Error,
    #[serde(other)]
    Unknown,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Rag => "rag",
            Mode::Estadisticas => "estadisticas",
            Mode::Resumen => "resumen",
            Mode::General => "general",
            Mode::System => "system",
            Mode::Error => "error",
            Mode::Unknown => "unknown",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Mode::Estadisticas => "📊",
            Mode::Rag => "🧠",
            Mode::Resumen => "📝",
            _ => "🤖",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Mode::Estadisticas => "Estadísticas",
            Mode::Rag => "Recomendaciones",
            Mode::Resumen => "Resumen",
            _ => "Sistema",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Cordial,
    Soberbio,
    Sassy,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Cordial => "cordial",
            Tone::Soberbio => "soberbio",
            Tone::Sassy => "sassy",
        }
    }
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tone {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cordial" | "amable" => Ok(Tone::Cordial),
            "soberbio" => Ok(Tone::Soberbio),
            "sassy" | "ironico" | "irónico" => Ok(Tone::Sassy),
            other => Err(AppError::UnknownTone { value: other.to_string() }),
        }
    }
}

// ── Message log ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>, mode: Option<Mode>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            mode,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content, None)
    }

    /// Empty assistant message filled in by a streaming turn.
    pub fn placeholder() -> Self {
        Self::new(MessageRole::Assistant, String::new(), Some(Mode::General))
    }
}

// ── Opaque server values ──────────────────────────────────────────────────────

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| value.get(*k).and_then(Value::as_str))
}

/// A recommended restaurant as sent by the server. Only the name, rating and
/// review count are read; everything else is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RestaurantCard(pub Value);

impl RestaurantCard {
    pub fn name(&self) -> Option<&str> {
        str_field(&self.0, &["nombre", "name"])
    }

    pub fn rating(&self) -> f64 {
        self.0.get("rating").and_then(Value::as_f64).unwrap_or(0.0)
    }

    pub fn total_reviews(&self) -> u64 {
        self.0.get("total_reviews").and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        str_field(&self.0, &[key])
    }
}

/// A map marker as sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(pub Value);

impl Location {
    pub fn name(&self) -> Option<&str> {
        str_field(&self.0, &["nombre", "name"])
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let lat = self.0.get("lat").and_then(Value::as_f64)?;
        let lng = self.0.get("lng").and_then(Value::as_f64)?;
        Some((lat, lng))
    }
}

/// Numbered disambiguation menu. The server sends either a plain array of
/// labels or an object with a `labels` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingOptions(pub Value);

impl PendingOptions {
    pub fn labels(&self) -> Vec<String> {
        let items = match &self.0 {
            Value::Array(items) => items.as_slice(),
            Value::Object(obj) => match obj.get("labels") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => &[],
            },
            _ => &[],
        };
        items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

const PENDING_KEY: &str = "pending_options";
const TONE_KEY: &str = "tone";

/// Conversation context carried verbatim between turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationContext(pub Map<String, Value>);

impl ConversationContext {
    pub fn topic(&self) -> Option<&str> {
        self.0.get("topic").and_then(Value::as_str).filter(|t| !t.is_empty())
    }

    pub fn pending_options(&self) -> Option<PendingOptions> {
        match self.0.get(PENDING_KEY) {
            None | Some(Value::Null) => None,
            Some(v) => Some(PendingOptions(v.clone())),
        }
    }

    pub fn set_pending_options(&mut self, pending: Option<PendingOptions>) {
        match pending {
            Some(p) => {
                self.0.insert(PENDING_KEY.to_string(), p.0);
            }
            None => {
                self.0.remove(PENDING_KEY);
            }
        }
    }

    /// Copy of the context with the session tone stamped in.
    pub fn with_tone(&self, tone: Tone) -> Self {
        let mut ctx = self.clone();
        ctx.0.insert(TONE_KEY.to_string(), Value::String(tone.as_str().to_string()));
        ctx
    }
}

// ── Wire: request ─────────────────────────────────────────────────────────────

/// Body of `POST /chat/stream` and `POST /chat`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurnRequest {
    pub query: String,
    pub conversation_context: ConversationContext,
    pub tone: Tone,
}

// ── Wire: stream events ───────────────────────────────────────────────────────

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cards: Option<Vec<RestaurantCard>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locs: Option<Vec<Location>>,
    /// `Some(None)` clears the pending menu.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub pending: Option<Option<PendingOptions>>,
}

/// One NDJSON line of the chat stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token { content: String },
    Meta(MetaEvent),
    ContextUpdate { context: ConversationContext },
    Error { message: String },
    #[serde(alias = "end")]
    Done,
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Token { .. } => "token",
            StreamEvent::Meta(_) => "meta",
            StreamEvent::ContextUpdate { .. } => "context_update",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done => "done",
        }
    }
}

// ── Wire: collaborators ───────────────────────────────────────────────────────

/// One-shot response of the legacy `POST /chat` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyTurnResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub restaurant_cards: Vec<RestaurantCard>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub detail_content: Option<String>,
    #[serde(default)]
    pub conversation_context: Option<ConversationContext>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub autor: Option<String>,
    #[serde(default)]
    pub fecha: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub texto: String,
}

/// `GET /restaurant/{name}` payload. Unknown fields are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantDetail {
    pub nombre: String,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub total_reviews: Option<u64>,
    #[serde(default)]
    pub direccion: Option<String>,
    #[serde(default)]
    pub barrio: Option<String>,
    #[serde(default)]
    pub zona: Option<String>,
    #[serde(default)]
    pub resumen_general: Option<String>,
    #[serde(default)]
    pub aspectos_positivos: Vec<String>,
    #[serde(default)]
    pub aspectos_negativos: Vec<String>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Connection status ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiStatus {
    #[default]
    Checking,
    Connected,
    Error,
}

impl ApiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiStatus::Checking => "checking",
            ApiStatus::Connected => "connected",
            ApiStatus::Error => "error",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ApiStatus::Checking => "Conectando...",
            ApiStatus::Connected => "Conectado",
            ApiStatus::Error => "Sin conexión",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_every_event_kind() {
        let token: StreamEvent = serde_json::from_str(r#"{"type":"token","content":"Hola"}"#).unwrap();
        assert_eq!(token, StreamEvent::Token { content: "Hola".into() });

        let ctx: StreamEvent =
            serde_json::from_str(r#"{"type":"context_update","context":{"topic":"pizza"}}"#).unwrap();
        match ctx {
            StreamEvent::ContextUpdate { context } => assert_eq!(context.topic(), Some("pizza")),
            other => panic!("unexpected {other:?}"),
        }

        let err: StreamEvent = serde_json::from_str(r#"{"type":"error","message":"boom"}"#).unwrap();
        assert_eq!(err.kind(), "error");

        let done: StreamEvent = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(done, StreamEvent::Done);
    }

    #[test]
    fn meta_distinguishes_absent_null_and_value() {
        let absent: StreamEvent = serde_json::from_str(r#"{"type":"meta","mode":"rag"}"#).unwrap();
        let StreamEvent::Meta(meta) = absent else { panic!("not meta") };
        assert_eq!(meta.mode, Some(Mode::Rag));
        assert!(meta.cards.is_none());
        assert!(meta.pending.is_none());

        let cleared: StreamEvent = serde_json::from_str(r#"{"type":"meta","pending":null}"#).unwrap();
        let StreamEvent::Meta(meta) = cleared else { panic!("not meta") };
        assert_eq!(meta.pending, Some(None));

        let empty: StreamEvent = serde_json::from_str(r#"{"type":"meta","cards":[]}"#).unwrap();
        let StreamEvent::Meta(meta) = empty else { panic!("not meta") };
        assert_eq!(meta.cards, Some(vec![]));
    }

    #[test]
    fn unknown_mode_does_not_reject_the_line() {
        let event: StreamEvent = serde_json::from_str(r#"{"type":"meta","mode":"ranking"}"#).unwrap();
        let StreamEvent::Meta(meta) = event else { panic!("not meta") };
        assert_eq!(meta.mode, Some(Mode::Unknown));
    }

    #[test]
    fn pending_labels_accept_both_shapes() {
        let list = PendingOptions(json!(["Centro", "Alta Barda"]));
        assert_eq!(list.labels(), vec!["Centro", "Alta Barda"]);

        let labelled = PendingOptions(json!({"labels": ["La Maria", "La Mary"], "ids": [1, 2]}));
        assert_eq!(labelled.labels(), vec!["La Maria", "La Mary"]);

        assert!(PendingOptions(json!(3)).labels().is_empty());
    }

    #[test]
    fn tone_is_stamped_into_context_copy() {
        let mut ctx = ConversationContext::default();
        ctx.0.insert("topic".into(), json!("sushi"));
        let sent = ctx.with_tone(Tone::Sassy);

        assert_eq!(sent.0.get("tone"), Some(&json!("sassy")));
        assert!(ctx.0.get("tone").is_none());
    }

    #[test]
    fn tone_parses_aliases() {
        assert_eq!("Amable".parse::<Tone>().unwrap(), Tone::Cordial);
        assert_eq!("ironico".parse::<Tone>().unwrap(), Tone::Sassy);
        assert!("grumpy".parse::<Tone>().is_err());
    }

    #[test]
    fn detail_keeps_unknown_fields() {
        let detail: RestaurantDetail = serde_json::from_value(json!({
            "nombre": "Growler Bar",
            "rating": 4.5,
            "reviews": [{"autor": "Ana", "texto": "Buena birra", "rating": 5}],
            "horario": "19 a 2"
        }))
        .unwrap();
        assert_eq!(detail.reviews.len(), 1);
        assert_eq!(detail.extra.get("horario"), Some(&json!("19 a 2")));
    }
}

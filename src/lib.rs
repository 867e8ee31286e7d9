//! Chat client for "¿Qué Morfamos?", the restaurant recommender for Neuquén.
//!
//! A turn sends the user's query to `POST /chat/stream` and folds the
//! newline-delimited JSON reply into a [`state::ConversationState`]: tokens
//! grow the assistant message, `meta` lines replace cards, map locations and
//! pending options, and `context_update` lines replace the conversation
//! context carried into the next turn.

pub mod api;
pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod render;
pub mod service;
pub mod state;
pub mod stream;

pub use errors::AppError;
pub use service::chat_service::StreamingChatClient;
pub use service::health_service::{HealthProbe, StatusBoard};

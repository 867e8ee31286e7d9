pub mod ndjson;
pub mod turn;

pub use ndjson::{decode_all, parse_line, LineFramer};
pub use turn::{drive_turn, AbortHandle, AbortListener, TurnObserver};

//! Plain-text rendering of the conversation for the terminal client.

use std::fmt::Write;

use crate::models::{ChatMessage, MessageRole, PendingOptions, RestaurantDetail};
use crate::service::health_service::HealthReport;
use crate::state::{CardSort, ConversationState, ResultSet};

/// Five-slot star bar: full stars, an optional half, empty slots.
pub fn stars(rating: f64) -> String {
    let rating = rating.clamp(0.0, 5.0);
    let full = rating.floor() as usize;
    let half = rating.fract() >= 0.5;
    let empty = 5 - full - usize::from(half);
    format!("{}{}{}", "★".repeat(full), if half { "½" } else { "" }, "☆".repeat(empty))
}

pub fn message_header(message: &ChatMessage) -> String {
    match (message.role, message.mode) {
        (MessageRole::Assistant, Some(mode)) => format!("{} {}", mode.icon(), mode.label()),
        (MessageRole::Assistant, None) => "asistente".to_string(),
        (MessageRole::User, _) => "vos".to_string(),
    }
}

pub fn message(message: &ChatMessage) -> String {
    format!("[{}]\n{}\n", message_header(message), message.content)
}

pub fn cards(results: &ResultSet, sort: CardSort) -> String {
    let mut out = String::new();
    for (i, card) in results.sorted_cards(sort).iter().enumerate() {
        let name = card.name().unwrap_or("(sin nombre)");
        let _ = write!(out, "{:>2}. {name}", i + 1);
        if card.rating() > 0.0 {
            let _ = write!(out, "  {} {:.1}", stars(card.rating()), card.rating());
        }
        if card.total_reviews() > 0 {
            let _ = write!(out, "  ({} reseñas)", card.total_reviews());
        }
        out.push('\n');
        if let Some(addr) = card.field("direccion") {
            let _ = writeln!(out, "    📍 {addr}");
        }
        if let Some(quote) = card.field("frase_destacada") {
            let _ = writeln!(out, "    “{quote}”");
        }
    }
    out
}

pub fn pending(options: &PendingOptions) -> String {
    let mut out = String::from("Elegí la opción que corresponda:\n");
    for (i, label) in options.labels().iter().enumerate() {
        let _ = writeln!(out, "  {}. {label}", i + 1);
    }
    out
}

pub fn detail(detail: &RestaurantDetail) -> String {
    let mut out = format!("🍽️  {}\n", detail.nombre);
    if let Some(rating) = detail.rating {
        let _ = write!(out, "{} {rating:.1}", stars(rating));
        if let Some(total) = detail.total_reviews {
            let _ = write!(out, " ({total} reseñas)");
        }
        out.push('\n');
    }
    let place: Vec<&str> = [&detail.direccion, &detail.barrio, &detail.zona]
        .into_iter()
        .filter_map(|s| s.as_deref())
        .collect();
    if !place.is_empty() {
        let _ = writeln!(out, "📍 {}", place.join(" · "));
    }
    if let Some(summary) = &detail.resumen_general {
        let _ = writeln!(out, "\n{summary}");
    }
    for (title, items) in [("👍", &detail.aspectos_positivos), ("👎", &detail.aspectos_negativos)] {
        for item in items {
            let _ = writeln!(out, "{title} {item}");
        }
    }
    for review in detail.reviews.iter().take(3) {
        let author = review.autor.as_deref().unwrap_or("anónimo");
        let _ = writeln!(out, "\n— {author}: {}", review.texto);
    }
    out
}

pub fn status_line(report: &HealthReport, state: &ConversationState) -> String {
    let mut line = format!("● {}", report.status.label());
    if let Some(notice) = report.visible_notice(state) {
        let _ = write!(
            line,
            " — el servidor está inactivo, despertando (~{}s)",
            notice.countdown.as_secs()
        );
    }
    line
}

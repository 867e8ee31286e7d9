//! End-to-end chat turns against a mock backend.

use std::time::Duration;

use que_morfamos::api::ApiClient;
use que_morfamos::config::ApiConfig;
use que_morfamos::models::{ApiStatus, MessageRole, Mode, Tone};
use que_morfamos::state::{Layout, TurnOutcome};
use que_morfamos::{AppError, StatusBoard, StreamingChatClient};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ndjson(lines: &[serde_json::Value]) -> String {
    lines.iter().map(|l| format!("{l}\n")).collect()
}

fn stream_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson")
}

fn client_for(base_url: &str) -> StreamingChatClient {
    let api = ApiClient::new(ApiConfig::new(base_url)).expect("client");
    StreamingChatClient::new(api, StatusBoard::new())
}

#[tokio::test]
async fn pizza_turn_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .and(body_partial_json(json!({
            "query": "pizza",
            "tone": "cordial",
            "conversation_context": { "tone": "cordial" }
        })))
        .respond_with(stream_response(ndjson(&[
            json!({"type": "meta", "mode": "rag", "cards": [{"nombre": "La Maria"}]}),
            json!({"type": "token", "content": "Te recomiendo "}),
            json!({"type": "token", "content": "La Maria."}),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    let outcome = client.submit_turn("pizza").await.expect("turn succeeds");

    assert_eq!(outcome, TurnOutcome::Completed);
    let state = client.state();
    let msgs = state.messages();
    assert_eq!(msgs.len(), 3);
    assert_eq!(msgs[1].role, MessageRole::User);
    assert_eq!(msgs[1].content, "pizza");
    assert_eq!(msgs[2].role, MessageRole::Assistant);
    assert_eq!(msgs[2].content, "Te recomiendo La Maria.");
    assert_eq!(msgs[2].mode, Some(Mode::Rag));
    assert_eq!(state.results().cards.len(), 1);
    assert_eq!(state.results().cards[0].name(), Some("La Maria"));
    assert_eq!(state.results().layout, Layout::Results);
    assert!(!state.is_loading());
    assert_eq!(client.status().current().status, ApiStatus::Connected);
}

#[tokio::test]
async fn malformed_line_does_not_abort_the_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(stream_response(
            "{\"type\":\"token\",\"content\":\"A\"}\n{not json}\n{\"type\":\"token\",\"content\":\"B\"}\n".to_string(),
        ))
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    let outcome = client.submit_turn("x").await.expect("turn succeeds");

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(client.state().messages().last().unwrap().content, "AB");
}

#[tokio::test]
async fn server_error_status_replaces_placeholder_and_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(stream_response(ndjson(&[json!({"type": "token", "content": "Ahora sí"})])))
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    let err = client.submit_turn("pizza").await.unwrap_err();

    assert!(matches!(err, AppError::HttpStatus { status: 503 }));
    let failed = client.state().messages().last().unwrap();
    assert_eq!(failed.content, "❌ Error al conectar con el servidor.");
    assert_eq!(failed.mode, Some(Mode::Error));
    assert!(!client.state().is_loading());
    assert_eq!(client.status().current().status, ApiStatus::Error);

    let outcome = client.submit_turn("pizza otra vez").await.expect("second turn works");
    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(client.state().messages().last().unwrap().content, "Ahora sí");
    assert_eq!(client.state().messages().len(), 5);
}

#[tokio::test]
async fn unreachable_backend_gets_connection_message() {
    // Port 9 (discard) is closed on test machines.
    let mut client = client_for("http://127.0.0.1:9");
    let err = client.submit_turn("pizza").await.unwrap_err();

    assert!(err.is_transport());
    let msg = client.state().messages().last().unwrap();
    assert_eq!(msg.mode, Some(Mode::Error));
    assert_eq!(msg.content, err.user_message());
    assert!(!client.state().is_loading());
}

#[tokio::test]
async fn slow_backend_times_out_with_its_own_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(stream_response(String::new()).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let mut config = ApiConfig::new(server.uri());
    config.chat_timeout = Duration::from_millis(200);
    let mut client = StreamingChatClient::new(ApiClient::new(config).unwrap(), StatusBoard::new());

    let err = client.submit_turn("pizza").await.unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(client.state().messages().last().unwrap().content.contains("tardó demasiado"));
}

#[tokio::test]
async fn context_and_tone_flow_into_the_next_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .and(body_partial_json(json!({"query": "pizza"})))
        .respond_with(stream_response(ndjson(&[
            json!({"type": "context_update", "context": {"topic": "pizza", "pending_options": ["La Maria", "La Mary"]}}),
            json!({"type": "token", "content": "¿Cuál de las dos?"}),
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .and(body_partial_json(json!({
            "query": "2",
            "tone": "sassy",
            "conversation_context": {"topic": "pizza", "tone": "sassy"}
        })))
        .respond_with(stream_response(ndjson(&[
            json!({"type": "meta", "pending": null, "mode": "resumen", "locs": [{"nombre": "La Mary", "lat": -38.95, "lng": -68.06}]}),
            json!({"type": "token", "content": "La Mary es un clásico."}),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    client.submit_turn("pizza").await.expect("first turn");
    assert_eq!(client.state().pending_options().unwrap().labels().len(), 2);

    let out_of_range = client.select_pending_option(5, &mut ()).await.unwrap_err();
    assert!(matches!(out_of_range, AppError::OptionOutOfRange { index: 6, available: 2 }));
    assert_eq!(client.state().messages().len(), 3);

    client.set_tone(Tone::Sassy);
    client.select_pending_option(1, &mut ()).await.expect("selection turn");

    let state = client.state();
    assert!(state.pending_options().is_none());
    assert_eq!(state.messages()[3].content, "2");
    assert_eq!(state.results().last_query.as_deref(), Some("2"));
    assert_eq!(state.results().layout, Layout::Results);
    assert_eq!(state.results().summary.as_deref(), Some("La Mary es un clásico."));
}

#[tokio::test]
async fn legacy_turn_lands_in_the_same_state_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Growler Bar tiene muy buenas reseñas.",
            "mode": "resumen",
            "restaurant_cards": [{"nombre": "Growler Bar", "rating": 4.4}],
            "locations": [{"nombre": "Growler Bar", "lat": -38.95, "lng": -68.05}],
            "detail_content": "Cervecería artesanal con patio.",
            "conversation_context": {"topic": "cerveza"}
        })))
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    let outcome = client.submit_turn_legacy("qué opinan de Growler Bar").await.expect("legacy turn");

    assert_eq!(outcome, TurnOutcome::Completed);
    let state = client.state();
    let last = state.messages().last().unwrap();
    assert_eq!(last.content, "Growler Bar tiene muy buenas reseñas.");
    assert_eq!(last.mode, Some(Mode::Resumen));
    assert_eq!(state.results().mode, Mode::Resumen);
    assert_eq!(state.results().summary.as_deref(), Some("Cervecería artesanal con patio."));
    assert_eq!(state.results().last_query.as_deref(), Some("qué opinan de Growler Bar"));
    assert_eq!(state.context().topic(), Some("cerveza"));
}

#[tokio::test]
async fn restaurant_details_are_fetched_once_per_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(stream_response(ndjson(&[
            json!({"type": "context_update", "context": {"topic": "pizza"}}),
            json!({"type": "meta", "cards": [{"nombre": "Growler"}, {"nombre": "Mamma"}]}),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/restaurant/Growler"))
        .and(query_param("topic", "pizza"))
        .and(query_param("tone", "cordial"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nombre": "Growler",
            "rating": 4.4,
            "aspectos_positivos": ["Buena birra"]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/restaurant/Mamma"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"nombre": "Mamma"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    client.submit_turn("pizza").await.expect("turn");

    for handle in client.prefetch_details() {
        handle.await.expect("prefetch task");
    }
    assert_eq!(client.cache().len().await, 2);

    let detail = client.restaurant_detail("Growler").await.expect("cached detail");
    assert_eq!(detail.aspectos_positivos, vec!["Buena birra".to_string()]);
}

#[tokio::test]
async fn empty_query_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    let err = client.submit_turn("   ").await.unwrap_err();

    assert!(err.is_rejection());
    assert_eq!(client.state().messages().len(), 1);
}

#[tokio::test]
async fn resumen_with_one_card_shows_its_detail_inline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Growler es una cervecería.",
            "mode": "resumen",
            "restaurant_cards": [{"nombre": "Growler", "rating": 4.4}],
            "locations": [],
            "detail_content": "Patio enorme y buena birra."
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/restaurant/Growler"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nombre": "Growler",
            "direccion": "Av. Argentina 100",
            "resumen_general": "Resumen genérico"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    client.submit_turn_legacy("qué opinan de Growler").await.expect("turn");

    let detail = client.inline_detail().await.expect("detail").expect("one resumen card");
    assert_eq!(detail.nombre, "Growler");
    assert_eq!(detail.direccion.as_deref(), Some("Av. Argentina 100"));
    assert_eq!(detail.resumen_general.as_deref(), Some("Patio enorme y buena birra."));

    // Second lookup comes from the cache.
    assert!(client.inline_detail().await.expect("detail").is_some());
}

#[tokio::test]
async fn resumen_with_only_a_location_shows_its_detail_inline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(stream_response(ndjson(&[
            json!({"type": "meta", "mode": "resumen", "cards": [], "locs": [{"nombre": "Mamma", "lat": -38.95, "lng": -68.06}]}),
            json!({"type": "token", "content": "Mamma tiene la mejor muzza."}),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/restaurant/Mamma"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"nombre": "Mamma", "rating": 4.7})))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    client.submit_turn("qué opinan de Mamma").await.expect("turn");

    let detail = client.inline_detail().await.expect("detail").expect("one resumen location");
    assert_eq!(detail.nombre, "Mamma");
    assert_eq!(detail.rating, Some(4.7));
    assert_eq!(detail.resumen_general.as_deref(), Some("Mamma tiene la mejor muzza."));
}

#[tokio::test]
async fn non_resumen_turns_have_no_inline_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(stream_response(ndjson(&[
            json!({"type": "meta", "mode": "rag", "cards": [{"nombre": "Growler"}]}),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    client.submit_turn("birra").await.expect("turn");

    assert!(client.inline_detail().await.expect("no request needed").is_none());
}

#[tokio::test]
async fn tunnel_hosts_get_the_bypass_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .and(header("bypass-tunnel-reminder", "true"))
        .respond_with(stream_response(ndjson(&[json!({"type": "token", "content": "ok"})])))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = ApiConfig::new(server.uri());
    config.tunnel_bypass = true;
    let mut client = StreamingChatClient::new(ApiClient::new(config).unwrap(), StatusBoard::new());

    let outcome = client.submit_turn("hola").await.expect("header matched");
    assert_eq!(outcome, TurnOutcome::Completed);
}

#[tokio::test]
async fn plain_hosts_do_not_send_the_bypass_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("bypass-tunnel-reminder", "true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(stream_response(ndjson(&[json!({"type": "token", "content": "ok"})])))
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    client.submit_turn("hola").await.expect("turn");
}

#[tokio::test]
async fn abort_handle_is_idle_between_turns() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(stream_response(ndjson(&[json!({"type": "token", "content": "listo"})])))
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    let abort = client.abort_handle();
    assert!(!abort.abort());

    client.submit_turn("hola").await.expect("turn");

    assert!(!abort.is_running());
    assert!(!abort.abort(), "a finished turn has nothing to cancel");
    assert_eq!(client.state().messages().last().unwrap().content, "listo");
}

#[tokio::test]
async fn slow_legacy_turn_can_be_aborted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"response": "tarde"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let mut client = client_for(&server.uri());
    let abort = client.abort_handle();
    tokio::spawn(async move {
        while !abort.abort() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let outcome = client.submit_turn_legacy("pizza").await.expect("aborted turn");

    assert_eq!(outcome, TurnOutcome::Aborted);
    let last = client.state().messages().last().unwrap();
    assert_eq!(last.content, "⏹️ Consulta cancelada.");
    assert!(!client.state().is_loading());
}

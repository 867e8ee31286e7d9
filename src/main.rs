use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use que_morfamos::api::ApiClient;
use que_morfamos::config::ApiConfig;
use que_morfamos::models::{StreamEvent, Tone};
use que_morfamos::render;
use que_morfamos::state::{CardSort, ConversationState, Layout, TurnOutcome};
use que_morfamos::stream::TurnObserver;
use que_morfamos::{AppError, HealthProbe, StatusBoard, StreamingChatClient};

const HELP: &str = "\
Comandos:
  /tono cordial|soberbio|sassy   cambia el tono de las respuestas
  /opcion N                      elige la opción N del menú pendiente
  /detalle NOMBRE                muestra la ficha de un restaurante
  /orden rating|reviews|nombre   ordena las tarjetas (modo estadísticas)
  /tarjetas                      vuelve a mostrar las tarjetas
  /legacy CONSULTA               consulta sin streaming
  /nuevo                         empieza una conversación nueva
  /salir                         termina
Ctrl-C cancela la respuesta en curso; sin respuesta en curso, sale.";

enum Command {
    Empty,
    Ask(String),
    Legacy(String),
    Tone(String),
    Choose(String),
    Detail(String),
    Sort(String),
    Cards,
    Reset,
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Ask(line.to_string());
        };
        let (name, arg) = rest.split_once(' ').unwrap_or((rest, ""));
        let arg = arg.trim().to_string();
        match name {
            "tono" => Command::Tone(arg),
            "opcion" | "opción" => Command::Choose(arg),
            "detalle" => Command::Detail(arg),
            "orden" => Command::Sort(arg),
            "tarjetas" => Command::Cards,
            "legacy" => Command::Legacy(arg),
            "nuevo" => Command::Reset,
            "salir" | "exit" => Command::Quit,
            _ => Command::Help,
        }
    }
}

/// Paints tokens as they arrive and whatever the turn appended at the end.
#[derive(Default)]
struct TerminalObserver {
    printed: usize,
    header_shown: bool,
}

impl TerminalObserver {
    fn show_header(&mut self, state: &ConversationState) {
        if !self.header_shown {
            if let Some(msg) = state.messages().last() {
                println!("[{}]", render::message_header(msg));
            }
            self.header_shown = true;
        }
    }
}

impl TurnObserver for TerminalObserver {
    fn on_event(&mut self, event: &StreamEvent, state: &ConversationState) {
        if let StreamEvent::Token { content } = event {
            self.show_header(state);
            print!("{content}");
            let _ = std::io::stdout().flush();
            self.printed += content.len();
        }
    }

    fn on_end(&mut self, _outcome: &TurnOutcome, state: &ConversationState) {
        self.show_header(state);
        if let Some(msg) = state.messages().last() {
            print!("{}", msg.content.get(self.printed..).unwrap_or(&msg.content));
        }
        println!("\n");
    }
}

async fn print_results(client: &StreamingChatClient, sort: CardSort) {
    let state = client.state();
    let results = state.results();
    if results.layout == Layout::Results && !results.cards.is_empty() {
        println!("{}", render::cards(results, sort));
    }
    match client.inline_detail().await {
        Ok(Some(detail)) => println!("{}", render::detail(&detail)),
        Ok(None) => {}
        Err(e) => warn!("Inline detail unavailable: {e}"),
    }
    if let Some(pending) = state.pending_options() {
        println!("{}", render::pending(&pending));
    }
}

fn report_rejection(result: Result<TurnOutcome, AppError>) {
    if let Err(e) = result {
        if e.is_rejection() {
            println!("⚠️  {e}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing on stderr so the chat owns stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "que_morfamos=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // ── Wiring ────────────────────────────────────────────────────────────────
    let config = ApiConfig::from_env()?;
    info!("Using backend at {}", config.base_url);

    let api = ApiClient::new(config)?;
    let board = StatusBoard::new();
    let probe = HealthProbe::new(api.clone(), board.clone()).spawn();
    let mut client = StreamingChatClient::new(api, board.clone());

    // Ctrl-C cancels a running turn; at the prompt it quits.
    let abort = client.abort_handle();
    let quit = Arc::new(Notify::new());
    let quit_tx = quit.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !abort.abort() {
                quit_tx.notify_one();
            }
        }
    });

    println!("🍽️ ¿Qué Morfamos? — Tu IA gastronómica de Neuquén y alrededores\n");
    if let Some(greeting) = client.state().messages().first() {
        println!("{}", render::message(greeting));
    }

    // ── REPL ──────────────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sort = CardSort::default();
    let mut last_report = None;

    loop {
        let report = board.current();
        if last_report != Some(report) {
            println!("{}", render::status_line(&report, client.state()));
            last_report = Some(report);
        }
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = quit.notified() => None,
        };
        let Some(line) = line else { break };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Ask(query) => {
                let mut observer = TerminalObserver::default();
                report_rejection(client.submit_turn_with(&query, &mut observer).await);
                client.prefetch_details();
                print_results(&client, sort).await;
            }
            Command::Legacy(query) => {
                let result = client.submit_turn_legacy(&query).await;
                if let Some(msg) = client.state().messages().last() {
                    println!("{}", render::message(msg));
                }
                report_rejection(result);
                print_results(&client, sort).await;
            }
            Command::Choose(arg) => match arg.parse::<usize>() {
                Ok(n) if n >= 1 => {
                    let mut observer = TerminalObserver::default();
                    report_rejection(client.select_pending_option(n - 1, &mut observer).await);
                    print_results(&client, sort).await;
                }
                _ => println!("⚠️  Indicá el número de la opción, por ejemplo /opcion 2"),
            },
            Command::Tone(arg) => match arg.parse::<Tone>() {
                Ok(tone) => {
                    client.set_tone(tone);
                    println!("Tono: {tone}");
                }
                Err(e) => println!("⚠️  {e}"),
            },
            Command::Detail(name) if name.is_empty() => println!("⚠️  /detalle NOMBRE"),
            Command::Detail(name) => match client.restaurant_detail(&name).await {
                Ok(detail) => println!("{}", render::detail(&detail)),
                Err(e) => {
                    error!("Failed to load details for {name}: {e}");
                    println!("{}", e.user_message());
                }
            },
            Command::Sort(arg) => match arg.parse::<CardSort>() {
                Ok(key) => {
                    sort = key;
                    print_results(&client, sort).await;
                }
                Err(e) => println!("⚠️  {e}"),
            },
            Command::Cards => print_results(&client, sort).await,
            Command::Reset => {
                client.reset();
                if let Some(greeting) = client.state().messages().first() {
                    println!("{}", render::message(greeting));
                }
            }
        }
    }

    probe.abort();
    Ok(())
}

#![cfg_attr(
    all(not(debug_assertions), target_os = "windows"),
    windows_subsystem = "windows"
)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use live_search::app::LiveSearchApp;
use live_search::config::{ClientConfig, DEFAULT_URL};
use live_search::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use live_search::presenter::{derive, PopupPolicy, ViewState};
use live_search::sync::{QuerySynchronizer, ReplyOutcome, ReplyPolicy};

const CLI_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(name = "livesearch")]
#[command(about = "Live search client for a WebSocket search backend")]
struct Args {
    #[arg(default_value = "")]
    query: String,
    #[arg(long, default_value = DEFAULT_URL)]
    url: String,
    /// Hold keystrokes this long before sending; 0 sends every change.
    #[arg(long, default_value_t = 0)]
    debounce_ms: u64,
    /// Tag queries with a sequence number and drop out-of-order replies.
    #[arg(long, default_value_t = false)]
    sequenced: bool,
    #[arg(long, default_value_t = false)]
    popup_requires_results: bool,
    #[arg(long, default_value_t = 5000)]
    reply_timeout_ms: u64,
    #[arg(long, default_value_t = false)]
    cli: bool,
}

impl Args {
    fn to_config(&self) -> ClientConfig {
        ClientConfig {
            url: self.url.clone(),
            debounce: Duration::from_millis(self.debounce_ms),
            reply_policy: if self.sequenced {
                ReplyPolicy::LatestSequence
            } else {
                ReplyPolicy::LastMessageWins
            },
            popup_policy: if self.popup_requires_results {
                PopupPolicy::FocusWithResults
            } else {
                PopupPolicy::FocusOnly
            },
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn wait_until_open(connection: &mut ConnectionManager, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        connection.poll_events();
        match connection.state() {
            ConnectionState::Open => return Ok(()),
            ConnectionState::Errored | ConnectionState::Closed => bail!(
                "failed to connect to {}: {}",
                connection.url(),
                connection.last_error().unwrap_or("connection closed")
            ),
            ConnectionState::Connecting => {}
        }
        if Instant::now() >= deadline {
            bail!("failed to connect to {}: timed out", connection.url());
        }
        thread::sleep(CLI_POLL_INTERVAL);
    }
}

fn print_results(out: &mut impl Write, sync: &QuerySynchronizer, text: &str) -> Result<()> {
    let view = ViewState {
        input_text: text.to_string(),
        popup_open: true,
    };
    let model = derive(&view, sync.results(), text);
    writeln!(out, "results: {}", model.result_count)?;
    for row in &model.rows {
        writeln!(out, "{} - {}", row.name.marked("[", "]"), row.description)?;
    }
    out.flush()?;
    Ok(())
}

fn run_query(
    connection: &mut ConnectionManager,
    sync: &mut QuerySynchronizer,
    text: &str,
    config: &ClientConfig,
    out: &mut impl Write,
) -> Result<()> {
    sync.on_input_changed(connection, text)
        .with_context(|| format!("failed to send query {text:?}"))?;

    let deadline = Instant::now() + config.debounce + config.reply_timeout;
    loop {
        let now = Instant::now();
        sync.tick(connection, now)
            .with_context(|| format!("failed to send query {text:?}"))?;
        for event in connection.poll_events() {
            let outcome = match event {
                ConnectionEvent::Message(payload) => sync.on_message_received(&payload),
                ConnectionEvent::InvalidText(frame) => sync.on_frame_received(&frame),
                ConnectionEvent::StatusChanged(state) if state.is_terminal() => {
                    bail!("connection {state} while waiting for a reply to {text:?}");
                }
                ConnectionEvent::StatusChanged(_) => continue,
            };
            match outcome {
                Ok(ReplyOutcome::Applied { .. }) if sync.next_deadline().is_none() => {
                    return print_results(out, sync, text);
                }
                Ok(_) => {}
                Err(err) => {
                    error!(query = text, error = %err, "reply rejected");
                    return Ok(());
                }
            }
        }
        if now >= deadline {
            warn!(query = text, "no reply before timeout");
            return Ok(());
        }
        thread::sleep(CLI_POLL_INTERVAL);
    }
}

fn run_cli(args: &Args) -> Result<()> {
    let config = args.to_config();
    config.validate()?;

    let mut connection = ConnectionManager::open(&config.url);
    wait_until_open(&mut connection, config.reply_timeout)?;
    let mut sync = QuerySynchronizer::new(config.sync_options());
    let mut out = io::stdout().lock();

    if !args.query.is_empty() {
        run_query(&mut connection, &mut sync, &args.query, &config, &mut out)?;
    }
    for line in io::stdin().lock().lines() {
        let text = line.context("failed to read stdin")?;
        run_query(&mut connection, &mut sync, &text, &config, &mut out)?;
    }

    connection.close();
    Ok(())
}

fn run_gui(args: &Args) -> Result<()> {
    let config = args.to_config();
    config.validate()?;

    let mut native_options = eframe::NativeOptions::default();
    native_options.viewport =
        eframe::egui::ViewportBuilder::default().with_inner_size(eframe::egui::vec2(640.0, 480.0));
    let query = args.query.clone();

    eframe::run_native(
        "Live Search",
        native_options,
        Box::new(move |_cc| {
            let connection = ConnectionManager::open(&config.url);
            Ok(Box::new(LiveSearchApp::new(connection, &config, query)))
        }),
    )
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    if args.cli {
        run_cli(&args)
    } else {
        run_gui(&args)
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use colored::Colorize;
use log::debug;
use url::Url;

use linespeed::client::TransferClient;
use linespeed::errors::Result;
use linespeed::history::{HistoryStore, JsonFileStore};
use linespeed::identity::NetworkIdentity;
use linespeed::measure::{TestConfig, TestEngine};
use linespeed::progress::{BandwidthDirection, ProgressEvent, TestPhase};
use linespeed::results::TestResult;
use linespeed::server::{NetworkConditions, ServerConfig, TestServer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full measurement against a test server (the default).
    Test {
        /// Base URL of the test server.
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server: Url,

        /// Print the final result as JSON instead of live output.
        #[arg(long)]
        json: bool,

        /// Do not append the result to the history file.
        #[arg(long)]
        no_save: bool,

        /// Where the run history is stored.
        #[arg(long, default_value = "linespeed-history.json")]
        history_file: PathBuf,
    },
    /// Host the synthetic test server.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: SocketAddr,

        /// Seed for the shaping RNG, for reproducible envelopes.
        #[arg(long)]
        seed: Option<u64>,

        /// Pin every envelope to a fixed value (exact 50 Mbps download,
        /// 8 Mbps upload).
        #[arg(long)]
        deterministic: bool,
    },
    /// Show or clear the stored run history.
    History {
        /// Erase the stored history.
        #[arg(long)]
        clear: bool,

        /// Where the run history is stored.
        #[arg(long, default_value = "linespeed-history.json")]
        history_file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let command = cli.command.unwrap_or(Command::Test {
        server: default_server_url(),
        json: false,
        no_save: false,
        history_file: PathBuf::from("linespeed-history.json"),
    });

    let outcome = match command {
        Command::Test { server, json, no_save, history_file } => {
            run_test(server, json, no_save, history_file).await
        }
        Command::Serve { bind, seed, deterministic } => {
            run_serve(bind, seed, deterministic).await
        }
        Command::History { clear, history_file } => {
            run_history(clear, history_file)
        }
    };

    if let Err(error) = outcome {
        eprintln!("{} {}", "error:".bright_red().bold(), error);
        std::process::exit(error.exit_code());
    }
}

fn default_server_url() -> Url {
    Url::parse("http://127.0.0.1:3000")
        .unwrap_or_else(|_| unreachable!("default server URL is valid"))
}

async fn run_test(
    server: Url,
    json: bool,
    no_save: bool,
    history_file: PathBuf,
) -> Result<()> {
    let client = TransferClient::new(server);
    let identity =
        NetworkIdentity::fetch(client.http(), client.base_url()).await;

    let engine = TestEngine::new(client, TestConfig::default());
    let events = engine.subscribe();
    let printer = tokio::spawn(print_events(events, json));

    // Ctrl-c abandons the run instead of killing the process mid-phase.
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = engine.run(identity).await;
    drop(engine);
    let _ = printer.await;
    let result = result?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).map_err(|error| {
                linespeed::errors::MeasureError::new(
                    linespeed::errors::ErrorKind::Unknown,
                    "could not serialize result",
                )
                .with_source(error)
            })?
        );
    } else {
        print_summary(&result);
    }

    if !no_save {
        let store = JsonFileStore::new(&history_file);
        let mut history = store.load()?;
        history.record(result);
        store.save(&history)?;
        debug!("history saved to {}", history_file.display());
    }

    Ok(())
}

async fn print_events(
    mut events: tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>,
    json: bool,
) {
    while let Some(event) = events.recv().await {
        if json {
            continue;
        }

        match event {
            ProgressEvent::PhaseChange(TestPhase::Ping) => {
                println!("{}", "Measuring ping...".bold().white());
            }
            ProgressEvent::PhaseChange(TestPhase::Download) => {
                println!("{}", "Testing download speed...".bold().white());
            }
            ProgressEvent::PhaseChange(TestPhase::Upload) => {
                println!("{}", "Testing upload speed...".bold().white());
            }
            ProgressEvent::LatencySample { latency_ms, current, total, .. } => {
                println!(
                    "  probe {}/{}: {}",
                    current,
                    total,
                    format!("{:.1} ms", latency_ms).bright_blue()
                );
            }
            ProgressEvent::SpeedSample {
                direction,
                speed_mbps,
                current,
                total,
            } => {
                let label = match direction {
                    BandwidthDirection::Download => "download",
                    BandwidthDirection::Upload => "upload",
                };
                println!(
                    "  {} {}/{}: {}",
                    label,
                    current,
                    total,
                    format!("{:.2} Mbps", speed_mbps).bright_blue()
                );
            }
            _ => {}
        }
    }
}

fn print_summary(result: &TestResult) {
    println!();
    println!("{} {}", "Server:".bold().white(), result.server.bright_blue());
    println!(
        "{} {} {}",
        "Your IP:".bold().white(),
        result.ip.bright_blue(),
        format!("({})", result.isp).bright_blue()
    );
    println!("{} {:.1} ms", "Latency:".bold().white(), result.ping);
    println!("{} {:.1} ms", "Jitter:".bold().white(), result.jitter);
    println!(
        "{} {}",
        "Download speed:".bold().white(),
        format!("{:.2} Mbps", result.download).bright_cyan()
    );
    println!(
        "{} {}",
        "Upload speed:".bold().white(),
        format!("{:.2} Mbps", result.upload).bright_cyan()
    );
}

async fn run_serve(
    bind: SocketAddr,
    seed: Option<u64>,
    deterministic: bool,
) -> Result<()> {
    let conditions = if deterministic {
        NetworkConditions::deterministic()
    } else {
        NetworkConditions::default()
    };

    let config = ServerConfig { bind, seed, conditions, ..Default::default() };

    TestServer::new(config).serve().await
}

fn run_history(clear: bool, history_file: PathBuf) -> Result<()> {
    let store = JsonFileStore::new(&history_file);

    if clear {
        store.clear()?;
        println!("History cleared.");
        return Ok(());
    }

    let history = store.load()?;

    if history.tests.is_empty() {
        println!("No completed runs yet.");
        return Ok(());
    }

    for result in &history.tests {
        println!(
            "{}  {}  {}  {}  {}",
            result.date.format("%Y-%m-%d %H:%M:%S").to_string().bold().white(),
            format!("ping {:.1} ms", result.ping).bright_blue(),
            format!("jitter {:.1} ms", result.jitter).bright_blue(),
            format!("down {:.2} Mbps", result.download).bright_cyan(),
            format!("up {:.2} Mbps", result.upload).bright_cyan(),
        );
    }

    Ok(())
}

//! Clipglot: clipboard watcher that translates copied foreign text through a
//! locally hosted Ollama backend.
//! Main library: pipeline wiring, console presentation, command parsing.

pub mod cancellation;
pub mod clipboard;
pub mod config;
pub mod metrics;
pub mod monitor;
pub mod scheduler;
pub mod supervisor;
pub mod translate;

use std::io::BufRead;
use std::sync::Arc;

use crossbeam_channel as cb;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use clipboard::{Clipboard, XclipClipboard};
use config::PipelineConfig;
use metrics::MetricsRegistry;
use monitor::ClipboardMonitor;
use scheduler::{PipelineEvent, PresentationEvent, RequestScheduler, SchedulerHandle};
use supervisor::{OllamaBackend, ServiceSupervisor};
use translate::ollama::OllamaClient;

/// A line typed on the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Toggle,
    Model(String),
    Models,
    Recheck,
    Copy,
    Stats,
    Quit,
}

/// Parse one console line. `None` for blank or unknown input.
pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let mut parts = line.trim().splitn(2, char::is_whitespace);
    let head = parts.next()?.to_ascii_lowercase();
    let arg = parts.next().map(str::trim).unwrap_or("");
    match head.as_str() {
        "start" => Some(ConsoleCommand::Start),
        "stop" => Some(ConsoleCommand::Stop),
        "toggle" => Some(ConsoleCommand::Toggle),
        "model" if !arg.is_empty() => Some(ConsoleCommand::Model(arg.to_string())),
        "models" => Some(ConsoleCommand::Models),
        "recheck" | "status" => Some(ConsoleCommand::Recheck),
        "copy" => Some(ConsoleCommand::Copy),
        "stats" => Some(ConsoleCommand::Stats),
        "quit" | "exit" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// Presentation loop: dedicated OS thread printing results as they arrive.
/// Remembers the last translation for `copy`.
fn run_presenter_loop(rx: cb::Receiver<PresentationEvent>, last_translation: Arc<Mutex<Option<String>>>) {
    let spawned = std::thread::Builder::new()
        .name("presenter".into())
        .spawn(move || {
            while let Ok(event) = rx.recv() {
                match event {
                    PresentationEvent::Translation {
                        original,
                        translated,
                        cached,
                    } => {
                        let tag = if cached { " (cached)" } else { "" };
                        println!("\n原文: {original}\n译文{tag}: {translated}\n");
                        *last_translation.lock() = Some(translated);
                    }
                    PresentationEvent::TranslationFailed { text, error } => {
                        let preview: String = text.chars().take(50).collect();
                        println!("翻译失败 [{preview}]: {error}");
                    }
                    PresentationEvent::ServiceStatus(state) => println!("backend: {state}"),
                    PresentationEvent::ServiceProblem(problem) => println!("backend problem: {problem}"),
                    PresentationEvent::ModelsLoaded { models, selected } => {
                        println!("models: {} (selected: {})", models.join(", "), selected.as_deref().unwrap_or("-"));
                    }
                    PresentationEvent::ModelChanged(model) => println!("model: {model}"),
                    PresentationEvent::MonitoringChanged(on) => {
                        println!("monitoring {}", if on { "on" } else { "off" });
                    }
                    PresentationEvent::Copied => println!("copied"),
                }
            }
            info!("presentation channel closed, exiting presenter loop");
        });
    if let Err(e) = spawned {
        error!(error = %e, "failed to spawn presenter thread");
    }
}

/// Reads console commands until EOF or `quit`, forwarding them to the scheduler.
fn run_console_loop(
    handle: SchedulerHandle,
    metrics: Arc<MetricsRegistry>,
    last_translation: Arc<Mutex<Option<String>>>,
) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let Some(command) = parse_command(&line) else {
            if !line.trim().is_empty() {
                println!("commands: start | stop | toggle | model <id> | models | recheck | copy | stats | quit");
            }
            continue;
        };
        let event = match command {
            ConsoleCommand::Start => PipelineEvent::Start,
            ConsoleCommand::Stop => PipelineEvent::Stop,
            ConsoleCommand::Toggle => PipelineEvent::Toggle,
            ConsoleCommand::Model(model) => PipelineEvent::SetModel(model),
            ConsoleCommand::Models => PipelineEvent::RefreshModels,
            ConsoleCommand::Recheck => PipelineEvent::RecheckService,
            ConsoleCommand::Copy => match last_translation.lock().clone() {
                Some(text) => PipelineEvent::CopyResult(text),
                None => {
                    println!("nothing to copy yet");
                    continue;
                }
            },
            ConsoleCommand::Stats => {
                for (name, s) in metrics.summary() {
                    println!(
                        "{name}: n={} p50={:.1}ms p95={:.1}ms p99={:.1}ms",
                        s.count,
                        s.p50_us / 1000.0,
                        s.p95_us / 1000.0,
                        s.p99_us / 1000.0
                    );
                }
                continue;
            }
            ConsoleCommand::Quit => break,
        };
        if !handle.send(event) {
            break;
        }
    }
    handle.send(PipelineEvent::Shutdown);
}

/// Build and run the pipeline until the console is closed.
pub fn run() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("clipglot=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("clipglot starting");

    let config = PipelineConfig::from_env();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("clipglot-rt")
        .build()
        .expect("failed to build tokio runtime");

    let metrics = Arc::new(MetricsRegistry::new());

    let backend = match OllamaBackend::new(&config) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!(error = %e, "backend setup failed");
            return;
        }
    };
    let translator = match OllamaClient::new(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "translation client setup failed");
            return;
        }
    };
    let supervisor = Arc::new(ServiceSupervisor::new(
        backend,
        config.startup_retry,
        config.settle_delay,
        Arc::clone(&metrics),
    ));
    let clipboard: Arc<dyn Clipboard> = Arc::new(XclipClipboard::new());

    let (presenter_tx, presenter_rx) = cb::unbounded();
    let last_translation = Arc::new(Mutex::new(None));
    run_presenter_loop(presenter_rx, Arc::clone(&last_translation));

    let scheduler = RequestScheduler::new(
        &config,
        translator,
        Arc::clone(&supervisor),
        Arc::clone(&clipboard),
        Arc::clone(&metrics),
        presenter_tx,
    );
    let handle = scheduler.handle();

    let monitor = ClipboardMonitor::new(clipboard, handle.gate(), supervisor.subscribe());
    let monitor_handle = match monitor.spawn(config.poll_interval, handle.sender()) {
        Ok(h) => Some(h),
        Err(e) => {
            warn!(error = %e, "clipboard monitor failed to start");
            None
        }
    };

    let scheduler_task = runtime.spawn(scheduler.run());
    info!(backend = %config.backend_url, "clipglot ready, type `start` to begin monitoring");

    run_console_loop(handle, metrics, last_translation);

    if let Err(e) = runtime.block_on(scheduler_task) {
        error!(error = %e, "scheduler task panicked");
    }
    if let Some(h) = monitor_handle {
        h.stop();
    }
    info!("clipglot stopped");
}

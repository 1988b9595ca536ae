use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use whereami_lib::app::AppContext;
use whereami_lib::config::AppSettings;
use whereami_lib::icon::FlagDisplay;
use whereami_lib::popup::{PopupSnapshot, PopupState};
use whereami_lib::refresh::{CycleOutcome, CycleReport};
use whereami_lib::storage::{read_icon_snapshot, IconSnapshot, IconSnapshotSurface};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug)]
struct CliArgs {
    command: String,
    format: OutputFormat,
    lang: Option<String>,
    pretty: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<CycleReport>,
    popup: PopupSnapshot,
}

#[tokio::main]
async fn main() {
    let args = parse_args(std::env::args().skip(1).collect());
    if args.command == "--help" || args.command == "-h" {
        print_help();
        return;
    }
    if args.command == "--version" || args.command == "-V" {
        println!("whereami {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    whereami_lib::init_logging("whereami=info");

    let result = match args.command.as_str() {
        "show" => run_show(args).await,
        "refresh" => run_refresh(args, false).await,
        "click" => run_refresh(args, true).await,
        "watch" => run_watch(args).await,
        "status" => run_status(args),
        _ => Err(format!(
            "Unknown command: {}. Use --help for usage.",
            args.command
        )),
    };

    if let Err(message) = result {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn parse_args(mut argv: Vec<String>) -> CliArgs {
    let mut format = OutputFormat::Text;
    let mut pretty = false;
    let mut lang = None;
    let mut command = String::new();

    if let Some(first) = argv.first() {
        if !first.starts_with('-') {
            command = argv.remove(0);
        }
    }

    if command.is_empty() {
        command = "show".to_string();
    }

    let mut iter = argv.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--format" => {
                if let Some(value) = iter.next() {
                    if value == "json" {
                        format = OutputFormat::Json;
                    } else if value == "text" {
                        format = OutputFormat::Text;
                    }
                }
            }
            "--json" => format = OutputFormat::Json,
            "--pretty" => pretty = true,
            "--lang" => lang = iter.next(),
            "--help" | "-h" | "--version" | "-V" => {
                command = arg;
                break;
            }
            _ => {}
        }
    }

    CliArgs {
        command,
        format,
        lang,
        pretty,
    }
}

fn load_settings(args: &CliArgs) -> Result<AppSettings, String> {
    let mut settings = AppSettings::load().map_err(|err| err.to_string())?;
    if let Some(lang) = args.lang.clone() {
        settings.language = Some(lang);
    }
    Ok(settings)
}

async fn build_context(args: &CliArgs) -> Result<AppContext, String> {
    let settings = load_settings(args)?;
    let dir = settings
        .data_dir()
        .ok_or_else(|| "Could not determine data directory".to_string())?;
    let surface = Arc::new(IconSnapshotSurface::new(dir));
    AppContext::build(settings, surface)
        .await
        .map_err(|err| format!("{err:#}"))
}

/// Longest wait for the first lookup when nothing is cached
fn first_lookup_timeout(settings: &AppSettings) -> Duration {
    settings.request_timeout() + Duration::from_secs(5)
}

async fn run_show(args: CliArgs) -> Result<(), String> {
    let context = build_context(&args).await?;
    let running = context.serve();
    let mut popup = context.popup(running.handle.clone());

    if matches!(popup.open().await, PopupState::Loading { .. }) {
        let timeout = first_lookup_timeout(&context.settings);
        if tokio::time::timeout(timeout, popup.next_change()).await.is_err() {
            tracing::warn!("No location after {}s", timeout.as_secs());
        }
    }

    print_popup(&args, &popup.snapshot())
}

async fn run_refresh(args: CliArgs, click: bool) -> Result<(), String> {
    let context = build_context(&args).await?;
    let report = if click {
        context.coordinator.handle_click().await
    } else {
        context.coordinator.refresh_cycle().await.map(Some)
    }
    .map_err(|err| err.to_string())?;

    let running = context.serve();
    let mut popup = context.popup(running.handle.clone());
    popup.open().await;
    let payload = RefreshPayload {
        report,
        popup: popup.snapshot(),
    };

    match args.format {
        OutputFormat::Text => {
            println!("{}", render_report_text(payload.report.as_ref()));
            println!();
            println!("{}", render_popup_text(&payload.popup));
            Ok(())
        }
        OutputFormat::Json => print_json(&payload, args.pretty),
    }
}

async fn run_watch(args: CliArgs) -> Result<(), String> {
    let context = build_context(&args).await?;
    let running = context.start().await.map_err(|err| format!("{err:#}"))?;
    let mut popup = context.popup(running.handle.clone());

    popup.open().await;
    print_popup(&args, &popup.snapshot())?;

    loop {
        let changed = tokio::select! {
            change = popup.next_change() => change.is_some(),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stopping");
                false
            }
        };
        if !changed {
            break;
        }
        print_popup(&args, &popup.snapshot())?;
    }
    Ok(())
}

fn run_status(args: CliArgs) -> Result<(), String> {
    let settings = load_settings(&args)?;
    let dir = settings
        .data_dir()
        .ok_or_else(|| "Could not determine data directory".to_string())?;
    let snapshot = read_icon_snapshot(&dir)
        .ok_or_else(|| format!("No icon state in {}. Run `whereami refresh` first.", dir.display()))?;

    match args.format {
        OutputFormat::Text => {
            println!("{}", render_status_text(&snapshot));
            Ok(())
        }
        OutputFormat::Json => print_json(&snapshot, args.pretty),
    }
}

fn print_popup(args: &CliArgs, snapshot: &PopupSnapshot) -> Result<(), String> {
    match args.format {
        OutputFormat::Text => {
            println!("{}", render_popup_text(snapshot));
            Ok(())
        }
        OutputFormat::Json => print_json(snapshot, args.pretty),
    }
}

fn render_popup_text(snapshot: &PopupSnapshot) -> String {
    let labels = &snapshot.labels;
    let mut lines = Vec::new();
    lines.push(format!("== {} ==", snapshot.title));
    match &snapshot.state {
        PopupState::Loading { message } | PopupState::Error { message } => {
            lines.push(message.clone());
        }
        PopupState::Details(details) => {
            let mut country = details.country.clone();
            if let Some(warning) = details.partial_warning.as_ref() {
                country.push(' ');
                country.push_str(warning);
            }
            lines.push(format!("{country} ({})", details.country_code));
            lines.push(format!("{}: {}", labels.ip_address, details.ip));
            lines.push(format!("{}: {}", labels.city, details.city));
            lines.push(format!("{}: {}", labels.region, details.region));
            lines.push(format!("{}: {}", labels.last_update, details.last_update));
            match &details.flag {
                FlagDisplay::Image(path) => lines.push(format!("Flag: {}", path.display())),
                FlagDisplay::Placeholder(text) => lines.push(format!("Flag: [{text}]")),
            }
        }
    }
    lines.join("\n")
}

fn render_report_text(report: Option<&CycleReport>) -> String {
    let Some(report) = report else {
        return "Location is fresh, not refreshed".to_string();
    };
    let outcome = match &report.outcome {
        CycleOutcome::Success { partial: false } => "location updated".to_string(),
        CycleOutcome::Success { partial: true } => "location updated (partial data)".to_string(),
        CycleOutcome::Failure { error_state } => format!("lookup failed ({})", error_state.as_str()),
        CycleOutcome::Superseded => "result dropped, a newer one is stored".to_string(),
    };
    match report.tier {
        Some(tier) => format!("Cycle {}: {outcome}, icon {tier:?}", report.cycle),
        None => format!("Cycle {}: {outcome}", report.cycle),
    }
}

fn render_status_text(snapshot: &IconSnapshot) -> String {
    let mut lines = Vec::new();
    lines.push("== Icon ==".to_string());
    if let Some(file) = snapshot.icon_file.as_ref() {
        lines.push(format!("Image: {file}"));
    }
    match (snapshot.badge_text.as_ref(), snapshot.badge_color.as_ref()) {
        (Some(text), Some(color)) => lines.push(format!("Badge: {text} ({color})")),
        (Some(text), None) => lines.push(format!("Badge: {text}")),
        _ => lines.push("Badge: none".to_string()),
    }
    if let Some(tooltip) = snapshot.tooltip.as_ref() {
        lines.push(format!("Tooltip: {}", tooltip.replace('\n', " | ")));
    }
    lines.push(format!("Updated: {}", snapshot.updated_at));
    lines.join("\n")
}

fn print_json<T: Serialize>(payload: &T, pretty: bool) -> Result<(), String> {
    let output = if pretty {
        serde_json::to_string_pretty(payload)
    } else {
        serde_json::to_string(payload)
    }
    .map_err(|err| err.to_string())?;
    println!("{output}");
    Ok(())
}

fn print_help() {
    println!(
        "whereami {}\n\nUsage:\n  whereami show [--format text|json] [--pretty] [--lang <id>]\n  whereami refresh [--format text|json] [--pretty] [--lang <id>]\n  whereami click [--format text|json] [--pretty]\n  whereami watch [--format text|json] [--lang <id>]\n  whereami status [--format text|json] [--pretty]\n\nCommands:\n  show     Print the cached location, looking it up if nothing is cached\n  refresh  Look up the location now\n  click    Look up the location only if the cached one is stale\n  watch    Keep refreshing on a timer and print every change\n  status   Print the last rendered icon state\n\nFlags:\n  --format <text|json>  Output format\n  --json               Shortcut for --format json\n  --pretty             Pretty-print JSON output\n  --lang <id>          Message language (en-US, fr, zh-CN)\n  -h, --help           Show help\n  -V, --version        Show version",
        env!("CARGO_PKG_VERSION")
    );
}

mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::Path;
use std::process;

use anyhow::{anyhow, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{CategoryCommand, Cli, Commands, FolderCommand, ModelCommand, ResultsArgs, StatsArgs};
use cue_sentry_core::classify::severity::parse_severity_label;
use cue_sentry_core::classify::{ModelConfig, Severity, SeverityMapping};
use cue_sentry_core::config::CategorySeed;
use cue_sentry_core::storage::models::{MediaFile, NewModel, ResultFilter};
use cue_sentry_core::storage::Database;
use cue_sentry_core::{AppConfig, Control, Pipeline, Shutdown, WorkerMode};
use dotenv::dotenv;
use progress::{paint_severity, CliReporter};
use tracing::{error, info};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    let config = match cue_sentry_core::config::load_configuration(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return;
    };

    if let Err(err) = dispatch(command, config) {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn dispatch(command: Commands, config: AppConfig) -> anyhow::Result<()> {
    match command {
        Commands::PrintConfig => {
            let rendered = serde_json::to_string_pretty(&config)?;
            println!("{}", rendered);
            Ok(())
        }
        Commands::TruncateDb => truncate_db(&config),
        command => {
            let pipeline = Pipeline::open(config).context("pipeline startup failed")?;
            pipeline.bootstrap()?;
            run_command(command, &pipeline)
        }
    }
}

fn run_command(command: Commands, pipeline: &Pipeline) -> anyhow::Result<()> {
    let control = pipeline.control();
    match command {
        Commands::Run => {
            let shutdown = install_shutdown()?;
            let reporter = CliReporter::new();
            pipeline.run(&shutdown, &reporter)?;
            info!("Pipeline stopped");
        }
        Commands::Scan => {
            let reporter = CliReporter::new();
            match pipeline.scan_once(&Shutdown::new(), &reporter)? {
                Some(stats) => info!(
                    "{} files checked, {} queued",
                    stats.files_seen,
                    format!("{}", stats.files_enqueued).cyan()
                ),
                None => info!("Pipeline is stopped; run `cue-sentry start` to resume"),
            }
        }
        Commands::Work { drain } => {
            let shutdown = install_shutdown()?;
            let mode = if drain {
                WorkerMode::Drain
            } else {
                WorkerMode::Continuous
            };
            let handled = pipeline.work(mode, &shutdown, &CliReporter::new())?;
            info!("{} jobs handled", format!("{}", handled).cyan());
        }
        Commands::Folder { action } => run_folder(action, &control)?,
        Commands::Model { action } => run_model(action, &control)?,
        Commands::Categories { action } => {
            run_categories(action.unwrap_or(CategoryCommand::List), &control)?
        }
        Commands::Rescan { target } => {
            let file = resolve_file(&control, &target)?;
            let job = control.rescan(file.id)?;
            info!("{} queued ({})", file.path, job.job_id);
        }
        Commands::Override {
            target,
            score,
            severity,
            notes,
        } => {
            let file = resolve_file(&control, &target)?;
            let severity = parse_severity_label(&severity)?;
            let result = control.override_result(file.id, score, severity, &notes)?;
            info!(
                "Result {} now {:.1} / {}",
                result.id,
                result.overall_risk_score,
                paint_severity(result.highest_severity)
            );
        }
        Commands::EditTrigger {
            id,
            severity,
            confidence,
        } => {
            let severity = severity
                .map(|s| s.parse::<Severity>())
                .transpose()?;
            let trigger = control.update_trigger(id, severity, confidence)?;
            info!(
                "Trigger {} now {} at {:.2}",
                trigger.id, trigger.severity, trigger.confidence_score
            );
        }
        Commands::Start => control.start()?,
        Commands::Stop => control.stop()?,
        Commands::Status => {
            let status = control.status()?;
            println!("Queue depth:   {}", status.queue_depth);
            println!(
                "Control:       {}",
                status
                    .control
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
            println!(
                "Last activity: {}",
                status.last_activity.as_deref().unwrap_or("never")
            );
            for (state, count) in status.status_counts {
                println!("  {:<11} {}", state.to_string(), count);
            }
        }
        Commands::Stats(args) => print_stats(&args, pipeline)?,
        Commands::Result { target, history } => {
            let file = resolve_file(&control, &target)?;
            if history {
                print_history(&control, &file)?;
            } else {
                print_report(&control, &file)?;
            }
        }
        Commands::Results(args) => print_results(&args, &control)?,
        Commands::PrintConfig | Commands::TruncateDb => {
            return Err(anyhow!("command does not need a running pipeline"))
        }
    }
    Ok(())
}

fn install_shutdown() -> anyhow::Result<Shutdown> {
    let shutdown = Shutdown::new();
    let handle = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("Shutting down after in-flight work...");
        handle.trigger();
    })
    .context("could not install Ctrl-C handler")?;
    Ok(shutdown)
}

fn run_folder(action: FolderCommand, control: &Control) -> anyhow::Result<()> {
    match action {
        FolderCommand::Add { path, priority } => {
            let path = absolute(&path);
            let folder = control.add_folder(&path, priority)?;
            info!("Folder {} added (priority {})", folder.path, folder.priority);
        }
        FolderCommand::Remove { path } => control.remove_folder(&absolute(&path))?,
        FolderCommand::Enable { path } => control.set_folder_active(&absolute(&path), true)?,
        FolderCommand::Disable { path } => control.set_folder_active(&absolute(&path), false)?,
        FolderCommand::List => {
            for f in control.list_folders()? {
                let state = if f.active { "active".green() } else { "inactive".dimmed() };
                println!("{:>4}  {:<60} priority {:<3} [{}]", f.id, f.path, f.priority, state);
            }
        }
    }
    Ok(())
}

fn run_model(action: ModelCommand, control: &Control) -> anyhow::Result<()> {
    match action {
        ModelCommand::Add {
            identifier,
            name,
            categories,
            weight,
            config,
        } => {
            let config = read_model_config(config)?;
            let model = control.add_model(&NewModel {
                name: name.unwrap_or_else(|| identifier.clone()),
                identifier,
                categories,
                weight,
                config,
            })?;
            info!("Model {} registered as id {}", model.identifier, model.id);
        }
        ModelCommand::Enable { id } => control.set_model_active(id, true)?,
        ModelCommand::Disable { id } => control.set_model_active(id, false)?,
        ModelCommand::Update {
            id,
            identifier,
            name,
            categories,
            weight,
            config,
        } => {
            let current = control
                .list_models()?
                .into_iter()
                .find(|m| m.id == id)
                .ok_or_else(|| anyhow!("no model with id {}", id))?;
            let config = match config {
                Some(raw) => read_model_config(raw)?,
                None => current.config,
            };
            let model = control.update_model(
                id,
                &NewModel {
                    name: name.unwrap_or(current.name),
                    identifier: identifier.unwrap_or(current.identifier),
                    categories: categories.unwrap_or(current.categories),
                    weight: weight.unwrap_or(current.weight),
                    config,
                },
            )?;
            info!("Model {} updated; it reloads on the next scanner tick", model.identifier);
        }
        ModelCommand::Reload { id } => control.reload_model(id)?,
        ModelCommand::List => {
            for m in control.list_models()? {
                let state = if m.active { "active".green() } else { "inactive".dimmed() };
                println!(
                    "{:>4}  {:<32} {:<8} w={:.2} [{}] {} {}",
                    m.id,
                    m.identifier,
                    m.task_type,
                    m.weight,
                    m.categories.join(","),
                    m.status,
                    state
                );
                if let Some(err) = m.error_message {
                    println!("      {}", err.red());
                }
            }
        }
    }
    Ok(())
}

/// `--config` takes JSON inline or a path to a JSON file.
fn read_model_config(config: String) -> anyhow::Result<ModelConfig> {
    let raw = if Path::new(&config).is_file() {
        std::fs::read_to_string(&config)?
    } else {
        config
    };
    serde_json::from_str(&raw).context("model config is not valid JSON")
}

fn run_categories(action: CategoryCommand, control: &Control) -> anyhow::Result<()> {
    match action {
        CategoryCommand::List => {
            for c in control.list_categories()? {
                let state = if c.active { "active".green() } else { "inactive".dimmed() };
                println!(
                    "{:<18} {:<20} mild {:.2}  moderate {:.2}  severe {:.2}  [{}]",
                    c.name,
                    c.display_name,
                    c.severity_mapping.mild,
                    c.severity_mapping.moderate,
                    c.severity_mapping.severe,
                    state
                );
            }
        }
        CategoryCommand::Set {
            name,
            display_name,
            description,
            threshold,
            mild,
            moderate,
            severe,
            enable,
            disable,
        } => {
            let mut category = match control
                .list_categories()?
                .into_iter()
                .find(|c| c.name == name)
            {
                Some(existing) => existing,
                None => CategorySeed::new(&name, &name, "").to_category()?,
            };
            if let Some(v) = display_name {
                category.display_name = v;
            }
            if let Some(v) = description {
                category.description = v;
            }
            if let Some(v) = threshold {
                category.default_threshold = v;
            }
            let cuts = category.severity_mapping;
            category.severity_mapping = SeverityMapping {
                mild: mild.unwrap_or(cuts.mild),
                moderate: moderate.unwrap_or(cuts.moderate),
                severe: severe.unwrap_or(cuts.severe),
            };
            if enable || disable {
                category.active = enable;
            }
            control.update_category(&category)?;
            info!("Category {} saved; it applies from the next scanner tick", category.name);
        }
    }
    Ok(())
}

fn absolute(path: &str) -> String {
    std::fs::canonicalize(path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_string())
}

fn resolve_file(control: &Control, target: &str) -> anyhow::Result<MediaFile> {
    if let Ok(id) = target.parse::<i64>() {
        return Ok(control.file(id)?);
    }
    control
        .file_by_path(&absolute(target))
        .or_else(|_| control.file_by_path(target))
        .map_err(|_| anyhow!("no file known at {}", target))
}

fn format_ms(ms: i64) -> String {
    let (h, rem) = (ms / 3_600_000, ms % 3_600_000);
    let (m, rem) = (rem / 60_000, rem % 60_000);
    format!("{:02}:{:02}:{:02}.{:03}", h, m, rem / 1000, rem % 1000)
}

fn print_report(control: &Control, file: &MediaFile) -> anyhow::Result<()> {
    let report = control.report(file.id)?;
    println!("{} [{}]", report.file.path.bold(), report.file.scan_status);
    if let Some(err) = &report.file.error_message {
        println!("  error: {}", err.red());
    }
    let Some(result) = report.latest else {
        println!("  no results yet");
        return Ok(());
    };
    println!(
        "  scanned {} with {} in {} ms",
        result.scan_date, result.model_version, result.processing_time_ms
    );
    println!(
        "  risk {:.1}, highest {}, {} triggers{}",
        result.overall_risk_score,
        paint_severity(result.highest_severity),
        result.total_triggers,
        if result.is_overridden() { " (overridden)".magenta().to_string() } else { String::new() }
    );
    for t in report.triggers {
        println!(
            "  {} - {}  {:<16} {:<9} {:.2}  {}",
            format_ms(t.timestamp_start_ms),
            format_ms(t.timestamp_end_ms),
            t.category,
            paint_severity(Some(t.severity)),
            t.confidence_score,
            t.subtitle_text
        );
    }
    Ok(())
}

fn print_history(control: &Control, file: &MediaFile) -> anyhow::Result<()> {
    println!("{} [{}]", file.path.bold(), file.scan_status);
    for result in control.history(file.id)? {
        println!(
            "  #{:<6} {}  {:<16} risk {:>5.1}  {:<9} {} triggers{}",
            result.id,
            result.scan_date,
            result.model_version,
            result.overall_risk_score,
            paint_severity(result.highest_severity),
            result.total_triggers,
            if result.is_overridden() { " (overridden)".magenta().to_string() } else { String::new() }
        );
    }
    Ok(())
}

fn print_results(args: &ResultsArgs, control: &Control) -> anyhow::Result<()> {
    let severity = args
        .severity
        .as_deref()
        .map(|s| s.parse::<Severity>())
        .transpose()?;
    let filter = ResultFilter {
        severity,
        category: args.category.clone(),
    };
    let page = control.list_results(&filter, args.page, args.limit)?;
    for row in &page.rows {
        println!(
            "{:>5}  {:>5.1}  {:<9} {:>4} triggers  {}",
            row.file.id,
            row.result.overall_risk_score,
            paint_severity(row.result.highest_severity),
            row.result.total_triggers,
            row.file.path
        );
    }
    println!(
        "page {} of {} ({} files)",
        page.page,
        page.total_pages.max(1),
        page.total
    );
    Ok(())
}

fn print_stats(args: &StatsArgs, pipeline: &Pipeline) -> anyhow::Result<()> {
    let store = pipeline.store();
    let overview = store.overview()?;
    println!(
        "{} files, {} scanned, {} triggers, average risk {:.1}",
        overview.total_files,
        overview.scanned_files,
        overview.total_triggers,
        overview.average_risk_score
    );
    for c in store.category_counts()? {
        println!("  {:<18} {:<9} {}", c.category, paint_severity(Some(c.severity)), c.count);
    }
    let timeline = store.timeline(args.days)?;
    for day in &timeline {
        println!("  {}  {:>5} files  {:>5} triggers", day.date, day.files_scanned, day.triggers_found);
    }

    if let Some(path) = &args.csv {
        let mut writer = csv::Writer::from_path(path)?;
        for day in &timeline {
            writer.serialize(day)?;
        }
        writer.flush()?;
        info!("Timeline written to {}", path);
    }
    Ok(())
}

fn truncate_db(config: &AppConfig) -> anyhow::Result<()> {
    if !prompt_confirm(
        "Are you SURE you want to delete every file, result and trigger?",
        Some(false),
    )? {
        return Ok(());
    }
    let db = Database::open(&config.database_path)?;
    db.truncate_all()?;
    println!("Files, results and triggers truncated");
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}

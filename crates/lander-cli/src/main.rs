use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lander_contracts::catalog::{FallbackOrder, ProviderCatalog};
use lander_contracts::filenames::sanitize_filename;
use lander_contracts::runs::summary::RunSummary;
use lander_contracts::settings::SettingsStore;
use lander_contracts::slots::{parse_slot_list, ImageSlot};
use lander_engine::prompts::EnrichmentClient;
use lander_engine::providers::default_provider_registry;
use lander_engine::{EngineConfig, LandingEngine, PromptBuilder, RunMode, SlotOutcome};

const EXIT_PARTIAL: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "lander", version, about = "Landing page image asset generator")]
struct Cli {
    /// Settings file (defaults to ~/.lander/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate the image set for a business theme.
    Generate(GenerateArgs),
    /// Print the prompt each slot would use.
    Prompts(PromptsArgs),
    /// List known providers and whether they are usable.
    Providers(ProvidersArgs),
    /// Show or edit saved settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    theme: String,
    /// Parent directory; assets land in a subdirectory named after the theme.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Write straight into --out instead of a per-theme subdirectory.
    #[arg(long)]
    flat: bool,
    #[arg(long)]
    parallel: bool,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Comma separated slots, e.g. `main,about1,favicon`.
    #[arg(long, default_value = "")]
    slots: String,
    /// Try this provider first for every slot it can serve.
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    order: Option<FallbackOrder>,
    #[arg(long)]
    placeholder: bool,
    /// Rewrite prompts with the local LLM and retry missing slots with them.
    #[arg(long)]
    enrich: bool,
}

#[derive(Debug, Parser)]
struct PromptsArgs {
    #[arg(long)]
    theme: String,
    #[arg(long, default_value = "")]
    slots: String,
    #[arg(long)]
    enrich: bool,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ProvidersArgs {
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum SettingsCommand {
    Show,
    AddCountry { country: String },
    RemoveCountry { country: String },
    ClearHistory,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lander error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let settings_path = match cli.settings {
        Some(path) => path,
        None => SettingsStore::default_path().context("cannot locate a home directory")?,
    };
    let mut settings = SettingsStore::load(settings_path);
    match cli.command {
        Command::Generate(args) => run_generate(args, &mut settings),
        Command::Prompts(args) => run_prompts(args),
        Command::Providers(args) => run_providers(args),
        Command::Settings(command) => run_settings(command, &mut settings),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn parse_slots(raw: &str) -> Result<Vec<ImageSlot>> {
    parse_slot_list(raw).map_err(anyhow::Error::msg)
}

fn output_dir_for(parent: &Path, theme: &str, flat: bool) -> PathBuf {
    if flat {
        parent.to_path_buf()
    } else {
        parent.join(sanitize_filename(theme))
    }
}

fn exit_code_for(summary: &RunSummary) -> i32 {
    if summary.is_complete() {
        0
    } else {
        EXIT_PARTIAL
    }
}

fn progress_line(outcome: &SlotOutcome, produced: usize, total: usize) -> String {
    match &outcome.asset {
        Some(asset) => format!(
            "[{produced}/{total}] {:<8} {} ({:.1} KB, q{}{})",
            outcome.slot.id(),
            asset.provider,
            asset.bytes as f64 / 1024.0,
            asset.quality,
            if asset.within_budget { "" } else { ", over budget" },
        ),
        None => {
            let tried = outcome
                .failures
                .iter()
                .map(|failure| format!("{}: {}", failure.provider, failure.kind))
                .collect::<Vec<_>>();
            let detail = if tried.is_empty() {
                "no provider available".to_string()
            } else {
                tried.join(", ")
            };
            format!(
                "[{produced}/{total}] {:<8} missing ({detail})",
                outcome.slot.id()
            )
        }
    }
}

fn run_generate(args: GenerateArgs, settings: &mut SettingsStore) -> Result<i32> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        if workers == 0 {
            bail!("--workers must be at least 1");
        }
        config.workers = workers;
    }
    if let Some(order) = args.order {
        config.fallback_order = order;
    }
    config.placeholder |= args.placeholder;
    config.enrichment.enabled |= args.enrich;

    let slots = parse_slots(&args.slots)?;
    let parent = match args.out {
        Some(out) => out,
        None => settings
            .settings()
            .last_save_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let out_dir = output_dir_for(&parent, &args.theme, args.flat);
    let mode = if args.parallel {
        RunMode::Parallel {
            workers: config.workers,
        }
    } else {
        RunMode::Sequential
    };

    let engine = LandingEngine::with_default_providers(&out_dir, &args.theme, &config)?
        .with_requested_provider(args.provider);
    println!(
        "Generating {} slot(s) for '{}' into {} ({})",
        slots.len(),
        engine.theme(),
        out_dir.display(),
        engine.run_id()
    );

    let total = slots.len();
    let mut report = |outcome: &SlotOutcome, produced: usize| {
        println!("{}", progress_line(outcome, produced, total));
        for err in &outcome.event_errors {
            eprintln!("lander warning: event log write failed ({err})");
        }
    };
    let builder = PromptBuilder::new(EnrichmentClient::new(config.enrichment.clone()));
    let outcomes = engine.run_with_enrichment(
        &builder,
        &slots,
        mode,
        config.second_pass_wait(),
        &mut report,
    )?;
    let summary = engine.finish(&outcomes)?;

    settings.record_theme(&args.theme)?;
    settings.set_last_save_path(&parent)?;

    println!("{}", summary.tally());
    if !summary.missing.is_empty() {
        let missing = summary
            .missing
            .iter()
            .map(|slot| slot.id())
            .collect::<Vec<_>>()
            .join(", ");
        eprintln!("Missing slots: {missing}");
    }
    Ok(exit_code_for(&summary))
}

fn run_prompts(args: PromptsArgs) -> Result<i32> {
    let mut config = load_config(args.config.as_deref())?;
    config.enrichment.enabled |= args.enrich;
    let slots = parse_slots(&args.slots)?;
    let builder = PromptBuilder::new(EnrichmentClient::new(config.enrichment));
    for (slot, prompt) in builder.build_all(&args.theme, &slots).iter() {
        println!(
            "{:<8} ({:>3}/{:>3}) {prompt}",
            slot.id(),
            prompt.chars().count(),
            slot.prompt_budget()
        );
    }
    Ok(0)
}

fn run_providers(args: ProvidersArgs) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let registry = default_provider_registry(&config)?;
    let registered = registry.list();
    let catalog = ProviderCatalog::default();
    for spec in catalog.list() {
        let status = if !registered.contains(&spec.name) {
            "disabled".to_string()
        } else {
            match &spec.credential_env {
                Some(env) if !has_credential(&config, &spec.name) => format!("needs {env}"),
                _ => "ready".to_string(),
            }
        };
        let roles = spec
            .roles
            .iter()
            .map(|role| format!("{role:?}").to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<13} {:<12} {:<26} {}{}",
            spec.name,
            format!("{:?}", spec.kind).to_ascii_lowercase(),
            roles,
            status,
            if spec.watermarked { " (watermarked)" } else { "" }
        );
    }
    println!("fallback order: {}", config.fallback_order);
    Ok(0)
}

fn has_credential(config: &EngineConfig, provider: &str) -> bool {
    let providers = &config.providers;
    let provider_config = match provider {
        "huggingface" => &providers.huggingface,
        "pexels" => &providers.pexels,
        "pixabay" => &providers.pixabay,
        _ => return true,
    };
    provider_config.api_key().is_some()
}

fn run_settings(command: SettingsCommand, settings: &mut SettingsStore) -> Result<i32> {
    match command {
        SettingsCommand::Show => {
            println!("{}", serde_json::to_string_pretty(settings.settings())?);
        }
        SettingsCommand::AddCountry { country } => {
            if settings.add_favorite_country(&country)? {
                println!("Added {}", country.trim());
            } else {
                println!("{} is already a favorite", country.trim());
            }
        }
        SettingsCommand::RemoveCountry { country } => {
            if settings.remove_favorite_country(&country)? {
                println!("Removed {}", country.trim());
            } else {
                println!("{} is not a favorite", country.trim());
            }
        }
        SettingsCommand::ClearHistory => {
            settings.clear_theme_history()?;
            println!("Theme history cleared");
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use clap::Parser;
    use lander_contracts::catalog::FallbackOrder;
    use lander_contracts::runs::assets::GeneratedAsset;
    use lander_contracts::runs::summary::RunSummary;
    use lander_contracts::settings::SettingsStore;
    use lander_contracts::slots::ImageSlot;
    use lander_engine::fallback::FailedAttempt;
    use lander_engine::SlotOutcome;

    use super::{
        exit_code_for, output_dir_for, progress_line, run_settings, Cli, Command, SettingsCommand,
    };

    fn summary(produced: u64) -> RunSummary {
        RunSummary {
            run_id: "run-test".to_string(),
            theme: "bakery".to_string(),
            started_at: String::new(),
            finished_at: String::new(),
            requested: 8,
            produced,
            assets: Vec::new(),
            missing: Vec::new(),
        }
    }

    #[test]
    fn generate_flags_parse() {
        let cli = Cli::try_parse_from([
            "lander",
            "generate",
            "--theme",
            "coffee shop",
            "--parallel",
            "--workers",
            "4",
            "--order",
            "stock-first",
            "--slots",
            "main,favicon",
        ])
        .unwrap();
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.theme, "coffee shop");
        assert!(args.parallel);
        assert_eq!(args.workers, Some(4));
        assert_eq!(args.order, Some(FallbackOrder::StockFirst));
        assert_eq!(args.slots, "main,favicon");
    }

    #[test]
    fn theme_becomes_safe_subdirectory() {
        assert_eq!(
            output_dir_for(Path::new("/tmp/sites"), "Café: \"Best\" Coffee?", false),
            PathBuf::from("/tmp/sites").join("Café_Best_Coffee")
        );
        assert_eq!(
            output_dir_for(Path::new("/tmp/sites"), "anything", true),
            PathBuf::from("/tmp/sites")
        );
    }

    #[test]
    fn partial_runs_exit_with_two() {
        assert_eq!(exit_code_for(&summary(8)), 0);
        assert_eq!(exit_code_for(&summary(7)), 2);
    }

    #[test]
    fn progress_lines_describe_outcome() {
        let produced = SlotOutcome {
            slot: ImageSlot::About1,
            prompt_hash: "abcd1234".to_string(),
            asset: Some(GeneratedAsset {
                slot: ImageSlot::About1,
                path: PathBuf::from("about1.jpg"),
                bytes: 2048,
                mime: "image/jpeg".to_string(),
                provider: "pexels".to_string(),
                width: 800,
                height: 600,
                quality: 85,
                within_budget: true,
            }),
            failures: Vec::new(),
            event_errors: Vec::new(),
        };
        assert_eq!(
            progress_line(&produced, 1, 8),
            "[1/8] about1   pexels (2.0 KB, q85)"
        );

        let missing = SlotOutcome {
            slot: ImageSlot::Main,
            prompt_hash: "abcd1234".to_string(),
            asset: None,
            failures: vec![FailedAttempt {
                provider: "pollinations".to_string(),
                kind: "transport",
                message: "timed out".to_string(),
            }],
            event_errors: Vec::new(),
        };
        assert_eq!(
            progress_line(&missing, 1, 8),
            "[1/8] main     missing (pollinations: transport)"
        );
    }

    #[test]
    fn settings_commands_persist() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("settings.json");
        let mut store = SettingsStore::load(&path);
        run_settings(
            SettingsCommand::AddCountry {
                country: "Portugal".to_string(),
            },
            &mut store,
        )?;
        let reloaded = SettingsStore::load(&path);
        assert_eq!(reloaded.settings().favorite_countries, vec!["Portugal"]);
        Ok(())
    }
}

//! TraitForge CLI - inspect and edit a project directory
//!
//! Commands: sets, validate, check, order, equalize, add-set, delete-set, manifest
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when a validation or legality check fails

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use traitforge_core::{EngineConfig, JsonDirBackend, Project, Selection, SetId};

#[derive(Parser)]
#[command(name = "traitforge-cli")]
#[command(about = "TraitForge CLI - trait configuration for layered collections")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the project directory
    #[arg(short, long, default_value = ".")]
    project_dir: PathBuf,

    /// Optional engine config (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List sets in order
    Sets,

    /// Validate rarity and rules
    Validate {
        /// Set number, all sets when omitted
        #[arg(short, long)]
        set: Option<u32>,
    },

    /// Check whether a trait may join a selection
    Check {
        #[arg(short, long)]
        set: u32,

        #[arg(short, long)]
        layer: String,

        #[arg(short, long = "trait")]
        trait_name: String,

        /// Already selected traits as LAYER=TRAIT
        #[arg(long = "select", value_parser = parse_pair)]
        selected: Vec<(String, String)>,
    },

    /// Print the compositing order of a selection
    Order {
        #[arg(short, long)]
        set: u32,

        #[arg(long = "select", value_parser = parse_pair)]
        selected: Vec<(String, String)>,
    },

    /// Equalize one layer, or all layers, of a set
    Equalize {
        #[arg(short, long)]
        set: u32,

        #[arg(short, long)]
        layer: Option<String>,
    },

    /// Add a set with default weights
    AddSet,

    /// Delete a set (never the last one)
    DeleteSet {
        number: u32,
    },

    /// Summarize the project configuration
    Manifest,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(l, t)| !l.is_empty() && !t.is_empty())
        .map(|(l, t)| (l.to_string(), t.to_string()))
        .ok_or_else(|| format!("expected LAYER=TRAIT, got {}", raw))
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to render output: {}", e),
    }
}

fn fail(error: impl std::fmt::Display) -> ExitCode {
    print_json(&serde_json::json!({ "success": false, "error": error.to_string() }));
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(c) => c,
            Err(e) => return fail(format!("Failed to load config: {}", e)),
        },
        None => EngineConfig::default(),
    };

    let backend = JsonDirBackend::new(&cli.project_dir);
    let mut project = match Project::load(&backend, config).await {
        Ok(p) => p,
        Err(e) => return fail(format!("Failed to load project: {}", e)),
    };

    match cli.command {
        Commands::Sets => {
            let active = project.active_set();
            let sets: Vec<_> = project
                .sets()
                .ordered_sets()
                .iter()
                .map(|s| {
                    let is_active = &s.id == active;
                    serde_json::json!({
                        "id": s.id,
                        "name": s.display_name(),
                        "nftCount": s.nft_count,
                        "createdAt": s.created_at,
                        "active": is_active,
                    })
                })
                .collect();
            print_json(&serde_json::json!(sets));
            ExitCode::SUCCESS
        }

        Commands::Validate { set } => {
            let id = set.map(SetId::from_number);
            match project.validate(id.as_ref()) {
                Ok(result) => {
                    print_json(&serde_json::json!(result));
                    if result.valid {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(2)
                    }
                }
                Err(e) => fail(e),
            }
        }

        Commands::Check { set, layer, trait_name, selected } => {
            let id = SetId::from_number(set);
            let selection: Selection = selected.into_iter().collect();
            let order = match project.ordered_layers(&id) {
                Ok(o) => o,
                Err(e) => return fail(e),
            };
            let resolver = project.resolver();
            let compatible = resolver.check_trait_compatibility(&layer, &trait_name, &selection, &id);
            let forced_ok = resolver.check_forced_combination(&layer, &trait_name, &selection, &order, &id);
            let enabled = project.rarity().is_enabled(&layer, &trait_name, &id);
            let legal = compatible && forced_ok && enabled;
            print_json(&serde_json::json!({
                "legal": legal,
                "enabled": enabled,
                "compatible": compatible,
                "forcedCombination": forced_ok,
            }));
            if legal {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }

        Commands::Order { set, selected } => {
            let id = SetId::from_number(set);
            let selection: Selection = selected.into_iter().collect();
            print_json(&serde_json::json!(project.compositing_order(&selection, &id)));
            ExitCode::SUCCESS
        }

        Commands::Equalize { set, layer } => {
            let id = SetId::from_number(set);
            if !project.sets().contains(&id) {
                return fail(format!("Set not found: {}", id));
            }
            let result = match &layer {
                Some(l) => project.rarity_mut().equalize_rarity(l, &id),
                None => project.rarity_mut().equalize_all_layers(&id),
            };
            if let Err(e) = result {
                return fail(e);
            }
            if let Err(e) = project.save(&backend).await {
                return fail(e);
            }
            print_json(&serde_json::json!({ "success": true, "set": id }));
            ExitCode::SUCCESS
        }

        Commands::AddSet => {
            let id = project.add_set();
            if let Err(e) = project.save(&backend).await {
                return fail(e);
            }
            print_json(&serde_json::json!({ "success": true, "set": id }));
            ExitCode::SUCCESS
        }

        Commands::DeleteSet { number } => {
            if let Err(e) = project.delete_set(number) {
                return fail(e);
            }
            if let Err(e) = project.save(&backend).await {
                return fail(e);
            }
            print_json(&serde_json::json!({ "success": true, "remaining": project.sets().len() }));
            ExitCode::SUCCESS
        }

        Commands::Manifest => match project.manifest() {
            Ok(manifest) => {
                print_json(&serde_json::json!({ "success": true, "manifest": manifest }));
                if manifest.validation.valid {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(2)
                }
            }
            Err(e) => fail(e),
        },
    }
}

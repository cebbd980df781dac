//! Protoform CLI - turn text prompts into images and 3D models

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{generate, library, providers, viewer};
use protoform_core::RecordId;
use protoform_pipeline::Stage;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "protoform")]
#[command(about = "Text to image to 3D model, with a searchable generation history", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file to use instead of ~/.protoform and .protoform layers
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an image and a 3D model from a prompt
    Generate {
        /// What to create (e.g., "a weathered bronze lantern")
        prompt: String,

        /// Earlier prompt to stay consistent with (repeatable)
        #[arg(long)]
        context: Vec<String>,

        /// Tag for the new record (repeatable)
        #[arg(long)]
        tag: Vec<String>,

        /// Also use the closest stored prompt as context
        #[arg(long)]
        history_context: bool,
    },

    /// Change a stored generation with a follow-up request
    Edit {
        /// Record ID
        id: RecordId,

        /// The change to make (e.g., "make it blue")
        request: String,

        /// Regenerate the image only and clear the old model
        #[arg(long)]
        image_only: bool,
    },

    /// Finish the missing stages of a partial record
    Resume {
        /// Record ID
        id: RecordId,
    },

    /// Redo the image or model of a stored record
    Regenerate {
        /// Record ID
        id: RecordId,

        /// Stage to redo: image (also redoes the model) or model
        #[arg(long, value_parser = parse_stage)]
        stage: Stage,
    },

    /// Show one record in full
    Show {
        /// Record ID
        id: RecordId,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored generations, newest first
    History {
        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Find generations whose prompt contains the query
    Search {
        query: String,
    },

    /// Change fields of a stored record by hand
    Update {
        /// Record ID
        id: RecordId,

        #[arg(long)]
        prompt: Option<String>,

        #[arg(long)]
        enhanced_prompt: Option<String>,

        /// Comma-separated tags, replacing the current ones
        #[arg(long)]
        tags: Option<String>,
    },

    /// Delete a record
    Delete {
        /// Record ID
        id: RecordId,

        /// Also delete the record's image and model files
        #[arg(long)]
        purge_files: bool,
    },

    /// Delete every record
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,

        /// Also delete image and model files
        #[arg(long)]
        purge_files: bool,
    },

    /// Show store totals by status
    Info,

    /// Check the configured enhancer and generation providers
    Providers,

    /// Write an HTML page previewing a record's model
    Viewer {
        /// Record ID
        id: RecordId,

        /// Output HTML path (defaults to viewer_<id>.html)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    match s {
        "image" => Ok(Stage::ImageGenerating),
        "model" => Ok(Stage::ModelGenerating),
        _ => Err(format!("unknown stage '{}'; valid values: image, model", s)),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("protoform=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("protoform=info,warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate {
            prompt,
            context,
            tag,
            history_context,
        } => generate::run_generate(
            &config,
            generate::GenerateArgs {
                prompt,
                context,
                tags: tag,
                history_context,
            },
        ),
        Commands::Edit {
            id,
            request,
            image_only,
        } => generate::run_edit(&config, id, &request, image_only),
        Commands::Resume { id } => generate::run_resume(&config, id),
        Commands::Regenerate { id, stage } => generate::run_regenerate(&config, id, stage),
        Commands::Show { id, json } => library::run_show(&config, id, json),
        Commands::History { limit, offset } => library::run_history(&config, limit, offset),
        Commands::Search { query } => library::run_search(&config, &query),
        Commands::Update {
            id,
            prompt,
            enhanced_prompt,
            tags,
        } => library::run_update(
            &config,
            id,
            library::UpdateArgs {
                prompt,
                enhanced_prompt,
                tags,
            },
        ),
        Commands::Delete { id, purge_files } => library::run_delete(&config, id, purge_files),
        Commands::Clear { yes, purge_files } => library::run_clear(&config, yes, purge_files),
        Commands::Info => library::run_info(&config),
        Commands::Providers => providers::run(&config),
        Commands::Viewer { id, output } => viewer::run(&config, id, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate() {
        let cli = Cli::try_parse_from([
            "protoform",
            "generate",
            "a stone golem",
            "--context",
            "a mossy ruin",
            "--tag",
            "creature",
            "--tag",
            "stone",
            "--history-context",
        ])
        .unwrap();
        match cli.command {
            Commands::Generate {
                prompt,
                context,
                tag,
                history_context,
            } => {
                assert_eq!(prompt, "a stone golem");
                assert_eq!(context, vec!["a mossy ruin".to_string()]);
                assert_eq!(tag, vec!["creature".to_string(), "stone".to_string()]);
                assert!(history_context);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_parse_regenerate_stage() {
        let cli = Cli::try_parse_from(["protoform", "regenerate", "7", "--stage", "model"]).unwrap();
        match cli.command {
            Commands::Regenerate { id, stage } => {
                assert_eq!(id, RecordId(7));
                assert_eq!(stage, Stage::ModelGenerating);
            }
            _ => panic!("expected regenerate"),
        }
        assert!(Cli::try_parse_from(["protoform", "regenerate", "7", "--stage", "persist"]).is_err());
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["protoform", "info", "--verbose", "--config", "alt.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
    }
}

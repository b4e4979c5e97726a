use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use style_search::Facet;
use style_search::commands::{
    SearchQuery, build_indexes, caption_image, embed_text, ingest_catalog, parse_query_vector,
    run_search, show_status,
};
use style_search::config::{resolve_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "style-search")]
#[command(about = "Multi-facet similarity search over a catalog of image styles")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, the catalog and the indices
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the Ollama connection and search settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Embed a JSON Lines catalog and save it as the vector store
    Ingest {
        /// Catalog source, one JSON record per line
        source: PathBuf,
    },
    /// Load or build the index of every facet
    BuildIndex {
        /// Discard persisted indices and build them again
        #[arg(long)]
        rebuild: bool,
    },
    /// Search the catalog
    #[command(group(
        ArgGroup::new("query")
            .required(true)
            .args(["text", "vector", "image_url", "image_file"])
    ))]
    Search {
        /// Facet to search: content, style, features, color or all_ai_info
        #[arg(long, default_value = "all_ai_info")]
        facet: Facet,
        /// Number of neighbors to retrieve before deduplication
        #[arg(long)]
        k: Option<usize>,
        /// Text to embed and search with
        #[arg(long)]
        text: Option<String>,
        /// Query vector as a JSON array of 100 numbers
        #[arg(long)]
        vector: Option<String>,
        /// Image to caption and search with
        #[arg(long)]
        image_url: Option<String>,
        /// Local image file to caption and search with
        #[arg(long)]
        image_file: Option<PathBuf>,
    },
    /// Print the fitted embedding of a text
    Embed {
        text: String,
    },
    /// Caption an image with the vision model
    #[command(group(ArgGroup::new("image").required(true).args(["url", "file"])))]
    Caption {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Show the state of the backend, catalog and indices
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_dir = resolve_config_dir(cli.config_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Ingest { source } => {
            ingest_catalog(&config_dir, &source)?;
        }
        Commands::BuildIndex { rebuild } => {
            build_indexes(&config_dir, rebuild)?;
        }
        Commands::Search {
            facet,
            k,
            text,
            vector,
            image_url,
            image_file,
        } => {
            let query = if let Some(text) = text {
                SearchQuery::Text(text)
            } else if let Some(vector) = vector {
                SearchQuery::Vector(parse_query_vector(&vector)?)
            } else if let Some(url) = image_url {
                SearchQuery::ImageUrl(url)
            } else if let Some(path) = image_file {
                SearchQuery::ImageFile(path)
            } else {
                anyhow::bail!("A query is required");
            };
            run_search(&config_dir, facet, k, query).await?;
        }
        Commands::Embed { text } => {
            embed_text(&config_dir, &text)?;
        }
        Commands::Caption { url, file } => {
            caption_image(&config_dir, url, file)?;
        }
        Commands::Status => {
            show_status(&config_dir)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn status_command() {
        let cli = Cli::try_parse_from(["style-search", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Status));
            assert_eq!(parsed.config_dir, None);
        }
    }

    #[test]
    fn global_config_dir() {
        let cli = Cli::try_parse_from(["style-search", "status", "--config-dir", "/tmp/styles"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.config_dir, Some(PathBuf::from("/tmp/styles")));
        }
    }

    #[test]
    fn ingest_command_with_source() {
        let cli = Cli::try_parse_from(["style-search", "ingest", "styles.jsonl"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ingest { source } = parsed.command {
                assert_eq!(source, PathBuf::from("styles.jsonl"));
            }
        }
    }

    #[test]
    fn build_index_rebuild_flag() {
        let cli = Cli::try_parse_from(["style-search", "build-index", "--rebuild"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::BuildIndex { rebuild } = parsed.command {
                assert!(rebuild);
            }
        }
    }

    #[test]
    fn search_with_text() {
        let cli = Cli::try_parse_from([
            "style-search",
            "search",
            "--facet",
            "style",
            "--k",
            "50",
            "--text",
            "赛博朋克",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Search { facet, k, text, .. } = parsed.command {
                assert_eq!(facet, Facet::Style);
                assert_eq!(k, Some(50));
                assert_eq!(text.as_deref(), Some("赛博朋克"));
            }
        }
    }

    #[test]
    fn search_defaults_to_combined_facet() {
        let cli = Cli::try_parse_from(["style-search", "search", "--image-url", "https://a/b.jpg"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Search { facet, k, .. } = parsed.command {
                assert_eq!(facet, Facet::AllAiInfo);
                assert_eq!(k, None);
            }
        }
    }

    #[test]
    fn search_requires_exactly_one_query() {
        let cli = Cli::try_parse_from(["style-search", "search"]);
        assert!(cli.is_err());

        let cli = Cli::try_parse_from([
            "style-search",
            "search",
            "--text",
            "a",
            "--vector",
            "[1.0]",
        ]);
        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
        } else {
            panic!("two queries must be rejected");
        }
    }

    #[test]
    fn search_rejects_unknown_facet() {
        let cli = Cli::try_parse_from(["style-search", "search", "--facet", "mood", "--text", "a"]);
        assert!(cli.is_err());
    }

    #[test]
    fn caption_requires_source() {
        assert!(Cli::try_parse_from(["style-search", "caption"]).is_err());
        assert!(Cli::try_parse_from(["style-search", "caption", "--file", "a.png"]).is_ok());
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["style-search", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["style-search", "serve"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["style-search", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}

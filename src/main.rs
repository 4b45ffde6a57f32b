use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::*;
use docs2pdf::{assemble, default_output_name, Config, ConfigOverrides, ExportedPage, Exporter};
use std::path::{Path, PathBuf};
use std::process;
use tokio::fs;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docs2pdf")]
#[command(about = "CLI utility to export a documentation website into a single bookmarked PDF")]
#[command(version)]
struct Args {
    /// Log debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a documentation website into one PDF
    Export {
        /// URL of the documentation site
        url: String,

        /// Output PDF path (defaults to <host>.pdf)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Keep the individual page PDFs (by default they are deleted after merging)
        #[arg(short = 'p', long = "preserve-pages")]
        preserve_pages: bool,

        /// Page load timeout in seconds
        #[arg(short = 't', long = "timeout", value_parser = parse_timeout)]
        timeout: Option<f64>,

        /// JSON file with configuration overrides
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,

        /// Leave links to other pages of the site clickable
        #[arg(long = "no-link-rewrite")]
        no_link_rewrite: bool,
    },
    /// Print the pages that would be exported, in order
    Links {
        /// URL of the documentation site
        url: String,

        /// JSON file with configuration overrides
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Merge existing PDF files into a single document
    Merge {
        /// Directory containing PDF files to merge
        #[arg(short = 'd', long = "dir", default_value = "pages")]
        input_dir: String,

        /// Output file path for the merged PDF
        #[arg(short = 'o', long = "output", default_value = "merged.pdf")]
        output_file: String,
    },
}

fn parse_timeout(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|_| "Not a number.")?;
    if value <= 0.0 {
        return Err("Must be a positive number.".to_string());
    }
    Ok(value)
}

async fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = Config::default();
    Ok(match path {
        Some(path) => config.with_overrides(ConfigOverrides::from_file(path).await?),
        None => config,
    })
}

async fn merge_pdfs(input_dir: &str, output_file: &str) -> Result<()> {
    let input_path = PathBuf::from(input_dir);

    if !input_path.exists() {
        return Err(anyhow!("Input directory '{}' does not exist", input_dir));
    }

    info!("Scanning directory: {}", input_dir.green());

    let mut entries = fs::read_dir(&input_path).await?;
    let mut pdf_files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "pdf") {
            pdf_files.push(path);
        }
    }

    if pdf_files.is_empty() {
        return Err(anyhow!("No PDF files found in '{}'", input_dir));
    }

    // Sort by filename to maintain order (especially numbered files)
    pdf_files.sort();

    info!("Found {} PDF files to merge:", pdf_files.len());
    for (i, path) in pdf_files.iter().enumerate() {
        info!("  {}: {}", i + 1, path.display().to_string().blue());
    }

    let mut pages: Vec<ExportedPage> = pdf_files
        .into_iter()
        .enumerate()
        .map(|(page_index, path)| ExportedPage {
            source_url: path.display().to_string(),
            artifact_path: path,
            headings: Vec::new(),
            page_index,
        })
        .collect();

    let output_path = PathBuf::from(output_file);
    let report = assemble(&mut pages, &output_path).await?;

    info!(
        "Successfully merged {} PDFs ({} pages) into: {}",
        report.merged_artifacts,
        report.page_count,
        output_path.display().to_string().green()
    );

    Ok(())
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Export { url, output, preserve_pages, timeout, config, no_link_rewrite } => {
            let mut config = load_config(config.as_deref()).await?;
            if preserve_pages {
                config.cleanup = false;
            }
            if let Some(seconds) = timeout {
                config.timeouts.page_load = (seconds * 1000.0) as u64;
            }
            if no_link_rewrite {
                config.rewrite_internal_links = false;
            }
            let output = output.unwrap_or_else(|| PathBuf::from(default_output_name(&url)));
            Exporter::new(config).run(&url, &output).await?;
        }
        Commands::Links { url, config } => {
            let config = load_config(config.as_deref()).await?;
            let links = Exporter::new(config).collect(&url).await?;
            for (i, link) in links.iter().enumerate() {
                println!("{:>4}  {}", i + 1, link);
            }
        }
        Commands::Merge { input_dir, output_file } => merge_pdfs(&input_dir, &output_file).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Set up logging with chromiumoxide errors suppressed
    let level = if args.verbose { "docs2pdf=debug" } else { "docs2pdf=info" };
    let filter = EnvFilter::from_default_env()
        .add_directive("chromiumoxide::conn=off".parse().unwrap())
        .add_directive("chromiumoxide::handler=off".parse().unwrap())
        .add_directive(level.parse().unwrap());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    if let Err(e) = run(args.command).await {
        error!("{}", format!("Error: {:#}", e).red());
        process::exit(1);
    }
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use keralacare::{generate, i18n, selector};

#[derive(Parser)]
#[command(name = "keralacare")]
#[command(about = "Build and browse the Kerala Care organization cache")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the organization hierarchy and publish per-parent JSON shards
    Generate(generate::GenerateArgs),
    /// Walk published shards by organization name and print the facility URL
    Resolve(selector::ResolveArgs),
    /// Look up dictionary keys in a display language
    Translate(i18n::TranslateArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }

    match cli.command {
        Commands::Generate(args) => generate::run(args),
        Commands::Resolve(args) => selector::run(args),
        Commands::Translate(args) => i18n::run(args),
    }
}

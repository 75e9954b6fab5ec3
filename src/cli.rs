use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "fbref-extract",
    version,
    about = "FBref Premier League team statistics extraction tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Fetch(FetchArgs),
    Summarize(SummarizeArgs),
    Load(LoadArgs),
    Mappings(MappingsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    #[arg(long, default_value = "https://fbref.com/en/comps/9/Premier-League-Stats")]
    pub url: String,

    #[arg(long, default_value = "data/raw")]
    pub out_dir: PathBuf,

    #[arg(long, default_value_t = 3)]
    pub attempts: usize,

    #[arg(long, default_value_t = false)]
    pub use_browser: bool,

    #[arg(long)]
    pub tables: Option<String>,

    #[arg(long)]
    pub mappings_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SummarizeArgs {
    #[arg(long, default_value = "data/raw")]
    pub raw_dir: PathBuf,

    #[arg(long)]
    pub summary_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    #[arg(long, default_value = "data/raw")]
    pub raw_dir: PathBuf,

    #[arg(long, default_value = "data/fbref_stats.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, default_value = "2024-25")]
    pub season: String,

    #[arg(long, default_value_t = false)]
    pub truncate_staging: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MappingsArgs {
    #[arg(long)]
    pub mappings_path: Option<PathBuf>,
}

use clap::{Args, Parser, Subcommand};

use widecol_api::query::Operator;

#[derive(Parser)]
#[command(name = "widecol", about = "Browse wide-column tables page by page")]
pub struct Cli {
    /// Path to the engine TOML configuration. Defaults apply when omitted.
    #[arg(long, global = true, env = "WIDECOL_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Seed an in-memory table and page through it
    Browse(BrowseArgs),
}

#[derive(Args, Clone, Debug)]
pub struct BrowseArgs {
    /// Rows to seed into the demo table.
    #[arg(long, default_value_t = 250)]
    pub rows: u32,

    /// Rows per page. Falls back to `page_size` from the config.
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Pages to walk forward before stepping back.
    #[arg(long, default_value_t = 3)]
    pub pages: usize,

    /// Column to filter on, as `family:qualifier`.
    #[arg(long)]
    pub filter_column: Option<String>,

    /// Comparison for `--word`: `=`, `!=`, `<`, `<=`, `>`, `>=`,
    /// `contains`, `starts-with` or `ends-with`.
    #[arg(long, requires = "word")]
    pub operator: Option<Operator>,

    /// Value compared against the filter column.
    #[arg(long, requires_all = ["operator", "filter_column"])]
    pub word: Option<String>,

    /// Type the word is parsed as.
    #[arg(long, default_value = "String")]
    pub word_type: String,
}

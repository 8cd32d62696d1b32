use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scrape new books, then email the digest and/or write the pages site.
    Run(RunArgs),
    /// Rebuild `index.html` and `stats.html` from the snapshots already in a pages directory.
    Reindex(ReindexArgs),
    /// List the supported category codes.
    Categories,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Category code to scrape (repeatable). Default: every category.
    #[arg(long = "category", value_name = "CODE")]
    pub categories: Vec<String>,

    /// Skip the pre-order listing.
    #[arg(long)]
    pub no_preorders: bool,

    /// Print the email HTML to stdout instead of sending it.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the static pages site into this directory.
    #[arg(long, value_name = "DIR")]
    pub pages: Option<String>,

    /// Keep books published within this many days.
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..))]
    pub window_days: u32,

    /// Keep books whose publication date is missing or unreadable.
    #[arg(long)]
    pub keep_undated: bool,

    /// Catalog site root.
    #[arg(long, env = "BOOKWATCH_BASE_URL", default_value = crate::config::DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Public URL of the published pages site, used for links in the email.
    #[arg(long, env = "BOOKWATCH_PAGES_URL")]
    pub pages_url: Option<String>,

    /// Delay between listing requests (politeness).
    #[arg(long, default_value_t = 1500)]
    pub request_delay_ms: u64,

    /// Per-request timeout.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct ReindexArgs {
    /// Pages directory (created by `run --pages`).
    #[arg(long, value_name = "DIR")]
    pub pages: String,
}

use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn try_main() -> anyhow::Result<()> {
    // A missing .env is fine; values may come from the real environment.
    if let Err(err) = dotenvy::dotenv()
        && !err.not_found()
    {
        return Err(err).context("load .env");
    }

    bookwatch::logging::init().context("init logging")?;

    let cli = bookwatch::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        bookwatch::cli::Command::Run(args) => {
            bookwatch::pipeline::run(args).context("run")?;
        }
        bookwatch::cli::Command::Reindex(args) => {
            bookwatch::pipeline::reindex(args).context("reindex")?;
        }
        bookwatch::cli::Command::Categories => {
            bookwatch::pipeline::list_categories().context("categories")?;
        }
    }

    Ok(())
}

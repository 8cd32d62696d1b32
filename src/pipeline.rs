use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, FixedOffset};

use crate::aggregate::{Aggregator, RunOptions};
use crate::cli::{ReindexArgs, RunArgs};
use crate::config::{self, SiteConfig};
use crate::digest::{self, DigestOptions};
use crate::fetch::HttpFetcher;
use crate::mail::{self, SmtpSettings};
use crate::normalize::{RecencyWindow, UndatedPolicy};

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let now = chrono::Local::now().fixed_offset();
    run_at(args, now)
}

pub fn run_at(args: RunArgs, now: DateTime<FixedOffset>) -> anyhow::Result<()> {
    // Configuration problems must surface before the first request.
    config::resolve_categories(args.categories.as_slice()).context("validate --category")?;

    let mut site = SiteConfig::new(&args.base_url).context("parse --base-url")?;
    site.timeout = Duration::from_secs(args.timeout_secs);
    site.request_delay = Duration::from_millis(args.request_delay_ms);

    let smtp = if args.dry_run {
        None
    } else {
        Some(SmtpSettings::from_env().context("read smtp settings")?)
    };

    let fetcher = HttpFetcher::new(&site).context("build fetcher")?;
    let undated = if args.keep_undated {
        UndatedPolicy::Keep
    } else {
        UndatedPolicy::Drop
    };
    let options = RunOptions {
        include_preorders: !args.no_preorders,
        window: RecencyWindow::new(args.window_days, now.date_naive()).with_undated(undated),
    };

    tracing::info!(
        categories = ?args.categories,
        preorders = options.include_preorders,
        window_days = args.window_days,
        "starting scrape"
    );
    let result = Aggregator::new(&fetcher, &site)
        .run(args.categories.as_slice(), &options, now)
        .context("scrape listings")?;

    if result.all_failed() {
        anyhow::bail!(
            "every listing failed ({} failures); nothing to report",
            result.failures.len()
        );
    }

    let total = result.total_books();
    if total == 0 {
        tracing::warn!("no books found; skipping pages and email");
        return Ok(());
    }

    if !result.warnings.is_empty() {
        tracing::warn!(skipped = result.warnings.len(), "some listing items could not be read");
    }

    let snapshot_href = match &args.pages {
        Some(pages_dir) => {
            let out_dir = PathBuf::from(pages_dir);
            let report = crate::pages::render_pages(&result, &out_dir)
                .with_context(|| format!("write pages: {}", out_dir.display()))?;
            tracing::info!(
                page = %report.snapshot_path.display(),
                snapshots = report.snapshots,
                books = total,
                "pages generated"
            );
            Some(report.href)
        }
        None => None,
    };

    let digest_options = DigestOptions {
        pages_url: args.pages_url.clone(),
        snapshot_href,
        ..DigestOptions::default()
    };
    let html = digest::render_email(&result, &digest_options);

    let Some(smtp) = smtp else {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(html.as_bytes())
            .context("write digest to stdout")?;
        stdout.flush().context("flush stdout")?;
        return Ok(());
    };

    let text = digest::render_text(&result, &digest_options);
    let message = mail::build_message(&smtp, &digest::subject(&result), html, text)
        .context("build email")?;
    mail::send(&smtp, &message).context("send email")?;
    tracing::info!(books = total, recipients = smtp.to.len(), "digest sent");

    Ok(())
}

pub fn reindex(args: ReindexArgs) -> anyhow::Result<()> {
    let out_dir = PathBuf::from(&args.pages);
    if !out_dir.is_dir() {
        anyhow::bail!("pages directory does not exist: {}", out_dir.display());
    }
    let snapshots = crate::pages::rebuild_index(&out_dir)
        .with_context(|| format!("rebuild index: {}", out_dir.display()))?;
    tracing::info!(snapshots, dir = %out_dir.display(), "index rebuilt");
    Ok(())
}

pub fn list_categories() -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    for category in config::CATEGORIES {
        writeln!(stdout, "{}\t{}", category.code, category.label).context("write category")?;
    }
    Ok(())
}

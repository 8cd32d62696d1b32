//! Static archive site.
//!
//! Layout under the output directory:
//!
//! - `books/<stem>.html`: one page per run, never rewritten by later runs.
//!   The run itself is embedded as JSON in `<script id="book-data">`, which
//!   is the only persisted history.
//! - `index.html`: every run, newest first.
//! - `stats.html`: per-run and per-category totals across all runs.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};

use crate::error::{Error, Result};
use crate::html::Document;
use crate::model::{Book, CategoryResult, RunResult};

const BOOKS_DIR: &str = "books";
const DATA_SCRIPT_ID: &str = "book-data";
const MAX_SAME_STEM: usize = 100;

#[derive(Debug)]
pub struct PagesReport {
    pub snapshot_path: PathBuf,
    /// Snapshot page relative to the site root, e.g. `books/2026-03-01_000000.html`.
    pub href: String,
    pub snapshots: usize,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub stem: String,
    pub run: RunResult,
}

/// UTC timestamp of the run. Runs started at the same wall-clock time in
/// different offsets get different names, and names sort chronologically.
pub fn snapshot_stem(run: &RunResult) -> String {
    run.generated_at
        .with_timezone(&Utc)
        .format("%Y-%m-%d_%H%M%S")
        .to_string()
}

/// Preferred path of the run's page relative to the site root. The page
/// actually written may carry a suffix, see [`PagesReport::href`].
pub fn snapshot_href(run: &RunResult) -> String {
    stem_href(&snapshot_stem(run))
}

fn stem_href(stem: &str) -> String {
    format!("{BOOKS_DIR}/{stem}.html")
}

/// Adds the run to the site at `out_dir`. Existing snapshot pages are never
/// rewritten.
pub fn render_pages(run: &RunResult, out_dir: &Path) -> Result<PagesReport> {
    let books_dir = out_dir.join(BOOKS_DIR);
    std::fs::create_dir_all(&books_dir).map_err(|err| Error::io(&books_dir, err))?;

    let mut history = load_history(out_dir)?;
    let previous_ids = history
        .iter()
        .filter(|snap| snap.run.generated_at <= run.generated_at)
        .next_back()
        .map(|snap| book_ids(&snap.run));

    let page = render_snapshot_page(run, previous_ids.as_ref())?;
    let (stem, snapshot_path) = write_new_snapshot(&books_dir, &snapshot_stem(run), &page)?;
    tracing::info!(path = %snapshot_path.display(), books = run.total_books(), "wrote snapshot page");

    let href = stem_href(&stem);
    history.push(Snapshot {
        stem,
        run: run.clone(),
    });
    history.sort_by(|a, b| a.stem.cmp(&b.stem));

    write_index_and_stats(out_dir, &history)?;

    Ok(PagesReport {
        snapshot_path,
        href,
        snapshots: history.len(),
    })
}

/// Regenerates `index.html` and `stats.html` from the snapshots on disk.
pub fn rebuild_index(out_dir: &Path) -> Result<usize> {
    let history = load_history(out_dir)?;
    write_index_and_stats(out_dir, &history)?;
    Ok(history.len())
}

fn write_index_and_stats(out_dir: &Path, history: &[Snapshot]) -> Result<()> {
    write_atomic(&out_dir.join("index.html"), &render_index_page(history))?;
    write_atomic(&out_dir.join("stats.html"), &render_stats_page(history))?;
    tracing::info!(dir = %out_dir.display(), snapshots = history.len(), "wrote index and stats");
    Ok(())
}

/// Every readable snapshot under `out_dir`, oldest first. Pages without
/// embedded run data are skipped with a warning.
pub fn load_history(out_dir: &Path) -> Result<Vec<Snapshot>> {
    let books_dir = out_dir.join(BOOKS_DIR);
    if !books_dir.exists() {
        return Ok(Vec::new());
    }

    let mut snapshots = Vec::new();
    for entry in std::fs::read_dir(&books_dir).map_err(|err| Error::io(&books_dir, err))? {
        let entry = entry.map_err(|err| Error::io(&books_dir, err))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("html") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        match read_snapshot(&path) {
            Ok(run) => snapshots.push(Snapshot {
                stem: stem.to_owned(),
                run,
            }),
            Err(err) => tracing::warn!(path = %path.display(), %err, "skip unreadable snapshot"),
        }
    }

    snapshots.sort_by(|a, b| a.stem.cmp(&b.stem));
    Ok(snapshots)
}

pub fn read_snapshot(path: &Path) -> Result<RunResult> {
    let contents = std::fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
    let snapshot_err = |message: String| Error::Snapshot {
        path: path.display().to_string(),
        message,
    };

    let json = Document::parse(&contents)
        .raw_text(&format!("script#{DATA_SCRIPT_ID}"))
        .ok_or_else(|| snapshot_err("missing embedded book data".to_owned()))?;
    serde_json::from_str(&json).map_err(|err| snapshot_err(format!("parse book data: {err}")))
}

fn book_ids(run: &RunResult) -> HashSet<String> {
    run.sections()
        .flat_map(|section| section.books.iter().map(|b| b.id.clone()))
        .collect()
}

fn staged(dir: &Path, contents: &str) -> Result<tempfile::NamedTempFile> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|err| Error::io(dir, err))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|err| Error::io(tmp.path(), err))?;
    tmp.flush().map_err(|err| Error::io(tmp.path(), err))?;
    Ok(tmp)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    staged(dir, contents)?
        .persist(path)
        .map_err(|err| Error::io(path, err.error))?;
    Ok(())
}

/// Publishes `contents` under `stem`, or `stem_2`, `stem_3`, ... when the name
/// is taken. Returns the stem actually used.
fn write_new_snapshot(books_dir: &Path, stem: &str, contents: &str) -> Result<(String, PathBuf)> {
    let mut tmp = staged(books_dir, contents)?;
    for n in 1..=MAX_SAME_STEM {
        let candidate = if n == 1 {
            stem.to_owned()
        } else {
            format!("{stem}_{n}")
        };
        let path = books_dir.join(format!("{candidate}.html"));
        match tmp.persist_noclobber(&path) {
            Ok(_) => return Ok((candidate, path)),
            Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path.display(), "snapshot name taken");
                tmp = err.file;
            }
            Err(err) => return Err(Error::io(&path, err.error)),
        }
    }

    Err(Error::Snapshot {
        path: books_dir.join(format!("{stem}.html")).display().to_string(),
        message: format!("more than {MAX_SAME_STEM} snapshots share this timestamp"),
    })
}

/// JSON that can sit inside a `<script>` element without closing it.
fn script_safe_json(run: &RunResult) -> Result<String> {
    let json = serde_json::to_string(run).map_err(|err| Error::Snapshot {
        path: snapshot_href(run),
        message: format!("serialize book data: {err}"),
    })?;
    Ok(json
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026"))
}

fn render_snapshot_page(run: &RunResult, previous_ids: Option<&HashSet<String>>) -> Result<String> {
    let date = run.date().format("%Y-%m-%d").to_string();
    let sections = run
        .sections()
        .filter(|section| !section.books.is_empty())
        .collect::<Vec<_>>();

    let mut body = String::new();
    body.push_str("<a href=\"../index.html\" class=\"back-link\">&larr; 返回首頁</a>\n");
    let _ = writeln!(body, "<h1>博客來新書書單 {date}</h1>");
    let _ = writeln!(
        body,
        "<p class=\"summary\">共 {} 本書</p>",
        run.total_books()
    );

    body.push_str("<div class=\"filter-bar\"><button class=\"filter-btn active\" data-cat=\"all\">全部</button>");
    for section in &sections {
        let _ = write!(
            body,
            "<button class=\"filter-btn\" data-cat=\"{}\">{}</button>",
            attr(&section.category_code),
            text(&section.category_label)
        );
    }
    body.push_str("</div>\n");

    if sections.is_empty() {
        body.push_str("<p class=\"empty\">本期沒有符合條件的新書。</p>\n");
    }
    for section in &sections {
        render_section_cards(&mut body, section, previous_ids);
    }

    if !run.failures.is_empty() {
        body.push_str("<p class=\"failures\">未能取得：");
        let names = run
            .failures
            .iter()
            .map(|f| text(&f.category_label).into_owned())
            .collect::<Vec<_>>();
        body.push_str(&names.join("、"));
        body.push_str("</p>\n");
    }

    let mut scripts = String::new();
    let _ = writeln!(
        scripts,
        "<script id=\"{DATA_SCRIPT_ID}\" type=\"application/json\">{}</script>",
        script_safe_json(run)?
    );
    scripts.push_str(FILTER_JS);

    Ok(wrap_page(&format!("書單 {date}"), &body, &scripts))
}

fn render_section_cards(
    body: &mut String,
    section: &CategoryResult,
    previous_ids: Option<&HashSet<String>>,
) {
    let code = attr(&section.category_code);
    let _ = writeln!(
        body,
        "<h2 class=\"cat-title\" data-category=\"{code}\">{}（{} 本）</h2>",
        text(&section.category_label),
        section.books.len()
    );
    let _ = writeln!(body, "<div class=\"grid\" data-category=\"{code}\">");
    for book in &section.books {
        let is_new = previous_ids.is_some_and(|ids| !ids.contains(&book.id));
        render_card(body, book, is_new);
    }
    body.push_str("</div>\n");
}

fn render_card(body: &mut String, book: &Book, is_new: bool) {
    body.push_str("<div class=\"card\">");
    if let Some(cover) = &book.cover_image_url {
        let _ = write!(body, "<img src=\"{}\" alt=\"\" class=\"cover\" loading=\"lazy\">", attr(cover));
    }
    body.push_str("<div class=\"card-body\">");
    let _ = write!(
        body,
        "<a href=\"{}\" target=\"_blank\" rel=\"noopener\" class=\"book-title\">{}</a>",
        attr(&book.source_url),
        text(&book.title)
    );
    if is_new {
        body.push_str("<span class=\"badge-new\">NEW</span>");
    }

    let meta = [
        book.author.clone(),
        book.publisher.clone(),
        book.price_label(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();
    if !meta.is_empty() {
        let _ = write!(body, "<span class=\"meta\">{}</span>", text(&meta.join(" / ")));
    }
    if let Some(date) = book.published_date {
        let _ = write!(body, "<span class=\"pub-date\">{}</span>", date.format("%Y-%m-%d"));
    }
    body.push_str("</div></div>\n");
}

fn render_index_page(history: &[Snapshot]) -> String {
    let mut body = String::new();
    body.push_str("<h1>博客來新書書單</h1>\n");
    let _ = writeln!(
        body,
        "<p class=\"summary\">歷史書單列表（共 {} 期）</p>",
        history.len()
    );
    body.push_str("<nav class=\"nav-links\"><a href=\"stats.html\">統計</a></nav>\n");

    if history.is_empty() {
        body.push_str("<p>目前尚無書單。</p>\n");
    } else {
        body.push_str("<ul class=\"index-list\">");
        for snap in history.iter().rev() {
            let _ = write!(
                body,
                "<li><a href=\"{}\">{} 書單</a><span class=\"count\">{} 本</span></li>",
                attr(&stem_href(&snap.stem)),
                snap.run.generated_at.format("%Y-%m-%d %H:%M"),
                snap.run.total_books()
            );
        }
        body.push_str("</ul>\n");
    }

    wrap_page("博客來新書書單", &body, "")
}

fn render_stats_page(history: &[Snapshot]) -> String {
    let mut category_totals: BTreeMap<&str, usize> = BTreeMap::new();
    for snap in history {
        for section in snap.run.sections() {
            *category_totals.entry(section.category_label.as_str()).or_default() +=
                section.books.len();
        }
    }
    let total_books = history.iter().map(|s| s.run.total_books()).sum::<usize>();

    let mut body = String::new();
    body.push_str("<a href=\"index.html\" class=\"back-link\">&larr; 返回首頁</a>\n");
    body.push_str("<h1>書單統計</h1>\n");
    let _ = writeln!(
        body,
        "<p class=\"summary\">共 {} 期，{total_books} 本書</p>",
        history.len()
    );

    body.push_str("<h2 class=\"cat-title\">每期書籍數量</h2>\n<div class=\"chart\">");
    let per_run = history
        .iter()
        .map(|s| (s.run.generated_at.format("%Y-%m-%d").to_string(), s.run.total_books()))
        .collect::<Vec<_>>();
    render_bars(&mut body, &per_run, "bar-fill");
    body.push_str("</div>\n");

    let mut per_category = category_totals
        .into_iter()
        .map(|(label, count)| (label.to_owned(), count))
        .collect::<Vec<_>>();
    per_category.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    body.push_str("<h2 class=\"cat-title\">各分類累計書籍數量</h2>\n<div class=\"chart\">");
    render_bars(&mut body, &per_category, "bar-fill cat-fill");
    body.push_str("</div>\n");

    wrap_page("書單統計", &body, "")
}

fn render_bars(body: &mut String, rows: &[(String, usize)], fill_class: &str) {
    let max = rows.iter().map(|(_, n)| *n).max().unwrap_or(0).max(1);
    for (label, count) in rows {
        let pct = *count as f64 / max as f64 * 100.0;
        let _ = write!(
            body,
            "<div class=\"bar-row\"><span class=\"bar-label\">{}</span>\
<div class=\"bar-track\"><div class=\"{fill_class}\" style=\"width:{pct:.1}%\"></div></div>\
<span class=\"bar-value\">{count}</span></div>",
            text(label)
        );
    }
}

fn wrap_page(title: &str, body: &str, scripts: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"zh-Hant\">\n<head>\n<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
<title>{}</title>\n<style>\n{STYLE}</style>\n</head>\n<body>\n<div class=\"container\">\n\
{body}</div>\n{scripts}</body>\n</html>\n",
        text(title)
    )
}

const FILTER_JS: &str = r#"<script>
document.querySelectorAll('.filter-btn').forEach(function (btn, _, all) {
  btn.addEventListener('click', function () {
    all.forEach(function (b) { b.classList.remove('active'); });
    btn.classList.add('active');
    var cat = btn.getAttribute('data-cat');
    document.querySelectorAll('[data-category]').forEach(function (el) {
      el.style.display = (cat === 'all' || el.getAttribute('data-category') === cat) ? '' : 'none';
    });
  });
});
</script>
"#;

const STYLE: &str = r#"*{box-sizing:border-box;margin:0;padding:0}
body{font-family:-apple-system,"Segoe UI",Roboto,"Noto Sans TC",sans-serif;background:#f5f5f5;color:#333;line-height:1.6}
.container{max-width:960px;margin:0 auto;padding:24px 16px}
h1{margin-bottom:8px;color:#1d3557}
.summary{color:#666;margin-bottom:24px}
.back-link,.nav-links a{display:inline-block;margin-bottom:16px;color:#e63946;text-decoration:none;font-weight:600}
.cat-title{border-bottom:2px solid #e63946;padding-bottom:4px;margin:32px 0 16px}
.grid{display:grid;grid-template-columns:repeat(auto-fill,minmax(180px,1fr));gap:16px}
.card{display:flex;flex-direction:column;background:#fff;border:1px solid #eee;border-radius:6px;padding:10px;text-align:center}
.card .cover{width:100%;max-width:140px;margin:0 auto 8px;border-radius:3px}
.card-body{display:flex;flex-direction:column;gap:4px}
.book-title{font-size:14px;color:#1d3557;text-decoration:none;font-weight:bold}
.meta{font-size:12px;color:#666}
.pub-date{font-size:11px;color:#999}
.badge-new{align-self:center;background:#e63946;color:#fff;font-size:11px;font-weight:bold;padding:1px 6px;border-radius:3px}
.filter-bar{display:flex;flex-wrap:wrap;gap:8px;margin-bottom:20px}
.filter-btn{border:1px solid #1d3557;background:#fff;color:#1d3557;padding:4px 14px;border-radius:16px;cursor:pointer;font-size:13px}
.filter-btn.active,.filter-btn:hover{background:#1d3557;color:#fff}
.failures,.empty{color:#999;font-size:13px;margin-top:24px}
.index-list{list-style:none}
.index-list li{display:flex;justify-content:space-between;padding:12px 16px;background:#fff;border:1px solid #eee;border-radius:6px;margin-bottom:8px}
.index-list a{color:#1d3557;text-decoration:none;font-weight:600}
.count{color:#999}
.chart{margin-bottom:32px}
.bar-row{display:flex;align-items:center;gap:8px;margin-bottom:6px}
.bar-label{width:140px;flex-shrink:0;font-size:13px;text-align:right;color:#555}
.bar-track{flex:1;background:#eee;border-radius:4px;height:22px;overflow:hidden}
.bar-fill{height:100%;background:#1d3557}
.bar-fill.cat-fill{background:#e63946}
.bar-value{width:40px;font-size:13px;color:#555}
"#;

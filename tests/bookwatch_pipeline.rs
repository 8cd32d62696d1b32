use std::fs;
use std::io::{BufRead as _, BufReader, Write as _};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bookwatch::pages;
use chrono::Days;
use predicates::prelude::*;

struct CatalogServer {
    base_url: String,
    requests: Arc<AtomicUsize>,
    shutdown_tx: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Drop for CatalogServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn date_days_ago(days: u64) -> String {
    let today = chrono::Local::now().date_naive();
    (today - Days::new(days)).format("%Y-%m-%d").to_string()
}

fn listing_page(heading: &str, items: &[(&str, &str, &str)]) -> String {
    let items = items
        .iter()
        .map(|(id, title, date)| {
            format!(
                r#"<div class="item">
  <a href="/products/{id}?loc=P_001"><img class="cover" src="//im.books.test/{id}.jpg" alt=""></a>
  <div class="msg">
    <h4><a href="/products/{id}?loc=P_001">{title}</a></h4>
    <ul class="msg">
      <li class="info">作者：<a href="/search/adv_author/1/">作者{id}</a>，出版社：<a href="/web/sys_puballb/books/?pubid=p{id}">出版社</a>，出版日期：{date}</li>
    </ul>
    <div class="price_box">優惠價：<b>79</b>折<b>316</b>元</div>
  </div>
</div>"#
            )
        })
        .collect::<String>();

    format!(
        r#"<!doctype html>
<html><head><meta charset="utf-8"><title>博客來</title></head>
<body>
<div class="mod_a clearfix">
  <div class="hd"><h3>{heading}</h3></div>
  <div class="bd">{items}</div>
</div>
</body></html>"#
    )
}

fn spawn_catalog_server() -> CatalogServer {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let requests = Arc::new(AtomicUsize::new(0));
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let computers = listing_page(
        "近期新書",
        &[
            ("0010000001", "Rust 實戰", &date_days_ago(1)),
            ("0010000002", "舊書一本", &date_days_ago(60)),
            ("0010000001", "Rust 實戰", &date_days_ago(1)),
        ],
    );
    let preorders = listing_page("預購書", &[("0010000009", "明年的書", "2099-01-01")]);

    let counter = Arc::clone(&requests);
    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };
            counter.fetch_add(1, Ordering::SeqCst);

            let (status, body) = match request.url() {
                "/web/books_nbtopm_19" => (200, computers.clone()),
                "/web/sys_prebooks/books/" => (200, preorders.clone()),
                "/web/books_nbtopm_02" => (500, "internal error".to_owned()),
                "/web/books_nbtopm_03" => (200, "<html><body>系統維護中</body></html>".to_owned()),
                _ => (404, "not found".to_owned()),
            };

            let header = tiny_http::Header::from_bytes(
                &b"Content-Type"[..],
                &b"text/html; charset=utf-8"[..],
            )
            .expect("build header");
            let _ = request.respond(
                tiny_http::Response::from_string(body)
                    .with_status_code(status)
                    .with_header(header),
            );
        }
    });

    CatalogServer {
        base_url,
        requests,
        shutdown_tx,
        handle: Some(handle),
    }
}

/// Answers EHLO with AUTH support and rejects every login with 535.
fn spawn_rejecting_smtp_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind smtp listener");
    let port = listener.local_addr().expect("smtp addr").port();

    thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        let _ = stream.set_read_timeout(Some(Duration::from_secs(10)));
        let Ok(read_half) = stream.try_clone() else {
            return;
        };
        let mut reader = BufReader::new(read_half);
        let mut writer = stream;
        if writer.write_all(b"220 smtp.test ESMTP\r\n").is_err() {
            return;
        }

        let mut line = String::new();
        while matches!(reader.read_line(&mut line), Ok(n) if n > 0) {
            let command = line.trim_end().to_ascii_uppercase();
            line.clear();
            let reply: &[u8] = if command.starts_with("EHLO") {
                b"250-smtp.test\r\n250 AUTH PLAIN LOGIN\r\n"
            } else if command.starts_with("AUTH") {
                b"535 5.7.8 Username and Password not accepted\r\n"
            } else if command.starts_with("QUIT") {
                b"221 2.0.0 bye\r\n"
            } else {
                b"502 5.5.1 unrecognized command\r\n"
            };
            if writer.write_all(reply).is_err() || command.starts_with("QUIT") {
                break;
            }
        }
    });

    port
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

fn bookwatch() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bookwatch");
    cmd.env_remove("GMAIL_USER")
        .env_remove("GMAIL_APP_PASSWORD")
        .env_remove("EMAIL_TO")
        .env_remove("BOOKWATCH_PAGES_URL")
        .env_remove("SMTP_HOST")
        .env_remove("SMTP_PORT")
        .env_remove("SMTP_SECURITY")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn dry_run_prints_digest_and_writes_pages() -> anyhow::Result<()> {
    let server = spawn_catalog_server();
    let temp = tempfile::TempDir::new()?;
    let site_dir = temp.path().join("site");

    bookwatch()
        .args([
            "run",
            "--category",
            "19",
            "--category",
            "02",
            "--dry-run",
            "--pages",
            site_dir.to_str().expect("utf-8 path"),
            "--base-url",
            &server.base_url,
            "--request-delay-ms",
            "0",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rust 實戰"))
        .stdout(predicate::str::contains("明年的書"))
        .stdout(predicate::str::contains("舊書一本").not())
        .stdout(predicate::str::contains("商業理財（02）"))
        .stderr(predicate::str::contains("listing failed"));

    assert_eq!(server.requests.load(Ordering::SeqCst), 3);

    let index = fs::read_to_string(site_dir.join("index.html"))?;
    assert!(index.contains("共 1 期"));
    assert!(site_dir.join("stats.html").exists());

    let history = pages::load_history(&site_dir)?;
    assert_eq!(history.len(), 1);
    let run = &history[0].run;
    let codes = run
        .categories
        .iter()
        .map(|c| c.category_code.as_str())
        .collect::<Vec<_>>();
    assert_eq!(codes, vec!["19"]);
    assert_eq!(run.categories[0].books.len(), 1, "duplicate entry must collapse");
    assert_eq!(
        run.categories[0].books[0].source_url,
        format!("{}/products/0010000001", server.base_url)
    );
    assert_eq!(run.categories[0].books[0].price, Some(316));
    assert_eq!(run.failures.len(), 1);
    assert_eq!(run.failures[0].category_code, "02");
    assert!(run.preorders.as_ref().is_some_and(|p| p.books[0].is_preorder));
    Ok(())
}

#[test]
fn invalid_category_fails_before_any_request() -> anyhow::Result<()> {
    let server = spawn_catalog_server();

    bookwatch()
        .args([
            "run",
            "--category",
            "19",
            "--category",
            "99",
            "--dry-run",
            "--base-url",
            &server.base_url,
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown category code: 99"));

    assert_eq!(server.requests.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn sending_without_credentials_fails_before_any_request() -> anyhow::Result<()> {
    let server = spawn_catalog_server();

    bookwatch()
        .args(["run", "--category", "19", "--base-url", &server.base_url])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GMAIL_USER is not set"));

    assert_eq!(server.requests.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn invalid_recipient_fails_before_any_request() -> anyhow::Result<()> {
    let server = spawn_catalog_server();

    bookwatch()
        .env("GMAIL_USER", "bot@example.com")
        .env("GMAIL_APP_PASSWORD", "app-pass")
        .env("EMAIL_TO", "not-an-address")
        .args(["run", "--category", "19", "--base-url", &server.base_url])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid email address"));

    assert_eq!(server.requests.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn rejected_login_fails_the_run_but_keeps_pages() -> anyhow::Result<()> {
    let server = spawn_catalog_server();
    let smtp_port = spawn_rejecting_smtp_server();
    let temp = tempfile::TempDir::new()?;
    let site_dir = temp.path().join("site");

    bookwatch()
        .env("GMAIL_USER", "bot@example.com")
        .env("GMAIL_APP_PASSWORD", "wrong")
        .env("EMAIL_TO", "reader@example.com")
        .env("SMTP_HOST", "127.0.0.1")
        .env("SMTP_PORT", smtp_port.to_string())
        .env("SMTP_SECURITY", "none")
        .args([
            "run",
            "--category",
            "19",
            "--no-preorders",
            "--pages",
            site_dir.to_str().expect("utf-8 path"),
            "--base-url",
            &server.base_url,
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("smtp authentication failed"));

    assert!(site_dir.join("index.html").exists());
    assert!(site_dir.join("stats.html").exists());
    let history = pages::load_history(&site_dir)?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].run.categories[0].books.len(), 1);
    Ok(())
}

#[test]
fn unreachable_smtp_server_is_a_send_failure() -> anyhow::Result<()> {
    let server = spawn_catalog_server();
    let temp = tempfile::TempDir::new()?;
    let site_dir = temp.path().join("site");

    bookwatch()
        .env("GMAIL_USER", "bot@example.com")
        .env("GMAIL_APP_PASSWORD", "app-pass")
        .env("EMAIL_TO", "reader@example.com")
        .env("SMTP_HOST", "127.0.0.1")
        .env("SMTP_PORT", closed_port().to_string())
        .env("SMTP_SECURITY", "none")
        .args([
            "run",
            "--category",
            "19",
            "--no-preorders",
            "--pages",
            site_dir.to_str().expect("utf-8 path"),
            "--base-url",
            &server.base_url,
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("send failed"));

    assert!(site_dir.join("index.html").exists());
    assert_eq!(pages::load_history(&site_dir)?.len(), 1);
    Ok(())
}

#[test]
fn every_listing_failing_is_fatal() -> anyhow::Result<()> {
    let server = spawn_catalog_server();

    bookwatch()
        .args([
            "run",
            "--category",
            "02",
            "--category",
            "03",
            "--no-preorders",
            "--dry-run",
            "--base-url",
            &server.base_url,
            "--request-delay-ms",
            "0",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("every listing failed"));

    assert_eq!(server.requests.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn reindex_rebuilds_from_existing_snapshots() -> anyhow::Result<()> {
    let server = spawn_catalog_server();
    let temp = tempfile::TempDir::new()?;
    let site_dir = temp.path().join("site");

    bookwatch()
        .args([
            "run",
            "--category",
            "19",
            "--no-preorders",
            "--dry-run",
            "--pages",
            site_dir.to_str().expect("utf-8 path"),
            "--base-url",
            &server.base_url,
        ])
        .assert()
        .success();

    fs::remove_file(site_dir.join("index.html"))?;
    bookwatch()
        .args(["reindex", "--pages", site_dir.to_str().expect("utf-8 path")])
        .assert()
        .success();

    let index = fs::read_to_string(site_dir.join("index.html"))?;
    assert!(index.contains("共 1 期"));
    Ok(())
}

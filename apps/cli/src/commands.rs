use axum::Router;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{RecvTimeoutError, channel};
use std::time::{Duration, Instant};
use tower_http::services::ServeDir;
use tracing_subscriber::EnvFilter;
use unify_ssg::{
    BuildResult, BuildSession, CONFIG_FILE_NAME, FailOn, IssueReport, Result, SiteBuilder,
    UnifyError,
};

use crate::BuildArgs;

const DEBOUNCE_DURATION: Duration = Duration::from_millis(300);

pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn escape_toml_string(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for character in input.chars() {
        match character {
            '\\' => output.push_str("\\\\"),
            '"' => output.push_str("\\\""),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            '\u{0008}' => output.push_str("\\b"),
            '\u{000C}' => output.push_str("\\f"),
            control if control < '\u{0020}' => {
                output.push_str(&format!("\\u{:04X}", control as u32));
            }
            other => output.push(other),
        }
    }
    output
}

fn watch_error(error: notify::Error) -> UnifyError {
    UnifyError::Io(std::io::Error::other(error))
}

const STARTER_LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{{ title }}</title>
  <link rel="stylesheet" href="/css/site.css">
</head>
<body>
  <include src="/.components/header.html"></include>
  <main>
    <slot></slot>
  </main>
</body>
</html>
"#;

const STARTER_HEADER: &str = r#"<header>
  <nav><a href="/">Home</a> <a href="/about.html">About</a></nav>
</header>
"#;

const STARTER_INDEX: &str = r#"<head>
  <title>Home</title>
  <meta name="description" content="A new Unify site">
</head>
<h1>Welcome</h1>
<p>Edit <code>index.html</code> to get started.</p>
"#;

const STARTER_ABOUT: &str = r#"---
title: About
---

# About

This page is written in **Markdown**.
"#;

const STARTER_CSS: &str = "body { font-family: system-ui, sans-serif; margin: 2rem auto; max-width: 40rem; }\n";

pub fn init_site(source: &str, output: &str) -> Result<()> {
    let current_dir = std::env::current_dir()?;
    init_site_in(&current_dir, source, output)?;
    println!("Initialized Unify site in current directory");
    println!("  unify serve");
    Ok(())
}

fn init_site_in(dir: &Path, source: &str, output: &str) -> Result<()> {
    let config_path = dir.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        return Err(UnifyError::InvalidConfig {
            message: format!("{} already exists in this directory", CONFIG_FILE_NAME),
        });
    }

    let config = format!(
        "source = \"{}\"\noutput = \"{}\"\npretty_urls = false\nminify = false\n",
        escape_toml_string(source),
        escape_toml_string(output),
    );
    fs::write(&config_path, config)?;

    let source_dir = dir.join(source);
    let files = [
        (".layouts/default.html", STARTER_LAYOUT),
        (".components/header.html", STARTER_HEADER),
        ("index.html", STARTER_INDEX),
        ("about.md", STARTER_ABOUT),
        ("css/site.css", STARTER_CSS),
    ];
    for (relative, content) in files {
        let path = source_dir.join(relative);
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
    }

    Ok(())
}

fn site_builder(args: &BuildArgs) -> Result<SiteBuilder> {
    let current_dir = std::env::current_dir()?;
    let mut builder = SiteBuilder::new(&current_dir);

    if let Some(config) = &args.config {
        builder = builder.config_file(current_dir.join(config));
    }
    if let Some(source) = &args.source {
        builder = builder.source(source);
    }
    if let Some(output) = &args.output {
        builder = builder.output(output);
    }
    if args.pretty_urls {
        builder = builder.pretty_urls(true);
    }
    if args.minify {
        builder = builder.minify(true);
    }
    if args.no_cache {
        builder = builder.cache(false);
    }
    if args.clean {
        builder = builder.clean(true);
    }
    if let Some(fail_on) = args.fail_on {
        builder = builder.fail_on(FailOn::from(fail_on));
    }

    Ok(builder)
}

fn print_issues(result: &BuildResult) {
    if result.issues.is_empty() {
        return;
    }
    eprint!("{}", IssueReport::from_issues(&result.issues));
}

fn print_summary(result: &BuildResult, output: &Path, elapsed: Duration) {
    println!(
        "Built {} pages ({} up to date), copied {} assets to {} in {:.2?}",
        result.processed,
        result.skipped,
        result.copied,
        output.display(),
        elapsed
    );
}

fn into_outcome(result: BuildResult) -> Result<()> {
    if result.has_errors() {
        return Err(UnifyError::Build {
            failed: result.failed_pages(),
            issues: result.issues,
        });
    }
    Ok(())
}

pub fn build_site(args: &BuildArgs) -> Result<()> {
    println!("Building site...");
    let start = Instant::now();

    let mut session = site_builder(args)?.session()?;
    let result = session.full_build()?;

    print_issues(&result);
    print_summary(&result, &session.config().output, start.elapsed());
    into_outcome(result)
}

fn initial_build(session: &mut BuildSession) -> Result<()> {
    println!("Building site...");
    let start = Instant::now();
    let result = session.full_build()?;
    print_issues(&result);
    print_summary(&result, &session.config().output, start.elapsed());
    Ok(())
}

fn collect_paths(event: notify::Result<Event>, changed: &mut BTreeSet<PathBuf>) {
    match event {
        Ok(event) => changed.extend(event.paths),
        Err(error) => eprintln!("Watch error: {error}"),
    }
}

fn rebuild_changed(session: &mut BuildSession, changed: &BTreeSet<PathBuf>) {
    let start = Instant::now();
    let mut processed = 0;
    let mut copied = 0;

    for path in changed {
        if !path.starts_with(&session.config().source) {
            continue;
        }
        tracing::debug!(path = %path.display(), "source changed");
        match session.rebuild(Some(path)) {
            Ok(result) => {
                print_issues(&result);
                processed += result.processed;
                copied += result.copied;
            }
            Err(error) => eprintln!("Rebuild error: {error}"),
        }
    }

    if processed > 0 || copied > 0 {
        println!(
            "Rebuilt {} pages, copied {} assets in {:.2?}",
            processed,
            copied,
            start.elapsed()
        );
    }
}

/// Blocks, feeding debounced change batches to the session.
fn watch_changes(session: &mut BuildSession, config_file: &Path) -> Result<()> {
    let (notify_tx, notify_rx) = channel();
    let mut watcher = RecommendedWatcher::new(
        notify_tx,
        Config::default().with_poll_interval(Duration::from_millis(200)),
    )
    .map_err(watch_error)?;

    let source = session.config().source.clone();
    watcher
        .watch(&source, RecursiveMode::Recursive)
        .map_err(watch_error)?;
    if config_file.exists() {
        watcher
            .watch(config_file, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;
    }
    println!("Watching {} for changes", source.display());

    loop {
        let Ok(first) = notify_rx.recv() else {
            return Ok(());
        };
        let mut changed = BTreeSet::new();
        collect_paths(first, &mut changed);

        loop {
            match notify_rx.recv_timeout(DEBOUNCE_DURATION) {
                Ok(event) => collect_paths(event, &mut changed),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }

        if changed.iter().any(|path| path.ends_with(CONFIG_FILE_NAME)) {
            println!("{} changed; restart to apply the new configuration", CONFIG_FILE_NAME);
        }
        rebuild_changed(session, &changed);
    }
}

fn config_file(args: &BuildArgs) -> Result<PathBuf> {
    let current_dir = std::env::current_dir()?;
    Ok(match &args.config {
        Some(config) => current_dir.join(config),
        None => current_dir.join(CONFIG_FILE_NAME),
    })
}

pub fn watch_site(args: &BuildArgs) -> Result<()> {
    let mut session = site_builder(args)?.session()?;
    initial_build(&mut session)?;
    watch_changes(&mut session, &config_file(args)?)
}

pub async fn serve_site(args: &BuildArgs, port: u16, open_browser: bool) -> Result<()> {
    let mut session = site_builder(args)?.session()?;

    let livereload = tower_livereload::LiveReloadLayer::new();
    let reloader = livereload.reloader();
    session.on_rebuild_complete(move |outputs| {
        if !outputs.is_empty() {
            reloader.reload();
        }
    });

    initial_build(&mut session)?;
    let output_dir = session.config().output.clone();
    let config_file = config_file(args)?;

    std::thread::spawn(move || {
        if let Err(error) = watch_changes(&mut session, &config_file) {
            eprintln!("Watch error: {error}");
        }
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("Serving at http://{addr}");
    println!("Press Ctrl+C to stop");

    if open_browser {
        let url = format!("http://localhost:{}", port);
        if let Err(error) = open::that(&url) {
            eprintln!("Failed to open browser: {error}");
        }
    }

    let serve_dir = ServeDir::new(output_dir).append_index_html_on_directories(true);
    let app = Router::new().fallback_service(serve_dir).layer(livereload);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

//! `TexMill` CLI — typeset LaTeX fragments and list the page contents.

use std::io::Read;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use texmill_daemon::error::DaemonError;
use texmill_daemon::session::{SessionConfig, TexSession, TypesetPage};
use texmill_daemon::PageEvent;

#[derive(Parser)]
#[command(version, about = "TexMill \u{2014} persistent LaTeX typesetting sessions")]
struct Cli {
    /// LaTeX fragments, one page each
    fragments: Vec<String>,

    /// Read fragments from stdin instead, one per line
    #[arg(long)]
    stdin: bool,

    /// Additional LaTeX packages to load
    #[arg(short, long = "package", value_name = "NAME")]
    packages: Vec<String>,

    /// Engine executable
    #[arg(long, default_value = "latex")]
    engine: String,

    /// Per-page wait bound in seconds
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let fragments = collect_fragments(&cli);
    if fragments.is_empty() {
        eprintln!("No fragments to typeset");
        process::exit(1);
    }

    let mut template = texmill_daemon::TexTemplate::default();
    for package in &cli.packages {
        template = template.add_package(package, &[]);
    }
    let config = SessionConfig {
        program: cli.engine.clone(),
        template,
        timeout: Duration::from_secs(cli.timeout),
        ..SessionConfig::default()
    };

    let mut session = match TexSession::start(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: failed to start a session: {e}");
            process::exit(1);
        }
    };

    for fragment in &fragments {
        match session.submit(fragment) {
            Ok(page) => print_page(fragment, &page),
            Err(DaemonError::EngineCrashed { message, log }) => {
                eprintln!("Error: engine crashed on {fragment:?}: {message}");
                for line in log {
                    eprintln!("  {line}");
                }
                process::exit(1);
            }
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }

    if let Err(e) = session.close() {
        eprintln!("Warning: session did not close cleanly: {e}");
    }
}

fn collect_fragments(cli: &Cli) -> Vec<String> {
    if !cli.stdin {
        return cli.fragments.clone();
    }
    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        eprintln!("Error reading stdin: {e}");
        process::exit(1);
    }
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

fn print_page(fragment: &str, result: &TypesetPage) {
    println!(
        "page {} ({fragment:?}): {:.3}pt x {:.3}pt",
        result.number, result.page.width, result.page.height
    );
    for line in &result.log {
        eprintln!("  log: {line}");
    }
    for event in &result.page.events {
        match event {
            PageEvent::Glyph { x, y, code, font } => {
                println!(
                    "  glyph {code} at ({x:.3}, {y:.3}) in {} @{:.2}pt",
                    font.name, font.size
                );
            }
            PageEvent::Rule { x, y, width, height } => {
                println!("  rule {width:.3} x {height:.3} at ({x:.3}, {y:.3})");
            }
        }
    }
}

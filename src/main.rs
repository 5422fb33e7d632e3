use std::io::Read;

use clap::Parser;
use serde::Serialize;

use menu_sweep::{MenuEntry, Outcome, RuleTable};

#[derive(Parser)]
#[command(
    name = "menu-sweep",
    about = "Clean menu titles and apply keep/remove/move rules",
    version
)]
struct Cli {
    /// File paths to process (reads stdin if none provided)
    files: Vec<String>,

    /// TOML rule file overriding the built-in rule table
    #[arg(long)]
    rules: Option<String>,

    /// Treat input as a JSON menu tree and sweep it, instead of resolving
    /// one raw title per line
    #[arg(long)]
    sweep: bool,
}

#[derive(Serialize)]
struct LineReport<'a> {
    title: &'a str,
    outcome: &'a Outcome,
    match_count: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let table = match &cli.rules {
        Some(path) => {
            let text = std::fs::read_to_string(path).unwrap_or_else(|e| {
                eprintln!("Error reading {path}: {e}");
                std::process::exit(1);
            });
            RuleTable::from_toml_str(&text).unwrap_or_else(|e| {
                eprintln!("Error in rule file {path}: {e}");
                std::process::exit(1);
            })
        }
        None => RuleTable::default(),
    };

    if cli.files.is_empty() {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .expect("Failed to read stdin");
        process(&input, &table, cli.sweep);
    } else {
        for path in &cli.files {
            let text = std::fs::read_to_string(path).unwrap_or_else(|e| {
                eprintln!("Error reading {path}: {e}");
                std::process::exit(1);
            });
            process(&text, &table, cli.sweep);
        }
    }
}

fn process(input: &str, table: &RuleTable, sweep: bool) {
    if sweep {
        let menu: Vec<MenuEntry> = serde_json::from_str(input).unwrap_or_else(|e| {
            eprintln!("Error parsing menu JSON: {e}");
            std::process::exit(1);
        });
        let report = menu_sweep::sweep(&menu, table);
        println!("{}", serde_json::to_string_pretty(&report).unwrap());
    } else {
        for line in input.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let title = menu_sweep::normalize(line);
            let resolution = menu_sweep::resolve_with(table, &title);
            let report = LineReport {
                title: &title,
                outcome: &resolution.outcome,
                match_count: resolution.match_count,
            };
            println!("{}", serde_json::to_string(&report).unwrap());
        }
    }
}

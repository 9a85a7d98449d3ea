// src/main.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use tracing_subscriber::EnvFilter;

use fpump::cli::Cli;
use fpump::units::fmt_bytes;
use fpump::{CancelToken, JobController};

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if cli.benchmark {
        let bench_size = cli.bench_size.unwrap_or(64 * 1024 * 1024);
        tracing::info!(
            size = %fmt_bytes(bench_size),
            "running local benchmark; this writes temporary files and deletes them"
        );
        match fpump::bench::run_benchmark(bench_size) {
            Ok((results, best)) => {
                println!("chunk,workers,concurrency,throughput_mibs,cpu_pct,rss_mib");
                for r in &results {
                    let concurrency = match r.concurrency {
                        fpump::Concurrency::Write => "write",
                        fpump::Concurrency::Generate => "generate",
                    };
                    let rss = r
                        .rss_bytes
                        .map(|b| format!("{:.1}", b as f64 / (1024.0 * 1024.0)))
                        .unwrap_or_default();
                    println!(
                        "{},{},{concurrency},{:.2},{:.1},{rss}",
                        r.chunk,
                        r.workers,
                        r.throughput_bps / (1024.0 * 1024.0),
                        r.cpu_percent,
                    );
                }
                println!("\nRecommendation:\n{}", best.recommendation());
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("[error] benchmark failed: {e:#}");
                std::process::exit(1);
            }
        }
    }

    let code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("[error] {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> fpump::Result<()> {
    let cfg = cli.into_job_config()?;
    let controller = JobController::new(cfg)?;
    controller.run(&CancelToken::new())
}

fn init_tracing(cli: &Cli) {
    let default_level = cli.log_level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    match &cli.log_file {
        Some(path) => {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    tracing_subscriber::fmt()
                        .with_env_filter(filter)
                        .with_ansi(false)
                        .with_writer(file)
                        .init();
                }
                Err(e) => {
                    eprintln!("[warn] cannot open log file {}: {e}", path.display());
                    tracing_subscriber::fmt()
                        .with_env_filter(filter)
                        .with_writer(std::io::stderr)
                        .init();
                }
            }
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

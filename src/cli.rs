//! CLI interface for mailquiz

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::{self, Config};
use crate::grader::llm::LlmGrader;
use crate::mail::gmail::GmailClient;
use crate::service::QuizService;
use crate::store::{self, ProgressLog, ScoreLedger};

#[derive(Parser)]
#[command(name = "mailquiz")]
#[command(about = "Email quiz service - study by email with LLM grading", long_about = None)]
#[command(version)]
struct Cli {
    /// Email thread subject override
    #[arg(short, long)]
    subject: Option<String>,

    /// Clear session state and scores before starting (progress history is kept)
    #[arg(long)]
    reset: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config,
    /// Summarize the score ledger and progress history
    Stats,
}

/// Parse arguments and dispatch
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config) => config::show_config(),
        Some(Commands::Stats) => show_stats(),
        None => run_service(cli.subject, cli.reset).await,
    }
}

/// Start the quiz loop. Configuration problems are fatal here, before any
/// mail is touched.
async fn run_service(subject: Option<String>, reset: bool) -> Result<()> {
    let config = Config::load()?;

    if reset {
        store::reset(&config.state_path()?, &config.scores_path()?)?;
    }

    config.validate()?;

    let channel = GmailClient::from_config(&config)?;
    let grader = LlmGrader::from_config(&config)?;

    let mut service = QuizService::new(config, subject, Box::new(channel), Box::new(grader))?;
    service.run().await
}

/// Read-only summary of the two history stores
fn show_stats() -> Result<()> {
    let config = Config::load()?;
    let ledger = ScoreLedger::load(&config.scores_path()?);
    let progress = ProgressLog::load(&config.progress_path()?);

    println!("Questions answered at least once: {}", ledger.answered_count());
    println!("Total graded responses:           {}", ledger.total_grades());
    println!("Progress log entries:             {}", progress.len());

    if ledger.answered_count() > 0 {
        println!("\nPer-question averages (weakest first):");
        let mut rows: Vec<(usize, f64, usize)> = ledger
            .iter()
            .filter(|(_, history)| !history.is_empty())
            .map(|(id, history)| (id, ledger.average(id), history.len()))
            .collect();
        rows.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        for (id, average, attempts) in rows {
            println!("  #{id:<4} {average:>5.1}/100 over {attempts} attempt(s)");
        }
    }

    if let Some(entry) = progress.entries().last() {
        println!(
            "\nLast graded: {} ({}/100)",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.score
        );
    }

    Ok(())
}

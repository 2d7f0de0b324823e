use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use envx_analysis_client::config::AppConfig;
use envx_analysis_client::models::job::{AnalysisJob, AnalysisType, JobStatus};
use envx_analysis_client::services::poller::PollPolicy;
use envx_analysis_client::services::session::{FileSessionStore, SessionEvents};
use envx_analysis_client::services::submitter::{parse_analysis_type, ImageFile};
use envx_analysis_client::services::workflow::AnalysisWorkflow;
use envx_analysis_client::ClientError;

#[derive(Parser)]
#[command(name = "envx", version, about = "Submit images to the EnvX analysis service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store the session locally
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// End the session (local data is cleared even if the backend is down)
    Logout,
    /// Show the signed-in user
    Whoami {
        /// Ask the backend instead of reading the stored session
        #[arg(long)]
        remote: bool,
    },
    /// Upload an image, run an analysis and print the result
    Analyze {
        image: PathBuf,
        #[arg(long = "type", value_parser = parse_analysis_type)]
        analysis_type: AnalysisType,
        /// Return right after the job is created
        #[arg(long)]
        no_wait: bool,
    },
    /// Show one job without waiting
    Status { job_id: String },
    /// Wait for a job to finish and print its result
    Wait {
        job_id: String,
        #[arg(long)]
        interval_ms: Option<u64>,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// List all jobs
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration from environment
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration from environment");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(api_url = %config.api_url, "Initializing envx client");

    let session = Arc::new(FileSessionStore::open(&config.session_file));
    let events = SessionEvents::new();

    let workflow = match AnalysisWorkflow::new(&config, session, events) {
        Ok(workflow) => workflow,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize client");
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C abandons any running poll loop
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match run(cli.command, &workflow, &cancel).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            if let Some(hint) = error_hint(&e) {
                eprintln!("{hint}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Follow-up line printed under an error.
fn error_hint(error: &ClientError) -> Option<&'static str> {
    match error {
        ClientError::SessionExpired => Some("run `envx login` to sign in again"),
        e if e.is_retryable() => Some("the request can be retried"),
        _ => None,
    }
}

async fn run(
    command: Command,
    workflow: &AnalysisWorkflow,
    cancel: &CancellationToken,
) -> Result<ExitCode, ClientError> {
    match command {
        Command::Login { email, password } => {
            let user = workflow.auth.login(&email, &password).await?;
            println!("signed in as {}", user.name.as_deref().unwrap_or(&user.email));
        }
        Command::Logout => {
            workflow.auth.logout().await?;
            println!("signed out");
        }
        Command::Whoami { remote } => {
            let user = if remote {
                Some(workflow.auth.current_user().await?)
            } else {
                workflow.auth.stored_user()
            };
            match user {
                Some(user) => println!("{} <{}>", user.name.as_deref().unwrap_or("-"), user.email),
                None => println!("not signed in"),
            }
        }
        Command::Analyze {
            image,
            analysis_type,
            no_wait,
        } => {
            let file = ImageFile::from_path(&image).await?;
            if no_wait {
                let asset = workflow.submitter.upload_image(&file).await?;
                let created = workflow
                    .submitter
                    .request_analysis(&asset.filename, analysis_type, None)
                    .await?;
                println!("{} {}", created.id, created.status);
                return Ok(ExitCode::SUCCESS);
            }

            let job = workflow.run(&file, analysis_type, cancel).await?;
            return Ok(print_outcome(workflow, &job));
        }
        Command::Status { job_id } => {
            let job = workflow.results.get_result(&job_id).await?;
            print_job_line(&job);
            if job.status.is_terminal() {
                return Ok(print_outcome(workflow, &job));
            }
        }
        Command::Wait {
            job_id,
            interval_ms,
            max_attempts,
        } => {
            let defaults = workflow.poller.policy();
            let policy = PollPolicy {
                interval: interval_ms
                    .map(std::time::Duration::from_millis)
                    .unwrap_or(defaults.interval),
                max_attempts: max_attempts.unwrap_or(defaults.max_attempts),
            };
            let job = workflow
                .poller
                .await_completion_with(&job_id, policy, cancel)
                .await?;
            return Ok(print_outcome(workflow, &job));
        }
        Command::List => {
            let jobs = workflow.results.list_results().await?;
            if jobs.is_empty() {
                println!("no analyses yet");
            }
            for job in &jobs {
                print_job_line(job);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_job_line(job: &AnalysisJob) {
    let created = job
        .timestamp
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    let analysis = job
        .analysis_type
        .map(|t| t.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<28} {:<11} {:<17} {:<19} {}",
        job.id,
        job.status,
        analysis,
        created,
        job.image_ref.as_deref().unwrap_or("-")
    );
}

fn print_outcome(workflow: &AnalysisWorkflow, job: &AnalysisJob) -> ExitCode {
    if job.status == JobStatus::Failed {
        eprintln!(
            "analysis {} failed: {}",
            job.id,
            job.failure_message().unwrap_or_default()
        );
        return ExitCode::FAILURE;
    }

    match workflow.render(job) {
        Ok(visualization) => print!("{visualization}"),
        Err(ClientError::UnrecognizedResultType { payload }) => {
            println!("unrecognized analysis type or incomplete results:");
            println!("{payload:#}");
        }
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

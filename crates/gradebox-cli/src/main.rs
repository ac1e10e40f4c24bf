//! Gradebox CLI
//!
//! A command-line tool for grading submissions in IOI isolate sandboxes.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gradebox::{
    Config, EXAMPLE_CONFIG, FileProgressSink, Grader, GradingJob, IsolateSandbox, prepare_cgroup,
};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gradebox")]
#[command(about = "Compile a submission and grade it against a problem's test cases")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Box ID to use (overrides the configuration)
    #[arg(short = 'b', long, global = true)]
    box_id: Option<u32>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: gradebox.toml)
        #[arg(short, long, default_value = "gradebox.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Grade a source file against a problem
    Grade {
        /// Source file to grade
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Problem ID (directory under the test-case root)
        #[arg(short, long)]
        problem: String,

        /// Toolchain ID (e.g., cpp17, rust, java)
        #[arg(short = 'l', long)]
        toolchain: String,

        /// CPU time limit per test case in seconds
        #[arg(short, long, default_value = "1.0")]
        time_limit: f64,

        /// Memory limit per test case in KB
        #[arg(short, long, default_value = "262144")]
        memory_limit: u64,

        /// Work directory (default: a fresh temporary directory)
        #[arg(short, long)]
        work_dir: Option<PathBuf>,

        /// Job ID progress is published under
        #[arg(short, long)]
        job_id: Option<String>,
    },

    /// Show the progress of a grading job
    Progress {
        /// Job ID
        job_id: String,
    },

    /// List available toolchains
    #[command(alias = "languages")]
    Toolchains,

    /// Show effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // stdout carries results only
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    if let Some(box_id) = cli.box_id {
        config.box_id = box_id;
    }

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Grade {
            source,
            problem,
            toolchain,
            time_limit,
            memory_limit,
            work_dir,
            job_id,
        } => {
            prepare_cgroups(&mut config);
            let request = GradeArgs {
                source,
                problem,
                toolchain,
                time_limit,
                memory_limit,
                work_dir,
                job_id,
            };
            let all_accepted = run_grade(config, request).await?;
            if !all_accepted {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Progress { job_id } => show_progress(&config, &job_id).await,
        Commands::Toolchains => {
            list_toolchains(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

/// Set up the cgroup hierarchy if cgroup mode is enabled
fn prepare_cgroups(config: &mut Config) {
    if !config.cgroup {
        return;
    }
    match prepare_cgroup(&config.cg_root) {
        Ok(true) => debug!("cgroup hierarchy ready"),
        Ok(false) => {
            warn!(
                "cgroup support unavailable (memory controller not found), falling back to RLIMIT_AS"
            );
            config.cgroup = false;
        }
        Err(e) => {
            warn!("cgroup setup failed: {e}, falling back to RLIMIT_AS memory limiting");
            config.cgroup = false;
        }
    }
}

struct GradeArgs {
    source: PathBuf,
    problem: String,
    toolchain: String,
    time_limit: f64,
    memory_limit: u64,
    work_dir: Option<PathBuf>,
    job_id: Option<String>,
}

/// Grade one submission and print the results; returns whether every test
/// case was accepted
async fn run_grade(config: Config, args: GradeArgs) -> Result<bool> {
    let toolchain = config
        .get_toolchain(&args.toolchain)
        .context("unknown toolchain")?;

    // Kept alive until grading is done
    let scratch;
    let work_dir = match args.work_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(&dir)
                .await
                .context("failed to create work directory")?;
            dir
        }
        None => {
            scratch = tempfile::Builder::new()
                .prefix("gradebox-")
                .tempdir()
                .context("failed to create work directory")?;
            scratch.path().to_path_buf()
        }
    };

    // Both the compiler and the runner identity write here
    tokio::fs::set_permissions(&work_dir, std::fs::Permissions::from_mode(0o777))
        .await
        .context("failed to open up work directory")?;

    let source = work_dir.join(&toolchain.source_name);
    tokio::fs::copy(&args.source, &source)
        .await
        .with_context(|| format!("failed to copy source {}", args.source.display()))?;
    tokio::fs::set_permissions(&source, std::fs::Permissions::from_mode(0o644))
        .await
        .context("failed to set source permissions")?;

    let job_id = args
        .job_id
        .unwrap_or_else(|| format!("{}-{}", args.problem, std::process::id()));

    info!(
        job_id = %job_id,
        toolchain = %toolchain.name,
        problem = %args.problem,
        work_dir = %work_dir.display(),
        "grading submission"
    );

    let job = GradingJob::new(&job_id, &args.problem, &args.toolchain, &work_dir, &source)
        .time_limit(args.time_limit)
        .memory_limit(args.memory_limit);

    let sandbox = IsolateSandbox::from_config(&config);
    let progress = FileProgressSink::new(&config.progress_dir);

    let mut grader = Grader::new(config, sandbox, progress, job)
        .await
        .context("failed to set up grading")?;
    let results = grader.grade_all().await.context("grading failed")?;

    let accepted = results.iter().filter(|r| r.verdict.is_accepted()).count();
    let total = results.len();
    let report = serde_json::json!({
        "job_id": job_id,
        "accepted": accepted,
        "total": total,
        "results": results,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to encode results")?
    );

    Ok(total > 0 && accepted == total)
}

async fn show_progress(config: &Config, job_id: &str) -> Result<()> {
    let progress = FileProgressSink::new(&config.progress_dir)
        .read(job_id)
        .await
        .context("failed to read progress")?;

    println!("{progress}");
    Ok(())
}

fn list_toolchains(config: &Config) {
    println!("Available toolchains:\n");

    let mut toolchains: Vec<_> = config.toolchains.iter().collect();
    toolchains.sort_by_key(|(id, _)| *id);

    for (id, toolchain) in toolchains {
        println!("  {:<15} {} ({})", id, toolchain.name, toolchain.source_name);
    }
}

fn show_config(config: &Config) {
    println!("Isolate binary: {}", config.isolate_binary().display());
    println!("Box ID: {}", config.box_id);
    println!("Cgroup: {}", config.cgroup);
    println!();
    println!("Test cases: {}", config.testcase_root.display());
    println!("Progress: {}", config.progress_dir.display());
    println!("Compiler log: {}", config.compiler_log.display());
    println!("Runner log: {}", config.runner_log.display());
    println!();
    println!("Wall time factor: {}", config.wall_time_factor);
    println!(
        "Compiler identity: {}:{}",
        config.compiler_identity().uid, config.compiler_identity().gid
    );
    println!(
        "Runner identity: {}:{}",
        config.runner_identity().uid, config.runner_identity().gid
    );
    println!();
    println!("Toolchains configured: {}", config.toolchains.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}

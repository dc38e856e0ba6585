//! Threadbox command-line front end.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use threadbox::agent::AgentType;
use threadbox::config;
use threadbox::events::OrchestratorEvent;
use threadbox::orchestrator::{Services, Snapshot, ThreadOrchestrator};
use threadbox::project::Project;
use threadbox::storage;
use threadbox::terminal::TmuxSessions;
use threadbox::thread::Thread;

/// Run coding agents side by side, one git worktree per thread.
#[derive(Parser, Debug)]
#[command(name = "threadbox", version = env!("THREADBOX_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep sessions alive and report agent activity until Ctrl+C.
    Run,
    #[command(subcommand)]
    Project(ProjectCommand),
    #[command(subcommand)]
    Thread(ThreadCommand),
    #[command(subcommand)]
    Tab(TabCommand),
}

#[derive(Subcommand, Debug)]
enum ProjectCommand {
    /// Register a git repository.
    Add {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum ThreadCommand {
    /// Create a thread on a fresh worktree.
    New {
        /// Project slug or id.
        project: String,
        #[arg(long)]
        agent: Option<AgentType>,
        /// Start a plain shell instead of the agent.
        #[arg(long)]
        shell: bool,
    },
    /// Create the thread bound to the project's own checkout.
    Main { project: String },
    List { project: Option<String> },
    Rename { thread: String, name: String },
    /// Remove the worktree but keep the branch.
    Archive {
        thread: String,
        /// Archive even with uncommitted or unmerged work.
        #[arg(long)]
        yes: bool,
    },
    /// Remove the worktree and the branch.
    Delete { thread: String },
}

#[derive(Subcommand, Debug)]
enum TabCommand {
    Add {
        thread: String,
        #[arg(long)]
        shell: bool,
        #[arg(long)]
        agent: Option<AgentType>,
        #[arg(long)]
        prompt: Option<String>,
    },
    Remove { thread: String, session: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging();

    let settings = config::load_settings();
    let state_path = threadbox::paths::state_file()
        .ok_or_else(|| anyhow!("cannot resolve state file path (is HOME set?)"))?;

    // Listing only reads, so it works while `threadbox run` owns the state.
    match cli.command {
        Command::Project(ProjectCommand::List) => list_projects(&read_snapshot(&state_path)?),
        Command::Thread(ThreadCommand::List { project }) => {
            list_threads(&read_snapshot(&state_path)?, project.as_deref())
        }
        command => execute(settings, state_path, command).await,
    }
}

/// Run a command that may change the model, as the state file's owner.
async fn execute(settings: config::Settings, state_path: PathBuf, command: Command) -> Result<()> {
    let services = Services::system(&settings);
    let orchestrator =
        match ThreadOrchestrator::open(settings.clone(), Some(state_path.clone()), services) {
            Err(threadbox::Error::StateLocked(path)) => bail!(
                "{} is owned by another threadbox process, stop `threadbox run` first",
                path.display()
            ),
            opened => opened.with_context(|| format!("failed to load {}", state_path.display()))?,
        };

    let result = match command {
        Command::Run => {
            TmuxSessions::new(settings.tool_timeout())
                .check_available()
                .await
                .context("tmux is not usable")?;
            run(&orchestrator).await
        }
        Command::Project(cmd) => project_command(&orchestrator, cmd).await,
        Command::Thread(cmd) => thread_command(&orchestrator, cmd).await,
        Command::Tab(cmd) => tab_command(&orchestrator, cmd).await,
    };

    orchestrator
        .shutdown()
        .await
        .context("failed to save state")?;
    result
}

/// Log to stderr and to a daily file in the log directory. The returned
/// guard flushes the file writer on drop.
fn init_logging() -> Option<WorkerGuard> {
    let filter = || EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let stderr = fmt::layer().with_writer(std::io::stderr);

    let file = threadbox::paths::log_directory().and_then(|dir| {
        std::fs::create_dir_all(&dir).ok()?;
        Some(tracing_appender::non_blocking(
            tracing_appender::rolling::daily(dir, "threadbox.log"),
        ))
    });

    match file {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(filter())
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter())
                .with(stderr)
                .init();
            None
        }
    }
}

async fn run(orchestrator: &ThreadOrchestrator) -> Result<()> {
    let mut events = orchestrator.subscribe();
    orchestrator.start().await;
    tracing::info!("supervising threads, Ctrl+C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                tracing::info!("Shutting down...");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => tracing::warn!("missed {n} events"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn log_event(event: &OrchestratorEvent) {
    match event {
        OrchestratorEvent::SessionsRecreated { thread_id, sessions } => {
            tracing::info!(%thread_id, ?sessions, "sessions recreated");
        }
        OrchestratorEvent::AgentCompletion {
            thread_id,
            unread_sessions,
        } => tracing::info!(%thread_id, ?unread_sessions, "agent finished"),
        OrchestratorEvent::AgentWaiting {
            thread_id,
            waiting_sessions,
        } => tracing::info!(%thread_id, ?waiting_sessions, "agent waiting for input"),
        OrchestratorEvent::AgentBusy {
            thread_id,
            busy_sessions,
        } => tracing::debug!(%thread_id, ?busy_sessions, "agent busy"),
        OrchestratorEvent::ThreadsUpdated { threads } => {
            tracing::debug!(count = threads.len(), "threads updated");
        }
        OrchestratorEvent::SessionUnhealthy {
            thread_id,
            session,
            failures,
            error,
        } => tracing::error!(%thread_id, session, failures, "session unhealthy: {error}"),
    }
}

async fn project_command(orchestrator: &ThreadOrchestrator, cmd: ProjectCommand) -> Result<()> {
    match cmd {
        ProjectCommand::Add { path, name } => {
            let project = orchestrator.add_project(path, name).await?;
            println!("{}\t{}\t{}", project.slug, project.id, project.repo_path.display());
        }
        ProjectCommand::List => list_projects(&orchestrator.snapshot())?,
    }
    Ok(())
}

/// The saved model, read without taking the state lock.
fn read_snapshot(state_path: &Path) -> Result<Snapshot> {
    let model = storage::load_model(state_path)
        .with_context(|| format!("failed to load {}", state_path.display()))?;
    Ok(Snapshot {
        projects: model.projects,
        threads: model.threads,
    })
}

fn list_projects(snapshot: &Snapshot) -> Result<()> {
    for project in &snapshot.projects {
        println!("{}\t{}\t{}", project.slug, project.id, project.repo_path.display());
    }
    Ok(())
}

fn list_threads(snapshot: &Snapshot, project: Option<&str>) -> Result<()> {
    let project_id = project
        .map(|key| find_project(snapshot, key).map(|p| p.id))
        .transpose()?;
    for thread in snapshot
        .threads
        .iter()
        .filter(|t| project_id.map_or(true, |id| t.project_id == id))
    {
        print_thread(thread);
    }
    Ok(())
}

async fn thread_command(orchestrator: &ThreadOrchestrator, cmd: ThreadCommand) -> Result<()> {
    let snapshot = orchestrator.snapshot();
    match cmd {
        ThreadCommand::New {
            project,
            agent,
            shell,
        } => {
            let project = find_project(&snapshot, &project)?;
            let thread = orchestrator.create_thread(project.id, agent, !shell).await?;
            print_thread(&thread);
        }
        ThreadCommand::Main { project } => {
            let project = find_project(&snapshot, &project)?;
            let thread = orchestrator.create_main_thread(project.id).await?;
            print_thread(&thread);
        }
        ThreadCommand::List { project } => list_threads(&snapshot, project.as_deref())?,
        ThreadCommand::Rename { thread, name } => {
            let thread = find_thread(&snapshot, &thread)?;
            let renamed = orchestrator.rename_thread(thread.id, &name).await?;
            print_thread(&renamed);
        }
        ThreadCommand::Archive { thread, yes } => {
            let thread = find_thread(&snapshot, &thread)?;
            orchestrator
                .archive_thread(thread.id, yes)
                .await?
                .into_result()
                .with_context(|| format!("{} was not archived, pass --yes to force", thread.name))?;
            println!("archived {}", thread.name);
        }
        ThreadCommand::Delete { thread } => {
            let thread = find_thread(&snapshot, &thread)?;
            orchestrator.delete_thread(thread.id).await?;
            println!("deleted {}", thread.name);
        }
    }
    Ok(())
}

async fn tab_command(orchestrator: &ThreadOrchestrator, cmd: TabCommand) -> Result<()> {
    let snapshot = orchestrator.snapshot();
    match cmd {
        TabCommand::Add {
            thread,
            shell,
            agent,
            prompt,
        } => {
            let thread = find_thread(&snapshot, &thread)?;
            let tab = orchestrator.add_tab(thread.id, !shell, agent, prompt).await?;
            println!("{}", tab.session_name);
        }
        TabCommand::Remove { thread, session } => {
            let thread = find_thread(&snapshot, &thread)?;
            orchestrator.remove_tab(thread.id, &session).await?;
        }
    }
    Ok(())
}

fn find_project<'a>(snapshot: &'a Snapshot, key: &str) -> Result<&'a Project> {
    snapshot
        .projects
        .iter()
        .find(|p| p.slug == key || p.id.to_string() == key)
        .ok_or_else(|| anyhow!("no project {key}"))
}

fn find_thread<'a>(snapshot: &'a Snapshot, key: &str) -> Result<&'a Thread> {
    snapshot
        .threads
        .iter()
        .find(|t| t.id.to_string() == key || t.slug.as_deref() == Some(key) || t.name == key)
        .ok_or_else(|| anyhow!("no thread {key}"))
}

fn print_thread(thread: &Thread) {
    let sessions: Vec<&str> = thread.session_names().collect();
    println!(
        "{}\t{}\t{}\t{}",
        thread.id,
        thread.name,
        thread.branch_name,
        sessions.join(",")
    );
}

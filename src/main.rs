use agentful::adapters::AdapterRegistry;
use agentful::agent::streaming::DEFAULT_EVENT_CAPACITY;
use agentful::agent::{AgentEvent, AgentTask, ExecuteOptions};
use agentful::cli::commands::{
    DeployCommand, HistoryCommand, PipelineCommand, RemoteAddCommand, RemoteCommand, RemoteExecCommand,
    RemoteExecutionsCommand, RunCommand, ServeCommand, TriggerCommand, ValidateCommand, WorktreeCommand,
};
use agentful::cli::output::*;
use agentful::cli::{Cli, Command};
use agentful::core::{load_pipeline, ExecutionStatus, Pipeline};
use agentful::daemon::{DaemonCommand, DaemonManager, DaemonStatus, StopOutcome};
use agentful::execution::{ExecutionEngine, SchedulingStrategy};
use agentful::persistence::{create_summary, FileStateStore, PipelineHistory, StateStore};
use agentful::protocol::{AuthMode, ExecutionQuery};
use agentful::remote::{PollOptions, RemoteClient, RemoteConfig, RemoteRegistry};
use agentful::server::{self, ServerConfig};
use agentful::settings::{Settings, ENV_SECRET};
use agentful::worktree::WorktreeService;

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    let root = cli.project_root().context("Failed to resolve project root")?;
    let settings = Settings::load(&root)?;

    match &cli.command {
        Command::Pipeline(PipelineCommand::Run(cmd)) => run_pipeline(cmd, &root, &settings, cli.verbose).await?,
        Command::Pipeline(PipelineCommand::Validate(cmd)) => validate_pipeline(cmd)?,
        Command::Pipeline(PipelineCommand::History(cmd)) => show_history(cmd, &root)?,
        Command::Deploy(cmd) => deploy(cmd, &root)?,
        Command::Trigger(cmd) => trigger(cmd, &root, &settings, cli.verbose).await?,
        Command::Serve(cmd) => serve(cmd, &root, &settings, cli.verbose).await?,
        Command::Remote(cmd) => remote(cmd, &root).await?,
        Command::Worktree(cmd) => worktree(cmd, &root, &settings).await?,
    }

    Ok(())
}

fn project_store(root: &Path) -> Arc<dyn StateStore> {
    Arc::new(FileStateStore::for_project(root))
}

async fn run_pipeline(cmd: &RunCommand, root: &Path, settings: &Settings, verbose: bool) -> Result<()> {
    let definition = load_pipeline(&cmd.pipeline).context("Failed to load pipeline")?;
    println!("{}Loaded pipeline: {}", INFO, style(&definition.name).bold());

    let mut pipeline = Pipeline::from_definition(&definition)?;
    for (key, value) in &cmd.var {
        pipeline.variables.insert(key.clone(), value.clone());
        println!("{}Variable override: {} = {}", INFO, style(key).cyan(), style(value).dim());
    }
    if let Some(max_parallel) = cmd.max_parallel {
        pipeline.max_parallel = max_parallel.max(1);
    }

    let strategy = match cmd.strategy {
        Some(arg) => arg.into(),
        None => SchedulingStrategy::for_pipeline(&pipeline),
    };
    let engine = ExecutionEngine::new(settings.agent_executor(root), strategy);

    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = format_execution_event(&event, verbose) {
                println!("{}", line);
            }
        }
    });

    println!();
    let mut context = pipeline.initial_context();
    let status = engine.run(&mut pipeline, &mut context).await;
    // closes the event channel so the printer drains and exits
    drop(engine);
    let _ = printer.await;

    if cmd.show_output {
        for (step_id, outcome) in context.outcomes() {
            if !outcome.output.is_empty() {
                println!("\n{}{}:\n{}", INFO, style(step_id).bold(), format_output(&outcome.output, 40));
            }
        }
    }

    let summary = create_summary(&pipeline);
    if !cmd.no_history {
        match PipelineHistory::new(project_store(root)).record(&summary) {
            Ok(()) => println!(
                "\n{}Execution saved to history (ID: {})",
                INFO,
                style(&summary.execution_id.to_string()[..8]).dim()
            ),
            Err(e) => warn!("Failed to save run history: {}", e),
        }
    }

    if status == ExecutionStatus::Completed {
        println!("\n{}{} completed {}", CHECK, style(&pipeline.name).bold(), style("successfully").green());
        Ok(())
    } else {
        println!("\n{}{} {}", CROSS, style(&pipeline.name).bold(), format_status(status));
        error!(
            finished = pipeline.state.finished_steps(),
            total = pipeline.state.total_steps,
            failed = summary.failed_steps,
            skipped = summary.skipped_steps,
            "Pipeline did not complete"
        );
        std::process::exit(1);
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{}Validating pipeline...", INFO);

    match load_pipeline(&cmd.pipeline).and_then(|definition| {
        let pipeline = Pipeline::from_definition(&definition)?;
        Ok((definition, pipeline))
    }) {
        Ok((definition, pipeline)) => {
            println!("{}Pipeline definition is valid!", CHECK);
            println!("  Name: {}", style(&definition.name).bold());
            println!("  Steps: {}", style(definition.steps.len()).cyan());
            println!("  Variables: {}", style(definition.variables.len()).cyan());
            for (level, ids) in pipeline.levels().iter().enumerate() {
                println!("  Level {}: {}", level + 1, ids.join(", "));
            }

            if cmd.json {
                println!("\n{}", serde_json::to_string_pretty(&definition)?);
            }
            Ok(())
        }
        Err(e) => {
            println!("{}Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

fn show_history(cmd: &HistoryCommand, root: &Path) -> Result<()> {
    let history = PipelineHistory::new(project_store(root));
    let runs = history.list(cmd.pipeline.as_deref(), cmd.limit)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "executions": runs }))?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("{}No executions found", INFO);
        return Ok(());
    }

    println!("{}Execution history (latest {}):", INFO, runs.len());
    for summary in &runs {
        println!("  {}", format_execution_summary(summary));
    }
    Ok(())
}

fn deploy(cmd: &DeployCommand, root: &Path) -> Result<()> {
    let definition = load_pipeline(&cmd.pipeline).context("Failed to load pipeline")?;
    let path = AdapterRegistry::new().deploy(cmd.to, &definition, root, cmd.output.as_deref())?;
    println!(
        "{}Generated {} workflow: {}",
        CHECK,
        style(cmd.to).bold(),
        style(path.display()).cyan()
    );
    Ok(())
}

async fn trigger(cmd: &TriggerCommand, root: &Path, settings: &Settings, verbose: bool) -> Result<()> {
    let executor = settings.agent_executor(root);
    if !executor.has_agent(&cmd.agent) {
        bail!("Unknown agent '{}'", cmd.agent);
    }

    let (tx, mut rx) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
    let spinner = create_spinner(format!("{} working", cmd.agent));
    let progress = spinner.clone();
    let listener = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::Progress(percent) => progress.set_message(format!("{}%", percent)),
                AgentEvent::Log(line) if verbose => progress.println(line),
                AgentEvent::Log(_) => {}
            }
        }
    });

    let task = AgentTask::new(uuid::Uuid::new_v4().to_string(), &cmd.agent, &cmd.task);
    let options = ExecuteOptions::with_timeout(Duration::from_secs(cmd.timeout)).events(tx);
    let result = executor.execute(&task, &HashMap::new(), options).await;
    let _ = listener.await;
    spinner.finish_and_clear();

    let outcome = result?;
    if outcome.success {
        println!("{}{} finished", CHECK, style(&cmd.agent).green());
        println!("{}", outcome.output);
        Ok(())
    } else {
        println!(
            "{}{} failed: {}",
            CROSS,
            style(&cmd.agent).red(),
            outcome.error.as_deref().unwrap_or("unknown error")
        );
        if !outcome.output.is_empty() {
            println!("{}", format_output(&outcome.output, 20));
        }
        std::process::exit(1);
    }
}

fn server_config(cmd: &ServeCommand, settings: &Settings) -> ServerConfig {
    let mut config = settings.server_config();
    if let Some(port) = cmd.port {
        config.port = port;
    }
    if let Some(auth) = cmd.auth {
        config.auth = auth;
    }
    if let Some(secret) = &cmd.secret {
        config.secret = Some(secret.clone());
    }
    if let Some(workers) = cmd.workers {
        config.workers = workers;
    }
    config
}

async fn serve(cmd: &ServeCommand, root: &Path, settings: &Settings, verbose: bool) -> Result<()> {
    let daemon = DaemonManager::for_project(root);

    if cmd.status {
        match daemon.status()? {
            DaemonStatus::Running(record) => println!(
                "{}Server running (pid {}, port {}, since {})",
                CHECK,
                style(record.pid).cyan(),
                record.port,
                style(record.started_at.to_rfc3339()).dim()
            ),
            DaemonStatus::Stopped => println!("{}Server not running", INFO),
        }
        return Ok(());
    }

    if cmd.stop {
        match daemon.stop().await? {
            StopOutcome::Stopped { pid, forced } => {
                let how = if forced { " (killed)" } else { "" };
                println!("{}Server stopped (pid {}){}", CHECK, pid, how);
            }
            StopOutcome::NotRunning => println!("{}Server not running", INFO),
        }
        return Ok(());
    }

    let config = server_config(cmd, settings);
    config.validate()?;
    if config.auth == AuthMode::None {
        warn!("Authentication disabled; binding to localhost only");
    }

    if cmd.daemon {
        let mut args = vec![
            "serve".to_string(),
            "--port".to_string(),
            config.port.to_string(),
            "--auth".to_string(),
            config.auth.to_string(),
            "--workers".to_string(),
            config.workers.to_string(),
            "-C".to_string(),
            root.display().to_string(),
        ];
        if verbose {
            args.push("--verbose".to_string());
        }
        let mut command = DaemonCommand::current_exe(args)?.working_dir(root);
        // keep the secret off the process list
        if let Some(secret) = &config.secret {
            command = command.env(ENV_SECRET, secret);
        }

        let started = daemon.start(&command, config.port).await?;
        if started.healthy {
            println!(
                "{}Server started in background (pid {}, port {})",
                CHECK,
                style(started.pid).cyan(),
                started.port
            );
        } else {
            println!(
                "{}Server started (pid {}) but is not answering yet; see {}",
                WARN,
                started.pid,
                daemon.log_path().display()
            );
        }
        return Ok(());
    }

    println!(
        "{}Serving on port {} ({} auth)",
        ROCKET,
        style(config.port).cyan(),
        style(config.auth).bold()
    );
    server::serve(config, settings.agent_executor(root), project_store(root), server::shutdown_signal()).await?;
    Ok(())
}

async fn remote(cmd: &RemoteCommand, root: &Path) -> Result<()> {
    let registry = RemoteRegistry::new(project_store(root));

    match cmd {
        RemoteCommand::Add(RemoteAddCommand { name, url, auth, secret }) => {
            let mut remote = RemoteConfig::new(name, url, *auth);
            if let Some(secret) = secret {
                remote = remote.with_secret(secret);
            }
            registry.add(remote)?;
            println!("{}Added remote {} ({})", CHECK, style(name).bold(), url);
        }
        RemoteCommand::Remove { name } => {
            registry.remove(name)?;
            println!("{}Removed remote {}", CHECK, style(name).bold());
        }
        RemoteCommand::List => {
            let remotes = registry.list()?;
            if remotes.is_empty() {
                println!("{}No remotes configured", INFO);
            }
            for remote in remotes {
                println!("  {} {} ({})", style(&remote.name).bold(), remote.url, style(remote.auth).dim());
            }
        }
        RemoteCommand::Exec(exec) => remote_exec(exec, registry).await?,
        RemoteCommand::Status { name, execution_id } => {
            let client = RemoteClient::new(registry)?;
            let record = client.get_remote_execution_status(name, execution_id).await?;
            println!("{}", format_execution_record(&record));
            if !record.output.is_empty() {
                println!("\n{}", format_output(&record.output, 40));
            }
        }
        RemoteCommand::Agents { name } => {
            let client = RemoteClient::new(registry)?;
            let agents = client.list_remote_agents(name).await?;
            println!("{}Agents on {}:", INFO, style(name).bold());
            for agent in agents {
                println!("  {}", agent);
            }
        }
        RemoteCommand::Executions(RemoteExecutionsCommand { name, agent, state, limit }) => {
            let client = RemoteClient::new(registry)?;
            let query = ExecutionQuery {
                agent: agent.clone(),
                state: *state,
                limit: *limit,
            };
            let response = client.list_remote_executions(name, &query).await?;
            println!("{}{} of {} executions on {}:", INFO, response.executions.len(), response.total, style(name).bold());
            for record in &response.executions {
                println!(
                    "  {} {} {}",
                    style(&record.id).dim(),
                    style(&record.agent).bold(),
                    format_state(record.state)
                );
            }
        }
        RemoteCommand::Health { name } => {
            let client = RemoteClient::new(registry)?;
            match client.check_remote_health(name).await {
                Ok(health) => println!(
                    "{}{} is {} (v{}, {} auth, up {})",
                    CHECK,
                    style(name).bold(),
                    style(&health.status).green(),
                    health.version,
                    health.mode,
                    format_duration(Duration::from_secs(health.uptime))
                ),
                Err(e) => {
                    println!("{}{} unreachable: {}", CROSS, style(name).bold(), style(e).red());
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

async fn remote_exec(cmd: &RemoteExecCommand, registry: RemoteRegistry) -> Result<()> {
    let client = RemoteClient::new(registry)?;
    let timeout = cmd.timeout.map(Duration::from_secs);
    let started = client
        .execute_remote_agent(&cmd.name, &cmd.agent, &cmd.task, timeout)
        .await?;
    println!(
        "{}Started {} on {} ({})",
        ROCKET,
        style(&cmd.agent).bold(),
        style(&cmd.name).cyan(),
        style(&started.execution_id).dim()
    );
    if !cmd.wait {
        return Ok(());
    }

    let spinner = create_spinner(format!("waiting for {}", started.execution_id));
    let options = PollOptions::every(Duration::from_secs(cmd.interval.max(1)));
    let record = client
        .poll_execution(&cmd.name, &started.execution_id, options, |record| {
            spinner.set_message(format!("{}", record.state));
            ControlFlow::Continue(())
        })
        .await;
    spinner.finish_and_clear();
    let record = record?;

    println!("{}", format_execution_record(&record));
    if !record.output.is_empty() {
        println!("\n{}", record.output);
    }
    if record.state != agentful::protocol::ExecutionState::Completed {
        std::process::exit(1);
    }
    Ok(())
}

async fn worktree(cmd: &WorktreeCommand, root: &Path, settings: &Settings) -> Result<()> {
    let service = WorktreeService::new(root, settings.worktree_config(root), project_store(root));

    match cmd {
        WorktreeCommand::Create { purpose, branch } => match service.create(purpose, branch).await? {
            Some(record) => println!(
                "{}Created worktree {} on {} at {}",
                CHECK,
                style(&record.name).bold(),
                style(&record.branch).cyan(),
                record.path.display()
            ),
            None => println!("{}Worktree isolation is disabled in CI; using {}", INFO, root.display()),
        },
        WorktreeCommand::List => {
            let records = service.list()?;
            if records.is_empty() {
                println!("{}No active worktrees", INFO);
            }
            for record in records {
                println!(
                    "  {} {} {} (last active {})",
                    style(&record.name).bold(),
                    style(&record.branch).cyan(),
                    record.path.display(),
                    style(record.last_activity.to_rfc3339()).dim()
                );
            }
        }
        WorktreeCommand::Cleanup { .. } if !service.is_enabled() => {
            println!("{}Worktree isolation is disabled in CI; nothing to clean up", INFO);
        }
        WorktreeCommand::Cleanup { retention_days } => {
            let days = retention_days.unwrap_or(service.config().retention_days);
            let report = service.cleanup(days).await?;
            println!("{}Removed {} worktree(s)", CHECK, report.removed.len());
            for (name, reason) in &report.failed {
                println!("  {}{}: {}", WARN, style(name).yellow(), reason);
            }
        }
    }
    Ok(())
}

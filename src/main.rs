//! # FlowGrid — Automation Orchestration Server
//!
//! Runs the HTTP gateway, the schedule poller, and the dispatch drain in
//! one process. Task execution itself happens in an external worker pool
//! that consumes dispatch events and reports back through
//! `POST /api/v1/runs/complete`.
//!
//! Usage:
//!   flowgrid serve                          # Start the server (default port 7700)
//!   flowgrid serve --port 8080              # Custom port
//!   flowgrid init-tenant acme --plan pro    # Register a tenant
//!   flowgrid trigger <automation-id>        # Fire a manual run via the API

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use flowgrid_core::FlowGridConfig;
use flowgrid_core::types::TriggerType;
use flowgrid_engine::{EngineDb, RunOrchestrator};
use flowgrid_gateway::AppState;
use flowgrid_quota::{UsageDb, UsageGate};
use flowgrid_schedule::next_run_time;
use flowgrid_security::CredentialStore;

#[derive(Parser)]
#[command(name = "flowgrid", version, about = "⚙️ FlowGrid — Automation Orchestration Engine")]
struct Cli {
    /// Config file path (default: ~/.flowgrid/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the orchestration server.
    Serve {
        /// Gateway port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Data directory for the SQLite stores
        #[arg(long, default_value = "~/.flowgrid")]
        data_dir: String,
    },
    /// Register a tenant and assign its plan tier.
    InitTenant {
        /// Tenant identifier
        tenant_id: String,

        /// Plan tier (free, starter, pro, enterprise, or a configured tier)
        #[arg(long, default_value = "free")]
        plan: String,

        /// Data directory for the SQLite stores
        #[arg(long, default_value = "~/.flowgrid")]
        data_dir: String,
    },
    /// Fire a manual run of an automation through a running server.
    Trigger {
        /// Automation id
        automation_id: String,

        /// JSON input payload for the run
        #[arg(long, default_value = "{}")]
        input: String,

        /// Gateway base URL
        #[arg(long, default_value = "http://127.0.0.1:7700")]
        url: String,
    },
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "flowgrid=debug,tower_http=debug"
    } else {
        "flowgrid=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => FlowGridConfig::load_from(Path::new(&expand_path(path)))?,
        None => FlowGridConfig::load()?,
    };

    match cli.command {
        Command::Serve { port, data_dir } => serve(config, port, &expand_path(&data_dir)).await,
        Command::InitTenant { tenant_id, plan, data_dir } => {
            init_tenant(&config, &tenant_id, &plan, &expand_path(&data_dir))
        }
        Command::Trigger { automation_id, input, url } => {
            trigger(&automation_id, &input, &url).await
        }
    }
}

async fn serve(config: FlowGridConfig, port: Option<u16>, data_dir: &str) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let data_dir = Path::new(data_dir);

    let engine_db = EngineDb::open(&data_dir.join("flowgrid.db"))?;
    let (orchestrator, mut dispatch_rx) = RunOrchestrator::new(engine_db);
    let usage_db = UsageDb::open(&data_dir.join("usage.db"))?;
    let gate = UsageGate::new(usage_db, config.quota.clone());
    let credentials = CredentialStore::open(&data_dir.join("credentials.db"))?;

    let host = config.gateway.host.clone();
    let port = port.unwrap_or(config.gateway.port);
    let poll_interval = config.engine.poll_interval_secs;
    let stale_after = chrono::Duration::minutes(config.engine.stale_after_minutes as i64);

    let state = Arc::new(AppState::new(orchestrator, gate, credentials, config));

    println!("⚙️ FlowGrid v{}", env!("CARGO_PKG_VERSION"));
    println!("   🌐 API:      http://{host}:{port}/api/v1/health");
    println!("   🗄️ Data dir: {}", data_dir.display());
    println!("   ⏰ Poller:   every {poll_interval}s");
    println!();

    rebuild_schedule_queue(&state).await?;

    // Dispatch drain — the integration point with the external worker pool.
    // A real deployment replaces this consumer with a queue publisher; the
    // pool reports back via POST /api/v1/runs/complete.
    tokio::spawn(async move {
        while let Some(event) = dispatch_rx.recv().await {
            tracing::info!(
                "📤 Dispatch: run {} of automation {} ({} tasks, {} trigger)",
                event.run_id,
                event.automation_id,
                event.ordered_tasks.len(),
                event.trigger_type.as_str()
            );
        }
    });

    // Schedule poller — drains the due-queue and fires scheduled runs.
    {
        let state = state.clone();
        tokio::spawn(async move {
            poll_loop(state, poll_interval, stale_after).await;
        });
    }

    flowgrid_gateway::serve(state, &host, port)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(())
}

/// Seed the in-memory due-queue from persisted state after a restart.
async fn rebuild_schedule_queue(state: &Arc<AppState>) -> Result<()> {
    let now = Utc::now();
    let automations = {
        let orchestrator = state.orchestrator.lock().await;
        orchestrator.db().active_scheduled_automations()?
    };
    let mut queued = 0;
    for automation in &automations {
        let next = match automation.next_run_at {
            Some(next) => next,
            None => {
                // Missing next_run_at (crash between activate and set) —
                // recompute from the schedule.
                let Some(spec) = automation.trigger.schedule() else {
                    continue;
                };
                let next = next_run_time(spec, now);
                let orchestrator = state.orchestrator.lock().await;
                orchestrator.db().set_next_run(&automation.id, Some(next))?;
                next
            }
        };
        state.queue.lock().await.push(&automation.id, next);
        queued += 1;
    }
    if queued > 0 {
        tracing::info!("📅 Re-queued {queued} scheduled automation(s)");
    }
    Ok(())
}

/// The external "wake me at time T" collaborator: ticks, drains due
/// entries, re-validates each against current state, and fires.
async fn poll_loop(state: Arc<AppState>, interval_secs: u64, stale_after: chrono::Duration) {
    tracing::info!("⏰ Schedule poller started (check every {interval_secs}s)");
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;
        let now = Utc::now();

        let due = state.queue.lock().await.pop_due(now);
        for entry in due {
            let automation = {
                let orchestrator = state.orchestrator.lock().await;
                orchestrator.db().get_automation(&entry.automation_id).ok().flatten()
            };
            let Some(automation) = automation else { continue };

            // Lazy invalidation: paused/archived automations and entries
            // superseded by a newer next_run_at just drop out.
            if automation.status != flowgrid_core::types::AutomationStatus::Active {
                continue;
            }
            let Some(spec) = automation.trigger.schedule().cloned() else { continue };
            match automation.next_run_at {
                Some(next) if next <= now => {}
                _ => continue,
            }

            match flowgrid_gateway::trigger::fire(
                &state,
                &automation,
                TriggerType::Scheduled,
                serde_json::json!({}),
            )
            .await
            {
                Ok(run) => {
                    tracing::info!(
                        "🔔 Scheduled run {} fired for '{}'",
                        run.id,
                        automation.title
                    );
                    // The next occurrence is computed at completion time;
                    // clear the stale one so a restart doesn't re-fire.
                    let orchestrator = state.orchestrator.lock().await;
                    if let Err(e) = orchestrator.db().set_next_run(&automation.id, None) {
                        tracing::warn!("⚠️ Failed to clear next_run_at: {e}");
                    }
                }
                Err(e) => {
                    // Quota denial, concurrency hold, or a validation error:
                    // skip this occurrence and line up the next one rather
                    // than stalling the automation.
                    tracing::warn!("⚠️ Scheduled run of '{}' skipped: {e}", automation.title);
                    let next = next_run_time(&spec, now);
                    let orchestrator = state.orchestrator.lock().await;
                    if orchestrator.db().set_next_run(&automation.id, Some(next)).is_ok() {
                        drop(orchestrator);
                        state.queue.lock().await.push(&automation.id, next);
                    }
                }
            }
        }

        // Stale-run surfacing — observability only, no auto-transition.
        let stale = {
            let orchestrator = state.orchestrator.lock().await;
            orchestrator.stale_runs(stale_after, now).unwrap_or_default()
        };
        for run in stale {
            tracing::warn!(
                "🐌 Run {} of automation {} has been running since {} — worker pool may have lost it",
                run.id,
                run.automation_id,
                run.started_at
            );
        }
    }
}

fn init_tenant(config: &FlowGridConfig, tenant_id: &str, plan: &str, data_dir: &str) -> Result<()> {
    if !config.quota.tiers.contains_key(plan) {
        anyhow::bail!(
            "unknown plan tier '{plan}' (configured: {})",
            config.quota.tiers.keys().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    std::fs::create_dir_all(data_dir)?;
    let usage_db = UsageDb::open(&Path::new(data_dir).join("usage.db"))?;
    usage_db.set_plan(tenant_id, plan)?;
    println!("✅ Tenant '{tenant_id}' registered on plan '{plan}'");
    Ok(())
}

async fn trigger(automation_id: &str, input: &str, base_url: &str) -> Result<()> {
    let input: serde_json::Value =
        serde_json::from_str(input).map_err(|e| anyhow::anyhow!("--input is not valid JSON: {e}"))?;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base_url}/api/v1/automations/{automation_id}/trigger"))
        .json(&serde_json::json!({"input": input}))
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await?;

    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    if status.is_success() {
        println!("✅ Run accepted: {}", body["run_id"].as_str().unwrap_or("?"));
    } else {
        anyhow::bail!(
            "trigger failed ({status}): {}",
            body["error"].as_str().unwrap_or("unknown error")
        );
    }
    Ok(())
}

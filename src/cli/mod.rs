//! Command-line interface for cadenza.
//!
//! Provides the operational surface of the engine: the externally
//! scheduled tick, forced discovery/requeue passes, pipeline status,
//! and the audited halt/resume operations on the circuit breaker.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};

use crate::config::{self, ResolvedConfig};
use crate::core::{CadenceScheduler, ChannelDispatcher, CircuitBreaker, RequeueWorker};
use crate::discovery::DiscoveryEngine;
use crate::domain::Channel;
use crate::providers::{ChannelProviders, HttpDirectoryProvider, HttpMessenger};
use crate::store::ContactStore;

/// cadenza - Cadence-driven sales outreach pipeline orchestrator
#[derive(Parser, Debug)]
#[command(name = "cadenza")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one scheduler tick (wired to the external time trigger)
    Tick {
        /// Tick index provided by the external trigger
        #[arg(short, long)]
        index: u64,
    },

    /// Force one discovery pass
    Discover,

    /// Force one self-healing requeue pass
    Requeue,

    /// Show pipeline mode, funnel counts, and recent touches
    Status,

    /// Clear a tripped circuit breaker (audited)
    Resume {
        /// Why the pipeline is safe to resume
        #[arg(short, long)]
        reason: String,
    },

    /// Manually trip the circuit breaker
    Halt {
        /// Why the pipeline is being halted
        #[arg(short, long)]
        reason: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = config::load()?;

        match self.command {
            Commands::Tick { index } => run_tick(&config, index).await,
            Commands::Discover => run_discovery(&config).await,
            Commands::Requeue => run_requeue(&config),
            Commands::Status => show_status(&config),
            Commands::Resume { reason } => resume_pipeline(&config, &reason),
            Commands::Halt { reason } => halt_pipeline(&config, &reason),
            Commands::Config => show_config(&config),
        }
    }
}

/// Open the store configured for this invocation
fn open_store(config: &ResolvedConfig) -> Result<Arc<ContactStore>> {
    Ok(Arc::new(ContactStore::open(&config.db_path)?))
}

/// Wire the full engine: store, providers, and every component
fn build_scheduler(config: &ResolvedConfig, store: Arc<ContactStore>) -> CadenceScheduler {
    let p = &config.providers;

    let providers = ChannelProviders {
        sms: Arc::new(HttpMessenger::new(
            Channel::Sms,
            p.sms_url.clone(),
            p.sms_api_key.clone(),
        )),
        email: Arc::new(HttpMessenger::new(
            Channel::Email,
            p.email_url.clone(),
            p.email_api_key.clone(),
        )),
        voice: Arc::new(HttpMessenger::new(
            Channel::Voice,
            p.voice_url.clone(),
            p.voice_api_key.clone(),
        )),
    };

    let directory = Arc::new(HttpDirectoryProvider::new(
        p.directory_url.clone(),
        p.directory_api_key.clone(),
    ));

    let breaker = CircuitBreaker::new(store.clone(), config.breaker.clone());
    let dispatcher = Arc::new(ChannelDispatcher::new(
        store.clone(),
        providers,
        config.dispatch.clone(),
    ));
    let discovery = DiscoveryEngine::new(store.clone(), directory, config.discovery.clone());
    let requeue = RequeueWorker::new(store.clone(), config.requeue.clone());

    CadenceScheduler::new(
        store,
        breaker,
        dispatcher,
        discovery,
        requeue,
        config.cadence.clone(),
        config.dispatch.research_batch_cap,
    )
}

async fn run_tick(config: &ResolvedConfig, index: u64) -> Result<()> {
    let store = open_store(config)?;
    let scheduler = build_scheduler(config, store);

    let report = scheduler.run_tick(index).await;

    println!("Tick {} ({} mode)", report.tick, report.mode);
    if report.jobs_run.is_empty() {
        println!("  no jobs due");
    }
    for job in &report.jobs_run {
        println!("  ran: {}", job);
    }
    for (job, error) in &report.errors {
        println!("  failed: {} ({})", job, error);
    }

    Ok(())
}

async fn run_discovery(config: &ResolvedConfig) -> Result<()> {
    let store = open_store(config)?;

    let directory = Arc::new(HttpDirectoryProvider::new(
        config.providers.directory_url.clone(),
        config.providers.directory_api_key.clone(),
    ));
    let discovery = DiscoveryEngine::new(store, directory, config.discovery.clone());

    let summary = discovery.run_pass().await?;

    println!(
        "Discovery: {} queries, {} listings, {} inserted, {} duplicates, {} dropped, {} failed",
        summary.queries,
        summary.listings,
        summary.inserted,
        summary.duplicates,
        summary.dropped,
        summary.failures
    );
    Ok(())
}

fn run_requeue(config: &ResolvedConfig) -> Result<()> {
    let store = open_store(config)?;
    let requeue = RequeueWorker::new(store, config.requeue.clone());

    let summary = requeue.run_pass(Utc::now())?;

    println!(
        "Requeue: {} examined, {} requeued, {} trashed, {} skipped",
        summary.examined, summary.requeued, summary.trashed, summary.skipped
    );
    Ok(())
}

fn show_status(config: &ResolvedConfig) -> Result<()> {
    let store = open_store(config)?;

    let mode = store.mode()?;
    println!("Pipeline mode: {}", mode);

    if mode.is_halted() {
        if let Some(reason) = store.get_state("halted_reason")? {
            println!("Halted because: {}", reason);
        }
    }
    if let Some(tick) = store.get_state("last_tick")? {
        println!("Last tick: {}", tick);
    }
    println!("Discovery cursor: {}", store.discovery_cursor()?);
    println!("Heartbeats: {}", store.heartbeat_count()?);

    println!("\nFunnel:");
    let counts = store.funnel_counts()?;
    if counts.is_empty() {
        println!("  (no contacts yet)");
    }
    for (status, count) in counts {
        println!("  {:<22} {}", status, count);
    }

    println!("\nRecent touches:");
    let touches = store.recent_touches(10)?;
    if touches.is_empty() {
        println!("  (none)");
    }
    for touch in touches {
        println!(
            "  {}  {:<6} {:<9} contact {}",
            touch.created_at.format("%Y-%m-%d %H:%M:%S"),
            touch.channel,
            touch.outcome,
            touch.contact_id
        );
    }

    Ok(())
}

fn resume_pipeline(config: &ResolvedConfig, reason: &str) -> Result<()> {
    let store = open_store(config)?;
    let breaker = CircuitBreaker::new(store, config.breaker.clone());

    breaker.clear(reason)?;
    println!("Pipeline resumed: {}", reason);
    Ok(())
}

fn halt_pipeline(config: &ResolvedConfig, reason: &str) -> Result<()> {
    let store = open_store(config)?;
    let breaker = CircuitBreaker::new(store, config.breaker.clone());

    breaker.trip(reason)?;
    println!("Pipeline halted: {}", reason);
    Ok(())
}

fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("home:    {}", config.home.display());
    println!("db:      {}", config.db_path.display());
    match &config.config_file {
        Some(path) => println!("config:  {}", path.display()),
        None => println!("config:  (defaults, no file found)"),
    }
    println!(
        "cadence: research {} / message {} / voice {} / heartbeat {} / discovery {} / requeue {}",
        config.cadence.research_every,
        config.cadence.message_every,
        config.cadence.voice_every,
        config.cadence.heartbeat_every,
        config.cadence.discovery_every,
        config.cadence.requeue_every
    );
    println!(
        "breaker: {} failures in last {}",
        config.breaker.failure_threshold, config.breaker.sample_size
    );
    println!(
        "matrix:  {} niches x {} geographies",
        config.discovery.niches.len(),
        config.discovery.geographies.len()
    );
    Ok(())
}

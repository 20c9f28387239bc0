//! Guardian Gateway: Demo CLI
//!
//! Runs one or all of the four reference scenarios. Each scenario wires the
//! real Guardian components (token chain, engine, breakers, audit trail)
//! behind a gateway and drives requests through it with reference checks.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- token-lifecycle
//!   cargo run -p demo -- breaker-trip
//!   cargo run -p demo -- enforcement-disabled
//!   cargo run -p demo -- kill-switch

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use guardian_contracts::error::{GuardianError, GuardianResult};
use guardian_ref::scenarios::{
    breaker_trip, enforcement_disabled, kill_switch, token_lifecycle, ScenarioOutcome,
};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Guardian: capability-gated, fail-closed action validation demo.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Guardian gateway reference demo",
    long_about = "Runs Guardian reference scenarios showing token attenuation and revocation,\n\
                  circuit breakers, the enforcement toggle, the kill switch, and audit chain integrity."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all four scenarios in sequence.
    RunAll,
    /// Scenario 1: Token Lifecycle (attenuate, expire, rotate).
    TokenLifecycle,
    /// Scenario 2: Breaker Trip (open, skip, half-open recovery).
    BreakerTrip,
    /// Scenario 3: Enforcement Disabled (audited bypass).
    EnforcementDisabled,
    /// Scenario 4: Kill Switch (emergency override).
    KillSwitch,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all().await,
        Command::TokenLifecycle => token_lifecycle::run_scenario().await.and_then(check_chain),
        Command::BreakerTrip => breaker_trip::run_scenario().await.and_then(check_chain),
        Command::EnforcementDisabled => enforcement_disabled::run_scenario().await.and_then(check_chain),
        Command::KillSwitch => kill_switch::run_scenario().await.and_then(check_chain),
    };

    match result {
        Ok(()) => {
            println!("All selected scenarios completed successfully.");
        }
        Err(e) => {
            error!(error = %e, "demo failed");
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

// ── Scenario dispatch ─────────────────────────────────────────────────────────

async fn run_all() -> GuardianResult<()> {
    check_chain(token_lifecycle::run_scenario().await?)?;
    check_chain(breaker_trip::run_scenario().await?)?;
    check_chain(enforcement_disabled::run_scenario().await?)?;
    check_chain(kill_switch::run_scenario().await?)?;
    Ok(())
}

/// A scenario whose audit chain does not verify is a failed run.
fn check_chain(outcome: ScenarioOutcome) -> GuardianResult<()> {
    if outcome.chain_intact {
        Ok(())
    } else {
        Err(GuardianError::AuditWriteFailed {
            reason: format!(
                "audit chain broken after {} records",
                outcome.audit.records.len()
            ),
        })
    }
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Guardian — Capability-gated Action Validation");
    println!("Reference Demo");
    println!("=============================================");
    println!();
    println!("Guardian pipeline per request:");
    println!("  [1] Decode the capability token and verify its HMAC chain and caveats");
    println!("  [2] Require the action's scopes and minimum tier");
    println!("  [3] Kill switch, then enforcement toggle");
    println!("  [4] Required checks run concurrently behind per-check circuit breakers");
    println!("  [5] Worst-check-wins risk against the decision threshold; ambiguity denies");
    println!("  [6] Decision appended, redacted, to a SHA-256 hash-chained audit log");
    println!();
}

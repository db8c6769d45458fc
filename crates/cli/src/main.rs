//! `simctl` – manage eSIM profiles from the terminal through lpac.
//!
//! Every subcommand runs through the same command registry the daemon
//! serves, so `simctl profiles` and a `call list_profiles` request over the
//! socket behave identically.

mod config;
mod logging;
#[cfg(unix)]
mod serve;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use simdeck_core::commands::CommandError;
use simdeck_core::env::{parse_assignment, APDU_BACKEND_KEY, HTTP_BACKEND_KEY};
use simdeck_core::types::*;
use simdeck_core::{AppContext, CommandRegistry, CommandResult, EngineConfig};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Instant;

// ===========================================================================
// CLI definition
// ===========================================================================

#[derive(Parser)]
#[command(name = "simctl", version, about = "Manage eSIM profiles through the lpac engine")]
struct Cli {
    /// Extra YAML configuration layered over the shipped defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Engine executable (overrides `engine.program`).
    #[arg(long, global = true)]
    program: Option<PathBuf>,
    /// APDU backend for this run (sets LPAC_APDU).
    #[arg(long, global = true)]
    apdu: Option<String>,
    /// HTTP backend for this run (sets LPAC_HTTP).
    #[arg(long, global = true)]
    http: Option<String>,
    /// Extra engine environment as KEY=VALUE. Repeatable.
    #[arg(short = 'e', long = "env", global = true, value_parser = parse_env_arg)]
    env: Vec<String>,
    /// Output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the APDU and HTTP backends the engine offers.
    Drivers,
    /// List the devices of the current APDU backend.
    Devices,
    /// List the profiles on the eUICC.
    Profiles,
    /// Enable a profile.
    Enable { iccid: String },
    /// Disable a profile.
    Disable { iccid: String },
    /// Set a profile's nickname.
    Rename { iccid: String, name: String },
    /// Save a profile's icon to a file.
    Icon {
        iccid: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Pick an APDU backend and device and print the resulting environment.
    ///
    /// Prompts for whatever is not given on the command line.
    Select {
        #[arg(long)]
        backend: Option<String>,
        #[arg(long)]
        device: Option<String>,
    },
    /// Invoke a command by name with JSON args.
    Call {
        /// Command name (e.g. "list_profiles", "switch_profile", "set_env").
        cmd: String,
        /// JSON args to pass to the command.
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Run a scripted scenario from a YAML file.
    RunScenario {
        /// Path to the scenario YAML file.
        file: PathBuf,
    },
    /// Start daemon mode over a Unix socket.
    #[cfg(unix)]
    Serve {
        /// Path for the Unix domain socket.
        #[arg(long)]
        socket: PathBuf,
    },
}

fn parse_env_arg(s: &str) -> Result<String, String> {
    parse_assignment(s)
        .map(|_| s.to_string())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

// ===========================================================================
// Main
// ===========================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let app_config = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };
    logging::init_logging(&app_config.logging, cli.verbose);

    let ctx = match build_context(&cli, app_config.engine) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(2);
        }
    };
    let registry = CommandRegistry::new();
    let json = cli.json;

    match cli.command {
        Commands::Drivers => cmd_run("list_drivers", Value::Null, json, &ctx, &registry).await,
        Commands::Devices => cmd_run("list_apdu_devices", Value::Null, json, &ctx, &registry).await,
        Commands::Profiles => cmd_run("list_profiles", Value::Null, json, &ctx, &registry).await,
        Commands::Enable { iccid } => {
            let args = json!({ "iccid": iccid, "action": "enable" });
            cmd_run("switch_profile", args, json, &ctx, &registry).await
        }
        Commands::Disable { iccid } => {
            let args = json!({ "iccid": iccid, "action": "disable" });
            cmd_run("switch_profile", args, json, &ctx, &registry).await
        }
        Commands::Rename { iccid, name } => {
            let args = json!({ "iccid": iccid, "name": name });
            cmd_run("set_profile_name", args, json, &ctx, &registry).await
        }
        Commands::Icon { iccid, out } => cmd_icon(&iccid, &out, json, &ctx).await,
        Commands::Select { backend, device } => cmd_select(backend, device, json, &ctx).await,
        Commands::Call { cmd, args } => cmd_call(&cmd, &args, json, &ctx, &registry).await,
        Commands::RunScenario { file } => cmd_run_scenario(&file, json, &ctx, &registry).await,
        #[cfg(unix)]
        Commands::Serve { socket } => serve::run_daemon(socket, ctx, registry).await,
    }
}

/// Apply the per-run flags on top of the loaded engine config.
fn build_context(cli: &Cli, mut engine: EngineConfig) -> anyhow::Result<AppContext> {
    if let Some(program) = &cli.program {
        engine.program = program.clone();
    }
    // Seeds apply in order, so flags land after the configured ones.
    engine.env.extend(cli.env.iter().cloned());
    if let Some(apdu) = &cli.apdu {
        engine.env.push(format!("{}={}", APDU_BACKEND_KEY, apdu));
    }
    if let Some(http) = &cli.http {
        engine.env.push(format!("{}={}", HTTP_BACKEND_KEY, http));
    }

    tracing::debug!(program = %engine.program.display(), encoding = %engine.encoding, "engine configured");
    AppContext::default_platform(&engine).context("invalid engine configuration")
}

// ===========================================================================
// Subcommand implementations
// ===========================================================================

async fn cmd_run(name: &str, args: Value, json: bool, ctx: &AppContext, registry: &CommandRegistry) {
    let result = registry.execute(name, args, ctx).await;
    output_result(&result, json);
}

async fn cmd_call(cmd: &str, args_str: &str, json: bool, ctx: &AppContext, registry: &CommandRegistry) {
    let args: Value = match serde_json::from_str(args_str) {
        Ok(v) => v,
        Err(e) => {
            let r = result_err(
                cmd,
                &new_run_id(),
                0,
                Status::Error,
                ErrorCode::InvalidInput,
                format!("invalid JSON args: {}", e),
            );
            output_result(&r, json);
            return;
        }
    };

    cmd_run(cmd, args, json, ctx, registry).await;
}

async fn cmd_icon(iccid: &str, out: &Path, json: bool, ctx: &AppContext) {
    let run_id = new_run_id();
    let start = Instant::now();

    let result = match save_icon(iccid, out, ctx).await {
        Ok(data) => {
            let mut r = result_ok("icon", &run_id, start.elapsed().as_millis() as u64);
            r.data = Some(data);
            r
        }
        Err(e) => result_err(
            "icon",
            &run_id,
            start.elapsed().as_millis() as u64,
            e.status(),
            e.error_code(),
            e.to_string(),
        ),
    };
    output_result(&result, json);
}

async fn save_icon(iccid: &str, out: &Path, ctx: &AppContext) -> Result<Value, CommandError> {
    let profiles = ctx.client().list_profiles().await;
    let profile = profiles
        .iter()
        .find(|p| p.iccid == iccid)
        .ok_or_else(|| CommandError::InvalidInput(format!("no profile with ICCID {}", iccid)))?;

    let bytes = profile
        .icon_bytes()
        .ok_or_else(|| CommandError::Rejected(format!("profile {} has no icon", iccid)))?
        .map_err(|e| CommandError::Other(format!("icon of {} is not valid base64: {}", iccid, e)))?;

    tokio::fs::write(out, &bytes)
        .await
        .map_err(|e| CommandError::Other(format!("cannot write {}: {}", out.display(), e)))?;

    Ok(json!({
        "iccid": iccid,
        "path": out.display().to_string(),
        "format": profile.icon_format,
        "bytes": bytes.len(),
    }))
}

async fn cmd_select(backend: Option<String>, device: Option<String>, json: bool, ctx: &AppContext) {
    let run_id = new_run_id();
    let start = Instant::now();

    match select_backend_and_device(backend, device, ctx).await {
        Ok(assignments) if !json => {
            // Plain KEY=VALUE so the output can be fed back through `-e`.
            for (key, value) in &assignments {
                println!("{}={}", key, value.as_str().unwrap_or_default());
            }
        }
        Ok(assignments) => {
            let mut r = result_ok("select", &run_id, start.elapsed().as_millis() as u64);
            r.data = Some(Value::Object(assignments));
            output_result(&r, json);
        }
        Err(e) => {
            let r = result_err(
                "select",
                &run_id,
                start.elapsed().as_millis() as u64,
                e.status(),
                e.error_code(),
                e.to_string(),
            );
            output_result(&r, json);
        }
    }
}

async fn select_backend_and_device(
    backend: Option<String>,
    device: Option<String>,
    ctx: &AppContext,
) -> Result<serde_json::Map<String, Value>, CommandError> {
    let client = ctx.client();

    let backend = match backend {
        Some(b) => b,
        None => {
            let drivers = client.list_drivers().await?;
            if drivers.apdu_backends.is_empty() {
                return Err(CommandError::Rejected("the engine offers no APDU backends".into()));
            }
            let idx = prompt("APDU backend", drivers.apdu_backends.clone()).await?;
            drivers.apdu_backends[idx].clone()
        }
    };

    let selection = client.select_apdu_backend(&backend).await;
    let catalog = &selection.catalog;
    let mut assignments = serde_json::Map::new();
    assignments.insert(APDU_BACKEND_KEY.to_string(), Value::String(backend.clone()));

    if catalog.devices.is_empty() {
        if let Some(d) = device {
            return Err(CommandError::InvalidInput(format!(
                "backend {} has no device list, cannot select {}",
                backend, d
            )));
        }
        return Ok(assignments);
    }

    let known = |d: &str| catalog.devices.iter().any(|x| x.env_key == d);
    // A device stored for this backend is reused without prompting.
    let device = match device.or_else(|| selection.current_device.clone().filter(|d| known(d.as_str()))) {
        Some(d) if known(d.as_str()) => d,
        Some(d) => {
            return Err(CommandError::InvalidInput(format!(
                "backend {} has no device {}",
                backend, d
            )));
        }
        None => {
            let names = catalog
                .devices
                .iter()
                .map(|d| format!("{} ({})", d.display_name, d.env_key))
                .collect();
            let idx = prompt("Device", names).await?;
            catalog.devices[idx].env_key.clone()
        }
    };

    if !client.select_apdu_device(&device) {
        return Err(CommandError::Rejected(format!("cannot select device {}", device)));
    }
    assignments.insert(catalog.selector_key.clone(), Value::String(device));
    Ok(assignments)
}

/// Ask the user to pick one of `items`. Fails when stdin is not a terminal.
async fn prompt(title: &'static str, items: Vec<String>) -> Result<usize, CommandError> {
    if !std::io::stdin().is_terminal() {
        return Err(CommandError::InvalidInput(format!(
            "{} not given and stdin is not a terminal",
            title
        )));
    }

    tokio::task::spawn_blocking(move || {
        dialoguer::Select::new()
            .with_prompt(title)
            .items(&items)
            .default(0)
            .interact()
    })
    .await
    .map_err(|e| CommandError::Other(e.to_string()))?
    .map_err(|e| CommandError::Other(format!("selection aborted: {}", e)))
}

async fn cmd_run_scenario(file: &Path, json: bool, ctx: &AppContext, registry: &CommandRegistry) {
    let scenario = match std::fs::read_to_string(file)
        .with_context(|| format!("cannot read scenario file {}", file.display()))
        .and_then(|yaml| simdeck_core::scenario::load_scenario(&yaml).map_err(anyhow::Error::msg))
    {
        Ok(s) => s,
        Err(e) => {
            let r = result_err(
                "run-scenario",
                &new_run_id(),
                0,
                Status::Error,
                ErrorCode::InvalidInput,
                format!("{:#}", e),
            );
            output_result(&r, json);
            return;
        }
    };

    let scenario_result = simdeck_core::scenario::run_scenario(&scenario, ctx, registry).await;

    if json {
        let j = serde_json::to_string_pretty(&scenario_result).unwrap_or_default();
        println!("{}", j);
    } else {
        println!(
            "Scenario: {}",
            scenario_result.name.as_deref().unwrap_or("<unnamed>")
        );
        println!("Overall: {}", status_label(scenario_result.overall_status));
        for (i, sr) in scenario_result.step_results.iter().enumerate() {
            println!(
                "  Step {}: {} -> {} ({}ms)",
                i,
                sr.command,
                status_label(sr.status),
                sr.elapsed_ms
            );
            if let Some(ref err) = sr.error {
                println!("    {}: {}", err.code, err.message);
            }
        }
    }

    exit_for(scenario_result.overall_status);
}

// ===========================================================================
// Output helpers
// ===========================================================================

fn output_result(result: &CommandResult, json: bool) {
    if json {
        let j = serde_json::to_string_pretty(result).unwrap_or_default();
        println!("{}", j);
    } else {
        print_human(result);
    }
    exit_for(result.status);
}

/// Exit non-zero on fail (1) or error (2).
fn exit_for(status: Status) {
    match status {
        Status::Pass => {}
        Status::Fail => std::process::exit(1),
        Status::Error => std::process::exit(2),
    }
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Pass => "PASS",
        Status::Fail => "FAIL",
        Status::Error => "ERROR",
    }
}

fn print_human(r: &CommandResult) {
    println!("[{}] {} ({}ms)", status_label(r.status), r.command, r.elapsed_ms);

    if let Some(ref err) = r.error {
        println!("  error: {}: {}", err.code, err.message);
    }

    let Some(ref data) = r.data else {
        return;
    };
    if r.command == "list_profiles" {
        if let Ok(profiles) = serde_json::from_value::<Vec<Profile>>(data.clone()) {
            print_profiles(&profiles);
            return;
        }
    }
    if let Ok(s) = serde_json::to_string_pretty(data) {
        for line in s.lines() {
            println!("  {}", line);
        }
    }
}

fn print_profiles(profiles: &[Profile]) {
    if profiles.is_empty() {
        println!("  no profiles");
        return;
    }
    for p in profiles {
        let name = if p.nickname.is_empty() {
            &p.raw_name
        } else {
            &p.nickname
        };
        println!(
            "  {} {:<22} {:<24} {}",
            if p.is_enabled() { "*" } else { " " },
            p.iccid,
            name,
            p.service_provider
        );
    }
}

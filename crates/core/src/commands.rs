//! Command registry – name-based dispatch used by the CLI `call` command,
//! scenarios and the daemon.
//!
//! Commands take JSON args and produce a [`CommandResult`].

use crate::context::AppContext;
use crate::error::EngineError;
use crate::types::*;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, CommandError>> + Send + 'a>>;

/// Signature for all registered commands.
pub type CommandHandler = for<'a> fn(Value, &'a AppContext) -> CommandFuture<'a>;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The operation completed but reported failure.
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Other(String),
}

impl CommandError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CommandError::InvalidInput(_) => ErrorCode::InvalidInput,
            CommandError::Engine(EngineError::Execution { .. }) => ErrorCode::EngineFailure,
            CommandError::Engine(EngineError::Parse { .. }) => ErrorCode::ProtocolError,
            CommandError::Engine(EngineError::Rejected { .. }) => ErrorCode::Rejected,
            CommandError::Engine(EngineError::Launch(_)) => ErrorCode::LaunchFailed,
            CommandError::Engine(EngineError::Abandoned) => ErrorCode::InternalError,
            CommandError::Rejected(_) => ErrorCode::Rejected,
            CommandError::Other(_) => ErrorCode::InternalError,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            CommandError::Rejected(_) => Status::Fail,
            _ => Status::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct CommandRegistry {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            handlers: HashMap::new(),
        };
        reg.register("list_drivers", cmd_list_drivers);
        reg.register("list_apdu_devices", cmd_list_apdu_devices);
        reg.register("list_profiles", cmd_list_profiles);
        reg.register("switch_profile", cmd_switch_profile);
        reg.register("set_profile_name", cmd_set_profile_name);
        reg.register("get_env", cmd_get_env);
        reg.register("set_env", cmd_set_env);
        reg.register("del_env", cmd_del_env);
        reg.register("select_apdu_backend", cmd_select_apdu_backend);
        reg.register("select_apdu_device", cmd_select_apdu_device);
        reg.register("restore_apdu_backend", cmd_restore_apdu_backend);
        reg.register("log_history", cmd_log_history);
        reg
    }

    pub fn register(&mut self, name: &str, handler: CommandHandler) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Execute a command by name and return a full CommandResult.
    pub async fn execute(&self, name: &str, args: Value, ctx: &AppContext) -> CommandResult {
        let run_id = new_run_id();
        let start = Instant::now();

        let Some(handler) = self.handlers.get(name) else {
            return result_err(
                name,
                &run_id,
                start.elapsed().as_millis() as u64,
                Status::Error,
                ErrorCode::InvalidInput,
                format!("unknown command: {}", name),
            );
        };

        match handler(args, ctx).await {
            Ok(data) => {
                let mut r = result_ok(name, &run_id, start.elapsed().as_millis() as u64);
                r.data = Some(data);
                r
            }
            Err(e) => {
                tracing::debug!(command = name, error = %e, "command failed");
                result_err(
                    name,
                    &run_id,
                    start.elapsed().as_millis() as u64,
                    e.status(),
                    e.error_code(),
                    e.to_string(),
                )
            }
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn str_arg<'v>(args: &'v Value, field: &str) -> Result<&'v str, CommandError> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| CommandError::InvalidInput(format!("missing '{}' string field", field)))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::Other(e.to_string()))
}

// ===========================================================================
// Commands
// ===========================================================================

/// `list_drivers` – `{ "apduBackends": [...], "httpBackends": [...] }`.
fn cmd_list_drivers(_args: Value, ctx: &AppContext) -> CommandFuture<'_> {
    Box::pin(async move {
        let catalog = ctx.client().list_drivers().await?;
        to_json(&catalog)
    })
}

fn cmd_list_apdu_devices(_args: Value, ctx: &AppContext) -> CommandFuture<'_> {
    Box::pin(async move { to_json(&ctx.client().list_apdu_devices().await) })
}

fn cmd_list_profiles(_args: Value, ctx: &AppContext) -> CommandFuture<'_> {
    Box::pin(async move { to_json(&ctx.client().list_profiles().await) })
}

/// `switch_profile` – Args: `{ "iccid": "...", "action": "enable" | "disable" }`.
fn cmd_switch_profile(args: Value, ctx: &AppContext) -> CommandFuture<'_> {
    Box::pin(async move {
        let iccid = str_arg(&args, "iccid")?;
        let action: SwitchAction = str_arg(&args, "action")?
            .parse()
            .map_err(CommandError::InvalidInput)?;

        if !ctx.client().switch_profile(iccid, action).await {
            return Err(CommandError::Rejected(format!(
                "failed to {} profile {}",
                action.as_str(),
                iccid
            )));
        }
        Ok(serde_json::json!({ "iccid": iccid, "action": action }))
    })
}

/// `set_profile_name` – Args: `{ "iccid": "...", "name": "..." }`.
fn cmd_set_profile_name(args: Value, ctx: &AppContext) -> CommandFuture<'_> {
    Box::pin(async move {
        let iccid = str_arg(&args, "iccid")?;
        let name = str_arg(&args, "name")?;
        if !ctx.client().set_profile_name(iccid, name).await {
            return Err(CommandError::Rejected(format!(
                "failed to rename profile {}",
                iccid
            )));
        }
        Ok(serde_json::json!({ "iccid": iccid, "nickname": name }))
    })
}

fn cmd_get_env(args: Value, ctx: &AppContext) -> CommandFuture<'_> {
    Box::pin(async move {
        let key = str_arg(&args, "key")?;
        let value = ctx.client().get_env_key(key);
        Ok(serde_json::json!({ "key": key, "value": value }))
    })
}

fn cmd_set_env(args: Value, ctx: &AppContext) -> CommandFuture<'_> {
    Box::pin(async move {
        let key = str_arg(&args, "key")?;
        let value = str_arg(&args, "value")?;
        ctx.client().set_env_key(key, value);
        Ok(serde_json::json!({ "key": key, "value": value }))
    })
}

fn cmd_del_env(args: Value, ctx: &AppContext) -> CommandFuture<'_> {
    Box::pin(async move {
        let key = str_arg(&args, "key")?;
        ctx.client().del_env_key(key);
        Ok(serde_json::json!({ "key": key }))
    })
}

/// `select_apdu_backend` – Args: `{ "backend": "pcsc" }`. Returns the device catalog and stored device.
fn cmd_select_apdu_backend(args: Value, ctx: &AppContext) -> CommandFuture<'_> {
    Box::pin(async move {
        let backend = str_arg(&args, "backend")?;
        to_json(&ctx.client().select_apdu_backend(backend).await)
    })
}

fn cmd_select_apdu_device(args: Value, ctx: &AppContext) -> CommandFuture<'_> {
    Box::pin(async move {
        let device = str_arg(&args, "device")?;
        if !ctx.client().select_apdu_device(device) {
            return Err(CommandError::Rejected(
                "current backend has no device list".to_string(),
            ));
        }
        Ok(serde_json::json!({
            "key": ctx.client().device_selector_key(),
            "device": device,
        }))
    })
}

/// `restore_apdu_backend` – like `select_apdu_backend`, or `null` if nothing to restore.
fn cmd_restore_apdu_backend(_args: Value, ctx: &AppContext) -> CommandFuture<'_> {
    Box::pin(async move {
        let restored = ctx.client().restore_apdu_backend().await?;
        to_json(&restored)
    })
}

/// `log_history` – entries newest first.
fn cmd_log_history(_args: Value, ctx: &AppContext) -> CommandFuture<'_> {
    Box::pin(async move { to_json(&ctx.logger().history()) })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{lpa, ICCID};
    use crate::client::ClientOptions;
    use crate::env::EnvStore;
    use crate::platform::ScriptedRunner;
    use crate::traits::ProcessOutput;
    use std::sync::Arc;

    fn ctx(runner: ScriptedRunner) -> AppContext {
        AppContext::with_parts(ClientOptions::default(), Arc::new(runner), EnvStore::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_profiles_command() {
        let ctx = ctx(ScriptedRunner::new().reply(
            &["profile", "list"],
            lpa(0, "success", serde_json::json!([])),
        ));
        let reg = CommandRegistry::new();
        let r = reg.execute("list_profiles", serde_json::json!({}), &ctx).await;
        assert_eq!(r.status, Status::Pass);
        assert_eq!(r.data.unwrap(), serde_json::json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_command() {
        let ctx = ctx(ScriptedRunner::new());
        let reg = CommandRegistry::new();
        let r = reg.execute("format_card", serde_json::json!({}), &ctx).await;
        assert_eq!(r.status, Status::Error);
        assert_eq!(r.error.unwrap().code, ErrorCode::InvalidInput);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_profile_bad_action() {
        let ctx = ctx(ScriptedRunner::new());
        let reg = CommandRegistry::new();
        let r = reg
            .execute(
                "switch_profile",
                serde_json::json!({ "iccid": ICCID, "action": "toggle" }),
                &ctx,
            )
            .await;
        assert_eq!(r.status, Status::Error);
        assert_eq!(r.error.unwrap().code, ErrorCode::InvalidInput);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_profile_rejected_is_fail() {
        let ctx = ctx(ScriptedRunner::new().reply(
            &["profile", "enable", ICCID],
            lpa(-1, "es10c_enable_profile", Value::Null),
        ));
        let reg = CommandRegistry::new();
        let r = reg
            .execute(
                "switch_profile",
                serde_json::json!({ "iccid": ICCID, "action": "enable" }),
                &ctx,
            )
            .await;
        assert_eq!(r.status, Status::Fail);
        assert_eq!(r.error.unwrap().code, ErrorCode::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_drivers_engine_failure() {
        let ctx = ctx(ScriptedRunner::new().reply(
            &["driver", "list"],
            ProcessOutput::failure(1, "no reader"),
        ));
        let reg = CommandRegistry::new();
        let r = reg.execute("list_drivers", Value::Null, &ctx).await;
        assert_eq!(r.status, Status::Error);
        let err = r.error.unwrap();
        assert_eq!(err.code, ErrorCode::EngineFailure);
        assert!(err.message.contains("no reader"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_env_commands_and_history() {
        let ctx = ctx(ScriptedRunner::new());
        let reg = CommandRegistry::new();

        let r = reg
            .execute("set_env", serde_json::json!({ "key": "LPAC_HTTP", "value": "curl" }), &ctx)
            .await;
        assert_eq!(r.status, Status::Pass);

        let r = reg
            .execute("get_env", serde_json::json!({ "key": "LPAC_HTTP" }), &ctx)
            .await;
        assert_eq!(r.data.unwrap()["value"], "curl");

        let r = reg.execute("log_history", Value::Null, &ctx).await;
        let history = r.data.unwrap();
        assert_eq!(
            history[0]["message"],
            "Getting environment variable LPAC_HTTP: curl"
        );
        assert_eq!(history[0]["severity"], "info");
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_device_without_backend_fails() {
        let ctx = ctx(ScriptedRunner::new());
        let reg = CommandRegistry::new();
        let r = reg
            .execute("select_apdu_device", serde_json::json!({ "device": "0" }), &ctx)
            .await;
        assert_eq!(r.status, Status::Fail);
    }

    #[test]
    fn test_list_commands() {
        let reg = CommandRegistry::new();
        let names = reg.list();
        for name in [
            "list_drivers",
            "list_apdu_devices",
            "list_profiles",
            "switch_profile",
            "set_profile_name",
        ] {
            assert!(names.contains(&name), "missing {}", name);
        }
    }
}

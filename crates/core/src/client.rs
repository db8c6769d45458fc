//! Protocol client – typed engine operations on top of per-operation debouncing.
//!
//! Every operation builds an argument vector `[domain, verb, ...params]`,
//! funnels it through its own [`Debouncer`] and narrows the trailing JSON
//! document into a typed result. Only [`LpacClient::list_drivers`] surfaces
//! failures; the other operations log them and fall back to an empty/false
//! result.

use crate::config::{EngineConfig, EngineConfigError};
use crate::debounce::{Debouncer, DEFAULT_WINDOW};
use crate::env::EnvStore;
use crate::error::EngineError;
use crate::logger::Logger;
use crate::platform::TextEncoding;
use crate::protocol::{expect_success, narrow, parse_response, split_output};
use crate::traits::{Invocation, ProcessRunner};
use crate::types::*;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub type InvokeResult = Result<EngineResponse, EngineError>;

/// Debounced slot whose execution already yields the operation's final value.
type Slot<T> = Debouncer<Vec<String>, T>;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub program: PathBuf,
    pub encoding: TextEncoding,
    pub debounce_window: Duration,
    pub inherit_env: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("lpac"),
            encoding: TextEncoding::utf8(),
            debounce_window: DEFAULT_WINDOW,
            inherit_env: true,
        }
    }
}

impl ClientOptions {
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineConfigError> {
        Ok(Self {
            program: config.program.clone(),
            encoding: config.text_encoding()?,
            debounce_window: config.debounce_window(),
            inherit_env: config.inherit_env,
        })
    }
}

// ---------------------------------------------------------------------------
// Raw invocation
// ---------------------------------------------------------------------------

struct Invoker {
    runner: Arc<dyn ProcessRunner>,
    logger: Arc<dyn Logger>,
    env: EnvStore,
    options: ClientOptions,
}

impl Invoker {
    async fn execute(&self, args: Vec<String>) -> InvokeResult {
        let run_id = new_run_id();
        let start = Instant::now();
        let invocation = Invocation {
            program: self.options.program.clone(),
            args,
            env: self.env.snapshot(),
            inherit_env: self.options.inherit_env,
            encoding: self.options.encoding,
        };
        tracing::debug!(run_id = %run_id, args = ?invocation.args, "launching engine");

        let output = match self.runner.run(&invocation).await {
            Ok(output) => output,
            Err(e) => {
                let err = EngineError::from(e);
                self.logger.error(&err.to_string());
                return Err(err);
            }
        };
        tracing::debug!(
            run_id = %run_id,
            code = output.code,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "engine exited"
        );

        if output.code != 0 {
            let err = EngineError::Execution {
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            };
            self.logger.error(&err.to_string());
            return Err(err);
        }

        let (diagnostics, last) = split_output(&output.stdout);
        for line in diagnostics {
            self.logger.info(line);
        }

        parse_response(last).inspect_err(|_| {
            self.logger
                .error(&format!("Failed to parse JSON, discarding last line: {}", last));
        })
    }
}

/// Build a slot that runs the engine and then `finish`es the raw response.
///
/// `finish` runs once per execution, so whatever it logs is logged once per
/// burst no matter how many callers share the outcome.
fn slot<T, F>(invoker: &Arc<Invoker>, window: Duration, finish: F) -> Slot<T>
where
    T: Clone + Send + 'static,
    F: Fn(&Invoker, &[String], InvokeResult) -> T + Send + Sync + 'static,
{
    let invoker = Arc::clone(invoker);
    let finish = Arc::new(finish);
    Debouncer::new(window, move |args: Vec<String>| {
        let invoker = Arc::clone(&invoker);
        let finish = Arc::clone(&finish);
        async move {
            let outcome = invoker.execute(args.clone()).await;
            finish(&invoker, &args, outcome)
        }
    })
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Positional parameter of an argument vector, `""` when absent.
fn param(args: &[String], index: usize) -> &str {
    args.get(index).map(String::as_str).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Per-operation finishing: narrowing and recovery
// ---------------------------------------------------------------------------

fn finish_drivers(inv: &Invoker, _: &[String], outcome: InvokeResult) -> Result<DriverCatalog, EngineError> {
    narrow(outcome?.payload).inspect_err(|e| {
        inv.logger.error(&format!("Unexpected driver list payload: {}", e));
    })
}

fn finish_apdu_devices(inv: &Invoker, _: &[String], outcome: InvokeResult) -> ApduCatalog {
    match outcome.and_then(|r| narrow::<ApduCatalog>(r.payload)) {
        Ok(catalog) => catalog,
        Err(e) => {
            inv.logger.error(&format!("Error getting APDU: {}", e));
            ApduCatalog::default()
        }
    }
}

fn finish_profiles(inv: &Invoker, _: &[String], outcome: InvokeResult) -> Vec<Profile> {
    let profiles = outcome.and_then(|r| {
        let lpa = expect_success(r.payload)?;
        if lpa.data.is_null() {
            return Ok(Vec::new());
        }
        narrow::<Vec<Profile>>(lpa.data)
    });
    match profiles {
        Ok(profiles) => profiles,
        Err(EngineError::Rejected { message, .. }) => {
            inv.logger
                .error(&format!("Failed to get profiles list, message: {}", message));
            Vec::new()
        }
        Err(e) => {
            inv.logger.error(&format!("Error getting profiles: {}", e));
            Vec::new()
        }
    }
}

/// `args` is `[profile, enable|disable, iccid]`.
fn finish_switch(inv: &Invoker, args: &[String], outcome: InvokeResult) -> bool {
    match outcome.and_then(|r| expect_success(r.payload)) {
        Ok(_) => {
            inv.logger
                .info(&format!("Profile switched successfully: {}", param(args, 2)));
            true
        }
        Err(EngineError::Rejected { message, .. }) => {
            inv.logger
                .error(&format!("Failed to switch profile, message: {}", message));
            false
        }
        Err(e) => {
            inv.logger.error(&format!("Error switching profile: {}", e));
            false
        }
    }
}

/// `args` is `[profile, nickname, iccid, name]`. Needs `message == "success"`
/// and `code == 0`.
fn finish_nickname(inv: &Invoker, args: &[String], outcome: InvokeResult) -> bool {
    let renamed = outcome.and_then(|r| {
        let lpa: LpaPayload = narrow(r.payload)?;
        if lpa.is_success() && lpa.code == Some(0) {
            Ok(lpa)
        } else {
            Err(EngineError::Rejected {
                code: lpa.code.unwrap_or(-1),
                message: lpa.message,
            })
        }
    });
    match renamed {
        Ok(_) => {
            inv.logger.info(&format!(
                "Profile name set successfully: {} -> {}",
                param(args, 2),
                param(args, 3)
            ));
            true
        }
        Err(EngineError::Rejected { code, message }) => {
            inv.logger.error(&format!(
                "Failed to set profile name, message: {}, code: {}",
                message, code
            ));
            false
        }
        Err(e) => {
            inv.logger.error(&format!("Error setting profile name: {}", e));
            false
        }
    }
}

// ===========================================================================
// Client
// ===========================================================================

pub struct LpacClient {
    invoker: Arc<Invoker>,
    drivers: Slot<Result<DriverCatalog, EngineError>>,
    apdu_devices: Slot<ApduCatalog>,
    profiles: Slot<Vec<Profile>>,
    switch: Slot<bool>,
    nickname: Slot<bool>,
    /// Selector key learned from the last device listing of the selected backend.
    pub(crate) device_key: Mutex<Option<String>>,
}

impl LpacClient {
    pub fn new(
        options: ClientOptions,
        runner: Arc<dyn ProcessRunner>,
        logger: Arc<dyn Logger>,
        env: EnvStore,
    ) -> Self {
        let window = options.debounce_window;
        let invoker = Arc::new(Invoker {
            runner,
            logger,
            env,
            options,
        });
        Self {
            drivers: slot(&invoker, window, finish_drivers),
            apdu_devices: slot(&invoker, window, finish_apdu_devices),
            profiles: slot(&invoker, window, finish_profiles),
            switch: slot(&invoker, window, finish_switch),
            nickname: slot(&invoker, window, finish_nickname),
            invoker,
            device_key: Mutex::new(None),
        }
    }

    pub fn env(&self) -> &EnvStore {
        &self.invoker.env
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.invoker.logger
    }

    /// Wait on `slot`, substituting `fallback` if the burst was torn down.
    async fn call<T>(&self, slot: &Slot<T>, args: Vec<String>, fallback: T) -> T
    where
        T: Clone + Send + 'static,
    {
        match slot.invoke(args).await {
            Ok(value) => value,
            Err(e) => {
                self.logger().error(&EngineError::from(e).to_string());
                fallback
            }
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// `driver list` – available APDU and HTTP backends. Failures propagate.
    pub async fn list_drivers(&self) -> Result<DriverCatalog, EngineError> {
        self.drivers.invoke(argv(&["driver", "list"])).await?
    }

    /// `driver apdu list` – devices of the selected APDU backend, or an empty
    /// catalog when none can be listed.
    pub async fn list_apdu_devices(&self) -> ApduCatalog {
        self.call(&self.apdu_devices, argv(&["driver", "apdu", "list"]), ApduCatalog::default())
            .await
    }

    /// `profile list` – profiles on the card, or empty on any failure.
    pub async fn list_profiles(&self) -> Vec<Profile> {
        self.call(&self.profiles, argv(&["profile", "list"]), Vec::new()).await
    }

    /// `profile enable|disable <iccid>` – true iff the engine reports success.
    pub async fn switch_profile(&self, iccid: &str, action: SwitchAction) -> bool {
        self.call(&self.switch, argv(&["profile", action.as_str(), iccid]), false)
            .await
    }

    /// `profile nickname <iccid> <name>` – true iff the engine reports
    /// `message == "success"` and `code == 0`.
    pub async fn set_profile_name(&self, iccid: &str, name: &str) -> bool {
        self.call(&self.nickname, argv(&["profile", "nickname", iccid, name]), false)
            .await
    }

    // -----------------------------------------------------------------------
    // Environment accessors
    // -----------------------------------------------------------------------

    pub fn get_env_key(&self, key: &str) -> Option<String> {
        let value = self.env().get(key);
        self.logger().info(&format!(
            "Getting environment variable {}: {}",
            key,
            value.as_deref().unwrap_or("null")
        ));
        value
    }

    pub fn set_env_key(&self, key: &str, value: &str) {
        self.logger()
            .info(&format!("Setting environment variable {} to {}", key, value));
        self.env().set(key, value);
    }

    pub fn del_env_key(&self, key: &str) {
        self.logger()
            .info(&format!("Deleting environment variable {}", key));
        self.env().delete(key);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

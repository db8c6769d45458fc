use crate::logger::LogEntry;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Engine wire format – the trailing JSON line
// ---------------------------------------------------------------------------

/// `{ "type": ..., "payload": ... }` as printed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Payload of `lpa` responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpaPayload {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl LpaPayload {
    pub const SUCCESS: &'static str = "success";

    pub fn is_success(&self) -> bool {
        self.message == Self::SUCCESS
    }
}

// ---------------------------------------------------------------------------
// Typed results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverCatalog {
    #[serde(default, alias = "LPAC_APDU")]
    pub apdu_backends: Vec<String>,
    #[serde(default, alias = "LPAC_HTTP")]
    pub http_backends: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApduCatalog {
    /// Environment key that selects a device for this backend,
    /// e.g. `LPAC_APDU_PCSC_DRV_IFID`.
    #[serde(default, alias = "env")]
    pub selector_key: String,
    #[serde(default, alias = "data")]
    pub devices: Vec<ApduDevice>,
}

/// Outcome of choosing an APDU backend: its devices plus the device already
/// stored under its selector key, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSelection {
    #[serde(flatten)]
    pub catalog: ApduCatalog,
    #[serde(default)]
    pub current_device: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApduDevice {
    /// Value to store under the catalog's selector key.
    #[serde(alias = "env")]
    pub env_key: String,
    #[serde(alias = "name")]
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileState {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub iccid: String,
    #[serde(alias = "isdpAid")]
    pub application_id: String,
    #[serde(alias = "profileState")]
    pub state: ProfileState,
    #[serde(default, alias = "profileNickname", deserialize_with = "nullable_string")]
    pub nickname: String,
    #[serde(default, alias = "serviceProviderName", deserialize_with = "nullable_string")]
    pub service_provider: String,
    #[serde(default, alias = "profileName", deserialize_with = "nullable_string")]
    pub raw_name: String,
    #[serde(default, alias = "iconType")]
    pub icon_format: Option<String>,
    #[serde(default, alias = "icon")]
    pub icon_data: Option<String>,
    #[serde(default, alias = "profileClass", deserialize_with = "nullable_string")]
    pub profile_class: String,
}

impl Profile {
    /// Decoded icon image, if the engine sent one.
    pub fn icon_bytes(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.icon_data
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| general_purpose::STANDARD.decode(s.trim()))
    }

    pub fn is_enabled(&self) -> bool {
        self.state == ProfileState::Enabled
    }
}

fn nullable_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchAction {
    Enable,
    Disable,
}

impl SwitchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchAction::Enable => "enable",
            SwitchAction::Disable => "disable",
        }
    }
}

impl std::str::FromStr for SwitchAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enable" => Ok(SwitchAction::Enable),
            "disable" => Ok(SwitchAction::Disable),
            other => Err(format!("expected 'enable' or 'disable', got '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Result envelope – the stable output contract of every front-end
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub run_id: String,
    pub command: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pass,
    Fail,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    EngineFailure,
    ProtocolError,
    Rejected,
    LaunchFailed,
    Timeout,
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        f.write_str(&s)
    }
}

// ---------------------------------------------------------------------------
// Scenario types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub call: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default = "default_expect_status")]
    pub expect_status: Status,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_expect_status() -> Status {
    Status::Pass
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: Option<String>,
    pub overall_status: Status,
    pub step_results: Vec<CommandResult>,
}

// ---------------------------------------------------------------------------
// Daemon protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Set on streamed log notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<LogEntry>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Generate a new run ID (UUIDv4).
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Build a passing CommandResult (caller fills in data).
pub fn result_ok(command: &str, run_id: &str, elapsed_ms: u64) -> CommandResult {
    CommandResult {
        run_id: run_id.to_string(),
        command: command.to_string(),
        status: Status::Pass,
        error: None,
        elapsed_ms,
        data: None,
    }
}

/// Build a CommandResult carrying an error with the given status.
pub fn result_err(
    command: &str,
    run_id: &str,
    elapsed_ms: u64,
    status: Status,
    code: ErrorCode,
    message: impl Into<String>,
) -> CommandResult {
    CommandResult {
        run_id: run_id.to_string(),
        command: command.to_string(),
        status,
        error: Some(ErrorInfo {
            code,
            message: message.into(),
            details: serde_json::Value::Null,
        }),
        elapsed_ms,
        data: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_from_engine_fields() {
        let p: Profile = serde_json::from_value(json!({
            "iccid": "8937204016920043713",
            "isdpAid": "a0000005591010ffffffff8900001000",
            "profileState": "enabled",
            "profileNickname": null,
            "serviceProviderName": "eSIM Internet",
            "profileName": "Top_Connect_eSIM",
            "iconType": "png",
            "icon": "iVBORw0KGgo=",
            "profileClass": "operational"
        }))
        .unwrap();

        assert_eq!(p.application_id, "a0000005591010ffffffff8900001000");
        assert!(p.is_enabled());
        assert_eq!(p.nickname, "");
        assert_eq!(p.raw_name, "Top_Connect_eSIM");
        assert_eq!(p.icon_format.as_deref(), Some("png"));
        let icon = p.icon_bytes().unwrap().unwrap();
        assert_eq!(&icon[1..4], b"PNG");
    }

    #[test]
    fn test_profile_without_icon() {
        let p: Profile = serde_json::from_value(json!({
            "iccid": "1",
            "isdpAid": "a0",
            "profileState": "disabled",
            "profileNickname": "Travel",
            "serviceProviderName": "Op",
            "profileName": "op",
            "iconType": null,
            "icon": null,
            "profileClass": "operational"
        }))
        .unwrap();
        assert!(p.icon_bytes().is_none());
        assert_eq!(p.nickname, "Travel");
        assert_eq!(p.state, ProfileState::Disabled);
    }

    #[test]
    fn test_driver_catalog_from_engine_keys() {
        let c: DriverCatalog = serde_json::from_value(json!({
            "LPAC_APDU": ["pcsc", "at"],
            "LPAC_HTTP": ["curl"]
        }))
        .unwrap();
        assert_eq!(c.apdu_backends, vec!["pcsc", "at"]);
        assert_eq!(c.http_backends, vec!["curl"]);

        let out = serde_json::to_value(&c).unwrap();
        assert_eq!(out["apduBackends"][1], "at");
    }

    #[test]
    fn test_apdu_catalog_from_engine_keys() {
        let c: ApduCatalog = serde_json::from_value(json!({
            "env": "LPAC_APDU_PCSC_DRV_IFID",
            "data": [{ "env": "0", "name": "ACS ACR39U" }]
        }))
        .unwrap();
        assert_eq!(c.selector_key, "LPAC_APDU_PCSC_DRV_IFID");
        assert_eq!(c.devices[0].env_key, "0");
        assert_eq!(c.devices[0].display_name, "ACS ACR39U");
    }

    #[test]
    fn test_switch_action_parse() {
        assert_eq!("enable".parse::<SwitchAction>(), Ok(SwitchAction::Enable));
        assert_eq!("disable".parse::<SwitchAction>(), Ok(SwitchAction::Disable));
        assert!("toggle".parse::<SwitchAction>().is_err());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::EngineFailure.to_string(), "ENGINE_FAILURE");
    }
}

//! Scenario runner – execute scripted flows from YAML files.
//!
//! Steps run strictly one after another, so a step may rely on the effects
//! of the previous one (e.g. switch a profile, then list profiles).

use crate::commands::CommandRegistry;
use crate::context::AppContext;
use crate::types::*;
use std::time::Duration;

/// Load a scenario from a YAML string.
pub fn load_scenario(yaml: &str) -> Result<Scenario, String> {
    serde_yaml::from_str(yaml).map_err(|e| format!("failed to parse scenario YAML: {}", e))
}

/// Execute a scenario and return the overall result.
pub async fn run_scenario(
    scenario: &Scenario,
    ctx: &AppContext,
    registry: &CommandRegistry,
) -> ScenarioResult {
    let mut step_results = Vec::new();
    let mut overall = Status::Pass;

    for (i, step) in scenario.steps.iter().enumerate() {
        let timeout = Duration::from_millis(step.timeout_ms);
        let run = registry.execute(&step.call, step.args.clone(), ctx);
        let result = match tokio::time::timeout(timeout, run).await {
            Ok(r) => r,
            Err(_) => result_err(
                &step.call,
                &new_run_id(),
                step.timeout_ms,
                Status::Error,
                ErrorCode::Timeout,
                format!("step timed out after {}ms", step.timeout_ms),
            ),
        };

        if result.status != step.expect_status {
            tracing::warn!(
                step = i,
                call = %step.call,
                expected = ?step.expect_status,
                actual = ?result.status,
                "scenario step status mismatch"
            );
            overall = Status::Fail;
        }
        step_results.push(result);
    }

    ScenarioResult {
        name: scenario.name.clone(),
        overall_status: overall,
        step_results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{lpa, ICCID};
    use crate::client::ClientOptions;
    use crate::env::EnvStore;
    use crate::platform::ScriptedRunner;
    use std::sync::Arc;

    fn ctx(runner: ScriptedRunner) -> (AppContext, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        let ctx = AppContext::with_parts(ClientOptions::default(), runner.clone(), EnvStore::new());
        (ctx, runner)
    }

    #[test]
    fn test_parse_scenario() {
        let yaml = r#"
name: switch and relist
steps:
  - call: switch_profile
    args:
      iccid: "8937204016920043713"
      action: enable
    expect_status: pass
    timeout_ms: 5000
  - call: list_profiles
"#;
        let s = load_scenario(yaml).expect("should parse");
        assert_eq!(s.name, Some("switch and relist".into()));
        assert_eq!(s.steps.len(), 2);
        assert_eq!(s.steps[1].expect_status, Status::Pass);
        assert_eq!(s.steps[1].timeout_ms, 30_000);
    }

    #[test]
    fn test_parse_scenario_rejects_unknown_status() {
        let yaml = r#"
steps:
  - call: list_profiles
    expect_status: maybe
"#;
        assert!(load_scenario(yaml).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_run_in_order() {
        let (ctx, runner) = ctx(ScriptedRunner::new()
            .reply(&["profile", "enable", ICCID], lpa(0, "success", serde_json::Value::Null))
            .reply(&["profile", "list"], lpa(0, "success", serde_json::json!([]))));
        let yaml = format!(
            r#"
steps:
  - call: switch_profile
    args: {{ iccid: "{}", action: enable }}
  - call: list_profiles
"#,
            ICCID
        );
        let scenario = load_scenario(&yaml).unwrap();
        let result = run_scenario(&scenario, &ctx, &CommandRegistry::new()).await;

        assert_eq!(result.overall_status, Status::Pass);
        let args: Vec<String> = runner.calls().iter().map(|c| c.args.join(" ")).collect();
        assert_eq!(args, vec![format!("profile enable {}", ICCID), "profile list".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expectation_mismatch_fails() {
        let (ctx, _) = ctx(ScriptedRunner::new());
        let yaml = r#"
steps:
  - call: select_apdu_device
    args: { device: "0" }
    expect_status: fail
  - call: list_drivers
"#;
        let scenario = load_scenario(yaml).unwrap();
        let result = run_scenario(&scenario, &ctx, &CommandRegistry::new()).await;

        assert_eq!(result.step_results[0].status, Status::Fail);
        assert_eq!(result.step_results[1].status, Status::Error);
        assert_eq!(result.overall_status, Status::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout() {
        let (ctx, _) = ctx(ScriptedRunner::new());
        let yaml = r#"
steps:
  - call: list_profiles
    timeout_ms: 100
    expect_status: error
"#;
        let scenario = load_scenario(yaml).unwrap();
        let result = run_scenario(&scenario, &ctx, &CommandRegistry::new()).await;

        // The debounce window alone outlasts the step budget.
        let err = result.step_results[0].error.as_ref().unwrap();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(result.overall_status, Status::Pass);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_step_never_reaches_engine() {
        let (ctx, runner) = ctx(ScriptedRunner::new()
            .reply(&["profile", "enable", ICCID], lpa(0, "success", serde_json::Value::Null)));
        let yaml = format!(
            r#"
steps:
  - call: switch_profile
    args: {{ iccid: "{}", action: enable }}
    timeout_ms: 100
    expect_status: error
"#,
            ICCID
        );
        let scenario = load_scenario(&yaml).unwrap();
        let result = run_scenario(&scenario, &ctx, &CommandRegistry::new()).await;
        assert_eq!(result.step_results[0].error.as_ref().unwrap().code, ErrorCode::Timeout);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(runner.calls().is_empty());
    }
}

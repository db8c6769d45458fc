//! Platform implementations of the process-runner capability.
//!
//! - [`TokioProcessRunner`]: launches the real engine via `tokio::process`
//! - [`ScriptedRunner`]: replays canned outputs, never spawns anything
//! - [`TextEncoding`]: codec applied to arguments, environment and output

use crate::traits::*;
use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::process::Stdio;
use std::sync::Mutex;

// ===========================================================================
// Text encoding – wraps encoding_rs
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEncoding(&'static encoding_rs::Encoding);

impl TextEncoding {
    pub fn utf8() -> Self {
        Self(encoding_rs::UTF_8)
    }

    /// Look up a WHATWG label such as `utf-8`, `gbk` or `shift_jis`.
    pub fn for_label(label: &str) -> Option<Self> {
        encoding_rs::Encoding::for_label(label.trim().as_bytes()).map(Self)
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Decode bytes, replacing malformed sequences.
    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, _had_errors) = self.0.decode_without_bom_handling(bytes);
        text.into_owned()
    }

    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        let (bytes, _used, _had_errors) = self.0.encode(text);
        bytes
    }
}

impl Default for TextEncoding {
    fn default() -> Self {
        Self::utf8()
    }
}

/// Best-effort codeset of the current locale, lowercased (e.g. `utf-8`).
pub fn detect_system_encoding() -> String {
    #[cfg(unix)]
    {
        std::env::var("LC_CTYPE")
            .or_else(|_| std::env::var("LANG"))
            .ok()
            .as_deref()
            .and_then(codeset_of_locale)
            .unwrap_or_else(|| "utf-8".to_string())
    }
    #[cfg(not(unix))]
    {
        "utf-8".to_string()
    }
}

/// `zh_CN.GBK` -> `gbk`, `de_DE.UTF-8@euro` -> `utf-8`.
fn codeset_of_locale(locale: &str) -> Option<String> {
    let codeset = locale.split('.').nth(1)?;
    let codeset = codeset.split('@').next().unwrap_or(codeset).trim();
    if codeset.is_empty() {
        return None;
    }
    Some(codeset.to_lowercase())
}

// ===========================================================================
// Real engine – wraps tokio::process
// ===========================================================================

pub struct TokioProcessRunner;

#[async_trait::async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, invocation: &Invocation) -> RunResult<ProcessOutput> {
        let enc = invocation.encoding;
        let mut cmd = tokio::process::Command::new(&invocation.program);
        for arg in &invocation.args {
            cmd.arg(os_text(arg, enc));
        }
        if !invocation.inherit_env {
            cmd.env_clear();
        }
        for (key, value) in &invocation.env {
            cmd.env(key, os_text(value, enc));
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                RunError::NotFound(format!("{}: {}", invocation.program.display(), e))
            }
            std::io::ErrorKind::PermissionDenied => {
                RunError::PermissionDenied(format!("{}: {}", invocation.program.display(), e))
            }
            _ => RunError::Io(e),
        })?;

        Ok(ProcessOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: enc.decode(&output.stdout),
            stderr: enc.decode(&output.stderr),
        })
    }
}

#[cfg(unix)]
fn os_text(text: &str, enc: TextEncoding) -> OsString {
    use std::os::unix::ffi::OsStrExt;
    std::ffi::OsStr::from_bytes(&enc.encode(text)).to_os_string()
}

// Non-Unix platforms take wide strings; the codec only applies to output.
#[cfg(not(unix))]
fn os_text(text: &str, _enc: TextEncoding) -> OsString {
    OsString::from(text)
}

// ===========================================================================
// Scripted runner – canned outputs keyed by argument vector
// ===========================================================================

/// Runner for tests and headless demos.
///
/// Outputs are queued per argument vector; the last queued output for a
/// vector repeats once the queue is drained. Unscripted vectors exit with
/// code 1.
#[derive(Default)]
pub struct ScriptedRunner {
    replies: Mutex<HashMap<Vec<String>, VecDeque<ProcessOutput>>>,
    calls: Mutex<Vec<Invocation>>,
    unavailable: bool,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner whose engine binary can never be found.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn reply(self, args: &[&str], output: ProcessOutput) -> Self {
        self.push_reply(args, output);
        self
    }

    pub fn push_reply(&self, args: &[&str], output: ProcessOutput) {
        let key = args.iter().map(|s| s.to_string()).collect();
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_default()
            .push_back(output);
    }

    /// Every invocation seen so far, in launch order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> RunResult<ProcessOutput> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(invocation.clone());

        if self.unavailable {
            return Err(RunError::NotFound(format!(
                "{}: scripted runner has no engine",
                invocation.program.display()
            )));
        }

        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        let reply = match replies.get_mut(&invocation.args) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(reply.unwrap_or_else(|| {
            ProcessOutput::failure(
                1,
                format!("no scripted reply for: {}", invocation.args.join(" ")),
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(args: &[&str]) -> Invocation {
        Invocation {
            program: "lpac".into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            inherit_env: true,
            encoding: TextEncoding::utf8(),
        }
    }

    #[test]
    fn test_codeset_of_locale() {
        assert_eq!(codeset_of_locale("en_US.UTF-8"), Some("utf-8".into()));
        assert_eq!(codeset_of_locale("zh_CN.GBK"), Some("gbk".into()));
        assert_eq!(codeset_of_locale("de_DE.UTF-8@euro"), Some("utf-8".into()));
        assert_eq!(codeset_of_locale("C"), None);
        assert_eq!(codeset_of_locale("POSIX."), None);
    }

    #[test]
    fn test_encoding_labels() {
        assert_eq!(TextEncoding::for_label("utf8").unwrap().name(), "UTF-8");
        assert_eq!(TextEncoding::for_label(" GBK ").unwrap().name(), "GBK");
        assert!(TextEncoding::for_label("klingon").is_none());
    }

    #[test]
    fn test_gbk_decodes_engine_output() {
        let gbk = TextEncoding::for_label("gbk").unwrap();
        let bytes = gbk.encode("中国移动");
        assert_ne!(&*bytes, "中国移动".as_bytes());
        assert_eq!(gbk.decode(&bytes), "中国移动");
    }

    #[test]
    fn test_utf8_decode_is_lossy() {
        let text = TextEncoding::utf8().decode(&[b'o', b'k', 0xff]);
        assert!(text.starts_with("ok"));
        assert!(text.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_scripted_runner_queues_then_repeats() {
        let runner = ScriptedRunner::new()
            .reply(&["profile", "list"], ProcessOutput::success("first"))
            .reply(&["profile", "list"], ProcessOutput::success("second"));

        let inv = invocation(&["profile", "list"]);
        assert_eq!(runner.run(&inv).await.unwrap().stdout, "first");
        assert_eq!(runner.run(&inv).await.unwrap().stdout, "second");
        assert_eq!(runner.run(&inv).await.unwrap().stdout, "second");
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_runner_unscripted_exits_nonzero() {
        let runner = ScriptedRunner::new();
        let out = runner.run(&invocation(&["driver", "list"])).await.unwrap();
        assert_eq!(out.code, 1);
        assert!(out.stderr.contains("driver list"));
    }

    #[tokio::test]
    async fn test_scripted_runner_unavailable() {
        let runner = ScriptedRunner::unavailable();
        let err = runner.run(&invocation(&["driver", "list"])).await.unwrap_err();
        assert!(matches!(err, RunError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_runner_missing_program() {
        let mut inv = invocation(&["driver", "list"]);
        inv.program = "/nonexistent/simdeck-test-lpac".into();
        let err = TokioProcessRunner.run(&inv).await.unwrap_err();
        assert!(matches!(err, RunError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_runner_captures_output_and_env() {
        let mut inv = invocation(&["-c", "echo \"$LPAC_APDU\"; echo oops >&2; exit 3"]);
        inv.program = "sh".into();
        inv.env.insert("LPAC_APDU".into(), "pcsc".into());
        let out = TokioProcessRunner.run(&inv).await.unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout.trim(), "pcsc");
        assert_eq!(out.stderr.trim(), "oops");
    }
}

//! Daemon mode – line-delimited JSON requests over a Unix socket.
//!
//! Every connection gets its own task, all of them sharing one client, so
//! a `watch_logs` stream on one connection sees the engine activity driven
//! by the others.

use simdeck_core::logger::{LogEntry, Subscriber, Subscription};
use simdeck_core::types::*;
use simdeck_core::{AppContext, CommandRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;

/// Outbound lines buffered per connection before log events are dropped.
const OUTBOUND_QUEUE: usize = 256;

pub async fn run_daemon(socket_path: PathBuf, ctx: AppContext, registry: CommandRegistry) {
    // Remove stale socket if it exists
    let _ = std::fs::remove_file(&socket_path);

    let listener = match UnixListener::bind(&socket_path) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("error: cannot bind socket {}: {}", socket_path.display(), e);
            std::process::exit(2);
        }
    };

    eprintln!("simctl daemon listening on {}", socket_path.display());
    let registry = Arc::new(registry);

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let ctx = ctx.clone();
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    serve_connection(reader, writer, ctx, registry).await;
                });
            }
            Err(e) => {
                eprintln!("accept error: {}", e);
            }
        }
    }
}

enum Reply {
    Response(DaemonResponse),
    /// Start streaming log entries tagged with this request id.
    Watch(String),
}

async fn serve_connection<R, W>(reader: R, mut writer: W, ctx: AppContext, registry: Arc<CommandRegistry>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    // Responses and streamed events share one ordered outbound queue.
    let (tx, mut rx) = mpsc::channel::<DaemonResponse>(OUTBOUND_QUEUE);
    let writer_task = tokio::spawn(async move {
        while let Some(outgoing) = rx.recv().await {
            let mut line = serde_json::to_string(&outgoing).unwrap_or_else(|_| "{}".into());
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut watches: Vec<Subscription> = Vec::new();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = match handle_request(&line, &ctx, &registry).await {
            Reply::Response(r) => r,
            Reply::Watch(id) => {
                watches.push(ctx.logger().subscribe(forward_events(id.clone(), tx.clone())));
                let mut ack = result_ok("watch_logs", &new_run_id(), 0);
                ack.data = Some(serde_json::json!({ "watching": true }));
                ok_response(id, ack)
            }
        };
        if tx.send(response).await.is_err() {
            break;
        }
    }

    // Dropping the subscribers releases their senders, which ends the writer.
    for watch in &watches {
        watch.unsubscribe();
    }
    drop(tx);
    let _ = writer_task.await;
}

/// Log subscriber that queues entries for a `watch_logs` stream. Entries
/// that arrive while the client is not reading are dropped.
fn forward_events(id: String, events: mpsc::Sender<DaemonResponse>) -> Subscriber {
    Arc::new(move |entry: &LogEntry| {
        let _ = events.try_send(DaemonResponse {
            id: id.clone(),
            result: None,
            error: None,
            event: Some(entry.clone()),
        });
    })
}

fn ok_response(id: String, result: CommandResult) -> DaemonResponse {
    DaemonResponse {
        id,
        result: Some(result),
        error: None,
        event: None,
    }
}

fn error_response(id: String, message: String) -> DaemonResponse {
    DaemonResponse {
        id,
        result: None,
        error: Some(ErrorInfo {
            code: ErrorCode::InvalidInput,
            message,
            details: serde_json::Value::Null,
        }),
        event: None,
    }
}

async fn handle_request(line: &str, ctx: &AppContext, registry: &CommandRegistry) -> Reply {
    let req: DaemonRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            return Reply::Response(error_response(
                "unknown".into(),
                format!("invalid JSON request: {}", e),
            ));
        }
    };

    let result = match req.method.as_str() {
        "call" => {
            let cmd_name = req.params.get("cmd").and_then(|v| v.as_str()).unwrap_or("");
            let args = req
                .params
                .get("args")
                .cloned()
                .unwrap_or(serde_json::Value::Object(Default::default()));
            registry.execute(cmd_name, args, ctx).await
        }
        "commands" => {
            let mut r = result_ok("commands", &new_run_id(), 0);
            r.data = Some(serde_json::json!(registry.list()));
            r
        }
        "logs" => registry.execute("log_history", serde_json::Value::Null, ctx).await,
        "watch_logs" => return Reply::Watch(req.id),
        other => {
            return Reply::Response(error_response(req.id, format!("unknown method: {}", other)));
        }
    };

    Reply::Response(ok_response(req.id, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use simdeck_core::client::ClientOptions;
    use simdeck_core::env::EnvStore;
    use simdeck_core::logger::Severity;
    use simdeck_core::platform::ScriptedRunner;
    use simdeck_core::traits::ProcessOutput;
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn ctx(runner: ScriptedRunner) -> AppContext {
        AppContext::with_parts(ClientOptions::default(), Arc::new(runner), EnvStore::new())
    }

    async fn reply(line: &str, ctx: &AppContext) -> DaemonResponse {
        match handle_request(line, ctx, &CommandRegistry::new()).await {
            Reply::Response(r) => r,
            Reply::Watch(id) => panic!("unexpected watch for {}", id),
        }
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let r = reply("not json", &ctx(ScriptedRunner::new())).await;
        assert_eq!(r.id, "unknown");
        assert_eq!(r.error.unwrap().code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let r = reply(r#"{"id":"7","method":"reboot"}"#, &ctx(ScriptedRunner::new())).await;
        assert_eq!(r.id, "7");
        assert!(r.error.unwrap().message.contains("reboot"));
    }

    #[tokio::test]
    async fn test_commands_lists_registry() {
        let r = reply(r#"{"id":"1","method":"commands"}"#, &ctx(ScriptedRunner::new())).await;
        let names = r.result.unwrap().data.unwrap();
        assert!(names.as_array().unwrap().contains(&serde_json::json!("list_profiles")));
    }

    #[tokio::test]
    async fn test_call_env_roundtrip() {
        let ctx = ctx(ScriptedRunner::new());
        let set = reply(
            r#"{"id":"1","method":"call","params":{"cmd":"set_env","args":{"key":"LPAC_APDU","value":"pcsc"}}}"#,
            &ctx,
        )
        .await;
        assert_eq!(set.result.unwrap().status, Status::Pass);
        assert_eq!(ctx.client().env().get("LPAC_APDU").as_deref(), Some("pcsc"));

        let logs = reply(r#"{"id":"2","method":"logs"}"#, &ctx).await;
        let history = logs.result.unwrap().data.unwrap();
        assert_eq!(
            history[0]["message"],
            "Setting environment variable LPAC_APDU to pcsc"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_reaches_engine() {
        let ctx = ctx(ScriptedRunner::new().reply(
            &["profile", "list"],
            ProcessOutput::success(r#"{"type":"lpa","payload":{"code":0,"message":"success","data":[]}}"#),
        ));
        let r = reply(r#"{"id":"3","method":"call","params":{"cmd":"list_profiles"}}"#, &ctx).await;
        let result = r.result.unwrap();
        assert_eq!(result.status, Status::Pass);
        assert_eq!(result.data.unwrap(), serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_forwarded_events_drop_when_queue_full() {
        let (tx, mut rx) = mpsc::channel(2);
        let forward = forward_events("w".into(), tx);
        for i in 0..5 {
            forward(&LogEntry::new(Severity::Info, format!("entry {}", i)));
        }

        assert_eq!(rx.recv().await.unwrap().event.unwrap().message, "entry 0");
        assert_eq!(rx.recv().await.unwrap().event.unwrap().message, "entry 1");
        assert!(rx.try_recv().is_err());

        forward(&LogEntry::new(Severity::Info, "entry 5"));
        let resumed = rx.recv().await.unwrap();
        assert_eq!(resumed.id, "w");
        assert_eq!(resumed.event.unwrap().message, "entry 5");
    }

    #[tokio::test]
    async fn test_watch_logs_streams_until_disconnect() {
        let ctx = ctx(ScriptedRunner::new());
        let (client, server) = duplex(4096);
        let (server_read, server_write) = split(server);
        let conn = tokio::spawn(serve_connection(
            server_read,
            server_write,
            ctx.clone(),
            Arc::new(CommandRegistry::new()),
        ));

        let (client_read, mut client_write) = split(client);
        let mut lines = BufReader::new(client_read).lines();
        client_write
            .write_all(b"{\"id\":\"w\",\"method\":\"watch_logs\"}\n")
            .await
            .unwrap();
        let ack: DaemonResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(ack.id, "w");
        assert_eq!(ctx.logger().subscriber_count(), 1);

        client_write
            .write_all(b"{\"id\":\"c\",\"method\":\"call\",\"params\":{\"cmd\":\"del_env\",\"args\":{\"key\":\"X\"}}}\n")
            .await
            .unwrap();
        let event: DaemonResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(event.id, "w");
        assert_eq!(event.event.unwrap().message, "Deleting environment variable X");
        let call: DaemonResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(call.id, "c");

        client_write.shutdown().await.unwrap();
        conn.await.unwrap();
        assert_eq!(ctx.logger().subscriber_count(), 0);
    }
}

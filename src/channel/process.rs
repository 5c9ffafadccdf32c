//! Worker processes reached over their stdin/stdout.

use std::process::Stdio;

use serde_json::json;
use tokio::process::{Child, Command};

use super::{ChannelConfig, ChannelError, ChannelFactory, LineChannel};
use crate::event::{Event, EventKind};

/// Spawns the program named by the locator and returns a [`LineChannel`] over
/// its stdio.
///
/// The worker's stderr is inherited. Once its stdout closes, the channel
/// delivers an `exit` event carrying `{"code": <i32|null>}`. Dropping the
/// channel kills a worker that is still running.
#[derive(Debug, Clone, Default)]
pub struct ProcessFactory;

impl ProcessFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ChannelFactory for ProcessFactory {
    type Channel = LineChannel;

    fn create(
        &self,
        locator: &str,
        config: Option<&ChannelConfig>,
    ) -> Result<LineChannel, ChannelError> {
        let default_config = ChannelConfig::default();
        let config = config.unwrap_or(&default_config);

        let mut command = Command::new(locator);
        command
            .args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &config.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(ChannelError::Spawn)?;
        let stdin = child.stdin.take().ok_or(ChannelError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ChannelError::MissingPipe("stdout"))?;

        let name = match &config.name {
            Some(name) => name.clone(),
            None => match child.id() {
                Some(pid) => format!("{}[{}]", locator, pid),
                None => locator.to_string(),
            },
        };
        log::info!("Spawned worker {}", name);

        LineChannel::with_epilogue(name.clone(), stdout, stdin, wait_for_exit(name, child))
    }
}

async fn wait_for_exit(name: String, mut child: Child) -> Option<Event> {
    match child.wait().await {
        Ok(status) => {
            log::info!("Worker {} exited: {}", name, status);
            Some(Event::new(EventKind::Exit, json!({ "code": status.code() })))
        }
        Err(e) => {
            log::warn!("Failed to wait for worker {}: {}", name, e);
            Some(Event::new(EventKind::Exit, json!({ "code": null })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::observer::Observer;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_spawn_failure_propagates() {
        let result = ProcessFactory::new().create("/nonexistent/channel-mux-worker", None);
        match result {
            Err(ChannelError::Spawn(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            Err(other) => panic!("Expected spawn error, got {}", other),
            Ok(_) => panic!("Expected spawn error"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_worker_and_exit_event() {
        let config = ChannelConfig {
            args: vec!["-c".to_string(), "read line; echo \"$line\"; exit 3".to_string()],
            ..Default::default()
        };
        let channel = ProcessFactory::new().create("sh", Some(&config)).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let forward = Observer::infallible(move |event| {
            let _ = tx.send(event.clone());
        });
        channel.subscribe(EventKind::Message, forward.clone());
        channel.subscribe(EventKind::Exit, forward);

        channel.send(serde_json::json!({"type": "echo", "n": 1})).unwrap();

        let mut events = Vec::new();
        while events.len() < 2 {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out")
                .expect("observer dropped");
            events.push(event);
        }

        assert_eq!(events[0].kind, EventKind::Message);
        assert_eq!(events[0].data, serde_json::json!({"type": "echo", "n": 1}));
        assert_eq!(events[1].kind, EventKind::Exit);
        assert_eq!(events[1].data["code"], Value::from(3));
    }
}

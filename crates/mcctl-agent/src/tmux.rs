use crate::error::ExternalError;
use crate::external::{require_success, run_tool, Multiplexer, TOOL_TIMEOUT};
use futures_util::future::BoxFuture;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Tmux {
    program: String,
    timeout: Duration,
}

impl Default for Tmux {
    fn default() -> Self {
        Self {
            program: "tmux".to_string(),
            timeout: TOOL_TIMEOUT,
        }
    }
}

impl Tmux {
    async fn run(&self, args: &[&str]) -> Result<String, ExternalError> {
        let output = run_tool(&self.program, args, self.timeout).await?;
        require_success(&self.program, output)
    }
}

impl Multiplexer for Tmux {
    fn capture<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<String, ExternalError>> {
        Box::pin(async move { self.run(&["capture-pane", "-p", "-e", "-t", session]).await })
    }

    fn has_session<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<bool, ExternalError>> {
        Box::pin(async move {
            let output = run_tool(&self.program, &["has-session", "-t", session], self.timeout).await?;
            Ok(output.status.success())
        })
    }

    fn send_literal<'a>(
        &'a self,
        session: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), ExternalError>> {
        Box::pin(async move {
            self.run(&["send-keys", "-t", session, "-l", text]).await?;
            self.run(&["send-keys", "-t", session, "Enter"]).await?;
            Ok(())
        })
    }

    fn spawn_detached<'a>(
        &'a self,
        session: &'a str,
        command: &'a str,
    ) -> BoxFuture<'a, Result<(), ExternalError>> {
        Box::pin(async move {
            self.run(&["new-session", "-d", "-s", session, command]).await?;
            Ok(())
        })
    }
}

//! Newline-delimited JSON transport for the executor.
//!
//! Protocol:
//! - The front-end sends one `CommandRequest` JSON object per line
//! - The executor answers each line with one `Response` JSON object
//! - Requests on one connection are handled in order

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::error::Result;
use crate::executor::Executor;
use crate::protocol::{CommandRequest, Response};

/// Parse and handle a single request line.
pub async fn process_line(executor: &Executor, line: &str) -> Response {
    let request: CommandRequest = match serde_json::from_str(line.trim()) {
        Ok(request) => request,
        Err(e) => {
            return Response::Failed {
                error: format!("Invalid request: {}", e),
            };
        }
    };

    if let Some(ttl) = executor.config().idle_ttl() {
        executor.registry().evict_idle(ttl).await;
    }

    executor.handle(&request).await
}

/// Serve requests from `reader` until it is closed.
pub async fn serve_stream<R, W>(executor: Arc<Executor>, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = process_line(&executor, &line).await;
        let response_json = serde_json::to_string(&response)?;

        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    debug!("Bridge input closed");
    Ok(())
}

/// Accept connections on a Unix domain socket, one task per connection.
#[cfg(unix)]
pub async fn serve_unix(executor: Arc<Executor>, socket_path: &std::path::Path) -> Result<()> {
    use tokio::net::UnixListener;
    use tracing::{info, warn};

    // Remove a stale socket from an earlier run
    if socket_path.exists() {
        tokio::fs::remove_file(socket_path).await?;
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(socket = %socket_path.display(), "Listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            debug!("New bridge connection");
            let (reader, writer) = stream.into_split();
            if let Err(e) = serve_stream(executor, reader, writer).await {
                warn!(error = %e, "Bridge connection error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use tempfile::TempDir;

    fn executor() -> (TempDir, Arc<Executor>) {
        let root = tempfile::tempdir().unwrap();
        let config = ExecutorConfig {
            scratch_root: Some(root.path().to_path_buf()),
            ..Default::default()
        };
        (root, Arc::new(Executor::with_defaults(config)))
    }

    async fn roundtrip(executor: Arc<Executor>, input: &str) -> Vec<serde_json::Value> {
        let mut output = Vec::new();
        serve_stream(executor, input.as_bytes(), &mut output)
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_invalid_request() {
        let (_root, executor) = executor();
        match process_line(&executor, r#"{"invalid": "json"}"#).await {
            Response::Failed { error } => assert!(error.contains("Invalid request")),
            other => panic!("Expected Failed response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_one_response_per_request_line() {
        let (_root, executor) = executor();
        let input = concat!(
            r#"{"command": "clear"}"#,
            "\n\n",
            "not json\n",
            r#"{"command": "  "}"#,
            "\n",
        );

        let responses = roundtrip(executor, input).await;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0], serde_json::json!({"clear": true}));
        assert!(responses[1]["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request"));
        assert_eq!(responses[2], serde_json::json!({"error": "Command is empty"}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_over_stream() {
        let (_root, executor) = executor();
        let input = concat!(
            r#"{"command": "echo hello", "files": [], "sessionId": "s1"}"#,
            "\n"
        );

        let responses = roundtrip(executor, input).await;
        assert_eq!(
            responses,
            vec![serde_json::json!({"stdout": "hello", "stderr": "", "code": 0, "success": true})]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_socket() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::UnixStream;

        let (root, executor) = executor();
        let socket = root.path().join("bridge.sock");
        let server = {
            let socket = socket.clone();
            tokio::spawn(async move { serve_unix(executor, &socket).await })
        };

        let mut stream = loop {
            match UnixStream::connect(&socket).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        stream
            .write_all(b"{\"command\": \"cat a.txt\", \"files\": [{\"name\": \"a.txt\", \"content\": \"42\", \"type\": \"file\"}], \"sessionId\": \"s2\"}\n")
            .await
            .unwrap();

        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).await.unwrap();
        let response: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(response["stdout"], "42");
        assert_eq!(response["success"], true);

        server.abort();
    }
}

//! Request/response payloads exchanged with the front-end.
//!
//! Both payloads are JSON objects with camelCase keys. A response is one of
//! three shapes; callers distinguish them by which keys are present:
//!
//! - `{"stdout": .., "stderr": .., "code": .., "success": ..}` when the command ran
//! - `{"clear": true}` when the command was a terminal reset
//! - `{"error": ".."}` when the request failed before or during execution

use serde::{Deserialize, Serialize};

use crate::error::LabexecError;
use crate::sandbox::CommandResult;

/// Kind of an editor entry. Only `File` entries are written to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    #[default]
    File,
    Folder,
    #[serde(other)]
    Other,
}

/// A file as held by the editor, not yet written to the session directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFile {
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: EntryType,
}

impl VirtualFile {
    pub fn file(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            kind: EntryType::File,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryType::File
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command: String,
    /// Accepted for compatibility; the session directory is always the working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default)]
    pub files: Vec<VirtualFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.push(VirtualFile::file(name, content));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Completed(CommandResult),
    Cleared { clear: bool },
    Failed { error: String },
}

impl Response {
    pub fn cleared() -> Self {
        Self::Cleared { clear: true }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl From<LabexecError> for Response {
    fn from(err: LabexecError) -> Self {
        Self::Failed {
            error: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_front_end() {
        let request: CommandRequest = serde_json::from_str(
            r#"{
                "command": "cat a.txt",
                "cwd": "~",
                "files": [
                    {"name": "a.txt", "content": "42", "type": "file"},
                    {"name": "src", "type": "folder"},
                    {"name": "link", "type": "symlink"}
                ],
                "sessionId": "s2"
            }"#,
        )
        .unwrap();

        assert_eq!(request.command, "cat a.txt");
        assert_eq!(request.session_id.as_deref(), Some("s2"));
        assert_eq!(request.files.len(), 3);
        assert!(request.files[0].is_file());
        assert_eq!(request.files[1].kind, EntryType::Folder);
        assert_eq!(request.files[1].content, "");
        assert_eq!(request.files[2].kind, EntryType::Other);
    }

    #[test]
    fn test_minimal_request() {
        let request: CommandRequest = serde_json::from_str(r#"{"command": "ls"}"#).unwrap();
        assert!(request.files.is_empty());
        assert!(request.session_id.is_none());
    }

    #[test]
    fn test_response_shapes() {
        let completed = Response::Completed(CommandResult {
            stdout: "hello".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        });
        assert_eq!(
            serde_json::to_value(&completed).unwrap(),
            serde_json::json!({"stdout": "hello", "stderr": "", "code": 0, "success": true})
        );

        assert_eq!(
            serde_json::to_value(Response::cleared()).unwrap(),
            serde_json::json!({"clear": true})
        );

        let failed = Response::from(LabexecError::Timeout { seconds: 30 });
        assert!(failed.is_error());
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({"error": "Command timed out after 30 seconds"})
        );
    }

    #[test]
    fn test_killed_command_has_null_code() {
        let killed = Response::Completed(CommandResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            success: false,
        });
        let value = serde_json::to_value(&killed).unwrap();
        assert!(value["code"].is_null());
    }
}

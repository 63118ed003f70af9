//! Front-end command policy for the interactive terminal.
//!
//! The executor runs whatever it is given. Students edit files through the
//! editor, so the terminal refuses commands that look like they modify files
//! and answers `help` locally. This is a usability filter, not a security
//! boundary: it is trivial to bypass with a shell one-liner.

use regex::Regex;

use crate::error::{LabexecError, Result};

pub const BLOCKED_MESSAGE: &str = "File editing/deletion is disabled. Files are read-only in terminal.\n\
Please use the code editor to modify files.";

pub const HELP_TEXT: &str = "Available commands:\n\
- clear / cls : clear the terminal output\n\
- help       : show this help\n\
- Any compile/run commands like `node main.js`, `python main.py`, `gcc main.c`\n\
\n\
Note: File editing and deletion commands are blocked. Use the code editor to change files.";

/// Patterns matched against the lowercased command.
const EDIT_PATTERNS: &[&str] = &[
    r"\becho\s+.*>{1,2}",          // echo > or >>
    r">{1,2}\s*\w+",               // > or >> to file
    r"\|\s*tee\s+",                // | tee
    r"\bvim?\s+\w+",               // vi/vim file
    r"\bnano\s+\w+",               // nano file
    r"\bedit\s+\w+",               // edit file
    r"\brm\s+\w+",                 // rm file
    r"\b(del|delete)\s+\w+",       // del file
    r"\b(ren|rename)\s+\w+",       // ren file
    r"\bmv\s+\w+",                 // mv file
    r"\b(cp|copy)\s+\w+.*\s+\w+",  // cp file1 file2
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Send the command to the executor
    Run,
    /// Answer locally with this text
    Help(&'static str),
    /// Refuse the command
    Blocked(&'static str),
}

pub struct CommandGuard {
    patterns: Vec<Regex>,
}

impl CommandGuard {
    pub fn new() -> Result<Self> {
        Self::with_patterns(EDIT_PATTERNS)
    }

    pub fn with_patterns(patterns: &[&str]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| LabexecError::Config(format!("Invalid guard pattern {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_file_edit(&self, command: &str) -> bool {
        let lower = command.to_lowercase();
        self.patterns.iter().any(|p| p.is_match(&lower))
    }

    pub fn check(&self, command: &str) -> Verdict {
        let command = command.trim();
        if command == "help" {
            return Verdict::Help(HELP_TEXT);
        }
        if self.is_file_edit(command) {
            return Verdict::Blocked(BLOCKED_MESSAGE);
        }
        Verdict::Run
    }
}

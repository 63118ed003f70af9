use crate::protocol::Response;

/// Where a rendered line goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Terminal presentation of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Clear,
    Lines(Vec<(Stream, String)>),
}

/// Prefix that marks executor failures so they are not mistaken for program output.
pub const ERROR_PREFIX: &str = "ERROR: ";

/// Render stdout, then stderr, then an exit-code line if both were empty.
pub fn render(response: &Response) -> Rendered {
    match response {
        Response::Cleared { .. } => Rendered::Clear,
        Response::Failed { error } => {
            Rendered::Lines(vec![(Stream::Stderr, format!("{}{}", ERROR_PREFIX, error))])
        }
        Response::Completed(result) => {
            let mut lines = Vec::new();
            if !result.stdout.is_empty() {
                lines.push((Stream::Stdout, result.stdout.clone()));
            }
            if !result.stderr.is_empty() {
                lines.push((Stream::Stderr, result.stderr.clone()));
            }
            if lines.is_empty() {
                match result.exit_code {
                    Some(0) => {}
                    Some(code) => {
                        lines.push((Stream::Stderr, format!("Process exited with code {}", code)))
                    }
                    None => lines.push((Stream::Stderr, "Process terminated by signal".to_string())),
                }
            }
            Rendered::Lines(lines)
        }
    }
}

pub fn print(rendered: &Rendered) {
    match rendered {
        Rendered::Clear => {
            // ANSI: clear screen, cursor home
            print!("\x1b[2J\x1b[H");
        }
        Rendered::Lines(lines) => {
            for (stream, line) in lines {
                match stream {
                    Stream::Stdout => println!("{}", line),
                    Stream::Stderr => eprintln!("{}", line),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::CommandResult;

    fn completed(stdout: &str, stderr: &str, code: Option<i32>) -> Response {
        Response::Completed(CommandResult::new(stdout, stderr, code))
    }

    #[test]
    fn test_stdout_then_stderr() {
        assert_eq!(
            render(&completed("out", "err", Some(1))),
            Rendered::Lines(vec![
                (Stream::Stdout, "out".to_string()),
                (Stream::Stderr, "err".to_string()),
            ])
        );
    }

    #[test]
    fn test_exit_code_fallback() {
        assert_eq!(
            render(&completed("", "", Some(7))),
            Rendered::Lines(vec![(
                Stream::Stderr,
                "Process exited with code 7".to_string()
            )])
        );
        assert_eq!(render(&completed("", "", Some(0))), Rendered::Lines(vec![]));
        assert_eq!(
            render(&completed("", "", None)),
            Rendered::Lines(vec![(
                Stream::Stderr,
                "Process terminated by signal".to_string()
            )])
        );
    }

    #[test]
    fn test_error_banner() {
        let rendered = render(&Response::Failed {
            error: "Command timed out after 30 seconds".to_string(),
        });
        assert_eq!(
            rendered,
            Rendered::Lines(vec![(
                Stream::Stderr,
                "ERROR: Command timed out after 30 seconds".to_string()
            )])
        );
    }

    #[test]
    fn test_clear() {
        assert_eq!(render(&Response::cleared()), Rendered::Clear);
    }
}

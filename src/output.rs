use std::io::Write;

/// Abstraction over user-facing output.
///
/// Command modules use this trait instead of `println!`/`eprintln!` so that
/// tests can capture what a command printed.
pub trait UserOutput: Send + Sync {
    /// Informational line (tables, details).
    fn status(&self, message: &str);

    /// Success message (e.g., "Started 'api' (pid 4242)")
    fn success(&self, message: &str);

    /// Warning message (e.g., an import conflict)
    fn warning(&self, message: &str);

    /// Error message (e.g., a service's last error)
    fn error(&self, message: &str);

    /// Raw text written without decoration (JSON, log tails).
    fn raw(&self, text: &str);

    /// A blank line separator.
    fn blank(&self);
}

/// Standard CLI output: stdout for results, stderr for warnings and errors.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("\x1b[32m{}\x1b[0m", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("\x1b[33mWarning:\x1b[0m {}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn raw(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(text.as_bytes()).ok();
        if !text.ends_with('\n') {
            stdout.write_all(b"\n").ok();
        }
        stdout.flush().ok();
    }

    fn blank(&self) {
        println!();
    }
}

/// Collects output lines in memory.
#[cfg(test)]
#[derive(Default)]
pub struct CapturedOutput {
    pub lines: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl CapturedOutput {
    pub fn text(&self) -> String {
        self.lines.lock().join("\n")
    }
}

#[cfg(test)]
impl UserOutput for CapturedOutput {
    fn status(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }

    fn success(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }

    fn warning(&self, message: &str) {
        self.lines.lock().push(format!("Warning: {}", message));
    }

    fn error(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }

    fn raw(&self, text: &str) {
        self.lines.lock().push(text.to_string());
    }

    fn blank(&self) {
        self.lines.lock().push(String::new());
    }
}

//! CLI error handling with user-friendly messages.

use std::fmt;
use std::process;

/// Errors surfaced to the operator.
#[derive(Debug)]
pub enum CliError {
    /// Configuration or environment problem.
    Config(String),
    /// Account file problem.
    Accounts(String),
    /// Persistence store problem.
    Store(String),
    /// HTTP server failure.
    Serve(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Accounts(msg) => write!(f, "Account file error: {}", msg),
            Self::Store(msg) => write!(f, "Store error: {}", msg),
            Self::Serve(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Prints the error and terminates the process.
    pub fn exit(self) -> ! {
        eprintln!("Error: {}", self);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_variants() {
        assert!(CliError::Config("bad PORT".into())
            .to_string()
            .contains("bad PORT"));
        assert!(CliError::Accounts("missing file".into())
            .to_string()
            .contains("Account file"));
    }
}

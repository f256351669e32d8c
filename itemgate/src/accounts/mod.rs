//! Account list loading.
//!
//! The credential file holds one `username:password` per line. Only the
//! first `:` separates the fields, so passwords may themselves contain
//! colons. Blank lines and `#` comments are ignored. The blacklist file
//! lists one username per line with the same comment rules; listed
//! accounts never log in.

use crate::transport::Credentials;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::Path;

/// Errors from account list loading.
#[derive(Debug)]
pub enum AccountsError {
    /// The credential file could not be read.
    Io(io::Error),
    /// A non-comment line had no `:` separator.
    MalformedLine { line_number: usize },
}

impl fmt::Display for AccountsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot read account file: {}", err),
            Self::MalformedLine { line_number } => {
                write!(f, "malformed credential on line {}", line_number)
            }
        }
    }
}

impl std::error::Error for AccountsError {}

impl From<io::Error> for AccountsError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Parses credential file contents.
pub fn parse_credentials(contents: &str) -> Result<Vec<Credentials>, AccountsError> {
    let mut accounts = Vec::new();
    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((username, password)) = line.split_once(':') else {
            return Err(AccountsError::MalformedLine {
                line_number: index + 1,
            });
        };
        accounts.push(Credentials::new(username.trim(), password));
    }
    Ok(accounts)
}

/// Loads credentials from a file.
pub fn load_credentials(path: impl AsRef<Path>) -> Result<Vec<Credentials>, AccountsError> {
    let contents = std::fs::read_to_string(path)?;
    parse_credentials(&contents)
}

/// Loads the blacklist. A missing file is an empty blacklist.
pub fn load_blacklist(path: impl AsRef<Path>) -> HashSet<String> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return HashSet::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Drops blacklisted accounts from the list.
pub fn apply_blacklist(
    accounts: Vec<Credentials>,
    blacklist: &HashSet<String>,
) -> Vec<Credentials> {
    accounts
        .into_iter()
        .filter(|creds| !blacklist.contains(&creds.username))
        .collect()
}

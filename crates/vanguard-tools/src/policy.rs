//! Operator allow-list for spawned commands.
//!
//! A command line is accepted only when it contains one of the configured
//! program names. Matching is a plain substring test so that absolute paths
//! (`/usr/bin/nmap`) and wrapped invocations (`sudo nmap`) still match.

use crate::error::{Error, Result};

/// Programs accepted when no explicit list is configured
pub const DEFAULT_ALLOWED_PROGRAMS: &[&str] = &[
    "nmap", "masscan", "nikto", "sqlmap", "hydra", "gobuster", "dirb", "wfuzz", "ffuf",
    "nuclei", "msfconsole", "searchsploit", "whatweb", "wpscan", "enum4linux", "smbclient",
    "crackmapexec", "responder", "hashcat", "john", "curl", "ping", "traceroute", "dig",
    "whois", "python3", "docker",
];

/// Allow-list of program names permitted to run
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allowed: Vec<String>,
}

impl CommandPolicy {
    /// Build a policy from an explicit list of program names.
    ///
    /// Blank entries are ignored; an empty list rejects everything.
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed = allowed
            .into_iter()
            .map(Into::into)
            .map(|s: String| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { allowed }
    }

    /// Program names this policy accepts
    #[must_use]
    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Whether the command line matches any allowed program name
    #[must_use]
    pub fn permits(&self, command_line: &str) -> bool {
        self.allowed
            .iter()
            .any(|program| command_line.contains(program.as_str()))
    }

    /// Reject the command line unless it is permitted
    pub fn check(&self, command_line: &str) -> Result<()> {
        if self.permits(command_line) {
            Ok(())
        } else {
            Err(Error::PolicyViolation(format!(
                "'{}' does not match any allowed program",
                command_line
            )))
        }
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_PROGRAMS.iter().copied())
    }
}

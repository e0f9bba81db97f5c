//! Allowlist of management commands callers may run locally.

use corral_common::PermissionLevel;

/// Debug flag spellings the tool treats as `--debug`
const DEBUG_FLAGS: [&str; 4] = ["--de", "--deb", "--debu", "--debug"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPattern {
    /// The whole argument vector
    Exact(&'static [&'static str]),
    /// Leading arguments; anything may follow
    PrefixWildcard(&'static [&'static str]),
}

impl CommandPattern {
    pub fn matches(&self, command: &[String]) -> bool {
        match self {
            Self::Exact(tokens) => {
                command.len() == tokens.len() && command.iter().zip(tokens.iter()).all(|(a, b)| a == b)
            }
            Self::PrefixWildcard(prefix) => {
                command.len() >= prefix.len() && command.iter().zip(prefix.iter()).all(|(a, b)| a == b)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRule {
    pub pattern: CommandPattern,
    pub only_superuser: bool,
    /// `None` leaves the check to whoever services the command
    pub required_permission: Option<PermissionLevel>,
}

const fn rule(pattern: CommandPattern, required_permission: Option<PermissionLevel>) -> CommandRule {
    CommandRule {
        pattern,
        only_superuser: false,
        required_permission,
    }
}

use CommandPattern::{Exact, PrefixWildcard};
use PermissionLevel::{Full, Read, Write};

/// First match wins.
///
/// Exact forms run on this node and are checked here; wildcard forms of the
/// same command run on remote nodes which check permissions themselves.
pub const ALLOWED_COMMANDS: &[CommandRule] = &[
    rule(PrefixWildcard(&["cluster", "auth"]), None),
    rule(Exact(&["cluster", "corosync"]), Some(Read)),
    rule(PrefixWildcard(&["cluster", "corosync"]), None),
    rule(PrefixWildcard(&["cluster", "destroy"]), Some(Full)),
    rule(Exact(&["cluster", "disable"]), Some(Write)),
    rule(PrefixWildcard(&["cluster", "disable"]), None),
    rule(Exact(&["cluster", "enable"]), Some(Write)),
    rule(PrefixWildcard(&["cluster", "enable"]), None),
    rule(PrefixWildcard(&["cluster", "node"]), Some(Full)),
    rule(PrefixWildcard(&["cluster", "pcsd-status"]), None),
    rule(Exact(&["cluster", "start"]), Some(Write)),
    rule(PrefixWildcard(&["cluster", "start"]), None),
    rule(Exact(&["cluster", "stop"]), Some(Write)),
    rule(PrefixWildcard(&["cluster", "stop"]), None),
    rule(PrefixWildcard(&["cluster", "sync"]), Some(Full)),
    rule(PrefixWildcard(&["config", "restore"]), Some(Full)),
    rule(PrefixWildcard(&["host", "auth"]), None),
    rule(PrefixWildcard(&["host", "deauth"]), None),
    rule(PrefixWildcard(&["pcsd", "deauth"]), None),
    rule(PrefixWildcard(&["pcsd", "sync-certificates"]), Some(Full)),
    rule(PrefixWildcard(&["status", "pcsd"]), None),
];

/// Drop every debug flag spelling
pub fn sanitize(command: &[String]) -> Vec<String> {
    command
        .iter()
        .filter(|arg| !DEBUG_FLAGS.contains(&arg.as_str()))
        .cloned()
        .collect()
}

pub fn match_rule<'a>(rules: &'a [CommandRule], command: &[String]) -> Option<&'a CommandRule> {
    rules.iter().find(|rule| rule.pattern.matches(command))
}

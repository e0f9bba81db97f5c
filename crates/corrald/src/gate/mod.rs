//! Command execution gate.
//!
//! Sanitizes a requested argument vector, matches it against the
//! allowlist, checks the caller's privilege and only then runs the
//! management tool.

mod rules;
mod runner;

use rules::{ALLOWED_COMMANDS, CommandRule, match_rule, sanitize};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};

use std::sync::Arc;

use corral_common::AuthIdentity;
use corral_common::constants::cookies;

use crate::cluster::NodeDirectory;

/// Terminal state of one gated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Executed(CommandOutput),
    /// No allowlist entry matched
    BadCommand,
    Denied(String),
    /// Allowed but the tool could not be run
    Failed(String),
}

pub struct CommandGate {
    directory: Arc<NodeDirectory>,
    runner: Arc<dyn CommandRunner>,
    rules: &'static [CommandRule],
}

impl CommandGate {
    pub fn new(directory: Arc<NodeDirectory>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            directory,
            runner,
            rules: ALLOWED_COMMANDS,
        }
    }

    async fn authorize(&self, identity: &AuthIdentity, rule: &CommandRule) -> Result<(), String> {
        if rule.only_superuser && !identity.is_superuser() {
            return Err("Permission denied".to_string());
        }
        if let Some(required) = rule.required_permission {
            let allowed = match self.directory.registry().await {
                Ok(registry) => registry.allows(identity, required),
                Err(e) => {
                    tracing::error!(error = %e, "Unable to read permissions");
                    identity.is_superuser()
                }
            };
            if !allowed {
                return Err("Permission denied".to_string());
            }
        }
        Ok(())
    }

    pub async fn run(&self, identity: &AuthIdentity, command: &[String], stdin: Option<&str>) -> GateOutcome {
        let command = sanitize(command);

        let Some(rule) = match_rule(self.rules, &command) else {
            tracing::info!(user = %identity.username, ?command, "Rejected command not on allowlist");
            return GateOutcome::BadCommand;
        };

        if let Err(reason) = self.authorize(identity, rule).await {
            tracing::info!(
                user = %identity.username,
                ?command,
                required = ?rule.required_permission,
                "Command denied"
            );
            return GateOutcome::Denied(reason);
        }

        let mut env = vec![];
        if !identity.is_superuser() {
            env.push((cookies::CIB_USER.to_string(), identity.username.clone()));
        }

        tracing::info!(user = %identity.username, ?command, "Running command");
        match self.runner.run(&command, stdin, &env).await {
            Ok(output) => GateOutcome::Executed(output),
            Err(e) => {
                tracing::error!(error = ?e, "Command execution failed");
                GateOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every invocation and replies with a fixed output
    #[derive(Default)]
    pub struct RecordingRunner {
        pub calls: Mutex<Vec<(Vec<String>, Option<String>, Vec<(String, String)>)>>,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(
            &self,
            args: &[String],
            stdin: Option<&str>,
            env: &[(String, String)],
        ) -> anyhow::Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((args.to_vec(), stdin.map(str::to_string), env.to_vec()));
            Ok(CommandOutput {
                stdout: "done\n".to_string(),
                stderr: String::new(),
                code: 0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::rules::CommandPattern;
    use super::testing::RecordingRunner;
    use super::*;
    use crate::cfgsync::{ConfigKind, ConfigStore, VersionedConfig};
    use crate::cluster::{ClusterRegistry, LocalMembership, PermissionEntry, PrincipalKind};
    use corral_common::PermissionLevel;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn gate() -> (CommandGate, Arc<RecordingRunner>) {
        let store = Arc::new(ConfigStore::in_memory());
        let mut registry = ClusterRegistry::default();
        registry.permissions.local_cluster = vec![
            PermissionEntry {
                kind: PrincipalKind::User,
                name: "reader".to_string(),
                allow: vec![PermissionLevel::Read],
            },
            PermissionEntry {
                kind: PrincipalKind::Group,
                name: "ops".to_string(),
                allow: vec![PermissionLevel::Write],
            },
            PermissionEntry {
                kind: PrincipalKind::User,
                name: "admin".to_string(),
                allow: vec![PermissionLevel::Full],
            },
        ];
        store
            .save(ConfigKind::ClusterRegistry, VersionedConfig::new(1, registry.to_text()))
            .await
            .unwrap();
        let dir = Arc::new(NodeDirectory::new("n1", store, LocalMembership::default()));
        let runner = Arc::new(RecordingRunner::default());
        (CommandGate::new(dir, runner.clone()), runner)
    }

    #[tokio::test]
    async fn test_write_required_for_local_disable() {
        let (gate, runner) = gate().await;
        let reader = AuthIdentity::new("reader", vec![]);

        let outcome = gate.run(&reader, &args(&["cluster", "disable"]), None).await;
        assert_eq!(outcome, GateOutcome::Denied("Permission denied".to_string()));
        assert!(runner.calls.lock().unwrap().is_empty());

        let operator = AuthIdentity::new("bob", vec!["ops".to_string()]);
        let outcome = gate.run(&operator, &args(&["cluster", "disable"]), None).await;
        assert!(matches!(outcome, GateOutcome::Executed(_)));
    }

    static SUPERUSER_ONLY: &[CommandRule] = &[CommandRule {
        pattern: CommandPattern::Exact(&["cluster", "destroy"]),
        only_superuser: true,
        required_permission: None,
    }];

    #[tokio::test]
    async fn test_superuser_only_rule_ignores_permissions() {
        let (gate, runner) = gate().await;
        let gate = CommandGate {
            rules: SUPERUSER_ONLY,
            ..gate
        };
        let admin = AuthIdentity::new("admin", vec![]);

        let outcome = gate.run(&admin, &args(&["cluster", "destroy"]), None).await;
        assert_eq!(outcome, GateOutcome::Denied("Permission denied".to_string()));
        assert!(runner.calls.lock().unwrap().is_empty());

        let outcome = gate.run(&AuthIdentity::superuser(), &args(&["cluster", "destroy"]), None).await;
        assert!(matches!(outcome, GateOutcome::Executed(_)));
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wildcard_executes_without_local_check() {
        let (gate, runner) = gate().await;
        let nobody = AuthIdentity::new("nobody", vec![]);

        let outcome = gate.run(&nobody, &args(&["cluster", "disable", "node-x"]), None).await;
        assert!(matches!(outcome, GateOutcome::Executed(_)));

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].0, args(&["cluster", "disable", "node-x"]));
        assert_eq!(calls[0].2, vec![("CIB_user".to_string(), "nobody".to_string())]);
    }

    #[tokio::test]
    async fn test_debug_flags_stripped_before_run() {
        let (gate, runner) = gate().await;
        let superuser = AuthIdentity::superuser();

        gate.run(&superuser, &args(&["cluster", "start", "--debug"]), None).await;
        gate.run(&superuser, &args(&["cluster", "start", "--deb"]), Some("input")).await;

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].0, args(&["cluster", "start"]));
        assert_eq!(calls[1].0, args(&["cluster", "start"]));
        assert_eq!(calls[1].1.as_deref(), Some("input"));
        // superuser runs without impersonation
        assert!(calls[0].2.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_never_spawns() {
        let (gate, runner) = gate().await;
        let outcome = gate.run(&AuthIdentity::superuser(), &args(&["frobnicate"]), None).await;
        assert_eq!(outcome, GateOutcome::BadCommand);
        assert!(runner.calls.lock().unwrap().is_empty());
    }
}

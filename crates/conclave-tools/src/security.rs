//! Executable gating
//!
//! Commands are matched by the basename of their executable, so `/usr/bin/git`
//! and `git` are the same entry.

/// Shell metacharacters rejected in `exec` directive arguments
pub const SHELL_METACHARACTERS: &[char] = &['|', ';', '&', '$', '`', '<', '>', '\n', '\r'];

/// Executables the `exec` tool never runs, allowlisted or not
pub const DEFAULT_BLOCKED_COMMANDS: &[&str] = &[
    "rm", "rmdir", "dd", "mkfs", "fdisk", "shred", "shutdown", "reboot", "poweroff", "halt",
    "sudo", "su", "doas", "passwd", "chown", "iptables", "kill", "pkill", "killall", "crontab",
];

/// Basename of the executable in `command` (first word, last path segment)
pub fn base_command(command: &str) -> &str {
    let first = command.split_whitespace().next().unwrap_or(command);
    first.rsplit(['/', '\\']).next().unwrap_or(first)
}

/// Whether `command` passes `allowlist`; `None` allows everything
pub fn is_allowed(allowlist: Option<&[String]>, command: &str) -> bool {
    match allowlist {
        None => true,
        Some(list) => {
            let base = base_command(command);
            list.iter().any(|allowed| base_command(allowed) == base)
        }
    }
}

/// Whether `command` is on the built-in block list
pub fn is_blocked(command: &str) -> bool {
    DEFAULT_BLOCKED_COMMANDS.contains(&base_command(command))
}

/// First shell metacharacter found in `s`
pub fn contains_shell_metacharacters(s: &str) -> Option<char> {
    s.chars().find(|c| SHELL_METACHARACTERS.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_command() {
        assert_eq!(base_command("git"), "git");
        assert_eq!(base_command("/usr/bin/git status"), "git");
        assert_eq!(base_command("C:\\tools\\cargo.exe"), "cargo.exe");
    }

    #[test]
    fn test_allowlist_matches_basename() {
        let list = vec!["cargo".to_string(), "/bin/echo".to_string()];
        assert!(is_allowed(Some(list.as_slice()), "/home/me/.cargo/bin/cargo"));
        assert!(is_allowed(Some(list.as_slice()), "echo"));
        assert!(!is_allowed(Some(list.as_slice()), "false"));
        assert!(!is_allowed(Some(&[] as &[String]), "echo"));
        assert!(is_allowed(None, "anything"));
    }

    #[test]
    fn test_blocked_commands() {
        assert!(is_blocked("rm"));
        assert!(is_blocked("/bin/rm"));
        assert!(!is_blocked("ls"));
        assert_eq!(contains_shell_metacharacters("a; b"), Some(';'));
        assert_eq!(contains_shell_metacharacters("plain"), None);
    }
}

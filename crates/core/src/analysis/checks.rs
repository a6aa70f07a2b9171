//! Heuristic checks over an unpacked (or live) filesystem tree.

use std::fs;
use std::path::Path;

use crate::analysis::{Finding, RiskKind};

pub const INITTAB: &str = "etc/inittab";
pub const INETD_CONF: &str = "etc/inetd.conf";
pub const PASSWD: &str = "etc/passwd";
pub const SHADOW: &str = "etc/shadow";

/// Offset of the boot-delay byte in the firmware image.
pub const BOOT_DELAY_OFFSET: u64 = 0x100;

/// Classification of the boot-delay byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDelay {
    None,
    Normal(u8),
    Anomalous(u8),
}

impl BootDelay {
    pub fn classify(value: u8) -> Self {
        match value {
            0 => BootDelay::None,
            1..=9 => BootDelay::Normal(value),
            _ => BootDelay::Anomalous(value),
        }
    }

    pub fn finding(self) -> Finding {
        match self {
            BootDelay::None => Finding::info("Boot delay = 0 seconds (no delay)"),
            BootDelay::Normal(v) => Finding::info(format!("Boot delay = {v} seconds")),
            BootDelay::Anomalous(v) => Finding::risk(
                RiskKind::AnomalousBootDelay,
                format!("Boot delay {v} seconds (unusually long)"),
            ),
        }
    }
}

/// State of the root entry in a shadow database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootAccount {
    /// Hash field empty, `!` or `*`.
    Locked,
    Hashed,
}

/// Classify the `root:` entry of a shadow file body; `None` when there is no root entry.
pub fn classify_root(shadow: &str) -> Option<RootAccount> {
    let line = shadow.lines().find(|l| l.starts_with("root:"))?;
    let hash = line.split(':').nth(1).unwrap_or("");
    if matches!(hash, "" | "!" | "*") {
        Some(RootAccount::Locked)
    } else {
        Some(RootAccount::Hashed)
    }
}

/// Non-comment, non-blank lines of a config file.
pub fn active_lines(body: &str) -> impl Iterator<Item = &str> {
    body.lines().filter(|l| {
        let t = l.trim_start();
        !t.is_empty() && !t.starts_with('#')
    })
}

/// Whether an inittab body spawns a getty on a serial port.
pub fn has_serial_getty(inittab: &str) -> bool {
    active_lines(inittab).any(|l| l.contains("getty") && l.contains("ttyS"))
}

/// Whether an inetd.conf body mentions `service` on an active line.
///
/// Commented-out entries do not count, unlike a whole-file substring search.
pub fn has_inetd_service(inetd: &str, service: &str) -> bool {
    active_lines(inetd).any(|l| l.contains(service))
}

/// Account names from a passwd body.
pub fn account_names(passwd: &str) -> Vec<String> {
    passwd
        .lines()
        .filter(|l| l.contains(':'))
        .filter_map(|l| l.split(':').next())
        .map(str::to_string)
        .collect()
}

fn read_lossy(path: &Path) -> Option<String> {
    fs::read(path).ok().map(|b| String::from_utf8_lossy(&b).into_owned())
}

/// Run the filesystem-content checks against `root`. Absent files are skipped.
pub fn inspect_tree(root: &Path) -> Vec<Finding> {
    let mut findings = Vec::new();

    if let Some(inittab) = read_lossy(&root.join(INITTAB)) {
        if has_serial_getty(&inittab) {
            findings.push(Finding::risk(
                RiskKind::SerialConsole,
                "Serial console getty may be enabled",
            ));
        } else {
            findings.push(Finding::info("No serial getty found"));
        }
    }

    if let Some(inetd) = read_lossy(&root.join(INETD_CONF)) {
        findings.push(if has_inetd_service(&inetd, "telnet") {
            Finding::risk(RiskKind::TelnetEnabled, "Telnet enabled")
        } else {
            Finding::info("Telnet disabled")
        });
        findings.push(if has_inetd_service(&inetd, "ftp") {
            Finding::risk(RiskKind::FtpEnabled, "FTP enabled")
        } else {
            Finding::info("FTP disabled")
        });
    }

    if let Some(passwd) = read_lossy(&root.join(PASSWD)) {
        findings.push(Finding::info(format!("Users: {}", account_names(&passwd).join(", "))));
    }

    if let Some(shadow) = read_lossy(&root.join(SHADOW)) {
        findings.push(match classify_root(&shadow) {
            Some(RootAccount::Locked) => {
                Finding::risk(RiskKind::RootNoPassword, "root has no password or is locked")
            }
            Some(RootAccount::Hashed) => Finding::info("root has hash password"),
            None => Finding::info("No root entry in shadow file"),
        });
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_delay_classes() {
        assert_eq!(BootDelay::classify(0), BootDelay::None);
        assert_eq!(BootDelay::classify(9), BootDelay::Normal(9));
        assert_eq!(BootDelay::classify(10), BootDelay::Anomalous(10));
        assert!(BootDelay::Anomalous(30).finding().is_risk());
        assert!(!BootDelay::Normal(3).finding().is_risk());
    }

    #[test]
    fn root_classification() {
        assert_eq!(classify_root("root::0:0:::::\n"), Some(RootAccount::Locked));
        assert_eq!(classify_root("root:!:0:0:::::\n"), Some(RootAccount::Locked));
        assert_eq!(classify_root("root:*:0:0:::::\n"), Some(RootAccount::Locked));
        assert_eq!(classify_root("root:$6$salt$hash:0:0:::::\n"), Some(RootAccount::Hashed));
        assert_eq!(classify_root("admin:$1$x$y:0:0:::::\n"), None);
    }

    #[test]
    fn commented_services_do_not_count() {
        let inetd = "#telnet stream tcp nowait root /usr/sbin/telnetd telnetd\nftp stream tcp nowait root /usr/sbin/ftpd ftpd\n";
        assert!(!has_inetd_service(inetd, "telnet"));
        assert!(has_inetd_service(inetd, "ftp"));
        assert!(has_serial_getty("ttyS0::respawn:/sbin/getty -L ttyS0 115200 vt100\n"));
        assert!(!has_serial_getty("#ttyS0::respawn:/sbin/getty -L ttyS0 115200 vt100\n"));
    }

    #[test]
    fn inspect_tree_reports_each_present_file() {
        let dir = tempfile::tempdir().unwrap();
        let etc = dir.path().join("etc");
        fs::create_dir_all(&etc).unwrap();
        fs::write(etc.join("inittab"), "::sysinit:/etc/init.d/rcS\n").unwrap();
        fs::write(etc.join("passwd"), "root:x:0:0:root:/root:/bin/sh\nnobody:x:99:99::/:/bin/false\n").unwrap();
        fs::write(etc.join("shadow"), "root::0:0:99999:7:::\n").unwrap();

        let messages: Vec<String> =
            inspect_tree(dir.path()).into_iter().map(|f| f.message).collect();
        assert_eq!(
            messages,
            vec![
                "No serial getty found".to_string(),
                "Users: root, nobody".to_string(),
                "root has no password or is locked".to_string(),
            ]
        );
    }
}

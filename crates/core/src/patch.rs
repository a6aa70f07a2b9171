//! In-place edits of a segment's live `rootfs` tree.
//!
//! Password and service edits are independent steps; neither is
//! transactional and a failure in one leaves the other's edits in place.

use std::fs;
use std::path::Path;

use serde::Serialize;
use sha_crypt::{sha512_simple, Sha512Params};
use tracing::info;

use crate::analysis::checks::{
    active_lines, has_inetd_service, has_serial_getty, INETD_CONF, INITTAB, SHADOW,
};
use crate::error::{WorkbenchError, WorkbenchResult};

/// SHA-512-crypt rounds written into new root hashes.
pub const PASSWORD_ROUNDS: usize = 5000;
/// Hash field written when the root password is cleared.
pub const LOCKED_HASH: &str = "!";

pub const GETTY_LINE: &str = "ttyS0::respawn:/sbin/getty -L ttyS0 115200 vt100";
pub const TELNET_LINE: &str = "telnet stream tcp nowait root /usr/sbin/telnetd telnetd";
pub const FTP_LINE: &str = "ftp stream tcp nowait root /usr/sbin/ftpd ftpd -w /";

/// Hash `password` as `$6$salt$digest`, or return the lock sentinel for an empty password.
pub fn hash_password(password: &str) -> WorkbenchResult<String> {
    if password.is_empty() {
        return Ok(LOCKED_HASH.to_string());
    }
    let params =
        Sha512Params::new(PASSWORD_ROUNDS).map_err(|e| WorkbenchError::Hash(format!("{e:?}")))?;
    sha512_simple(password, &params).map_err(|e| WorkbenchError::Hash(format!("{e:?}")))
}

/// Replace the root hash in `rootfs/etc/shadow`, keeping every other line.
pub fn set_root_password(rootfs: &Path, password: &str) -> WorkbenchResult<()> {
    let shadow = rootfs.join(SHADOW);
    if !shadow.is_file() {
        return Err(WorkbenchError::PatchTargetMissing(format!("{} not found", shadow.display())));
    }
    let body = fs::read_to_string(&shadow)?;
    let hash = hash_password(password)?;

    let mut found = false;
    let mut lines: Vec<String> = Vec::new();
    for line in body.lines() {
        if !found && line.starts_with("root:") {
            let mut fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 2 {
                fields.push("");
            }
            fields[1] = &hash;
            lines.push(fields.join(":"));
            found = true;
        } else {
            lines.push(line.to_string());
        }
    }
    if !found {
        return Err(WorkbenchError::PatchTargetMissing(format!(
            "no root entry in {}",
            shadow.display()
        )));
    }

    fs::write(&shadow, join_lines(&lines))?;
    info!(
        "Root password {} in {}",
        if password.is_empty() { "locked" } else { "updated" },
        shadow.display()
    );
    Ok(())
}

/// Desired state per service; `None` leaves a service alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceToggles {
    pub serial: Option<bool>,
    pub telnet: Option<bool>,
    pub ftp: Option<bool>,
}

/// Bring the service configuration to the requested state.
///
/// Returns the actions taken; an empty list means everything was already in
/// the desired state. Enabling a service creates its config file when missing.
pub fn apply_services(rootfs: &Path, toggles: ServiceToggles) -> WorkbenchResult<Vec<String>> {
    let mut actions = Vec::new();

    if let Some(enable) = toggles.serial {
        let changed = toggle_entry(
            &rootfs.join(INITTAB),
            enable,
            GETTY_LINE,
            has_serial_getty,
            |l| l.contains("getty") && l.contains("ttyS"),
        )?;
        if changed {
            actions.push(format!("{} serial getty", verb(enable)));
        }
    }

    let inetd = rootfs.join(INETD_CONF);
    for (name, enable, line, service) in [
        ("telnet", toggles.telnet, TELNET_LINE, "telnet"),
        ("ftp", toggles.ftp, FTP_LINE, "ftp"),
    ] {
        let Some(enable) = enable else { continue };
        let changed = toggle_entry(
            &inetd,
            enable,
            line,
            |body| has_inetd_service(body, service),
            |l| l.contains(service),
        )?;
        if changed {
            actions.push(format!("{} {name}", verb(enable)));
        }
    }

    for action in &actions {
        info!("Service patch: {}", action);
    }
    Ok(actions)
}

fn verb(enable: bool) -> &'static str {
    if enable {
        "enabled"
    } else {
        "disabled"
    }
}

/// Add `entry` or drop every active line matching `matches`. Returns whether the file changed.
fn toggle_entry(
    path: &Path,
    enable: bool,
    entry: &str,
    present: impl Fn(&str) -> bool,
    matches: impl Fn(&str) -> bool,
) -> WorkbenchResult<bool> {
    let body = match fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    if enable {
        let body = body.unwrap_or_default();
        if present(&body) {
            return Ok(false);
        }
        let mut lines: Vec<String> = body.lines().map(str::to_string).collect();
        lines.push(entry.to_string());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, join_lines(&lines))?;
        return Ok(true);
    }

    let Some(body) = body else { return Ok(false) };
    let active: Vec<&str> = active_lines(&body).collect();
    if !active.iter().any(|l| matches(*l)) {
        return Ok(false);
    }
    let kept: Vec<String> = body
        .lines()
        .filter(|l| !(active.contains(l) && matches(*l)))
        .map(str::to_string)
        .collect();
    fs::write(path, join_lines(&kept))?;
    Ok(true)
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::checks::{classify_root, RootAccount};

    fn rootfs_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (rel, body) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        dir
    }

    #[test]
    fn empty_password_locks_root() {
        let dir = rootfs_with(&[(SHADOW, "root:$1$abc$def:18000:0:99999:7:::\nnobody:*:18000:0:99999:7:::\n")]);
        set_root_password(dir.path(), "").unwrap();
        let body = fs::read_to_string(dir.path().join(SHADOW)).unwrap();
        assert_eq!(body, "root:!:18000:0:99999:7:::\nnobody:*:18000:0:99999:7:::\n");
        assert_eq!(classify_root(&body), Some(RootAccount::Locked));
    }

    #[test]
    fn password_is_sha512_crypt() {
        let dir = rootfs_with(&[(SHADOW, "root::0:0:99999:7:::\n")]);
        set_root_password(dir.path(), "hunter2").unwrap();
        let body = fs::read_to_string(dir.path().join(SHADOW)).unwrap();
        let hash = body.split(':').nth(1).unwrap();
        assert!(hash.starts_with("$6$"), "unexpected hash {hash}");
        assert!(sha_crypt::sha512_check("hunter2", hash).is_ok());
        assert_eq!(classify_root(&body), Some(RootAccount::Hashed));
    }

    #[test]
    fn missing_shadow_or_root_is_patch_target_missing() {
        let empty = tempfile::tempdir().unwrap();
        let err = set_root_password(empty.path(), "x").unwrap_err();
        assert_eq!(err.classification(), "patch-target-missing");

        let dir = rootfs_with(&[(SHADOW, "admin:!:0:0:::::\n")]);
        let err = set_root_password(dir.path(), "x").unwrap_err();
        assert!(matches!(err, WorkbenchError::PatchTargetMissing(_)));
    }

    #[test]
    fn services_toggle_idempotently() {
        let dir = rootfs_with(&[(INETD_CONF, "# inetd\nftp stream tcp nowait root /usr/sbin/ftpd ftpd\n")]);
        let toggles = ServiceToggles { serial: Some(true), telnet: Some(true), ftp: Some(false) };

        let actions = apply_services(dir.path(), toggles).unwrap();
        assert_eq!(actions, vec!["enabled serial getty", "enabled telnet", "disabled ftp"]);
        let inetd = fs::read_to_string(dir.path().join(INETD_CONF)).unwrap();
        assert_eq!(inetd, format!("# inetd\n{TELNET_LINE}\n"));
        let inittab = fs::read_to_string(dir.path().join(INITTAB)).unwrap();
        assert_eq!(inittab, format!("{GETTY_LINE}\n"));

        assert!(apply_services(dir.path(), toggles).unwrap().is_empty());
    }

    #[test]
    fn disabling_keeps_commented_lines() {
        let dir = rootfs_with(&[(INITTAB, "#ttyS0::respawn:/sbin/getty\nttyS1::respawn:/sbin/getty -L ttyS1\n")]);
        let actions =
            apply_services(dir.path(), ServiceToggles { serial: Some(false), ..Default::default() })
                .unwrap();
        assert_eq!(actions, vec!["disabled serial getty"]);
        let inittab = fs::read_to_string(dir.path().join(INITTAB)).unwrap();
        assert_eq!(inittab, "#ttyS0::respawn:/sbin/getty\n");
    }
}

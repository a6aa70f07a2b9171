#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use fwbench_core::tools::{
    BUILD_MULTI_SCRIPT, BUILD_SCRIPT, EXTRACT_MULTI_SCRIPT, EXTRACT_SCRIPT, FOOTER_SCRIPT,
};

pub const SHADOW_NO_PASSWORD: &str = "root::0:0:99999:7:::\nnobody:*:0:0:99999:7:::\n";
pub const INETD_TELNET: &str = "telnet stream tcp nowait root /usr/sbin/telnetd telnetd\n";
pub const INITTAB_PLAIN: &str = "::sysinit:/etc/init.d/rcS\n";

pub fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}")).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
}

pub fn write_file(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
    fs::write(path, body).expect("write file");
}

/// A segment directory with `logs/config.log` and (optionally) a populated rootfs.
pub fn make_segment(dir: &Path, config_log: &str, extracted: bool) {
    write_file(dir, "logs/config.log", config_log);
    if extracted {
        write_file(dir, "rootfs/etc/shadow", SHADOW_NO_PASSWORD);
        write_file(dir, "rootfs/etc/inetd.conf", INETD_TELNET);
        write_file(dir, "rootfs/etc/inittab", INITTAB_PLAIN);
        write_file(dir, "rootfs/etc/passwd", "root:x:0:0:root:/root:/bin/sh\n");
    }
}

/// Firmware image with the given boot-delay byte and a filesystem region at 0x1000.
pub fn make_firmware(path: &Path, boot_delay: u8) {
    let mut data = vec![0u8; 0x4000];
    data[0x100] = boot_delay;
    for (i, b) in data.iter_mut().enumerate().skip(0x1000) {
        *b = (i % 251) as u8;
    }
    fs::write(path, data).expect("write firmware");
}

/// Fake unpacker: `-d <dest> <image>` creates a tree with a passwordless root and telnet.
pub fn fake_unsquashfs(dir: &Path) -> PathBuf {
    let path = dir.join("unsquashfs");
    write_script(
        &path,
        &format!(
            "mkdir -p \"$2/etc\"\n\
             printf '{}' > \"$2/etc/shadow\"\n\
             printf '{}' > \"$2/etc/inetd.conf\"\n",
            SHADOW_NO_PASSWORD.replace('\n', "\\n"),
            INETD_TELNET.replace('\n', "\\n"),
        ),
    );
    path
}

/// A toolchain root whose scripts fake extraction, build and footer repair.
///
/// `extract-firmware.sh` writes a single-segment workspace; the multi variant
/// writes two segment workspaces listed by absolute path. Builds write
/// `new-firmware.bin`; the footer script appends a marker in its cwd.
pub fn fake_toolchain(dir: &Path, config_log: &str) -> PathBuf {
    let root = dir.join("fmk");
    fs::create_dir_all(&root).expect("create fmk");
    let log = config_log.replace('\n', "\\n");

    write_script(
        &root.join(EXTRACT_SCRIPT),
        &format!(
            "set -e\n\
             mkdir -p \"$2/logs\" \"$2/rootfs/etc\"\n\
             printf '{log}' > \"$2/logs/config.log\"\n\
             printf '{shadow}' > \"$2/rootfs/etc/shadow\"\n\
             printf '{inetd}' > \"$2/rootfs/etc/inetd.conf\"\n\
             echo extracted \"$1\"\n",
            shadow = SHADOW_NO_PASSWORD.replace('\n', "\\n"),
            inetd = INETD_TELNET.replace('\n', "\\n"),
        ),
    );
    write_script(
        &root.join(EXTRACT_MULTI_SCRIPT),
        &format!(
            "set -e\nmkdir -p \"$2/logs\"\n: > \"$2/logs/config.log\"\n\
             for s in fs_1 fs_2; do\n\
             mkdir -p \"$2/$s/logs\" \"$2/$s/rootfs/etc\"\n\
             printf '{log}' > \"$2/$s/logs/config.log\"\n\
             printf 'root:$6$x$y:0:0:99999:7:::\\n' > \"$2/$s/rootfs/etc/shadow\"\n\
             echo \"$2/$s\" >> \"$2/logs/config.log\"\n\
             done\n"
        ),
    );
    for script in [BUILD_SCRIPT, BUILD_MULTI_SCRIPT] {
        write_script(
            &root.join(script),
            &format!(
                "set -e\nprintf 'IMAGE' > \"$1/new-firmware.bin\"\necho built {script} \"$2\"\n"
            ),
        );
    }
    write_script(
        &root.join(FOOTER_SCRIPT),
        "set -e\ncp \"$1\" modified_checksum.img\nprintf 'FOOTER' >> modified_checksum.img\n",
    );
    root
}

//! Typed view over the `KEY=VALUE` configuration log written by the extraction toolchain.
//!
//! The toolchain writes `logs/config.log` into every workspace. Most lines look
//! like `FS_OFFSET='0x240000'`; in multi-segment mode the top-level log also
//! carries bare lines holding absolute paths to per-segment workspaces.
//!
//! Parsing is tolerant: a numeric field that fails to parse is simply absent,
//! so every consumer pattern-matches on `Option` instead of assuming a default.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{WorkbenchError, WorkbenchResult};

/// Header types that mark an image as a candidate for vendor footer repair.
const FOOTER_REPAIR_HEADER_TYPES: [&str; 4] = ["trx", "uimage", "hdr0", "linksys"];

/// Parsed metadata for one segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub fw_size: Option<u64>,
    pub header_size: Option<u64>,
    pub header_image_size: Option<u64>,
    pub header_type: Option<String>,
    pub footer_size: Option<u64>,
    pub footer_offset: Option<u64>,
    pub fs_offset: Option<u64>,
    pub fs_blocksize: Option<u64>,
    pub fs_type: Option<String>,
    pub fs_compression: Option<String>,
    pub fs_args: Option<String>,
    /// Packaging tool recorded by the extractor (`MKFS`).
    pub mkfs: Option<String>,
    /// Every key/value pair as read, quotes stripped.
    pub raw: BTreeMap<String, String>,
}

/// Result of parsing a whole config log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLog {
    pub metadata: Metadata,
    /// Lines without `=`; in multi-segment mode these are segment workspace paths.
    pub extra_lines: Vec<String>,
}

/// Parse a config log body.
pub fn parse_config_log(body: &str) -> ConfigLog {
    let mut raw = BTreeMap::new();
    let mut extra_lines = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => {
                let value = value.trim().trim_matches('\'').trim_matches('"');
                raw.insert(key.trim().to_string(), value.to_string());
            }
            None => extra_lines.push(line.to_string()),
        }
    }

    ConfigLog { metadata: Metadata::from_raw(raw), extra_lines }
}

/// Read and parse a config log; a missing file yields an empty log.
pub fn load_config_log(path: &Path) -> WorkbenchResult<ConfigLog> {
    if !path.is_file() {
        return Ok(ConfigLog::default());
    }
    let bytes = fs::read(path)?;
    Ok(parse_config_log(&String::from_utf8_lossy(&bytes)))
}

/// Parse `0x`-prefixed values as hex, anything else as decimal.
pub fn parse_numeric(value: &str) -> Option<u64> {
    let value = value.trim();
    match value.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("0x") => {
            u64::from_str_radix(&value[2..], 16).ok()
        }
        _ => value.parse().ok(),
    }
}

impl Metadata {
    /// Build typed fields from a raw key/value map.
    pub fn from_raw(raw: BTreeMap<String, String>) -> Self {
        let num = |key: &str| raw.get(key).and_then(|v| parse_numeric(v));
        let text = |key: &str| raw.get(key).filter(|v| !v.is_empty()).cloned();

        Self {
            fw_size: num("FW_SIZE"),
            header_size: num("HEADER_SIZE"),
            header_image_size: num("HEADER_IMAGE_SIZE"),
            header_type: text("HEADER_TYPE"),
            footer_size: num("FOOTER_SIZE"),
            footer_offset: num("FOOTER_OFFSET"),
            fs_offset: num("FS_OFFSET"),
            fs_blocksize: num("FS_BLOCKSIZE"),
            fs_type: text("FS_TYPE"),
            fs_compression: text("FS_COMPRESSION"),
            fs_args: text("FS_ARGS"),
            mkfs: text("MKFS"),
            raw,
        }
    }

    /// End of the filesystem region: the footer offset, or the firmware size when
    /// the image has no footer.
    pub fn footer_end(&self) -> Option<u64> {
        self.footer_offset.or(self.fw_size)
    }

    /// Raw span `footer_end - fs_offset - footer_size`.
    ///
    /// `None` means "unknown" and is distinct from any numeric answer; the value
    /// may be zero or negative for corrupt metadata.
    pub fn original_span(&self) -> Option<i64> {
        let fs_offset = self.fs_offset?;
        let footer_end = self.footer_end().filter(|end| *end != 0)?;
        let footer_size = self.footer_size.unwrap_or(0);
        Some(footer_end as i64 - fs_offset as i64 - footer_size as i64)
    }

    /// Validated byte range available for the packaged filesystem.
    pub fn rootfs_span(&self) -> WorkbenchResult<u64> {
        if self.fs_offset.is_none() {
            return Err(WorkbenchError::MetadataIncomplete { field: "FS_OFFSET" });
        }
        let span = self
            .original_span()
            .ok_or(WorkbenchError::MetadataIncomplete { field: "FOOTER_OFFSET" })?;
        if span <= 0 {
            return Err(WorkbenchError::InvalidSpan { span });
        }
        Ok(span as u64)
    }

    /// Whether the build output should go through vendor footer repair.
    pub fn is_footer_repair_candidate(&self) -> bool {
        let footer = self.footer_size.unwrap_or(0);
        let header = self.header_type.as_deref().unwrap_or_default().to_lowercase();
        footer > 0 && FOOTER_REPAIR_HEADER_TYPES.iter().any(|t| header.contains(t))
    }

    /// Human-readable `KEY = VALUE` lines plus derived notes.
    pub fn render(&self) -> Vec<String> {
        if self.raw.is_empty() {
            return vec!["No metadata.".to_string()];
        }
        let mut lines: Vec<String> = self.raw.iter().map(|(k, v)| format!("{k} = {v}")).collect();
        match self.rootfs_span() {
            Ok(span) => lines.push(format!("rootfs span = {span} (0x{span:X})")),
            Err(e) => lines.push(format!("rootfs span unavailable: {e}")),
        }
        if self.is_footer_repair_candidate() {
            lines.push("Vendor footer repair candidate detected.".to_string());
        }
        lines
    }
}

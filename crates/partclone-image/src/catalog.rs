//! Resolving export names to image files.
//!
//! If a `manifest.json` is present under the catalog root it is the authoritative list of
//! exports. Otherwise every regular file directly under the root is an export named after the
//! file.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::{ImageError, OpenOptions, Result, Session, StdFileBackend};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MAX_EXPORT_NAME_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExportEntry {
    pub name: String,
    /// Path relative to the catalog root.
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ManifestFormat {
    V1 { exports: Vec<ExportEntry> },
    V0(Vec<ExportEntry>),
}

/// Parse and validate a manifest document.
pub fn parse_manifest(json: &str) -> Result<Vec<ExportEntry>> {
    let parsed: ManifestFormat =
        serde_json::from_str(json).map_err(|e| ImageError::Catalog(format!("invalid json: {e}")))?;
    let exports = match parsed {
        ManifestFormat::V1 { exports } => exports,
        ManifestFormat::V0(exports) => exports,
    };

    let mut seen = HashSet::new();
    for entry in &exports {
        validate_export_name(&entry.name)?;
        validate_relative_file(&entry.name, &entry.file)?;
        if !seen.insert(entry.name.as_str()) {
            return Err(ImageError::Catalog(format!(
                "duplicate export name: {}",
                entry.name
            )));
        }
    }
    Ok(exports)
}

/// Export names are opaque ASCII `[A-Za-z0-9._-]` identifiers, never `.` or `..`.
pub fn validate_export_name(name: &str) -> Result<()> {
    let allowed = !name.is_empty()
        && name.len() <= MAX_EXPORT_NAME_LEN
        && name != "."
        && name != ".."
        && name.bytes().all(|b| {
            matches!(
                b,
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-'
            )
        });
    if !allowed {
        return Err(ImageError::InvalidExport(truncate_for_error(
            name,
            MAX_EXPORT_NAME_LEN,
        )));
    }
    Ok(())
}

fn validate_relative_file(name: &str, file: &str) -> Result<()> {
    let bad = file.is_empty()
        || file.len() > 512
        || file.contains('\0')
        || Path::new(file)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if bad {
        return Err(ImageError::Catalog(format!(
            "invalid file path for export {name}: {}",
            truncate_for_error(file, 512)
        )));
    }
    Ok(())
}

fn truncate_for_error(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}

/// A directory of partclone images.
#[derive(Debug)]
pub struct ExportCatalog {
    root: PathBuf,
    options: OpenOptions,
    manifest: OnceLock<Result<Option<Vec<ExportEntry>>>>,
}

impl ExportCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            options: OpenOptions::default(),
            manifest: OnceLock::new(),
        }
    }

    pub fn with_options(mut self, options: OpenOptions) -> Self {
        self.options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest(&self) -> Result<Option<&[ExportEntry]>> {
        let loaded = self.manifest.get_or_init(|| {
            let path = self.root.join(MANIFEST_FILE);
            match std::fs::read_to_string(&path) {
                Ok(json) => parse_manifest(&json).map(Some),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(ImageError::Catalog(format!(
                    "failed to read {}: {e}",
                    path.display()
                ))),
            }
        });
        match loaded {
            Ok(entries) => Ok(entries.as_deref()),
            Err(e) => Err(e.clone()),
        }
    }

    /// All exports, in manifest order or sorted by name for directory catalogs.
    pub fn list(&self) -> Result<Vec<ExportEntry>> {
        if let Some(entries) = self.manifest()? {
            return Ok(entries.to_vec());
        }

        let mut out = Vec::new();
        for dirent in std::fs::read_dir(&self.root)? {
            let dirent = dirent?;
            if !dirent.file_type()?.is_file() {
                continue;
            }
            let Some(name) = dirent.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name == MANIFEST_FILE || validate_export_name(&name).is_err() {
                continue;
            }
            out.push(ExportEntry {
                file: name.clone(),
                name,
                description: None,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Path of the image behind `selector`.
    pub fn resolve(&self, selector: &str) -> Result<PathBuf> {
        validate_export_name(selector)?;

        let file = match self.manifest()? {
            Some(entries) => entries
                .iter()
                .find(|e| e.name == selector)
                .map(|e| e.file.clone())
                .ok_or_else(|| ImageError::ExportNotFound(selector.to_string()))?,
            None => selector.to_string(),
        };

        let path = self.root.join(file);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(ImageError::ExportNotFound(selector.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ImageError::ExportNotFound(selector.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve `selector` and open a prepared session on it.
    pub fn open(&self, selector: &str) -> Result<Session<StdFileBackend>> {
        let path = self.resolve(selector)?;
        tracing::debug!(export = selector, path = %path.display(), "resolved export");
        let backend = StdFileBackend::open_read_only(&path)?;
        let session = Session::with_options(selector, backend, self.options);
        session.prepare()?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_name_validation_rejects_traversal() {
        for bad in ["", ".", "..", "../etc", "a/b", "a\\b", "disk img", "é"] {
            assert!(
                matches!(validate_export_name(bad), Err(ImageError::InvalidExport(_))),
                "{bad:?}"
            );
        }
        for good in ["disk", "sda1.img", "backup-2024_01"] {
            validate_export_name(good).unwrap();
        }
        let long = "a".repeat(MAX_EXPORT_NAME_LEN + 1);
        match validate_export_name(&long).unwrap_err() {
            ImageError::InvalidExport(msg) => assert!(msg.ends_with("...")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn manifest_accepts_both_layouts() {
        let v1 = r#"{"exports":[{"name":"root","file":"images/root.pcl","description":"rootfs"}]}"#;
        let v0 = r#"[{"name":"root","file":"root.pcl"}]"#;
        assert_eq!(parse_manifest(v1).unwrap()[0].file, "images/root.pcl");
        assert_eq!(parse_manifest(v0).unwrap()[0].description, None);
    }

    #[test]
    fn manifest_rejects_duplicates_and_escaping_paths() {
        let dup = r#"[{"name":"a","file":"x"},{"name":"a","file":"y"}]"#;
        assert!(matches!(parse_manifest(dup), Err(ImageError::Catalog(_))));

        let escape = r#"[{"name":"a","file":"../x"}]"#;
        assert!(matches!(parse_manifest(escape), Err(ImageError::Catalog(_))));

        let absolute = r#"[{"name":"a","file":"/etc/passwd"}]"#;
        assert!(matches!(
            parse_manifest(absolute),
            Err(ImageError::Catalog(_))
        ));
    }
}

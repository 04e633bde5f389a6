// src/sbom.rs

use crate::discovery::{self, DirLister};
use crate::error::SbomError;
use crate::model::RawPackage;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// File names of SBOM documents picked up from a checkout
pub const SBOM_FILES: &str = r"(.*\.cdx|s?bom)\.json$";

/// Reads the package list out of one SBOM document.
///
/// CycloneDX documents list `components` and name the reference `bom-ref`.
/// Syft's native format lists `artifacts` and calls it `id`. Both are mapped
/// onto the raw keys `name`, `type`, `version` and `bom_ref`, copying only the
/// keys that are present.
pub fn read_packages(path: &Path) -> Result<Vec<RawPackage>, SbomError> {
    let shown = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|source| SbomError::Read { path: shown.clone(), source })?;
    let document: Value = serde_json::from_str(&text).map_err(|source| SbomError::Parse { path: shown.clone(), source })?;

    let (entries, reference_key) = if let Some(components) = document.get("components").and_then(Value::as_array) {
        (components, "bom-ref")
    } else if let Some(artifacts) = document.get("artifacts").and_then(Value::as_array) {
        (artifacts, "id")
    } else {
        return Err(SbomError::UnknownFormat { path: shown });
    };

    Ok(entries.iter().filter_map(Value::as_object).map(|entry| to_raw(entry, reference_key)).collect())
}

fn to_raw(entry: &serde_json::Map<String, Value>, reference_key: &str) -> RawPackage {
    let mut raw = RawPackage::new();
    for (from, to) in [("name", "name"), ("type", "type"), ("version", "version"), (reference_key, "bom_ref"), ("bom_ref", "bom_ref")] {
        if let Some(value) = entry.get(from) {
            raw.insert(to.to_string(), value.clone());
        }
    }
    raw
}

/// Collects packages from an explicit SBOM file, or from every SBOM document
/// discovered under `root` when none is given
pub fn collect<L: DirLister>(lister: &L, root: &Path, explicit: Option<&Path>) -> Result<Vec<RawPackage>, SbomError> {
    if let Some(path) = explicit {
        return read_packages(path);
    }

    let pattern = discovery::compile(SBOM_FILES)?;
    let found = discovery::find_files(lister, root, &pattern)
        .map_err(|source| SbomError::Read { path: root.display().to_string(), source })?;
    if found.is_empty() {
        warn!(root = %root.display(), "no SBOM documents found; record will list no packages");
    }

    let mut packages = Vec::new();
    for relative in found {
        info!(sbom = %relative, "reading SBOM");
        packages.extend(read_packages(&root.join(&relative))?);
    }
    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FsLister;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn write(dir: &Path, name: &str, value: Value) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, value.to_string()).unwrap();
        path
    }

    #[test]
    fn cyclonedx_components_keep_present_keys_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "bom.json",
            json!({
                "bomFormat": "CycloneDX",
                "components": [
                    {"bom-ref": "pkg:npm/%40ant-design/colors@5.0.1", "type": "library", "name": "@ant-design/colors", "version": "5.0.1"},
                    {"type": "file", "name": "README.md"}
                ]
            }),
        );

        let packages = read_packages(&path).unwrap();

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].get("bom_ref"), Some(&json!("pkg:npm/%40ant-design/colors@5.0.1")));
        assert_eq!(packages[0].get("version"), Some(&json!("5.0.1")));
        assert_eq!(Value::Object(packages[1].clone()), json!({"type": "file", "name": "README.md"}));
    }

    #[test]
    fn syft_artifacts_use_id_as_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "syft.json",
            json!({"artifacts": [{"id": "a1b2", "name": "serde", "version": "1.0.200", "type": "rust-crate"}]}),
        );

        let packages = read_packages(&path).unwrap();

        assert_eq!(
            Value::Object(packages[0].clone()),
            json!({"name": "serde", "type": "rust-crate", "version": "1.0.200", "bom_ref": "a1b2"})
        );
    }

    #[test]
    fn unknown_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "other.json", json!({"packages": []}));

        assert!(matches!(read_packages(&path), Err(SbomError::UnknownFormat { .. })));
    }

    #[test]
    fn discovered_documents_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("web")).unwrap();
        write(dir.path(), "bom.json", json!({"components": [{"name": "a"}]}));
        write(&dir.path().join("web"), "app.cdx.json", json!({"components": [{"name": "b"}]}));
        write(dir.path(), "package.json", json!({"name": "not-an-sbom"}));

        let mut names: Vec<_> = collect(&FsLister, dir.path(), None)
            .unwrap()
            .into_iter()
            .map(|p| p.get("name").cloned().unwrap())
            .collect();
        names.sort_by_key(|v| v.to_string());

        assert_eq!(names, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn no_documents_means_no_packages() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect(&FsLister, dir.path(), None).unwrap().is_empty());
    }
}

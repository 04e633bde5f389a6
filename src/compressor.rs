// src/compressor.rs

use crate::model::{CanonicalRecord, Languages, NormalizedPackage, RawPackage, RepoMetadata};
use serde_json::Value;

/// Builds the canonical record. Packages keep their input order, one
/// normalized entry per raw entry. No I/O.
pub fn compress(repo: &str, metadata: RepoMetadata, languages: Languages, packages: &[RawPackage]) -> CanonicalRecord {
    CanonicalRecord {
        repo: repo.to_string(),
        metadata,
        languages,
        packages: packages.iter().map(normalize_package).collect(),
    }
}

/// Keeps `name`, `type`, `version` and `bom_ref`. A key that is absent, or
/// whose value is not a string, becomes null.
pub fn normalize_package(raw: &RawPackage) -> NormalizedPackage {
    let field = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
    NormalizedPackage { name: field("name"), kind: field("type"), version: field("version"), bom_ref: field("bom_ref") }
}

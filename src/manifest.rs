//! Stack manifests - declarative YAML description of a resource graph
//!
//! The orchestration layer describes call sites as data; argument strings
//! of the form `${unit}` / `${unit.attr}` become cross-unit references.
//!
//! ```yaml
//! name: site
//! units:
//!   - name: key
//!     template: kms_key
//!     args:
//!       Name: key
//!   - name: alias
//!     template: kms_alias
//!     args:
//!       Name: alias
//!       AliasName: alias/key
//!       TargetKey: ${key}
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::TrellisError;
use crate::shape::{ArgExpr, BoundArgs};

/// Parsed stack manifest
#[derive(Debug, Deserialize)]
pub struct StackManifest {
    /// Optional stack name, informational only
    #[serde(default)]
    pub name: Option<String>,
    pub units: Vec<UnitDecl>,
}

/// One declared call site
#[derive(Debug, Deserialize)]
pub struct UnitDecl {
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub args: serde_yaml::Mapping,
}

impl UnitDecl {
    /// Convert the raw YAML args into bound argument expressions
    pub fn bound_args(&self) -> Result<BoundArgs, TrellisError> {
        let mut bound = BoundArgs::new();
        for (k, v) in &self.args {
            let key = k.as_str().ok_or_else(|| TrellisError::InvalidManifest {
                details: format!("non-string argument key in unit '{}'", self.name),
            })?;
            bound.insert(key.to_string(), ArgExpr::from_yaml(v)?);
        }
        Ok(bound)
    }
}

impl StackManifest {
    pub fn from_yaml(yaml: &str) -> Result<Self, TrellisError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, TrellisError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ArgExpr;

    const MANIFEST: &str = r#"
name: keys
units:
  - name: key
    template: kms_key
    args:
      Name: key
  - name: alias
    template: kms_alias
    args:
      Name: alias
      AliasName: alias/key
      TargetKey: ${key}
"#;

    #[test]
    fn parses_units_in_order() {
        let manifest = StackManifest::from_yaml(MANIFEST).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("keys"));
        assert_eq!(manifest.units.len(), 2);
        assert_eq!(manifest.units[0].name, "key");
        assert_eq!(manifest.units[1].template, "kms_alias");
    }

    #[test]
    fn ref_strings_become_references() {
        let manifest = StackManifest::from_yaml(MANIFEST).unwrap();
        let args = manifest.units[1].bound_args().unwrap();
        assert_eq!(args.get("TargetKey"), Some(&ArgExpr::reference("key", None)));
        assert_eq!(
            args.get("AliasName"),
            Some(&ArgExpr::Str("alias/key".to_string()))
        );
    }

    #[test]
    fn args_block_is_optional() {
        let manifest =
            StackManifest::from_yaml("units:\n  - name: u\n    template: t\n").unwrap();
        assert!(manifest.units[0].bound_args().unwrap().is_empty());
    }

    #[test]
    fn non_string_arg_key_rejected() {
        let manifest = StackManifest::from_yaml(
            "units:\n  - name: u\n    template: t\n    args:\n      1: x\n",
        )
        .unwrap();
        let err = manifest.units[0].bound_args().unwrap_err();
        assert!(err.to_string().starts_with("TRL-015"));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = StackManifest::from_yaml("units: [").unwrap_err();
        assert!(matches!(err, TrellisError::Yaml(_)));
    }

    #[test]
    fn from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.yaml");
        std::fs::write(&path, MANIFEST).unwrap();

        let manifest = StackManifest::from_file(&path).unwrap();
        assert_eq!(manifest.units.len(), 2);
    }
}

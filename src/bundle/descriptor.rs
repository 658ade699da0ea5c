//! Wires the bundle into the application's `package.json`.

use serde_json::{Map, Value, json};
use std::fs;
use std::path::{Path, PathBuf};

use super::error::{IoResultExt, PackageError, Result};

pub const DESCRIPTOR_FILE: &str = "package.json";
const BUNDLE_RESOURCE: &str = "bundle";

/// Ensures `build.extraResources` in `<app_path>/package.json` ships the
/// bundle directory. An entry whose `from` or `to` is already `"bundle"`
/// counts as present. The file is rewritten with two-space indentation and
/// a trailing newline; other keys keep their order.
pub fn update_app_descriptor(app_path: &Path) -> Result<PathBuf> {
    let path = app_path.join(DESCRIPTOR_FILE);
    let content = fs::read_to_string(&path).at(&path)?;
    let mut doc: Value = serde_json::from_str(&content).map_err(|e| PackageError::Descriptor {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    ensure_bundle_resource(&mut doc).map_err(|reason| PackageError::Descriptor {
        path: path.clone(),
        reason,
    })?;

    let mut out = serde_json::to_string_pretty(&doc).map_err(|e| PackageError::Descriptor {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    out.push('\n');
    fs::write(&path, out).at(&path)?;
    Ok(path)
}

fn ensure_bundle_resource(doc: &mut Value) -> std::result::Result<(), String> {
    let root = doc
        .as_object_mut()
        .ok_or_else(|| "top-level value is not an object".to_string())?;
    let build = root
        .entry("build")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| "\"build\" is not an object".to_string())?;
    let resources = build
        .entry("extraResources")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| "\"build.extraResources\" is not an array".to_string())?;

    let present = resources.iter().any(|entry| {
        entry.get("from").and_then(Value::as_str) == Some(BUNDLE_RESOURCE)
            || entry.get("to").and_then(Value::as_str) == Some(BUNDLE_RESOURCE)
    });
    if !present {
        resources.push(json!({
            "from": BUNDLE_RESOURCE,
            "to": BUNDLE_RESOURCE,
            "filter": ["**/*"],
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::error::PackageErrorKind;

    fn write(dir: &Path, content: &str) {
        fs::write(dir.join(DESCRIPTOR_FILE), content).unwrap();
    }

    fn read(dir: &Path) -> String {
        fs::read_to_string(dir.join(DESCRIPTOR_FILE)).unwrap()
    }

    #[test]
    fn test_adds_entry_and_preserves_key_order() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), r#"{"name":"app","version":"1.0.0","main":"main.js"}"#);

        update_app_descriptor(tmp.path()).unwrap();
        let out = read(tmp.path());
        assert!(out.ends_with("}\n"));
        assert!(out.contains("\n  \"name\": \"app\""));

        let name = out.find("\"name\"").unwrap();
        let version = out.find("\"version\"").unwrap();
        let main = out.find("\"main\"").unwrap();
        assert!(name < version && version < main);

        let doc: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(
            doc["build"]["extraResources"],
            json!([{ "from": "bundle", "to": "bundle", "filter": ["**/*"] }])
        );
    }

    #[test]
    fn test_existing_entry_is_not_duplicated() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            r#"{"build":{"appId":"x","extraResources":[{"from":"assets","to":"assets"},{"from":"other","to":"bundle"}]}}"#,
        );

        update_app_descriptor(tmp.path()).unwrap();
        update_app_descriptor(tmp.path()).unwrap();
        let doc: Value = serde_json::from_str(&read(tmp.path())).unwrap();
        assert_eq!(doc["build"]["extraResources"].as_array().unwrap().len(), 2);
        assert_eq!(doc["build"]["appId"], "x");
    }

    #[test]
    fn test_idempotent_after_first_update() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), r#"{"name":"app"}"#);

        update_app_descriptor(tmp.path()).unwrap();
        let first = read(tmp.path());
        update_app_descriptor(tmp.path()).unwrap();
        assert_eq!(first, read(tmp.path()));
    }

    #[test]
    fn test_missing_or_malformed_descriptor() {
        let tmp = tempfile::tempdir().unwrap();
        let err = update_app_descriptor(tmp.path()).unwrap_err();
        assert_eq!(err.kind(), PackageErrorKind::IoFailure);

        write(tmp.path(), r#"{"build":[]}"#);
        let err = update_app_descriptor(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("\"build\" is not an object"));

        write(tmp.path(), "not json");
        assert!(update_app_descriptor(tmp.path()).is_err());
    }
}

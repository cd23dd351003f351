//! The project manifest document (`pxt.json`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Program files that compete for the single program slot.
///
/// Only one of them may be declared at a time, otherwise the compiler sees
/// duplicate top-level declarations.
pub const PROGRAM_FILES: &[&str] = &["main.ts", "ai.generated.ts"];

const FILES: &str = "files";
const ENTRY_POINTS: &str = "testFiles";
const ADDITIONAL_FILES: &str = "additionalFiles";

/// A project manifest, edited in place.
///
/// The parsed object is kept as-is; edits replace the value of an existing
/// key where it stands, so every other key keeps its content and position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectManifest {
    doc: Map<String, Value>,
}

impl ProjectManifest {
    /// Any top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.doc.get(key)
    }

    fn list(&self, key: &str) -> Vec<&str> {
        match self.doc.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Edit the array under `key` where it stands. A missing key is
    /// appended; a value that is not an array is replaced.
    fn edit_list<R>(&mut self, key: &str, edit: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        let mut items = match self.doc.get_mut(key).map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let result = edit(&mut items);
        match self.doc.get_mut(key) {
            Some(slot) => *slot = Value::Array(items),
            None => {
                self.doc.insert(key.to_string(), Value::Array(items));
            }
        }
        result
    }

    /// Declared source files, in order
    pub fn files(&self) -> Vec<&str> {
        self.list(FILES)
    }

    /// Entry points; the compiler builds the program from these
    pub fn entry_points(&self) -> Vec<&str> {
        self.list(ENTRY_POINTS)
    }

    pub fn additional_files(&self) -> Vec<&str> {
        self.list(ADDITIONAL_FILES)
    }

    pub fn is_listed(&self, file: &str) -> bool {
        self.files().contains(&file)
    }

    /// Append `file` to the declared files if absent. Returns whether the
    /// manifest changed.
    pub fn ensure_listed(&mut self, file: &str) -> bool {
        if self.is_listed(file) {
            return false;
        }
        self.edit_list(FILES, |files| files.push(Value::from(file)));
        true
    }

    /// The current entry point, if exactly one is declared.
    pub fn entry_point(&self) -> Option<&str> {
        match self.entry_points().as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// Make `file` the only entry point. Returns whether the manifest changed.
    pub fn set_entry_point(&mut self, file: &str) -> bool {
        if self.entry_point() == Some(file) {
            return false;
        }
        self.edit_list(ENTRY_POINTS, |entries| *entries = vec![Value::from(file)]);
        true
    }

    /// Keep exactly one program file declared and point the entry at `entry`.
    ///
    /// Non-program files keep their order; `program` is appended after them.
    pub fn wire_program(&mut self, program: &str, entry: &str) -> bool {
        let before = self.clone();
        self.edit_list(FILES, |files| {
            files.retain(|f| {
                f.as_str()
                    .map_or(true, |name| !PROGRAM_FILES.contains(&name) && name != program)
            });
            files.push(Value::from(program));
        });
        self.set_entry_point(entry);
        *self != before
    }

    /// Editable program file: the generated file, then `main.ts`, then the
    /// first declared TypeScript file.
    pub fn editable_file(&self) -> Option<&str> {
        for preferred in ["ai.generated.ts", "main.ts"] {
            if self.is_listed(preferred) {
                return Some(preferred);
            }
        }
        self.files().into_iter().find(|f| is_typescript(f))
    }

    /// TypeScript sources across every file list, deduplicated, in order.
    /// Declaration files (`.d.ts`) are skipped.
    pub fn source_files(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for name in self
            .files()
            .into_iter()
            .chain(self.entry_points())
            .chain(self.additional_files())
        {
            if is_typescript(name) && !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }
}

fn is_typescript(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".ts") && !lower.ends_with(".d.ts")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> ProjectManifest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_extra_fields_survive_roundtrip() {
        let m = manifest(
            r#"{"name":"zoombit","version":"1.2.0","files":["README.md","main.ts"],"testFiles":["test.ts"],"dependencies":{"core":"*"}}"#,
        );
        assert_eq!(m.entry_points(), vec!["test.ts"]);

        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["name"], "zoombit");
        assert_eq!(value["dependencies"]["core"], "*");
        assert_eq!(value["testFiles"][0], "test.ts");
    }

    #[test]
    fn test_edits_keep_key_order() {
        let mut m = manifest(
            r#"{"name":"zoombit","description":"robot","dependencies":{"core":"*"},"files":["main.ts"],"testFiles":[],"public":true}"#,
        );
        assert!(m.wire_program("ai.generated.ts", "ai.generated.ts"));

        let written = serde_json::to_string(&m).unwrap();
        assert_eq!(
            written,
            r#"{"name":"zoombit","description":"robot","dependencies":{"core":"*"},"files":["ai.generated.ts"],"testFiles":["ai.generated.ts"],"public":true}"#
        );
    }

    #[test]
    fn test_missing_lists_are_appended() {
        let mut m = manifest(r#"{"name":"robot"}"#);
        assert!(m.ensure_listed("main.ts"));
        assert!(m.set_entry_point("main.ts"));
        assert_eq!(
            serde_json::to_string(&m).unwrap(),
            r#"{"name":"robot","files":["main.ts"],"testFiles":["main.ts"]}"#
        );
    }

    #[test]
    fn test_ensure_listed_is_idempotent() {
        let mut m = manifest(r#"{"files":["a.ts"]}"#);
        assert!(m.ensure_listed("b.ts"));
        assert!(!m.ensure_listed("b.ts"));
        assert_eq!(m.files(), vec!["a.ts", "b.ts"]);
    }

    #[test]
    fn test_set_entry_point_singleton() {
        let mut m = manifest(r#"{"testFiles":["test.ts","other.ts"]}"#);
        assert_eq!(m.entry_point(), None);
        assert!(m.set_entry_point("main.ts"));
        assert!(!m.set_entry_point("main.ts"));
        assert_eq!(m.entry_points(), vec!["main.ts"]);
    }

    #[test]
    fn test_wire_program_keeps_one_program_file() {
        let mut m = manifest(r#"{"files":["main.ts","README.md","ai.generated.ts","motors.ts"]}"#);
        assert!(m.wire_program("ai.generated.ts", "ai.generated.ts"));
        assert_eq!(m.files(), vec!["README.md", "motors.ts", "ai.generated.ts"]);
        assert_eq!(m.entry_point(), Some("ai.generated.ts"));
        assert!(!m.wire_program("ai.generated.ts", "ai.generated.ts"));
    }

    #[test]
    fn test_editable_file_order() {
        assert_eq!(
            manifest(r#"{"files":["main.ts","ai.generated.ts"]}"#).editable_file(),
            Some("ai.generated.ts")
        );
        assert_eq!(
            manifest(r#"{"files":["README.md","main.ts"]}"#).editable_file(),
            Some("main.ts")
        );
        assert_eq!(
            manifest(r#"{"files":["README.md","types.d.ts","robot.ts"]}"#).editable_file(),
            Some("robot.ts")
        );
        assert_eq!(manifest(r#"{"files":["README.md"]}"#).editable_file(), None);
    }

    #[test]
    fn test_source_files_dedup_and_skip_declarations() {
        let m = manifest(
            r#"{"files":["zoombit.ts","shims.d.ts","main.ts"],"testFiles":["main.ts"],"additionalFiles":["extra.TS"]}"#,
        );
        assert_eq!(m.source_files(), vec!["zoombit.ts", "main.ts", "extra.TS"]);
    }
}

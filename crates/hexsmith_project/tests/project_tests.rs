//! Integration tests for project layout and manifest handling.

use hexsmith_project::{ProjectLayout, SourceBundle};

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("pxt.json"),
        r#"{
  "name": "pxt-zoombit",
  "dependencies": { "core": "*" },
  "files": ["README.md", "zoombit.ts", "main.ts"],
  "testFiles": ["test.ts"]
}"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("zoombit.ts"), "namespace zoombit {}\n").unwrap();
    std::fs::write(dir.path().join("main.ts"), "basic.showIcon(IconNames.Heart)\n").unwrap();
    std::fs::write(dir.path().join("test.ts"), "zoombit.brake()\n").unwrap();
    dir
}

/// Overwriting the primary program keeps it as the only program file.
#[tokio::test]
async fn test_overwrite_main_flow() {
    let dir = project();
    let layout = ProjectLayout::discover(dir.path());
    let editor = layout.editor();

    layout.backup_main_once().await.unwrap().unwrap();
    layout
        .write_source("main.ts", "zoombit.move(MotorDirection.Forward, 120)\n")
        .await
        .unwrap();
    editor.wire_program("main.ts", "main.ts").await.unwrap();

    let manifest = editor.load().await.unwrap();
    assert_eq!(manifest.files(), vec!["README.md", "zoombit.ts", "main.ts"]);
    assert_eq!(manifest.entry_points(), vec!["main.ts"]);
    assert_eq!(manifest.get("name").unwrap(), "pxt-zoombit");

    let backups = layout.backups().await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(
        std::fs::read_to_string(&backups[0]).unwrap(),
        "basic.showIcon(IconNames.Heart)\n"
    );
}

/// Generating to a side file swaps it in for `main.ts`.
#[tokio::test]
async fn test_side_file_flow() {
    let dir = project();
    let layout = ProjectLayout::new(dir.path());
    let editor = layout.editor();

    layout
        .write_source("ai.generated.ts", "zoombit.brake()\n")
        .await
        .unwrap();
    editor
        .wire_program("ai.generated.ts", "ai.generated.ts")
        .await
        .unwrap();

    let manifest = editor.load().await.unwrap();
    assert_eq!(manifest.files(), vec!["README.md", "zoombit.ts", "ai.generated.ts"]);
    assert_eq!(manifest.entry_point(), Some("ai.generated.ts"));
    assert_eq!(
        editor.select_editable_file().await.unwrap().as_deref(),
        Some("ai.generated.ts")
    );

    let bundle = SourceBundle::read(&layout).await.unwrap().unwrap();
    let names: Vec<_> = bundle.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["zoombit.ts", "ai.generated.ts"]);
}

/// The manifest on disk stays parseable JSON after every edit.
#[tokio::test]
async fn test_manifest_is_pretty_json() {
    let dir = project();
    let editor = ProjectLayout::new(dir.path()).editor();
    editor.ensure_listed("extra.ts").await.unwrap();
    editor.set_entry_point("main.ts").await.unwrap();

    let raw = std::fs::read_to_string(dir.path().join("pxt.json")).unwrap();
    assert!(raw.contains("\n  \"files\""));
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["testFiles"], serde_json::json!(["main.ts"]));
    assert_eq!(value["dependencies"]["core"], "*");
}

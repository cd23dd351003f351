//! Integration tests for the build execution layer.
//!
//! These tests drive the executor and the artifact normalizer together
//! using the mock runner, so no real build tool is required.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use hexsmith_runner::{
    ArtifactConfig, ArtifactNormalizer, BuildConfig, BuildExecutor, MockResponse, MockRunner,
    RunnerError,
};

fn age(path: &Path, secs: u64) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(secs))
        .unwrap();
}

fn hex_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .to_lowercase()
                .ends_with(".hex")
        })
        .count()
}

/// A successful build through the fallback candidate ends with one canonical artifact.
#[tokio::test]
async fn test_build_then_normalize_leaves_single_artifact() {
    let project = tempfile::tempdir().unwrap();
    let built = project.path().join("built");
    fs::create_dir_all(&built).unwrap();
    fs::write(built.join("binary.hex"), b"stale build").unwrap();
    age(&built.join("binary.hex"), 600);

    let runner = MockRunner::new()
        .respond("pxt build", MockResponse::not_found("pxt build"))
        .respond(
            "npx -y pxt build",
            MockResponse::success("Compiled").writes("built/zoombit-project.hex", b":1000".to_vec()),
        );
    let executor = BuildExecutor::new(Arc::new(runner.clone()));

    let config = BuildConfig::new(project.path())
        .candidate("pxt build")
        .candidate("npx -y pxt build");
    let result = executor.run(&config).await.unwrap();
    assert_eq!(result.command, "npx -y pxt build");

    let normalizer = ArtifactNormalizer::new(ArtifactConfig::new(&built));
    let artifact = normalizer.normalize().await.unwrap().unwrap();

    assert_eq!(artifact.path, built.join("binary.hex"));
    assert_eq!(fs::read(built.join("binary.hex")).unwrap(), b":1000");
    assert_eq!(hex_count(&built), 1);
    assert_eq!(runner.call_count(), 2);
}

/// Every candidate runs in the project directory.
#[tokio::test]
async fn test_candidates_run_in_workdir() {
    let project = tempfile::tempdir().unwrap();
    let runner = MockRunner::new()
        .respond("a", MockResponse::not_found("a"))
        .respond("b", MockResponse::success(""));
    let executor = BuildExecutor::new(Arc::new(runner.clone()));

    let config = BuildConfig::new(project.path())
        .candidate("a")
        .candidate("b")
        .env("CI", "1");
    executor.run(&config).await.unwrap();

    for call in runner.get_calls() {
        assert_eq!(call.workdir, project.path());
        assert_eq!(call.env.get("CI").map(String::as_str), Some("1"));
    }
}

/// A compile error keeps the old artifact and reports the tool output.
#[tokio::test]
async fn test_failed_build_reports_diagnostics() {
    let project = tempfile::tempdir().unwrap();
    let runner = MockRunner::new().respond(
        "pxt build",
        MockResponse::failure(1, "main.ts(4,5): error TS2339: Property 'fly' does not exist"),
    );
    let executor = BuildExecutor::new(Arc::new(runner));

    let err = executor
        .run(&BuildConfig::new(project.path()).candidate("pxt build"))
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::BuildFailed { .. }));
    assert!(err.diagnostics().contains("TS2339"));
}

/// With nothing installed the error names every candidate tried.
#[tokio::test]
async fn test_tool_not_found_lists_candidates() {
    let runner = MockRunner::new().add_response(MockResponse::not_found("x"));
    let executor = BuildExecutor::new(Arc::new(runner));

    let err = executor.run(&BuildConfig::pxt("/tmp")).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("pxt build"));
    assert!(message.contains("npx -y pxt build"));
}

/// Normalizing many artifacts in a row keeps converging to one file.
#[tokio::test]
async fn test_repeated_normalization_converges() {
    let dir = tempfile::tempdir().unwrap();
    let normalizer = ArtifactNormalizer::new(ArtifactConfig::new(dir.path()));

    for round in 0..3u64 {
        for i in 0..4u64 {
            let path = dir.path().join(format!("round{}-{}.hex", round, i));
            fs::write(&path, format!("{}-{}", round, i)).unwrap();
            age(&path, 1000 - round * 100 - i * 10);
        }
        let artifact = normalizer.normalize().await.unwrap().unwrap();
        assert_eq!(hex_count(dir.path()), 1);
        assert_eq!(
            fs::read_to_string(&artifact.path).unwrap(),
            format!("{}-3", round)
        );
    }
}

//! Integration tests: full build, check and test plans over a scratch project.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use rebundle_core::{BuildConfig, BuildError, PatchError};
use rebundle_pipeline::{build_plan, check_plan, test_plan, BuildContext, StageState};
use serde_json::Value;

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(["-c", "user.email=ci@example.com", "-c", "user.name=ci"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git not available");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

const INDEX: &str = r#"<html>
<head>
<!--(if target dev)><script src="dev.js"></script><!--(endif)-->
<!--(if target dist)><link rel="stylesheet" href="styles/app.css"><!--(endif)-->
<!-- build:js vendor.js -->
<script src="thirdparty/a.js"></script>
<!-- endbuild -->
<!-- build:js main.js -->
<script src="main.js"></script>
<!-- endbuild -->
</head>
</html>
"#;

const UTIL: &str = concat!(
    "define(function () {\n",
    "    var DEBUG = true;\n",
    "    var VERSION = 1;\n",
    "    return { debug: DEBUG, version: VERSION };\n",
    "});\n"
);

/// Project layout: `app/` is the vendored git tree, `patches/` sits beside it.
/// Returns the pinned revision.
fn project(root: &Path) -> String {
    let app = root.join("app");
    fs::create_dir_all(&app).unwrap();
    git(&app, &["init", "-q"]);

    write(&app, "src/index.html", INDEX);
    write(&app, "src/config.json", r#"{"config": {"app_title": "Editor"}}"#);
    write(
        &app,
        "src/main.js",
        "define([\"util\", \"text!config.json\"], function (util) { return util; });\n",
    );
    write(&app, "src/util.js", UTIL);
    write(&app, "src/thirdparty/a.js", "var a = 1;");
    write(
        &app,
        "src/extensions/Good/main.js",
        "define([\"./helper\"], function (h) { return h; });\n",
    );
    write(&app, "src/extensions/Good/helper.js", "define(function () { return 42; });\n");
    write(&app, "src/extensions/Good/style.css", "body {}");
    write(&app, "src/extensions/Disabled/main.js", "define(function () {});\n");
    write(&app, "src/extensions/NoEntry/readme.txt", "nothing here");
    git(&app, &["add", "-A"]);
    git(&app, &["commit", "-q", "-m", "upstream"]);
    let revision = git(&app, &["rev-parse", "HEAD"]);

    fs::write(app.join("src/util.js"), UTIL.replace("VERSION = 1", "VERSION = 2")).unwrap();
    let diff = git(&app, &["diff"]);
    write(root, "patches/01-version.patch", &format!("{diff}\n"));
    git(&app, &["checkout", "--", "."]);

    revision
}

fn config_text(revision: &str, patch: &str) -> String {
    format!(
        r#"
clean = ["dist"]

[paths]
source = "app/src"
dist = "dist"

[[patch_sets]]
name = "app"
repository = "app"
revision = "{revision}"
patches = ["{patch}"]

[rewrites.util]
substitutions = [{{ find = "DEBUG = true", replace = "DEBUG = false" }}]

[bundle.root]
name = "main"
entry_module = "main"
base_url = "app/src"
output_file = "dist/main.js"

[[discovery]]
name = "extensions"
root = "app/src/extensions"
output = "extensions/{{name}}/main.js"
denylist = ["Disabled"]

[template]
source = "app/src/index.html"
output = "app/src/.index.html"
target = "dist"

[[placeholders]]
file = "app/src/.index.html"
find = "<!-- build:js main.js -->"
replace = " "

[[copy]]
source_root = "app/src"
destination_root = "dist"
globs = [".index.html", "extensions/**", "!extensions/**/*.js", "!**/*.txt"]
rename = {{ ".index.html" = "index.html" }}

[[compress]]
root = "dist"
globs = ["**/*.js"]

[metadata]
source = "app/src/config.json"
output = "dist/config.json"
repository = "app"

[lint]
ok = ["true"]

[test]
all = ["true"]
broken = ["false"]
"#
    )
}

fn load(root: &Path, text: &str) -> Arc<BuildConfig> {
    let path = root.join("rebundle.toml");
    fs::write(&path, text).unwrap();
    Arc::new(BuildConfig::load(&path).unwrap())
}

/// Test: the full build sequence produces the deployable tree
#[tokio::test]
async fn test_full_build() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let revision = project(root);
    let config = load(root, &config_text(&revision, "patches/01-version.patch"));

    let mut ctx = BuildContext::new(config);
    let result = build_plan().unwrap().run(&mut ctx).await;
    if let Some(failure) = &result.failure {
        panic!("stage {} failed: {}", failure.stage, failure.error);
    }
    assert!(result.success);
    assert_eq!(result.succeeded_count(), 13);

    // Patched and rewritten root bundle.
    let main = fs::read_to_string(root.join("dist/main.js")).unwrap();
    assert!(main.contains("VERSION = 2"));
    assert!(main.contains("DEBUG = false"));
    assert!(main.contains("define(\"util\""));
    assert!(main.find("define(\"util\"").unwrap() < main.find("define(\"main\"").unwrap());

    // Discovery: only the extension with an entry file and not denied.
    assert!(root.join("dist/extensions/Good/main.js").exists());
    assert!(!root.join("dist/extensions/Disabled").exists());
    assert!(!root.join("dist/extensions/NoEntry").exists());
    assert_eq!(ctx.bundles.len(), 2);

    // Copy manifest: assets copied, sources excluded.
    assert!(root.join("dist/extensions/Good/style.css").exists());
    assert!(!root.join("dist/extensions/Good/helper.js").exists());

    // Template, placeholder, concat and reference rewrite.
    let page = fs::read_to_string(root.join("dist/index.html")).unwrap();
    assert!(page.contains("styles/app.css"));
    assert!(!page.contains("dev.js"));
    assert!(page.contains("<script src=\"vendor.js\"></script>"));
    assert!(!page.contains("thirdparty/a.js"));
    assert_eq!(fs::read_to_string(root.join("dist/vendor.js")).unwrap(), "var a = 1;");

    // Compression.
    assert!(root.join("dist/main.js.gz").exists());
    assert!(root.join("dist/vendor.js.gz").exists());
    assert!(root.join("dist/extensions/Good/main.js.gz").exists());
    assert!(!root.join("dist/extensions/Good/style.css.gz").exists());

    // Metadata.
    let meta: Value =
        serde_json::from_str(&fs::read_to_string(root.join("dist/config.json")).unwrap()).unwrap();
    assert_eq!(meta["config"]["app_title"], "Editor");
    assert_eq!(meta["config"]["build_sha"], revision.as_str());
    assert_eq!(
        meta["config"]["build_id"],
        ctx.stamp.as_ref().unwrap().id.as_str()
    );
}

/// Test: two builds from the same state produce identical bundles
#[tokio::test]
async fn test_rebuild_is_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let revision = project(root);
    let config = load(root, &config_text(&revision, "patches/01-version.patch"));

    let first = build_plan()
        .unwrap()
        .run(&mut BuildContext::new(config.clone()))
        .await;
    assert!(first.success);
    let main_first = fs::read(root.join("dist/main.js")).unwrap();
    let util_first = fs::read(root.join("app/src/util.js")).unwrap();

    let second = build_plan()
        .unwrap()
        .run(&mut BuildContext::new(config))
        .await;
    assert!(second.success);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(fs::read(root.join("dist/main.js")).unwrap(), main_first);
    assert_eq!(fs::read(root.join("app/src/util.js")).unwrap(), util_first);
}

/// Test: a patch failure halts the pipeline before anything is built
#[tokio::test]
async fn test_patch_failure_halts_build() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let revision = project(root);
    let config = load(root, &config_text(&revision, "patches/missing.patch"));

    let mut ctx = BuildContext::new(config);
    let result = build_plan().unwrap().run(&mut ctx).await;
    assert!(!result.success);
    assert_eq!(result.stages[0].state, StageState::Succeeded);
    assert_eq!(result.stages[1].state, StageState::Failed);
    assert!(result.stages[2..]
        .iter()
        .all(|s| s.state == StageState::Pending));

    let failure = result.into_result().unwrap_err();
    assert_eq!(failure.stage, "patch");
    assert!(matches!(
        failure.error,
        BuildError::Patch(PatchError::MissingPatch { index: 0, .. })
    ));
    assert!(!root.join("dist").exists());
}

/// Test: check and test entry points run their command stages
#[tokio::test]
async fn test_check_and_test_plans() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let revision = project(root);
    let config = load(root, &config_text(&revision, "patches/01-version.patch"));

    let check = check_plan(&config)
        .unwrap()
        .run(&mut BuildContext::new(config.clone()))
        .await;
    assert!(check.success);
    assert_eq!(check.stages[0].name, "ok");

    let all = test_plan(&config, None)
        .unwrap()
        .run(&mut BuildContext::new(config.clone()))
        .await;
    assert!(all.success);

    let broken = test_plan(&config, Some("broken"))
        .unwrap()
        .run(&mut BuildContext::new(config.clone()))
        .await;
    let failure = broken.into_result().unwrap_err();
    assert_eq!(failure.stage, "test:broken");
    assert!(matches!(failure.error, BuildError::Tool(_)));

    assert!(test_plan(&config, Some("e2e")).is_err());
}

//! Build metadata stamping.
//!
//! The source `config.json` is copied into the dist tree with a `config`
//! object carrying `build_timestamp`, `build_branch`, `build_sha` and
//! `build_id`. The write goes through a temp file in the target directory
//! and is renamed into place.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::MetadataError;
use crate::git;

/// Where to read and write the metadata file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataSpec {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Work tree used for branch and revision; unset means not recorded.
    #[serde(default)]
    pub repository: Option<PathBuf>,
}

/// Provenance stamped into the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStamp {
    pub timestamp: String,
    pub branch: Option<String>,
    pub sha: Option<String>,
    pub id: String,
}

impl BuildStamp {
    /// Stamp for `now`, reading branch and sha from `repository` if it is a git work tree.
    pub fn capture(now: DateTime<Local>, repository: Option<&Path>) -> Self {
        let (branch, sha) = match repository {
            Some(repo) if git::is_git_repo(repo) => {
                let branch = git::current_branch(repo)
                    .map_err(|e| warn!(error = %e, "cannot read build branch"))
                    .ok();
                let sha = git::capture_head_sha(repo)
                    .map_err(|e| warn!(error = %e, "cannot read build sha"))
                    .ok();
                (branch, sha)
            }
            _ => (None, None),
        };
        Self {
            timestamp: now.format("%a %b %d %Y %H:%M:%S GMT%z").to_string(),
            branch,
            sha,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// [`BuildStamp::capture`] at the current local time.
    pub fn now(repository: Option<&Path>) -> Self {
        Self::capture(Local::now(), repository)
    }

    fn apply(&self, config: &mut Map<String, Value>) {
        config.insert("build_timestamp".into(), Value::String(self.timestamp.clone()));
        let opt = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        config.insert("build_branch".into(), opt(&self.branch));
        config.insert("build_sha".into(), opt(&self.sha));
        config.insert("build_id".into(), Value::String(self.id.clone()));
    }
}

/// Read `spec.source`, stamp it and write `spec.output`.
pub fn stamp(spec: &MetadataSpec, stamp: &BuildStamp) -> Result<Value, MetadataError> {
    let text = std::fs::read_to_string(&spec.source).map_err(|source| MetadataError::Read {
        path: spec.source.clone(),
        source,
    })?;
    let mut doc: Value = serde_json::from_str(&text).map_err(|source| MetadataError::Parse {
        path: spec.source.clone(),
        source,
    })?;

    let root = doc.as_object_mut().ok_or_else(|| MetadataError::NotAnObject {
        path: spec.source.clone(),
    })?;
    let config = root
        .entry("config")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(config) = config.as_object_mut() else {
        return Err(MetadataError::NotAnObject {
            path: spec.source.clone(),
        });
    };
    stamp.apply(config);

    write_json(&spec.output, &doc)?;
    info!(output = %spec.output.display(), build_id = %stamp.id, "build metadata written");
    Ok(doc)
}

fn write_json(path: &Path, doc: &Value) -> Result<(), MetadataError> {
    let write_err = |source| MetadataError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut body = serde_json::to_vec_pretty(doc).map_err(|e| write_err(e.into()))?;
    body.push(b'\n');

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&body).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

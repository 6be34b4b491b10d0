//! File helpers: atomic writes and glob expansion relative to a root.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use globset::{GlobBuilder, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::core::batch::RunBatch;
use crate::core::invocation::InvocationDescriptor;

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Express `path` relative to `root`, or fail if it lies outside.
pub fn relative_to_root(root: &Path, path: &Path) -> Result<PathBuf> {
    let relative = if path.is_absolute() {
        path.strip_prefix(root)
            .with_context(|| format!("{} is outside {}", path.display(), root.display()))?
            .to_path_buf()
    } else {
        path.components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    };
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(anyhow!("{} escapes {}", path.display(), root.display()));
    }
    Ok(relative)
}

/// Expand file patterns into existing files, relative to `root`.
///
/// `*` stays inside one path component and `**` crosses them. A pattern
/// without glob characters names one file and matches nothing if that file
/// does not exist. Results are sorted and deduplicated.
pub fn expand_patterns<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Result<Vec<PathBuf>> {
    let mut found = BTreeSet::new();
    let mut globs = GlobSetBuilder::new();
    let mut glob_count = 0usize;

    for pattern in patterns {
        let pattern = pattern.as_ref();
        if is_glob(pattern) {
            let relative = relative_to_root(root, Path::new(pattern))?;
            let glob = GlobBuilder::new(&relative.to_string_lossy())
                .literal_separator(true)
                .build()
                .with_context(|| format!("parse pattern {pattern}"))?;
            globs.add(glob);
            glob_count += 1;
        } else {
            let relative = relative_to_root(root, Path::new(pattern))?;
            if root.join(&relative).is_file() {
                found.insert(relative);
            } else {
                debug!(pattern, "literal pattern matched no file");
            }
        }
    }

    if glob_count > 0 {
        let set = globs.build().context("build pattern set")?;
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.with_context(|| format!("walk {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .with_context(|| format!("strip {}", root.display()))?;
            if set.is_match(relative) {
                found.insert(relative.to_path_buf());
            }
        }
    }

    Ok(found.into_iter().collect())
}

impl InvocationDescriptor {
    /// Files this invocation reads: its library plus extra input patterns.
    pub fn compute_input_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        expand_patterns(root, &self.input_patterns())
    }

    /// Files this invocation leaves behind that the caller wants back.
    pub fn compute_output_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        expand_patterns(root, self.extra_output_files())
    }
}

impl RunBatch {
    /// Union of every invocation's input files.
    pub fn compute_input_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = BTreeSet::new();
        for invocation in self.invocations() {
            files.extend(invocation.compute_input_files(root)?);
        }
        Ok(files.into_iter().collect())
    }

    /// Union of every invocation's output files.
    pub fn compute_output_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = BTreeSet::new();
        for invocation in self.invocations() {
            files.extend(invocation.compute_output_files(root)?);
        }
        Ok(files.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, relative).expect("write");
    }

    #[test]
    fn star_stays_within_a_component() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "data/a.in");
        touch(temp.path(), "data/b.in");
        touch(temp.path(), "data/nested/c.in");
        touch(temp.path(), "data/skip.txt");

        let files = expand_patterns(temp.path(), &["data/*.in"]).expect("expand");
        assert_eq!(
            files,
            vec![PathBuf::from("data/a.in"), PathBuf::from("data/b.in")]
        );

        let files = expand_patterns(temp.path(), &["data/**/*.in"]).expect("expand");
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn literals_dedupe_and_skip_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "lib/libx.so");
        let absolute = temp.path().join("lib/libx.so");
        let files = expand_patterns(
            temp.path(),
            &[
                "lib/libx.so",
                "./lib/libx.so",
                absolute.to_str().expect("utf8"),
                "missing.txt",
            ],
        )
        .expect("expand");
        assert_eq!(files, vec![PathBuf::from("lib/libx.so")]);
    }

    #[test]
    fn patterns_outside_root_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(expand_patterns(temp.path(), &["../x/*.in"]).is_err());
        assert!(expand_patterns(temp.path(), &["/definitely/elsewhere.so"]).is_err());
    }

    #[test]
    fn batch_files_union_libraries_and_patterns() {
        use std::sync::Arc;

        use crate::core::signature::{Executable, FunctionSignature};

        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "build/libx.so");
        touch(temp.path(), "inputs/a.dat");
        touch(temp.path(), "out/result.txt");
        let exe = Arc::new(
            Executable::new("build/libx.so", "build")
                .with_function(FunctionSignature::new("f", None, Vec::new())),
        );
        let descriptor = |inputs: &[&str]| {
            InvocationDescriptor::builder(Arc::clone(&exe), "f")
                .extra_input_files(inputs.iter().copied())
                .extra_output_files(["out/*.txt"])
                .build()
                .expect("valid")
        };
        let batch = RunBatch::new(vec![descriptor(&["inputs/*.dat"]), descriptor(&[])]);

        assert_eq!(
            batch.compute_input_files(temp.path()).expect("inputs"),
            vec![PathBuf::from("build/libx.so"), PathBuf::from("inputs/a.dat")]
        );
        assert_eq!(
            batch.compute_output_files(temp.path()).expect("outputs"),
            vec![PathBuf::from("out/result.txt")]
        );
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/out.json");
        write_atomic(&path, b"one").expect("write");
        write_atomic(&path, b"two").expect("write");
        assert_eq!(fs::read(&path).expect("read"), b"two");
        assert!(!temp.path().join("nested/out.json.tmp").exists());
    }
}

use crate::exec::run_command;
use crate::util::path_to_str;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub fn write_staged_bytes(root: &Path, rel_path: &str, bytes: &[u8]) -> Result<PathBuf> {
    let path = root.join(rel_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

pub fn write_staged_json<T: serde::Serialize>(
    root: &Path,
    rel_path: &str,
    value: &T,
) -> Result<PathBuf> {
    let bytes = serde_json::to_vec_pretty(value).context("serialize staged JSON")?;
    write_staged_bytes(root, rel_path, &bytes)
}

pub fn collect_files_recursive(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            files.extend(collect_files_recursive(&path)?);
        } else if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Copy the tree at `source` to `dest`, creating `dest` and its parents.
pub fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    for entry in fs::read_dir(source).with_context(|| format!("read {}", source.display()))? {
        let entry = entry?;
        let path = entry.path();
        let target = dest.join(entry.file_name());
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", path.display()))?;
        if file_type.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            fs::copy(&path, &target)
                .with_context(|| format!("copy {} to {}", path.display(), target.display()))?;
        }
    }
    Ok(())
}

/// Make everything under `root` readable and writable by everyone.
#[cfg(unix)]
pub fn widen_permissions(root: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(root).with_context(|| format!("stat {}", root.display()))?;
    let mode = metadata.permissions().mode();
    let widened = if metadata.is_dir() {
        mode | 0o777
    } else {
        mode | 0o666
    };
    fs::set_permissions(root, fs::Permissions::from_mode(widened))
        .with_context(|| format!("chmod {}", root.display()))?;
    if metadata.is_dir() {
        for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
            widen_permissions(&entry?.path())?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn widen_permissions(_root: &Path) -> Result<()> {
    Ok(())
}

/// Extract `archive` into `dest` with the external `unzip` tool.
pub fn extract_zip(archive: &Path, dest: &Path, dry_run: bool) -> Result<()> {
    tracing::info!(archive = %archive.display(), "unzipping");
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    let argv = vec![
        "unzip".to_string(),
        "-o".to_string(),
        "-q".to_string(),
        path_to_str(archive)?.to_string(),
        "-d".to_string(),
        path_to_str(dest)?.to_string(),
    ];
    let run = run_command(&argv, None, dry_run)?;
    if !run.success() {
        return Err(anyhow!(
            "unzip {} failed with exit code {:?}",
            archive.display(),
            run.exit_code
        ));
    }
    Ok(())
}

/// Zip the directory `dir` into `archive`, storing paths relative to its parent.
pub fn create_zip(dir: &Path, archive: &Path, dry_run: bool) -> Result<()> {
    let parent = dir
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", dir.display()))?;
    let name = dir
        .file_name()
        .ok_or_else(|| anyhow!("{} has no directory name", dir.display()))?;
    let argv = vec![
        "zip".to_string(),
        "-r".to_string(),
        "-q".to_string(),
        path_to_str(archive)?.to_string(),
        name.to_string_lossy().to_string(),
    ];
    let run = run_command(&argv, Some(parent), dry_run)?;
    if !run.success() {
        return Err(anyhow!(
            "zip {} failed with exit code {:?}",
            dir.display(),
            run.exit_code
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_dir_recursive_mirrors_tree() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let source = temp.path().join("run.feat");
        write_staged_bytes(&source, "stats/zstat1.nii.gz", b"z").expect("write zstat");
        write_staged_bytes(&source, "report.html", b"<html></html>").expect("write report");
        let dest = temp.path().join("out/sub-01/ses-01/run.feat");

        copy_dir_recursive(&source, &dest).expect("copy");

        let copied: Vec<String> = collect_files_recursive(&dest)
            .expect("collect")
            .iter()
            .map(|path| crate::util::display_path(path, Some(&dest)))
            .collect();
        assert_eq!(copied, vec!["report.html", "stats/zstat1.nii.gz"]);
    }

    #[test]
    fn staged_json_creates_parents() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = write_staged_json(temp.path(), "nested/summary.json", &vec![1, 2])
            .expect("write json");
        let value: Vec<u32> =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("parse");
        assert_eq!(value, vec![1, 2]);
    }

    #[cfg(unix)]
    #[test]
    fn widen_permissions_reaches_nested_files() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("create temp dir");
        let file = write_staged_bytes(temp.path(), "a/b/c.txt", b"x").expect("write");
        fs::set_permissions(&file, fs::Permissions::from_mode(0o600)).expect("chmod");

        widen_permissions(temp.path()).expect("widen");

        let mode = fs::metadata(&file).expect("stat").permissions().mode();
        assert_eq!(mode & 0o666, 0o666);
        let dir_mode = fs::metadata(temp.path().join("a/b")).expect("stat").permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o777);
    }

    #[test]
    fn dry_run_archives_do_nothing() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let dir = temp.path().join("run.feat");
        fs::create_dir_all(&dir).expect("create dir");
        create_zip(&dir, &temp.path().join("run.feat.zip"), true).expect("dry run zip");
        assert!(!temp.path().join("run.feat.zip").exists());
    }
}

use anyhow::{anyhow, Result};
use std::path::{Component, Path, PathBuf};

pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    if let Some(base) = base {
        if let Ok(relative) = path.strip_prefix(base) {
            return relative.display().to_string();
        }
    }
    path.display().to_string()
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

/// Lexically normalize `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

pub fn path_to_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("path is not valid UTF-8: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_path_strips_base_prefix() {
        let base = Path::new("/work");
        assert_eq!(display_path(Path::new("/work/a/b.txt"), Some(base)), "a/b.txt");
        assert_eq!(display_path(Path::new("/other/b.txt"), Some(base)), "/other/b.txt");
    }

    #[test]
    fn truncate_string_respects_char_boundaries() {
        assert_eq!(truncate_string("héllo", 2), "h");
        assert_eq!(truncate_string("short", 64), "short");
    }

    #[test]
    fn normalize_path_folds_parent_components() {
        assert_eq!(
            normalize_path(Path::new("/feat/reg/../stats/./zstat1.png")),
            PathBuf::from("/feat/stats/zstat1.png")
        );
        assert_eq!(normalize_path(Path::new("../a")), PathBuf::from("../a"));
    }
}

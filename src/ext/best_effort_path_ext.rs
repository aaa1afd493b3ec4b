use std::path::{Component, Path, PathBuf};

/// Absolute form of `path` without requiring it to exist.
///
/// Canonicalizes when possible; otherwise joins onto the current directory
/// and folds `.`/`..` lexically.
pub fn best_effort_absolute(path: &Path) -> PathBuf {
    if let Ok(canonical_path) = path.canonicalize() {
        return canonical_path;
    }

    let absolute_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(current_dir) => current_dir.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    normalize_path(&absolute_path)
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            _ => components.push(component),
        }
    }

    components.iter().collect()
}

pub trait BestEffortPathExt {
    fn best_effort_absolute(&self) -> PathBuf;

    fn best_effort_path_display(&self) -> String {
        self.best_effort_absolute().display().to_string()
    }
}

impl BestEffortPathExt for Path {
    fn best_effort_absolute(&self) -> PathBuf {
        best_effort_absolute(self)
    }
}

impl BestEffortPathExt for PathBuf {
    fn best_effort_absolute(&self) -> PathBuf {
        best_effort_absolute(self)
    }
}

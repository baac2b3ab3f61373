//! Best-effort recursive removal

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Remove `path` recursively, never failing.
///
/// Tries `remove_dir_all` first. If that fails, walks the tree bottom-up,
/// loosening permissions and removing each entry individually. Returns
/// `true` when the directory no longer exists.
pub fn remove_dir_all_safe(path: &Path) -> bool {
    match fs::remove_dir_all(path) {
        Ok(()) => return true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Recursive removal failed, removing entries individually: {}", e);
        }
    }

    let mut entries = Vec::new();
    collect_bottom_up(path, &mut entries);

    let mut failures = 0usize;
    for (entry, is_dir) in entries {
        make_writable(&entry);
        let result = if is_dir {
            fs::remove_dir(&entry)
        } else {
            fs::remove_file(&entry)
        };
        if let Err(e) = result {
            if e.kind() != io::ErrorKind::NotFound {
                failures += 1;
                tracing::warn!(path = %entry.display(), "Failed to remove: {}", e);
            }
        }
    }

    make_writable(path);
    match fs::remove_dir(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                failures,
                "Scratch directory left behind: {}",
                e
            );
            false
        }
    }
}

/// Children before parents, excluding `root` itself. Directories are made
/// writable as they are visited so their entries can be unlinked.
fn collect_bottom_up(root: &Path, out: &mut Vec<(PathBuf, bool)>) {
    make_writable(root);
    let Ok(read_dir) = fs::read_dir(root) else {
        return;
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .map(|t| t.is_dir() && !t.is_symlink())
            .unwrap_or(false);
        if is_dir {
            collect_bottom_up(&path, out);
        }
        out.push((path, is_dir));
    }
}

#[cfg(unix)]
fn make_writable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::symlink_metadata(path) {
        if !meta.file_type().is_symlink() {
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o777));
        }
    }
}

#[cfg(not(unix))]
fn make_writable(path: &Path) {
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        let _ = fs::set_permissions(path, perms);
    }
}

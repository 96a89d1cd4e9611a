use crate::Kind;
use log::debug;
use std::fs::Permissions;
use std::io::Result;
use std::path::Path;

/// Determine the kind of a filesystem entry without following symlinks.
pub fn file_kind<P: AsRef<Path>>(path: P) -> Result<Kind> {
    let md = std::fs::symlink_metadata(path.as_ref())?;
    let ft = md.file_type();
    if ft.is_symlink() {
        Ok(Kind::Symlink)
    } else if ft.is_dir() {
        Ok(Kind::Directory)
    } else {
        Ok(Kind::File)
    }
}

/// Whether the path exists, counting dangling symlinks as existing.
pub fn lexists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

pub fn make_writable<P: AsRef<Path>>(path: P) -> Result<()> {
    let md = std::fs::symlink_metadata(path.as_ref())?;
    if md.file_type().is_symlink() {
        return Ok(());
    }
    let mut perms = md.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(perms.mode() | 0o200);
    }
    #[cfg(not(unix))]
    perms.set_readonly(false);
    chmod_if_possible(path, perms)
}

pub fn chmod_if_possible<P: AsRef<Path>>(path: P, permissions: Permissions) -> Result<()> {
    // Permission errors are ignored; some filesystems (vfat, samba) refuse
    // chmod entirely and the caller cannot do anything useful about it.
    match std::fs::set_permissions(path.as_ref(), permissions) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            debug!("ignore error on chmod of {:?}: {}", path.as_ref(), e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Delete a file or an empty directory.
pub fn delete_any<P: AsRef<Path>>(path: P) -> Result<()> {
    fn delete_file_or_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        // unlink on a directory raises different errors per OS, so decide
        // upfront which removal call to issue.
        if path.is_dir() && !std::fs::symlink_metadata(path)?.file_type().is_symlink() {
            std::fs::remove_dir(path)
        } else {
            std::fs::remove_file(path)
        }
    }

    match delete_file_or_dir(path.as_ref()) {
        Ok(()) => Ok(()),
        Err(ref e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            if let Err(e) = make_writable(path.as_ref()) {
                debug!("unable to make {:?} writable: {}", path.as_ref(), e);
            }
            delete_file_or_dir(path.as_ref())
        }
        Err(e) => Err(e),
    }
}

pub fn supports_symlinks() -> bool {
    cfg!(unix)
}

pub fn supports_executable() -> bool {
    cfg!(unix)
}

/// Read the executable bit of a file.
pub fn is_executable<P: AsRef<Path>>(path: P) -> Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let md = std::fs::metadata(path.as_ref())?;
        Ok(md.permissions().mode() & 0o100 != 0)
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(false)
    }
}

/// Flip the executable bits of a file, honouring the umask for group/other.
pub fn set_executability<P: AsRef<Path>>(path: P, executable: bool) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let md = std::fs::metadata(path.as_ref())?;
        let current = md.permissions().mode();
        let to_mode = if executable {
            let mut mode = current | 0o100;
            if current & 0o004 != 0 {
                mode |= 0o001;
            }
            if current & 0o040 != 0 {
                mode |= 0o010;
            }
            mode
        } else {
            current & !0o111
        };
        std::fs::set_permissions(path.as_ref(), Permissions::from_mode(to_mode))
    }
    #[cfg(not(unix))]
    {
        let _ = (path, executable);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind() {
        let dir = tempdir();
        std::fs::write(dir.join("f"), b"x").unwrap();
        std::fs::create_dir(dir.join("d")).unwrap();
        assert_eq!(file_kind(dir.join("f")).unwrap(), Kind::File);
        assert_eq!(file_kind(dir.join("d")).unwrap(), Kind::Directory);
        assert!(file_kind(dir.join("missing")).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_delete_any() {
        let dir = tempdir();
        std::fs::write(dir.join("f"), b"x").unwrap();
        std::fs::create_dir(dir.join("d")).unwrap();
        delete_any(dir.join("f")).unwrap();
        delete_any(dir.join("d")).unwrap();
        assert!(!lexists(&dir.join("f")));
        assert!(!lexists(&dir.join("d")));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "heddle-osutils-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{Storage, key_segments};
use crate::error::StorageError;

/// One file per storage key below a private home directory.
///
/// `key/signing` lives at `<home>/key/signing`. Directories are created with
/// mode 0700 and values are written atomically with mode 0600.
#[derive(Debug, Clone)]
pub struct FileStorage {
    home: PathBuf,
    allow_insecure_home: bool,
}

impl FileStorage {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            allow_insecure_home: false,
        }
    }

    /// Permits a relative home path. Intended for tests and throwaway setups.
    pub fn allow_insecure_home(mut self, allow: bool) -> Self {
        self.allow_insecure_home = allow;
        self
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.home.clone();
        for segment in key_segments(key)? {
            path.push(segment);
        }
        Ok(path)
    }

    fn ensure_absolute_home(&self) -> Result<(), StorageError> {
        if self.home.is_absolute() || self.allow_insecure_home {
            return Ok(());
        }
        Err(StorageError::InvalidHome(format!(
            "storage home must be an absolute path: {}",
            self.home.display()
        )))
    }

    #[cfg(unix)]
    fn ensure_secure_dir(&self, path: &Path) -> Result<(), StorageError> {
        use std::os::unix::fs::MetadataExt;

        let meta = fs::symlink_metadata(path)
            .map_err(|err| StorageError::Io(format!("stat failed: {err}")))?;
        if meta.file_type().is_symlink() {
            return Err(StorageError::InvalidHome(format!(
                "must not be a symlink: {}",
                path.display()
            )));
        }
        if !meta.is_dir() {
            return Err(StorageError::InvalidHome(format!(
                "not a directory: {}",
                path.display()
            )));
        }
        let euid = unsafe { libc::geteuid() };
        if meta.uid() != euid {
            return Err(StorageError::InvalidHome(format!(
                "must be owned by the current user (uid {euid}): {}",
                path.display()
            )));
        }
        let mode = meta.mode() & 0o777;
        if (mode & 0o022) != 0 {
            return Err(StorageError::InvalidHome(format!(
                "must not be group/world-writable (mode {:o}): {}",
                mode,
                path.display()
            )));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn ensure_secure_dir(&self, path: &Path) -> Result<(), StorageError> {
        let meta = fs::symlink_metadata(path)
            .map_err(|err| StorageError::Io(format!("stat failed: {err}")))?;
        if meta.file_type().is_symlink() || !meta.is_dir() {
            return Err(StorageError::InvalidHome(format!(
                "not a plain directory: {}",
                path.display()
            )));
        }
        Ok(())
    }

    fn create_private_dir(&self, path: &Path) -> Result<(), StorageError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;

            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700);
            match builder.create(path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(err) => return Err(StorageError::Io(format!("create dir failed: {err}"))),
            }
        }
        #[cfg(not(unix))]
        match fs::create_dir(path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(StorageError::Io(format!("create dir failed: {err}"))),
        }
        self.ensure_secure_dir(path)
    }

    /// Creates every directory between the home and `path`'s parent.
    fn ensure_parent_dirs(&self, path: &Path) -> Result<PathBuf, StorageError> {
        self.ensure_absolute_home()?;
        if !self.home.exists() {
            fs::create_dir_all(&self.home)
                .map_err(|err| StorageError::Io(format!("create home failed: {err}")))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&self.home, fs::Permissions::from_mode(0o700))
                    .map_err(|err| StorageError::Io(format!("chmod home failed: {err}")))?;
            }
        }
        self.ensure_secure_dir(&self.home)?;

        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
        let relative = parent
            .strip_prefix(&self.home)
            .map_err(|_| StorageError::InvalidKey(path.display().to_string()))?;
        let mut current = self.home.clone();
        for component in relative.components() {
            current.push(component);
            self.create_private_dir(&current)?;
        }
        Ok(parent.to_path_buf())
    }

    fn existing_dir(&self, dir: &Path) -> Result<bool, StorageError> {
        match fs::symlink_metadata(dir) {
            Ok(_) => {
                self.ensure_secure_dir(dir)?;
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(format!("stat failed: {err}"))),
        }
    }

    /// Checks every directory from the home down to `dir` inclusive.
    /// Returns false when one of them does not exist yet.
    fn existing_dir_chain(&self, dir: &Path) -> Result<bool, StorageError> {
        if !self.existing_dir(&self.home)? {
            return Ok(false);
        }
        let relative = dir
            .strip_prefix(&self.home)
            .map_err(|_| StorageError::InvalidKey(dir.display().to_string()))?;
        let mut current = self.home.clone();
        for component in relative.components() {
            current.push(component);
            if !self.existing_dir(&current)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn existing_parent(&self, path: &Path) -> Result<bool, StorageError> {
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
        self.existing_dir_chain(parent)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.ensure_absolute_home()?;
        let path = self.path_for(key)?;
        if !self.existing_parent(&path)? {
            return Ok(None);
        }
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::Io(format!("stat failed: {err}"))),
        };
        if !meta.is_file() {
            return Err(StorageError::InvalidKey(format!(
                "{key} is not a regular file"
            )));
        }
        let bytes = fs::read(&path).map_err(|err| StorageError::Io(format!("read failed: {err}")))?;
        tracing::debug!(key, bytes = bytes.len(), "storage read");
        Ok(Some(bytes))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        self.ensure_parent_dirs(&path)?;
        write_atomic(&path, value, 0o600)?;
        tracing::debug!(key, bytes = value.len(), "storage write");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_absolute_home()?;
        let path = self.path_for(key)?;
        if !self.existing_parent(&path)? {
            return Ok(());
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(key, "storage delete");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(format!("remove failed: {err}"))),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.ensure_absolute_home()?;
        let (dir_part, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };
        let mut dir = self.home.clone();
        if !dir_part.is_empty() {
            for segment in key_segments(dir_part)? {
                dir.push(segment);
            }
        }
        if !self.existing_dir_chain(&dir)? {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in
            fs::read_dir(&dir).map_err(|err| StorageError::Io(format!("read dir failed: {err}")))?
        {
            let entry = entry.map_err(|err| StorageError::Io(format!("read dir failed: {err}")))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            // Skip leftovers from interrupted atomic writes and other dotfiles.
            if name.starts_with('.') {
                continue;
            }
            let Some(rest) = name.strip_prefix(name_prefix) else {
                continue;
            };
            let file_type = entry
                .file_type()
                .map_err(|err| StorageError::Io(format!("stat failed: {err}")))?;
            if file_type.is_dir() {
                out.push(format!("{rest}/"));
            } else if file_type.is_file() {
                out.push(rest.to_string());
            }
        }
        out.sort();
        Ok(out)
    }
}

fn write_atomic(path: &Path, bytes: &[u8], mode: u32) -> Result<(), StorageError> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::InvalidKey("invalid path for atomic write".to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".tmp")
        .tempfile_in(dir)
        .map_err(|err| StorageError::Io(format!("temp file error: {err}")))?;
    set_mode(&temp, mode)?;
    temp.write_all(bytes)
        .map_err(|err| StorageError::Io(format!("write failed: {err}")))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| StorageError::Io(format!("sync failed: {err}")))?;
    temp.persist(path)
        .map_err(|err| StorageError::Io(format!("persist failed: {err}")))?;
    #[cfg(unix)]
    {
        // The rename itself is only durable once the directory is synced.
        let dirfd =
            fs::File::open(dir).map_err(|err| StorageError::Io(format!("open dir failed: {err}")))?;
        dirfd
            .sync_all()
            .map_err(|err| StorageError::Io(format!("sync dir failed: {err}")))?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(temp: &NamedTempFile, mode: u32) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = temp
        .as_file()
        .metadata()
        .map_err(|err| StorageError::Io(format!("stat failed: {err}")))?
        .permissions();
    perms.set_mode(mode);
    temp.as_file()
        .set_permissions(perms)
        .map_err(|err| StorageError::Io(format!("chmod failed: {err}")))
}

#[cfg(not(unix))]
fn set_mode(_temp: &NamedTempFile, _mode: u32) -> Result<(), StorageError> {
    Ok(())
}

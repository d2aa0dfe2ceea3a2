//! Work-list assembly.
//!
//! User-supplied paths (and the lines of an optional path file) are resolved
//! to canonical paths and expanded up front into a flat list of
//! [`FileUnit`]s. Directories keep their internal layout in the logical
//! name; the remote name adds a random six-character hex prefix to the file
//! name so repeated deliveries never collide in the object store.

use crate::record::Manifest;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Work-list errors.
#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    /// The same file was selected twice
    #[error("duplicate path: {0}")]
    Duplicate(PathBuf),

    /// Filesystem error on a specific path
    #[error("{path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Directory traversal failed
    #[error("directory traversal failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// Random prefix generation failed
    #[error("random prefix generation failed: {0}")]
    Random(#[from] ferry_crypto::CryptoError),

    /// A manifest name would leave its root directory
    #[error("unsafe name in manifest: {0}")]
    UnsafeName(String),
}

/// One file selected for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUnit {
    local_path: PathBuf,
    logical_name: String,
    remote_name: String,
    size: u64,
    is_directory_member: bool,
}

impl FileUnit {
    /// Build a unit directly. `local_path` should already be canonical.
    #[must_use]
    pub fn new(
        local_path: PathBuf,
        logical_name: impl Into<String>,
        remote_name: impl Into<String>,
        size: u64,
        is_directory_member: bool,
    ) -> Self {
        Self {
            local_path,
            logical_name: logical_name.into(),
            remote_name: remote_name.into(),
            size,
            is_directory_member,
        }
    }

    /// Canonical source path; the unit's identity.
    #[must_use]
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Name within the delivery, e.g. `dir/sub/file.txt`.
    #[must_use]
    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    /// Object key, e.g. `dir/sub/a1b2c3_file.txt`.
    #[must_use]
    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    /// Size in bytes at enumeration time.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the unit came from expanding a directory.
    #[must_use]
    pub fn is_directory_member(&self) -> bool {
        self.is_directory_member
    }
}

/// Flat list of units plus the inputs that did not exist.
#[derive(Debug, Default)]
pub struct WorkList {
    /// Units in enumeration order
    pub units: Vec<FileUnit>,
    /// Inputs that could not be found
    pub missing: Vec<PathBuf>,
}

impl WorkList {
    /// Resolve `paths` and the lines of `path_file` into a work list.
    ///
    /// # Errors
    ///
    /// Returns `Duplicate` if a file (by canonical path, including files
    /// inside selected directories) or a logical name is selected twice, or
    /// a filesystem error other than not-found.
    pub fn assemble(paths: &[PathBuf], path_file: Option<&Path>) -> Result<Self, WalkError> {
        let mut inputs: Vec<PathBuf> = paths.to_vec();
        if let Some(path_file) = path_file {
            inputs.extend(read_path_file(path_file)?);
        }

        let mut list = WorkList::default();
        let mut seen = Seen::default();

        for input in inputs {
            let canonical = match fs::canonicalize(&input) {
                Ok(path) => path,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("Path not found: {}", input.display());
                    list.missing.push(input);
                    continue;
                }
                Err(source) => return Err(WalkError::Io { path: input, source }),
            };
            let metadata = fs::metadata(&canonical).map_err(|source| WalkError::Io {
                path: canonical.clone(),
                source,
            })?;

            if metadata.is_dir() {
                list.expand_directory(&canonical, &mut seen)?;
            } else {
                let file_name = file_name_of(&canonical);
                list.push(
                    FileUnit::new(
                        canonical.clone(),
                        file_name.clone(),
                        remote_name_for("", &file_name)?,
                        metadata.len(),
                        false,
                    ),
                    &mut seen,
                )?;
            }
        }

        debug!(
            "Assembled work list: {} files, {} missing",
            list.units.len(),
            list.missing.len()
        );
        Ok(list)
    }

    /// Expand `root` into its files, following symlinks.
    ///
    /// Every unit gets the canonical path of the file it reads, so a file
    /// reachable twice is caught as a duplicate. Dangling links are reported
    /// as missing.
    fn expand_directory(&mut self, root: &Path, seen: &mut Seen) -> Result<(), WalkError> {
        let dir_name = file_name_of(root);

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if is_dangling(&e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    warn!("Broken symlink: {}", path.display());
                    self.missing.push(path);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let folder = match relative.parent() {
                Some(parent) if parent.as_os_str().is_empty() => dir_name.clone(),
                Some(parent) => format!("{dir_name}/{}", slash_joined(parent)),
                None => dir_name.clone(),
            };
            let file_name = file_name_of(entry.path());
            let size = entry.metadata()?.len();
            let local_path = fs::canonicalize(entry.path()).map_err(|source| WalkError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;

            self.push(
                FileUnit::new(
                    local_path,
                    format!("{folder}/{file_name}"),
                    remote_name_for(&folder, &file_name)?,
                    size,
                    true,
                ),
                seen,
            )?;
        }
        Ok(())
    }

    fn push(&mut self, unit: FileUnit, seen: &mut Seen) -> Result<(), WalkError> {
        if !seen.paths.insert(unit.local_path.clone())
            || !seen.names.insert(unit.logical_name.clone())
        {
            return Err(WalkError::Duplicate(unit.local_path));
        }
        self.units.push(unit);
        Ok(())
    }

    /// Reuse the remote names of files already present in `manifest`.
    ///
    /// A re-delivered file then maps onto its existing object, so the
    /// overwrite policy applies to it.
    ///
    /// # Errors
    ///
    /// Returns `UnsafeName` if a recorded remote name is not a plain
    /// relative path. No unit is changed in that case.
    pub fn reuse_remote_names(&mut self, manifest: &Manifest) -> Result<(), WalkError> {
        let mut reused = Vec::new();
        for (index, unit) in self.units.iter().enumerate() {
            if let Some(record) = manifest.get(&unit.logical_name) {
                let remote = record.remote_name();
                if safe_relative(remote).is_none() {
                    return Err(WalkError::UnsafeName(remote.to_string()));
                }
                reused.push((index, remote.to_string()));
            }
        }
        for (index, remote) in reused {
            self.units[index].remote_name = remote;
        }
        Ok(())
    }

    /// Total bytes across all units.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.units.iter().map(FileUnit::size).sum()
    }

    /// Whether no units were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Canonical paths and logical names already in the list.
#[derive(Default)]
struct Seen {
    paths: HashSet<PathBuf>,
    names: HashSet<String>,
}

fn is_dangling(err: &walkdir::Error) -> bool {
    err.loop_ancestor().is_none()
        && err
            .io_error()
            .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}

/// Read one path per line, skipping blank lines and `#` comments.
///
/// # Errors
///
/// Returns `WalkError::Io` if the file cannot be read.
pub fn read_path_file(path: &Path) -> Result<Vec<PathBuf>, WalkError> {
    let contents = fs::read_to_string(path).map_err(|source| WalkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect())
}

/// Remote object key for `file_name` inside `folder`, with a random prefix.
///
/// # Errors
///
/// Returns `WalkError::Random` if the OS RNG fails.
pub fn remote_name_for(folder: &str, file_name: &str) -> Result<String, WalkError> {
    let mut prefix = [0u8; 3];
    ferry_crypto::random::fill_random(&mut prefix)?;
    let name = format!("{}_{file_name}", hex::encode(prefix));
    Ok(if folder.is_empty() {
        name
    } else {
        format!("{folder}/{name}")
    })
}

/// `name` as a relative path, if every component is a plain name.
///
/// Names read back from a manifest pass through this before they are joined
/// onto a staging or destination directory.
#[must_use]
pub fn safe_relative(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    let plain = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    plain.then(|| path.to_path_buf())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn slash_joined(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

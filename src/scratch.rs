//! Scratch storage for intermediate ciphertext and plaintext
//!
//! Every handle handed out by [`ScratchSpace::acquire`] owns a uniquely named
//! file or directory. The location is deleted when the handle is released or
//! dropped, whichever comes first, so every exit path of a retrieval cleans up.

use std::path::{Path, PathBuf};

use tempfile::{TempDir, TempPath};
use tracing::{debug, warn};

use crate::config::ScratchConfig;
use crate::error::{Error, Result};

/// What kind of scratch location to allocate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScratchKind {
    /// An empty regular file
    File,
    /// An empty directory
    Directory,
}

/// Allocator for scratch locations under one root directory
#[derive(Clone, Debug)]
pub struct ScratchSpace {
    root: PathBuf,
    prefix: String,
}

impl ScratchSpace {
    /// Create an allocator from configuration (system temp dir when unset)
    pub fn new(config: &ScratchConfig) -> Self {
        Self {
            root: config.temp_dir.clone().unwrap_or_else(std::env::temp_dir),
            prefix: config.prefix.clone(),
        }
    }

    /// Root directory allocations are made in
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a uniquely named scratch location
    ///
    /// Names are random and created exclusively, so concurrent runs on the
    /// same host never collide.
    pub fn acquire(&self, kind: ScratchKind) -> Result<ScratchHandle> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.prefix);

        let allocation_error = |source| Error::Allocation {
            path: self.root.clone(),
            source,
        };

        let resource = match kind {
            ScratchKind::File => {
                let file = builder.tempfile_in(&self.root).map_err(allocation_error)?;
                Resource::File(file.into_temp_path())
            }
            ScratchKind::Directory => {
                Resource::Directory(builder.tempdir_in(&self.root).map_err(allocation_error)?)
            }
        };

        let path = match &resource {
            Resource::File(p) => p.to_path_buf(),
            Resource::Directory(d) => d.path().to_path_buf(),
        };
        debug!(?path, ?kind, "acquired scratch location");

        Ok(ScratchHandle {
            path,
            kind,
            resource: Some(resource),
        })
    }
}

enum Resource {
    File(TempPath),
    Directory(TempDir),
}

/// Exclusive ownership of one scratch file or directory
pub struct ScratchHandle {
    path: PathBuf,
    kind: ScratchKind,
    resource: Option<Resource>,
}

impl ScratchHandle {
    /// Location of the scratch resource
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File or directory
    pub fn kind(&self) -> ScratchKind {
        self.kind
    }

    /// Whether the resource has been released
    pub fn is_released(&self) -> bool {
        self.resource.is_none()
    }

    /// Delete the underlying file or directory
    ///
    /// A second call is a no-op. A resource that has already vanished from
    /// disk counts as released.
    pub fn release(&mut self) -> std::io::Result<()> {
        let result = match self.resource.take() {
            None => return Ok(()),
            Some(Resource::File(p)) => p.close(),
            Some(Resource::Directory(d)) => d.close(),
        };
        match result {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => {
                if other.is_ok() {
                    debug!(path = ?self.path, "released scratch location");
                }
                other
            }
        }
    }

    /// Release, logging instead of returning a failure
    pub fn release_logged(&mut self) {
        if let Err(e) = self.release() {
            warn!(path = ?self.path, error = %e, "failed to release scratch location");
        }
    }
}

impl std::fmt::Debug for ScratchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchHandle")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for ScratchHandle {
    fn drop(&mut self) {
        self.release_logged();
    }
}

//! Shared-library probing and all-or-nothing symbol binding.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gpusolver_compat::{CompatError, RawSymbol, SymbolTable};
use libloading::Library;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("disabled by configuration")]
    Disabled,

    #[error("no candidate library could be opened (tried {tried})")]
    NotFound { tried: String },

    #[error("{library}: missing symbol {symbol}")]
    MissingSymbol { library: String, symbol: String },

    #[error("invalid symbol table: {0}")]
    Table(#[from] CompatError),
}

/// An opened library that can be asked for symbol addresses.
pub trait LoadedLibrary: Send + Sync {
    fn path(&self) -> &Path;

    fn symbol(&self, name: &str) -> Option<RawSymbol>;
}

/// Opens libraries by path. Swappable so tests can serve fake backends.
pub trait LibraryLoader: Send + Sync {
    fn open(&self, path: &Path) -> Option<Arc<dyn LoadedLibrary>>;
}

/// Loader backed by the platform dynamic linker.
#[derive(Debug, Default, Clone, Copy)]
pub struct DlopenLoader;

struct DlopenLibrary {
    path: PathBuf,
    library: Library,
}

impl LoadedLibrary for DlopenLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn symbol(&self, name: &str) -> Option<RawSymbol> {
        // SAFETY: the address is only read here; callers cast it to the documented signature.
        let symbol = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) }.ok()?;
        RawSymbol::new(*symbol)
    }
}

impl LibraryLoader for DlopenLoader {
    fn open(&self, path: &Path) -> Option<Arc<dyn LoadedLibrary>> {
        // SAFETY: dynamic library probing only; backend initializers are trusted.
        match unsafe { Library::new(path) } {
            Ok(library) => Some(Arc::new(DlopenLibrary {
                path: path.to_path_buf(),
                library,
            })),
            Err(err) => {
                tracing::trace!(path = %path.display(), error = %err, "library probe failed");
                None
            }
        }
    }
}

/// Opens the first candidate that the loader accepts.
pub fn open_first(
    loader: &dyn LibraryLoader,
    candidates: &[PathBuf],
) -> Result<Arc<dyn LoadedLibrary>, LoadError> {
    for candidate in candidates {
        if let Some(library) = loader.open(candidate) {
            tracing::debug!(path = %candidate.display(), "opened backend library");
            return Ok(library);
        }
    }
    Err(LoadError::NotFound {
        tried: candidates
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Resolves every required symbol or none: the first missing name fails the bind.
pub fn bind_symbols(
    library: &dyn LoadedLibrary,
    table_name: &str,
    required: &[&str],
) -> Result<SymbolTable, LoadError> {
    let mut table = SymbolTable::with_slots(table_name, required)?;
    for name in required {
        let address = library
            .symbol(name)
            .ok_or_else(|| LoadError::MissingSymbol {
                library: library.path().display().to_string(),
                symbol: (*name).to_string(),
            })?;
        table.bind(name, address)?;
    }
    Ok(table)
}

//! Backend resolution.
//!
//! Each backend kind (dense, sparse) is resolved at most once per process, on
//! first use, and the outcome is kept for the lifetime of the registry:
//!
//! ```text
//! facade call ──► registry().dense()
//!                    │  OnceLock (first caller loads, the rest wait)
//!                    ▼
//!        disabled? ─► device library (all symbols or nothing) ─► host fallback
//!                    │
//!                    ▼
//!        Loaded(Arc<dyn DenseBackend>) | Failed(reason) ─► BackendNotAvailable
//! ```
//!
//! A failed backend never affects the other kind.

pub mod host;
pub mod loader;
mod rocsolver;
mod rocsparse;
pub mod traits;

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::config::LoaderConfig;
use crate::status::{Result, SolverError};
use crate::types::MemorySpace;

pub use host::{HostDenseBackend, HostSparseBackend};
pub use loader::{DlopenLoader, LibraryLoader, LoadError, LoadedLibrary};
pub use rocsolver::{DENSE_SYMBOLS, RocsolverBackend};
pub use rocsparse::{RocsparseBackend, SPARSE_SYMBOLS};
pub use traits::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Dense,
    Sparse,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Dense, BackendKind::Sparse];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Dense => "dense",
            BackendKind::Sparse => "sparse",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "dense" => Some(BackendKind::Dense),
            "sparse" => Some(BackendKind::Sparse),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadState {
    Unloaded,
    Failed { reason: String },
    Loaded,
}

/// Snapshot of one backend descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct BackendInfo {
    pub kind: BackendKind,
    #[serde(flatten)]
    pub state: LoadState,
    pub implementation: Option<String>,
    pub library: Option<PathBuf>,
    pub memory_space: Option<MemorySpace>,
    pub symbols: usize,
}

struct Binding<B: ?Sized> {
    backend: Arc<B>,
    implementation: String,
    library: Option<PathBuf>,
    memory_space: MemorySpace,
    symbols: usize,
}

type Outcome<B> = std::result::Result<Binding<B>, String>;

/// Process-wide backend descriptors and the loader used to fill them.
pub struct BackendRegistry {
    config: LoaderConfig,
    loader: Box<dyn LibraryLoader>,
    dense: OnceLock<Outcome<dyn DenseBackend>>,
    sparse: OnceLock<Outcome<dyn SparseBackend>>,
}

impl BackendRegistry {
    pub fn new(config: LoaderConfig, loader: Box<dyn LibraryLoader>) -> Self {
        Self {
            config,
            loader,
            dense: OnceLock::new(),
            sparse: OnceLock::new(),
        }
    }

    /// Registry that opens libraries with the platform dynamic linker.
    pub fn from_config(config: LoaderConfig) -> Self {
        Self::new(config, Box::new(DlopenLoader))
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Resolves the dense backend, loading it on first use.
    pub fn dense(&self) -> Result<Arc<dyn DenseBackend>> {
        match self.dense.get_or_init(|| self.load_dense()) {
            Ok(binding) => Ok(Arc::clone(&binding.backend)),
            Err(_) => Err(SolverError::BackendNotAvailable(BackendKind::Dense)),
        }
    }

    /// Resolves the sparse backend, loading it on first use.
    pub fn sparse(&self) -> Result<Arc<dyn SparseBackend>> {
        match self.sparse.get_or_init(|| self.load_sparse()) {
            Ok(binding) => Ok(Arc::clone(&binding.backend)),
            Err(_) => Err(SolverError::BackendNotAvailable(BackendKind::Sparse)),
        }
    }

    /// Current descriptor state without triggering a load.
    pub fn info(&self, kind: BackendKind) -> BackendInfo {
        match kind {
            BackendKind::Dense => describe(kind, self.dense.get()),
            BackendKind::Sparse => describe(kind, self.sparse.get()),
        }
    }

    /// Loads every backend that has not been attempted yet and reports them all.
    pub fn load_all(&self) -> Vec<BackendInfo> {
        // Availability is reported through `info`, so the outcome is not needed here.
        let _ = self.dense();
        let _ = self.sparse();
        BackendKind::ALL.iter().map(|kind| self.info(*kind)).collect()
    }

    fn load_dense(&self) -> Outcome<dyn DenseBackend> {
        let kind = BackendKind::Dense;
        if self.config.is_disabled(kind) {
            return Err(self.skip(kind));
        }
        let mut reasons = Vec::new();
        if self.config.device_libraries {
            match RocsolverBackend::load(self.loader.as_ref(), &self.config.candidate_paths(kind)) {
                Ok(backend) => {
                    return Ok(Binding {
                        implementation: backend.name().to_string(),
                        library: Some(backend.library_path()),
                        memory_space: backend.memory_space(),
                        symbols: backend.symbol_count(),
                        backend: Arc::new(backend),
                    });
                }
                Err(err) => reasons.push(self.record_failure(kind, err)),
            }
        }
        if self.config.host_fallback {
            let backend = HostDenseBackend::new();
            tracing::info!(backend = %kind, implementation = backend.name(), "using host fallback");
            return Ok(Binding {
                implementation: backend.name().to_string(),
                library: None,
                memory_space: backend.memory_space(),
                symbols: 0,
                backend: Arc::new(backend),
            });
        }
        Err(self.unavailable(kind, reasons))
    }

    fn load_sparse(&self) -> Outcome<dyn SparseBackend> {
        let kind = BackendKind::Sparse;
        if self.config.is_disabled(kind) {
            return Err(self.skip(kind));
        }
        let mut reasons = Vec::new();
        if self.config.device_libraries {
            match RocsparseBackend::load(self.loader.as_ref(), &self.config.candidate_paths(kind)) {
                Ok(backend) => {
                    return Ok(Binding {
                        implementation: backend.name().to_string(),
                        library: Some(backend.library_path()),
                        memory_space: backend.memory_space(),
                        symbols: backend.symbol_count(),
                        backend: Arc::new(backend),
                    });
                }
                Err(err) => reasons.push(self.record_failure(kind, err)),
            }
        }
        if self.config.host_fallback {
            let backend = HostSparseBackend::new();
            tracing::info!(backend = %kind, implementation = backend.name(), "using host fallback");
            return Ok(Binding {
                implementation: backend.name().to_string(),
                library: None,
                memory_space: backend.memory_space(),
                symbols: 0,
                backend: Arc::new(backend),
            });
        }
        Err(self.unavailable(kind, reasons))
    }

    fn skip(&self, kind: BackendKind) -> String {
        tracing::debug!(backend = %kind, "backend disabled by configuration");
        LoadError::Disabled.to_string()
    }

    fn record_failure(&self, kind: BackendKind, err: LoadError) -> String {
        match &err {
            LoadError::MissingSymbol { .. } | LoadError::Table(_) => {
                tracing::warn!(backend = %kind, error = %err, "backend library rejected");
            }
            _ => tracing::debug!(backend = %kind, error = %err, "backend library not found"),
        }
        err.to_string()
    }

    fn unavailable(&self, kind: BackendKind, reasons: Vec<String>) -> String {
        let reason = if reasons.is_empty() {
            "no backend source enabled".to_string()
        } else {
            reasons.join("; ")
        };
        tracing::debug!(backend = %kind, %reason, "backend unavailable");
        reason
    }
}

fn describe<B: ?Sized>(kind: BackendKind, outcome: Option<&Outcome<B>>) -> BackendInfo {
    match outcome {
        None => BackendInfo {
            kind,
            state: LoadState::Unloaded,
            implementation: None,
            library: None,
            memory_space: None,
            symbols: 0,
        },
        Some(Err(reason)) => BackendInfo {
            kind,
            state: LoadState::Failed {
                reason: reason.clone(),
            },
            implementation: None,
            library: None,
            memory_space: None,
            symbols: 0,
        },
        Some(Ok(binding)) => BackendInfo {
            kind,
            state: LoadState::Loaded,
            implementation: Some(binding.implementation.clone()),
            library: binding.library.clone(),
            memory_space: Some(binding.memory_space),
            symbols: binding.symbols,
        },
    }
}

static REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();

/// The process-wide registry; configured from the environment unless
/// [`install`] ran first.
pub fn registry() -> &'static BackendRegistry {
    REGISTRY.get_or_init(|| BackendRegistry::from_config(LoaderConfig::from_env()))
}

/// Installs a custom registry (fake loader, host-only configuration). Fails, handing
/// the registry back, once the global one exists.
pub fn install(registry: BackendRegistry) -> std::result::Result<(), BackendRegistry> {
    REGISTRY.set(registry)
}

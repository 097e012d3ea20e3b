//! LAPACK-style dense and sparse solver API over runtime-loaded GPU backends.
//!
//! Callers see one stable surface (the [`ffi`] C ABI, or the typed functions in
//! [`dense`] and [`sparse`]); the device libraries that do the work are located and
//! bound at run time by [`backend::registry`]. A missing library only disables the
//! operations that need it.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod dense;
pub mod ffi;
pub mod handle;
pub mod sparse;
pub mod status;
pub mod types;

pub use backend::{BackendInfo, BackendKind, BackendRegistry, LoadState, install, registry};
pub use catalog::{EntryPoint, entry_points};
pub use config::LoaderConfig;
pub use handle::{Handle, SpHandle};
pub use sparse::CsrSystem;
pub use status::{Result, SolverError, Status};
pub use types::{
    Fill, GpuComplex32, GpuComplex64, IndexBase, MatrixType, MemorySpace, Precision, RealScalar,
    Scalar, Stream,
};

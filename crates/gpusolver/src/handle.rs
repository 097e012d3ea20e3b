//! Solver handles.
//!
//! A handle is an opaque integer naming an entry in a process-wide arena. The entry
//! carries the bound stream, the backend sub-handles (created on first use) and a
//! scratch pool. Destroying the handle drops the entry, which releases the
//! sub-handles and the scratch memory with it.
//!
//! Handles are not meant to be shared between threads while a call is running; the
//! arena itself is locked so misuse cannot corrupt other handles.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::backend::{DenseBackend, RawContext, SparseBackend, registry};
use crate::status::{Result, SolverError};
use crate::types::Stream;

/// Dense solver handle. `0` is the null handle.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(pub u64);

/// Sparse solver handle. `0` is the null handle.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SpHandle(pub u64);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl SpHandle {
    pub const NULL: SpHandle = SpHandle(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleKind {
    Dense,
    Sparse,
}

/// Backend sub-handle owned by a solver handle; destroyed with it.
struct DenseContext {
    backend: Arc<dyn DenseBackend>,
    raw: RawContext,
}

impl Drop for DenseContext {
    fn drop(&mut self) {
        if let Err(err) = self.backend.destroy_context(self.raw) {
            tracing::warn!(error = %err, "failed to destroy dense sub-handle");
        }
    }
}

struct SparseContext {
    backend: Arc<dyn SparseBackend>,
    raw: RawContext,
}

impl Drop for SparseContext {
    fn drop(&mut self) {
        if let Err(err) = self.backend.destroy_context(self.raw) {
            tracing::warn!(error = %err, "failed to destroy sparse sub-handle");
        }
    }
}

/// Growable scratch buffer in the dense backend's memory space.
#[derive(Default)]
struct ScratchPool {
    buffer: Option<ScratchBuffer>,
}

struct ScratchBuffer {
    backend: Arc<dyn DenseBackend>,
    ptr: *mut c_void,
    bytes: usize,
}

// SAFETY: the buffer is only touched while the owning handle's lock is held.
unsafe impl Send for ScratchBuffer {}

impl ScratchPool {
    fn reserve(&mut self, backend: &Arc<dyn DenseBackend>, bytes: usize) -> Result<*mut c_void> {
        if let Some(buffer) = &self.buffer
            && buffer.bytes >= bytes
            && Arc::ptr_eq(&buffer.backend, backend)
        {
            return Ok(buffer.ptr);
        }
        self.buffer = None;
        let ptr = backend.alloc(bytes)?;
        tracing::trace!(bytes, "scratch pool grown");
        self.buffer = Some(ScratchBuffer {
            backend: Arc::clone(backend),
            ptr,
            bytes,
        });
        Ok(ptr)
    }
}

impl Drop for ScratchBuffer {
    fn drop(&mut self) {
        // SAFETY: the pointer came from `alloc` on the same backend.
        if let Err(err) = unsafe { self.backend.free(self.ptr) } {
            tracing::warn!(error = %err, bytes = self.bytes, "failed to release scratch");
        }
    }
}

pub(crate) struct HandleState {
    stream: Stream,
    scratch: ScratchPool,
    // Declared after `scratch` so buffers are freed before the sub-handles go.
    dense: Option<DenseContext>,
    sparse: Option<SparseContext>,
}

impl HandleState {
    fn new() -> Self {
        Self {
            stream: Stream::DEFAULT,
            scratch: ScratchPool::default(),
            dense: None,
            sparse: None,
        }
    }

    pub(crate) fn stream(&self) -> Stream {
        self.stream
    }

    /// Dense backend and this handle's sub-handle for it, created on first use.
    pub(crate) fn dense(&mut self) -> Result<(Arc<dyn DenseBackend>, RawContext)> {
        if let Some(ctx) = &self.dense {
            return Ok((Arc::clone(&ctx.backend), ctx.raw));
        }
        let backend = registry().dense()?;
        let raw = backend.create_context(self.stream)?;
        tracing::debug!(backend = backend.name(), "dense sub-handle created");
        self.dense = Some(DenseContext {
            backend: Arc::clone(&backend),
            raw,
        });
        Ok((backend, raw))
    }

    /// Sparse backend and this handle's sub-handle for it, created on first use.
    pub(crate) fn sparse(&mut self) -> Result<(Arc<dyn SparseBackend>, RawContext)> {
        if let Some(ctx) = &self.sparse {
            return Ok((Arc::clone(&ctx.backend), ctx.raw));
        }
        let backend = registry().sparse()?;
        let raw = backend.create_context(self.stream)?;
        tracing::debug!(backend = backend.name(), "sparse sub-handle created");
        self.sparse = Some(SparseContext {
            backend: Arc::clone(&backend),
            raw,
        });
        Ok((backend, raw))
    }

    /// Scratch of at least `bytes`, allocated through `backend`.
    pub(crate) fn scratch(
        &mut self,
        backend: &Arc<dyn DenseBackend>,
        bytes: usize,
    ) -> Result<*mut c_void> {
        self.scratch.reserve(backend, bytes)
    }

    /// Rebinds both sub-handles. On failure every sub-handle is left on the previous
    /// stream.
    fn set_stream(&mut self, stream: Stream) -> Result<()> {
        let previous = self.stream;
        if let Some(ctx) = &self.dense {
            ctx.backend.set_stream(ctx.raw, stream)?;
        }
        if let Some(ctx) = &self.sparse
            && let Err(err) = ctx.backend.set_stream(ctx.raw, stream)
        {
            if let Some(dense) = &self.dense
                && let Err(restore) = dense.backend.set_stream(dense.raw, previous)
            {
                tracing::warn!(error = %restore, "dense sub-handle not restored to previous stream");
            }
            return Err(err);
        }
        self.stream = stream;
        Ok(())
    }
}

struct Arena {
    next_id: AtomicU64,
    slots: Mutex<HashMap<u64, (HandleKind, Arc<Mutex<HandleState>>)>>,
}

static ARENA: OnceLock<Arena> = OnceLock::new();

fn arena() -> &'static Arena {
    ARENA.get_or_init(|| Arena {
        next_id: AtomicU64::new(1),
        slots: Mutex::new(HashMap::new()),
    })
}

fn recover<'a, T>(lock: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(lock = what, "poisoned lock recovered");
        poisoned.into_inner()
    })
}

impl Arena {
    fn insert(&self, kind: HandleKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        recover(&self.slots, "handle arena")
            .insert(id, (kind, Arc::new(Mutex::new(HandleState::new()))));
        id
    }

    fn get(&self, id: u64, kind: HandleKind) -> Result<Arc<Mutex<HandleState>>> {
        match recover(&self.slots, "handle arena").get(&id) {
            Some((found, entry)) if *found == kind => Ok(Arc::clone(entry)),
            _ => Err(SolverError::InvalidHandle),
        }
    }

    fn remove(&self, id: u64, kind: HandleKind) -> Result<Arc<Mutex<HandleState>>> {
        let mut slots = recover(&self.slots, "handle arena");
        match slots.get(&id) {
            Some((found, _)) if *found == kind => {}
            _ => return Err(SolverError::InvalidHandle),
        }
        slots
            .remove(&id)
            .map(|(_, entry)| entry)
            .ok_or(SolverError::InvalidHandle)
    }
}

/// Runs `f` on the live state behind `id`.
pub(crate) fn with_state<R>(
    id: u64,
    kind: HandleKind,
    f: impl FnOnce(&mut HandleState) -> Result<R>,
) -> Result<R> {
    if id == 0 {
        return Err(SolverError::InvalidHandle);
    }
    let entry = arena().get(id, kind)?;
    let mut state = recover(&entry, "handle");
    f(&mut state)
}

fn create_kind(kind: HandleKind) -> u64 {
    let id = arena().insert(kind);
    tracing::debug!(handle = id, ?kind, "handle created");
    id
}

fn destroy_kind(id: u64, kind: HandleKind) -> Result<()> {
    if id == 0 {
        return Err(SolverError::InvalidHandle);
    }
    let entry = arena().remove(id, kind)?;
    // Sub-handles and scratch are released when the last reference goes, which is
    // here unless a call on another thread still holds the entry.
    drop(entry);
    tracing::debug!(handle = id, ?kind, "handle destroyed");
    Ok(())
}

/// Creates a dense solver handle bound to the default stream.
pub fn create() -> Handle {
    Handle(create_kind(HandleKind::Dense))
}

/// Destroys `handle` and its backend sub-handles.
pub fn destroy(handle: Handle) -> Result<()> {
    destroy_kind(handle.0, HandleKind::Dense)
}

/// Binds `stream` to `handle` and to any sub-handle it already owns.
pub fn set_stream(handle: Handle, stream: Stream) -> Result<()> {
    with_state(handle.0, HandleKind::Dense, |state| state.set_stream(stream))
}

pub fn get_stream(handle: Handle) -> Result<Stream> {
    with_state(handle.0, HandleKind::Dense, |state| Ok(state.stream()))
}

/// Creates a sparse solver handle bound to the default stream.
pub fn sp_create() -> SpHandle {
    SpHandle(create_kind(HandleKind::Sparse))
}

pub fn sp_destroy(handle: SpHandle) -> Result<()> {
    destroy_kind(handle.0, HandleKind::Sparse)
}

pub fn sp_set_stream(handle: SpHandle, stream: Stream) -> Result<()> {
    with_state(handle.0, HandleKind::Sparse, |state| state.set_stream(stream))
}

pub fn sp_get_stream(handle: SpHandle) -> Result<Stream> {
    with_state(handle.0, HandleKind::Sparse, |state| Ok(state.stream()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::*;
    use crate::types::{IndexBase, MatrixType, MemorySpace};

    #[test]
    fn handles_are_unique_and_destroyed_once() {
        let a = create();
        let b = create();
        assert_ne!(a, b);
        assert!(!a.is_null());
        destroy(a).expect("first destroy");
        assert_eq!(destroy(a), Err(SolverError::InvalidHandle));
        destroy(b).expect("destroy b");
    }

    #[test]
    fn null_handle_is_invalid() {
        assert_eq!(destroy(Handle::NULL), Err(SolverError::InvalidHandle));
        assert_eq!(get_stream(Handle::NULL), Err(SolverError::InvalidHandle));
    }

    #[test]
    fn streams_round_trip_without_backends() {
        let handle = create();
        let stream = Stream(0x1000 as *mut c_void);
        set_stream(handle, stream).expect("set");
        assert_eq!(get_stream(handle).expect("get"), stream);
        destroy(handle).expect("destroy");
    }

    #[test]
    fn dense_and_sparse_handles_do_not_mix() {
        let sparse = sp_create();
        assert_eq!(get_stream(Handle(sparse.0)), Err(SolverError::InvalidHandle));
        assert_eq!(destroy(Handle(sparse.0)), Err(SolverError::InvalidHandle));
        sp_destroy(sparse).expect("sparse destroy");
    }

    /// Records every stream it is bound to; refuses `reject`.
    struct StreamRecorder {
        bound: Mutex<Vec<Stream>>,
        reject: Option<Stream>,
    }

    impl StreamRecorder {
        fn new(reject: Option<Stream>) -> Arc<Self> {
            Arc::new(Self {
                bound: Mutex::new(Vec::new()),
                reject,
            })
        }

        fn bind(&self, stream: Stream) -> Result<()> {
            if self.reject == Some(stream) {
                return Err(SolverError::Backend {
                    backend: "recorder",
                    call: "set_stream",
                    code: 1,
                    status: crate::status::Status::InternalError,
                });
            }
            self.bound.lock().expect("bound").push(stream);
            Ok(())
        }

        fn current(&self) -> Option<Stream> {
            self.bound.lock().expect("bound").last().copied()
        }
    }

    impl DenseBackend for StreamRecorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn memory_space(&self) -> MemorySpace {
            MemorySpace::Device
        }
        fn create_context(&self, stream: Stream) -> Result<RawContext> {
            self.bind(stream)?;
            Ok(RawContext(1))
        }
        fn destroy_context(&self, _ctx: RawContext) -> Result<()> {
            Ok(())
        }
        fn set_stream(&self, _ctx: RawContext, stream: Stream) -> Result<()> {
            self.bind(stream)
        }
        fn workspace_size(&self, _ctx: RawContext, _query: &WorkspaceQuery) -> Result<usize> {
            unreachable!()
        }
        unsafe fn sytrd(&self, _: RawContext, _: &SytrdArgs, _: Workspace) -> Result<()> {
            unreachable!()
        }
        unsafe fn orgtr(&self, _: RawContext, _: &OrgtrArgs, _: Workspace) -> Result<()> {
            unreachable!()
        }
        unsafe fn potrf(&self, _: RawContext, _: &PotrfArgs) -> Result<()> {
            unreachable!()
        }
        unsafe fn potrs(&self, _: RawContext, _: &PotrsArgs) -> Result<()> {
            unreachable!()
        }
        unsafe fn geqrf(&self, _: RawContext, _: &GeqrfArgs) -> Result<()> {
            unreachable!()
        }
        unsafe fn ormqr(&self, _: RawContext, _: &OrmqrArgs) -> Result<()> {
            unreachable!()
        }
        unsafe fn trsv(&self, _: RawContext, _: &TrsvArgs) -> Result<()> {
            unreachable!()
        }
        fn alloc(&self, _bytes: usize) -> Result<*mut c_void> {
            unreachable!()
        }
        unsafe fn free(&self, _ptr: *mut c_void) -> Result<()> {
            unreachable!()
        }
        unsafe fn copy(
            &self,
            _: Stream,
            _: *mut c_void,
            _: *const c_void,
            _: usize,
            _: CopyKind,
        ) -> Result<()> {
            unreachable!()
        }
        fn synchronize(&self, _stream: Stream) -> Result<()> {
            Ok(())
        }
    }

    impl SparseBackend for StreamRecorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn memory_space(&self) -> MemorySpace {
            MemorySpace::Device
        }
        fn create_context(&self, stream: Stream) -> Result<RawContext> {
            self.bind(stream)?;
            Ok(RawContext(2))
        }
        fn destroy_context(&self, _ctx: RawContext) -> Result<()> {
            Ok(())
        }
        fn set_stream(&self, _ctx: RawContext, stream: Stream) -> Result<()> {
            self.bind(stream)
        }
        fn create_mat_descr(&self) -> Result<MatDescr> {
            unreachable!()
        }
        unsafe fn destroy_mat_descr(&self, _: MatDescr) -> Result<()> {
            unreachable!()
        }
        unsafe fn set_index_base(&self, _: MatDescr, _: IndexBase) -> Result<()> {
            unreachable!()
        }
        unsafe fn index_base(&self, _: MatDescr) -> Result<IndexBase> {
            unreachable!()
        }
        unsafe fn set_matrix_type(&self, _: MatDescr, _: MatrixType) -> Result<()> {
            unreachable!()
        }
        unsafe fn matrix_type(&self, _: MatDescr) -> Result<MatrixType> {
            unreachable!()
        }
        unsafe fn csr2dense(&self, _: RawContext, _: &Csr2DenseArgs) -> Result<()> {
            unreachable!()
        }
    }

    #[test]
    fn failed_rebind_leaves_both_sub_handles_on_previous_stream() {
        let first = Stream(0x1000 as *mut c_void);
        let rejected = Stream(0x2000 as *mut c_void);
        let dense = StreamRecorder::new(None);
        let sparse = StreamRecorder::new(Some(rejected));
        let mut state = HandleState::new();
        state.set_stream(first).expect("no sub-handles yet");
        state.dense = Some(DenseContext {
            backend: dense.clone(),
            raw: RawContext(1),
        });
        state.sparse = Some(SparseContext {
            backend: sparse.clone(),
            raw: RawContext(2),
        });

        let err = state.set_stream(rejected).expect_err("sparse refuses the stream");
        assert!(matches!(err, SolverError::Backend { call: "set_stream", .. }));
        assert_eq!(state.stream(), first);
        assert_eq!(dense.current(), Some(first));
        assert_eq!(sparse.current(), None);
        assert_eq!(*dense.bound.lock().expect("bound"), [rejected, first]);
    }
}

//! Loader and dispatch tests against a fake dense library served from this process.
//!
//! The fake exports every rocSOLVER/rocBLAS/HIP entry point the dense backend binds;
//! "device" memory is host memory. No sparse library is available.

use std::alloc::Layout;
use std::ffi::c_void;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use gpusolver::backend::{DENSE_SYMBOLS, LibraryLoader, LoadedLibrary};
use gpusolver::ffi::{gpusolver_dsytrd, gpusolver_dsytrd_, gpusolver_dsytrd_buffer_size};
use gpusolver::handle;
use gpusolver::{
    BackendKind, BackendRegistry, Handle, LoadState, LoaderConfig, SolverError, Status, Stream,
    install,
};
use gpusolver_compat::RawSymbol;
use serial_test::serial;

const DENSE_LIBRARY: &str = "libfake-rocsolver.so";
const SPARSE_LIBRARY: &str = "libfake-rocsparse.so";

static CREATED: AtomicUsize = AtomicUsize::new(0);
static DESTROYED: AtomicUsize = AtomicUsize::new(0);
static FREED: AtomicUsize = AtomicUsize::new(0);
static LAST_STREAM: AtomicUsize = AtomicUsize::new(0);
static QUERY_N: AtomicI32 = AtomicI32::new(0);
static SYTRD_STATUS: AtomicI32 = AtomicI32::new(0);
static ALLOCATIONS: Mutex<Vec<(usize, Layout)>> = Mutex::new(Vec::new());

unsafe extern "C" fn create_handle(handle: *mut *mut c_void) -> i32 {
    let id = CREATED.fetch_add(1, Ordering::SeqCst) + 1;
    unsafe { *handle = (0x1000 * id) as *mut c_void };
    0
}

unsafe extern "C" fn destroy_handle(_handle: *mut c_void) -> i32 {
    DESTROYED.fetch_add(1, Ordering::SeqCst);
    0
}

unsafe extern "C" fn set_stream(_handle: *mut c_void, stream: *mut c_void) -> i32 {
    LAST_STREAM.store(stream as usize, Ordering::SeqCst);
    0
}

unsafe extern "C" fn start_size_query(_handle: *mut c_void) -> i32 {
    0
}

unsafe extern "C" fn stop_size_query(_handle: *mut c_void, bytes: *mut usize) -> i32 {
    unsafe { *bytes = QUERY_N.load(Ordering::SeqCst) as usize * 8 };
    0
}

unsafe extern "C" fn set_workspace(_handle: *mut c_void, _ptr: *mut c_void, _bytes: usize) -> i32 {
    0
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn dsytrd(
    _handle: *mut c_void,
    _uplo: i32,
    n: i32,
    a: *mut f64,
    _lda: i32,
    _d: *mut f64,
    _e: *mut f64,
    _tau: *mut f64,
) -> i32 {
    if a.is_null() {
        QUERY_N.store(n, Ordering::SeqCst);
        // rocblas_status_size_increased
        return 9;
    }
    SYTRD_STATUS.load(Ordering::SeqCst)
}

unsafe extern "C" fn hip_malloc(ptr: *mut *mut c_void, bytes: usize) -> i32 {
    let layout = Layout::from_size_align(bytes.max(1), 16).expect("layout");
    let block = unsafe { std::alloc::alloc_zeroed(layout) };
    if block.is_null() {
        return 2;
    }
    ALLOCATIONS.lock().expect("allocations").push((block as usize, layout));
    unsafe { *ptr = block.cast() };
    0
}

unsafe extern "C" fn hip_free(ptr: *mut c_void) -> i32 {
    let mut allocations = ALLOCATIONS.lock().expect("allocations");
    let Some(index) = allocations.iter().position(|(addr, _)| *addr == ptr as usize) else {
        return 1;
    };
    let (_, layout) = allocations.swap_remove(index);
    unsafe { std::alloc::dealloc(ptr.cast(), layout) };
    FREED.fetch_add(1, Ordering::SeqCst);
    0
}

unsafe extern "C" fn hip_memcpy_async(
    dst: *mut c_void,
    src: *const c_void,
    bytes: usize,
    _kind: i32,
    _stream: *mut c_void,
) -> i32 {
    unsafe { std::ptr::copy(src.cast::<u8>(), dst.cast::<u8>(), bytes) };
    0
}

unsafe extern "C" fn hip_stream_synchronize(_stream: *mut c_void) -> i32 {
    0
}

/// Stand-in for entry points these tests never call.
unsafe extern "C" fn unused() -> i32 {
    0
}

fn fake_symbol(name: &str) -> RawSymbol {
    let address = match name {
        "rocblas_create_handle" => create_handle as *mut c_void,
        "rocblas_destroy_handle" => destroy_handle as *mut c_void,
        "rocblas_set_stream" => set_stream as *mut c_void,
        "rocblas_start_device_memory_size_query" => start_size_query as *mut c_void,
        "rocblas_stop_device_memory_size_query" => stop_size_query as *mut c_void,
        "rocblas_set_workspace" => set_workspace as *mut c_void,
        "rocsolver_dsytrd" => dsytrd as *mut c_void,
        "hipMalloc" => hip_malloc as *mut c_void,
        "hipFree" => hip_free as *mut c_void,
        "hipMemcpyAsync" => hip_memcpy_async as *mut c_void,
        "hipStreamSynchronize" => hip_stream_synchronize as *mut c_void,
        _ => unused as *mut c_void,
    };
    RawSymbol::new(address).expect("function addresses are non-null")
}

struct FakeLibrary {
    path: std::path::PathBuf,
    missing: Option<&'static str>,
}

impl LoadedLibrary for FakeLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn symbol(&self, name: &str) -> Option<RawSymbol> {
        if self.missing == Some(name) || !DENSE_SYMBOLS.contains(&name) {
            return None;
        }
        Some(fake_symbol(name))
    }
}

struct FakeLoader {
    opens: Arc<AtomicUsize>,
    missing: Option<&'static str>,
}

impl FakeLoader {
    fn new(missing: Option<&'static str>) -> (Self, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let loader = Self {
            opens: Arc::clone(&opens),
            missing,
        };
        (loader, opens)
    }
}

impl LibraryLoader for FakeLoader {
    fn open(&self, path: &Path) -> Option<Arc<dyn LoadedLibrary>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if path != Path::new(DENSE_LIBRARY) {
            return None;
        }
        Some(Arc::new(FakeLibrary {
            path: path.to_path_buf(),
            missing: self.missing,
        }))
    }
}

/// Buffers for one `n x n` reduction.
struct Reduction {
    a: Vec<f64>,
    d: Vec<f64>,
    e: Vec<f64>,
    tau: Vec<f64>,
}

impl Reduction {
    fn new(n: usize) -> Self {
        Self {
            a: vec![0.0; n * n],
            d: vec![0.0; n],
            e: vec![0.0; n.saturating_sub(1)],
            tau: vec![0.0; n.saturating_sub(1)],
        }
    }

    fn run(&mut self, h: Handle, uplo: i32, work: *mut f64, lwork: i32) -> Status {
        let n = self.d.len() as i32;
        unsafe {
            gpusolver_dsytrd(
                h,
                uplo,
                n,
                self.a.as_mut_ptr(),
                n,
                self.d.as_mut_ptr(),
                self.e.as_mut_ptr(),
                self.tau.as_mut_ptr(),
                work,
                lwork,
            )
        }
    }

    fn run_fortran(&mut self, h: Handle, uplo: u8, work: *mut f64, lwork: i32) -> Status {
        let n = self.d.len() as i32;
        let uplo = uplo as std::ffi::c_char;
        unsafe {
            gpusolver_dsytrd_(
                &h,
                &uplo,
                &n,
                self.a.as_mut_ptr(),
                &n,
                self.d.as_mut_ptr(),
                self.e.as_mut_ptr(),
                self.tau.as_mut_ptr(),
                work,
                &lwork,
            )
        }
    }
}

fn fake_config() -> LoaderConfig {
    LoaderConfig {
        dense_candidates: vec![DENSE_LIBRARY.to_string()],
        sparse_candidates: vec![SPARSE_LIBRARY.to_string()],
        ..LoaderConfig::default()
    }
}

fn install_fake_registry() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let (loader, _) = FakeLoader::new(None);
        if install(BackendRegistry::new(fake_config(), Box::new(loader))).is_err() {
            panic!("global registry was initialized before the fake was installed");
        }
    });
}

#[test]
fn test_concurrent_first_use_loads_once() {
    let (loader, opens) = FakeLoader::new(None);
    let registry = BackendRegistry::new(fake_config(), Box::new(loader));
    let backends = std::thread::scope(|scope| {
        let workers = (0..8)
            .map(|_| scope.spawn(|| registry.dense()))
            .collect::<Vec<_>>();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("worker").expect("dense backend"))
            .collect::<Vec<_>>()
    });
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert!(backends.iter().all(|backend| Arc::ptr_eq(backend, &backends[0])));

    let info = registry.info(BackendKind::Dense);
    assert_eq!(info.state, LoadState::Loaded);
    assert_eq!(info.implementation.as_deref(), Some("rocsolver"));
    assert_eq!(info.symbols, DENSE_SYMBOLS.len());
    assert_eq!(info.library.as_deref(), Some(Path::new(DENSE_LIBRARY)));
}

#[test]
fn test_missing_symbol_rejects_whole_library() {
    let (loader, opens) = FakeLoader::new(Some("hipStreamSynchronize"));
    let registry = BackendRegistry::new(fake_config(), Box::new(loader));
    for _ in 0..3 {
        let err = registry.dense().err().expect("incomplete library");
        assert_eq!(err, SolverError::BackendNotAvailable(BackendKind::Dense));
    }
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    match registry.info(BackendKind::Dense).state {
        LoadState::Failed { reason } => assert!(reason.contains("hipStreamSynchronize"), "{reason}"),
        other => panic!("unexpected state {other:?}"),
    }
}

#[test]
fn test_absent_sparse_library_leaves_dense_usable() {
    let (loader, _) = FakeLoader::new(None);
    let registry = BackendRegistry::new(fake_config(), Box::new(loader));
    assert!(registry.sparse().is_err());
    assert!(registry.dense().is_ok());
    assert!(matches!(
        registry.info(BackendKind::Sparse).state,
        LoadState::Failed { .. }
    ));
}

#[test]
#[serial]
fn test_backend_statuses_are_translated() {
    install_fake_registry();
    let h = handle::create();
    let mut reduction = Reduction::new(4);
    let mut run = |code: i32| {
        SYTRD_STATUS.store(code, Ordering::SeqCst);
        reduction.run(h, 121, std::ptr::null_mut(), 0)
    };
    assert_eq!(run(0), Status::Success);
    assert_eq!(run(3), Status::InvalidPointer);
    assert_eq!(run(5), Status::AllocFailed);
    assert_eq!(run(11), Status::InvalidValue);
    assert_eq!(run(1234), Status::InternalError);
    SYTRD_STATUS.store(0, Ordering::SeqCst);
    handle::destroy(h).expect("destroy");
}

#[test]
#[serial]
fn test_query_then_call_with_exact_workspace() {
    install_fake_registry();
    let h = handle::create();
    let n = 5;
    let mut lwork = -1;
    let status =
        unsafe { gpusolver_dsytrd_buffer_size(h, 122, n, std::ptr::null(), n, &mut lwork) };
    assert_eq!(status, Status::Success);
    assert_eq!(lwork, n);

    let mut reduction = Reduction::new(n as usize);
    let mut work = vec![0.0f64; lwork as usize];
    assert_eq!(reduction.run(h, 122, work.as_mut_ptr(), lwork), Status::Success);
    assert_eq!(
        reduction.run(h, 122, work.as_mut_ptr(), lwork - 1),
        Status::InvalidValue
    );
    handle::destroy(h).expect("destroy");
}

#[test]
#[serial]
fn test_c_and_fortran_spellings_agree() {
    install_fake_registry();
    let h = handle::create();
    let mut reduction = Reduction::new(3);
    for code in [0, 4] {
        SYTRD_STATUS.store(code, Ordering::SeqCst);
        let c = reduction.run(h, 121, std::ptr::null_mut(), 0);
        let fortran = reduction.run_fortran(h, b'U', std::ptr::null_mut(), 0);
        assert_eq!(c, fortran);
    }
    assert_eq!(
        reduction.run(h, 99, std::ptr::null_mut(), 0),
        reduction.run_fortran(h, b'Q', std::ptr::null_mut(), 0)
    );
    SYTRD_STATUS.store(0, Ordering::SeqCst);
    handle::destroy(h).expect("destroy");
}

#[test]
#[serial]
fn test_sub_handle_lifecycle_follows_handle() {
    install_fake_registry();
    let created = CREATED.load(Ordering::SeqCst);
    let destroyed = DESTROYED.load(Ordering::SeqCst);
    let freed = FREED.load(Ordering::SeqCst);

    let h = handle::create();
    let mut reduction = Reduction::new(2);
    for _ in 0..2 {
        assert_eq!(reduction.run(h, 121, std::ptr::null_mut(), 0), Status::Success);
    }
    assert_eq!(CREATED.load(Ordering::SeqCst), created + 1);

    let stream = Stream(0x5000 as *mut c_void);
    handle::set_stream(h, stream).expect("set stream");
    assert_eq!(LAST_STREAM.load(Ordering::SeqCst), 0x5000);
    assert_eq!(handle::get_stream(h).expect("get stream"), stream);

    handle::destroy(h).expect("destroy");
    assert_eq!(DESTROYED.load(Ordering::SeqCst), destroyed + 1);
    assert_eq!(FREED.load(Ordering::SeqCst), freed + 1);
    assert_eq!(handle::set_stream(h, stream), Err(SolverError::InvalidHandle));
}

#[test]
#[serial]
fn test_sparse_solve_reports_missing_backend() {
    install_fake_registry();
    let h = handle::sp_create();
    let values = [4.0f64, 1.0, 3.0];
    let row_ptr = [0, 2, 3];
    let col_ind = [0, 1, 1];
    let b = [1.0f64, 2.0];
    let mut x = [0.0f64; 2];
    let mut singularity = 7;
    let descr = gpusolver::backend::MatDescr(0x10 as *mut c_void);
    let status = unsafe {
        gpusolver::ffi::gpusolver_sp_dcsrlsvchol(
            h,
            2,
            3,
            descr,
            values.as_ptr(),
            row_ptr.as_ptr(),
            col_ind.as_ptr(),
            b.as_ptr(),
            0.0,
            0,
            x.as_mut_ptr(),
            &mut singularity,
        )
    };
    assert_eq!(status, Status::BackendNotAvailable);
    assert_eq!(singularity, 7);
    assert_eq!(x, [0.0, 0.0]);
    handle::sp_destroy(h).expect("destroy");
}

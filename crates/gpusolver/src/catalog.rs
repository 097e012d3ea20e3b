//! Inventory of the exported entry points.

use gpusolver_compat::{
    CallingConvention, CompatError, SymbolTable, canonical_symbol, fortran_symbol, precision_symbol,
};
use serde::Serialize;

use crate::backend::BackendKind;

const FAMILY: &str = "gpusolver";
const SPARSE_FAMILY: &str = "gpusolver_sp";
const QUERY_SUFFIX: &str = "_buffer_size";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryPoint {
    pub operation: &'static str,
    /// LAPACK precision prefix; `None` for precision-independent calls.
    pub precision: Option<char>,
    pub c_symbol: String,
    pub fortran_symbol: Option<String>,
    /// Backend the call resolves; `None` when it touches no backend.
    pub backend: Option<BackendKind>,
    /// Whether a `_buffer_size` sibling exists.
    pub has_query: bool,
}

impl EntryPoint {
    /// Every exported spelling of this entry point with its calling convention,
    /// including workspace queries.
    pub fn spellings(&self) -> Vec<(String, CallingConvention)> {
        let c = |name: &str| (canonical_symbol(name, CallingConvention::C), CallingConvention::C);
        let fortran = |name: &str| {
            (
                canonical_symbol(name, CallingConvention::Fortran),
                CallingConvention::Fortran,
            )
        };
        let mut spellings = vec![c(&self.c_symbol)];
        if let Some(symbol) = &self.fortran_symbol {
            spellings.push(fortran(symbol));
        }
        if self.has_query {
            let query = format!("{}{QUERY_SUFFIX}", self.c_symbol);
            if self.fortran_symbol.is_some() {
                spellings.push(fortran(&query));
            }
            spellings.push(c(&query));
        }
        spellings
    }

    /// Every exported spelling of this entry point, including workspace queries.
    pub fn symbols(&self) -> Vec<String> {
        self.spellings().into_iter().map(|(symbol, _)| symbol).collect()
    }
}

fn plain(operation: &'static str, symbol: &str, backend: Option<BackendKind>) -> EntryPoint {
    EntryPoint {
        operation,
        precision: None,
        c_symbol: symbol.to_string(),
        fortran_symbol: None,
        backend,
        has_query: false,
    }
}

fn routine(
    family: &str,
    operation: &'static str,
    precision: char,
    backend: BackendKind,
    fortran: bool,
    has_query: bool,
) -> EntryPoint {
    let c_symbol = precision_symbol(family, precision, operation);
    EntryPoint {
        operation,
        precision: Some(precision),
        fortran_symbol: fortran.then(|| fortran_symbol(&c_symbol)),
        c_symbol,
        backend: Some(backend),
        has_query,
    }
}

/// Every entry point exported by the C ABI.
pub fn entry_points() -> Vec<EntryPoint> {
    let dense = Some(BackendKind::Dense);
    let sparse = Some(BackendKind::Sparse);
    let mut entries = vec![
        plain("status_to_string", "gpusolver_status_to_string", None),
        plain("get_last_error", "gpusolver_get_last_error", None),
        plain("create", "gpusolver_create", None),
        plain("destroy", "gpusolver_destroy", dense),
        plain("set_stream", "gpusolver_set_stream", dense),
        plain("get_stream", "gpusolver_get_stream", None),
        plain("sp_create", "gpusolver_sp_create", None),
        plain("sp_destroy", "gpusolver_sp_destroy", sparse),
        plain("sp_set_stream", "gpusolver_sp_set_stream", sparse),
        plain("sp_get_stream", "gpusolver_sp_get_stream", None),
        plain("create_mat_descr", "gpusolver_sp_create_mat_descr", sparse),
        plain("destroy_mat_descr", "gpusolver_sp_destroy_mat_descr", sparse),
        plain("set_mat_index_base", "gpusolver_sp_set_mat_index_base", sparse),
        plain("get_mat_index_base", "gpusolver_sp_get_mat_index_base", sparse),
        plain("set_mat_type", "gpusolver_sp_set_mat_type", sparse),
        plain("get_mat_type", "gpusolver_sp_get_mat_type", sparse),
    ];
    for (operation, precisions) in [
        ("sytrd", ['s', 'd']),
        ("hetrd", ['c', 'z']),
        ("orgtr", ['s', 'd']),
        ("ungtr", ['c', 'z']),
    ] {
        for precision in precisions {
            entries.push(routine(FAMILY, operation, precision, BackendKind::Dense, true, true));
        }
    }
    for (operation, fortran) in [
        ("csrlsvchol", true),
        ("csrlsvchol_host", true),
        ("csrlsvqr", false),
    ] {
        for precision in ['s', 'd'] {
            entries.push(routine(
                SPARSE_FAMILY,
                operation,
                precision,
                BackendKind::Sparse,
                fortran,
                false,
            ));
        }
    }
    entries
}

/// All exported symbols declared in one table; fails on a duplicate spelling.
pub fn symbol_table() -> Result<SymbolTable, CompatError> {
    let symbols = entry_points()
        .iter()
        .flat_map(EntryPoint::symbols)
        .collect::<Vec<_>>();
    SymbolTable::with_slots(FAMILY, &symbols)
}

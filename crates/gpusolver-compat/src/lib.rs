//! Symbol naming and symbol-table primitives for runtime backend binding.
//!
//! This crate provides:
//! - calling-convention aware symbol naming (C and legacy Fortran spellings)
//! - a name-keyed table of backend entry points with explicit unresolved slots

mod symbols;
mod table;

pub use symbols::{CallingConvention, canonical_symbol, fortran_symbol, precision_symbol};
pub use table::{CompatError, RawSymbol, Slot, SymbolTable};

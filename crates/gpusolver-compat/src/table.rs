use std::collections::BTreeMap;
use std::ffi::c_void;
use std::ptr::NonNull;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompatError {
    #[error("symbol {symbol} declared twice in the {table} table")]
    DuplicateSymbol { table: String, symbol: String },

    #[error("symbol {symbol} is not declared in the {table} table")]
    UnknownSymbol { table: String, symbol: String },

    #[error("symbol {symbol} is unresolved in the {table} table")]
    Unresolved { table: String, symbol: String },
}

/// Address of an entry point resolved from a loaded library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSymbol(NonNull<c_void>);

// SAFETY: a RawSymbol is an immutable code address; it carries no thread affinity.
unsafe impl Send for RawSymbol {}
unsafe impl Sync for RawSymbol {}

impl RawSymbol {
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }

    /// Reinterprets the address as a function pointer of type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type whose signature matches
    /// the symbol's definition in the library it was resolved from.
    pub unsafe fn cast<F: Copy>(self) -> F {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<*mut c_void>(),
            "symbols can only be cast to pointer-sized function types"
        );
        let ptr = self.0.as_ptr();
        // SAFETY: sizes checked above, signature guaranteed by the caller.
        unsafe { std::mem::transmute_copy::<*mut c_void, F>(&ptr) }
    }
}

/// State of one entry in a [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Unresolved,
    Resolved(RawSymbol),
}

/// Name-keyed table of the entry points a backend must provide.
///
/// Slots are declared up front and start out [`Slot::Unresolved`]; binding fills
/// them in any order. The name is the only key, so declaring a name twice is
/// rejected.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    name: String,
    slots: BTreeMap<String, Slot>,
}

impl SymbolTable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            slots: BTreeMap::new(),
        }
    }

    /// Creates a table with one unresolved slot per name.
    pub fn with_slots<S: AsRef<str>>(name: &str, symbols: &[S]) -> Result<Self, CompatError> {
        let mut table = Self::new(name);
        for symbol in symbols {
            table.declare(symbol.as_ref())?;
        }
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declare(&mut self, symbol: &str) -> Result<(), CompatError> {
        if self.slots.contains_key(symbol) {
            return Err(CompatError::DuplicateSymbol {
                table: self.name.clone(),
                symbol: symbol.to_string(),
            });
        }
        self.slots.insert(symbol.to_string(), Slot::Unresolved);
        Ok(())
    }

    pub fn bind(&mut self, symbol: &str, address: RawSymbol) -> Result<(), CompatError> {
        match self.slots.get_mut(symbol) {
            Some(slot) => {
                *slot = Slot::Resolved(address);
                Ok(())
            }
            None => Err(CompatError::UnknownSymbol {
                table: self.name.clone(),
                symbol: symbol.to_string(),
            }),
        }
    }

    pub fn slot(&self, symbol: &str) -> Option<Slot> {
        self.slots.get(symbol).copied()
    }

    pub fn resolved(&self, symbol: &str) -> Result<RawSymbol, CompatError> {
        match self.slots.get(symbol) {
            Some(Slot::Resolved(address)) => Ok(*address),
            Some(Slot::Unresolved) => Err(CompatError::Unresolved {
                table: self.name.clone(),
                symbol: symbol.to_string(),
            }),
            None => Err(CompatError::UnknownSymbol {
                table: self.name.clone(),
                symbol: symbol.to_string(),
            }),
        }
    }

    /// Looks up a resolved slot and casts it to a typed function pointer.
    ///
    /// # Safety
    ///
    /// Same contract as [`RawSymbol::cast`].
    pub unsafe fn typed<F: Copy>(&self, symbol: &str) -> Result<F, CompatError> {
        let address = self.resolved(symbol)?;
        // SAFETY: forwarded to the caller.
        Ok(unsafe { address.cast::<F>() })
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn unresolved(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Unresolved))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.slots
            .values()
            .all(|slot| matches!(slot, Slot::Resolved(_)))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

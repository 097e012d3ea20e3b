/// Calling convention of an exported or imported routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    /// Scalars by value, enums as integers.
    C,
    /// Every argument by reference, lower-case name with a trailing underscore.
    Fortran,
}

pub fn canonical_symbol(name: &str, convention: CallingConvention) -> String {
    match convention {
        CallingConvention::C => sanitize_symbol(name),
        CallingConvention::Fortran => fortran_symbol(name),
    }
}

pub fn fortran_symbol(name: &str) -> String {
    let sanitized = sanitize_symbol(name).to_ascii_lowercase();
    if sanitized.ends_with('_') {
        sanitized
    } else {
        format!("{sanitized}_")
    }
}

/// Builds the LAPACK-style name of a routine for one precision, e.g.
/// `precision_symbol("rocsolver", 'd', "sytrd") == "rocsolver_dsytrd"`.
pub fn precision_symbol(family: &str, precision: char, routine: &str) -> String {
    let family = sanitize_symbol(family);
    let routine = sanitize_symbol(routine);
    let prefix = precision.to_ascii_lowercase();
    if family.is_empty() {
        format!("{prefix}{routine}")
    } else {
        format!("{family}_{prefix}{routine}")
    }
}

fn sanitize_symbol(name: &str) -> String {
    name.trim()
        .trim_end_matches('\0')
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .collect()
}

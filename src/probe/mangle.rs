//! Symbol name synthesis: Fortran mangling and precision expansion.

use serde::{Deserialize, Serialize};

use crate::core::Precision;

/// Placeholder replaced by the precision letter in recipe symbol templates.
pub const PRECISION_PLACEHOLDER: &str = "{p}";

/// How a Fortran compiler decorates external names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FortranMangling {
    /// Lowercase plus a trailing underscore (gfortran, ifort on Unix)
    #[default]
    Underscore,
    /// Lowercase, no decoration
    Unchanged,
    /// Uppercase, no decoration
    Uppercase,
    /// Lowercase plus `__` when the name contains an underscore, `_` otherwise (g77, f2c)
    DoubleUnderscore,
}

impl FortranMangling {
    /// Mangle a Fortran routine name into its link-level symbol.
    pub fn mangle(&self, name: &str) -> String {
        match self {
            FortranMangling::Underscore => format!("{}_", name.to_lowercase()),
            FortranMangling::Unchanged => name.to_lowercase(),
            FortranMangling::Uppercase => name.to_uppercase(),
            FortranMangling::DoubleUnderscore => {
                let lower = name.to_lowercase();
                if lower.contains('_') {
                    format!("{}__", lower)
                } else {
                    format!("{}_", lower)
                }
            }
        }
    }
}

/// Substitute the precision letter into a symbol template.
///
/// Templates without the placeholder, or a missing precision, leave the name
/// unchanged.
pub fn expand_precision(template: &str, precision: Option<Precision>) -> String {
    match precision {
        Some(p) => template.replace(PRECISION_PLACEHOLDER, &p.letter().to_string()),
        None => template.to_string(),
    }
}

/// Link-level symbol for a template, precision and optional Fortran convention.
pub fn symbol_name(
    template: &str,
    precision: Option<Precision>,
    fortran: Option<FortranMangling>,
) -> String {
    let expanded = expand_precision(template, precision);
    match fortran {
        Some(mangling) => mangling.mangle(&expanded),
        None => expanded,
    }
}

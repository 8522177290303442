//! Resolving external rows to internal units.
//!
//! Spreadsheet and CRM data identifies units by free-text address or unit
//! number. Unit resolution is exact first, then the unit's address must
//! contain the identifier. Row matching for enrichment accepts containment
//! in either direction.

use crate::transform::value_to_string;
use crate::types::{DbId, ExternalRow};

/// Table/field pair that carries a unit's primary identifier.
pub const UNIT_IDENTIFIER_TABLE: &str = "units";
pub const UNIT_IDENTIFIER_FIELD: &str = "address";

/// A unit eligible for matching within one development.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCandidate {
    pub id: DbId,
    pub address: String,
    pub unit_number: Option<String>,
}

/// Anything that maps an external field onto an internal table/field.
pub trait MappingTarget {
    fn external_field(&self) -> &str;
    fn oh_table(&self) -> &str;
    fn oh_field(&self) -> &str;

    fn is_unit_identifier(&self) -> bool {
        self.oh_table() == UNIT_IDENTIFIER_TABLE && self.oh_field() == UNIT_IDENTIFIER_FIELD
    }
}

/// Case-insensitive equality or containment in either direction.
///
/// Empty strings never match anything.
pub fn identifiers_match(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.contains(&b) || b.contains(&a)
}

/// Resolve `identifier` to a unit.
///
/// Order: exact address, exact unit number, then a case-insensitive address
/// that contains the identifier. The first hit in candidate order wins.
pub fn resolve_unit<'a>(candidates: &'a [UnitCandidate], identifier: &str) -> Option<&'a UnitCandidate> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return None;
    }

    let needle = identifier.to_lowercase();
    candidates
        .iter()
        .find(|u| u.address == identifier)
        .or_else(|| {
            candidates
                .iter()
                .find(|u| u.unit_number.as_deref() == Some(identifier))
        })
        .or_else(|| {
            candidates
                .iter()
                .find(|u| u.address.to_lowercase().contains(&needle))
        })
}

/// Read the unit identifier out of an external row using the mapping that
/// targets `units.address`. Returns `None` when no such mapping exists or the
/// cell is empty.
pub fn extract_unit_identifier<M: MappingTarget>(row: &ExternalRow, mappings: &[M]) -> Option<String> {
    let mapping = mappings.iter().find(|m| m.is_unit_identifier())?;
    let raw = value_to_string(row.get(mapping.external_field())?);
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

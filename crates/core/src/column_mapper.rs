//! Column-mapping suggestions for spreadsheet headers.
//!
//! Headers are compared against the column names commonly found in Irish
//! development sales trackers and mapped onto internal table/field pairs.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Known headers
// ---------------------------------------------------------------------------

const UNITS: &str = "units";
const PIPELINE: &str = "unit_sales_pipeline";
const KITCHEN: &str = "kitchen_selections";
const NOTES: &str = "unit_pipeline_notes";

/// Normalized header -> (table, field). Order matters for tie-breaking.
const KNOWN_HEADERS: &[(&str, &str, &str)] = &[
    ("unit no", UNITS, "address"),
    ("unit no.", UNITS, "address"),
    ("unit number", UNITS, "address"),
    ("house no", UNITS, "address"),
    ("house number", UNITS, "address"),
    ("plot", UNITS, "address"),
    ("plot no", UNITS, "address"),
    ("lot", UNITS, "address"),
    ("house type", UNITS, "unit_type_id"),
    ("type", UNITS, "unit_type_id"),
    ("property type", UNITS, "unit_type_id"),
    ("bed", UNITS, "unit_type_id"),
    ("beds", UNITS, "unit_type_id"),
    ("purchaser", PIPELINE, "purchaser_name"),
    ("purchaser name", PIPELINE, "purchaser_name"),
    ("buyer", PIPELINE, "purchaser_name"),
    ("buyer name", PIPELINE, "purchaser_name"),
    ("customer", PIPELINE, "purchaser_name"),
    ("purchaser email", PIPELINE, "purchaser_email"),
    ("email", PIPELINE, "purchaser_email"),
    ("purchaser phone", PIPELINE, "purchaser_phone"),
    ("phone", PIPELINE, "purchaser_phone"),
    ("mobile", PIPELINE, "purchaser_phone"),
    ("solicitor", PIPELINE, "purchaser_solicitor"),
    ("purchaser solicitor", PIPELINE, "purchaser_solicitor"),
    ("buyer solicitor", PIPELINE, "purchaser_solicitor"),
    ("vendor solicitor", PIPELINE, "vendor_solicitor"),
    ("status", PIPELINE, "status"),
    ("sale status", PIPELINE, "status"),
    ("booking deposit", PIPELINE, "booking_deposit_date"),
    ("deposit", PIPELINE, "booking_deposit_date"),
    ("deposit paid", PIPELINE, "booking_deposit_date"),
    ("contract signed", PIPELINE, "contracts_signed_date"),
    ("contracts signed", PIPELINE, "contracts_signed_date"),
    ("contract date", PIPELINE, "contracts_signed_date"),
    ("loan approved", PIPELINE, "loan_approval_date"),
    ("loan approval", PIPELINE, "loan_approval_date"),
    ("mortgage approved", PIPELINE, "loan_approval_date"),
    ("snag", PIPELINE, "snag_date"),
    ("snag date", PIPELINE, "snag_date"),
    ("snagging", PIPELINE, "snag_date"),
    ("de-snag", PIPELINE, "desnag_date"),
    ("desnag", PIPELINE, "desnag_date"),
    ("closing", PIPELINE, "closing_date"),
    ("closing date", PIPELINE, "closing_date"),
    ("completion", PIPELINE, "closing_date"),
    ("handover", PIPELINE, "handover_date"),
    ("handover date", PIPELINE, "handover_date"),
    ("price", PIPELINE, "sale_price"),
    ("sale price", PIPELINE, "sale_price"),
    ("asking price", PIPELINE, "sale_price"),
    ("kitchen", KITCHEN, "selection"),
    ("kitchen selection", KITCHEN, "selection"),
    ("kitchen choice", KITCHEN, "selection"),
    ("notes", NOTES, "content"),
    ("comments", NOTES, "content"),
];

/// Minimum Levenshtein similarity for a fuzzy suggestion.
const FUZZY_THRESHOLD: f64 = 0.6;

/// Fuzzy suggestions below this confidence are re-scored by containment.
const CONTAINMENT_RECHECK_BELOW: f64 = 0.8;

const CONTAINMENT_WEIGHT: f64 = 0.85;
const CONTAINMENT_CAP: f64 = 0.95;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestedMapping {
    pub oh_table: &'static str,
    pub oh_field: &'static str,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingSuggestion {
    pub index: usize,
    pub header: String,
    pub sample_values: Vec<String>,
    pub suggested_mapping: Option<SuggestedMapping>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetField {
    pub table: &'static str,
    pub field: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

// ---------------------------------------------------------------------------
// Suggestions
// ---------------------------------------------------------------------------

/// Suggest a mapping for each header. `samples[i]` holds sample values for
/// header `i`; missing entries yield empty sample lists.
pub fn suggest_mappings(headers: &[String], samples: &[Vec<String>]) -> Vec<MappingSuggestion> {
    headers
        .iter()
        .enumerate()
        .map(|(index, header)| MappingSuggestion {
            index,
            header: header.clone(),
            sample_values: samples.get(index).cloned().unwrap_or_default(),
            suggested_mapping: suggest_for_header(header),
        })
        .collect()
}

fn suggest_for_header(header: &str) -> Option<SuggestedMapping> {
    let normalized = header.trim().to_lowercase();

    if let Some(&(_, table, field)) = KNOWN_HEADERS.iter().find(|(h, _, _)| *h == normalized) {
        return Some(SuggestedMapping {
            oh_table: table,
            oh_field: field,
            confidence: 1.0,
        });
    }

    let mut best: Option<SuggestedMapping> = None;
    for &(known, table, field) in KNOWN_HEADERS {
        let score = similarity(&normalized, known);
        let current = best.as_ref().map_or(0.0, |b| b.confidence);
        if score > current && score > FUZZY_THRESHOLD {
            best = Some(SuggestedMapping {
                oh_table: table,
                oh_field: field,
                confidence: score,
            });
        }
    }

    let needs_recheck = best
        .as_ref()
        .map_or(true, |b| b.confidence < CONTAINMENT_RECHECK_BELOW);
    if needs_recheck && !normalized.is_empty() {
        for &(known, table, field) in KNOWN_HEADERS {
            if !(normalized.contains(known) || known.contains(normalized.as_str())) {
                continue;
            }
            let (n, k) = (char_len(&normalized), char_len(known));
            let score = (k / n).max(n / k) * CONTAINMENT_WEIGHT;
            let current = best.as_ref().map_or(0.0, |b| b.confidence);
            if score > current {
                best = Some(SuggestedMapping {
                    oh_table: table,
                    oh_field: field,
                    confidence: score.min(CONTAINMENT_CAP),
                });
            }
        }
    }

    best
}

fn char_len(s: &str) -> f64 {
    s.chars().count() as f64
}

/// 1.0 for identical strings, falling towards 0.0 as edits accumulate.
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = char_len(a).max(char_len(b));
    if max_len == 0.0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j]
            } else {
                1 + prev[j].min(prev[j + 1]).min(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

// ---------------------------------------------------------------------------
// Target fields
// ---------------------------------------------------------------------------

const TARGET_FIELDS: &[TargetField] = &[
    TargetField { table: UNITS, field: "address", label: "Unit Number / Address", kind: "text" },
    TargetField { table: UNITS, field: "unit_type_id", label: "House Type", kind: "reference" },
    TargetField { table: PIPELINE, field: "purchaser_name", label: "Purchaser Name", kind: "text" },
    TargetField { table: PIPELINE, field: "purchaser_email", label: "Purchaser Email", kind: "email" },
    TargetField { table: PIPELINE, field: "purchaser_phone", label: "Purchaser Phone", kind: "phone" },
    TargetField { table: PIPELINE, field: "purchaser_solicitor", label: "Purchaser Solicitor", kind: "text" },
    TargetField { table: PIPELINE, field: "vendor_solicitor", label: "Vendor Solicitor", kind: "text" },
    TargetField { table: PIPELINE, field: "status", label: "Sale Status", kind: "enum" },
    TargetField { table: PIPELINE, field: "sale_price", label: "Sale Price", kind: "currency" },
    TargetField { table: PIPELINE, field: "booking_deposit_date", label: "Booking Deposit Date", kind: "date" },
    TargetField { table: PIPELINE, field: "contracts_signed_date", label: "Contracts Signed Date", kind: "date" },
    TargetField { table: PIPELINE, field: "loan_approval_date", label: "Loan Approval Date", kind: "date" },
    TargetField { table: PIPELINE, field: "snag_date", label: "Snag Date", kind: "date" },
    TargetField { table: PIPELINE, field: "desnag_date", label: "De-Snag Date", kind: "date" },
    TargetField { table: PIPELINE, field: "closing_date", label: "Closing Date", kind: "date" },
    TargetField { table: PIPELINE, field: "handover_date", label: "Handover Date", kind: "date" },
    TargetField { table: KITCHEN, field: "selection", label: "Kitchen Selection", kind: "text" },
    TargetField { table: NOTES, field: "content", label: "Notes / Comments", kind: "text" },
];

/// Every internal field an operator can map a column onto.
pub fn available_target_fields() -> &'static [TargetField] {
    TARGET_FIELDS
}

pub fn find_target(table: &str, field: &str) -> Option<&'static TargetField> {
    TARGET_FIELDS
        .iter()
        .find(|t| t.table == table && t.field == field)
}

/// True if `table.field` is a known mapping target.
pub fn is_known_target(table: &str, field: &str) -> bool {
    find_target(table, field).is_some()
}

//! PII Redactor (C5, spec §4.6). A pure function over
//! [`crate::response::CanonicalResponse`]: walks every entity, including
//! nested ones, and replaces the `value` slot of any vCard field whose name
//! matches the policy (case-insensitive, substring) with a fixed
//! replacement string.

use crate::config::PrivacyConfig;
use crate::response::{CanonicalEntity, CanonicalResponse};

/// Redacts `response` per `policy`, returning a structurally fresh value;
/// `response` is never mutated (spec §4.6: "the input must not be observed
/// to change"). A no-op (clone) when `policy.redact_pii` is false.
pub fn redact(response: &CanonicalResponse, policy: &PrivacyConfig) -> CanonicalResponse {
    if !policy.redact_pii {
        return response.clone();
    }
    let mut out = response.clone();
    out.entities = out.entities.iter().map(|e| redact_entity(e, policy)).collect();
    out
}

fn redact_entity(entity: &CanonicalEntity, policy: &PrivacyConfig) -> CanonicalEntity {
    let mut out = entity.clone();
    for field in &mut out.vcard {
        let name = field.name.to_ascii_lowercase();
        if policy
            .redact_fields
            .iter()
            .any(|f| name.contains(&f.to_ascii_lowercase()))
        {
            field.value = serde_json::Value::String(policy.replacement.clone());
        }
    }
    out.nested_entities = out
        .nested_entities
        .iter()
        .map(|e| redact_entity(e, policy))
        .collect();
    out
}

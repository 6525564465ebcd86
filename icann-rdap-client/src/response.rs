//! Canonical RDAP response model and normalizer (C5, spec §3.4/§3.5/§4.6).
//!
//! Object-class detection follows the teacher's
//! `response::RdapResponse::try_from(Value)` pattern in
//! `icann-rdap-common/src/response/mod.rs`: `objectClassName` first, then
//! distinguishing fields as a fallback. The canonical shape itself is
//! deliberately flatter than the teacher's typed `Domain`/`Network`/`Autnum`
//! structs — spec §3.4/§3.5 ask for one registry-agnostic product type, not
//! one type per object class, so `normalize` extracts directly into it
//! rather than deserializing into the teacher's per-class structs first.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorContext, RdapError};

/// The RDAP object class a canonical response was extracted from
/// (spec §3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Domain,
    #[serde(rename = "ip network")]
    IpNetwork,
    Autnum,
    Nameserver,
    Entity,
}

/// A single `events[]` record (spec §3.4). An unparseable `eventDate` keeps
/// the event with `date = None` rather than dropping it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub action: String,
    pub date: Option<DateTime<Utc>>,
    pub actor: Option<String>,
}

/// One positional vCard quadruple `[name, params, type, value]` (spec §3.5).
/// Redaction (spec §4.6) mutates `value` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VcardField {
    pub name: String,
    pub params: Value,
    pub type_: String,
    pub value: Value,
}

/// A canonical entity record (spec §3.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub roles: Vec<String>,
    pub handle: Option<String>,
    pub vcard: Vec<VcardField>,
    pub nested_entities: Vec<CanonicalEntity>,
}

/// The object-class-specific payload (spec §3.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeSpecific {
    Domain {
        nameservers: Vec<String>,
        secure_dns: Option<bool>,
    },
    Ip {
        start_address: String,
        end_address: String,
        cidr: Option<String>,
        ip_version: Option<String>,
        ip_type: Option<String>,
    },
    Asn {
        start_autnum: u32,
        end_autnum: u32,
        name: Option<String>,
    },
    /// Entity and nameserver object classes have no type-specific payload
    /// beyond the common fields; this core's [`crate::orchestrator`] only
    /// ever requests domain/ip/autnum lookups (spec §1's non-goals exclude
    /// entity/nameserver lookups), so this variant is reachable only via a
    /// raw response that is itself an entity or nameserver at the top level.
    None,
}

/// How the server that answered this query was found (spec §3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveredVia {
    Bootstrap,
    Redirect,
    /// Reserved for a future direct-URL query surface; this core's `Target`
    /// (spec §3.1) has no such variant, so the orchestrator never produces
    /// this value today.
    Direct,
}

/// Provenance of a canonical response (spec §3.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSource {
    pub base_url: String,
    pub query: String,
    pub discovered_via: DiscoveredVia,
}

/// The canonical, registry-agnostic RDAP response (spec §3.4), the output
/// of normalization and the input/output of redaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub object_class: ObjectClass,
    pub handle: Option<String>,
    pub status: Vec<String>,
    pub events: Vec<CanonicalEvent>,
    pub entities: Vec<CanonicalEntity>,
    pub type_specific: TypeSpecific,
    pub source: ResponseSource,
    pub served_from_cache: bool,
    pub raw: Option<Value>,
}

/// Carries the context normalization needs but cannot derive from the raw
/// JSON alone: where the response came from and whether the caller asked
/// for the raw passthrough (spec §6.1's `include_raw` option).
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub source: ResponseSource,
    pub include_raw: bool,
}

/// Extracts a [`CanonicalResponse`] from a raw RDAP JSON body (spec §4.6).
/// Never performs I/O, never mutates `raw`.
pub fn normalize(raw: &Value, ctx: &QueryContext) -> Result<CanonicalResponse, RdapError> {
    let object_class = detect_object_class(raw)?;
    let mut seen = HashSet::new();
    normalize_with(raw, object_class, ctx, &mut seen)
}

fn normalize_with(
    raw: &Value,
    object_class: ObjectClass,
    ctx: &QueryContext,
    active_path: &mut HashSet<String>,
) -> Result<CanonicalResponse, RdapError> {
    let handle = raw.get("handle").and_then(Value::as_str).map(str::to_string);

    if let Some(h) = &handle {
        if !active_path.insert(h.clone()) {
            // Spec §9: a cycle (same handle seen on the active path) is
            // truncated with a ParseError rather than building a cyclic
            // structure.
            return Err(RdapError::Parse {
                field: "entities".to_string(),
                context: ErrorContext::new().cause(format!("cycle detected at handle {h}")),
            });
        }
    }

    let status = dedup_preserve_order(
        raw.get("status")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default(),
    );

    let events = raw
        .get("events")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(parse_event).collect())
        .unwrap_or_default();

    let entities = match raw.get("entities").and_then(Value::as_array) {
        Some(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for e in arr {
                out.push(normalize_entity(e, ctx, active_path)?);
            }
            out
        }
        None => Vec::new(),
    };

    let type_specific = match object_class {
        ObjectClass::Domain => {
            let nameservers = dedup_preserve_order(
                raw.get("nameservers")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(|n| n.get("ldhName").and_then(Value::as_str))
                            .map(|s| s.to_ascii_lowercase())
                            .collect()
                    })
                    .unwrap_or_default(),
            );
            let secure_dns = raw
                .get("secureDNS")
                .and_then(|s| s.get("delegationSigned"))
                .and_then(Value::as_bool);
            TypeSpecific::Domain { nameservers, secure_dns }
        }
        ObjectClass::IpNetwork => {
            let start_address = required_str(raw, "startAddress")?;
            let end_address = required_str(raw, "endAddress")?;
            TypeSpecific::Ip {
                start_address,
                end_address,
                cidr: raw.get("cidr0_cidrs").and_then(Value::as_array).and_then(|a| a.first())
                    .and_then(|c| c.get("v4prefix").or_else(|| c.get("v6prefix")))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                ip_version: raw.get("ipVersion").and_then(Value::as_str).map(str::to_string),
                ip_type: raw.get("type").and_then(Value::as_str).map(str::to_string),
            }
        }
        ObjectClass::Autnum => {
            let start_autnum = required_u32(raw, "startAutnum")?;
            let end_autnum = required_u32(raw, "endAutnum")?;
            TypeSpecific::Asn {
                start_autnum,
                end_autnum,
                name: raw.get("name").and_then(Value::as_str).map(str::to_string),
            }
        }
        ObjectClass::Nameserver | ObjectClass::Entity => TypeSpecific::None,
    };

    if let Some(h) = &handle {
        active_path.remove(h);
    }

    Ok(CanonicalResponse {
        object_class,
        handle,
        status,
        events,
        entities,
        type_specific,
        source: ctx.source.clone(),
        served_from_cache: false,
        raw: ctx.include_raw.then(|| raw.clone()),
    })
}

fn normalize_entity(
    raw: &Value,
    ctx: &QueryContext,
    active_path: &mut HashSet<String>,
) -> Result<CanonicalEntity, RdapError> {
    let handle = raw.get("handle").and_then(Value::as_str).map(str::to_string);
    if let Some(h) = &handle {
        if !active_path.insert(h.clone()) {
            return Err(RdapError::Parse {
                field: "entities".to_string(),
                context: ErrorContext::new().cause(format!("cycle detected at handle {h}")),
            });
        }
    }

    let roles = raw
        .get("roles")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let vcard = extract_vcard(raw);

    let nested_entities = match raw.get("entities").and_then(Value::as_array) {
        Some(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for e in arr {
                out.push(normalize_entity(e, ctx, active_path)?);
            }
            out
        }
        None => Vec::new(),
    };

    if let Some(h) = &handle {
        active_path.remove(h);
    }

    Ok(CanonicalEntity {
        roles,
        handle,
        vcard,
        nested_entities,
    })
}

/// Parses `vcardArray = ["vcard", [[name, params, type, value], ...]]`
/// (spec §3.5). A malformed entry (not a 4-element array) is skipped.
fn extract_vcard(raw: &Value) -> Vec<VcardField> {
    let Some(arr) = raw.get("vcardArray").and_then(Value::as_array) else {
        return Vec::new();
    };
    let Some(fields) = arr.get(1).and_then(Value::as_array) else {
        return Vec::new();
    };
    fields
        .iter()
        .filter_map(|f| {
            let f = f.as_array()?;
            if f.len() != 4 {
                return None;
            }
            Some(VcardField {
                name: f[0].as_str()?.to_string(),
                params: f[1].clone(),
                type_: f[2].as_str()?.to_string(),
                value: f[3].clone(),
            })
        })
        .collect()
}

fn parse_event(raw: &Value) -> Option<CanonicalEvent> {
    let action = raw.get("eventAction").and_then(Value::as_str)?.to_string();
    let date = raw
        .get("eventDate")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));
    let actor = raw.get("eventActor").and_then(Value::as_str).map(str::to_string);
    Some(CanonicalEvent { action, date, actor })
}

fn required_str(raw: &Value, field: &str) -> Result<String, RdapError> {
    raw.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RdapError::Parse {
            field: field.to_string(),
            context: ErrorContext::new(),
        })
}

fn required_u32(raw: &Value, field: &str) -> Result<u32, RdapError> {
    raw.get(field)
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .map(|n| n as u32)
        .ok_or_else(|| RdapError::Parse {
            field: field.to_string(),
            context: ErrorContext::new(),
        })
}

fn dedup_preserve_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Detects `object_class` per spec §4.6: `objectClassName` when present,
/// otherwise distinguishing fields, mirroring the teacher's
/// `RdapResponse::try_from(Value)` fallback chain.
fn detect_object_class(raw: &Value) -> Result<ObjectClass, RdapError> {
    if let Some(name) = raw.get("objectClassName").and_then(Value::as_str) {
        return match name {
            "domain" => Ok(ObjectClass::Domain),
            "ip network" => Ok(ObjectClass::IpNetwork),
            "autnum" => Ok(ObjectClass::Autnum),
            "nameserver" => Ok(ObjectClass::Nameserver),
            "entity" => Ok(ObjectClass::Entity),
            other => Err(RdapError::Parse {
                field: "objectClassName".to_string(),
                context: ErrorContext::new().cause(format!("unknown object class {other}")),
            }),
        };
    }
    if raw.get("nameservers").is_some() {
        return Ok(ObjectClass::Domain);
    }
    if raw.get("startAddress").is_some() && raw.get("endAddress").is_some() {
        return Ok(ObjectClass::IpNetwork);
    }
    if raw.get("startAutnum").is_some() && raw.get("endAutnum").is_some() {
        return Ok(ObjectClass::Autnum);
    }
    if raw.get("vcardArray").is_some() {
        return Ok(ObjectClass::Entity);
    }
    Err(RdapError::Parse {
        field: "objectClassName".to_string(),
        context: ErrorContext::new().cause("no objectClassName and no distinguishing fields"),
    })
}

#[cfg(test)]
fn test_context() -> QueryContext {
    QueryContext {
        source: ResponseSource {
            base_url: "https://rdap.example.com".to_string(),
            query: "https://rdap.example.com/domain/example.com".to_string(),
            discovered_via: DiscoveredVia::Bootstrap,
        },
        include_raw: false,
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn GIVEN_domain_response_WHEN_normalize_THEN_fields_extracted() {
        let raw = json!({
            "objectClassName": "domain",
            "handle": "EX-123",
            "status": ["active", "active"],
            "nameservers": [{"ldhName": "NS1.EXAMPLE.COM"}, {"ldhName": "ns2.example.com"}],
            "events": [{"eventAction": "registration", "eventDate": "1995-08-14T04:00:00Z"}]
        });
        let canonical = normalize(&raw, &test_context()).unwrap();
        assert_eq!(canonical.object_class, ObjectClass::Domain);
        assert_eq!(canonical.handle.as_deref(), Some("EX-123"));
        assert_eq!(canonical.status, vec!["active".to_string()]);
        match &canonical.type_specific {
            TypeSpecific::Domain { nameservers, .. } => {
                assert_eq!(nameservers, &vec!["ns1.example.com".to_string(), "ns2.example.com".to_string()]);
            }
            other => panic!("expected Domain, got {other:?}"),
        }
        assert_eq!(canonical.events.len(), 1);
        assert_eq!(canonical.events[0].action, "registration");
        assert!(canonical.events[0].date.is_some());
    }

    #[test]
    fn GIVEN_no_objectclassname_WHEN_distinguishing_fields_present_THEN_detected() {
        let raw = json!({"startAddress": "10.0.0.0", "endAddress": "10.0.255.255", "ipVersion": "v4"});
        let canonical = normalize(&raw, &test_context()).unwrap();
        assert_eq!(canonical.object_class, ObjectClass::IpNetwork);
    }

    #[test]
    fn GIVEN_unparseable_event_date_WHEN_normalize_THEN_event_kept_with_none_date() {
        let raw = json!({
            "objectClassName": "domain",
            "nameservers": [],
            "events": [{"eventAction": "registration", "eventDate": "not a date"}]
        });
        let canonical = normalize(&raw, &test_context()).unwrap();
        assert_eq!(canonical.events.len(), 1);
        assert!(canonical.events[0].date.is_none());
    }

    #[test]
    fn GIVEN_missing_required_field_WHEN_normalize_ip_THEN_parse_error() {
        let raw = json!({"objectClassName": "ip network", "startAddress": "10.0.0.0"});
        let err = normalize(&raw, &test_context()).unwrap_err();
        assert!(matches!(err, RdapError::Parse { .. }));
    }

    #[test]
    fn GIVEN_unknown_shape_WHEN_normalize_THEN_parse_error() {
        let raw = json!({"foo": "bar"});
        assert!(normalize(&raw, &test_context()).is_err());
    }

    #[test]
    fn GIVEN_entity_with_vcard_WHEN_normalize_THEN_quadruples_preserved() {
        let raw = json!({
            "objectClassName": "domain",
            "nameservers": [],
            "entities": [{
                "objectClassName": "entity",
                "roles": ["registrant"],
                "vcardArray": ["vcard", [
                    ["version", {}, "text", "4.0"],
                    ["email", {}, "text", "j@example.com"]
                ]]
            }]
        });
        let canonical = normalize(&raw, &test_context()).unwrap();
        assert_eq!(canonical.entities.len(), 1);
        assert_eq!(canonical.entities[0].roles, vec!["registrant".to_string()]);
        assert_eq!(canonical.entities[0].vcard.len(), 2);
        assert_eq!(canonical.entities[0].vcard[1].name, "email");
    }

    #[test]
    fn GIVEN_cyclic_handle_WHEN_normalize_THEN_parse_error() {
        // The top-level response and its single entity share handle "A";
        // both insert into the same active_path set, so the entity's insert
        // fails as an already-seen handle.
        let raw = json!({
            "objectClassName": "domain",
            "handle": "A",
            "nameservers": [],
            "entities": [{
                "objectClassName": "entity",
                "handle": "A",
                "roles": ["registrant"]
            }]
        });
        let err = normalize(&raw, &test_context()).unwrap_err();
        assert!(matches!(err, RdapError::Parse { .. }));
    }
}

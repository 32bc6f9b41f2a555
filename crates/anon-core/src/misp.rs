//! Mapping of anonymized events to MISP event documents.
//!
//! Only the document is produced here; publishing it to a MISP instance is
//! left to whoever consumes the output stream.

use anon_redact::{Event, FieldValue};
use serde_json::{json, Map, Value};

/// Tag namespace for alarm categories.
pub const TAG_NAMESPACE: &str = "xl-siem";

const ANALYSIS_COMPLETED: u8 = 2;
const THREAT_LEVEL_HIGH: u8 = 1;
const DISTRIBUTION_ORGANIZATION_ONLY: u8 = 0;

/// Plain attributes: (field, MISP category, comment).
const SIMPLE_ATTRIBUTES: &[(&str, &str, &str)] = &[
    ("RISK", "External analysis", "Risk value evaluated by XL-SIEM"),
    ("PRIORITY", "External analysis", "Priority value evaluated by XL-SIEM"),
    (
        "ORGANIZATION",
        "Internal reference",
        "Organization where the XL-SIEM Agent has been deployed",
    ),
    ("USERNAME", "Person", "Username associated with the detected event"),
    ("RELIABILITY", "External analysis", "Reliability value evaluated by XL-SIEM"),
];

/// Number of free-form `USERDATAn` fields.
const USERDATA_FIELDS: usize = 9;

/// Whether a value is a dotted-quad IPv4 address.
pub fn is_ipv4(value: &str) -> bool {
    let octets: Vec<&str> = value.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|octet| {
            !octet.is_empty()
                && octet.bytes().all(|b| b.is_ascii_digit())
                && octet.parse::<u32>().is_ok_and(|n| n <= 255)
        })
}

/// Convert an anonymized event into a MISP `{"Event": {...}}` document.
pub fn to_misp_event(event: &Event) -> Value {
    let mut fields = Map::new();

    if let Some(info) = present(event, "SID_NAME") {
        fields.insert("info".into(), info);
    }
    fields.insert("analysis".into(), json!(ANALYSIS_COMPLETED));
    fields.insert("threat_level_id".into(), json!(THREAT_LEVEL_HIGH));
    fields.insert("distribution".into(), json!(DISTRIBUTION_ORGANIZATION_ONLY));
    if let Some(date) = text(event, "DATE").and_then(|d| d.split_whitespace().next().map(str::to_string)) {
        fields.insert("date".into(), json!(date));
    }

    let mut attributes = Vec::new();
    endpoint_attributes(event, Endpoint::Source, &mut attributes);
    endpoint_attributes(event, Endpoint::Destination, &mut attributes);

    for (field, category, comment) in SIMPLE_ATTRIBUTES {
        if let Some(value) = present(event, field) {
            attributes.push(attribute(category, "other", value, comment));
        }
    }

    for n in 1..=USERDATA_FIELDS {
        let field = format!("USERDATA{}", n);
        if let Some(value) = present(event, &field) {
            attributes.push(attribute("Other", "other", value, &format!("Userdata{}", n)));
        }
    }
    fields.insert("Attribute".into(), Value::Array(attributes));

    let mut tags = Vec::new();
    if let Some(category) = text(event, "CATEGORY").filter(|c| !c.is_empty()) {
        tags.push(tag("category", &category, "#0000FF"));
    }
    if let Some(subcategory) = text(event, "SUBCATEGORY").filter(|c| !c.is_empty()) {
        tags.push(tag("sub-category", &subcategory, "#00FFFF"));
    }
    fields.insert("Tag".into(), Value::Array(tags));

    json!({ "Event": fields })
}

#[derive(Clone, Copy)]
enum Endpoint {
    Source,
    Destination,
}

/// IP (and port) attributes for one side of the connection.
///
/// A valid IPv4 address with a port becomes one `ip-src|port` /
/// `ip-dst|port` composite; otherwise the port gets its own attribute.
fn endpoint_attributes(event: &Event, endpoint: Endpoint, out: &mut Vec<Value>) {
    let (ip_field, port_field) = match endpoint {
        Endpoint::Source => ("SRC_IP", "SRC_PORT"),
        Endpoint::Destination => ("DST_IP", "DST_PORT"),
    };
    let Some(ip) = present(event, ip_field) else {
        return;
    };
    let ip_text = text(event, ip_field).unwrap_or_default();
    let port = present(event, port_field);

    let ip_attribute = match (&port, endpoint) {
        (Some(_), _) if is_ipv4(&ip_text) => {
            let port_text = text(event, port_field).unwrap_or_default();
            let (kind, comment) = match endpoint {
                Endpoint::Source => ("ip-src|port", "Source IP and port associated to the detected alarm."),
                Endpoint::Destination => (
                    "ip-dst|port",
                    "Destination IP and port associated to the detected alarm.",
                ),
            };
            attribute(
                "Network activity",
                kind,
                json!(format!("{}|{}", ip_text, port_text)),
                comment,
            )
        }
        (port, Endpoint::Source) => {
            if let Some(port) = port {
                out.push(attribute(
                    "Network activity",
                    "port",
                    port.clone(),
                    "Source Port associated to the detected alarm.",
                ));
            }
            attribute(
                "Network activity",
                "other",
                ip,
                "Source IP associated to the detected alarm.",
            )
        }
        (port, Endpoint::Destination) => {
            if let Some(port) = port {
                out.push(attribute(
                    "Targeting data",
                    "target-location",
                    port.clone(),
                    "Destination Port associated to the detected alarm.",
                ));
            }
            attribute(
                "Targeting data",
                "target-machine",
                ip,
                "Destination IP associated to the detected alarm.",
            )
        }
    };
    out.push(ip_attribute);
}

fn attribute(category: &str, kind: &str, value: Value, comment: &str) -> Value {
    json!({
        "category": category,
        "type": kind,
        "to_ids": false,
        "value": value,
        "comment": comment,
        "disable_correlation": true,
    })
}

fn tag(name: &str, value: &str, colour: &str) -> Value {
    let normalized = value.to_lowercase().replace('_', "-");
    json!({
        "name": format!("{}:{}=\"{}\"", TAG_NAMESPACE, name, normalized),
        "colour": colour,
        "exportable": false,
    })
}

/// A non-empty scalar field as JSON.
fn present(event: &Event, field: &str) -> Option<Value> {
    match event.get(field)? {
        FieldValue::Text(s) if !s.is_empty() => Some(json!(s)),
        FieldValue::Number(n) if n.as_f64() != Some(0.0) => Some(Value::Number(n.clone())),
        FieldValue::Bool(true) => Some(json!(true)),
        _ => None,
    }
}

fn text(event: &Event, field: &str) -> Option<String> {
    event
        .get(field)
        .and_then(FieldValue::scalar_text)
        .map(|t| t.into_owned())
}

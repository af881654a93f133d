use crate::icao::Icao;
use serde_json::Value;
use tracing::trace;

/// Upstream item shape, decided once at the boundary. Downstream parsing is
/// total over these two variants instead of sniffing fields ad hoc.
#[derive(Debug, Clone, PartialEq)]
pub enum RawNotam {
    /// Primary provider: pre-structured object with named fields (several
    /// naming conventions in the wild, already collapsed here).
    Structured(StructuredFields),
    /// Secondary provider: one block of ICAO-format encoded text.
    Freeform { text: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredFields {
    pub number: Option<String>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub issued: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub q_line: Option<String>,
}

/// Field names that mark an object as a plausible notice item.
const NOTICE_FIELDS: &[&str] = &[
    "id", "notamId", "number", "text", "raw", "message", "summary", "start", "end", "issued",
    "site", "icao",
];

fn looks_like_notice(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| NOTICE_FIELDS.iter().any(|f| obj.contains_key(*f)))
}

type Extractor = fn(&Value, &Icao) -> Option<Vec<Value>>;

/// Ordered extraction strategies for locating the record list inside an
/// upstream payload. The first match wins.
const EXTRACTORS: &[(&str, Extractor)] = &[
    ("top-level-array", |v, _| v.as_array().cloned()),
    ("alpha", |v, _| v.get("alpha")?.as_array().cloned()),
    ("notams", |v, _| v.get("notams")?.as_array().cloned()),
    ("data", |v, _| v.get("data")?.as_array().cloned()),
    ("report", |v, _| {
        let report = v.get("report")?;
        if let Some(items) = report.get("notams").and_then(Value::as_array) {
            return Some(items.clone());
        }
        if let Some(items) = report.get("alpha").and_then(Value::as_array) {
            return Some(items.clone());
        }
        report.is_object().then(|| vec![report.clone()])
    }),
    ("keyed-by-site", |v, code| {
        let site = v.get(code.as_str())?;
        if let Some(items) = site.as_array() {
            return Some(items.clone());
        }
        site.get("notams")?.as_array().cloned()
    }),
    ("first-notice-like-array", |v, _| {
        v.as_object()?.values().find_map(|candidate| {
            let items = candidate.as_array()?;
            looks_like_notice(items.first()?).then(|| items.clone())
        })
    }),
];

/// Locate the list of raw notice items inside an arbitrary upstream payload.
/// Returns an empty list when no strategy matches.
pub fn extract_items(payload: &Value, code: &Icao) -> Vec<Value> {
    for (name, extract) in EXTRACTORS {
        if let Some(items) = extract(payload, code) {
            trace!(strategy = name, count = items.len(), "extracted notice items");
            return items;
        }
    }
    Vec::new()
}

/// Decide which shape one raw item is. Returns `None` for items carrying
/// nothing recognizable; the caller drops those and keeps the batch going.
pub fn classify_raw(item: &Value) -> Option<RawNotam> {
    let obj = item.as_object()?;

    // Freeform text block, possibly a nested JSON string with language
    // variants. The English variant is preferred over the raw text.
    for field in ["raw", "text", "message", "fullText"] {
        if let Some(text) = obj.get(field).and_then(Value::as_str) {
            let text = unwrap_language_variants(text);
            if !text.trim().is_empty() {
                return Some(RawNotam::Freeform { text });
            }
        }
    }

    let fields = StructuredFields {
        number: first_string(obj, &["number", "notamId"]),
        valid_from: first_string(obj, &["validFrom", "effectiveStart", "start"]),
        valid_to: first_string(obj, &["validTo", "effectiveEnd", "end"]),
        issued: first_string(obj, &["issued", "issuedDate"]),
        summary: first_string(obj, &["summary", "simpleText"]),
        body: first_string(obj, &["body"]),
        q_line: first_string(obj, &["qLine"]),
    };

    if fields == StructuredFields::default() {
        return None;
    }
    Some(RawNotam::Structured(fields))
}

fn unwrap_language_variants(text: &str) -> String {
    if let Ok(nested) = serde_json::from_str::<Value>(text)
        && nested.is_object()
    {
        for field in ["english", "raw"] {
            if let Some(inner) = nested.get(field).and_then(Value::as_str)
                && !inner.trim().is_empty()
            {
                return inner.to_string();
            }
        }
    }
    text.to_string()
}

fn first_string(obj: &serde_json::Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|f| {
        obj.get(*f)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cyyz() -> Icao {
        "CYYZ".parse().unwrap()
    }

    #[test]
    fn extracts_from_top_level_array() {
        let payload = json!([{ "raw": "E) RWY CLSD" }]);
        assert_eq!(extract_items(&payload, &cyyz()).len(), 1);
    }

    #[test]
    fn extracts_from_named_keys_in_order() {
        let payload = json!({ "alpha": [{ "text": "A" }], "data": [{ "text": "B" }, { "text": "C" }] });
        let items = extract_items(&payload, &cyyz());
        assert_eq!(items.len(), 1, "alpha should win over data");
    }

    #[test]
    fn extracts_single_report_object() {
        let payload = json!({ "report": { "raw": "E) TWY CLSD" } });
        assert_eq!(extract_items(&payload, &cyyz()).len(), 1);
    }

    #[test]
    fn extracts_items_keyed_by_site() {
        let payload = json!({ "CYYZ": { "notams": [{ "raw": "X" }, { "raw": "Y" }] } });
        assert_eq!(extract_items(&payload, &cyyz()).len(), 2);
    }

    #[test]
    fn falls_back_to_first_notice_like_array() {
        let payload = json!({
            "meta": { "elapsed": 12 },
            "stuff": [1, 2, 3],
            "entries": [{ "site": "CYYZ", "raw": "E) FUEL U/S" }]
        });
        assert_eq!(extract_items(&payload, &cyyz()).len(), 1);
    }

    #[test]
    fn unmatched_payload_yields_empty() {
        assert!(extract_items(&json!({ "hello": "world" }), &cyyz()).is_empty());
        assert!(extract_items(&json!(null), &cyyz()).is_empty());
    }

    #[test]
    fn classifies_freeform_with_nested_language_variants() {
        let item = json!({
            "raw": "{\"english\": \"E) RWY 05 CLSD\", \"french\": \"E) PISTE 05 FERMEE\"}"
        });
        match classify_raw(&item) {
            Some(RawNotam::Freeform { text }) => assert_eq!(text, "E) RWY 05 CLSD"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn classifies_structured_with_fallback_names() {
        let item = json!({
            "notamId": "A1234/24",
            "effectiveStart": "2024-01-01T12:00:00Z",
            "body": "RWY 05 CLSD"
        });
        match classify_raw(&item) {
            Some(RawNotam::Structured(f)) => {
                assert_eq!(f.number.as_deref(), Some("A1234/24"));
                assert_eq!(f.valid_from.as_deref(), Some("2024-01-01T12:00:00Z"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unrecognizable_items_classify_to_none() {
        assert_eq!(classify_raw(&json!({ "colour": "blue" })), None);
        assert_eq!(classify_raw(&json!("just a string")), None);
        assert_eq!(classify_raw(&json!(42)), None);
    }
}

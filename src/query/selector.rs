//! Selector Expressions
//!
//! A selector is a structured filter over JSON documents, written in the
//! CouchDB/Mango style used by ledger rich queries:
//!
//! ```json
//! {"selector": {"actorId": "WINEPRODUCER01", "productCategory": {"$in": ["Malvasia", "Teran"]}}}
//! ```
//!
//! Selectors are parsed into a predicate tree and evaluated in process. Values
//! are always held as data, so building a selector from caller input never
//! changes its shape.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Rejected selector text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid selector: {0}")]
pub struct SelectorError(pub String);

/// Record fields addressable by the convenience queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchField {
    ActorId,
    ProductCategory,
}

impl BatchField {
    /// Field name in the stored document
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchField::ActorId => "actorId",
            BatchField::ProductCategory => "productCategory",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    All(Vec<Node>),
    Any(Vec<Node>),
    Not(Box<Node>),
    Field { path: Vec<String>, condition: Condition },
}

/// A parsed selector expression
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    root: Node,
}

impl Selector {
    /// Selector matching every document
    pub fn all() -> Self {
        Self { root: Node::All(Vec::new()) }
    }

    /// Equality on a single top-level field
    pub fn field_eq(field: BatchField, value: &str) -> Self {
        Self {
            root: Node::Field {
                path: vec![field.as_str().to_string()],
                condition: Condition::Eq(Value::String(value.to_string())),
            },
        }
    }

    /// Parse selector text
    ///
    /// Accepts either the query envelope `{"selector": {...}}` or a bare
    /// predicate object.
    pub fn parse(text: &str) -> Result<Self, SelectorError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| SelectorError(format!("malformed JSON: {}", e)))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, SelectorError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SelectorError("selector must be a JSON object".to_string()))?;

        let predicate = match obj.get("selector") {
            Some(inner) => {
                // Envelope keys other than `selector` (sort, fields, limit, ...) are not supported
                if let Some(extra) = obj.keys().find(|k| k.as_str() != "selector") {
                    return Err(SelectorError(format!("unsupported query option: {}", extra)));
                }
                inner
                    .as_object()
                    .ok_or_else(|| SelectorError("selector must be a JSON object".to_string()))?
            }
            None => obj,
        };

        Ok(Self { root: parse_object(predicate, &[])? })
    }

    /// Evaluate the selector against a document
    pub fn matches(&self, doc: &Value) -> bool {
        eval(&self.root, doc)
    }

    /// Evaluate against raw stored bytes; non-JSON documents never match
    pub fn matches_bytes(&self, bytes: &[u8]) -> bool {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(doc) => self.matches(&doc),
            Err(_) => false,
        }
    }

    /// Canonical query envelope for this selector
    pub fn to_json(&self) -> Value {
        let mut envelope = Map::new();
        envelope.insert("selector".to_string(), render(&self.root));
        Value::Object(envelope)
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn parse_object(obj: &Map<String, Value>, prefix: &[String]) -> Result<Node, SelectorError> {
    let mut nodes = Vec::with_capacity(obj.len());
    for (key, value) in obj {
        if let Some(op) = key.strip_prefix('$') {
            nodes.push(parse_combinator(op, value, prefix)?);
        } else {
            let mut path = prefix.to_vec();
            path.extend(key.split('.').map(str::to_string));
            nodes.push(parse_field(path, value)?);
        }
    }

    if nodes.len() == 1 {
        Ok(nodes.remove(0))
    } else {
        Ok(Node::All(nodes))
    }
}

fn parse_combinator(op: &str, value: &Value, prefix: &[String]) -> Result<Node, SelectorError> {
    match op {
        "and" | "or" => {
            let items = value
                .as_array()
                .ok_or_else(|| SelectorError(format!("${} expects an array", op)))?;
            let children = items
                .iter()
                .map(|item| {
                    item.as_object()
                        .ok_or_else(|| SelectorError(format!("${} members must be objects", op)))
                        .and_then(|obj| parse_object(obj, prefix))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if op == "and" { Node::All(children) } else { Node::Any(children) })
        }
        "not" => {
            let obj = value
                .as_object()
                .ok_or_else(|| SelectorError("$not expects an object".to_string()))?;
            Ok(Node::Not(Box::new(parse_object(obj, prefix)?)))
        }
        other => Err(SelectorError(format!("unknown operator: ${}", other))),
    }
}

fn parse_field(path: Vec<String>, value: &Value) -> Result<Node, SelectorError> {
    let obj = match value {
        Value::Object(obj) if !obj.is_empty() => obj,
        // Scalars, arrays and `{}` are implicit equality
        other => {
            return Ok(Node::Field { path, condition: Condition::Eq(other.clone()) });
        }
    };

    if obj.keys().all(|k| !k.starts_with('$')) {
        // Nested field selector: {"a": {"b": 1}} is a.b == 1
        return parse_object(obj, &path);
    }
    if let Some(bad) = obj.keys().find(|k| !k.starts_with('$')) {
        return Err(SelectorError(format!(
            "cannot mix operators and field names under {}: {}",
            path.join("."),
            bad
        )));
    }

    let mut nodes = Vec::with_capacity(obj.len());
    for (key, operand) in obj {
        let node = match key.as_str() {
            "$not" => Node::Not(Box::new(parse_field(path.clone(), operand)?)),
            op => Node::Field { path: path.clone(), condition: parse_condition(op, operand)? },
        };
        nodes.push(node);
    }

    if nodes.len() == 1 {
        Ok(nodes.remove(0))
    } else {
        Ok(Node::All(nodes))
    }
}

fn parse_condition(op: &str, operand: &Value) -> Result<Condition, SelectorError> {
    let list = |name: &str| {
        operand
            .as_array()
            .cloned()
            .ok_or_else(|| SelectorError(format!("{} expects an array", name)))
    };

    Ok(match op {
        "$eq" => Condition::Eq(operand.clone()),
        "$ne" => Condition::Ne(operand.clone()),
        "$gt" => Condition::Gt(operand.clone()),
        "$gte" => Condition::Gte(operand.clone()),
        "$lt" => Condition::Lt(operand.clone()),
        "$lte" => Condition::Lte(operand.clone()),
        "$in" => Condition::In(list(op)?),
        "$nin" => Condition::Nin(list(op)?),
        "$exists" => Condition::Exists(
            operand
                .as_bool()
                .ok_or_else(|| SelectorError("$exists expects a boolean".to_string()))?,
        ),
        other => return Err(SelectorError(format!("unknown operator: {}", other))),
    })
}

fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |current, segment| current.as_object()?.get(segment))
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn eval(node: &Node, doc: &Value) -> bool {
    match node {
        Node::All(children) => children.iter().all(|child| eval(child, doc)),
        Node::Any(children) => children.iter().any(|child| eval(child, doc)),
        Node::Not(child) => !eval(child, doc),
        Node::Field { path, condition } => {
            let field = lookup(doc, path);
            match (condition, field) {
                (Condition::Exists(expected), field) => field.is_some() == *expected,
                // Every other condition requires the field to be present
                (_, None) => false,
                (Condition::Eq(expected), Some(actual)) => actual == expected,
                (Condition::Ne(expected), Some(actual)) => actual != expected,
                (Condition::Gt(bound), Some(actual)) => compare(actual, bound) == Some(Ordering::Greater),
                (Condition::Gte(bound), Some(actual)) => {
                    matches!(compare(actual, bound), Some(Ordering::Greater | Ordering::Equal))
                }
                (Condition::Lt(bound), Some(actual)) => compare(actual, bound) == Some(Ordering::Less),
                (Condition::Lte(bound), Some(actual)) => {
                    matches!(compare(actual, bound), Some(Ordering::Less | Ordering::Equal))
                }
                (Condition::In(options), Some(actual)) => options.contains(actual),
                (Condition::Nin(options), Some(actual)) => !options.contains(actual),
            }
        }
    }
}

fn render(node: &Node) -> Value {
    match node {
        Node::All(children) => {
            let mut obj = Map::new();
            obj.insert("$and".to_string(), Value::Array(children.iter().map(render).collect()));
            Value::Object(obj)
        }
        Node::Any(children) => {
            let mut obj = Map::new();
            obj.insert("$or".to_string(), Value::Array(children.iter().map(render).collect()));
            Value::Object(obj)
        }
        Node::Not(child) => {
            let mut obj = Map::new();
            obj.insert("$not".to_string(), render(child));
            Value::Object(obj)
        }
        Node::Field { path, condition } => {
            let (op, operand) = match condition {
                Condition::Eq(v) => ("$eq", v.clone()),
                Condition::Ne(v) => ("$ne", v.clone()),
                Condition::Gt(v) => ("$gt", v.clone()),
                Condition::Gte(v) => ("$gte", v.clone()),
                Condition::Lt(v) => ("$lt", v.clone()),
                Condition::Lte(v) => ("$lte", v.clone()),
                Condition::In(vs) => ("$in", Value::Array(vs.clone())),
                Condition::Nin(vs) => ("$nin", Value::Array(vs.clone())),
                Condition::Exists(b) => ("$exists", Value::Bool(*b)),
            };
            let mut inner = Map::new();
            inner.insert(op.to_string(), operand);
            let mut obj = Map::new();
            obj.insert(path.join("."), Value::Object(inner));
            Value::Object(obj)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn barrel(actor: &str, category: &str) -> Value {
        json!({
            "id": "b1",
            "batchId": "BARREL0001",
            "actorId": actor,
            "step": "FERMENTATION",
            "productName": "Malvasia DOC",
            "productCategory": category,
            "timestamp": "2024-05-01T10:00:00Z",
            "parentBatches": ["GRAPES0001"],
            "attachmentRefs": [],
            "meta": {"vintage": 2021}
        })
    }

    #[test]
    fn test_envelope_and_bare_forms_are_equivalent() {
        let wrapped = Selector::parse(r#"{"selector":{"actorId":"WINEPRODUCER01"}}"#).unwrap();
        let bare = Selector::parse(r#"{"actorId":"WINEPRODUCER01"}"#).unwrap();
        assert_eq!(wrapped, bare);
        assert!(wrapped.matches(&barrel("WINEPRODUCER01", "Malvasia")));
        assert!(!wrapped.matches(&barrel("BOTTLER02", "Malvasia")));
    }

    #[test]
    fn test_field_eq_value_is_never_interpreted() {
        // A value crafted to widen the filter if it were spliced into text
        let hostile = r#"x"},"productCategory":{"$ne":""#;
        let selector = Selector::field_eq(BatchField::ActorId, hostile);

        assert!(!selector.matches(&barrel("WINEPRODUCER01", "Malvasia")));
        assert!(selector.matches(&barrel(hostile, "Malvasia")));

        // The rendered form round-trips to the same single predicate
        let reparsed = Selector::parse(&selector.to_string()).unwrap();
        assert_eq!(reparsed, selector);
    }

    #[test]
    fn test_operator_values_are_literals_in_field_eq() {
        let selector = Selector::field_eq(BatchField::ProductCategory, "$gt");
        assert!(!selector.matches(&barrel("A", "Malvasia")));
        assert!(selector.matches(&barrel("A", "$gt")));
    }

    #[test]
    fn test_operators() {
        let doc = barrel("WINEPRODUCER01", "Malvasia");

        let cases = [
            (r#"{"productCategory":{"$in":["Teran","Malvasia"]}}"#, true),
            (r#"{"productCategory":{"$nin":["Teran","Malvasia"]}}"#, false),
            (r#"{"actorId":{"$ne":"BOTTLER02"}}"#, true),
            (r#"{"timestamp":{"$gte":"2024-01-01","$lt":"2025-01-01"}}"#, true),
            (r#"{"meta.vintage":{"$gt":2020}}"#, true),
            (r#"{"meta":{"vintage":2019}}"#, false),
            (r#"{"missing":{"$exists":false}}"#, true),
            (r#"{"missing":{"$ne":"x"}}"#, false),
            (r#"{"$or":[{"actorId":"BOTTLER02"},{"step":"FERMENTATION"}]}"#, true),
            (r#"{"$and":[{"actorId":"BOTTLER02"},{"step":"FERMENTATION"}]}"#, false),
            (r#"{"$not":{"actorId":"BOTTLER02"}}"#, true),
            (r#"{"parentBatches":["GRAPES0001"]}"#, true),
            (r#"{}"#, true),
        ];

        for (text, expected) in cases {
            let selector = Selector::parse(text).unwrap();
            assert_eq!(selector.matches(&doc), expected, "selector {}", text);
        }
    }

    #[test]
    fn test_rejects_invalid_selectors() {
        let bad = [
            "not json",
            "[]",
            r#"{"selector":"actorId"}"#,
            r#"{"actorId":{"$regex":"^W"}}"#,
            r#"{"$xor":[]}"#,
            r#"{"$or":{"actorId":"A"}}"#,
            r#"{"productCategory":{"$in":"Malvasia"}}"#,
            r#"{"actorId":{"$eq":"A","name":"B"}}"#,
            r#"{"selector":{},"limit":5}"#,
        ];
        for text in bad {
            assert!(Selector::parse(text).is_err(), "accepted {}", text);
        }
    }

    #[test]
    fn test_non_json_documents_never_match() {
        assert!(!Selector::all().matches_bytes(b"\x00\x01binary"));
        assert!(Selector::all().matches_bytes(br#"{"id":"x"}"#));
    }
}

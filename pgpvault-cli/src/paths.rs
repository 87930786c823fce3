use std::collections::BTreeMap;
use std::fmt;

use pgpvault_core::{
    CreateKeyRequest, IdentityDescriptor, KeySource, ValidationError, VaultError,
};
use pgpvault_pgp::KeyService;
use serde_json::{Map, Value, json};

const HELP_SYNOPSIS: &str = "Manage named OpenPGP keys";
const HELP_DESCRIPTION: &str = "\
This path is used to manage the named OpenPGP keys that are available.
Writing a new named key with no key value generates it from random
material; writing with generate=false imports an armored private key.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::List => "list",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Int { default: i64 },
    Bool { default: bool },
}

#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Bool(bool),
}

/// Request fields coerced to their schema types, defaults filled in.
#[derive(Debug, Default)]
pub struct FieldData {
    values: BTreeMap<&'static str, FieldValue>,
}

impl FieldData {
    pub fn parse(schema: &[FieldSchema], raw: &Map<String, Value>) -> Result<Self, ValidationError> {
        if let Some(unknown) = raw
            .keys()
            .find(|key| !schema.iter().any(|field| field.name == key.as_str()))
        {
            return Err(ValidationError::UnknownField(unknown.clone()));
        }

        let mut values = BTreeMap::new();
        for field in schema {
            let value = match raw.get(field.name) {
                Some(value) => coerce(field, value)?,
                None => match field.kind {
                    FieldKind::String => FieldValue::String(String::new()),
                    FieldKind::Int { default } => FieldValue::Int(default),
                    FieldKind::Bool { default } => FieldValue::Bool(default),
                },
            };
            values.insert(field.name, value);
        }
        Ok(Self { values })
    }

    pub fn string(&self, name: &str) -> &str {
        match self.values.get(name) {
            Some(FieldValue::String(value)) => value,
            _ => "",
        }
    }

    pub fn int(&self, name: &str) -> i64 {
        match self.values.get(name) {
            Some(FieldValue::Int(value)) => *value,
            _ => 0,
        }
    }

    pub fn bool(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(FieldValue::Bool(true)))
    }
}

fn coerce(field: &FieldSchema, value: &Value) -> Result<FieldValue, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidField {
        field: field.name.to_string(),
        reason: reason.to_string(),
    };
    match field.kind {
        FieldKind::String => match value {
            Value::String(s) => Ok(FieldValue::String(s.clone())),
            _ => Err(invalid("expected a string")),
        },
        FieldKind::Int { .. } => match value {
            Value::Number(n) => n
                .as_i64()
                .map(FieldValue::Int)
                .ok_or_else(|| invalid("expected an integer")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(FieldValue::Int)
                .map_err(|_| invalid("expected an integer")),
            _ => Err(invalid("expected an integer")),
        },
        FieldKind::Bool { .. } => match value {
            Value::Bool(b) => Ok(FieldValue::Bool(*b)),
            Value::String(s) => match s.as_str() {
                "true" | "1" => Ok(FieldValue::Bool(true)),
                "false" | "0" => Ok(FieldValue::Bool(false)),
                _ => Err(invalid("expected a boolean")),
            },
            _ => Err(invalid("expected a boolean")),
        },
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub operation: Operation,
    pub path: String,
    pub data: Map<String, Value>,
}

impl Request {
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Success without a payload, or a read of a missing key.
    Empty,
    Data(Value),
    /// A caller error, reported back instead of failing the request.
    Error(String),
}

impl Response {
    fn error(message: impl fmt::Display) -> Self {
        Response::Error(message.to_string())
    }
}

type Handler = fn(&KeyService, &str, &FieldData) -> Result<Response, VaultError>;

enum PathPattern {
    /// `prefix` alone, with or without a trailing slash.
    Collection(&'static str),
    /// `prefix/<name>`; the name is validated by the service.
    Named(&'static str),
}

impl PathPattern {
    fn capture<'a>(&self, path: &'a str) -> Option<&'a str> {
        match self {
            PathPattern::Collection(prefix) => {
                let rest = path.strip_prefix(prefix)?;
                (rest.is_empty() || rest == "/").then_some("")
            }
            PathPattern::Named(prefix) => {
                let name = path.strip_prefix(prefix)?.strip_prefix('/')?;
                (!name.is_empty()).then_some(name)
            }
        }
    }

    fn display(&self) -> String {
        match self {
            PathPattern::Collection(prefix) => format!("{prefix}/"),
            PathPattern::Named(prefix) => format!("{prefix}/<name>"),
        }
    }
}

struct Route {
    pattern: PathPattern,
    operations: Vec<(Operation, Handler)>,
    fields: Vec<FieldSchema>,
}

/// Ordered route table in front of a [`KeyService`].
pub struct Router {
    service: KeyService,
    routes: Vec<Route>,
}

impl Router {
    pub fn new(service: KeyService) -> Self {
        let default_bits = i64::try_from(service.config().default_key_bits).unwrap_or(i64::MAX);
        let routes = vec![
            Route {
                pattern: PathPattern::Collection("keys"),
                operations: vec![(Operation::List, list_keys as Handler)],
                fields: Vec::new(),
            },
            Route {
                pattern: PathPattern::Named("keys"),
                operations: vec![
                    (Operation::Read, read_key as Handler),
                    (Operation::Update, create_key as Handler),
                    (Operation::Delete, delete_key as Handler),
                ],
                fields: key_fields(default_bits),
            },
        ];
        Self { service, routes }
    }

    /// Dispatches a request. Caller errors come back as [`Response::Error`];
    /// storage and codec failures are returned as `Err`.
    pub fn handle(&self, request: &Request) -> Result<Response, VaultError> {
        let Some((route, name)) = self
            .routes
            .iter()
            .find_map(|route| route.pattern.capture(&request.path).map(|name| (route, name)))
        else {
            return Ok(Response::error("unsupported path"));
        };

        let Some((_, handler)) = route
            .operations
            .iter()
            .find(|(operation, _)| *operation == request.operation)
        else {
            return Ok(Response::error(format!(
                "unsupported operation {} on {}",
                request.operation, request.path
            )));
        };

        let fields = match FieldData::parse(&route.fields, &request.data) {
            Ok(fields) => fields,
            Err(err) => return Ok(Response::error(err)),
        };

        match handler(&self.service, name, &fields) {
            Err(err) if err.is_caller_error() => Ok(Response::error(err)),
            other => other,
        }
    }

    pub fn help(&self) -> String {
        let mut out = format!("{HELP_SYNOPSIS}\n\n{HELP_DESCRIPTION}\n");
        for route in &self.routes {
            let ops: Vec<String> = route.operations.iter().map(|(op, _)| op.to_string()).collect();
            out.push_str(&format!("\n{} ({})\n", route.pattern.display(), ops.join(", ")));
            for field in &route.fields {
                let (ty, default) = match &field.kind {
                    FieldKind::String => ("string", String::new()),
                    FieldKind::Int { default } => ("int", format!(", default {default}")),
                    FieldKind::Bool { default } => ("bool", format!(", default {default}")),
                };
                out.push_str(&format!(
                    "  {} ({ty}{default})\n      {}\n",
                    field.name, field.description
                ));
            }
        }
        out
    }
}

fn key_fields(default_bits: i64) -> Vec<FieldSchema> {
    vec![
        FieldSchema {
            name: "real_name",
            kind: FieldKind::String,
            description: "Real name of the identity on a generated key. Must not contain any of \"()<>\\0\".",
        },
        FieldSchema {
            name: "email",
            kind: FieldKind::String,
            description: "Email of the identity on a generated key. Must not contain any of \"()<>\\0\".",
        },
        FieldSchema {
            name: "comment",
            kind: FieldKind::String,
            description: "Comment of the identity on a generated key. Must not contain any of \"()<>\\0\".",
        },
        FieldSchema {
            name: "key_bits",
            kind: FieldKind::Int {
                default: default_bits,
            },
            description: "RSA modulus size of a generated key. Only used if generate is true.",
        },
        FieldSchema {
            name: "key",
            kind: FieldKind::String,
            description: "ASCII-armored private key to import. Only used if generate is false.",
        },
        FieldSchema {
            name: "exportable",
            kind: FieldKind::Bool { default: false },
            description: "Marks the key as exportable.",
        },
        FieldSchema {
            name: "generate",
            kind: FieldKind::Bool { default: true },
            description: "Generate the key here rather than import one supplied by the caller.",
        },
    ]
}

fn list_keys(service: &KeyService, _name: &str, _fields: &FieldData) -> Result<Response, VaultError> {
    Ok(Response::Data(json!({ "keys": service.list()? })))
}

fn read_key(service: &KeyService, name: &str, _fields: &FieldData) -> Result<Response, VaultError> {
    Ok(match service.read(name)? {
        Some(info) => Response::Data(json!({
            "fingerprint": info.fingerprint,
            "public_key": info.public_key,
            "exportable": info.exportable,
        })),
        None => Response::Empty,
    })
}

fn create_key(service: &KeyService, name: &str, fields: &FieldData) -> Result<Response, VaultError> {
    let source = if fields.bool("generate") {
        let key_bits = usize::try_from(fields.int("key_bits")).map_err(|_| {
            ValidationError::InvalidField {
                field: "key_bits".to_string(),
                reason: "must not be negative".to_string(),
            }
        })?;
        KeySource::Generate {
            identity: IdentityDescriptor::new(
                fields.string("real_name"),
                fields.string("comment"),
                fields.string("email"),
            ),
            key_bits,
        }
    } else {
        KeySource::Import {
            armored: fields.string("key").to_string(),
        }
    };
    service.create(
        name,
        CreateKeyRequest {
            source,
            exportable: fields.bool("exportable"),
        },
    )?;
    Ok(Response::Empty)
}

fn delete_key(service: &KeyService, name: &str, _fields: &FieldData) -> Result<Response, VaultError> {
    service.delete(name)?;
    Ok(Response::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgpvault_core::{MemoryStorage, Storage};
    use std::sync::Arc;

    fn router() -> (Arc<MemoryStorage>, Router) {
        let storage = Arc::new(MemoryStorage::new());
        let service = KeyService::new(storage.clone() as Arc<dyn Storage>);
        (storage, Router::new(service))
    }

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn defaults_are_applied() {
        let schema = key_fields(2048);
        let fields = FieldData::parse(&schema, &Map::new()).expect("parse");
        assert_eq!(fields.int("key_bits"), 2048);
        assert!(fields.bool("generate"));
        assert!(!fields.bool("exportable"));
        assert_eq!(fields.string("key"), "");
    }

    #[test]
    fn values_are_coerced() {
        let schema = key_fields(2048);
        let fields = FieldData::parse(
            &schema,
            &data(json!({"key_bits": "4096", "generate": "0", "exportable": "true"})),
        )
        .expect("parse");
        assert_eq!(fields.int("key_bits"), 4096);
        assert!(!fields.bool("generate"));
        assert!(fields.bool("exportable"));
    }

    #[test]
    fn bad_fields_are_rejected() {
        let schema = key_fields(2048);
        let err = FieldData::parse(&schema, &data(json!({"colour": "red"}))).expect_err("unknown");
        assert!(matches!(err, ValidationError::UnknownField(ref f) if f == "colour"));

        let err = FieldData::parse(&schema, &data(json!({"key_bits": "lots"}))).expect_err("int");
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "key_bits"));

        let err = FieldData::parse(&schema, &data(json!({"generate": "maybe"}))).expect_err("bool");
        assert!(matches!(err, ValidationError::InvalidField { ref field, .. } if field == "generate"));
    }

    #[test]
    fn unmatched_path_and_operation() {
        let (_storage, router) = router();
        let resp = router
            .handle(&Request::new(Operation::Read, "policies/x"))
            .expect("handle");
        assert_eq!(resp, Response::Error("unsupported path".into()));

        let resp = router
            .handle(&Request::new(Operation::Delete, "keys/"))
            .expect("handle");
        assert!(matches!(resp, Response::Error(ref msg) if msg.contains("unsupported operation")));
    }

    #[test]
    fn caller_errors_become_error_responses() {
        let (storage, router) = router();
        let request = Request::new(Operation::Update, "keys/weak")
            .with_data(data(json!({"key_bits": 1024})));
        let resp = router.handle(&request).expect("handle");
        assert!(matches!(resp, Response::Error(ref msg) if msg.starts_with("keys < 2048 bits")));

        let request = Request::new(Operation::Update, "keys/empty")
            .with_data(data(json!({"generate": false})));
        let resp = router.handle(&request).expect("handle");
        assert_eq!(
            resp,
            Response::Error("the key value is required for imported keys".into())
        );
        assert!(storage.is_empty().expect("is_empty"));
    }

    #[test]
    fn list_and_read_missing() {
        let (_storage, router) = router();
        let resp = router
            .handle(&Request::new(Operation::List, "keys"))
            .expect("handle");
        assert_eq!(resp, Response::Data(json!({"keys": []})));

        let resp = router
            .handle(&Request::new(Operation::Read, "keys/absent"))
            .expect("handle");
        assert_eq!(resp, Response::Empty);
    }

    #[test]
    fn create_list_delete() {
        let (_storage, router) = router();
        for name in ["a", "b"] {
            let request = Request::new(Operation::Update, format!("keys/{name}"))
                .with_data(data(json!({"real_name": "Route", "email": "route@example.com"})));
            assert_eq!(router.handle(&request).expect("create"), Response::Empty);
        }
        router
            .handle(&Request::new(Operation::Delete, "keys/a"))
            .expect("delete");
        let resp = router
            .handle(&Request::new(Operation::List, "keys/"))
            .expect("list");
        assert_eq!(resp, Response::Data(json!({"keys": ["b"]})));

        let resp = router
            .handle(&Request::new(Operation::Read, "keys/b"))
            .expect("read");
        let Response::Data(body) = resp else {
            panic!("expected data");
        };
        assert_eq!(body["exportable"], false);
        assert_eq!(body["fingerprint"].as_str().map(str::len), Some(40));
    }

    #[test]
    fn help_lists_fields() {
        let (_storage, router) = router();
        let help = router.help();
        assert!(help.starts_with(HELP_SYNOPSIS));
        assert!(help.contains("keys/<name> (read, update, delete)"));
        assert!(help.contains("key_bits (int, default 2048)"));
    }
}

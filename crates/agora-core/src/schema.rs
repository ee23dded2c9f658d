//! Interface schema types.
//!
//! The [`InterfaceSchema`] is the machine-readable description of every route
//! the server accepts. Each [`Operation`] names a method, a path pattern, its
//! parameters and an optional body schema. It is loaded once at boot from
//! JSON or TOML (or built in code) and never mutated afterwards.
//!
//! # Example
//!
//! ```
//! use agora_core::schema::{InterfaceSchema, Operation, ParamSpec, ParamType, Schema};
//! use http::Method;
//!
//! let schema = InterfaceSchema::builder("items-api")
//!     .version("1.0.0")
//!     .operation(
//!         Operation::builder("getItem")
//!             .method(Method::GET)
//!             .path("/items/{id}")
//!             .param(ParamSpec::path("id", ParamType::Integer))
//!             .response(200)
//!             .response(404)
//!             .build()
//!             .unwrap(),
//!     )
//!     .operation(
//!         Operation::builder("createItem")
//!             .method(Method::POST)
//!             .path("/items")
//!             .body(Schema::object([("name", Schema::string())], ["name"]))
//!             .build()
//!             .unwrap(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let route = schema.match_operation(&Method::GET, "/items/42").unwrap();
//! assert_eq!(route.operation.operation_id(), "getItem");
//! assert_eq!(route.params["id"], "42");
//! ```

use http::Method;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::{FieldErrors, FieldReason};

/// Errors raised while loading or building an interface schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema file could not be read.
    #[error("failed to read schema file '{path}': {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The schema file is not valid JSON.
    #[error("invalid JSON schema: {0}")]
    Json(#[from] serde_json::Error),

    /// The schema file is not valid TOML.
    #[error("invalid TOML schema: {0}")]
    Toml(#[from] toml::de::Error),

    /// The file extension is neither `.json` nor `.toml`.
    #[error("unsupported schema file format: {0}")]
    UnsupportedFormat(PathBuf),

    /// A path pattern is malformed.
    #[error("operation '{operation}': invalid path '{path}': {reason}")]
    InvalidPath {
        /// Operation id.
        operation: String,
        /// The offending pattern.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A path parameter is declared but not present in the pattern.
    #[error("operation '{operation}': path parameter '{name}' is not in the path pattern")]
    UnknownPathParam {
        /// Operation id.
        operation: String,
        /// Parameter name.
        name: String,
    },

    /// An example is keyed by something other than an HTTP status code.
    #[error("operation '{operation}': example key '{status}' is not a status code")]
    InvalidExample {
        /// Operation id.
        operation: String,
        /// The offending key.
        status: String,
    },

    /// Two operations share an id.
    #[error("duplicate operation id '{0}'")]
    DuplicateOperation(String),
}

/// Where a parameter is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    /// A `{name}` segment of the path pattern.
    Path,
    /// The query string.
    Query,
    /// A request header.
    Header,
    /// A top-level field of the parsed body.
    Body,
}

impl ParamLocation {
    /// Returns the location as used in error reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Body => "body",
        }
    }
}

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Any string.
    #[default]
    String,
    /// A signed 64-bit integer.
    Integer,
    /// A finite floating-point number.
    Number,
    /// `true` or `false`.
    Boolean,
    /// A list; comma-separated when it arrives as a string.
    Array,
    /// A JSON object.
    Object,
}

impl ParamType {
    /// Returns the type name as used in error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// A regular expression constraint, compiled when the schema is loaded.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    /// Compiles a pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self)
    }

    /// Returns `true` if the value matches.
    #[must_use]
    pub fn is_match(&self, value: &str) -> bool {
        self.0.is_match(value)
    }

    /// Returns the source pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Pattern::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Declaration of one operation parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpec {
    /// Parameter name (header names are case-insensitive).
    pub name: String,
    /// Where the parameter is looked up.
    #[serde(rename = "in")]
    pub location: ParamLocation,
    /// Whether the parameter must be present. Path parameters always are.
    #[serde(default)]
    pub required: bool,
    /// Declared type.
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    /// Inclusive lower bound for numbers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    /// Inclusive upper bound for numbers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Minimum length for strings and arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Maximum length for strings and arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Regular expression strings must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
    /// Allowed values, compared after coercion.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    /// Creates a parameter declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, location: ParamLocation, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            location,
            required: location == ParamLocation::Path,
            param_type,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            pattern: None,
            allowed: None,
            description: None,
        }
    }

    /// Declares a path parameter (always required).
    #[must_use]
    pub fn path(name: impl Into<String>, param_type: ParamType) -> Self {
        Self::new(name, ParamLocation::Path, param_type)
    }

    /// Declares an optional query parameter.
    #[must_use]
    pub fn query(name: impl Into<String>, param_type: ParamType) -> Self {
        Self::new(name, ParamLocation::Query, param_type)
    }

    /// Declares an optional header parameter.
    #[must_use]
    pub fn header(name: impl Into<String>, param_type: ParamType) -> Self {
        Self::new(name, ParamLocation::Header, param_type)
    }

    /// Declares an optional top-level body field.
    #[must_use]
    pub fn body(name: impl Into<String>, param_type: ParamType) -> Self {
        Self::new(name, ParamLocation::Body, param_type)
    }

    /// Marks the parameter as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets an inclusive lower bound.
    #[must_use]
    pub fn minimum(mut self, min: f64) -> Self {
        self.minimum = Some(min);
        self
    }

    /// Sets an inclusive upper bound.
    #[must_use]
    pub fn maximum(mut self, max: f64) -> Self {
        self.maximum = Some(max);
        self
    }

    /// Sets the minimum length.
    #[must_use]
    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    /// Sets the maximum length.
    #[must_use]
    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Sets a pattern constraint.
    #[must_use]
    pub fn pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Restricts the parameter to a set of values.
    #[must_use]
    pub fn one_of(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = Some(values.into_iter().collect());
        self
    }
}

/// Body schema, a small subset of JSON Schema.
///
/// ```
/// use agora_core::schema::Schema;
/// use serde_json::json;
///
/// let schema = Schema::object(
///     [("name", Schema::string().min_length(1)), ("qty", Schema::integer())],
///     ["name"],
/// );
/// assert!(schema.validate(&json!({ "name": "bolt", "qty": 3 })).is_ok());
///
/// let errors = schema.validate(&json!({ "qty": "three" })).unwrap_err();
/// assert_eq!(errors.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schema {
    /// String type.
    String {
        /// Minimum length in characters.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        /// Maximum length in characters.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
        /// Pattern the string must match.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<Pattern>,
        /// Allowed values.
        #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
        allowed: Option<Vec<String>>,
    },
    /// Integer type.
    Integer {
        /// Inclusive minimum.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<i64>,
        /// Inclusive maximum.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<i64>,
    },
    /// Number type.
    Number {
        /// Inclusive minimum.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        /// Inclusive maximum.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },
    /// Boolean type.
    Boolean,
    /// Array type.
    Array {
        /// Schema for every item.
        items: Box<Schema>,
        /// Minimum number of items.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_items: Option<usize>,
        /// Maximum number of items.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
    /// Object type.
    Object {
        /// Known properties.
        #[serde(default)]
        properties: BTreeMap<String, Schema>,
        /// Names of required properties.
        #[serde(default)]
        required: Vec<String>,
    },
    /// Accepts anything.
    Any,
    /// Only `null`.
    Null,
}

impl Schema {
    /// Creates an unconstrained string schema.
    #[must_use]
    pub fn string() -> Self {
        Self::String {
            min_length: None,
            max_length: None,
            pattern: None,
            allowed: None,
        }
    }

    /// Creates an unconstrained integer schema.
    #[must_use]
    pub fn integer() -> Self {
        Self::Integer {
            minimum: None,
            maximum: None,
        }
    }

    /// Creates an unconstrained number schema.
    #[must_use]
    pub fn number() -> Self {
        Self::Number {
            minimum: None,
            maximum: None,
        }
    }

    /// Creates a boolean schema.
    #[must_use]
    pub fn boolean() -> Self {
        Self::Boolean
    }

    /// Creates an array schema.
    #[must_use]
    pub fn array(items: Schema) -> Self {
        Self::Array {
            items: Box::new(items),
            min_items: None,
            max_items: None,
        }
    }

    /// Creates an object schema from properties and required names.
    #[must_use]
    pub fn object<'a>(
        properties: impl IntoIterator<Item = (&'a str, Schema)>,
        required: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self::Object {
            properties: properties
                .into_iter()
                .map(|(name, schema)| (name.to_string(), schema))
                .collect(),
            required: required.into_iter().map(str::to_string).collect(),
        }
    }

    /// Creates a schema that accepts anything.
    #[must_use]
    pub fn any() -> Self {
        Self::Any
    }

    /// Sets the minimum length of a string schema.
    #[must_use]
    pub fn min_length(mut self, len: usize) -> Self {
        if let Self::String { min_length, .. } = &mut self {
            *min_length = Some(len);
        }
        self
    }

    /// Sets the maximum length of a string schema.
    #[must_use]
    pub fn max_length(mut self, len: usize) -> Self {
        if let Self::String { max_length, .. } = &mut self {
            *max_length = Some(len);
        }
        self
    }

    /// Sets the inclusive range of an integer schema.
    #[must_use]
    pub fn range(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        if let Self::Integer { minimum, maximum } = &mut self {
            *minimum = min;
            *maximum = max;
        }
        self
    }

    /// Validates a value, collecting every violation.
    pub fn validate(&self, value: &Value) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        self.collect(value, "$", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validates `value` at JSON path `path`, appending violations.
    pub fn collect(&self, value: &Value, path: &str, errors: &mut FieldErrors) {
        let mut wrong_type = |expected: &str| {
            errors.add(
                path,
                "body",
                FieldReason::WrongType,
                format!("expected {expected}, got {}", value_type_name(value)),
            );
        };

        match self {
            Self::Any => {}
            Self::Null => {
                if !value.is_null() {
                    wrong_type("null");
                }
            }
            Self::Boolean => {
                if !value.is_boolean() {
                    wrong_type("boolean");
                }
            }
            Self::String {
                min_length,
                max_length,
                pattern,
                allowed,
            } => {
                let Some(s) = value.as_str() else {
                    wrong_type("string");
                    return;
                };
                let len = s.chars().count();
                if let Some(min) = min_length.filter(|min| len < *min) {
                    errors.add(path, "body", FieldReason::Constraint, format!("length {len} is less than minimum {min}"));
                }
                if let Some(max) = max_length.filter(|max| len > *max) {
                    errors.add(path, "body", FieldReason::Constraint, format!("length {len} is greater than maximum {max}"));
                }
                if let Some(pattern) = pattern.as_ref().filter(|p| !p.is_match(s)) {
                    errors.add(path, "body", FieldReason::Constraint, format!("does not match pattern '{}'", pattern.as_str()));
                }
                if let Some(allowed) = allowed.as_ref().filter(|a| !a.iter().any(|v| v == s)) {
                    errors.add(path, "body", FieldReason::Constraint, format!("must be one of {allowed:?}"));
                }
            }
            Self::Integer { minimum, maximum } => {
                let Some(n) = value.as_i64() else {
                    wrong_type("integer");
                    return;
                };
                if let Some(min) = minimum.filter(|min| n < *min) {
                    errors.add(path, "body", FieldReason::Constraint, format!("value {n} is less than minimum {min}"));
                }
                if let Some(max) = maximum.filter(|max| n > *max) {
                    errors.add(path, "body", FieldReason::Constraint, format!("value {n} is greater than maximum {max}"));
                }
            }
            Self::Number { minimum, maximum } => {
                let Some(n) = value.as_f64() else {
                    wrong_type("number");
                    return;
                };
                if let Some(min) = minimum.filter(|min| n < *min) {
                    errors.add(path, "body", FieldReason::Constraint, format!("value {n} is less than minimum {min}"));
                }
                if let Some(max) = maximum.filter(|max| n > *max) {
                    errors.add(path, "body", FieldReason::Constraint, format!("value {n} is greater than maximum {max}"));
                }
            }
            Self::Array {
                items,
                min_items,
                max_items,
            } => {
                let Some(arr) = value.as_array() else {
                    wrong_type("array");
                    return;
                };
                if let Some(min) = min_items.filter(|min| arr.len() < *min) {
                    errors.add(path, "body", FieldReason::Constraint, format!("{} items is less than minimum {min}", arr.len()));
                }
                if let Some(max) = max_items.filter(|max| arr.len() > *max) {
                    errors.add(path, "body", FieldReason::Constraint, format!("{} items is greater than maximum {max}", arr.len()));
                }
                for (idx, item) in arr.iter().enumerate() {
                    items.collect(item, &format!("{path}[{idx}]"), errors);
                }
            }
            Self::Object {
                properties,
                required,
            } => {
                let Some(obj) = value.as_object() else {
                    wrong_type("object");
                    return;
                };
                for name in required {
                    if obj.get(name).map_or(true, Value::is_null) {
                        errors.add(
                            format!("{path}.{name}"),
                            "body",
                            FieldReason::MissingRequired,
                            format!("missing required property '{name}'"),
                        );
                    }
                }
                for (name, schema) in properties {
                    match obj.get(name) {
                        Some(Value::Null) | None => {}
                        Some(prop) => schema.collect(prop, &format!("{path}.{name}"), errors),
                    }
                }
            }
        }
    }
}

/// Returns a human-readable name for a JSON value type.
pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Body declaration of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BodySpec {
    /// Whether a body must be sent.
    #[serde(default)]
    pub required: bool,
    /// Schema the parsed body must satisfy.
    pub schema: Schema,
}

/// A path segment in an operation's path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    /// A literal path segment (e.g., "items").
    Literal(String),
    /// A path parameter (e.g., "{id}").
    Parameter(String),
}

/// One entry of the interface schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOperation", into = "RawOperation")]
pub struct Operation {
    operation_id: String,
    method: Method,
    path: String,
    segments: Vec<PathSegment>,
    params: Vec<ParamSpec>,
    body: Option<BodySpec>,
    responses: Vec<u16>,
    examples: BTreeMap<u16, Value>,
    summary: Option<String>,
    tags: Vec<String>,
    requires_auth: bool,
}

/// Serialized form of [`Operation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOperation {
    operation_id: String,
    #[serde(with = "http_method_serde")]
    method: Method,
    path: String,
    #[serde(default)]
    params: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<BodySpec>,
    #[serde(default)]
    responses: Vec<u16>,
    /// Example payloads keyed by status code, e.g. `{"200": {...}}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    examples: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    requires_auth: bool,
}

impl TryFrom<RawOperation> for Operation {
    type Error = SchemaError;

    fn try_from(raw: RawOperation) -> Result<Self, Self::Error> {
        let segments = parse_path(&raw.operation_id, &raw.path)?;

        let mut params = raw.params;
        for spec in params.iter_mut().filter(|p| p.location == ParamLocation::Path) {
            let declared = segments
                .iter()
                .any(|s| matches!(s, PathSegment::Parameter(name) if *name == spec.name));
            if !declared {
                return Err(SchemaError::UnknownPathParam {
                    operation: raw.operation_id,
                    name: spec.name.clone(),
                });
            }
            spec.required = true;
        }

        // Pattern parameters without a declaration are plain strings.
        for segment in &segments {
            if let PathSegment::Parameter(name) = segment {
                let declared = params
                    .iter()
                    .any(|p| p.location == ParamLocation::Path && p.name == *name);
                if !declared {
                    params.push(ParamSpec::path(name.clone(), ParamType::String));
                }
            }
        }

        let mut examples = BTreeMap::new();
        for (status, example) in raw.examples {
            let code = status
                .parse::<u16>()
                .ok()
                .filter(|code| (100..=599).contains(code))
                .ok_or_else(|| SchemaError::InvalidExample {
                    operation: raw.operation_id.clone(),
                    status: status.clone(),
                })?;
            examples.insert(code, example);
        }

        Ok(Self {
            operation_id: raw.operation_id,
            method: raw.method,
            path: raw.path,
            segments,
            params,
            body: raw.body,
            responses: raw.responses,
            examples,
            summary: raw.summary,
            tags: raw.tags,
            requires_auth: raw.requires_auth,
        })
    }
}

impl From<Operation> for RawOperation {
    fn from(op: Operation) -> Self {
        Self {
            operation_id: op.operation_id,
            method: op.method,
            path: op.path,
            params: op.params,
            body: op.body,
            responses: op.responses,
            examples: op
                .examples
                .into_iter()
                .map(|(status, example)| (status.to_string(), example))
                .collect(),
            summary: op.summary,
            tags: op.tags,
            requires_auth: op.requires_auth,
        }
    }
}

impl Operation {
    /// Creates a new operation builder.
    #[must_use]
    pub fn builder(operation_id: impl Into<String>) -> OperationBuilder {
        OperationBuilder::new(operation_id)
    }

    /// Returns the operation ID.
    #[must_use]
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Returns the HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the path pattern.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the declared parameters, in declaration order.
    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Returns the declared parameters at one location.
    pub fn params_in(&self, location: ParamLocation) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(move |p| p.location == location)
    }

    /// Returns the body declaration, if any.
    #[must_use]
    pub fn body(&self) -> Option<&BodySpec> {
        self.body.as_ref()
    }

    /// Returns the declared response codes.
    #[must_use]
    pub fn responses(&self) -> &[u16] {
        &self.responses
    }

    /// Returns the example payload declared for `status`.
    #[must_use]
    pub fn example(&self, status: u16) -> Option<&Value> {
        self.examples.get(&status)
    }

    /// Picks the payload for answering without a handler: the lowest 2xx
    /// example, else the lowest declared 2xx response with a null payload.
    #[must_use]
    pub fn mock_response(&self) -> Option<(u16, Value)> {
        let success = 200..300;
        if let Some((status, example)) = self.examples.range(success.clone()).next() {
            return Some((*status, example.clone()));
        }
        self.responses
            .iter()
            .copied()
            .filter(|status| success.contains(status))
            .min()
            .map(|status| (status, Value::Null))
    }

    /// Returns the summary.
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Returns the operation tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns whether this operation requires an authenticated caller.
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    /// Attempts to match a request path against this operation's pattern.
    ///
    /// Segments are percent-decoded before comparison, and parameter values
    /// are returned decoded. A path that does not decode never matches.
    #[must_use]
    pub fn match_path(&self, request_path: &str) -> Option<BTreeMap<String, String>> {
        let request_segments = crate::request::decode_path_segments(request_path)?;

        if request_segments.len() != self.segments.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (pattern, actual) in self.segments.iter().zip(&request_segments) {
            match pattern {
                PathSegment::Literal(lit) if lit == actual => {}
                PathSegment::Literal(_) => return None,
                PathSegment::Parameter(name) => {
                    params.insert(name.clone(), actual.clone());
                }
            }
        }
        Some(params)
    }
}

/// Parses a path pattern into segments.
fn parse_path(operation: &str, path: &str) -> Result<Vec<PathSegment>, SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidPath {
        operation: operation.to_string(),
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }

    let mut segments = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if name.is_empty() || name.contains(['{', '}']) {
                return Err(invalid("empty or nested parameter"));
            }
            if segments
                .iter()
                .any(|s| matches!(s, PathSegment::Parameter(n) if n == name))
            {
                return Err(invalid("repeated parameter name"));
            }
            segments.push(PathSegment::Parameter(name.to_string()));
        } else if segment.contains(['{', '}']) {
            return Err(invalid("parameters must span a whole segment"));
        } else {
            segments.push(PathSegment::Literal(segment.to_string()));
        }
    }
    Ok(segments)
}

/// Builder for creating [`Operation`] instances.
#[derive(Debug)]
pub struct OperationBuilder {
    raw: RawOperation,
}

impl OperationBuilder {
    /// Creates a new operation builder (`GET /`).
    #[must_use]
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            raw: RawOperation {
                operation_id: operation_id.into(),
                method: Method::GET,
                path: "/".to_string(),
                params: Vec::new(),
                body: None,
                responses: Vec::new(),
                examples: BTreeMap::new(),
                summary: None,
                tags: Vec::new(),
                requires_auth: false,
            },
        }
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.raw.method = method;
        self
    }

    /// Sets the path pattern.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.raw.path = path.into();
        self
    }

    /// Declares a parameter.
    #[must_use]
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.raw.params.push(param);
        self
    }

    /// Declares a required body.
    #[must_use]
    pub fn body(mut self, schema: Schema) -> Self {
        self.raw.body = Some(BodySpec {
            required: true,
            schema,
        });
        self
    }

    /// Declares an optional body.
    #[must_use]
    pub fn optional_body(mut self, schema: Schema) -> Self {
        self.raw.body = Some(BodySpec {
            required: false,
            schema,
        });
        self
    }

    /// Declares a response code.
    #[must_use]
    pub fn response(mut self, status: u16) -> Self {
        self.raw.responses.push(status);
        self
    }

    /// Declares a response code with an example payload.
    #[must_use]
    pub fn example(mut self, status: u16, example: Value) -> Self {
        if !self.raw.responses.contains(&status) {
            self.raw.responses.push(status);
        }
        self.raw.examples.insert(status.to_string(), example);
        self
    }

    /// Sets the summary.
    #[must_use]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.raw.summary = Some(summary.into());
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.raw.tags.push(tag.into());
        self
    }

    /// Marks the operation as requiring an authenticated caller.
    #[must_use]
    pub fn requires_auth(mut self, requires: bool) -> Self {
        self.raw.requires_auth = requires;
        self
    }

    /// Builds the operation, checking the path pattern.
    pub fn build(self) -> Result<Operation, SchemaError> {
        Operation::try_from(self.raw)
    }
}

/// A successful route match.
#[derive(Debug, Clone)]
pub struct RouteMatch<'s> {
    /// The matched operation.
    pub operation: &'s Operation,
    /// Raw path parameter values.
    pub params: BTreeMap<String, String>,
}

/// The full set of accepted routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawSchema", into = "RawSchema")]
pub struct InterfaceSchema {
    title: String,
    version: String,
    operations: Vec<Operation>,
    operation_index: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchema {
    title: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    operations: Vec<Operation>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

impl TryFrom<RawSchema> for InterfaceSchema {
    type Error = SchemaError;

    fn try_from(raw: RawSchema) -> Result<Self, Self::Error> {
        let mut operation_index = HashMap::with_capacity(raw.operations.len());
        for (idx, op) in raw.operations.iter().enumerate() {
            if operation_index.insert(op.operation_id.clone(), idx).is_some() {
                return Err(SchemaError::DuplicateOperation(op.operation_id.clone()));
            }
        }
        Ok(Self {
            title: raw.title,
            version: raw.version,
            operations: raw.operations,
            operation_index,
        })
    }
}

impl From<InterfaceSchema> for RawSchema {
    fn from(schema: InterfaceSchema) -> Self {
        Self {
            title: schema.title,
            version: schema.version,
            operations: schema.operations,
        }
    }
}

impl InterfaceSchema {
    /// Creates a new schema builder.
    #[must_use]
    pub fn builder(title: impl Into<String>) -> InterfaceSchemaBuilder {
        InterfaceSchemaBuilder::new(title)
    }

    /// Parses a schema from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses a schema from TOML.
    pub fn from_toml_str(toml: &str) -> Result<Self, SchemaError> {
        Ok(toml::from_str(toml)?)
    }

    /// Loads a schema file, choosing the format by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let schema = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents)?,
            Some("toml") => Self::from_toml_str(&contents)?,
            _ => return Err(SchemaError::UnsupportedFormat(path.to_path_buf())),
        };

        tracing::debug!(
            path = %path.display(),
            title = %schema.title,
            operations = schema.operations.len(),
            "loaded interface schema"
        );
        Ok(schema)
    }

    /// Returns the schema title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the schema version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns all operations, in declaration order.
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Looks up an operation by its ID.
    #[must_use]
    pub fn get_operation(&self, operation_id: &str) -> Option<&Operation> {
        self.operation_index
            .get(operation_id)
            .map(|&idx| &self.operations[idx])
    }

    /// Finds the first operation matching the method and path.
    #[must_use]
    pub fn match_operation(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.operations
            .iter()
            .filter(|op| op.method() == method)
            .find_map(|operation| {
                operation
                    .match_path(path)
                    .map(|params| RouteMatch { operation, params })
            })
    }

    /// Returns the methods declared for a path, in declaration order.
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut methods: Vec<Method> = Vec::new();
        for op in &self.operations {
            if op.match_path(path).is_some() && !methods.contains(op.method()) {
                methods.push(op.method().clone());
            }
        }
        methods
    }
}

/// Builder for creating [`InterfaceSchema`] instances.
#[derive(Debug)]
pub struct InterfaceSchemaBuilder {
    raw: RawSchema,
}

impl InterfaceSchemaBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            raw: RawSchema {
                title: title.into(),
                version: default_version(),
                operations: Vec::new(),
            },
        }
    }

    /// Sets the version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.raw.version = version.into();
        self
    }

    /// Adds an operation.
    #[must_use]
    pub fn operation(mut self, operation: Operation) -> Self {
        self.raw.operations.push(operation);
        self
    }

    /// Adds several operations.
    #[must_use]
    pub fn operations(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.raw.operations.extend(operations);
        self
    }

    /// Builds the schema, rejecting duplicate operation ids.
    pub fn build(self) -> Result<InterfaceSchema, SchemaError> {
        InterfaceSchema::try_from(self.raw)
    }
}

mod http_method_serde {
    use http::Method;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(method: &Method, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(method.as_str())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Method, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.to_ascii_uppercase().parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn items_schema() -> InterfaceSchema {
        InterfaceSchema::builder("items")
            .version("1.0.0")
            .operation(
                Operation::builder("listItems")
                    .method(Method::GET)
                    .path("/items")
                    .param(ParamSpec::query("limit", ParamType::Integer))
                    .build()
                    .unwrap(),
            )
            .operation(
                Operation::builder("getItem")
                    .method(Method::GET)
                    .path("/items/{id}")
                    .param(ParamSpec::path("id", ParamType::Integer))
                    .build()
                    .unwrap(),
            )
            .operation(
                Operation::builder("deleteItem")
                    .method(Method::DELETE)
                    .path("/items/{id}")
                    .requires_auth(true)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    // ==================== Matching ====================

    #[test]
    fn test_match_operation_extracts_params() {
        let schema = items_schema();
        let route = schema.match_operation(&Method::GET, "/items/42").unwrap();
        assert_eq!(route.operation.operation_id(), "getItem");
        assert_eq!(route.params.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_match_operation_requires_method() {
        let schema = items_schema();
        assert!(schema.match_operation(&Method::PUT, "/items/42").is_none());
        assert_eq!(
            schema.allowed_methods("/items/42"),
            vec![Method::GET, Method::DELETE]
        );
        assert!(schema.allowed_methods("/nothing").is_empty());
    }

    #[test]
    fn test_match_decodes_segments() {
        let schema = InterfaceSchema::builder("people")
            .operation(Operation::builder("getUser").path("/users/{name}").build().unwrap())
            .build()
            .unwrap();
        let route = schema.match_operation(&Method::GET, "/users/ada%20lovelace").unwrap();
        assert_eq!(route.params["name"], "ada lovelace");
        assert!(schema.match_operation(&Method::GET, "/%75sers/ada").is_some());
        assert!(schema.match_operation(&Method::GET, "/users/%FF").is_none());
    }

    #[test]
    fn test_match_ignores_trailing_slash() {
        let schema = items_schema();
        assert!(schema.match_operation(&Method::GET, "/items/").is_some());
    }

    #[test]
    fn test_undeclared_pattern_param_defaults_to_string() {
        let schema = items_schema();
        let op = schema.get_operation("deleteItem").unwrap();
        let id = op.params_in(ParamLocation::Path).next().unwrap();
        assert_eq!(id.param_type, ParamType::String);
        assert!(id.required);
        assert!(op.requires_auth());
    }

    // ==================== Construction errors ====================

    #[test]
    fn test_path_param_missing_from_pattern() {
        let err = Operation::builder("bad")
            .path("/items")
            .param(ParamSpec::path("id", ParamType::Integer))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownPathParam { .. }));
    }

    #[test]
    fn test_malformed_patterns_are_rejected() {
        for path in ["items", "/items/{}", "/items/x{id}", "/a/{id}/b/{id}"] {
            let result = Operation::builder("bad").path(path).build();
            assert!(
                matches!(result, Err(SchemaError::InvalidPath { .. })),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn test_duplicate_operation_ids() {
        let op = Operation::builder("dup").build().unwrap();
        let err = InterfaceSchema::builder("x")
            .operation(op.clone())
            .operation(op)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateOperation(id) if id == "dup"));
    }

    // ==================== Loading ====================

    #[test]
    fn test_load_json() {
        let json = r#"{
            "title": "items",
            "operations": [{
                "operation_id": "getItem",
                "method": "get",
                "path": "/items/{id}",
                "params": [{ "name": "id", "in": "path", "type": "integer" }],
                "responses": [200, 404]
            }]
        }"#;
        let schema = InterfaceSchema::from_json_str(json).unwrap();
        let op = schema.get_operation("getItem").unwrap();
        assert_eq!(op.method(), Method::GET);
        assert_eq!(op.responses(), &[200, 404]);
        assert!(op.params()[0].required);
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interface.toml");
        std::fs::write(
            &path,
            r#"
title = "items"
version = "2.0.0"

[[operations]]
operation_id = "createItem"
method = "POST"
path = "/items"
requires_auth = true
params = [{ name = "x-tenant", in = "header", required = true }]

[operations.body]
required = true
schema = { type = "object", required = ["name"], properties = { name = { type = "string", min_length = 1 } } }
"#,
        )
        .unwrap();

        let schema = InterfaceSchema::load(&path).unwrap();
        assert_eq!(schema.version(), "2.0.0");
        let op = schema.get_operation("createItem").unwrap();
        assert!(op.requires_auth());
        let body = op.body().unwrap();
        assert!(body.required);
        assert!(body.schema.validate(&json!({ "name": "" })).is_err());
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interface.yaml");
        std::fs::write(&path, "title: x").unwrap();
        assert!(matches!(
            InterfaceSchema::load(&path),
            Err(SchemaError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_invalid_pattern_fails_to_load() {
        let json = r#"{
            "title": "x",
            "operations": [{
                "operation_id": "op", "method": "GET", "path": "/",
                "params": [{ "name": "q", "in": "query", "pattern": "([" }]
            }]
        }"#;
        assert!(InterfaceSchema::from_json_str(json).is_err());
    }

    #[test]
    fn test_json_roundtrip_preserves_operations() {
        let schema = items_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let parsed = InterfaceSchema::from_json_str(&json).unwrap();
        assert_eq!(parsed.operations(), schema.operations());
    }

    #[test]
    fn test_mock_response_prefers_lowest_success_example() {
        let op = Operation::builder("listItems")
            .path("/items")
            .response(404)
            .example(201, json!({ "id": 2 }))
            .example(200, json!([{ "id": 1 }]))
            .build()
            .unwrap();
        assert_eq!(op.mock_response(), Some((200, json!([{ "id": 1 }]))));
        assert_eq!(op.example(201), Some(&json!({ "id": 2 })));

        let bare = Operation::builder("ping").response(404).response(204).build().unwrap();
        assert_eq!(bare.mock_response(), Some((204, Value::Null)));

        let none = Operation::builder("gone").response(410).build().unwrap();
        assert_eq!(none.mock_response(), None);
    }

    #[test]
    fn test_examples_load_from_json() {
        let json = r#"{
            "title": "x",
            "operations": [{
                "operation_id": "getItem", "method": "GET", "path": "/items/{id}",
                "responses": [200],
                "examples": { "200": { "id": "abc", "name": "widget" } }
            }]
        }"#;
        let schema = InterfaceSchema::from_json_str(json).unwrap();
        let op = schema.get_operation("getItem").unwrap();
        assert_eq!(op.example(200), Some(&json!({ "id": "abc", "name": "widget" })));

        let bad = json.replace("\"200\": {", "\"ok\": {");
        let err = InterfaceSchema::from_json_str(&bad).unwrap_err();
        assert!(err.to_string().contains("example key 'ok'"));
    }

    // ==================== Body schema ====================

    #[test]
    fn test_body_schema_collects_all_violations() {
        let schema = Schema::object(
            [
                ("name", Schema::string().min_length(2)),
                ("qty", Schema::integer().range(Some(1), None)),
                ("tags", Schema::array(Schema::string())),
            ],
            ["name", "qty"],
        );
        let errors = schema
            .validate(&json!({ "name": "x", "qty": 0, "tags": ["a", 3] }))
            .unwrap_err();

        assert_eq!(errors.len(), 3);
        assert_eq!(errors.get("$.name").unwrap().reason, FieldReason::Constraint);
        assert_eq!(errors.get("$.qty").unwrap().reason, FieldReason::Constraint);
        assert_eq!(errors.get("$.tags[1]").unwrap().reason, FieldReason::WrongType);
    }

    #[test]
    fn test_body_schema_null_counts_as_missing() {
        let schema = Schema::object([("name", Schema::string())], ["name"]);
        let errors = schema.validate(&json!({ "name": null })).unwrap_err();
        assert_eq!(errors.fields[0].reason, FieldReason::MissingRequired);
    }

    // ==================== Properties ====================

    proptest! {
        #[test]
        fn prop_param_pattern_matches_any_segment(segment in "[A-Za-z0-9_.~-]{1,24}") {
            let schema = items_schema();
            let route = schema.match_operation(&Method::GET, &format!("/items/{segment}"));
            let route = route.expect("single segment should match");
            prop_assert_eq!(route.params.get("id"), Some(&segment));
        }

        #[test]
        fn prop_extra_segments_never_match(a in "[a-z0-9]{1,8}", b in "[a-z0-9]{1,8}") {
            let schema = items_schema();
            let path = format!("/items/{a}/{b}");
            prop_assert!(schema.match_operation(&Method::GET, &path).is_none());
        }
    }
}

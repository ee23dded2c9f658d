//! Schema validation of inbound requests.
//!
//! [`validate`] matches a request against the [`InterfaceSchema`], checks every
//! declared parameter and the body schema, and coerces string-typed inputs
//! (path segments, query values, headers, form fields) to their declared
//! types. JSON body fields already carry their types and are only checked.
//! It never looks at business state.

use http::Method;
use serde_json::{Number, Value};

use crate::error::{AgoraError, FieldErrors, FieldReason};
use crate::request::{decode_path_segments, ApiRequest, Params};
use crate::schema::{InterfaceSchema, Operation, ParamLocation, ParamSpec, ParamType};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Validator switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidatorOptions {
    /// Report 405 instead of 404 when the path exists for another method.
    pub distinguish_method_not_allowed: bool,
}

/// Why a request was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    /// No entry matches the method and path.
    NoSuchRoute,
    /// The path matches entries, but none for this method.
    MethodNotAllowed {
        /// Methods declared for the path.
        allowed: Vec<Method>,
    },
    /// A path segment does not percent-decode to UTF-8.
    MalformedPath,
    /// The route matched but parameters or body are invalid.
    Invalid(FieldErrors),
}

impl ValidationFailure {
    /// Converts the failure into the protocol error the pipeline raises.
    #[must_use]
    pub fn into_error(self, method: &Method, path: &str) -> AgoraError {
        match self {
            Self::NoSuchRoute => AgoraError::no_such_route(method, path),
            Self::MethodNotAllowed { allowed } => {
                let allowed: Vec<&str> = allowed.iter().map(Method::as_str).collect();
                AgoraError::protocol(
                    crate::error::ProtocolKind::MethodNotAllowed,
                    format!("{method} is not allowed on {path}; allowed: {}", allowed.join(", ")),
                )
            }
            Self::MalformedPath => AgoraError::malformed_path(path),
            Self::Invalid(fields) => AgoraError::invalid_request(fields),
        }
    }
}

/// A request that conforms to its operation, with coerced values.
#[derive(Debug, Clone)]
pub struct ValidatedRequest<'s> {
    /// The matched operation.
    pub operation: &'s Operation,
    /// Coerced path parameters.
    pub path_params: Params,
    /// Query parameters; declared ones are coerced, others kept as sent.
    pub query: Params,
    /// Coerced header parameters.
    pub headers: Params,
    /// The body with declared top-level fields coerced.
    pub body: Value,
}

impl<'s> ValidatedRequest<'s> {
    /// Writes the coerced values back into the request.
    pub fn apply(self, request: &mut ApiRequest) -> &'s Operation {
        request.path_params = self.path_params;
        request.query = self.query;
        request.body = self.body;
        self.operation
    }
}

/// Validates a request against the schema.
///
/// The first entry matching method and path wins. Every offending parameter
/// is reported, not just the first.
pub fn validate<'s>(
    schema: &'s InterfaceSchema,
    request: &ApiRequest,
    options: ValidatorOptions,
) -> Result<ValidatedRequest<'s>, ValidationFailure> {
    if decode_path_segments(&request.path).is_none() {
        return Err(ValidationFailure::MalformedPath);
    }
    let Some(route) = schema.match_operation(&request.method, &request.path) else {
        if options.distinguish_method_not_allowed {
            let allowed = schema.allowed_methods(&request.path);
            if !allowed.is_empty() {
                return Err(ValidationFailure::MethodNotAllowed { allowed });
            }
        }
        return Err(ValidationFailure::NoSuchRoute);
    };

    let operation = route.operation;
    let mut errors = FieldErrors::new();

    let mut path_params = Params::new();
    for spec in operation.params_in(ParamLocation::Path) {
        let raw = route.params.get(&spec.name).map(|v| Value::String(v.clone()));
        if let Some(value) = check_param(spec, raw.as_ref(), true, &mut errors) {
            path_params.insert(spec.name.clone(), value);
        }
    }

    let mut query = request.query.clone();
    for spec in operation.params_in(ParamLocation::Query) {
        if let Some(value) = check_param(spec, request.query.get(&spec.name), true, &mut errors) {
            query.insert(spec.name.clone(), value);
        }
    }

    let mut headers = Params::new();
    for spec in operation.params_in(ParamLocation::Header) {
        let raw = request
            .header(&spec.name)
            .map(|v| Value::String(v.to_string()));
        if let Some(value) = check_param(spec, raw.as_ref(), true, &mut errors) {
            headers.insert(spec.name.to_ascii_lowercase(), value);
        }
    }

    // Form fields arrive as strings; JSON fields must already have their type.
    let form_body = request.content_type().as_deref() == Some(FORM_CONTENT_TYPE);
    let mut body = request.body.clone();
    for spec in operation.params_in(ParamLocation::Body) {
        let raw = request.body.get(&spec.name).filter(|v| !v.is_null());
        if let Some(value) = check_param(spec, raw, form_body, &mut errors) {
            if let Some(obj) = body.as_object_mut() {
                obj.insert(spec.name.clone(), value);
            }
        }
    }

    if let Some(body_spec) = operation.body() {
        if body.is_null() {
            if body_spec.required {
                errors.add(
                    "body",
                    "body",
                    FieldReason::MissingRequired,
                    "request body is required",
                );
            }
        } else {
            body_spec.schema.collect(&body, "$", &mut errors);
        }
    }

    if !errors.is_empty() {
        return Err(ValidationFailure::Invalid(errors));
    }

    Ok(ValidatedRequest {
        operation,
        path_params,
        query,
        headers,
        body,
    })
}

/// Checks one parameter, recording a failure or returning its value.
///
/// String inputs are coerced when `coerce_strings` is set; otherwise the
/// value must already have the declared JSON type. Returns `None` both for an
/// absent optional parameter and for a failure.
fn check_param(
    spec: &ParamSpec,
    raw: Option<&Value>,
    coerce_strings: bool,
    errors: &mut FieldErrors,
) -> Option<Value> {
    let location = spec.location.as_str();
    let Some(raw) = raw else {
        if spec.required {
            errors.add(
                &spec.name,
                location,
                FieldReason::MissingRequired,
                format!("missing required {location} parameter '{}'", spec.name),
            );
        }
        return None;
    };

    let checked = if coerce_strings {
        coerce(raw, spec.param_type)
    } else {
        check_type(raw, spec.param_type)
    };
    let value = match checked {
        Ok(value) => value,
        Err(message) => {
            errors.add(&spec.name, location, FieldReason::WrongType, message);
            return None;
        }
    };

    if let Err(message) = check_constraints(spec, &value) {
        errors.add(&spec.name, location, FieldReason::Constraint, message);
        return None;
    }
    Some(value)
}

/// Coerces a value to a declared type.
///
/// Strings are parsed (`"42"` to `42`, `"true"` to `true`, `"a,b"` to
/// `["a","b"]`); values that already have the right JSON type pass through.
///
/// ```
/// use agora_core::schema::ParamType;
/// use agora_core::validator::coerce;
/// use serde_json::json;
///
/// assert_eq!(coerce(&json!("42"), ParamType::Integer), Ok(json!(42)));
/// assert_eq!(coerce(&json!("a, b"), ParamType::Array), Ok(json!(["a", "b"])));
/// assert!(coerce(&json!("forty-two"), ParamType::Integer).is_err());
/// ```
pub fn coerce(raw: &Value, param_type: ParamType) -> Result<Value, String> {
    let wrong = || {
        format!(
            "expected {}, got {}",
            param_type.as_str(),
            describe(raw)
        )
    };

    match (param_type, raw) {
        (ParamType::Array, Value::Array(_)) | (ParamType::Object, Value::Object(_)) => {
            Ok(raw.clone())
        }
        (ParamType::Array, Value::String(s)) => Ok(Value::Array(
            s.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        )),
        (_, Value::Array(_)) => Err(format!("expected a single {} value", param_type.as_str())),

        (ParamType::String, Value::String(_)) => Ok(raw.clone()),

        (ParamType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(raw.clone()),
        (ParamType::Integer, Value::String(s)) => {
            s.trim().parse::<i64>().map(Value::from).map_err(|_| wrong())
        }

        (ParamType::Number, Value::Number(_)) => Ok(raw.clone()),
        (ParamType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(wrong),

        (ParamType::Boolean, Value::Bool(_)) => Ok(raw.clone()),
        (ParamType::Boolean, Value::String(s)) => match s.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(wrong()),
        },

        (ParamType::Object, Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(obj @ Value::Object(_)) => Ok(obj),
            _ => Err(wrong()),
        },

        _ => Err(wrong()),
    }
}

/// Accepts a value only if it already has the declared JSON type.
fn check_type(raw: &Value, param_type: ParamType) -> Result<Value, String> {
    let matches = match (param_type, raw) {
        (ParamType::String, Value::String(_))
        | (ParamType::Number, Value::Number(_))
        | (ParamType::Boolean, Value::Bool(_))
        | (ParamType::Array, Value::Array(_))
        | (ParamType::Object, Value::Object(_)) => true,
        (ParamType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
        _ => false,
    };
    if matches {
        Ok(raw.clone())
    } else {
        Err(format!("expected {}, got {}", param_type.as_str(), describe(raw)))
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        other => crate::schema::value_type_name(other).to_string(),
    }
}

fn check_constraints(spec: &ParamSpec, value: &Value) -> Result<(), String> {
    if let Some(n) = value.as_f64() {
        if let Some(min) = spec.minimum.filter(|min| n < *min) {
            return Err(format!("value {n} is less than minimum {min}"));
        }
        if let Some(max) = spec.maximum.filter(|max| n > *max) {
            return Err(format!("value {n} is greater than maximum {max}"));
        }
    }

    let len = match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    };
    if let Some(len) = len {
        if let Some(min) = spec.min_length.filter(|min| len < *min) {
            return Err(format!("length {len} is less than minimum {min}"));
        }
        if let Some(max) = spec.max_length.filter(|max| len > *max) {
            return Err(format!("length {len} is greater than maximum {max}"));
        }
    }

    if let (Some(pattern), Value::String(s)) = (&spec.pattern, value) {
        if !pattern.is_match(s) {
            return Err(format!("does not match pattern '{}'", pattern.as_str()));
        }
    }

    if let Some(allowed) = &spec.allowed {
        if !allowed.contains(value) {
            return Err(format!("must be one of {}", Value::Array(allowed.clone())));
        }
    }
    Ok(())
}

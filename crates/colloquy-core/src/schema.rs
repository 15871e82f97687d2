//! Function schemas: the parameter contract a registered function exposes
//! to the model, and validation of model-supplied arguments against it.
//!
//! Schemas are declared explicitly with [`SchemaBuilder`] rather than
//! derived from signatures, and convert to JSON-Schema objects for the wire.

use serde_json::Value;

use crate::error::{FunctionCallError, SetupError};

/// The JSON type a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            // Models routinely send `2` where `2.0` is meant.
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// One declared parameter of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
    pub description: String,
}

/// The callable contract advertised to the model: a unique name, a
/// description, and an ordered parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl FunctionSchema {
    pub fn builder(name: impl Into<String>, description: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// Render the parameter list as a JSON-Schema object suitable for a
    /// backend's function/tool declaration.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            properties.insert(
                param.name.clone(),
                serde_json::json!({
                    "type": param.ty.as_str(),
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Parse and validate the raw argument text a model supplied for a call
    /// to this function.
    ///
    /// Returns the parsed argument object on success. Empty argument text is
    /// treated as an empty object (backends send it for zero-arg calls).
    pub fn validate_raw(&self, raw: &str) -> Result<Value, FunctionCallError> {
        let value: Value = if raw.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(raw).map_err(|e| {
                FunctionCallError::InvalidArguments(format!("arguments are not valid JSON: {e}"))
            })?
        };

        let args = value.as_object().ok_or_else(|| {
            FunctionCallError::InvalidArguments("arguments must be a JSON object".into())
        })?;

        for param in &self.params {
            match args.get(&param.name) {
                Some(v) if !param.ty.matches(v) => {
                    return Err(FunctionCallError::InvalidArguments(format!(
                        "parameter {:?} must be of type {}",
                        param.name,
                        param.ty.as_str()
                    )));
                }
                None if param.required => {
                    return Err(FunctionCallError::InvalidArguments(format!(
                        "missing required parameter {:?}",
                        param.name
                    )));
                }
                _ => {}
            }
        }

        for key in args.keys() {
            if !self.params.iter().any(|p| &p.name == key) {
                return Err(FunctionCallError::InvalidArguments(format!(
                    "unexpected parameter {key:?}"
                )));
            }
        }

        Ok(value)
    }
}

/// Builds a [`FunctionSchema`], rejecting malformed declarations at
/// construction time.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    description: String,
    params: Vec<ParamSpec>,
}

impl SchemaBuilder {
    /// Declare a required parameter.
    pub fn param(
        self,
        name: impl Into<String>,
        ty: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.push(name.into(), ty, true, description.into())
    }

    /// Declare an optional parameter.
    pub fn optional_param(
        self,
        name: impl Into<String>,
        ty: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.push(name.into(), ty, false, description.into())
    }

    fn push(mut self, name: String, ty: ParamType, required: bool, description: String) -> Self {
        self.params.push(ParamSpec {
            name,
            ty,
            required,
            description,
        });
        self
    }

    pub fn build(self) -> Result<FunctionSchema, SetupError> {
        if self.name.is_empty() {
            return Err(SetupError::InvalidSchema("function name is empty".into()));
        }
        for (i, param) in self.params.iter().enumerate() {
            if param.name.is_empty() {
                return Err(SetupError::InvalidSchema(format!(
                    "parameter {i} of {:?} has an empty name",
                    self.name
                )));
            }
            if self.params[..i].iter().any(|p| p.name == param.name) {
                return Err(SetupError::InvalidSchema(format!(
                    "parameter {:?} of {:?} is declared twice",
                    param.name, self.name
                )));
            }
        }
        Ok(FunctionSchema {
            name: self.name,
            description: self.description,
            params: self.params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather_schema() -> FunctionSchema {
        FunctionSchema::builder("get_weather", "Look up the current weather.")
            .param("city", ParamType::String, "City name")
            .optional_param("fahrenheit", ParamType::Boolean, "Use Fahrenheit")
            .build()
            .unwrap()
    }

    #[test]
    fn json_schema_shape() {
        let schema = weather_schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["city"]["type"], "string");
        assert_eq!(schema["properties"]["fahrenheit"]["type"], "boolean");
        assert_eq!(schema["required"], serde_json::json!(["city"]));
    }

    #[test]
    fn valid_arguments_pass() {
        let schema = weather_schema();
        let args = schema
            .validate_raw(r#"{"city": "Oslo", "fahrenheit": false}"#)
            .unwrap();
        assert_eq!(args["city"], "Oslo");

        // Optional parameter may be omitted.
        assert!(schema.validate_raw(r#"{"city": "Oslo"}"#).is_ok());
    }

    #[test]
    fn empty_arguments_mean_empty_object() {
        let schema = FunctionSchema::builder("get_time", "Current time.")
            .build()
            .unwrap();
        let args = schema.validate_raw("").unwrap();
        assert!(args.as_object().unwrap().is_empty());
    }

    #[test]
    fn missing_required_rejected() {
        let err = weather_schema().validate_raw("{}").unwrap_err();
        assert!(err.to_string().contains("missing required parameter"));
        assert!(err.retryable());
    }

    #[test]
    fn wrong_type_rejected() {
        let err = weather_schema()
            .validate_raw(r#"{"city": 42}"#)
            .unwrap_err();
        assert!(err.to_string().contains("must be of type string"));
    }

    #[test]
    fn unexpected_parameter_rejected() {
        let err = weather_schema()
            .validate_raw(r#"{"city": "Oslo", "planet": "Mars"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("unexpected parameter"));
    }

    #[test]
    fn malformed_json_rejected() {
        let err = weather_schema().validate_raw("{city: Oslo").unwrap_err();
        assert!(matches!(err, FunctionCallError::InvalidArguments(_)));
    }

    #[test]
    fn integer_accepted_for_number() {
        let schema = FunctionSchema::builder("wait", "Sleep.")
            .param("seconds", ParamType::Number, "How long")
            .build()
            .unwrap();
        assert!(schema.validate_raw(r#"{"seconds": 2}"#).is_ok());
        assert!(schema.validate_raw(r#"{"seconds": 2.5}"#).is_ok());
    }

    #[test]
    fn duplicate_parameter_is_setup_error() {
        let err = FunctionSchema::builder("f", "dup")
            .param("x", ParamType::String, "first")
            .param("x", ParamType::Integer, "second")
            .build()
            .unwrap_err();
        assert!(matches!(err, SetupError::InvalidSchema(_)));
    }
}

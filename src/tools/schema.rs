//! 工具输入 / 输出 Schema
//!
//! 内置工具用 schemars 从参数结构体生成 JSON Schema；自定义工具可用 ToolSchema::object() 手写。
//! validate 只实现工具参数需要的子集：type、properties、required、additionalProperties、items、enum；
//! `$ref` 与未知关键字视为不约束。

use schemars::{schema_for, JsonSchema};
use serde::Serialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ToolSchema(Value);

impl ToolSchema {
    /// 由类型派生（schemars）
    pub fn of<T: JsonSchema>() -> Self {
        let schema = schema_for!(T);
        Self(serde_json::to_value(&schema).unwrap_or_else(|_| json!({})))
    }

    /// 任意值
    pub fn any() -> Self {
        Self(json!({}))
    }

    /// 任意对象
    pub fn any_object() -> Self {
        Self(json!({ "type": "object" }))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn object() -> ObjectSchemaBuilder {
        ObjectSchemaBuilder::default()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// 校验 value；失败时返回违例字段与原因，如 "field `expression`: missing"
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        validate_at(&self.0, value, "")
    }
}

/// 手写对象 schema
#[derive(Debug, Default)]
pub struct ObjectSchemaBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
    deny_unknown: bool,
}

impl ObjectSchemaBuilder {
    pub fn required(mut self, name: &str, ty: &str, description: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({ "type": ty, "description": description }),
        );
        self.required.push(name.to_string());
        self
    }

    pub fn optional(mut self, name: &str, ty: &str, description: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({ "type": ty, "description": description }),
        );
        self
    }

    pub fn deny_unknown_fields(mut self) -> Self {
        self.deny_unknown = true;
        self
    }

    pub fn build(self) -> ToolSchema {
        let mut schema = json!({
            "type": "object",
            "properties": Value::Object(self.properties),
            "required": self.required,
        });
        if self.deny_unknown {
            schema["additionalProperties"] = Value::Bool(false);
        }
        ToolSchema(schema)
    }
}

fn field_label(path: &str) -> String {
    if path.is_empty() {
        "value".to_string()
    } else {
        format!("field `{path}`")
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn type_matches(ty: &str, value: &Value) -> bool {
    match ty {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        // `true` / 非对象 schema：不约束
        return Ok(());
    };
    if schema.contains_key("$ref") {
        return Ok(());
    }

    if let Some(ty) = schema.get("type") {
        let ok = match ty {
            Value::String(t) => type_matches(t, value),
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok {
            return Err(format!(
                "{}: expected {}, got {}",
                field_label(path),
                ty.as_str().map(String::from).unwrap_or_else(|| ty.to_string()),
                json_type_name(value)
            ));
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            return Err(format!("{}: value not in enum", field_label(path)));
        }
    }

    if let Value::Object(map) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(name) {
                    return Err(format!("{}: missing", field_label(&join_path(path, name))));
                }
            }
        }
        let properties = schema.get("properties").and_then(Value::as_object);
        for (key, v) in map {
            match properties.and_then(|p| p.get(key)) {
                Some(sub) => validate_at(sub, v, &join_path(path, key))?,
                None => {
                    if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                        return Err(format!(
                            "{}: unexpected",
                            field_label(&join_path(path, key))
                        ));
                    }
                }
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(item_schema, item, &format!("{}[{i}]", if path.is_empty() { "items" } else { path }))?;
        }
    }

    Ok(())
}

//! 工具签名与参数 JSON Schema（schemars 由参数结构体自动生成）
//!
//! 每次调用模型都会附带全部 ToolSignature，模型据此生成合法的工具调用参数。

use schemars::{schema_for, JsonSchema};
use serde::Serialize;
use serde_json::Value;

/// 发送给模型的工具描述
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSignature {
    pub name: String,
    pub description: String,
    /// 参数 JSON Schema（type = object）
    pub parameters: Value,
}

/// 由参数类型生成 JSON Schema；去掉模型不需要的 `$schema` / `title`
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    });
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
        map.entry("properties")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    value
}

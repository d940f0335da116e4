//! 工具注册表
//!
//! 注册时按名查重，调用时单次查找解析出处理入口（不存在即 Unknown），
//! 参数先按声明校验与纠偏再交给工具执行；每次分发输出结构化审计日志。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::memory::ToolInvocation;
use crate::tools::{parameters_schema, ParamKind, ParamSpec, Tool, ToolDefinition};

/// 注册与分发层的错误；分发错误最终以文本形式回流给模型，不上抛给调用方
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Duplicate tool: {0}")]
    Duplicate(String),

    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// 工具注册表：启动时注册完毕后只读
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；名称冲突返回 Duplicate
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 取一组工具（按给定顺序），用于按模式划分可见子集；未注册的名称被忽略
    pub fn subset(&self, names: &[String]) -> Vec<Arc<dyn Tool>> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n).cloned())
            .collect()
    }

    /// 子集的模型侧工具定义（名称、描述、参数 Schema）
    pub fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        self.subset(names)
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: parameters_schema(&t.parameters()),
            })
            .collect()
    }

    /// 分发一次调用：查找（Unknown）、校验与纠偏参数（InvalidArguments）、
    /// 同步等待工具执行并返回其文本结果。工具内部的业务失败不在此层出现，
    /// 它们已经被工具自己转成了文本。
    pub async fn dispatch(&self, invocation: &ToolInvocation) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(&invocation.name)
            .ok_or_else(|| ToolError::Unknown(invocation.name.clone()))?;

        let args = coerce_arguments(&invocation.name, &tool.parameters(), &invocation.arguments)?;

        let start = Instant::now();
        let output = tool.execute(&args).await;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": invocation.name,
            "call_id": invocation.id,
            "duration_ms": start.elapsed().as_millis() as u64,
            "output_chars": output.chars().count(),
        });
        tracing::info!(audit = %audit, "tool");

        Ok(output)
    }
}

/// 按声明校验参数：缺必填即错；类型不符先尽力纠偏（数字字符串转整数、
/// 标量转字符串），纠不过来才报 InvalidArguments。未声明的多余参数被丢弃。
fn coerce_arguments(
    tool: &str,
    params: &[ParamSpec],
    given: &Map<String, Value>,
) -> Result<Map<String, Value>, ToolError> {
    let invalid = |reason: String| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason,
    };

    let mut out = Map::new();
    for spec in params {
        let value = match given.get(spec.name) {
            Some(Value::Null) | None => {
                if spec.required {
                    return Err(invalid(format!("missing required parameter '{}'", spec.name)));
                }
                continue;
            }
            Some(v) => v,
        };

        let coerced = match (&spec.kind, value) {
            (ParamKind::String, Value::String(s)) => Value::String(s.clone()),
            (ParamKind::String, Value::Number(n)) => Value::String(n.to_string()),
            (ParamKind::String, Value::Bool(b)) => Value::String(b.to_string()),
            (ParamKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Value::Number(n.clone())
            }
            (ParamKind::Integer, Value::Number(n)) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Value::Number(Number::from(f as i64)),
                _ => {
                    return Err(invalid(format!(
                        "parameter '{}' expects an integer, got {n}",
                        spec.name
                    )))
                }
            },
            (ParamKind::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Number(Number::from(i)),
                Err(_) => {
                    return Err(invalid(format!(
                        "parameter '{}' expects an integer, got '{s}'",
                        spec.name
                    )))
                }
            },
            (ParamKind::Enum(allowed), v) => {
                let s = match v {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    other => {
                        return Err(invalid(format!(
                            "parameter '{}' expects one of {allowed:?}, got {other}",
                            spec.name
                        )))
                    }
                };
                if !allowed.contains(&s.as_str()) {
                    return Err(invalid(format!(
                        "parameter '{}' expects one of {allowed:?}, got '{s}'",
                        spec.name
                    )));
                }
                Value::String(s)
            }
            (_, other) => {
                return Err(invalid(format!(
                    "parameter '{}' has unsupported value {other}",
                    spec.name
                )))
            }
        };
        out.insert(spec.name.to_string(), coerced);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Répète le texte donné."
        }

        fn parameters(&self) -> Vec<ParamSpec> {
            vec![
                ParamSpec::required("texte", ParamKind::String, "Texte à répéter"),
                ParamSpec::optional("fois", ParamKind::Integer, "Nombre de répétitions"),
                ParamSpec::optional(
                    "ton",
                    ParamKind::Enum(&["neutre", "fort"]),
                    "Ton de la répétition",
                ),
            ]
        }

        async fn execute(&self, args: &Map<String, Value>) -> String {
            let texte = crate::tools::arg_str(args, "texte").unwrap_or_default();
            let fois = crate::tools::arg_i64(args, "fois").unwrap_or(1).max(1) as usize;
            vec![texte; fois].join(" ")
        }
    }

    fn invocation(args: Value) -> ToolInvocation {
        let Value::Object(map) = args else { panic!("args must be an object") };
        ToolInvocation::new("call_1", "echo", map)
    }

    #[test]
    fn register_rejects_duplicate_name() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        assert!(matches!(
            registry.register(EchoTool),
            Err(ToolError::Duplicate(name)) if name == "echo"
        ));
    }

    #[tokio::test]
    async fn dispatch_unknown_tool() {
        let registry = ToolRegistry::new();
        let inv = ToolInvocation::new("call_1", "inexistant", Map::new());
        assert!(matches!(
            registry.dispatch(&inv).await,
            Err(ToolError::Unknown(name)) if name == "inexistant"
        ));
    }

    #[tokio::test]
    async fn dispatch_missing_required_parameter() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let err = registry
            .dispatch(&invocation(serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn dispatch_coerces_numeric_string() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let out = registry
            .dispatch(&invocation(serde_json::json!({"texte": "ola", "fois": "2"})))
            .await
            .unwrap();
        assert_eq!(out, "ola ola");
    }

    #[tokio::test]
    async fn dispatch_rejects_bad_enum_value() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let err = registry
            .dispatch(&invocation(
                serde_json::json!({"texte": "ola", "ton": "murmure"}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn subset_preserves_requested_order_and_skips_unknown() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let names = vec!["absent".to_string(), "echo".to_string()];
        let subset = registry.subset(&names);
        assert_eq!(subset.len(), 1);
        assert_eq!(subset[0].name(), "echo");
    }

    #[test]
    fn definitions_expose_parameter_schema() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let defs = registry.definitions(&["echo".to_string()]);
        assert_eq!(defs.len(), 1);
        let schema = &defs[0].parameters;
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"][0], "texte");
        assert_eq!(schema["properties"]["ton"]["enum"][1], "fort");
    }
}

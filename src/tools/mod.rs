//! 工具箱
//!
//! 所有集成实现 Tool trait（name / description / parameters / execute），由
//! ToolRegistry 按名注册、校验参数并分发。工具自身永不向上抛错：内部失败
//! 一律转成人类可读的字符串，经同一通道交还给模型。

pub mod alarms;
pub mod anilist;
pub mod calendar;
pub mod hue;
pub mod meteo;
pub mod registry;
pub mod spotify;
pub mod system;
pub mod wiz;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub use alarms::{AlarmStore, CreerAlarmeTool};
pub use anilist::{AnilistClient, AjouterAnimeTool, GererWatchlistTool, RechercheAnimeTool};
pub use calendar::{AgendaAjoutTool, AgendaConsultTool, GoogleCalendarClient};
pub use hue::{HueClient, LumiereTool};
pub use meteo::MeteoTool;
pub use registry::{ToolError, ToolRegistry};
pub use spotify::{SpotifyClient, SpotifyTool};
pub use system::VolumeTool;
pub use wiz::{PriseTool, WizClient};

/// 参数类型；Enum 限定模型可给出的取值
#[derive(Clone, Debug)]
pub enum ParamKind {
    String,
    Integer,
    Enum(&'static [&'static str]),
}

/// 单个参数声明：名称、给模型看的描述、类型、是否必填
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind,
            required: true,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind,
            required: false,
        }
    }

    /// 该参数的 JSON Schema 片段
    fn schema(&self) -> Value {
        match &self.kind {
            ParamKind::String => json!({
                "type": "string",
                "description": self.description,
            }),
            ParamKind::Integer => json!({
                "type": "integer",
                "description": self.description,
            }),
            ParamKind::Enum(values) => json!({
                "type": "string",
                "enum": values,
                "description": self.description,
            }),
        }
    }
}

/// 将参数声明列表转成对象级 JSON Schema（注入模型的工具定义）
pub fn parameters_schema(params: &[ParamSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for p in params {
        properties.insert(p.name.to_string(), p.schema());
        if p.required {
            required.push(Value::String(p.name.to_string()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// 交给模型的工具描述：名称、说明与参数 Schema
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 工具 trait：名称、描述（供模型理解）、参数声明、异步执行
///
/// execute 收到的参数已由注册表按声明校验与纠偏；返回值始终是纯文本，
/// 拒绝与失败也以文本表达（模型在第二轮调用中对其作出反应）。
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Vec<ParamSpec>;

    async fn execute(&self, args: &Map<String, Value>) -> String;
}

/// 工具参数读取辅助：取字符串参数
pub(crate) fn arg_str<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(|v| v.as_str())
}

/// 工具参数读取辅助：取整数参数
pub(crate) fn arg_i64(args: &Map<String, Value>, name: &str) -> Option<i64> {
    args.get(name).and_then(|v| v.as_i64())
}

//! 系统音量工具
//!
//! 通过 ALSA 的 amixer 调整主音量（Raspberry Pi 上的全局输出）。

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;

use crate::tools::{arg_str, ParamKind, ParamSpec, Tool};

/// 音量工具：monter / baisser 各走 10%，mute 为开关切换
pub struct VolumeTool;

#[async_trait]
impl Tool for VolumeTool {
    fn name(&self) -> &str {
        "controle_media"
    }

    fn description(&self) -> &str {
        "Gère le volume du système (Raspberry Pi)."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "action",
            ParamKind::Enum(&["volume_monter", "volume_baisser", "mute"]),
            "Action volume système",
        )]
    }

    async fn execute(&self, args: &Map<String, Value>) -> String {
        let action = arg_str(args, "action").unwrap_or_default();

        let variation = match action {
            "mute" => "toggle",
            "volume_monter" => "10%+",
            _ => "10%-",
        };

        let status = Command::new("amixer")
            .args(["sset", "Master", variation])
            .status()
            .await;

        match status {
            Ok(_) => "Volume système ajusté.".to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "amixer introuvable ou en échec");
                "Erreur volume système.".to_string()
            }
        }
    }
}

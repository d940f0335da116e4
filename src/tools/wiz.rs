//! WiZ 智能插座工具
//!
//! 通过 UDP JSON 报文（setPilot / getPilot）控制插座，带超时与多次重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::tools::{arg_str, ParamKind, ParamSpec, Tool};

/// WiZ UDP 客户端：目标地址、端口与重试策略来自配置
pub struct WizClient {
    plug_ip: Option<String>,
    port: u16,
    attempts: u32,
    timeout: Duration,
}

impl WizClient {
    pub fn new(plug_ip: Option<String>, port: u16, attempts: u32, timeout_secs: u64) -> Self {
        Self {
            plug_ip,
            port,
            attempts: attempts.max(1),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// 发送一条 JSON 指令并等待回包；每次超时后稍候重试，耗尽次数返回 None
    async fn send(&self, payload: &Value) -> Option<Value> {
        let ip = self.plug_ip.as_deref()?;
        let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
        let message = payload.to_string();
        let target = format!("{ip}:{}", self.port);

        let mut buf = [0u8; 1024];
        for attempt in 0..self.attempts {
            if socket.send_to(message.as_bytes(), &target).await.is_err() {
                return None;
            }
            match timeout(self.timeout, socket.recv_from(&mut buf)).await {
                Ok(Ok((n, _))) => {
                    return serde_json::from_slice(&buf[..n]).ok();
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, attempt, "WiZ recv failed");
                    return None;
                }
                Err(_) => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
        None
    }
}

/// 插座工具：allumer / eteindre / statut
pub struct PriseTool {
    client: Arc<WizClient>,
}

impl PriseTool {
    pub fn new(client: Arc<WizClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for PriseTool {
    fn name(&self) -> &str {
        "commander_prise"
    }

    fn description(&self) -> &str {
        "Pilote la prise connectée WiZ (PC)."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "action",
            ParamKind::Enum(&["allumer", "eteindre", "statut"]),
            "Action prise connectée",
        )]
    }

    async fn execute(&self, args: &Map<String, Value>) -> String {
        if self.client.plug_ip.is_none() {
            return "IP de la prise WiZ non configurée.".to_string();
        }
        let action = arg_str(args, "action").unwrap_or_default();

        if action == "statut" {
            let payload = json!({"method": "getPilot", "params": {}});
            return match self.client.send(&payload).await {
                Some(reponse) => match reponse
                    .get("result")
                    .and_then(|r| r.get("state"))
                    .and_then(Value::as_bool)
                {
                    Some(true) => "La prise 'PC' est actuellement : Allumée 🟢".to_string(),
                    Some(false) => "La prise 'PC' est actuellement : Éteinte 🔴".to_string(),
                    None => "Réponse inattendue de la prise.".to_string(),
                },
                None => "Je n'arrive pas à joindre la prise (après plusieurs tentatives).".to_string(),
            };
        }

        let etat = action == "allumer";
        let payload = json!({"method": "setPilot", "params": {"state": etat}});
        match self.client.send(&payload).await {
            Some(reponse) => {
                let success = reponse
                    .get("result")
                    .and_then(|r| r.get("success"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if success {
                    format!("Prise {action}e avec succès.")
                } else {
                    // certaines versions répondent sans champ success : l'ordre est passé
                    format!("Ordre envoyé (Prise {action}e).")
                }
            }
            None => "La prise ne répond pas. Vérifie qu'elle est bien branchée.".to_string(),
        }
    }
}

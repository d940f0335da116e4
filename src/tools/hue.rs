//! Philips Hue 灯光工具
//!
//! 直接走桥接器的 REST API（/api/{username}/groups、/lights），目标名称
//! 先在分组里找（整个房间优先），找不到再匹配单灯。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{arg_str, ParamKind, ParamSpec, Tool};

/// 颜色名 -> CIE xy 坐标
const COULEURS_HUE: &[(&str, [f64; 2])] = &[
    ("rouge", [0.6679, 0.3181]),
    ("vert", [0.4091, 0.5180]),
    ("bleu", [0.1670, 0.0400]),
    ("jaune", [0.4325, 0.5007]),
    ("orange", [0.5562, 0.4084]),
    ("violet", [0.2700, 0.1300]),
    ("rose", [0.3800, 0.1400]),
    ("blanc", [0.3227, 0.3290]),
];

/// 查色表
fn couleur_xy(nom: &str) -> Option<[f64; 2]> {
    let nom = nom.to_lowercase();
    COULEURS_HUE
        .iter()
        .find(|(n, _)| *n == nom)
        .map(|(_, xy)| *xy)
}

/// 灯光目标：分组或单灯，携带桥接器侧的 id
enum Cible {
    Group(String),
    Light(String),
}

/// Hue 桥接器客户端；未配置地址/密钥时所有调用返回 None
pub struct HueClient {
    http: reqwest::Client,
    base: Option<String>,
}

impl HueClient {
    pub fn new(bridge_ip: Option<String>, username: Option<String>) -> Self {
        let username = username.or_else(|| std::env::var("HUE_USERNAME").ok());
        let base = match (bridge_ip, username) {
            (Some(ip), Some(user)) => Some(format!("http://{ip}/api/{user}")),
            _ => None,
        };
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base.is_some()
    }

    async fn get(&self, path: &str) -> Result<Value, String> {
        let base = self.base.as_ref().ok_or("pont non configuré")?;
        self.http
            .get(format!("{base}{path}"))
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())
    }

    async fn put_state(&self, cible: &Cible, state: Value) -> Result<(), String> {
        let base = self.base.as_ref().ok_or("pont non configuré")?;
        let url = match cible {
            Cible::Group(id) => format!("{base}/groups/{id}/action"),
            Cible::Light(id) => format!("{base}/lights/{id}/state"),
        };
        self.http
            .put(url)
            .json(&state)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// 名称解析：分组优先，其次单灯；不区分大小写的包含匹配
    async fn trouver_cible(&self, nom: &str) -> Result<Option<Cible>, String> {
        let nom = nom.to_lowercase();

        let groups = self.get("/groups").await?;
        if let Some(map) = groups.as_object() {
            for (id, info) in map {
                let group_name = info.get("name").and_then(Value::as_str).unwrap_or_default();
                if group_name.to_lowercase().contains(&nom) {
                    return Ok(Some(Cible::Group(id.clone())));
                }
            }
        }

        let lights = self.get("/lights").await?;
        if let Some(map) = lights.as_object() {
            for (id, info) in map {
                let light_name = info.get("name").and_then(Value::as_str).unwrap_or_default();
                if light_name.to_lowercase().contains(&nom) {
                    return Ok(Some(Cible::Light(id.clone())));
                }
            }
        }

        Ok(None)
    }
}

/// 灯光工具：allumer / eteindre / couleur / luminosite
pub struct LumiereTool {
    client: Arc<HueClient>,
}

impl LumiereTool {
    pub fn new(client: Arc<HueClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for LumiereTool {
    fn name(&self) -> &str {
        "commander_lumiere"
    }

    fn description(&self) -> &str {
        "Pilote les lumières Hue."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required(
                "action",
                ParamKind::Enum(&["allumer", "eteindre", "couleur", "luminosite"]),
                "Action lumière",
            ),
            ParamSpec::required("cible", ParamKind::String, "Nom de la lampe ou pièce (ex: Salon)"),
            ParamSpec::optional(
                "valeur",
                ParamKind::String,
                "Couleur (rouge, bleu...) ou luminosité (0-100)",
            ),
        ]
    }

    async fn execute(&self, args: &Map<String, Value>) -> String {
        if !self.client.is_configured() {
            return "Pont Hue injoignable.".to_string();
        }

        let action = arg_str(args, "action").unwrap_or_default();
        let cible_nom = arg_str(args, "cible").unwrap_or_default();
        let valeur = arg_str(args, "valeur");

        let cible = match self.client.trouver_cible(cible_nom).await {
            Ok(Some(c)) => c,
            Ok(None) => return format!("Lumière ou pièce '{cible_nom}' introuvable."),
            Err(e) => {
                tracing::warn!(error = %e, "pont Hue injoignable");
                return "Pont Hue injoignable.".to_string();
            }
        };

        let state = match action {
            "allumer" => json!({"on": true}),
            "eteindre" => json!({"on": false}),
            "couleur" => {
                let nom = valeur.unwrap_or_default();
                match couleur_xy(nom) {
                    Some(xy) => json!({"xy": xy}),
                    None => return format!("Couleur '{nom}' inconnue."),
                }
            }
            _ => {
                // luminosité : pourcentage utilisateur (0-100) -> octet Hue (0-254)
                let bri = valeur
                    .and_then(|v| v.trim().parse::<f64>().ok())
                    .map(|pct| (pct * 2.54).round().clamp(0.0, 254.0) as u8)
                    .unwrap_or(254);
                json!({"bri": bri})
            }
        };

        match self.client.put_state(&cible, state).await {
            Ok(()) => "Fait.".to_string(),
            Err(e) => format!("Erreur Hue: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_lookup_is_case_insensitive() {
        assert!(couleur_xy("Rouge").is_some());
        assert!(couleur_xy("BLEU").is_some());
        assert!(couleur_xy("turquoise").is_none());
    }

    #[tokio::test]
    async fn unconfigured_bridge_short_circuits() {
        let tool = LumiereTool::new(Arc::new(HueClient::new(None, None)));
        let mut args = Map::new();
        args.insert("action".into(), Value::String("allumer".into()));
        args.insert("cible".into(), Value::String("Salon".into()));
        assert_eq!(tool.execute(&args).await, "Pont Hue injoignable.");
    }
}

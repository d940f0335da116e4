//! Météo 工具
//!
//! 走 Open-Meteo 免费接口（无需 Key）：先地理编码取经纬度，再查当前气温。

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::tools::{arg_str, ParamKind, ParamSpec, Tool};

/// Météo 工具：城市名 -> 当前气温；未给城市时用配置的默认城市
pub struct MeteoTool {
    client: reqwest::Client,
    ville_defaut: String,
}

impl MeteoTool {
    pub fn new(ville_defaut: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            ville_defaut: ville_defaut.into(),
        }
    }

    async fn temperature(&self, ville: &str) -> Result<f64, String> {
        let geo_url = format!(
            "https://geocoding-api.open-meteo.com/v1/search?name={ville}&count=1&language=fr&format=json"
        );
        let geo: Value = self
            .client
            .get(&geo_url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;

        let premier = geo
            .get("results")
            .and_then(|r| r.get(0))
            .ok_or_else(|| "ville inconnue".to_string())?;
        let lat = premier.get("latitude").and_then(Value::as_f64).ok_or("latitude")?;
        let lon = premier.get("longitude").and_then(Value::as_f64).ok_or("longitude")?;

        let weather_url = format!(
            "https://api.open-meteo.com/v1/forecast?latitude={lat}&longitude={lon}&current=temperature_2m"
        );
        let weather: Value = self
            .client
            .get(&weather_url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;

        weather
            .get("current")
            .and_then(|c| c.get("temperature_2m"))
            .and_then(Value::as_f64)
            .ok_or_else(|| "température absente".to_string())
    }
}

#[async_trait]
impl Tool for MeteoTool {
    fn name(&self) -> &str {
        "obtenir_meteo"
    }

    fn description(&self) -> &str {
        "Donne la météo."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "ville",
            ParamKind::String,
            "Nom de la ville",
        )]
    }

    async fn execute(&self, args: &Map<String, Value>) -> String {
        let ville = match arg_str(args, "ville") {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => self.ville_defaut.clone(),
        };

        match self.temperature(&ville).await {
            Ok(temp) => format!("Il fait {temp}°C à {ville}."),
            Err(e) if e == "ville inconnue" => "Ville inconnue.".to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "météo indisponible");
                "Erreur météo.".to_string()
            }
        }
    }
}

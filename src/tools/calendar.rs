//! Google Agenda 工具
//!
//! 走 Calendar v3 REST 接口；token 文件里存 refresh token 与 OAuth 客户端，
//! access token 到期自动刷新。日期解析带两道防护：过去年份纠正到今年、
//! 纠正后仍在过去则拒绝创建。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::tools::{arg_str, ParamKind, ParamSpec, Tool};

const EVENTS_URL: &str = "https://www.googleapis.com/calendar/v3/calendars/primary/events";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// token 文件格式（与 OAuth2 authorized user 文件对齐）
#[derive(Debug, Deserialize)]
struct StoredToken {
    refresh_token: String,
    client_id: String,
    client_secret: String,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Calendar 客户端：token 文件路径与事件时区来自配置
pub struct GoogleCalendarClient {
    http: reqwest::Client,
    token_path: PathBuf,
    timezone: String,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleCalendarClient {
    pub fn new(token_path: PathBuf, timezone: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_path,
            timezone: timezone.into(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        let raw = std::fs::read_to_string(&self.token_path)
            .map_err(|_| "token absent".to_string())?;
        let stored: StoredToken =
            serde_json::from_str(&raw).map_err(|e| format!("token illisible: {e}"))?;

        let resp: Value = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", stored.refresh_token.as_str()),
                ("client_id", stored.client_id.as_str()),
                ("client_secret", stored.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;

        let access = resp
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("refresh refusé: {resp}"))?
            .to_string();
        let expires_in = resp
            .get("expires_in")
            .and_then(Value::as_u64)
            .unwrap_or(3600);

        *cached = Some(CachedToken {
            access_token: access.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in.saturating_sub(60)),
        });
        Ok(access)
    }

    async fn inserer_evenement(&self, titre: &str, debut: NaiveDateTime) -> Result<(), String> {
        let token = self.access_token().await?;
        let fin = debut + chrono::Duration::hours(1);
        let event = json!({
            "summary": titre,
            "start": {"dateTime": debut.format("%Y-%m-%dT%H:%M:%S").to_string(), "timeZone": self.timezone},
            "end": {"dateTime": fin.format("%Y-%m-%dT%H:%M:%S").to_string(), "timeZone": self.timezone},
        });
        let resp = self
            .http
            .post(EVENTS_URL)
            .bearer_auth(token)
            .json(&event)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        Ok(())
    }

    async fn evenements_du_jour(&self, jour: NaiveDate) -> Result<Vec<Value>, String> {
        let token = self.access_token().await?;
        let time_min = format!("{}T00:00:00Z", jour.format("%Y-%m-%d"));
        let time_max = format!("{}T23:59:59Z", jour.format("%Y-%m-%d"));
        let resp: Value = self
            .http
            .get(EVENTS_URL)
            .bearer_auth(token)
            .query(&[
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        Ok(resp
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

/// 解析模型给的 ISO 日期（容忍缺秒的形式）
fn parse_iso(date_str: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(date_str, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(date_str, "%Y-%m-%dT%H:%M"))
        .ok()
}

/// 过去年份纠正到今年（模型偶尔给出训练数据里的旧年份）
fn corriger_annee(dt: NaiveDateTime, annee_courante: i32) -> NaiveDateTime {
    if dt.year() >= annee_courante {
        return dt;
    }
    dt.with_year(annee_courante)
        // 29 février d'une année non bissextile
        .or_else(|| dt.with_day(28).and_then(|d| d.with_year(annee_courante)))
        .unwrap_or(dt)
}

/// 添加事件工具
pub struct AgendaAjoutTool {
    client: Arc<GoogleCalendarClient>,
}

impl AgendaAjoutTool {
    pub fn new(client: Arc<GoogleCalendarClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for AgendaAjoutTool {
    fn name(&self) -> &str {
        "ajouter_agenda"
    }

    fn description(&self) -> &str {
        "Ajoute un RDV à l'agenda."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("titre", ParamKind::String, "Titre de l'événement"),
            ParamSpec::required("date_str", ParamKind::String, "Date ISO (YYYY-MM-DDTHH:MM:SS)"),
        ]
    }

    async fn execute(&self, args: &Map<String, Value>) -> String {
        let titre = arg_str(args, "titre").unwrap_or_default();
        let date_str = arg_str(args, "date_str").unwrap_or_default();

        let Some(debut) = parse_iso(date_str) else {
            return "Je n'ai pas compris la date donnée par le système.".to_string();
        };

        let now = Local::now().naive_local();
        let debut = corriger_annee(debut, now.year());
        if debut < now {
            return "ERREUR_DATE_PASSEE: la date calculée est dans le passé".to_string();
        }

        match self.client.inserer_evenement(titre, debut).await {
            Ok(()) => format!(
                "C'est noté, '{titre}' ajouté pour le {} à {} heures.",
                debut.format("%d/%m"),
                debut.hour()
            ),
            Err(e) if e == "token absent" => {
                "Je n'ai pas accès à ton agenda Google (Token manquant).".to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "agenda insert");
                "J'ai eu un souci technique avec l'agenda.".to_string()
            }
        }
    }
}

/// 查询事件工具
pub struct AgendaConsultTool {
    client: Arc<GoogleCalendarClient>,
}

impl AgendaConsultTool {
    pub fn new(client: Arc<GoogleCalendarClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for AgendaConsultTool {
    fn name(&self) -> &str {
        "consulter_agenda"
    }

    fn description(&self) -> &str {
        "Lit l'agenda."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "date_cible_str",
            ParamKind::String,
            "Date cible ISO ou 'aujourd'hui'",
        )]
    }

    async fn execute(&self, args: &Map<String, Value>) -> String {
        let date_cible_str = arg_str(args, "date_cible_str").unwrap_or_default();
        let now = Local::now().naive_local();

        let cible = parse_iso(date_cible_str)
            .or_else(|| {
                NaiveDate::parse_from_str(date_cible_str, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .map(|dt| corriger_annee(dt, now.year()))
            .unwrap_or(now)
            .date();

        let events = match self.client.evenements_du_jour(cible).await {
            Ok(events) => events,
            Err(e) if e == "token absent" => return "Je n'ai pas accès à ton agenda.".to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "agenda list");
                return "Impossible de lire l'agenda pour l'instant.".to_string();
            }
        };

        if events.is_empty() {
            return "Rien de prévu pour le moment.".to_string();
        }

        let mut reponse = String::from("Voici le programme : ");
        for event in &events {
            let summary = event
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or("(sans titre)");
            // dateTime pour un horaire précis, date pour une journée entière
            let start = event
                .get("start")
                .and_then(|s| s.get("dateTime").or_else(|| s.get("date")))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let heure = match start.split_once('T') {
                Some((_, time)) => time.chars().take(5).collect::<String>(),
                None => "Toute la journée".to_string(),
            };
            reponse.push_str(&format!("{summary} à {heure}. "));
        }
        reponse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_iso_accepts_with_and_without_seconds() {
        assert!(parse_iso("2026-03-12T14:00:00").is_some());
        assert!(parse_iso("2026-03-12T14:00").is_some());
        assert!(parse_iso("demain").is_none());
    }

    #[test]
    fn past_year_is_corrected_to_current() {
        let dt = parse_iso("2023-03-12T14:00:00").unwrap();
        let fixed = corriger_annee(dt, 2026);
        assert_eq!(fixed.year(), 2026);
        assert_eq!(fixed.month(), 3);
    }

    #[test]
    fn leap_day_correction_falls_back_to_28() {
        let dt = parse_iso("2024-02-29T09:00:00").unwrap();
        let fixed = corriger_annee(dt, 2026);
        assert_eq!(fixed.year(), 2026);
        assert_eq!(fixed.day(), 28);
    }
}

//! Spotify 播放工具
//!
//! 走 Spotify Web API：refresh token 换 access token（带缓存），设备按名称
//! 解析（给了名字就模糊找，否则取当前活跃设备），play 支持「喜欢的歌曲」、
//! 用户歌单与全局搜索三条路径。闹钟任务也复用同一个客户端发起播放。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::tools::{arg_i64, arg_str, ParamKind, ParamSpec, Tool};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// 「喜欢的歌曲」的触发词
const MOTS_LIKES: &[&str] = &[
    "titres likés",
    "titres likes",
    "mes likes",
    "coups de cœur",
    "favoris",
    "ma musique",
    "mes titres likés",
    "titres reliqués",
];

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Spotify 客户端；凭证来自 SPOTIFY_CLIENT_ID / SECRET / REFRESH_TOKEN
pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyClient {
    pub fn from_env() -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id: std::env::var("SPOTIFY_CLIENT_ID").ok(),
            client_secret: std::env::var("SPOTIFY_CLIENT_SECRET").ok(),
            refresh_token: std::env::var("SPOTIFY_REFRESH_TOKEN").ok(),
            token: Mutex::new(None),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some() && self.refresh_token.is_some()
    }

    /// 取 access token；缓存未过期时直接复用，否则用 refresh token 换新
    async fn access_token(&self) -> Result<String, String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        let (id, secret, refresh) = match (&self.client_id, &self.client_secret, &self.refresh_token)
        {
            (Some(i), Some(s), Some(r)) => (i, s, r),
            _ => return Err("Spotify non configuré".to_string()),
        };

        let resp: Value = self
            .http
            .post(TOKEN_URL)
            .basic_auth(id, Some(secret))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh)])
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;

        let access = resp
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("réponse token inattendue: {resp}"))?
            .to_string();
        let expires_in = resp
            .get("expires_in")
            .and_then(Value::as_u64)
            .unwrap_or(3600);

        *cached = Some(CachedToken {
            access_token: access.clone(),
            // marge de 60 s avant l'expiration réelle
            expires_at: Instant::now() + Duration::from_secs(expires_in.saturating_sub(60)),
        });
        Ok(access)
    }

    async fn get(&self, url: &str) -> Result<Value, String> {
        let token = self.access_token().await?;
        self.http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())
    }

    /// PUT/POST 控制指令；corps 为 None 时发送空请求
    async fn command(&self, method: reqwest::Method, url: &str, corps: Option<Value>) -> Result<(), String> {
        let token = self.access_token().await?;
        let mut req = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = corps {
            req = req.json(&body);
        }
        let resp = req.send().await.map_err(|e| e.to_string())?;
        if resp.status().is_client_error() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {text}"));
        }
        Ok(())
    }

    /// 设备解析：给了名字按包含匹配找；否则取活跃设备，退而取第一个
    async fn trouver_device(&self, nom: Option<&str>) -> Result<Option<String>, String> {
        let devices = self.get(&format!("{API_BASE}/me/player/devices")).await?;
        let devices = devices
            .get("devices")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if devices.is_empty() {
            return Ok(None);
        }

        if let Some(nom) = nom {
            let nom_low = nom.to_lowercase();
            for d in &devices {
                let d_name = d.get("name").and_then(Value::as_str).unwrap_or_default();
                if d_name.to_lowercase().contains(&nom_low) {
                    return Ok(d.get("id").and_then(Value::as_str).map(String::from));
                }
            }
            // recherche spécifique échouée : on le signale plutôt que de jouer ailleurs
            return Ok(None);
        }

        let actif = devices
            .iter()
            .find(|d| d.get("is_active").and_then(Value::as_bool).unwrap_or(false))
            .or_else(|| devices.first());
        Ok(actif
            .and_then(|d| d.get("id"))
            .and_then(Value::as_str)
            .map(String::from))
    }

    /// 入口：play / pause / next / previous；recherche 与 position 只对 play 有意义。
    /// 所有失败路径都折叠成法语文本。
    pub async fn commander(
        &self,
        action: &str,
        recherche: Option<&str>,
        appareil: Option<&str>,
        position: Option<i64>,
    ) -> String {
        if !self.is_configured() {
            return "Spotify non configuré.".to_string();
        }

        tracing::info!(action, ?recherche, ?appareil, ?position, "spotify");

        let device_id = match self.trouver_device(appareil).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                return match appareil {
                    Some(nom) => format!("Je ne trouve pas l'appareil '{nom}'."),
                    None => "Aucun appareil Spotify disponible.".to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "spotify devices");
                return "Erreur technique Spotify.".to_string();
            }
        };

        // l'utilisateur dit "3ème", l'API veut l'index 2
        let offset_idx = position.map(|p| (p - 1).max(0) as usize).unwrap_or(0);

        let result = match action {
            "play" => return self.lancer_lecture(&device_id, recherche, offset_idx).await,
            "pause" => self
                .command(
                    reqwest::Method::PUT,
                    &format!("{API_BASE}/me/player/pause?device_id={device_id}"),
                    None,
                )
                .await
                .map(|_| "Pause."),
            "next" => self
                .command(
                    reqwest::Method::POST,
                    &format!("{API_BASE}/me/player/next?device_id={device_id}"),
                    None,
                )
                .await
                .map(|_| "Suivant."),
            "previous" => self
                .command(
                    reqwest::Method::POST,
                    &format!("{API_BASE}/me/player/previous?device_id={device_id}"),
                    None,
                )
                .await
                .map(|_| "Précédent."),
            _ => return "Action inconnue.".to_string(),
        };

        match result {
            Ok(msg) => msg.to_string(),
            Err(e) if e.contains("No active device") => "Aucun lecteur actif.".to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "spotify command");
                "Erreur technique Spotify.".to_string()
            }
        }
    }

    /// Logique du play : Titres Likés > playlist utilisateur > recherche globale.
    async fn lancer_lecture(
        &self,
        device_id: &str,
        recherche: Option<&str>,
        offset_idx: usize,
    ) -> String {
        // position sans titre : on assume les Titres Likés
        let recherche = match recherche {
            None if offset_idx > 0 => Some("Titres Likés".to_string()),
            other => other.map(String::from),
        };

        // reprise simple
        let Some(recherche) = recherche else {
            return match self
                .command(
                    reqwest::Method::PUT,
                    &format!("{API_BASE}/me/player/play?device_id={device_id}"),
                    None,
                )
                .await
            {
                Ok(()) => "Lecture.".to_string(),
                Err(e) => {
                    tracing::warn!(error = %e, "spotify play");
                    "Erreur technique Spotify.".to_string()
                }
            };
        };

        let recherche_low = recherche.to_lowercase();

        // --- A. Titres Likés ---
        if MOTS_LIKES.iter().any(|m| recherche_low.contains(m)) {
            let limit = if offset_idx > 40 { offset_idx + 10 } else { 50 };
            let saved = match self
                .get(&format!("{API_BASE}/me/tracks?limit={}", limit.min(50)))
                .await
            {
                Ok(v) => v,
                Err(_) => return "Erreur lors du lancement des likes.".to_string(),
            };
            let uris: Vec<String> = saved
                .get("items")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|i| i.get("track")?.get("uri")?.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            if uris.is_empty() {
                return "Bibliothèque vide.".to_string();
            }

            let _ = self
                .command(
                    reqwest::Method::PUT,
                    &format!("{API_BASE}/me/player/shuffle?state=false&device_id={device_id}"),
                    None,
                )
                .await;

            let safe_offset = if offset_idx < uris.len() { offset_idx } else { 0 };
            let corps = json!({"uris": uris[safe_offset..].to_vec()});
            return match self
                .command(
                    reqwest::Method::PUT,
                    &format!("{API_BASE}/me/player/play?device_id={device_id}"),
                    Some(corps),
                )
                .await
            {
                Ok(()) => format!("Titres likés lancés à partir du titre n°{}.", safe_offset + 1),
                Err(_) => "Erreur lors du lancement des likes.".to_string(),
            };
        }

        // --- B. Playlists utilisateur ---
        if let Ok(playlists) = self.get(&format!("{API_BASE}/me/playlists?limit=50")).await {
            let found = playlists
                .get("items")
                .and_then(Value::as_array)
                .and_then(|items| {
                    items.iter().find(|p| {
                        p.get("name")
                            .and_then(Value::as_str)
                            .map(|n| n.to_lowercase().contains(&recherche_low))
                            .unwrap_or(false)
                    })
                })
                .and_then(|p| {
                    Some((
                        p.get("name")?.as_str()?.to_string(),
                        p.get("uri")?.as_str()?.to_string(),
                    ))
                });

            if let Some((nom, uri)) = found {
                let _ = self
                    .command(
                        reqwest::Method::PUT,
                        &format!("{API_BASE}/me/player/shuffle?state=false&device_id={device_id}"),
                        None,
                    )
                    .await;
                let mut corps = json!({"context_uri": uri});
                if offset_idx > 0 {
                    corps["offset"] = json!({"position": offset_idx});
                }
                if self
                    .command(
                        reqwest::Method::PUT,
                        &format!("{API_BASE}/me/player/play?device_id={device_id}"),
                        Some(corps),
                    )
                    .await
                    .is_ok()
                {
                    return format!("Playlist '{nom}' lancée.");
                }
            }
        }

        // --- C. Recherche globale (titres puis artistes) ---
        let results = match self
            .get(&format!(
                "{API_BASE}/search?q={}&limit=1&type=track,artist",
                recherche.replace(' ', "+")
            ))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "spotify search");
                return "Erreur technique Spotify.".to_string();
            }
        };

        if let Some(track) = results
            .get("tracks")
            .and_then(|t| t.get("items"))
            .and_then(|i| i.get(0))
        {
            let uri = track.get("uri").and_then(Value::as_str).unwrap_or_default();
            let nom = track.get("name").and_then(Value::as_str).unwrap_or_default();
            let corps = json!({"uris": [uri]});
            if self
                .command(
                    reqwest::Method::PUT,
                    &format!("{API_BASE}/me/player/play?device_id={device_id}"),
                    Some(corps),
                )
                .await
                .is_ok()
            {
                return format!("Titre '{nom}' lancé.");
            }
        }

        if let Some(artist) = results
            .get("artists")
            .and_then(|a| a.get("items"))
            .and_then(|i| i.get(0))
        {
            let uri = artist.get("uri").and_then(Value::as_str).unwrap_or_default();
            let nom = artist.get("name").and_then(Value::as_str).unwrap_or_default();
            let corps = json!({"context_uri": uri});
            if self
                .command(
                    reqwest::Method::PUT,
                    &format!("{API_BASE}/me/player/play?device_id={device_id}"),
                    Some(corps),
                )
                .await
                .is_ok()
            {
                return format!("Artiste '{nom}' lancé.");
            }
        }

        format!("Rien trouvé pour {recherche}.")
    }
}

/// 音乐工具：play / pause / next / previous，可指定曲目、目标设备与起始曲号
pub struct SpotifyTool {
    client: Arc<SpotifyClient>,
}

impl SpotifyTool {
    pub fn new(client: Arc<SpotifyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for SpotifyTool {
    fn name(&self) -> &str {
        "commander_spotify"
    }

    fn description(&self) -> &str {
        "Pilote la musique Spotify."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required(
                "action",
                ParamKind::Enum(&["play", "pause", "next", "previous"]),
                "Action à effectuer",
            ),
            ParamSpec::optional(
                "recherche",
                ParamKind::String,
                "Titre, artiste ou 'Titres Likés'",
            ),
            ParamSpec::optional("appareil", ParamKind::String, "Nom de l'appareil cible"),
            ParamSpec::optional("position", ParamKind::Integer, "Numéro de piste (si playlist)"),
        ]
    }

    async fn execute(&self, args: &Map<String, Value>) -> String {
        let action = arg_str(args, "action").unwrap_or_default();
        let recherche = arg_str(args, "recherche");
        let appareil = arg_str(args, "appareil");
        let position = arg_i64(args, "position");

        self.client
            .commander(action, recherche, appareil, position)
            .await
    }
}

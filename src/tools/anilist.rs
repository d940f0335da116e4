//! AniList 追番工具
//!
//! GraphQL 接口：搜索动漫（带确认流程标记）、确认后加入 watchlist、列出/移除。
//! watchlist 与已通知历史都是 JSON 文件；check_new_episodes 给后台任务用，
//! 在 ±1 小时窗口里查 airingSchedules 并用历史去重。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{arg_i64, arg_str, ParamKind, ParamSpec, Tool};

const ANILIST_API_URL: &str = "https://graphql.anilist.co";
/// 历史条目上限，防止文件无限增长
const HISTORY_CAP: usize = 200;

/// 检测到的新一集，交给聊天通知
#[derive(Clone, Debug)]
pub struct NouvelEpisode {
    pub titre: String,
    pub episode: i64,
    pub crunchy_url: String,
    pub anilist_url: String,
    pub image_url: String,
}

/// AniList 客户端：GraphQL 调用 + watchlist / 历史文件
pub struct AnilistClient {
    http: reqwest::Client,
    watchlist_path: PathBuf,
    history_path: PathBuf,
}

impl AnilistClient {
    pub fn new(watchlist_path: PathBuf, history_path: PathBuf) -> Self {
        Self {
            http: reqwest::Client::new(),
            watchlist_path,
            history_path,
        }
    }

    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, String> {
        let resp: Value = self
            .http
            .post(ANILIST_API_URL)
            .json(&json!({"query": query, "variables": variables}))
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        if resp.get("errors").is_some() {
            return Err(format!("GraphQL errors: {}", resp["errors"]));
        }
        Ok(resp)
    }

    fn load_ids(&self, path: &PathBuf) -> Vec<i64> {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    fn save_json<T: serde::Serialize>(&self, path: &PathBuf, data: &T) {
        let write = || -> Result<(), String> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
            let raw = serde_json::to_string_pretty(data).map_err(|e| e.to_string())?;
            std::fs::write(path, raw).map_err(|e| e.to_string())
        };
        if let Err(e) = write() {
            tracing::warn!(error = %e, path = %path.display(), "sauvegarde JSON");
        }
    }

    pub fn watchlist(&self) -> Vec<i64> {
        self.load_ids(&self.watchlist_path)
    }

    /// 搜索单部动漫；返回给模型/用户看的确认文本块
    /// （"ID:" + "Demande confirmation" 也是路由器的上下文标记）
    pub async fn rechercher(&self, query: &str) -> String {
        let gql = r"
        query ($search: String) {
          Media (search: $search, type: ANIME) {
            id
            title { romaji }
            coverImage { large }
            siteUrl
          }
        }";
        let resp = match self.graphql(gql, json!({"search": query})).await {
            Ok(r) => r,
            Err(e) => return format!("Erreur API AniList : {e}"),
        };

        let Some(media) = resp.pointer("/data/Media").filter(|m| !m.is_null()) else {
            return "❌ Anime introuvable sur AniList.".to_string();
        };
        let id = media.get("id").and_then(Value::as_i64).unwrap_or_default();
        let titre = media
            .pointer("/title/romaji")
            .and_then(Value::as_str)
            .unwrap_or("(inconnu)");
        let image = media
            .pointer("/coverImage/large")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let url = media
            .get("siteUrl")
            .and_then(Value::as_str)
            .unwrap_or_default();

        format!(
            "J'ai trouvé : {titre} (ID: {id})\nLien image: {image}\nURL: {url}\nDemande confirmation à l'utilisateur."
        )
    }

    /// 确认后加入 watchlist（去重）
    pub fn ajouter_confirme(&self, media_id: i64, titre: &str) -> String {
        let mut ids = self.watchlist();
        if ids.contains(&media_id) {
            return format!("⚠️ {titre} est déjà dans la liste.");
        }
        ids.push(media_id);
        self.save_json(&self.watchlist_path, &ids);
        format!("✅ {titre} a été ajouté aux notifications.")
    }

    /// 列出 watchlist 的标题
    pub async fn lister(&self) -> String {
        let ids = self.watchlist();
        if ids.is_empty() {
            return "La watchlist est vide.".to_string();
        }
        let gql = r"
        query ($ids: [Int]) {
          Page { media(id_in: $ids) { title { romaji } } }
        }";
        let resp = match self.graphql(gql, json!({"ids": ids})).await {
            Ok(r) => r,
            Err(_) => return "Erreur API lors du listing.".to_string(),
        };
        let titres: Vec<String> = resp
            .pointer("/data/Page/media")
            .and_then(Value::as_array)
            .map(|medias| {
                medias
                    .iter()
                    .filter_map(|m| m.pointer("/title/romaji")?.as_str())
                    .map(|t| format!("- {t}"))
                    .collect()
            })
            .unwrap_or_default();
        format!("**📺 Watchlist actuelle :**\n{}", titres.join("\n"))
    }

    /// 按名称从 watchlist 移除
    pub async fn supprimer(&self, query: &str) -> String {
        let gql = r"
        query ($s: String) { Media (search: $s, type: ANIME) { id title { romaji } } }";
        let resp = match self.graphql(gql, json!({"s": query})).await {
            Ok(r) => r,
            Err(_) => return "Je ne trouve pas cet anime pour le supprimer.".to_string(),
        };
        let Some(media) = resp.pointer("/data/Media").filter(|m| !m.is_null()) else {
            return "Je ne trouve pas cet anime pour le supprimer.".to_string();
        };
        let target_id = media.get("id").and_then(Value::as_i64).unwrap_or_default();
        let titre = media
            .pointer("/title/romaji")
            .and_then(Value::as_str)
            .unwrap_or("(inconnu)")
            .to_string();

        let mut ids = self.watchlist();
        if let Some(pos) = ids.iter().position(|id| *id == target_id) {
            ids.remove(pos);
            self.save_json(&self.watchlist_path, &ids);
            format!("🗑️ {titre} retiré de la watchlist.")
        } else {
            format!("{titre} n'était pas dans la liste.")
        }
    }

    /// 后台检查：±1h 窗口内已到播出时刻（含 2 分钟的提前量）的新集数，
    /// 用历史文件去重；历史超过上限时只保留最近条目
    pub async fn check_new_episodes(&self, now_ts: i64) -> Vec<NouvelEpisode> {
        let watchlist = self.watchlist();
        if watchlist.is_empty() {
            return Vec::new();
        }
        let mut history: Vec<String> = std::fs::read_to_string(&self.history_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        let gql = r"
        query ($start: Int, $end: Int, $ids: [Int]) {
          Page {
            airingSchedules(airingAt_greater: $start, airingAt_lesser: $end, mediaId_in: $ids) {
              episode
              airingAt
              media {
                id
                title { romaji }
                siteUrl
                coverImage { large }
                externalLinks { site url }
              }
            }
          }
        }";
        let variables = json!({
            "start": now_ts - 3600,
            "end": now_ts + 3600,
            "ids": watchlist,
        });
        let resp = match self.graphql(gql, variables).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "check animes");
                return Vec::new();
            }
        };

        let schedules = resp
            .pointer("/data/Page/airingSchedules")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut nouveaux = Vec::new();
        for item in schedules {
            let media_id = item.pointer("/media/id").and_then(Value::as_i64).unwrap_or_default();
            let episode = item.get("episode").and_then(Value::as_i64).unwrap_or_default();
            let airing_at = item.get("airingAt").and_then(Value::as_i64).unwrap_or(i64::MAX);

            let unique_id = format!("{media_id}_EP{episode}");
            if history.contains(&unique_id) || airing_at > now_ts + 120 {
                continue;
            }

            let anilist_url = item
                .pointer("/media/siteUrl")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let crunchy_url = item
                .pointer("/media/externalLinks")
                .and_then(Value::as_array)
                .and_then(|links| {
                    links.iter().find(|l| {
                        l.get("site")
                            .and_then(Value::as_str)
                            .map(|s| s.contains("Crunchyroll"))
                            .unwrap_or(false)
                    })
                })
                .and_then(|l| l.get("url"))
                .and_then(Value::as_str)
                .unwrap_or(&anilist_url)
                .to_string();

            nouveaux.push(NouvelEpisode {
                titre: item
                    .pointer("/media/title/romaji")
                    .and_then(Value::as_str)
                    .unwrap_or("(inconnu)")
                    .to_string(),
                episode,
                crunchy_url,
                anilist_url,
                image_url: item
                    .pointer("/media/coverImage/large")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
            history.push(unique_id);
        }

        if history.len() > HISTORY_CAP {
            history = history.split_off(history.len() - HISTORY_CAP);
        }
        if !nouveaux.is_empty() {
            self.save_json(&self.history_path, &history);
        }
        nouveaux
    }
}

/// 搜索工具：添加前先找到 ID 与封面，并要求用户确认
pub struct RechercheAnimeTool {
    client: Arc<AnilistClient>,
}

impl RechercheAnimeTool {
    pub fn new(client: Arc<AnilistClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for RechercheAnimeTool {
    fn name(&self) -> &str {
        "recherche_anime"
    }

    fn description(&self) -> &str {
        "Cherche un anime sur AniList (ID/Image) AVANT ajout."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "query",
            ParamKind::String,
            "Nom de l'anime à chercher",
        )]
    }

    async fn execute(&self, args: &Map<String, Value>) -> String {
        let query = arg_str(args, "query").unwrap_or_default();
        self.client.rechercher(query).await
    }
}

/// 确认入列工具（只有用户明确 'confirme <id>' 之后才被模型调用）
pub struct AjouterAnimeTool {
    client: Arc<AnilistClient>,
}

impl AjouterAnimeTool {
    pub fn new(client: Arc<AnilistClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for AjouterAnimeTool {
    fn name(&self) -> &str {
        "ajouter_anime_confirme"
    }

    fn description(&self) -> &str {
        "Ajoute un anime confirmé à la watchlist."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("media_id", ParamKind::Integer, "ID de l'anime trouvé"),
            ParamSpec::required("titre", ParamKind::String, "Titre de l'anime"),
        ]
    }

    async fn execute(&self, args: &Map<String, Value>) -> String {
        let Some(media_id) = arg_i64(args, "media_id") else {
            return "Erreur : L'ID doit être un nombre.".to_string();
        };
        let titre = arg_str(args, "titre").unwrap_or("(inconnu)");
        self.client.ajouter_confirme(media_id, titre)
    }
}

/// watchlist 管理工具：lister / supprimer
pub struct GererWatchlistTool {
    client: Arc<AnilistClient>,
}

impl GererWatchlistTool {
    pub fn new(client: Arc<AnilistClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for GererWatchlistTool {
    fn name(&self) -> &str {
        "gerer_watchlist"
    }

    fn description(&self) -> &str {
        "Liste ou supprime des animes de la watchlist."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required(
                "action",
                ParamKind::Enum(&["lister", "supprimer"]),
                "Action watchlist",
            ),
            ParamSpec::optional("query", ParamKind::String, "Nom de l'anime si suppression"),
        ]
    }

    async fn execute(&self, args: &Map<String, Value>) -> String {
        match arg_str(args, "action").unwrap_or_default() {
            "lister" => self.client.lister().await,
            "supprimer" => {
                let query = arg_str(args, "query").unwrap_or_default();
                if query.trim().is_empty() {
                    return "Quel anime faut-il supprimer ?".to_string();
                }
                self.client.supprimer(query).await
            }
            _ => "Action inconnue.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (tempfile::TempDir, AnilistClient) {
        let dir = tempfile::tempdir().unwrap();
        let client = AnilistClient::new(
            dir.path().join("watchlist.json"),
            dir.path().join("historique.json"),
        );
        (dir, client)
    }

    #[test]
    fn watchlist_starts_empty() {
        let (_dir, client) = client();
        assert!(client.watchlist().is_empty());
    }

    #[test]
    fn add_confirmed_deduplicates() {
        let (_dir, client) = client();
        let first = client.ajouter_confirme(154587, "Sousou no Frieren");
        assert!(first.starts_with("✅"));
        assert_eq!(client.watchlist(), vec![154587]);

        let second = client.ajouter_confirme(154587, "Sousou no Frieren");
        assert!(second.starts_with("⚠️"));
        assert_eq!(client.watchlist().len(), 1);
    }

    #[tokio::test]
    async fn empty_watchlist_lists_without_network() {
        let (_dir, client) = client();
        assert_eq!(client.lister().await, "La watchlist est vide.");
    }

    #[tokio::test]
    async fn episode_check_skips_empty_watchlist() {
        let (_dir, client) = client();
        assert!(client.check_new_episodes(1_700_000_000).await.is_empty());
    }
}

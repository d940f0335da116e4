//! 模式路由
//!
//! 判定当前轮该由哪个行为模式接手（家居 / 动漫追番）。优先级：
//! 1. 上下文延续 —— 从末尾向前扫描 assistant/tool 轮（遇到用户轮即停），
//!    命中待确认标记或领域关键词则沿用动漫模式；没有这一步，"confirme 42"
//!    之类的单句确认会被误路由，打断多轮确认流程；
//! 2. 显式确认指令（confirme <id> / wl）；
//! 3. 关键词；
//! 4. 默认家居模式。

use chrono::{DateTime, Local};
use regex::Regex;

use crate::memory::Turn;

/// 行为模式标识
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModeId {
    /// 家居（默认）：音乐、灯光、插座、agenda、météo、音量、闹钟
    Domotique,
    /// 动漫追番：搜索、确认后入列、watchlist 管理
    Anime,
}

/// 回复推导策略（见 orchestrator::derive_reply）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyPolicy {
    /// 只要有工具产出，回复就是工具产出本身，模型的二次叙述被丢弃
    /// （避免模型转述设备状态时改错事实）
    ToolOutputWins,
    /// 取最近一条非空助手文本
    AssistantText,
}

/// 模式：系统指令模板 + 可见工具子集 + 回复策略；每回合重新判定，不持久化
#[derive(Clone, Debug)]
pub struct Mode {
    pub id: ModeId,
    pub instruction: String,
    pub tools: Vec<String>,
    pub reply_policy: ReplyPolicy,
}

impl Mode {
    /// 指令模板加上当前时钟后缀；每回合刷新进系统轮
    pub fn instruction_with_clock(&self, now: DateTime<Local>) -> String {
        format!(
            "{}\nDate: {} (Europe/Paris).",
            self.instruction,
            now.format("%A %d/%m/%Y %H:%M")
        )
    }
}

const PROMPT_BASE: &str = "Tu es Enola, une IA domotique.\n\
Tu es efficace, concise, et tu réponds en français.\n\
Si une action est demandée, utilise les tools disponibles.\n\
Si l'utilisateur demande un truc non supporté, dis-le et propose ce que tu peux faire.\n";

const PROMPT_ANIME: &str = "Tu es Enola, assistante de suivi d'animés.\n\
Tu réponds en français, court.\n\
Règle stricte ajout: si l'utilisateur veut ajouter un animé, tu dois d'abord appeler recherche_anime, \
afficher le titre + l'URL d'image (texte brut), puis attendre une confirmation explicite \
(ex: 'confirme <id>'). Ensuite seulement tu peux appeler ajouter_anime_confirme.\n\
Garde tout le reste dans gerer_watchlist.\n\
Ne parle pas de domotique/agenda ici.\n";

/// 动漫模式独占的工具名
pub const ANIME_TOOLS: &[&str] = &["recherche_anime", "ajouter_anime_confirme", "gerer_watchlist"];

/// 家居模式的工具名
pub const DOMO_TOOLS: &[&str] = &[
    "commander_spotify",
    "commander_lumiere",
    "commander_prise",
    "ajouter_agenda",
    "consulter_agenda",
    "obtenir_meteo",
    "controle_media",
    "creer_alarme",
];

/// 内置的两个模式
pub fn default_modes() -> Vec<Mode> {
    let domo_instruction = format!(
        "{PROMPT_BASE}Règle: si tu utilises un tool, ta réponse finale doit être uniquement le retour du tool.\n"
    );
    vec![
        Mode {
            id: ModeId::Domotique,
            instruction: domo_instruction,
            tools: DOMO_TOOLS.iter().map(|s| s.to_string()).collect(),
            reply_policy: ReplyPolicy::ToolOutputWins,
        },
        Mode {
            id: ModeId::Anime,
            instruction: PROMPT_ANIME.to_string(),
            tools: ANIME_TOOLS.iter().map(|s| s.to_string()).collect(),
            reply_policy: ReplyPolicy::AssistantText,
        },
    ]
}

/// 模式判定器：当前话语 + 会话尾部的纯函数
pub struct ModeClassifier {
    confirm_re: Regex,
    watchlist_re: Regex,
    keywords: Vec<&'static str>,
}

impl Default for ModeClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeClassifier {
    pub fn new() -> Self {
        Self {
            confirm_re: Regex::new(r"\bconfirme\s+\d+\b").expect("confirm regex"),
            watchlist_re: Regex::new(r"\bwl\b").expect("watchlist regex"),
            keywords: vec![
                "anime",
                "animé",
                "anilist",
                "watchlist",
                "liste d'anim",
                "liste d’an",
                "épisode",
                "episode",
                "saison",
                "crunchyroll",
            ],
        }
    }

    /// 判定本轮归属模式。tail 为追加本轮用户消息之前的会话日志。
    pub fn classify(&self, text: &str, tail: &[Turn]) -> ModeId {
        // 1. 上下文延续：只看最近一段（最后一条用户轮之后的 assistant/tool 轮）
        for turn in tail.iter().rev() {
            match turn {
                Turn::Assistant { content, .. } | Turn::Tool { content, .. }
                    if !content.is_empty() =>
                {
                    // 待确认标记（recherche_anime 的输出签名）
                    if content.contains("ID:") && content.contains("Demande confirmation") {
                        return ModeId::Anime;
                    }
                    // 已经在动漫话题里
                    if content.contains("AniList")
                        || content.contains("Watchlist")
                        || content.contains("Crunchyroll")
                    {
                        return ModeId::Anime;
                    }
                }
                // 跨过上一条用户消息就越过了回合边界，停止扫描
                Turn::User { .. } => break,
                _ => {}
            }
        }

        // 2. 显式确认 / watchlist 缩写
        let t = text.to_lowercase();
        if self.confirm_re.is_match(&t) || self.watchlist_re.is_match(&t) {
            return ModeId::Anime;
        }

        // 3. 关键词
        if self.keywords.iter().any(|k| t.contains(k)) {
            return ModeId::Anime;
        }

        // 4. 默认
        ModeId::Domotique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_domotique() {
        let c = ModeClassifier::new();
        assert_eq!(c.classify("allume le salon", &[]), ModeId::Domotique);
    }

    #[test]
    fn keyword_routes_to_anime() {
        let c = ModeClassifier::new();
        assert_eq!(c.classify("ajoute un anime", &[]), ModeId::Anime);
        assert_eq!(c.classify("un nouvel ÉPISODE est sorti ?", &[]), ModeId::Anime);
    }

    #[test]
    fn confirm_pattern_routes_to_anime_without_context() {
        let c = ModeClassifier::new();
        assert_eq!(c.classify("confirme 12345", &[]), ModeId::Anime);
        assert_eq!(c.classify("wl", &[]), ModeId::Anime);
    }

    #[test]
    fn pending_confirmation_marker_sticks_to_anime() {
        let c = ModeClassifier::new();
        let tail = vec![
            Turn::user("ajoute Frieren"),
            Turn::tool(
                "call_1",
                "J'ai trouvé : Sousou no Frieren (ID: 154587)\nDemande confirmation à l'utilisateur.",
            ),
        ];
        // "confirme 7" matcherait aussi par motif explicite ; le contexte prime
        assert_eq!(c.classify("confirme 7", &tail), ModeId::Anime);
        // même un simple "oui" reste dans le mode animé grâce au contexte
        assert_eq!(c.classify("oui", &tail), ModeId::Anime);
    }

    #[test]
    fn context_scan_stops_at_previous_user_turn() {
        let c = ModeClassifier::new();
        // le marqueur existe mais AVANT le dernier message utilisateur :
        // il ne doit pas être considéré
        let tail = vec![
            Turn::tool("call_1", "Watchlist actuelle : ..."),
            Turn::user("allume la lumière"),
            Turn::assistant("Fait."),
        ];
        assert_eq!(c.classify("éteins tout", &tail), ModeId::Domotique);
    }

    #[test]
    fn context_beats_keyword_disagreement() {
        let c = ModeClassifier::new();
        // contexte animé + phrase purement domotique : le contexte gagne
        let tail = vec![
            Turn::user("ma watchlist"),
            Turn::tool("call_9", "**📺 Watchlist actuelle :**\n- Frieren"),
        ];
        assert_eq!(c.classify("supprime le premier", &tail), ModeId::Anime);
    }

    #[test]
    fn empty_assistant_turns_are_skipped_in_scan() {
        let c = ModeClassifier::new();
        let tail = vec![
            Turn::user("quoi de neuf"),
            Turn::assistant(""),
        ];
        assert_eq!(c.classify("allume le salon", &tail), ModeId::Domotique);
    }
}

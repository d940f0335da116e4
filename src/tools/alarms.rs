//! 闹钟工具与存储
//!
//! 闹钟落在 JSON 文件里（HH:MM、播放列表、法语星期的重复规则）。后台任务
//! 每分钟调用 due_playlists：命中的一次性闹钟触发后即删除，带重复规则的
//! 保留；recap 生成给每日回顾消息用的文本。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::{arg_str, ParamKind, ParamSpec, Tool};

/// 一条闹钟；jours 为空表示只响一次
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alarme {
    pub heure: String,
    pub playlist: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jours: Vec<String>,
}

/// chrono 星期 -> 法语名
fn jour_fr(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "lundi",
        Weekday::Tue => "mardi",
        Weekday::Wed => "mercredi",
        Weekday::Thu => "jeudi",
        Weekday::Fri => "vendredi",
        Weekday::Sat => "samedi",
        Weekday::Sun => "dimanche",
    }
}

/// 重复规则解析："semaine" / "weekend" / "lundi,mardi" 等
pub fn parse_jours(jours_str: &str) -> Vec<String> {
    let s = jours_str.trim().to_lowercase();
    if s.is_empty() {
        return Vec::new();
    }
    match s.as_str() {
        "semaine" => ["lundi", "mardi", "mercredi", "jeudi", "vendredi"]
            .iter()
            .map(|j| j.to_string())
            .collect(),
        "weekend" => vec!["samedi".to_string(), "dimanche".to_string()],
        _ => s
            .split(',')
            .map(|j| j.trim().to_string())
            .filter(|j| !j.is_empty())
            .collect(),
    }
}

/// 时刻格式校验：严格 HH:MM
fn heure_valide(heure: &str) -> bool {
    let Some((h, m)) = heure.split_once(':') else {
        return false;
    };
    matches!(h.parse::<u32>(), Ok(hh) if hh < 24 && h.len() == 2)
        && matches!(m.parse::<u32>(), Ok(mm) if mm < 60 && m.len() == 2)
}

/// 闹钟存储：单 JSON 文件；文件缺失等价于空列表
pub struct AlarmStore {
    path: PathBuf,
}

impl AlarmStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Vec<Alarme> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, path = %self.path.display(), "alarmes illisibles");
            Vec::new()
        })
    }

    fn save(&self, alarmes: &[Alarme]) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let raw = serde_json::to_string_pretty(alarmes).map_err(|e| e.to_string())?;
        std::fs::write(&self.path, raw).map_err(|e| e.to_string())
    }

    pub fn add(&self, alarme: Alarme) -> Result<(), String> {
        let mut alarmes = self.load();
        alarmes.push(alarme);
        self.save(&alarmes)
    }

    /// 当前时刻命中的播放列表；一次性闹钟触发后从存储删除
    pub fn due_playlists(&self, now: NaiveDateTime) -> Vec<String> {
        let heure = now.format("%H:%M").to_string();
        let jour = jour_fr(now.weekday());

        let alarmes = self.load();
        let mut declenchees = Vec::new();
        let mut restantes = Vec::with_capacity(alarmes.len());
        let mut modifie = false;

        for alarme in alarmes {
            let due = alarme.heure == heure
                && (alarme.jours.is_empty() || alarme.jours.iter().any(|j| j == jour));
            if due {
                declenchees.push(alarme.playlist.clone());
                if alarme.jours.is_empty() {
                    // une seule fois : consommée
                    modifie = true;
                    continue;
                }
            }
            restantes.push(alarme);
        }

        if modifie {
            if let Err(e) = self.save(&restantes) {
                tracing::warn!(error = %e, "sauvegarde alarmes");
            }
        }
        declenchees
    }

    /// 每日回顾文本；没有闹钟时返回 None（不发消息）
    pub fn recap(&self) -> Option<String> {
        let alarmes = self.load();
        if alarmes.is_empty() {
            return None;
        }
        let lignes: Vec<String> = alarmes
            .iter()
            .map(|a| {
                if a.jours.is_empty() {
                    format!("- {} ({})", a.heure, a.playlist)
                } else {
                    format!("- {} ({}) chaque {}", a.heure, a.playlist, a.jours.join(", "))
                }
            })
            .collect();
        Some(lignes.join("\n"))
    }
}

/// 创建闹钟工具
pub struct CreerAlarmeTool {
    store: Arc<AlarmStore>,
}

impl CreerAlarmeTool {
    pub fn new(store: Arc<AlarmStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CreerAlarmeTool {
    fn name(&self) -> &str {
        "creer_alarme"
    }

    fn description(&self) -> &str {
        "Programme une alarme Spotify. Préciser les jours si récurrent."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("heure_str", ParamKind::String, "Heure au format HH:MM"),
            ParamSpec::optional("playlist", ParamKind::String, "Nom playlist"),
            ParamSpec::optional(
                "jours_str",
                ParamKind::String,
                "Jours de récurrence (ex: 'lundi,mardi', 'semaine', 'weekend'). Laisser vide pour une seule fois.",
            ),
        ]
    }

    async fn execute(&self, args: &Map<String, Value>) -> String {
        let heure = arg_str(args, "heure_str").unwrap_or_default().trim().to_string();
        if !heure_valide(&heure) {
            return format!("Heure '{heure}' invalide (format attendu HH:MM).");
        }

        let playlist = arg_str(args, "playlist")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or("Titres Likés")
            .to_string();
        let jours = parse_jours(arg_str(args, "jours_str").unwrap_or_default());

        let recurrence = if jours.is_empty() {
            String::new()
        } else {
            format!(" chaque {}", jours.join(", "))
        };

        match self.store.add(Alarme {
            heure: heure.clone(),
            playlist: playlist.clone(),
            jours,
        }) {
            Ok(()) => format!("⏰ Alarme {heure} programmée sur '{playlist}'{recurrence}."),
            Err(e) => {
                tracing::warn!(error = %e, "création alarme");
                "Impossible d'enregistrer l'alarme.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn store() -> (tempfile::TempDir, AlarmStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::new(dir.path().join("alarmes.json"));
        (dir, store)
    }

    // lundi
    fn lundi(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 3)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn missing_file_is_empty_list() {
        let (_dir, store) = store();
        assert!(store.load().is_empty());
        assert!(store.recap().is_none());
    }

    #[test]
    fn one_shot_alarm_fires_once_then_disappears() {
        let (_dir, store) = store();
        store
            .add(Alarme {
                heure: "07:30".into(),
                playlist: "Réveil".into(),
                jours: vec![],
            })
            .unwrap();

        assert_eq!(store.due_playlists(lundi(7, 30)), vec!["Réveil".to_string()]);
        // consommée : plus rien à la minute suivante ni le lendemain
        assert!(store.due_playlists(lundi(7, 30)).is_empty());
        assert!(store.load().is_empty());
    }

    #[test]
    fn recurring_alarm_survives_and_checks_weekday() {
        let (_dir, store) = store();
        store
            .add(Alarme {
                heure: "07:30".into(),
                playlist: "Réveil".into(),
                jours: parse_jours("semaine"),
            })
            .unwrap();

        assert_eq!(store.due_playlists(lundi(7, 30)).len(), 1);
        // toujours là après déclenchement
        assert_eq!(store.load().len(), 1);
        // pas le bon horaire
        assert!(store.due_playlists(lundi(7, 31)).is_empty());

        // samedi : hors "semaine"
        let samedi = NaiveDate::from_ymd_opt(2026, 8, 8)
            .unwrap()
            .and_hms_opt(7, 30, 0)
            .unwrap();
        assert!(store.due_playlists(samedi).is_empty());
    }

    #[test]
    fn parse_jours_shortcuts() {
        assert_eq!(parse_jours("semaine").len(), 5);
        assert_eq!(parse_jours("weekend"), vec!["samedi", "dimanche"]);
        assert_eq!(parse_jours("Lundi, Jeudi"), vec!["lundi", "jeudi"]);
        assert!(parse_jours("").is_empty());
    }

    #[test]
    fn heure_format_is_strict() {
        assert!(heure_valide("07:30"));
        assert!(heure_valide("23:59"));
        assert!(!heure_valide("7:30"));
        assert!(!heure_valide("24:00"));
        assert!(!heure_valide("bientôt"));
    }

    #[test]
    fn recap_lists_all_alarms() {
        let (_dir, store) = store();
        store
            .add(Alarme {
                heure: "07:30".into(),
                playlist: "Réveil".into(),
                jours: parse_jours("weekend"),
            })
            .unwrap();
        store
            .add(Alarme {
                heure: "14:00".into(),
                playlist: "Sieste".into(),
                jours: vec![],
            })
            .unwrap();

        let recap = store.recap().unwrap();
        assert!(recap.contains("07:30"));
        assert!(recap.contains("chaque samedi, dimanche"));
        assert!(recap.contains("14:00 (Sieste)"));
    }
}

//! 后台任务
//!
//! 三个长驻循环：新番检查（定期查 AniList 并推送）、闹钟响铃（对齐到整分，
//! 每分钟查一次，命中就在目标音箱上播放）、每日闹钟回顾（8h-20h 间随机时刻
//! 发送一次）。全部独立 tokio 任务，互不阻塞。

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike, Utc};
use rand::Rng;

use crate::integrations::ChatNotifier;
use crate::tools::{AlarmStore, AnilistClient, SpotifyClient};

/// 后台任务的共享上下文
pub struct TaskContext {
    pub anilist: Arc<AnilistClient>,
    pub alarms: Arc<AlarmStore>,
    pub spotify: Arc<SpotifyClient>,
    pub notifier: Arc<ChatNotifier>,
    /// 闹钟触发时播放的目标音箱
    pub alarm_speaker: String,
    /// 新番检查间隔
    pub episode_interval: Duration,
}

/// 启动全部后台循环
pub fn spawn_background_tasks(ctx: TaskContext) {
    let TaskContext {
        anilist,
        alarms,
        spotify,
        notifier,
        alarm_speaker,
        episode_interval,
    } = ctx;

    tokio::spawn(episodes_loop(anilist, notifier.clone(), episode_interval));
    tokio::spawn(alarmes_loop(alarms.clone(), spotify, alarm_speaker));
    tokio::spawn(recap_loop(alarms, notifier));
}

/// 新番检查循环
async fn episodes_loop(
    anilist: Arc<AnilistClient>,
    notifier: Arc<ChatNotifier>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let nouveaux = anilist.check_new_episodes(Utc::now().timestamp()).await;
        for ep in nouveaux {
            tracing::info!(titre = %ep.titre, episode = ep.episode, "nouvel épisode détecté");
            let mut corps = format!(
                "Nouvel épisode: {}\nÉpisode {} détecté.\nCrunchyroll: {}",
                ep.titre, ep.episode, ep.crunchy_url
            );
            if !ep.anilist_url.is_empty() {
                corps.push_str(&format!("\nAniList: {}", ep.anilist_url));
            }
            notifier.notify(&corps).await;
        }
    }
}

/// 闹钟循环：先对齐到下一个整分（XX:XX:00），之后每 60 秒检查一次
async fn alarmes_loop(alarms: Arc<AlarmStore>, spotify: Arc<SpotifyClient>, speaker: String) {
    let seconde = Local::now().second() as u64;
    tokio::time::sleep(Duration::from_secs(60 - seconde.min(59))).await;

    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let now = Local::now().naive_local();
        for playlist in alarms.due_playlists(now) {
            tracing::info!(playlist, "DRIIING, déclenchement de l'alarme");
            let retour = spotify
                .commander("play", Some(&playlist), Some(&speaker), None)
                .await;
            tracing::info!(retour, "résultat alarme");
        }
    }
}

/// 每日回顾循环：每次睡到当天（或次日）8h-20h 的一个随机时刻
async fn recap_loop(alarms: Arc<AlarmStore>, notifier: Arc<ChatNotifier>) {
    loop {
        let attente = duree_avant_prochain_recap(Local::now().naive_local());
        tracing::info!(minutes = attente.as_secs() / 60, "prochain récap d'alarmes planifié");
        tokio::time::sleep(attente).await;

        if let Some(texte) = alarms.recap() {
            notifier
                .notify(&format!("⏰ Récapitulatif de tes alarmes\n{texte}"))
                .await;
        }
    }
}

/// 距离下一个随机回顾时刻（8h-20h）的等待时长；已过今天的时段则排到明天
fn duree_avant_prochain_recap(now: NaiveDateTime) -> Duration {
    let mut rng = rand::rng();
    let heure: u32 = rng.random_range(8..=20);
    let minute: u32 = rng.random_range(0..60);

    let mut cible = now
        .date()
        .and_hms_opt(heure, minute, 0)
        .expect("heure de récap valide");
    if cible <= now {
        cible = cible + chrono::Duration::days(1);
    }
    (cible - now).to_std().unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn recap_delay_is_bounded_by_a_day_plus_window() {
        let now = NaiveDate::from_ymd_opt(2026, 8, 3)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        for _ in 0..50 {
            let d = duree_avant_prochain_recap(now);
            // au plus : demain 20h59
            assert!(d <= Duration::from_secs(33 * 3600));
            assert!(d >= Duration::from_secs(1));
        }
    }
}

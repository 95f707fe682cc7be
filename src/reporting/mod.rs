//! Turns finished battles into per-channel messages.

use tracing::{debug, error, warn};

use crate::{
    delivery::Channel,
    errors::ReporterResult,
    metrics::{BATTLES_REPORTED_TOTAL, BATTLES_SKIPPED_TOTAL, CORRUPT_REPORTS_TOTAL},
    model::FinishedBattle,
    pipeline::{DrainCursor, PipelineStore, ReportEntry},
};

pub mod description;

use description::{
    describe_defender, describe_duration, describe_players, describe_units, history_link,
};

/// Whether a finished battle is worth telling anyone about.
///
/// A single player fighting their own structures is not. Neither is a
/// visitor whose only units were civilians or scouts being shot down.
pub fn should_report(battle: &FinishedBattle) -> bool {
    if battle.player_unit_counts.len() < 2 {
        return false;
    }
    battle
        .player_unit_counts
        .iter()
        .filter(|(player, _)| battle.owner.as_deref() != Some(player.as_str()))
        .any(|(_, units)| units.keys().any(|class| class.is_combatant()))
}

pub fn format_message(channel: Channel, battle: &FinishedBattle) -> String {
    let link = history_link(&battle.room, battle.earliest_hostility_tick);
    let link = match channel {
        Channel::Cli => link,
        Channel::Slack => format!("<{}|history>", link),
    };
    format!(
        "{} - {} tick battle: {} - {}{}\n\t{}",
        describe_players(battle),
        describe_duration(battle),
        describe_units(battle),
        battle.room,
        describe_defender(battle),
        link
    )
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReportStats {
    pub reported: usize,
    pub skipped: usize,
    pub corrupt: usize,
    /// Entries another consumer had already taken off the queue.
    pub gone: usize,
    pub failed: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum Handled {
    Reported,
    Skipped,
    Corrupt,
    Gone,
}

/// One pass over the reporting queue. Reportable battles are moved to the
/// delivery queue of every channel in `channels`; the rest are dropped.
pub async fn report_pending_once(
    store: &dyn PipelineStore,
    channels: &[Channel],
) -> ReporterResult<ReportStats> {
    let mut stats = ReportStats::default();
    let mut cursor = DrainCursor::new(store.reporting_len().await?);
    while cursor.has_budget() {
        let Some(entry) = store.next_to_report(false).await? else {
            break;
        };
        if !cursor.admit(&entry.token) {
            break;
        }

        match report_entry(store, &entry, channels).await {
            Ok(Handled::Reported) => stats.reported += 1,
            Ok(Handled::Skipped) => stats.skipped += 1,
            Ok(Handled::Corrupt) => stats.corrupt += 1,
            Ok(Handled::Gone) => stats.gone += 1,
            Err(e) => {
                error!("Failed to hand battle over for delivery: {}", e);
                cursor.kept(&entry.token);
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

async fn report_entry(
    store: &dyn PipelineStore,
    entry: &ReportEntry,
    channels: &[Channel],
) -> ReporterResult<Handled> {
    let battle = match entry.battle() {
        Ok(battle) => battle,
        Err(e) => {
            warn!("Dropping unreadable reporting entry: {}", e);
            CORRUPT_REPORTS_TOTAL.inc();
            store.ack_report(&entry.token).await?;
            return Ok(Handled::Corrupt);
        }
    };

    if !should_report(&battle) {
        debug!("Not reporting battle in {}", battle.room);
        BATTLES_SKIPPED_TOTAL.inc();
        store.ack_report(&entry.token).await?;
        return Ok(Handled::Skipped);
    }

    let payloads: Vec<(Channel, String)> = channels
        .iter()
        .map(|channel| (*channel, format_message(*channel, &battle)))
        .collect();
    if !store.requeue_for_delivery(&entry.token, &payloads).await? {
        debug!("Battle in {} was already handed over", battle.room);
        return Ok(Handled::Gone);
    }
    debug!(
        "Battle in {} queued for {} channel(s)",
        battle.room,
        payloads.len()
    );
    BATTLES_REPORTED_TOTAL.inc();
    Ok(Handled::Reported)
}

use crate::board::Tallies;
use crate::picker::PickStatus;
use crate::protocol::{Notice, Reply};
use crate::state::AppState;
use crate::types::*;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

pub const HELP: &str = "\
Commands:
  create                      start a new group and join it
  join <group-id>             join an existing group
  leave                       leave the current group
  locate <lat> <lon>          set your location (or: locate denied|unavailable|timeout|unknown)
  add <member-json>           submit preferences, e.g. add {\"name\":\"Asha\",\"diet\":\"Veg\"}
  remove <member-key>         remove a member
  clear                       remove every member and vote in the group
  members                     list members
  recommend                   ask for restaurant recommendations
  board                       show options and votes
  vote <vote-key|#n>          vote for an option
  pick                        let chance decide
  status                      show session status
  quit                        exit";

pub fn format_reply(reply: &Reply) -> String {
    match reply {
        Reply::Joined { group_id } => format!("Joined group {}", group_id),
        Reply::Left => "Left the group".to_string(),
        Reply::LocationSet {
            location: Some(point),
        } => format!(
            "Location set to {:.4}, {:.4}",
            point.latitude, point.longitude
        ),
        Reply::LocationSet { location: None } => "No location available".to_string(),
        Reply::MemberAdded { key, name } => format!("Added {} ({})", name, key),
        Reply::MemberRemoved { key } => format!("Removed member {}", key),
        Reply::Cleared => "Cleared all members and votes".to_string(),
        Reply::Members { members } => format_members(members),
        Reply::Recommendations(recommendations) => {
            let mut out = recommendations.message.clone();
            if let Some(url) = &recommendations.maps_url {
                let _ = write!(out, "\nMap: {}", url);
            }
            let options: Vec<(BoardEntry, u64)> = recommendations
                .entries
                .iter()
                .map(|e| (e.clone(), 0))
                .collect();
            out.push('\n');
            out.push_str(&format_board(&options));
            out
        }
        Reply::Board { options } => format_board(options),
        Reply::Voted { vote_key, count } => format!("Voted for {} (now {})", vote_key, count),
        Reply::Picked { winner } => format!(
            "The group is going to {}!",
            winner.candidate.display_name()
        ),
        Reply::Status {
            group_id,
            members,
            options,
            picking,
        } => {
            let group = group_id
                .as_ref()
                .map(|g| g.to_string())
                .unwrap_or_else(|| "none".to_string());
            format!(
                "Group: {} | members: {} | options: {}{}",
                group,
                members,
                options,
                if *picking { " | picking..." } else { "" }
            )
        }
        Reply::Help => HELP.to_string(),
        Reply::Goodbye => "Bye!".to_string(),
        Reply::Error { msg } => format!("Error: {}", msg),
    }
}

pub fn format_members(members: &[MemberEntry]) -> String {
    if members.is_empty() {
        return "No members yet".to_string();
    }
    let mut out = format!("{} member(s):", members.len());
    for entry in members {
        let m = &entry.member;
        let _ = write!(
            out,
            "\n  {} [{}] hunger {} spice {}",
            m.name, entry.key, m.hunger_level, m.spice_level
        );
        if let Some(diet) = m.diet {
            let _ = write!(out, " {}", diet);
        }
    }
    out
}

pub fn format_board(options: &[(BoardEntry, u64)]) -> String {
    if options.is_empty() {
        return "No restaurant options".to_string();
    }
    let mut out = String::new();
    for (i, (entry, count)) in options.iter().enumerate() {
        let c = &entry.candidate;
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(
            out,
            "#{} {} ({} votes)",
            i + 1,
            c.display_name(),
            count
        );
        if let Some(rating) = c.rating {
            let _ = write!(out, " {:.1}*", rating);
        }
        if let Some(address) = &c.address {
            let _ = write!(out, " - {}", address);
        }
        let _ = write!(out, " [{}]", entry.vote_key);
    }
    out
}

pub fn format_notice(notice: &Notice) -> Option<String> {
    match notice {
        Notice::Error { message } => Some(format!("Error: {}", message)),
        Notice::GroupCleared => Some("Group was cleared".to_string()),
        // Replies already cover these
        Notice::Joined { .. } | Notice::Left => None,
    }
}

fn format_tallies(entries: &[BoardEntry], tallies: &Tallies) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let parts: Vec<String> = entries
        .iter()
        .map(|e| {
            format!(
                "{} {}",
                e.candidate.display_name(),
                tallies.get(&e.vote_key).copied().unwrap_or(0)
            )
        })
        .collect();
    Some(format!("Votes: {}", parts.join(" | ")))
}

/// Spawn a background task that prints pushed updates as they arrive
pub fn spawn_renderer(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut notices = state.subscribe_notices();
        let mut members = state.session.watch_members();
        let mut tallies = state.session.board().watch_tallies();
        let mut pick = state.picker.watch_status();

        loop {
            tokio::select! {
                notice = notices.recv() => match notice {
                    Ok(notice) => {
                        if let Some(line) = format_notice(&notice) {
                            println!("{}", line);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Renderer skipped {} notices", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = members.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let list = members.borrow_and_update().clone();
                    println!("{}", format_members(&list));
                }
                changed = tallies.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let counts = tallies.borrow_and_update().clone();
                    let entries = state.session.board().entries().await;
                    if let Some(line) = format_tallies(&entries, &counts) {
                        println!("{}", line);
                    }
                }
                changed = pick.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = pick.borrow_and_update().clone();
                    if status == PickStatus::Picking {
                        println!("Picking a restaurant...");
                    }
                }
            }
        }
    });
}

//! Command dispatch for the console collaborator.
//!
//! Every command maps onto one core operation. Core errors come back as
//! `Reply::Error` with the normalized message; nothing here is fatal.

use crate::error::{CoreError, ValidationError};
use crate::geo::{usable_location, GeoPoint};
use crate::picker::PickOutcome;
use crate::protocol::{Command, Reply};
use crate::state::AppState;
use crate::types::*;
use std::sync::Arc;

/// One interactive user: shared state plus the last captured location
pub struct Console {
    state: Arc<AppState>,
    location: Option<GeoPoint>,
}

impl Console {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            location: None,
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Handle a command and return the optional reply
    pub async fn handle(&mut self, command: Command) -> Option<Reply> {
        let reply = match command {
            Command::Create => self.state.create().await.map(|group_id| Reply::Joined { group_id }),

            Command::Join { group_id } => self
                .state
                .join(&group_id)
                .await
                .map(|group_id| Reply::Joined { group_id }),

            Command::Leave => {
                self.state.leave().await;
                Ok(Reply::Left)
            }

            Command::Locate(fix) => {
                self.location = usable_location(fix);
                Ok(Reply::LocationSet {
                    location: self.location,
                })
            }

            Command::Add { member } => self.handle_add(*member).await,

            Command::Remove { key } => self
                .state
                .session
                .remove_member(&key)
                .await
                .map(|()| Reply::MemberRemoved { key }),

            Command::Clear => self.state.clear().await.map(|()| Reply::Cleared),

            Command::Members => Ok(Reply::Members {
                members: self.state.session.members(),
            }),

            Command::Recommend => self.state.recommend().await.map(Reply::Recommendations),

            Command::Board => Ok(self.board().await),

            Command::Vote { option } => self.handle_vote(&option).await,

            Command::Pick => return handle_pick(&self.state).await,

            Command::Status => Ok(Reply::Status {
                group_id: self.state.session.active_group().await,
                members: self.state.session.members().len(),
                options: self.state.session.board().entries().await.len(),
                picking: self.state.picker.is_picking(),
            }),

            Command::Help => Ok(Reply::Help),

            Command::Quit => Ok(Reply::Goodbye),
        };

        Some(reply.unwrap_or_else(error_reply))
    }

    /// Submit preferences, filling in the captured location when the record has none
    async fn handle_add(&self, member: Member) -> Result<Reply, CoreError> {
        let member = match (member.location(), self.location) {
            (None, Some(point)) => member.located_at(point),
            _ => member,
        };
        let name = member.name.clone();
        let key = self.state.session.add_member(member).await?;
        Ok(Reply::MemberAdded { key, name })
    }

    async fn handle_vote(&self, option: &str) -> Result<Reply, CoreError> {
        let board = self.state.session.board();
        let entry = board
            .resolve(option)
            .await
            .ok_or_else(|| ValidationError::UnknownCandidate(option.to_string()))?;
        let count = board.cast_vote(&entry.vote_key).await?;
        Ok(Reply::Voted {
            vote_key: entry.vote_key,
            count,
        })
    }

    async fn board(&self) -> Reply {
        let board = self.state.session.board();
        let entries = board.entries().await;
        let tallies = board.tallies();
        Reply::Board {
            options: entries
                .into_iter()
                .map(|entry| {
                    let count = tallies.get(&entry.vote_key).copied().unwrap_or(0);
                    (entry, count)
                })
                .collect(),
        }
    }
}

/// Run a random pick. A pick requested while one is in flight, or one whose
/// options changed during the delay, yields no reply.
pub async fn handle_pick(state: &AppState) -> Option<Reply> {
    match state.random_pick().await {
        Ok(PickOutcome::Winner(winner)) => Some(Reply::Picked { winner }),
        Ok(PickOutcome::AlreadyPicking | PickOutcome::Cancelled) => None,
        Err(e) => Some(error_reply(e)),
    }
}

fn error_reply(e: CoreError) -> Reply {
    Reply::Error { msg: e.to_string() }
}

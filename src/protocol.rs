use crate::geo::{GeoPoint, GeolocationError};
use crate::types::*;

/// Requests from the UI collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create,
    Join { group_id: String },
    Leave,
    /// Captured geolocation result for the next `Add`
    Locate(Result<GeoPoint, GeolocationError>),
    Add { member: Box<Member> },
    Remove { key: MemberKey },
    Clear,
    Members,
    Recommend,
    Board,
    /// Vote key or `#<n>` option number
    Vote { option: String },
    Pick,
    Status,
    Help,
    Quit,
}

/// Responses to a single command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Joined {
        group_id: GroupId,
    },
    Left,
    LocationSet {
        location: Option<GeoPoint>,
    },
    MemberAdded {
        key: MemberKey,
        name: String,
    },
    MemberRemoved {
        key: MemberKey,
    },
    Cleared,
    Members {
        members: Vec<MemberEntry>,
    },
    Recommendations(Recommendations),
    Board {
        options: Vec<(BoardEntry, u64)>,
    },
    Voted {
        vote_key: VoteKey,
        count: u64,
    },
    Picked {
        winner: BoardEntry,
    },
    Status {
        group_id: Option<GroupId>,
        members: usize,
        options: usize,
        picking: bool,
    },
    Help,
    Goodbye,
    Error {
        msg: String,
    },
}

/// Asynchronous events pushed to the UI collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Joined { group_id: GroupId },
    Left,
    GroupCleared,
    Error { message: String },
}

//! Denials and access-layer errors

use crate::core_space::storage::StoreError;

/// Closed vocabulary of reasons an operation is refused.
///
/// A denial is an expected outcome, never an infrastructure failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Denial {
    #[error("Not allowed")]
    NotAllowed,

    #[error("Not found")]
    NotFound,

    #[error("Workspace not found")]
    WorkspaceNotFound,

    #[error("Channel not found")]
    ChannelNotFound,

    #[error("User is already a member")]
    AlreadyMember,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid or expired invite")]
    InvalidInvite,

    #[error("Cannot remove the workspace owner")]
    CannotRemoveOwner,

    #[error("User is not a member of the workspace")]
    UserNotInWorkspace,

    #[error("User is already in the channel")]
    UserAlreadyInChannel,
}

impl Denial {
    pub const ALL: [Denial; 10] = [
        Denial::NotAllowed,
        Denial::NotFound,
        Denial::WorkspaceNotFound,
        Denial::ChannelNotFound,
        Denial::AlreadyMember,
        Denial::UserNotFound,
        Denial::InvalidInvite,
        Denial::CannotRemoveOwner,
        Denial::UserNotInWorkspace,
        Denial::UserAlreadyInChannel,
    ];

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Denial::NotAllowed => "NOT_ALLOWED",
            Denial::NotFound => "NOT_FOUND",
            Denial::WorkspaceNotFound => "WORKSPACE_NOT_FOUND",
            Denial::ChannelNotFound => "CHANNEL_NOT_FOUND",
            Denial::AlreadyMember => "ALREADY_MEMBER",
            Denial::UserNotFound => "USER_NOT_FOUND",
            Denial::InvalidInvite => "INVALID_INVITE",
            Denial::CannotRemoveOwner => "CANNOT_REMOVE_OWNER",
            Denial::UserNotInWorkspace => "USER_NOT_IN_WORKSPACE",
            Denial::UserAlreadyInChannel => "USER_ALREADY_IN_CHANNEL",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.code() == code)
    }
}

/// Errors surfaced by the guard and the membership service
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("{} ({})", .0, .0.code())]
    Denied(Denial),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl AccessError {
    /// The denial, if this error is one
    pub fn denial(&self) -> Option<Denial> {
        match self {
            AccessError::Denied(d) => Some(*d),
            _ => None,
        }
    }
}

impl From<Denial> for AccessError {
    fn from(denial: Denial) -> Self {
        AccessError::Denied(denial)
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

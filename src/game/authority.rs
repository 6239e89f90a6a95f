//! Host Authority
//!
//! The room creator is the host. Host-only mutations on the round and bomb
//! records take a [`HostToken`], which only [`Authority::host_token`] can
//! mint, so a replica cannot reach them without going through the role check.

use crate::game::state::PlayerId;

/// Participant role within a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Drives phase deadlines, win checks and explosion timing.
    Host,
    /// Follows the host's round record.
    Replica,
}

/// Proof that the caller passed the host check.
#[derive(Debug)]
pub struct HostToken {
    _private: (),
}

/// Who the local participant is and who the host is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Authority {
    local: PlayerId,
    host: PlayerId,
}

impl Authority {
    /// Authority for a participant in a room hosted by `host`.
    pub fn new(local: PlayerId, host: PlayerId) -> Self {
        Self { local, host }
    }

    /// Authority for the room creator.
    pub fn creator(local: PlayerId) -> Self {
        Self { local, host: local }
    }

    /// Local participant.
    pub fn local(&self) -> PlayerId {
        self.local
    }

    /// Host participant.
    pub fn host_id(&self) -> PlayerId {
        self.host
    }

    /// Local role.
    pub fn role(&self) -> Role {
        if self.local == self.host {
            Role::Host
        } else {
            Role::Replica
        }
    }

    /// True on the host.
    #[inline]
    pub fn is_host(&self) -> bool {
        self.role() == Role::Host
    }

    /// Token for host-only mutations, or `None` on a replica.
    pub fn host_token(&self) -> Option<HostToken> {
        self.is_host().then_some(HostToken { _private: () })
    }
}

#[cfg(test)]
pub(crate) fn test_token() -> HostToken {
    HostToken { _private: () }
}

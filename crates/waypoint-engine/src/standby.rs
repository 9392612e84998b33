//! Hot-standby gating, narrowed to the one question the manager needs
//! answered: am I allowed to run config sync and routing right now?
//!
//! The concrete leader-election implementation (Redis-backed, in the
//! source tree this was distilled from) is an external collaborator and
//! is not reimplemented here — only the seam the manager depends on.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipStatus {
    Primary,
    Standby,
}

#[async_trait]
pub trait StandbyGate: Send + Sync {
    async fn status(&self) -> LeadershipStatus;
}

/// The default gate for deployments with no standby topology: always
/// primary, so initial config sync and routing run unconditionally.
pub struct AlwaysPrimary;

#[async_trait]
impl StandbyGate for AlwaysPrimary {
    async fn status(&self) -> LeadershipStatus {
        LeadershipStatus::Primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_primary_reports_primary() {
        assert_eq!(AlwaysPrimary.status().await, LeadershipStatus::Primary);
    }
}

//! Endpoint Handshake State
//!
//! Tracks where the bridge is in the login / publish-permission / publish
//! sequence, and which datasets the endpoint has cleared for sending.
//!
//! # State Machine
//!
//! ```text
//! Disconnected -> FeedConnected (live only) -> LoggedIn -> Publishing -> Disposed
//!      \______________________________________/               ^
//!                  any state --------------------------------/
//! ```
//!
//! `Publishing` is reached once the first dataset is granted. Grants
//! themselves are tracked per dataset in the [`PublishGate`]; a dataset may
//! only be sent data after its own grant, regardless of the global state.
//! `Disposed` is terminal.

use parking_lot::RwLock;
use thiserror::Error;

use super::subscription::DatasetId;

// =============================================================================
// Handshake State
// =============================================================================

/// Global handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    /// Nothing connected yet.
    #[default]
    Disconnected,
    /// Advisory feed connected, endpoint login pending.
    FeedConnected,
    /// Endpoint login acknowledged; permission requests may go out.
    LoggedIn,
    /// At least one dataset is cleared for sending.
    Publishing,
    /// Shut down. Terminal.
    Disposed,
}

impl HandshakeState {
    /// Whether permission requests may be sent.
    #[must_use]
    pub const fn is_logged_in(&self) -> bool {
        matches!(self, Self::LoggedIn | Self::Publishing)
    }

    /// Whether the terminal state has been reached.
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }

    /// Lowercase name for logs and health output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::FeedConnected => "feed_connected",
            Self::LoggedIn => "logged_in",
            Self::Publishing => "publishing",
            Self::Disposed => "disposed",
        }
    }

    /// Numeric code for the state gauge.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::FeedConnected => 1,
            Self::LoggedIn => 2,
            Self::Publishing => 3,
            Self::Disposed => 4,
        }
    }

    const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::FeedConnected)
                | (Self::Disconnected | Self::FeedConnected, Self::LoggedIn)
                | (Self::LoggedIn | Self::Publishing, Self::Publishing)
                | (
                    Self::Disconnected
                        | Self::FeedConnected
                        | Self::LoggedIn
                        | Self::Publishing,
                    Self::Disposed
                )
        )
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid handshake transition {from} -> {to}")]
pub struct TransitionError {
    /// State at the time of the attempt.
    pub from: HandshakeState,
    /// Requested state.
    pub to: HandshakeState,
}

// =============================================================================
// Publish Gate
// =============================================================================

/// Per-dataset permission status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionStatus {
    /// Not requested, or requested and awaiting the endpoint.
    #[default]
    Pending,
    /// Endpoint replied `SUCCESS`.
    Granted,
    /// Endpoint refused, or the request failed. Permanent for this run.
    Denied,
}

/// Per-dataset publish permissions.
#[derive(Debug, Default)]
pub struct PublishGate {
    statuses: RwLock<Vec<(DatasetId, PermissionStatus)>>,
}

impl PublishGate {
    /// Create a gate expecting grants for `datasets`.
    #[must_use]
    pub fn new(datasets: impl IntoIterator<Item = DatasetId>) -> Self {
        let mut statuses: Vec<(DatasetId, PermissionStatus)> = Vec::new();
        for dataset in datasets {
            if !statuses.iter().any(|(d, _)| d == &dataset) {
                statuses.push((dataset, PermissionStatus::Pending));
            }
        }
        Self {
            statuses: RwLock::new(statuses),
        }
    }

    /// Record a grant. Returns `true` only for the first grant of a known dataset.
    pub fn grant(&self, dataset: &DatasetId) -> bool {
        self.set(dataset, PermissionStatus::Granted)
    }

    /// Record a refusal. Returns `true` if the dataset was pending.
    pub fn deny(&self, dataset: &DatasetId) -> bool {
        self.set(dataset, PermissionStatus::Denied)
    }

    fn set(&self, dataset: &DatasetId, status: PermissionStatus) -> bool {
        let mut statuses = self.statuses.write();
        match statuses.iter_mut().find(|(d, _)| d == dataset) {
            Some((_, current)) if *current == PermissionStatus::Pending => {
                *current = status;
                true
            }
            _ => false,
        }
    }

    /// Current status of `dataset`, or `None` if the gate does not track it.
    #[must_use]
    pub fn status(&self, dataset: &DatasetId) -> Option<PermissionStatus> {
        self.statuses
            .read()
            .iter()
            .find_map(|(d, s)| (d == dataset).then_some(*s))
    }

    /// Whether `dataset` may be sent data.
    #[must_use]
    pub fn is_granted(&self, dataset: &DatasetId) -> bool {
        self.status(dataset) == Some(PermissionStatus::Granted)
    }

    /// Whether every tracked dataset is granted. False for an empty gate.
    #[must_use]
    pub fn all_granted(&self) -> bool {
        let statuses = self.statuses.read();
        !statuses.is_empty()
            && statuses
                .iter()
                .all(|(_, s)| *s == PermissionStatus::Granted)
    }

    /// Number of granted datasets.
    #[must_use]
    pub fn granted_count(&self) -> usize {
        self.statuses
            .read()
            .iter()
            .filter(|(_, s)| *s == PermissionStatus::Granted)
            .count()
    }

    /// Number of tracked datasets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statuses.read().len()
    }

    /// Whether the gate tracks no dataset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statuses.read().is_empty()
    }

    /// Copy of all statuses in tracking order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(DatasetId, PermissionStatus)> {
        self.statuses.read().clone()
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// Shared handshake state plus the publish gate.
///
/// Written by the controller, read by the worker, batch publisher and health
/// server.
#[derive(Debug, Default)]
pub struct Handshake {
    state: RwLock<HandshakeState>,
    gate: PublishGate,
}

impl Handshake {
    /// Create a handshake expecting grants for `datasets`.
    #[must_use]
    pub fn new(datasets: impl IntoIterator<Item = DatasetId>) -> Self {
        Self {
            state: RwLock::new(HandshakeState::Disconnected),
            gate: PublishGate::new(datasets),
        }
    }

    /// Current global state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        *self.state.read()
    }

    /// Per-dataset permissions.
    #[must_use]
    pub const fn gate(&self) -> &PublishGate {
        &self.gate
    }

    /// Move to `next`, returning the previous state.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` if the move is not allowed from the current
    /// state (anything out of `Disposed`, or skipping login).
    pub fn advance(&self, next: HandshakeState) -> Result<HandshakeState, TransitionError> {
        let mut state = self.state.write();
        let from = *state;
        if !from.can_advance_to(next) {
            return Err(TransitionError { from, to: next });
        }
        *state = next;
        Ok(from)
    }

    /// Enter `Disposed`. Returns `true` only on the first call.
    pub fn dispose(&self) -> bool {
        let mut state = self.state.write();
        if state.is_disposed() {
            return false;
        }
        *state = HandshakeState::Disposed;
        true
    }

    /// Record a grant for `dataset` and move to `Publishing`.
    ///
    /// Returns `true` if this is the dataset's first grant.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` if login has not been acknowledged or the
    /// handshake is disposed.
    pub fn grant(&self, dataset: &DatasetId) -> Result<bool, TransitionError> {
        self.advance(HandshakeState::Publishing)?;
        Ok(self.gate.grant(dataset))
    }

    /// Whether data for `dataset` may be sent right now.
    #[must_use]
    pub fn may_send(&self, dataset: &DatasetId) -> bool {
        !self.state().is_disposed() && self.gate.is_granted(dataset)
    }
}

// =============================================================================
// Tests
// =============================================================================

//! View synchronization.
//!
//! A [Pacemaker] decides when a node leaves its current view: either because a QC for the view
//! arrived, because the local timer fired, or because a quorum of validators asked to move on.
//! Every time the view changes, the node schedules a new local timeout and sends a signed
//! [crate::types::ViewTimeout] for the new view to its leader.

use crate::{
    types::{BftNode, QuorumCertificate, SyncInfo, View, ViewTimeoutSigned},
    validators::BftValidatorSet,
    Error,
};
use std::{sync::Arc, time::Duration};

mod exponential;
pub use exponential::ExponentialTimeoutPacemaker;
mod signer;
pub use signer::{SignedViewTimeoutToLeaderSender, ViewTimeoutSigner};

/// Tracks the current view of a node.
pub trait Pacemaker {
    /// The view the node is currently in.
    fn current_view(&self) -> View;

    /// A QC (and the highest committed QC known) was observed.
    fn process_qc(
        &mut self,
        qc: &QuorumCertificate,
        highest_committed_qc: &QuorumCertificate,
    ) -> Result<(), Error>;

    /// Move past `view` if the node has not already.
    fn process_next_view(&mut self, view: View);

    /// The local timer for `view` fired.
    fn process_local_timeout(&mut self, view: View);

    /// Add a view timeout from a peer, returning the current view once the node may propose in it.
    fn process_view_timeout(
        &mut self,
        timeout: &ViewTimeoutSigned,
        validators: &Arc<BftValidatorSet>,
    ) -> Option<View>;
}

/// Schedules local timeouts. A fired timeout must be fed back through
/// [Pacemaker::process_local_timeout].
pub trait PacemakerTimeoutSender {
    fn schedule_timeout(&self, view: View, timeout: Duration);
}

/// Notified whenever a node proceeds to a new view.
pub trait ProceedToViewSender {
    fn send_proceed_to_next_view(&self, view: View, sync_info: SyncInfo);
}

/// Observer of pacemaker progress.
pub trait PacemakerInfoSender {
    fn send_current_view(&self, view: View);
    fn send_timeout_processed(&self, view: View);
}

/// Delivers a signed view timeout to the leader of its view.
pub trait ViewTimeoutSender {
    fn send_view_timeout(&self, timeout: ViewTimeoutSigned, leader: &BftNode);
}

/// Configuration of an [ExponentialTimeoutPacemaker].
///
/// The timeout of a view is `timeout * rate^min(max_exponent, uncommitted)`, where `uncommitted`
/// counts the views since the last commit.
#[derive(Clone, Debug)]
pub struct Config {
    /// Timeout of a view that directly follows a commit.
    pub timeout: Duration,

    /// Growth factor applied per uncommitted view.
    pub rate: f64,

    /// Cap on the number of growth steps.
    pub max_exponent: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            rate: 1.2,
            max_exponent: 10,
        }
    }
}

impl Config {
    /// Ensure all configuration values are usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.timeout.is_zero() {
            return Err(Error::InvalidPacemakerConfig(
                "timeout must be greater than zero".into(),
            ));
        }
        if !(self.rate.is_finite() && self.rate > 1.0) {
            return Err(Error::InvalidPacemakerConfig(format!(
                "rate must be > 1.0, but was {}",
                self.rate
            )));
        }
        let max_timeout = self.timeout.as_millis() as f64 * self.rate.powf(self.max_exponent as f64);
        if !max_timeout.is_finite() || max_timeout > i64::MAX as f64 {
            return Err(Error::InvalidPacemakerConfig(format!(
                "maximum timeout of {max_timeout}ms is too large"
            )));
        }
        Ok(())
    }

    /// Timeout in milliseconds after `uncommitted` views without a commit.
    pub(crate) fn timeout_millis(&self, uncommitted: u64) -> u64 {
        let exponent = uncommitted.min(u64::from(self.max_exponent)) as f64;
        let millis = self.timeout.as_millis() as f64 * self.rate.powf(exponent);
        millis.round() as u64
    }
}

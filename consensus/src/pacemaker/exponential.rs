use super::{Config, Pacemaker, PacemakerInfoSender, PacemakerTimeoutSender, ProceedToViewSender};
use crate::{
    pending::PendingViewTimeouts,
    types::{QuorumCertificate, SyncInfo, View, ViewTimeoutSigned},
    validators::BftValidatorSet,
    Error,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, trace};

/// A [Pacemaker] whose view timeout grows exponentially with the number of views since the last
/// commit.
pub struct ExponentialTimeoutPacemaker<T, P, I> {
    config: Config,

    timeout_sender: T,
    proceed_sender: P,
    info_sender: I,

    pending: PendingViewTimeouts,
    sync_info: SyncInfo,

    current_view: View,
    last_sync_view: View,
    highest_commit_view: View,
}

impl<T, P, I> ExponentialTimeoutPacemaker<T, P, I>
where
    T: PacemakerTimeoutSender,
    P: ProceedToViewSender,
    I: PacemakerInfoSender,
{
    /// Create a pacemaker at the genesis view.
    pub fn new(
        config: Config,
        timeout_sender: T,
        proceed_sender: P,
        info_sender: I,
        genesis_qc: QuorumCertificate,
    ) -> Result<Self, Error> {
        config.validate()?;
        let sync_info = SyncInfo::new(genesis_qc.clone(), genesis_qc)?;
        debug!(
            timeout = ?config.timeout,
            rate = config.rate,
            max_exponent = config.max_exponent,
            "created pacemaker"
        );
        Ok(Self {
            config,
            timeout_sender,
            proceed_sender,
            info_sender,
            pending: PendingViewTimeouts::new(),
            sync_info,
            current_view: View::genesis(),
            last_sync_view: View::genesis(),
            highest_commit_view: View::genesis(),
        })
    }

    /// View of the highest committed QC observed.
    pub fn highest_commit_view(&self) -> View {
        self.highest_commit_view
    }

    fn update_view(&mut self, view: View) {
        let uncommitted = self.highest_commit_view.views_until(view);
        let timeout = Duration::from_millis(self.config.timeout_millis(uncommitted));
        debug!(%view, ?timeout, "starting view");
        self.current_view = view;
        self.timeout_sender.schedule_timeout(view, timeout);
        self.proceed_sender
            .send_proceed_to_next_view(view, self.sync_info.clone());
        self.info_sender.send_current_view(view);
    }
}

impl<T, P, I> Pacemaker for ExponentialTimeoutPacemaker<T, P, I>
where
    T: PacemakerTimeoutSender,
    P: ProceedToViewSender,
    I: PacemakerInfoSender,
{
    fn current_view(&self) -> View {
        self.current_view
    }

    fn process_qc(
        &mut self,
        qc: &QuorumCertificate,
        highest_committed_qc: &QuorumCertificate,
    ) -> Result<(), Error> {
        self.sync_info = SyncInfo::new(qc.clone(), highest_committed_qc.clone())?;
        self.highest_commit_view = highest_committed_qc.view();
        self.process_next_view(qc.view());
        Ok(())
    }

    fn process_next_view(&mut self, view: View) {
        let next = view.next();
        if next > self.current_view {
            self.update_view(next);
        }
    }

    fn process_local_timeout(&mut self, view: View) {
        if view != self.current_view {
            trace!(%view, current = %self.current_view, "ignoring stale local timeout");
            return;
        }
        self.info_sender.send_timeout_processed(view);
        self.update_view(view.next());
    }

    fn process_view_timeout(
        &mut self,
        timeout: &ViewTimeoutSigned,
        validators: &Arc<BftValidatorSet>,
    ) -> Option<View> {
        let view = timeout.view();
        if view <= self.last_sync_view {
            trace!(%view, last_sync = %self.last_sync_view, "ignoring view timeout");
            return None;
        }

        // A QC from the previous view guarantees we hold the highest QC of this view
        let qc_view = timeout.qc().view();
        let highest_qc = !qc_view.is_genesis() && qc_view.next() == self.current_view;

        // Always accumulate, even when the fast path applies
        let quorum = self
            .pending
            .insert_view_timeout(timeout, validators)
            .is_some();
        if !quorum && !highest_qc {
            debug!(%qc_view, current = %self.current_view, "view timeout quorum not yet formed");
            return None;
        }

        if view != self.current_view {
            trace!(%view, current = %self.current_view, "ignoring view timeout quorum");
            return None;
        }
        self.last_sync_view = self.current_view;
        Some(self.current_view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mocks::senders::{Outbound, Outbox},
        types::{
            tests::{header, qc},
            Signature, ViewTimeout,
        },
        validators::tests::{equal_set, node},
    };
    use commonware_macros::test_traced;

    type TestPacemaker = ExponentialTimeoutPacemaker<Outbox, Outbox, Outbox>;

    fn genesis_qc() -> QuorumCertificate {
        qc(header(0, 0), header(0, 0), Some(header(0, 0)))
    }

    fn config() -> Config {
        Config {
            timeout: Duration::from_millis(100),
            rate: 2.0,
            max_exponent: 4,
        }
    }

    fn pacemaker() -> (TestPacemaker, Outbox) {
        let outbox = Outbox::new();
        let pacemaker = ExponentialTimeoutPacemaker::new(
            config(),
            outbox.clone(),
            outbox.clone(),
            outbox.clone(),
            genesis_qc(),
        )
        .unwrap();
        (pacemaker, outbox)
    }

    fn timeout(author: u8, view: u64, qc_view: u64) -> ViewTimeoutSigned {
        let high = qc(
            header(qc_view, qc_view as u8),
            header(qc_view.saturating_sub(1), 0),
            None,
        );
        let sync_info = if qc_view == 0 {
            SyncInfo::new(genesis_qc(), genesis_qc()).unwrap()
        } else {
            SyncInfo::new(high, genesis_qc()).unwrap()
        };
        ViewTimeoutSigned::new(
            ViewTimeout::new(node(author), 0, View::new(view)),
            sync_info,
            Signature::from(vec![author]),
        )
    }

    #[test]
    fn rejects_invalid_config() {
        let outbox = Outbox::new();
        let result = ExponentialTimeoutPacemaker::new(
            Config {
                rate: 1.0,
                ..config()
            },
            outbox.clone(),
            outbox.clone(),
            outbox,
            genesis_qc(),
        );
        assert!(matches!(result, Err(Error::InvalidPacemakerConfig(_))));
    }

    #[test_traced]
    fn update_view_emits_in_order() {
        let (mut pacemaker, outbox) = pacemaker();
        pacemaker.process_next_view(View::genesis());
        assert_eq!(pacemaker.current_view(), View::new(1));

        let events = outbox.drain();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            Outbound::ScheduleTimeout(View::new(1), Duration::from_millis(100))
        );
        assert!(matches!(&events[1], Outbound::ProceedToNextView(view, _) if *view == View::new(1)));
        assert_eq!(events[2], Outbound::CurrentView(View::new(1)));
    }

    #[test]
    fn process_next_view_never_goes_backwards() {
        let (mut pacemaker, outbox) = pacemaker();
        pacemaker.process_next_view(View::new(4));
        outbox.drain();
        pacemaker.process_next_view(View::new(2));
        pacemaker.process_next_view(View::new(3));
        assert_eq!(pacemaker.current_view(), View::new(5));
        assert!(outbox.drain().is_empty());
    }

    #[test]
    fn qc_advances_view_and_tracks_commit() {
        let (mut pacemaker, outbox) = pacemaker();
        let committed = qc(header(3, 3), header(2, 2), Some(header(1, 1)));
        pacemaker.process_qc(&committed, &committed).unwrap();
        assert_eq!(pacemaker.current_view(), View::new(4));
        assert_eq!(pacemaker.highest_commit_view(), View::new(3));

        // View 4 directly follows the committing QC
        assert_eq!(
            outbox.drain()[0],
            Outbound::ScheduleTimeout(View::new(4), Duration::from_millis(100))
        );
    }

    #[test]
    fn qc_with_incoherent_commit_is_rejected() {
        let (mut pacemaker, _) = pacemaker();
        let high = qc(header(3, 3), header(2, 2), None);
        assert!(matches!(
            pacemaker.process_qc(&high, &high),
            Err(Error::InvalidSyncInfo(_))
        ));
        assert_eq!(pacemaker.current_view(), View::genesis());
    }

    #[test]
    fn stale_local_timeouts_are_ignored() {
        let (mut pacemaker, outbox) = pacemaker();
        pacemaker.process_next_view(View::genesis());
        outbox.drain();
        pacemaker.process_local_timeout(View::genesis());
        assert!(outbox.drain().is_empty());
        assert_eq!(pacemaker.current_view(), View::new(1));
    }

    #[test]
    fn local_timeout_reports_and_advances() {
        let (mut pacemaker, outbox) = pacemaker();
        pacemaker.process_next_view(View::genesis());
        outbox.drain();
        pacemaker.process_local_timeout(View::new(1));
        assert_eq!(pacemaker.current_view(), View::new(2));
        let events = outbox.drain();
        assert_eq!(events[0], Outbound::TimeoutProcessed(View::new(1)));
        assert_eq!(
            events[1],
            Outbound::ScheduleTimeout(View::new(2), Duration::from_millis(200))
        );
    }

    #[test]
    fn timeouts_grow_until_capped() {
        let (mut pacemaker, outbox) = pacemaker();
        pacemaker.process_next_view(View::genesis());
        for _ in 0..6 {
            pacemaker.process_local_timeout(pacemaker.current_view());
        }
        let scheduled: Vec<u128> = outbox
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                Outbound::ScheduleTimeout(_, timeout) => Some(timeout.as_millis()),
                _ => None,
            })
            .collect();
        assert_eq!(scheduled, vec![100, 200, 400, 800, 1_600, 1_600, 1_600]);
    }

    #[test]
    fn view_timeout_quorum_at_current_view() {
        let validators = equal_set(3);
        let (mut pacemaker, _) = pacemaker();
        pacemaker.process_next_view(View::genesis());
        assert_eq!(
            pacemaker.process_view_timeout(&timeout(0, 1, 0), &validators),
            None
        );
        assert_eq!(
            pacemaker.process_view_timeout(&timeout(1, 1, 0), &validators),
            Some(View::new(1))
        );

        // Views at or below the last synced view are stale
        assert_eq!(
            pacemaker.process_view_timeout(&timeout(2, 1, 0), &validators),
            None
        );
    }

    #[test]
    fn view_timeout_with_previous_view_qc_is_sufficient() {
        let validators = equal_set(3);
        let (mut pacemaker, _) = pacemaker();
        pacemaker.process_next_view(View::new(4));
        assert_eq!(
            pacemaker.process_view_timeout(&timeout(0, 5, 4), &validators),
            Some(View::new(5))
        );
    }

    #[test]
    fn view_timeout_quorum_for_other_view_is_ignored() {
        let validators = equal_set(3);
        let (mut pacemaker, _) = pacemaker();
        pacemaker.process_next_view(View::new(1));
        assert_eq!(
            pacemaker.process_view_timeout(&timeout(0, 5, 0), &validators),
            None
        );
        assert_eq!(
            pacemaker.process_view_timeout(&timeout(1, 5, 0), &validators),
            None
        );
    }
}

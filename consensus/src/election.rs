//! Leader selection.

use crate::{
    types::{BftNode, View},
    validators::BftValidatorSet,
};

/// Maps every view to the validator allowed to propose in it.
pub trait ProposerElection {
    fn proposer(&self, view: View) -> BftNode;
}

impl<T: ProposerElection + ?Sized> ProposerElection for std::sync::Arc<T> {
    fn proposer(&self, view: View) -> BftNode {
        (**self).proposer(view)
    }
}

/// A single leader for every view.
#[derive(Clone, Debug)]
pub struct Dictatorship {
    leader: BftNode,
}

impl Dictatorship {
    pub fn new(leader: BftNode) -> Self {
        Self { leader }
    }
}

impl ProposerElection for Dictatorship {
    fn proposer(&self, _: View) -> BftNode {
        self.leader.clone()
    }
}

/// Round-robin over the validators, in node order.
#[derive(Clone, Debug)]
pub struct RotatingLeaders {
    leaders: Vec<BftNode>,
}

impl RotatingLeaders {
    pub fn new(validators: &BftValidatorSet) -> Self {
        assert!(!validators.is_empty(), "validator set must not be empty");
        Self {
            leaders: validators.nodes().cloned().collect(),
        }
    }
}

impl ProposerElection for RotatingLeaders {
    fn proposer(&self, view: View) -> BftNode {
        let index = (view.get() % self.leaders.len() as u64) as usize;
        self.leaders[index].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::tests::{equal_set, node};

    #[test]
    fn dictatorship_always_returns_leader() {
        let election = Dictatorship::new(node(7));
        for view in 0..10 {
            assert_eq!(election.proposer(View::new(view)), node(7));
        }
    }

    #[test]
    fn rotating_leaders_cycle_through_validators() {
        let election = RotatingLeaders::new(&equal_set(3));
        assert_eq!(election.proposer(View::new(0)), node(0));
        assert_eq!(election.proposer(View::new(1)), node(1));
        assert_eq!(election.proposer(View::new(2)), node(2));
        assert_eq!(election.proposer(View::new(3)), node(0));
    }

    #[test]
    #[should_panic(expected = "validator set must not be empty")]
    fn rotating_leaders_require_validators() {
        RotatingLeaders::new(&BftValidatorSet::new([]));
    }
}

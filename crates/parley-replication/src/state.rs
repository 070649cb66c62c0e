//! Election state: role, term, primary, votes.
//!
//! All transitions live in [`ElectionState`] methods so the state-lock
//! discipline has a single enforcement point. Methods mutate in place and
//! return what the caller must do outside the lock (clear the vote record,
//! log a transition); they never perform I/O and never touch the vote lock
//! themselves.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use parley_types::{ReplicaId, Term};

/// A replica's role in the current term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts writes and replicates them; emits heartbeats.
    Primary,

    /// Applies replicated frames; forwards client writes to the primary.
    Backup,

    /// Soliciting votes to become primary.
    Candidate,
}

impl Role {
    /// Wire/log name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Primary => "PRIMARY",
            Role::Backup => "BACKUP",
            Role::Candidate => "CANDIDATE",
        }
    }
}

/// Read-only view of the coordinator state, captured under the state lock
/// and used after it is released.
#[derive(Debug, Clone)]
pub(crate) struct StateSnapshot {
    pub role: Role,
    pub term: Term,
    pub primary_id: Option<ReplicaId>,
}

/// Mutable election state, guarded by the coordinator's state lock.
#[derive(Debug)]
pub(crate) struct ElectionState {
    self_id: ReplicaId,
    cluster_size: usize,
    role: Role,
    current_term: Term,
    primary_id: Option<ReplicaId>,
    active_votes: HashSet<ReplicaId>,
    last_heartbeat_at: Instant,
}

impl ElectionState {
    pub fn new(self_id: ReplicaId, cluster_size: usize) -> Self {
        Self {
            self_id,
            cluster_size,
            role: Role::Candidate,
            current_term: Term::ZERO,
            primary_id: None,
            active_votes: HashSet::new(),
            last_heartbeat_at: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            role: self.role,
            term: self.current_term,
            primary_id: self.primary_id.clone(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn primary_id(&self) -> Option<&ReplicaId> {
        self.primary_id.as_ref()
    }

    /// Strict majority against the configured replica-set size.
    fn majority(&self) -> usize {
        self.cluster_size / 2 + 1
    }

    /// True when no heartbeat has arrived within `timeout`.
    pub fn heartbeat_stale(&self, timeout: Duration) -> bool {
        self.last_heartbeat_at.elapsed() > timeout
    }

    /// Processes a heartbeat from `sender` for `term`.
    ///
    /// Always refreshes the heartbeat instant. A higher term adopts the
    /// sender as primary and steps down; an equal term updates the primary
    /// unless we are the primary for it; a lower term is ignored. Returns
    /// true when the caller must clear `voted_for` (term advanced).
    #[must_use]
    pub fn observe_heartbeat(&mut self, term: Term, sender: &ReplicaId) -> bool {
        self.last_heartbeat_at = Instant::now();

        if term > self.current_term {
            tracing::info!(
                from = %sender,
                term = %term,
                old_term = %self.current_term,
                "higher-term heartbeat, stepping down"
            );
            self.current_term = term;
            self.primary_id = Some(sender.clone());
            self.role = Role::Backup;
            self.active_votes.clear();
            true
        } else if term == self.current_term {
            if self.role == Role::Primary {
                tracing::debug!(from = %sender, term = %term, "ignoring heartbeat, we are primary this term");
            } else {
                self.primary_id = Some(sender.clone());
            }
            false
        } else {
            tracing::debug!(from = %sender, term = %term, current = %self.current_term, "stale heartbeat ignored");
            false
        }
    }

    /// Adopts a higher term observed in any peer message; steps down when
    /// primary. Returns true when the caller must clear `voted_for`.
    #[must_use]
    pub fn observe_term(&mut self, term: Term) -> bool {
        if term <= self.current_term {
            return false;
        }
        tracing::info!(term = %term, old_term = %self.current_term, role = self.role.as_str(), "adopting higher term");
        self.current_term = term;
        if self.role == Role::Primary {
            self.primary_id = None;
        }
        self.role = Role::Backup;
        self.active_votes.clear();
        true
    }

    /// Begins an election: next term, Candidate role, self-vote seeded,
    /// primary cleared. Returns the election term, and whether the self-vote
    /// alone already carries the majority (single-node set).
    pub fn begin_election(&mut self) -> (Term, bool) {
        debug_assert!(self.role != Role::Primary, "primary must not start an election");

        self.current_term = self.current_term.next();
        self.role = Role::Candidate;
        self.primary_id = None;
        self.active_votes.clear();
        self.active_votes.insert(self.self_id.clone());

        let won = self.check_majority();
        (self.current_term, won)
    }

    /// Records a granted vote while we are Candidate in `term`.
    /// Returns true when the vote completes a majority and we became primary.
    pub fn record_vote(&mut self, term: Term, voter: ReplicaId) -> bool {
        if self.role != Role::Candidate || term != self.current_term {
            return false;
        }
        self.active_votes.insert(voter);
        self.check_majority()
    }

    /// Promotes to primary if the active votes carry the majority.
    fn check_majority(&mut self) -> bool {
        if self.active_votes.len() >= self.majority() {
            tracing::info!(
                term = %self.current_term,
                votes = self.active_votes.len(),
                cluster = self.cluster_size,
                "majority reached, becoming primary"
            );
            self.role = Role::Primary;
            self.primary_id = Some(self.self_id.clone());
            true
        } else {
            false
        }
    }

    /// Unconditional self-promotion after the bootstrap window expires with
    /// no primary established. Tolerates single-node startup.
    pub fn promote_self(&mut self) {
        self.current_term = self.current_term.next();
        self.role = Role::Primary;
        self.primary_id = Some(self.self_id.clone());
        tracing::info!(term = %self.current_term, "no primary after bootstrap window, self-promoting");
    }

    /// Drops the known primary (it stopped answering).
    pub fn clear_primary(&mut self) {
        self.primary_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(n: u16) -> ReplicaId {
        ReplicaId::from_parts("127.0.0.1", 9000 + n)
    }

    fn state() -> ElectionState {
        ElectionState::new(replica(1), 3)
    }

    #[test]
    fn higher_term_heartbeat_steps_down() {
        let mut s = state();
        let clear = s.observe_heartbeat(Term::new(5), &replica(2));
        assert!(clear);
        assert_eq!(s.role(), Role::Backup);
        assert_eq!(s.current_term(), Term::new(5));
        assert_eq!(s.primary_id(), Some(&replica(2)));
    }

    #[test]
    fn heartbeat_is_idempotent_at_equal_term() {
        let mut s = state();
        let _ = s.observe_heartbeat(Term::new(2), &replica(2));
        let before = (s.role(), s.current_term(), s.primary_id().cloned());
        let clear = s.observe_heartbeat(Term::new(2), &replica(2));
        assert!(!clear);
        assert_eq!((s.role(), s.current_term(), s.primary_id().cloned()), before);
    }

    #[test]
    fn primary_ignores_equal_term_heartbeat() {
        let mut s = state();
        let (_, _) = s.begin_election();
        let _ = s.record_vote(s.current_term(), replica(2));
        assert_eq!(s.role(), Role::Primary);

        let term = s.current_term();
        let clear = s.observe_heartbeat(term, &replica(3));
        assert!(!clear);
        assert_eq!(s.role(), Role::Primary);
        assert_eq!(s.primary_id(), Some(&replica(1)));
    }

    #[test]
    fn lower_term_heartbeat_is_ignored_but_refreshes_nothing_else() {
        let mut s = state();
        let _ = s.observe_heartbeat(Term::new(4), &replica(2));
        let clear = s.observe_heartbeat(Term::new(1), &replica(3));
        assert!(!clear);
        assert_eq!(s.primary_id(), Some(&replica(2)));
        assert_eq!(s.current_term(), Term::new(4));
    }

    #[test]
    fn term_never_decreases() {
        let mut s = state();
        let _ = s.observe_term(Term::new(7));
        let _ = s.observe_term(Term::new(3));
        assert_eq!(s.current_term(), Term::new(7));
        let (term, _) = s.begin_election();
        assert_eq!(term, Term::new(8));
    }

    #[test]
    fn election_needs_strict_majority_of_three() {
        let mut s = state();
        let (term, won) = s.begin_election();
        assert!(!won, "self vote alone is 1 of 3");
        assert_eq!(s.role(), Role::Candidate);

        assert!(s.record_vote(term, replica(2)), "2 of 3 is a strict majority");
        assert_eq!(s.role(), Role::Primary);
        assert_eq!(s.primary_id(), Some(&replica(1)));
    }

    #[test]
    fn single_node_wins_on_self_vote() {
        let mut s = ElectionState::new(replica(1), 1);
        let (_, won) = s.begin_election();
        assert!(won);
        assert_eq!(s.role(), Role::Primary);
    }

    #[test]
    fn stale_votes_from_an_old_term_do_not_count() {
        let mut s = state();
        let (old_term, _) = s.begin_election();
        let _ = s.observe_term(Term::new(old_term.as_u64() + 3));
        assert!(!s.record_vote(old_term, replica(2)));
        assert_eq!(s.role(), Role::Backup);
    }

    #[test]
    fn two_of_five_is_not_a_majority() {
        let mut s = ElectionState::new(replica(1), 5);
        let (term, _) = s.begin_election();
        assert!(!s.record_vote(term, replica(2)));
        assert_eq!(s.role(), Role::Candidate);
        assert!(s.record_vote(term, replica(3)), "3 of 5 wins");
    }
}

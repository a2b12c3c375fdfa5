//! DNF evaluation of a routing against live channel status.
//!
//! A [`Dispersal`] maps each channel term to the latest recorded
//! [`DisposalState`] and carries the `total` flag: whether every clause of
//! the routing is satisfied. It is rebuilt from the ledger before each pass
//! and written back afterwards, so [`Dispersal::multiplex`] must be safe to
//! run any number of times.

use std::fmt;

use crate::{
  channel::ChannelStatus,
  disposal::{DisposalState, DisposalTotalState},
  policy::{Encoding, Goal, Literal, Routing},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispersal {
  total:          bool,
  channel_filter: Option<String>,
  states:         Vec<(String, DisposalState)>,
}

impl Dispersal {
  pub fn new(channel_filter: Option<String>) -> Self {
    Self { total: false, channel_filter, states: Vec::new() }
  }

  /// Add `term` as `PENDING` unless it is already present.
  pub fn seed(&mut self, term: &str) {
    if self.get(term).is_none() {
      self.states.push((term.to_owned(), DisposalState::Pending));
    }
  }

  pub fn put(&mut self, term: &str, state: DisposalState) {
    match self.states.iter_mut().find(|(t, _)| t == term) {
      Some((_, s)) => *s = state,
      None => self.states.push((term.to_owned(), state)),
    }
  }

  pub fn get(&self, term: &str) -> Option<DisposalState> {
    self.states.iter().find(|(t, _)| t == term).map(|(_, s)| *s)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, DisposalState)> {
    self.states.iter().map(|(t, s)| (t.as_str(), *s))
  }

  pub fn len(&self) -> usize { self.states.len() }

  pub fn is_empty(&self) -> bool { self.states.is_empty() }

  pub fn total(&self) -> bool { self.total }

  pub fn channel_filter(&self) -> Option<&str> { self.channel_filter.as_deref() }

  /// Overlay previously recorded states, e.g. rows read back from the ledger.
  pub fn restore<I, S>(mut self, recorded: I) -> Self
  where
    I: IntoIterator<Item = (S, DisposalState)>,
    S: AsRef<str>,
  {
    for (term, state) in recorded {
      self.put(term.as_ref(), state);
    }
    self
  }

  /// Run one evaluation pass.
  ///
  /// `probe` reports a channel's live status; `send` is invoked only for a
  /// `READY` channel whose literal is still attemptable and returns the state
  /// the channel accepted the message in. Already-resolved literals are never
  /// sent again.
  pub fn multiplex<P, S>(&mut self, routing: &Routing, mut probe: P, mut send: S) -> &mut Self
  where
    P: FnMut(&str) -> ChannelStatus,
    S: FnMut(&str, &Encoding) -> DisposalState,
  {
    if routing.is_fallback() {
      tracing::debug!("no routing rule matched, attempting the default channel");
    }

    self.total = true;
    for literals in self.effective_clauses(routing) {
      let satisfied = self.evaluate_clause(&literals, &mut probe, &mut send);
      self.total &= satisfied;
    }
    self
  }

  /// Recompute `total` from the recorded states alone, without probing or
  /// sending. Used after an acknowledgement changes one channel's state.
  pub fn assess(&mut self, routing: &Routing) -> &mut Self {
    self.total = self
      .effective_clauses(routing)
      .iter()
      .all(|literals| literals.iter().any(|l| self.state(&l.term).satisfies(l.goal)));
    self
  }

  /// The clauses that take part in evaluation, narrowed by the channel
  /// filter. With a filter, clauses that never mention it drop out and the
  /// rest keep only the filter's literals; a filter the rule never mentions
  /// becomes a single clause of its own.
  fn effective_clauses(&self, routing: &Routing) -> Vec<Vec<Literal>> {
    let Some(filter) = self.channel_filter.as_deref() else {
      return routing.clauses.iter().map(|c| c.literals.clone()).collect();
    };

    if !routing.clauses.iter().any(|c| c.mentions(filter)) {
      return vec![vec![Literal::new(filter, Goal::Delivered, Encoding::default())]];
    }

    routing
      .clauses
      .iter()
      .filter(|c| c.mentions(filter))
      .map(|c| c.literals.iter().filter(|l| l.term == filter).cloned().collect())
      .collect()
  }

  fn state(&self, term: &str) -> DisposalState {
    self.get(term).unwrap_or(DisposalState::Pending)
  }

  fn evaluate_clause<P, S>(&mut self, literals: &[Literal], probe: &mut P, send: &mut S) -> bool
  where
    P: FnMut(&str) -> ChannelStatus,
    S: FnMut(&str, &Encoding) -> DisposalState,
  {
    if literals.iter().any(|l| self.state(&l.term).satisfies(l.goal)) {
      return true;
    }

    for literal in literals {
      let prior = self.state(&literal.term);
      let actual = if prior.is_attemptable() {
        let state = match probe(&literal.term) {
          ChannelStatus::Ready => send(&literal.term, &literal.encoding),
          other => other.infer_disposal(),
        };
        tracing::trace!(term = %literal.term, %prior, %state, "attempted channel");
        self.put(&literal.term, state);
        state
      } else {
        prior
      };

      if actual.satisfies(literal.goal) {
        return true;
      }
    }
    false
  }

  /// Fold the per-channel states into one request disposition.
  pub fn aggregate(&self) -> DisposalTotalState {
    if self.total {
      return DisposalTotalState::Complete;
    }

    let mask = self.states.iter().fold(0, |acc, (_, s)| acc | s.code());
    let any = |states: &[DisposalState]| states.iter().any(|s| mask & s.code() != 0);

    if any(&[DisposalState::Rejected, DisposalState::Busy]) {
      DisposalTotalState::Incomplete
    } else if any(&[DisposalState::Pending, DisposalState::New]) {
      DisposalTotalState::Distribute
    } else if any(&[DisposalState::Sent, DisposalState::Told, DisposalState::Delivered]) {
      DisposalTotalState::Complete
    } else if any(&[DisposalState::Bad]) {
      DisposalTotalState::Failed
    } else {
      DisposalTotalState::Distribute
    }
  }
}

impl fmt::Display for Dispersal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "total={} [", self.total)?;
    for (i, (term, state)) in self.states.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      write!(f, "{term}:{state}")?;
    }
    f.write_str("]")
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;
  use crate::policy::{Category, Clause};

  #[derive(Clone, Copy, Debug, PartialEq)]
  enum Outcome {
    Delivered,
    NotDelivered,
    Down,
  }

  fn lit(term: &str) -> Literal { Literal::new(term, Goal::Delivered, Encoding::Json) }

  /// `[(ch1) OR (ch2)] AND [(ch3)]`
  fn two_clause_routing() -> Routing {
    Routing::new(
      Category::Postal,
      vec![
        Clause::new(vec![lit("ch1"), lit("ch2")]),
        Clause::new(vec![lit("ch3")]),
      ],
    )
  }

  fn run(routing: &Routing, filter: Option<&str>, outcomes: &HashMap<&str, Outcome>) -> (Dispersal, Vec<String>) {
    let mut sent = Vec::new();
    let mut dispersal = routing.make_dispersal(filter);
    dispersal.multiplex(
      routing,
      |term| match outcomes.get(term) {
        Some(Outcome::Down) | None => ChannelStatus::Down,
        _ => ChannelStatus::Ready,
      },
      |term, _| {
        sent.push(term.to_owned());
        match outcomes[term] {
          Outcome::Delivered => DisposalState::Delivered,
          _ => DisposalState::Rejected,
        }
      },
    );
    (dispersal, sent)
  }

  #[test]
  fn dnf_truth_table() {
    let outcomes = [Outcome::Delivered, Outcome::NotDelivered, Outcome::Down];
    let routing = two_clause_routing();

    for &o1 in &outcomes {
      for &o2 in &outcomes {
        for &o3 in &outcomes {
          let map = HashMap::from([("ch1", o1), ("ch2", o2), ("ch3", o3)]);
          let (dispersal, _) = run(&routing, None, &map);

          let d = |o| o == Outcome::Delivered;
          let expected = (d(o1) || d(o2)) && d(o3);
          assert_eq!(dispersal.total(), expected, "{o1:?} {o2:?} {o3:?}: {dispersal}");
          assert_eq!(dispersal.aggregate() == DisposalTotalState::Complete, expected);
        }
      }
    }
  }

  #[test]
  fn disjunction_stops_at_first_satisfied_literal() {
    let map = HashMap::from([
      ("ch1", Outcome::Delivered),
      ("ch2", Outcome::Delivered),
      ("ch3", Outcome::Delivered),
    ]);
    let (dispersal, sent) = run(&two_clause_routing(), None, &map);
    assert!(dispersal.total());
    assert_eq!(sent, vec!["ch1", "ch3"]);
    assert_eq!(dispersal.get("ch2"), Some(DisposalState::Pending));
  }

  #[test]
  fn resolved_channels_are_not_sent_again() {
    let routing = two_clause_routing();
    let mut dispersal = routing
      .make_dispersal(None)
      .restore([("ch1", DisposalState::Sent), ("ch3", DisposalState::Rejected)]);

    let mut sent = Vec::new();
    dispersal.multiplex(
      &routing,
      |_| ChannelStatus::Ready,
      |term, _| {
        sent.push(term.to_owned());
        DisposalState::Sent
      },
    );

    assert!(dispersal.total());
    assert_eq!(sent, vec!["ch3"]);

    sent.clear();
    dispersal.multiplex(&routing, |_| ChannelStatus::Ready, |term, _| {
      sent.push(term.to_owned());
      DisposalState::Sent
    });
    assert!(sent.is_empty());
  }

  #[test]
  fn channel_filter_makes_unrelated_clauses_vacuous() {
    let routing = Routing::new(
      Category::Postal,
      vec![Clause::new(vec![lit("ch1")]), Clause::new(vec![lit("ch2")])],
    );
    let map = HashMap::from([("ch1", Outcome::Down), ("ch2", Outcome::Delivered)]);

    let (dispersal, sent) = run(&routing, Some("ch2"), &map);
    assert!(dispersal.total());
    assert_eq!(sent, vec!["ch2"]);
    assert_eq!(dispersal.get("ch1"), Some(DisposalState::Pending));
    assert_eq!(dispersal.aggregate(), DisposalTotalState::Complete);

    let (unfiltered, _) = run(&routing, None, &map);
    assert!(!unfiltered.total());
  }

  #[test]
  fn channel_filter_outside_the_rule_is_attempted_directly() {
    let routing = two_clause_routing();
    let map = HashMap::from([("ch9", Outcome::Delivered)]);

    let (dispersal, sent) = run(&routing, Some("ch9"), &map);
    assert!(dispersal.total());
    assert_eq!(sent, vec!["ch9"]);
  }

  #[test]
  fn not_delivered_goal_is_met_while_pending() {
    let routing = Routing::new(
      Category::Postal,
      vec![Clause::new(vec![Literal::new("ch1", Goal::NotDelivered, Encoding::Json)])],
    );
    let mut dispersal = routing.make_dispersal(None);
    dispersal.multiplex(&routing, |_| ChannelStatus::Ready, |_, _| unreachable!());
    assert!(dispersal.total());
  }

  #[test]
  fn aggregate_classification() {
    let with = |states: &[(&str, DisposalState)]| {
      Dispersal::new(None).restore(states.iter().copied()).aggregate()
    };

    assert_eq!(
      with(&[("a", DisposalState::Sent), ("b", DisposalState::Busy)]),
      DisposalTotalState::Incomplete
    );
    assert_eq!(
      with(&[("a", DisposalState::Sent), ("b", DisposalState::Pending)]),
      DisposalTotalState::Distribute
    );
    assert_eq!(
      with(&[("a", DisposalState::Told), ("b", DisposalState::Bad)]),
      DisposalTotalState::Complete
    );
    assert_eq!(with(&[("a", DisposalState::Bad)]), DisposalTotalState::Failed);
    assert_eq!(with(&[("a", DisposalState::Queued)]), DisposalTotalState::Distribute);
    assert_eq!(with(&[]), DisposalTotalState::Distribute);
  }

  #[test]
  fn satisfied_rule_is_complete_despite_leftover_busy() {
    let routing = Routing::new(
      Category::Postal,
      vec![Clause::new(vec![lit("ch1"), lit("ch2")])],
    );
    let mut dispersal = routing
      .make_dispersal(None)
      .restore([("ch1", DisposalState::Busy)]);
    dispersal.multiplex(
      &routing,
      |term| if term == "ch1" { ChannelStatus::Full } else { ChannelStatus::Ready },
      |_, _| DisposalState::Sent,
    );
    assert!(dispersal.total());
    assert_eq!(dispersal.get("ch1"), Some(DisposalState::Busy));
    assert_eq!(dispersal.aggregate(), DisposalTotalState::Complete);
  }

  #[test]
  fn assess_uses_recorded_states_only() {
    let routing = two_clause_routing();
    let mut dispersal = routing
      .make_dispersal(None)
      .restore([("ch2", DisposalState::Sent), ("ch3", DisposalState::Told)]);

    assert!(!dispersal.assess(&routing).total());
    assert_eq!(dispersal.get("ch1"), Some(DisposalState::Pending));

    dispersal.put("ch3", DisposalState::Delivered);
    assert!(dispersal.assess(&routing).total());
    assert_eq!(dispersal.aggregate(), DisposalTotalState::Complete);
  }

  #[test]
  fn fallback_routing_sends_on_default_channel() {
    let routing = Routing::fallback(Category::Postal, "gw");
    let mut dispersal = routing.make_dispersal(None);
    dispersal.multiplex(&routing, |_| ChannelStatus::Ready, |term, enc| {
      assert_eq!(term, "gw");
      assert_eq!(*enc, Encoding::Json);
      DisposalState::Queued
    });
    assert!(dispersal.total());
  }
}

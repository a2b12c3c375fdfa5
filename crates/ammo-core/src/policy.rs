//! The routing policy: `Topic → Routing → Clause → Literal`.
//!
//! A [`Policy`] is built once (usually by [`crate::policy_xml`]) and is
//! read-only afterwards. Lookups never fail: a topic with no matching prefix
//! gets a synthesized fallback rule that sends on the default channel.

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{dispersal::Dispersal, request::RequestType};

/// Channel term used when nothing else is configured.
pub const DEFAULT_CHANNEL: &str = "gateway";

// ─── Category ────────────────────────────────────────────────────────────────

/// Which request kind a routing applies to.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
  EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Category {
  Postal,
  Subscribe,
  Retrieval,
  Publish,
}

impl Category {
  /// Lifespan applied when a routing does not declare one.
  pub fn default_lifespan(self) -> Option<TimeDelta> {
    match self {
      Self::Postal | Self::Publish => Some(TimeDelta::hours(8)),
      Self::Retrieval => Some(TimeDelta::minutes(30)),
      Self::Subscribe => None,
    }
  }
}

impl From<RequestType> for Category {
  fn from(t: RequestType) -> Self {
    match t {
      RequestType::Postal => Self::Postal,
      RequestType::Retrieval => Self::Retrieval,
      RequestType::Subscribe => Self::Subscribe,
    }
  }
}

// ─── Literal parts ───────────────────────────────────────────────────────────

/// What a literal needs from its channel to count as satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Goal {
  Delivered,
  NotDelivered,
}

impl FromStr for Goal {
  type Err = crate::Error;

  fn from_str(s: &str) -> crate::Result<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "true" | "success" | "delivered" => Ok(Self::Delivered),
      "false" | "failure" | "not-delivered" => Ok(Self::NotDelivered),
      other => Err(crate::Error::InvalidPolicy(format!(
        "unknown literal condition {other:?}"
      ))),
    }
  }
}

/// Wire encoding chosen per literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
  /// Compact positional binary.
  Terse,
  /// Self-describing JSON with appended blobs.
  #[default]
  Json,
  /// Handed to a registered adaptor under this name.
  Custom(String),
}

impl Encoding {
  pub fn name(&self) -> &str {
    match self {
      Self::Terse => "terse",
      Self::Json => "json",
      Self::Custom(name) => name,
    }
  }
}

impl FromStr for Encoding {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    Ok(if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("json") {
      Self::Json
    } else if trimmed.eq_ignore_ascii_case("terse") {
      Self::Terse
    } else {
      Self::Custom(trimmed.to_owned())
    })
  }
}

impl fmt::Display for Encoding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

// ─── Rule structure ──────────────────────────────────────────────────────────

/// One channel term with its goal and encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Literal {
  pub term:     String,
  pub goal:     Goal,
  pub encoding: Encoding,
}

impl Literal {
  pub fn new(term: impl Into<String>, goal: Goal, encoding: Encoding) -> Self {
    Self { term: term.into(), goal, encoding }
  }
}

/// A disjunction of literals.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Clause {
  pub literals: Vec<Literal>,
}

impl Clause {
  pub fn new(literals: Vec<Literal>) -> Self { Self { literals } }

  pub fn mentions(&self, term: &str) -> bool {
    self.literals.iter().any(|l| l.term == term)
  }
}

/// A conjunction of clauses plus delivery parameters for one category.
#[derive(Debug, Clone, PartialEq)]
pub struct Routing {
  pub category: Category,
  /// `None` defers entirely to the application's priority.
  pub priority: Option<i32>,
  /// `None` never expires on the routing's account.
  pub lifespan: Option<TimeDelta>,
  /// Inbound subscribe payloads on this topic are re-posted locally.
  pub relay:    bool,
  pub clauses:  Vec<Clause>,
  fallback:     bool,
}

impl Routing {
  pub fn new(category: Category, clauses: Vec<Clause>) -> Self {
    Self {
      category,
      priority: None,
      lifespan: category.default_lifespan(),
      relay: false,
      clauses,
      fallback: false,
    }
  }

  /// The synthesized rule used when no topic prefix matches.
  pub fn fallback(category: Category, channel: &str) -> Self {
    Self {
      fallback: true,
      ..Self::new(
        category,
        vec![Clause::new(vec![Literal::new(
          channel,
          Goal::Delivered,
          Encoding::default(),
        )])],
      )
    }
  }

  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = Some(priority);
    self
  }

  pub fn with_lifespan(mut self, lifespan: Option<TimeDelta>) -> Self {
    self.lifespan = lifespan;
    self
  }

  pub fn with_relay(mut self, relay: bool) -> Self {
    self.relay = relay;
    self
  }

  /// True when this rule was synthesized because nothing matched.
  pub fn is_fallback(&self) -> bool { self.fallback }

  /// Effective priority: the lower of the routing's and the application's.
  pub fn priority(&self, app: i32) -> i32 {
    match self.priority {
      Some(p) if p >= 0 => p.min(app),
      _ => app,
    }
  }

  /// Effective expiration: the earlier of `now + lifespan` and the
  /// application's own deadline.
  pub fn expiration(&self, app: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    match self.lifespan.and_then(|l| now.checked_add_signed(l)) {
      Some(limit) => limit.min(app),
      None => app,
    }
  }

  /// Distinct channel terms in declared order.
  pub fn terms(&self) -> Vec<&str> {
    let mut terms: Vec<&str> = Vec::new();
    for literal in self.clauses.iter().flat_map(|c| &c.literals) {
      if !terms.contains(&literal.term.as_str()) {
        terms.push(&literal.term);
      }
    }
    terms
  }

  /// Seed a dispersal with one pending entry per channel term.
  ///
  /// A channel filter that the rule never mentions is seeded as well, so the
  /// forced channel has a disposal row to track.
  pub fn make_dispersal(&self, channel_filter: Option<&str>) -> Dispersal {
    let mut dispersal = Dispersal::new(channel_filter.map(str::to_owned));
    for term in self.terms() {
      dispersal.seed(term);
    }
    if let Some(filter) = channel_filter {
      dispersal.seed(filter);
    }
    dispersal
  }
}

/// A topic key and its routing for one category.
#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
  pub name:    String,
  pub routing: Routing,
}

// ─── Policy ──────────────────────────────────────────────────────────────────

/// The loaded rule set, keyed by category then topic prefix.
#[derive(Debug, Clone)]
pub struct Policy {
  topics:          HashMap<Category, Vec<Topic>>,
  fallbacks:       HashMap<Category, Topic>,
  default_channel: String,
}

impl Default for Policy {
  fn default() -> Self { Self::new(DEFAULT_CHANNEL) }
}

impl Policy {
  /// An empty policy whose fallback rule sends on `default_channel`.
  pub fn new(default_channel: impl Into<String>) -> Self {
    let default_channel = default_channel.into();
    let fallbacks = [
      Category::Postal,
      Category::Subscribe,
      Category::Retrieval,
      Category::Publish,
    ]
    .into_iter()
    .map(|c| {
      (c, Topic {
        name:    String::new(),
        routing: Routing::fallback(c, &default_channel),
      })
    })
    .collect();

    Self { topics: HashMap::new(), fallbacks, default_channel }
  }

  pub fn default_channel(&self) -> &str { &self.default_channel }

  /// Register a topic rule, replacing any rule with the same key.
  pub fn insert(&mut self, name: impl Into<String>, routing: Routing) {
    let name = name.into();
    let topics = self.topics.entry(routing.category).or_default();
    topics.retain(|t| t.name != name);
    topics.push(Topic { name, routing });
  }

  pub fn topics(&self, category: Category) -> &[Topic] {
    self.topics.get(&category).map(Vec::as_slice).unwrap_or_default()
  }

  pub fn len(&self) -> usize { self.topics.values().map(Vec::len).sum() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Longest-prefix match of `topic` within `category`.
  pub fn match_topic(&self, category: Category, topic: &str) -> &Topic {
    let best = self
      .topics(category)
      .iter()
      .filter(|t| topic.starts_with(t.name.as_str()))
      .max_by_key(|t| t.name.len());

    match best {
      Some(t) => t,
      None => {
        tracing::debug!(%category, topic, "no policy match, using fallback rule");
        &self.fallbacks[&category]
      }
    }
  }
}

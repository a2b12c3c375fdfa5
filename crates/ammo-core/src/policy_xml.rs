//! Loader for the XML policy file.
//!
//! ```xml
//! <policy>
//!   <topic type="ammo/gps">
//!     <routing category="postal" priority="urgent" lifespan="10">
//!       <clause>
//!         <literal term="gateway" condition="true" encoding="terse"/>
//!         <literal term="multicast" condition="true"/>
//!       </clause>
//!     </routing>
//!   </topic>
//! </policy>
//! ```
//!
//! `lifespan` is in minutes; a negative value never expires. A routing
//! without clauses sends on the default channel.

use std::{collections::HashMap, path::Path};

use chrono::TimeDelta;
use quick_xml::events::{BytesStart, Event};

use crate::{
  Error, Result,
  policy::{Category, Clause, Encoding, Goal, Literal, Policy, Routing},
  request::priority,
};

/// Read and parse the policy file at `path`.
pub fn load_policy(path: impl AsRef<Path>, default_channel: &str) -> Result<Policy> {
  let xml = std::fs::read_to_string(path)?;
  parse_policy(&xml, default_channel)
}

/// Parse policy XML. Unknown elements are ignored.
pub fn parse_policy(xml: &str, default_channel: &str) -> Result<Policy> {
  let mut reader = quick_xml::Reader::from_str(xml);
  reader.config_mut().trim_text(true);

  let mut builder = Builder {
    policy: Policy::new(default_channel),
    topic: None,
    routing: None,
    clause: None,
  };

  loop {
    match reader.read_event()? {
      Event::Start(ref e) => builder.open(e)?,
      Event::Empty(ref e) => {
        builder.open(e)?;
        builder.close(e.local_name().as_ref());
      }
      Event::End(ref e) => builder.close(e.local_name().as_ref()),
      Event::Eof => break,
      _ => {}
    }
  }

  tracing::debug!(rules = builder.policy.len(), "loaded policy");
  Ok(builder.policy)
}

// ─── Builder ─────────────────────────────────────────────────────────────────

struct Builder {
  policy:  Policy,
  topic:   Option<String>,
  routing: Option<Routing>,
  clause:  Option<Clause>,
}

impl Builder {
  fn open(&mut self, e: &BytesStart<'_>) -> Result<()> {
    match e.local_name().as_ref() {
      b"topic" => {
        let name = attributes(e)?
          .remove("type")
          .ok_or_else(|| Error::InvalidPolicy("topic without type".into()))?;
        self.topic = Some(name);
      }
      b"routing" => {
        if self.topic.is_none() {
          return Err(Error::InvalidPolicy("routing outside topic".into()));
        }
        self.routing = Some(parse_routing(e)?);
      }
      b"clause" => {
        if self.routing.is_none() {
          return Err(Error::InvalidPolicy("clause outside routing".into()));
        }
        self.clause = Some(Clause::default());
      }
      b"literal" => {
        let literal = parse_literal(e)?;
        match self.clause.as_mut() {
          Some(c) => c.literals.push(literal),
          None => return Err(Error::InvalidPolicy("literal outside clause".into())),
        }
      }
      _ => {}
    }
    Ok(())
  }

  fn close(&mut self, local: &[u8]) {
    match local {
      b"clause" => {
        if let (Some(c), Some(r)) = (self.clause.take(), self.routing.as_mut())
          && !c.literals.is_empty()
        {
          r.clauses.push(c);
        }
      }
      b"routing" => {
        if let (Some(mut r), Some(name)) = (self.routing.take(), self.topic.as_ref()) {
          if r.clauses.is_empty() {
            r.clauses = Routing::fallback(r.category, self.policy.default_channel()).clauses;
          }
          self.policy.insert(name.clone(), r);
        }
      }
      b"topic" => self.topic = None,
      _ => {}
    }
  }
}

// ─── Elements ────────────────────────────────────────────────────────────────

fn attributes(e: &BytesStart<'_>) -> Result<HashMap<String, String>> {
  let mut map = HashMap::new();
  for attr in e.attributes() {
    let attr = attr?;
    let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
    map.insert(key, attr.unescape_value()?.into_owned());
  }
  Ok(map)
}

fn parse_routing(e: &BytesStart<'_>) -> Result<Routing> {
  let mut attrs = attributes(e)?;

  let category = match attrs.remove("category") {
    Some(c) => c.parse::<Category>().map_err(|_| Error::UnknownCategory(c))?,
    None => Category::Postal,
  };

  let mut routing = Routing::new(category, Vec::new());

  if let Some(p) = attrs.remove("priority")
    && !p.trim().eq_ignore_ascii_case("default")
  {
    routing = routing.with_priority(priority::parse(&p)?);
  }

  if let Some(l) = attrs.remove("lifespan") {
    let minutes: i64 = l
      .trim()
      .parse()
      .map_err(|_| Error::InvalidPolicy(format!("invalid lifespan {l:?}")))?;
    let lifespan = (minutes >= 0).then(|| TimeDelta::minutes(minutes));
    routing = routing.with_lifespan(lifespan);
  }

  if let Some(r) = attrs.remove("relay") {
    routing = routing.with_relay(r.trim().eq_ignore_ascii_case("true"));
  }

  Ok(routing)
}

fn parse_literal(e: &BytesStart<'_>) -> Result<Literal> {
  let mut attrs = attributes(e)?;

  let term = attrs
    .remove("term")
    .filter(|t| !t.trim().is_empty())
    .ok_or_else(|| Error::InvalidPolicy("literal without term".into()))?;

  let goal = match attrs.remove("condition") {
    Some(c) => c.parse::<Goal>()?,
    None => Goal::Delivered,
  };

  let encoding = attrs
    .remove("encoding")
    .map(|enc| enc.parse::<Encoding>().unwrap_or_default())
    .unwrap_or_default();

  Ok(Literal::new(term.trim(), goal, encoding))
}

#[cfg(test)]
mod tests {
  use super::*;

  const POLICY: &str = r#"
    <policy>
      <topic type="ammo/gps">
        <routing category="postal" priority="urgent" lifespan="10">
          <clause>
            <literal term="gateway" condition="true" encoding="terse"/>
            <literal term="multicast" condition="success"/>
          </clause>
          <clause>
            <literal term="serial" condition="false" encoding="gps-adaptor"/>
          </clause>
        </routing>
        <routing category="subscribe" relay="true" lifespan="-1"/>
      </topic>
      <topic type="ammo/gps/precise">
        <routing category="postal" priority="7"/>
      </topic>
    </policy>
  "#;

  #[test]
  fn loads_nested_rules() {
    let policy = parse_policy(POLICY, "gateway").unwrap();
    assert_eq!(policy.len(), 3);

    let topic = policy.match_topic(Category::Postal, "ammo/gps/raw");
    assert_eq!(topic.name, "ammo/gps");

    let r = &topic.routing;
    assert_eq!(r.priority, Some(priority::URGENT));
    assert_eq!(r.lifespan, Some(TimeDelta::minutes(10)));
    assert_eq!(r.clauses.len(), 2);
    assert_eq!(r.clauses[0].literals[0].encoding, Encoding::Terse);
    assert_eq!(r.clauses[0].literals[1].goal, Goal::Delivered);
    assert_eq!(r.clauses[1].literals[0].goal, Goal::NotDelivered);
    assert_eq!(
      r.clauses[1].literals[0].encoding,
      Encoding::Custom("gps-adaptor".into())
    );
  }

  #[test]
  fn empty_routing_uses_default_channel() {
    let policy = parse_policy(POLICY, "gw").unwrap();

    let sub = policy.match_topic(Category::Subscribe, "ammo/gps");
    assert!(sub.routing.relay);
    assert_eq!(sub.routing.lifespan, None);
    assert_eq!(sub.routing.terms(), vec!["gw"]);
    assert!(!sub.routing.is_fallback());

    let precise = policy.match_topic(Category::Postal, "ammo/gps/precise/x");
    assert_eq!(precise.routing.priority, Some(7));
  }

  #[test]
  fn rejects_malformed_rules() {
    assert!(parse_policy(r#"<policy><topic type="a"><routing category="broadcast"/></topic></policy>"#, "gw").is_err());
    assert!(parse_policy(r#"<policy><topic type="a"><routing><clause><literal/></clause></routing></topic></policy>"#, "gw").is_err());
    assert!(parse_policy(r#"<policy><topic><routing/></topic></policy>"#, "gw").is_err());
    assert!(parse_policy(r#"<policy><literal term="x"/></policy>"#, "gw").is_err());
  }

  #[test]
  fn load_missing_file_is_io_error() {
    let err = load_policy("/nonexistent/ammo-policy.xml", "gw").unwrap_err();
    assert!(matches!(err, Error::Io(_)));
  }
}

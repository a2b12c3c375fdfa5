//! Application requests as submitted to the coordinator.

use ammo_core::{
  notice::Notice,
  request::{Detail, Request, RequestType, RetrievalQuery},
};
use chrono::{DateTime, Utc};

/// Everything an application can ask of the distributor.
#[derive(Debug, Clone, PartialEq)]
pub enum AppRequest {
  Post(Request),
  Retrieve(Request),
  Subscribe(Request),
  /// A post built from an inbound message that the local policy relays.
  /// The channel it arrived on counts as already delivered.
  Relay { request: Request, arrived_on: String },
  CancelPost { topic: String, provider: String },
  CancelRetrieve { topic: String, provider: String },
  CancelSubscribe { topic: String, provider: String },
}

impl AppRequest {
  pub fn post(topic: impl Into<String>, provider: impl Into<String>) -> Self {
    Self::Post(Request::new(Detail::Postal, topic, provider))
  }

  pub fn retrieve(topic: impl Into<String>, provider: impl Into<String>, query: RetrievalQuery) -> Self {
    Self::Retrieve(Request::new(Detail::Retrieval(query), topic, provider))
  }

  pub fn subscribe(
    topic: impl Into<String>,
    provider: impl Into<String>,
    selection: Option<String>,
  ) -> Self {
    Self::Subscribe(Request::new(Detail::Subscribe { selection }, topic, provider))
  }

  pub fn cancel(kind: RequestType, topic: impl Into<String>, provider: impl Into<String>) -> Self {
    let (topic, provider) = (topic.into(), provider.into());
    match kind {
      RequestType::Postal => Self::CancelPost { topic, provider },
      RequestType::Retrieval => Self::CancelRetrieve { topic, provider },
      RequestType::Subscribe => Self::CancelSubscribe { topic, provider },
    }
  }

  pub fn request_type(&self) -> RequestType {
    match self {
      Self::Post(_) | Self::Relay { .. } | Self::CancelPost { .. } => RequestType::Postal,
      Self::Retrieve(_) | Self::CancelRetrieve { .. } => RequestType::Retrieval,
      Self::Subscribe(_) | Self::CancelSubscribe { .. } => RequestType::Subscribe,
    }
  }

  pub fn request(&self) -> Option<&Request> {
    match self {
      Self::Post(r) | Self::Retrieve(r) | Self::Subscribe(r) | Self::Relay { request: r, .. } => Some(r),
      _ => None,
    }
  }

  fn request_mut(&mut self) -> Option<&mut Request> {
    match self {
      Self::Post(r) | Self::Retrieve(r) | Self::Subscribe(r) | Self::Relay { request: r, .. } => Some(r),
      _ => None,
    }
  }

  fn edit(mut self, f: impl FnOnce(&mut Request)) -> Self {
    if let Some(r) = self.request_mut() {
      f(r);
    }
    self
  }

  // Builders; no-ops on cancellations.

  pub fn with_priority(self, priority: i32) -> Self { self.edit(|r| r.priority = priority) }

  pub fn with_payload(self, payload: Vec<u8>) -> Self { self.edit(|r| r.payload = Some(payload)) }

  pub fn with_expiration(self, at: DateTime<Utc>) -> Self { self.edit(|r| r.expiration = at) }

  pub fn with_channel_filter(self, channel: impl Into<String>) -> Self {
    let channel = channel.into();
    self.edit(|r| r.channel_filter = Some(channel))
  }

  pub fn with_notice(self, notice: Notice) -> Self { self.edit(|r| r.notice = notice) }

  pub fn with_auid(self, auid: impl Into<String>) -> Self {
    let auid = auid.into();
    self.edit(|r| r.auid = Some(auid))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builders_fill_the_request() {
    let req = AppRequest::post("ammo/sensor", "content://sensor/1")
      .with_priority(0x40)
      .with_channel_filter("serial")
      .with_auid("app-7");

    let r = req.request().unwrap();
    assert_eq!(r.priority, 0x40);
    assert_eq!(r.channel_filter.as_deref(), Some("serial"));
    assert_eq!(r.auid.as_deref(), Some("app-7"));
    assert_eq!(req.request_type(), RequestType::Postal);
  }

  #[test]
  fn cancel_kinds() {
    let c = AppRequest::cancel(RequestType::Subscribe, "t", "p");
    assert_eq!(c, AppRequest::CancelSubscribe { topic: "t".into(), provider: "p".into() });
    assert!(c.request().is_none());
    assert_eq!(c.with_priority(1).request_type(), RequestType::Subscribe);
  }
}

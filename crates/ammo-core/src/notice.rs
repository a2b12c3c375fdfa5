//! Delivery notices: which lifecycle thresholds raise an acknowledgement and
//! which sinks receive it.

use std::{
  fmt,
  sync::{Arc, mpsc::SyncSender},
};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use uuid::Uuid;

use crate::{disposal::DisposalState, request::RequestType};

// ─── Via ─────────────────────────────────────────────────────────────────────

/// Set of sinks a threshold is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Via(u8);

impl Via {
  pub const NONE: Self = Self(0);
  pub const CALLBACK: Self = Self(0x01);
  pub const EVENT: Self = Self(0x02);
  pub const TRIGGER: Self = Self(0x04);
  pub const LOG: Self = Self(0x08);

  pub const fn union(self, other: Self) -> Self { Self(self.0 | other.0) }

  pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 && other.0 != 0 }

  pub const fn is_active(self) -> bool { self.0 != 0 }
}

// ─── Notice ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Threshold {
  /// The request was handed to a channel.
  Sent,
  /// The far device reported delivery.
  DeviceDelivered,
  /// The gateway relay received the message.
  GatewayDelivered,
  /// The far plugin reported delivery.
  PluginDelivered,
}

/// Per-request notice policy; persisted with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Notice {
  #[serde(default)]
  pub at_send:              Via,
  #[serde(default)]
  pub at_device_delivered:  Via,
  #[serde(default)]
  pub at_gateway_delivered: Via,
  #[serde(default)]
  pub at_plugin_delivered:  Via,
}

impl Notice {
  pub fn via(&self, threshold: Threshold) -> Via {
    match threshold {
      Threshold::Sent => self.at_send,
      Threshold::DeviceDelivered => self.at_device_delivered,
      Threshold::GatewayDelivered => self.at_gateway_delivered,
      Threshold::PluginDelivered => self.at_plugin_delivered,
    }
  }

  pub fn is_active(&self) -> bool {
    [
      self.at_send,
      self.at_device_delivered,
      self.at_gateway_delivered,
      self.at_plugin_delivered,
    ]
    .iter()
    .any(|v| v.is_active())
  }
}

/// A fired notice, as seen by sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct NoticeEvent {
  pub threshold:    Threshold,
  pub request_type: RequestType,
  pub uuid:         Uuid,
  pub topic:        String,
  pub auid:         Option<String>,
  pub channel:      Option<String>,
  pub state:        Option<DisposalState>,
}

impl fmt::Display for NoticeEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {} {} topic={}", self.threshold, self.request_type, self.uuid, self.topic)
  }
}

// ─── Sinks ───────────────────────────────────────────────────────────────────

/// Receives notices synchronously on the coordinator thread.
pub trait NotificationSink: Send + Sync {
  fn notify(&self, event: &NoticeEvent);
}

/// Invokes a closure.
pub struct CallbackSink<F>(pub F);

impl<F> NotificationSink for CallbackSink<F>
where
  F: Fn(&NoticeEvent) + Send + Sync,
{
  fn notify(&self, event: &NoticeEvent) { (self.0)(event) }
}

/// Forwards to a bounded channel; a full or closed channel drops the notice.
pub struct ChannelSink(pub SyncSender<NoticeEvent>);

impl NotificationSink for ChannelSink {
  fn notify(&self, event: &NoticeEvent) {
    if let Err(e) = self.0.try_send(event.clone()) {
      tracing::warn!(%event, "notice dropped: {e}");
    }
  }
}

/// Emits a structured log line.
pub struct LogSink;

impl NotificationSink for LogSink {
  fn notify(&self, event: &NoticeEvent) {
    tracing::info!(
      threshold = %event.threshold,
      request   = %event.request_type,
      uuid      = %event.uuid,
      topic     = %event.topic,
      channel   = event.channel.as_deref(),
      "notice"
    );
  }
}

/// Routes a fired threshold to the sinks its [`Via`] selects.
#[derive(Clone, Default)]
pub struct Notifier {
  callback: Option<Arc<dyn NotificationSink>>,
  event:    Option<Arc<dyn NotificationSink>>,
  trigger:  Option<Arc<dyn NotificationSink>>,
}

impl Notifier {
  pub fn new() -> Self { Self::default() }

  pub fn with_callback(mut self, sink: Arc<dyn NotificationSink>) -> Self {
    self.callback = Some(sink);
    self
  }

  pub fn with_event(mut self, sink: Arc<dyn NotificationSink>) -> Self {
    self.event = Some(sink);
    self
  }

  pub fn with_trigger(mut self, sink: Arc<dyn NotificationSink>) -> Self {
    self.trigger = Some(sink);
    self
  }

  /// Fire `event` if `notice` routes its threshold anywhere. Returns whether
  /// any sink was invoked.
  pub fn fire(&self, notice: &Notice, event: &NoticeEvent) -> bool {
    let via = notice.via(event.threshold);
    if !via.is_active() {
      return false;
    }

    let mut fired = false;
    for (bit, sink) in [
      (Via::CALLBACK, &self.callback),
      (Via::EVENT, &self.event),
      (Via::TRIGGER, &self.trigger),
    ] {
      if !via.contains(bit) {
        continue;
      }
      match sink {
        Some(sink) => {
          sink.notify(event);
          fired = true;
        }
        None => tracing::debug!(%event, "no sink configured for notice"),
      }
    }
    if via.contains(Via::LOG) {
      LogSink.notify(event);
      fired = true;
    }
    fired
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Mutex, mpsc};

  use super::*;

  fn event(threshold: Threshold) -> NoticeEvent {
    NoticeEvent {
      threshold,
      request_type: RequestType::Postal,
      uuid: Uuid::nil(),
      topic: "ammo/test".into(),
      auid: None,
      channel: Some("gw".into()),
      state: Some(DisposalState::Sent),
    }
  }

  #[test]
  fn via_bits() {
    let via = Via::CALLBACK.union(Via::LOG);
    assert!(via.contains(Via::CALLBACK));
    assert!(!via.contains(Via::EVENT));
    assert!(!via.contains(Via::NONE));
    assert!(!Via::NONE.is_active());
  }

  #[test]
  fn fires_only_selected_sinks() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = seen.clone();
    let (tx, rx) = mpsc::sync_channel(4);

    let notifier = Notifier::new()
      .with_callback(Arc::new(CallbackSink(move |e: &NoticeEvent| {
        seen_cb.lock().unwrap().push(e.threshold);
      })))
      .with_event(Arc::new(ChannelSink(tx)));

    let notice = Notice {
      at_send: Via::CALLBACK,
      at_device_delivered: Via::EVENT,
      ..Notice::default()
    };

    assert!(notifier.fire(&notice, &event(Threshold::Sent)));
    assert!(notifier.fire(&notice, &event(Threshold::DeviceDelivered)));
    assert!(!notifier.fire(&notice, &event(Threshold::PluginDelivered)));

    assert_eq!(*seen.lock().unwrap(), vec![Threshold::Sent]);
    assert_eq!(rx.try_recv().unwrap().threshold, Threshold::DeviceDelivered);
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn notice_serializes_as_json() {
    let notice = Notice { at_gateway_delivered: Via::TRIGGER, ..Notice::default() };
    let json = serde_json::to_string(&notice).unwrap();
    let back: Notice = serde_json::from_str(&json).unwrap();
    assert_eq!(back, notice);
    assert!(back.is_active());
  }
}

//! The coordinator: the single thread that owns the ledger and the policy.
//!
//! Four bounded queues feed it: channel-state deltas, channel acks, inbound
//! frames and application requests. Each cycle applies pending deltas, then
//! takes at most one item from each of the other queues in that order. When
//! every queue is empty it waits on the shared monitor, bounded so the
//! garbage-collection schedule still fires.

use std::{
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use ammo_codec::{
  Codec, frame,
  wire::{
    AuthStatus, AuthenticationResult, Body, DataMessage, Envelope, PullRequest, PullResponse,
    PushAcknowledgement, PushStatus, SubscribeMessage, TerseMessage, Thresholds,
  },
};
use ammo_core::{
  channel::{ChannelChange, ChannelState},
  dispersal::Dispersal,
  disposal::{DisposalState, DisposalTotalState},
  notice::{NoticeEvent, Notifier, Threshold},
  policy::{Category, Encoding, Policy},
  request::{Detail, Request, RequestType},
};
use ammo_store_sqlite::DistributorStore;
use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;

use crate::{
  Error, Result,
  channel::{AckHandler, Channels},
  config::DistributorConfig,
  pool::{DeserializerPool, Task, TupleWriter},
  presence::{PresenceRegistry, PresenceSnapshot},
  queue::{BoundedQueue, Monitor},
  request::AppRequest,
  stats::{DistributorStats, StatsSnapshot},
  tuple_store::TupleStore,
};

const REQUEST_TYPES: [RequestType; 3] =
  [RequestType::Postal, RequestType::Retrieval, RequestType::Subscribe];

// ─── Events ──────────────────────────────────────────────────────────────────

/// A channel's report on an earlier send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAck {
  pub request_type: RequestType,
  pub id:           i64,
  pub channel:      String,
  pub state:        DisposalState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDelta {
  pub channel: String,
  pub change:  ChannelChange,
}

/// A frame received on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
  pub channel: String,
  pub frame:   Bytes,
}

struct Inbox {
  monitor:   Arc<Monitor>,
  deltas:    BoundedQueue<ChannelDelta>,
  acks:      BoundedQueue<ChannelAck>,
  responses: BoundedQueue<Inbound>,
  requests:  BoundedQueue<AppRequest>,
  shutdown:  AtomicBool,
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Producer side of the coordinator; cheap to clone and share.
#[derive(Clone)]
pub struct DistributorHandle {
  inbox:    Arc<Inbox>,
  stats:    Arc<DistributorStats>,
  presence: Arc<Mutex<PresenceRegistry>>,
  timeout:  Duration,
}

impl DistributorHandle {
  /// Queue an application request. Fails if the queue stays full for the
  /// offer timeout; resubmitting is up to the caller.
  pub fn submit(&self, request: AppRequest) -> Result<()> {
    self.submit_within(request, self.timeout)
  }

  /// [`submit`](Self::submit) with an explicit offer timeout.
  pub fn submit_within(&self, request: AppRequest, timeout: Duration) -> Result<()> {
    self.guard()?;
    self
      .inbox
      .requests
      .offer(request, timeout)
      .inspect_err(|_| self.stats.dropped_request())
  }

  /// Queue a frame received on `channel`.
  pub fn deliver(&self, channel: &str, frame: Bytes) -> Result<()> {
    self.guard()?;
    let inbound = Inbound { channel: channel.to_owned(), frame };
    self
      .inbox
      .responses
      .offer(inbound, self.timeout)
      .inspect_err(|_| self.stats.dropped_response())
  }

  pub fn acknowledge(&self, ack: ChannelAck) -> Result<()> {
    self.guard()?;
    self.inbox.acks.offer(ack, self.timeout).inspect_err(|_| self.stats.dropped_ack())
  }

  pub fn channel_changed(&self, channel: &str, change: ChannelChange) -> Result<()> {
    self.guard()?;
    let delta = ChannelDelta { channel: channel.to_owned(), change };
    self.inbox.deltas.offer(delta, self.timeout)
  }

  /// Ask the coordinator loop to exit after its current cycle.
  pub fn shutdown(&self) {
    self.inbox.shutdown.store(true, Ordering::Release);
    self.inbox.monitor.notify();
  }

  pub fn stats(&self) -> StatsSnapshot { self.stats.snapshot() }

  pub fn presence(&self) -> PresenceSnapshot { lock(&self.presence).snapshot() }

  fn guard(&self) -> Result<()> {
    if self.inbox.shutdown.load(Ordering::Acquire) {
      return Err(Error::ShuttingDown);
    }
    Ok(())
  }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

// ─── Coordinator ─────────────────────────────────────────────────────────────

/// External collaborators the coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
  pub channels: Arc<dyn Channels>,
  pub tuples:   Arc<dyn TupleStore>,
  pub codec:    Codec,
  pub notifier: Notifier,
}

pub struct Coordinator {
  config:        DistributorConfig,
  store:         DistributorStore,
  policy:        Policy,
  channels:      Arc<dyn Channels>,
  tuples:        Arc<dyn TupleStore>,
  codec:         Codec,
  notifier:      Notifier,
  pool:          DeserializerPool,
  handle:        DistributorHandle,
  authenticated: bool,
  next_gc:       Instant,
}

impl Coordinator {
  pub fn new(
    config: DistributorConfig,
    store: DistributorStore,
    policy: Policy,
    collaborators: Collaborators,
  ) -> Result<Self> {
    let monitor = Arc::new(Monitor::default());
    let capacity = config.queue_capacity;
    let inbox = Arc::new(Inbox {
      deltas: BoundedQueue::new("channel delta", capacity, Arc::clone(&monitor)),
      acks: BoundedQueue::new("channel ack", capacity, Arc::clone(&monitor)),
      responses: BoundedQueue::new("response", capacity, Arc::clone(&monitor)),
      requests: BoundedQueue::new("request", capacity, Arc::clone(&monitor)),
      monitor,
      shutdown: AtomicBool::new(false),
    });
    let stats = Arc::new(DistributorStats::default());
    let handle = DistributorHandle {
      inbox,
      stats: Arc::clone(&stats),
      presence: Arc::default(),
      timeout: config.offer_timeout(),
    };

    let writer = TupleWriter::new(
      Arc::clone(&collaborators.tuples),
      collaborators.codec.clone(),
      handle.clone(),
      Arc::clone(&stats),
    );
    let pool = DeserializerPool::new(config.pool_size, capacity, Arc::new(writer), stats)?;

    Ok(Self {
      next_gc: Instant::now() + config.gc_initial_delay(),
      config,
      store,
      policy,
      channels: collaborators.channels,
      tuples: collaborators.tuples,
      codec: collaborators.codec,
      notifier: collaborators.notifier,
      pool,
      handle,
      authenticated: false,
    })
  }

  pub fn handle(&self) -> DistributorHandle { self.handle.clone() }

  pub fn store(&self) -> &DistributorStore { &self.store }

  pub fn policy(&self) -> &Policy { &self.policy }

  pub fn is_authenticated(&self) -> bool { self.authenticated }

  /// Reset subscriptions on every known channel, then resume whatever
  /// work is ready.
  pub fn startup(&mut self) -> Result<()> {
    let channels = self.store.channels()?;
    for channel in &channels {
      self.store.deactivate_by_channel(&channel.name)?;
    }
    tracing::info!(channels = channels.len(), topics = self.policy.len(), "coordinator starting");
    self.ready_sweep()
  }

  /// Run the loop on a dedicated thread until [`DistributorHandle::shutdown`].
  pub fn spawn(self) -> Result<JoinHandle<()>> {
    Ok(thread::Builder::new().name("ammo-coordinator".into()).spawn(move || self.run())?)
  }

  pub fn run(mut self) {
    if let Err(e) = self.startup() {
      tracing::error!(error = %e, "startup sweep failed");
    }

    while !self.is_shutting_down() {
      if self.run_once() {
        continue;
      }
      let until_gc = self.next_gc.saturating_duration_since(Instant::now());
      self.handle.inbox.monitor.wait(self.config.idle_wait().min(until_gc));
    }

    tracing::info!("coordinator stopping");
    self.pool.shutdown();
  }

  /// One cycle, ending with garbage collection when it is due. Returns
  /// whether any queue had work.
  pub fn run_once(&mut self) -> bool {
    let inbox = Arc::clone(&self.handle.inbox);
    let mut worked = false;

    let mut changed = false;
    while let Some(delta) = inbox.deltas.poll() {
      changed = true;
      log_failure("channel delta", self.apply_delta(delta));
    }
    if changed {
      worked = true;
      log_failure("ready sweep", self.ready_sweep());
    }

    if let Some(ack) = inbox.acks.poll() {
      worked = true;
      log_failure("channel ack", self.apply_ack(ack));
    }

    if let Some(inbound) = inbox.responses.poll() {
      worked = true;
      log_failure("inbound message", self.receive(inbound));
    }

    if let Some(request) = inbox.requests.poll() {
      worked = true;
      log_failure("request", self.dispatch(request));
    }

    self.collect_garbage_if_due();
    worked
  }

  /// Cycle until every queue is empty.
  pub fn run_until_idle(&mut self) {
    while self.run_once() {}
  }

  fn is_shutting_down(&self) -> bool { self.handle.inbox.shutdown.load(Ordering::Acquire) }

  fn collect_garbage_if_due(&mut self) {
    if Instant::now() < self.next_gc {
      return;
    }
    match self.store.garbage_collect(Utc::now()) {
      Ok(report) => {
        tracing::info!(requests = report.requests, disposals = report.disposals, "garbage collected")
      }
      Err(e) => tracing::error!(error = %e, "garbage collection failed"),
    }
    self.next_gc = Instant::now() + self.config.gc_interval();
  }

  // ── Channel lifecycle ─────────────────────────────────────────────────────

  fn apply_delta(&self, delta: ChannelDelta) -> Result<()> {
    let state = delta.change.resulting_state();
    self.store.upsert_channel(&delta.channel, state)?;
    let reset = match delta.change {
      ChannelChange::Repair => self.store.repair_by_channel(&delta.channel)?,
      ChannelChange::Activate | ChannelChange::Deactivate => {
        self.store.deactivate_by_channel(&delta.channel)?
      }
    };
    tracing::info!(channel = %delta.channel, change = %delta.change, %state, reset, "channel changed");
    Ok(())
  }

  /// Re-evaluate every request with outstanding work on an active channel.
  fn ready_sweep(&self) -> Result<()> {
    let now = Utc::now();
    for t in REQUEST_TYPES {
      let ready = self.store.query_ready(t)?;
      if !ready.is_empty() {
        tracing::debug!(%t, rows = ready.len(), "resuming ready requests");
      }
      for request in ready.into_iter().filter(|r| r.expiration >= now) {
        let Some(id) = request.id else { continue };
        let dispersal = self.restore_dispersal(&request, id)?;
        log_failure("resumed request", self.distribute(&request, id, dispersal).map(drop));
      }
    }
    Ok(())
  }

  fn connected(&self) -> Result<bool> {
    Ok(self.store.channels()?.iter().any(|c| c.state == ChannelState::Active))
  }

  // ── Acks ──────────────────────────────────────────────────────────────────

  fn apply_ack(&self, ack: ChannelAck) -> Result<()> {
    let t = ack.request_type;
    let Some(request) = self.store.get(t, ack.id)? else {
      tracing::debug!(%t, id = ack.id, channel = %ack.channel, "ack for a request that no longer exists");
      return Ok(());
    };

    self.store.upsert_disposal(t, ack.id, &ack.channel, ack.state)?;
    let routing = &self.policy.match_topic(t.into(), &request.topic).routing;
    let mut dispersal = self.restore_dispersal(&request, ack.id)?;
    let disposition = dispersal.assess(routing).aggregate();
    self.store.update_disposition(t, ack.id, disposition)?;
    tracing::debug!(%t, id = ack.id, channel = %ack.channel, state = %ack.state, %disposition, "ack applied");

    if ack.state == DisposalState::Sent {
      self.notify(&request, Threshold::Sent, Some(&ack.channel), Some(ack.state));
    }
    Ok(())
  }

  fn notify(
    &self,
    request: &Request,
    threshold: Threshold,
    channel: Option<&str>,
    state: Option<DisposalState>,
  ) {
    let event = NoticeEvent {
      threshold,
      request_type: request.request_type(),
      uuid: request.uuid,
      topic: request.topic.clone(),
      auid: request.auid.clone(),
      channel: channel.map(str::to_owned),
      state,
    };
    if self.notifier.fire(&request.notice, &event) {
      tracing::debug!(%event, "notice fired");
    }
  }

  // ── Requests ──────────────────────────────────────────────────────────────

  fn dispatch(&self, request: AppRequest) -> Result<()> {
    let kind = request.request_type();
    match request {
      AppRequest::Post(r) | AppRequest::Retrieve(r) | AppRequest::Subscribe(r) => {
        self.submit(r, None)
      }
      AppRequest::Relay { request, arrived_on } => self.submit(request, Some(&arrived_on)),
      AppRequest::CancelPost { topic, provider }
      | AppRequest::CancelRetrieve { topic, provider }
      | AppRequest::CancelSubscribe { topic, provider } => {
        let removed = self.store.cancel(kind, &provider, &topic)?;
        tracing::info!(%kind, %topic, %provider, removed, "cancelled");
        Ok(())
      }
    }
  }

  /// Match, persist, and if any channel is up, disperse.
  fn submit(&self, mut request: Request, arrived_on: Option<&str>) -> Result<()> {
    let t = request.request_type();
    let routing = &self.policy.match_topic(t.into(), &request.topic).routing;
    request.priority = routing.priority(request.priority);
    request.expiration = routing.expiration(request.expiration, Utc::now());

    let mut dispersal = routing.make_dispersal(request.channel_filter.as_deref());
    if let Some(origin) = arrived_on.filter(|o| routing.terms().contains(o)) {
      dispersal.put(origin, DisposalState::Delivered);
    }

    if !self.connected()? {
      request.disposition = DisposalTotalState::New;
      let id = self.store.upsert(&request, &dispersal)?;
      tracing::debug!(%t, id, topic = %request.topic, "no channel active, stored for later");
      return Ok(());
    }

    request.disposition = DisposalTotalState::Distribute;
    let id = self.store.upsert(&request, &dispersal)?;
    request.id = Some(id);
    let disposition = self.distribute(&request, id, dispersal)?;
    tracing::debug!(%t, id, topic = %request.topic, %disposition, "request distributed");
    Ok(())
  }

  fn restore_dispersal(&self, request: &Request, id: i64) -> Result<Dispersal> {
    let t = request.request_type();
    let routing = &self.policy.match_topic(t.into(), &request.topic).routing;
    Ok(
      routing
        .make_dispersal(request.channel_filter.as_deref())
        .restore(self.store.disposals(t, id)?),
    )
  }

  /// Evaluate the routing, send where due, and write the outcome back.
  fn distribute(&self, request: &Request, id: i64, mut dispersal: Dispersal) -> Result<DisposalTotalState> {
    let t = request.request_type();
    let routing = &self.policy.match_topic(t.into(), &request.topic).routing;
    let mut orphaned = false;

    dispersal.multiplex(
      routing,
      |term| self.channels.check_status(term),
      |term, encoding| match self.send(request, id, term, encoding) {
        Ok(state) => state,
        Err(Error::TupleNotFound(provider)) => {
          orphaned = true;
          tracing::warn!(%t, id, %provider, "referenced tuple is gone");
          DisposalState::Bad
        }
        Err(e) => {
          tracing::warn!(%t, id, channel = term, error = %e, "send failed");
          DisposalState::Bad
        }
      },
    );

    if orphaned {
      self.store.delete(t, id)?;
      tracing::warn!(%t, id, topic = %request.topic, "deleted request whose tuple no longer exists");
      return Ok(DisposalTotalState::Failed);
    }

    let disposition = self.store.update_by_key(t, id, &dispersal)?;
    tracing::trace!(%t, id, %dispersal, %disposition, "dispersal written back");
    Ok(disposition)
  }

  fn send(&self, request: &Request, id: i64, channel: &str, encoding: &Encoding) -> Result<DisposalState> {
    let envelope = self.envelope(request, encoding)?;
    let frame = frame::encode_frame(wire_priority(request.priority), &envelope.encode())?;

    let handle = self.handle.clone();
    let request_type = request.request_type();
    let on_ack: AckHandler = Box::new(move |channel, state| {
      let ack = ChannelAck { request_type, id, channel: channel.to_owned(), state };
      if let Err(e) = handle.acknowledge(ack) {
        tracing::error!(%request_type, id, error = %e, "ack dropped");
      }
    });

    let state = self.channels.send(channel, frame, on_ack);
    tracing::trace!(%request_type, id, channel, %state, "handed to channel");
    Ok(state)
  }

  fn envelope(&self, request: &Request, encoding: &Encoding) -> Result<Envelope> {
    let body = match &request.detail {
      Detail::Postal => {
        let notice = &request.notice;
        let thresholds = Thresholds {
          device_delivered:  notice.at_device_delivered.is_active(),
          gateway_delivered: notice.at_gateway_delivered.is_active(),
          plugin_delivered:  notice.at_plugin_delivered.is_active(),
        };
        Body::Data(DataMessage {
          uri:           request.uuid.to_string(),
          mime_type:     request.topic.clone(),
          encoding:      encoding.name().to_owned(),
          data:          self.content(request, encoding)?,
          user_id:       self.config.operator_id.clone(),
          origin_device: self.config.device_id.clone(),
          thresholds:    Some(thresholds).filter(Thresholds::any),
        })
      }
      Detail::Retrieval(query) => Body::PullRequest(PullRequest {
        request_uid:   request.uuid.to_string(),
        mime_type:     request.topic.clone(),
        query:         query.selection.clone().unwrap_or_default(),
        max_results:   query.limit.map_or(0, |l| u32::try_from(l).unwrap_or(0)),
        projection:    query.projection.clone().unwrap_or_default(),
        origin_device: self.config.device_id.clone(),
      }),
      Detail::Subscribe { selection } => Body::Subscribe(SubscribeMessage {
        mime_type:     request.topic.clone(),
        query:         selection.clone().unwrap_or_default(),
        origin_device: self.config.device_id.clone(),
        origin_user:   self.config.operator_id.clone(),
      }),
    };
    Ok(Envelope::new(body).with_priority(wire_priority(request.priority).into()))
  }

  /// The postal payload under `encoding`. Inline payloads are held in the
  /// verbose encoding; everything else is read from the tuple store.
  fn content(&self, request: &Request, encoding: &Encoding) -> Result<Bytes> {
    if let (Some(inline), Encoding::Json) = (&request.payload, encoding) {
      return Ok(Bytes::copy_from_slice(inline));
    }

    let schema = self.tuples.fields_for(&request.topic)?;
    let tuple = match &request.payload {
      Some(inline) => self.codec.deserialize(inline, &Encoding::Json, &schema)?.0,
      None => self
        .tuples
        .query(&request.provider, None)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::TupleNotFound(request.provider.clone()))?,
    };
    Ok(Bytes::from(self.codec.serialize(&tuple, encoding, &schema)?))
  }

  // ── Inbound ───────────────────────────────────────────────────────────────

  fn receive(&mut self, inbound: Inbound) -> Result<()> {
    let Inbound { channel, frame } = inbound;

    let payload = match frame::decode_frame(frame) {
      Ok((_, payload)) => payload,
      Err(e) if e.is_checksum() => {
        self.handle.stats.corrupt_packet();
        tracing::debug!(%channel, error = %e, "dropping corrupt frame");
        return Ok(());
      }
      Err(e) => {
        self.handle.stats.dropped_response();
        tracing::warn!(%channel, error = %e, "dropping malformed frame");
        return Ok(());
      }
    };

    let envelope = match Envelope::decode(payload) {
      Ok(envelope) => envelope,
      Err(e) => {
        self.handle.stats.dropped_response();
        tracing::warn!(%channel, error = %e, "dropping unparsable envelope");
        return Ok(());
      }
    };

    let priority = i32::try_from(envelope.priority).unwrap_or(i32::MAX);
    tracing::trace!(%channel, kind = ?envelope.message_type(), priority, "received");
    match envelope.body {
      Body::Data(m) => self.receive_data(&channel, priority, m),
      Body::Terse(m) => self.receive_terse(&channel, priority, m),
      Body::PullResponse(m) => self.receive_pull_response(priority, m),
      Body::PushAck(m) => self.receive_push_ack(&channel, m),
      Body::AuthResult(m) => self.receive_auth(&channel, m),
      Body::Subscribe(m) => {
        lock(&self.handle.presence).subscribed(
          &m.origin_device,
          &m.origin_user,
          &m.mime_type,
          Utc::now(),
        );
        Ok(())
      }
      Body::Heartbeat(h) => {
        tracing::trace!(%channel, sequence = h.sequence, "heartbeat");
        Ok(())
      }
      Body::PullRequest(m) => {
        tracing::debug!(%channel, topic = %m.mime_type, "ignoring pull request addressed to a gateway");
        Ok(())
      }
    }
  }

  fn receive_data(&self, channel: &str, priority: i32, m: DataMessage) -> Result<()> {
    lock(&self.handle.presence).seen(&m.origin_device, &m.user_id, Utc::now());

    if m.thresholds.is_some_and(|t| t.device_delivered) {
      self.send_push_ack(channel, &m);
    }
    let encoding = m.encoding.parse().unwrap_or_default();
    self.accept_subscribed(channel, priority, m.mime_type, encoding, m.data)
  }

  fn receive_terse(&self, channel: &str, priority: i32, m: TerseMessage) -> Result<()> {
    let Some(topic) = self.tuples.topic_for_code(m.mime_type) else {
      tracing::warn!(%channel, code = m.mime_type, "terse message for an unknown topic code");
      return Ok(());
    };
    self.accept_subscribed(channel, priority, topic, Encoding::Terse, m.data)
  }

  /// Hand a subscribed payload to the pool, and relay it if the postal rule
  /// for its topic says so.
  fn accept_subscribed(
    &self,
    channel: &str,
    priority: i32,
    topic: String,
    encoding: Encoding,
    payload: Bytes,
  ) -> Result<()> {
    let Some(subscription) = self.store.get_subscribe_by_topic(&topic)? else {
      tracing::warn!(%channel, %topic, "received a message with no subscription");
      return Ok(());
    };

    let relay = self.policy.match_topic(Category::Postal, &topic).routing.relay;
    if relay {
      self.pool.submit(priority, Task::ToReroute {
        topic:      topic.clone(),
        encoding:   encoding.clone(),
        payload:    payload.clone(),
        arrived_on: channel.to_owned(),
      });
    }
    self.pool.submit(priority, Task::ToStore {
      provider: subscription.provider,
      topic,
      encoding,
      payload,
    });
    Ok(())
  }

  fn send_push_ack(&self, channel: &str, m: &DataMessage) {
    let ack = Envelope::new(Body::PushAck(PushAcknowledgement {
      uri:         m.uri.clone(),
      threshold:   Thresholds { device_delivered: true, ..Default::default() },
      dest_device: m.origin_device.clone(),
      dest_user:   m.user_id.clone(),
      ack_device:  self.config.device_id.clone(),
      ack_user:    self.config.operator_id.clone(),
      status:      PushStatus::Success,
    }));

    match frame::encode_frame(0, &ack.encode()) {
      Ok(frame) => {
        let state = self.channels.send(channel, frame, Box::new(|_, _| {}));
        tracing::debug!(channel, uri = %m.uri, %state, "sent push acknowledgement");
      }
      Err(e) => tracing::warn!(channel, error = %e, "could not frame push acknowledgement"),
    }
  }

  fn receive_pull_response(&self, priority: i32, m: PullResponse) -> Result<()> {
    let Ok(uuid) = Uuid::parse_str(&m.request_uid) else {
      tracing::warn!(uid = %m.request_uid, "pull response with a malformed request id");
      return Ok(());
    };
    let Some(retrieval) = self.store.get_by_uuid(RequestType::Retrieval, uuid)? else {
      tracing::warn!(%uuid, topic = %m.mime_type, "pull response with no retrieval");
      return Ok(());
    };

    self.pool.submit(priority, Task::ToStore {
      provider: retrieval.provider,
      topic:    m.mime_type,
      encoding: m.encoding.parse().unwrap_or_default(),
      payload:  m.data,
    });
    Ok(())
  }

  fn receive_push_ack(&self, channel: &str, m: PushAcknowledgement) -> Result<()> {
    let Ok(uuid) = Uuid::parse_str(&m.uri) else {
      tracing::warn!(uri = %m.uri, "push acknowledgement with a malformed uri");
      return Ok(());
    };
    let Some(request) = self.store.get_by_uuid(RequestType::Postal, uuid)? else {
      tracing::debug!(%uuid, "push acknowledgement for an unknown post");
      return Ok(());
    };

    let threshold = if m.threshold.device_delivered {
      Threshold::DeviceDelivered
    } else if m.threshold.gateway_delivered {
      Threshold::GatewayDelivered
    } else if m.threshold.plugin_delivered {
      Threshold::PluginDelivered
    } else {
      tracing::debug!(%uuid, "push acknowledgement names no threshold");
      return Ok(());
    };
    let state = match m.status {
      PushStatus::Success => DisposalState::Delivered,
      PushStatus::Failure => DisposalState::Bad,
      PushStatus::Rejected => DisposalState::Rejected,
    };

    tracing::debug!(%uuid, %threshold, ack_device = %m.ack_device, "push acknowledged");
    self.notify(&request, threshold, Some(channel), Some(state));
    Ok(())
  }

  fn receive_auth(&mut self, channel: &str, m: AuthenticationResult) -> Result<()> {
    match m.result {
      AuthStatus::Success => {
        self.authenticated = true;
        tracing::info!(channel, "session authenticated");
        self.ready_sweep()
      }
      AuthStatus::Failure => {
        self.authenticated = false;
        tracing::warn!(channel, message = %m.message, "authentication failed");
        Ok(())
      }
    }
  }
}

fn wire_priority(priority: i32) -> u8 { priority.clamp(0, u8::MAX.into()) as u8 }

fn log_failure(what: &str, result: Result<()>) {
  if let Err(e) = result {
    tracing::error!(error = %e, "{what} failed");
  }
}

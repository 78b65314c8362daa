// Targets, sessions and channels of a running server.
//
// The registry hands out one shared Target per name and assigns each a
// codestream serial number. A channel binds a client to one target with its
// own cache model and stream state; every channel sits behind its own mutex
// so that different channels are served in parallel.
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, info};

use crate::cachemodel::CacheModel;
use crate::enqueue::Enqueuer;
use crate::query::{parse_query, Query};
use crate::request::ViewWindowRequest;
use crate::stream::{EorReason, StreamWriter};
use crate::target::Target;
use crate::{EventSink, JPIPError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport of a channel's responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transport {
    #[default]
    Http,
    HttpTcp,
}

impl Transport {
    pub fn name(self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::HttpTcp => "http-tcp",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    /// Upper bound on the payload of one response, applied on top of any
    /// `len` the client asks for.
    pub max_response_bytes: Option<u64>,
    /// Transport recorded for requests served without a channel.
    pub transport: Transport,
}

// Slot of one target name. Holding the slot's lock while opening makes
// concurrent first requests wait for a single index build.
#[derive(Default)]
struct TargetSlot {
    target: Mutex<Weak<Target>>,
}

/// Open targets by name. Targets are held weakly and close when the last
/// channel using them goes away.
pub struct Registry {
    targets: Mutex<HashMap<String, Arc<TargetSlot>>>,
    next_csn: AtomicU64,
    sink: Arc<dyn EventSink>,
}

impl Registry {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Registry {
            targets: Mutex::new(HashMap::new()),
            next_csn: AtomicU64::new(0),
            sink,
        }
    }

    /// Opens the file `name`, or returns the target already open under it.
    pub fn open(&self, name: &str) -> Result<Arc<Target>, JPIPError> {
        self.open_with(name, |csn, sink| Target::open_file(name, csn, sink))
    }

    /// Returns the live target named `name`, or calls `open` with a fresh
    /// csn. A target that fails to open is not registered.
    pub fn open_with<F>(&self, name: &str, open: F) -> Result<Arc<Target>, JPIPError>
    where
        F: FnOnce(u64, &dyn EventSink) -> Result<Target, JPIPError>,
    {
        let slot = {
            let mut targets = lock(&self.targets);
            prune(&mut targets);
            targets.entry(name.to_string()).or_default().clone()
        };

        let mut current = lock(&slot.target);
        if let Some(target) = current.upgrade() {
            debug!("target {:?} already open as csn {}", name, target.csn());
            return Ok(target);
        }
        let csn = self.next_csn.fetch_add(1, Ordering::SeqCst);
        let target = match open(csn, self.sink.as_ref()) {
            Ok(target) => Arc::new(target),
            Err(error) => {
                self.sink
                    .error(&format!("target {:?} could not be opened: {}", name, error));
                return Err(error);
            }
        };
        *current = Arc::downgrade(&target);
        Ok(target)
    }

    /// The live target with codestream serial number `csn`.
    pub fn get(&self, csn: u64) -> Option<Arc<Target>> {
        let slots: Vec<Arc<TargetSlot>> = {
            let mut targets = lock(&self.targets);
            prune(&mut targets);
            targets.values().cloned().collect()
        };
        slots
            .iter()
            .filter_map(|slot| lock(&slot.target).upgrade())
            .find(|target| target.csn() == csn)
    }

    /// Number of targets still referenced.
    pub fn live_targets(&self) -> usize {
        let mut targets = lock(&self.targets);
        prune(&mut targets);
        targets.len()
    }

    /// Number of names with a slot, open or being opened.
    pub fn slot_count(&self) -> usize {
        lock(&self.targets).len()
    }

    pub fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }
}

// Drops the slots of closed targets. A slot another thread still holds is
// being opened or read and stays, so this never waits on an index build.
fn prune(targets: &mut HashMap<String, Arc<TargetSlot>>) {
    targets.retain(|_, slot| {
        Arc::strong_count(slot) > 1 || lock(&slot.target).strong_count() > 0
    });
}

/// One client's view of one target.
pub struct Channel {
    cid: String,
    session: u64,
    transport: Transport,
    target: Arc<Target>,
    cache: CacheModel,
    cancel: Arc<AtomicBool>,
}

impl Channel {
    pub fn new(cid: String, session: u64, transport: Transport, target: Arc<Target>) -> Self {
        let cache = CacheModel::new(target.index(), target.csn());
        Channel {
            cid,
            session,
            transport,
            target,
            cache,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    pub fn cache(&self) -> &CacheModel {
        &self.cache
    }

    /// Flag that aborts the request in progress on this channel, or the next
    /// one when none is running.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Writes the response to `request`: the messages the client lacks,
    /// then EOR. The cache model changes only when the whole response was
    /// built.
    pub fn respond<W: Write>(
        &mut self,
        request: &ViewWindowRequest,
        quota: Option<u64>,
        out: &mut W,
    ) -> Result<EorReason, JPIPError> {
        let mut request = request.clone();
        request.max_bytes = match (request.max_bytes, quota) {
            (Some(asked), Some(quota)) => Some(asked.min(quota)),
            (asked, quota) => asked.or(quota),
        };

        let enqueued = match Enqueuer::new(&self.target, &self.cache)
            .with_cancel(&self.cancel)
            .enqueue(&request)
        {
            Err(JPIPError::Cancelled) => {
                // The flag covers one request only.
                self.cancel.store(false, Ordering::Release);
                return Err(JPIPError::Cancelled);
            }
            enqueued => enqueued?,
        };

        let mut writer = StreamWriter::new();
        let mut body = Vec::new();
        writer.emit(&enqueued.queue, self.target.source(), &mut body)?;
        let reason = if enqueued.complete {
            EorReason::WindowDone
        } else {
            EorReason::ByteLimit
        };
        writer.end_of_response(reason, &mut body)?;
        out.write_all(&body)?;

        self.cache.commit(&enqueued.marks);
        debug!(
            "channel {}: {} messages, {} bytes, {:?}",
            self.cid,
            enqueued.queue.len(),
            body.len(),
            reason
        );
        Ok(reason)
    }
}

/// Channel-new response fields (JPIP-cnew).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub cid: String,
    pub session: u64,
    pub transport: Transport,
    pub csn: u64,
}

#[derive(Debug, Default)]
struct Session {
    channels: Vec<String>,
}

/// Sessions and channels over a shared registry.
pub struct Server {
    registry: Registry,
    config: ServerConfig,
    sessions: Mutex<HashMap<u64, Session>>,
    channels: Mutex<HashMap<String, Arc<Mutex<Channel>>>>,
    // Cancel flags by cid, reachable while the channel is busy.
    cancels: Mutex<HashMap<String, Arc<AtomicBool>>>,
    next_session: AtomicU64,
    next_channel: AtomicU64,
}

impl Server {
    pub fn new(config: ServerConfig, sink: Arc<dyn EventSink>) -> Self {
        Server {
            registry: Registry::new(sink),
            config,
            sessions: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            next_channel: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Opens a channel on `target`, in a new session unless `session`
    /// names an existing one.
    pub fn open_channel(
        &self,
        target: Arc<Target>,
        transport: Transport,
        session: Option<u64>,
    ) -> Result<ChannelInfo, JPIPError> {
        let mut sessions = lock(&self.sessions);
        let session = match session {
            Some(id) if sessions.contains_key(&id) => id,
            Some(id) => return Err(JPIPError::UnknownSession { id }),
            None => {
                let id = self.next_session.fetch_add(1, Ordering::SeqCst);
                sessions.insert(id, Session::default());
                id
            }
        };

        let cid = format!("JPIP{:06}", self.next_channel.fetch_add(1, Ordering::SeqCst));
        let info = ChannelInfo {
            cid: cid.clone(),
            session,
            transport,
            csn: target.csn(),
        };
        let channel = Channel::new(cid.clone(), session, transport, target);
        lock(&self.cancels).insert(cid.clone(), channel.cancel_handle());
        if let Some(entry) = sessions.get_mut(&session) {
            entry.channels.push(cid.clone());
        }
        lock(&self.channels).insert(cid.clone(), Arc::new(Mutex::new(channel)));
        info!(
            "channel {} opened in session {} on csn {} over {}",
            cid,
            session,
            info.csn,
            transport.name()
        );
        Ok(info)
    }

    /// Closes `cid`. A session without channels is closed with it.
    pub fn close_channel(&self, cid: &str) -> Result<(), JPIPError> {
        let channel = lock(&self.channels)
            .remove(cid)
            .ok_or_else(|| JPIPError::UnknownChannel {
                cid: cid.to_string(),
            })?;
        lock(&self.cancels).remove(cid);
        let session = lock(&*channel).session();

        let mut sessions = lock(&self.sessions);
        if let Some(entry) = sessions.get_mut(&session) {
            entry.channels.retain(|c| c != cid);
            if entry.channels.is_empty() {
                sessions.remove(&session);
                debug!("session {} closed", session);
            }
        }
        info!("channel {} closed", cid);
        Ok(())
    }

    pub fn channel(&self, cid: &str) -> Result<Arc<Mutex<Channel>>, JPIPError> {
        lock(&self.channels)
            .get(cid)
            .cloned()
            .ok_or_else(|| JPIPError::UnknownChannel {
                cid: cid.to_string(),
            })
    }

    pub fn channel_count(&self) -> usize {
        lock(&self.channels).len()
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Aborts the request in progress on `cid` without waiting for it.
    pub fn cancel(&self, cid: &str) -> Result<(), JPIPError> {
        let cancel = lock(&self.cancels)
            .get(cid)
            .cloned()
            .ok_or_else(|| JPIPError::UnknownChannel {
                cid: cid.to_string(),
            })?;
        cancel.store(true, Ordering::Release);
        debug!("channel {}: cancel requested", cid);
        Ok(())
    }

    /// Serves `request` on channel `cid` and returns the response stream.
    pub fn request(&self, cid: &str, request: &ViewWindowRequest) -> Result<Vec<u8>, JPIPError> {
        let channel = self.channel(cid)?;
        let mut channel = lock(&*channel);
        let mut out = Vec::new();
        channel.respond(request, self.config.max_response_bytes, &mut out)?;
        Ok(out)
    }

    /// Handles one query string: closes the channels in `cclose`, opens a
    /// channel when `cnew` is present, then serves the view-window on the
    /// channel named by `cid` or the one just opened. Without a channel the
    /// target is served statelessly.
    pub fn handle_query(&self, query: &str) -> Result<(Option<ChannelInfo>, Vec<u8>), JPIPError> {
        let Query {
            target,
            cid,
            cnew,
            cclose,
            mut request,
        } = parse_query(query)?;

        for closed in &cclose {
            if closed == "*" {
                self.close_session_of(cid.as_deref())?;
            } else {
                self.close_channel(closed)?;
            }
        }

        let mut opened = None;
        if let Some(transport) = cnew {
            let target = match (&target, &cid) {
                (Some(name), _) => self.registry.open(name)?,
                (None, Some(cid)) => {
                    let channel = self.channel(cid)?;
                    let target = lock(&*channel).target().clone();
                    target
                }
                (None, None) => {
                    return Err(JPIPError::InvalidQuery {
                        field: "cnew".to_string(),
                        value: transport.name().to_string(),
                    })
                }
            };
            let session = match &cid {
                Some(cid) => {
                    let channel = self.channel(cid)?;
                    let session = lock(&*channel).session();
                    Some(session)
                }
                None => None,
            };
            opened = Some(self.open_channel(target, transport, session)?);
        }

        let serve = opened.as_ref().map(|info| info.cid.clone()).or(cid);
        let response = match (serve, target) {
            (Some(cid), _) if !cclose.iter().any(|c| c == &cid || c == "*") => {
                let channel = self.channel(&cid)?;
                let mut channel = lock(&*channel);
                request.csn = channel.target().csn();
                let mut out = Vec::new();
                channel.respond(&request, self.config.max_response_bytes, &mut out)?;
                out
            }
            (None, Some(name)) => {
                let target = self.registry.open(&name)?;
                request.csn = target.csn();
                let mut channel = Channel::new(String::new(), 0, self.config.transport, target);
                let mut out = Vec::new();
                channel.respond(&request, self.config.max_response_bytes, &mut out)?;
                out
            }
            _ => Vec::new(),
        };
        Ok((opened, response))
    }

    fn close_session_of(&self, cid: Option<&str>) -> Result<(), JPIPError> {
        let cid = cid.ok_or_else(|| JPIPError::InvalidQuery {
            field: "cclose".to_string(),
            value: "*".to_string(),
        })?;
        let channel = self.channel(cid)?;
        let session = lock(&*channel).session();
        let channels = lock(&self.sessions)
            .get(&session)
            .map(|s| s.channels.clone())
            .unwrap_or_default();
        for channel in channels {
            self.close_channel(&channel)?;
        }
        Ok(())
    }
}

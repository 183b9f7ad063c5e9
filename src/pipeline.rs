//! # Pipeline Engine
//!
//! The composition at the heart of the gateway: source and sink registries,
//! the static route table, the policy chain, performance counters and the
//! runtime control flags, tied together by the dispatch loop.
//!
//! ## Dispatch model
//!
//! The loop is strictly single-threaded and cooperative. [`Pipeline::spin`]
//! makes one non-blocking pass over all connected sources; every policy,
//! routing, transformer and sink-route callback runs on the calling thread
//! and nothing in [`Pipeline::push`] can suspend. Adapters whose transports
//! block run that work on their own worker threads and expose a non-blocking
//! byte view (see the transport module).
//!
//! ## Control flags
//!
//! `policy_enabled`, `transform_enabled` and `terminated` are the only state
//! shared with the operator console thread. They are relaxed atomics: no
//! ordering is implied beyond each flag's own value, and the hot path
//! samples them per message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::bitmap::SinkSet;
use crate::codec::{self, ParseStatus};
use crate::error::Result;
use crate::perf::PerfRegistry;
use crate::policy::{self, CheckFn, MatchFn, PolicyChain, PolicyId};
use crate::transform::{Port, Transformer};
use crate::transport::{
    ByteSource, Message, MessageSink, SinkId, SinkRegistry, SourceId, SourceRegistry, MAX_SINKS,
    MAX_SOURCES,
};

/// Runtime control flags, shared with the console thread.
#[derive(Debug)]
pub struct ControlFlags {
    policy_enabled: AtomicBool,
    transform_enabled: AtomicBool,
    terminated: AtomicBool,
}

impl ControlFlags {
    fn new() -> Self {
        Self {
            policy_enabled: AtomicBool::new(true),
            transform_enabled: AtomicBool::new(true),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn policy_enabled(&self) -> bool {
        self.policy_enabled.load(Ordering::Relaxed)
    }

    pub fn set_policy_enabled(&self, enabled: bool) {
        self.policy_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn transform_enabled(&self) -> bool {
        self.transform_enabled.load(Ordering::Relaxed)
    }

    pub fn set_transform_enabled(&self, enabled: bool) {
        self.transform_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::Relaxed)
    }

    pub fn set_terminated(&self) {
        self.terminated.store(true, Ordering::Relaxed);
    }
}

/// Static source → sink-set map, immutable once the pipeline is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTable {
    table: [SinkSet; MAX_SOURCES],
}

impl RouteTable {
    /// The deployment default: the null row is empty, the flight controller
    /// fans out to both peers, each peer reaches only the flight controller.
    pub const DEFAULT: RouteTable = RouteTable {
        table: [
            SinkSet::new(),
            SinkSet::from_indices(&[SinkId::Legacy as usize, SinkId::Enclave as usize]),
            SinkSet::from_indices(&[SinkId::Vmc as usize]),
            SinkSet::from_indices(&[SinkId::Vmc as usize]),
        ],
    };

    /// Build a custom table (alternate deployments, tests).
    pub const fn with_rows(table: [SinkSet; MAX_SOURCES]) -> Self {
        Self { table }
    }

    pub fn row(&self, source: SourceId) -> SinkSet {
        self.table[source.index()]
    }

    /// Seed a message's destination set: a straight copy, no merging.
    pub fn route(&self, msg: &mut Message) {
        msg.sinks = self.table[msg.source.index()];
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The pipeline: owns every registry and runs the dispatch loop.
///
/// Lifecycle: construct (`new`), attach adapters via the transport hooks,
/// `connect`, then drive `spin` until `terminated`, then `disconnect`.
/// Exactly one live instance per process is expected.
pub struct Pipeline {
    sources: SourceRegistry,
    sinks: SinkRegistry,
    policies: PolicyChain,
    routes: RouteTable,
    perf: PerfRegistry,
    flags: Arc<ControlFlags>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Fresh pipeline with the default route table and the deployment's
    /// default policy catalog.
    pub fn new() -> Self {
        Self::with_config(RouteTable::DEFAULT, policy::register_defaults)
    }

    /// Fresh pipeline with a custom route table and policy registration
    /// hook. Flags start as policy on, transformers on, not terminated.
    pub fn with_config(routes: RouteTable, register: impl FnOnce(&mut PolicyChain)) -> Self {
        let mut policies = PolicyChain::new();
        register(&mut policies);
        Self {
            sources: SourceRegistry::new(),
            sinks: SinkRegistry::new(),
            policies,
            routes,
            perf: PerfRegistry::new(),
            flags: Arc::new(ControlFlags::new()),
        }
    }

    /// Handle to the control flags, for the console thread and the driver.
    pub fn flags(&self) -> Arc<ControlFlags> {
        Arc::clone(&self.flags)
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn perf(&self) -> &PerfRegistry {
        &self.perf
    }

    pub fn perf_mut(&mut self) -> &mut PerfRegistry {
        &mut self.perf
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn sinks(&self) -> &SinkRegistry {
        &self.sinks
    }

    /// Reserve the source slot for an adapter. Double allocation halts.
    pub fn attach_source(&mut self, id: SourceId, adapter: Box<dyn ByteSource>) {
        self.sources.allocate(id, adapter);
    }

    /// Reserve the sink slot for an adapter. Double allocation halts.
    pub fn attach_sink(&mut self, id: SinkId, adapter: Box<dyn MessageSink>) {
        self.sinks.allocate(id, adapter);
    }

    /// Append to the policy chain (evaluation keeps registration order).
    pub fn register_policy(&mut self, id: PolicyId, matches: MatchFn, check: CheckFn) {
        self.policies.register(id, matches, check);
    }

    /// Install a transformer on an allocated port slot. Addressing an
    /// unallocated slot is a programming error.
    pub fn add_transformer(&mut self, port: Port, transform: Transformer) {
        match port {
            Port::Source(id) => {
                let slot = self
                    .sources
                    .get_mut(id)
                    .unwrap_or_else(|| panic!("no source allocated in slot {}", id));
                slot.transform = Some(transform);
            }
            Port::Sink(id) => {
                let slot = self
                    .sinks
                    .get_mut(id)
                    .unwrap_or_else(|| panic!("no sink allocated in slot {}", id));
                slot.transform = Some(transform);
            }
        }
    }

    /// Run every adapter's one-shot init, sources first, then sinks. An
    /// adapter whose init fails is marked unusable and skipped for the rest
    /// of the process; the pipeline continues with the remaining adapters.
    pub fn connect(&mut self) {
        for slot in self.sources.slots_mut() {
            if let Err(e) = slot.adapter.init() {
                warn!("source {}: init failed, disabling: {}", slot.id, e);
                slot.failed = true;
            }
        }
        for slot in self.sinks.slots_mut() {
            if let Err(e) = slot.adapter.init() {
                warn!("sink {}: init failed, disabling: {}", slot.id, e);
                slot.failed = true;
            }
        }
    }

    /// Mirror of `connect` in reverse role order: sinks first, then sources.
    pub fn disconnect(&mut self) {
        for slot in self.sinks.slots_mut() {
            if !slot.failed {
                slot.adapter.cleanup();
            }
        }
        for slot in self.sources.slots_mut() {
            if !slot.failed {
                slot.adapter.cleanup();
            }
        }
        info!("pipeline disconnected");
    }

    /// One non-blocking pass over all connected sources in slot order.
    ///
    /// Returns whether any frame was dispatched this pass. A message leaving
    /// one source is fully processed before that source's next byte is
    /// consumed; parse errors are logged and the codec re-synchronizes.
    pub fn spin(&mut self) -> Result<bool> {
        let started = Instant::now();
        let mut worked = false;

        let Self {
            sources,
            sinks,
            policies,
            routes,
            perf,
            flags,
        } = self;

        for slot in sources.slots_mut() {
            if slot.failed {
                continue;
            }
            while slot.adapter.has_more() {
                let byte = slot.adapter.read_byte();
                match slot.parser.parse_byte(byte, &mut slot.msg.frame) {
                    ParseStatus::NeedMore => {}
                    ParseStatus::FrameReady => {
                        worked = true;
                        slot.msg.source = slot.id;
                        slot.msg.sinks.clear();
                        slot.msg.attribute = 0;
                        perf.source_mut(slot.id).record_frame(&slot.msg.frame);
                        if flags.transform_enabled() {
                            if let Some(transform) = slot.transform {
                                transform(&mut slot.msg);
                            }
                        }
                        dispatch(sinks, policies, routes, perf, flags, &mut slot.msg)?;
                    }
                    ParseStatus::Error(e) => {
                        warn!(
                            "source {} (chan {}): protocol parse error: {:?}",
                            slot.id,
                            slot.parser.chan(),
                            e
                        );
                    }
                }
            }
        }

        perf.exec_mut().record_pump(worked, started.elapsed());
        Ok(worked)
    }

    /// The dispatch kernel: route, police, fan out. Public so tests and
    /// embedders can inject messages without a transport.
    pub fn push(&mut self, msg: &mut Message) -> Result<()> {
        let Self {
            sinks,
            policies,
            routes,
            perf,
            flags,
            ..
        } = self;
        dispatch(sinks, policies, routes, perf, flags, msg)
    }
}

/// Route → policy chain → discard short-circuit → ordered fan-out.
fn dispatch(
    sinks: &mut SinkRegistry,
    policies: &PolicyChain,
    routes: &RouteTable,
    perf: &mut PerfRegistry,
    flags: &ControlFlags,
    msg: &mut Message,
) -> Result<()> {
    routes.route(msg);

    if flags.policy_enabled() {
        for policy in policies.iter() {
            if !(policy.matches)(msg) {
                continue;
            }
            // The check sees the attribute state as of call time; its bits
            // are merged only after it returns.
            let mut attribute = msg.attribute;
            let accepted = (policy.check)(msg, &mut attribute);
            msg.attribute |= attribute;
            if !accepted {
                warn!(
                    "policy {:?}: rejected {} (msgid {}) from {}",
                    policy.id,
                    codec::message_name(msg.frame.msgid).unwrap_or("?"),
                    msg.frame.msgid,
                    msg.source
                );
                msg.sinks.set(SinkId::Discard.index());
                break;
            }
        }
    }

    if msg.sinks.test(SinkId::Discard.index()) {
        if let Some(slot) = sinks.get_mut(SinkId::Discard) {
            if !slot.failed {
                if let Err(e) = slot.adapter.route(msg) {
                    warn!("discard sink: {}", e);
                }
            }
        }
        return Ok(());
    }

    for index in 0..MAX_SINKS {
        if !msg.sinks.test(index) {
            continue;
        }
        let id = SinkId::from_index(index).expect("sink index in range");
        let slot = match sinks.get_mut(id) {
            Some(slot) if !slot.failed => slot,
            _ => {
                debug!("sink {}: no usable adapter, destination skipped", id);
                continue;
            }
        };
        if flags.transform_enabled() {
            if let Some(transform) = slot.transform {
                transform(msg);
            }
        }
        match slot.adapter.route(msg) {
            Ok(()) => perf.sink_mut(id).record_frame(&msg.frame),
            Err(e) => warn!("sink {}: destination missed: {}", id, e),
        }
    }

    Ok(())
}

// ABOUTME: Process-wide runtime state: operating mode, adapters, counters.
// ABOUTME: The self-test mode flag uses acquire/release discipline via a guard.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use quorum_core::{
    ChannelRef, CoreError, DeliveryReceipt, DispatchContext, FormattingHints, OperatingMode,
    Service, ServiceAdapter,
};

/// Dispatch counters exposed to the controls module's stats output.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeStats {
    pub messages_seen: u64,
    pub responses_sent: u64,
    pub module_faults: u64,
    pub deliveries_failed: u64,
}

/// Shared runtime context for the whole process.
///
/// Adapters are registered once during startup and read-only afterward. The
/// operating mode is the one piece of mutable shared state: it is flipped to
/// `SelfTest` exclusively through [`RuntimeContext::begin_self_test`], which
/// fails fast if a run is already active and hands back a guard that restores
/// `Normal` on drop — including on fault paths.
pub struct RuntimeContext {
    mode: Mutex<OperatingMode>,
    adapters: RwLock<HashMap<Service, Arc<dyn ServiceAdapter>>>,
    started_at: Instant,
    messages_seen: AtomicU64,
    responses_sent: AtomicU64,
    module_faults: AtomicU64,
    deliveries_failed: AtomicU64,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self {
            mode: Mutex::new(OperatingMode::Normal),
            adapters: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
            messages_seen: AtomicU64::new(0),
            responses_sent: AtomicU64::new(0),
            module_faults: AtomicU64::new(0),
            deliveries_failed: AtomicU64::new(0),
        }
    }

    /// Register an outbound adapter. Called once per service during startup.
    pub fn register_adapter(&self, adapter: Arc<dyn ServiceAdapter>) {
        let mut adapters = self.adapters.write().expect("adapter map poisoned");
        adapters.insert(adapter.service(), adapter);
    }

    pub fn adapter(&self, service: Service) -> Option<Arc<dyn ServiceAdapter>> {
        let adapters = self.adapters.read().expect("adapter map poisoned");
        adapters.get(&service).cloned()
    }

    pub fn mode(&self) -> OperatingMode {
        *self.mode.lock().expect("mode flag poisoned")
    }

    /// Snapshot of the mode for one dispatch pass.
    pub fn dispatch_context(&self) -> DispatchContext {
        match self.mode() {
            OperatingMode::Normal => DispatchContext::normal(),
            OperatingMode::SelfTest => DispatchContext::self_test(),
        }
    }

    /// Enter self-test mode exclusively.
    ///
    /// Fails fast with `SelfTestActive` rather than blocking when a run is
    /// already live, so overlapping runs can never corrupt each other's
    /// correlation-id space.
    pub fn begin_self_test(self: &Arc<Self>) -> Result<SelfTestGuard, CoreError> {
        let mut mode = self.mode.lock().expect("mode flag poisoned");
        if *mode == OperatingMode::SelfTest {
            return Err(CoreError::SelfTestActive);
        }
        *mode = OperatingMode::SelfTest;
        Ok(SelfTestGuard {
            runtime: Arc::clone(self),
        })
    }

    /// Send text through the adapter for the given service.
    pub async fn send(
        &self,
        service: Service,
        channel: &ChannelRef,
        text: &str,
        hints: &FormattingHints,
    ) -> Result<DeliveryReceipt, CoreError> {
        let adapter = self
            .adapter(service)
            .ok_or_else(|| CoreError::delivery(service, "no adapter registered"))?;
        adapter.send(channel, text, hints).await
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn note_message_seen(&self) {
        self.messages_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_response_sent(&self) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_module_fault(&self) {
        self.module_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_delivery_failed(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            messages_seen: self.messages_seen.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            module_faults: self.module_faults.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped hold on self-test mode. Dropping it restores `Normal`.
pub struct SelfTestGuard {
    runtime: Arc<RuntimeContext>,
}

impl fmt::Debug for SelfTestGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfTestGuard").finish_non_exhaustive()
    }
}

impl Drop for SelfTestGuard {
    fn drop(&mut self) {
        let mut mode = self.runtime.mode.lock().expect("mode flag poisoned");
        *mode = OperatingMode::Normal;
    }
}

//! Isolated rendering contexts.
//!
//! A sandbox is a separate document with its own stylesheet scope. The
//! pipeline only talks to it through the [`Sandbox`] capability trait, so the
//! builder and the lifecycle controller run the same way against a browser
//! frame, a spool directory or the in-memory fake below.

use crate::error::PrintError;
use crate::job::JobKind;
use crate::types::{Margins, PageSize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SandboxId(pub u64);

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sandbox-{}", self.0)
    }
}

/// A complete, self-contained document ready to be written into a sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxDocument {
    pub kind: JobKind,
    pub title: String,
    pub html: String,
    pub page: PageSize,
    pub margins: Margins,
}

pub struct LoadNotifier(oneshot::Sender<()>);

impl LoadNotifier {
    pub fn notify(self) {
        let _ = self.0.send(());
    }
}

/// Resolves once the sandbox document reports that it finished loading.
#[derive(Debug)]
pub struct LoadSignal {
    rx: oneshot::Receiver<()>,
}

impl LoadSignal {
    pub fn channel() -> (LoadNotifier, LoadSignal) {
        let (tx, rx) = oneshot::channel();
        (LoadNotifier(tx), LoadSignal { rx })
    }

    pub fn ready() -> LoadSignal {
        let (notifier, signal) = LoadSignal::channel();
        notifier.notify();
        signal
    }

    pub async fn wait(self, timeout: Duration) -> Result<(), PrintError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(PrintError::LoadTimedOut),
        }
    }
}

/// Acknowledgement that the platform captured the printed content. Most
/// platforms never send one; the lifecycle then relies on its grace period.
#[derive(Debug)]
pub struct OutputSignal {
    rx: Option<oneshot::Receiver<()>>,
}

impl OutputSignal {
    pub fn none() -> OutputSignal {
        OutputSignal { rx: None }
    }

    pub fn acknowledged() -> OutputSignal {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        OutputSignal { rx: Some(rx) }
    }

    pub fn channel() -> (oneshot::Sender<()>, OutputSignal) {
        let (tx, rx) = oneshot::channel();
        (tx, OutputSignal { rx: Some(rx) })
    }

    pub fn is_supported(&self) -> bool {
        self.rx.is_some()
    }

    /// Waits for the acknowledgement, never longer than `deadline`. Returns
    /// whether it arrived. A missing or abandoned signal waits the full
    /// deadline.
    pub async fn wait(self, deadline: Duration) -> bool {
        let started = Instant::now();
        let Some(rx) = self.rx else {
            tokio::time::sleep(deadline).await;
            return false;
        };
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                tokio::time::sleep_until(started + deadline).await;
                false
            }
            Err(_) => false,
        }
    }
}

pub trait Sandbox: Send {
    fn create(&mut self) -> Result<SandboxId, PrintError>;

    fn populate(
        &mut self,
        id: SandboxId,
        document: &SandboxDocument,
    ) -> Result<LoadSignal, PrintError>;

    /// Focuses the sandbox and hands it to the platform print entry point.
    fn trigger_output(&mut self, id: SandboxId) -> Result<OutputSignal, PrintError>;

    /// Detaches the sandbox. Returns `false` when nothing was attached.
    fn destroy(&mut self, id: SandboxId) -> bool;
}

impl<S: Sandbox + ?Sized> Sandbox for Box<S> {
    fn create(&mut self) -> Result<SandboxId, PrintError> {
        (**self).create()
    }

    fn populate(
        &mut self,
        id: SandboxId,
        document: &SandboxDocument,
    ) -> Result<LoadSignal, PrintError> {
        (**self).populate(id, document)
    }

    fn trigger_output(&mut self, id: SandboxId) -> Result<OutputSignal, PrintError> {
        (**self).trigger_output(id)
    }

    fn destroy(&mut self, id: SandboxId) -> bool {
        (**self).destroy(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxPhase {
    Created,
    Populated,
    PrintTriggered,
    Destroyed,
}

impl SandboxPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxPhase::Created => "created",
            SandboxPhase::Populated => "populated",
            SandboxPhase::PrintTriggered => "print-triggered",
            SandboxPhase::Destroyed => "destroyed",
        }
    }
}

/// Handle to one attached sandbox and the phase it has reached.
#[derive(Debug)]
pub struct SandboxContext {
    id: SandboxId,
    title: String,
    phase: SandboxPhase,
}

impl SandboxContext {
    /// Creates a sandbox and writes `document` into it. A sandbox that was
    /// created but could not be populated is destroyed before returning.
    pub fn open<S: Sandbox + ?Sized>(
        sandbox: &mut S,
        document: &SandboxDocument,
    ) -> Result<(SandboxContext, LoadSignal), PrintError> {
        let id = sandbox.create()?;
        let mut context = SandboxContext {
            id,
            title: document.title.clone(),
            phase: SandboxPhase::Created,
        };
        match sandbox.populate(id, document) {
            Ok(signal) => {
                context.phase = SandboxPhase::Populated;
                debug!(sandbox = %id, title = %context.title, "sandbox populated");
                Ok((context, signal))
            }
            Err(err) => {
                context.teardown(sandbox);
                Err(err)
            }
        }
    }

    pub fn id(&self) -> SandboxId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn phase(&self) -> SandboxPhase {
        self.phase
    }

    pub fn is_attached(&self) -> bool {
        self.phase != SandboxPhase::Destroyed
    }

    pub fn trigger_output<S: Sandbox + ?Sized>(
        &mut self,
        sandbox: &mut S,
    ) -> Result<OutputSignal, PrintError> {
        if self.phase != SandboxPhase::Populated {
            return Err(PrintError::SandboxOutOfOrder {
                expected: SandboxPhase::Populated.as_str(),
                actual: self.phase.as_str(),
            });
        }
        let signal = sandbox.trigger_output(self.id)?;
        self.phase = SandboxPhase::PrintTriggered;
        Ok(signal)
    }

    /// Detaches the sandbox. Calling it again is a no-op returning `false`.
    pub fn teardown<S: Sandbox + ?Sized>(&mut self, sandbox: &mut S) -> bool {
        if self.phase == SandboxPhase::Destroyed {
            return false;
        }
        let detached = sandbox.destroy(self.id);
        if !detached {
            warn!(sandbox = %self.id, "sandbox was already detached");
        }
        self.phase = SandboxPhase::Destroyed;
        detached
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxEvent {
    Created(SandboxId),
    Populated(SandboxId),
    OutputTriggered(SandboxId),
    Destroyed(SandboxId),
}

/// What the platform print entry point saw when output was triggered.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedOutput {
    pub sandbox: SandboxId,
    pub document: SandboxDocument,
}

/// Headless sandbox that keeps every document in memory. Clones share state,
/// so a test can hand one clone to the pipeline and inspect the other.
#[derive(Clone, Default)]
pub struct MemorySandbox {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    attached: BTreeMap<SandboxId, Option<SandboxDocument>>,
    events: Vec<SandboxEvent>,
    outputs: Vec<CapturedOutput>,
    fail_next_create: bool,
    fail_next_populate: bool,
    hold_loads: bool,
    held: Vec<LoadNotifier>,
    acknowledge_outputs: bool,
}

impl MemorySandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_acknowledgement(self, acknowledge: bool) -> Self {
        if let Ok(mut state) = self.inner.lock() {
            state.acknowledge_outputs = acknowledge;
        }
        self
    }

    /// Keeps load signals pending until [`MemorySandbox::release_loads`].
    pub fn with_held_loads(self, hold: bool) -> Self {
        if let Ok(mut state) = self.inner.lock() {
            state.hold_loads = hold;
        }
        self
    }

    pub fn release_loads(&self) {
        if let Ok(mut state) = self.inner.lock() {
            for notifier in state.held.drain(..) {
                notifier.notify();
            }
        }
    }

    pub fn fail_next_create(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.fail_next_create = true;
        }
    }

    pub fn fail_next_populate(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.fail_next_populate = true;
        }
    }

    pub fn events(&self) -> Vec<SandboxEvent> {
        self.inner
            .lock()
            .map(|state| state.events.clone())
            .unwrap_or_default()
    }

    pub fn outputs(&self) -> Vec<CapturedOutput> {
        self.inner
            .lock()
            .map(|state| state.outputs.clone())
            .unwrap_or_default()
    }

    pub fn attached(&self) -> Vec<SandboxId> {
        self.inner
            .lock()
            .map(|state| state.attached.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_attached(&self, id: SandboxId) -> bool {
        self.inner
            .lock()
            .map(|state| state.attached.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn document(&self, id: SandboxId) -> Option<SandboxDocument> {
        self.inner
            .lock()
            .ok()
            .and_then(|state| state.attached.get(&id).cloned().flatten())
    }
}

impl Sandbox for MemorySandbox {
    fn create(&mut self) -> Result<SandboxId, PrintError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| PrintError::SandboxUnavailable)?;
        if std::mem::take(&mut state.fail_next_create) {
            return Err(PrintError::SandboxUnavailable);
        }
        state.next_id += 1;
        let id = SandboxId(state.next_id);
        state.attached.insert(id, None);
        state.events.push(SandboxEvent::Created(id));
        Ok(id)
    }

    fn populate(
        &mut self,
        id: SandboxId,
        document: &SandboxDocument,
    ) -> Result<LoadSignal, PrintError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| PrintError::SandboxUnavailable)?;
        if std::mem::take(&mut state.fail_next_populate) {
            return Err(PrintError::SandboxUnavailable);
        }
        let Some(slot) = state.attached.get_mut(&id) else {
            return Err(PrintError::UnknownSandbox(id));
        };
        *slot = Some(document.clone());
        state.events.push(SandboxEvent::Populated(id));
        if state.hold_loads {
            let (notifier, signal) = LoadSignal::channel();
            state.held.push(notifier);
            Ok(signal)
        } else {
            Ok(LoadSignal::ready())
        }
    }

    fn trigger_output(&mut self, id: SandboxId) -> Result<OutputSignal, PrintError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| PrintError::SandboxUnavailable)?;
        let Some(Some(document)) = state.attached.get(&id).cloned() else {
            return Err(PrintError::UnknownSandbox(id));
        };
        state.events.push(SandboxEvent::OutputTriggered(id));
        state.outputs.push(CapturedOutput {
            sandbox: id,
            document,
        });
        if state.acknowledge_outputs {
            Ok(OutputSignal::acknowledged())
        } else {
            Ok(OutputSignal::none())
        }
    }

    fn destroy(&mut self, id: SandboxId) -> bool {
        let Ok(mut state) = self.inner.lock() else {
            return false;
        };
        if state.attached.remove(&id).is_some() {
            state.events.push(SandboxEvent::Destroyed(id));
            true
        } else {
            false
        }
    }
}

//! Creation and invocation traces
//!
//! Enabled per container with `InstantiationOptions::tracing`. Every
//! `create_instance` and `invoke_function` call records which services it
//! used and which it caused to be built. Reports of calls that took more
//! than 2ms or built something are kept process-wide, newest
//! `MAX_RETAINED` only:
//!
//! ```text
//! CREATE Workbench
//! 	CREATES -> storageService
//! 		uses -> logService
//! DONE, took 3.10ms (grand total 7.42ms)
//! ```

use crate::{ServiceId, lock};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[cfg(feature = "logging")]
use tracing::debug;

const RETAIN_THRESHOLD: Duration = Duration::from_millis(2);

/// Retained reports; older ones are dropped first
pub const MAX_RETAINED: usize = 256;

static ALL: Mutex<VecDeque<String>> = Mutex::new(VecDeque::new());
static TOTAL_MICROS: AtomicU64 = AtomicU64::new(0);

/// Reports retained so far
pub fn all() -> Vec<String> {
    lock(&ALL).iter().cloned().collect()
}

/// Remove and return the retained reports
pub fn take_all() -> Vec<String> {
    std::mem::take(&mut *lock(&ALL)).into()
}

fn retain(reports: &mut VecDeque<String>, report: String) {
    if reports.len() >= MAX_RETAINED {
        reports.pop_front();
    }
    reports.push_back(report);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraceKind {
    Creation,
    Invocation,
    Branch,
}

struct Dependency {
    id: ServiceId,
    first: bool,
    child: Trace,
}

struct TraceNode {
    kind: TraceKind,
    name: String,
    start: Instant,
    deps: Mutex<Vec<Dependency>>,
}

/// Handle to an optional trace node; a disabled trace records nothing
#[derive(Clone, Default)]
pub(crate) struct Trace(Option<Arc<TraceNode>>);

impl Trace {
    #[inline]
    pub fn none() -> Self {
        Self(None)
    }

    pub fn creation(enabled: bool, name: &str) -> Self {
        Self::start(enabled, TraceKind::Creation, name)
    }

    pub fn invocation(enabled: bool, name: &str) -> Self {
        Self::start(enabled, TraceKind::Invocation, name)
    }

    fn start(enabled: bool, kind: TraceKind, name: &str) -> Self {
        if !enabled {
            return Self::none();
        }
        Self(Some(Arc::new(TraceNode {
            kind,
            name: name.to_string(),
            start: Instant::now(),
            deps: Mutex::new(Vec::new()),
        })))
    }

    /// Record a service lookup; `first` when it caused construction.
    ///
    /// A service already recorded under this node is not recorded again.
    pub fn branch(&self, id: ServiceId, first: bool) -> Trace {
        let Some(node) = &self.0 else {
            return Self::none();
        };
        let mut deps = lock(&node.deps);
        if let Some(existing) = deps.iter().find(|dep| dep.id == id) {
            return existing.child.clone();
        }
        let child = Self::start(true, TraceKind::Branch, id.name());
        deps.push(Dependency {
            id,
            first,
            child: child.clone(),
        });
        child
    }

    /// Finish the trace and retain its report if it is interesting
    pub fn stop(&self) {
        let Some(node) = &self.0 else {
            return;
        };
        let took = node.start.elapsed();
        let micros = u64::try_from(took.as_micros()).unwrap_or(u64::MAX);
        let total = TOTAL_MICROS.fetch_add(micros, Ordering::Relaxed).saturating_add(micros);

        let mut caused_creation = false;
        let mut report = String::new();
        let verb = match node.kind {
            TraceKind::Creation => "CREATE",
            TraceKind::Invocation | TraceKind::Branch => "CALL",
        };
        let _ = writeln!(report, "{verb} {}", node.name);
        write_children(&mut report, 1, node, &mut caused_creation);
        let _ = write!(
            report,
            "DONE, took {:.2}ms (grand total {:.2}ms)",
            took.as_secs_f64() * 1000.0,
            total as f64 / 1000.0
        );

        if took > RETAIN_THRESHOLD || caused_creation {
            #[cfg(feature = "logging")]
            debug!(target: "instantiation_service", "{report}");
            retain(&mut lock(&ALL), report);
        }
    }

    #[cfg(test)]
    fn is_enabled(&self) -> bool {
        self.0.is_some()
    }
}

fn write_children(out: &mut String, depth: usize, node: &TraceNode, caused_creation: &mut bool) {
    let prefix = "\t".repeat(depth);
    for dep in lock(&node.deps).iter() {
        match (&dep.child.0, dep.first) {
            (Some(child), true) => {
                *caused_creation = true;
                let _ = writeln!(out, "{prefix}CREATES -> {}", dep.id);
                write_children(out, depth + 1, child, caused_creation);
            }
            _ => {
                let _ = writeln!(out, "{prefix}uses -> {}", dep.id);
            }
        }
    }
}

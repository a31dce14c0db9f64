//! Pluggable per-extent handlers.
//!
//! A target type is a named factory registered once; a target instance is
//! constructed per table entry from the entry's parameter string and owns
//! whatever backing state that extent needs. The instance vtable is the
//! strategy/dump/destroy surface the splitter and the control plane drive.

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{MapError, Result};
use crate::strategy::SubIo;

/// One live target instance, owned by its table entry.
pub trait Target: Send + Sync {
    /// Target type name, e.g. `crypt`.
    fn type_name(&self) -> &'static str;

    /// Handle one sub-request in target-local byte coordinates.
    fn strategy(&self, io: &mut SubIo<'_>) -> Result<()>;

    /// Parameter line for `status --table`, with secrets masked.
    fn table_params(&self) -> String;

    /// Short human-readable status for plain `status`/`info`.
    fn info_params(&self) -> String {
        String::new()
    }

    /// Names of backing stores this instance depends on.
    fn deps(&self) -> Vec<String> {
        Vec::new()
    }

    /// Opaque message passthrough. Targets opt in; the default refuses.
    fn message(&self, msg: &str) -> Result<String> {
        let _ = msg;
        Err(MapError::Unsupported(
            "target has no message handler".to_string(),
        ))
    }

    /// Teardown hook, invoked exactly once when the owning generation is
    /// destroyed. Key material must not survive this call.
    fn destroy(&mut self);
}

/// Named factory for target instances.
pub trait TargetType: Send + Sync {
    fn name(&self) -> &'static str;

    fn version(&self) -> [u32; 3];

    /// Construct an instance from whitespace-split table parameters.
    fn construct(&self, args: &[&str]) -> Result<Box<dyn Target>>;
}

/// Registry of available target types, queried by table loads and by the
/// control plane's target enumeration.
#[derive(Clone, Default)]
pub struct TargetRegistry {
    types: Arc<RwLock<Vec<Arc<dyn TargetType>>>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, target: Arc<dyn TargetType>) -> Result<()> {
        let mut types = self.types.write().expect("target registry lock poisoned");
        if types.iter().any(|t| t.name() == target.name()) {
            return Err(MapError::InvalidArgument(format!(
                "target type already registered: {}",
                target.name()
            )));
        }
        debug!(target = target.name(), "registering target type");
        types.push(target);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn TargetType>> {
        self.types
            .read()
            .expect("target registry lock poisoned")
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| MapError::NotFound(format!("unknown target type: {}", name)))
    }

    /// `(name, version)` pairs in registration order.
    pub fn list(&self) -> Vec<(String, [u32; 3])> {
        self.types
            .read()
            .expect("target registry lock poisoned")
            .iter()
            .map(|t| (t.name().to_string(), t.version()))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Minimal targets used across the crate's tests.

    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::strategy::BioOp;

    /// Discards writes, zero-fills reads, records traffic and teardown.
    pub struct SinkTarget {
        pub issued_bytes: Arc<AtomicU64>,
        pub flushes: Arc<AtomicU64>,
        pub destroyed: Arc<AtomicBool>,
        pub fill: u8,
    }

    impl SinkTarget {
        pub fn new(fill: u8) -> (Self, Arc<AtomicU64>, Arc<AtomicBool>) {
            let issued = Arc::new(AtomicU64::new(0));
            let destroyed = Arc::new(AtomicBool::new(false));
            (
                Self {
                    issued_bytes: Arc::clone(&issued),
                    flushes: Arc::new(AtomicU64::new(0)),
                    destroyed: Arc::clone(&destroyed),
                    fill,
                },
                issued,
                destroyed,
            )
        }
    }

    impl Target for SinkTarget {
        fn type_name(&self) -> &'static str {
            "sink"
        }

        fn strategy(&self, io: &mut SubIo<'_>) -> Result<()> {
            match io.op {
                BioOp::Flush => {
                    self.flushes.fetch_add(1, Ordering::SeqCst);
                }
                BioOp::Read => {
                    io.data.fill(self.fill);
                    self.issued_bytes
                        .fetch_add(io.data.len() as u64, Ordering::SeqCst);
                }
                BioOp::Write => {
                    self.issued_bytes
                        .fetch_add(io.data.len() as u64, Ordering::SeqCst);
                }
            }
            Ok(())
        }

        fn table_params(&self) -> String {
            format!("fill {}", self.fill)
        }

        fn destroy(&mut self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }
    }
}

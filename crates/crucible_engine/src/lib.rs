//! Execution engine for the Crucible sandbox server.
//!
//! Three execution paths (Python, shell, animation) share one skeleton:
//! security gate, context acquisition, wallclock deadline, bounded child
//! process, output capture, artifact harvest, history append. User code
//! never runs on a serving thread.

pub mod animation;
pub mod cancel;
pub mod context;
pub mod engine;
pub mod history;
pub mod python;
pub mod recovery;
pub mod shell;
pub mod supervise;

pub use animation::RenderQuality;
pub use cancel::CancellationToken;
pub use context::{ContextHandle, ContextManager, WorkspaceContext};
pub use engine::{EngineStats, ExecutionEngine};
pub use history::{ExecutionStats, HistoryRing};
pub use recovery::{RecoveryOutcome, RecoveryRegistry, RecoveryStrategy};

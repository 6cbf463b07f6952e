//! Ensemble: execution, validation and consensus for one routed task
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  OrchestrationEngine                       │
//! │  • Loads the engine snapshot once per run                  │
//! │  • Walks the run state machine, publishes progress events  │
//! └─────────────────────────┬─────────────────────────────────┘
//!                           │
//!           ┌───────────────┼───────────────┐
//!           ▼               ▼               ▼
//!     ┌───────────┐   ┌───────────┐   ┌───────────┐
//!     │ Executor  │   │ Validator │   │  Merger   │
//!     │  JoinSet  │   │ heuristic │   │ use_best  │
//!     │  fan-out  │   │ + review  │   │ combine   │
//!     │           │   │           │   │ sequential│
//!     └───────────┘   └───────────┘   └───────────┘
//! ```
//!
//! # Components
//!
//! - **Backend / BackendPool**: the single capability the engine calls
//! - **Executor**: concurrent calls with deadline, retry and cancellation
//! - **Validator**: six-criterion scoring, recommendation, confidence
//! - **Review**: validator-backend prompt and JSON reply folding
//! - **Merger**: one artifact from the recommended outputs
//! - **Sections**: fenced-block and declaration parsing shared by the above

pub mod backend;
pub mod coordinator;
pub mod executor;
pub mod merger;
pub mod review;
pub mod sections;
pub mod validator;

pub use backend::{Backend, BackendPool, SharedBackend};
pub use coordinator::{OrchestrationEngine, SharedOrchestrationEngine};
pub use executor::{primary_prompt, BackendCall, ExecutionContext, Executor};
pub use merger::{check_consistency, merge, MergeOutput};
pub use review::{apply_review, parse_review, review_prompt, ReviewReport};
pub use sections::{extract_code_blocks, extract_sections, CodeBlock, Section};
pub use validator::{combine_analyses, validate};

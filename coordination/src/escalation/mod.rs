//! Escalation: deciding when a merged result needs a human
//!
//! ```text
//! ValidationAnalysis + outcomes
//!     │
//!     ├─ confidence < threshold (0.90)
//!     ├─ critical issue on any output
//!     ├─ security-sensitive content in any successful output
//!     ├─ nothing merge-worthy
//!     └─ validator concerns
//!     │
//!     ▼
//! ReviewDecision { needs_review, reasons }   (any trigger → review)
//! ```

pub mod policy;
pub mod report;

pub use policy::{needs_review, security_hits, EscalationPolicy, ReviewDecision, SECURITY_PATTERNS};
pub use report::format_review_request;

//! # Agora Middleware
//!
//! The request pipeline of the Agora framework.
//!
//! Every request flows through a fixed sequence of stages before its
//! business handler runs:
//!
//! ```text
//! Request → CORS → Compression → Session → Locals → Static → Parse → Validation → Gatekeepers → Handler
//!                                                                                                 ↓
//! Response ← after-hooks (reverse order) ← ErrorClassifier ←──────────────────────────────────────┘
//! ```
//!
//! | Phase | Stage       | Purpose                                      |
//! |-------|-------------|----------------------------------------------|
//! | 1     | CORS        | Answer preflights, add cross-origin headers  |
//! | 2     | Compression | Compress eligible responses                  |
//! | 3     | Session     | Load the cookie session, save it afterwards  |
//! | 4     | Locals      | Attach environment, locals and cache         |
//! | 5     | Static      | Serve files from the public directory        |
//! | 6     | Parse       | Decode query string and body                 |
//! | 7     | Validation  | Match the schema and coerce parameters       |
//! | 8     | Gatekeeper  | User admission checks, in declaration order  |
//!
//! Stages cannot call each other. They return a [`Step`] and the
//! [`Pipeline`] driver decides what happens next. All failures are shaped by
//! the [`ErrorClassifier`] into the `{ success: false, error }` envelope.

#![doc(html_root_url = "https://docs.rs/agora-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod classifier;
pub mod pipeline;
pub mod request_id;
pub mod stages;
pub mod step;
pub mod types;

pub use classifier::{ErrorClassifier, ErrorResponse, Severity, Tier};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use request_id::{RequestIdPolicy, REQUEST_ID_HEADER};
pub use step::{Phase, Stage, StageFailure, Step};
pub use types::{Response, ResponseExt};

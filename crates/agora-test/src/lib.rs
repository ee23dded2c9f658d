//! # Agora Test
//!
//! In-memory testing for Agora pipelines. Requests go through every stage
//! (CORS, sessions, validation, gatekeepers, the handler and error
//! classification) without binding a port.
//!
//! ## Example
//!
//! ```ignore
//! use agora_test::TestClient;
//! use http::StatusCode;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn books_a_slot() {
//!     let client = TestClient::new(build_pipeline());
//!
//!     let booking = client
//!         .post("/slots/9/book")
//!         .json(&json!({ "name": "Ada" }))
//!         .send()
//!         .await
//!         .assert_ok(StatusCode::CREATED);
//!     assert_eq!(booking["slot"], 9);
//!
//!     client
//!         .post("/slots/9/book")
//!         .json(&json!({ "name": "Grace" }))
//!         .send()
//!         .await
//!         .assert_error(StatusCode::CONFLICT, "SLOT_ALREADY_BOOKED");
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/agora-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod request;
mod response;

pub use client::{ClientRequest, TestClient};
pub use error::TestError;
pub use request::TestRequest;
pub use response::TestResponse;

//! Unpeek Test - shared test utilities for unpeek event channels.
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! unpeek-test.workspace = true
//! ```
//!
//! Then use in your tests:
//!
//! ```rust,ignore
//! use unpeek_test::{Recorded, Recorder, TestScope, inline_channel};
//!
//! #[test]
//! fn test_replay() {
//!     let channel = inline_channel::<u32>();
//!     let recorder = Recorder::new();
//!     let scope = TestScope::new("screen");
//!
//!     channel.publish(1).unwrap();
//!     channel.subscribe(&scope, None, recorder.callback()).unwrap();
//!     assert_eq!(recorder.take(), vec![Recorded::Value(1)]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod harness;
pub mod recorder;
pub mod scope;

pub use harness::{
    config_file, inline_channel, inline_non_sticky_channel, setup_test_logging,
    setup_test_logging_default, test_dir, test_file,
};
pub use recorder::{Recorded, Recorder};
pub use scope::TestScope;

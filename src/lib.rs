//! Bootstraps an image/video generation server: clones the server and its
//! plugins, installs their Python dependencies, fetches model weights from the
//! hub, then launches the server.
//!
//! The three phases run side by side under one concurrency budget; failures are
//! recorded and reported but never stop the run. Only a missing server entry
//! point is fatal.

pub mod bootstrap;
pub mod external;
pub mod models;
pub mod output;
pub mod phases;
pub mod tasks;

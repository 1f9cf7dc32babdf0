//! Behavioural suites for serving plugins end to end.

mod lifecycle_behaviour;
mod support;

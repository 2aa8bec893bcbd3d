//! Scatter integration test harness.
//!
//! Tests here run whole controllers — real actor loops, real timers — over
//! an in-memory radio medium, and drive them purely through their public
//! handles. Timer-sensitive tests run under tokio's paused clock.

mod harness;

mod delegation;
mod discovery;
mod handshake;
mod membership;

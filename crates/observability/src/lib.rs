//! # sprechfunk-observability
//!
//! Structured Logging via tracing-subscriber, als Text oder JSON.
//! Die Bibliotheks-Crates loggen nur ueber `tracing`; eingerichtet wird
//! der Subscriber ausschliesslich vom Host-Programm.

pub mod logging;

pub use logging::{logging_initialisieren, LogFormat, LoggingConfig, LoggingFehler};

//! Scenario tests wired against stub service implementations.

mod ingest;
mod suggest;
mod title;

//! # Client Inventory
//! This crate reconstructs an inventory of the clients talking to a Kafka cluster from the
//! request trace logs written by its brokers. It is meant for migration planning: it answers
//! _"which distinct client / topic / authentication combinations are currently active"_, not
//! _"which requests were ever made"_.
//!
//! ## Architecture
//! The reconstruction is a batch pipeline running on [Tokio runtime](https://tokio.rs/) with the
//! following components:
//!  - [`LogSource`](source::LogSource) enumerates the log files of a location (an S3 prefix or a
//!    local directory) and downloads their decompressed content
//!  - [`Classifier`](trace::Classifier) turns a single trace line into a
//!    [`RequestRecord`](trace::RequestRecord) or reports it as not applicable
//!  - [`extract`](extract::extract) drives the classifier over the lines of one file
//!  - [`Inventory`](inventory::Inventory) keeps the most recent record per client identity
//!  - [`write_inventory`](sink::write_inventory) renders the final inventory as CSV or JSON
//!
//! The [`pipeline`] module wires these together. See the description of each module for more
//! implementation details.
//!
//! ### Trace lines
//! Only _completed request_ lines of `PRODUCE` and `FETCH` requests are considered, everything
//! else in the logs (other loggers, metadata or heartbeat requests, ...) is skipped. Traffic of
//! the platform canary client and of inter-broker replica fetchers (`broker-<N>-fetcher-<M>`) is
//! skipped as well, it does not represent external clients.
//!
//! The authentication of a request is recognized from the principal in the connection descriptor:
//!
//! | principal form                       | [`AuthKind`](trace::AuthKind) |
//! |--------------------------------------|-------------------------------|
//! | `User:ANONYMOUS`                     | `Unauthenticated`             |
//! | `[IAM]:[arn:aws:...]`                | `Iam`                         |
//! | `User:CN=...` over `SSL`             | `Tls`                         |
//! | `User:<name>`                        | `SaslScram`                   |
//! | anything else                        | `Unknown`                     |
//!
//! The forms are tried in this order, the more specific ones first.
//!
//! ### Client identity
//! Client ids are neither unique nor mandatory, so a client is identified by a composite key of
//! `client_id|topic|role|auth|principal`, optionally extended with the client address
//! (`INVENTORY__KEY_BY_IP`). A `|` inside a field is escaped as `\|`. For each key the
//! inventory holds the record with the latest broker timestamp. Exact ties are resolved by the
//! greater `(file, line)` so that the result does not depend on the order in which files were
//! processed.
//!
//! ## Error handling
//! Unparsable lines and unreadable files are logged and skipped. An inventory built from most of
//! the available logs is still useful, so only a failure to list the log files, to load the
//! configuration or to write the output fails the run.
//!
//! ## Dependecies
//! Here is a list with the notable dependencies that are essential to the reconstruction:
//!  - [Tokio async runtime](https://tokio.rs/)
//!  - [`regex`](https://crates.io/crates/regex) for the trace line rules
//!  - [AWS SDK for S3](https://crates.io/crates/aws-sdk-s3) and
//!    [`flate2`](https://crates.io/crates/flate2) for reading (compressed) broker logs
//!  - [`csv`](https://crates.io/crates/csv) and [`serde_json`](https://crates.io/crates/serde_json)
//!    for the output
//!
//! And to make the implementation more sane this crate also depends on:
//!  - [`config`](https://crates.io/crates/config) for env-based configuration
//!  - [`thiserror`](https://crates.io/crates/thiserror) and
//!    [`anyhow`](https://crates.io/crates/anyhow) for better error handling and propagation
//!  - [Tokio `tracing`](https://github.com/tokio-rs/tracing) for tracing (and logging) in async
//!    contexts
//!  - [`tracing-loki`](https://crates.io/crates/tracing-loki) for publishing `tracing` logs to
//!    Grafana Loki
//!  - [`prometheus-metric-storage`](https://crates.io/crates/prometheus-metric-storage) for run
//!    metrics
//!  - [Tokio graceful shutdown](https://crates.io/crates/tokio-graceful-shutdown) and
//!    [`stream-cancel`](https://crates.io/crates/stream-cancel) for interrupting a run
//!
//! ## Known issues & limitations
//!  - Records of a file are collected before they are merged, so a single huge file is held in
//!    memory twice (raw content and records)
//!  - Fetch requests of newer protocol versions reference topics by id only and cannot be
//!    associated with a topic name
pub mod config;
pub mod error;
pub mod extract;
pub mod inventory;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod telemetry;
pub mod trace;

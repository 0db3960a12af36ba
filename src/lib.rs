//! # ChronusDB
//!
//! An embeddable **time-series storage engine core** with snapshot-based
//! replica synchronization.  A leader vnode streams its immutable on-disk
//! state — columnar data blocks and deletion tombstones, filtered by a
//! mutation-version range — as framed records; a follower merges the
//! stream with whatever it already holds and commits the result
//! atomically, or discards it without a trace.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        Tsdb (vnode)                        │
//! │                                                            │
//! │  ┌──────────────┐   promote on commit   ┌──────────────┐   │
//! │  │  FsRegistry  │ ◄──────────────────── │    `next`    │   │
//! │  │  `current`   │                       │  (in-flight) │   │
//! │  └──────┬───────┘                       └──────▲───────┘   │
//! │         │ read                                 │ merge     │
//! │  ┌──────┴───────┐     framed stream     ┌──────┴───────┐   │
//! │  │  SnapReader  │ ────────────────────► │  SnapWriter  │   │
//! │  └──────┬───────┘  [type|size|table|…]  └──────▲───────┘   │
//! │         │                                      │           │
//! │  ┌──────┴──────────────────────────────────────┴───────┐   │
//! │  │   DataFileReader/Writer  ·  DelFileReader/Writer    │   │
//! │  │   (head / data / last / sma files, tombstone file)  │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`tsdb`] | Vnode context — directory, configuration, registry ownership |
//! | [`snapshot`] | Snapshot reader, writer, frame codec, three-way merge |
//! | [`registry`] | Two-snapshot (`current` / `next`) file-set catalog with durable commit |
//! | [`datafile`] | Data file set reader/writer (head, data, last, sma) |
//! | [`delfile`] | Tombstone file reader/writer |
//! | [`block`] | Rows, columnar block data, block and tombstone descriptors |
//! | [`fileset`] | File sets, time partitioning, commit-id file naming |
//! | [`encoding`] | Deterministic little-endian binary codec |
//!
//! ## Key Features
//!
//! - **Version-ranged snapshots** — every streamed row and tombstone
//!   satisfies `sver < version <= ever`, so a follower can catch up from
//!   any replicated position.
//! - **Three-way merge** — inbound rows reconcile against the follower's
//!   regular blocks and under-sized last block in one ordered pass, with
//!   block-level verbatim passthrough for untouched ranges.
//! - **Atomic commit** — the in-progress file-set catalog supersedes the
//!   committed one via a CRC-protected, rename-durable `CURRENT` file;
//!   readers never observe a partial stream.
//! - **Crash recovery by construction** — every in-flight file is stamped
//!   with the stream's `commitID`; a startup sweep unlinks anything the
//!   committed catalog does not reference.
//! - **Block-level CRC32 integrity** — every on-disk section (headers,
//!   footers, block payloads, statistics, catalog) is checksummed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chronusdb::fileset::Precision;
//! use chronusdb::tsdb::{Tsdb, TsdbConfig};
//!
//! let cfg = TsdbConfig {
//!     minutes: 24 * 60,
//!     precision: Precision::Milli,
//!     min_row: 100,
//!     max_row: 4096,
//!     cmpr_alg: 0,
//!     commit_id: 1,
//! };
//!
//! let leader = Tsdb::open("/var/lib/chronus/vnode2", 2, cfg.clone()).unwrap();
//! let follower = Tsdb::open("/var/lib/chronus/vnode2-replica", 2, cfg).unwrap();
//!
//! // Stream everything the follower has not seen yet.
//! let mut reader = leader.snap_reader(0, i64::MAX);
//! let mut writer = follower.snap_writer(0, i64::MAX).unwrap();
//!
//! while let Some(frame) = reader.next().unwrap() {
//!     writer.write(&frame).unwrap();
//! }
//! writer.close(false).unwrap(); // or close(true) to roll back
//! ```

#![allow(dead_code)]

pub mod block;
pub mod datafile;
pub mod delfile;
pub mod encoding;
pub mod fileset;
pub mod registry;
pub mod snapshot;
pub mod tsdb;

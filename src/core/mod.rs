// ─── Engine Modules Core ───
// Lifecycle engine for the game runtimes ("engine modules") a launcher installs.
//
// Architecture:
//   core/
//     manifest/   — Manifest model, local store, remote registry, version ordering
//     cache/      — Remote manifest + dependency-update caches, atomic JSON files
//     downloader/ — Streaming downloads, progress events, rate estimation
//     archive/    — zip / tar / tar.gz / tar.xz extraction with path checks
//     deps/       — Per-arch dependency install, disk guard, permissions
//     detect/     — Autodetect rules and scoring
//     hooks/      — Optional module capabilities + UI handle
//     lifecycle/  — Install / uninstall / preserving update / dependency updates
//     state/      — Settings and engine wiring

pub mod archive;
pub mod cache;
pub mod deps;
pub mod detect;
pub mod downloader;
pub mod error;
pub mod hooks;
pub mod http;
pub mod lifecycle;
pub mod manifest;
pub mod state;

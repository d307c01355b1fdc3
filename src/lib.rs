//! # cdn-stage
//!
//! Stages generated images for a static image CDN. An upstream generator
//! writes images into per-category subdirectories; `cdn-stage` collects them
//! into one flat directory, converts them into a web format under stable
//! slug-based names, and writes a JSON manifest mapping every asset to its
//! public URL. Committing and pushing the hosting repository stays manual.
//!
//! # Architecture: Two-Stage Pipeline
//!
//! ```text
//! 1. Flatten   mta/<subdir>/*  →  PUBLIC_WEBP/                 (moves, no-clobber)
//! 2. Publish   PUBLIC_WEBP/    →  site/station/*.webp          (convert + name)
//!                              →  site/manifest.json           (slug → URL)
//! ```
//!
//! Each stage can run on its own (`flatten`, `publish`) or chained (`run`).
//! Both are safe to repeat: a second flatten moves nothing, and a second
//! publish over unchanged inputs writes a byte-identical manifest.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`flatten`] | Stage 1: moves files one level up into a flat destination, never overwriting |
//! | [`publish`] | Stage 2: converts images in parallel and writes the manifest |
//! | [`pipeline`] | Named stages and the `run` composition |
//! | [`config`] | `cdn-stage.toml` loading, layering with flags, validation |
//! | [`slug`] | Slug derivation, manifest name fields, collision policies |
//! | [`manifest`] | Manifest entries, JSON layout, public URLs |
//! | [`cache`] | Content-addressed publish cache for incremental re-runs |
//! | [`imaging`] | Decode/encode behind the `ImageBackend` trait |
//! | [`fs`] | File system seam for the flatten stage, atomic writes |
//! | [`output`] | CLI output formatting for every stage |
//!
//! # Design Decisions
//!
//! ## No-Clobber Moves
//!
//! The flatten stage never replaces a file that already exists in the
//! destination. A name clash leaves the source where it is and reports it as
//! skipped.
//!
//! ## Slugs Are Lowercased Stems
//!
//! The slug is the lowercased file stem, so `Times-Square.PNG` publishes as
//! `times-square.webp` whatever case the generator used. Two inputs that
//! lowercase to the same slug are a collision, handled by
//! [`slug::CollisionPolicy`] before anything is written.
//!
//! ## Self-Contained Imaging
//!
//! The [`imaging`] module uses the `image` crate codecs (with `rav1e` for
//! AVIF) and libwebp, compiled in through the `webp` crate, for lossy WebP.
//! No ImageMagick, no system libraries: the binary is self-contained.

pub mod cache;
pub mod config;
pub mod flatten;
pub mod fs;
pub mod imaging;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod publish;
pub mod slug;

#[cfg(test)]
pub(crate) mod test_helpers;

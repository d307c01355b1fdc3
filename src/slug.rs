//! Slug derivation and collision handling.
//!
//! The slug is the stable identifier of a published asset: it is both the
//! output file's base name and the last path segment of its public URL. It is
//! the file stem, lowercased:
//!
//! - `168th-street.png` → `168th-street`
//! - `Times-Square.JPG` → `times-square`
//!
//! ## Name fields
//!
//! The manifest carries `station`, `location` and `angle` columns. By default
//! `station` is the slug and the other two are empty. With field parsing
//! enabled the slug is split on `_`:
//!
//! - `34th_st_platform` → station=`34th`, location=`st`, angle=`platform`
//! - `canal_st` → station=`canal`, location=`st`, angle=``
//!
//! Parts beyond the third are ignored.
//!
//! ## Collisions
//!
//! Two assets can derive the same slug (`A.png` and `a.jpg`, or identical
//! stems in different subdirectories of a recursive publish). Because they
//! would overwrite each other's output, the publisher resolves slugs up front
//! with a [`CollisionPolicy`] before anything is written.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Derive the slug for a file stem.
pub fn derive_slug(stem: &str) -> String {
    stem.to_lowercase()
}

/// Manifest name fields for one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFields {
    pub station: String,
    pub location: String,
    pub angle: String,
}

/// Fill the manifest name fields for a slug.
pub fn name_fields(slug: &str, parse_fields: bool) -> NameFields {
    if !parse_fields {
        return NameFields {
            station: slug.to_string(),
            location: String::new(),
            angle: String::new(),
        };
    }
    let mut parts = slug.split('_');
    let mut next = || parts.next().unwrap_or_default().to_string();
    NameFields {
        station: next(),
        location: next(),
        angle: next(),
    }
}

/// How to handle two assets deriving the same slug.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Refuse to publish; nothing is written.
    #[default]
    Fail,
    /// Keep the first asset's slug, give later ones `-2`, `-3`, ...
    Suffix,
    /// The later asset replaces the earlier one.
    LastWins,
}

impl std::fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Fail => "fail",
            Self::Suffix => "suffix",
            Self::LastWins => "last-wins",
        })
    }
}

impl std::str::FromStr for CollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(Self::Fail),
            "suffix" => Ok(Self::Suffix),
            "last-wins" => Ok(Self::LastWins),
            other => Err(format!(
                "unknown collision policy '{other}' (expected fail, suffix or last-wins)"
            )),
        }
    }
}

/// Two inputs derived the same slug under [`CollisionPolicy::Fail`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("slug '{slug}' is derived by inputs #{first} and #{second}")]
pub struct SlugCollision {
    pub slug: String,
    /// Index of the earlier input.
    pub first: usize,
    /// Index of the later input.
    pub second: usize,
}

/// Resolve a list of derived slugs into the final publish plan.
///
/// Returns `(input index, final slug)` pairs in plan order. Under
/// [`CollisionPolicy::LastWins`] a replaced input disappears and its
/// replacement takes its position, so the result can be shorter than the
/// input.
pub fn resolve_slugs(
    slugs: &[String],
    policy: CollisionPolicy,
) -> Result<Vec<(usize, String)>, SlugCollision> {
    let mut plan: Vec<(usize, String)> = Vec::with_capacity(slugs.len());
    let mut position: HashMap<&str, usize> = HashMap::new();

    match policy {
        CollisionPolicy::Fail => {
            for (i, slug) in slugs.iter().enumerate() {
                if let Some(&pos) = position.get(slug.as_str()) {
                    return Err(SlugCollision {
                        slug: slug.clone(),
                        first: plan[pos].0,
                        second: i,
                    });
                }
                position.insert(slug.as_str(), plan.len());
                plan.push((i, slug.clone()));
            }
        }
        CollisionPolicy::LastWins => {
            for (i, slug) in slugs.iter().enumerate() {
                match position.get(slug.as_str()) {
                    Some(&pos) => plan[pos] = (i, slug.clone()),
                    None => {
                        position.insert(slug.as_str(), plan.len());
                        plan.push((i, slug.clone()));
                    }
                }
            }
        }
        CollisionPolicy::Suffix => {
            // Natural slugs are reserved so a generated suffix never steals
            // the name of a later input.
            let reserved: HashSet<&str> = slugs.iter().map(String::as_str).collect();
            let mut taken: HashSet<String> = HashSet::new();
            for (i, slug) in slugs.iter().enumerate() {
                if taken.insert(slug.clone()) {
                    plan.push((i, slug.clone()));
                    continue;
                }
                let mut n = 2;
                let candidate = loop {
                    let candidate = format!("{slug}-{n}");
                    if !reserved.contains(candidate.as_str()) && !taken.contains(&candidate) {
                        break candidate;
                    }
                    n += 1;
                };
                taken.insert(candidate.clone());
                plan.push((i, candidate));
            }
        }
    }

    Ok(plan)
}

//! Daemon configuration, derived from the `fs` subcommand's flags (spec.md §6).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceLevel {
    Dbg,
    Inf,
    Wrn,
    Err,
    None,
}

impl TraceLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dbg" => Some(TraceLevel::Dbg),
            "inf" => Some(TraceLevel::Inf),
            "wrn" => Some(TraceLevel::Wrn),
            "err" => Some(TraceLevel::Err),
            "none" => Some(TraceLevel::None),
            _ => None,
        }
    }

    /// Maps onto an `EnvFilter` directive for the subscriber built in `main`.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            TraceLevel::Dbg => "debug",
            TraceLevel::Inf => "info",
            TraceLevel::Wrn => "warn",
            TraceLevel::Err => "error",
            TraceLevel::None => "off",
        }
    }
}

/// Owner/group to report on vnodes. Accepted for CLI compatibility but never
/// enforced — ownership/permission enforcement beyond mode bits is a Non-goal.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OwnerIds {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl OwnerIds {
    pub fn parse(s: &str) -> Option<Self> {
        let (uid, gid) = s.split_once(':')?;
        Some(OwnerIds { uid: uid.parse().ok(), gid: gid.parse().ok() })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HpfsConfig {
    pub fs_dir: PathBuf,
    pub merge_enabled: bool,
    pub owner: OwnerIds,
    pub trace_level: TraceLevel,
}

/// `seed/`, `log.hpfs`, and `hmap/` paths derived from the `F` directory passed to
/// `-f`, mirroring the reference's `ctx.seed_dir`/`log_file_path`/`hmap_dir` init.
pub struct FsPaths {
    pub seed_dir: PathBuf,
    pub log_path: PathBuf,
    pub hmap_dir: PathBuf,
}

impl HpfsConfig {
    pub fn derive_paths(&self) -> FsPaths {
        derive_paths(&self.fs_dir)
    }
}

pub fn derive_paths(fs_dir: &Path) -> FsPaths {
    FsPaths {
        seed_dir: fs_dir.join("seed"),
        log_path: fs_dir.join("log.hpfs"),
        hmap_dir: fs_dir.join("hmap"),
    }
}

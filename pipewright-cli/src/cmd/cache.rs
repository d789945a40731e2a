use chrono::{Duration, Utc};
use pipewright_store::{ArtifactMeta, ArtifactStore, FsArtifactStore};
use serde::Serialize;

use crate::cmd::config::get_cache_dir;
use crate::exit_codes;
use crate::output::{print_error, print_result, OutputFormat};
use crate::{CacheArgs, OutputArgs};

#[derive(Serialize)]
struct ListResult {
    root: String,
    entries: Vec<ArtifactMeta>,
}

#[derive(Serialize)]
struct RemovedResult {
    root: String,
    removed: usize,
}

fn open(cache: CacheArgs, output: &OutputArgs) -> Option<FsArtifactStore> {
    get_cache_dir(cache.cache_dir, output).map(FsArtifactStore::new)
}

pub async fn list_cmd(cache: CacheArgs, output: OutputArgs) -> i32 {
    let Some(store) = open(cache, &output) else {
        return exit_codes::RUNTIME_ERROR;
    };
    let entries = match store.list().await {
        Ok(e) => e,
        Err(e) => {
            print_error(output.format, output.quiet, &e.to_string());
            return exit_codes::RUNTIME_ERROR;
        }
    };
    let result = ListResult {
        root: store.root().display().to_string(),
        entries,
    };

    if output.format == OutputFormat::Text && !output.quiet {
        println!("{} cached modules in {}", result.entries.len(), result.root);
        let now = Utc::now();
        for e in &result.entries {
            let age = (now - e.created_at).num_seconds().max(0);
            println!("  {}  {}  {} bytes  {age}s old", &e.hash[..12], e.module_name, e.size_bytes);
        }
    } else {
        print_result(output.format, output.quiet, &result);
    }
    exit_codes::SUCCESS
}

pub async fn clear_cmd(cache: CacheArgs, output: OutputArgs) -> i32 {
    let Some(store) = open(cache, &output) else {
        return exit_codes::RUNTIME_ERROR;
    };
    match store.clear().await {
        Ok(removed) => {
            report_removed(&store, removed, &output);
            exit_codes::SUCCESS
        }
        Err(e) => {
            print_error(output.format, output.quiet, &e.to_string());
            exit_codes::RUNTIME_ERROR
        }
    }
}

pub async fn prune_cmd(cache: CacheArgs, older_than_secs: u64, output: OutputArgs) -> i32 {
    let Some(store) = open(cache, &output) else {
        return exit_codes::RUNTIME_ERROR;
    };
    match store.prune(older_than(older_than_secs)).await {
        Ok(removed) => {
            report_removed(&store, removed, &output);
            exit_codes::SUCCESS
        }
        Err(e) => {
            print_error(output.format, output.quiet, &e.to_string());
            exit_codes::RUNTIME_ERROR
        }
    }
}

fn report_removed(store: &FsArtifactStore, removed: usize, output: &OutputArgs) {
    let result = RemovedResult {
        root: store.root().display().to_string(),
        removed,
    };
    if output.format == OutputFormat::Text && !output.quiet {
        println!("removed {} cached modules from {}", result.removed, result.root);
    } else {
        print_result(output.format, output.quiet, &result);
    }
}

/// Ages beyond a century are clamped so the cutoff stays representable.
const MAX_AGE_SECS: u64 = 100 * 365 * 24 * 60 * 60;

fn older_than(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_AGE_SECS) as i64)
}

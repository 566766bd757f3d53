//! Bulk transfers between the local machine and the distributed filesystem
//!
//! [`put_in_dfs`] spreads local files over the cluster's hosts round-robin
//! and has every host push its share into HDFS at the same time. Each host
//! worker owns its own staging directory and shares nothing with the others;
//! the call returns once every worker has finished.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::{debug, info, warn};

use hg5k_common::{Error, Generation, Result};

use crate::remote::{quote, RemoteExecutor};
use crate::runtime::ClusterRuntime;

const FETCH_STAGING_DIR: &str = "/tmp/hg5k_fetch";

/// Assign `items[i]` to `hosts[i % hosts.len()]`.
///
/// Hosts that receive nothing are left out of the result, so the returned
/// partitions are exactly the workers to schedule.
pub fn partition<'a, T: Clone>(items: &[T], hosts: &'a [String]) -> Vec<(&'a str, Vec<T>)> {
    if hosts.is_empty() {
        return Vec::new();
    }
    let mut parts: Vec<Vec<T>> = vec![Vec::new(); hosts.len()];
    for (i, item) in items.iter().enumerate() {
        parts[i % hosts.len()].push(item.clone());
    }
    hosts
        .iter()
        .zip(parts)
        .filter(|(_, part)| !part.is_empty())
        .map(|(host, part)| (host.as_str(), part))
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn staging_dir(runtime: &dyn ClusterRuntime) -> String {
    let handle = runtime.handle();
    format!("/tmp/hg5k_ingest_{}_{}", handle.cluster_type, handle.id)
}

/// Fail with the first local path that does not exist, or with the first
/// file whose name was already taken by an earlier one. Files land in the
/// destination under their own name.
pub fn check_local_files(files: &[PathBuf]) -> Result<()> {
    if let Some(missing) = files.iter().find(|f| !f.exists()) {
        return Err(Error::Input {
            path: missing.clone(),
        });
    }

    let mut names = HashSet::new();
    for file in files {
        let name = file_name(file);
        if !names.insert(name.clone()) {
            return Err(Error::usage(format!(
                "{} would overwrite another input named {}",
                file.display(),
                name
            )));
        }
    }
    Ok(())
}

/// Create `dest` in the distributed filesystem unless it already exists.
async fn ensure_dfs_dir(runtime: &dyn ClusterRuntime, dest: &str, verbose: bool) -> Result<()> {
    let exists = runtime
        .execute(&format!("fs -test -d {}", quote(dest)), None, verbose)
        .await?
        .success;
    if exists {
        return Ok(());
    }
    let mkdir = match runtime.handle().generation() {
        Generation::Legacy => format!("fs -mkdir {}", quote(dest)),
        Generation::Modern => format!("fs -mkdir -p {}", quote(dest)),
    };
    runtime
        .execute(&mkdir, None, verbose)
        .await?
        .check(&format!("create {}", dest))?;
    Ok(())
}

/// Stage one host's share of the files and push it into `dest`.
async fn ingest_on_host(
    runtime: &dyn ClusterRuntime,
    remote: &dyn RemoteExecutor,
    host: &str,
    files: Vec<PathBuf>,
    dest: &str,
    verbose: bool,
) -> Result<()> {
    let staging = staging_dir(runtime);
    remote
        .run(host, &format!("rm -rf {dir} && mkdir -p {dir}", dir = staging))
        .await?
        .check(&format!("prepare staging on {}", host))?;
    remote.copy_to(host, &files, &staging).await?;

    for file in &files {
        let name = file_name(file);
        let put = format!(
            "fs -put {} {}",
            quote(&format!("{}/{}", staging, name)),
            quote(&format!("{}/{}", dest.trim_end_matches('/'), name))
        );
        runtime
            .execute(&put, Some(host), verbose)
            .await?
            .check(&format!("put {} from {}", name, host))?;
        debug!(host, file = %name, "File ingested");
    }
    Ok(())
}

/// Copy local `files` into the `dest` directory of the distributed filesystem.
///
/// Every host with a non-empty share runs concurrently. A failing host does
/// not stop the others; once all have finished the failed hosts are reported
/// together and files already copied stay in place.
pub async fn put_in_dfs(
    runtime: &dyn ClusterRuntime,
    remote: &dyn RemoteExecutor,
    files: &[PathBuf],
    dest: &str,
    verbose: bool,
) -> Result<()> {
    check_local_files(files)?;
    ensure_dfs_dir(runtime, dest, verbose).await?;

    let hosts = &runtime.handle().hosts;
    let partitions = partition(files, hosts);
    info!(
        files = files.len(),
        workers = partitions.len(),
        dest,
        "Ingesting files"
    );

    let workers = partitions.into_iter().map(|(host, share)| async move {
        let result = ingest_on_host(runtime, remote, host, share, dest, verbose).await;
        (host, result)
    });

    let failed: Vec<String> = join_all(workers)
        .await
        .into_iter()
        .filter_map(|(host, result)| match result {
            Ok(()) => None,
            Err(e) => {
                warn!(host, error = %e, "Ingestion worker failed");
                Some(host.to_string())
            }
        })
        .collect();

    if !failed.is_empty() {
        return Err(Error::PartialIngestion { hosts: failed });
    }
    info!(dest, "Ingestion complete");
    Ok(())
}

/// Copy `dfs_path` out of the distributed filesystem to the local `local_path`,
/// going through the master's staging directory.
pub async fn fetch_from_dfs(
    runtime: &dyn ClusterRuntime,
    remote: &dyn RemoteExecutor,
    dfs_path: &str,
    local_path: &Path,
    verbose: bool,
) -> Result<()> {
    let master = runtime.handle().master.clone();
    let name = dfs_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::usage(format!("cannot fetch {}", dfs_path)))?;

    remote
        .run(
            &master,
            &format!("rm -rf {dir} && mkdir -p {dir}", dir = FETCH_STAGING_DIR),
        )
        .await?
        .check(&format!("prepare staging on {}", master))?;
    runtime
        .execute(
            &format!("fs -get {} {}", quote(dfs_path), FETCH_STAGING_DIR),
            None,
            verbose,
        )
        .await?
        .check(&format!("get {}", dfs_path))?;

    remote
        .copy_from(
            &master,
            &format!("{}/{}", FETCH_STAGING_DIR, name),
            local_path,
        )
        .await?;
    info!(source = dfs_path, dest = %local_path.display(), "Fetched from filesystem");
    Ok(())
}

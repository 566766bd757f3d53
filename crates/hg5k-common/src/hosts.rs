//! Host list parsing and rack derivation for `--create`

use std::path::Path;

use tracing::debug;

use crate::{Error, Result};

/// Rack assigned to hosts whose names carry no site/cluster information.
pub const DEFAULT_RACK: &str = "/default-rack";

/// Resolve a `--create` argument into an ordered, duplicate-free host list.
///
/// Accepted forms, checked in order:
/// 1. path of an existing file with one host per line (e.g. `$OAR_NODEFILE`)
/// 2. `site:job_id[,site:job_id...]` reservations, which are rejected
/// 3. comma separated host names
/// 4. a bare number, taken as an oargrid job id and rejected
/// 5. a single host name
pub fn parse_hosts(spec: &str) -> Result<Vec<String>> {
    let spec = spec.trim();
    let path = Path::new(spec);

    let hosts = if path.is_file() {
        let content = std::fs::read_to_string(path)?;
        dedup(content.lines())
    } else if spec.contains(':') {
        return Err(Error::usage(format!(
            "reservation '{}' cannot be resolved from this client; pass a node file or host list",
            spec
        )));
    } else if spec.contains(',') {
        dedup(spec.split(','))
    } else if !spec.is_empty() && spec.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::usage(format!(
            "oargrid job {} cannot be resolved from this client; pass a node file or host list",
            spec
        )));
    } else {
        dedup(std::iter::once(spec))
    };

    if hosts.is_empty() {
        return Err(Error::Input {
            path: path.to_path_buf(),
        });
    }

    debug!(hosts = %hosts.join(" "), "Resolved host list");
    Ok(hosts)
}

fn dedup<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    for name in names.map(str::trim).filter(|n| !n.is_empty()) {
        if !hosts.iter().any(|h| h == name) {
            hosts.push(name.to_string());
        }
    }
    hosts
}

/// Rack of a host, derived from `<cluster>-<n>.<site>.<domain>` names.
///
/// `paravance-12.rennes.grid5000.fr` lives in `/rennes/paravance`.
pub fn rack_of(host: &str) -> String {
    let mut labels = host.split('.');
    let node = labels.next().unwrap_or_default();
    let site = labels.next();

    let cluster = node
        .rsplit_once('-')
        .filter(|(_, n)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        .map(|(cluster, _)| cluster);

    match (site, cluster) {
        (Some(site), Some(cluster)) if !site.is_empty() && !cluster.is_empty() => {
            format!("/{}/{}", site, cluster)
        }
        _ => DEFAULT_RACK.to_string(),
    }
}

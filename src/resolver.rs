//! Node resolution
//!
//! Maps an operator supplied name to exactly one `Node` by exact equality on
//! the `kubernetes.io/hostname` label. More than one match is an error, never
//! "pick the first".

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::cluster::{ClusterApi, HOSTNAME_LABEL};
use crate::error::{Error, Result};

/// Maximum length of a Kubernetes label value
const MAX_LABEL_VALUE_LEN: usize = 63;

/// Check that `name` can appear as a label value at all.
///
/// A name that fails here could never match the hostname label, so it is
/// reported as bad input rather than as a lookup miss.
pub fn validate_node_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "node name must not be blank".to_string(),
        ));
    }
    if name.len() > MAX_LABEL_VALUE_LEN {
        return Err(Error::InvalidArgument(format!(
            "node name {name:?} is longer than {MAX_LABEL_VALUE_LEN} characters"
        )));
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    let alnum_ends = name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric());
    if !valid_chars || !alnum_ends {
        return Err(Error::InvalidArgument(format!(
            "node name {name:?} is not a valid hostname label value"
        )));
    }
    Ok(())
}

/// Equality selector on the hostname label
pub fn hostname_selector(name: &str) -> String {
    format!("{HOSTNAME_LABEL}={name}")
}

fn hostname_of(node: &Node) -> Option<&str> {
    node.labels().get(HOSTNAME_LABEL).map(String::as_str)
}

/// Resolve `name` to the single node whose hostname label equals it
#[instrument(skip(api))]
pub async fn resolve_node(api: &dyn ClusterApi, name: &str) -> Result<Node> {
    validate_node_name(name)?;

    let selector = hostname_selector(name);
    let nodes = api
        .list_nodes(&selector)
        .await
        .map_err(Error::UpstreamUnavailable)?;
    debug!("Selector {} returned {} node(s)", selector, nodes.len());

    // The server already filtered by selector; re-check so only exact
    // matches survive.
    let mut matches: Vec<Node> = nodes
        .into_iter()
        .filter(|n| hostname_of(n) == Some(name))
        .collect();

    match matches.len() {
        0 => Err(Error::NotFound(name.to_string())),
        1 => {
            let node = matches.remove(0);
            info!("Resolved {} to node {}", name, node.name_any());
            Ok(node)
        }
        _ => {
            let mut names: Vec<String> = matches.iter().map(|n| n.name_any()).collect();
            names.sort();
            Err(Error::Ambiguous {
                name: name.to_string(),
                matches: names,
            })
        }
    }
}

//! Plugin descriptors, as yielded once at boot by the (external) plugin
//! registry discovery mechanism (spec §6 "Plugin discovery").

use serde::{Deserialize, Serialize};

/// Static metadata about one plugin prefix, discovered once at Central
/// Hub start and immutable for the life of the process (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Non-empty command-namespace prefix, e.g. `"session_"`.
    pub prefix: String,

    /// Opaque registry entry id used to spawn the plugin process.
    pub process_id: String,

    /// Host to spawn the plugin on (`meta.default_host` or the relay's
    /// configured default).
    pub host: String,

    /// Whether this plugin is spawned eagerly at User Hub start rather
    /// than lazily on first matching command.
    pub auto_start: bool,
}

impl PluginDescriptor {
    /// Construct a descriptor, as the registry adapter would after
    /// filtering out entries with no `command_prefix` metadata.
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        process_id: impl Into<String>,
        host: impl Into<String>,
        auto_start: bool,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            process_id: process_id.into(),
            host: host.into(),
            auto_start,
        }
    }
}

/// Validate that a set of descriptors forms a prefix-unique set
/// (spec invariant I4 — "no prefix is a prefix of another").
///
/// Returns the pair of offending prefixes on violation. This does not
/// reject the set outright (spec §9 leaves the "ambiguous prefixes"
/// case as undefined-but-must-resolve-by-longest-match behavior at
/// dispatch time); callers use this to log a startup warning.
#[must_use]
pub fn find_ambiguous_prefixes(descriptors: &[PluginDescriptor]) -> Option<(String, String)> {
    for (i, a) in descriptors.iter().enumerate() {
        for b in &descriptors[i + 1..] {
            if a.prefix.starts_with(&b.prefix) || b.prefix.starts_with(&a.prefix) {
                return Some((a.prefix.clone(), b.prefix.clone()));
            }
        }
    }
    None
}

/// Find the longest plugin prefix such that `command_type` starts with
/// it (spec §4.2 step 3 / §9 "implementations MUST pick the longest
/// match to remove ambiguity").
#[must_use]
pub fn longest_matching_prefix<'a>(
    descriptors: &'a [PluginDescriptor],
    command_type: &str,
) -> Option<&'a PluginDescriptor> {
    descriptors
        .iter()
        .filter(|d| command_type.starts_with(d.prefix.as_str()))
        .max_by_key(|d| d.prefix.len())
}

//! Thin glue over `varsync_types::Rule` that picks the rule applicable to a
//! given `(platform, datasource, repository)` out of the Bundle. The
//! override-resolution and per-file matching algorithms themselves live on
//! `Rule` in `varsync-types`, since they are pure and have no dependency on
//! anything adapter-shaped.

use varsync_types::{Bundle, Rule, SyncError};

/// Find the rule bound to `(platform, datasource)` whose repository scope
/// includes `repo_name`, and resolve its per-repo overrides. A
/// `(platform, datasource)` pair may have more than one rule scoping
/// disjoint repository sets (§3); the first in declaration order whose
/// scope matches wins.
pub fn select_rule(bundle: &Bundle, platform: &str, datasource: &str, repo_name: &str) -> Result<Rule, SyncError> {
    let candidates = bundle.rules_for(platform, datasource);
    let base = candidates
        .into_iter()
        .find(|rule| rule.repository_in_scope(repo_name))
        .ok_or_else(|| {
            SyncError::ConfigInvalid(format!(
                "no rule for platform {platform:?} datasource {datasource:?} scopes repository {repo_name:?}"
            ))
        })?;
    base.resolve(repo_name)
}

//! The Rule policy object and the pure per-file matching algorithm that
//! derives an environment tag and a stable unique key for a changed file.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{SinkStrategy, SyncError, SyncMode};

/// One entry of `filePathMap`: a regex pattern matched against the changed
/// file's path, paired with a format template (or literal env name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePathMapEntry {
    pub pattern: String,
    pub template: String,
}

/// One entry of `branchMap`: a regex pattern matched against the (already
/// `refs/heads/`-stripped) branch name, paired with a literal env name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchMapEntry {
    pub pattern: String,
    pub env: String,
}

/// Fields an override may set. Scalars/lists are replaced wholesale;
/// `variables_map` is deep-merged onto the base rule's map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleOverrideSet {
    #[serde(default)]
    pub repositories: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_repositories: Option<Vec<String>>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_path_map: Option<Vec<FilePathMapEntry>>,
    #[serde(default)]
    pub branch_map: Option<Vec<BranchMapEntry>>,
    #[serde(default)]
    pub unique_key_name: Option<String>,
    #[serde(default)]
    pub variables_map: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub sync_mode: Option<SyncMode>,
}

/// A conditional patch applied to the base rule when its repository
/// matchers select the repository being processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleOverride {
    pub enable: bool,
    #[serde(default)]
    pub match_repositories: Vec<String>,
    #[serde(default)]
    pub exclude_repositories: Vec<String>,
    pub set: RuleOverrideSet,
}

/// The policy object binding a platform, a datasource, a set of
/// repositories, a file-selection strategy, and an environment-derivation
/// strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub platform: String,
    pub datasource: String,
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub exclude_repositories: Vec<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_path_map: Vec<FilePathMapEntry>,
    #[serde(default)]
    pub branch_map: Vec<BranchMapEntry>,
    #[serde(default)]
    pub env_as_branch: bool,
    #[serde(default)]
    pub env_as_pr: bool,
    #[serde(default)]
    pub env_as_tags: bool,
    pub unique_key_name: String,
    #[serde(default)]
    pub variables_map: BTreeMap<String, String>,
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub overrides: Vec<RuleOverride>,
    /// Whether this rule allows emitting a DELETE for a file whose latest
    /// lifecycle status is REMOVED.
    #[serde(default = "default_true")]
    pub prune: bool,
    /// Defer prune processing until after the sink buffer flush.
    #[serde(default)]
    pub prune_last: bool,
}

fn default_true() -> bool {
    true
}

/// The outcome of a successful per-file match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub unique_key: String,
    pub env: Option<String>,
}

impl Rule {
    /// A minimal, otherwise-empty rule for constructing test fixtures.
    pub fn minimal(platform: &str, datasource: &str) -> Self {
        Self {
            platform: platform.to_string(),
            datasource: datasource.to_string(),
            repositories: vec![],
            exclude_repositories: vec![],
            file_name: Some("config.json".to_string()),
            file_path_map: vec![],
            branch_map: vec![],
            env_as_branch: true,
            env_as_pr: false,
            env_as_tags: false,
            unique_key_name: "{repoName}-{env}".to_string(),
            variables_map: BTreeMap::new(),
            sync_mode: SyncMode::Auto,
            overrides: vec![],
            prune: true,
            prune_last: false,
        }
    }

    /// Validate the invariants from §3: file selection present, every
    /// pattern compiles, the unique-key template's variables are all
    /// resolvable by at least one enabled strategy.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.file_name.is_none() && self.file_path_map.is_empty() {
            return Err(SyncError::ConfigInvalid(
                "rule must declare at least one of file_name or file_path_map".into(),
            ));
        }

        for entry in &self.file_path_map {
            Regex::new(&entry.pattern).map_err(|e| {
                SyncError::ConfigInvalid(format!(
                    "invalid file_path_map pattern {:?}: {e}",
                    entry.pattern
                ))
            })?;
        }
        for entry in &self.branch_map {
            Regex::new(&entry.pattern).map_err(|e| {
                SyncError::ConfigInvalid(format!(
                    "invalid branch_map pattern {:?}: {e}",
                    entry.pattern
                ))
            })?;
        }

        let template_vars = template_variables(&self.unique_key_name);
        let mut available: Vec<&str> = vec!["repo", "repoName", "branch", "file_path"];
        let env_enabled = self.env_as_branch
            || self.env_as_pr
            || self.env_as_tags
            || !self.branch_map.is_empty()
            || !self.file_path_map.is_empty();
        if env_enabled {
            available.push("env");
        }
        for entry in &self.file_path_map {
            for group in named_groups(&entry.pattern) {
                available.push(Box::leak(group.into_boxed_str()));
            }
        }
        for key in self.variables_map.keys() {
            available.push(Box::leak(key.clone().into_boxed_str()));
        }

        for var in &template_vars {
            if !available.contains(&var.as_str()) {
                return Err(SyncError::ConfigInvalid(format!(
                    "unique_key_name references variable {var:?} that no enabled strategy provides"
                )));
            }
        }

        Ok(())
    }

    /// Resolve per-repository overrides onto this rule in declaration
    /// order, re-validating the merged result. Overrides whose
    /// `match_repositories`/`exclude_repositories` do not select
    /// `repo_name`, or that are disabled, are skipped.
    pub fn resolve(&self, repo_name: &str) -> Result<Rule, SyncError> {
        let mut merged = self.clone();
        for ov in &self.overrides {
            if !ov.enable {
                continue;
            }
            let included = ov.match_repositories.is_empty()
                || ov
                    .match_repositories
                    .iter()
                    .any(|p| repo_name.contains(p.as_str()));
            let excluded = ov.exclude_repositories.iter().any(|p| repo_name.contains(p.as_str()));
            if !included || excluded {
                continue;
            }
            apply_override(&mut merged, &ov.set);
        }
        merged.overrides.clear();
        merged.validate()?;
        Ok(merged)
    }

    /// Whether `repo_name` is in scope for this (already-resolved) rule.
    pub fn repository_in_scope(&self, repo_name: &str) -> bool {
        let included = self.repositories.is_empty()
            || self.repositories.iter().any(|p| repo_name.contains(p.as_str()));
        let excluded = self
            .exclude_repositories
            .iter()
            .any(|p| repo_name.contains(p.as_str()));
        included && !excluded
    }

    /// The per-file match algorithm of §4.4. Returns `None` when the file
    /// is out of scope or no environment strategy resolves.
    pub fn match_file(&self, file_path: &str, branch: &str, _repo_name: &str) -> Option<RuleMatch> {
        let stripped_branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);

        let mut variables: BTreeMap<String, String> = self.variables_map.clone();
        variables.insert("branch".to_string(), stripped_branch.to_string());
        variables.insert("file_path".to_string(), file_path.to_string());

        let env = if !self.file_path_map.is_empty() {
            self.resolve_env_via_file_path_map(file_path, &mut variables)?
        } else if self.file_name.as_deref() == Some(file_path) {
            self.resolve_env_via_branch(stripped_branch)?
        } else {
            return None;
        };

        variables.insert("env".to_string(), env.clone());
        let unique_key = interpolate(&self.unique_key_name, &variables)?;

        Some(RuleMatch {
            unique_key,
            env: Some(env),
        })
    }

    fn resolve_env_via_file_path_map(
        &self,
        file_path: &str,
        variables: &mut BTreeMap<String, String>,
    ) -> Option<String> {
        for entry in &self.file_path_map {
            let re = Regex::new(&entry.pattern).ok()?;
            let Some(caps) = re.captures(file_path) else {
                continue;
            };

            let mut local = variables.clone();
            for name in re.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    local.insert(name.to_string(), m.as_str().to_string());
                }
            }

            let resolved_env = if entry.template.contains('{') {
                interpolate(&entry.template, &local)?
            } else if !entry.template.is_empty() {
                entry.template.clone()
            } else {
                local.get("env").cloned()?
            };

            *variables = local;
            return Some(resolved_env);
        }
        None
    }

    fn resolve_env_via_branch(&self, stripped_branch: &str) -> Option<String> {
        if self.env_as_branch {
            return Some(stripped_branch.to_string());
        }
        for entry in &self.branch_map {
            let re = Regex::new(&entry.pattern).ok()?;
            if re.is_match(stripped_branch) {
                return Some(entry.env.clone());
            }
        }
        None
    }
}

fn apply_override(rule: &mut Rule, set: &RuleOverrideSet) {
    if let Some(v) = &set.repositories {
        rule.repositories = v.clone();
    }
    if let Some(v) = &set.exclude_repositories {
        rule.exclude_repositories = v.clone();
    }
    if let Some(v) = &set.file_name {
        rule.file_name = Some(v.clone());
    }
    if let Some(v) = &set.file_path_map {
        rule.file_path_map = v.clone();
    }
    if let Some(v) = &set.branch_map {
        rule.branch_map = v.clone();
    }
    if let Some(v) = &set.unique_key_name {
        rule.unique_key_name = v.clone();
    }
    if let Some(v) = &set.variables_map {
        for (k, val) in v {
            rule.variables_map.insert(k.clone(), val.clone());
        }
    }
    if let Some(v) = set.sync_mode {
        rule.sync_mode = v;
    }
}

/// Extract `{name}` placeholders from a format template, in order of
/// first appearance, deduplicated.
fn template_variables(template: &str) -> Vec<String> {
    let mut vars = Vec::new();
    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '{' {
            if let Some(end) = template[i + 1..].find('}') {
                let name = &template[i + 1..i + 1 + end];
                if !name.is_empty() && !vars.contains(&name.to_string()) {
                    vars.push(name.to_string());
                }
            }
        }
    }
    vars
}

/// Interpolate `{name}` placeholders from `variables`. Returns `None` if
/// any referenced variable is missing.
fn interpolate(template: &str, variables: &BTreeMap<String, String>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}')?;
        let name = &after[..end];
        out.push_str(variables.get(name)?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn named_groups(pattern: &str) -> Vec<String> {
    Regex::new(pattern)
        .map(|re| re.capture_names().flatten().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Strategy marker re-exported for convenience when constructing datasource
/// fixtures alongside a rule in tests.
pub const DEFAULT_STRATEGY: SinkStrategy = SinkStrategy::Document;

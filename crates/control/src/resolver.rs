//! Target resolution: explicit targets, selector (request or default), then
//! auto. Order is preserved and duplicates collapse to the first occurrence.

use std::collections::HashMap;

use pw_domain::config::WardenConfig;
use pw_domain::error::{ErrorCode, Result, StandardError};
use pw_domain::request::{
    ResolvedTarget, SelectorMode, TargetInput, TargetSelector, TargetSource,
};

pub struct TargetResolver {
    alias_map: HashMap<String, String>,
    known_project_ids: Vec<String>,
    auto_target_project_ids: Vec<String>,
    default_selector: Option<TargetSelector>,
}

impl TargetResolver {
    pub fn new(
        alias_map: HashMap<String, String>,
        known_project_ids: Vec<String>,
        auto_target_project_ids: Vec<String>,
        default_selector: Option<TargetSelector>,
    ) -> Self {
        Self {
            alias_map,
            known_project_ids,
            auto_target_project_ids,
            default_selector,
        }
    }

    pub fn from_config(config: &WardenConfig) -> Self {
        Self::new(
            config.alias_map(),
            config.known_project_ids(),
            config.auto_target_project_ids(),
            config.defaults.target_selector.clone(),
        )
    }

    pub fn default_selector(&self) -> Option<&TargetSelector> {
        self.default_selector.as_ref()
    }

    pub fn auto_targeting_enabled(&self) -> bool {
        !self.auto_target_project_ids.is_empty() || self.known_project_ids.len() == 1
    }

    /// Resolve a request's targets. First match wins: explicit targets,
    /// then the request (or default) selector, then the auto rule.
    pub fn resolve(
        &self,
        targets: &[TargetInput],
        selector: Option<&TargetSelector>,
    ) -> Result<(Vec<ResolvedTarget>, TargetSource)> {
        if !targets.is_empty() {
            let ids = self.resolve_explicit(targets)?;
            return Ok((tag(ids, TargetSource::Explicit), TargetSource::Explicit));
        }

        if let Some(selector) = selector.or(self.default_selector.as_ref()) {
            let ids = self.resolve_selector(selector)?;
            return Ok((tag(ids, TargetSource::Selector), TargetSource::Selector));
        }

        let ids = self.resolve_auto()?;
        Ok((tag(ids, TargetSource::Auto), TargetSource::Auto))
    }

    fn resolve_explicit(&self, targets: &[TargetInput]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            if let Some(project_id) = target.project_id.as_deref().filter(|s| !s.is_empty()) {
                ids.push(project_id.to_string());
            } else if let Some(alias) = target.alias.as_deref().filter(|s| !s.is_empty()) {
                let project_id = self.alias_map.get(alias).ok_or_else(|| {
                    StandardError::new(
                        ErrorCode::TargetNotFound,
                        format!("alias \"{alias}\" does not map to a configured project"),
                    )
                })?;
                ids.push(project_id.clone());
            } else {
                return Err(StandardError::new(
                    ErrorCode::TargetNotFound,
                    format!("targets[{i}] has neither project_id nor alias"),
                ));
            }
        }
        Ok(dedup_preserving_order(ids))
    }

    fn resolve_selector(&self, selector: &TargetSelector) -> Result<Vec<String>> {
        let ids = match selector.mode {
            SelectorMode::ProjectId => selector
                .values
                .iter()
                .filter(|v| self.known_project_ids.contains(*v))
                .cloned()
                .collect::<Vec<_>>(),
            SelectorMode::Alias => selector
                .values
                .iter()
                .filter_map(|alias| self.alias_map.get(alias).cloned())
                .collect(),
            SelectorMode::Auto => return self.resolve_auto(),
        };
        if ids.is_empty() {
            return Err(StandardError::new(
                ErrorCode::TargetNotFound,
                "selector matched no configured project",
            ));
        }
        Ok(dedup_preserving_order(ids))
    }

    fn resolve_auto(&self) -> Result<Vec<String>> {
        if !self.auto_target_project_ids.is_empty() {
            return Ok(dedup_preserving_order(self.auto_target_project_ids.clone()));
        }
        if self.known_project_ids.len() == 1 {
            return Ok(vec![self.known_project_ids[0].clone()]);
        }
        Err(StandardError::new(
            ErrorCode::TargetAmbiguous,
            "no targets given and no auto-target default is configured",
        )
        .with_remediation(
            "pass explicit targets, or configure defaults.auto_target_project_ids",
        ))
    }
}

fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn tag(ids: Vec<String>, source: TargetSource) -> Vec<ResolvedTarget> {
    ids.into_iter()
        .enumerate()
        .map(|(index, project_id)| ResolvedTarget {
            index,
            source,
            project_id,
        })
        .collect()
}

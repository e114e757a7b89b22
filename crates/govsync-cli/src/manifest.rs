//! TOML manifests: resource kinds plus the resources that should (or should not) exist.
//!
//! ```toml
//! [[kind]]
//! name = "catalog"
//! collection = "identityGovernance/entitlementManagement/catalogs"
//!
//! [[resource]]
//! handle = "eng"
//! kind = "catalog"
//! name = "Engineering"
//! properties = { description = "Engineering resources" }
//!
//! [[resource]]
//! handle = "eng-access"
//! kind = "package"
//! name = "Engineering access"
//! parent = "${eng.id}"
//! ```
//!
//! `${handle.field}` refers to a converged resource of the same manifest and
//! orders the resources into dependency waves. Plain `${id}` and `${name}`
//! inside policy rules refer to the resource the policy is attached to and are
//! left for the engine.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use govsync_core::placeholder::{references, references_in};
use govsync_core::{DesiredResource, NaturalKey, Placeholders, PolicyAttachment, ResourceKind};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "kind")]
    pub kinds: Vec<ResourceKind>,
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceSpec {
    /// Manifest-local name other resources use in `${handle.field}`.
    pub handle: String,
    pub kind: String,
    /// Natural key.
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub ensure: Ensure,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub policy: Option<PolicyAttachment>,
}

impl Manifest {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid manifest {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(text).context("failed to parse TOML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        let mut kinds = HashSet::new();
        for kind in &self.kinds {
            kind.validate()?;
            if !kinds.insert(kind.name.as_str()) {
                bail!("kind '{}' is declared twice", kind.name);
            }
        }

        let by_handle: HashMap<&str, &ResourceSpec> = self
            .resources
            .iter()
            .map(|r| (r.handle.as_str(), r))
            .collect();
        if by_handle.len() != self.resources.len() {
            let mut seen = HashSet::new();
            let duplicate = self
                .resources
                .iter()
                .find(|r| !seen.insert(r.handle.as_str()))
                .map_or("", |r| r.handle.as_str());
            bail!("resource handle '{duplicate}' is used twice");
        }

        for resource in &self.resources {
            let handle = &resource.handle;
            if handle.trim().is_empty() || handle.contains('.') {
                bail!("resource handle '{handle}' must be non-empty and contain no '.'");
            }
            if resource.name.trim().is_empty() {
                bail!("resource '{handle}' has an empty name");
            }
            let Some(kind) = self.kinds.iter().find(|k| k.name == resource.kind) else {
                bail!("resource '{handle}' uses unknown kind '{}'", resource.kind);
            };
            if kind.parent.is_some() && resource.parent.is_none() {
                bail!("resource '{handle}' of kind '{}' needs a parent", kind.name);
            }
            for dependency in resource.dependencies() {
                match by_handle.get(dependency.as_str()) {
                    None => bail!("resource '{handle}' refers to unknown handle '{dependency}'"),
                    Some(_) if dependency == *handle => {
                        bail!("resource '{handle}' refers to itself")
                    }
                    Some(target) if target.ensure == Ensure::Absent => bail!(
                        "resource '{handle}' refers to '{dependency}', which is ensured absent"
                    ),
                    Some(_) => {}
                }
            }
        }
        self.waves()?;
        Ok(())
    }

    /// Kinds by name, ready to be shared by desired resources.
    pub fn kinds_by_name(&self) -> HashMap<String, Arc<ResourceKind>> {
        self.kinds
            .iter()
            .map(|k| (k.name.clone(), Arc::new(k.clone())))
            .collect()
    }

    /// Resource indexes grouped into waves; every resource comes after all of
    /// its dependencies. Order inside a wave follows the manifest.
    pub fn waves(&self) -> Result<Vec<Vec<usize>>> {
        let index: HashMap<&str, usize> = self
            .resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.handle.as_str(), i))
            .collect();
        let dependencies: Vec<Vec<usize>> = self
            .resources
            .iter()
            .map(|r| {
                r.dependencies()
                    .iter()
                    .filter_map(|d| index.get(d.as_str()).copied())
                    .collect()
            })
            .collect();

        let mut placed = vec![false; self.resources.len()];
        let mut waves = Vec::new();
        let mut remaining = self.resources.len();
        while remaining > 0 {
            let wave: Vec<usize> = (0..self.resources.len())
                .filter(|&i| !placed[i] && dependencies[i].iter().all(|&d| placed[d]))
                .collect();
            if wave.is_empty() {
                let cycle: Vec<&str> = (0..self.resources.len())
                    .filter(|&i| !placed[i])
                    .map(|i| self.resources[i].handle.as_str())
                    .collect();
                bail!("dependency cycle between: {}", cycle.join(", "));
            }
            for &i in &wave {
                placed[i] = true;
            }
            remaining -= wave.len();
            waves.push(wave);
        }
        Ok(waves)
    }
}

impl ResourceSpec {
    /// Handles this resource refers to through `${handle.field}`.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut names = references(&Value::Object(self.properties.clone()));
        names.extend(references_in(&self.name));
        if let Some(parent) = &self.parent {
            names.extend(references_in(parent));
        }
        if let Some(policy) = &self.policy {
            names.extend(references_in(&policy.target_key));
            names.extend(references_in(&policy.collection));
            names.extend(references_in(&policy.policy_id));
            names.extend(references(&Value::Array(policy.rules.clone())));
        }
        names
            .into_iter()
            .filter_map(|name| name.split_once('.').map(|(handle, _)| handle.to_string()))
            .collect()
    }

    /// Natural key with references resolved.
    pub fn key(&self, values: &Placeholders) -> Result<NaturalKey> {
        let name = values
            .render_str(&self.name)
            .with_context(|| format!("resource '{}': name", self.handle))?;
        Ok(match &self.parent {
            Some(parent) => {
                let parent = values
                    .render_str(parent)
                    .with_context(|| format!("resource '{}': parent", self.handle))?;
                NaturalKey::scoped(name, parent)
            }
            None => NaturalKey::new(name),
        })
    }

    /// Desired state with references resolved.
    pub fn to_desired(&self, kind: Arc<ResourceKind>, values: &Placeholders) -> Result<DesiredResource> {
        let key = self.key(values)?;
        let properties = match values.render(&Value::Object(self.properties.clone())) {
            Ok(Value::Object(properties)) => properties,
            Ok(_) => Map::new(),
            Err(e) => return Err(e).with_context(|| format!("resource '{}': properties", self.handle)),
        };
        let mut desired = DesiredResource::new(kind, key).with_properties(properties);

        if let Some(policy) = &self.policy {
            // The engine fills in the attached resource itself.
            let values = values.clone().with("id", "${id}").with("name", "${name}");
            let render = |input: &str| {
                values
                    .render_str(input)
                    .with_context(|| format!("resource '{}': policy", self.handle))
            };
            let rules = policy
                .rules
                .iter()
                .map(|rule| values.render(rule))
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("resource '{}': policy rules", self.handle))?;
            desired = desired.with_policy(PolicyAttachment {
                target_key: render(&policy.target_key)?,
                collection: render(&policy.collection)?,
                policy_id: render(&policy.policy_id)?,
                rules,
                ..policy.clone()
            });
        }
        Ok(desired)
    }
}

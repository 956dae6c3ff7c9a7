//! Layered dependency merge
//!
//! Layers, lowest precedence first:
//!
//! 1. shared dependency files (one layer)
//! 2. inherited inline deps (`[defaults]`, then the template)
//! 3. the environment's inline deps
//! 4. the environment's `pins` table
//!
//! A later layer replaces an earlier entry with the same normalized name.
//! Within one layer entries for the same package are combined, and two
//! different exact pins are a conflict.

use std::collections::BTreeMap;

use serde::Serialize;

use super::requirement::Requirement;
use super::requirements_file::read_requirements;
use crate::config::{EnvironmentSpec, Registry};
use crate::error::ResolutionError;

/// The merged, canonical dependency set of one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DependencySet {
    entries: BTreeMap<String, Requirement>,
}

impl DependencySet {
    pub fn get(&self, name: &str) -> Option<&Requirement> {
        self.entries.get(&super::normalize_name(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Installer arguments, sorted by package name.
    pub fn lines(&self) -> Vec<String> {
        self.entries.values().map(ToString::to_string).collect()
    }

    /// Newline-joined canonical form used for fingerprinting.
    pub fn canonical(&self) -> String {
        self.lines().join("\n")
    }

    fn apply_layer(&mut self, layer: Layer) {
        for (name, requirement) in layer.entries {
            if let Some(previous) = self.entries.insert(name, requirement) {
                tracing::trace!(package = %previous.name, origin = %layer.origin, "entry overridden");
            }
        }
    }
}

/// Entries of a single precedence layer, already combined.
struct Layer {
    origin: String,
    entries: BTreeMap<String, Requirement>,
}

impl Layer {
    fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            entries: BTreeMap::new(),
        }
    }

    fn add(&mut self, requirement: Requirement) -> Result<(), ResolutionError> {
        match self.entries.get_mut(&requirement.name) {
            Some(existing) => existing.absorb(requirement, &self.origin),
            None => {
                self.entries.insert(requirement.name.clone(), requirement);
                Ok(())
            }
        }
    }
}

/// Resolve an environment's dependency declaration.
///
/// Pure apart from reading the shared dependency files: the same declaration
/// and files always produce an identical set.
pub fn resolve(env: &EnvironmentSpec, registry: &Registry) -> Result<DependencySet, ResolutionError> {
    let mut set = DependencySet::default();

    let mut files = Layer::new(format!("shared dependency files of '{}'", env.name));
    for file in &env.deps.files {
        let path = registry.root().resolve(file);
        for line in read_requirements(&path)? {
            files.add(Requirement::parse(&line.text, &line.origin)?)?;
        }
    }
    set.apply_layer(files);

    for inherited in &env.deps.inherited {
        let mut layer = Layer::new(inherited.origin.clone());
        for entry in &inherited.entries {
            layer.add(Requirement::parse(entry, &inherited.origin)?)?;
        }
        set.apply_layer(layer);
    }

    let origin = format!("deps of '{}'", env.name);
    let mut inline = Layer::new(origin.clone());
    for entry in &env.deps.inline {
        inline.add(Requirement::parse(entry, &origin)?)?;
    }
    set.apply_layer(inline);

    let origin = format!("pins of '{}'", env.name);
    let mut pins = Layer::new(origin.clone());
    for (name, value) in &env.deps.pins {
        pins.add(Requirement::from_pin(name, value, &origin)?)?;
    }
    set.apply_layer(pins);

    tracing::debug!(env = %env.name, packages = set.len(), "dependencies resolved");
    Ok(set)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use matrix_fs::NormalizedPath;
    use matrix_fs::config::Format;
    use proptest::prelude::*;

    fn declaration(deps: &[String]) -> String {
        let quoted: Vec<String> = deps.iter().map(|d| format!("{d:?}")).collect();
        format!(
            "[defaults]\ninterpreter = \"3.6\"\n\n[[env]]\nname = \"unit\"\ndeps = [{}]\n",
            quoted.join(", ")
        )
    }

    fn resolve_text(deps: &[String]) -> String {
        let registry =
            Registry::parse(&declaration(deps), Format::Toml, NormalizedPath::new("/project")).unwrap();
        resolve(registry.get("unit").unwrap(), &registry)
            .unwrap()
            .canonical()
    }

    proptest! {
        #[test]
        fn test_declaration_order_does_not_change_the_set(
            deps in proptest::collection::btree_map("[a-z]{1,8}", "(|>=1\\.[0-9]|<[2-9]|==0\\.[0-9]{1,3})", 1..12),
            seed in any::<u64>(),
        ) {
            let ordered: Vec<String> = deps.iter().map(|(n, s)| format!("{n}{s}")).collect();

            let mut shuffled = ordered.clone();
            let len = shuffled.len();
            let mut state = seed;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }

            let first = resolve_text(&ordered);
            prop_assert_eq!(&first, &resolve_text(&ordered));
            prop_assert_eq!(first, resolve_text(&shuffled));
        }

        #[test]
        fn test_marker_order_does_not_change_the_set(
            markers in proptest::collection::btree_set("(python_version|sys_platform|platform_machine) == '[a-z0-9]{1,4}'", 1..6),
            seed in any::<u64>(),
        ) {
            let ordered: Vec<String> = markers.iter().map(|m| format!("enum34; {m}")).collect();
            let mut reversed = ordered.clone();
            reversed.reverse();
            let mut rotated = ordered.clone();
            let len = rotated.len();
            rotated.rotate_left(seed as usize % len);

            let first = resolve_text(&ordered);
            prop_assert_eq!(&first, &resolve_text(&reversed));
            prop_assert_eq!(first, resolve_text(&rotated));
        }
    }
}

//! Version selection: minimal version selection over the discovered graph.
//!
//! The highest declared version per module name survives. The empty
//! version is a trump that wins over everything (it marks a non-registry
//! override). Names under a multiple-version override keep every allowed
//! version that is actually targeted, with each dep edge mapped to the
//! nearest allowed version at or above the declared one. Finally,
//! everything unreachable from the root is pruned.

use crate::module::ResolveState;
use crate::ResolveError;
use bzlmod_common::{ModuleKey, Version};
use bzlmod_extlang::Override;
use std::collections::{BTreeMap, HashMap, HashSet};

enum Selected {
    /// An override trump: the single surviving version is "".
    Trump,
    /// Normal MVS: the highest version seen so far.
    Highest(Version),
    /// Multiple-version override: the allowed versions, ascending.
    Allowed(Vec<Version>),
}

pub fn selection(state: &mut ResolveState) -> Result<(), ResolveError> {
    let mut selected: HashMap<String, Selected> = HashMap::new();
    for (name, override_) in &state.overrides {
        if let Override::MultipleVersion { versions, .. } = override_ {
            let mut parsed = versions
                .iter()
                .map(|v| parse_version(name, v))
                .collect::<Result<Vec<_>, _>>()?;
            parsed.sort();
            selected.insert(name.clone(), Selected::Allowed(parsed));
        }
    }

    for key in state.dep_graph.keys() {
        if matches!(selected.get(&key.name), Some(Selected::Allowed(_))) {
            continue;
        }
        if key.version.is_empty() {
            selected.insert(key.name.clone(), Selected::Trump);
            continue;
        }
        let version = parse_version(&key.name, &key.version)?;
        let replace = match selected.get(&key.name) {
            Some(Selected::Trump) | Some(Selected::Allowed(_)) => false,
            Some(Selected::Highest(cur)) => *cur < version,
            None => true,
        };
        if replace {
            selected.insert(key.name.clone(), Selected::Highest(version));
        }
    }

    // Rewrite a key to the version that selection keeps for it.
    let rewrite = |key: &ModuleKey| -> Result<ModuleKey, ResolveError> {
        match selected.get(&key.name) {
            Some(Selected::Trump) => Ok(ModuleKey::new(key.name.clone(), "")),
            Some(Selected::Highest(version)) => {
                Ok(ModuleKey::new(key.name.clone(), version.original()))
            }
            Some(Selected::Allowed(allowed)) => {
                let declared = parse_version(&key.name, &key.version)?;
                let target = allowed.iter().find(|allowed| **allowed >= declared);
                match target {
                    Some(version) => Ok(ModuleKey::new(key.name.clone(), version.original())),
                    None => Err(ResolveError::NoAllowedVersion {
                        name: key.name.clone(),
                        version: key.version.clone(),
                    }),
                }
            }
            None => Err(ResolveError::BadVersion {
                module: key.name.clone(),
                source: bzlmod_common::VersionError(format!(
                    "nothing selected for {}",
                    key.name
                )),
            }),
        }
    };

    // Drop losers and rewrite the dep and tag keys of the survivors.
    let keys: Vec<ModuleKey> = state.dep_graph.keys().cloned().collect();
    let mut rewritten = BTreeMap::new();
    for key in keys {
        let module = state.dep_graph.remove(&key).expect("key was present");
        if rewrite(&key)? != key {
            continue;
        }
        let mut module = module;
        for dep_key in module.deps.values_mut() {
            *dep_key = rewrite(dep_key)?;
        }
        for tag in module.tags.iter_mut() {
            tag.module_key = rewrite(&tag.module_key)?;
        }
        rewritten.insert(key, module);
    }
    state.dep_graph = rewritten;

    prune_unreachable(state);
    Ok(())
}

/// Removes nodes that are no longer reachable from the root. Dropping a
/// losing version can orphan a whole subtree even though every remaining
/// node was individually selected.
fn prune_unreachable(state: &mut ResolveState) {
    let mut reachable = HashSet::new();
    let mut stack = vec![state.root_key()];
    while let Some(key) = stack.pop() {
        if !reachable.insert(key.clone()) {
            continue;
        }
        if let Some(module) = state.dep_graph.get(&key) {
            stack.extend(module.deps.values().cloned());
        }
    }
    state.dep_graph.retain(|key, _| reachable.contains(key));
}

fn parse_version(name: &str, version: &str) -> Result<Version, ResolveError> {
    Version::parse(version).map_err(|source| ResolveError::BadVersion {
        module: name.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{DepGraph, Module};
    use bzlmod_extlang::OverrideSet;
    use std::collections::BTreeMap;

    fn module(name: &str, version: &str, deps: Vec<(&str, &str, &str)>) -> Module {
        Module {
            key: ModuleKey::new(name, version),
            deps: deps
                .into_iter()
                .map(|(repo, dep_name, dep_version)| {
                    (repo.to_owned(), ModuleKey::new(dep_name, dep_version))
                })
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        }
    }

    fn state(root: &str, entries: Vec<(ModuleKey, Module)>) -> ResolveState {
        ResolveState {
            root_module_name: root.to_owned(),
            dep_graph: entries.into_iter().collect::<DepGraph>(),
            overrides: OverrideSet::new(),
            vendor_dir: String::new(),
            registries: Vec::new(),
        }
    }

    #[test]
    fn diamond_with_override_trump() {
        // A depends on an overridden B and a registry C; B and C disagree
        // on D's version; the higher D wins and E (only needed by the
        // losing D) is pruned.
        let mut s = state(
            "A",
            vec![
                (
                    ModuleKey::new("A", ""),
                    module("A", "1.0", vec![("myB", "B", ""), ("myC", "C", "1.0")]),
                ),
                (
                    ModuleKey::new("B", ""),
                    module("B", "local-version", vec![("myD", "D", "1.0")]),
                ),
                (
                    ModuleKey::new("C", "1.0"),
                    module("C", "1.0", vec![("yourD", "D", "1.1")]),
                ),
                (
                    ModuleKey::new("D", "1.0"),
                    module("D", "1.0", vec![("E", "E", "1.0")]),
                ),
                (ModuleKey::new("D", "1.1"), module("D", "1.1", vec![])),
                (ModuleKey::new("E", "1.0"), module("E", "1.0", vec![])),
            ],
        );
        selection(&mut s).unwrap();

        let expected: DepGraph = vec![
            (
                ModuleKey::new("A", ""),
                module("A", "1.0", vec![("myB", "B", ""), ("myC", "C", "1.0")]),
            ),
            (
                ModuleKey::new("B", ""),
                module("B", "local-version", vec![("myD", "D", "1.1")]),
            ),
            (
                ModuleKey::new("C", "1.0"),
                module("C", "1.0", vec![("yourD", "D", "1.1")]),
            ),
            (ModuleKey::new("D", "1.1"), module("D", "1.1", vec![])),
        ]
        .into_iter()
        .collect();
        assert_eq!(s.dep_graph, expected);
    }

    #[test]
    fn highest_version_survives() {
        let mut s = state(
            "A",
            vec![
                (
                    ModuleKey::new("A", ""),
                    module(
                        "A",
                        "",
                        vec![("b1", "B", "1.0"), ("c", "C", "1.0")],
                    ),
                ),
                (ModuleKey::new("B", "1.0"), module("B", "1.0", vec![])),
                (
                    ModuleKey::new("C", "1.0"),
                    module("C", "1.0", vec![("b", "B", "3.0")]),
                ),
                (ModuleKey::new("B", "2.0"), module("B", "2.0", vec![])),
                (ModuleKey::new("B", "3.0"), module("B", "3.0", vec![])),
            ],
        );
        selection(&mut s).unwrap();
        assert!(s.dep_graph.contains_key(&ModuleKey::new("B", "3.0")));
        assert!(!s.dep_graph.contains_key(&ModuleKey::new("B", "1.0")));
        assert!(!s.dep_graph.contains_key(&ModuleKey::new("B", "2.0")));
        let root = &s.dep_graph[&ModuleKey::new("A", "")];
        assert_eq!(root.deps["b1"], ModuleKey::new("B", "3.0"));
    }

    #[test]
    fn bad_version_fails() {
        let mut s = state(
            "A",
            vec![
                (
                    ModuleKey::new("A", ""),
                    module("A", "", vec![("b", "B", "not a version!")]),
                ),
                (
                    ModuleKey::new("B", "not a version!"),
                    module("B", "not a version!", vec![]),
                ),
            ],
        );
        assert!(matches!(
            selection(&mut s),
            Err(ResolveError::BadVersion { .. })
        ));
    }

    #[test]
    fn tag_keys_are_rewritten() {
        use bzlmod_extlang::{SourcePos, Tag};
        let mut root = module("A", "", vec![("b", "B", "1.0")]);
        root.tags.push(Tag {
            module_key: ModuleKey::new("B", "1.0"),
            ruleset_name: "rs".to_owned(),
            rule_name: "rs".to_owned(),
            args: Vec::new(),
            kwargs: Vec::new(),
            pos: SourcePos::default(),
        });
        let mut s = state(
            "A",
            vec![
                (ModuleKey::new("A", ""), root),
                (ModuleKey::new("B", "1.0"), module("B", "1.0", vec![])),
                (ModuleKey::new("B", "2.0"), module("B", "2.0", vec![])),
            ],
        );
        // Make B@2.0 reachable so it stays selected.
        s.dep_graph
            .get_mut(&ModuleKey::new("A", ""))
            .unwrap()
            .deps
            .insert("b2".to_owned(), ModuleKey::new("B", "2.0"));

        selection(&mut s).unwrap();
        let root = &s.dep_graph[&ModuleKey::new("A", "")];
        assert_eq!(root.tags[0].module_key, ModuleKey::new("B", "2.0"));
    }

    #[test]
    fn multiple_version_override_maps_to_nearest_upward() {
        let mut s = state(
            "A",
            vec![
                (
                    ModuleKey::new("A", ""),
                    module(
                        "A",
                        "",
                        vec![("b_old", "B", "1.1"), ("c", "C", "1.0")],
                    ),
                ),
                (ModuleKey::new("B", "1.1"), module("B", "1.1", vec![])),
                (ModuleKey::new("B", "1.5"), module("B", "1.5", vec![])),
                (
                    ModuleKey::new("C", "1.0"),
                    module("C", "1.0", vec![("b", "B", "2.1")]),
                ),
                (ModuleKey::new("B", "2.1"), module("B", "2.1", vec![])),
                (ModuleKey::new("B", "3.0"), module("B", "3.0", vec![])),
            ],
        );
        s.overrides.insert(
            "B".to_owned(),
            Override::MultipleVersion {
                versions: vec!["1.5".to_owned(), "3.0".to_owned()],
                registry: String::new(),
            },
        );
        selection(&mut s).unwrap();

        // 1.1 maps up to 1.5; 2.1 maps up to 3.0; both allowed versions
        // survive and the unselected 1.1/2.1 entries are gone.
        let root = &s.dep_graph[&ModuleKey::new("A", "")];
        assert_eq!(root.deps["b_old"], ModuleKey::new("B", "1.5"));
        let c = &s.dep_graph[&ModuleKey::new("C", "1.0")];
        assert_eq!(c.deps["b"], ModuleKey::new("B", "3.0"));
        assert!(s.dep_graph.contains_key(&ModuleKey::new("B", "1.5")));
        assert!(s.dep_graph.contains_key(&ModuleKey::new("B", "3.0")));
        assert!(!s.dep_graph.contains_key(&ModuleKey::new("B", "1.1")));
        assert!(!s.dep_graph.contains_key(&ModuleKey::new("B", "2.1")));
    }

    #[test]
    fn multiple_version_override_with_no_upward_match_fails() {
        let mut s = state(
            "A",
            vec![
                (
                    ModuleKey::new("A", ""),
                    module("A", "", vec![("b", "B", "5.0")]),
                ),
                (ModuleKey::new("B", "5.0"), module("B", "5.0", vec![])),
            ],
        );
        s.overrides.insert(
            "B".to_owned(),
            Override::MultipleVersion {
                versions: vec!["1.0".to_owned()],
                registry: String::new(),
            },
        );
        assert!(matches!(
            selection(&mut s),
            Err(ResolveError::NoAllowedVersion { .. })
        ));
    }

    #[test]
    fn every_survivor_is_reachable_from_the_root() {
        let mut s = state(
            "A",
            vec![
                (
                    ModuleKey::new("A", ""),
                    module("A", "", vec![("b", "B", "2.0")]),
                ),
                (ModuleKey::new("B", "2.0"), module("B", "2.0", vec![])),
                // Orphan: nothing points at it after selection.
                (ModuleKey::new("X", "1.0"), module("X", "1.0", vec![])),
            ],
        );
        selection(&mut s).unwrap();
        assert_eq!(s.dep_graph.len(), 2);
        assert!(!s.dep_graph.contains_key(&ModuleKey::new("X", "1.0")));
    }
}

//! Reference resolution into relationships.
//!
//! Resolves symbolic candidate targets against the run's batch plus the
//! committed index, picking the most plausible definitions by module
//! locality and declared dependencies.

use crate::candidate::Candidate;
use crate::languages::split_xml_id;
use odix_core::{AttrValue, Entity, EntityKey, EntityKind, Relationship, TargetRef};
use odix_storage::{split_depends, SymbolEntry};
use std::collections::{HashMap, HashSet, VecDeque};

type NameKey = (EntityKind, String, Option<String>);

/// Resolves candidate targets to concrete entity keys.
pub struct ReferenceResolver {
    /// (kind, name, parent) -> every module defining it.
    name_index: HashMap<NameKey, Vec<EntityKey>>,
    /// Qualified XML id -> markup entities carrying it.
    xml_index: HashMap<String, Vec<EntityKey>>,
    known: HashSet<EntityKey>,
    /// Module -> declared dependencies.
    depends: HashMap<String, Vec<String>>,
    /// Module -> (dependency -> BFS depth), computed lazily.
    levels: HashMap<String, HashMap<String, usize>>,
}

impl ReferenceResolver {
    /// Create a new empty resolver.
    pub fn new() -> Self {
        Self {
            name_index: HashMap::new(),
            xml_index: HashMap::new(),
            known: HashSet::new(),
            depends: HashMap::new(),
            levels: HashMap::new(),
        }
    }

    /// Add committed symbols.
    pub fn add_entries(&mut self, entries: Vec<SymbolEntry>) {
        for entry in entries {
            self.add_key(entry.key, entry.xml_id);
        }
    }

    /// Add the run's freshly extracted entities. Module entities replace
    /// the stored dependency lists of their module.
    pub fn add_entities(&mut self, entities: &[Entity]) {
        for entity in entities {
            if entity.kind == EntityKind::Module {
                let depends = match entity.attr("depends") {
                    Some(AttrValue::Text(d)) => split_depends(d),
                    _ => Vec::new(),
                };
                self.depends.insert(entity.module.clone(), depends);
                self.levels.clear();
            }
            self.add_key(entity.key(), entity.xml_id.clone());
        }
    }

    /// Set module dependencies loaded from the store. Modules already known
    /// from the batch keep their batch lists.
    pub fn add_dependencies(&mut self, depends: HashMap<String, Vec<String>>) {
        for (module, deps) in depends {
            self.depends.entry(module).or_insert(deps);
        }
        self.levels.clear();
    }

    fn add_key(&mut self, key: EntityKey, xml_id: Option<String>) {
        if !self.known.insert(key.clone()) {
            return;
        }
        if let Some(xml_id) = xml_id {
            self.xml_index.entry(xml_id).or_default().push(key.clone());
        }
        self.name_index
            .entry((key.kind, key.name.clone(), key.parent_name.clone()))
            .or_default()
            .push(key);
    }

    /// Every definition a target could denote, sorted.
    fn lookup(&self, target: &TargetRef) -> Vec<EntityKey> {
        let mut found: Vec<EntityKey> = match (&target.xml_id, target.kind) {
            (Some(xml_id), EntityKind::XmlId) => {
                self.xml_index.get(xml_id).cloned().unwrap_or_default()
            }
            (Some(xml_id), kind) => self
                .xml_index
                .get(xml_id)
                .map(|keys| keys.iter().filter(|k| k.kind == kind).cloned().collect())
                .unwrap_or_default(),
            (None, kind) => self
                .name_index
                .get(&(kind, target.name.clone(), target.parent_name.clone()))
                .cloned()
                .unwrap_or_default(),
        };
        found.sort();
        found
    }

    /// Dependencies of `module` with their depth: 1 for direct, 2 for their
    /// dependencies, and so on.
    fn dependency_levels(&mut self, module: &str) -> &HashMap<String, usize> {
        if !self.levels.contains_key(module) {
            let mut levels = HashMap::new();
            let mut queue: VecDeque<(String, usize)> = self
                .depends
                .get(module)
                .into_iter()
                .flatten()
                .map(|d| (d.clone(), 1))
                .collect();
            while let Some((dep, depth)) = queue.pop_front() {
                if dep == module || levels.contains_key(&dep) {
                    continue;
                }
                if let Some(next) = self.depends.get(&dep) {
                    queue.extend(next.iter().map(|d| (d.clone(), depth + 1)));
                }
                levels.insert(dep, depth);
            }
            self.levels.insert(module.to_string(), levels);
        }
        &self.levels[module]
    }

    /// Pick the definitions a reference from `source` points at.
    ///
    /// Preference order: the module named by the XML id prefix, the source's
    /// own module, the nearest declared dependency. Otherwise every match.
    pub fn select(&mut self, source: &EntityKey, target: &TargetRef) -> Vec<EntityKey> {
        let matches: Vec<EntityKey> = self
            .lookup(target)
            .into_iter()
            .filter(|k| k != source)
            .collect();
        if matches.len() <= 1 {
            return matches;
        }

        if let Some(xml_id) = &target.xml_id {
            let (owner, _) = split_xml_id(xml_id);
            let owned: Vec<EntityKey> = matches.iter().filter(|k| k.module == owner).cloned().collect();
            if !owned.is_empty() {
                return owned;
            }
        }

        let local: Vec<EntityKey> = matches
            .iter()
            .filter(|k| k.module == source.module)
            .cloned()
            .collect();
        if !local.is_empty() {
            return local;
        }

        let levels = self.dependency_levels(&source.module);
        if let Some(nearest) = matches.iter().filter_map(|k| levels.get(&k.module)).min().copied() {
            return matches
                .into_iter()
                .filter(|k| levels.get(&k.module) == Some(&nearest))
                .collect();
        }

        // Ambiguity is not an error: fan out to every match.
        matches
    }

    /// Resolve one candidate. Unresolvable candidates come back dangling,
    /// except speculative ones, which are dropped.
    pub fn resolve(&mut self, candidate: &Candidate) -> Vec<Relationship> {
        for target in std::iter::once(&candidate.target).chain(&candidate.fallbacks) {
            let keys = self.select(&candidate.source, target);
            if !keys.is_empty() {
                return keys
                    .iter()
                    .map(|key| {
                        candidate.to_relationship(TargetRef::resolved_to(key, target.xml_id.clone()))
                    })
                    .collect();
            }
        }
        if candidate.speculative {
            return Vec::new();
        }
        vec![candidate.to_dangling()]
    }

    /// Resolve all candidates into relationships.
    pub fn resolve_all(&mut self, candidates: &[Candidate]) -> Vec<Relationship> {
        candidates.iter().flat_map(|c| self.resolve(c)).collect()
    }

    /// Retry a stored dangling relationship. `None` while still unresolvable.
    pub fn resolve_dangling(&mut self, dangling: &Relationship) -> Option<Vec<Relationship>> {
        let candidate = Candidate::from(dangling);
        let targets = self.select(&candidate.source, &candidate.target);
        if targets.is_empty() {
            return None;
        }
        Some(
            targets
                .iter()
                .map(|key| {
                    candidate
                        .to_relationship(TargetRef::resolved_to(key, candidate.target.xml_id.clone()))
                })
                .collect(),
        )
    }

    /// Get the number of indexed symbols.
    pub fn symbol_count(&self) -> usize {
        self.known.len()
    }
}

impl Default for ReferenceResolver {
    fn default() -> Self {
        Self::new()
    }
}

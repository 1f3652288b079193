//! CondTag persistence, Entity resolution and Term linking

use super::condense::{join_escaped, CondKey, CondTag, Violation};
use super::mention::props;
use super::{labels, rels};
use crate::graph::{Node, NodeId, Properties, PropertyValue, SOURCE_PROPERTY};
use crate::storage::{with_transaction, EdgeFilter, GraphStore, NodeFilter, StorageResult};
use std::collections::{BTreeMap, HashMap};

/// Property names on resolution nodes
pub mod keys {
    /// Merge key of a CondTag within its panel
    pub const CONDTAG_KEY: &str = "key";
    pub const PANEL: &str = "panel";
    /// Merge key of an Entity
    pub const ENTITY_KEY: &str = "key";
    pub const NAME: &str = "name";
}

/// Derive the corpus-wide Entity key for a CondTag.
///
/// `category:type:ext-ids` when identified, `category:type:text` otherwise,
/// where `text` is the normalized representative text. A `:` or `\` inside
/// a field is backslash-escaped.
pub fn entity_key(key: &CondKey) -> String {
    match key {
        CondKey::Identified {
            entity_type,
            category,
            ext_ids,
            ..
        } => join_escaped(
            ':',
            &[
                category.as_str(),
                entity_type.as_str(),
                ext_ids.as_str(),
            ],
        ),
        CondKey::Unidentified {
            entity_type,
            category,
            text,
            ..
        } => join_escaped(
            ':',
            &[
                category.as_str(),
                entity_type.as_str(),
                text.as_str(),
            ],
        ),
    }
}

/// Outcome of resolving one CondTag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub condtag: NodeId,
    pub entity: NodeId,
    pub role: String,
    pub entity_created: bool,
    pub terms_created: usize,
}

/// Merge a CondTag under `panel` and link the panel and member mentions.
pub fn store_condtag(
    store: &dyn GraphStore,
    panel: &Node,
    condtag: &CondTag,
) -> StorageResult<NodeId> {
    let mut key = Properties::new();
    key.insert(keys::PANEL.into(), panel.id.as_str().into());
    key.insert(keys::CONDTAG_KEY.into(), condtag.key.encode().into());

    let mut on_create = Properties::new();
    on_create.insert(props::ROLE.into(), condtag.key.role().into());
    on_create.insert(props::TYPE.into(), condtag.key.entity_type().into());
    on_create.insert(props::CATEGORY.into(), condtag.key.category().into());
    if let Some(ext_ids) = condtag.key.ext_ids() {
        on_create.insert(props::EXT_IDS.into(), ext_ids.into());
    }
    if let Some(source) = panel.source() {
        on_create.insert(SOURCE_PROPERTY.into(), source.into());
    }

    with_transaction(store, |tx| {
        let merged = tx.merge_node(labels::CONDTAG, &key, &on_create)?;

        let mut text = Properties::new();
        text.insert(props::TEXT.into(), condtag.text.as_str().into());
        tx.update_node(&merged.id, &text)?;

        tx.merge_relationship(&panel.id, &merged.id, rels::HAS_CONDTAG, &Properties::new())?;
        for member in &condtag.members {
            tx.merge_relationship(member, &merged.id, rels::CONDENSED_INTO, &Properties::new())?;
        }
        Ok(merged.id)
    })
}

/// Resolve a stored CondTag to its Entity and link every text variant as a Term.
pub fn resolve_condtag(
    store: &dyn GraphStore,
    condtag_id: &NodeId,
    condtag: &CondTag,
) -> StorageResult<Resolved> {
    let mut key = Properties::new();
    key.insert(keys::ENTITY_KEY.into(), entity_key(&condtag.key).into());

    let mut on_create = Properties::new();
    on_create.insert(keys::NAME.into(), condtag.text.as_str().into());
    on_create.insert(props::TYPE.into(), condtag.key.entity_type().into());
    on_create.insert(props::CATEGORY.into(), condtag.key.category().into());
    if let Some(ext_ids) = condtag.key.ext_ids() {
        on_create.insert(props::EXT_IDS.into(), ext_ids.into());
    }

    with_transaction(store, |tx| {
        let entity = tx.merge_node(labels::ENTITY, &key, &on_create)?;
        tx.merge_relationship(condtag_id, &entity.id, rels::IDENTIFIED_BY, &Properties::new())?;

        let mut terms_created = 0;
        for variant in &condtag.variants {
            let mut term_key = Properties::new();
            term_key.insert(props::TEXT.into(), variant.as_str().into());
            let term = tx.merge_node(labels::TERM, &term_key, &Properties::new())?;
            if term.created {
                terms_created += 1;
            }
            tx.merge_relationship(&entity.id, &term.id, rels::HAS_TERM, &Properties::new())?;
        }

        Ok(Resolved {
            condtag: condtag_id.clone(),
            entity: entity.id,
            role: condtag.key.role().to_string(),
            entity_created: entity.created,
            terms_created,
        })
    })
}

/// Normalized texts linked to an Entity
pub fn terms_of(store: &dyn GraphStore, entity: &NodeId) -> StorageResult<Vec<String>> {
    let mut terms = Vec::new();
    for edge in store.edges_from(entity, Some(rels::HAS_TERM))? {
        if let Some(term) = store.load_node(&edge.target)? {
            if let Some(text) = term.text(props::TEXT) {
                terms.push(text.to_string());
            }
        }
    }
    terms.sort();
    terms.dedup();
    Ok(terms)
}

/// Whether two Entities are linked to a common Term.
pub fn shares_term(store: &dyn GraphStore, a: &NodeId, b: &NodeId) -> StorageResult<bool> {
    let of_a: Vec<NodeId> = store
        .edges_from(a, Some(rels::HAS_TERM))?
        .into_iter()
        .map(|e| e.target)
        .collect();
    Ok(store
        .edges_from(b, Some(rels::HAS_TERM))?
        .iter()
        .any(|e| of_a.contains(&e.target)))
}

/// An Entity reachable through at least one shared Term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedEntity {
    pub entity: NodeId,
    pub shared_terms: Vec<String>,
}

/// Undirected related-by-term view around `entity`, computed from the
/// Entity -> Term edges. Sorted by number of shared terms, most first.
pub fn related_by_term(store: &dyn GraphStore, entity: &NodeId) -> StorageResult<Vec<RelatedEntity>> {
    let mut shared: BTreeMap<String, (NodeId, Vec<String>)> = BTreeMap::new();

    for edge in store.edges_from(entity, Some(rels::HAS_TERM))? {
        let Some(term) = store.load_node(&edge.target)? else {
            continue;
        };
        let text = term.text(props::TEXT).unwrap_or_default().to_string();
        for back in store.edges_to(&term.id, Some(rels::HAS_TERM))? {
            if &back.source == entity {
                continue;
            }
            shared
                .entry(back.source.as_str().to_string())
                .or_insert_with(|| (back.source.clone(), Vec::new()))
                .1
                .push(text.clone());
        }
    }

    let mut related: Vec<RelatedEntity> = shared
        .into_values()
        .map(|(entity, mut shared_terms)| {
            shared_terms.sort();
            shared_terms.dedup();
            RelatedEntity { entity, shared_terms }
        })
        .collect();
    related.sort_by(|a, b| b.shared_terms.len().cmp(&a.shared_terms.len()));
    Ok(related)
}

/// Check the stored resolution graph for consistency violations.
pub fn verify_resolution(store: &dyn GraphStore) -> StorageResult<Vec<Violation>> {
    let mut violations = Vec::new();

    for condtag in store.find_nodes(&NodeFilter::new().with_label(labels::CONDTAG))? {
        let text = condtag.text(props::TEXT).unwrap_or_default();
        if text.trim().is_empty() {
            violations.push(Violation::EmptyRepresentative {
                key: condtag
                    .properties
                    .get(keys::CONDTAG_KEY)
                    .map(PropertyValue::as_text)
                    .unwrap_or_else(|| condtag.id.to_string()),
            });
        }
        let entities = store.edges_from(&condtag.id, Some(rels::IDENTIFIED_BY))?.len();
        if entities > 1 {
            violations.push(Violation::CondTagWithManyEntities {
                condtag: condtag.id.clone(),
                entities,
            });
        }
    }

    let mut membership: HashMap<NodeId, usize> = HashMap::new();
    for edge in store.find_edges(&EdgeFilter::new().with_relationship(rels::CONDENSED_INTO))? {
        *membership.entry(edge.source).or_default() += 1;
    }
    let mut shared: Vec<_> = membership.into_iter().filter(|(_, n)| *n > 1).collect();
    shared.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    violations.extend(
        shared
            .into_iter()
            .map(|(mention, condtags)| Violation::MentionInManyCondTags { mention, condtags }),
    );

    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::condense::condense;
    use crate::resolve::mention::RawMention;
    use crate::storage::{OpenStore, SqliteStore};

    fn panel(store: &SqliteStore, source: &str) -> Node {
        let mut p = Properties::new();
        p.insert(SOURCE_PROPERTY.into(), source.into());
        let id = store.create_node("panel", &p).unwrap();
        store.load_node(&id).unwrap().unwrap()
    }

    fn mention(store: &SqliteStore, ext: Option<&str>, text: &str) -> RawMention {
        let id = store.create_node("tag", &Properties::new()).unwrap();
        RawMention::new(id, "intervention", "gene", "entity", ext, text)
    }

    #[test]
    fn entity_keys() {
        let identified = CondKey::Identified {
            role: "assayed".into(),
            entity_type: "gene".into(),
            category: "entity".into(),
            ext_ids: "G1".into(),
        };
        assert_eq!(entity_key(&identified), "entity:gene:G1");

        let unidentified = CondKey::Unidentified {
            role: "assayed".into(),
            entity_type: "cell".into(),
            category: "".into(),
            text: "hela".into(),
        };
        assert_eq!(entity_key(&unidentified), ":cell:hela");

        let colon = CondKey::Unidentified {
            role: "assayed".into(),
            entity_type: "cell".into(),
            category: "a".into(),
            text: "b:c".into(),
        };
        assert_eq!(entity_key(&colon), "a:cell:b\\:c");
    }

    #[test]
    fn separator_in_fields_does_not_merge_condtags() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = panel(&store, "doc-1");
        let tag = |category: &str, text: &str| {
            let id = store.create_node("tag", &Properties::new()).unwrap();
            RawMention::new(id, "assayed", "gene", category, None, text)
        };
        let mentions = vec![tag("c|x", "y"), tag("c", "x|y")];

        for condtag in &condense(&mentions).condtags {
            let id = store_condtag(&store, &p, condtag).unwrap();
            resolve_condtag(&store, &id, condtag).unwrap();
        }

        assert_eq!(store.node_count(Some(labels::CONDTAG)).unwrap(), 2);
        assert_eq!(store.node_count(Some(labels::ENTITY)).unwrap(), 2);
        assert!(verify_resolution(&store).unwrap().is_empty());
    }

    #[test]
    fn same_ext_id_resolves_to_same_entity_across_panels() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut entities = Vec::new();

        for source in ["doc-1", "doc-2"] {
            let p = panel(&store, source);
            let mentions = vec![mention(&store, Some("G1"), "geneA")];
            let condtag = &condense(&mentions).condtags[0];
            let id = store_condtag(&store, &p, condtag).unwrap();
            entities.push(resolve_condtag(&store, &id, condtag).unwrap());
        }

        assert_eq!(entities[0].entity, entities[1].entity);
        assert!(entities[0].entity_created);
        assert!(!entities[1].entity_created);
        assert_eq!(store.node_count(Some(labels::ENTITY)).unwrap(), 1);
        assert_eq!(store.node_count(Some(labels::CONDTAG)).unwrap(), 2);
    }

    #[test]
    fn name_is_kept_from_first_creation() {
        let store = SqliteStore::open_in_memory().unwrap();

        let p1 = panel(&store, "doc-1");
        let first = vec![mention(&store, Some("G1"), "geneA")];
        let c1 = &condense(&first).condtags[0];
        let id1 = store_condtag(&store, &p1, c1).unwrap();
        let r1 = resolve_condtag(&store, &id1, c1).unwrap();

        let p2 = panel(&store, "doc-2");
        let second = vec![mention(&store, Some("G1"), "GeneA-1")];
        let c2 = &condense(&second).condtags[0];
        let id2 = store_condtag(&store, &p2, c2).unwrap();
        resolve_condtag(&store, &id2, c2).unwrap();

        let entity = store.load_node(&r1.entity).unwrap().unwrap();
        assert_eq!(entity.text(keys::NAME), Some("geneA"));
        assert_eq!(
            terms_of(&store, &r1.entity).unwrap(),
            vec!["genea".to_string(), "genea-1".to_string()]
        );
    }

    #[test]
    fn condtag_storage_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = panel(&store, "doc-1");
        let mentions = vec![
            mention(&store, Some("G1"), "geneA"),
            mention(&store, Some("G1"), "geneA"),
        ];
        let condtag = &condense(&mentions).condtags[0];

        let a = store_condtag(&store, &p, condtag).unwrap();
        let b = store_condtag(&store, &p, condtag).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.edge_count(Some(rels::CONDENSED_INTO)).unwrap(), 2);
        assert_eq!(store.edge_count(Some(rels::HAS_CONDTAG)).unwrap(), 1);

        let stored = store.load_node(&a).unwrap().unwrap();
        assert_eq!(stored.text(props::TEXT), Some("geneA"));
        assert_eq!(stored.source(), Some("doc-1"));
        assert!(verify_resolution(&store).unwrap().is_empty());
    }

    #[test]
    fn related_by_term_finds_quasi_synonyms() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = panel(&store, "doc-1");
        let mentions = vec![
            mention(&store, Some("G1"), "p53"),
            mention(&store, Some("G2"), "P53"),
            mention(&store, Some("G3"), "mdm2"),
        ];
        let mut resolved = Vec::new();
        for condtag in &condense(&mentions).condtags {
            let id = store_condtag(&store, &p, condtag).unwrap();
            resolved.push(resolve_condtag(&store, &id, condtag).unwrap());
        }

        let related = related_by_term(&store, &resolved[0].entity).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].entity, resolved[1].entity);
        assert_eq!(related[0].shared_terms, vec!["p53".to_string()]);
        assert!(shares_term(&store, &resolved[0].entity, &resolved[1].entity).unwrap());
        assert!(!shares_term(&store, &resolved[0].entity, &resolved[2].entity).unwrap());
    }

    #[test]
    fn verification_flags_condtag_with_two_entities() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = panel(&store, "doc-1");
        let mentions = vec![mention(&store, Some("G1"), "geneA")];
        let condtag = &condense(&mentions).condtags[0];
        let id = store_condtag(&store, &p, condtag).unwrap();
        resolve_condtag(&store, &id, condtag).unwrap();

        let stray = store.create_node(labels::ENTITY, &Properties::new()).unwrap();
        store
            .create_relationship(&id, &stray, rels::IDENTIFIED_BY, &Properties::new())
            .unwrap();

        let violations = verify_resolution(&store).unwrap();
        assert_eq!(
            violations,
            vec![Violation::CondTagWithManyEntities { condtag: id, entities: 2 }]
        );
    }
}

//! Two-pass condensation of a container's mentions into CondTags
//!
//! Pass A groups identified mentions by (role, type, category, ext ids).
//! Pass B groups the remaining unidentified mentions by (role, type,
//! category, normalized text). The passes never overlap: an identified
//! mention always lands in pass A, and a pass B group is never folded into
//! a pass A CondTag even when their texts match.

use super::mention::{DropReason, RawMention};
use crate::graph::NodeId;
use std::collections::{BTreeMap, HashMap};

/// Identity of a CondTag within its container
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CondKey {
    Identified {
        role: String,
        entity_type: String,
        category: String,
        ext_ids: String,
    },
    Unidentified {
        role: String,
        entity_type: String,
        category: String,
        text: String,
    },
}

impl CondKey {
    pub fn role(&self) -> &str {
        match self {
            CondKey::Identified { role, .. } | CondKey::Unidentified { role, .. } => role,
        }
    }

    pub fn entity_type(&self) -> &str {
        match self {
            CondKey::Identified { entity_type, .. } | CondKey::Unidentified { entity_type, .. } => {
                entity_type
            }
        }
    }

    pub fn category(&self) -> &str {
        match self {
            CondKey::Identified { category, .. } | CondKey::Unidentified { category, .. } => {
                category
            }
        }
    }

    pub fn ext_ids(&self) -> Option<&str> {
        match self {
            CondKey::Identified { ext_ids, .. } => Some(ext_ids),
            CondKey::Unidentified { .. } => None,
        }
    }

    /// Stable string form, used as the stored merge key.
    ///
    /// Fields are escaped so distinct keys never encode to the same string.
    pub fn encode(&self) -> String {
        match self {
            CondKey::Identified {
                role,
                entity_type,
                category,
                ext_ids,
            } => join_escaped(
                '|',
                &[
                    "id",
                    role.as_str(),
                    entity_type.as_str(),
                    category.as_str(),
                    ext_ids.as_str(),
                ],
            ),
            CondKey::Unidentified {
                role,
                entity_type,
                category,
                text,
            } => join_escaped(
                '|',
                &[
                    "tx",
                    role.as_str(),
                    entity_type.as_str(),
                    category.as_str(),
                    text.as_str(),
                ],
            ),
        }
    }
}

/// Join `fields` with `sep`, backslash-escaping `sep` and `\` inside each field.
pub(crate) fn join_escaped(sep: char, fields: &[&str]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(sep);
        }
        for c in field.chars() {
            if c == sep || c == '\\' {
                out.push('\\');
            }
            out.push(c);
        }
    }
    out
}

/// Canonical grouping of a container's mentions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondTag {
    pub key: CondKey,
    /// Most frequent cleaned text among the members
    pub text: String,
    pub members: Vec<NodeId>,
    /// Distinct normalized texts among the members
    pub variants: Vec<String>,
}

/// A broken condensation postcondition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    MentionInManyCondTags { mention: NodeId, condtags: usize },
    EmptyRepresentative { key: String },
    CondTagWithManyEntities { condtag: NodeId, entities: usize },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::MentionInManyCondTags { mention, condtags } => {
                write!(f, "mention {} belongs to {} CondTags", mention, condtags)
            }
            Violation::EmptyRepresentative { key } => {
                write!(f, "CondTag {} has empty representative text", key)
            }
            Violation::CondTagWithManyEntities { condtag, entities } => {
                write!(f, "CondTag {} is identified by {} Entities", condtag, entities)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounts {
    pub empty_text: usize,
    pub unclassifiable: usize,
}

impl DropCounts {
    pub fn total(&self) -> usize {
        self.empty_text + self.unclassifiable
    }

    pub fn add(&mut self, other: DropCounts) {
        self.empty_text += other.empty_text;
        self.unclassifiable += other.unclassifiable;
    }
}

/// Result of condensing one container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condensation {
    /// Pass A CondTags first, then pass B, each in key order
    pub condtags: Vec<CondTag>,
    pub dropped: DropCounts,
    pub violations: Vec<Violation>,
}

/// Condense the mentions of one container.
pub fn condense(mentions: &[RawMention]) -> Condensation {
    let mut dropped = DropCounts::default();
    let mut identified: BTreeMap<CondKey, Vec<&RawMention>> = BTreeMap::new();
    let mut unidentified: BTreeMap<CondKey, Vec<&RawMention>> = BTreeMap::new();

    for mention in mentions {
        match mention.check() {
            Err(DropReason::EmptyText) => {
                dropped.empty_text += 1;
                continue;
            }
            Err(DropReason::Unclassifiable) => {
                dropped.unclassifiable += 1;
                continue;
            }
            Ok(()) => {}
        }

        match &mention.ext_ids {
            Some(ext_ids) => identified
                .entry(CondKey::Identified {
                    role: mention.role.clone(),
                    entity_type: mention.entity_type.clone(),
                    category: mention.category.clone(),
                    ext_ids: ext_ids.clone(),
                })
                .or_default()
                .push(mention),
            None => unidentified
                .entry(CondKey::Unidentified {
                    role: mention.role.clone(),
                    entity_type: mention.entity_type.clone(),
                    category: mention.category.clone(),
                    text: mention.normalized_text(),
                })
                .or_default()
                .push(mention),
        }
    }

    let condtags: Vec<CondTag> = identified
        .into_iter()
        .chain(unidentified)
        .map(|(key, members)| CondTag {
            text: representative_text(&members),
            variants: variants(&members),
            members: members.iter().map(|m| m.node.clone()).collect(),
            key,
        })
        .collect();

    let violations = verify(&condtags);
    Condensation {
        condtags,
        dropped,
        violations,
    }
}

/// Most frequent text; ties go to the lexicographically smallest.
fn representative_text(members: &[&RawMention]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for m in members {
        *counts.entry(m.text.as_str()).or_default() += 1;
    }
    // BTreeMap iterates in ascending text order; keep the first maximum
    let mut best: Option<(&str, usize)> = None;
    for (text, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((text, count));
        }
    }
    best.map(|(t, _)| t.to_string()).unwrap_or_default()
}

fn variants(members: &[&RawMention]) -> Vec<String> {
    let mut out: Vec<String> = members.iter().map(|m| m.normalized_text()).collect();
    out.sort();
    out.dedup();
    out
}

/// Postconditions: each mention in at most one CondTag, no empty text.
pub fn verify(condtags: &[CondTag]) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut membership: HashMap<&NodeId, usize> = HashMap::new();

    for condtag in condtags {
        if condtag.text.trim().is_empty() {
            violations.push(Violation::EmptyRepresentative {
                key: condtag.key.encode(),
            });
        }
        for member in &condtag.members {
            *membership.entry(member).or_default() += 1;
        }
    }

    let mut shared: Vec<_> = membership.into_iter().filter(|(_, n)| *n > 1).collect();
    shared.sort();
    violations.extend(shared.into_iter().map(|(mention, condtags)| {
        Violation::MentionInManyCondTags {
            mention: mention.clone(),
            condtags,
        }
    }));
    violations
}

//! Memory filter algebra.
//!
//! A closed set of predicates evaluated in-process by every store and
//! compiled to parameterized SQL by the relational backends. The
//! `Custom` variant carries an arbitrary predicate; SQL compilers
//! refuse it, which pushes the owning store onto its row-by-row
//! fallback path.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{MemoryError, Result};
use crate::memory::record::{Memory, MemoryType, META_CONVERSATION_ID, META_ENTITY_ID};

// ============================================================================
// IDENTIFIER VALIDATION
// ============================================================================

fn metadata_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

/// Check that a metadata key is safe to splice into a SQL JSON path
///
/// Keys must match `^[A-Za-z_][A-Za-z0-9_]*$`; anything else fails
/// with a validation error naming the key. Bound values never need
/// this check - only identifiers that end up inside SQL text do.
pub fn validate_metadata_key(key: &str) -> Result<()> {
    if metadata_key_pattern().is_match(key) {
        Ok(())
    } else {
        Err(MemoryError::validation(
            key,
            "metadata key must match ^[A-Za-z_][A-Za-z0-9_]*$",
        ))
    }
}

// ============================================================================
// FILTER ALGEBRA
// ============================================================================

/// A predicate over memories
#[derive(Clone)]
pub enum MemoryFilter {
    /// Matches everything
    All,
    /// Matches nothing
    None,
    /// Exact memory type
    ByType(MemoryType),
    /// Any of a set of memory types
    ByTypes(BTreeSet<MemoryType>),
    /// Metadata key equals value
    ByMetadata(String, String),
    /// Metadata key is present
    HasMetadata(String),
    /// Metadata value contains a substring (case-sensitive)
    MetadataContains(String, String),
    /// Memories about one entity
    ByEntity(String),
    /// Memories from one conversation
    ByConversation(String),
    /// Timestamp within an inclusive range; open ends match everything
    ByTimeRange {
        /// Lower bound (inclusive)
        after: Option<DateTime<Utc>>,
        /// Upper bound (inclusive)
        before: Option<DateTime<Utc>>,
    },
    /// Importance present and at least the threshold
    MinImportance(f64),
    /// Content contains a substring
    ContentContains {
        /// Substring to look for
        needle: String,
        /// Exact-case match when true
        case_sensitive: bool,
    },
    /// Both sides match
    And(Box<MemoryFilter>, Box<MemoryFilter>),
    /// Either side matches
    Or(Box<MemoryFilter>, Box<MemoryFilter>),
    /// Inner filter does not match
    Not(Box<MemoryFilter>),
    /// Arbitrary in-process predicate; never compiled to SQL
    Custom(Arc<dyn Fn(&Memory) -> bool + Send + Sync>),
}

impl std::fmt::Debug for MemoryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryFilter::All => write!(f, "All"),
            MemoryFilter::None => write!(f, "None"),
            MemoryFilter::ByType(t) => write!(f, "ByType({t})"),
            MemoryFilter::ByTypes(set) => {
                let names: Vec<&str> = set.iter().map(MemoryType::name).collect();
                write!(f, "ByTypes({names:?})")
            }
            MemoryFilter::ByMetadata(k, v) => write!(f, "ByMetadata({k:?}, {v:?})"),
            MemoryFilter::HasMetadata(k) => write!(f, "HasMetadata({k:?})"),
            MemoryFilter::MetadataContains(k, s) => write!(f, "MetadataContains({k:?}, {s:?})"),
            MemoryFilter::ByEntity(id) => write!(f, "ByEntity({id:?})"),
            MemoryFilter::ByConversation(id) => write!(f, "ByConversation({id:?})"),
            MemoryFilter::ByTimeRange { after, before } => {
                write!(f, "ByTimeRange({after:?}, {before:?})")
            }
            MemoryFilter::MinImportance(x) => write!(f, "MinImportance({x})"),
            MemoryFilter::ContentContains {
                needle,
                case_sensitive,
            } => write!(f, "ContentContains({needle:?}, cs={case_sensitive})"),
            MemoryFilter::And(l, r) => write!(f, "And({l:?}, {r:?})"),
            MemoryFilter::Or(l, r) => write!(f, "Or({l:?}, {r:?})"),
            MemoryFilter::Not(inner) => write!(f, "Not({inner:?})"),
            MemoryFilter::Custom(_) => write!(f, "Custom(<predicate>)"),
        }
    }
}

impl MemoryFilter {
    /// Any of the given types
    pub fn by_types(types: impl IntoIterator<Item = MemoryType>) -> Self {
        MemoryFilter::ByTypes(types.into_iter().collect())
    }

    /// Case-insensitive content substring match
    pub fn content_contains(needle: impl Into<String>) -> Self {
        MemoryFilter::ContentContains {
            needle: needle.into(),
            case_sensitive: false,
        }
    }

    /// Arbitrary in-process predicate
    pub fn custom(predicate: impl Fn(&Memory) -> bool + Send + Sync + 'static) -> Self {
        MemoryFilter::Custom(Arc::new(predicate))
    }

    /// Conjunction
    pub fn and(self, other: MemoryFilter) -> Self {
        MemoryFilter::And(Box::new(self), Box::new(other))
    }

    /// Disjunction
    pub fn or(self, other: MemoryFilter) -> Self {
        MemoryFilter::Or(Box::new(self), Box::new(other))
    }

    /// Negation
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        MemoryFilter::Not(Box::new(self))
    }

    /// Evaluate the filter against one memory
    pub fn matches(&self, memory: &Memory) -> bool {
        match self {
            MemoryFilter::All => true,
            MemoryFilter::None => false,
            MemoryFilter::ByType(t) => memory.memory_type == *t,
            MemoryFilter::ByTypes(set) => set.contains(&memory.memory_type),
            MemoryFilter::ByMetadata(key, value) => {
                memory.metadata.get(key).is_some_and(|v| v == value)
            }
            MemoryFilter::HasMetadata(key) => memory.metadata.contains_key(key),
            MemoryFilter::MetadataContains(key, needle) => memory
                .metadata
                .get(key)
                .is_some_and(|v| v.contains(needle)),
            MemoryFilter::ByEntity(entity_id) => memory
                .metadata
                .get(META_ENTITY_ID)
                .is_some_and(|v| v == entity_id),
            MemoryFilter::ByConversation(conversation_id) => memory
                .metadata
                .get(META_CONVERSATION_ID)
                .is_some_and(|v| v == conversation_id),
            MemoryFilter::ByTimeRange { after, before } => {
                after.is_none_or(|a| memory.timestamp >= a)
                    && before.is_none_or(|b| memory.timestamp <= b)
            }
            MemoryFilter::MinImportance(threshold) => {
                memory.importance.is_some_and(|i| i >= *threshold)
            }
            MemoryFilter::ContentContains {
                needle,
                case_sensitive,
            } => {
                if *case_sensitive {
                    memory.content.contains(needle.as_str())
                } else {
                    memory
                        .content
                        .to_lowercase()
                        .contains(&needle.to_lowercase())
                }
            }
            MemoryFilter::And(l, r) => l.matches(memory) && r.matches(memory),
            MemoryFilter::Or(l, r) => l.matches(memory) || r.matches(memory),
            MemoryFilter::Not(inner) => !inner.matches(memory),
            MemoryFilter::Custom(predicate) => predicate(memory),
        }
    }

    /// Whether a `Custom` predicate occurs anywhere in the tree
    pub fn contains_custom(&self) -> bool {
        match self {
            MemoryFilter::Custom(_) => true,
            MemoryFilter::And(l, r) | MemoryFilter::Or(l, r) => {
                l.contains_custom() || r.contains_custom()
            }
            MemoryFilter::Not(inner) => inner.contains_custom(),
            _ => false,
        }
    }
}

/// When both operands of an `Or` are bare type tests, return their
/// serialized names sorted ascending. SQL compilers use this to keep
/// parameter order deterministic regardless of how the filter was
/// written.
pub(crate) fn sorted_or_type_names(l: &MemoryFilter, r: &MemoryFilter) -> Option<Vec<String>> {
    match (l, r) {
        (MemoryFilter::ByType(a), MemoryFilter::ByType(b)) => {
            let mut names = vec![a.name().to_string(), b.name().to_string()];
            names.sort();
            Some(names)
        }
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> Memory {
        Memory::from_conversation("Rust ownership makes aliasing explicit", "user", Some("c1"))
            .with_importance(0.8)
    }

    #[test]
    fn test_all_and_none() {
        let memory = sample();
        assert!(MemoryFilter::All.matches(&memory));
        assert!(!MemoryFilter::None.matches(&memory));
    }

    #[test]
    fn test_by_type_and_by_types() {
        let memory = sample();
        assert!(MemoryFilter::ByType(MemoryType::Conversation).matches(&memory));
        assert!(!MemoryFilter::ByType(MemoryType::Task).matches(&memory));
        assert!(
            MemoryFilter::by_types([MemoryType::Task, MemoryType::Conversation]).matches(&memory)
        );
    }

    #[test]
    fn test_metadata_predicates() {
        let memory = sample();
        assert!(MemoryFilter::ByMetadata("role".into(), "user".into()).matches(&memory));
        assert!(!MemoryFilter::ByMetadata("role".into(), "assistant".into()).matches(&memory));
        assert!(MemoryFilter::HasMetadata("conversation_id".into()).matches(&memory));
        assert!(MemoryFilter::MetadataContains("role".into(), "se".into()).matches(&memory));
        assert!(!MemoryFilter::MetadataContains("role".into(), "SE".into()).matches(&memory));
        assert!(MemoryFilter::ByConversation("c1".into()).matches(&memory));
        assert!(!MemoryFilter::ByEntity("acme".into()).matches(&memory));
    }

    #[test]
    fn test_time_range_bounds() {
        let memory = sample();
        let earlier = memory.timestamp - Duration::hours(1);
        let later = memory.timestamp + Duration::hours(1);

        assert!(MemoryFilter::ByTimeRange {
            after: Some(earlier),
            before: Some(later)
        }
        .matches(&memory));
        assert!(MemoryFilter::ByTimeRange {
            after: None,
            before: None
        }
        .matches(&memory));
        assert!(!MemoryFilter::ByTimeRange {
            after: Some(later),
            before: None
        }
        .matches(&memory));
    }

    #[test]
    fn test_min_importance_requires_presence() {
        let memory = sample();
        assert!(MemoryFilter::MinImportance(0.5).matches(&memory));
        assert!(!MemoryFilter::MinImportance(0.9).matches(&memory));

        let unweighted = Memory::new("x", MemoryType::Task);
        assert!(!MemoryFilter::MinImportance(0.0).matches(&unweighted));
    }

    #[test]
    fn test_content_contains_case_modes() {
        let memory = sample();
        assert!(MemoryFilter::content_contains("rust OWNERSHIP").matches(&memory));
        assert!(!MemoryFilter::ContentContains {
            needle: "rust".into(),
            case_sensitive: true
        }
        .matches(&memory));
    }

    #[test]
    fn test_combinators() {
        let memory = sample();
        let filter = MemoryFilter::ByType(MemoryType::Conversation)
            .and(MemoryFilter::MinImportance(0.5))
            .or(MemoryFilter::None);
        assert!(filter.matches(&memory));
        assert!(!filter.clone().not().matches(&memory));
    }

    #[test]
    fn test_custom_predicate_and_detection() {
        let memory = sample();
        let filter = MemoryFilter::custom(|m| m.content.len() > 10);
        assert!(filter.matches(&memory));
        assert!(filter.contains_custom());

        let nested = MemoryFilter::All.and(MemoryFilter::custom(|_| false).not());
        assert!(nested.contains_custom());
        assert!(!MemoryFilter::All.and(MemoryFilter::None).contains_custom());
    }

    #[test]
    fn test_validate_metadata_key() {
        assert!(validate_metadata_key("conversation_id").is_ok());
        assert!(validate_metadata_key("_private").is_ok());
        assert!(validate_metadata_key("key2").is_ok());
        assert!(validate_metadata_key("").is_err());
        assert!(validate_metadata_key("9lives").is_err());
        assert!(validate_metadata_key("bad-key").is_err());
        assert!(validate_metadata_key("x'); DROP TABLE memories;--").is_err());
    }

    #[test]
    fn test_sorted_or_type_names() {
        let l = MemoryFilter::ByType(MemoryType::Task);
        let r = MemoryFilter::ByType(MemoryType::Conversation);
        let names = sorted_or_type_names(&l, &r).unwrap();
        assert_eq!(names, vec!["conversation".to_string(), "task".to_string()]);
        assert!(sorted_or_type_names(&l, &MemoryFilter::All).is_none());
    }
}

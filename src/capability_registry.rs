//! Static registry of the tools the bundled engine exposes.
//!
//! The registry drives `tools/list` and backs `capability_catalog` discovery.
//! It is built at compile time and never mutated.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Capability category for grouping related tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCategory {
    /// Connectivity checks
    Diagnostics,
    /// Session registry inspection
    Sessions,
    /// Capability discovery
    Discovery,
}

impl CapabilityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diagnostics => "diagnostics",
            Self::Sessions => "sessions",
            Self::Discovery => "discovery",
        }
    }

    pub fn all() -> &'static [CapabilityCategory] {
        &[Self::Diagnostics, Self::Sessions, Self::Discovery]
    }
}

impl FromStr for CapabilityCategory {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "diagnostics" | "diag" | "debug" => Ok(Self::Diagnostics),
            "sessions" | "session" => Ok(Self::Sessions),
            "discovery" | "catalog" | "help" => Ok(Self::Discovery),
            _ => Err(()),
        }
    }
}

/// Metadata for a single tool
#[derive(Debug, Clone)]
pub struct CapabilityInfo {
    pub name: &'static str,
    pub category: CapabilityCategory,
    /// One line, used in catalog results
    pub short_desc: &'static str,
    /// Used as the tool description in tools/list
    pub full_desc: &'static str,
    /// JSON Schema of the tool arguments
    pub input_schema: &'static str,
    /// Example invocation (JSON)
    pub example: &'static str,
    /// Keywords for search
    pub keywords: &'static [&'static str],
}

pub static CAPABILITY_REGISTRY: &[CapabilityInfo] = &[
    CapabilityInfo {
        name: "echo",
        category: CapabilityCategory::Diagnostics,
        short_desc: "Echo a message back with the serving session id",
        full_desc: "Return the given message unchanged, together with the id and transport \
                    variant of the session that handled the call. Useful to confirm that \
                    follow-up requests reach the same session.",
        input_schema: r#"{
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "Text to echo back"}
            },
            "required": ["message"]
        }"#,
        example: r#"{"message": "hello"}"#,
        keywords: &["echo", "ping", "test", "roundtrip", "connectivity"],
    },
    CapabilityInfo {
        name: "session_stats",
        category: CapabilityCategory::Sessions,
        short_desc: "Count live sessions per transport",
        full_desc: "Report how many sessions are currently registered for the streamable \
                    transport and for the legacy SSE transport, plus the total. \
                    Set include_ids=true to also list each session with its creation time.",
        input_schema: r#"{
            "type": "object",
            "properties": {
                "include_ids": {
                    "type": "boolean",
                    "description": "Also list sessions and their creation times"
                }
            }
        }"#,
        example: r#"{"include_ids": true}"#,
        keywords: &["session", "sessions", "count", "stats", "registry", "live", "transport"],
    },
    CapabilityInfo {
        name: "capability_catalog",
        category: CapabilityCategory::Discovery,
        short_desc: "Search available tools by keyword or category",
        full_desc: "Search the tools this server offers. With a query, tools are ranked by \
                    how well their name, description and keywords match. With a category, \
                    only tools of that category are listed. With neither, every tool is listed.",
        input_schema: r#"{
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Keywords to match"},
                "category": {"type": "string", "description": "Category filter"},
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum results (default 10)"
                }
            }
        }"#,
        example: r#"{"query": "session count"}"#,
        keywords: &["catalog", "search", "discover", "find", "tools", "help", "list"],
    },
];

/// Get all tools
pub fn all_capabilities() -> impl Iterator<Item = &'static CapabilityInfo> {
    CAPABILITY_REGISTRY.iter()
}

/// Where a query term hit a tool. Later variants rank higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Hit {
    Description,
    Keyword,
    Name,
}

impl Hit {
    fn weight(self) -> usize {
        match self {
            Self::Description => 1,
            Self::Keyword => 2,
            Self::Name => 4,
        }
    }
}

/// A tool returned by [`search_capabilities`].
#[derive(Debug, Clone)]
pub struct CapabilityMatch {
    pub capability: &'static CapabilityInfo,
    /// Query terms that hit this tool, in query order
    pub terms: Vec<String>,
    score: usize,
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Strongest place `term` occurs in `capability`: a whole segment of the
/// snake_case name, a keyword prefix, or a word of the full description
/// (plural forms included).
fn best_hit(capability: &CapabilityInfo, term: &str) -> Option<Hit> {
    if capability.name.split('_').any(|part| part == term) {
        Some(Hit::Name)
    } else if capability.keywords.iter().any(|k| k.starts_with(term)) {
        Some(Hit::Keyword)
    } else if words(capability.full_desc)
        .any(|w| w == term || w.strip_suffix('s') == Some(term))
    {
        Some(Hit::Description)
    } else {
        None
    }
}

/// Rank tools against a free-text query, best first.
///
/// Each distinct query term counts once per tool, at its strongest hit.
/// Ties keep registry order. Tools no term hits are left out.
pub fn search_capabilities(query: &str) -> Vec<CapabilityMatch> {
    let mut terms: Vec<String> = Vec::new();
    for term in words(query) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }

    let mut matches: Vec<CapabilityMatch> = all_capabilities()
        .filter_map(|capability| {
            let hits: Vec<(&String, Hit)> = terms
                .iter()
                .filter_map(|term| best_hit(capability, term).map(|hit| (term, hit)))
                .collect();
            if hits.is_empty() {
                return None;
            }
            Some(CapabilityMatch {
                capability,
                score: hits.iter().map(|(_, hit)| hit.weight()).sum(),
                terms: hits.into_iter().map(|(term, _)| term.clone()).collect(),
            })
        })
        .collect();
    matches.sort_by(|a, b| b.score.cmp(&a.score));
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_are_valid_json_objects() {
        for capability in all_capabilities() {
            let schema: serde_json::Value =
                serde_json::from_str(capability.input_schema).expect("schema parses");
            assert_eq!(schema["type"], "object", "{}", capability.name);
            let example: serde_json::Value =
                serde_json::from_str(capability.example).expect("example parses");
            assert!(example.is_object());
        }
    }

    #[test]
    fn name_hits_outrank_description_hits() {
        let results = search_capabilities("Session count");
        let names: Vec<_> = results.iter().map(|m| m.capability.name).collect();
        assert_eq!(names, ["session_stats", "echo"]);
        assert_eq!(results[0].terms, ["session", "count"]);
        // echo only mentions "session" in its description
        assert_eq!(results[1].terms, ["session"]);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn search_counts_each_term_once() {
        let once = search_capabilities("catalog");
        let twice = search_capabilities("catalog, catalog");
        assert_eq!(once.len(), 1);
        assert_eq!(once[0].score, twice[0].score);
        assert_eq!(twice[0].terms, ["catalog"]);
    }

    #[test]
    fn search_matches_keyword_prefixes_and_plurals() {
        let results = search_capabilities("conn");
        assert_eq!(results[0].capability.name, "echo");
        // the catalog description says "offers"
        let results = search_capabilities("offer");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].capability.name, "capability_catalog");
        assert!(search_capabilities("zzz").is_empty());
        assert!(search_capabilities("  ").is_empty());
    }

    #[test]
    fn category_names_parse_with_aliases() {
        assert_eq!(
            "session".parse::<CapabilityCategory>(),
            Ok(CapabilityCategory::Sessions)
        );
        assert_eq!(
            " Catalog ".parse::<CapabilityCategory>(),
            Ok(CapabilityCategory::Discovery)
        );
        assert!("bogus".parse::<CapabilityCategory>().is_err());
        assert_eq!(CapabilityCategory::all().len(), 3);
    }
}

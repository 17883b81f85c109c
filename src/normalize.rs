//! Entity normalization and categorization
//!
//! `normalize` produces the canonical dedup key for an entity: lowercase,
//! trimmed. Two spans that normalize identically are the same entity
//! regardless of original casing or padding.
//!
//! `Categorizer` assigns semantic subcategories to Technology and Topic
//! entities from curated vocabulary lists, and hosts the
//! `is_technology_term` routing heuristic for ambiguous extraction labels.
//! The heuristic is a fixed keyword list, not a classifier; unseen terms
//! fall through to Topic.

use std::collections::HashSet;

use crate::graph_memory::EntityVariant;

/// Fallback category for technology entities no rule matches
pub const GENERAL_TECH: &str = "general_tech";

/// Fallback category for topic entities no rule matches
pub const GENERAL_TOPIC: &str = "general";

/// Canonical dedup key: lowercase, trimmed
pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

static PROGRAMMING_LANGUAGES: &[&str] = &[
    "python",
    "rust",
    "javascript",
    "typescript",
    "java",
    "kotlin",
    "swift",
    "go",
    "golang",
    "ruby",
    "php",
    "scala",
    "haskell",
    "c++",
    "c#",
    "sql",
    "bash",
    "lua",
    "julia",
    "elixir",
    "erlang",
    "dart",
    "zig",
];

static FRAMEWORKS: &[&str] = &[
    "react",
    "react native",
    "vue",
    "angular",
    "svelte",
    "django",
    "flask",
    "fastapi",
    "rails",
    "spring",
    "laravel",
    "next.js",
    "nextjs",
    "express",
    "axum",
    "actix",
    "flutter",
    "pytorch",
    "tensorflow",
    "keras",
    "scikit-learn",
    "langchain",
];

static DATABASES: &[&str] = &[
    "postgres",
    "postgresql",
    "mysql",
    "sqlite",
    "mongodb",
    "redis",
    "cassandra",
    "dynamodb",
    "elasticsearch",
    "neo4j",
    "kuzu",
    "milvus",
    "rocksdb",
    "clickhouse",
    "duckdb",
    "vector database",
];

static INFRASTRUCTURE: &[&str] = &[
    "docker",
    "kubernetes",
    "aws",
    "azure",
    "gcp",
    "terraform",
    "ansible",
    "nginx",
    "kafka",
    "rabbitmq",
    "grpc",
    "graphql",
    "rest",
    "linux",
    "git",
    "github",
    "gitlab",
    "jenkins",
    "prometheus",
    "grafana",
    "ci/cd",
];

static AI_ML_TOPICS: &[&str] = &[
    "machine learning",
    "deep learning",
    "neural network",
    "artificial intelligence",
    "ai",
    "llm",
    "nlp",
    "computer vision",
    "reinforcement learning",
    "transformer",
    "embedding",
    "fine-tuning",
    "prompt engineering",
];

static WEB_DEV_TOPICS: &[&str] = &[
    "web development",
    "frontend",
    "backend",
    "fullstack",
    "api design",
    "http",
    "css",
    "html",
    "responsive design",
    "accessibility",
    "authentication",
];

static BUSINESS_TOPICS: &[&str] = &[
    "startup",
    "marketing",
    "sales",
    "revenue",
    "pricing",
    "strategy",
    "funding",
    "product management",
    "hiring",
    "roadmap",
];

static DESIGN_TOPICS: &[&str] = &[
    "design",
    "ux",
    "ui",
    "typography",
    "branding",
    "wireframe",
    "prototype",
    "user research",
    "design system",
];

/// Check a normalized key against one vocabulary term.
///
/// Multi-word terms match as substrings; single-word terms must match a
/// whole word of the key, so "go" does not claim "django".
fn matches_term(key: &str, term: &str) -> bool {
    if term.contains(' ') {
        key.contains(term)
    } else {
        key.split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '+' && c != '#'))
            .any(|w| w == term)
    }
}

/// Ordered-rule categorizer over curated vocabularies
pub struct Categorizer {
    /// Technology rules in priority order; first match wins
    tech_rules: Vec<(&'static str, &'static [&'static str])>,

    /// Topic rules in priority order; first match wins
    topic_rules: Vec<(&'static str, &'static [&'static str])>,

    /// Union of all technology vocabulary for O(1) exact routing checks
    tech_terms: HashSet<&'static str>,
}

impl Categorizer {
    pub fn new() -> Self {
        let tech_rules: Vec<(&'static str, &'static [&'static str])> = vec![
            ("programming_language", PROGRAMMING_LANGUAGES),
            ("framework", FRAMEWORKS),
            ("database", DATABASES),
            ("infrastructure", INFRASTRUCTURE),
        ];

        let topic_rules: Vec<(&'static str, &'static [&'static str])> = vec![
            ("ai_ml", AI_ML_TOPICS),
            ("web_development", WEB_DEV_TOPICS),
            ("business", BUSINESS_TOPICS),
            ("design", DESIGN_TOPICS),
        ];

        let tech_terms: HashSet<&'static str> = tech_rules
            .iter()
            .flat_map(|(_, terms)| terms.iter().copied())
            .collect();

        Self {
            tech_rules,
            topic_rules,
            tech_terms,
        }
    }

    /// Assign a subcategory for a Technology or Topic entity.
    ///
    /// Person and Organization entities carry no category.
    pub fn categorize(&self, raw: &str, variant: EntityVariant) -> Option<&'static str> {
        match variant {
            EntityVariant::Technology => Some(self.categorize_technology(raw)),
            EntityVariant::Topic => Some(self.categorize_topic(raw)),
            EntityVariant::Person | EntityVariant::Organization => None,
        }
    }

    /// First matching technology rule, else the generic fallback
    pub fn categorize_technology(&self, raw: &str) -> &'static str {
        let key = normalize(raw);
        for (category, terms) in &self.tech_rules {
            if terms.iter().any(|term| matches_term(&key, term)) {
                return category;
            }
        }
        GENERAL_TECH
    }

    /// First matching topic rule, else the generic fallback
    pub fn categorize_topic(&self, raw: &str) -> &'static str {
        let key = normalize(raw);
        for (category, terms) in &self.topic_rules {
            if terms.iter().any(|term| matches_term(&key, term)) {
                return category;
            }
        }
        GENERAL_TOPIC
    }

    /// Route an ambiguous extraction label: technology or topic?
    ///
    /// Membership test against the union of the technology vocabularies.
    /// Known limitation: a person or product named after a technology
    /// ("Ruby") will be routed to Technology. Kept as observed.
    pub fn is_technology_term(&self, raw: &str) -> bool {
        let key = normalize(raw);
        if self.tech_terms.contains(key.as_str()) {
            return true;
        }
        self.tech_terms.iter().any(|term| matches_term(&key, term))
    }
}

impl Default for Categorizer {
    fn default() -> Self {
        Self::new()
    }
}

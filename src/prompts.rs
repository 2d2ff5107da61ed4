//! Prompt templates for the two language-model passes.
//!
//! Templates use `{SCHEMA}` / `{QUESTION}` / `{REJECTED}` placeholders and are
//! filled by plain substitution.

/// Prompt for the primary query-generation pass.
pub const QUERY_PROMPT_TEMPLATE: &str = r#"You are a query generator for a recipe, nutrition and food-price database.

The database schema is:
{SCHEMA}

User question:
{QUESTION}

Translate the question into exactly one query, wrapped as:
{
  "collection": "<collection_name>",
  "query": { <field>: <value>, ... },
  "limit": <optional integer>
}

Rules:
- Use only collections and fields from the schema above.
- An empty query object {} means "match everything" and is allowed.
- Return the wrapped query inside a single ```json code block, with no explanation."#;

/// Prompt for the second-pass regeneration after field filtering rejected
/// every key of the generated query.
pub const CLARIFICATION_PROMPT_TEMPLATE: &str = r#"The original query became empty after removing invalid or non-existent fields.

The schema is:
{SCHEMA}

Original user question:
{QUESTION}

The previous query was:
{REJECTED}

---

If the original query was empty ({}), you may simply return:
db.recipes.find({}).limit(1)

Otherwise, please regenerate a valid query wrapped in:
{
  "collection": "<collection_name>",
  "query": { ... },
  "limit": 1
}

Return only one valid query (no explanation), and match the schema exactly.
Use only valid fields from the schema."#;

pub fn build_query_prompt(schema: &str, question: &str) -> String {
    QUERY_PROMPT_TEMPLATE
        .replace("{SCHEMA}", schema)
        .replace("{QUESTION}", question)
}

pub fn build_clarification_prompt(schema: &str, question: &str, rejected: &str) -> String {
    CLARIFICATION_PROMPT_TEMPLATE
        .replace("{SCHEMA}", schema)
        .replace("{QUESTION}", question)
        .replace("{REJECTED}", rejected)
}

//! Community report prompt template.

/// Instructs the model to produce the structured report JSON for one
/// community. `{input_text}` is replaced with the packed community
/// description.
pub(crate) const COMMUNITY_REPORT_PROMPT: &str = r#"You are an analyst writing a structured report about a community of entities extracted from a corpus.

Given the community description below, write a report covering the community's key entities, their relationships, and any noteworthy claims. Assess the community's overall importance on a 0-10 scale.

Return a single JSON object with exactly this shape and no other text:
{
    "title": "<short descriptive community title>",
    "summary": "<executive summary of the community>",
    "rating": <importance rating, 0.0-10.0>,
    "rating_explanation": "<one sentence justifying the rating>",
    "findings": [
        {
            "summary": "<insight headline>",
            "explanation": "<multi-sentence grounded explanation>"
        }
    ]
}

Ground every statement in the description below; do not invent entities or relationships.

Community description:

{input_text}
"#;

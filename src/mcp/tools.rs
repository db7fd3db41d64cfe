//! Normalizes raw tool listings into a uniform internal representation.
//!
//! Servers declare tools with loosely JSON-schema-shaped input blocks and
//! free-text descriptions of wildly varying discipline: some document
//! parameters only in prose, some pretty-print docstrings with indentation,
//! some append an `Args:` section duplicating the schema. Everything here is
//! pure and deterministic so the registry can recompute the list on every
//! connect.

use serde_json::Value;

/// A named, schema-described remote operation exposed by a connected server.
#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    pub kind: ParameterKind,
    pub required: bool,
    pub description: Option<String>,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParameterKind {
    /// Maps a JSON-schema `type` to the internal kind. Integer collapses to
    /// Number; unknown or absent types fall back to String.
    pub fn from_schema_type(schema_type: Option<&str>) -> Self {
        match schema_type {
            Some("number") | Some("integer") => ParameterKind::Number,
            Some("boolean") => ParameterKind::Boolean,
            Some("object") => ParameterKind::Object,
            Some("array") => ParameterKind::Array,
            _ => ParameterKind::String,
        }
    }
}

const ARGS_MARKER: &str = "Args:";

/// Normalizes a raw tool list. Entries without a name are unusable and are
/// skipped. An empty input is a valid, empty result.
pub fn normalize_tools(raw_tools: &[Value]) -> Vec<Tool> {
    raw_tools.iter().filter_map(normalize_tool).collect()
}

fn normalize_tool(raw: &Value) -> Option<Tool> {
    let name = raw.get("name")?.as_str()?.to_string();
    let description = collapse_indentation(
        raw.get("description")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    );

    let empty_schema = serde_json::json!({ "type": "object" });
    let schema = raw.get("inputSchema").unwrap_or(&empty_schema);
    let parameters = normalize_parameters(schema, &description);

    Some(Tool {
        name,
        description: truncate_at_args_marker(&description).to_string(),
        parameters,
    })
}

fn normalize_parameters(schema: &Value, tool_description: &str) -> Vec<ToolParameter> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, property)| {
            let description = property
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| prose_parameter_description(tool_description, name));
            ToolParameter {
                name: name.clone(),
                kind: ParameterKind::from_schema_type(
                    property.get("type").and_then(Value::as_str),
                ),
                required: required.contains(&name.as_str()),
                description,
                default: property.get("default").cloned(),
            }
        })
        .collect()
}

/// Collapses pretty-printed indentation: any newline followed by leading
/// whitespace becomes a bare newline.
fn collapse_indentation(text: &str) -> String {
    let mut lines = text.lines();
    let mut collapsed = String::with_capacity(text.len());
    if let Some(first) = lines.next() {
        collapsed.push_str(first);
    }
    for line in lines {
        collapsed.push('\n');
        collapsed.push_str(line.trim_start());
    }
    collapsed
}

/// Falls back to prose documentation of the form `"<name>: <text>"` when the
/// schema property carries no description of its own.
fn prose_parameter_description(tool_description: &str, parameter: &str) -> Option<String> {
    let prefix = format!("{parameter}:");
    tool_description
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Drops the `Args:` section once its content has been harvested into the
/// parameter list.
fn truncate_at_args_marker(description: &str) -> &str {
    match description.find(ARGS_MARKER) {
        Some(index) => description[..index].trim_end(),
        None => description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_type_maps_to_number_and_required_comes_from_schema_list() {
        let raw = vec![json!({
            "name": "count_rows",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "x": { "type": "integer" }
                },
                "required": ["x"]
            }
        })];

        let tools = normalize_tools(&raw);
        assert_eq!(tools.len(), 1);
        let parameter = &tools[0].parameters[0];
        assert_eq!(parameter.name, "x");
        assert_eq!(parameter.kind, ParameterKind::Number);
        assert!(parameter.required);
    }

    #[test]
    fn property_absent_from_required_list_is_optional() {
        let raw = vec![json!({
            "name": "search",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["query"]
            }
        })];

        let tools = normalize_tools(&raw);
        let limit = tools[0]
            .parameters
            .iter()
            .find(|parameter| parameter.name == "limit")
            .expect("limit parameter should exist");
        assert!(!limit.required);
    }

    #[test]
    fn unknown_and_missing_types_fall_back_to_string() {
        let raw = vec![json!({
            "name": "misc",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "a": { "type": "tuple" },
                    "b": {}
                }
            }
        })];

        let tools = normalize_tools(&raw);
        for parameter in &tools[0].parameters {
            assert_eq!(parameter.kind, ParameterKind::String);
        }
    }

    #[test]
    fn missing_input_schema_yields_no_parameters() {
        let raw = vec![json!({ "name": "ping" })];
        let tools = normalize_tools(&raw);
        assert_eq!(tools.len(), 1);
        assert!(tools[0].parameters.is_empty());
    }

    #[test]
    fn indented_description_lines_are_collapsed() {
        let raw = vec![json!({
            "name": "fetch",
            "description": "Fetch a page.\n    Retries on failure.\n\tReturns HTML."
        })];

        let tools = normalize_tools(&raw);
        assert_eq!(
            tools[0].description,
            "Fetch a page.\nRetries on failure.\nReturns HTML."
        );
    }

    #[test]
    fn prose_description_feeds_undocumented_parameters() {
        let raw = vec![json!({
            "name": "fetch",
            "description": "Fetch a page.\n\nArgs:\n    url: The page to fetch.\n    depth: How deep to crawl.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "url": { "type": "string" },
                    "depth": { "type": "integer", "description": "Crawl depth." }
                },
                "required": ["url"]
            }
        })];

        let tools = normalize_tools(&raw);
        let url = tools[0]
            .parameters
            .iter()
            .find(|parameter| parameter.name == "url")
            .expect("url parameter should exist");
        assert_eq!(url.description.as_deref(), Some("The page to fetch."));

        // The schema's own description wins over prose when both exist.
        let depth = tools[0]
            .parameters
            .iter()
            .find(|parameter| parameter.name == "depth")
            .expect("depth parameter should exist");
        assert_eq!(depth.description.as_deref(), Some("Crawl depth."));
    }

    #[test]
    fn args_section_is_dropped_from_the_description() {
        let raw = vec![json!({
            "name": "fetch",
            "description": "Fetch a page.\n\nArgs:\n    url: The page to fetch."
        })];

        let tools = normalize_tools(&raw);
        assert_eq!(tools[0].description, "Fetch a page.");
    }

    #[test]
    fn defaults_are_carried_through() {
        let raw = vec![json!({
            "name": "search",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "default": 10 }
                }
            }
        })];

        let tools = normalize_tools(&raw);
        assert_eq!(tools[0].parameters[0].default, Some(json!(10)));
    }

    #[test]
    fn empty_tool_list_is_valid() {
        assert!(normalize_tools(&[]).is_empty());
    }

    #[test]
    fn entries_without_a_name_are_skipped() {
        let raw = vec![json!({ "description": "nameless" }), json!({ "name": "ok" })];
        let tools = normalize_tools(&raw);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "ok");
    }
}

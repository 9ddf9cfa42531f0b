use reqwest::Method;
use serde_json::{Map, Value, json};
use vision_core::error::codes;

use crate::ToolError;

/// Batch URL tools accept at most this many URLs per call.
pub(crate) const MAX_URLS_PER_CALL: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ApiVerb {
    Get,
    Post,
}

impl ApiVerb {
    pub(crate) fn as_method(self) -> Method {
        match self {
            ApiVerb::Get => Method::GET,
            ApiVerb::Post => Method::POST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamKind {
    String,
    Integer,
    Boolean,
    StringArray { max_items: Option<usize> },
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ParamDefault {
    Integer(i64),
    String(&'static str),
}

impl ParamDefault {
    fn to_value(self) -> Value {
        match self {
            ParamDefault::Integer(n) => json!(n),
            ParamDefault::String(s) => json!(s),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ParamSpec {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) kind: ParamKind,
    pub(crate) required: bool,
    pub(crate) default: Option<ParamDefault>,
}

const fn required(name: &'static str, description: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        description,
        kind,
        required: true,
        default: None,
    }
}

const fn optional(name: &'static str, description: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        description,
        kind,
        required: false,
        default: None,
    }
}

const fn defaulted(
    name: &'static str,
    description: &'static str,
    kind: ParamKind,
    default: ParamDefault,
) -> ParamSpec {
    ParamSpec {
        name,
        description,
        kind,
        required: false,
        default: Some(default),
    }
}

const DAYS_DESC: &str = "Look-back window in days";
const LANG_DESC: &str = "Language code, e.g. fr or en";
const BAG_UUID_DESC: &str = "UUID of the entities bag";
const HOST_DESC: &str = "Host name, e.g. www.example.com";
const ENTITY_ID_DESC: &str = "Entity identifier";

const URL_BATCH_PARAMS: &[ParamSpec] = &[
    required(
        "urls",
        "URLs or domains to query",
        ParamKind::StringArray {
            max_items: Some(MAX_URLS_PER_CALL),
        },
    ),
    defaulted(
        "days",
        "Look-back window in days (-1 for all time)",
        ParamKind::Integer,
        ParamDefault::Integer(-1),
    ),
    defaulted("lang", LANG_DESC, ParamKind::String, ParamDefault::String("fr")),
];

const BAG_ARTICLES_PARAMS: &[ParamSpec] = &[
    required("bag_uuid", BAG_UUID_DESC, ParamKind::String),
    optional("days", DAYS_DESC, ParamKind::Integer),
    optional("lang", LANG_DESC, ParamKind::String),
];

const HOST_ARTICLES_PARAMS: &[ParamSpec] = &[
    required("host", HOST_DESC, ParamKind::String),
    optional("days", DAYS_DESC, ParamKind::Integer),
    optional("lang", LANG_DESC, ParamKind::String),
    optional("folder", "Restrict to one folder of the host", ParamKind::String),
];

const ENTITY_PARAMS: &[ParamSpec] = &[
    required("entity_id", ENTITY_ID_DESC, ParamKind::String),
    optional("days", DAYS_DESC, ParamKind::Integer),
    optional("lang", LANG_DESC, ParamKind::String),
];

#[derive(Debug)]
pub(crate) struct ToolDefinition {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) verb: ApiVerb,
    pub(crate) endpoint: &'static str,
    pub(crate) params: &'static [ParamSpec],
}

static TOOL_DEFINITIONS: &[ToolDefinition] = &[
    ToolDefinition {
        name: "beta_test",
        description: "Tool to do simple authenticated test.",
        verb: ApiVerb::Get,
        endpoint: "/beta/test",
        params: &[],
    },
    ToolDefinition {
        name: "beta_api_quota",
        description: "Tool returns the user quota (for API calls) remaining for the day.",
        verb: ApiVerb::Get,
        endpoint: "/beta/api_quota",
        params: &[],
    },
    ToolDefinition {
        name: "beta_host_batch",
        description: "Tool returns the top 10 hosts with the most articles of the domain given from the urls list.",
        verb: ApiVerb::Post,
        endpoint: "/beta/host_batch",
        params: &[
            required("urls", "URLs or domains to query", ParamKind::StringArray { max_items: None }),
            defaulted(
                "days",
                "Look-back window in days (-1 for all time)",
                ParamKind::Integer,
                ParamDefault::Integer(-1),
            ),
            defaulted("lang", LANG_DESC, ParamKind::String, ParamDefault::String("fr")),
        ],
    },
    ToolDefinition {
        name: "beta_entities_bag_list",
        description: "Tool returns the list of entities bags for the user.",
        verb: ApiVerb::Get,
        endpoint: "/beta/entities_bag/list",
        params: &[],
    },
    ToolDefinition {
        name: "beta_entities_bag_related_entities",
        description: "Tool returns the list of related entities for the given bag.",
        verb: ApiVerb::Get,
        endpoint: "/beta/entities_bag/related_entities",
        params: &[
            required("bag_uuid", BAG_UUID_DESC, ParamKind::String),
            optional("lang", LANG_DESC, ParamKind::String),
            optional(
                "extra_entities",
                "Include extra entities in the result",
                ParamKind::Boolean,
            ),
        ],
    },
    ToolDefinition {
        name: "beta_entities_bag_latest_articles",
        description: "Tool returns the latest articles for the given bag.",
        verb: ApiVerb::Get,
        endpoint: "/beta/entities_bag/latest_articles",
        params: BAG_ARTICLES_PARAMS,
    },
    ToolDefinition {
        name: "beta_entities_bag_best_articles",
        description: "Tool returns the best articles for the given bag.",
        verb: ApiVerb::Get,
        endpoint: "/beta/entities_bag/best_articles",
        params: BAG_ARTICLES_PARAMS,
    },
    ToolDefinition {
        name: "beta_entities_bag_top_domains",
        description: "Tool returns the top 20 domains for the given bag.",
        verb: ApiVerb::Get,
        endpoint: "/beta/entities_bag/top_domains",
        params: BAG_ARTICLES_PARAMS,
    },
    ToolDefinition {
        name: "wip_livetrends",
        description: "Tool to get livetrends at different importance levels.",
        verb: ApiVerb::Get,
        endpoint: "/wip/livetrends",
        params: &[
            optional("lang", LANG_DESC, ParamKind::String),
            optional("min", "Minimum importance level", ParamKind::Integer),
            optional("no_thing", "Exclude generic things", ParamKind::Boolean),
            optional("less_sport", "Reduce sport-related trends", ParamKind::Boolean),
            optional("topic_id", "Restrict to one topic", ParamKind::Integer),
        ],
    },
    ToolDefinition {
        name: "wip_host_folders",
        description: "Tool returns the folders for the given host.",
        verb: ApiVerb::Get,
        endpoint: "/wip/host/folders",
        params: &[required("host", HOST_DESC, ParamKind::String)],
    },
    ToolDefinition {
        name: "wip_host_latest_articles",
        description: "Tool returns the latest articles for the given host.",
        verb: ApiVerb::Get,
        endpoint: "/wip/host/latest_articles",
        params: HOST_ARTICLES_PARAMS,
    },
    ToolDefinition {
        name: "wip_host_best_articles",
        description: "Tool returns the best articles for the given host.",
        verb: ApiVerb::Get,
        endpoint: "/wip/host/best_articles",
        params: HOST_ARTICLES_PARAMS,
    },
    ToolDefinition {
        name: "wip_urls_entities",
        description: "Tool returns the entities for the given urls (max 50 per call).",
        verb: ApiVerb::Post,
        endpoint: "/wip/urls/entities",
        params: URL_BATCH_PARAMS,
    },
    ToolDefinition {
        name: "wip_urls_topics",
        description: "Tool returns the topics for the given urls (max 50 per call).",
        verb: ApiVerb::Post,
        endpoint: "/wip/urls/topics",
        params: URL_BATCH_PARAMS,
    },
    ToolDefinition {
        name: "wip_entity_latest_articles",
        description: "Tool returns the latest articles for the given entity.",
        verb: ApiVerb::Get,
        endpoint: "/wip/entity/latest_articles",
        params: ENTITY_PARAMS,
    },
    ToolDefinition {
        name: "wip_entity_best_articles",
        description: "Tool returns the best articles for the given entity.",
        verb: ApiVerb::Get,
        endpoint: "/wip/entity/best_articles",
        params: ENTITY_PARAMS,
    },
    ToolDefinition {
        name: "wip_entity_related_entities",
        description: "Tool returns the related entities for the given entity.",
        verb: ApiVerb::Get,
        endpoint: "/wip/entity/related_entities",
        params: ENTITY_PARAMS,
    },
    ToolDefinition {
        name: "partner1_api_quota",
        description: "Tool queries the remaining daily quota and the monthly quota used.",
        verb: ApiVerb::Get,
        endpoint: "/partner1/api_quota",
        params: &[],
    },
    ToolDefinition {
        name: "partner1_host_batch_simple",
        description: "Tool batch queries a list of urls or domains for inclusion of the domain in the db, all times, last 30 days and last 7 days.",
        verb: ApiVerb::Post,
        endpoint: "/partner1/host_batch_simple",
        params: &[required(
            "urls",
            "URLs or domains to query",
            ParamKind::StringArray { max_items: None },
        )],
    },
];

pub(crate) fn tool_definitions() -> &'static [ToolDefinition] {
    TOOL_DEFINITIONS
}

pub(crate) fn find_tool(name: &str) -> Option<&'static ToolDefinition> {
    TOOL_DEFINITIONS.iter().find(|tool| tool.name == name)
}

impl ToolDefinition {
    pub(crate) fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required_fields = Vec::new();
        for param in self.params {
            let mut schema = match param.kind {
                ParamKind::String => json!({ "type": "string" }),
                ParamKind::Integer => json!({ "type": "integer" }),
                ParamKind::Boolean => json!({ "type": "boolean" }),
                ParamKind::StringArray { max_items } => {
                    let mut schema = json!({ "type": "array", "items": { "type": "string" } });
                    if let Some(max_items) = max_items {
                        schema["maxItems"] = json!(max_items);
                    }
                    schema
                }
            };
            schema["description"] = json!(param.description);
            if let Some(default) = param.default {
                schema["default"] = default.to_value();
            }
            if param.required {
                required_fields.push(Value::String(param.name.to_string()));
            }
            properties.insert(param.name.to_string(), schema);
        }

        let mut schema = json!({
            "type": "object",
            "properties": properties,
        });
        if !required_fields.is_empty() {
            schema["required"] = Value::Array(required_fields);
        }
        schema
    }

    /// Validate `args` against the declared parameters and fill in defaults.
    /// Keys that are not declared are dropped.
    pub(crate) fn normalize_arguments(
        &self,
        args: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ToolError> {
        let mut normalized = Map::new();
        for param in self.params {
            match args.get(param.name) {
                None | Some(Value::Null) => {
                    if let Some(default) = param.default {
                        normalized.insert(param.name.to_string(), default.to_value());
                    } else if param.required {
                        return Err(ToolError::new(
                            codes::VALIDATION_FAILED,
                            format!("Missing required field '{}'", param.name),
                        )
                        .with_field(param.name));
                    }
                }
                Some(value) => {
                    let value = validate_param(param, value)?;
                    normalized.insert(param.name.to_string(), value);
                }
            }
        }
        Ok(normalized)
    }
}

fn validate_param(param: &ParamSpec, value: &Value) -> Result<Value, ToolError> {
    let key = param.name;
    match (param.kind, value) {
        (ParamKind::String, Value::String(s)) if param.required && s.trim().is_empty() => Err(
            ToolError::new(codes::VALIDATION_FAILED, format!("'{key}' must not be empty"))
                .with_field(key),
        ),
        (ParamKind::String, Value::String(s)) => Ok(Value::String(s.clone())),
        (ParamKind::String, _) => Err(
            ToolError::new(codes::VALIDATION_FAILED, format!("'{key}' must be a string"))
                .with_field(key),
        ),
        (ParamKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        (ParamKind::Integer, _) => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must be an integer"),
        )
        .with_field(key)),
        (ParamKind::Boolean, Value::Bool(_)) => Ok(value.clone()),
        (ParamKind::Boolean, _) => Err(
            ToolError::new(codes::VALIDATION_FAILED, format!("'{key}' must be a boolean"))
                .with_field(key),
        ),
        (ParamKind::StringArray { max_items }, Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let text = item.as_str().ok_or_else(|| {
                    ToolError::new(
                        codes::VALIDATION_FAILED,
                        format!("'{key}' items must be strings"),
                    )
                    .with_field(key)
                })?;
                let normalized = text.trim();
                if !normalized.is_empty() {
                    out.push(Value::String(normalized.to_string()));
                }
            }
            if param.required && out.is_empty() {
                return Err(ToolError::new(
                    codes::VALIDATION_FAILED,
                    format!("'{key}' must contain at least one entry"),
                )
                .with_field(key));
            }
            if let Some(max_items) = max_items {
                if out.len() > max_items {
                    return Err(ToolError::new(
                        codes::VALIDATION_FAILED,
                        format!("'{key}' accepts at most {max_items} entries per call"),
                    )
                    .with_field(key)
                    .with_details(json!({ "received_count": out.len(), "max_items": max_items })));
                }
            }
            Ok(Value::Array(out))
        }
        (ParamKind::StringArray { .. }, _) => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must be an array of strings"),
        )
        .with_field(key)),
    }
}

/// Flatten validated arguments into query pairs for GET endpoints.
pub(crate) fn query_pairs(args: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in args {
        match value {
            Value::String(s) => pairs.push((key.clone(), s.clone())),
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = item.as_str() {
                        pairs.push((key.clone(), s.to_string()));
                    }
                }
            }
            Value::Null => {}
            other => pairs.push((key.clone(), other.to_string())),
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn catalogue_has_unique_names_and_absolute_endpoints() {
        let mut names = HashSet::new();
        for tool in tool_definitions() {
            assert!(names.insert(tool.name), "duplicate tool {}", tool.name);
            assert!(tool.endpoint.starts_with('/'));
            assert!(!tool.description.is_empty());
        }
        assert_eq!(names.len(), 19);
    }

    #[test]
    fn batch_tools_post_and_lookups_get() {
        assert_eq!(find_tool("beta_host_batch").unwrap().verb, ApiVerb::Post);
        assert_eq!(find_tool("wip_urls_topics").unwrap().verb, ApiVerb::Post);
        assert_eq!(find_tool("wip_livetrends").unwrap().verb, ApiVerb::Get);
        assert!(find_tool("not_a_tool").is_none());
    }

    #[test]
    fn input_schema_lists_required_fields_and_defaults() {
        let schema = find_tool("wip_urls_entities").unwrap().input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["urls"]));
        assert_eq!(schema["properties"]["urls"]["maxItems"], 50);
        assert_eq!(schema["properties"]["days"]["default"], -1);
        assert_eq!(schema["properties"]["lang"]["default"], "fr");

        let no_args = find_tool("beta_test").unwrap().input_schema();
        assert!(no_args.get("required").is_none());
        assert_eq!(no_args["properties"], json!({}));
    }

    #[test]
    fn normalize_fills_defaults_and_drops_unknown_keys() {
        let tool = find_tool("beta_host_batch").unwrap();
        let normalized = tool
            .normalize_arguments(&args(json!({
                "urls": [" https://example.com ", ""],
                "extra": "ignored"
            })))
            .unwrap();
        assert_eq!(
            Value::Object(normalized),
            json!({ "urls": ["https://example.com"], "days": -1, "lang": "fr" })
        );
    }

    #[test]
    fn normalize_rejects_missing_and_mistyped_fields() {
        let tool = find_tool("wip_entity_latest_articles").unwrap();
        let err = tool.normalize_arguments(&Map::new()).unwrap_err();
        assert_eq!(err.code, codes::VALIDATION_FAILED);
        assert_eq!(err.field.as_deref(), Some("entity_id"));

        let err = tool
            .normalize_arguments(&args(json!({ "entity_id": "Q90", "days": "7" })))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("days"));

        let err = tool
            .normalize_arguments(&args(json!({ "entity_id": "Q90", "days": 1.5 })))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("days"));

        let err = tool
            .normalize_arguments(&args(json!({ "entity_id": "  " })))
            .unwrap_err();
        assert!(err.message.contains("must not be empty"));
    }

    #[test]
    fn url_batches_are_capped() {
        let tool = find_tool("wip_urls_topics").unwrap();
        let urls: Vec<String> = (0..=MAX_URLS_PER_CALL)
            .map(|i| format!("https://example.com/{i}"))
            .collect();
        let err = tool
            .normalize_arguments(&args(json!({ "urls": urls.clone() })))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("urls"));

        let ok: Vec<String> = urls.into_iter().take(MAX_URLS_PER_CALL).collect();
        assert!(tool.normalize_arguments(&args(json!({ "urls": ok }))).is_ok());
    }

    #[test]
    fn negative_integers_are_accepted() {
        let tool = find_tool("wip_host_latest_articles").unwrap();
        let normalized = tool
            .normalize_arguments(&args(json!({ "host": "www.lemonde.fr", "days": -1 })))
            .unwrap();
        assert_eq!(normalized["days"], -1);
    }

    #[test]
    fn query_pairs_stringify_scalars() {
        let pairs = query_pairs(&args(json!({
            "bag_uuid": "b-1",
            "days": 7,
            "extra_entities": true
        })));
        assert!(pairs.contains(&("bag_uuid".to_string(), "b-1".to_string())));
        assert!(pairs.contains(&("days".to_string(), "7".to_string())));
        assert!(pairs.contains(&("extra_entities".to_string(), "true".to_string())));
    }
}

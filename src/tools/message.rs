use serde_json::{json, Map, Value};
use tracing::debug;

use super::{input_schema, ContentItem, Tool, ToolContext, ToolDescription, ToolError};
use crate::storage::AccountRegistry;
use crate::template::{self, Template, TemplateKind};

const TEMPLATE_ARG: &str = "template_object";

/// `template_object` may arrive as an object or as a JSON-encoded string.
fn template_argument(args: &Map<String, Value>) -> Result<Value, ToolError> {
    match args.get(TEMPLATE_ARG) {
        None | Some(Value::Null) => Err(ToolError::InvalidArguments(format!(
            "missing required argument '{}'",
            TEMPLATE_ARG
        ))),
        Some(Value::String(encoded)) => serde_json::from_str(encoded)
            .map_err(|e| ToolError::InvalidArguments(format!("{} is not valid JSON: {}", TEMPLATE_ARG, e))),
        Some(value) => Ok(value.clone()),
    }
}

fn send(ctx: &ToolContext<'_>, template: &Template) -> Result<Vec<ContentItem>, ToolError> {
    debug!(account = %ctx.account, object_type = %template.kind(), "sending message to me");
    let response = ctx.api.send_memo(&ctx.credential.access_token, template)?;
    Ok(vec![ContentItem::json(&response)?])
}

fn link_schema() -> Value {
    json!({
        "type": "object",
        "description": "Where the message leads. Missing URLs default to https://developers.kakao.com",
        "properties": {
            "web_url": {"type": "string"},
            "mobile_web_url": {"type": "string"},
            "android_execution_params": {"type": "string"},
            "ios_execution_params": {"type": "string"},
        },
    })
}

fn content_schema(required: &[&str]) -> Value {
    let mut required: Vec<&str> = required.to_vec();
    required.extend(["title", "link"]);
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "description": {"type": "string"},
            "image_url": {"type": "string"},
            "image_width": {"type": "integer"},
            "image_height": {"type": "integer"},
            "link": link_schema(),
        },
        "required": required,
    })
}

fn buttons_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {"title": {"type": "string"}, "link": link_schema()},
            "required": ["title", "link"],
        },
    })
}

/// Schema for one variant's `template_object`, without the discriminator.
fn variant_schema(kind: TemplateKind) -> Value {
    match kind {
        TemplateKind::Text => json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "maxLength": template::MAX_TEXT_CHARS},
                "link": link_schema(),
                "button_title": {"type": "string"},
            },
            "required": ["text", "link"],
        }),
        TemplateKind::Feed => json!({
            "type": "object",
            "properties": {
                "content": content_schema(&["description", "image_url"]),
                "item_content": {"type": "object"},
                "social": {"type": "object"},
                "buttons": buttons_schema(),
            },
            "required": ["content"],
        }),
        TemplateKind::List => json!({
            "type": "object",
            "properties": {
                "header_title": {"type": "string"},
                "header_link": link_schema(),
                "contents": {
                    "type": "array",
                    "minItems": 1,
                    "items": content_schema(&["description", "image_url"]),
                },
                "buttons": buttons_schema(),
            },
            "required": ["header_title", "contents"],
        }),
        TemplateKind::Location => json!({
            "type": "object",
            "properties": {
                "content": content_schema(&["image_url"]),
                "address": {"type": "string"},
                "address_title": {"type": "string"},
                "social": {"type": "object"},
                "buttons": buttons_schema(),
            },
            "required": ["content", "address"],
        }),
        TemplateKind::Calendar => json!({
            "type": "object",
            "properties": {
                "content": content_schema(&["description"]),
                "id_type": {"type": "string", "enum": ["event"]},
                "id": {"type": "string", "description": "Event id"},
                "buttons": buttons_schema(),
            },
            "required": ["content", "id_type", "id"],
        }),
        TemplateKind::Commerce => json!({
            "type": "object",
            "properties": {
                "content": content_schema(&["image_url"]),
                "commerce": {
                    "type": "object",
                    "properties": {
                        "regular_price": {"type": "integer"},
                        "discount_price": {"type": "integer"},
                        "discount_rate": {"type": "integer", "minimum": 0, "maximum": 100},
                        "fixed_discount_price": {"type": "integer"},
                        "product_name": {"type": "string"},
                        "currency_unit": {"type": "string"},
                        "currency_unit_position": {"type": "integer"},
                    },
                    "required": ["regular_price"],
                },
                "buttons": buttons_schema(),
            },
            "required": ["content", "commerce"],
        }),
    }
}

/// Sends any template variant, discriminated by `object_type`.
pub struct SendMessageToMe;

impl Tool for SendMessageToMe {
    fn name(&self) -> &str {
        "send_message_to_me"
    }

    fn describe(&self, accounts: &AccountRegistry) -> ToolDescription {
        let variants: Vec<&str> = TemplateKind::ALL.iter().map(|k| k.as_str()).collect();
        let mut properties = Map::new();
        properties.insert(
            TEMPLATE_ARG.into(),
            json!({
                "type": "object",
                "description": "Kakao message template. object_type selects the variant.",
                "properties": {
                    "object_type": {
                        "type": "string",
                        "enum": variants,
                        "description": "The type of Kakao message to send",
                    },
                },
                "required": ["object_type"],
            }),
        );
        ToolDescription {
            name: self.name().to_string(),
            description: "Sends a kakao talk message to me.".into(),
            input_schema: input_schema(accounts, properties, &[TEMPLATE_ARG]),
        }
    }

    fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &Map<String, Value>,
    ) -> Result<Vec<ContentItem>, ToolError> {
        let template = template::parse(&template_argument(args)?)?;
        send(ctx, &template)
    }
}

/// Sends one fixed template variant; `object_type` is filled in.
pub struct SendTemplateToMe {
    kind: TemplateKind,
    name: String,
}

impl SendTemplateToMe {
    pub fn new(kind: TemplateKind) -> Self {
        Self {
            kind,
            name: format!("send_{}_template_to_me", kind),
        }
    }

    pub fn all() -> Vec<Self> {
        TemplateKind::ALL.into_iter().map(Self::new).collect()
    }
}

impl Tool for SendTemplateToMe {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self, accounts: &AccountRegistry) -> ToolDescription {
        let mut properties = Map::new();
        properties.insert(TEMPLATE_ARG.into(), variant_schema(self.kind));
        ToolDescription {
            name: self.name.clone(),
            description: format!("Sends a kakao talk {} template message to me.", self.kind),
            input_schema: input_schema(accounts, properties, &[TEMPLATE_ARG]),
        }
    }

    fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &Map<String, Value>,
    ) -> Result<Vec<ContentItem>, ToolError> {
        let template = template::parse_as(self.kind, &template_argument(args)?)?;
        send(ctx, &template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test args must be an object"),
        }
    }

    #[test]
    fn template_argument_accepts_encoded_json() {
        let parsed = template_argument(&args(json!({
            "template_object": r#"{"object_type":"text","text":"hi","link":{}}"#
        })))
        .unwrap();
        assert_eq!(parsed["object_type"], "text");
    }

    #[test]
    fn template_argument_is_required() {
        let err = template_argument(&args(json!({}))).unwrap_err();
        assert!(err.to_string().contains("template_object"));

        let err = template_argument(&args(json!({"template_object": "{not json"}))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn per_variant_tools_are_named_after_the_variant() {
        let names: Vec<String> = SendTemplateToMe::all()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names[0], "send_text_template_to_me");
        assert_eq!(names[5], "send_commerce_template_to_me");
    }

    #[test]
    fn variant_schema_lists_required_fields() {
        let description =
            SendTemplateToMe::new(TemplateKind::Calendar).describe(&AccountRegistry::new(vec![]));
        let schema = &description.input_schema["properties"][TEMPLATE_ARG];
        assert_eq!(schema["required"], json!(["content", "id_type", "id"]));
        assert_eq!(
            schema["properties"]["content"]["required"],
            json!(["description", "title", "link"])
        );
    }
}

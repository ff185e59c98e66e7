//! Message template validation.
//!
//! [`parse`] discriminates a JSON payload on `object_type`, checks the
//! variant's required fields, fills in defaults, and returns a typed
//! [`Template`]. Nothing here performs I/O.

mod types;

pub use types::*;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub const DEFAULT_LINK_URL: &str = "https://developers.kakao.com";
pub const DEFAULT_BUTTON_TITLE: &str = "바로 확인";
pub const MAX_TEXT_CHARS: usize = 200;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("template_object must be a JSON object")]
    NotAnObject,
    #[error("object_type is missing")]
    MissingObjectType,
    #[error("unknown object_type {0:?}; expected one of text, feed, list, location, calendar, commerce")]
    UnknownObjectType(String),
    #[error("missing required field '{field}' for {kind} template")]
    MissingField { kind: TemplateKind, field: String },
    #[error("contents cannot be empty for list template")]
    EmptyContents,
    #[error("text must be at most 200 characters for text template, got {0}")]
    TextTooLong(usize),
    #[error("discount_rate must be between 0 and 100 for commerce template, got {0}")]
    DiscountRate(i64),
    #[error("id_type must be \"event\" for calendar template, got {0:?}")]
    IdType(String),
    #[error("invalid {kind} template: {message}")]
    Malformed { kind: TemplateKind, message: String },
}

/// Validate and normalize a template payload.
pub fn parse(payload: &Value) -> Result<Template, ValidationError> {
    let Value::Object(map) = payload else {
        return Err(ValidationError::NotAnObject);
    };
    let kind = match map.get("object_type") {
        None | Some(Value::Null) => return Err(ValidationError::MissingObjectType),
        Some(Value::String(tag)) => TemplateKind::from_tag(tag)
            .ok_or_else(|| ValidationError::UnknownObjectType(tag.clone()))?,
        Some(other) => return Err(ValidationError::UnknownObjectType(other.to_string())),
    };

    let mut map = map.clone();
    map.remove("object_type");
    let checker = Checker { kind };

    let template = match kind {
        TemplateKind::Text => Template::Text(checker.text(map)?),
        TemplateKind::Feed => Template::Feed(checker.feed(map)?),
        TemplateKind::List => Template::List(checker.list(map)?),
        TemplateKind::Location => Template::Location(checker.location(map)?),
        TemplateKind::Calendar => Template::Calendar(checker.calendar(map)?),
        TemplateKind::Commerce => Template::Commerce(checker.commerce(map)?),
    };
    Ok(template)
}

/// [`parse`] with `object_type` forced to `kind`.
pub fn parse_as(kind: TemplateKind, payload: &Value) -> Result<Template, ValidationError> {
    let Value::Object(map) = payload else {
        return Err(ValidationError::NotAnObject);
    };
    let mut map = map.clone();
    map.insert("object_type".into(), Value::String(kind.as_str().into()));
    parse(&Value::Object(map))
}

fn apply_link_defaults(link: &mut Map<String, Value>) {
    for key in ["web_url", "mobile_web_url"] {
        link.entry(key)
            .or_insert_with(|| Value::String(DEFAULT_LINK_URL.into()));
    }
}

fn default_link() -> Value {
    let mut link = Map::new();
    apply_link_defaults(&mut link);
    Value::Object(link)
}

/// Per-variant presence checks; error messages carry the variant.
struct Checker {
    kind: TemplateKind,
}

impl Checker {
    fn missing(&self, field: impl Into<String>) -> ValidationError {
        ValidationError::MissingField {
            kind: self.kind,
            field: field.into(),
        }
    }

    fn malformed(&self, message: impl Into<String>) -> ValidationError {
        ValidationError::Malformed {
            kind: self.kind,
            message: message.into(),
        }
    }

    fn require(
        &self,
        map: &Map<String, Value>,
        key: &str,
        path: &str,
    ) -> Result<(), ValidationError> {
        match map.get(key) {
            None | Some(Value::Null) => Err(self.missing(path)),
            Some(_) => Ok(()),
        }
    }

    fn object_mut<'a>(
        &self,
        map: &'a mut Map<String, Value>,
        key: &str,
        path: &str,
    ) -> Result<&'a mut Map<String, Value>, ValidationError> {
        match map.get_mut(key) {
            None | Some(Value::Null) => Err(self.missing(path)),
            Some(Value::Object(inner)) => Ok(inner),
            Some(_) => Err(self.malformed(format!("{} must be an object", path))),
        }
    }

    /// Required link object at `map[key]`, with URL defaults filled in.
    fn link(&self, map: &mut Map<String, Value>, path: &str) -> Result<(), ValidationError> {
        apply_link_defaults(self.object_mut(map, "link", &format!("{}link", path))?);
        Ok(())
    }

    fn content(
        &self,
        content: &mut Map<String, Value>,
        path: &str,
        required: &[&str],
    ) -> Result<(), ValidationError> {
        self.require(content, "title", &format!("{}title", path))?;
        for key in required {
            self.require(content, key, &format!("{}{}", path, key))?;
        }
        self.link(content, path)
    }

    fn content_field(
        &self,
        map: &mut Map<String, Value>,
        required: &[&str],
    ) -> Result<(), ValidationError> {
        let content = self.object_mut(map, "content", "content")?;
        self.content(content, "content.", required)
    }

    fn buttons(&self, map: &mut Map<String, Value>) -> Result<(), ValidationError> {
        let Some(buttons) = map.get_mut("buttons") else {
            return Ok(());
        };
        let Value::Array(buttons) = buttons else {
            return Err(self.malformed("buttons must be an array"));
        };
        for (i, button) in buttons.iter_mut().enumerate() {
            let path = format!("buttons[{}].", i);
            let Value::Object(button) = button else {
                return Err(self.malformed(format!("buttons[{}] must be an object", i)));
            };
            self.require(button, "title", &format!("{}title", path))?;
            self.link(button, &path)?;
        }
        Ok(())
    }

    fn decode<T: DeserializeOwned>(&self, map: Map<String, Value>) -> Result<T, ValidationError> {
        serde_json::from_value(Value::Object(map)).map_err(|e| self.malformed(e.to_string()))
    }

    fn text(&self, mut map: Map<String, Value>) -> Result<TextTemplate, ValidationError> {
        self.require(&map, "text", "text")?;
        self.link(&mut map, "")?;
        self.buttons(&mut map)?;
        map.entry("button_title")
            .or_insert_with(|| Value::String(DEFAULT_BUTTON_TITLE.into()));

        let template: TextTemplate = self.decode(map)?;
        let len = template.text.chars().count();
        if len > MAX_TEXT_CHARS {
            return Err(ValidationError::TextTooLong(len));
        }
        Ok(template)
    }

    fn feed(&self, mut map: Map<String, Value>) -> Result<FeedTemplate, ValidationError> {
        self.content_field(&mut map, &["description", "image_url"])?;
        self.buttons(&mut map)?;
        self.decode(map)
    }

    fn list(&self, mut map: Map<String, Value>) -> Result<ListTemplate, ValidationError> {
        self.require(&map, "header_title", "header_title")?;

        if matches!(map.get("header_link"), None | Some(Value::Null)) {
            map.insert("header_link".into(), default_link());
        }
        match map.get_mut("header_link") {
            Some(Value::Object(link)) => apply_link_defaults(link),
            _ => return Err(self.malformed("header_link must be an object")),
        }

        let contents = match map.get_mut("contents") {
            None | Some(Value::Null) => return Err(self.missing("contents")),
            Some(Value::Array(contents)) => contents,
            Some(_) => return Err(self.malformed("contents must be an array")),
        };
        if contents.is_empty() {
            return Err(ValidationError::EmptyContents);
        }
        for (i, content) in contents.iter_mut().enumerate() {
            let Value::Object(content) = content else {
                return Err(self.malformed(format!("contents[{}] must be an object", i)));
            };
            self.content(content, &format!("contents[{}].", i), &["description", "image_url"])?;
        }

        self.buttons(&mut map)?;
        self.decode(map)
    }

    fn location(&self, mut map: Map<String, Value>) -> Result<LocationTemplate, ValidationError> {
        self.content_field(&mut map, &["image_url"])?;
        self.require(&map, "address", "address")?;
        map.entry("address_title")
            .or_insert_with(|| Value::String(String::new()));
        self.buttons(&mut map)?;
        self.decode(map)
    }

    fn calendar(&self, mut map: Map<String, Value>) -> Result<CalendarTemplate, ValidationError> {
        self.content_field(&mut map, &["description"])?;
        self.require(&map, "id_type", "id_type")?;
        self.require(&map, "id", "id")?;
        self.buttons(&mut map)?;

        let template: CalendarTemplate = self.decode(map)?;
        if template.id_type != "event" {
            return Err(ValidationError::IdType(template.id_type));
        }
        Ok(template)
    }

    fn commerce(&self, mut map: Map<String, Value>) -> Result<CommerceTemplate, ValidationError> {
        self.content_field(&mut map, &["image_url"])?;
        let commerce = self.object_mut(&mut map, "commerce", "commerce")?;
        self.require(commerce, "regular_price", "commerce.regular_price")?;
        self.buttons(&mut map)?;

        let template: CommerceTemplate = self.decode(map)?;
        if let Some(rate) = template.commerce.discount_rate {
            if !(0..=100).contains(&rate) {
                return Err(ValidationError::DiscountRate(rate));
            }
        }
        Ok(template)
    }
}

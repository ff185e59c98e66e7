use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use super::{input_schema, ContentItem, Tool, ToolContext, ToolDescription, ToolError};
use crate::provider::{CreateSubCalendar, DeleteSubCalendar, UpdateSubCalendar};
use crate::storage::AccountRegistry;

fn request<T: DeserializeOwned>(args: &Map<String, Value>) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args.clone()))
        .map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn settings_properties() -> Map<String, Value> {
    json!({
        "name": {
            "type": "string",
            "description": "The name of the sub calendar",
        },
        "color": {
            "type": "string",
            "description": "The default color for events in the calendar",
        },
        "reminder": {
            "type": "integer",
            "description": "The default reminder time for non-all-day events in minutes",
        },
        "reminder_all_day": {
            "type": "integer",
            "description": "The default reminder time for all-day events in minutes",
        },
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

fn calendar_id_property() -> Value {
    json!({
        "type": "string",
        "description": "The ID of the sub calendar",
    })
}

fn tool_description(
    name: &str,
    description: &str,
    accounts: &AccountRegistry,
    properties: Map<String, Value>,
    required: &[&str],
) -> ToolDescription {
    ToolDescription {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: input_schema(accounts, properties, required),
    }
}

pub struct GetCalendarListTool;

impl Tool for GetCalendarListTool {
    fn name(&self) -> &str {
        "get_calendar_list"
    }

    fn describe(&self, accounts: &AccountRegistry) -> ToolDescription {
        tool_description(
            self.name(),
            "Retrieves the list of user calendars.",
            accounts,
            Map::new(),
            &[],
        )
    }

    fn execute(
        &self,
        ctx: &ToolContext<'_>,
        _args: &Map<String, Value>,
    ) -> Result<Vec<ContentItem>, ToolError> {
        let list = ctx.api.calendars(&ctx.credential.access_token)?;
        Ok(vec![ContentItem::json(&list)?])
    }
}

pub struct CreateSubCalendarTool;

impl Tool for CreateSubCalendarTool {
    fn name(&self) -> &str {
        "create_sub_calendar"
    }

    fn describe(&self, accounts: &AccountRegistry) -> ToolDescription {
        tool_description(
            self.name(),
            "Creates a new sub-calendar for the user.",
            accounts,
            settings_properties(),
            &["name"],
        )
    }

    fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &Map<String, Value>,
    ) -> Result<Vec<ContentItem>, ToolError> {
        let request: CreateSubCalendar = request(args)?;
        let response = ctx.api.create_sub_calendar(&ctx.credential.access_token, &request)?;
        Ok(vec![ContentItem::json(&response)?])
    }
}

pub struct UpdateSubCalendarTool;

impl Tool for UpdateSubCalendarTool {
    fn name(&self) -> &str {
        "update_sub_calendar"
    }

    fn describe(&self, accounts: &AccountRegistry) -> ToolDescription {
        let mut properties = settings_properties();
        properties.insert("calendar_id".into(), calendar_id_property());
        tool_description(
            self.name(),
            "Updates an existing sub-calendar.",
            accounts,
            properties,
            &["calendar_id"],
        )
    }

    fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &Map<String, Value>,
    ) -> Result<Vec<ContentItem>, ToolError> {
        let request: UpdateSubCalendar = request(args)?;
        let response = ctx.api.update_sub_calendar(&ctx.credential.access_token, &request)?;
        Ok(vec![ContentItem::json(&response)?])
    }
}

pub struct DeleteSubCalendarTool;

impl Tool for DeleteSubCalendarTool {
    fn name(&self) -> &str {
        "delete_sub_calendar"
    }

    fn describe(&self, accounts: &AccountRegistry) -> ToolDescription {
        let mut properties = Map::new();
        properties.insert("calendar_id".into(), calendar_id_property());
        tool_description(
            self.name(),
            "Deletes a user's sub-calendar.",
            accounts,
            properties,
            &["calendar_id"],
        )
    }

    fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &Map<String, Value>,
    ) -> Result<Vec<ContentItem>, ToolError> {
        let request: DeleteSubCalendar = request(args)?;
        let response = ctx.api.delete_sub_calendar(&ctx.credential.access_token, &request)?;
        Ok(vec![ContentItem::json(&response)?])
    }
}

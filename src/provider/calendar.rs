use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{ApiError, KakaoApi};

pub const CALENDAR_BASE_PATH: &str = "/v2/api/calendar";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    /// `primary` for the default calendar.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_all_day: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarList {
    #[serde(default)]
    pub calendars: Vec<Calendar>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSubCalendar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_all_day: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSubCalendar {
    pub calendar_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_all_day: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSubCalendar {
    pub calendar_id: String,
}

fn calendar_path(endpoint: &str) -> String {
    format!("{}/{}", CALENDAR_BASE_PATH, endpoint)
}

impl KakaoApi {
    pub fn calendars(&self, access_token: &str) -> Result<CalendarList, ApiError> {
        let value = self.send(self.get(&calendar_path("calendars"), access_token))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Returns the provider's response, normally `{"calendar_id": ...}`.
    pub fn create_sub_calendar(
        &self,
        access_token: &str,
        request: &CreateSubCalendar,
    ) -> Result<Value, ApiError> {
        info!(name = %request.name, "creating sub-calendar");
        self.send(
            self.post(&calendar_path("create/calendar"), access_token)
                .form(request),
        )
    }

    pub fn update_sub_calendar(
        &self,
        access_token: &str,
        request: &UpdateSubCalendar,
    ) -> Result<Value, ApiError> {
        info!(calendar_id = %request.calendar_id, "updating sub-calendar");
        self.send(
            self.post(&calendar_path("update/calendar"), access_token)
                .form(request),
        )
    }

    pub fn delete_sub_calendar(
        &self,
        access_token: &str,
        request: &DeleteSubCalendar,
    ) -> Result<Value, ApiError> {
        info!(calendar_id = %request.calendar_id, "deleting sub-calendar");
        self.send(
            self.delete(&calendar_path("delete/calendar"), access_token)
                .query(request),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[test]
    fn lists_calendars() {
        let mut server = Server::new();
        server
            .mock("GET", "/v2/api/calendar/calendars")
            .match_header("authorization", "Bearer t")
            .with_status(200)
            .with_body(r#"{"calendars":[{"id":"primary","name":"My","color":"LAVENDER","reminder":15}]}"#)
            .create();

        let list = KakaoApi::new(server.url()).calendars("t").unwrap();
        assert_eq!(list.calendars.len(), 1);
        assert_eq!(list.calendars[0].id, "primary");
        assert_eq!(list.calendars[0].reminder, Some(15));
        assert_eq!(list.calendars[0].reminder_all_day, None);
    }

    #[test]
    fn create_posts_only_present_fields() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/v2/api/calendar/create/calendar")
            .match_body(Matcher::Exact("name=Work&reminder=10".into()))
            .with_status(200)
            .with_body(r#"{"calendar_id":"user_abc"}"#)
            .create();

        let request = CreateSubCalendar {
            name: "Work".into(),
            color: None,
            reminder: Some(10),
            reminder_all_day: None,
        };
        let response = KakaoApi::new(server.url()).create_sub_calendar("t", &request).unwrap();
        assert_eq!(response, json!({"calendar_id": "user_abc"}));
        mock.assert();
    }

    #[test]
    fn update_posts_calendar_id() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/v2/api/calendar/update/calendar")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("calendar_id".into(), "user_abc".into()),
                Matcher::UrlEncoded("color".into(), "RED".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"calendar_id":"user_abc"}"#)
            .create();

        let request = UpdateSubCalendar {
            calendar_id: "user_abc".into(),
            name: None,
            color: Some("RED".into()),
            reminder: None,
            reminder_all_day: None,
        };
        KakaoApi::new(server.url()).update_sub_calendar("t", &request).unwrap();
        mock.assert();
    }

    #[test]
    fn delete_sends_calendar_id_as_query() {
        let mut server = Server::new();
        let mock = server
            .mock("DELETE", "/v2/api/calendar/delete/calendar")
            .match_query(Matcher::UrlEncoded("calendar_id".into(), "user_abc".into()))
            .with_status(200)
            .with_body(r#"{"calendar_id":"user_abc"}"#)
            .create();

        let request = DeleteSubCalendar {
            calendar_id: "user_abc".into(),
        };
        KakaoApi::new(server.url()).delete_sub_calendar("t", &request).unwrap();
        mock.assert();
    }
}

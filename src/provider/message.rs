use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, KakaoApi};
use crate::template::Template;

pub const MEMO_SEND_PATH: &str = "/v2/api/talk/memo/default/send";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoResponse {
    pub result_code: i64,
}

impl KakaoApi {
    /// Send a validated template to the user's own chat.
    pub fn send_memo(
        &self,
        access_token: &str,
        template: &Template,
    ) -> Result<MemoResponse, ApiError> {
        let template_object = serde_json::to_string(template)?;
        info!(object_type = %template.kind(), "sending memo");
        let value = self.send(
            self.post(MEMO_SEND_PATH, access_token)
                .form(&[("template_object", template_object)]),
        )?;
        Ok(serde_json::from_value(value)?)
    }
}

//! Storage quota.

use serde_json::json;

use crate::error::Result;
use crate::fs::node::Quota;
use crate::session::Session;

impl Session {
    /// Get storage quota information.
    pub(crate) async fn quota(&self) -> Result<Quota> {
        let response = self
            .api
            .request(json!({"a": "uq", "strg": 1, "xfer": 1}))
            .await?;
        Ok(Quota {
            total: response["mstrg"].as_u64().unwrap_or(0),
            used: response["cstrg"].as_u64().unwrap_or(0),
        })
    }
}

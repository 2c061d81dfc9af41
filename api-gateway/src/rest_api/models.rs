//! Request payloads owned by the gateway
//!
//! Downstream response bodies pass through untyped; only what the gateway
//! itself validates gets a struct.

use crate::error::{GatewayError, Result};
use serde::Deserialize;

const MAX_SEARCH_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub limit: u32,
}

fn default_search_limit() -> u32 {
    20
}

impl SearchRequest {
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(GatewayError::Validation("query must not be empty".into()));
        }
        if self.limit == 0 || self.limit > MAX_SEARCH_LIMIT {
            return Err(GatewayError::Validation(format!(
                "limit must be between 1 and {MAX_SEARCH_LIMIT}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSourceRequest {
    pub name: String,
    pub source_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl CreateSourceRequest {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::Validation("source name is required".into()));
        }
        if self.source_type.trim().is_empty() {
            return Err(GatewayError::Validation("source_type is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSourceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

impl UpdateSourceRequest {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_none() && self.config.is_none() {
            return Err(GatewayError::Validation(
                "at least one of name or config must be provided".into(),
            ));
        }
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(GatewayError::Validation("name must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct InvokeToolRequest {
    #[serde(default)]
    pub args: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_request_rejects_blank_query() {
        let req = SearchRequest {
            query: "   ".into(),
            limit: 10,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn search_request_bounds_limit() {
        let zero = SearchRequest {
            query: "rust".into(),
            limit: 0,
        };
        assert!(zero.validate().is_err());

        let huge = SearchRequest {
            query: "rust".into(),
            limit: 500,
        };
        assert!(huge.validate().is_err());

        let fine = SearchRequest {
            query: "rust".into(),
            limit: 20,
        };
        assert!(fine.validate().is_ok());
    }

    #[test]
    fn search_limit_defaults_when_omitted() {
        let req: SearchRequest = serde_json::from_str(r#"{"query": "rust"}"#).unwrap();
        assert_eq!(req.limit, 20);
    }

    #[test]
    fn create_source_requires_name_and_type() {
        let missing: CreateSourceRequest =
            serde_json::from_str(r#"{"name": "", "source_type": "github"}"#).unwrap();
        assert!(missing.validate().is_err());

        let ok: CreateSourceRequest =
            serde_json::from_str(r#"{"name": "docs", "source_type": "github"}"#).unwrap();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn update_source_requires_some_change() {
        let empty: UpdateSourceRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.validate().is_err());

        let renamed: UpdateSourceRequest =
            serde_json::from_str(r#"{"name": "new-name"}"#).unwrap();
        assert!(renamed.validate().is_ok());
    }
}

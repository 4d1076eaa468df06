//! Request parameters and response bodies of the REST surface

use crate::rest_error::RESTError;
use andamio_common::{
    configuration::ApiConfig,
    model::{CursorState, IndexerMetrics},
    Hash, TxHash,
};
use andamio_module_tx_store::{Page, UtxoEntry};
use serde::{Deserialize, Serialize};

/// `?limit=&offset=` on list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl PageQuery {
    pub fn page(&self, config: &ApiConfig) -> Result<Page, RESTError> {
        let limit = self.limit.unwrap_or(config.default_limit);
        if limit == 0 || limit > config.max_limit {
            return Err(RESTError::invalid_param(
                "limit",
                format!("must be between 1 and {}", config.max_limit),
            ));
        }
        Ok(Page::new(limit, self.offset.unwrap_or(0)))
    }
}

/// `?from_slot=&to_slot=`, both inclusive
#[derive(Debug, Default, Deserialize)]
pub struct SlotRangeQuery {
    pub from_slot: Option<u64>,
    pub to_slot: Option<u64>,
}

impl SlotRangeQuery {
    pub fn bounds(&self) -> Result<(u64, u64), RESTError> {
        let from = self.from_slot.unwrap_or(0);
        let to = self.to_slot.unwrap_or(i64::MAX as u64);
        if from > to {
            return Err(RESTError::invalid_param("from_slot", "must not exceed to_slot"));
        }
        Ok((from, to))
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TrackedAddressRequest {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct CborResponse {
    pub tx_hash: TxHash,
    pub cbor: String,
}

#[derive(Debug, Serialize)]
pub struct UtxoResponse {
    #[serde(flatten)]
    pub entry: UtxoEntry,
    /// Hex of the output's raw encoding, absent once pruned
    pub cbor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub metrics: IndexerMetrics,
    pub cursor: Option<CursorState>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cursor: Option<CursorState>,
}

pub fn parse_hash<const BYTES: usize>(param_name: &str, value: &str) -> Result<Hash<BYTES>, RESTError> {
    value.parse().map_err(|e| RESTError::invalid_param(param_name, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ApiConfig {
        ApiConfig {
            address: "127.0.0.1:0".to_string(),
            default_limit: 20,
            max_limit: 100,
        }
    }

    #[test]
    fn page_defaults_and_bounds() {
        assert_eq!(PageQuery::default().page(&config()).unwrap(), Page::new(20, 0));
        let query = PageQuery {
            limit: Some(100),
            offset: Some(40),
        };
        assert_eq!(query.page(&config()).unwrap(), Page::new(100, 40));
        for limit in [0, 101] {
            let query = PageQuery {
                limit: Some(limit),
                offset: None,
            };
            assert!(matches!(query.page(&config()), Err(RESTError::BadRequest(_))));
        }
    }

    #[test]
    fn slot_range_rejects_inverted_bounds() {
        let range = SlotRangeQuery {
            from_slot: Some(10),
            to_slot: Some(5),
        };
        assert!(range.bounds().is_err());
        assert_eq!(SlotRangeQuery::default().bounds().unwrap().0, 0);
    }

    #[test]
    fn rejects_short_hashes() {
        assert!(parse_hash::<32>("tx_hash", "abcd").is_err());
        assert!(parse_hash::<28>("policy_id", &"ab".repeat(28)).is_ok());
    }
}

//! Venue wire shapes
//!
//! All venue-specific JSON lives here so the strategy never sees it;
//! swapping the venue touches this module and the gateway, nothing else.
//! Outbound requests carry the bot-generated client id as both `reqId`
//! and `orderLinkId`.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Wire ops we emit and classify on
pub const OP_AUTH: &str = "auth";
pub const OP_SUBSCRIBE: &str = "subscribe";
pub const OP_ORDER_CREATE: &str = "order.create";
pub const OP_ORDER_CANCEL: &str = "order.cancel";

/// Private topic carrying per-fill execution reports
pub const TOPIC_EXECUTION: &str = "execution";

// ============================================================================
// Outbound
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreateArgs {
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub qty: String,
    pub price: String,
    pub time_in_force: String,
    pub order_link_id: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelArgs {
    pub symbol: String,
    pub order_link_id: String,
    pub category: String,
}

/// `{op:auth, args:[api_key, expires_ms, hex_digest]}`
pub fn auth_request(api_key: &str, expires_ms: i64, signature: &str) -> String {
    json!({
        "op": OP_AUTH,
        "args": [api_key, expires_ms, signature],
    })
    .to_string()
}

pub fn subscribe_request(topics: &[&str]) -> String {
    json!({
        "op": OP_SUBSCRIBE,
        "args": topics,
    })
    .to_string()
}

pub fn order_create_request(args: &OrderCreateArgs) -> String {
    json!({
        "reqId": args.order_link_id,
        "op": OP_ORDER_CREATE,
        "args": [args],
    })
    .to_string()
}

pub fn order_cancel_request(args: &OrderCancelArgs) -> String {
    json!({
        "reqId": args.order_link_id,
        "op": OP_ORDER_CANCEL,
        "args": [args],
    })
    .to_string()
}

/// Public orderbook subscription topic
pub fn orderbook_topic(depth: u32, symbol: &str) -> String {
    format!("orderbook.{}.{}", depth, symbol)
}

// ============================================================================
// Inbound
// ============================================================================

/// Loose envelope covering op acks and topic pushes. Fields missing from
/// a given message kind deserialize to `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inbound {
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default, rename = "retCode")]
    pub ret_code: Option<i64>,
    #[serde(default, rename = "retMsg")]
    pub ret_msg: Option<String>,
    #[serde(default, rename = "reqId")]
    pub req_id: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn is_ok(&self) -> bool {
        self.ret_code.unwrap_or(0) == 0 && self.success.unwrap_or(true)
    }
}

/// One entry of an `execution` topic push
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionReport {
    #[serde(default)]
    pub symbol: String,
    #[serde(default, rename = "orderLinkId")]
    pub order_link_id: String,
    #[serde(default, rename = "execQty")]
    pub exec_qty: Option<String>,
    #[serde(default, rename = "execPrice")]
    pub exec_price: Option<String>,
}

impl ExecutionReport {
    /// Parse every report in the push's `data` array, skipping entries
    /// that do not deserialize.
    pub fn from_data(data: &serde_json::Value) -> Vec<ExecutionReport> {
        match data.as_array() {
            Some(items) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Public orderbook push payload: side arrays of `[price, qty]` strings
#[derive(Debug, Clone, Deserialize)]
pub struct OrderbookData {
    #[serde(default)]
    pub s: String,
    #[serde(default)]
    pub b: Vec<Vec<String>>,
    #[serde(default)]
    pub a: Vec<Vec<String>>,
    #[serde(default)]
    pub u: Option<u64>,
}

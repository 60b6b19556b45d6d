//! M-Pesa STK push data structures
//!
//! Request/response shapes exchanged with the gateway and the callback
//! envelope the provider posts back to us.

use serde::{Deserialize, Deserializer, Serialize};

/// `ResponseCode` the gateway returns when it has accepted a push or query
pub const ACCEPTED_RESPONSE_CODE: &str = "0";

/// Metadata item carrying the M-Pesa receipt on successful callbacks
pub const RECEIPT_ITEM_NAME: &str = "MpesaReceiptNumber";

/// Push request as the checkout core sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StkPushRequest {
    /// Normalized `254XXXXXXXXX` phone number
    pub phone_number: String,
    /// Whole-unit amount (M-Pesa does not accept decimals)
    pub amount: u64,
    pub account_reference: String,
    pub transaction_desc: String,
}

/// Synchronous acknowledgement of a push request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode", deserialize_with = "string_or_number")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: String,
}

impl StkPushResponse {
    pub fn is_accepted(&self) -> bool {
        self.response_code == ACCEPTED_RESPONSE_CODE
    }
}

/// Status query response. `ResultCode` is absent while the gateway has no
/// result to report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StkQueryResponse {
    #[serde(rename = "ResponseCode", deserialize_with = "string_or_number")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: String,
    #[serde(
        rename = "ResultCode",
        default,
        deserialize_with = "optional_string_or_number"
    )]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
}

/// Callback envelope: `{"Body": {"stkCallback": {...}}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default, skip_serializing_if = "Option::is_none")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl StkCallback {
    /// Value of a named metadata item, rendered as text
    pub fn metadata_value(&self, name: &str) -> Option<String> {
        let items = &self.callback_metadata.as_ref()?.items;
        let value = items.iter().find(|item| item.name == name)?.value.as_ref()?;

        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.metadata_value(RECEIPT_ITEM_NAME)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Int(i64),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::Text(s) => s,
            StringOrNumber::Int(n) => n.to_string(),
        }
    }
}

// The gateway is inconsistent about quoting codes.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<StringOrNumber>::deserialize(deserializer).map(|v| v.map(String::from))
}

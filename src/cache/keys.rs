//! Cache key builders

const PREFIX: &str = "stkpay";

/// OAuth token for a gateway account, shared across instances
pub fn mpesa_access_token(business_short_code: &str) -> String {
    format!("{}:mpesa:token:{}", PREFIX, business_short_code)
}

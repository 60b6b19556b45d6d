//! In-process gateway for local development and tests
//!
//! Accepts pushes with generated correlation ids and answers status queries
//! from a scripted queue. Once the queue is drained every query reports
//! `1032` (still processing).

use crate::error::{AppError, AppResult};
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{StkPushRequest, StkPushResponse, StkQueryResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::info;
use uuid::Uuid;

const PROCESSING_CODE: &str = "1032";
const PROCESSING_DESC: &str = "Request cancelled by user";

/// Most recent pushes kept for inspection
pub const SENT_HISTORY: usize = 64;

/// Scripted answer to the next push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedPush {
    Accept,
    /// `ResponseCode` 0 with the correlation ids left blank
    AcceptWithoutIds,
    Reject { code: String, message: String },
    Unavailable,
}

/// Scripted answer to the next status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedQuery {
    Result { code: String, desc: String },
    /// Query accepted but no `ResultCode` yet
    NoResult,
    Unavailable,
}

impl ScriptedQuery {
    pub fn result(code: impl Into<String>, desc: impl Into<String>) -> Self {
        ScriptedQuery::Result {
            code: code.into(),
            desc: desc.into(),
        }
    }
}

#[derive(Default)]
struct Script {
    pushes: VecDeque<ScriptedPush>,
    queries: VecDeque<ScriptedQuery>,
    sent: VecDeque<StkPushRequest>,
    query_count: usize,
}

#[derive(Default)]
pub struct SimulatedGateway {
    script: Mutex<Script>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_next(&self, answer: ScriptedPush) {
        self.script().pushes.push_back(answer);
    }

    pub fn query_next(&self, answer: ScriptedQuery) {
        self.script().queries.push_back(answer);
    }

    /// Latest push requests, oldest first, at most `SENT_HISTORY`
    pub fn sent_pushes(&self) -> Vec<StkPushRequest> {
        self.script().sent.iter().cloned().collect()
    }

    pub fn query_count(&self) -> usize {
        self.script().query_count
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn stk_push(&self, request: StkPushRequest) -> AppResult<StkPushResponse> {
        let answer = {
            let mut script = self.script();
            if script.sent.len() == SENT_HISTORY {
                script.sent.pop_front();
            }
            script.sent.push_back(request.clone());
            script.pushes.pop_front().unwrap_or(ScriptedPush::Accept)
        };

        match answer {
            ScriptedPush::Accept => {
                let suffix = Uuid::new_v4().simple().to_string();
                let response = StkPushResponse {
                    merchant_request_id: format!("SIM-{}", &suffix[..12]),
                    checkout_request_id: format!("ws_CO_SIM_{}", suffix),
                    response_code: "0".to_string(),
                    response_description: "Success. Request accepted for processing".to_string(),
                    customer_message: "Success. Request accepted for processing".to_string(),
                };
                info!(
                    "Simulated STK push to {}: checkout_request_id={}",
                    request.phone_number, response.checkout_request_id
                );
                Ok(response)
            }
            ScriptedPush::AcceptWithoutIds => Ok(StkPushResponse {
                merchant_request_id: String::new(),
                checkout_request_id: String::new(),
                response_code: "0".to_string(),
                response_description: "Success. Request accepted for processing".to_string(),
                customer_message: "Success. Request accepted for processing".to_string(),
            }),
            ScriptedPush::Reject { code, message } => Ok(StkPushResponse {
                merchant_request_id: String::new(),
                checkout_request_id: String::new(),
                response_code: code,
                response_description: message.clone(),
                customer_message: message,
            }),
            ScriptedPush::Unavailable => Err(AppError::gateway_unavailable(
                "simulated gateway offline",
            )),
        }
    }

    async fn stk_query(&self, checkout_request_id: &str) -> AppResult<StkQueryResponse> {
        let answer = {
            let mut script = self.script();
            script.query_count += 1;
            script
                .queries
                .pop_front()
                .unwrap_or_else(|| ScriptedQuery::result(PROCESSING_CODE, PROCESSING_DESC))
        };

        let (result_code, result_desc) = match answer {
            ScriptedQuery::Result { code, desc } => (Some(code), Some(desc)),
            ScriptedQuery::NoResult => (None, None),
            ScriptedQuery::Unavailable => {
                return Err(AppError::gateway_unavailable("simulated gateway offline"))
            }
        };

        Ok(StkQueryResponse {
            response_code: "0".to_string(),
            response_description: "The service request has been accepted successsfully"
                .to_string(),
            merchant_request_id: String::new(),
            checkout_request_id: checkout_request_id.to_string(),
            result_code,
            result_desc,
        })
    }
}

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::errors::ApiJson;
use crate::app::AppState;
use crate::error::AppError;
use crate::payments::{DonationData, PesapalClient, IPN_ACKNOWLEDGEMENT};

/// Body of `POST /.netlify/functions/pesapal-api`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaymentActionRequest {
    pub action: String,
    pub donation_data: Option<Value>,
}

fn donation_from(data: Option<Value>) -> Result<DonationData, AppError> {
    serde_json::from_value(data.unwrap_or(Value::Null))
        .map_err(|e| AppError::BadRequest(format!("Invalid donation data: {e}")))
}

/// Dispatch one gateway action.
pub async fn process_payment_action(
    client: &PesapalClient,
    request: PaymentActionRequest,
) -> Result<Value, AppError> {
    match request.action.as_str() {
        "test" => Ok(json!({
            "success": true,
            "message": "Pesapal API is reachable",
            "gateway": client.info(),
        })),
        "createPaymentRequest" => {
            let donation = donation_from(request.donation_data)?;
            let payment = client.create_payment_request(&donation).await?;
            Ok(json!({
                "success": true,
                "orderId": payment.order_id,
                "redirectUrl": payment.redirect_url,
            }))
        }
        "checkPaymentStatus" => {
            let donation = donation_from(request.donation_data)?;
            let reference = donation.reference.unwrap_or_default();
            let status = client.check_payment_status(&reference).await?;
            Ok(json!({
                "success": true,
                "reference": reference,
                "status": status,
            }))
        }
        "" => Err(AppError::BadRequest("Missing action".into())),
        other => Err(AppError::BadRequest(format!("Unknown action '{other}'"))),
    }
}

/// Axum handler for `POST /.netlify/functions/pesapal-api`.
pub async fn payment_action_handler(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PaymentActionRequest>,
) -> Result<Json<Value>, AppError> {
    let response = process_payment_action(&state.payments, request).await?;
    Ok(Json(response))
}

/// Fields Pesapal sends with an Instant Payment Notification.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IpnNotification {
    pub notification_type: Option<String>,
    pub tracking_id: Option<String>,
    pub merchant_reference: Option<String>,
}

impl IpnNotification {
    /// Collect fields from the query string, then from a form body.
    /// Body values win over query values.
    pub fn parse(query: Option<&str>, body: &[u8]) -> Self {
        let mut ipn = IpnNotification::default();
        let pairs = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .chain(url::form_urlencoded::parse(body));

        for (key, value) in pairs {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "pesapal_notification_type" => ipn.notification_type = value,
                "pesapal_transaction_tracking_id" => ipn.tracking_id = value,
                "pesapal_merchant_reference" => ipn.merchant_reference = value,
                _ => {}
            }
        }
        ipn
    }
}

/// Axum handler for `GET|POST /.netlify/functions/pesapal-ipn`.
///
/// Always acknowledges; nothing is persisted.
pub async fn ipn_handler(RawQuery(query): RawQuery, body: Bytes) -> impl IntoResponse {
    let ipn = IpnNotification::parse(query.as_deref(), &body);
    tracing::info!(
        notification_type = ipn.notification_type.as_deref().unwrap_or(""),
        tracking_id = ipn.tracking_id.as_deref().unwrap_or(""),
        merchant_reference = ipn.merchant_reference.as_deref().unwrap_or(""),
        "pesapal IPN received"
    );

    ([(CONTENT_TYPE, "application/xml")], IPN_ACKNOWLEDGEMENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PesapalSettings;

    fn client() -> PesapalClient {
        PesapalClient::new(&PesapalSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_test_action_reports_gateway() {
        let request = PaymentActionRequest {
            action: "test".into(),
            donation_data: None,
        };
        let response = process_payment_action(&client(), request).await.unwrap();
        assert_eq!(response["success"], true);
        assert_eq!(response["gateway"]["environment"], "demo");
        assert_eq!(response["gateway"]["credentialsConfigured"], false);
    }

    #[tokio::test]
    async fn test_unknown_action_is_bad_request() {
        let request = PaymentActionRequest {
            action: "refund".into(),
            donation_data: None,
        };
        let result = process_payment_action(&client(), request).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_invalid_donation_is_bad_request() {
        let request = PaymentActionRequest {
            action: "createPaymentRequest".into(),
            donation_data: Some(json!({"amount": "lots", "email": "a@b.c"})),
        };
        let result = process_payment_action(&client(), request).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_ipn_parse_query_and_body() {
        let ipn = IpnNotification::parse(
            Some("pesapal_notification_type=CHANGE&pesapal_merchant_reference=DON-1-AAAAAA"),
            b"pesapal_transaction_tracking_id=abc%2D123",
        );
        assert_eq!(ipn.notification_type.as_deref(), Some("CHANGE"));
        assert_eq!(ipn.merchant_reference.as_deref(), Some("DON-1-AAAAAA"));
        assert_eq!(ipn.tracking_id.as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_ipn_parse_tolerates_garbage() {
        let ipn = IpnNotification::parse(None, b"{\"not\": \"a form\"}");
        assert_eq!(ipn, IpnNotification::default());
    }
}

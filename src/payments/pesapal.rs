use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::{PesapalEnvironment, PesapalSettings};
use crate::error::AppError;
use crate::payments::signature;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POST_ORDER_PATH: &str = "/API/PostPesapalDirectOrderV4";
const QUERY_STATUS_PATH: &str = "/API/QueryPaymentStatusByMerchantRef";

/// Body returned to the gateway for every IPN call.
pub const IPN_ACKNOWLEDGEMENT: &str =
    r#"<?xml version="1.0" encoding="UTF-8"?><response><status>OK</status></response>"#;

/// Donation details as posted by the website's donate form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DonationData {
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: f64,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    /// Merchant reference, only used when checking a payment's status.
    pub reference: Option<String>,
}

impl DonationData {
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(AppError::BadRequest(
                "Donation amount must be greater than zero".into(),
            ));
        }
        if self.email.trim().is_empty() && self.phone_number.trim().is_empty() {
            return Err(AppError::BadRequest(
                "An email address or phone number is required".into(),
            ));
        }
        Ok(())
    }
}

/// The form sends the amount as a number or as the text typed into the field.
fn deserialize_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("amount out of range")),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom("amount must be numeric")),
        serde_json::Value::Null => Ok(0.0),
        _ => Err(serde::de::Error::custom("amount must be numeric")),
    }
}

/// Outcome of a successful order submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub order_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Invalid,
}

impl PaymentStatus {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(PaymentStatus::Pending),
            "COMPLETED" => Some(PaymentStatus::Completed),
            "FAILED" => Some(PaymentStatus::Failed),
            "INVALID" => Some(PaymentStatus::Invalid),
            _ => None,
        }
    }
}

/// Non-secret view of the gateway configuration, for the `test` action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfo {
    pub environment: &'static str,
    pub base_url: String,
    pub credentials_configured: bool,
    pub callback_url: String,
}

struct Credentials {
    consumer_key: String,
    consumer_secret: String,
}

/// Client for Pesapal's legacy OAuth 1.0a API.
pub struct PesapalClient {
    http: reqwest::Client,
    environment: PesapalEnvironment,
    base_url: String,
    credentials: Option<Credentials>,
    callback_url: String,
}

impl PesapalClient {
    pub fn new(settings: &PesapalSettings) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;

        let credentials = (!settings.consumer_key.is_empty() && !settings.consumer_secret.is_empty())
            .then(|| Credentials {
                consumer_key: settings.consumer_key.clone(),
                consumer_secret: settings.consumer_secret.clone(),
            });

        Ok(Self {
            http,
            environment: settings.environment,
            base_url: settings.environment.base_url().to_string(),
            credentials,
            callback_url: settings.callback_url.clone(),
        })
    }

    /// Point the client at another host, e.g. a local stand-in.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn info(&self) -> GatewayInfo {
        GatewayInfo {
            environment: self.environment.as_str(),
            base_url: self.base_url.clone(),
            credentials_configured: self.credentials.is_some(),
            callback_url: self.callback_url.clone(),
        }
    }

    /// Submit a donation order and return where to send the donor.
    pub async fn create_payment_request(
        &self,
        donation: &DonationData,
    ) -> Result<PaymentRequest, AppError> {
        donation.validate()?;

        let order_id = generate_order_id();
        let xml = order_xml(donation, &order_id);
        let url = format!("{}{}", self.base_url, POST_ORDER_PATH);

        let signed = self.signed_params(
            "POST",
            &url,
            vec![
                ("oauth_callback".into(), self.callback_url.clone()),
                ("pesapal_request_data".into(), xml),
            ],
        )?;

        let response = self.http.post(&url).query(&signed).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::error!(%status, %order_id, "pesapal rejected payment request");
            return Err(AppError::Upstream(format!(
                "Payment gateway returned {status}"
            )));
        }

        let redirect_url = response.url().to_string();
        tracing::info!(%order_id, amount = donation.amount, "payment request created");

        Ok(PaymentRequest {
            order_id,
            redirect_url,
        })
    }

    /// Ask the gateway for the state of the order with `reference`.
    pub async fn check_payment_status(&self, reference: &str) -> Result<PaymentStatus, AppError> {
        if reference.trim().is_empty() {
            return Err(AppError::BadRequest("Payment reference is required".into()));
        }

        let url = format!("{}{}", self.base_url, QUERY_STATUS_PATH);
        let signed = self.signed_params(
            "GET",
            &url,
            vec![("pesapal_merchant_reference".into(), reference.to_string())],
        )?;

        let response = self.http.get(&url).query(&signed).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::error!(%status, %reference, "pesapal status query failed");
            return Err(AppError::Upstream(format!(
                "Payment gateway returned {status}"
            )));
        }

        let body = response.text().await?;
        parse_status_response(&body).ok_or_else(|| {
            tracing::error!(%reference, %body, "unrecognized pesapal status response");
            AppError::Upstream("Unrecognized payment status response".into())
        })
    }

    /// Add the OAuth protocol parameters and the signature to `params`.
    fn signed_params(
        &self,
        method: &str,
        url: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<Vec<(String, String)>, AppError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            AppError::Internal("Pesapal credentials are not configured".into())
        })?;

        params.extend([
            ("oauth_consumer_key".into(), credentials.consumer_key.clone()),
            ("oauth_nonce".into(), signature::nonce()),
            ("oauth_signature_method".into(), "HMAC-SHA1".into()),
            ("oauth_timestamp".into(), Utc::now().timestamp().to_string()),
            ("oauth_version".into(), "1.0".into()),
        ]);

        let sig = signature::sign(method, url, &params, &credentials.consumer_secret, "")?;
        params.push(("oauth_signature".into(), sig));
        Ok(params)
    }
}

/// `DON-<unix millis>-<6 uppercase alphanumerics>`
pub fn generate_order_id() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..6)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect();
    format!("DON-{}-{}", Utc::now().timestamp_millis(), suffix)
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// The `PesapalDirectOrderInfo` document describing one order.
pub fn order_xml(donation: &DonationData, order_id: &str) -> String {
    let currency = donation.currency.as_deref().unwrap_or("KES");
    let description = donation.description.as_deref().unwrap_or("Donation");

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<PesapalDirectOrderInfo xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
            r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"Amount="{amount:.2}" Currency="{currency}" Description="{description}" "#,
            r#"Type="MERCHANT" Reference="{reference}" FirstName="{first}" LastName="{last}" "#,
            r#"Email="{email}" PhoneNumber="{phone}" xmlns="http://www.pesapal.com" />"#
        ),
        amount = donation.amount,
        currency = xml_escape(currency),
        description = xml_escape(description),
        reference = xml_escape(order_id),
        first = xml_escape(donation.first_name.trim()),
        last = xml_escape(donation.last_name.trim()),
        email = xml_escape(donation.email.trim()),
        phone = xml_escape(donation.phone_number.trim()),
    )
}

/// Parse `pesapal_response_data=<STATUS>`.
fn parse_status_response(body: &str) -> Option<PaymentStatus> {
    body.trim()
        .split('&')
        .find_map(|pair| pair.strip_prefix("pesapal_response_data="))
        .and_then(PaymentStatus::parse)
}
